// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use strobe_render::{FrameSlot, RenderResult};

use crate::context::DeviceContext;
use crate::error::VkResultExt;

/// One frame slot: CPU-wait fence (created signaled) plus the two
/// semaphores ordering acquire → render → present on the GPU.
pub struct FrameSync {
    ctx: Arc<DeviceContext>,
    pub in_flight: vk::Fence,
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    /// # Safety
    /// `ctx` must be a live device.
    pub unsafe fn new(ctx: &Arc<DeviceContext>) -> RenderResult<Self> {
        let device = &ctx.device;
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let mut sync = Self {
            ctx: ctx.clone(),
            in_flight: vk::Fence::null(),
            image_acquired: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
        };
        sync.in_flight = device.create_fence(&fence_ci, None).vk("create_fence")?;
        sync.image_acquired = device
            .create_semaphore(&sem_ci, None)
            .vk("create_semaphore")?;
        sync.render_finished = device
            .create_semaphore(&sem_ci, None)
            .vk("create_semaphore")?;
        Ok(sync)
    }
}

impl FrameSlot for FrameSync {
    type Fence = vk::Fence;

    fn fence(&self) -> &vk::Fence {
        &self.in_flight
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        let device = &self.ctx.device;
        unsafe {
            if self.render_finished != vk::Semaphore::null() {
                device.destroy_semaphore(self.render_finished, None);
            }
            if self.image_acquired != vk::Semaphore::null() {
                device.destroy_semaphore(self.image_acquired, None);
            }
            if self.in_flight != vk::Fence::null() {
                device.destroy_fence(self.in_flight, None);
            }
        }
    }
}

/// Pool for the per-image command buffers and one-shot uploads.
pub struct CommandPool {
    ctx: Arc<DeviceContext>,
    pub handle: vk::CommandPool,
}

impl CommandPool {
    /// # Safety
    /// `ctx` must be a live device.
    pub unsafe fn new(ctx: &Arc<DeviceContext>) -> RenderResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.families.graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let handle = ctx
            .device
            .create_command_pool(&pool_info, None)
            .vk("create_command_pool")?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_command_pool(self.handle, None) };
    }
}

/// Primary command buffers, one per chain image, freed back to their pool.
pub struct CommandBuffers {
    ctx: Arc<DeviceContext>,
    pool: vk::CommandPool,
    pub handles: Vec<vk::CommandBuffer>,
}

impl CommandBuffers {
    /// # Safety
    /// `pool` must outlive the buffers.
    pub unsafe fn new(
        ctx: &Arc<DeviceContext>,
        pool: &CommandPool,
        count: usize,
    ) -> RenderResult<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool.handle,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        let handles = ctx
            .device
            .allocate_command_buffers(&alloc_info)
            .vk("allocate_command_buffers")?;
        Ok(Self {
            ctx: ctx.clone(),
            pool: pool.handle,
            handles,
        })
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            unsafe {
                self.ctx
                    .device
                    .free_command_buffers(self.pool, &self.handles)
            };
        }
    }
}
