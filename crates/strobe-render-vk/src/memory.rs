// SPDX-License-Identifier: CEPL-1.0
//! Resource factory: memory-type lookup, buffers and images with bound
//! memory, and one-shot staging uploads into buffers and sampled images.
use std::sync::Arc;

use ash::vk;
use strobe_render::{RenderError, RenderResult};

use crate::context::DeviceContext;
use crate::error::VkResultExt;

pub fn find_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    (0..mem.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0 && mem.memory_types[i as usize].property_flags.contains(req)
        })
        .ok_or(RenderError::Unsupported("no suitable memory type"))
}

unsafe fn allocate(
    ctx: &DeviceContext,
    req: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> RenderResult<vk::DeviceMemory> {
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: find_memory_type(&ctx.memory, req.memory_type_bits, props)?,
        ..Default::default()
    };
    ctx.device.allocate_memory(&mai, None).vk("allocate_memory")
}

pub struct Buffer {
    ctx: Arc<DeviceContext>,
    pub handle: vk::Buffer,
    memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl Buffer {
    /// # Safety
    /// `ctx` must be a live device. The buffer must not outlive GPU work
    /// that reads it.
    pub unsafe fn new(
        ctx: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> RenderResult<Self> {
        let device = &ctx.device;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let handle = device.create_buffer(&bci, None).vk("create_buffer")?;
        let req = device.get_buffer_memory_requirements(handle);
        let memory = match allocate(ctx, req, props) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_buffer(handle, None);
                return Err(e);
            }
        };
        let buffer = Self {
            ctx: ctx.clone(),
            handle,
            memory,
            size,
        };
        device
            .bind_buffer_memory(handle, memory, 0)
            .vk("bind_buffer_memory")?;
        Ok(buffer)
    }

    /// # Safety
    /// As [`Buffer::new`].
    pub unsafe fn host_visible(
        ctx: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RenderResult<Self> {
        Self::new(
            ctx,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Map the whole buffer, hand it to `f`, unmap. Host-visible memory only.
    ///
    /// # Safety
    /// The buffer must be host visible and the GPU must not be accessing it.
    pub unsafe fn with_mapped<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> RenderResult<R> {
        let device = &self.ctx.device;
        let ptr = device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .vk("map_memory")?;
        let bytes = std::slice::from_raw_parts_mut(ptr as *mut u8, self.size as usize);
        let out = f(bytes);
        device.unmap_memory(self.memory);
        Ok(out)
    }

    /// # Safety
    /// As [`Buffer::with_mapped`].
    pub unsafe fn write(&self, data: &[u8]) -> RenderResult<()> {
        if data.len() as vk::DeviceSize > self.size {
            return Err(RenderError::device(
                "buffer_write",
                format!("{} bytes into a {} byte buffer", data.len(), self.size),
            ));
        }
        self.with_mapped(|dst| dst[..data.len()].copy_from_slice(data))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_buffer(self.handle, None);
            self.ctx.device.free_memory(self.memory, None);
        }
    }
}

/// A 2D image with bound memory and one view over it.
pub struct Image {
    ctx: Arc<DeviceContext>,
    pub handle: vk::Image,
    pub view: vk::ImageView,
    memory: vk::DeviceMemory,
    pub format: vk::Format,
}

impl Image {
    /// # Safety
    /// `ctx` must be a live device; `aspect` must match `format`.
    pub unsafe fn new_2d(
        ctx: &Arc<DeviceContext>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> RenderResult<Self> {
        let device = &ctx.device;
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let handle = device.create_image(&img_ci, None).vk("create_image")?;
        let req = device.get_image_memory_requirements(handle);
        let memory = match allocate(ctx, req, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_image(handle, None);
                return Err(e);
            }
        };
        let mut image = Self {
            ctx: ctx.clone(),
            handle,
            view: vk::ImageView::null(),
            memory,
            format,
        };
        device
            .bind_image_memory(handle, memory, 0)
            .vk("bind_image_memory")?;

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: handle,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        image.view = device
            .create_image_view(&view_ci, None)
            .vk("create_image_view")?;
        Ok(image)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.ctx.device.destroy_image_view(self.view, None);
            }
            self.ctx.device.destroy_image(self.handle, None);
            self.ctx.device.free_memory(self.memory, None);
        }
    }
}

/// Access masks and stages for a layout change, as
/// `(src_access, dst_access, src_stage, dst_stage)`. Only the two
/// transitions an upload needs are known.
pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RenderResult<(
    vk::AccessFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
)> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok((
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok((
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )),
        _ => Err(RenderError::Unsupported("image layout transition")),
    }
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

struct Transition {
    barrier: vk::ImageMemoryBarrier<'static>,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
}

impl Transition {
    fn new(image: vk::Image, old: vk::ImageLayout, new: vk::ImageLayout) -> RenderResult<Self> {
        let (src_access, dst_access, src_stage, dst_stage) = transition_masks(old, new)?;
        Ok(Self {
            barrier: vk::ImageMemoryBarrier {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                src_access_mask: src_access,
                dst_access_mask: dst_access,
                old_layout: old,
                new_layout: new,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image,
                subresource_range: color_range(),
                ..Default::default()
            },
            src_stage,
            dst_stage,
        })
    }

    unsafe fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_pipeline_barrier(
            cmd,
            self.src_stage,
            self.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&self.barrier),
        );
    }
}

/// One-shot staging upload: host -> staging -> `dst`, on the graphics
/// queue, waiting until the copy is done.
///
/// # Safety
/// `pool` must belong to the graphics family and `dst` must not be in use by
/// the GPU.
pub unsafe fn upload_via_staging(
    ctx: &Arc<DeviceContext>,
    pool: vk::CommandPool,
    dst: &Buffer,
    src: &[u8],
) -> RenderResult<()> {
    let size = src.len() as vk::DeviceSize;
    let staging = Buffer::host_visible(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    staging.write(src)?;

    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    one_shot(ctx, pool, |device, cmd| unsafe {
        device.cmd_copy_buffer(cmd, staging.handle, dst.handle, std::slice::from_ref(&region));
    })
}

/// Fill a freshly created color image from `src` and leave it ready for
/// fragment shader reads.
///
/// # Safety
/// As [`upload_via_staging`]; `dst` must still be in `UNDEFINED` layout and
/// carry `TRANSFER_DST` usage.
pub unsafe fn upload_image_via_staging(
    ctx: &Arc<DeviceContext>,
    pool: vk::CommandPool,
    dst: &Image,
    extent: vk::Extent2D,
    src: &[u8],
) -> RenderResult<()> {
    let staging = Buffer::host_visible(
        ctx,
        src.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
    )?;
    staging.write(src)?;

    let to_dst = Transition::new(
        dst.handle,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;
    let to_read = Transition::new(
        dst.handle,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )?;
    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    };
    one_shot(ctx, pool, |device, cmd| unsafe {
        to_dst.record(device, cmd);
        device.cmd_copy_buffer_to_image(
            cmd,
            staging.handle,
            dst.handle,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );
        to_read.record(device, cmd);
    })
}

/// Record `f` into a throwaway command buffer, submit it on the graphics
/// queue and wait for the queue to drain.
unsafe fn one_shot(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    f: impl FnOnce(&ash::Device, vk::CommandBuffer),
) -> RenderResult<()> {
    let device = &ctx.device;
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = device
        .allocate_command_buffers(&ai)
        .vk("allocate_command_buffers")?[0];

    let result = submit_one_shot(ctx, cmd, f);

    device.free_command_buffers(pool, std::slice::from_ref(&cmd));
    result
}

unsafe fn submit_one_shot(
    ctx: &DeviceContext,
    cmd: vk::CommandBuffer,
    f: impl FnOnce(&ash::Device, vk::CommandBuffer),
) -> RenderResult<()> {
    let device = &ctx.device;
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    device
        .begin_command_buffer(cmd, &bi)
        .vk("begin_command_buffer")?;
    f(device, cmd);
    device.end_command_buffer(cmd).vk("end_command_buffer")?;

    let si = vk::SubmitInfo {
        s_type: vk::StructureType::SUBMIT_INFO,
        command_buffer_count: 1,
        p_command_buffers: &cmd,
        ..Default::default()
    };
    device
        .queue_submit(ctx.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())
        .vk("queue_submit")?;
    device
        .queue_wait_idle(ctx.graphics_queue)
        .vk("queue_wait_idle")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut mem = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            mem.memory_types[i].property_flags = flags;
        }
        mem
    }

    #[test]
    fn memory_type_honours_type_bits_and_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let mem = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, host]);

        assert_eq!(find_memory_type(&mem, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&mem, 0b100, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&mem, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn missing_memory_type_is_an_error() {
        let mem = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&mem, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(err, RenderError::Unsupported(_)));
    }

    #[test]
    fn upload_transitions_order_transfer_before_sampling() {
        let (_, dst_access, _, dst_stage) = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

        let (src_access, dst_access, src_stage, dst_stage) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn unknown_transition_is_unsupported() {
        let err = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::Unsupported(_)));
    }

    #[test]
    fn transition_barrier_covers_the_color_image() {
        let t = Transition::new(
            vk::Image::null(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(t.barrier.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(t.barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(t.barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(t.barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }
}
