// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use strobe_render::{
    ChainStatus, FenceOps, FrameBackend, RenderError, RenderResult, RenderSize, SwapOutcome,
    MAX_FRAMES_IN_FLIGHT,
};
use tracing::{info, warn};

use crate::chain::{Generation, PresentPreference};
use crate::context::{DeviceContext, InstanceContext};
use crate::error::{swap_outcome, VkResultExt};
use crate::pipeline::ShaderSet;
use crate::scene::{Scene, Vertex};
use crate::sync::{CommandPool, FrameSync};
use crate::texture::TextureData;

/// What the current frame is, handed to [`FrameHooks::update_uniforms`].
#[derive(Clone, Copy, Debug)]
pub struct FrameInfo {
    pub slot: usize,
    pub image: u32,
    pub extent: vk::Extent2D,
    pub elapsed: Duration,
    pub frame: u64,
}

/// Open render pass plus the scene bindings (camera block and texture) for
/// the current slot.
pub struct DrawContext<'a> {
    pub device: &'a ash::Device,
    pub cmd: vk::CommandBuffer,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
}

impl DrawContext<'_> {
    /// Bind the slot's uniforms and the vertex buffer, draw every vertex.
    pub fn draw_scene(&self) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                std::slice::from_ref(&self.descriptor_set),
                &[],
            );
            self.device.cmd_bind_vertex_buffers(
                self.cmd,
                0,
                std::slice::from_ref(&self.vertex_buffer),
                &[0],
            );
            self.device.cmd_draw(self.cmd, self.vertex_count, 1, 0, 0);
        }
    }
}

/// Application side of a frame.
pub trait FrameHooks {
    /// Fill the slot's uniform block. Runs before the frame is recorded.
    fn update_uniforms(&mut self, frame: &FrameInfo, uniforms: &mut [u8]);

    fn record_draws(&mut self, draw: &DrawContext<'_>) {
        draw.draw_scene();
    }
}

pub struct VkRendererDesc {
    pub app_name: String,
    pub validation: bool,
    pub present: PresentPreference,
    pub clear_color: [f32; 4],
    pub shaders: ShaderSet,
    pub vertices: Vec<Vertex>,
    pub texture: TextureData,
    pub uniform_size: vk::DeviceSize,
}

/// Vulkan implementation of [`FrameBackend`]. Owns everything from the
/// instance down; the chain generation comes and goes with rebuilds.
pub struct VkRenderer {
    // drop order matters: generation before the pool it allocates from
    generation: Option<Generation>,
    scene: Scene,
    pool: CommandPool,
    hooks: Box<dyn FrameHooks>,
    shaders: ShaderSet,
    present: PresentPreference,
    clear: vk::ClearValue,
    started: Instant,
    frames: u64,
    ctx: Arc<DeviceContext>,
}

impl VkRenderer {
    pub fn new<W>(window: &W, desc: VkRendererDesc, hooks: Box<dyn FrameHooks>) -> RenderResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        unsafe {
            let instance = Arc::new(InstanceContext::new(window, &desc.app_name, desc.validation)?);
            let ctx = DeviceContext::new(instance)?;
            let pool = CommandPool::new(&ctx)?;
            let scene = Scene::new(
                &ctx,
                pool.handle,
                &desc.vertices,
                &desc.texture,
                desc.uniform_size,
                MAX_FRAMES_IN_FLIGHT,
            )?;
            info!(
                "vk renderer ready on {} ({} vertices, validation={})",
                ctx.name,
                scene.vertex_count,
                ctx.instance.validation_enabled()
            );
            let mut renderer = Self {
                generation: None,
                scene,
                pool,
                hooks,
                shaders: desc.shaders,
                present: desc.present,
                clear: vk::ClearValue::default(),
                started: Instant::now(),
                frames: 0,
                ctx,
            };
            renderer.set_clear_color(desc.clear_color);
            Ok(renderer)
        }
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = vk::ClearValue {
            color: vk::ClearColorValue { float32: rgba },
        };
    }

    /// Takes effect at the next rebuild.
    pub fn set_present_preference(&mut self, pref: PresentPreference) {
        self.present = pref;
    }

    pub fn device_name(&self) -> &str {
        &self.ctx.name
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.generation.as_ref().map(Generation::extent)
    }

    fn generation(&self, op: &'static str) -> RenderResult<&Generation> {
        self.generation
            .as_ref()
            .ok_or_else(|| RenderError::device(op, "no presentation chain"))
    }
}

impl FenceOps for VkRenderer {
    type Fence = vk::Fence;

    fn wait_fence(&mut self, fence: &vk::Fence) -> RenderResult<()> {
        unsafe {
            self.ctx
                .device
                .wait_for_fences(std::slice::from_ref(fence), true, u64::MAX)
        }
        .vk("wait_for_fences")
    }

    fn reset_fence(&mut self, fence: &vk::Fence) -> RenderResult<()> {
        unsafe { self.ctx.device.reset_fences(std::slice::from_ref(fence)) }.vk("reset_fences")
    }
}

impl FrameBackend for VkRenderer {
    type Slot = FrameSync;

    fn create_slot(&mut self) -> RenderResult<FrameSync> {
        unsafe { FrameSync::new(&self.ctx) }
    }

    fn has_chain(&self) -> bool {
        self.generation.is_some()
    }

    fn image_count(&self) -> usize {
        self.generation.as_ref().map_or(0, Generation::image_count)
    }

    fn acquire(&mut self, slot: &FrameSync) -> RenderResult<SwapOutcome<u32>> {
        let chain = self.generation("acquire_next_image")?.chain.handle;
        let result = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                chain,
                u64::MAX,
                slot.image_acquired,
                vk::Fence::null(),
            )
        };
        swap_outcome("acquire_next_image", result)
    }

    fn update_frame(&mut self, slot_index: usize, image: u32) -> RenderResult<()> {
        let extent = self.generation("update_frame")?.extent();
        let info = FrameInfo {
            slot: slot_index,
            image,
            extent,
            elapsed: self.started.elapsed(),
            frame: self.frames,
        };
        let uniforms = self
            .scene
            .uniforms
            .get(slot_index)
            .ok_or_else(|| RenderError::device("update_frame", "slot out of range"))?;
        let hooks = &mut self.hooks;
        unsafe { uniforms.with_mapped(|bytes| hooks.update_uniforms(&info, bytes)) }?;
        self.frames += 1;
        Ok(())
    }

    // STRICT PER-FRAME ORDER:
    // 1) reset + begin the image's command buffer
    // 2) render pass into the image's framebuffer
    // 3) bind pipeline, hand off to the hooks
    // 4) end pass, end buffer
    fn record(&mut self, slot_index: usize, image: u32) -> RenderResult<()> {
        let Some(gen) = self.generation.as_ref() else {
            return Err(RenderError::device("record", "no presentation chain"));
        };
        let device = &self.ctx.device;
        let i = image as usize;
        let (Some(&cmd), Some(&framebuffer)) =
            (gen.commands.handles.get(i), gen.framebuffers.handles.get(i))
        else {
            return Err(RenderError::device("record", format!("image {image} out of range")));
        };

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .vk("reset_command_buffer")?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            device
                .begin_command_buffer(cmd, &begin)
                .vk("begin_command_buffer")?;

            let clears = [
                self.clear,
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ];
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: gen.render_pass.handle,
                framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: gen.extent(),
                },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, gen.pipeline.handle);

            let draw = DrawContext {
                device,
                cmd,
                pipeline_layout: gen.pipeline.layout,
                descriptor_set: self.scene.sets[slot_index],
                vertex_buffer: self.scene.vertices.handle,
                vertex_count: self.scene.vertex_count,
            };
            self.hooks.record_draws(&draw);

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd).vk("end_command_buffer")
        }
    }

    fn submit(&mut self, slot: &FrameSync, image: u32) -> RenderResult<()> {
        let gen = self.generation("queue_submit")?;
        let cmd = gen.commands.handles[image as usize];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.image_acquired,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &slot.render_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx.device.queue_submit(
                self.ctx.graphics_queue,
                std::slice::from_ref(&submit),
                slot.in_flight,
            )
        }
        .vk("queue_submit")
    }

    fn present(&mut self, slot: &FrameSync, image: u32) -> RenderResult<SwapOutcome<()>> {
        let chain = self.generation("queue_present")?.chain.handle;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.render_finished,
            swapchain_count: 1,
            p_swapchains: &chain,
            p_image_indices: &image,
            ..Default::default()
        };
        let result = unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present)
        };
        swap_outcome("queue_present", result.map(|suboptimal| ((), suboptimal)))
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.ctx.wait_idle()
    }

    fn rebuild(&mut self, size: RenderSize) -> RenderResult<ChainStatus> {
        // old generation goes first, in its own teardown order
        self.generation = None;
        self.generation = unsafe {
            Generation::build(
                &self.ctx,
                &self.pool,
                &self.shaders,
                self.scene.set_layout,
                size,
                self.present,
            )
        }?;
        Ok(if self.generation.is_some() {
            ChainStatus::Ready
        } else {
            ChainStatus::NotPresentable
        })
    }

    fn release(&mut self) {
        self.generation = None;
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("wait_idle on drop: {e}");
        }
        self.generation = None;
    }
}
