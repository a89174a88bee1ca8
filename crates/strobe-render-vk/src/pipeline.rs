// SPDX-License-Identifier: CEPL-1.0
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::util::read_spv;
use ash::vk;
use strobe_render::{RenderError, RenderResult};

use crate::context::DeviceContext;
use crate::error::VkResultExt;
use crate::scene::Vertex;

/// Vertex + fragment SPIR-V, kept as words so pipelines can be rebuilt
/// without touching the filesystem again.
#[derive(Clone, Debug)]
pub struct ShaderSet {
    pub vert: Vec<u32>,
    pub frag: Vec<u32>,
}

impl ShaderSet {
    pub fn from_bytes(vert: &[u8], frag: &[u8]) -> RenderResult<Self> {
        let words = |name: &str, bytes: &[u8]| {
            read_spv(&mut Cursor::new(bytes))
                .map_err(|e| RenderError::Shader(format!("{name}: {e}")))
        };
        Ok(Self {
            vert: words("vertex", vert)?,
            frag: words("fragment", frag)?,
        })
    }

    pub fn from_files(vert: &Path, frag: &Path) -> RenderResult<Self> {
        let read = |p: &Path| {
            std::fs::read(p).map_err(|e| RenderError::Shader(format!("{}: {e}", p.display())))
        };
        Self::from_bytes(&read(vert)?, &read(frag)?)
    }

    /// Shaders compiled from `shaders/` at build time.
    #[cfg(feature = "builtin-shaders")]
    pub fn builtin() -> RenderResult<Self> {
        Self::from_bytes(
            include_bytes!(concat!(env!("OUT_DIR"), "/cube.vert.spv")),
            include_bytes!(concat!(env!("OUT_DIR"), "/cube.frag.spv")),
        )
    }
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

pub struct RenderPass {
    ctx: Arc<DeviceContext>,
    pub handle: vk::RenderPass,
}

impl RenderPass {
    /// Color cleared and handed to presentation, depth cleared and dropped.
    ///
    /// # Safety
    /// `ctx` must be a live device.
    pub unsafe fn new(
        ctx: &Arc<DeviceContext>,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RenderResult<Self> {
        let attachments = [
            vk::AttachmentDescription {
                format: color_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..Default::default()
            },
            vk::AttachmentDescription {
                format: depth_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            },
        ];
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: &depth_ref,
            ..Default::default()
        };
        // image-acquired is waited at COLOR_ATTACHMENT_OUTPUT; the layout
        // transition must not start before it
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        };
        let ci = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let handle = ctx
            .device
            .create_render_pass(&ci, None)
            .vk("create_render_pass")?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_render_pass(self.handle, None) };
    }
}

pub struct Pipeline {
    ctx: Arc<DeviceContext>,
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

unsafe fn shader_module(device: &ash::Device, code: &[u32]) -> RenderResult<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: std::mem::size_of_val(code),
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .vk("create_shader_module")
}

impl Pipeline {
    /// STRICT: viewport and scissor are baked from `extent`, so the
    /// pipeline is only valid for the chain it was built with.
    ///
    /// # Safety
    /// `render_pass` and `set_layout` must outlive the pipeline.
    pub unsafe fn new(
        ctx: &Arc<DeviceContext>,
        shaders: &ShaderSet,
        render_pass: &RenderPass,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let device = &ctx.device;

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &set_layout,
            ..Default::default()
        };
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .vk("create_pipeline_layout")?;
        let mut pipeline = Self {
            ctx: ctx.clone(),
            handle: vk::Pipeline::null(),
            layout,
        };

        let vs = shader_module(device, &shaders.vert)?;
        let fs = match shader_module(device, &shaders.frag) {
            Ok(fs) => fs,
            Err(e) => {
                device.destroy_shader_module(vs, None);
                return Err(e);
            }
        };
        let entry = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        let binding = Vertex::binding();
        let attributes = Vertex::attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &binding,
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: &viewport,
            scissor_count: 1,
            p_scissors: &scissor,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: vk::TRUE,
            depth_write_enable: vk::TRUE,
            depth_compare_op: vk::CompareOp::LESS,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            layout,
            render_pass: render_pass.handle,
            subpass: 0,
            ..Default::default()
        };

        let created = device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        );
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);

        pipeline.handle = match created {
            Ok(p) => p[0],
            Err((_, err)) => return Err(crate::error::vk_error("create_graphics_pipelines", err)),
        };
        Ok(pipeline)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            if self.handle != vk::Pipeline::null() {
                self.ctx.device.destroy_pipeline(self.handle, None);
            }
            self.ctx.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// One framebuffer per chain image, all sharing the depth view.
pub struct Framebuffers {
    ctx: Arc<DeviceContext>,
    pub handles: Vec<vk::Framebuffer>,
}

impl Framebuffers {
    /// # Safety
    /// The views and `render_pass` must outlive the framebuffers.
    pub unsafe fn new(
        ctx: &Arc<DeviceContext>,
        render_pass: &RenderPass,
        color_views: &[vk::ImageView],
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let mut fbs = Self {
            ctx: ctx.clone(),
            handles: Vec::with_capacity(color_views.len()),
        };
        for &view in color_views {
            let attachments = [view, depth_view];
            let ci = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: render_pass.handle,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = ctx
                .device
                .create_framebuffer(&ci, None)
                .vk("create_framebuffer")?;
            fbs.handles.push(fb);
        }
        Ok(fbs)
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &fb in &self.handles {
                self.ctx.device.destroy_framebuffer(fb, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stencil_formats_get_both_aspects() {
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn spirv_must_be_word_aligned() {
        let err = ShaderSet::from_bytes(&[1, 2, 3], &[]).unwrap_err();
        assert!(matches!(err, RenderError::Shader(_)));
    }

    #[test]
    fn spirv_words_are_decoded() {
        // magic number followed by one word, little endian
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x2a, 0x00, 0x00, 0x00];
        let set = ShaderSet::from_bytes(&bytes, &bytes).unwrap();
        assert_eq!(set.vert, vec![0x0723_0203, 42]);
        assert_eq!(set.frag.len(), 2);
    }

    #[test]
    fn missing_shader_file_names_the_path() {
        let err = ShaderSet::from_files(Path::new("/nonexistent/a.spv"), Path::new("b.spv"))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/a.spv"));
    }
}
