// SPDX-License-Identifier: CEPL-1.0
//! Presentation chain builder.
//!
//! [`plan_chain`] turns surface support plus a drawable size into the
//! chain's parameters and nothing else, so it can be tested without a GPU.
//! [`Generation::build`] creates the chain and every resource sized from it.
use std::sync::Arc;

use ash::vk;
use strobe_render::{RenderError, RenderResult, RenderSize};
use tracing::{debug, info};

use crate::context::{DeviceContext, QueueFamilies};
use crate::error::VkResultExt;
use crate::memory::Image;
use crate::pipeline::{depth_aspect, Framebuffers, Pipeline, RenderPass, ShaderSet};
use crate::sync::{CommandBuffers, CommandPool};

/// Floor on the chain's image count, so at least one image can be drawn
/// while another is on screen.
pub const MIN_IMAGES: u32 = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPreference {
    /// MAILBOX when available: no tearing, lowest latency.
    #[default]
    LowLatency,
    /// FIFO: strict vertical sync.
    Vsync,
}

#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// # Safety
    /// `ctx` must hold a live surface and device.
    pub unsafe fn query(ctx: &DeviceContext) -> RenderResult<Self> {
        let loader = ctx.surface_loader();
        let surface = ctx.surface();
        Ok(Self {
            caps: loader
                .get_physical_device_surface_capabilities(ctx.phys, surface)
                .vk("get_physical_device_surface_capabilities")?,
            formats: loader
                .get_physical_device_surface_formats(ctx.phys, surface)
                .vk("get_physical_device_surface_formats")?,
            present_modes: loader
                .get_physical_device_surface_present_modes(ctx.phys, surface)
                .vk("get_physical_device_surface_present_modes")?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainPlan {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing: vk::SharingMode,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> RenderResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .ok_or(RenderError::Unsupported("surface reports no formats"))
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentPreference,
) -> vk::PresentModeKHR {
    let wanted: &[vk::PresentModeKHR] = match pref {
        PresentPreference::LowLatency => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        PresentPreference::Vsync => &[vk::PresentModeKHR::FIFO],
    };
    wanted
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .or_else(|| modes.first().copied())
        // FIFO support is mandatory
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's own extent wins unless it is the `u32::MAX` "pick one"
/// sentinel, in which case the drawable size is clamped into range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: drawable
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: drawable
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count.max(MIN_IMAGES);
    // max_image_count == 0 means no upper bound
    if caps.max_image_count == 0 {
        wanted
    } else {
        wanted.min(caps.max_image_count)
    }
}

pub fn choose_sharing(families: QueueFamilies) -> vk::SharingMode {
    if families.shared() {
        vk::SharingMode::EXCLUSIVE
    } else {
        vk::SharingMode::CONCURRENT
    }
}

/// `Ok(None)` when the surface currently has no area to present to, even
/// though the window reported a non-zero size. A chain must not be created
/// with a zero extent.
pub fn plan_chain(
    support: &SurfaceSupport,
    drawable: RenderSize,
    families: QueueFamilies,
    pref: PresentPreference,
) -> RenderResult<Option<ChainPlan>> {
    let format = choose_surface_format(&support.formats)?;
    let extent = choose_extent(&support.caps, drawable);
    if extent.width == 0 || extent.height == 0 {
        return Ok(None);
    }
    Ok(Some(ChainPlan {
        format: format.format,
        color_space: format.color_space,
        present_mode: choose_present_mode(&support.present_modes, pref),
        extent,
        image_count: choose_image_count(&support.caps),
        sharing: choose_sharing(families),
        pre_transform: support.caps.current_transform,
    }))
}

/// The swapchain with its images and one color view per image.
pub struct Swapchain {
    ctx: Arc<DeviceContext>,
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub plan: ChainPlan,
}

impl Swapchain {
    /// # Safety
    /// No other chain may exist on the surface (`old_swapchain` is null), and
    /// `plan` must come from [`plan_chain`] for this surface.
    pub unsafe fn new(ctx: &Arc<DeviceContext>, plan: ChainPlan) -> RenderResult<Self> {
        let families = ctx.families.unique();
        let (family_count, p_families) = match plan.sharing {
            vk::SharingMode::CONCURRENT => (families.len() as u32, families.as_ptr()),
            _ => (0, std::ptr::null()),
        };
        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface(),
            min_image_count: plan.image_count,
            image_format: plan.format,
            image_color_space: plan.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: plan.sharing,
            queue_family_index_count: family_count,
            p_queue_family_indices: p_families,
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        let loader = &ctx.swapchain_loader;
        let handle = loader
            .create_swapchain(&swap_info, None)
            .vk("create_swapchain")?;
        let mut chain = Self {
            ctx: ctx.clone(),
            handle,
            images: Vec::new(),
            views: Vec::new(),
            plan,
        };
        chain.images = loader
            .get_swapchain_images(handle)
            .vk("get_swapchain_images")?;

        for &image in &chain.images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: plan.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = ctx
                .device
                .create_image_view(&iv_info, None)
                .vk("create_image_view")?;
            chain.views.push(view);
        }
        Ok(chain)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.views {
                self.ctx.device.destroy_image_view(view, None);
            }
            self.ctx.swapchain_loader.destroy_swapchain(self.handle, None);
        }
    }
}

/// Everything sized from one chain. Fields drop top to bottom:
/// command buffers, framebuffers, pipeline, render pass, depth, chain.
///
/// The type parameters only exist so the teardown order can be checked
/// without a device; every real use takes the defaults.
pub struct Generation<
    Cmds = CommandBuffers,
    Fbs = Framebuffers,
    Pipe = Pipeline,
    Pass = RenderPass,
    Depth = Image,
    Chain = Swapchain,
> {
    pub commands: Cmds,
    pub framebuffers: Fbs,
    pub pipeline: Pipe,
    pub render_pass: Pass,
    pub depth: Depth,
    pub chain: Chain,
}

impl Generation {
    /// `Ok(None)` when the surface has no presentable area yet.
    ///
    /// # Safety
    /// The device must be idle and no previous generation alive: the old
    /// chain is not passed as `old_swapchain`.
    pub unsafe fn build(
        ctx: &Arc<DeviceContext>,
        pool: &CommandPool,
        shaders: &ShaderSet,
        set_layout: vk::DescriptorSetLayout,
        drawable: RenderSize,
        pref: PresentPreference,
    ) -> RenderResult<Option<Self>> {
        let support = SurfaceSupport::query(ctx)?;
        let Some(plan) = plan_chain(&support, drawable, ctx.families, pref)? else {
            info!(
                "surface extent is {}x{}, not building a chain",
                support.caps.current_extent.width, support.caps.current_extent.height
            );
            return Ok(None);
        };
        info!(
            "chain: {:?} / {:?}, {:?}, {}x{}, {} images (min {} max {}), {:?}",
            plan.format,
            plan.color_space,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height,
            plan.image_count,
            support.caps.min_image_count,
            support.caps.max_image_count,
            plan.sharing,
        );

        // STRICT ORDER: chain → depth → pass → pipeline → framebuffers → commands
        let chain = Swapchain::new(ctx, plan)?;
        let depth = Image::new_2d(
            ctx,
            plan.extent,
            ctx.depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            depth_aspect(ctx.depth_format),
        )?;
        let render_pass = RenderPass::new(ctx, plan.format, ctx.depth_format)?;
        let pipeline = Pipeline::new(ctx, shaders, &render_pass, set_layout, plan.extent)?;
        let framebuffers =
            Framebuffers::new(ctx, &render_pass, &chain.views, depth.view, plan.extent)?;
        let commands = CommandBuffers::new(ctx, pool, chain.images.len())?;
        debug!("generation built with {} images", chain.images.len());

        Ok(Some(Self {
            commands,
            framebuffers,
            pipeline,
            render_pass,
            depth,
            chain,
        }))
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.chain.plan.extent
    }

    pub fn image_count(&self) -> usize {
        self.chain.images.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SHARED: QueueFamilies = QueueFamilies {
        graphics: 0,
        present: 0,
    };

    fn sentinel_caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn support() -> SurfaceSupport {
        SurfaceSupport {
            caps: sentinel_caps(),
            formats: vec![
                format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    fn extent(w: u32, h: u32) -> vk::Extent2D {
        vk::Extent2D {
            width: w,
            height: h,
        }
    }

    #[test]
    fn sentinel_extent_is_clamped_into_range() {
        let caps = sentinel_caps();
        assert_eq!(choose_extent(&caps, RenderSize::new(10, 10)), extent(64, 64));
        assert_eq!(
            choose_extent(&caps, RenderSize::new(8000, 8000)),
            extent(4096, 4096)
        );
        assert_eq!(choose_extent(&caps, RenderSize::new(800, 600)), extent(800, 600));
    }

    #[test]
    fn surface_extent_wins_when_defined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1280, 720),
            ..sentinel_caps()
        };
        assert_eq!(choose_extent(&caps, RenderSize::new(800, 600)), extent(1280, 720));
    }

    #[test]
    fn image_count_has_a_floor_of_two() {
        assert_eq!(choose_image_count(&sentinel_caps()), 2);
    }

    #[test]
    fn image_count_respects_the_driver_range() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 8,
            ..sentinel_caps()
        };
        assert_eq!(choose_image_count(&caps), 3);
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 1,
            ..sentinel_caps()
        };
        assert_eq!(choose_image_count(&capped), 1);
    }

    #[test]
    fn preferred_format_is_picked_when_listed() {
        let f = choose_surface_format(&support().formats).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn format_falls_back_to_the_first_entry() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            // right format, wrong color space
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let f = choose_surface_format(&formats).unwrap();
        assert_eq!(f.format, vk::Format::R16G16B16A16_SFLOAT);
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_preference_order() {
        use vk::PresentModeKHR as Pm;
        let low = PresentPreference::LowLatency;
        assert_eq!(choose_present_mode(&[Pm::FIFO, Pm::MAILBOX], low), Pm::MAILBOX);
        assert_eq!(choose_present_mode(&[Pm::IMMEDIATE, Pm::FIFO], low), Pm::FIFO);
        assert_eq!(choose_present_mode(&[Pm::IMMEDIATE], low), Pm::IMMEDIATE);
        assert_eq!(
            choose_present_mode(&[Pm::MAILBOX, Pm::FIFO], PresentPreference::Vsync),
            Pm::FIFO
        );
    }

    #[test]
    fn split_queues_share_concurrently() {
        assert_eq!(choose_sharing(SHARED), vk::SharingMode::EXCLUSIVE);
        let split = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        assert_eq!(choose_sharing(split), vk::SharingMode::CONCURRENT);
    }

    #[test]
    fn planning_is_a_pure_function_of_its_inputs() {
        let s = support();
        let size = RenderSize::new(800, 600);
        let a = plan_chain(&s, size, SHARED, PresentPreference::LowLatency)
            .unwrap()
            .unwrap();
        let b = plan_chain(&s, size, SHARED, PresentPreference::LowLatency)
            .unwrap()
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.extent, extent(800, 600));
        assert_eq!(a.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(a.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(a.image_count, 2);
        assert_eq!(a.pre_transform, vk::SurfaceTransformFlagsKHR::IDENTITY);
    }

    #[test]
    fn zero_surface_extent_plans_no_chain() {
        // minimized on a platform with a concrete current extent, window
        // size not updated yet
        let s = SurfaceSupport {
            caps: vk::SurfaceCapabilitiesKHR {
                current_extent: extent(0, 0),
                min_image_extent: extent(0, 0),
                max_image_extent: extent(0, 0),
                ..sentinel_caps()
            },
            ..support()
        };
        let plan = plan_chain(&s, RenderSize::new(800, 600), SHARED, PresentPreference::Vsync);
        assert_eq!(plan.unwrap(), None);
    }

    #[test]
    fn collapsed_extent_range_plans_no_chain() {
        let s = SurfaceSupport {
            caps: vk::SurfaceCapabilitiesKHR {
                max_image_extent: extent(0, 0),
                min_image_extent: extent(0, 0),
                ..sentinel_caps()
            },
            ..support()
        };
        let plan = plan_chain(&s, RenderSize::new(800, 600), SHARED, PresentPreference::Vsync);
        assert!(plan.unwrap().is_none());
    }

    struct Tracked(&'static str, Rc<RefCell<Vec<&'static str>>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.1.borrow_mut().push(self.0);
        }
    }

    #[test]
    fn generation_tears_down_dependents_before_the_chain() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let part = |name| Tracked(name, Rc::clone(&log));
        let gen = Generation {
            chain: part("chain"),
            depth: part("depth"),
            render_pass: part("render_pass"),
            pipeline: part("pipeline"),
            framebuffers: part("framebuffers"),
            commands: part("commands"),
        };
        drop(gen);
        assert_eq!(
            *log.borrow(),
            [
                "commands",
                "framebuffers",
                "pipeline",
                "render_pass",
                "depth",
                "chain"
            ]
        );
    }
}
