// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use strobe_render::{RenderError, RenderResult};
use tracing::{debug, error, info, trace, warn};

use crate::error::VkResultExt;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Instance-scoped state: loader, instance, validation messenger and the
/// window surface. Torn down in reverse creation order on drop.
pub struct InstanceContext {
    pub entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug: Option<DebugMessenger>,
}

impl InstanceContext {
    /// STRICT ORDER:
    /// 1) instance with the window system's WSI extensions
    /// 2) messenger, if validation was requested and is available
    /// 3) surface from this instance
    ///
    /// Devices are later picked against this surface.
    ///
    /// # Safety
    /// The window's native handles must stay valid until this context is
    /// dropped.
    pub unsafe fn new<W>(window: &W, app_name: &str, validation: bool) -> RenderResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let dh = window
            .display_handle()
            .map_err(|e| RenderError::Window(e.to_string()))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| RenderError::Window(e.to_string()))?
            .as_raw();

        let entry =
            Entry::load().map_err(|e| RenderError::setup(format!("vulkan loader: {e}")))?;

        let validation = validation && validation_available(&entry);
        if validation {
            info!("validation layer enabled");
        }

        let app = CString::new(app_name).map_err(RenderError::setup)?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app.as_ptr(),
            application_version: 0,
            p_engine_name: c"strobe".as_ptr(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let mut extensions = ash_window::enumerate_required_extensions(dh)
            .vk("enumerate_required_extensions")?
            .to_vec();
        if validation {
            extensions.push(debug_utils::NAME.as_ptr());
        }
        let layers: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            ..Default::default()
        };
        let instance = entry
            .create_instance(&create_info, None)
            .vk("create_instance")?;

        let debug = if validation {
            match create_debug_messenger(&entry, &instance) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
            Ok(s) => s,
            Err(e) => {
                if let Some(m) = &debug {
                    m.loader.destroy_debug_utils_messenger(m.handle, None);
                }
                instance.destroy_instance(None);
                return Err(crate::error::vk_error("create_surface", e));
            }
        };

        Ok(Self {
            entry,
            instance,
            surface_loader,
            surface,
            debug,
        })
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(m) = self.debug.take() {
                m.loader.destroy_debug_utils_messenger(m.handle, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn validation_available(entry: &Entry) -> bool {
    let layers = entry.enumerate_instance_layer_properties().unwrap_or_default();
    let found = layers
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER);
    if !found {
        warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
    }
    found
}

unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> RenderResult<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let handle = loader
        .create_debug_utils_messenger(&ci, None)
        .vk("create_debug_utils_messenger")?;
    Ok(DebugMessenger { loader, handle })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn shared(&self) -> bool {
        self.graphics == self.present
    }

    /// One entry per distinct family, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// First graphics-capable family and first family that can present.
pub fn pick_queue_families(
    props: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let graphics = props
        .iter()
        .position(|q| q.queue_count > 0 && q.queue_flags.contains(vk::QueueFlags::GRAPHICS))?
        as u32;
    let present = (0..props.len() as u32).find(|&i| can_present(i))?;
    Some(QueueFamilies { graphics, present })
}

/// Discrete GPUs win outright; ties go to the larger device-local heap.
pub fn score_device(kind: vk::PhysicalDeviceType, device_local_bytes: u64) -> u64 {
    let base = if kind == vk::PhysicalDeviceType::DISCRETE_GPU {
        1000
    } else {
        0
    };
    base + device_local_bytes / (256 * 1024 * 1024)
}

fn device_local_bytes(mem: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    mem.memory_heaps[..mem.memory_heap_count as usize]
        .iter()
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size)
        .sum()
}

struct Candidate {
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
    score: u64,
    name: String,
}

unsafe fn has_swapchain_extension(instance: &Instance, phys: vk::PhysicalDevice) -> bool {
    instance
        .enumerate_device_extension_properties(phys)
        .unwrap_or_default()
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME)
}

unsafe fn pick_physical_device(ictx: &InstanceContext) -> RenderResult<Candidate> {
    let instance = &ictx.instance;
    let mut best: Option<Candidate> = None;

    for phys in instance
        .enumerate_physical_devices()
        .vk("enumerate_physical_devices")?
    {
        let props = instance.get_physical_device_properties(phys);
        let name = CStr::from_ptr(props.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        if !has_swapchain_extension(instance, phys) {
            debug!("{name}: no swapchain extension, skipped");
            continue;
        }
        let qprops = instance.get_physical_device_queue_family_properties(phys);
        let Some(families) = pick_queue_families(&qprops, |i| {
            ictx.surface_loader
                .get_physical_device_surface_support(phys, i, ictx.surface)
                .unwrap_or(false)
        }) else {
            debug!("{name}: no graphics or present queue, skipped");
            continue;
        };

        let mem = instance.get_physical_device_memory_properties(phys);
        let score = score_device(props.device_type, device_local_bytes(&mem));
        debug!("{name}: score {score}");
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(Candidate {
                phys,
                families,
                score,
                name,
            });
        }
    }

    best.ok_or(RenderError::Unsupported("no GPU can present to this surface"))
}

unsafe fn pick_depth_format(instance: &Instance, phys: vk::PhysicalDevice) -> RenderResult<vk::Format> {
    [
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D32_SFLOAT_S8_UINT,
    ]
    .into_iter()
    .find(|&fmt| {
        instance
            .get_physical_device_format_properties(phys, fmt)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
    .ok_or(RenderError::Unsupported("no depth attachment format"))
}

/// Logical device plus everything chosen once at startup.
pub struct DeviceContext {
    pub instance: Arc<InstanceContext>,
    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub swapchain_loader: swapchain::Device,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub depth_format: vk::Format,
    pub name: String,
}

impl DeviceContext {
    /// # Safety
    /// `instance` must own a live surface; the device is picked against it.
    pub unsafe fn new(instance: Arc<InstanceContext>) -> RenderResult<Arc<Self>> {
        let chosen = pick_physical_device(&instance)?;
        let depth_format = pick_depth_format(&instance.instance, chosen.phys)?;
        info!(
            "gpu: {} (graphics family {}, present family {}, depth {:?})",
            chosen.name, chosen.families.graphics, chosen.families.present, depth_format
        );

        let priority = [1.0f32];
        let queue_infos: Vec<_> = chosen
            .families
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priority.as_ptr(),
                ..Default::default()
            })
            .collect();
        let extensions = [swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        let device = instance
            .instance
            .create_device(chosen.phys, &create_info, None)
            .vk("create_device")?;

        let graphics_queue = device.get_device_queue(chosen.families.graphics, 0);
        let present_queue = device.get_device_queue(chosen.families.present, 0);
        let swapchain_loader = swapchain::Device::new(&instance.instance, &device);
        let memory = instance
            .instance
            .get_physical_device_memory_properties(chosen.phys);

        Ok(Arc::new(Self {
            phys: chosen.phys,
            device,
            swapchain_loader,
            families: chosen.families,
            graphics_queue,
            present_queue,
            memory,
            depth_format,
            name: chosen.name,
            instance,
        }))
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.instance.surface
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.instance.surface_loader
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.vk("device_wait_idle")
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn first_capable_families_are_chosen() {
        let props = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let fams = pick_queue_families(&props, |i| i >= 1).unwrap();
        assert_eq!(fams, QueueFamilies { graphics: 1, present: 1 });
        assert!(fams.shared());
        assert_eq!(fams.unique(), vec![1]);
    }

    #[test]
    fn split_families_are_both_requested() {
        let props = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let fams = pick_queue_families(&props, |i| i == 1).unwrap();
        assert_eq!(fams.unique(), vec![0, 1]);
    }

    #[test]
    fn no_present_support_means_no_families() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        assert!(pick_queue_families(&props, |_| false).is_none());
        assert!(pick_queue_families(&[family(vk::QueueFlags::COMPUTE)], |_| true).is_none());
    }

    #[test]
    fn discrete_gpus_outscore_integrated_ones() {
        let gib = 1024 * 1024 * 1024;
        let discrete = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, 2 * gib);
        let integrated = score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, 16 * gib);
        assert_eq!(discrete, 1008);
        assert_eq!(integrated, 64);
        assert!(discrete > integrated);
    }
}
