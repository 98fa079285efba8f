// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface and device creation.
//!
//! STRICT ORDER:
//! 1) instance (platform WSI extensions, debug utils in debug builds)
//! 2) surface from THIS instance
//! 3) physical device and queue families judged AGAINST THIS SURFACE
//! 4) logical device with VK_KHR_swapchain

use std::ffi::{c_char, CStr};

use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use lumen_render::{FrameError, FrameResult, VkResultExt};
use raw_window_handle::RawDisplayHandle;
use tracing::info;

#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;

const APP_NAME: &CStr = c"lumen";
#[cfg(debug_assertions)]
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub(crate) fn load_entry() -> FrameResult<Entry> {
    unsafe { Entry::load() }
        .map_err(|e| FrameError::configuration(format!("cannot load the Vulkan loader: {e}")))
}

#[cfg(debug_assertions)]
unsafe fn instance_has_extension(entry: &Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_extension_properties(None) }
        .unwrap_or_default()
        .iter()
        .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == name))
}

#[cfg(debug_assertions)]
unsafe fn instance_has_layer(entry: &Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name))
}

pub(crate) unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle) -> FrameResult<Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    #[cfg_attr(not(debug_assertions), allow(unused_mut))]
    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .op("vkEnumerateInstanceExtensionProperties")?
        .to_vec();
    #[cfg_attr(not(debug_assertions), allow(unused_mut))]
    let mut layers: Vec<*const c_char> = Vec::new();

    #[cfg(debug_assertions)]
    {
        if unsafe { instance_has_extension(entry, ext_debug::NAME) } {
            extensions.push(ext_debug::NAME.as_ptr());
        }
        if unsafe { instance_has_layer(entry, VALIDATION_LAYER) } {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            tracing::warn!("validation layer not installed, running without it");
        }
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    unsafe { entry.create_instance(&create_info, None) }.op("vkCreateInstance")
}

/// Validation output routed into `tracing`. Debug builds only.
#[cfg(debug_assertions)]
pub(crate) struct DebugMessenger {
    loader: ext_debug::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

#[cfg(not(debug_assertions))]
#[allow(dead_code)]
pub(crate) struct DebugMessenger;

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: the loader passes a valid callback-data pointer or null.
    let Some(data) = (unsafe { data.as_ref() }) else {
        return vk::FALSE;
    };
    if data.p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(data.p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "{msg}");
    } else {
        tracing::debug!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
pub(crate) unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> FrameResult<Option<DebugMessenger>> {
    if !unsafe { instance_has_extension(entry, ext_debug::NAME) } {
        return Ok(None);
    }
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let handle = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .op("vkCreateDebugUtilsMessengerEXT")?;
    Ok(Some(DebugMessenger { loader, handle }))
}

#[cfg(not(debug_assertions))]
pub(crate) unsafe fn create_debug_messenger(
    _entry: &Entry,
    _instance: &Instance,
) -> FrameResult<Option<DebugMessenger>> {
    Ok(None)
}

impl DebugMessenger {
    /// Must run before the instance is destroyed.
    pub(crate) unsafe fn destroy(self) {
        #[cfg(debug_assertions)]
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.handle, None)
        };
    }
}

/// Where graphics work is submitted and where images are presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct families need concurrent image sharing on the swapchain.
    pub fn is_split(&self) -> bool {
        self.graphics != self.present
    }

    /// With one family, the frame fence already covers presentation work.
    pub fn present_needs_idle_wait(&self) -> bool {
        self.is_split()
    }

    pub fn indices(&self) -> Vec<u32> {
        if self.is_split() {
            vec![self.graphics, self.present]
        } else {
            vec![self.graphics]
        }
    }
}

/// Picks queue families from `(flags, can_present)` per family.
///
/// A family that does both wins. Otherwise the first graphics family is paired
/// with the first non-graphics family that can present.
pub(crate) fn select_queue_families(families: &[(vk::QueueFlags, bool)]) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    for (i, &(flags, can_present)) in families.iter().enumerate() {
        let i = i as u32;
        if flags.contains(vk::QueueFlags::GRAPHICS) {
            if can_present {
                return Some(QueueFamilies {
                    graphics: i,
                    present: i,
                });
            }
            graphics.get_or_insert(i);
        } else if can_present {
            present.get_or_insert(i);
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

unsafe fn supports_swapchain(instance: &Instance, phys: vk::PhysicalDevice) -> bool {
    unsafe { instance.enumerate_device_extension_properties(phys) }
        .unwrap_or_default()
        .iter()
        .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == swapchain::NAME))
}

unsafe fn device_name(instance: &Instance, phys: vk::PhysicalDevice) -> String {
    let props = unsafe { instance.get_physical_device_properties(phys) };
    props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from("<unnamed>"))
}

/// Devices with a combined graphics+present family are preferred over ones
/// that need two families.
pub(crate) unsafe fn pick_device_and_queues(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> FrameResult<(vk::PhysicalDevice, QueueFamilies)> {
    let mut split: Option<(vk::PhysicalDevice, QueueFamilies)> = None;

    for phys in unsafe { instance.enumerate_physical_devices() }.op("vkEnumeratePhysicalDevices")? {
        if !unsafe { supports_swapchain(instance, phys) } {
            continue;
        }
        let families: Vec<_> = unsafe { instance.get_physical_device_queue_family_properties(phys) }
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let can_present = unsafe {
                    surface_loader.get_physical_device_surface_support(phys, i as u32, surface)
                }
                .unwrap_or(false);
                (q.queue_flags, can_present)
            })
            .collect();
        match select_queue_families(&families) {
            Some(q) if !q.is_split() => {
                let name = unsafe { device_name(instance, phys) };
                info!("vk: using device {name} (queue family {})", q.graphics);
                return Ok((phys, q));
            }
            Some(q) => {
                split.get_or_insert((phys, q));
            }
            None => {}
        }
    }

    let (phys, q) = split.ok_or_else(|| {
        FrameError::configuration("no device with graphics and present support for this surface")
    })?;
    let name = unsafe { device_name(instance, phys) };
    info!(
        "vk: using device {name} (graphics family {}, present family {})",
        q.graphics,
        q.present
    );
    Ok((phys, q))
}

pub(crate) unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> FrameResult<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<_> = families
        .indices()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    unsafe { instance.create_device(phys, &dinfo, None) }.op("vkCreateDevice")
}

/// Compositors where mailbox avoids stalls in FIFO when the window is hidden.
pub(crate) fn platform_prefers_mailbox(display: RawDisplayHandle) -> bool {
    matches!(display, RawDisplayHandle::Wayland(_))
}
