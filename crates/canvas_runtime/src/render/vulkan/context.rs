//! Vulkan instance and device setup
//!
//! The instance is created up front; the logical device waits for the first
//! surface so queue selection can take presentation support into account.

use super::vk_error;
use crate::render::backend::{GpuError, GpuResult};
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Read a fixed-size, nul-terminated name out of a Vulkan properties struct
pub(crate) fn fixed_name(raw: &[c_char]) -> Option<&CStr> {
    CStr::from_bytes_until_nul(bytemuck::cast_slice(raw)).ok()
}

/// Vulkan instance with its surface loader and optional debug messenger
pub struct VulkanInstance {
    /// Loaded entry points
    pub entry: Entry,
    /// Instance handle
    pub instance: Instance,
    /// Surface extension loader
    pub surface_loader: Surface,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Load the Vulkan library and create an instance
    ///
    /// `extensions` are the instance extensions the windowing backend needs.
    /// Validation is silently skipped when the layer is not installed.
    pub fn new(app_name: &str, extensions: &[String], validation: bool) -> GpuResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| GpuError::Unavailable(format!("failed to load Vulkan: {e}")))?;

        let app_name = CString::new(app_name)
            .map_err(|_| GpuError::Device("application name contains a NUL byte".to_string()))?;
        let engine_name = c"canvas_runtime";
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let validation = validation && Self::layer_available(&entry, VALIDATION_LAYER);
        if !validation {
            log::debug!("Vulkan validation layers disabled");
        }

        let mut extension_names: Vec<CString> = extensions
            .iter()
            .filter_map(|ext| CString::new(ext.as_str()).ok())
            .collect();
        if validation {
            extension_names.push(DebugUtils::name().to_owned());
        }
        let extension_ptrs: Vec<*const std::os::raw::c_char> =
            extension_names.iter().map(|ext| ext.as_ptr()).collect();

        let layer_names: Vec<CString> = if validation {
            CString::new(VALIDATION_LAYER).into_iter().collect()
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const std::os::raw::c_char> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| vk_error("vkCreateInstance", e))?;

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    log::warn!("Debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        log::info!("Vulkan instance created ({} extensions)", extension_ptrs.len());

        Ok(Self {
            entry,
            instance,
            surface_loader,
            debug,
        })
    }

    fn layer_available(entry: &Entry, name: &str) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers.iter().any(|layer| {
                    let layer_name = fixed_name(&layer.layer_name).and_then(|n| n.to_str().ok());
                    layer_name == Some(name)
                })
            })
            .unwrap_or(false)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> GpuResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(|e| vk_error("vkCreateDebugUtilsMessengerEXT", e))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// Logical device, queues and the swapchain loader
pub struct VulkanDevice {
    /// Physical device
    pub physical: vk::PhysicalDevice,
    /// Logical device
    pub device: Device,
    /// Graphics queue
    pub graphics_queue: vk::Queue,
    /// Presentation queue
    pub present_queue: vk::Queue,
    /// Graphics queue family
    pub graphics_family: u32,
    /// Presentation queue family
    pub present_family: u32,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Pick the first GPU that can draw and present to `surface`, then open it
    pub fn new(instance: &VulkanInstance, surface: vk::SurfaceKHR) -> GpuResult<Self> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }
            .map_err(|e| vk_error("vkEnumeratePhysicalDevices", e))?;

        let (physical, graphics_family, present_family) = devices
            .into_iter()
            .find_map(|device| Self::evaluate(instance, device, surface))
            .ok_or_else(|| GpuError::Device("no GPU can present to this surface".to_string()))?;

        let properties = unsafe { instance.instance.get_physical_device_properties(physical) };
        log::info!(
            "Selected GPU: {}",
            fixed_name(&properties.device_name).map_or_else(|| "unknown".into(), CStr::to_string_lossy)
        );

        let mut families = vec![graphics_family];
        if present_family != graphics_family {
            families.push(present_family);
        }
        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.instance.create_device(physical, &create_info, None) }
            .map_err(|e| vk_error("vkCreateDevice", e))?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(&instance.instance, &device);
        let memory_properties =
            unsafe { instance.instance.get_physical_device_memory_properties(physical) };

        Ok(Self {
            physical,
            device,
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
            swapchain_loader,
            memory_properties,
        })
    }

    fn evaluate(
        instance: &VulkanInstance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Option<(vk::PhysicalDevice, u32, u32)> {
        let families =
            unsafe { instance.instance.get_physical_device_queue_family_properties(device) };

        let mut graphics = None;
        let mut present = None;
        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            let supported = unsafe {
                instance
                    .surface_loader
                    .get_physical_device_surface_support(device, index, surface)
            }
            .unwrap_or(false);
            if present.is_none() && supported {
                present = Some(index);
            }
            if graphics.is_some() && present.is_some() {
                break;
            }
        }

        let extensions = unsafe { instance.instance.enumerate_device_extension_properties(device) }.ok()?;
        let has_swapchain = extensions
            .iter()
            .any(|ext| fixed_name(&ext.extension_name) == Some(SwapchainLoader::name()));
        if !has_swapchain {
            return None;
        }

        Some((device, graphics?, present?))
    }

    /// Whether the chosen present family can present to `surface`
    pub fn supports_surface(&self, instance: &VulkanInstance, surface: vk::SurfaceKHR) -> bool {
        unsafe {
            instance
                .surface_loader
                .get_physical_device_surface_support(self.physical, self.present_family, surface)
        }
        .unwrap_or(false)
    }

    /// Memory type matching `type_bits` with all of `properties`
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> GpuResult<u32> {
        (0..self.memory_properties.memory_type_count)
            .find(|&i| {
                type_bits & (1 << i) != 0
                    && self.memory_properties.memory_types[i as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or_else(|| GpuError::Device(format!("no memory type with {properties:?}")))
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("Device idle wait failed before destruction: {e:?}");
            }
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_name(name: &str) -> [c_char; vk::MAX_EXTENSION_NAME_SIZE] {
        let mut raw = [0 as c_char; vk::MAX_EXTENSION_NAME_SIZE];
        for (slot, byte) in raw.iter_mut().zip(name.bytes()) {
            *slot = byte as c_char;
        }
        raw
    }

    #[test]
    fn test_fixed_name_matches_swapchain_extension() {
        let raw = raw_name("VK_KHR_swapchain");
        assert_eq!(fixed_name(&raw), Some(SwapchainLoader::name()));
        assert_ne!(fixed_name(&raw_name("VK_KHR_surface")), Some(SwapchainLoader::name()));
    }

    #[test]
    fn test_fixed_name_without_terminator_is_rejected() {
        let raw = [b'A' as c_char; 8];
        assert_eq!(fixed_name(&raw), None);
        assert_eq!(
            fixed_name(&raw_name(VALIDATION_LAYER)).and_then(|n| n.to_str().ok()),
            Some(VALIDATION_LAYER)
        );
    }
}
