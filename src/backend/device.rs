// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Physical device selection
// - Compute/present queue family selection
// - Logical device + queue creation
// - Presentation surface (created before queue selection, which needs it)

use crate::error::{RendererError, Result};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;
use winit::window::Window;

/// Compute and present queue family indices.
///
/// The two scans are independent: the same family may satisfy both, or two
/// different families may be used. Built once at startup, never re-derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilySelection {
    pub compute: u32,
    pub present: u32,
}

impl QueueFamilySelection {
    /// Family indices to request queues for, deduplicated.
    /// Requesting the same family twice is a Vulkan error.
    pub fn distinct(&self) -> Vec<u32> {
        if self.compute == self.present {
            vec![self.compute]
        } else {
            vec![self.compute, self.present]
        }
    }

    pub fn shared(&self) -> bool {
        self.compute == self.present
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Vulkan handles (destroyed in reverse order in Drop)
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles (non-owning views into the logical device)
    pub compute_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilySelection,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Create the instance, surface, physical/logical device and queues.
    ///
    /// The surface is created here rather than alongside the swapchain
    /// because present-queue selection needs it.
    pub fn new(window: &Window, enable_validation: bool) -> Result<Arc<Self>> {
        let entry = unsafe { Entry::load() }?;

        let instance = Self::create_instance(&entry, window, enable_validation)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }?;
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);

        let devices = unsafe { instance.enumerate_physical_devices() }?;
        log::info!("Available devices:");
        for (i, &device) in devices.iter().enumerate() {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) };
            log::info!("  [{}] {}", i, name.to_string_lossy());
        }

        let physical_device = select_physical_device(&devices)?;
        log::info!("Choosing device 0");

        let queue_family_props =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let queue_families = select_queue_families(&queue_family_props, |family| {
            let supported = unsafe {
                surface_loader.get_physical_device_surface_support(
                    physical_device,
                    family,
                    surface,
                )
            }?;
            Ok(supported)
        })?;
        log::info!(
            "Queue families: compute = {}, present = {}",
            queue_families.compute,
            queue_families.present
        );

        let (device, compute_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, queue_families)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            surface,
            surface_loader,
            instance,
            _entry: entry,
            compute_queue,
            present_queue,
            queue_families,
            debug_utils,
            properties,
            memory_properties,
        }))
    }

    fn create_instance(
        entry: &Entry,
        window: &Window,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_info = vk::ApplicationInfo::builder()
            .application_name(c"GPU raytracer")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions required by the windowing system
        let mut extensions =
            ash_window::enumerate_required_extensions(window.raw_display_handle())
                .map_err(RendererError::InstanceCreate)?
                .to_vec();

        let layer_names = if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(RendererError::InstanceCreate)?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

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

        let messenger =
            unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilySelection,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .distinct()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;

        let compute_queue = unsafe { device.get_device_queue(queue_families.compute, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        Ok((device, compute_queue, present_queue))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Pick the GPU to run on: the first enumerated device.
///
/// There should be checks that the device supports everything we need,
/// but we just pick the first device found for simplicity.
pub fn select_physical_device(devices: &[vk::PhysicalDevice]) -> Result<vk::PhysicalDevice> {
    devices
        .first()
        .copied()
        .ok_or(RendererError::NoSuitableDevice)
}

/// Find the first compute-capable family and, independently, the first
/// family that can present to the surface.
pub fn select_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut present_support: F,
) -> Result<QueueFamilySelection>
where
    F: FnMut(u32) -> Result<bool>,
{
    let compute = families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::COMPUTE))
        .ok_or(RendererError::NoComputeQueue)? as u32;

    let mut present = None;
    for family in 0..families.len() as u32 {
        if present_support(family)? {
            present = Some(family);
            break;
        }
    }
    let present = present.ok_or(RendererError::NoPresentQueue)?;

    Ok(QueueFamilySelection { compute, present })
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn picks_first_enumerated_device() {
        let devices = [
            vk::PhysicalDevice::from_raw(1),
            vk::PhysicalDevice::from_raw(2),
        ];
        let picked = select_physical_device(&devices).unwrap();
        assert_eq!(picked, devices[0]);
    }

    #[test]
    fn empty_device_list_is_an_error() {
        let err = select_physical_device(&[]).unwrap_err();
        assert!(matches!(err, RendererError::NoSuitableDevice));
    }

    #[test]
    fn queue_scans_are_independent() {
        // Compute lives at index 1, present support only at index 2
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let selection = select_queue_families(&families, |i| Ok(i == 2)).unwrap();
        assert_eq!(selection.compute, 1);
        assert_eq!(selection.present, 2);
        assert!(!selection.shared());
        assert_eq!(selection.distinct(), vec![1, 2]);
    }

    #[test]
    fn first_match_wins_in_each_scan() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];
        let selection = select_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(selection.compute, 0);
        assert_eq!(selection.present, 0);
        assert!(selection.shared());
        assert_eq!(selection.distinct(), vec![0]);
    }

    #[test]
    fn missing_compute_family_is_an_error() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let err = select_queue_families(&families, |_| Ok(true)).unwrap_err();
        assert!(matches!(err, RendererError::NoComputeQueue));
    }

    #[test]
    fn missing_present_family_is_an_error() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        let err = select_queue_families(&families, |_| Ok(false)).unwrap_err();
        assert!(matches!(err, RendererError::NoPresentQueue));
    }
}
