// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layer + debug messenger
// - Presentation surface for the window
// - Physical device selection (first suitable device wins)
// - Logical device + graphics/present queues
// - Memory allocator setup
//
// Every other component borrows this context; nothing else creates or
// destroys instance- or device-level objects.

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::error::RenderError;
use super::swapchain::SwapchainSupport;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Required Vulkan device features for our renderer
const REQUIRED_DEVICE_FEATURES: vk::PhysicalDeviceFeatures = vk::PhysicalDeviceFeatures {
    sampler_anisotropy: vk::TRUE,
    ..unsafe { std::mem::zeroed() }
};

pub fn required_device_extensions() -> [&'static CStr; 1] {
    [khr::Swapchain::name()]
}

/// Queue family indices discovered while scanning a physical device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn resolve(self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Resolved graphics + present families of the selected device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, one queue create info each
    pub fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.present])
            .into_iter()
            .collect()
    }
}

/// Scan queue families in order.
///
/// A family that does both graphics and present is taken as soon as it is
/// seen; otherwise the first graphics family and the first present family are
/// returned separately.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<QueueFamilyIndices>
where
    F: FnMut(u32) -> Result<bool>,
{
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        let graphics =
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = supports_present(index)?;

        if graphics && present {
            return Ok(QueueFamilyIndices {
                graphics: Some(index),
                present: Some(index),
            });
        }
        if graphics && indices.graphics.is_none() {
            indices.graphics = Some(index);
        }
        if present && indices.present.is_none() {
            indices.present = Some(index);
        }
    }

    Ok(indices)
}

/// Names from `required` that do not appear in `available`
pub fn missing_names<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

/// Everything device selection needs to know about one GPU
#[derive(Debug, Clone, Copy)]
pub struct DeviceSuitability {
    pub queues: QueueFamilyIndices,
    pub extensions_supported: bool,
    pub swapchain_adequate: bool,
    pub sampler_anisotropy: bool,
}

impl DeviceSuitability {
    pub fn queue_families(&self) -> Option<QueueFamilies> {
        if self.extensions_supported && self.swapchain_adequate && self.sampler_anisotropy {
            self.queues.resolve()
        } else {
            None
        }
    }
}

/// First suitable device in enumeration order. No scoring, no tie-break.
pub fn select_first_suitable<D: Copy>(
    candidates: &[(D, DeviceSuitability)],
) -> Option<(D, QueueFamilies)> {
    candidates
        .iter()
        .find_map(|(device, suitability)| suitability.queue_families().map(|q| (*device, q)))
}

fn raw_name(raw: &[c_char]) -> &CStr {
    // Vulkan guarantees these fixed-size arrays are NUL-terminated
    unsafe { CStr::from_ptr(raw.as_ptr()) }
}

/// Instance, surface, device and queues, with automatic cleanup
pub struct DeviceContext {
    // Freed before the device in Drop
    allocator: ManuallyDrop<Mutex<Allocator>>,

    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub swapchain_loader: khr::Swapchain,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,
    pub instance: ash::Instance,
    _entry: Entry,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
}

impl DeviceContext {
    /// Bring up the instance, the window surface and the logical device.
    ///
    /// Every failure here is fatal: there is no fallback device and no retry.
    pub fn new<W>(app_name: &str, enable_validation: bool, window: &W) -> Result<Arc<Self>>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        if enable_validation {
            Self::check_validation_layer(&entry)?;
        }

        let display_handle = window.raw_display_handle();
        let instance = Self::create_instance(&entry, app_name, enable_validation, display_handle)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                display_handle,
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;

        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, queue_families)?;

        let swapchain_loader = khr::Swapchain::new(&instance, &device);

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!("Selected GPU: {}", raw_name(&properties.device_name).to_string_lossy());
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            swapchain_loader,
            surface,
            surface_loader,
            instance,
            _entry: entry,
            graphics_queue,
            present_queue,
            queue_families,
            debug_utils,
            properties,
        }))
    }

    fn check_validation_layer(entry: &Entry) -> Result<()> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;
        let available: Vec<&CStr> = layers.iter().map(|l| raw_name(&l.layer_name)).collect();

        if missing_names(&[VALIDATION_LAYER], &available).is_empty() {
            Ok(())
        } else {
            Err(RenderError::ValidationLayerUnavailable(
                VALIDATION_LAYER.to_string_lossy().into_owned(),
            )
            .into())
        }
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        display_handle: RawDisplayHandle,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("frame-core")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        // Surface extensions for whatever platform the window lives on
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Window system is not supported by Vulkan")?
            .to_vec();

        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        #[allow(unused_mut)]
        let mut flags = vk::InstanceCreateFlags::empty();

        #[cfg(target_os = "macos")]
        {
            extensions.push(vk::KhrPortabilityEnumerationFn::name().as_ptr());
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        let mut candidates = Vec::with_capacity(devices.len());
        for device in devices {
            let suitability = Self::evaluate_device(instance, surface_loader, surface, device)?;
            let props = unsafe { instance.get_physical_device_properties(device) };
            log::debug!(
                "GPU {}: {:?}",
                raw_name(&props.device_name).to_string_lossy(),
                suitability
            );
            candidates.push((device, suitability));
        }

        select_first_suitable(&candidates).ok_or_else(|| RenderError::NoSuitableDevice.into())
    }

    fn evaluate_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Result<DeviceSuitability> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let queues = find_queue_families(&families, |index| {
            unsafe { surface_loader.get_physical_device_surface_support(device, index, surface) }
                .context("Failed to query surface support")
        })?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let available: Vec<&CStr> = extensions
            .iter()
            .map(|e| raw_name(&e.extension_name))
            .collect();
        let extensions_supported = missing_names(&required_device_extensions(), &available).is_empty();

        // Only meaningful once we know the swapchain extension is there
        let swapchain_adequate = extensions_supported
            && SwapchainSupport::query(surface_loader, device, surface)?.is_adequate();

        let features = unsafe { instance.get_physical_device_features(device) };

        Ok(DeviceSuitability {
            queues,
            extensions_supported,
            swapchain_adequate,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilies,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const c_char> = required_device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&REQUIRED_DEVICE_FEATURES);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU memory allocator")?;

        Ok(allocator)
    }

    pub fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock()
    }

    /// Current surface capabilities, formats and present modes
    pub fn swapchain_support(&self) -> Result<SwapchainSupport> {
        SwapchainSupport::query(&self.surface_loader, self.physical_device, self.surface)
    }

    pub fn supports_format(
        &self,
        format: vk::Format,
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> bool {
        let props = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        };

        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    }

    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.properties.limits.max_sampler_anisotropy
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("vkDeviceWaitIdle failed")?;
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Reverse order of creation
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
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

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn suitable(graphics: u32, present: u32) -> DeviceSuitability {
        DeviceSuitability {
            queues: QueueFamilyIndices {
                graphics: Some(graphics),
                present: Some(present),
            },
            extensions_supported: true,
            swapchain_adequate: true,
            sampler_anisotropy: true,
        }
    }

    #[test]
    fn shared_family_is_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // Family 1 presents, family 2 does both
        let indices = find_queue_families(&families, |i| Ok(i >= 1)).unwrap();
        assert_eq!(indices.graphics, Some(2));
        assert_eq!(indices.present, Some(2));
    }

    #[test]
    fn separate_families_when_none_does_both() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = find_queue_families(&families, |i| Ok(i == 1)).unwrap();
        let resolved = indices.resolve().unwrap();
        assert_eq!(resolved, QueueFamilies { graphics: 0, present: 1 });
        assert!(!resolved.is_shared());
        assert_eq!(resolved.unique(), vec![0, 1]);
    }

    #[test]
    fn no_present_support_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| Ok(false)).unwrap();
        assert_eq!(indices.present, None);
        assert!(indices.resolve().is_none());
    }

    #[test]
    fn empty_queue_family_is_ignored() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics, Some(1));
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = find_queue_families(&families, |_| anyhow::bail!("surface lost"));
        assert!(result.is_err());
    }

    #[test]
    fn shared_family_has_one_unique_index() {
        let families = QueueFamilies { graphics: 3, present: 3 };
        assert!(families.is_shared());
        assert_eq!(families.unique(), vec![3]);
    }

    #[test]
    fn first_suitable_device_wins() {
        let candidates = [
            (10u32, DeviceSuitability {
                sampler_anisotropy: false,
                ..suitable(0, 0)
            }),
            (20u32, suitable(1, 1)),
            (30u32, suitable(0, 0)),
        ];
        let (device, families) = select_first_suitable(&candidates).unwrap();
        assert_eq!(device, 20);
        assert_eq!(families, QueueFamilies { graphics: 1, present: 1 });
    }

    #[test]
    fn missing_extension_or_swapchain_support_disqualifies() {
        let candidates = [
            (1u32, DeviceSuitability {
                extensions_supported: false,
                ..suitable(0, 0)
            }),
            (2u32, DeviceSuitability {
                swapchain_adequate: false,
                ..suitable(0, 0)
            }),
        ];
        assert!(select_first_suitable(&candidates).is_none());
    }

    #[test]
    fn missing_names_reports_only_absent_entries() {
        let swapchain = c"VK_KHR_swapchain";
        let maintenance = c"VK_KHR_maintenance1";
        let available = [maintenance];

        assert_eq!(missing_names(&[swapchain, maintenance], &available), vec![swapchain]);
        assert!(missing_names(&[maintenance], &available).is_empty());
    }

    #[test]
    fn swapchain_is_the_required_device_extension() {
        assert_eq!(required_device_extensions(), [c"VK_KHR_swapchain"]);
    }
}
