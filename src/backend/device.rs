// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with the window system's surface extensions
// - Surface creation from the window's raw handles
// - Physical device selection (first device meeting every requirement)
// - Logical device + graphics/present queue creation
//
// Selection is split in two: `query` gathers everything the driver reports
// about one device, `DeviceCandidate::evaluate` decides on plain data.

use ash::extensions::khr;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};

use crate::config::DeviceTier;
use crate::error::{EngineError, EngineResult, VkResultExt};

/// Color format used when the surface declares no preference
pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

const SAMPLE_COUNTS: [(u32, vk::SampleCountFlags); 6] = [
    (64, vk::SampleCountFlags::TYPE_64),
    (32, vk::SampleCountFlags::TYPE_32),
    (16, vk::SampleCountFlags::TYPE_16),
    (8, vk::SampleCountFlags::TYPE_8),
    (4, vk::SampleCountFlags::TYPE_4),
    (2, vk::SampleCountFlags::TYPE_2),
];

/// Graphics and presentation queue families. They may be the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Everything downstream needs to know about the selected device.
///
/// Only `DeviceCandidate::evaluate` builds one, so a profile is always
/// complete. Resizes replace it through `with_surface`.
#[derive(Clone, Debug)]
pub struct DeviceProfile {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub features: vk::PhysicalDeviceFeatures,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilies,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub samples: vk::SampleCountFlags,
}

impl DeviceProfile {
    /// Same device with a fresh capability snapshot and the extent it implies
    pub fn with_surface(
        &self,
        capabilities: vk::SurfaceCapabilitiesKHR,
        requested: vk::Extent2D,
    ) -> Self {
        Self {
            capabilities,
            extent: choose_extent(&capabilities, requested),
            ..self.clone()
        }
    }
}

/// Constraints a device has to satisfy, taken from the config and window
#[derive(Clone, Copy, Debug)]
pub struct DeviceRequirements {
    pub tier: DeviceTier,
    pub preferred_present_mode: Option<vk::PresentModeKHR>,
    pub msaa_samples: u32,
    pub window_extent: vk::Extent2D,
}

/// Raw facts about one physical device and its relation to the surface
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub features: vk::PhysicalDeviceFeatures,
    pub extensions: Vec<String>,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Indexed like `queue_families`
    pub present_support: Vec<bool>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub color_sample_counts: vk::SampleCountFlags,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// A device that was passed over, and why
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub name: String,
    pub reason: String,
}

fn check_device_type(tier: DeviceTier, device_type: vk::PhysicalDeviceType) -> Result<(), String> {
    if tier.accepts(device_type) {
        Ok(())
    } else {
        Err(format!("device type {:?} not accepted", device_type))
    }
}

fn check_swapchain_extension(extensions: &[String]) -> Result<(), String> {
    let swapchain_ext = khr::Swapchain::name().to_string_lossy();
    if extensions.iter().any(|ext| *ext == swapchain_ext) {
        Ok(())
    } else {
        Err(format!("missing {}", swapchain_ext))
    }
}

fn check_queue_families(
    families: &[vk::QueueFamilyProperties],
    present_support: &[bool],
) -> Result<QueueFamilies, String> {
    find_queue_families(families, present_support)
        .ok_or_else(|| "no graphics and present capable queue families".to_string())
}

impl DeviceCandidate {
    /// Query the driver for everything `evaluate` looks at.
    ///
    /// Device type, the swapchain extension and present support are checked
    /// first: surface queries are only valid on a device that can present
    /// to the surface. A failed driver query rejects this device only.
    pub fn query(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        handle: vk::PhysicalDevice,
        requirements: &DeviceRequirements,
    ) -> Result<Self, Rejection> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let reject = |reason: String| Rejection {
            name: name.clone(),
            reason,
        };
        let driver_failure = |e: EngineError| reject(e.to_string());

        check_device_type(requirements.tier, properties.device_type).map_err(reject)?;

        let extensions: Vec<String> =
            unsafe { instance.enumerate_device_extension_properties(handle) }
                .op("vkEnumerateDeviceExtensionProperties")
                .map_err(driver_failure)?
                .iter()
                .map(|ext| {
                    unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                        .to_string_lossy()
                        .into_owned()
                })
                .collect();
        check_swapchain_extension(&extensions).map_err(reject)?;

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let present_support = (0..queue_families.len() as u32)
            .map(|index| {
                unsafe {
                    surface_loader.get_physical_device_surface_support(handle, index, surface)
                }
                .op("vkGetPhysicalDeviceSurfaceSupportKHR")
            })
            .collect::<EngineResult<Vec<_>>>()
            .map_err(driver_failure)?;
        check_queue_families(&queue_families, &present_support).map_err(reject)?;

        let (capabilities, formats, present_modes) = unsafe {
            let capabilities = surface_loader
                .get_physical_device_surface_capabilities(handle, surface)
                .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR");
            let formats = surface_loader
                .get_physical_device_surface_formats(handle, surface)
                .op("vkGetPhysicalDeviceSurfaceFormatsKHR");
            let present_modes = surface_loader
                .get_physical_device_surface_present_modes(handle, surface)
                .op("vkGetPhysicalDeviceSurfacePresentModesKHR");
            (capabilities, formats, present_modes)
        };

        let (features, memory_properties) = unsafe {
            (
                instance.get_physical_device_features(handle),
                instance.get_physical_device_memory_properties(handle),
            )
        };

        Ok(Self {
            handle,
            device_type: properties.device_type,
            features,
            extensions,
            queue_families,
            present_support,
            capabilities: capabilities.map_err(driver_failure)?,
            formats: formats.map_err(driver_failure)?,
            present_modes: present_modes.map_err(driver_failure)?,
            color_sample_counts: properties.limits.framebuffer_color_sample_counts,
            memory_properties,
            name,
        })
    }

    /// Accept or reject this device. The error string is the rejection reason.
    pub fn evaluate(self, requirements: &DeviceRequirements) -> Result<DeviceProfile, String> {
        check_device_type(requirements.tier, self.device_type)?;
        check_swapchain_extension(&self.extensions)?;
        let queue_families = check_queue_families(&self.queue_families, &self.present_support)?;

        if self.formats.is_empty() {
            return Err("surface reports no formats".to_string());
        }
        if self.present_modes.is_empty() {
            return Err("surface reports no present modes".to_string());
        }

        Ok(DeviceProfile {
            physical_device: self.handle,
            features: self.features,
            capabilities: self.capabilities,
            memory_properties: self.memory_properties,
            queue_families,
            surface_format: choose_surface_format(&self.formats),
            present_mode: choose_present_mode(
                &self.present_modes,
                requirements.preferred_present_mode,
            ),
            extent: choose_extent(&self.capabilities, requirements.window_extent),
            image_count: choose_image_count(&self.capabilities),
            samples: choose_sample_count(self.color_sample_counts, requirements.msaa_samples),
            name: self.name,
        })
    }
}

/// First candidate that passes `evaluate`, in enumeration order. Candidates
/// are consumed lazily, so nothing after the chosen one is queried.
pub fn select_from<I>(
    candidates: I,
    requirements: &DeviceRequirements,
) -> EngineResult<DeviceProfile>
where
    I: IntoIterator<Item = Result<DeviceCandidate, Rejection>>,
{
    let mut rejections = Vec::new();
    for candidate in candidates {
        let rejection = match candidate {
            Ok(candidate) => {
                let name = candidate.name.clone();
                match candidate.evaluate(requirements) {
                    Ok(profile) => return Ok(profile),
                    Err(reason) => Rejection { name, reason },
                }
            }
            Err(rejection) => rejection,
        };
        log::debug!("Rejected GPU {}: {}", rejection.name, rejection.reason);
        rejections.push(format!("{}: {}", rejection.name, rejection.reason));
    }

    if rejections.is_empty() {
        return Err(EngineError::NoSuitableDevice(
            "no Vulkan physical devices found".to_string(),
        ));
    }
    Err(EngineError::NoSuitableDevice(rejections.join("; ")))
}

/// Enumerate physical devices and pick the first suitable one
pub fn select_device(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
    requirements: &DeviceRequirements,
) -> EngineResult<DeviceProfile> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .op("vkEnumeratePhysicalDevices")?;
    log::info!("Found {} physical device(s)", devices.len());

    let candidates = devices.into_iter().map(|handle| {
        DeviceCandidate::query(instance, surface_loader, surface, handle, requirements)
    });

    select_from(candidates, requirements)
}

/// Graphics family is the first with graphics support; presentation reuses
/// it when possible, otherwise takes the first family that can present.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    present_support: &[bool],
) -> Option<QueueFamilies> {
    let usable = |index: usize| families[index].queue_count > 0;

    let graphics = (0..families.len()).find(|&i| {
        usable(i) && families[i].queue_flags.contains(vk::QueueFlags::GRAPHICS)
    })?;

    let can_present =
        |index: usize| usable(index) && present_support.get(index).copied().unwrap_or(false);
    let present = if can_present(graphics) {
        graphics
    } else {
        (0..families.len()).find(|&i| can_present(i))?
    };

    Some(QueueFamilies {
        graphics: graphics as u32,
        present: present as u32,
    })
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return DEFAULT_SURFACE_FORMAT;
    }

    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == DEFAULT_SURFACE_FORMAT.format
                && f.color_space == DEFAULT_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
        .unwrap_or(DEFAULT_SURFACE_FORMAT)
}

/// MAILBOX, then IMMEDIATE, then FIFO (always supported).
/// An explicitly preferred mode wins when the surface offers it.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: Option<vk::PresentModeKHR>,
) -> vk::PresentModeKHR {
    if let Some(mode) = preferred.filter(|mode| modes.contains(mode)) {
        return mode;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// One more than the minimum, capped by the maximum (0 = no maximum)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count.saturating_add(1).max(1);
    if capabilities.max_image_count > 0 {
        wanted.min(capabilities.max_image_count)
    } else {
        wanted
    }
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: requested.width.max(min.width).min(max.width),
        height: requested.height.max(min.height).min(max.height),
    }
}

/// Highest supported count not above `requested`, never below 2
pub fn choose_sample_count(
    supported: vk::SampleCountFlags,
    requested: u32,
) -> vk::SampleCountFlags {
    let ceiling = requested.max(2);
    SAMPLE_COUNTS
        .iter()
        .find(|(count, flag)| *count <= ceiling && supported.contains(*flag))
        .map(|(_, flag)| *flag)
        .unwrap_or(vk::SampleCountFlags::TYPE_4)
}

/// Vulkan instance, surface and logical device with its two queues
pub struct VulkanDevice {
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,
    pub swapchain_loader: khr::Swapchain,
    pub instance: ash::Instance,
    _entry: Entry,
}

impl VulkanDevice {
    /// Create the instance and surface, select a device and open it.
    ///
    /// Returns the device together with the profile it was selected with.
    pub fn new(
        app_name: &str,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        requirements: &DeviceRequirements,
    ) -> EngineResult<(Self, DeviceProfile)> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }?;
        let instance = Self::create_instance(&entry, app_name, display_handle)?;
        let surface_loader = khr::Surface::new(&entry, &instance);

        let surface = match unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .op("vkCreateSurfaceKHR")
        {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let opened = select_device(&instance, &surface_loader, surface, requirements).and_then(
            |profile| {
                let (device, graphics_queue, present_queue) =
                    Self::create_logical_device(&instance, &profile)?;
                Ok((profile, device, graphics_queue, present_queue))
            },
        );

        let (profile, device, graphics_queue, present_queue) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                unsafe {
                    surface_loader.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        log::info!("Using device {}", profile.name);
        log::debug!("Supported features: {:?}", profile.features);
        log::info!(
            "Queue families: graphics={} present={}",
            profile.queue_families.graphics,
            profile.queue_families.present
        );
        log::info!(
            "Surface format {:?}/{:?}, present mode {:?}, {} images, {:?}",
            profile.surface_format.format,
            profile.surface_format.color_space,
            profile.present_mode,
            profile.image_count,
            profile.samples
        );

        let swapchain_loader = khr::Swapchain::new(&instance, &device);

        Ok((
            Self {
                device,
                graphics_queue,
                present_queue,
                surface,
                surface_loader,
                swapchain_loader,
                instance,
                _entry: entry,
            },
            profile,
        ))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display_handle: RawDisplayHandle,
    ) -> EngineResult<ash::Instance> {
        let app_name_cstr = CString::new(app_name).unwrap_or_default();
        let engine_name = CString::new("msaa-triangle").unwrap_or_default();

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions the window system needs
        let extensions = ash_window::enumerate_required_extensions(display_handle)
            .op("vkEnumerateInstanceExtensionProperties")?;

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(extensions);

        unsafe { entry.create_instance(&create_info, None) }.op("vkCreateInstance")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        profile: &DeviceProfile,
    ) -> EngineResult<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = profile
            .queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance.create_device(profile.physical_device, &create_info, None)
        }
        .op("vkCreateDevice")?;

        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(profile.queue_families.graphics, 0),
                device.get_device_queue(profile.queue_families.present, 0),
            )
        };

        Ok((device, graphics_queue, present_queue))
    }

    /// Current surface capabilities for the selected device
    pub fn surface_capabilities(
        &self,
        profile: &DeviceProfile,
    ) -> EngineResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(profile.physical_device, self.surface)
        }
        .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> EngineResult<()> {
        unsafe { self.device.device_wait_idle() }.op("vkDeviceWaitIdle")
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
            self.instance.destroy_instance(None);
        }
    }
}
