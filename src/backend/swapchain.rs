// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// plus one ImageSlot per image: presentable view, offscreen multisample
// target and the slot's synchronization objects.
//
// A Swapchain value is one generation. Resizes destroy it whole and build
// a new one; slots are never patched in place.

use ash::prelude::VkResult;
use ash::vk;

use super::attachment::{color_subresource_range, MsaaAttachment};
use super::device::{DeviceProfile, VulkanDevice};
use super::sync::SlotSync;
use crate::error::{EngineResult, VkResultExt};

/// Everything owned on behalf of one swapchain image
#[derive(Debug)]
pub struct ImageSlot {
    /// Owned by the swapchain, never destroyed here
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub msaa: MsaaAttachment,
    pub sync: SlotSync,
}

impl ImageSlot {
    fn new(
        device: &ash::Device,
        profile: &DeviceProfile,
        image: vk::Image,
    ) -> EngineResult<Self> {
        let format = profile.surface_format.format;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(color_subresource_range());

        let view = unsafe { device.create_image_view(&view_info, None) }.op("vkCreateImageView")?;

        let msaa = match MsaaAttachment::new(
            device,
            &profile.memory_properties,
            format,
            profile.extent,
            profile.samples,
        ) {
            Ok(msaa) => msaa,
            Err(e) => {
                unsafe { device.destroy_image_view(view, None) };
                return Err(e);
            }
        };

        let sync = match SlotSync::new(device) {
            Ok(sync) => sync,
            Err(e) => {
                msaa.destroy(device);
                unsafe { device.destroy_image_view(view, None) };
                return Err(e);
            }
        };

        Ok(Self {
            image,
            view,
            msaa,
            sync,
        })
    }

    /// Fence and semaphores, presentable view, then the offscreen target
    fn destroy(self, device: &ash::Device) {
        self.sync.destroy(device);
        unsafe { device.destroy_image_view(self.view, None) };
        self.msaa.destroy(device);
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub slots: Vec<ImageSlot>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    pub fn build(device: &VulkanDevice, profile: &DeviceProfile) -> EngineResult<Self> {
        log::info!(
            "Creating swapchain: {}x{}, {} images requested",
            profile.extent.width,
            profile.extent.height,
            profile.image_count
        );

        let families = profile.queue_families;
        let family_indices = [families.graphics, families.present];

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(profile.image_count)
            .image_format(profile.surface_format.format)
            .image_color_space(profile.surface_format.color_space)
            .image_extent(profile.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(profile.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(profile.present_mode)
            .clipped(true);

        create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .op("vkCreateSwapchainKHR")?;

        // The driver may create more images than requested
        let images = match unsafe { device.swapchain_loader.get_swapchain_images(swapchain) }
            .op("vkGetSwapchainImagesKHR")
        {
            Ok(images) => images,
            Err(e) => {
                unsafe { device.swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        let mut slots = Vec::with_capacity(images.len());
        for &image in &images {
            match ImageSlot::new(&device.device, profile, image) {
                Ok(slot) => {
                    log::debug!(
                        "Slot {}: image {:?}, view {:?}",
                        slots.len(),
                        slot.image,
                        slot.view
                    );
                    slots.push(slot)
                }
                Err(e) => {
                    for slot in slots.into_iter().rev() {
                        slot.destroy(&device.device);
                    }
                    unsafe { device.swapchain_loader.destroy_swapchain(swapchain, None) };
                    return Err(e);
                }
            }
        }

        log::info!("Created swapchain with {} images", slots.len());

        Ok(Self {
            swapchain,
            slots,
            format: profile.surface_format.format,
            extent: profile.extent,
        })
    }

    pub fn image_count(&self) -> usize {
        self.slots.len()
    }

    /// Acquire next image, signaling `semaphore` once it is available
    pub fn acquire_next_image(
        &self,
        device: &VulkanDevice,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            device.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Present rendered image to screen. `Ok(true)` means suboptimal.
    pub fn present(
        &self,
        device: &VulkanDevice,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            device
                .swapchain_loader
                .queue_present(device.present_queue, &present_info)
        }
    }

    /// Slots in reverse order, then the swapchain itself
    pub fn destroy(self, device: &VulkanDevice) {
        for slot in self.slots.into_iter().rev() {
            slot.destroy(&device.device);
        }
        unsafe {
            device
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None)
        };
    }
}
