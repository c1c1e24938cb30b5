// Offscreen multisample color attachments
//
// One per swapchain image. The contents never leave the render pass (they
// are resolved into the presentable image), so the image is transient and
// prefers lazily allocated memory where the device has it.

use ash::vk;

use crate::error::{EngineError, EngineResult, VkResultExt};

/// Memory type for `type_bits`, preferring types with `preferred` flags.
/// Falls back to the first type allowed by `type_bits`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    preferred: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    let allowed = |index: u32| type_bits & (1 << index) != 0;

    (0..count)
        .find(|&i| {
            allowed(i)
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(preferred)
        })
        .or_else(|| (0..count).find(|&i| allowed(i)))
}

/// Multisample image, its memory and its view
#[derive(Debug)]
pub struct MsaaAttachment {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl MsaaAttachment {
    pub fn new(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> EngineResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            )
            .samples(samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.create_image(&image_info, None) }.op("vkCreateImage")?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = match find_memory_type(
            memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        ) {
            Some(index) => index,
            None => {
                unsafe { device.destroy_image(image, None) };
                return Err(EngineError::NoSuitableDevice(format!(
                    "no memory type in mask {:#b} for the multisample attachment",
                    requirements.memory_type_bits
                )));
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) }
            .op("vkAllocateMemory")
        {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_subresource_range());

        let view = unsafe { device.bind_image_memory(image, memory, 0) }
            .op("vkBindImageMemory")
            .and_then(|()| {
                unsafe { device.create_image_view(&view_info, None) }.op("vkCreateImageView")
            });

        match view {
            Ok(view) => Ok(Self {
                image,
                memory,
                view,
            }),
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                Err(e)
            }
        }
    }

    /// View, then memory, then image
    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.free_memory(self.memory, None);
            device.destroy_image(self.image, None);
        }
    }
}

/// Whole single-mip, single-layer color range
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        props
    }

    #[test]
    fn prefers_lazily_allocated_type() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        ]);
        let found = find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::LAZILY_ALLOCATED);
        assert_eq!(found, Some(2));
    }

    #[test]
    fn falls_back_to_first_allowed_type() {
        let props = properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        ]);
        // The lazily allocated type exists but the image cannot use it
        let found = find_memory_type(&props, 0b011, vk::MemoryPropertyFlags::LAZILY_ALLOCATED);
        assert_eq!(found, Some(0));

        let found = find_memory_type(&props, 0b010, vk::MemoryPropertyFlags::LAZILY_ALLOCATED);
        assert_eq!(found, Some(1));
    }

    #[test]
    fn no_allowed_type() {
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert_eq!(
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::LAZILY_ALLOCATED),
            None
        );
        assert_eq!(
            find_memory_type(&props, 0, vk::MemoryPropertyFlags::LAZILY_ALLOCATED),
            None
        );
    }
}
