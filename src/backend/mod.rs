// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Each type owns its handles and is released
// through an explicit `destroy`, except `VulkanDevice` which drops last.

pub mod attachment;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
