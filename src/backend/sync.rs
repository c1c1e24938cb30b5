// Synchronization primitives
//
// One set per swapchain image slot:
// - image_acquired: signaled by acquire, waited on by the submit
// - render_finished: signaled by the submit, waited on by present
// - in_flight: host-visible, signaled when the slot's submission completes

use ash::vk;

use crate::error::{EngineResult, VkResultExt};

#[derive(Debug)]
pub struct SlotSync {
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl SlotSync {
    /// Semaphores start unsignaled, the fence signaled so the first wait
    /// on a fresh slot returns immediately
    pub fn new(device: &ash::Device) -> EngineResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_acquired = device
                .create_semaphore(&semaphore_info, None)
                .op("vkCreateSemaphore")?;

            let render_finished = match device
                .create_semaphore(&semaphore_info, None)
                .op("vkCreateSemaphore")
            {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.destroy_semaphore(image_acquired, None);
                    return Err(e);
                }
            };

            let in_flight = match device.create_fence(&fence_info, None).op("vkCreateFence") {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_semaphore(render_finished, None);
                    device.destroy_semaphore(image_acquired, None);
                    return Err(e);
                }
            };

            Ok(Self {
                image_acquired,
                render_finished,
                in_flight,
            })
        }
    }

    pub fn wait(&self, device: &ash::Device) -> EngineResult<()> {
        unsafe { device.wait_for_fences(&[self.in_flight], true, u64::MAX) }
            .op("vkWaitForFences")
    }

    pub fn reset(&self, device: &ash::Device) -> EngineResult<()> {
        unsafe { device.reset_fences(&[self.in_flight]) }.op("vkResetFences")
    }

    /// Signal the fence through an empty submission, for when its real
    /// submission failed after the reset
    pub fn rearm(&self, device: &ash::Device, queue: vk::Queue) -> EngineResult<()> {
        unsafe { device.queue_submit(queue, &[], self.in_flight) }.op("vkQueueSubmit")
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.in_flight, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_semaphore(self.image_acquired, None);
        }
    }
}
