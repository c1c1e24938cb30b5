// Renderer - owner of every GPU object
//
// OWNERSHIP TREE (destroyed bottom-up, built top-down):
//   VulkanDevice (instance, surface, logical device, queues)
//     └── command pool (device lifetime)
//           └── RenderTargets (one swapchain generation)
//                 ├── Swapchain + ImageSlots
//                 └── PipelineArtifacts
//
// `FrameContext` borrows one generation for a frame; the `Renderer` itself
// is what the resize coordinator tears down and rebuilds.

use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backend::device::{DeviceProfile, DeviceRequirements};
use crate::backend::pipeline::PipelineArtifacts;
use crate::backend::shader::ShaderBlobs;
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::Config;
use crate::error::{EngineResult, VkResultExt};
use crate::frame::{FrameDriver, FrameOutcome, FrameScheduler};
use crate::resize::SurfaceTargets;

/// Everything that is rebuilt on resize
struct RenderTargets {
    swapchain: Swapchain,
    pipeline: PipelineArtifacts,
}

impl RenderTargets {
    fn build(
        device: &VulkanDevice,
        profile: &DeviceProfile,
        shaders: &ShaderBlobs,
        command_pool: vk::CommandPool,
        clear_color: [f32; 4],
    ) -> EngineResult<Self> {
        let swapchain = Swapchain::build(device, profile)?;

        match PipelineArtifacts::build(
            &device.device,
            profile,
            &swapchain,
            shaders,
            command_pool,
            clear_color,
        ) {
            Ok(pipeline) => Ok(Self {
                swapchain,
                pipeline,
            }),
            Err(e) => {
                swapchain.destroy(device);
                Err(e)
            }
        }
    }

    /// Pipeline artifacts first: framebuffers reference the slot views
    fn destroy(self, device: &VulkanDevice) {
        self.pipeline.destroy(&device.device);
        self.swapchain.destroy(device);
    }
}

/// One frame's view of the device and the current generation
struct FrameContext<'a> {
    device: &'a VulkanDevice,
    targets: &'a RenderTargets,
}

impl FrameDriver for FrameContext<'_> {
    fn slot_count(&self) -> usize {
        self.targets.swapchain.image_count()
    }

    fn wait_for_slot(&mut self, slot: usize) -> EngineResult<()> {
        self.targets.swapchain.slots[slot]
            .sync
            .wait(&self.device.device)
    }

    fn reset_slot(&mut self, slot: usize) -> EngineResult<()> {
        self.targets.swapchain.slots[slot]
            .sync
            .reset(&self.device.device)
    }

    fn acquire(&mut self, slot: usize) -> VkResult<(u32, bool)> {
        let semaphore = self.targets.swapchain.slots[slot].sync.image_acquired;
        self.targets
            .swapchain
            .acquire_next_image(self.device, semaphore)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> EngineResult<()> {
        let sync = &self.targets.swapchain.slots[slot].sync;

        let wait_semaphores = [sync.image_acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.targets.pipeline.command_buffers[image_index as usize]];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], sync.in_flight)
        }
        .op("vkQueueSubmit")
    }

    fn rearm_slot(&mut self, slot: usize) -> EngineResult<()> {
        self.targets.swapchain.slots[slot]
            .sync
            .rearm(&self.device.device, self.device.graphics_queue)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VkResult<bool> {
        let semaphore = self.targets.swapchain.slots[slot].sync.render_finished;
        self.targets
            .swapchain
            .present(self.device, image_index, semaphore)
    }

    fn wait_idle(&mut self) -> EngineResult<()> {
        self.device.wait_idle()
    }
}

pub struct Renderer {
    targets: Option<RenderTargets>,
    command_pool: vk::CommandPool,
    scheduler: FrameScheduler,
    profile: DeviceProfile,
    /// Refreshed surface state, committed by the next `build`
    next_profile: Option<DeviceProfile>,
    shaders: ShaderBlobs,
    clear_color: [f32; 4],
    /// Dropped after `Renderer::drop` has released everything above
    device: VulkanDevice,
}

impl Renderer {
    pub fn new(
        config: &Config,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        window_extent: vk::Extent2D,
    ) -> EngineResult<Self> {
        // Before the device, so a missing file fails fast
        let shaders = ShaderBlobs::load(&config.shaders.vertex, &config.shaders.fragment)?;

        let requirements = DeviceRequirements {
            tier: config.device_tier(),
            preferred_present_mode: config.preferred_present_mode(),
            msaa_samples: config.graphics.msaa_samples,
            window_extent,
        };
        let (device, profile) = VulkanDevice::new(
            &config.window.title,
            display_handle,
            window_handle,
            &requirements,
        )?;

        // Command buffers are only ever freed as a whole generation
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(profile.queue_families.graphics);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .op("vkCreateCommandPool")?;

        let mut renderer = Self {
            targets: None,
            command_pool,
            scheduler: FrameScheduler::new(),
            profile,
            next_profile: None,
            shaders,
            clear_color: config.graphics.clear_color,
            device,
        };
        renderer.build()?;

        log::info!("Renderer ready");
        Ok(renderer)
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Render and present one frame. Without a built swapchain the frame is
    /// skipped as out of date, which leads the host to rebuild.
    pub fn render_frame(&mut self) -> EngineResult<FrameOutcome> {
        let Some(targets) = self.targets.as_ref() else {
            return Ok(FrameOutcome::Skipped(vk::Result::ERROR_OUT_OF_DATE_KHR));
        };

        let mut frame = FrameContext {
            device: &self.device,
            targets,
        };
        self.scheduler.render_frame(&mut frame)
    }
}

impl SurfaceTargets for Renderer {
    fn drain(&mut self) -> EngineResult<()> {
        match self.targets.as_ref() {
            Some(targets) => {
                let mut frame = FrameContext {
                    device: &self.device,
                    targets,
                };
                self.scheduler.drain(&mut frame)
            }
            None => self.device.wait_idle(),
        }
    }

    fn refresh_extent(&mut self, width: u32, height: u32) -> EngineResult<vk::Extent2D> {
        let capabilities = self.device.surface_capabilities(&self.profile)?;
        let next = self
            .profile
            .with_surface(capabilities, vk::Extent2D { width, height });
        let extent = next.extent;
        self.next_profile = Some(next);
        Ok(extent)
    }

    fn teardown(&mut self) {
        if let Some(targets) = self.targets.take() {
            targets.destroy(&self.device);
        }
    }

    fn build(&mut self) -> EngineResult<()> {
        self.teardown();
        if let Some(profile) = self.next_profile.take() {
            self.profile = profile;
        }
        let targets = RenderTargets::build(
            &self.device,
            &self.profile,
            &self.shaders,
            self.command_pool,
            self.clear_color,
        )?;
        self.targets = Some(targets);
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!(
            "Cleaning up Vulkan resources after {} frames...",
            self.scheduler.cursor().frames()
        );

        // Every fence signaled and the device idle before anything goes
        if let Err(e) = self.drain() {
            log::error!("Failed to drain frames before shutdown: {}", e);
        }
        self.teardown();
        unsafe {
            self.device
                .device
                .destroy_command_pool(self.command_pool, None)
        };

        log::info!("Cleanup complete");
    }
}
