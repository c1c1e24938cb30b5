// Resize coordination
//
// Everything sized by the surface is rebuilt as one unit:
//   drain -> refresh extent -> teardown (reverse creation order) -> build
// The frame cursor is left alone; it wraps on the new slot count.

use ash::vk;

use crate::error::EngineResult;

/// Size-dependent GPU state that can be torn down and rebuilt
pub trait SurfaceTargets {
    /// Wait until no submitted frame is still executing
    fn drain(&mut self) -> EngineResult<()>;

    /// Re-read the surface capabilities and stage the extent the next
    /// build will use. Nothing in use changes until `build` commits it.
    fn refresh_extent(&mut self, width: u32, height: u32) -> EngineResult<vk::Extent2D>;

    /// Destroy pipeline artifacts, then the swapchain and its slots.
    /// Must be a no-op when nothing is built.
    fn teardown(&mut self);

    /// Commit the staged extent, if any, and create targets for it
    fn build(&mut self) -> EngineResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Zero area or recovery disabled; nothing was touched
    Ignored,
    Rebuilt(vk::Extent2D),
}

#[derive(Clone, Copy, Debug)]
pub struct ResizeCoordinator {
    rebuild_on_stale: bool,
}

impl ResizeCoordinator {
    pub fn new(rebuild_on_stale: bool) -> Self {
        Self { rebuild_on_stale }
    }

    /// Handle a size-changed notification. Width or height of zero is a
    /// minimized window and leaves the current targets in place.
    pub fn on_resize<T: SurfaceTargets>(
        &self,
        targets: &mut T,
        width: u32,
        height: u32,
    ) -> EngineResult<ResizeOutcome> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring zero-area resize {}x{}", width, height);
            return Ok(ResizeOutcome::Ignored);
        }

        log::info!("Resizing to {}x{}", width, height);
        self.rebuild(targets, width, height)
    }

    /// Rebuild after acquire or present reported the swapchain out of date,
    /// with the window's current size
    pub fn recover<T: SurfaceTargets>(
        &self,
        targets: &mut T,
        width: u32,
        height: u32,
    ) -> EngineResult<ResizeOutcome> {
        if !self.rebuild_on_stale {
            log::warn!("Swapchain is out of date, rebuild_on_stale is off");
            return Ok(ResizeOutcome::Ignored);
        }
        if width == 0 || height == 0 {
            return Ok(ResizeOutcome::Ignored);
        }

        log::info!("Swapchain out of date, rebuilding at {}x{}", width, height);
        self.rebuild(targets, width, height)
    }

    fn rebuild<T: SurfaceTargets>(
        &self,
        targets: &mut T,
        width: u32,
        height: u32,
    ) -> EngineResult<ResizeOutcome> {
        targets.drain()?;

        let extent = targets.refresh_extent(width, height)?;
        if extent.width == 0 || extent.height == 0 {
            // Surface reports no area yet (mid-minimize on some platforms)
            log::debug!(
                "Surface extent is {}x{}, keeping old targets",
                extent.width,
                extent.height
            );
            return Ok(ResizeOutcome::Ignored);
        }

        targets.teardown();
        targets.build()?;

        log::info!("Rebuilt surface targets at {}x{}", extent.width, extent.height);
        Ok(ResizeOutcome::Rebuilt(extent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        Drain,
        Refresh(u32, u32),
        Teardown,
        Build,
    }

    /// Clamps like a surface with a 64x64 to 1920x1080 extent range.
    /// `extent` is what the built targets use, `staged` what the next build
    /// will use.
    #[derive(Default)]
    struct RecordingTargets {
        calls: Vec<Call>,
        extent: vk::Extent2D,
        staged: Option<vk::Extent2D>,
        /// Surface currently reports 0x0
        surface_empty: bool,
        fail_build: bool,
    }

    impl SurfaceTargets for RecordingTargets {
        fn drain(&mut self) -> EngineResult<()> {
            self.calls.push(Call::Drain);
            Ok(())
        }

        fn refresh_extent(&mut self, width: u32, height: u32) -> EngineResult<vk::Extent2D> {
            self.calls.push(Call::Refresh(width, height));
            let extent = if self.surface_empty {
                vk::Extent2D::default()
            } else {
                vk::Extent2D {
                    width: width.clamp(64, 1920),
                    height: height.clamp(64, 1080),
                }
            };
            self.staged = Some(extent);
            Ok(extent)
        }

        fn teardown(&mut self) {
            self.calls.push(Call::Teardown);
        }

        fn build(&mut self) -> EngineResult<()> {
            self.calls.push(Call::Build);
            if self.fail_build {
                return Err(EngineError::Vulkan {
                    op: "vkCreateSwapchainKHR",
                    code: vk::Result::ERROR_INITIALIZATION_FAILED,
                });
            }
            if let Some(extent) = self.staged.take() {
                self.extent = extent;
            }
            Ok(())
        }
    }

    #[test]
    fn zero_area_is_a_no_op() {
        let coordinator = ResizeCoordinator::new(true);
        let mut targets = RecordingTargets::default();
        targets.extent = vk::Extent2D {
            width: 800,
            height: 600,
        };

        for (w, h) in [(0, 600), (800, 0), (0, 0)] {
            let outcome = coordinator.on_resize(&mut targets, w, h).unwrap();
            assert_eq!(outcome, ResizeOutcome::Ignored);
        }
        assert!(targets.calls.is_empty());
        assert_eq!(targets.extent.width, 800);
        assert_eq!(targets.extent.height, 600);
    }

    #[test]
    fn resize_drains_then_tears_down_then_builds() {
        let coordinator = ResizeCoordinator::new(true);
        let mut targets = RecordingTargets::default();

        let outcome = coordinator.on_resize(&mut targets, 1024, 768).unwrap();
        assert_eq!(
            outcome,
            ResizeOutcome::Rebuilt(vk::Extent2D {
                width: 1024,
                height: 768
            })
        );
        assert_eq!(
            targets.calls,
            vec![
                Call::Drain,
                Call::Refresh(1024, 768),
                Call::Teardown,
                Call::Build
            ]
        );
    }

    #[test]
    fn empty_surface_keeps_the_committed_extent() {
        let coordinator = ResizeCoordinator::new(true);
        let mut targets = RecordingTargets::default();
        coordinator.on_resize(&mut targets, 800, 600).unwrap();

        targets.calls.clear();
        targets.surface_empty = true;
        let outcome = coordinator.on_resize(&mut targets, 1024, 768).unwrap();

        assert_eq!(outcome, ResizeOutcome::Ignored);
        assert_eq!(targets.calls, vec![Call::Drain, Call::Refresh(1024, 768)]);
        assert_eq!(
            targets.extent,
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );

        // The next real build uses the surface as it is then
        targets.surface_empty = false;
        coordinator.on_resize(&mut targets, 1024, 768).unwrap();
        assert_eq!(targets.extent.width, 1024);
    }

    #[test]
    fn extent_is_clamped_by_the_surface() {
        let coordinator = ResizeCoordinator::new(true);
        let mut targets = RecordingTargets::default();

        let outcome = coordinator.on_resize(&mut targets, 4000, 10).unwrap();
        assert_eq!(
            outcome,
            ResizeOutcome::Rebuilt(vk::Extent2D {
                width: 1920,
                height: 64
            })
        );
        assert_eq!(targets.extent.width, 1920);
    }

    #[test]
    fn build_failure_propagates() {
        let coordinator = ResizeCoordinator::new(true);
        let mut targets = RecordingTargets {
            fail_build: true,
            ..Default::default()
        };

        let err = coordinator.on_resize(&mut targets, 640, 480).unwrap_err();
        assert_eq!(err.code(), Some(vk::Result::ERROR_INITIALIZATION_FAILED));
        assert_eq!(targets.calls.last(), Some(&Call::Build));
    }

    #[test]
    fn recover_respects_rebuild_on_stale() {
        let mut targets = RecordingTargets::default();

        let outcome = ResizeCoordinator::new(false)
            .recover(&mut targets, 800, 600)
            .unwrap();
        assert_eq!(outcome, ResizeOutcome::Ignored);
        assert!(targets.calls.is_empty());

        let outcome = ResizeCoordinator::new(true)
            .recover(&mut targets, 800, 600)
            .unwrap();
        assert!(matches!(outcome, ResizeOutcome::Rebuilt(_)));
        assert_eq!(targets.calls.len(), 4);
    }
}
