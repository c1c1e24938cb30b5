// Frame scheduling
//
// One call to `render_frame` walks a slot through
//   wait fence -> acquire -> reset fence -> submit -> present
// and advances the cursor. At most `slot_count` frames are in flight since
// every slot's fence must signal before that slot is used again.
//
// The Vulkan calls sit behind `FrameDriver` so the ordering can be checked
// without a device.

use ash::prelude::VkResult;
use ash::vk;

use crate::error::EngineResult;

/// Monotonic frame counter. The slot used for a frame is
/// `counter % slot_count`, with whatever slot count is current.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCursor {
    counter: u64,
}

impl FrameCursor {
    pub fn frames(&self) -> u64 {
        self.counter
    }

    pub fn slot(&self, slot_count: usize) -> usize {
        (self.counter % slot_count as u64) as usize
    }

    fn advance(&mut self) {
        self.counter = self.counter.wrapping_add(1);
    }
}

/// GPU side of one frame. Synchronization objects are addressed by slot,
/// command buffers by the image index returned from `acquire`.
pub trait FrameDriver {
    fn slot_count(&self) -> usize;

    /// Block until the slot's fence is signaled
    fn wait_for_slot(&mut self, slot: usize) -> EngineResult<()>;

    fn reset_slot(&mut self, slot: usize) -> EngineResult<()>;

    /// Next presentable image index and whether the swapchain is suboptimal
    fn acquire(&mut self, slot: usize) -> VkResult<(u32, bool)>;

    fn submit(&mut self, slot: usize, image_index: u32) -> EngineResult<()>;

    /// Signal the slot's fence again without rendering, after it was reset
    /// for a submission that never reached the queue
    fn rearm_slot(&mut self, slot: usize) -> EngineResult<()>;

    /// `Ok(true)` means suboptimal
    fn present(&mut self, slot: usize, image_index: u32) -> VkResult<bool>;

    fn wait_idle(&mut self) -> EngineResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32, suboptimal: bool },
    /// Rendered, but presentation reported a non-success code
    PresentedStale(vk::Result),
    /// Acquire failed; nothing was submitted and the cursor did not move
    Skipped(vk::Result),
}

impl FrameOutcome {
    /// The swapchain no longer matches the surface and must be rebuilt
    /// before frames can be shown again
    pub fn surface_lost(&self) -> bool {
        matches!(
            self,
            FrameOutcome::PresentedStale(vk::Result::ERROR_OUT_OF_DATE_KHR)
                | FrameOutcome::Skipped(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}

#[derive(Debug, Default)]
pub struct FrameScheduler {
    cursor: FrameCursor,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> FrameCursor {
        self.cursor
    }

    pub fn render_frame<D: FrameDriver>(&mut self, driver: &mut D) -> EngineResult<FrameOutcome> {
        let count = driver.slot_count();
        if count == 0 {
            return Ok(FrameOutcome::Skipped(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
        let slot = self.cursor.slot(count);

        driver.wait_for_slot(slot)?;

        // The fence stays signaled until a submit is certain, otherwise the
        // next wait on this slot would never return
        let image_index = match driver.acquire(slot) {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Acquired image {} from a suboptimal swapchain", image_index);
                }
                image_index
            }
            Err(code) => {
                log::warn!("vkAcquireNextImageKHR returned {:?}, skipping frame", code);
                return Ok(FrameOutcome::Skipped(code));
            }
        };

        driver.reset_slot(slot)?;
        if let Err(e) = driver.submit(slot, image_index) {
            // Nothing else will signal this fence, and drain waits on it
            if let Err(rearm) = driver.rearm_slot(slot) {
                log::error!("Failed to re-signal fence of slot {}: {}", slot, rearm);
            }
            return Err(e);
        }

        let outcome = match driver.present(slot, image_index) {
            Ok(suboptimal) => FrameOutcome::Presented {
                image_index,
                suboptimal,
            },
            Err(code) => {
                log::warn!("vkQueuePresentKHR returned {:?}", code);
                FrameOutcome::PresentedStale(code)
            }
        };

        self.cursor.advance();
        Ok(outcome)
    }

    /// Wait for every slot's last submission, then for the whole device.
    /// Nothing owned by the swapchain generation may be destroyed before
    /// this returns.
    pub fn drain<D: FrameDriver>(&self, driver: &mut D) -> EngineResult<()> {
        for slot in 0..driver.slot_count() {
            driver.wait_for_slot(slot)?;
        }
        driver.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::collections::VecDeque;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Reset(usize),
        Acquire(usize),
        Submit(usize, u32),
        Rearm(usize),
        Present(usize, u32),
        Idle,
    }

    /// Records every call. Images are handed out one ahead of the cursor so
    /// slot and image index differ.
    struct RecordingDriver {
        slots: usize,
        calls: Vec<Call>,
        next_image: u32,
        acquire_errors: VecDeque<vk::Result>,
        present_errors: VecDeque<vk::Result>,
    }

    impl RecordingDriver {
        fn new(slots: usize) -> Self {
            Self {
                slots,
                calls: Vec::new(),
                next_image: 1,
                acquire_errors: VecDeque::new(),
                present_errors: VecDeque::new(),
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(*c)).count()
        }
    }

    impl FrameDriver for RecordingDriver {
        fn slot_count(&self) -> usize {
            self.slots
        }

        fn wait_for_slot(&mut self, slot: usize) -> EngineResult<()> {
            self.calls.push(Call::Wait(slot));
            Ok(())
        }

        fn reset_slot(&mut self, slot: usize) -> EngineResult<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> VkResult<(u32, bool)> {
            self.calls.push(Call::Acquire(slot));
            if let Some(code) = self.acquire_errors.pop_front() {
                return Err(code);
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.slots as u32;
            Ok((image, false))
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> EngineResult<()> {
            self.calls.push(Call::Submit(slot, image_index));
            Ok(())
        }

        fn rearm_slot(&mut self, slot: usize) -> EngineResult<()> {
            self.calls.push(Call::Rearm(slot));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> VkResult<bool> {
            self.calls.push(Call::Present(slot, image_index));
            match self.present_errors.pop_front() {
                Some(code) => Err(code),
                None => Ok(false),
            }
        }

        fn wait_idle(&mut self) -> EngineResult<()> {
            self.calls.push(Call::Idle);
            Ok(())
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Fence {
        Signaled,
        Unsignaled,
        /// Armed by a submission the GPU has not finished yet
        Pending,
    }

    /// Tracks each slot's fence like the device does. Waiting on a fence
    /// that was reset and never armed again would block forever.
    struct FenceDriver {
        fences: Vec<Fence>,
        submit_error: Option<vk::Result>,
    }

    impl FenceDriver {
        fn new(slots: usize) -> Self {
            Self {
                fences: vec![Fence::Signaled; slots],
                submit_error: None,
            }
        }
    }

    impl FrameDriver for FenceDriver {
        fn slot_count(&self) -> usize {
            self.fences.len()
        }

        fn wait_for_slot(&mut self, slot: usize) -> EngineResult<()> {
            match self.fences[slot] {
                Fence::Unsignaled => panic!("wait on slot {} would never return", slot),
                Fence::Pending | Fence::Signaled => self.fences[slot] = Fence::Signaled,
            }
            Ok(())
        }

        fn reset_slot(&mut self, slot: usize) -> EngineResult<()> {
            self.fences[slot] = Fence::Unsignaled;
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> VkResult<(u32, bool)> {
            Ok((slot as u32, false))
        }

        fn submit(&mut self, slot: usize, _image_index: u32) -> EngineResult<()> {
            if let Some(code) = self.submit_error.take() {
                return Err(EngineError::Vulkan {
                    op: "vkQueueSubmit",
                    code,
                });
            }
            self.fences[slot] = Fence::Pending;
            Ok(())
        }

        fn rearm_slot(&mut self, slot: usize) -> EngineResult<()> {
            self.fences[slot] = Fence::Pending;
            Ok(())
        }

        fn present(&mut self, _slot: usize, _image_index: u32) -> VkResult<bool> {
            Ok(false)
        }

        fn wait_idle(&mut self) -> EngineResult<()> {
            Ok(())
        }
    }

    #[test]
    fn ten_frames_on_three_slots() {
        let mut driver = RecordingDriver::new(3);
        let mut scheduler = FrameScheduler::new();

        for _ in 0..10 {
            let outcome = scheduler.render_frame(&mut driver).unwrap();
            assert!(matches!(outcome, FrameOutcome::Presented { .. }));
        }

        assert_eq!(driver.count(|c| matches!(c, Call::Wait(_))), 10);
        assert_eq!(driver.count(|c| matches!(c, Call::Reset(_))), 10);
        assert_eq!(driver.count(|c| matches!(c, Call::Acquire(_))), 10);
        assert_eq!(driver.count(|c| matches!(c, Call::Submit(..))), 10);
        assert_eq!(driver.count(|c| matches!(c, Call::Present(..))), 10);

        // Each frame is five calls; the i-th frame uses slot i % 3 throughout
        for (i, frame) in driver.calls.chunks(5).enumerate() {
            let slot = i % 3;
            let image = ((i + 1) % 3) as u32;
            assert_eq!(
                frame,
                &[
                    Call::Wait(slot),
                    Call::Acquire(slot),
                    Call::Reset(slot),
                    Call::Submit(slot, image),
                    Call::Present(slot, image),
                ]
            );
        }
    }

    #[test]
    fn cursor_is_frame_count_mod_slots() {
        for slots in 1..=4 {
            let mut driver = RecordingDriver::new(slots);
            let mut scheduler = FrameScheduler::new();
            for n in 1..=11u64 {
                scheduler.render_frame(&mut driver).unwrap();
                assert_eq!(scheduler.cursor().frames(), n);
                assert_eq!(scheduler.cursor().slot(slots), (n % slots as u64) as usize);
            }
        }
    }

    #[test]
    fn failed_acquire_skips_without_touching_the_fence() {
        let mut driver = RecordingDriver::new(2);
        driver
            .acquire_errors
            .push_back(vk::Result::ERROR_OUT_OF_DATE_KHR);
        let mut scheduler = FrameScheduler::new();

        let outcome = scheduler.render_frame(&mut driver).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Skipped(vk::Result::ERROR_OUT_OF_DATE_KHR)
        );
        assert!(outcome.surface_lost());
        assert_eq!(driver.calls, vec![Call::Wait(0), Call::Acquire(0)]);
        assert_eq!(scheduler.cursor().frames(), 0);

        // Same slot again on the next attempt
        scheduler.render_frame(&mut driver).unwrap();
        assert_eq!(driver.calls[2], Call::Wait(0));
        assert_eq!(scheduler.cursor().frames(), 1);
    }

    #[test]
    fn failed_submit_rearms_the_fence_so_drain_returns() {
        let mut driver = FenceDriver::new(3);
        let mut scheduler = FrameScheduler::new();
        scheduler.render_frame(&mut driver).unwrap();

        driver.submit_error = Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let err = scheduler.render_frame(&mut driver).unwrap_err();
        assert_eq!(err.code(), Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert_eq!(scheduler.cursor().frames(), 1);
        assert_eq!(driver.fences[1], Fence::Pending);

        // What shutdown does after a fatal frame error
        scheduler.drain(&mut driver).unwrap();
        assert!(driver.fences.iter().all(|&f| f == Fence::Signaled));
    }

    #[test]
    fn failed_present_still_advances() {
        let mut driver = RecordingDriver::new(2);
        driver.present_errors.push_back(vk::Result::ERROR_SURFACE_LOST_KHR);
        let mut scheduler = FrameScheduler::new();

        let outcome = scheduler.render_frame(&mut driver).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::PresentedStale(vk::Result::ERROR_SURFACE_LOST_KHR)
        );
        assert!(!outcome.surface_lost());
        assert_eq!(scheduler.cursor().frames(), 1);
    }

    #[test]
    fn cursor_wraps_on_new_slot_count() {
        let mut scheduler = FrameScheduler::new();
        let mut driver = RecordingDriver::new(3);
        for _ in 0..4 {
            scheduler.render_frame(&mut driver).unwrap();
        }

        // Swapchain rebuilt with two images
        let mut driver = RecordingDriver::new(2);
        driver.next_image = 0;
        scheduler.render_frame(&mut driver).unwrap();
        assert_eq!(driver.calls[0], Call::Wait(0));
        assert_eq!(scheduler.cursor().frames(), 5);
        assert_eq!(scheduler.cursor().slot(2), 1);
    }

    #[test]
    fn drain_waits_every_fence_before_idle() {
        let mut driver = RecordingDriver::new(3);
        let scheduler = FrameScheduler::new();

        scheduler.drain(&mut driver).unwrap();
        assert_eq!(
            driver.calls,
            vec![Call::Wait(0), Call::Wait(1), Call::Wait(2), Call::Idle]
        );
    }

    #[test]
    fn no_slots_means_no_calls() {
        let mut driver = RecordingDriver::new(0);
        let mut scheduler = FrameScheduler::new();

        let outcome = scheduler.render_frame(&mut driver).unwrap();
        assert!(matches!(outcome, FrameOutcome::Skipped(_)));
        assert!(driver.calls.is_empty());
    }
}
