//! # Frame Sequencing
//!
//! Drives one frame tick at a time over a ring of in-flight slots. The
//! sequencing lives in [`SynchronisationManager::draw_frame`] and talks to the
//! GPU only through [`FrameBackend`], which keeps the protocol testable
//! without a device.
//!
//! ## Tick Order
//!
//! - **Wait**: block on the slot's fence until its previous submission retired
//! - **Acquire**: take the next swapchain image; an out-of-date swapchain ends the tick
//! - **Record**: fill the slot's command buffer through the caller's callback
//! - **Submit**: reset the fence and submit, signaling render-finished and the fence
//! - **Present**: queue the image for display
//! - **Advance**: move to the next slot, however the tick ended
//!
//! ## Failure Handling
//!
//! A tick that fails after the image was acquired but before its submission
//! went through hands the slot to [`FrameBackend::abandon`]. That consumes the
//! image-acquired semaphore and leaves the fence with a pending signal, so the
//! next tick on the same slot can neither acquire with a signaled semaphore
//! nor wait on a fence that nothing will ever signal.

use std::sync::Arc;

use ash::vk;

use crate::commands::record_one_time;
use crate::device::logical::{DeviceShared, Queues};
use crate::error::{VulkanError, VulkanResult};
use crate::swapchain::Swapchain;
use crate::sync::frame::FrameSyncArray;
use crate::sync::primitives::FrameSyncObject;

/// Outcome of one frame tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The image was presented
    Presented,
    /// Presented, but the swapchain no longer matches the surface exactly
    Suboptimal,
    /// The swapchain must be recreated; nothing was presented, or a resize was signaled
    OutOfDate,
}

impl FrameStatus {
    /// Whether the caller should recreate the swapchain
    pub fn needs_recreation(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Result of asking for the next swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Image acquired
    Image {
        /// Swapchain image index
        index: u32,
        /// Swapchain is suboptimal
        suboptimal: bool,
    },
    /// Swapchain is out of date; no image was acquired
    OutOfDate,
}

/// Result of presenting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    /// Presented
    Done,
    /// Presented to a suboptimal swapchain
    Suboptimal,
    /// Swapchain is out of date
    OutOfDate,
}

/// What the record callback gets to see
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// In-flight slot index
    pub slot: usize,
    /// Swapchain image index
    pub image_index: u32,
    /// Command buffer of the slot, already in the recording state
    pub command_buffer: vk::CommandBuffer,
    /// Framebuffer of the image, null when no pipeline is attached
    pub framebuffer: vk::Framebuffer,
    /// Swapchain extent
    pub extent: vk::Extent2D,
}

/// GPU operations used by one frame tick
pub trait FrameBackend {
    /// Per-slot resources
    type Slot;

    /// Block until the slot's previous submission retired
    fn wait(&mut self, slot: &Self::Slot) -> VulkanResult<()>;

    /// Acquire the next image, signaling the slot's image-acquired semaphore
    fn acquire(&mut self, slot: &Self::Slot) -> VulkanResult<Acquire>;

    /// Record the slot's command buffer around `record`
    fn record<F>(&mut self, slot: &Self::Slot, index: usize, image_index: u32, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&FrameContext) -> VulkanResult<()>;

    /// Reset the slot's fence
    fn reset(&mut self, slot: &Self::Slot) -> VulkanResult<()>;

    /// Submit the slot's command buffer, signaling its fence
    fn submit(&mut self, slot: &Self::Slot) -> VulkanResult<()>;

    /// Present `image_index` after the slot's render-finished semaphore
    fn present(&mut self, slot: &Self::Slot, image_index: u32) -> VulkanResult<Present>;

    /// Retire a slot whose tick failed between acquire and submit
    ///
    /// Must consume the image-acquired semaphore and leave the fence either
    /// signaled or with a submission pending that signals it.
    fn abandon(&mut self, slot: &Self::Slot) -> VulkanResult<()>;
}

/// Drives frame ticks over a ring of in-flight slots
#[derive(Debug)]
pub struct SynchronisationManager<S> {
    frames: FrameSyncArray<S>,
    resized: bool,
}

impl<S> SynchronisationManager<S> {
    /// Manage `frames`
    pub fn new(frames: FrameSyncArray<S>) -> Self {
        Self { frames, resized: false }
    }

    /// The slot ring
    pub fn frames(&self) -> &FrameSyncArray<S> {
        &self.frames
    }

    /// Slot the next tick will use
    pub fn current_slot(&self) -> usize {
        self.frames.current_index()
    }

    /// Record a surface resize; reported by the next tick, then cleared
    pub fn notify_resized(&mut self) {
        self.resized = true;
    }

    /// Whether a resize is pending
    pub fn resize_pending(&self) -> bool {
        self.resized
    }

    /// Run one tick: wait, acquire, record, submit, present, advance
    ///
    /// Once the fence wait succeeds the frame index advances no matter how
    /// the tick ends. Native failures are returned as errors; an out-of-date
    /// swapchain is a [`FrameStatus`], and recreating it is left to the caller.
    /// A pending resize survives a failed tick and is reported by the next
    /// one that presents.
    pub fn draw_frame<B, F>(&mut self, backend: &mut B, record: F) -> VulkanResult<FrameStatus>
    where
        B: FrameBackend<Slot = S>,
        F: FnOnce(&FrameContext) -> VulkanResult<()>,
    {
        let index = self.frames.current_index();
        let slot = self.frames.current();

        backend.wait(slot)?;

        let (image_index, acquire_suboptimal) = match backend.acquire(slot) {
            Ok(Acquire::Image { index, suboptimal }) => (index, suboptimal),
            Ok(Acquire::OutOfDate) => {
                log::debug!("Swapchain out of date at acquire, frame {}", self.frames.frame_index());
                self.frames.advance();
                self.resized = false;
                return Ok(FrameStatus::OutOfDate);
            }
            Err(err) => {
                self.frames.advance();
                return Err(err);
            }
        };

        if let Err(err) = record_and_submit(backend, slot, index, image_index, record) {
            if let Err(abandon_err) = backend.abandon(slot) {
                log::error!("Failed to retire frame slot {} after {}: {}", index, err, abandon_err);
            }
            self.frames.advance();
            return Err(err);
        }
        let presented = backend.present(slot, image_index);
        self.frames.advance();

        let resized = std::mem::take(&mut self.resized);
        Ok(match presented? {
            Present::OutOfDate => FrameStatus::OutOfDate,
            _ if resized => FrameStatus::OutOfDate,
            Present::Suboptimal => FrameStatus::Suboptimal,
            Present::Done if acquire_suboptimal => FrameStatus::Suboptimal,
            Present::Done => FrameStatus::Presented,
        })
    }
}

fn record_and_submit<B, F>(backend: &mut B, slot: &B::Slot, index: usize, image_index: u32, record: F) -> VulkanResult<()>
where
    B: FrameBackend,
    F: FnOnce(&FrameContext) -> VulkanResult<()>,
{
    backend.record(slot, index, image_index, record)?;
    backend.reset(slot)?;
    backend.submit(slot)
}

/// Sync objects plus the command buffer of one in-flight slot
pub struct FrameSlot {
    /// Semaphores and fence
    pub sync: FrameSyncObject,
    /// Primary command buffer, freed with its pool
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSlot {
    /// Create the sync objects for `command_buffer`
    pub fn new(device: &Arc<DeviceShared>, command_buffer: vk::CommandBuffer) -> VulkanResult<Self> {
        Ok(Self { sync: FrameSyncObject::new(device)?, command_buffer })
    }
}

/// [`FrameBackend`] over a real device and swapchain
pub struct VulkanFrameBackend<'a> {
    device: &'a DeviceShared,
    swapchain: &'a Swapchain,
    queues: Queues,
    timeout: u64,
}

impl<'a> VulkanFrameBackend<'a> {
    /// Backend presenting to `swapchain`; fence waits and acquisition time out after `timeout` ns
    pub fn new(device: &'a DeviceShared, swapchain: &'a Swapchain, queues: Queues, timeout: u64) -> Self {
        Self { device, swapchain, queues, timeout }
    }
}

impl FrameBackend for VulkanFrameBackend<'_> {
    type Slot = FrameSlot;

    fn wait(&mut self, slot: &FrameSlot) -> VulkanResult<()> {
        slot.sync.frame_complete.wait(self.device, self.timeout)
    }

    fn acquire(&mut self, slot: &FrameSlot) -> VulkanResult<Acquire> {
        match self.swapchain.acquire_next_image(self.timeout, slot.sync.image_acquired.handle()) {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(err) => Err(VulkanError::Api(err)),
        }
    }

    fn record<F>(&mut self, slot: &FrameSlot, index: usize, image_index: u32, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&FrameContext) -> VulkanResult<()>,
    {
        let frame = FrameContext {
            slot: index,
            image_index,
            command_buffer: slot.command_buffer,
            framebuffer: self.swapchain.framebuffer(image_index),
            extent: self.swapchain.extent(),
        };
        record_one_time(self.device.raw(), slot.command_buffer, || record(&frame))
    }

    fn reset(&mut self, slot: &FrameSlot) -> VulkanResult<()> {
        slot.sync.frame_complete.reset(self.device)
    }

    fn submit(&mut self, slot: &FrameSlot) -> VulkanResult<()> {
        let wait_semaphores = [slot.sync.image_acquired.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [slot.command_buffer];
        let signal_semaphores = [slot.sync.render_finished.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .raw()
                .queue_submit(self.queues.graphics, &[submit_info.build()], slot.sync.frame_complete.handle())
                .map_err(VulkanError::Api)
        }
    }

    fn present(&mut self, slot: &FrameSlot, image_index: u32) -> VulkanResult<Present> {
        match self
            .swapchain
            .present(self.queues.present, slot.sync.render_finished.handle(), image_index)
        {
            Ok(false) => Ok(Present::Done),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(Present::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::OutOfDate),
            Err(err) => Err(VulkanError::Api(err)),
        }
    }

    fn abandon(&mut self, slot: &FrameSlot) -> VulkanResult<()> {
        // An empty batch waits out the acquire and signals the fence.
        slot.sync.frame_complete.reset(self.device)?;
        let wait_semaphores = [slot.sync.image_acquired.handle()];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        unsafe {
            self.device
                .raw()
                .queue_submit(self.queues.graphics, &[submit_info.build()], slot.sync.frame_complete.handle())
                .map_err(VulkanError::Api)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        /// Waited on a slot's fence, which was signaled by this submission (if any)
        Wait { slot: usize, signaled_by: Option<usize> },
        Acquire { slot: usize },
        Record { slot: usize, image: u32 },
        Reset { slot: usize },
        Submit { slot: usize, submission: usize },
        Present { slot: usize, image: u32 },
        Abandon { slot: usize },
    }

    /// Tracks fence and semaphore state per slot and rejects invalid reuse
    ///
    /// A submission number stands for the GPU work that signals a fence.
    #[derive(Default)]
    struct MockBackend {
        events: Vec<Event>,
        fence_owner: Vec<Option<usize>>,
        fence_signaled: Vec<bool>,
        fence_pending: Vec<bool>,
        acquire_pending: Vec<bool>,
        submissions: usize,
        next_image: u32,
        acquire_results: Vec<Acquire>,
        present_results: Vec<Present>,
        failing_submits: usize,
    }

    impl MockBackend {
        fn new(slots: usize) -> Self {
            Self {
                fence_owner: vec![None; slots],
                fence_signaled: vec![true; slots],
                fence_pending: vec![false; slots],
                acquire_pending: vec![false; slots],
                ..Self::default()
            }
        }
    }

    impl FrameBackend for MockBackend {
        type Slot = usize;

        fn wait(&mut self, slot: &usize) -> VulkanResult<()> {
            let slot = *slot;
            assert!(
                self.fence_signaled[slot] || self.fence_pending[slot],
                "slot {} fence unsignaled with nothing pending",
                slot
            );
            // The GPU retires the work instantly.
            self.fence_signaled[slot] = true;
            self.fence_pending[slot] = false;
            self.events.push(Event::Wait { slot, signaled_by: self.fence_owner[slot] });
            Ok(())
        }

        fn acquire(&mut self, slot: &usize) -> VulkanResult<Acquire> {
            let slot = *slot;
            assert!(self.fence_signaled[slot], "acquire before the slot fence was waited on");
            assert!(!self.acquire_pending[slot], "slot {} image-acquired semaphore already signaled", slot);
            self.events.push(Event::Acquire { slot });
            let result = if self.acquire_results.is_empty() {
                let index = self.next_image;
                self.next_image = (self.next_image + 1) % 3;
                Acquire::Image { index, suboptimal: false }
            } else {
                self.acquire_results.remove(0)
            };
            if matches!(result, Acquire::Image { .. }) {
                self.acquire_pending[slot] = true;
            }
            Ok(result)
        }

        fn record<F>(&mut self, slot: &usize, index: usize, image_index: u32, record: F) -> VulkanResult<()>
        where
            F: FnOnce(&FrameContext) -> VulkanResult<()>,
        {
            self.events.push(Event::Record { slot: *slot, image: image_index });
            record(&FrameContext {
                slot: index,
                image_index,
                command_buffer: vk::CommandBuffer::null(),
                framebuffer: vk::Framebuffer::null(),
                extent: vk::Extent2D { width: 1, height: 1 },
            })
        }

        fn reset(&mut self, slot: &usize) -> VulkanResult<()> {
            self.fence_signaled[*slot] = false;
            self.events.push(Event::Reset { slot: *slot });
            Ok(())
        }

        fn submit(&mut self, slot: &usize) -> VulkanResult<()> {
            let slot = *slot;
            assert!(!self.fence_signaled[slot], "submitting with a signaled fence");
            if self.failing_submits > 0 {
                self.failing_submits -= 1;
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            let submission = self.submissions;
            self.submissions += 1;
            self.fence_owner[slot] = Some(submission);
            self.fence_pending[slot] = true;
            self.acquire_pending[slot] = false;
            self.events.push(Event::Submit { slot, submission });
            Ok(())
        }

        fn present(&mut self, slot: &usize, image_index: u32) -> VulkanResult<Present> {
            self.events.push(Event::Present { slot: *slot, image: image_index });
            if !self.present_results.is_empty() {
                return Ok(self.present_results.remove(0));
            }
            Ok(Present::Done)
        }

        fn abandon(&mut self, slot: &usize) -> VulkanResult<()> {
            let slot = *slot;
            self.fence_signaled[slot] = false;
            self.fence_pending[slot] = true;
            self.fence_owner[slot] = None;
            self.acquire_pending[slot] = false;
            self.events.push(Event::Abandon { slot });
            Ok(())
        }
    }

    fn manager(slots: usize) -> SynchronisationManager<usize> {
        SynchronisationManager::new(FrameSyncArray::new((0..slots).collect()).unwrap())
    }

    #[test]
    fn test_three_frames_cycle_and_wait_on_first_submission() {
        let mut sync = manager(2);
        let mut backend = MockBackend::new(2);
        let mut slots_seen = Vec::new();

        for _ in 0..3 {
            let status = sync
                .draw_frame(&mut backend, |frame| {
                    slots_seen.push(frame.slot);
                    Ok(())
                })
                .unwrap();
            assert_eq!(status, FrameStatus::Presented);
        }

        assert_eq!(slots_seen, vec![0, 1, 0]);
        let waits: Vec<&Event> = backend.events.iter().filter(|e| matches!(e, Event::Wait { .. })).collect();
        assert_eq!(
            waits,
            vec![
                &Event::Wait { slot: 0, signaled_by: None },
                &Event::Wait { slot: 1, signaled_by: None },
                &Event::Wait { slot: 0, signaled_by: Some(0) },
            ]
        );
    }

    #[test]
    fn test_tick_order_resets_fence_just_before_submit() {
        let mut sync = manager(2);
        let mut backend = MockBackend::new(2);
        sync.draw_frame(&mut backend, |_| Ok(())).unwrap();
        assert_eq!(
            backend.events,
            vec![
                Event::Wait { slot: 0, signaled_by: None },
                Event::Acquire { slot: 0 },
                Event::Record { slot: 0, image: 0 },
                Event::Reset { slot: 0 },
                Event::Submit { slot: 0, submission: 0 },
                Event::Present { slot: 0, image: 0 },
            ]
        );
    }

    #[test]
    fn test_out_of_date_acquire_aborts_but_advances() {
        let mut sync = manager(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_results.push(Acquire::OutOfDate);

        let mut recorded = false;
        let status = sync
            .draw_frame(&mut backend, |_| {
                recorded = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(status, FrameStatus::OutOfDate);
        assert!(!recorded);
        assert!(!backend.events.iter().any(|e| matches!(e, Event::Reset { .. } | Event::Submit { .. })));
        assert_eq!(sync.current_slot(), 1);

        // The fence was never reset, so the next use of slot 0 does not block forever.
        sync.draw_frame(&mut backend, |_| Ok(())).unwrap();
        sync.draw_frame(&mut backend, |_| Ok(())).unwrap();
        assert!(backend.fence_owner[0].is_some());
    }

    #[test]
    fn test_present_status_mapping() {
        let mut sync = manager(2);
        let mut backend = MockBackend::new(2);
        backend.present_results = vec![Present::OutOfDate, Present::Suboptimal];
        backend.acquire_results =
            vec![Acquire::Image { index: 0, suboptimal: false }, Acquire::Image { index: 1, suboptimal: false }, Acquire::Image { index: 2, suboptimal: true }];

        assert_eq!(sync.draw_frame(&mut backend, |_| Ok(())).unwrap(), FrameStatus::OutOfDate);
        assert_eq!(sync.draw_frame(&mut backend, |_| Ok(())).unwrap(), FrameStatus::Suboptimal);
        assert_eq!(sync.draw_frame(&mut backend, |_| Ok(())).unwrap(), FrameStatus::Suboptimal);
        assert_eq!(sync.frames().frame_index(), 3);
    }

    #[test]
    fn test_resize_reported_once() {
        let mut sync = manager(2);
        let mut backend = MockBackend::new(2);
        sync.notify_resized();
        assert!(sync.resize_pending());
        assert_eq!(sync.draw_frame(&mut backend, |_| Ok(())).unwrap(), FrameStatus::OutOfDate);
        assert!(!sync.resize_pending());
        assert_eq!(sync.draw_frame(&mut backend, |_| Ok(())).unwrap(), FrameStatus::Presented);
    }

    #[test]
    fn test_record_error_propagates_after_advance() {
        let mut sync = manager(2);
        let mut backend = MockBackend::new(2);
        let result = sync.draw_frame(&mut backend, |_| Err(VulkanError::Unimplemented("recording")));
        assert!(matches!(result, Err(VulkanError::Unimplemented("recording"))));
        assert!(!backend.events.iter().any(|e| matches!(e, Event::Submit { .. })));
        assert_eq!(backend.events.last(), Some(&Event::Abandon { slot: 0 }));
        assert_eq!(sync.current_slot(), 1);
    }

    #[test]
    fn test_slot_reusable_after_record_error() {
        let mut sync = manager(2);
        let mut backend = MockBackend::new(2);
        assert!(sync.draw_frame(&mut backend, |_| Err(VulkanError::Unimplemented("recording"))).is_err());

        // Slot 1, then slot 0 again: its semaphore was consumed and its fence re-armed.
        assert_eq!(sync.draw_frame(&mut backend, |_| Ok(())).unwrap(), FrameStatus::Presented);
        assert_eq!(sync.draw_frame(&mut backend, |_| Ok(())).unwrap(), FrameStatus::Presented);
        assert_eq!(backend.fence_owner[0], Some(1));
        assert!(!backend.acquire_pending.iter().any(|&pending| pending));
    }

    #[test]
    fn test_slot_reusable_after_submit_error() {
        let mut sync = manager(2);
        let mut backend = MockBackend::new(2);
        backend.failing_submits = 1;

        let result = sync.draw_frame(&mut backend, |_| Ok(()));
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))));
        assert!(!backend.events.iter().any(|e| matches!(e, Event::Present { .. })));
        assert_eq!(backend.events.last(), Some(&Event::Abandon { slot: 0 }));

        for _ in 0..3 {
            assert_eq!(sync.draw_frame(&mut backend, |_| Ok(())).unwrap(), FrameStatus::Presented);
        }
        assert_eq!(sync.frames().frame_index(), 4);
    }

    #[test]
    fn test_resize_survives_failed_tick() {
        let mut sync = manager(2);
        let mut backend = MockBackend::new(2);
        sync.notify_resized();
        assert!(sync.draw_frame(&mut backend, |_| Err(VulkanError::Unimplemented("recording"))).is_err());
        assert!(sync.resize_pending());
        assert_eq!(sync.draw_frame(&mut backend, |_| Ok(())).unwrap(), FrameStatus::OutOfDate);
    }

    #[test]
    fn test_status_needs_recreation() {
        assert!(!FrameStatus::Presented.needs_recreation());
        assert!(FrameStatus::Suboptimal.needs_recreation());
        assert!(FrameStatus::OutOfDate.needs_recreation());
    }
}
