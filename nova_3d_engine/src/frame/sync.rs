//! FrameSynchronizer - the fixed ring of per-frame synchronization primitives
//!
//! Each frame slot cycles through `Idle → ImageAcquired → Submitted →
//! Presented → Idle`; the fence wait inside `begin_frame` is the transient
//! waiting phase. The single CPU thread drives one slot at a time, so the
//! synchronizer tracks one active phase rather than one per slot.

use crate::error::{Error, Result};
use crate::renderer::{
    CommandsId, FenceId, FrameDevice, PresentationEngine, SemaphoreId, GPU_WAIT_TIMEOUT,
};
use crate::{engine_debug, engine_trace};

/// Synchronization primitives for one in-flight frame slot.
///
/// Created once at startup, reused every N frames, destroyed only at
/// shutdown.
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    /// Signaled when the GPU has consumed this slot's last submission
    fence: FenceId,
    /// Signaled by the presentation engine when the acquired image is ready
    image_available: SemaphoreId,
    /// Signaled by the GPU when this slot's rendering completes
    render_finished: SemaphoreId,
}

impl FrameSlot {
    /// The slot's completion fence.
    pub fn fence(&self) -> FenceId {
        self.fence
    }

    /// The slot's image-available semaphore.
    pub fn image_available(&self) -> SemaphoreId {
        self.image_available
    }

    /// The slot's render-finished semaphore.
    pub fn render_finished(&self) -> SemaphoreId {
        self.render_finished
    }
}

/// CPU-side progress of the frame currently being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotPhase {
    Idle,
    ImageAcquired,
    Submitted,
    Presented,
}

/// Per-frame context handed out by [`FrameSynchronizer::begin_frame`].
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// Index of the frame slot whose resources the CPU may now touch
    pub frame_index: usize,
    /// Index of the acquired presentable image
    pub image_index: u32,
}

/// The fixed-size ring of per-frame synchronization primitives and the
/// current frame index.
///
/// Guarantees, for any in-flight count N >= 1:
/// - a slot's CPU-side resources are never touched again until its fence
///   has signaled;
/// - at most N command sequences are outstanding (unfenced) at any instant;
/// - two frame slots never write the same presentable image concurrently,
///   even when the presentable-image count differs from N (tracked through
///   the per-image owning-fence table).
pub struct FrameSynchronizer {
    slots: Vec<FrameSlot>,
    /// Which slot fence currently guards each presentable image. `None`
    /// until an image has been rendered to at least once.
    image_owners: Vec<Option<FenceId>>,
    current_frame: usize,
    acquired_image: Option<u32>,
    phase: SlotPhase,
}

impl FrameSynchronizer {
    /// Create the ring with `frames_in_flight` slots over `image_count`
    /// presentable images.
    ///
    /// Slot fences start signaled so the first use of each slot does not
    /// block.
    pub fn new(
        device: &impl FrameDevice,
        frames_in_flight: usize,
        image_count: usize,
    ) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(Error::ConfigurationError(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            slots.push(FrameSlot {
                fence: device.create_fence(true)?,
                image_available: device.create_semaphore()?,
                render_finished: device.create_semaphore()?,
            });
        }

        engine_debug!(
            "nova3d::frame",
            "Created {} frame slots over {} presentable images",
            frames_in_flight,
            image_count
        );

        Ok(Self {
            slots,
            image_owners: vec![None; image_count],
            current_frame: 0,
            acquired_image: None,
            phase: SlotPhase::Idle,
        })
    }

    /// Number of frame slots in the ring.
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot the next `begin_frame` will use.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// The slot the next `begin_frame` will use.
    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current_frame]
    }

    /// All frame slots, in ring order.
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// The fence currently guarding a presentable image, if any.
    pub fn image_owner(&self, image_index: u32) -> Option<FenceId> {
        self.image_owners
            .get(image_index as usize)
            .copied()
            .flatten()
    }

    /// Wait for the current slot to become reusable and acquire the next
    /// presentable image.
    ///
    /// Blocks (bounded) on the slot's fence so the GPU has finished the
    /// previous use of this slot's resources, then on the acquired image's
    /// owning fence, which may belong to a different slot when the image
    /// count differs from N. `Error::SurfaceInvalidated` means the caller
    /// must rebuild swapchain-dependent resources before retrying.
    pub fn begin_frame(
        &mut self,
        device: &impl FrameDevice,
        presenter: &mut impl PresentationEngine,
    ) -> Result<FrameContext> {
        if self.phase != SlotPhase::Idle {
            return Err(Error::ConfigurationError(format!(
                "begin_frame called while frame {} is in phase {:?}",
                self.current_frame, self.phase
            )));
        }

        let slot = self.slots[self.current_frame];

        // The GPU must be done with this slot's previous submission before
        // the CPU touches any of the slot's resources again.
        device
            .wait_for_fence(slot.fence, GPU_WAIT_TIMEOUT)
            .map_err(|e| Self::attach_frame_index(e, self.current_frame))?;

        let image_index = presenter.acquire_image(slot.image_available)?;

        if image_index as usize >= self.image_owners.len() {
            return Err(Error::BackendError(format!(
                "acquired image index {} out of range (image count {})",
                image_index,
                self.image_owners.len()
            )));
        }

        // A submission from another slot may still be rendering to this
        // image; its fence is the image's recorded owner.
        if let Some(owner) = self.image_owners[image_index as usize] {
            device
                .wait_for_fence(owner, GPU_WAIT_TIMEOUT)
                .map_err(|e| Self::attach_frame_index(e, self.current_frame))?;
        }
        self.image_owners[image_index as usize] = Some(slot.fence);

        engine_trace!(
            "nova3d::frame",
            "frame {} acquired image {}",
            self.current_frame,
            image_index
        );

        self.acquired_image = Some(image_index);
        self.phase = SlotPhase::ImageAcquired;
        Ok(FrameContext {
            frame_index: self.current_frame,
            image_index,
        })
    }

    /// Submit the recorded command sequence for the current frame.
    ///
    /// The slot's fence is reset immediately before submission; resetting
    /// any earlier would drop the guard on the previous submission.
    pub fn submit(&mut self, device: &impl FrameDevice, commands: CommandsId) -> Result<()> {
        if self.phase != SlotPhase::ImageAcquired {
            return Err(Error::ConfigurationError(format!(
                "submit called in phase {:?} (expected ImageAcquired)",
                self.phase
            )));
        }

        let slot = self.slots[self.current_frame];
        device.reset_fence(slot.fence)?;
        device.submit(
            commands,
            slot.image_available,
            slot.render_finished,
            slot.fence,
        )?;

        self.phase = SlotPhase::Submitted;
        Ok(())
    }

    /// Request presentation of the acquired image.
    ///
    /// A stale surface surfaces as `Error::SurfaceInvalidated`; the
    /// submitted rendering work was consumed either way, so the slot still
    /// advances to the presented phase.
    pub fn present(&mut self, presenter: &mut impl PresentationEngine) -> Result<()> {
        if self.phase != SlotPhase::Submitted {
            return Err(Error::ConfigurationError(format!(
                "present called in phase {:?} (expected Submitted)",
                self.phase
            )));
        }

        let image_index = self.acquired_image.ok_or_else(|| {
            Error::ConfigurationError("present called with no acquired image".to_string())
        })?;
        let slot = self.slots[self.current_frame];

        self.phase = SlotPhase::Presented;
        presenter.present(image_index, slot.render_finished)
    }

    /// Advance the frame index modulo N and return the slot to idle.
    pub fn end_frame(&mut self) -> Result<()> {
        if self.phase != SlotPhase::Presented {
            return Err(Error::ConfigurationError(format!(
                "end_frame called in phase {:?} (expected Presented)",
                self.phase
            )));
        }

        self.acquired_image = None;
        self.phase = SlotPhase::Idle;
        self.current_frame = (self.current_frame + 1) % self.slots.len();
        Ok(())
    }

    /// Reset the image-ownership table after swapchain-dependent resources
    /// were rebuilt.
    ///
    /// The presentable-image count may have changed, and none of the new
    /// images are guarded by any fence yet.
    pub fn rebuild_image_table(&mut self, image_count: usize) {
        self.image_owners = vec![None; image_count];
        self.acquired_image = None;
        self.phase = SlotPhase::Idle;
    }

    /// Destroy all slot primitives. Call only at shutdown, after the device
    /// has gone idle.
    pub fn destroy(&mut self, device: &impl FrameDevice) {
        for slot in self.slots.drain(..) {
            device.destroy_fence(slot.fence);
            device.destroy_semaphore(slot.image_available);
            device.destroy_semaphore(slot.render_finished);
        }
        self.image_owners.clear();
    }

    fn attach_frame_index(error: Error, frame_index: usize) -> Error {
        match error {
            Error::DeviceLost(msg) => {
                Error::DeviceLost(format!("{} (frame slot {})", msg, frame_index))
            }
            other => other,
        }
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
