//! Frame synchronization and orchestration
//!
//! The N-frames-in-flight ring: [`FrameSynchronizer`] owns the per-frame
//! fences and semaphores and the image-ownership cross-check; [`run_frame`]
//! is the per-frame policy (begin → record → submit → present → end with
//! surface-invalidation recovery) shared by every backend.

mod sync;
mod orchestrator;

pub use sync::{FrameContext, FrameSlot, FrameSynchronizer};
pub use orchestrator::{run_frame, FrameOutcome, FrameRecorder};

#[cfg(test)]
pub(crate) mod mock_device;
