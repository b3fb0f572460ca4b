//! FrameDevice - synchronization and submission boundary to the GPU

use std::time::Duration;

use crate::error::Result;

/// Upper bound on any single GPU wait (fence waits, one-shot transfer
/// completion). A wait that exceeds this bound is treated as device loss,
/// not as a retryable condition.
pub const GPU_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opaque fence handle issued by a [`FrameDevice`].
///
/// A fence is a GPU-to-CPU signal the CPU can block-wait on, indicating
/// prior GPU work has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceId(u64);

impl FenceId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Opaque semaphore handle issued by a [`FrameDevice`].
///
/// Semaphores order work on the GPU timeline (image-available before
/// rendering, render-finished before presentation); the CPU never waits on
/// them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId(u64);

impl SemaphoreId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Opaque handle to one recorded command sequence, ready for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandsId(u64);

impl CommandsId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Synchronization and submission operations of the device context.
///
/// Implemented by the Vulkan backend over `vkFence`/`vkSemaphore`/
/// `vkQueueSubmit`, and by the mock device in tests. All handles are only
/// meaningful to the device that issued them.
pub trait FrameDevice {
    /// Create a fence, optionally already in the signaled state.
    fn create_fence(&self, signaled: bool) -> Result<FenceId>;

    /// Create a semaphore in the unsignaled state.
    fn create_semaphore(&self) -> Result<SemaphoreId>;

    /// Destroy a fence. The fence must not be in flight.
    fn destroy_fence(&self, fence: FenceId);

    /// Destroy a semaphore. The semaphore must not be in flight.
    fn destroy_semaphore(&self, semaphore: SemaphoreId);

    /// Block the calling thread until `fence` signals.
    ///
    /// Returns `Error::DeviceLost` if the wait exceeds `timeout`; the GPU
    /// state is no longer trustworthy at that point and the caller must not
    /// retry.
    fn wait_for_fence(&self, fence: FenceId, timeout: Duration) -> Result<()>;

    /// Return `fence` to the unsignaled state.
    fn reset_fence(&self, fence: FenceId) -> Result<()>;

    /// Submit a recorded command sequence to the device queue.
    ///
    /// Execution waits for `wait` before rasterizing, signals `signal` when
    /// rendering completes, and signals `fence` when the whole submission
    /// has been consumed by the GPU. Submission order across calls is
    /// program order.
    fn submit(
        &self,
        commands: CommandsId,
        wait: SemaphoreId,
        signal: SemaphoreId,
        fence: FenceId,
    ) -> Result<()>;
}
