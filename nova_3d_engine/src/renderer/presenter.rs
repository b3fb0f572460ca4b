//! PresentationEngine - boundary to the swapchain/presentation collaborator

use crate::error::Result;
use crate::renderer::SemaphoreId;

/// Image acquisition and presentation operations.
///
/// Implemented by the Vulkan swapchain and by the mock presenter in tests.
/// The number of presentable images is independent of the in-flight frame
/// count and may change across [`SurfaceInvalidated`] rebuilds.
///
/// [`SurfaceInvalidated`]: crate::nova3d::Error::SurfaceInvalidated
pub trait PresentationEngine {
    /// Acquire the next presentable image, arranging for `signal` to be
    /// signaled once the presentation engine hands the image over.
    ///
    /// Returns the image index, or `Error::SurfaceInvalidated` when the
    /// surface is stale and swapchain-dependent resources must be rebuilt.
    fn acquire_image(&mut self, signal: SemaphoreId) -> Result<u32>;

    /// Queue presentation of `image_index`, waiting on `wait` (the
    /// render-finished signal) before the image is shown.
    ///
    /// Returns `Error::SurfaceInvalidated` on an out-of-date or suboptimal
    /// result; the submitted rendering work is still consumed either way.
    fn present(&mut self, image_index: u32, wait: SemaphoreId) -> Result<()>;

    /// Number of presentable images currently owned by the presentation
    /// engine.
    fn image_count(&self) -> usize;
}
