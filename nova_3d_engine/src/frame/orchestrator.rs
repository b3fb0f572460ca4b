//! Per-frame orchestration policy
//!
//! [`run_frame`] composes the synchronizer, the device, and a backend's
//! [`FrameRecorder`] into one frame cycle. Surface invalidation is the only
//! error handled here: the recorder rebuilds its swapchain-dependent
//! resources once, the image-ownership table is resized, and the cycle
//! reports [`FrameOutcome::SurfaceRebuilt`] instead of drawing.

use crate::engine_debug;
use crate::error::{Error, Result};
use crate::frame::{FrameContext, FrameSynchronizer};
use crate::renderer::{CommandsId, FrameDevice, PresentationEngine};

/// What a frame cycle produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was recorded, submitted, and queued for presentation.
    Rendered,
    /// The surface was invalidated; swapchain-dependent resources were
    /// rebuilt and no frame was drawn this cycle.
    SurfaceRebuilt,
}

/// Backend hooks driven by [`run_frame`].
///
/// Implementations own the presentation engine and every swapchain-dependent
/// resource, so both the happy path and the rebuild path go through the same
/// object.
pub trait FrameRecorder {
    /// Concrete presentation engine owned by this recorder.
    type Presenter: PresentationEngine;

    /// Access the presentation engine for acquire/present calls.
    fn presenter(&mut self) -> &mut Self::Presenter;

    /// Record the draw command sequence for the acquired image.
    ///
    /// Runs strictly between image acquisition and submission. Everything
    /// the returned sequence references must stay valid until the frame
    /// slot's fence signals; per-slot ownership of transient resources
    /// (uniform buffers, frame-scoped descriptor sets) enforces this.
    fn record_frame(&mut self, frame: &FrameContext) -> Result<CommandsId>;

    /// Rebuild swapchain-dependent resources (swapchain, depth target,
    /// framebuffers) after the surface was invalidated.
    fn rebuild_surface_resources(&mut self) -> Result<()>;
}

/// Drive one frame cycle: begin → record → submit → present → end.
///
/// `Error::SurfaceInvalidated` from acquisition or presentation is caught
/// here, exactly once per cycle; every other error propagates.
pub fn run_frame<D, R>(
    sync: &mut FrameSynchronizer,
    device: &D,
    recorder: &mut R,
) -> Result<FrameOutcome>
where
    D: FrameDevice,
    R: FrameRecorder,
{
    let frame = match sync.begin_frame(device, recorder.presenter()) {
        Ok(frame) => frame,
        Err(Error::SurfaceInvalidated) => {
            rebuild(sync, recorder)?;
            return Ok(FrameOutcome::SurfaceRebuilt);
        }
        Err(e) => return Err(e),
    };

    let commands = recorder.record_frame(&frame)?;
    sync.submit(device, commands)?;

    match sync.present(recorder.presenter()) {
        Ok(()) => {
            sync.end_frame()?;
            Ok(FrameOutcome::Rendered)
        }
        Err(Error::SurfaceInvalidated) => {
            // The submitted work was consumed; complete the cycle before
            // rebuilding so the ring keeps advancing.
            sync.end_frame()?;
            rebuild(sync, recorder)?;
            Ok(FrameOutcome::SurfaceRebuilt)
        }
        Err(e) => Err(e),
    }
}

fn rebuild<R: FrameRecorder>(sync: &mut FrameSynchronizer, recorder: &mut R) -> Result<()> {
    recorder.rebuild_surface_resources()?;
    let image_count = recorder.presenter().image_count();
    sync.rebuild_image_table(image_count);
    engine_debug!(
        "nova3d::frame",
        "surface resources rebuilt ({} presentable images)",
        image_count
    );
    Ok(())
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
