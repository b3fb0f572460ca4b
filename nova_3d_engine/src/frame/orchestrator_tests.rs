//! Unit tests for the frame-cycle policy

use crate::error::{Error, Result};
use crate::frame::mock_device::{MockGpu, MockPresenter};
use crate::frame::{run_frame, FrameContext, FrameOutcome, FrameRecorder, FrameSynchronizer};
use crate::renderer::CommandsId;

/// Recorder that counts calls and can change the image count on rebuild.
struct MockRecorder {
    presenter: MockPresenter,
    recorded: Vec<(usize, u32)>,
    rebuilds: usize,
    rebuild_image_count: Option<usize>,
    fail_record: bool,
    next_commands: u64,
}

impl MockRecorder {
    fn new(image_count: usize) -> Self {
        Self {
            presenter: MockPresenter::new(image_count),
            recorded: Vec::new(),
            rebuilds: 0,
            rebuild_image_count: None,
            fail_record: false,
            next_commands: 0,
        }
    }
}

impl FrameRecorder for MockRecorder {
    type Presenter = MockPresenter;

    fn presenter(&mut self) -> &mut MockPresenter {
        &mut self.presenter
    }

    fn record_frame(&mut self, frame: &FrameContext) -> Result<CommandsId> {
        if self.fail_record {
            return Err(Error::BackendError("record failed".to_string()));
        }
        self.recorded.push((frame.frame_index, frame.image_index));
        let id = CommandsId::from_raw(self.next_commands);
        self.next_commands += 1;
        Ok(id)
    }

    fn rebuild_surface_resources(&mut self) -> Result<()> {
        self.rebuilds += 1;
        if let Some(count) = self.rebuild_image_count.take() {
            self.presenter.set_image_count(count);
        }
        Ok(())
    }
}

#[test]
fn successful_cycles_render_and_advance() {
    let gpu = MockGpu::auto_signaling();
    let mut recorder = MockRecorder::new(3);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 3).unwrap();

    for _ in 0..4 {
        let outcome = run_frame(&mut sync, &gpu, &mut recorder).unwrap();
        assert_eq!(outcome, FrameOutcome::Rendered);
    }

    assert_eq!(recorder.recorded.len(), 4);
    assert_eq!(recorder.rebuilds, 0);
    assert_eq!(
        recorder.recorded.iter().map(|(f, _)| *f).collect::<Vec<_>>(),
        vec![0, 1, 0, 1]
    );
}

#[test]
fn present_invalidation_rebuilds_exactly_once() {
    let gpu = MockGpu::auto_signaling();
    let mut recorder = MockRecorder::new(3);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 3).unwrap();

    recorder.presenter.invalidate_on_present();
    let outcome = run_frame(&mut sync, &gpu, &mut recorder).unwrap();
    assert_eq!(outcome, FrameOutcome::SurfaceRebuilt);
    assert_eq!(recorder.rebuilds, 1);

    // The next cycle begins successfully without any further rebuild.
    let outcome = run_frame(&mut sync, &gpu, &mut recorder).unwrap();
    assert_eq!(outcome, FrameOutcome::Rendered);
    assert_eq!(recorder.rebuilds, 1);
}

#[test]
fn acquire_invalidation_rebuilds_without_recording() {
    let gpu = MockGpu::auto_signaling();
    let mut recorder = MockRecorder::new(3);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 3).unwrap();

    recorder.presenter.invalidate_on_acquire();
    let outcome = run_frame(&mut sync, &gpu, &mut recorder).unwrap();
    assert_eq!(outcome, FrameOutcome::SurfaceRebuilt);
    assert_eq!(recorder.rebuilds, 1);
    assert!(recorder.recorded.is_empty());
    assert!(gpu.submits().is_empty());
}

#[test]
fn rebuild_resizes_the_image_ownership_table() {
    let gpu = MockGpu::auto_signaling();
    let mut recorder = MockRecorder::new(3);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 3).unwrap();

    run_frame(&mut sync, &gpu, &mut recorder).unwrap();

    // The rebuilt swapchain comes back with a different image count.
    recorder.rebuild_image_count = Some(5);
    recorder.presenter.invalidate_on_present();
    assert_eq!(
        run_frame(&mut sync, &gpu, &mut recorder).unwrap(),
        FrameOutcome::SurfaceRebuilt
    );

    // Ten more cycles over the five new images work unchanged.
    for _ in 0..10 {
        assert_eq!(
            run_frame(&mut sync, &gpu, &mut recorder).unwrap(),
            FrameOutcome::Rendered
        );
    }
}

#[test]
fn record_errors_propagate_without_submitting() {
    let gpu = MockGpu::auto_signaling();
    let mut recorder = MockRecorder::new(2);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 2).unwrap();

    recorder.fail_record = true;
    assert!(run_frame(&mut sync, &gpu, &mut recorder).is_err());
    assert!(gpu.submits().is_empty());
}
