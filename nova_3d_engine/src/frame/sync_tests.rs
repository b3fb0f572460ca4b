//! Unit tests for the FrameSynchronizer ring
//!
//! Driven entirely against the mock GPU: fences signal only when triggered,
//! so the tests control exactly when "the GPU finishes" each submission.

use crate::error::Error;
use crate::frame::mock_device::{MockGpu, MockPresenter};
use crate::frame::FrameSynchronizer;
use crate::renderer::CommandsId;

/// Run one full successful cycle and return the frame context.
fn full_cycle(
    sync: &mut FrameSynchronizer,
    gpu: &MockGpu,
    presenter: &mut MockPresenter,
    commands: u64,
) -> crate::frame::FrameContext {
    let frame = sync.begin_frame(gpu, presenter).expect("begin_frame");
    sync.submit(gpu, CommandsId::from_raw(commands)).expect("submit");
    sync.present(presenter).expect("present");
    sync.end_frame().expect("end_frame");
    frame
}

#[test]
fn frame_index_sequence_never_skips_or_repeats() {
    let gpu = MockGpu::auto_signaling();
    let mut presenter = MockPresenter::new(3);
    let mut sync = FrameSynchronizer::new(&gpu, 3, 3).unwrap();

    let mut sequence = Vec::new();
    for i in 0..9 {
        let frame = full_cycle(&mut sync, &gpu, &mut presenter, i);
        sequence.push(frame.frame_index);
    }

    assert_eq!(sequence, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);

    // Every cycle acquired and presented exactly one image, and each
    // submission waited on the semaphore its acquire signaled.
    assert_eq!(presenter.acquires.len(), 9);
    assert_eq!(presenter.presents.len(), 9);
    for (submit, (_, acquire_signal)) in gpu.submits().iter().zip(&presenter.acquires) {
        assert_eq!(submit.wait, *acquire_signal);
    }
}

#[test]
fn fresh_slots_do_not_block_the_first_frames() {
    let gpu = MockGpu::new();
    let mut presenter = MockPresenter::new(2);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 2).unwrap();

    // Slot fences start signaled, so the first use of each slot proceeds
    // without the GPU having done anything.
    full_cycle(&mut sync, &gpu, &mut presenter, 0);
    full_cycle(&mut sync, &gpu, &mut presenter, 1);

    assert!(gpu.waits().iter().all(|w| !w.blocked));
}

#[test]
fn begin_frame_blocks_until_previous_slot_use_completes() {
    let gpu = MockGpu::new();
    let mut presenter = MockPresenter::new(2);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 2).unwrap();
    let slot0_fence = sync.slots()[0].fence();

    full_cycle(&mut sync, &gpu, &mut presenter, 0);
    full_cycle(&mut sync, &gpu, &mut presenter, 1);

    // Slot 0's fence was reset at submission and never triggered: reusing
    // the slot must block (reported as a timed-out wait by the mock).
    let err = sync.begin_frame(&gpu, &mut presenter).unwrap_err();
    assert!(matches!(err, Error::DeviceLost(_)));
    let last_wait = *gpu.waits().last().unwrap();
    assert_eq!(last_wait.fence, slot0_fence);
    assert!(last_wait.blocked);

    // Once the GPU reports completion, the slot becomes reusable.
    gpu.trigger(slot0_fence);
    sync.begin_frame(&gpu, &mut presenter).expect("begin after trigger");
}

#[test]
fn at_most_n_command_sequences_outstanding() {
    let gpu = MockGpu::new();
    let mut presenter = MockPresenter::new(3);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 3).unwrap();

    full_cycle(&mut sync, &gpu, &mut presenter, 0);
    full_cycle(&mut sync, &gpu, &mut presenter, 1);
    assert_eq!(gpu.outstanding_submissions(), 2);

    // A third frame cannot start while both slot fences are unsignaled, so
    // no more than N submissions are ever unfenced.
    assert!(sync.begin_frame(&gpu, &mut presenter).is_err());
    assert_eq!(gpu.outstanding_submissions(), 2);
}

#[test]
fn image_owners_signaled_before_reacquisition_over_ten_cycles() {
    // N = 2 frame slots over 5 presentable images; the GPU completes every
    // submission instantly.
    let gpu = MockGpu::auto_signaling();
    let mut presenter = MockPresenter::new(5);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 5).unwrap();

    for i in 0..10 {
        full_cycle(&mut sync, &gpu, &mut presenter, i);
    }

    // Every image was rendered to and has a recorded owner, and no wait in
    // the whole run found an unsignaled fence.
    for image in 0..5 {
        let owner = sync.image_owner(image).expect("image should have an owner");
        assert!(gpu.is_signaled(owner));
    }
    assert!(gpu.waits().iter().all(|w| !w.blocked));
}

#[test]
fn begin_frame_blocks_when_image_owned_by_unsignaled_fence() {
    // N = 2 over 5 images. Trigger each slot's fence just before its reuse:
    // the slot wait always passes, but at cycle 5 image 0 is reacquired
    // while still owned by slot 0's fence, which cycle 4 reset and the GPU
    // has not signaled again.
    let gpu = MockGpu::new();
    let mut presenter = MockPresenter::new(5);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 5).unwrap();
    let fences = [sync.slots()[0].fence(), sync.slots()[1].fence()];

    for i in 0..5u64 {
        gpu.trigger(fences[(i % 2) as usize]);
        full_cycle(&mut sync, &gpu, &mut presenter, i);
    }

    gpu.trigger(fences[1]);
    let err = sync.begin_frame(&gpu, &mut presenter).unwrap_err();
    assert!(matches!(err, Error::DeviceLost(_)));

    // The blocked wait was on the image's owning fence (slot 0's), not on
    // the current slot's own fence.
    let last_wait = *gpu.waits().last().unwrap();
    assert_eq!(last_wait.fence, fences[0]);
    assert!(last_wait.blocked);

    // Triggering the owner unblocks the ring.
    gpu.trigger(fences[0]);
    sync.begin_frame(&gpu, &mut presenter).expect("begin after trigger");
}

#[test]
fn rebuild_image_table_clears_ownership() {
    let gpu = MockGpu::auto_signaling();
    let mut presenter = MockPresenter::new(3);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 3).unwrap();

    for i in 0..3 {
        full_cycle(&mut sync, &gpu, &mut presenter, i);
    }
    assert!(sync.image_owner(0).is_some());

    // A rebuild may change the presentable-image count; no new image is
    // guarded by any fence yet.
    presenter.set_image_count(4);
    sync.rebuild_image_table(4);
    for image in 0..4 {
        assert!(sync.image_owner(image).is_none());
    }

    full_cycle(&mut sync, &gpu, &mut presenter, 99);
}

#[test]
fn out_of_order_calls_are_configuration_errors() {
    let gpu = MockGpu::auto_signaling();
    let mut presenter = MockPresenter::new(2);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 2).unwrap();

    assert!(matches!(
        sync.submit(&gpu, CommandsId::from_raw(0)),
        Err(Error::ConfigurationError(_))
    ));
    assert!(matches!(
        sync.present(&mut presenter),
        Err(Error::ConfigurationError(_))
    ));
    assert!(matches!(sync.end_frame(), Err(Error::ConfigurationError(_))));

    sync.begin_frame(&gpu, &mut presenter).unwrap();
    assert!(matches!(
        sync.begin_frame(&gpu, &mut presenter),
        Err(Error::ConfigurationError(_))
    ));
}

#[test]
fn present_invalidation_still_completes_the_cycle() {
    let gpu = MockGpu::auto_signaling();
    let mut presenter = MockPresenter::new(2);
    let mut sync = FrameSynchronizer::new(&gpu, 2, 2).unwrap();

    sync.begin_frame(&gpu, &mut presenter).unwrap();
    sync.submit(&gpu, CommandsId::from_raw(0)).unwrap();
    presenter.invalidate_on_present();
    assert!(matches!(
        sync.present(&mut presenter),
        Err(Error::SurfaceInvalidated)
    ));

    // The submitted work was consumed, so the slot still advances.
    sync.end_frame().expect("end_frame after invalidated present");
    assert_eq!(sync.current_frame(), 1);
}

#[test]
fn zero_frames_in_flight_is_rejected() {
    let gpu = MockGpu::new();
    assert!(matches!(
        FrameSynchronizer::new(&gpu, 0, 2),
        Err(Error::ConfigurationError(_))
    ));
}
