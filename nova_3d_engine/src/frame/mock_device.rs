//! Mock GPU device and presentation engine for unit tests (no GPU required)
//!
//! Fences signal only on explicit trigger (or on submit when auto-signal is
//! enabled), letting tests drive the CPU/GPU overlap deterministically. A
//! wait on an untriggered fence cannot actually block a single-threaded
//! test, so it is reported as a timed-out wait (`Error::DeviceLost`) and
//! recorded as a blocked wait.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::renderer::{
    CommandsId, FenceId, FrameDevice, PresentationEngine, SemaphoreId,
};

/// One recorded submission.
#[derive(Debug, Clone, Copy)]
pub struct SubmitRecord {
    pub commands: CommandsId,
    pub wait: SemaphoreId,
    pub signal: SemaphoreId,
    pub fence: FenceId,
}

/// One recorded fence wait.
#[derive(Debug, Clone, Copy)]
pub struct WaitRecord {
    pub fence: FenceId,
    /// True when the fence was unsignaled at wait time (the wait would have
    /// blocked until trigger; reported as a timeout)
    pub blocked: bool,
}

/// Mock FrameDevice that tracks fences, semaphores, waits, and submissions.
pub struct MockGpu {
    fences: RefCell<Vec<bool>>,
    semaphore_count: Cell<u64>,
    submits: RefCell<Vec<SubmitRecord>>,
    waits: RefCell<Vec<WaitRecord>>,
    /// When true, a submission immediately signals its fence (a GPU that
    /// finishes instantly)
    auto_signal: Cell<bool>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self {
            fences: RefCell::new(Vec::new()),
            semaphore_count: Cell::new(0),
            submits: RefCell::new(Vec::new()),
            waits: RefCell::new(Vec::new()),
            auto_signal: Cell::new(false),
        }
    }

    /// A mock whose submissions complete instantly.
    pub fn auto_signaling() -> Self {
        let gpu = Self::new();
        gpu.auto_signal.set(true);
        gpu
    }

    /// Explicitly signal a fence, as the GPU would on completion.
    pub fn trigger(&self, fence: FenceId) {
        self.fences.borrow_mut()[fence.as_raw() as usize] = true;
    }

    /// Whether a fence is currently signaled.
    pub fn is_signaled(&self, fence: FenceId) -> bool {
        self.fences.borrow()[fence.as_raw() as usize]
    }

    /// All recorded submissions, in program order.
    pub fn submits(&self) -> Vec<SubmitRecord> {
        self.submits.borrow().clone()
    }

    /// All recorded fence waits, in call order.
    pub fn waits(&self) -> Vec<WaitRecord> {
        self.waits.borrow().clone()
    }

    /// Number of submissions whose fence has not signaled yet.
    pub fn outstanding_submissions(&self) -> usize {
        let fences = self.fences.borrow();
        self.submits
            .borrow()
            .iter()
            .filter(|s| !fences[s.fence.as_raw() as usize])
            .count()
    }
}

impl FrameDevice for MockGpu {
    fn create_fence(&self, signaled: bool) -> Result<FenceId> {
        let mut fences = self.fences.borrow_mut();
        fences.push(signaled);
        Ok(FenceId::from_raw(fences.len() as u64 - 1))
    }

    fn create_semaphore(&self) -> Result<SemaphoreId> {
        let id = self.semaphore_count.get();
        self.semaphore_count.set(id + 1);
        Ok(SemaphoreId::from_raw(id))
    }

    fn destroy_fence(&self, _fence: FenceId) {}

    fn destroy_semaphore(&self, _semaphore: SemaphoreId) {}

    fn wait_for_fence(&self, fence: FenceId, _timeout: Duration) -> Result<()> {
        let signaled = self.fences.borrow()[fence.as_raw() as usize];
        self.waits.borrow_mut().push(WaitRecord {
            fence,
            blocked: !signaled,
        });
        if signaled {
            Ok(())
        } else {
            Err(Error::DeviceLost(
                "mock fence wait timed out (fence never triggered)".to_string(),
            ))
        }
    }

    fn reset_fence(&self, fence: FenceId) -> Result<()> {
        self.fences.borrow_mut()[fence.as_raw() as usize] = false;
        Ok(())
    }

    fn submit(
        &self,
        commands: CommandsId,
        wait: SemaphoreId,
        signal: SemaphoreId,
        fence: FenceId,
    ) -> Result<()> {
        self.submits.borrow_mut().push(SubmitRecord {
            commands,
            wait,
            signal,
            fence,
        });
        if self.auto_signal.get() {
            self.fences.borrow_mut()[fence.as_raw() as usize] = true;
        }
        Ok(())
    }
}

/// Mock presentation engine with round-robin image acquisition.
pub struct MockPresenter {
    image_count: usize,
    next_image: usize,
    pub acquires: Vec<(u32, SemaphoreId)>,
    pub presents: Vec<(u32, SemaphoreId)>,
    fail_next_acquire: bool,
    fail_next_present: bool,
}

impl MockPresenter {
    pub fn new(image_count: usize) -> Self {
        Self {
            image_count,
            next_image: 0,
            acquires: Vec::new(),
            presents: Vec::new(),
            fail_next_acquire: false,
            fail_next_present: false,
        }
    }

    /// Make the next acquire report a stale surface.
    pub fn invalidate_on_acquire(&mut self) {
        self.fail_next_acquire = true;
    }

    /// Make the next present report a stale surface.
    pub fn invalidate_on_present(&mut self) {
        self.fail_next_present = true;
    }

    /// Change the image count, as a swapchain rebuild would.
    pub fn set_image_count(&mut self, image_count: usize) {
        self.image_count = image_count;
        self.next_image = 0;
    }
}

impl PresentationEngine for MockPresenter {
    fn acquire_image(&mut self, signal: SemaphoreId) -> Result<u32> {
        if self.fail_next_acquire {
            self.fail_next_acquire = false;
            return Err(Error::SurfaceInvalidated);
        }
        let index = self.next_image as u32;
        self.next_image = (self.next_image + 1) % self.image_count;
        self.acquires.push((index, signal));
        Ok(index)
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreId) -> Result<()> {
        self.presents.push((image_index, wait));
        if self.fail_next_present {
            self.fail_next_present = false;
            return Err(Error::SurfaceInvalidated);
        }
        Ok(())
    }

    fn image_count(&self) -> usize {
        self.image_count
    }
}
