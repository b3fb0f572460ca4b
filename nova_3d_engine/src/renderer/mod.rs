//! Device and presentation trait seam
//!
//! Backends implement these traits; the frame module drives them. Test
//! doubles implement the same traits so the synchronization logic is
//! exercised without a GPU.

mod device;
mod presenter;
mod binding;

pub use device::{CommandsId, FenceId, FrameDevice, SemaphoreId, GPU_WAIT_TIMEOUT};
pub use presenter::PresentationEngine;
pub use binding::{BindingSlot, CategoryDesc, ResourceKind, ShaderStageFlags};
