/*!
# Nova 3D Engine

Core types and traits for the Nova3D rendering engine.

This crate holds everything that does not depend on a concrete graphics
backend: the error taxonomy, the logging system, renderer configuration,
GPU-visible data types, the device/presentation trait seam, and the
frame-synchronization state machine that drives the N-frames-in-flight
record → submit → present → reuse cycle.

Backend implementations (see `nova_3d_engine_renderer_vulkan`) provide the
concrete device, allocator, and presentation types behind the trait seam.

## Architecture

- **FrameDevice / PresentationEngine**: the boundary to the GPU and the
  presentation engine, implemented by backends and by test doubles
- **FrameSynchronizer**: the fixed ring of per-frame fences and semaphores
  plus the image-ownership cross-check
- **FrameRecorder / run_frame**: the per-frame orchestration policy shared
  by every backend, including surface-invalidation recovery
*/

// Internal modules
mod error;
pub mod log;
pub mod config;
pub mod types;
pub mod renderer;
pub mod frame;

// Main nova3d namespace module
pub mod nova3d {
    // Error types
    pub use crate::error::{Error, Result};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
        // Note: engine_* macros are NOT re-exported here - they are exported at the crate root
    }

    // Render sub-module with the device/presentation seam and binding types
    pub mod render {
        pub use crate::renderer::*;
        pub use crate::config::*;
        pub use crate::types::*;
    }

    // Frame sub-module with the synchronization ring and orchestration policy
    pub mod frame {
        pub use crate::frame::*;
    }
}

// Re-export math library at crate root
pub use glam;
