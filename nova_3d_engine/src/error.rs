//! Error types for the Nova3D engine
//!
//! This module defines the error taxonomy used throughout the engine. The
//! kinds split into one recoverable condition (`SurfaceInvalidated`, handled
//! by the frame-cycle policy) and fatal conditions that are propagated to
//! the caller with context attached.

use std::fmt;

/// Result type for Nova3D engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Nova3D engine errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Invalid configuration or API misuse (pool capacity, binding layout
    /// mismatch, out-of-order frame calls). Fatal at construction time.
    ConfigurationError(String),

    /// Device memory allocation failed. Fatal to the operation that
    /// requested the resource; retrying without freeing cannot succeed.
    OutOfDeviceMemory {
        /// Which resource the allocation was for
        what: String,
    },

    /// A descriptor category's pool has too little remaining capacity.
    /// No sets are allocated when this is returned.
    DescriptorCapacityExceeded {
        /// Category name
        category: String,
        /// Number of sets requested
        requested: u32,
        /// Number of sets still available in the pool
        available: u32,
    },

    /// The presentation surface is stale (out-of-date or suboptimal).
    /// Recoverable: rebuild swapchain-dependent resources and retry.
    SurfaceInvalidated,

    /// A GPU wait exceeded its bound or a submission failed outright.
    /// The GPU state is no longer trustworthy; fatal to the process.
    DeviceLost(String),

    /// Backend-specific error
    BackendError(String),

    /// Initialization failed (missing driver, no capable device, ...)
    InitializationFailed(String),
}

impl Error {
    /// Whether the frame-cycle policy may recover from this error locally.
    ///
    /// Only `SurfaceInvalidated` is recoverable; every other kind must be
    /// propagated.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::SurfaceInvalidated)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            Error::OutOfDeviceMemory { what } => {
                write!(f, "Out of device memory while allocating {}", what)
            }
            Error::DescriptorCapacityExceeded {
                category,
                requested,
                available,
            } => write!(
                f,
                "Descriptor pool capacity exceeded for category '{}': requested {}, available {}",
                category, requested, available
            ),
            Error::SurfaceInvalidated => write!(f, "Presentation surface invalidated"),
            Error::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
