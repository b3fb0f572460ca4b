//! Unit tests for the error taxonomy

use crate::error::Error;

#[test]
fn only_surface_invalidation_is_recoverable() {
    assert!(Error::SurfaceInvalidated.is_recoverable());

    let fatal = [
        Error::ConfigurationError("bad".to_string()),
        Error::OutOfDeviceMemory {
            what: "depth image".to_string(),
        },
        Error::DescriptorCapacityExceeded {
            category: "frame".to_string(),
            requested: 5,
            available: 4,
        },
        Error::DeviceLost("fence wait timed out".to_string()),
        Error::BackendError("oops".to_string()),
        Error::InitializationFailed("no device".to_string()),
    ];
    for error in fatal {
        assert!(!error.is_recoverable(), "{} should be fatal", error);
    }
}

#[test]
fn display_includes_context() {
    let error = Error::DescriptorCapacityExceeded {
        category: "material".to_string(),
        requested: 5,
        available: 4,
    };
    let text = error.to_string();
    assert!(text.contains("material"));
    assert!(text.contains('5'));
    assert!(text.contains('4'));

    let error = Error::OutOfDeviceMemory {
        what: "vertex buffer".to_string(),
    };
    assert!(error.to_string().contains("vertex buffer"));

    let error = Error::DeviceLost("queue submit failed".to_string());
    assert!(error.to_string().contains("Device lost"));
}

#[test]
fn errors_implement_std_error() {
    fn assert_error<E: std::error::Error>(_e: &E) {}
    assert_error(&Error::SurfaceInvalidated);
}
