use super::*;

#[test]
fn display_messages() {
    assert_eq!(
        RhiError::NoBackend.to_string(),
        "No supported GPU backend available"
    );
    assert_eq!(
        RhiError::AdapterNotFound.to_string(),
        "No adapter satisfies the minimum feature level"
    );
    assert_eq!(RhiError::OutOfMemory.to_string(), "Out of GPU memory");
    assert_eq!(RhiError::DeviceLost.to_string(), "GPU device lost");
    assert_eq!(
        RhiError::InvalidDescriptor("bad size".into()).to_string(),
        "Invalid descriptor: bad size"
    );
    assert_eq!(
        RhiError::ValidationError("layer message".into()).to_string(),
        "Validation error: layer message"
    );
    assert_eq!(
        RhiError::BackendError("vkCreateDevice failed".into()).to_string(),
        "Backend error: vkCreateDevice failed"
    );
}

#[test]
fn rhi_err_macro_builds_backend_error() {
    let err = crate::rhi_err!("Failed to create fence: {}", 42);
    assert_eq!(err, RhiError::BackendError("Failed to create fence: 42".into()));
}

#[test]
fn errors_are_comparable() {
    assert_eq!(RhiError::DeviceLost, RhiError::DeviceLost);
    assert_ne!(RhiError::DeviceLost, RhiError::OutOfMemory);
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&RhiError::NoBackend);
}
