//! Error types for the Astral RHI
//!
//! Creation functions return `RhiResult`; a caller that receives an `Err`
//! must not bind the resource it asked for. Backends log the cause before
//! returning, so hosts can decide between log-and-exit (`NoBackend`,
//! `AdapterNotFound`), log-and-continue, or device recreate (`DeviceLost`).

use std::fmt;

/// Result type for RHI operations
pub type RhiResult<T> = Result<T, RhiError>;

/// RHI errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RhiError {
    /// No supported GPU backend is available on this machine
    NoBackend,

    /// No physical device satisfies the backend's minimum feature level
    /// (feature level 12.0 for the D3D12 backend, Vulkan 1.2 for Vulkan)
    AdapterNotFound,

    /// The allocator refused a resource creation
    OutOfMemory,

    /// A caller-provided descriptor violates a documented invariant
    /// (e.g. storage usage on a depth format)
    InvalidDescriptor(String),

    /// Device reset detected on Present or Submit
    DeviceLost,

    /// The backend's debug layer reported an error
    ValidationError(String),

    /// Backend-specific failure not covered by the variants above
    BackendError(String),
}

impl fmt::Display for RhiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RhiError::NoBackend => write!(f, "No supported GPU backend available"),
            RhiError::AdapterNotFound => write!(f, "No adapter satisfies the minimum feature level"),
            RhiError::OutOfMemory => write!(f, "Out of GPU memory"),
            RhiError::InvalidDescriptor(msg) => write!(f, "Invalid descriptor: {}", msg),
            RhiError::DeviceLost => write!(f, "GPU device lost"),
            RhiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            RhiError::BackendError(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for RhiError {}

/// Build a `RhiError::BackendError` from a format string
///
/// # Example
///
/// ```ignore
/// return Err(rhi_err!("Failed to create fence: {:?}", e));
/// ```
#[macro_export]
macro_rules! rhi_err {
    ($($arg:tt)*) => {
        $crate::RhiError::BackendError(format!($($arg)*))
    };
}

/// Log an error and return early with a `RhiError::BackendError`
#[macro_export]
macro_rules! rhi_bail {
    ($source:expr, $($arg:tt)*) => {{
        $crate::rhi_error!($source, $($arg)*);
        return Err($crate::RhiError::BackendError(format!($($arg)*)));
    }};
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
