//! Error types for Galaxy RHI
//!
//! Every fallible operation of the core and of the backends returns
//! [`Result`]. Protocol violations (recording outside `begin`/`end`,
//! double `begin`, ...) surface as [`Error::InvalidState`] after being logged.

use std::fmt;

/// Result type for RHI operations
pub type Result<T> = std::result::Result<T, Error>;

/// RHI errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Backend-specific error (Vulkan, legacy context, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (texture, buffer, shader, etc.)
    InvalidResource(String),

    /// Initialization failed (device, context, subsystems)
    InitializationFailed(String),

    /// Operation called in the wrong lifecycle state (e.g. `end()` while not recording)
    InvalidState(String),

    /// Requested backend is not registered or not available on this platform
    UnsupportedBackend(String),

    /// Calling thread does not own the backend's graphics context
    ContextNotCurrent(String),

    /// Feature not supported by the device (query capabilities first)
    Unsupported(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::UnsupportedBackend(msg) => write!(f, "Unsupported backend: {}", msg),
            Error::ContextNotCurrent(msg) => write!(f, "Context not current: {}", msg),
            Error::Unsupported(msg) => write!(f, "Unsupported feature: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
