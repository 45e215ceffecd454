//! Unit tests for error.rs
//!
//! Tests all Error variants and their implementations (Display, Debug, Clone, std::error::Error).

use crate::error::{Error, Result};

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("vkQueueSubmit failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Backend error"));
    assert!(display.contains("vkQueueSubmit failed"));
}

#[test]
fn test_out_of_memory_display() {
    assert_eq!(format!("{}", Error::OutOfMemory), "Out of GPU memory");
}

#[test]
fn test_invalid_state_display() {
    let err = Error::InvalidState("command list 'shadow' is already recording".to_string());
    let display = format!("{}", err);
    assert!(display.starts_with("Invalid state"));
    assert!(display.contains("'shadow'"));
}

#[test]
fn test_unsupported_backend_display() {
    let err = Error::UnsupportedBackend("Vulkan".to_string());
    assert_eq!(format!("{}", err), "Unsupported backend: Vulkan");
}

#[test]
fn test_context_not_current_display() {
    let err = Error::ContextNotCurrent("create_buffer".to_string());
    assert_eq!(format!("{}", err), "Context not current: create_buffer");
}

#[test]
fn test_unsupported_display() {
    let err = Error::Unsupported("compute shaders".to_string());
    assert!(format!("{}", err).contains("compute shaders"));
}

// ============================================================================
// ERROR TRAIT IMPLEMENTATIONS
// ============================================================================

#[test]
fn test_error_is_std_error() {
    let err = Error::OutOfMemory;
    let _: &dyn std::error::Error = &err;
}

#[test]
fn test_error_clone_and_eq() {
    let err1 = Error::InvalidResource("texture 'albedo'".to_string());
    let err2 = err1.clone();
    assert_eq!(err1, err2);
    assert_ne!(err1, Error::OutOfMemory);
}

#[test]
fn test_error_debug() {
    let debug = format!("{:?}", Error::InitializationFailed("no GPU".to_string()));
    assert!(debug.contains("InitializationFailed"));
}

// ============================================================================
// RESULT TYPE TESTS
// ============================================================================

#[test]
fn test_error_propagation_with_question_mark() {
    fn inner() -> Result<i32> {
        Err(Error::InvalidState("not recording".to_string()))
    }

    fn outer() -> Result<i32> {
        inner()?;
        Ok(42)
    }

    assert_eq!(outer(), Err(Error::InvalidState("not recording".to_string())));
}
