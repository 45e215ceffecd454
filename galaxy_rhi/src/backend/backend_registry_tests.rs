//! Unit tests for backend_registry.rs

use std::sync::{Arc, Mutex};
use crate::backend::{BackendRegistry, RhiType};
use crate::config::RhiConfig;
use crate::device::mock_device::MockDevice;
use crate::device::SharedDevice;
use crate::error::Error;

fn mock_factory(_config: &RhiConfig) -> crate::error::Result<SharedDevice> {
    Ok(Arc::new(Mutex::new(MockDevice::new())))
}

fn config(rhi_type: RhiType, allow_fallback: bool) -> RhiConfig {
    RhiConfig { rhi_type, allow_fallback, ..RhiConfig::default() }
}

// ============================================================================
// REGISTRATION TESTS
// ============================================================================

#[test]
fn test_defaults_register_legacy_only() {
    let registry = BackendRegistry::with_defaults();
    assert!(registry.is_registered(RhiType::Legacy));
    assert!(!registry.is_registered(RhiType::Vulkan));
    assert_eq!(registry.backends(), vec![RhiType::Legacy]);
}

#[test]
fn test_register_additional_backend() {
    let mut registry = BackendRegistry::with_defaults();
    registry.register(RhiType::Vulkan, mock_factory);
    assert_eq!(registry.backends(), vec![RhiType::Legacy, RhiType::Vulkan]);
}

#[test]
fn test_rhi_type_names() {
    assert_eq!(RhiType::default(), RhiType::Legacy);
    assert_eq!(RhiType::Vulkan.to_string(), "vulkan");
}

// ============================================================================
// RESOLUTION TESTS
// ============================================================================

#[test]
fn test_create_registered_backend() {
    let mut registry = BackendRegistry::empty();
    registry.register(RhiType::Vulkan, mock_factory);

    assert!(registry.create_device(&config(RhiType::Vulkan, false)).is_ok());
}

#[test]
fn test_unregistered_backend_falls_back_to_default() {
    let mut registry = BackendRegistry::empty();
    registry.register(RhiType::Legacy, mock_factory);

    assert!(registry.create_device(&config(RhiType::Vulkan, true)).is_ok());
}

#[test]
fn test_unregistered_backend_without_fallback_fails() {
    let mut registry = BackendRegistry::empty();
    registry.register(RhiType::Legacy, mock_factory);

    let result = registry.create_device(&config(RhiType::Vulkan, false));
    assert!(matches!(result, Err(Error::UnsupportedBackend(_))));
}

#[test]
fn test_empty_registry_fails_even_with_fallback() {
    let registry = BackendRegistry::empty();
    let result = registry.create_device(&config(RhiType::Legacy, true));
    assert!(matches!(result, Err(Error::UnsupportedBackend(_))));
}

#[test]
fn test_factory_error_is_not_masked_by_fallback() {
    let mut registry = BackendRegistry::empty();
    registry.register(RhiType::Legacy, mock_factory);
    registry.register(RhiType::Vulkan, |_| {
        Err(Error::InitializationFailed("no driver".to_string()))
    });

    let result = registry.create_device(&config(RhiType::Vulkan, true));
    assert_eq!(result.err(), Some(Error::InitializationFailed("no driver".to_string())));
}
