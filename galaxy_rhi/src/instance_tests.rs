//! Unit tests for instance.rs (Rhi orchestrator)

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::{BackendRegistry, RhiType};
use crate::config::RhiConfig;
use crate::device::mock_device::MockDevice;
use crate::device::*;
use crate::error::Error;
use crate::rhi::Rhi;
use crate::task::{FnRenderTask, RenderTaskType};

fn config() -> RhiConfig {
    RhiConfig {
        backbuffer_width: 8,
        backbuffer_height: 8,
        worker_threads: 2,
        queue_thread_count: 3,
        ..RhiConfig::default()
    }
}

fn mock_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::empty();
    registry.register(RhiType::Legacy, |_| {
        let device: SharedDevice = Arc::new(Mutex::new(MockDevice::new()));
        Ok(device)
    });
    registry
}

// ============================================================================
// INITIALIZATION TESTS
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = RhiConfig::default();
    assert_eq!(config.rhi_type, RhiType::Legacy);
    assert_eq!((config.backbuffer_width, config.backbuffer_height), (1280, 720));
    assert_eq!(config.queue_thread_count, 1);
    assert_eq!(config.max_texture_size, 8192);
    assert!(config.worker_threads >= 1);
}

#[test]
fn test_initialize_provides_subsystems() {
    let rhi = Rhi::initialize(config(), &BackendRegistry::with_defaults()).unwrap();

    assert!(rhi.is_initialized());
    assert_eq!(rhi.backend(), Some(RhiType::Legacy));
    assert_eq!(rhi.command_queue().unwrap().thread_count(), 3);
    assert!(rhi.thread_pool().unwrap().is_running());
    assert_eq!(rhi.thread_pool().unwrap().thread_count(), 2);
    assert!(rhi.services().has::<Mutex<dyn Device>>());
    assert_eq!(rhi.device().unwrap().lock().unwrap().backend(), RhiType::Legacy);
}

#[test]
fn test_initialize_falls_back_when_backend_missing() {
    let config = RhiConfig { rhi_type: RhiType::Vulkan, ..config() };
    let rhi = Rhi::initialize(config, &BackendRegistry::with_defaults()).unwrap();
    assert_eq!(rhi.backend(), Some(RhiType::Legacy));
}

#[test]
fn test_initialize_without_fallback_fails() {
    let config = RhiConfig { rhi_type: RhiType::Vulkan, allow_fallback: false, ..config() };
    let result = Rhi::initialize(config, &BackendRegistry::with_defaults());
    assert!(matches!(result, Err(Error::UnsupportedBackend(_))));
}

#[test]
fn test_device_initialization_error_aborts_startup() {
    let config = RhiConfig { backbuffer_width: 0, ..config() };
    let result = Rhi::initialize(config, &BackendRegistry::with_defaults());
    assert!(matches!(result, Err(Error::InitializationFailed(_))));
}

// ============================================================================
// END-TO-END TESTS
// ============================================================================

#[test]
fn test_queue_and_pool_work_together() {
    let rhi = Rhi::initialize(config(), &mock_registry()).unwrap();
    let queue = rhi.command_queue().unwrap();
    let pool = rhi.thread_pool().unwrap();

    // Record on a worker, execute on this thread
    let recorder = Arc::clone(&queue);
    pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::GeometryProcessing, 0, move || {
        let list = recorder.create_command_list("worker_list");
        list.begin()?;
        list.set_viewport(Viewport::new(0.0, 0.0, 800.0, 600.0));
        list.clear(ClearParams::color([0.0, 0.0, 0.0, 1.0]));
        list.draw(DrawParams::new(PrimitiveTopology::TriangleList, 3));
        list.end()?;
        recorder.submit_command_list(list);
        Ok(())
    })));
    pool.wait_for_completion();

    assert_eq!(queue.execute_all(), 1);
    assert_eq!(rhi.device().unwrap().lock().unwrap().stats().draw_calls, 1);
}

#[test]
fn test_custom_services_can_be_added() {
    struct FrameClock(u64);
    let mut rhi = Rhi::initialize(config(), &mock_registry()).unwrap();
    rhi.services_mut().provide(Arc::new(FrameClock(60)));
    assert_eq!(rhi.services().get::<FrameClock>().unwrap().0, 60);
}

// ============================================================================
// SHUTDOWN TESTS
// ============================================================================

#[test]
fn test_shutdown_releases_subsystems() {
    let mut rhi = Rhi::initialize(config(), &mock_registry()).unwrap();
    let pool = rhi.thread_pool().unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::ResourceUpdate, 0, move || {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    })));

    rhi.shutdown();
    assert!(ran.load(Ordering::SeqCst));
    assert!(!pool.is_running());
    assert!(!rhi.is_initialized());
    assert!(rhi.services().is_empty());
    assert!(matches!(rhi.device(), Err(Error::InvalidState(_))));
    assert!(matches!(rhi.command_queue(), Err(Error::InvalidState(_))));

    // Second call is a no-op
    rhi.shutdown();
}
