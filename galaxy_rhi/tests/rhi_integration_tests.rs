//! Integration tests for the RHI with the built-in legacy backend
//!
//! These tests drive the public API end to end: startup, command recording,
//! queue execution, the render thread pool and logging.
//! No GPU required.
//!
//! Run with: cargo test --test rhi_integration_tests

use galaxy_rhi::glam::Vec4;
use galaxy_rhi::rhi::device::*;
use galaxy_rhi::rhi::command::CommandQueue;
use galaxy_rhi::rhi::legacy::LegacyDevice;
use galaxy_rhi::rhi::log::{CapturingLogger, LogSeverity};
use galaxy_rhi::rhi::task::{FnRenderTask, RenderTaskType};
use galaxy_rhi::rhi::{BackendRegistry, Error, Rhi, RhiConfig, RhiType};
use serial_test::serial;
use std::sync::{Arc, Mutex};

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];

fn small_config() -> RhiConfig {
    RhiConfig {
        backbuffer_width: 8,
        backbuffer_height: 8,
        worker_threads: 2,
        ..RhiConfig::default()
    }
}

/// Legacy device kept concrete for pixel checks, plus a queue sharing it
fn legacy_queue() -> (Arc<Mutex<LegacyDevice>>, CommandQueue) {
    let legacy = Arc::new(Mutex::new(LegacyDevice::new(&small_config()).unwrap()));
    let shared: SharedDevice = legacy.clone();
    (legacy, CommandQueue::new(shared))
}

fn source_shader(device: &mut dyn Device, stage: ShaderStage) -> Arc<dyn Shader> {
    device
        .create_shader(&ShaderDesc {
            stage,
            code: ShaderCode::Source("void main() {}".to_string()),
            entry_point: "main".to_string(),
            debug_name: format!("{:?}", stage),
        })
        .unwrap()
}

// ============================================================================
// STARTUP AND SHUTDOWN TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_initialize_and_shutdown() {
    let mut rhi = Rhi::initialize(small_config(), &BackendRegistry::with_defaults()).unwrap();

    assert!(rhi.is_initialized());
    assert_eq!(rhi.backend(), Some(RhiType::Legacy));
    assert!(rhi.device().is_ok());
    assert!(rhi.command_queue().is_ok());
    assert_eq!(rhi.thread_pool().unwrap().thread_count(), 2);

    rhi.shutdown();
    assert!(!rhi.is_initialized());
    assert!(matches!(rhi.device(), Err(Error::InvalidState(_))));
    assert!(matches!(rhi.command_queue(), Err(Error::InvalidState(_))));

    // Second shutdown is a no-op
    rhi.shutdown();
}

#[test]
#[serial]
fn test_integration_unregistered_backend_falls_back() {
    let config = RhiConfig { rhi_type: RhiType::Vulkan, ..small_config() };
    let mut rhi = Rhi::initialize(config, &BackendRegistry::with_defaults()).unwrap();

    assert_eq!(rhi.backend(), Some(RhiType::Legacy));
    rhi.shutdown();
}

#[test]
#[serial]
fn test_integration_unregistered_backend_without_fallback() {
    let config = RhiConfig { rhi_type: RhiType::Vulkan, allow_fallback: false, ..small_config() };

    let result = Rhi::initialize(config, &BackendRegistry::with_defaults());
    assert!(matches!(result, Err(Error::UnsupportedBackend(_))));
}

// ============================================================================
// COMMAND QUEUE WORKFLOW TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_record_submit_execute() {
    let (legacy, queue) = legacy_queue();

    let frame = queue.create_command_list("frame");
    frame.begin().unwrap();
    frame.clear(ClearParams::color(RED));
    frame.set_scissor(Rect2D::new(0, 0, 4, 4));
    frame.clear(ClearParams::color(GREEN));
    frame.end().unwrap();
    queue.submit_command_list(Arc::clone(&frame));

    assert_eq!(queue.pending_count(), 1);
    assert_eq!(queue.execute_all(), 1);
    assert_eq!(queue.pending_count(), 0);

    let device = legacy.lock().unwrap();
    assert_eq!(device.backbuffer_pixel(1, 1), Some([0, 255, 0, 255]));
    assert_eq!(device.backbuffer_pixel(6, 6), Some([255, 0, 0, 255]));
}

#[test]
#[serial]
fn test_integration_lists_execute_in_submission_order() {
    let (legacy, queue) = legacy_queue();

    for (name, color) in [("first", RED), ("second", GREEN)] {
        let list = queue.create_command_list(name);
        list.begin().unwrap();
        list.clear(ClearParams::color(color));
        list.end().unwrap();
        queue.submit_command_list(list);
    }

    assert_eq!(queue.execute_all(), 2);
    assert_eq!(legacy.lock().unwrap().backbuffer_pixel(0, 0), Some([0, 255, 0, 255]));
}

#[test]
#[serial]
fn test_integration_parameters_committed_once_per_change() {
    let (legacy, queue) = legacy_queue();

    let (pipeline, vertex_array) = {
        let mut device = legacy.lock().unwrap();
        let shaders = vec![
            source_shader(&mut *device, ShaderStage::Vertex),
            source_shader(&mut *device, ShaderStage::Fragment),
        ];
        let layout = VertexLayout::interleaved(&[VertexFormat::Float3]);
        let pipeline = device.create_pipeline(&PipelineDesc::new(shaders, layout.clone(), "tinted")).unwrap();
        let vertices = device
            .create_buffer(&BufferDesc::with_data(BufferType::Vertex, vec![0; 36], "triangle"))
            .unwrap();
        let vertex_array = device
            .create_vertex_array(&VertexArrayDesc {
                layout,
                vertex_buffers: vec![VertexBufferBinding { binding: 0, buffer: vertices, offset: 0 }],
                index_buffer: None,
                debug_name: "triangle".to_string(),
            })
            .unwrap();
        (pipeline, vertex_array)
    };

    pipeline.set_uniform("tint", UniformValue::Vec4(Vec4::new(1.0, 0.5, 0.0, 1.0)));

    let list = queue.create_command_list("draws");
    list.begin().unwrap();
    list.bind_pipeline(&pipeline);
    list.bind_vertex_array(&vertex_array);
    list.draw(DrawParams::new(PrimitiveTopology::TriangleList, 3));
    list.draw(DrawParams::new(PrimitiveTopology::TriangleList, 3));
    list.end().unwrap();
    queue.submit_command_list(list);
    queue.execute_all();

    let stats = legacy.lock().unwrap().stats();
    assert_eq!(stats.draw_calls, 2);
    assert_eq!(stats.triangles, 2);
    assert_eq!(stats.parameter_commits, 1);
    assert!(!pipeline.has_dirty_parameters());
}

// ============================================================================
// THREAD POOL TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_worker_takes_the_context() {
    let (legacy, queue) = legacy_queue();

    let list = queue.create_command_list("worker frame");
    list.begin().unwrap();
    list.clear(ClearParams::color(GREEN));
    list.end().unwrap();

    // Hand the context over to whichever worker runs the task
    assert!(legacy.lock().unwrap().release_current_context());

    let pool = galaxy_rhi::rhi::task::RenderThreadPool::new(1);
    pool.start().unwrap();

    let device = Arc::clone(&legacy);
    pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::CommandBufferExec, 0, move || {
        let mut device = device.lock().unwrap();
        assert!(device.make_context_current(0));
        list.execute(&mut *device);
        device.release_current_context();
        Ok(())
    })));
    pool.wait_for_completion();
    pool.stop();

    let stats = pool.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);

    let mut device = legacy.lock().unwrap();
    assert!(device.make_context_current(0));
    assert_eq!(device.backbuffer_pixel(3, 3), Some([0, 255, 0, 255]));
}

#[test]
#[serial]
fn test_integration_foreign_thread_needs_the_context() {
    let (legacy, _queue) = legacy_queue();

    let device = Arc::clone(&legacy);
    let result = std::thread::spawn(move || device.lock().unwrap().clear(&ClearParams::color(RED)))
        .join()
        .unwrap();

    assert!(matches!(result, Err(Error::ContextNotCurrent(_))));
}

// ============================================================================
// LOGGING TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_failed_commands_are_logged() {
    let logger = CapturingLogger::new();
    Rhi::set_logger(logger.clone());

    let (_legacy, queue) = legacy_queue();
    let list = queue.create_command_list("broken");
    list.begin().unwrap();
    list.draw(DrawParams::new(PrimitiveTopology::TriangleList, 3));
    list.clear(ClearParams::color(RED));
    list.end().unwrap();
    queue.submit_command_list(list);

    // The failing draw does not stop the replay
    assert_eq!(queue.execute_all(), 1);
    assert!(logger.contains(LogSeverity::Error, "Draw"));
    assert!(logger.contains(LogSeverity::Error, "broken"));

    Rhi::reset_logger();
}

#[test]
#[serial]
fn test_integration_empty_list_is_dropped_with_warning() {
    let logger = CapturingLogger::new();
    Rhi::set_logger(logger.clone());

    let (_legacy, queue) = legacy_queue();
    let list = queue.create_command_list("nothing");
    list.begin().unwrap();
    list.end().unwrap();
    queue.submit_command_list(list);

    assert_eq!(queue.pending_count(), 0);
    assert!(logger.contains(LogSeverity::Warn, "nothing"));

    Rhi::reset_logger();
}
