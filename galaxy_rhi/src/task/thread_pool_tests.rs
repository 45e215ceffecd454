//! Unit tests for render_task.rs and thread_pool.rs

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use serial_test::serial;

use crate::backend::legacy::LegacyDevice;
use crate::config::RhiConfig;
use crate::device::mock_device::MockDevice;
use crate::device::{ClearParams, DrawParams, PrimitiveTopology, SharedDevice};
use crate::error::Error;
use crate::rhi::log::{CapturingLogger, LogSeverity};
use crate::rhi::Rhi;
use crate::task::{
    current_worker_index, CommandListTask, FnRenderTask, RenderTask, RenderTaskType, RenderThreadPool,
};
use crate::command::CommandList;

fn recording_task(order: &Arc<Mutex<Vec<i32>>>, priority: i32) -> Box<dyn RenderTask> {
    let order = Arc::clone(order);
    Box::new(FnRenderTask::new(RenderTaskType::GeometryProcessing, priority, move || {
        order.lock().unwrap().push(priority);
        Ok(())
    }))
}

// ============================================================================
// RENDER TASK TESTS
// ============================================================================

#[test]
fn test_fn_render_task_properties() {
    let task = FnRenderTask::new(RenderTaskType::ShaderCompilation, 7, || Ok(()));
    assert_eq!(task.task_type(), RenderTaskType::ShaderCompilation);
    assert_eq!(task.priority(), 7);
    assert!(Box::new(task).execute().is_ok());
}

#[test]
fn test_command_list_task_replays_on_device() {
    let device: SharedDevice = Arc::new(Mutex::new(MockDevice::new()));
    let list = Arc::new(CommandList::new("task_list"));
    list.begin().unwrap();
    list.draw(DrawParams::new(PrimitiveTopology::TriangleList, 3));
    list.end().unwrap();

    let task = CommandListTask::new(Arc::clone(&device), list, 0);
    assert_eq!(task.task_type(), RenderTaskType::CommandBufferExec);
    Box::new(task).execute().unwrap();

    assert_eq!(device.lock().unwrap().stats().draw_calls, 1);
}

#[test]
fn test_command_list_task_fails_on_list_still_recording() {
    let device: SharedDevice = Arc::new(Mutex::new(MockDevice::new()));
    let list = Arc::new(CommandList::new("open_list"));
    list.begin().unwrap();
    list.draw(DrawParams::new(PrimitiveTopology::TriangleList, 3));

    let result = Box::new(CommandListTask::new(Arc::clone(&device), list, 0)).execute();
    assert!(matches!(result, Err(Error::InvalidState(_))));
    assert_eq!(device.lock().unwrap().stats().draw_calls, 0);
}

fn legacy_device() -> Arc<Mutex<LegacyDevice>> {
    let config = RhiConfig { backbuffer_width: 4, backbuffer_height: 4, ..RhiConfig::default() };
    Arc::new(Mutex::new(LegacyDevice::new(&config).unwrap()))
}

fn clear_list(name: &str) -> Arc<CommandList> {
    let list = Arc::new(CommandList::new(name));
    list.begin().unwrap();
    list.clear(ClearParams::color([0.0, 1.0, 0.0, 1.0]));
    list.end().unwrap();
    list
}

// ============================================================================
// LIFECYCLE TESTS
// ============================================================================

#[test]
fn test_new_pool_is_stopped() {
    let pool = RenderThreadPool::new(0);
    assert!(!pool.is_running());
    assert_eq!(pool.thread_count(), 1);
    assert_eq!(pool.pending_count(), 0);
}

#[test]
fn test_start_stop_restart() {
    let pool = RenderThreadPool::new(2);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        pool.start().unwrap();
        assert!(pool.is_running());
        let counter = Arc::clone(&counter);
        pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::ResourceUpdate, 0, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));
        pool.wait_for_completion();
        pool.stop();
        assert!(!pool.is_running());
    }

    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_workers_are_named() {
    let pool = RenderThreadPool::new(1);
    let name = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&name);
    pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::ResourceUpdate, 0, move || {
        *seen.lock().unwrap() = thread::current().name().map(str::to_string);
        Ok(())
    })));
    pool.start().unwrap();
    pool.wait_for_completion();

    assert_eq!(name.lock().unwrap().as_deref(), Some("galaxy-rhi-worker-0"));
}

#[test]
fn test_worker_index_is_known_on_workers_only() {
    assert_eq!(current_worker_index(), None);

    let pool = RenderThreadPool::new(1);
    pool.start().unwrap();
    let (tx, rx) = mpsc::channel();
    pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::ResourceUpdate, 0, move || {
        tx.send(current_worker_index()).unwrap();
        Ok(())
    })));
    pool.wait_for_completion();

    assert_eq!(rx.recv().unwrap(), Some(0));
}

#[test]
fn test_stop_keeps_queued_tasks() {
    let pool = RenderThreadPool::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    pool.submit_task(recording_task(&order, 1));

    assert_eq!(pool.pending_count(), 1);
    pool.start().unwrap();
    pool.wait_for_completion();
    assert_eq!(*order.lock().unwrap(), vec![1]);
}

// ============================================================================
// ORDERING TESTS
// ============================================================================

#[test]
fn test_priority_order() {
    let pool = RenderThreadPool::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    for priority in [1, 5, 3] {
        pool.submit_task(recording_task(&order, priority));
    }

    pool.start().unwrap();
    pool.wait_for_completion();

    assert_eq!(*order.lock().unwrap(), vec![5, 3, 1]);
}

#[test]
fn test_equal_priorities_run_in_submission_order() {
    let pool = RenderThreadPool::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    for id in 0..5 {
        let order = Arc::clone(&order);
        pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::GeometryProcessing, 2, move || {
            order.lock().unwrap().push(id);
            Ok(())
        })));
    }

    pool.start().unwrap();
    pool.wait_for_completion();

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

// ============================================================================
// WAITING TESTS
// ============================================================================

#[test]
fn test_wait_for_completion_runs_everything() {
    let pool = RenderThreadPool::new(4);
    pool.start().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..64 {
        let counter = Arc::clone(&counter);
        pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::GeometryProcessing, 0, move || {
            thread::sleep(Duration::from_millis(1));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));
    }

    pool.wait_for_completion();
    assert_eq!(counter.load(Ordering::SeqCst), 64);
    assert_eq!(pool.pending_count(), 0);
    assert_eq!(pool.stats().completed, 64);
}

#[test]
#[serial]
fn test_wait_on_stopped_pool_with_queued_tasks_returns() {
    let logger = CapturingLogger::new();
    Rhi::set_logger(logger.clone());

    let pool = RenderThreadPool::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    pool.submit_task(recording_task(&order, 0));
    pool.wait_for_completion();
    pool.flush();

    Rhi::reset_logger();
    assert!(order.lock().unwrap().is_empty());
    assert!(logger.contains(LogSeverity::Warn, "wait_for_completion() on a stopped pool"));
    assert!(logger.contains(LogSeverity::Warn, "flush() on a stopped pool"));
}

#[test]
fn test_flush_ignores_later_submissions() {
    let pool = Arc::new(RenderThreadPool::new(2));
    pool.start().unwrap();

    let early_done = Arc::new(AtomicBool::new(false));
    let late_done = Arc::new(AtomicBool::new(false));

    let done = Arc::clone(&early_done);
    pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::ResourceUpdate, 0, move || {
        thread::sleep(Duration::from_millis(150));
        done.store(true, Ordering::SeqCst);
        Ok(())
    })));

    // Submitted while flush() is waiting; blocks until released after flush returns
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let submitter = {
        let pool = Arc::clone(&pool);
        let done = Arc::clone(&late_done);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::ResourceUpdate, 0, move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                done.store(true, Ordering::SeqCst);
                Ok(())
            })));
        })
    };

    pool.flush();
    assert!(early_done.load(Ordering::SeqCst));
    assert!(!late_done.load(Ordering::SeqCst));

    submitter.join().unwrap();
    release_tx.send(()).unwrap();
    pool.wait_for_completion();
    assert!(late_done.load(Ordering::SeqCst));
}

// ============================================================================
// FAILURE TESTS
// ============================================================================

#[test]
fn test_command_list_task_with_failing_command_is_counted() {
    let mut mock = MockDevice::new();
    mock.set_fail_draws(true);
    let device: SharedDevice = Arc::new(Mutex::new(mock));

    let list = Arc::new(CommandList::new("draws"));
    list.begin().unwrap();
    list.draw(DrawParams::new(PrimitiveTopology::TriangleList, 3));
    list.end().unwrap();

    let pool = RenderThreadPool::new(1);
    pool.start().unwrap();
    pool.submit_task(Box::new(CommandListTask::new(device, list, 0)));
    pool.wait_for_completion();

    let stats = pool.stats();
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 1);
}

#[test]
fn test_command_list_task_takes_legacy_context_on_worker() {
    let legacy = legacy_device();
    assert!(legacy.lock().unwrap().release_current_context());
    let shared: SharedDevice = legacy.clone();

    let pool = RenderThreadPool::new(1);
    pool.start().unwrap();
    pool.submit_task(Box::new(CommandListTask::new(shared, clear_list("worker_clear"), 0)));
    pool.wait_for_completion();

    let stats = pool.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);

    pool.stop();
    assert_eq!(legacy.lock().unwrap().backbuffer_pixel(0, 0), Some([0, 255, 0, 255]));
}

#[test]
fn test_command_list_task_without_context_is_counted() {
    // The test thread keeps the legacy context
    let legacy = legacy_device();
    let shared: SharedDevice = legacy.clone();

    let pool = RenderThreadPool::new(1);
    pool.start().unwrap();
    pool.submit_task(Box::new(CommandListTask::new(shared, clear_list("no_context"), 0)));
    pool.wait_for_completion();

    let stats = pool.stats();
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 1);

    let device = legacy.lock().unwrap();
    assert_eq!(device.backbuffer_pixel(0, 0), Some([0, 0, 0, 0]));
}

#[test]
fn test_failing_and_panicking_tasks_are_counted() {
    let pool = RenderThreadPool::new(1);
    pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::ShaderCompilation, 3, || {
        Err(Error::BackendError("compile failed".to_string()))
    })));
    pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::ShaderCompilation, 2, || {
        panic!("driver crashed")
    })));
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    pool.submit_task(Box::new(FnRenderTask::new(RenderTaskType::ShaderCompilation, 1, move || {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    })));

    pool.start().unwrap();
    pool.wait_for_completion();

    let stats = pool.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.completed, 1);
    assert!(ran.load(Ordering::SeqCst));
}
