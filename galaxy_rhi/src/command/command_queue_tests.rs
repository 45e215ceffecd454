//! Unit tests for command_queue.rs

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;
use serial_test::serial;

use crate::command::{CommandList, CommandQueue};
use crate::device::mock_device::{CallLog, DeviceCall, MockDevice};
use crate::device::*;
use crate::rhi::log::{CapturingLogger, LogSeverity};
use crate::rhi::Rhi;

type QueueSlot = Arc<OnceLock<Weak<CommandQueue>>>;

fn queue_with(device: MockDevice) -> (Arc<CommandQueue>, CallLog) {
    let log = device.call_log();
    let shared: SharedDevice = Arc::new(Mutex::new(device));
    (Arc::new(CommandQueue::new(shared)), log)
}

/// Queue whose mock device runs `hook` with the queue during every draw
fn queue_with_hook<F>(hook: F) -> (Arc<CommandQueue>, CallLog)
where
    F: Fn(&CommandQueue) + Send + 'static,
{
    let slot: QueueSlot = Arc::new(OnceLock::new());
    let mut device = MockDevice::new();
    let hook_slot = Arc::clone(&slot);
    device.set_on_draw(move || {
        if let Some(queue) = hook_slot.get().and_then(Weak::upgrade) {
            hook(&queue);
        }
    });
    let (queue, log) = queue_with(device);
    let _ = slot.set(Arc::downgrade(&queue));
    (queue, log)
}

fn recorded(queue: &CommandQueue, name: &str, record: impl FnOnce(&CommandList)) -> Arc<CommandList> {
    let list = queue.create_command_list(name);
    list.begin().unwrap();
    record(&list);
    list.end().unwrap();
    list
}

fn viewport(x: f32) -> Viewport {
    Viewport::new(x, 0.0, 10.0, 10.0)
}

fn triangle() -> DrawParams {
    DrawParams::new(PrimitiveTopology::TriangleList, 3)
}

// ============================================================================
// SUBMISSION TESTS
// ============================================================================

#[test]
fn test_create_command_list_does_not_queue() {
    let (queue, _) = queue_with(MockDevice::new());
    let list = queue.create_command_list("fresh");
    assert_eq!(list.debug_name(), "fresh");
    assert_eq!(queue.pending_count(), 0);
}

#[test]
#[serial]
fn test_empty_list_is_dropped_at_submission() {
    let logger = CapturingLogger::new();
    Rhi::set_logger(logger.clone());

    let (queue, _) = queue_with(MockDevice::new());
    let list = queue.create_command_list("nothing_recorded");
    list.begin().unwrap();
    list.end().unwrap();
    queue.submit_command_list(list);

    Rhi::reset_logger();
    assert_eq!(queue.pending_count(), 0);
    assert!(logger.contains(LogSeverity::Warn, "'nothing_recorded'"));
}

#[test]
fn test_concurrent_submission() {
    let (queue, _) = queue_with(MockDevice::new());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..25 {
                    let list = recorded(&queue, &format!("list_{}_{}", t, i), |l| l.draw(triangle()));
                    queue.submit_command_list(list);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(queue.pending_count(), 100);
    assert_eq!(queue.execute_all(), 100);
    assert_eq!(queue.device().lock().unwrap().stats().draw_calls, 100);
}

// ============================================================================
// EXECUTION TESTS
// ============================================================================

#[test]
fn test_execute_all_runs_lists_in_submission_order() {
    let (queue, log) = queue_with(MockDevice::new());
    for (name, x) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
        queue.submit_command_list(recorded(&queue, name, |l| l.set_viewport(viewport(x))));
    }

    assert_eq!(queue.execute_all(), 3);
    assert_eq!(log.operations(), vec![
        DeviceCall::SetViewport(viewport(1.0)),
        DeviceCall::SetViewport(viewport(2.0)),
        DeviceCall::SetViewport(viewport(3.0)),
    ]);
    assert_eq!(queue.pending_count(), 0);
}

#[test]
fn test_execute_all_with_nothing_pending() {
    let (queue, log) = queue_with(MockDevice::new());
    assert_eq!(queue.execute_all(), 0);
    assert_eq!(log.len(), 0);
    assert!(!queue.is_executing());
}

#[test]
fn test_end_to_end_frame_reaches_device() {
    let (queue, log) = queue_with(MockDevice::new());
    let list = recorded(&queue, "frame", |l| {
        l.set_viewport(Viewport::new(0.0, 0.0, 800.0, 600.0));
        l.clear(ClearParams::color([0.0, 0.0, 0.0, 1.0]));
        l.draw(triangle());
    });
    queue.submit_command_list(list);

    assert_eq!(queue.execute_all(), 1);
    assert_eq!(log.operations(), vec![
        DeviceCall::SetViewport(Viewport::new(0.0, 0.0, 800.0, 600.0)),
        DeviceCall::Clear(ClearParams::color([0.0, 0.0, 0.0, 1.0])),
        DeviceCall::Draw(triangle()),
    ]);
}

#[test]
fn test_reentrant_execute_all_returns_immediately() {
    let inner_results = Arc::new(Mutex::new(Vec::new()));
    let results = Arc::clone(&inner_results);
    let (queue, _) = queue_with_hook(move |queue| {
        results.lock().unwrap().push(queue.execute_all());
    });

    queue.submit_command_list(recorded(&queue, "outer", |l| l.draw(triangle())));
    assert_eq!(queue.execute_all(), 1);
    assert_eq!(*inner_results.lock().unwrap(), vec![0]);
}

#[test]
fn test_submission_during_execution_runs_in_next_pass() {
    let late: Arc<Mutex<Option<Arc<CommandList>>>> = Arc::new(Mutex::new(None));
    let late_hook = Arc::clone(&late);
    let (queue, log) = queue_with_hook(move |queue| {
        if let Some(list) = late_hook.lock().unwrap().take() {
            queue.submit_command_list(list);
        }
    });

    *late.lock().unwrap() = Some(recorded(&queue, "late", |l| l.set_viewport(viewport(9.0))));
    queue.submit_command_list(recorded(&queue, "first", |l| l.draw(triangle())));

    assert_eq!(queue.execute_all(), 1);
    assert_eq!(log.operations(), vec![DeviceCall::Draw(triangle())]);
    assert_eq!(queue.pending_count(), 1);

    assert_eq!(queue.execute_all(), 1);
    assert_eq!(log.operations(), vec![
        DeviceCall::Draw(triangle()),
        DeviceCall::SetViewport(viewport(9.0)),
    ]);
}

#[test]
fn test_wait_blocks_until_pass_ends() {
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let (started_hook, finished_hook) = (Arc::clone(&started), Arc::clone(&finished));
    let (queue, _) = queue_with_hook(move |_| {
        started_hook.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        finished_hook.store(true, Ordering::SeqCst);
    });
    queue.submit_command_list(recorded(&queue, "slow", |l| l.draw(triangle())));

    let runner = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.execute_all())
    };
    while !started.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    queue.wait();

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(runner.join().unwrap(), 1);
}

#[test]
fn test_wait_returns_immediately_when_idle() {
    let (queue, _) = queue_with(MockDevice::new());
    queue.wait();
    assert!(!queue.is_executing());
}

#[test]
fn test_executing_flag_cleared_after_panic() {
    let (queue, _) = queue_with_hook(|_| panic!("device lost"));
    queue.submit_command_list(recorded(&queue, "doomed", |l| l.draw(triangle())));

    let result = panic::catch_unwind(AssertUnwindSafe(|| queue.execute_all()));
    assert!(result.is_err());
    assert!(!queue.is_executing());

    queue.submit_command_list(recorded(&queue, "after", |l| l.end_render_pass()));
    assert_eq!(queue.execute_all(), 1);
}

// ============================================================================
// CONFIGURATION TESTS
// ============================================================================

#[test]
fn test_thread_count_has_minimum_of_one() {
    let (queue, _) = queue_with(MockDevice::new());
    assert_eq!(queue.thread_count(), 1);

    queue.set_thread_count(4);
    assert_eq!(queue.thread_count(), 4);

    queue.set_thread_count(0);
    assert_eq!(queue.thread_count(), 1);
}
