/// Render thread pool
///
/// A fixed set of named worker threads pulling tasks from a priority queue.
/// Higher priorities run first; equal priorities run in submission order.
/// Tasks may be submitted while the pool is stopped and run once it starts.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::task::{RenderTask, RenderTaskType};
use crate::{rhi_debug, rhi_error, rhi_info, rhi_warn};

const SOURCE: &str = "galaxy_rhi::ThreadPool";

thread_local! {
    static WORKER_INDEX: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Index of the pool worker running on the calling thread
///
/// `None` outside pool worker threads.
pub fn current_worker_index() -> Option<usize> {
    WORKER_INDEX.with(|index| index.get())
}

/// Counters of a thread pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadPoolStats {
    pub submitted: u64,
    pub completed: u64,
    /// Tasks that returned an error or panicked
    pub failed: u64,
    pub queued: usize,
    pub running: usize,
}

struct QueuedTask {
    priority: i32,
    seq: u64,
    task: Box<dyn RenderTask>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // Max-heap: highest priority first, then lowest sequence number
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct PoolState {
    queue: BinaryHeap<QueuedTask>,
    /// Sequence numbers of tasks submitted and not finished
    outstanding: BTreeSet<u64>,
    next_seq: u64,
    running: usize,
    started: bool,
    stopping: bool,
    stats: ThreadPoolStats,
}

impl PoolState {
    fn pending(&self) -> usize {
        self.queue.len() + self.running
    }

    /// Queued work that no worker will ever pick up
    fn stalled(&self) -> bool {
        !self.started && !self.queue.is_empty()
    }
}

struct Shared {
    state: Mutex<PoolState>,
    task_available: Condvar,
    task_done: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Priority-ordered pool of render worker threads
pub struct RenderThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_count: usize,
}

impl RenderThreadPool {
    /// Create a stopped pool that will run `thread_count` workers (at least 1)
    pub fn new(thread_count: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState::default()),
                task_available: Condvar::new(),
                task_done: Condvar::new(),
            }),
            workers: Mutex::new(Vec::new()),
            thread_count: thread_count.max(1),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().started
    }

    /// Spawn the worker threads
    ///
    /// Does nothing (with a warning) when already running.
    pub fn start(&self) -> Result<()> {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        {
            let mut state = self.shared.lock();
            if state.started {
                rhi_warn!(SOURCE, "start() on a running pool, ignored");
                return Ok(());
            }
            state.started = true;
            state.stopping = false;
        }

        for index in 0..self.thread_count {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("galaxy-rhi-worker-{}", index))
                .spawn(move || {
                    WORKER_INDEX.with(|slot| slot.set(Some(index)));
                    worker_loop(shared)
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    drop(workers);
                    self.stop();
                    return Err(Error::InitializationFailed(format!(
                        "failed to spawn render worker {}: {}", index, e
                    )));
                }
            }
        }

        // Tasks submitted while stopped are waiting
        self.shared.task_available.notify_all();
        rhi_info!(SOURCE, "Started {} worker thread(s)", self.thread_count);
        Ok(())
    }

    /// Stop the workers and join them
    ///
    /// Running tasks finish; queued tasks stay queued for the next `start()`.
    pub fn stop(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        {
            let mut state = self.shared.lock();
            if !state.started {
                return;
            }
            state.stopping = true;
        }
        self.shared.task_available.notify_all();

        for handle in workers.drain(..) {
            if handle.join().is_err() {
                rhi_error!(SOURCE, "A render worker thread panicked");
            }
        }

        {
            let mut state = self.shared.lock();
            state.started = false;
            state.stopping = false;
        }
        // Waiters re-check for stalled work
        self.shared.task_done.notify_all();
        rhi_info!(SOURCE, "Stopped");
    }

    /// Queue a task
    pub fn submit_task(&self, task: Box<dyn RenderTask>) {
        let mut state = self.shared.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.outstanding.insert(seq);
        state.stats.submitted += 1;
        state.queue.push(QueuedTask { priority: task.priority(), seq, task });
        drop(state);
        self.shared.task_available.notify_one();
    }

    /// Block until no task is queued or running
    ///
    /// Returns early, with a warning, when the pool is stopped and tasks are
    /// still queued.
    pub fn wait_for_completion(&self) {
        let mut state = self.shared.lock();
        loop {
            if state.pending() == 0 {
                return;
            }
            if state.stalled() && state.running == 0 {
                rhi_warn!(
                    SOURCE,
                    "wait_for_completion() on a stopped pool with {} queued task(s)",
                    state.queue.len()
                );
                return;
            }
            state = self.shared.task_done.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block until every task submitted before this call finished
    ///
    /// Tasks submitted after the call are not waited for.
    pub fn flush(&self) {
        let mut state = self.shared.lock();
        let barrier = state.next_seq;
        loop {
            match state.outstanding.first() {
                Some(&seq) if seq < barrier => {}
                _ => return,
            }
            if state.stalled() && state.running == 0 {
                rhi_warn!(SOURCE, "flush() on a stopped pool with queued tasks");
                return;
            }
            state = self.shared.task_done.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Queued plus running tasks
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending()
    }

    pub fn stats(&self) -> ThreadPoolStats {
        let state = self.shared.lock();
        ThreadPoolStats {
            queued: state.queue.len(),
            running: state.running,
            ..state.stats
        }
    }
}

impl Drop for RenderThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let queued = {
            let mut state = shared.lock();
            loop {
                if state.stopping {
                    return;
                }
                if let Some(queued) = state.queue.pop() {
                    state.running += 1;
                    break queued;
                }
                state = shared.task_available.wait(state).unwrap_or_else(|e| e.into_inner());
            }
        };

        let seq = queued.seq;
        let task_type = queued.task.task_type();
        let succeeded = run_task(queued.task, task_type);

        let mut state = shared.lock();
        state.running -= 1;
        state.outstanding.remove(&seq);
        if succeeded {
            state.stats.completed += 1;
        } else {
            state.stats.failed += 1;
        }
        drop(state);
        shared.task_done.notify_all();
    }
}

fn run_task(task: Box<dyn RenderTask>, task_type: RenderTaskType) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(move || task.execute())) {
        Ok(Ok(())) => {
            rhi_debug!(SOURCE, "{:?} task completed", task_type);
            true
        }
        Ok(Err(e)) => {
            rhi_error!(SOURCE, "{:?} task failed: {}", task_type, e);
            false
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            rhi_error!(SOURCE, "{:?} task panicked: {}", task_type, reason);
            false
        }
    }
}

#[cfg(test)]
#[path = "thread_pool_tests.rs"]
mod tests;
