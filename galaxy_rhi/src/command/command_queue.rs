/// Command queue
///
/// Collects finished command lists from any thread and replays them on the
/// device in submission order. One execution pass runs at a time; lists
/// submitted while a pass is running are left for the next pass.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::command::CommandList;
use crate::device::SharedDevice;
use crate::{rhi_debug, rhi_info, rhi_trace, rhi_warn};

const SOURCE: &str = "galaxy_rhi::CommandQueue";

#[derive(Default)]
struct QueueState {
    pending: Vec<Arc<CommandList>>,
    executing: bool,
}

/// FIFO queue of command lists bound to one device
pub struct CommandQueue {
    device: SharedDevice,
    state: Mutex<QueueState>,
    /// Signalled when an execution pass ends
    idle: Condvar,
    thread_count: AtomicUsize,
}

/// Clears the executing flag when a pass ends, including by panic
struct ExecutionGuard<'a> {
    queue: &'a CommandQueue,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.queue.lock().executing = false;
        self.queue.idle.notify_all();
    }
}

impl CommandQueue {
    /// Create a queue executing on `device`
    pub fn new(device: SharedDevice) -> Self {
        Self {
            device,
            state: Mutex::new(QueueState::default()),
            idle: Condvar::new(),
            thread_count: AtomicUsize::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Device the queue executes on
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Create a new, empty command list
    pub fn create_command_list(&self, debug_name: &str) -> Arc<CommandList> {
        Arc::new(CommandList::new(debug_name))
    }

    /// Queue a command list for the next execution pass
    ///
    /// Empty lists are dropped. A list still recording is queued as is and
    /// skipped at execution.
    pub fn submit_command_list(&self, list: Arc<CommandList>) {
        if list.is_empty() {
            rhi_warn!(SOURCE, "Dropping empty command list '{}'", list.debug_name());
            return;
        }
        rhi_trace!(SOURCE, "Submitted '{}' ({} commands)", list.debug_name(), list.command_count());
        self.lock().pending.push(list);
    }

    /// Execute every pending list, in submission order
    ///
    /// Returns the number of lists executed, or 0 immediately when another
    /// pass is already running (including a call from inside that pass).
    pub fn execute_all(&self) -> usize {
        let batch = {
            let mut state = self.lock();
            if state.executing {
                rhi_debug!(SOURCE, "execute_all() while already executing, skipped");
                return 0;
            }
            state.executing = true;
            std::mem::take(&mut state.pending)
        };
        let _guard = ExecutionGuard { queue: self };

        if batch.is_empty() {
            return 0;
        }

        let mut device = self.device.lock().unwrap_or_else(|e| e.into_inner());
        for list in &batch {
            list.execute(&mut *device);
        }

        rhi_debug!(SOURCE, "Executed {} command list(s)", batch.len());
        batch.len()
    }

    /// Block until no execution pass is running
    pub fn wait(&self) {
        let mut state = self.lock();
        while state.executing {
            state = self.idle.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Set the number of threads the queue may use (at least 1)
    ///
    /// Execution stays sequential; the value is configuration only.
    pub fn set_thread_count(&self, count: usize) {
        let count = count.max(1);
        self.thread_count.store(count, Ordering::Relaxed);
        rhi_info!(SOURCE, "Thread count set to {}", count);
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count.load(Ordering::Relaxed)
    }

    /// Number of lists waiting for the next pass
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_executing(&self) -> bool {
        self.lock().executing
    }
}

#[cfg(test)]
#[path = "command_queue_tests.rs"]
mod tests;
