/// Render tasks: units of work run by the render thread pool

use std::fmt;
use std::sync::Arc;

use crate::command::CommandList;
use crate::device::SharedDevice;
use crate::error::{Error, Result};
use crate::task::current_worker_index;

/// Category of a render task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTaskType {
    /// Replay of a recorded command list
    CommandBufferExec,
    /// Buffer/texture upload
    ResourceUpdate,
    GeometryProcessing,
    ShaderCompilation,
}

/// A prioritized unit of work, executed exactly once
pub trait RenderTask: Send {
    fn task_type(&self) -> RenderTaskType;

    /// Higher runs first
    fn priority(&self) -> i32;

    /// Run the task, consuming it
    fn execute(self: Box<Self>) -> Result<()>;
}

/// Task wrapping a closure
pub struct FnRenderTask {
    task_type: RenderTaskType,
    priority: i32,
    func: Box<dyn FnOnce() -> Result<()> + Send>,
}

impl FnRenderTask {
    pub fn new<F>(task_type: RenderTaskType, priority: i32, func: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self { task_type, priority, func: Box::new(func) }
    }
}

impl fmt::Debug for FnRenderTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRenderTask")
            .field("task_type", &self.task_type)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl RenderTask for FnRenderTask {
    fn task_type(&self) -> RenderTaskType {
        self.task_type
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn execute(self: Box<Self>) -> Result<()> {
        (self.func)()
    }
}

/// Replays a finished command list on a shared device
///
/// The device context is bound to the running worker first. The task fails
/// when the context cannot be bound, the list is still recording, or any
/// command fails.
pub struct CommandListTask {
    device: SharedDevice,
    list: Arc<CommandList>,
    priority: i32,
}

impl CommandListTask {
    pub fn new(device: SharedDevice, list: Arc<CommandList>, priority: i32) -> Self {
        Self { device, list, priority }
    }
}

impl RenderTask for CommandListTask {
    fn task_type(&self) -> RenderTaskType {
        RenderTaskType::CommandBufferExec
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn execute(self: Box<Self>) -> Result<()> {
        let mut device = self.device.lock().unwrap_or_else(|e| e.into_inner());
        let worker = current_worker_index().unwrap_or(0);
        if !device.make_context_current(worker) {
            return Err(Error::ContextNotCurrent(format!(
                "cannot bind the device context to worker {} for '{}'",
                worker,
                self.list.debug_name()
            )));
        }
        self.list.try_execute(&mut *device).map(|_| ())
    }
}
