/// Task module: render tasks and the render thread pool

mod render_task;
mod thread_pool;

pub use render_task::*;
pub use thread_pool::*;
