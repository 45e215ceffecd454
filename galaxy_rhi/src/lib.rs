/*!
# Galaxy RHI

Backend-agnostic render hardware interface.

This crate provides the device contract every graphics backend implements,
plus a thread-safe pipeline for recording and replaying graphics work:

- **Device**: resource creation, frame bracketing and immediate operations
- **CommandList**: thread-safe recording of commands between `begin`/`end`
- **CommandQueue**: FIFO execution of submitted command lists on a device
- **Pipeline parameters**: dirty-tracked uniform cache, pushed once per change
- **RenderThreadPool**: priority-ordered worker pool for render tasks
- **Rhi**: startup/shutdown of the above, provided through a `ServiceRegistry`

The legacy backend (thread-bound context, immediate submission) is built in.
The Vulkan backend lives in `galaxy_rhi_vulkan` and registers itself in a
`BackendRegistry`.
*/

// Internal modules
mod error;
mod config;
mod instance;
mod service_registry;
pub mod log;
pub mod device;
pub mod command;
pub mod task;
pub mod backend;

// Main rhi namespace module
pub mod rhi {
    // Error types
    pub use crate::error::{Error, Result};

    // Orchestrator, configuration and dependency injection
    pub use crate::instance::Rhi;
    pub use crate::config::RhiConfig;
    pub use crate::service_registry::ServiceRegistry;
    pub use crate::backend::{BackendRegistry, DeviceFactory, RhiType};

    // Logging sub-module (types only; rhi_* macros are exported at the crate root)
    pub mod log {
        pub use crate::log::{CapturingLogger, DefaultLogger, LogEntry, LogSeverity, Logger};
    }

    // Device contract and resource descriptors
    pub mod device {
        pub use crate::device::*;
    }

    // Command recording and execution
    pub mod command {
        pub use crate::command::*;
    }

    // Render tasks and thread pool
    pub mod task {
        pub use crate::task::*;
    }

    // Built-in legacy backend
    pub mod legacy {
        pub use crate::backend::legacy::{
            LegacyBuffer, LegacyContext, LegacyDevice, LegacyFramebuffer, LegacyPipeline,
            LegacyShader, LegacyTexture, LegacyVertexArray, ObjectName,
        };
    }
}

// Re-export math library at crate root
pub use glam;
