/// Backend selection: backend identifiers, the backend registry and the
/// built-in legacy backend

mod backend_registry;
pub mod legacy;

pub use backend_registry::*;

use std::fmt;

/// Graphics backend identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RhiType {
    /// Immediate, globally-stateful API with a thread-bound context
    #[default]
    Legacy,
    /// Explicit API (command buffers, barriers, fences)
    Vulkan,
}

impl RhiType {
    pub fn name(&self) -> &'static str {
        match self {
            RhiType::Legacy => "legacy",
            RhiType::Vulkan => "vulkan",
        }
    }
}

impl fmt::Display for RhiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
