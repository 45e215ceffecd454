/// Legacy backend: immediate API with a single thread-bound context

mod legacy_context;
mod legacy_resources;
mod legacy_device;

pub use legacy_context::{LegacyContext, ObjectName};
pub(crate) use legacy_context::{decode_rgba8, encode_color, ContextState, GlObject};
pub use legacy_resources::*;
pub use legacy_device::*;
