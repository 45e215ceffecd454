/// Base trait of every GPU resource object

use std::any::Any;
use std::fmt::Debug;

use crate::device::ResourceId;

/// Common behaviour of buffers, textures, shaders, pipelines, framebuffers and
/// vertex arrays.
///
/// Resources are handed out as `Arc<dyn Trait>`. The native object is released
/// when the last `Arc` is dropped; the backend decides on which thread.
pub trait Resource: Send + Sync + Debug + Any {
    /// Process-unique identity
    fn id(&self) -> ResourceId;

    /// Debug name given in the descriptor
    fn debug_name(&self) -> &str;

    /// Downcast hook for the owning backend
    fn as_any(&self) -> &dyn Any;
}
