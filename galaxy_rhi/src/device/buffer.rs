/// Buffer trait and buffer descriptor

use crate::error::Result;
use crate::device::Resource;

/// What a buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// Vertex buffer
    Vertex,
    /// Index buffer
    Index,
    /// Uniform/constant buffer
    Uniform,
    /// Storage buffer
    Storage,
}

/// Expected update frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Written once at creation
    Static,
    /// Updated occasionally
    Dynamic,
    /// Rewritten every frame
    Stream,
}

/// Descriptor for creating a buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Bind target
    pub buffer_type: BufferType,
    /// Update frequency hint
    pub usage: BufferUsage,
    /// Size in bytes
    pub size: u64,
    /// Optional initial contents (at most `size` bytes)
    pub data: Option<Vec<u8>>,
    /// Debug name
    pub debug_name: String,
}

impl BufferDesc {
    /// Static buffer initialised with `data`
    pub fn with_data(buffer_type: BufferType, data: Vec<u8>, debug_name: &str) -> Self {
        Self {
            buffer_type,
            usage: BufferUsage::Static,
            size: data.len() as u64,
            data: Some(data),
            debug_name: debug_name.to_string(),
        }
    }
}

/// Buffer resource trait
///
/// Implemented by backend-specific buffer types.
/// The buffer is destroyed when the last reference is dropped.
pub trait Buffer: Resource {
    /// Size in bytes
    fn size(&self) -> u64;

    /// Bind target the buffer was created for
    fn buffer_type(&self) -> BufferType;

    /// Update buffer data
    ///
    /// # Arguments
    ///
    /// * `offset` - Offset into the buffer in bytes
    /// * `data` - Data to write
    fn update(&self, offset: u64, data: &[u8]) -> Result<()>;
}
