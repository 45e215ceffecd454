/// Vertex array trait and descriptor
///
/// A vertex array groups the vertex buffers, their layout and an optional
/// index buffer into one bindable object.

use std::sync::Arc;

use crate::device::{Buffer, IndexType, Resource, VertexLayout};

/// Vertex buffer attached to one layout binding
#[derive(Debug, Clone)]
pub struct VertexBufferBinding {
    pub binding: u32,
    pub buffer: Arc<dyn Buffer>,
    /// Offset in bytes
    pub offset: u64,
}

/// Index buffer of a vertex array
#[derive(Debug, Clone)]
pub struct IndexBufferBinding {
    pub buffer: Arc<dyn Buffer>,
    pub index_type: IndexType,
    /// Offset in bytes
    pub offset: u64,
}

impl IndexBufferBinding {
    /// Number of indices stored after `offset`
    pub fn index_count(&self) -> u64 {
        self.buffer.size().saturating_sub(self.offset) / self.index_type.size_bytes()
    }
}

/// Descriptor for creating a vertex array
#[derive(Debug, Clone)]
pub struct VertexArrayDesc {
    pub layout: VertexLayout,
    pub vertex_buffers: Vec<VertexBufferBinding>,
    pub index_buffer: Option<IndexBufferBinding>,
    pub debug_name: String,
}

/// Vertex array resource trait
pub trait VertexArray: Resource {
    fn layout(&self) -> &VertexLayout;

    fn vertex_buffers(&self) -> &[VertexBufferBinding];

    fn index_buffer(&self) -> Option<&IndexBufferBinding>;

    /// Number of vertices addressable through binding 0 (0 when unknown)
    fn vertex_count(&self) -> u64 {
        let Some(vb) = self.vertex_buffers().iter().find(|vb| vb.binding == 0) else {
            return 0;
        };
        match self.layout().stride(0) {
            Some(stride) if stride > 0 => vb.buffer.size().saturating_sub(vb.offset) / stride as u64,
            _ => 0,
        }
    }
}
