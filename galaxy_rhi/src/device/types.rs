/// Value types shared by the device contract and the command vocabulary

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use bitflags::bitflags;

use crate::device::{Framebuffer, Texture};

// ============================================================================
// Resource identity
// ============================================================================

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a GPU resource object
///
/// Backends assign one at creation; it never exposes the native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value (for logs)
    pub fn value(&self) -> u64 {
        self.0
    }
}

// ============================================================================
// Viewport / scissor
// ============================================================================

/// Viewport dimensions and depth range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Viewport with the default [0, 1] depth range
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height, min_depth: 0.0, max_depth: 1.0 }
    }
}

/// 2D rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect2D {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

// ============================================================================
// Clear
// ============================================================================

bitflags! {
    /// Which attachments a clear touches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Parameters of a clear operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearParams {
    /// Attachments to clear
    pub flags: ClearFlags,
    /// Color clear value (RGBA)
    pub color: [f32; 4],
    /// Depth clear value
    pub depth: f32,
    /// Stencil clear value
    pub stencil: u32,
}

impl ClearParams {
    /// Clear only the color attachments
    pub fn color(color: [f32; 4]) -> Self {
        Self { flags: ClearFlags::COLOR, color, depth: 1.0, stencil: 0 }
    }

    /// Clear color, depth and stencil
    pub fn all(color: [f32; 4], depth: f32, stencil: u32) -> Self {
        Self { flags: ClearFlags::all(), color, depth, stencil }
    }

    /// Add a depth clear
    pub fn with_depth(mut self, depth: f32) -> Self {
        self.flags |= ClearFlags::DEPTH;
        self.depth = depth;
        self
    }
}

// ============================================================================
// Draw
// ============================================================================

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    /// Number of triangles produced by `vertex_count` vertices (0 for points/lines)
    pub fn triangle_count(&self, vertex_count: u32) -> u32 {
        match self {
            PrimitiveTopology::TriangleList => vertex_count / 3,
            PrimitiveTopology::TriangleStrip => vertex_count.saturating_sub(2),
            _ => 0,
        }
    }
}

/// Index element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    /// Size of one index in bytes
    pub fn size_bytes(&self) -> u64 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Non-indexed draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawParams {
    pub topology: PrimitiveTopology,
    pub vertex_count: u32,
    pub first_vertex: u32,
}

impl DrawParams {
    pub fn new(topology: PrimitiveTopology, vertex_count: u32) -> Self {
        Self { topology, vertex_count, first_vertex: 0 }
    }
}

/// Indexed draw (index type comes from the bound vertex array)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawIndexedParams {
    pub topology: PrimitiveTopology,
    pub index_count: u32,
    pub first_index: u32,
    /// Value added to each index before fetching the vertex
    pub vertex_offset: i32,
}

impl DrawIndexedParams {
    pub fn new(topology: PrimitiveTopology, index_count: u32) -> Self {
        Self { topology, index_count, first_index: 0, vertex_offset: 0 }
    }
}

// ============================================================================
// Barriers and render passes
// ============================================================================

/// Usage state of a texture, as seen by explicit backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    ColorAttachment,
    DepthStencilAttachment,
    ShaderRead,
    TransferSrc,
    TransferDst,
    Present,
}

/// State transition of one texture
///
/// Explicit backends turn this into a pipeline barrier; implicit ones ignore it.
#[derive(Debug, Clone)]
pub struct ResourceBarrier {
    pub texture: Arc<dyn Texture>,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl PartialEq for ResourceBarrier {
    fn eq(&self, other: &Self) -> bool {
        self.texture.id() == other.texture.id()
            && self.before == other.before
            && self.after == other.after
    }
}

/// What happens to attachment contents at the start of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

/// Start of a render pass
#[derive(Debug, Clone)]
pub struct RenderPassBegin {
    /// Target framebuffer (`None` = device backbuffer)
    pub framebuffer: Option<Arc<dyn Framebuffer>>,
    pub load_op: LoadOp,
    /// Used when `load_op == LoadOp::Clear`
    pub clear: ClearParams,
}

impl RenderPassBegin {
    /// Pass that clears its target with `clear`
    pub fn clearing(framebuffer: Option<Arc<dyn Framebuffer>>, clear: ClearParams) -> Self {
        Self { framebuffer, load_op: LoadOp::Clear, clear }
    }

    /// Pass that keeps the previous contents
    pub fn loading(framebuffer: Option<Arc<dyn Framebuffer>>) -> Self {
        Self { framebuffer, load_op: LoadOp::Load, clear: ClearParams::color([0.0; 4]) }
    }
}

impl PartialEq for RenderPassBegin {
    fn eq(&self, other: &Self) -> bool {
        let same_target = match (&self.framebuffer, &other.framebuffer) {
            (Some(a), Some(b)) => a.id() == b.id(),
            (None, None) => true,
            _ => false,
        };
        same_target && self.load_op == other.load_op && self.clear == other.clear
    }
}
