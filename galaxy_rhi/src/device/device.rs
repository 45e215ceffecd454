/// Device trait: the contract every backend implements
///
/// Resource creation returns shared objects whose last release tears the
/// native object down. Immediate operations map 1:1 onto the command
/// vocabulary so a recorded command list can be replayed on any backend.

use std::sync::{Arc, Mutex};
use bitflags::bitflags;

use crate::backend::RhiType;
use crate::device::{
    Buffer, BufferDesc, ClearParams, DrawIndexedParams, DrawParams, Framebuffer,
    FramebufferDesc, Pipeline, PipelineDesc, Rect2D, RenderPassBegin, ResourceBarrier,
    Shader, ShaderDesc, Texture, TextureDesc, VertexArray, VertexArrayDesc, Viewport,
};
use crate::error::Result;

/// Device shared between the command queue, the thread pool and the application
pub type SharedDevice = Arc<Mutex<dyn Device>>;

bitflags! {
    /// Optional device features
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceFeatures: u32 {
        /// Resources may be created from any thread
        const MULTITHREADING = 1 << 0;
        const COMPUTE = 1 << 1;
        const GEOMETRY_SHADER = 1 << 2;
        const TESSELLATION = 1 << 3;
    }
}

/// Static limits and features of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub max_texture_size: u32,
    pub max_color_attachments: u32,
    pub max_vertex_attributes: u32,
    pub max_texture_slots: u32,
    pub features: DeviceFeatures,
}

impl DeviceCapabilities {
    pub fn supports(&self, features: DeviceFeatures) -> bool {
        self.features.contains(features)
    }
}

/// Running counters of a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub draw_calls: u64,
    pub vertices: u64,
    pub triangles: u64,
    pub frames: u64,
    /// Resources created and not yet destroyed
    pub live_resources: u64,
    pub destroyed_resources: u64,
    /// Parameter cache pushes performed by pipelines
    pub parameter_commits: u64,
    /// Releases waiting for the owning thread or the frame fence
    pub pending_destroys: u64,
}

/// Backend device
///
/// Methods taking `&mut self` are called with the [`SharedDevice`] lock held.
pub trait Device: Send {
    /// Backend implemented by this device
    fn backend(&self) -> RhiType;

    // ===== RESOURCE CREATION =====

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>>;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<Arc<dyn Texture>>;

    fn create_shader(&mut self, desc: &ShaderDesc) -> Result<Arc<dyn Shader>>;

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<Arc<dyn Pipeline>>;

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>>;

    fn create_vertex_array(&mut self, desc: &VertexArrayDesc) -> Result<Arc<dyn VertexArray>>;

    // ===== FRAME =====

    /// Start a frame (explicit backends open the frame command buffer here)
    fn begin_frame(&mut self) -> Result<()>;

    /// Finish a frame (explicit backends submit and wait here)
    fn end_frame(&mut self) -> Result<()>;

    /// Make the finished frame visible in the backbuffer
    fn present(&mut self) -> Result<()>;

    // ===== IMMEDIATE OPERATIONS =====

    fn clear(&mut self, params: &ClearParams) -> Result<()>;

    fn draw(&mut self, params: &DrawParams) -> Result<()>;

    fn draw_indexed(&mut self, params: &DrawIndexedParams) -> Result<()>;

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn Pipeline>) -> Result<()>;

    fn bind_vertex_array(&mut self, vertex_array: &Arc<dyn VertexArray>) -> Result<()>;

    /// Bind a texture to a sampler slot
    ///
    /// # Arguments
    ///
    /// * `texture` - Texture to bind
    /// * `slot` - Slot index (below `capabilities().max_texture_slots`)
    fn bind_texture(&mut self, texture: &Arc<dyn Texture>, slot: u32) -> Result<()>;

    /// Bind a render target (`None` = device backbuffer)
    fn bind_framebuffer(&mut self, framebuffer: Option<&Arc<dyn Framebuffer>>) -> Result<()>;

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;

    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()>;

    fn resource_barrier(&mut self, barrier: &ResourceBarrier) -> Result<()>;

    /// Copy a framebuffer's first color attachment to the backbuffer, scaled to fit
    fn blit_framebuffer_to_screen(&mut self, framebuffer: &Arc<dyn Framebuffer>) -> Result<()>;

    fn begin_render_pass(&mut self, begin: &RenderPassBegin) -> Result<()>;

    fn end_render_pass(&mut self) -> Result<()>;

    // ===== QUERIES =====

    fn capabilities(&self) -> DeviceCapabilities;

    fn stats(&self) -> DeviceStats;

    /// Whether resources may be created from threads other than the creating one
    fn supports_multithreading(&self) -> bool {
        self.capabilities().supports(DeviceFeatures::MULTITHREADING)
    }

    /// Bind the backend's graphics context to the calling thread
    ///
    /// Context-free backends always return `true`.
    fn make_context_current(&mut self, thread_index: usize) -> bool;

    /// Block until the device finished all submitted work
    fn wait_idle(&mut self) -> Result<()>;
}
