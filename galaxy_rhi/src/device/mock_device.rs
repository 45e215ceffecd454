/// Mock device for unit tests (no GPU required)
///
/// Every device call is recorded as a [`DeviceCall`] so command list and
/// command queue tests can assert on exactly what reached the backend.
/// Mock resources count their own teardown.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::RhiType;
use crate::device::{
    Buffer, BufferDesc, BufferType, ClearParams, Device, DeviceCapabilities, DeviceFeatures,
    DeviceStats, DrawIndexedParams, DrawParams, Framebuffer, FramebufferDesc, IndexBufferBinding,
    LoadOp, ParameterCache, Pipeline, PipelineDesc, PipelineParameters, PrimitiveTopology, Rect2D,
    RenderPassBegin, Resource, ResourceBarrier, ResourceId, ResourceState, Shader, ShaderDesc,
    ShaderStage, Texture, TextureDesc, TextureInfo, UniformValue, VertexArray, VertexArrayDesc,
    VertexBufferBinding, VertexLayout, Viewport,
};
use crate::error::Result;
use crate::rhi_bail;

// ============================================================================
// Recorded calls
// ============================================================================

/// One call received by the mock device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateBuffer(String),
    CreateTexture(String),
    CreateShader(String),
    CreatePipeline(String),
    CreateFramebuffer(String),
    CreateVertexArray(String),
    BeginFrame,
    EndFrame,
    Present,
    Clear(ClearParams),
    Draw(DrawParams),
    DrawIndexed(DrawIndexedParams),
    BindPipeline(ResourceId),
    BindVertexArray(ResourceId),
    BindTexture { texture: ResourceId, slot: u32 },
    BindFramebuffer(Option<ResourceId>),
    SetViewport(Viewport),
    SetScissor(Rect2D),
    ResourceBarrier { texture: ResourceId, before: ResourceState, after: ResourceState },
    BlitFramebufferToScreen(ResourceId),
    BeginRenderPass { framebuffer: Option<ResourceId>, load_op: LoadOp },
    EndRenderPass,
    WaitIdle,
}

/// Shared log of the calls received by a [`MockDevice`]
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<DeviceCall>>>);

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, Vec<DeviceCall>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, call: DeviceCall) {
        self.lock().push(call);
    }

    /// Copy of every recorded call, in order
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().clone()
    }

    /// Recorded calls excluding resource creation
    pub fn operations(&self) -> Vec<DeviceCall> {
        self.lock()
            .iter()
            .filter(|call| !matches!(
                call,
                DeviceCall::CreateBuffer(_)
                    | DeviceCall::CreateTexture(_)
                    | DeviceCall::CreateShader(_)
                    | DeviceCall::CreatePipeline(_)
                    | DeviceCall::CreateFramebuffer(_)
                    | DeviceCall::CreateVertexArray(_)
            ))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

// ============================================================================
// Mock resources
// ============================================================================

/// Counts resource teardowns
#[derive(Debug, Clone, Default)]
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

macro_rules! mock_resource {
    ($name:ident) => {
        impl Resource for $name {
            fn id(&self) -> ResourceId {
                self.id
            }

            fn debug_name(&self) -> &str {
                &self.name
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.drops.hit();
            }
        }
    };
}

#[derive(Debug)]
pub struct MockBuffer {
    id: ResourceId,
    name: String,
    size: u64,
    buffer_type: BufferType,
    drops: DropCounter,
}

mock_resource!(MockBuffer);

impl Buffer for MockBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.size {
            rhi_bail!("galaxy_rhi::MockDevice", "Buffer '{}' update out of range", self.name);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockTexture {
    id: ResourceId,
    name: String,
    info: TextureInfo,
    drops: DropCounter,
}

mock_resource!(MockTexture);

impl Texture for MockTexture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }
}

#[derive(Debug)]
pub struct MockShader {
    id: ResourceId,
    name: String,
    stage: ShaderStage,
    entry_point: String,
    drops: DropCounter,
}

mock_resource!(MockShader);

impl Shader for MockShader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

#[derive(Debug)]
pub struct MockPipeline {
    id: ResourceId,
    name: String,
    topology: PrimitiveTopology,
    parameters: PipelineParameters,
    /// Number of parameter pushes performed
    pushes: Arc<AtomicUsize>,
    /// Values received by the last push
    pushed: Mutex<Vec<(String, UniformValue)>>,
    drops: DropCounter,
}

mock_resource!(MockPipeline);

impl MockPipeline {
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn last_pushed(&self) -> Vec<(String, UniformValue)> {
        self.pushed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Pipeline for MockPipeline {
    fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    fn set_uniform(&self, name: &str, value: UniformValue) {
        self.parameters.set_uniform(name, value);
    }

    fn commit_parameters(&self) -> bool {
        let Some(values) = self.parameters.take_dirty() else {
            return false;
        };
        *self.pushed.lock().unwrap_or_else(|e| e.into_inner()) = values;
        self.pushes.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn has_dirty_parameters(&self) -> bool {
        self.parameters.has_dirty()
    }

    fn parameter_cache(&self) -> ParameterCache {
        self.parameters.snapshot()
    }
}

#[derive(Debug)]
pub struct MockFramebuffer {
    id: ResourceId,
    name: String,
    width: u32,
    height: u32,
    color_attachments: Vec<Arc<dyn Texture>>,
    depth_attachment: Option<Arc<dyn Texture>>,
    drops: DropCounter,
}

mock_resource!(MockFramebuffer);

impl Framebuffer for MockFramebuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn color_attachments(&self) -> &[Arc<dyn Texture>] {
        &self.color_attachments
    }

    fn depth_attachment(&self) -> Option<&Arc<dyn Texture>> {
        self.depth_attachment.as_ref()
    }
}

#[derive(Debug)]
pub struct MockVertexArray {
    id: ResourceId,
    name: String,
    layout: VertexLayout,
    vertex_buffers: Vec<VertexBufferBinding>,
    index_buffer: Option<IndexBufferBinding>,
    drops: DropCounter,
}

mock_resource!(MockVertexArray);

impl VertexArray for MockVertexArray {
    fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    fn vertex_buffers(&self) -> &[VertexBufferBinding] {
        &self.vertex_buffers
    }

    fn index_buffer(&self) -> Option<&IndexBufferBinding> {
        self.index_buffer.as_ref()
    }
}

// ============================================================================
// Mock device
// ============================================================================

type DrawHook = Box<dyn Fn() + Send>;

/// Recording device used by unit tests
pub struct MockDevice {
    log: CallLog,
    drops: DropCounter,
    stats: DeviceStats,
    bound_pipeline: Option<Arc<dyn Pipeline>>,
    on_draw: Option<DrawHook>,
    fail_draws: bool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            log: CallLog::default(),
            drops: DropCounter::default(),
            stats: DeviceStats::default(),
            bound_pipeline: None,
            on_draw: None,
            fail_draws: false,
        }
    }

    /// Handle on the recorded calls (stays valid after the device moved)
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    /// Teardown counter shared by every resource this device creates
    pub fn drop_counter(&self) -> DropCounter {
        self.drops.clone()
    }

    /// Run `hook` inside every draw call, while the device is in use
    pub fn set_on_draw<F: Fn() + Send + 'static>(&mut self, hook: F) {
        self.on_draw = Some(Box::new(hook));
    }

    /// Make every draw return an error
    pub fn set_fail_draws(&mut self, fail: bool) {
        self.fail_draws = fail;
    }

    fn record_draw(&mut self, topology: PrimitiveTopology, vertices: u32) -> Result<()> {
        if let Some(hook) = &self.on_draw {
            hook();
        }
        if self.fail_draws {
            rhi_bail!("galaxy_rhi::MockDevice", "Draw rejected");
        }
        if let Some(pipeline) = &self.bound_pipeline {
            if pipeline.commit_parameters() {
                self.stats.parameter_commits += 1;
            }
        }
        self.stats.draw_calls += 1;
        self.stats.vertices += vertices as u64;
        self.stats.triangles += topology.triangle_count(vertices) as u64;
        Ok(())
    }
}

impl Device for MockDevice {
    fn backend(&self) -> RhiType {
        RhiType::Legacy
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>> {
        self.log.push(DeviceCall::CreateBuffer(desc.debug_name.clone()));
        Ok(Arc::new(MockBuffer {
            id: ResourceId::next(),
            name: desc.debug_name.clone(),
            size: desc.size,
            buffer_type: desc.buffer_type,
            drops: self.drops.clone(),
        }))
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<Arc<dyn Texture>> {
        self.log.push(DeviceCall::CreateTexture(desc.debug_name.clone()));
        Ok(Arc::new(MockTexture {
            id: ResourceId::next(),
            name: desc.debug_name.clone(),
            info: TextureInfo::from(desc),
            drops: self.drops.clone(),
        }))
    }

    fn create_shader(&mut self, desc: &ShaderDesc) -> Result<Arc<dyn Shader>> {
        self.log.push(DeviceCall::CreateShader(desc.debug_name.clone()));
        Ok(Arc::new(MockShader {
            id: ResourceId::next(),
            name: desc.debug_name.clone(),
            stage: desc.stage,
            entry_point: desc.entry_point.clone(),
            drops: self.drops.clone(),
        }))
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<Arc<dyn Pipeline>> {
        self.log.push(DeviceCall::CreatePipeline(desc.debug_name.clone()));
        Ok(Arc::new(MockPipeline {
            id: ResourceId::next(),
            name: desc.debug_name.clone(),
            topology: desc.topology,
            parameters: PipelineParameters::new(),
            pushes: Arc::new(AtomicUsize::new(0)),
            pushed: Mutex::new(Vec::new()),
            drops: self.drops.clone(),
        }))
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>> {
        self.log.push(DeviceCall::CreateFramebuffer(desc.debug_name.clone()));
        Ok(Arc::new(MockFramebuffer {
            id: ResourceId::next(),
            name: desc.debug_name.clone(),
            width: desc.width,
            height: desc.height,
            color_attachments: desc.color_attachments.clone(),
            depth_attachment: desc.depth_attachment.clone(),
            drops: self.drops.clone(),
        }))
    }

    fn create_vertex_array(&mut self, desc: &VertexArrayDesc) -> Result<Arc<dyn VertexArray>> {
        self.log.push(DeviceCall::CreateVertexArray(desc.debug_name.clone()));
        Ok(Arc::new(MockVertexArray {
            id: ResourceId::next(),
            name: desc.debug_name.clone(),
            layout: desc.layout.clone(),
            vertex_buffers: desc.vertex_buffers.clone(),
            index_buffer: desc.index_buffer.clone(),
            drops: self.drops.clone(),
        }))
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.log.push(DeviceCall::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.log.push(DeviceCall::EndFrame);
        self.stats.frames += 1;
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.log.push(DeviceCall::Present);
        Ok(())
    }

    fn clear(&mut self, params: &ClearParams) -> Result<()> {
        self.log.push(DeviceCall::Clear(*params));
        Ok(())
    }

    fn draw(&mut self, params: &DrawParams) -> Result<()> {
        self.log.push(DeviceCall::Draw(*params));
        self.record_draw(params.topology, params.vertex_count)
    }

    fn draw_indexed(&mut self, params: &DrawIndexedParams) -> Result<()> {
        self.log.push(DeviceCall::DrawIndexed(*params));
        self.record_draw(params.topology, params.index_count)
    }

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn Pipeline>) -> Result<()> {
        self.log.push(DeviceCall::BindPipeline(pipeline.id()));
        self.bound_pipeline = Some(Arc::clone(pipeline));
        Ok(())
    }

    fn bind_vertex_array(&mut self, vertex_array: &Arc<dyn VertexArray>) -> Result<()> {
        self.log.push(DeviceCall::BindVertexArray(vertex_array.id()));
        Ok(())
    }

    fn bind_texture(&mut self, texture: &Arc<dyn Texture>, slot: u32) -> Result<()> {
        self.log.push(DeviceCall::BindTexture { texture: texture.id(), slot });
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<&Arc<dyn Framebuffer>>) -> Result<()> {
        self.log.push(DeviceCall::BindFramebuffer(framebuffer.map(|fb| fb.id())));
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.log.push(DeviceCall::SetViewport(viewport));
        Ok(())
    }

    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()> {
        self.log.push(DeviceCall::SetScissor(scissor));
        Ok(())
    }

    fn resource_barrier(&mut self, barrier: &ResourceBarrier) -> Result<()> {
        self.log.push(DeviceCall::ResourceBarrier {
            texture: barrier.texture.id(),
            before: barrier.before,
            after: barrier.after,
        });
        Ok(())
    }

    fn blit_framebuffer_to_screen(&mut self, framebuffer: &Arc<dyn Framebuffer>) -> Result<()> {
        self.log.push(DeviceCall::BlitFramebufferToScreen(framebuffer.id()));
        Ok(())
    }

    fn begin_render_pass(&mut self, begin: &RenderPassBegin) -> Result<()> {
        self.log.push(DeviceCall::BeginRenderPass {
            framebuffer: begin.framebuffer.as_ref().map(|fb| fb.id()),
            load_op: begin.load_op,
        });
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.log.push(DeviceCall::EndRenderPass);
        Ok(())
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            max_texture_size: 4096,
            max_color_attachments: 8,
            max_vertex_attributes: 16,
            max_texture_slots: 16,
            features: DeviceFeatures::MULTITHREADING,
        }
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }

    fn make_context_current(&mut self, _thread_index: usize) -> bool {
        true
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.log.push(DeviceCall::WaitIdle);
        Ok(())
    }
}

#[cfg(test)]
#[path = "mock_device_tests.rs"]
mod tests;
