/// Legacy device: headless implementation of an immediate, globally-stateful
/// graphics API
///
/// Every operation must come from the thread owning the context. Draws need a
/// bound program and vertex array; clears and blits write into CPU-side
/// storage (textures and an RGBA8 backbuffer) so results can be inspected.

use std::sync::{Arc, Mutex};
use rustc_hash::FxHashMap;

use crate::backend::RhiType;
use crate::backend::legacy::{
    decode_rgba8, encode_color, ContextState, GlObject, LegacyBuffer, LegacyContext,
    LegacyFramebuffer, LegacyPipeline, LegacyShader, LegacyTexture, LegacyVertexArray, ObjectName,
};
use crate::config::RhiConfig;
use crate::device::{
    Buffer, BufferDesc, BufferType, ClearFlags, ClearParams, Device, DeviceCapabilities,
    DeviceFeatures, DeviceStats, DrawIndexedParams, DrawParams, Framebuffer, FramebufferDesc,
    LoadOp, Pipeline, PipelineDesc, PipelineParameters, PrimitiveTopology, Rect2D,
    RenderPassBegin, ResourceBarrier, ResourceId, Shader, ShaderCode, ShaderDesc, ShaderStage,
    SharedDevice, Texture, TextureDesc, TextureFormat, TextureInfo, VertexArray, VertexArrayDesc,
    Viewport,
};
use crate::error::{Error, Result};
use crate::{rhi_debug, rhi_error, rhi_info, rhi_trace};

const SOURCE: &str = "galaxy_rhi::legacy";

const MAX_TEXTURE_SLOTS: usize = 16;
const MAX_VERTEX_ATTRIBUTES: u32 = 16;
const MAX_COLOR_ATTACHMENTS: u32 = 8;

/// Downcast a resource to the legacy type and check it was created by `context`
fn legacy<'a, T: 'static>(
    resource: &'a dyn std::any::Any,
    debug_name: &str,
    context: &Arc<LegacyContext>,
    belongs: impl Fn(&T, &Arc<LegacyContext>) -> bool,
) -> Result<&'a T> {
    match resource.downcast_ref::<T>() {
        Some(object) if belongs(object, context) => Ok(object),
        _ => Err(Error::InvalidResource(format!(
            "'{}' was not created by this legacy device", debug_name
        ))),
    }
}

/// Device implementing [`RhiType::Legacy`]
pub struct LegacyDevice {
    context: Arc<LegacyContext>,
    max_texture_size: u32,
    viewport: Viewport,
    scissor: Option<Rect2D>,
    bound_pipeline: Option<Arc<dyn Pipeline>>,
    bound_vertex_array: Option<Arc<dyn VertexArray>>,
    bound_framebuffer: Option<Arc<dyn Framebuffer>>,
    bound_textures: Vec<Option<Arc<dyn Texture>>>,
    in_render_pass: bool,
    in_frame: bool,
}

impl LegacyDevice {
    /// Create the device and make its context current on the calling thread
    pub fn new(config: &RhiConfig) -> Result<Self> {
        if config.backbuffer_width == 0 || config.backbuffer_height == 0 {
            return Err(Error::InitializationFailed(format!(
                "invalid backbuffer size {}x{}",
                config.backbuffer_width, config.backbuffer_height
            )));
        }

        rhi_info!(
            SOURCE,
            "Legacy context created for '{}' ({}x{})",
            config.app_name,
            config.backbuffer_width,
            config.backbuffer_height
        );

        Ok(Self {
            context: Arc::new(LegacyContext::new(config.backbuffer_width, config.backbuffer_height)),
            max_texture_size: config.max_texture_size,
            viewport: Viewport::new(
                0.0,
                0.0,
                config.backbuffer_width as f32,
                config.backbuffer_height as f32,
            ),
            scissor: None,
            bound_pipeline: None,
            bound_vertex_array: None,
            bound_framebuffer: None,
            bound_textures: vec![None; MAX_TEXTURE_SLOTS],
            in_render_pass: false,
            in_frame: false,
        })
    }

    /// Factory used by the backend registry
    pub fn create_shared(config: &RhiConfig) -> Result<SharedDevice> {
        let device: SharedDevice = Arc::new(Mutex::new(Self::new(config)?));
        Ok(device)
    }

    pub fn context(&self) -> &Arc<LegacyContext> {
        &self.context
    }

    /// Release the context from the calling thread so another thread can take it
    pub fn release_current_context(&self) -> bool {
        self.context.release_current()
    }

    /// RGBA8 value of a backbuffer pixel
    pub fn backbuffer_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.context.lock().backbuffer.pixel(x, y)
    }

    /// RGBA8 value of a texel of mip 0, layer 0
    pub fn texture_pixel(&self, texture: &Arc<dyn Texture>, x: u32, y: u32) -> Option<[u8; 4]> {
        let texture = texture.as_any().downcast_ref::<LegacyTexture>()?;
        let state = self.context.lock();
        match state.objects.get(texture.name) {
            Some(GlObject::Texture { info, pixels }) if x < info.width && y < info.height => {
                let bpp = info.format.bytes_per_pixel() as usize;
                let offset = (y as usize * info.width as usize + x as usize) * bpp;
                Some(decode_rgba8(info.format, &pixels[offset..offset + bpp]))
            }
            _ => None,
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn current(&self, operation: &str) -> Result<()> {
        self.context.ensure_current(operation).map_err(|e| {
            rhi_error!(SOURCE, "{}", e);
            e
        })
    }

    /// Size of the bound render target
    fn target_size(&self) -> (u32, u32) {
        match &self.bound_framebuffer {
            Some(framebuffer) => (framebuffer.width(), framebuffer.height()),
            None => {
                let state = self.context.lock();
                (state.backbuffer.width, state.backbuffer.height)
            }
        }
    }

    /// Pixel rectangle touched by a clear: the target, clipped by the scissor
    fn clear_region(&self) -> (u32, u32, u32, u32) {
        let (width, height) = self.target_size();
        match self.scissor {
            Some(rect) => {
                let x0 = rect.x.clamp(0, width as i32) as u32;
                let y0 = rect.y.clamp(0, height as i32) as u32;
                let x1 = (rect.x as i64 + rect.width as i64).clamp(0, width as i64) as u32;
                let y1 = (rect.y as i64 + rect.height as i64).clamp(0, height as i64) as u32;
                (x0, y0, x1.max(x0), y1.max(y0))
            }
            None => (0, 0, width, height),
        }
    }

    fn framebuffer_attachments(&self, framebuffer: &Arc<dyn Framebuffer>) -> Result<(Vec<ObjectName>, Option<ObjectName>)> {
        let framebuffer = legacy::<LegacyFramebuffer>(
            framebuffer.as_any(), framebuffer.debug_name(), &self.context, LegacyFramebuffer::belongs_to,
        )?;
        let state = self.context.lock();
        match state.objects.get(framebuffer.name) {
            Some(GlObject::Framebuffer { color, depth }) => Ok((color.clone(), *depth)),
            _ => Err(Error::InvalidResource(format!(
                "framebuffer '{}' is incomplete", framebuffer.debug_name
            ))),
        }
    }

    fn clear_target(&self, params: &ClearParams) -> Result<()> {
        let (x0, y0, x1, y1) = self.clear_region();

        match &self.bound_framebuffer {
            None => {
                if params.flags.contains(ClearFlags::COLOR) {
                    let texel = encode_color(TextureFormat::R8G8B8A8_UNORM, params.color)
                        .unwrap_or_default();
                    let mut state = self.context.lock();
                    let width = state.backbuffer.width;
                    fill_rect(&mut state.backbuffer.pixels, width, &texel, (x0, y0, x1, y1));
                }
            }
            Some(framebuffer) => {
                let (color, depth) = self.framebuffer_attachments(framebuffer)?;
                let mut state = self.context.lock();
                if params.flags.contains(ClearFlags::COLOR) {
                    for name in color {
                        clear_texture(&mut state, name, |format| encode_color(format, params.color), (x0, y0, x1, y1));
                    }
                }
                if params.flags.intersects(ClearFlags::DEPTH | ClearFlags::STENCIL) {
                    if let Some(name) = depth {
                        clear_texture(&mut state, name, |format| encode_depth(format, params), (x0, y0, x1, y1));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate bindings, commit parameters and count a draw
    fn submit_draw(&mut self, topology: PrimitiveTopology, vertex_count: u32) -> Result<()> {
        let Some(pipeline) = self.bound_pipeline.clone() else {
            rhi_error!(SOURCE, "Draw without a bound program");
            return Err(Error::InvalidState("draw without a bound program".to_string()));
        };
        if self.bound_vertex_array.is_none() {
            rhi_error!(SOURCE, "Draw without a bound vertex array");
            return Err(Error::InvalidState("draw without a bound vertex array".to_string()));
        }

        pipeline.commit_parameters();

        let mut state = self.context.lock();
        state.stats.draw_calls += 1;
        state.stats.vertices += vertex_count as u64;
        state.stats.triangles += topology.triangle_count(vertex_count) as u64;
        Ok(())
    }
}

fn fill_rect(pixels: &mut [u8], width: u32, texel: &[u8], (x0, y0, x1, y1): (u32, u32, u32, u32)) {
    if texel.is_empty() {
        return;
    }
    let bpp = texel.len();
    for y in y0..y1 {
        for x in x0..x1 {
            let offset = (y as usize * width as usize + x as usize) * bpp;
            if let Some(dst) = pixels.get_mut(offset..offset + bpp) {
                dst.copy_from_slice(texel);
            }
        }
    }
}

fn clear_texture(
    state: &mut ContextState,
    name: ObjectName,
    encode: impl Fn(TextureFormat) -> Option<Vec<u8>>,
    region: (u32, u32, u32, u32),
) {
    if let Some((info, pixels)) = state.texture_mut(name) {
        if let Some(texel) = encode(info.format) {
            let (x0, y0, x1, y1) = region;
            let clipped = (x0.min(info.width), y0.min(info.height), x1.min(info.width), y1.min(info.height));
            fill_rect(pixels, info.width, &texel, clipped);
        }
    }
}

fn encode_depth(format: TextureFormat, params: &ClearParams) -> Option<Vec<u8>> {
    match format {
        TextureFormat::D32_FLOAT => Some(params.depth.to_le_bytes().to_vec()),
        TextureFormat::D24_UNORM_S8_UINT => {
            let depth = (params.depth.clamp(0.0, 1.0) * 0x00FF_FFFF as f32) as u32;
            Some(((params.stencil & 0xFF) << 24 | depth).to_le_bytes().to_vec())
        }
        _ => None,
    }
}

impl Device for LegacyDevice {
    fn backend(&self) -> RhiType {
        RhiType::Legacy
    }

    // ===== RESOURCE CREATION =====

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>> {
        self.current("create_buffer")?;
        if desc.size == 0 {
            return Err(Error::InvalidResource(format!("buffer '{}' has zero size", desc.debug_name)));
        }

        let mut data = vec![0u8; desc.size as usize];
        if let Some(initial) = &desc.data {
            if initial.len() as u64 > desc.size {
                return Err(Error::InvalidResource(format!(
                    "buffer '{}': {} bytes of data for {} bytes of storage",
                    desc.debug_name, initial.len(), desc.size
                )));
            }
            data[..initial.len()].copy_from_slice(initial);
        }

        let name = self.context.lock().create(GlObject::Buffer { data });
        rhi_trace!(SOURCE, "Created buffer '{}' ({} bytes)", desc.debug_name, desc.size);
        Ok(Arc::new(LegacyBuffer {
            id: ResourceId::next(),
            debug_name: desc.debug_name.clone(),
            name,
            context: Arc::downgrade(&self.context),
            size: desc.size,
            buffer_type: desc.buffer_type,
        }))
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<Arc<dyn Texture>> {
        self.current("create_texture")?;
        if desc.width == 0 || desc.height == 0 || desc.array_layers == 0 || desc.mip_levels == 0 {
            return Err(Error::InvalidResource(format!(
                "texture '{}' has an empty extent", desc.debug_name
            )));
        }
        if desc.width > self.max_texture_size || desc.height > self.max_texture_size {
            return Err(Error::Unsupported(format!(
                "texture '{}' ({}x{}) exceeds the {} pixel limit",
                desc.debug_name, desc.width, desc.height, self.max_texture_size
            )));
        }

        let size = desc.byte_size() as usize;
        let pixels = match &desc.data {
            Some(data) if data.len() != size => {
                return Err(Error::InvalidResource(format!(
                    "texture '{}': expected {} bytes of data, got {}",
                    desc.debug_name, size, data.len()
                )));
            }
            Some(data) => data.clone(),
            None => vec![0; size],
        };

        let info = TextureInfo::from(desc);
        let name = self.context.lock().create(GlObject::Texture { info, pixels });
        rhi_trace!(SOURCE, "Created texture '{}' ({}x{})", desc.debug_name, desc.width, desc.height);
        Ok(Arc::new(LegacyTexture {
            id: ResourceId::next(),
            debug_name: desc.debug_name.clone(),
            name,
            context: Arc::downgrade(&self.context),
            info,
        }))
    }

    fn create_shader(&mut self, desc: &ShaderDesc) -> Result<Arc<dyn Shader>> {
        self.current("create_shader")?;
        match desc.stage {
            ShaderStage::TessControl | ShaderStage::TessEvaluation | ShaderStage::Compute => {
                return Err(Error::Unsupported(format!(
                    "{:?} shaders are not available on the legacy backend", desc.stage
                )));
            }
            ShaderStage::Vertex | ShaderStage::Fragment | ShaderStage::Geometry => {}
        }

        let source = match &desc.code {
            ShaderCode::Source(source) => source,
            ShaderCode::SpirV(_) => {
                return Err(Error::Unsupported(format!(
                    "shader '{}': the legacy backend compiles source text only", desc.debug_name
                )));
            }
        };
        if desc.code.is_empty() || !source.contains(desc.entry_point.as_str()) {
            rhi_error!(SOURCE, "Shader '{}' failed to compile: entry point '{}' not found",
                desc.debug_name, desc.entry_point);
            return Err(Error::BackendError(format!(
                "shader '{}' failed to compile", desc.debug_name
            )));
        }

        let name = self.context.lock().create(GlObject::Shader { stage: desc.stage });
        Ok(Arc::new(LegacyShader {
            id: ResourceId::next(),
            debug_name: desc.debug_name.clone(),
            name,
            context: Arc::downgrade(&self.context),
            stage: desc.stage,
            entry_point: desc.entry_point.clone(),
        }))
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<Arc<dyn Pipeline>> {
        self.current("create_pipeline")?;

        let mut stages = Vec::with_capacity(desc.shaders.len());
        for shader in &desc.shaders {
            let shader = legacy::<LegacyShader>(
                shader.as_any(), shader.debug_name(), &self.context, LegacyShader::belongs_to,
            )?;
            stages.push(shader.stage);
        }
        if !stages.contains(&ShaderStage::Vertex) || !stages.contains(&ShaderStage::Fragment) {
            rhi_error!(SOURCE, "Program '{}' failed to link: needs a vertex and a fragment stage",
                desc.debug_name);
            return Err(Error::BackendError(format!(
                "program '{}' failed to link", desc.debug_name
            )));
        }
        if desc.vertex_layout.attributes.len() as u32 > MAX_VERTEX_ATTRIBUTES {
            return Err(Error::Unsupported(format!(
                "program '{}' uses {} vertex attributes (max {})",
                desc.debug_name, desc.vertex_layout.attributes.len(), MAX_VERTEX_ATTRIBUTES
            )));
        }

        let name = self.context.lock().create(GlObject::Program {
            stages,
            uniforms: FxHashMap::default(),
        });
        rhi_debug!(SOURCE, "Linked program '{}'", desc.debug_name);
        Ok(Arc::new(LegacyPipeline {
            id: ResourceId::next(),
            debug_name: desc.debug_name.clone(),
            name,
            context: Arc::downgrade(&self.context),
            topology: desc.topology,
            parameters: PipelineParameters::new(),
        }))
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>> {
        self.current("create_framebuffer")?;
        if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
            return Err(Error::InvalidResource(format!(
                "framebuffer '{}' has no attachment", desc.debug_name
            )));
        }
        if desc.color_attachments.len() as u32 > MAX_COLOR_ATTACHMENTS {
            return Err(Error::Unsupported(format!(
                "framebuffer '{}' has {} color attachments (max {})",
                desc.debug_name, desc.color_attachments.len(), MAX_COLOR_ATTACHMENTS
            )));
        }

        let mut color = Vec::with_capacity(desc.color_attachments.len());
        for attachment in &desc.color_attachments {
            let texture = legacy::<LegacyTexture>(
                attachment.as_any(), attachment.debug_name(), &self.context, LegacyTexture::belongs_to,
            )?;
            if texture.info.format.is_depth() {
                return Err(Error::InvalidResource(format!(
                    "'{}' has a depth format and cannot be a color attachment", texture.debug_name
                )));
            }
            if texture.info.width != desc.width || texture.info.height != desc.height {
                return Err(Error::InvalidResource(format!(
                    "attachment '{}' is {}x{}, framebuffer '{}' is {}x{}",
                    texture.debug_name, texture.info.width, texture.info.height,
                    desc.debug_name, desc.width, desc.height
                )));
            }
            color.push(texture.name);
        }

        let depth = match &desc.depth_attachment {
            Some(attachment) => {
                let texture = legacy::<LegacyTexture>(
                    attachment.as_any(), attachment.debug_name(), &self.context, LegacyTexture::belongs_to,
                )?;
                if !texture.info.format.is_depth() {
                    return Err(Error::InvalidResource(format!(
                        "'{}' is not a depth texture", texture.debug_name
                    )));
                }
                Some(texture.name)
            }
            None => None,
        };

        let name = self.context.lock().create(GlObject::Framebuffer { color, depth });
        Ok(Arc::new(LegacyFramebuffer {
            id: ResourceId::next(),
            debug_name: desc.debug_name.clone(),
            name,
            context: Arc::downgrade(&self.context),
            width: desc.width,
            height: desc.height,
            color_attachments: desc.color_attachments.clone(),
            depth_attachment: desc.depth_attachment.clone(),
        }))
    }

    fn create_vertex_array(&mut self, desc: &VertexArrayDesc) -> Result<Arc<dyn VertexArray>> {
        self.current("create_vertex_array")?;
        for binding in &desc.vertex_buffers {
            legacy::<LegacyBuffer>(
                binding.buffer.as_any(), binding.buffer.debug_name(), &self.context, LegacyBuffer::belongs_to,
            )?;
            if desc.layout.stride(binding.binding).is_none() {
                return Err(Error::InvalidResource(format!(
                    "vertex array '{}': binding {} is not declared in the layout",
                    desc.debug_name, binding.binding
                )));
            }
        }
        if let Some(index) = &desc.index_buffer {
            legacy::<LegacyBuffer>(
                index.buffer.as_any(), index.buffer.debug_name(), &self.context, LegacyBuffer::belongs_to,
            )?;
            if index.buffer.buffer_type() != BufferType::Index {
                return Err(Error::InvalidResource(format!(
                    "vertex array '{}': '{}' is not an index buffer",
                    desc.debug_name, index.buffer.debug_name()
                )));
            }
        }

        let name = self.context.lock().create(GlObject::VertexArray);
        Ok(Arc::new(LegacyVertexArray {
            id: ResourceId::next(),
            debug_name: desc.debug_name.clone(),
            name,
            context: Arc::downgrade(&self.context),
            layout: desc.layout.clone(),
            vertex_buffers: desc.vertex_buffers.clone(),
            index_buffer: desc.index_buffer.clone(),
        }))
    }

    // ===== FRAME =====

    fn begin_frame(&mut self) -> Result<()> {
        self.current("begin_frame")?;
        let deleted = self.context.lock().drain_pending_deletes();
        if deleted > 0 {
            rhi_debug!(SOURCE, "Deleted {} object(s) released on other threads", deleted);
        }
        self.in_frame = true;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.current("end_frame")?;
        if self.in_render_pass {
            rhi_error!(SOURCE, "end_frame() inside a render pass");
            return Err(Error::InvalidState("end_frame() inside a render pass".to_string()));
        }
        let mut state = self.context.lock();
        state.drain_pending_deletes();
        state.stats.frames += 1;
        self.in_frame = false;
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.current("present")?;
        if self.in_frame {
            return Err(Error::InvalidState("present() before end_frame()".to_string()));
        }
        rhi_trace!(SOURCE, "Swap buffers");
        Ok(())
    }

    // ===== IMMEDIATE OPERATIONS =====

    fn clear(&mut self, params: &ClearParams) -> Result<()> {
        self.current("clear")?;
        self.clear_target(params)
    }

    fn draw(&mut self, params: &DrawParams) -> Result<()> {
        self.current("draw")?;
        if let Some(vertex_array) = &self.bound_vertex_array {
            let available = vertex_array.vertex_count();
            let end = params.first_vertex as u64 + params.vertex_count as u64;
            if available > 0 && end > available {
                return Err(Error::InvalidResource(format!(
                    "draw reads vertices up to {} but '{}' holds {}",
                    end, vertex_array.debug_name(), available
                )));
            }
        }
        self.submit_draw(params.topology, params.vertex_count)
    }

    fn draw_indexed(&mut self, params: &DrawIndexedParams) -> Result<()> {
        self.current("draw_indexed")?;
        if let Some(vertex_array) = &self.bound_vertex_array {
            let Some(index_buffer) = vertex_array.index_buffer() else {
                rhi_error!(SOURCE, "Indexed draw with '{}', which has no index buffer",
                    vertex_array.debug_name());
                return Err(Error::InvalidState(format!(
                    "vertex array '{}' has no index buffer", vertex_array.debug_name()
                )));
            };
            let end = params.first_index as u64 + params.index_count as u64;
            if end > index_buffer.index_count() {
                return Err(Error::InvalidResource(format!(
                    "indexed draw reads indices up to {} but '{}' holds {}",
                    end, index_buffer.buffer.debug_name(), index_buffer.index_count()
                )));
            }
        }
        self.submit_draw(params.topology, params.index_count)
    }

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn Pipeline>) -> Result<()> {
        self.current("bind_pipeline")?;
        legacy::<LegacyPipeline>(pipeline.as_any(), pipeline.debug_name(), &self.context, LegacyPipeline::belongs_to)?;
        self.bound_pipeline = Some(Arc::clone(pipeline));
        Ok(())
    }

    fn bind_vertex_array(&mut self, vertex_array: &Arc<dyn VertexArray>) -> Result<()> {
        self.current("bind_vertex_array")?;
        legacy::<LegacyVertexArray>(
            vertex_array.as_any(), vertex_array.debug_name(), &self.context, LegacyVertexArray::belongs_to,
        )?;
        self.bound_vertex_array = Some(Arc::clone(vertex_array));
        Ok(())
    }

    fn bind_texture(&mut self, texture: &Arc<dyn Texture>, slot: u32) -> Result<()> {
        self.current("bind_texture")?;
        legacy::<LegacyTexture>(texture.as_any(), texture.debug_name(), &self.context, LegacyTexture::belongs_to)?;
        let Some(entry) = self.bound_textures.get_mut(slot as usize) else {
            return Err(Error::Unsupported(format!(
                "texture slot {} (the legacy backend has {})", slot, MAX_TEXTURE_SLOTS
            )));
        };
        *entry = Some(Arc::clone(texture));
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<&Arc<dyn Framebuffer>>) -> Result<()> {
        self.current("bind_framebuffer")?;
        if let Some(framebuffer) = framebuffer {
            legacy::<LegacyFramebuffer>(
                framebuffer.as_any(), framebuffer.debug_name(), &self.context, LegacyFramebuffer::belongs_to,
            )?;
        }
        self.bound_framebuffer = framebuffer.cloned();
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.current("set_viewport")?;
        self.viewport = viewport;
        Ok(())
    }

    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()> {
        self.current("set_scissor")?;
        self.scissor = Some(scissor);
        Ok(())
    }

    fn resource_barrier(&mut self, _barrier: &ResourceBarrier) -> Result<()> {
        // Implicit synchronisation
        self.current("resource_barrier")
    }

    fn blit_framebuffer_to_screen(&mut self, framebuffer: &Arc<dyn Framebuffer>) -> Result<()> {
        self.current("blit_framebuffer_to_screen")?;
        let (color, _) = self.framebuffer_attachments(framebuffer)?;
        let Some(&source) = color.first() else {
            return Err(Error::InvalidResource(format!(
                "framebuffer '{}' has no color attachment to blit", framebuffer.debug_name()
            )));
        };

        let mut state = self.context.lock();
        let (info, texels) = match state.objects.get(source) {
            Some(GlObject::Texture { info, pixels }) => (*info, pixels.clone()),
            _ => {
                return Err(Error::InvalidResource(format!(
                    "color attachment of '{}' is gone", framebuffer.debug_name()
                )));
            }
        };

        let bpp = info.format.bytes_per_pixel() as usize;
        let backbuffer = &mut state.backbuffer;
        let (dst_w, dst_h) = (backbuffer.width as u64, backbuffer.height as u64);
        for y in 0..dst_h {
            let src_y = y * info.height as u64 / dst_h;
            for x in 0..dst_w {
                let src_x = x * info.width as u64 / dst_w;
                let src = (src_y as usize * info.width as usize + src_x as usize) * bpp;
                let dst = (y as usize * dst_w as usize + x as usize) * 4;
                let rgba = decode_rgba8(info.format, &texels[src..src + bpp]);
                backbuffer.pixels[dst..dst + 4].copy_from_slice(&rgba);
            }
        }
        Ok(())
    }

    fn begin_render_pass(&mut self, begin: &RenderPassBegin) -> Result<()> {
        self.current("begin_render_pass")?;
        if self.in_render_pass {
            rhi_error!(SOURCE, "begin_render_pass() inside a render pass");
            return Err(Error::InvalidState("render pass already active".to_string()));
        }
        self.bind_framebuffer(begin.framebuffer.as_ref())?;
        if begin.load_op == LoadOp::Clear {
            self.clear_target(&begin.clear)?;
        }
        self.in_render_pass = true;
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.current("end_render_pass")?;
        if !self.in_render_pass {
            rhi_error!(SOURCE, "end_render_pass() without an active render pass");
            return Err(Error::InvalidState("no active render pass".to_string()));
        }
        self.in_render_pass = false;
        Ok(())
    }

    // ===== QUERIES =====

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            max_texture_size: self.max_texture_size,
            max_color_attachments: MAX_COLOR_ATTACHMENTS,
            max_vertex_attributes: MAX_VERTEX_ATTRIBUTES,
            max_texture_slots: MAX_TEXTURE_SLOTS as u32,
            features: DeviceFeatures::GEOMETRY_SHADER,
        }
    }

    fn stats(&self) -> DeviceStats {
        self.context.lock().stats
    }

    fn make_context_current(&mut self, thread_index: usize) -> bool {
        let made_current = self.context.make_current();
        if !made_current {
            rhi_error!(SOURCE, "Context is current on another thread, cannot bind it to worker {}",
                thread_index);
        }
        made_current
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.current("wait_idle")
    }
}

#[cfg(test)]
#[path = "legacy_device_tests.rs"]
mod tests;
