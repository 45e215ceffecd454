/// Legacy backend resource objects
///
/// Each object owns one name in the context's object table and releases it
/// on drop (immediately on the context thread, deferred otherwise).

use std::any::Any;
use std::sync::{Arc, Weak};

use crate::backend::legacy::{GlObject, LegacyContext, ObjectName};
use crate::device::{
    Buffer, BufferType, Framebuffer, IndexBufferBinding, ParameterCache, Pipeline,
    PipelineParameters, PrimitiveTopology, Resource, ResourceId, Shader, ShaderStage, Texture,
    TextureInfo, UniformValue, VertexArray, VertexBufferBinding, VertexLayout,
};
use crate::error::{Error, Result};

macro_rules! legacy_resource {
    ($name:ident) => {
        impl Resource for $name {
            fn id(&self) -> ResourceId {
                self.id
            }

            fn debug_name(&self) -> &str {
                &self.debug_name
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                if let Some(context) = self.context.upgrade() {
                    context.release(self.name);
                }
            }
        }

        impl $name {
            /// Name of the object in its context
            pub fn object_name(&self) -> ObjectName {
                self.name
            }

            pub(crate) fn belongs_to(&self, context: &Arc<LegacyContext>) -> bool {
                std::ptr::eq(self.context.as_ptr(), Arc::as_ptr(context))
            }
        }
    };
}

// ============================================================================
// Buffer
// ============================================================================

#[derive(Debug)]
pub struct LegacyBuffer {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    pub(crate) name: ObjectName,
    pub(crate) context: Weak<LegacyContext>,
    pub(crate) size: u64,
    pub(crate) buffer_type: BufferType,
}

legacy_resource!(LegacyBuffer);

impl Buffer for LegacyBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        let context = self.context.upgrade().ok_or_else(|| {
            Error::InvalidResource(format!("buffer '{}' outlived its context", self.debug_name))
        })?;
        context.ensure_current("Buffer::update")?;

        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= self.size)
            .ok_or_else(|| Error::InvalidResource(format!(
                "update of {} bytes at offset {} exceeds buffer '{}' ({} bytes)",
                data.len(), offset, self.debug_name, self.size
            )))?;

        let mut state = context.lock();
        match state.objects.get_mut(self.name) {
            Some(GlObject::Buffer { data: storage }) => {
                storage[offset as usize..end as usize].copy_from_slice(data);
                Ok(())
            }
            _ => Err(Error::InvalidResource(format!("buffer '{}' has no storage", self.debug_name))),
        }
    }
}

// ============================================================================
// Texture
// ============================================================================

#[derive(Debug)]
pub struct LegacyTexture {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    pub(crate) name: ObjectName,
    pub(crate) context: Weak<LegacyContext>,
    pub(crate) info: TextureInfo,
}

legacy_resource!(LegacyTexture);

impl Texture for LegacyTexture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }
}

// ============================================================================
// Shader
// ============================================================================

#[derive(Debug)]
pub struct LegacyShader {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    pub(crate) name: ObjectName,
    pub(crate) context: Weak<LegacyContext>,
    pub(crate) stage: ShaderStage,
    pub(crate) entry_point: String,
}

legacy_resource!(LegacyShader);

impl Shader for LegacyShader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

// ============================================================================
// Pipeline (linked program)
// ============================================================================

#[derive(Debug)]
pub struct LegacyPipeline {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    pub(crate) name: ObjectName,
    pub(crate) context: Weak<LegacyContext>,
    pub(crate) topology: PrimitiveTopology,
    pub(crate) parameters: PipelineParameters,
}

legacy_resource!(LegacyPipeline);

impl LegacyPipeline {
    /// Value last committed to the program's uniform table
    pub fn committed_uniform(&self, uniform: &str) -> Option<UniformValue> {
        let context = self.context.upgrade()?;
        let state = context.lock();
        match state.objects.get(self.name) {
            Some(GlObject::Program { uniforms, .. }) => uniforms.get(uniform).copied(),
            _ => None,
        }
    }
}

impl Pipeline for LegacyPipeline {
    fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    fn set_uniform(&self, name: &str, value: UniformValue) {
        self.parameters.set_uniform(name, value);
    }

    fn commit_parameters(&self) -> bool {
        let Some(context) = self.context.upgrade() else {
            return false;
        };
        // Uniform uploads are context calls
        if !context.is_current() {
            return false;
        }

        let mut state = context.lock();
        let Some(GlObject::Program { uniforms, .. }) = state.objects.get_mut(self.name) else {
            return false;
        };
        let Some(values) = self.parameters.take_dirty() else {
            return false;
        };
        uniforms.extend(values);
        state.stats.parameter_commits += 1;
        true
    }

    fn has_dirty_parameters(&self) -> bool {
        self.parameters.has_dirty()
    }

    fn parameter_cache(&self) -> ParameterCache {
        self.parameters.snapshot()
    }
}

// ============================================================================
// Framebuffer
// ============================================================================

#[derive(Debug)]
pub struct LegacyFramebuffer {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    pub(crate) name: ObjectName,
    pub(crate) context: Weak<LegacyContext>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) color_attachments: Vec<Arc<dyn Texture>>,
    pub(crate) depth_attachment: Option<Arc<dyn Texture>>,
}

legacy_resource!(LegacyFramebuffer);

impl Framebuffer for LegacyFramebuffer {
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

// ============================================================================
// Vertex array
// ============================================================================

#[derive(Debug)]
pub struct LegacyVertexArray {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    pub(crate) name: ObjectName,
    pub(crate) context: Weak<LegacyContext>,
    pub(crate) layout: VertexLayout,
    pub(crate) vertex_buffers: Vec<VertexBufferBinding>,
    pub(crate) index_buffer: Option<IndexBufferBinding>,
}

legacy_resource!(LegacyVertexArray);

impl VertexArray for LegacyVertexArray {
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
