/// Pipeline trait and pipeline descriptor

use std::sync::Arc;

use crate::device::{
    ParameterCache, PrimitiveTopology, Resource, Shader, TextureFormat, UniformValue,
};

/// Format of one vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float,
    Float2,
    Float3,
    Float4,
    UByte4Norm,
    Int,
    UInt,
}

impl VertexFormat {
    /// Size of one attribute in bytes
    pub fn size_bytes(&self) -> u32 {
        match self {
            VertexFormat::Float | VertexFormat::Int | VertexFormat::UInt => 4,
            VertexFormat::UByte4Norm => 4,
            VertexFormat::Float2 => 8,
            VertexFormat::Float3 => 12,
            VertexFormat::Float4 => 16,
        }
    }
}

/// Vertex input rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexInputRate {
    /// Data is per-vertex
    Vertex,
    /// Data is per-instance
    Instance,
}

/// Vertex attribute description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Attribute location in shader
    pub location: u32,
    /// Binding index
    pub binding: u32,
    pub format: VertexFormat,
    /// Offset in bytes from the start of the vertex
    pub offset: u32,
}

/// Vertex binding description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    /// Binding index
    pub binding: u32,
    /// Stride in bytes between consecutive elements
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

/// Vertex input layout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub bindings: Vec<VertexBinding>,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Single interleaved per-vertex binding with tightly packed attributes
    ///
    /// Locations are assigned in order starting at 0.
    pub fn interleaved(formats: &[VertexFormat]) -> Self {
        let mut offset = 0;
        let attributes = formats
            .iter()
            .enumerate()
            .map(|(location, format)| {
                let attribute = VertexAttribute {
                    location: location as u32,
                    binding: 0,
                    format: *format,
                    offset,
                };
                offset += format.size_bytes();
                attribute
            })
            .collect();

        Self {
            bindings: vec![VertexBinding { binding: 0, stride: offset, input_rate: VertexInputRate::Vertex }],
            attributes,
        }
    }

    /// Stride of `binding`, if declared
    pub fn stride(&self, binding: u32) -> Option<u32> {
        self.bindings.iter().find(|b| b.binding == binding).map(|b| b.stride)
    }
}

// ===== FIXED-FUNCTION STATE =====

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Front face winding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

/// Comparison operator for the depth test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

/// Color blending preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Source replaces destination
    Opaque,
    /// src * a + dst * (1 - a)
    AlphaBlend,
    /// src + dst
    Additive,
}

/// Descriptor for creating a graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    /// Shader stages (at least a vertex and a fragment stage)
    pub shaders: Vec<Arc<dyn Shader>>,
    pub vertex_layout: VertexLayout,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub blend: BlendMode,
    /// Formats of the color attachments the pipeline renders into
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub debug_name: String,
}

impl PipelineDesc {
    /// Opaque, depth-less pipeline rendering into one RGBA8 attachment
    pub fn new(shaders: Vec<Arc<dyn Shader>>, vertex_layout: VertexLayout, debug_name: &str) -> Self {
        Self {
            shaders,
            vertex_layout,
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::None,
            front_face: FrontFace::CounterClockwise,
            depth_test: false,
            depth_write: false,
            depth_compare: CompareOp::LessOrEqual,
            blend: BlendMode::Opaque,
            color_formats: vec![TextureFormat::R8G8B8A8_UNORM],
            depth_format: None,
            debug_name: debug_name.to_string(),
        }
    }
}

/// Graphics pipeline resource trait
///
/// Pipelines own a [`ParameterCache`]: `set_uniform` only touches the cache,
/// `commit_parameters` pushes it to the backend when dirty.
pub trait Pipeline: Resource {
    /// Topology the pipeline was created for
    fn topology(&self) -> PrimitiveTopology;

    /// Store a shader parameter and mark the cache dirty
    ///
    /// # Arguments
    ///
    /// * `name` - Parameter name as declared in the shader
    /// * `value` - New value
    fn set_uniform(&self, name: &str, value: UniformValue);

    /// Push every cached parameter to the backend if the cache is dirty
    ///
    /// Returns `true` when a push happened. Does nothing when the cache is
    /// clean or the pipeline is not usable.
    fn commit_parameters(&self) -> bool;

    fn has_dirty_parameters(&self) -> bool;

    /// Snapshot of the parameter cache
    fn parameter_cache(&self) -> ParameterCache;
}
