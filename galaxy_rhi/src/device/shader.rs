/// Shader trait and shader descriptor

use crate::device::Resource;

/// Shader pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    TessControl,
    TessEvaluation,
    Compute,
}

/// Shader code as handed over by the asset loader
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderCode {
    /// Source text, compiled by the driver (legacy backends)
    Source(String),
    /// SPIR-V words (explicit backends)
    SpirV(Vec<u32>),
}

impl ShaderCode {
    /// Whether there is nothing to compile
    pub fn is_empty(&self) -> bool {
        match self {
            ShaderCode::Source(source) => source.trim().is_empty(),
            ShaderCode::SpirV(words) => words.is_empty(),
        }
    }
}

/// Descriptor for creating a shader stage
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub stage: ShaderStage,
    pub code: ShaderCode,
    /// Entry point name (usually "main")
    pub entry_point: String,
    pub debug_name: String,
}

/// Shader stage resource trait
pub trait Shader: Resource {
    fn stage(&self) -> ShaderStage;

    fn entry_point(&self) -> &str;
}
