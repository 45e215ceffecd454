/// VulkanShader - Vulkan implementation of the Shader trait
///
/// Shader modules are created from SPIR-V only. Each module is reflected
/// with spirq to find its push-constant block and combined image samplers.

use ash::vk;
use galaxy_rhi::rhi::device::{ResourceId, Shader, ShaderStage};
use galaxy_rhi::rhi::Result;
use galaxy_rhi::{rhi_bail, rhi_err};
use std::sync::Arc;

use crate::vulkan_context::{GpuContext, PendingDestroy, SOURCE};

// ============================================================================
// Reflection data
// ============================================================================

/// One member of a push-constant block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstantMember {
    pub name: String,
    /// Byte offset inside the block
    pub offset: u32,
    /// Byte size
    pub size: u32,
}

/// Push-constant block as declared by a shader
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PushConstantBlock {
    /// Total size in bytes
    pub size: u32,
    pub members: Vec<PushConstantMember>,
}

impl PushConstantBlock {
    pub fn member(&self, name: &str) -> Option<&PushConstantMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Write `bytes` at the offset of member `name` in `block`
    ///
    /// Returns `false` when the block has no such member. Values larger than
    /// the member are truncated to it.
    pub fn write(&self, block: &mut [u8], name: &str, bytes: &[u8]) -> bool {
        let Some(member) = self.member(name) else {
            return false;
        };
        let start = member.offset as usize;
        let len = bytes.len().min(member.size as usize);
        match block.get_mut(start..start + len) {
            Some(target) => {
                target.copy_from_slice(&bytes[..len]);
                true
            }
            None => false,
        }
    }
}

/// What a shader module exposes to the pipeline layout
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderReflection {
    pub push_constants: Option<PushConstantBlock>,
    /// Bindings of combined image samplers in descriptor set 0
    pub sampler_bindings: Vec<u32>,
}

/// Reflect the entry point `entry_point` of a SPIR-V module
pub(crate) fn reflect_spirv(code: &[u32], entry_point: &str, debug_name: &str) -> Result<ShaderReflection> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| rhi_err!(SOURCE, "SPIR-V reflection of '{}' failed: {:?}", debug_name, e))?;

    let Some(entry) = entry_points.iter().find(|ep| ep.name == entry_point) else {
        rhi_bail!(SOURCE, "Shader '{}' has no entry point '{}'", debug_name, entry_point);
    };

    let mut reflection = ShaderReflection::default();

    for var in entry.vars.iter() {
        match var {
            spirq::var::Variable::PushConstant { ty, .. } => {
                reflection.push_constants = Some(PushConstantBlock {
                    size: ty.nbyte().unwrap_or(0) as u32,
                    members: push_constant_members(ty),
                });
            }
            spirq::var::Variable::Descriptor { desc_bind, desc_ty, .. } => {
                if desc_bind.set() != 0 {
                    rhi_bail!(SOURCE,
                        "Shader '{}' uses descriptor set {}, only set 0 is supported",
                        debug_name, desc_bind.set());
                }
                match desc_ty {
                    spirq::ty::DescriptorType::CombinedImageSampler() => {
                        reflection.sampler_bindings.push(desc_bind.bind());
                    }
                    other => {
                        rhi_bail!(SOURCE,
                            "Shader '{}' binding {} has unsupported descriptor type {:?}",
                            debug_name, desc_bind.bind(), other);
                    }
                }
            }
            _ => {}
        }
    }

    reflection.sampler_bindings.sort_unstable();
    Ok(reflection)
}

fn push_constant_members(ty: &spirq::ty::Type) -> Vec<PushConstantMember> {
    let spirq::ty::Type::Struct(st) = ty else {
        return Vec::new();
    };

    st.members
        .iter()
        .filter_map(|m| {
            Some(PushConstantMember {
                name: m.name.clone()?,
                offset: m.offset.unwrap_or(0) as u32,
                size: m.ty.nbyte()? as u32,
            })
        })
        .collect()
}

// ============================================================================
// Shader object
// ============================================================================

/// Vulkan shader implementation
pub struct VulkanShader {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    pub(crate) ctx: Arc<GpuContext>,
    /// Vulkan shader module
    pub(crate) module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: String,
    pub(crate) reflection: ShaderReflection,
}

vulkan_resource!(VulkanShader);

impl VulkanShader {
    pub(crate) fn create(
        ctx: &Arc<GpuContext>,
        code: &[u32],
        stage: ShaderStage,
        entry_point: &str,
        debug_name: &str,
    ) -> Result<Self> {
        let reflection = reflect_spirv(code, entry_point, debug_name)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { ctx.device.create_shader_module(&create_info, None) }
            .map_err(|e| rhi_err!(SOURCE, "Failed to create shader module '{}': {:?}", debug_name, e))?;

        ctx.resource_created();
        Ok(Self {
            id: ResourceId::next(),
            debug_name: debug_name.to_string(),
            ctx: Arc::clone(ctx),
            module,
            stage,
            entry_point: entry_point.to_string(),
            reflection,
        })
    }
}

impl Shader for VulkanShader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

impl Drop for VulkanShader {
    fn drop(&mut self) {
        self.ctx.retire(PendingDestroy::ShaderModule(self.module));
    }
}
