/// VulkanPipeline - Vulkan implementation of the Pipeline trait
///
/// Pipelines are built for dynamic rendering (no render pass objects).
/// Parameters set through the cache are packed into the push-constant block
/// found by reflection; the device emits that block before each draw.

use ash::vk;
use galaxy_rhi::rhi::device::{
    ParameterCache, Pipeline, PipelineDesc, PipelineParameters, PrimitiveTopology, ResourceId,
    Shader, UniformValue,
};
use galaxy_rhi::rhi::{Error, Result};
use galaxy_rhi::{rhi_bail, rhi_err, rhi_warn};
use std::collections::BTreeMap;
use std::ffi::CString;
use std::sync::{Arc, Mutex};

use crate::vulkan_context::{lock, GpuContext, PendingDestroy, SOURCE};
use crate::vulkan_format::{
    blend_attachment_to_vk, compare_op_to_vk, cull_mode_to_vk, front_face_to_vk,
    input_rate_to_vk, shader_stage_to_vk, texture_format_to_vk, topology_to_vk, vertex_format_to_vk,
};
use crate::vulkan_shader::{PushConstantBlock, ShaderReflection, VulkanShader};

// ============================================================================
// Reflection merge
// ============================================================================

/// Shader interface of a whole pipeline
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineReflection {
    /// Union of the stages' push-constant blocks
    pub push_constants: Option<PushConstantBlock>,
    /// Stages declaring a push-constant block
    pub push_stages: vk::ShaderStageFlags,
    /// (binding, stages) of every combined image sampler, sorted by binding
    pub sampler_bindings: Vec<(u32, vk::ShaderStageFlags)>,
}

/// Merge per-stage reflections into one pipeline interface
///
/// Members with the same name must sit at the same offset in every stage.
pub fn merge_reflections(
    stages: &[(vk::ShaderStageFlags, &ShaderReflection)],
    debug_name: &str,
) -> Result<PipelineReflection> {
    let mut block: Option<PushConstantBlock> = None;
    let mut push_stages = vk::ShaderStageFlags::empty();
    let mut samplers: BTreeMap<u32, vk::ShaderStageFlags> = BTreeMap::new();

    for (stage, reflection) in stages {
        if let Some(stage_block) = &reflection.push_constants {
            push_stages |= *stage;
            let merged = block.get_or_insert_with(PushConstantBlock::default);
            merged.size = merged.size.max(stage_block.size);

            for member in &stage_block.members {
                match merged.member(&member.name) {
                    Some(existing) if existing.offset != member.offset => {
                        rhi_bail!(SOURCE,
                            "Push constant '{}' of pipeline '{}' is at offset {} in one stage and {} in another",
                            member.name, debug_name, existing.offset, member.offset);
                    }
                    Some(_) => {}
                    None => merged.members.push(member.clone()),
                }
            }
        }

        for binding in &reflection.sampler_bindings {
            *samplers.entry(*binding).or_insert_with(vk::ShaderStageFlags::empty) |= *stage;
        }
    }

    Ok(PipelineReflection {
        push_constants: block.filter(|b| b.size > 0),
        push_stages,
        sampler_bindings: samplers.into_iter().collect(),
    })
}

// ============================================================================
// Pipeline object
// ============================================================================

/// Vulkan pipeline implementation
pub struct VulkanPipeline {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    pub(crate) ctx: Arc<GpuContext>,
    /// Vulkan graphics pipeline
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    /// Layout of descriptor set 0 (null when the pipeline samples nothing)
    pub(crate) set_layout: vk::DescriptorSetLayout,
    pub(crate) reflection: PipelineReflection,
    /// Number of vertex buffer bindings the pipeline reads
    pub(crate) vertex_binding_count: usize,
    topology: PrimitiveTopology,
    /// Packed push-constant block, rewritten by each commit
    push_data: Mutex<Vec<u8>>,
    parameters: PipelineParameters,
}

vulkan_resource!(VulkanPipeline);

impl VulkanPipeline {
    /// Create a graphics pipeline for dynamic rendering
    ///
    /// # Arguments
    ///
    /// * `ctx` - GPU context
    /// * `desc` - Pipeline descriptor
    /// * `shaders` - Vulkan shaders of `desc.shaders`, in the same order
    pub(crate) fn create(ctx: &Arc<GpuContext>, desc: &PipelineDesc, shaders: &[&VulkanShader]) -> Result<Self> {
        let stage_reflections: Vec<(vk::ShaderStageFlags, &ShaderReflection)> = shaders
            .iter()
            .map(|shader| (shader_stage_to_vk(shader.stage()), &shader.reflection))
            .collect();
        let reflection = merge_reflections(&stage_reflections, &desc.debug_name)?;

        let device = &ctx.device;

        unsafe {
            // Descriptor set 0: combined image samplers
            let set_layout = if reflection.sampler_bindings.is_empty() {
                vk::DescriptorSetLayout::null()
            } else {
                let bindings: Vec<vk::DescriptorSetLayoutBinding> = reflection.sampler_bindings
                    .iter()
                    .map(|(binding, stages)| {
                        vk::DescriptorSetLayoutBinding::default()
                            .binding(*binding)
                            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                            .descriptor_count(1)
                            .stage_flags(*stages)
                    })
                    .collect();
                let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
                device.create_descriptor_set_layout(&layout_info, None)
                    .map_err(|e| rhi_err!(SOURCE, "Failed to create descriptor set layout of '{}': {:?}", desc.debug_name, e))?
            };

            // Pipeline layout with the merged push-constant range
            let set_layouts: Vec<vk::DescriptorSetLayout> = if set_layout == vk::DescriptorSetLayout::null() {
                Vec::new()
            } else {
                vec![set_layout]
            };
            let push_ranges: Vec<vk::PushConstantRange> = reflection.push_constants
                .iter()
                .map(|block| vk::PushConstantRange {
                    stage_flags: reflection.push_stages,
                    offset: 0,
                    size: block.size,
                })
                .collect();

            let layout_info = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(&set_layouts)
                .push_constant_ranges(&push_ranges);

            let layout = match device.create_pipeline_layout(&layout_info, None) {
                Ok(layout) => layout,
                Err(e) => {
                    if set_layout != vk::DescriptorSetLayout::null() {
                        device.destroy_descriptor_set_layout(set_layout, None);
                    }
                    return Err(rhi_err!(SOURCE, "Failed to create pipeline layout of '{}': {:?}", desc.debug_name, e));
                }
            };

            let pipeline = match Self::create_graphics_pipeline(device, desc, shaders, layout) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    ctx.destroy_now(PendingDestroy::Pipeline {
                        pipeline: vk::Pipeline::null(),
                        layout,
                        set_layout,
                    });
                    return Err(e);
                }
            };

            let push_size = reflection.push_constants.as_ref().map_or(0, |b| b.size as usize);

            ctx.resource_created();
            Ok(Self {
                id: ResourceId::next(),
                debug_name: desc.debug_name.clone(),
                ctx: Arc::clone(ctx),
                pipeline,
                layout,
                set_layout,
                reflection,
                vertex_binding_count: desc.vertex_layout.bindings.len(),
                topology: desc.topology,
                push_data: Mutex::new(vec![0u8; push_size]),
                parameters: PipelineParameters::new(),
            })
        }
    }

    unsafe fn create_graphics_pipeline(
        device: &ash::Device,
        desc: &PipelineDesc,
        shaders: &[&VulkanShader],
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        // Shader stages
        let entry_names: Vec<CString> = shaders
            .iter()
            .map(|shader| {
                CString::new(shader.entry_point()).map_err(|_| {
                    Error::InvalidResource(format!("entry point of '{}' contains a NUL byte", shader.debug_name))
                })
            })
            .collect::<Result<_>>()?;

        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = shaders
            .iter()
            .zip(&entry_names)
            .map(|(shader, name)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(shader_stage_to_vk(shader.stage()))
                    .module(shader.module)
                    .name(name)
            })
            .collect();

        // Vertex input state
        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = desc.vertex_layout.bindings
            .iter()
            .map(|binding| vk::VertexInputBindingDescription {
                binding: binding.binding,
                stride: binding.stride,
                input_rate: input_rate_to_vk(binding.input_rate),
            })
            .collect();

        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc.vertex_layout.attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: attribute.binding,
                format: vertex_format_to_vk(attribute.format),
                offset: attribute.offset,
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology_to_vk(desc.topology))
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(cull_mode_to_vk(desc.cull_mode))
            .front_face(front_face_to_vk(desc.front_face))
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(compare_op_to_vk(desc.depth_compare))
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments = vec![blend_attachment_to_vk(desc.blend); desc.color_formats.len()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        // Attachment formats for dynamic rendering
        let color_formats: Vec<vk::Format> = desc.color_formats.iter().map(|f| texture_format_to_vk(*f)).collect();
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats);
        if let Some(depth_format) = desc.depth_format {
            rendering_info = rendering_info.depth_attachment_format(texture_format_to_vk(depth_format));
            if depth_format.has_stencil() {
                rendering_info = rendering_info.stencil_attachment_format(texture_format_to_vk(depth_format));
            }
        }

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let pipelines = device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|e| rhi_err!(SOURCE, "Failed to create graphics pipeline '{}': {:?}", desc.debug_name, e.1))?;

        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| rhi_err!(SOURCE, "Driver returned no pipeline for '{}'", desc.debug_name))
    }

    /// Current push-constant block, `None` when the shaders declare none
    pub(crate) fn push_constant_data(&self) -> Option<Vec<u8>> {
        self.reflection.push_constants.as_ref()?;
        Some(lock(&self.push_data).clone())
    }
}

impl Pipeline for VulkanPipeline {
    fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    fn set_uniform(&self, name: &str, value: UniformValue) {
        self.parameters.set_uniform(name, value);
    }

    fn commit_parameters(&self) -> bool {
        if self.pipeline == vk::Pipeline::null() {
            return false;
        }
        let Some(values) = self.parameters.take_dirty() else {
            return false;
        };

        let mut data = lock(&self.push_data);
        for (name, value) in &values {
            let written = self.reflection.push_constants
                .as_ref()
                .is_some_and(|block| block.write(&mut data, name, &value.to_gpu_bytes()));
            if !written {
                rhi_warn!(SOURCE, "Pipeline '{}' has no push constant '{}', value ignored", self.debug_name, name);
            }
        }
        self.ctx.record_parameter_commit();
        true
    }

    fn has_dirty_parameters(&self) -> bool {
        self.parameters.has_dirty()
    }

    fn parameter_cache(&self) -> ParameterCache {
        self.parameters.snapshot()
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        self.ctx.retire(PendingDestroy::Pipeline {
            pipeline: self.pipeline,
            layout: self.layout,
            set_layout: self.set_layout,
        });
    }
}

#[cfg(test)]
#[path = "vulkan_pipeline_tests.rs"]
mod tests;
