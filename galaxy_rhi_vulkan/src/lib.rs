/*!
# Galaxy RHI - Vulkan Backend

Vulkan implementation of the Galaxy RHI device contract.

This crate provides a headless Vulkan 1.3 device that implements the
galaxy_rhi `Device` trait using the Ash library for Vulkan bindings,
gpu-allocator for memory management and spirq for shader reflection.

The backend registers itself in a `BackendRegistry` and is selected at
runtime through `RhiConfig::rhi_type`.
*/

/// Implements `Resource` and `Debug` for a Vulkan resource type
///
/// The type needs `id`, `debug_name` and `ctx: Arc<GpuContext>` fields.
macro_rules! vulkan_resource {
    ($ty:ident) => {
        impl galaxy_rhi::rhi::device::Resource for $ty {
            fn id(&self) -> galaxy_rhi::rhi::device::ResourceId {
                self.id
            }

            fn debug_name(&self) -> &str {
                &self.debug_name
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("id", &self.id)
                    .field("debug_name", &self.debug_name)
                    .finish_non_exhaustive()
            }
        }

        impl $ty {
            /// Whether this resource was created on the device owning `ctx`
            pub(crate) fn belongs_to(&self, ctx: &std::sync::Arc<$crate::vulkan_context::GpuContext>) -> bool {
                std::sync::Arc::ptr_eq(&self.ctx, ctx)
            }
        }
    };
}

// Vulkan implementation modules
mod vulkan_context;
mod vulkan_format;
mod vulkan_buffer;
mod vulkan_texture;
mod vulkan_shader;
mod vulkan_pipeline;
mod vulkan_framebuffer;
mod vulkan_vertex_array;
mod vulkan_device;

#[cfg(feature = "vulkan-validation")]
mod debug;

use galaxy_rhi::rhi::{BackendRegistry, RhiType};

pub use vulkan_device::VulkanDevice;
pub use vulkan_buffer::VulkanBuffer;
pub use vulkan_texture::VulkanTexture;
pub use vulkan_shader::{PushConstantBlock, PushConstantMember, ShaderReflection, VulkanShader};
pub use vulkan_pipeline::{merge_reflections, PipelineReflection, VulkanPipeline};
pub use vulkan_framebuffer::VulkanFramebuffer;
pub use vulkan_vertex_array::VulkanVertexArray;

// Re-export debug utilities
#[cfg(feature = "vulkan-validation")]
pub use debug::{get_validation_stats, print_validation_stats_report, ValidationStats};

/// Register the Vulkan backend
///
/// # Example
///
/// ```no_run
/// use galaxy_rhi::rhi::{BackendRegistry, RhiConfig, RhiType};
///
/// let mut registry = BackendRegistry::with_defaults();
/// galaxy_rhi_vulkan::register(&mut registry);
///
/// let config = RhiConfig { rhi_type: RhiType::Vulkan, ..RhiConfig::default() };
/// let device = registry.create_device(&config)?;
/// # Ok::<(), galaxy_rhi::rhi::Error>(())
/// ```
pub fn register(registry: &mut BackendRegistry) {
    registry.register(RhiType::Vulkan, VulkanDevice::create_shared);
}
