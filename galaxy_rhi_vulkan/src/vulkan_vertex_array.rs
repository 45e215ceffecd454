/// VulkanVertexArray - Vulkan implementation of the VertexArray trait
///
/// Vulkan has no vertex array object; the bindings are replayed with
/// `vkCmdBindVertexBuffers`/`vkCmdBindIndexBuffer` at draw time.

use galaxy_rhi::rhi::device::{
    IndexBufferBinding, ResourceId, VertexArray, VertexArrayDesc, VertexBufferBinding, VertexLayout,
};
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Vulkan vertex array implementation
pub struct VulkanVertexArray {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    pub(crate) ctx: Arc<GpuContext>,
    layout: VertexLayout,
    vertex_buffers: Vec<VertexBufferBinding>,
    index_buffer: Option<IndexBufferBinding>,
}

vulkan_resource!(VulkanVertexArray);

impl VulkanVertexArray {
    /// Buffers must have been validated by the device
    pub(crate) fn new(ctx: &Arc<GpuContext>, desc: &VertexArrayDesc) -> Self {
        ctx.resource_created();
        Self {
            id: ResourceId::next(),
            debug_name: desc.debug_name.clone(),
            ctx: Arc::clone(ctx),
            layout: desc.layout.clone(),
            vertex_buffers: desc.vertex_buffers.clone(),
            index_buffer: desc.index_buffer.clone(),
        }
    }
}

impl VertexArray for VulkanVertexArray {
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

impl Drop for VulkanVertexArray {
    fn drop(&mut self) {
        self.ctx.resource_released();
    }
}
