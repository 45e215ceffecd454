/// VulkanFramebuffer - Vulkan implementation of the Framebuffer trait
///
/// With dynamic rendering there is no VkFramebuffer: the framebuffer is the
/// set of attachments handed to `vkCmdBeginRendering`. It keeps them alive.

use galaxy_rhi::rhi::device::{Framebuffer, ResourceId, Texture};
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Vulkan framebuffer implementation
pub struct VulkanFramebuffer {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    pub(crate) ctx: Arc<GpuContext>,
    width: u32,
    height: u32,
    color_attachments: Vec<Arc<dyn Texture>>,
    depth_attachment: Option<Arc<dyn Texture>>,
}

vulkan_resource!(VulkanFramebuffer);

impl VulkanFramebuffer {
    /// Attachments must have been validated by the device
    pub(crate) fn new(
        ctx: &Arc<GpuContext>,
        width: u32,
        height: u32,
        color_attachments: Vec<Arc<dyn Texture>>,
        depth_attachment: Option<Arc<dyn Texture>>,
        debug_name: &str,
    ) -> Self {
        ctx.resource_created();
        Self {
            id: ResourceId::next(),
            debug_name: debug_name.to_string(),
            ctx: Arc::clone(ctx),
            width,
            height,
            color_attachments,
            depth_attachment,
        }
    }
}

impl Framebuffer for VulkanFramebuffer {
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

impl Drop for VulkanFramebuffer {
    fn drop(&mut self) {
        self.ctx.resource_released();
    }
}
