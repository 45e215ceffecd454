/// Framebuffer trait and framebuffer descriptor

use std::sync::Arc;

use crate::device::{Resource, Texture};

/// Descriptor for creating a framebuffer
#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    /// Color attachments (must share the framebuffer size)
    pub color_attachments: Vec<Arc<dyn Texture>>,
    pub depth_attachment: Option<Arc<dyn Texture>>,
    pub width: u32,
    pub height: u32,
    pub debug_name: String,
}

impl FramebufferDesc {
    /// Framebuffer over one color texture, sized after it
    pub fn single(color: Arc<dyn Texture>, debug_name: &str) -> Self {
        let info = *color.info();
        Self {
            color_attachments: vec![color],
            depth_attachment: None,
            width: info.width,
            height: info.height,
            debug_name: debug_name.to_string(),
        }
    }
}

/// Framebuffer resource trait
///
/// Keeps its attachments alive for as long as it lives.
pub trait Framebuffer: Resource {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn color_attachments(&self) -> &[Arc<dyn Texture>];

    fn depth_attachment(&self) -> Option<&Arc<dyn Texture>>;
}
