/// Recorded graphics commands
///
/// A closed set of operations, one variant per device operation. Replaying a
/// command is a single exhaustive match onto the device contract.

use std::sync::Arc;

use crate::device::{
    ClearParams, Device, DrawIndexedParams, DrawParams, Framebuffer, Pipeline, Rect2D,
    RenderPassBegin, ResourceBarrier, Texture, VertexArray, Viewport,
};
use crate::error::Result;

/// Kind of a recorded command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    Clear,
    Draw,
    DrawIndexed,
    BindPipeline,
    BindVertexArray,
    BindTexture,
    BindFramebuffer,
    SetViewport,
    SetScissor,
    ResourceBarrier,
    BlitFramebufferToScreen,
    BeginRenderPass,
    EndRenderPass,
}

/// One recorded operation with its payload
///
/// Resources are held by shared reference and compare by identity.
#[derive(Debug, Clone)]
pub enum Command {
    Clear(ClearParams),
    Draw(DrawParams),
    DrawIndexed(DrawIndexedParams),
    BindPipeline(Arc<dyn Pipeline>),
    BindVertexArray(Arc<dyn VertexArray>),
    BindTexture { texture: Arc<dyn Texture>, slot: u32 },
    /// `None` binds the device backbuffer
    BindFramebuffer(Option<Arc<dyn Framebuffer>>),
    SetViewport(Viewport),
    SetScissor(Rect2D),
    ResourceBarrier(ResourceBarrier),
    BlitFramebufferToScreen(Arc<dyn Framebuffer>),
    BeginRenderPass(RenderPassBegin),
    EndRenderPass,
}

impl Command {
    /// Tag matching the variant
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Clear(_) => CommandType::Clear,
            Command::Draw(_) => CommandType::Draw,
            Command::DrawIndexed(_) => CommandType::DrawIndexed,
            Command::BindPipeline(_) => CommandType::BindPipeline,
            Command::BindVertexArray(_) => CommandType::BindVertexArray,
            Command::BindTexture { .. } => CommandType::BindTexture,
            Command::BindFramebuffer(_) => CommandType::BindFramebuffer,
            Command::SetViewport(_) => CommandType::SetViewport,
            Command::SetScissor(_) => CommandType::SetScissor,
            Command::ResourceBarrier(_) => CommandType::ResourceBarrier,
            Command::BlitFramebufferToScreen(_) => CommandType::BlitFramebufferToScreen,
            Command::BeginRenderPass(_) => CommandType::BeginRenderPass,
            Command::EndRenderPass => CommandType::EndRenderPass,
        }
    }

    /// Issue the command on `device`
    pub fn execute(&self, device: &mut dyn Device) -> Result<()> {
        match self {
            Command::Clear(params) => device.clear(params),
            Command::Draw(params) => device.draw(params),
            Command::DrawIndexed(params) => device.draw_indexed(params),
            Command::BindPipeline(pipeline) => device.bind_pipeline(pipeline),
            Command::BindVertexArray(vertex_array) => device.bind_vertex_array(vertex_array),
            Command::BindTexture { texture, slot } => device.bind_texture(texture, *slot),
            Command::BindFramebuffer(framebuffer) => device.bind_framebuffer(framebuffer.as_ref()),
            Command::SetViewport(viewport) => device.set_viewport(*viewport),
            Command::SetScissor(scissor) => device.set_scissor(*scissor),
            Command::ResourceBarrier(barrier) => device.resource_barrier(barrier),
            Command::BlitFramebufferToScreen(framebuffer) => device.blit_framebuffer_to_screen(framebuffer),
            Command::BeginRenderPass(begin) => device.begin_render_pass(begin),
            Command::EndRenderPass => device.end_render_pass(),
        }
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Command::Clear(a), Command::Clear(b)) => a == b,
            (Command::Draw(a), Command::Draw(b)) => a == b,
            (Command::DrawIndexed(a), Command::DrawIndexed(b)) => a == b,
            (Command::BindPipeline(a), Command::BindPipeline(b)) => a.id() == b.id(),
            (Command::BindVertexArray(a), Command::BindVertexArray(b)) => a.id() == b.id(),
            (
                Command::BindTexture { texture: a, slot: slot_a },
                Command::BindTexture { texture: b, slot: slot_b },
            ) => a.id() == b.id() && slot_a == slot_b,
            (Command::BindFramebuffer(a), Command::BindFramebuffer(b)) => {
                a.as_ref().map(|fb| fb.id()) == b.as_ref().map(|fb| fb.id())
            }
            (Command::SetViewport(a), Command::SetViewport(b)) => a == b,
            (Command::SetScissor(a), Command::SetScissor(b)) => a == b,
            (Command::ResourceBarrier(a), Command::ResourceBarrier(b)) => a == b,
            (Command::BlitFramebufferToScreen(a), Command::BlitFramebufferToScreen(b)) => a.id() == b.id(),
            (Command::BeginRenderPass(a), Command::BeginRenderPass(b)) => a == b,
            (Command::EndRenderPass, Command::EndRenderPass) => true,
            _ => false,
        }
    }
}
