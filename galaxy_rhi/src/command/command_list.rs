/// Thread-safe command list
///
/// Records graphics operations between `begin()` and `end()` so they can be
/// replayed later on any device. Recording calls may come from many threads
/// at once; `begin`/`end`/`reset` are expected to be sequenced by the owner.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::{
    ClearParams, Device, DrawIndexedParams, DrawParams, Framebuffer, Pipeline, Rect2D,
    RenderPassBegin, ResourceBarrier, Texture, VertexArray, Viewport,
};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::{rhi_debug, rhi_error, rhi_warn};

const SOURCE: &str = "galaxy_rhi::CommandList";

#[derive(Debug, Default)]
struct CommandListState {
    recording: bool,
    commands: Vec<Command>,
}

/// Ordered, replayable recording of commands
#[derive(Debug)]
pub struct CommandList {
    debug_name: String,
    state: Mutex<CommandListState>,
}

impl CommandList {
    /// Create an empty, non-recording list
    pub fn new(debug_name: &str) -> Self {
        Self {
            debug_name: debug_name.to_string(),
            state: Mutex::new(CommandListState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CommandListState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    // ===== LIFECYCLE =====

    /// Start recording, discarding any previous commands
    ///
    /// Fails without touching the list when it is already recording.
    pub fn begin(&self) -> Result<()> {
        let mut state = self.lock();
        if state.recording {
            rhi_error!(SOURCE, "begin() on '{}' while already recording", self.debug_name);
            return Err(Error::InvalidState(format!(
                "command list '{}' is already recording", self.debug_name
            )));
        }
        state.commands.clear();
        state.recording = true;
        Ok(())
    }

    /// Stop recording; recorded commands are kept
    pub fn end(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.recording {
            rhi_error!(SOURCE, "end() on '{}' while not recording", self.debug_name);
            return Err(Error::InvalidState(format!(
                "command list '{}' is not recording", self.debug_name
            )));
        }
        state.recording = false;
        Ok(())
    }

    /// Drop every command and stop recording
    pub fn reset(&self) {
        let mut state = self.lock();
        state.commands.clear();
        state.recording = false;
    }

    // ===== RECORDING =====

    fn record(&self, command: Command) {
        let mut state = self.lock();
        if !state.recording {
            rhi_error!(
                SOURCE,
                "{:?} recorded into '{}' outside begin()/end(), ignored",
                command.command_type(),
                self.debug_name
            );
            return;
        }
        state.commands.push(command);
    }

    pub fn clear(&self, params: ClearParams) {
        self.record(Command::Clear(params));
    }

    pub fn draw(&self, params: DrawParams) {
        self.record(Command::Draw(params));
    }

    pub fn draw_indexed(&self, params: DrawIndexedParams) {
        self.record(Command::DrawIndexed(params));
    }

    pub fn bind_pipeline(&self, pipeline: &Arc<dyn Pipeline>) {
        self.record(Command::BindPipeline(Arc::clone(pipeline)));
    }

    pub fn bind_vertex_array(&self, vertex_array: &Arc<dyn VertexArray>) {
        self.record(Command::BindVertexArray(Arc::clone(vertex_array)));
    }

    pub fn bind_texture(&self, texture: &Arc<dyn Texture>, slot: u32) {
        self.record(Command::BindTexture { texture: Arc::clone(texture), slot });
    }

    /// Bind a render target (`None` = device backbuffer)
    pub fn bind_framebuffer(&self, framebuffer: Option<&Arc<dyn Framebuffer>>) {
        self.record(Command::BindFramebuffer(framebuffer.cloned()));
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.record(Command::SetViewport(viewport));
    }

    pub fn set_scissor(&self, scissor: Rect2D) {
        self.record(Command::SetScissor(scissor));
    }

    pub fn resource_barrier(&self, barrier: ResourceBarrier) {
        self.record(Command::ResourceBarrier(barrier));
    }

    pub fn blit_framebuffer_to_screen(&self, framebuffer: &Arc<dyn Framebuffer>) {
        self.record(Command::BlitFramebufferToScreen(Arc::clone(framebuffer)));
    }

    pub fn begin_render_pass(&self, begin: RenderPassBegin) {
        self.record(Command::BeginRenderPass(begin));
    }

    pub fn end_render_pass(&self) {
        self.record(Command::EndRenderPass);
    }

    // ===== QUERIES =====

    /// Copy of the recorded commands
    ///
    /// Reading while recording is allowed but suspicious, so it is logged.
    pub fn commands(&self) -> Vec<Command> {
        let state = self.lock();
        if state.recording {
            rhi_warn!(SOURCE, "commands() on '{}' while still recording", self.debug_name);
        }
        state.commands.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().commands.is_empty()
    }

    pub fn command_count(&self) -> usize {
        self.lock().commands.len()
    }

    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    // ===== REPLAY =====

    /// Replay every command on `device`, in recording order
    ///
    /// A failing command is logged and replay continues with the next one.
    /// Returns the number of commands issued (0 if the list is still recording).
    pub fn execute(&self, device: &mut dyn Device) -> usize {
        self.replay(device).map_or(0, |replay| replay.issued)
    }

    /// Replay like [`execute`](Self::execute), but report failures
    ///
    /// Every command is still issued. Fails with `InvalidState` when the list
    /// is recording, otherwise with the first device error if any command failed.
    pub fn try_execute(&self, device: &mut dyn Device) -> Result<usize> {
        let replay = self.replay(device)?;
        match replay.first_error {
            None => Ok(replay.issued),
            Some(e) => {
                rhi_error!(
                    SOURCE,
                    "{} of {} command(s) from '{}' failed",
                    replay.failed,
                    replay.issued,
                    self.debug_name
                );
                Err(e)
            }
        }
    }

    fn replay(&self, device: &mut dyn Device) -> Result<Replay> {
        let commands = {
            let state = self.lock();
            if state.recording {
                rhi_error!(SOURCE, "Cannot execute '{}' while it is recording", self.debug_name);
                return Err(Error::InvalidState(format!(
                    "command list '{}' is still recording", self.debug_name
                )));
            }
            state.commands.clone()
        };

        let mut replay = Replay { issued: commands.len(), failed: 0, first_error: None };
        for command in &commands {
            if let Err(e) = command.execute(device) {
                rhi_error!(
                    SOURCE,
                    "{:?} from '{}' failed: {}",
                    command.command_type(),
                    self.debug_name,
                    e
                );
                replay.failed += 1;
                replay.first_error.get_or_insert(e);
            }
        }

        rhi_debug!(SOURCE, "Executed {} command(s) from '{}'", commands.len(), self.debug_name);
        Ok(replay)
    }
}

struct Replay {
    issued: usize,
    failed: usize,
    first_error: Option<Error>,
}

#[cfg(test)]
#[path = "command_list_tests.rs"]
mod tests;
