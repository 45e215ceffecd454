/// Legacy graphics context
///
/// Models a globally-stateful graphics API: every object is an integer name
/// in one object table, and the context belongs to a single thread at a time.
/// Objects released from a thread that does not own the context are queued
/// and deleted the next time the owning thread starts or ends a frame.

use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use slotmap::{new_key_type, SlotMap};
use rustc_hash::FxHashMap;

use crate::device::{DeviceStats, ShaderStage, TextureFormat, TextureInfo, UniformValue};
use crate::error::{Error, Result};
use crate::rhi_trace;

const SOURCE: &str = "galaxy_rhi::legacy";

new_key_type! {
    /// Name of an object in the context's object table
    pub struct ObjectName;
}

/// Object stored in the context
#[derive(Debug)]
pub(crate) enum GlObject {
    Buffer { data: Vec<u8> },
    Texture { info: TextureInfo, pixels: Vec<u8> },
    Shader { stage: ShaderStage },
    Program { stages: Vec<ShaderStage>, uniforms: FxHashMap<String, UniformValue> },
    Framebuffer { color: Vec<ObjectName>, depth: Option<ObjectName> },
    VertexArray,
}

impl GlObject {
    fn kind(&self) -> &'static str {
        match self {
            GlObject::Buffer { .. } => "buffer",
            GlObject::Texture { .. } => "texture",
            GlObject::Shader { .. } => "shader",
            GlObject::Program { .. } => "program",
            GlObject::Framebuffer { .. } => "framebuffer",
            GlObject::VertexArray => "vertex array",
        }
    }
}

/// RGBA8 default framebuffer
#[derive(Debug)]
pub(crate) struct Backbuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Backbuffer {
    fn new(width: u32, height: u32) -> Self {
        Self { width, height, pixels: vec![0; width as usize * height as usize * 4] }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]])
    }
}

#[derive(Debug)]
pub(crate) struct ContextState {
    pub objects: SlotMap<ObjectName, GlObject>,
    pub pending_deletes: Vec<ObjectName>,
    pub backbuffer: Backbuffer,
    pub stats: DeviceStats,
}

impl ContextState {
    /// Insert an object and count it as live
    pub fn create(&mut self, object: GlObject) -> ObjectName {
        self.stats.live_resources += 1;
        self.objects.insert(object)
    }

    fn delete(&mut self, name: ObjectName) {
        if let Some(object) = self.objects.remove(name) {
            rhi_trace!(SOURCE, "Deleted {} {:?}", object.kind(), name);
            self.stats.live_resources -= 1;
            self.stats.destroyed_resources += 1;
        }
    }

    /// Delete every object released from a foreign thread
    pub fn drain_pending_deletes(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending_deletes);
        for name in &pending {
            self.delete(*name);
        }
        self.stats.pending_destroys = 0;
        pending.len()
    }

    pub fn texture_mut(&mut self, name: ObjectName) -> Option<(&TextureInfo, &mut Vec<u8>)> {
        match self.objects.get_mut(name) {
            Some(GlObject::Texture { info, pixels }) => Some((&*info, pixels)),
            _ => None,
        }
    }
}

/// Context shared by the legacy device and the objects it created
#[derive(Debug)]
pub struct LegacyContext {
    owner: Mutex<Option<ThreadId>>,
    state: Mutex<ContextState>,
}

impl LegacyContext {
    /// Create a context current on the calling thread
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            owner: Mutex::new(Some(thread::current().id())),
            state: Mutex::new(ContextState {
                objects: SlotMap::with_key(),
                pending_deletes: Vec::new(),
                backbuffer: Backbuffer::new(width, height),
                stats: DeviceStats::default(),
            }),
        }
    }

    fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.owner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the calling thread owns the context
    pub fn is_current(&self) -> bool {
        *self.owner() == Some(thread::current().id())
    }

    /// Fail with `ContextNotCurrent` unless the calling thread owns the context
    pub(crate) fn ensure_current(&self, operation: &str) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(Error::ContextNotCurrent(format!(
                "{} called from {:?}, which does not own the context",
                operation,
                thread::current().name().unwrap_or("<unnamed>")
            )))
        }
    }

    /// Take the context on the calling thread; fails while another thread holds it
    pub(crate) fn make_current(&self) -> bool {
        let mut owner = self.owner();
        let me = thread::current().id();
        match *owner {
            Some(id) if id != me => false,
            _ => {
                *owner = Some(me);
                true
            }
        }
    }

    /// Release the context if the calling thread holds it
    pub(crate) fn release_current(&self) -> bool {
        let mut owner = self.owner();
        if *owner == Some(thread::current().id()) {
            *owner = None;
            true
        } else {
            false
        }
    }

    /// Delete `name` now when called on the owning thread, later otherwise
    pub(crate) fn release(&self, name: ObjectName) {
        let current = self.is_current();
        let mut state = self.lock();
        if current {
            state.delete(name);
        } else {
            rhi_trace!(SOURCE, "Deferring deletion of {:?} to the context thread", name);
            state.pending_deletes.push(name);
            state.stats.pending_destroys += 1;
        }
    }
}

/// Byte encoding of a clear color in `format` (`None` for depth formats)
pub(crate) fn encode_color(format: TextureFormat, color: [f32; 4]) -> Option<Vec<u8>> {
    let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let [r, g, b, a] = color;
    match format {
        TextureFormat::R8G8B8A8_UNORM | TextureFormat::R8G8B8A8_SRGB => {
            Some(vec![unorm(r), unorm(g), unorm(b), unorm(a)])
        }
        TextureFormat::B8G8R8A8_UNORM | TextureFormat::B8G8R8A8_SRGB => {
            Some(vec![unorm(b), unorm(g), unorm(r), unorm(a)])
        }
        TextureFormat::R32G32B32A32_SFLOAT => Some(bytemuck::bytes_of(&color).to_vec()),
        TextureFormat::D32_FLOAT | TextureFormat::D24_UNORM_S8_UINT => None,
    }
}

/// RGBA8 value of the texel starting at `bytes`
pub(crate) fn decode_rgba8(format: TextureFormat, bytes: &[u8]) -> [u8; 4] {
    match format {
        TextureFormat::B8G8R8A8_UNORM | TextureFormat::B8G8R8A8_SRGB => {
            [bytes[2], bytes[1], bytes[0], bytes[3]]
        }
        TextureFormat::R32G32B32A32_SFLOAT => {
            let texel: [f32; 4] = bytemuck::pod_read_unaligned(&bytes[..16]);
            let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            [unorm(texel[0]), unorm(texel[1]), unorm(texel[2]), unorm(texel[3])]
        }
        _ => [bytes[0], bytes[1], bytes[2], bytes[3]],
    }
}
