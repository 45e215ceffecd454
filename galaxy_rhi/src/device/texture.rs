/// Texture trait, texture descriptor, and texture info

use bitflags::bitflags;

use crate::device::Resource;

/// Texture pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum TextureFormat {
    R8G8B8A8_UNORM,
    R8G8B8A8_SRGB,
    B8G8R8A8_UNORM,
    B8G8R8A8_SRGB,
    R32G32B32A32_SFLOAT,
    D32_FLOAT,
    D24_UNORM_S8_UINT,
}

impl TextureFormat {
    /// Bytes per texel
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R32G32B32A32_SFLOAT => 16,
            _ => 4,
        }
    }

    /// Whether this is a depth (or depth/stencil) format
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::D32_FLOAT | TextureFormat::D24_UNORM_S8_UINT)
    }

    /// Whether the format carries a stencil component
    pub fn has_stencil(&self) -> bool {
        matches!(self, TextureFormat::D24_UNORM_S8_UINT)
    }
}

/// Texture dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureType {
    /// Simple 2D texture
    Tex2D,
    /// 2D texture array
    Array2D,
    /// Cubemap (6 layers)
    Cube,
}

bitflags! {
    /// How a texture may be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const DEPTH_STENCIL = 1 << 2;
        const TRANSFER_SRC = 1 << 3;
        const TRANSFER_DST = 1 << 4;
    }
}

/// Descriptor for creating a texture
#[derive(Debug, Clone)]
pub struct TextureDesc {
    /// Dimensionality
    pub texture_type: TextureType,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Number of array layers (1 = simple 2D texture)
    pub array_layers: u32,
    /// Number of mip levels
    pub mip_levels: u32,
    /// Pixel format
    pub format: TextureFormat,
    /// Usage flags
    pub usage: TextureUsage,
    /// Optional initial contents of mip 0, all layers, tightly packed
    pub data: Option<Vec<u8>>,
    /// Debug name
    pub debug_name: String,
}

impl TextureDesc {
    /// Single-layer, single-mip 2D texture without initial data
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage, debug_name: &str) -> Self {
        Self {
            texture_type: TextureType::Tex2D,
            width,
            height,
            array_layers: 1,
            mip_levels: 1,
            format,
            usage,
            data: None,
            debug_name: debug_name.to_string(),
        }
    }

    /// Bytes of mip 0 over every layer
    pub fn byte_size(&self) -> u64 {
        self.width as u64
            * self.height as u64
            * self.array_layers as u64
            * self.format.bytes_per_pixel() as u64
    }
}

/// Read-only properties of a created texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub texture_type: TextureType,
    pub width: u32,
    pub height: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl From<&TextureDesc> for TextureInfo {
    fn from(desc: &TextureDesc) -> Self {
        Self {
            texture_type: desc.texture_type,
            width: desc.width,
            height: desc.height,
            array_layers: desc.array_layers,
            mip_levels: desc.mip_levels,
            format: desc.format,
            usage: desc.usage,
        }
    }
}

/// Texture resource trait
pub trait Texture: Resource {
    /// Properties the texture was created with
    fn info(&self) -> &TextureInfo;
}
