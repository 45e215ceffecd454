/// Device module: descriptors, resource traits and the backend contract

mod types;
mod resource;
mod buffer;
mod texture;
mod shader;
mod pipeline;
mod framebuffer;
mod vertex_array;
mod parameter_cache;
mod device;

#[cfg(test)]
pub(crate) mod mock_device;

pub use types::*;
pub use resource::*;
pub use buffer::*;
pub use texture::*;
pub use shader::*;
pub use pipeline::*;
pub use framebuffer::*;
pub use vertex_array::*;
pub use parameter_cache::*;
pub use device::*;
