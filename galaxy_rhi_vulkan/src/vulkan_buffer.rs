/// VulkanBuffer - Vulkan implementation of the Buffer trait
///
/// Buffers live in host-visible memory so `update` is a plain memcpy.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;
use galaxy_rhi::rhi::device::{Buffer, BufferDesc, BufferType, ResourceId};
use galaxy_rhi::rhi::{Error, Result};
use galaxy_rhi::rhi_error;
use std::sync::Arc;

use crate::vulkan_context::{GpuContext, PendingDestroy, SOURCE};
use crate::vulkan_format::buffer_type_to_vk;

/// Vulkan buffer implementation
pub struct VulkanBuffer {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    /// Shared GPU context (device, allocator, deletion queue)
    pub(crate) ctx: Arc<GpuContext>,
    /// Vulkan buffer
    pub(crate) buffer: vk::Buffer,
    /// GPU memory allocation (taken on drop)
    allocation: Option<Allocation>,
    size: u64,
    buffer_type: BufferType,
}

vulkan_resource!(VulkanBuffer);

impl VulkanBuffer {
    /// Create a buffer from a descriptor and upload its initial contents
    pub(crate) fn create(ctx: &Arc<GpuContext>, desc: &BufferDesc) -> Result<Self> {
        let (buffer, allocation) = ctx.create_buffer(
            &desc.debug_name,
            desc.size,
            buffer_type_to_vk(desc.buffer_type),
            MemoryLocation::CpuToGpu,
        )?;

        let buffer = Self::from_parts(ctx, buffer, allocation, desc.size, desc.buffer_type, &desc.debug_name);
        if let Some(data) = &desc.data {
            buffer.update(0, data)?;
        }
        Ok(buffer)
    }

    /// Host-readable buffer used as a copy destination
    pub(crate) fn create_readback(ctx: &Arc<GpuContext>, size: u64, debug_name: &str) -> Result<Self> {
        let (buffer, allocation) = ctx.create_buffer(
            debug_name,
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
        )?;
        Ok(Self::from_parts(ctx, buffer, allocation, size, BufferType::Storage, debug_name))
    }

    fn from_parts(
        ctx: &Arc<GpuContext>,
        buffer: vk::Buffer,
        allocation: Allocation,
        size: u64,
        buffer_type: BufferType,
        debug_name: &str,
    ) -> Self {
        ctx.resource_created();
        Self {
            id: ResourceId::next(),
            debug_name: debug_name.to_string(),
            ctx: Arc::clone(ctx),
            buffer,
            allocation: Some(allocation),
            size,
            buffer_type,
        }
    }

    fn mapped_ptr(&self) -> Result<*mut u8> {
        let allocation = self.allocation.as_ref().ok_or_else(|| {
            rhi_error!(SOURCE, "Buffer '{}' has no GPU allocation", self.debug_name);
            Error::InvalidResource(format!("buffer '{}' has no allocation", self.debug_name))
        })?;

        allocation
            .mapped_ptr()
            .map(|ptr| ptr.as_ptr() as *mut u8)
            .ok_or_else(|| Error::BackendError(format!("buffer '{}' is not CPU-accessible", self.debug_name)))
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::InvalidResource(format!(
                "access of {} bytes at offset {} exceeds buffer '{}' ({} bytes)",
                len, offset, self.debug_name, self.size
            ))),
        }
    }

    /// Read back `len` bytes starting at `offset`
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.check_range(offset, len)?;
        let ptr = self.mapped_ptr()?;

        let mut bytes = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.add(offset as usize), bytes.as_mut_ptr(), len);
        }
        Ok(bytes)
    }
}

impl Buffer for VulkanBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;
        let ptr = self.mapped_ptr()?;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        Ok(())
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.ctx.retire(PendingDestroy::Buffer {
                buffer: self.buffer,
                allocation,
            });
        }
    }
}
