/// VulkanTexture - Vulkan implementation of the Texture trait
///
/// Each texture tracks its current image layout so barriers can be recorded
/// from the layout it is actually in.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;
use galaxy_rhi::rhi::device::{ResourceId, Texture, TextureDesc, TextureInfo, TextureType, TextureUsage};
use galaxy_rhi::rhi::Result;
use galaxy_rhi::rhi_err;
use std::sync::{Arc, Mutex};

use crate::vulkan_context::{lock, GpuContext, PendingDestroy, SOURCE};
use crate::vulkan_format::{aspect_flags, texture_format_to_vk, texture_usage_to_vk};

/// Vulkan texture implementation
pub struct VulkanTexture {
    pub(crate) id: ResourceId,
    pub(crate) debug_name: String,
    pub(crate) ctx: Arc<GpuContext>,
    /// Vulkan image
    pub(crate) image: vk::Image,
    /// View over every mip and layer
    pub(crate) view: vk::ImageView,
    allocation: Option<Allocation>,
    info: TextureInfo,
    aspect: vk::ImageAspectFlags,
    layout: Mutex<vk::ImageLayout>,
}

vulkan_resource!(VulkanTexture);

impl VulkanTexture {
    /// Create the image, its view, and upload `desc.data` if present
    ///
    /// Uploaded textures end in `SHADER_READ_ONLY_OPTIMAL` when sampled,
    /// otherwise in `TRANSFER_DST_OPTIMAL`. Textures without data start
    /// `UNDEFINED`.
    pub(crate) fn create(ctx: &Arc<GpuContext>, desc: &TextureDesc) -> Result<Self> {
        let format = texture_format_to_vk(desc.format);
        let aspect = aspect_flags(desc.format);
        let is_cube = desc.texture_type == TextureType::Cube;

        let create_info = vk::ImageCreateInfo::default()
            .flags(if is_cube { vk::ImageCreateFlags::CUBE_COMPATIBLE } else { vk::ImageCreateFlags::empty() })
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width: desc.width, height: desc.height, depth: 1 })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(texture_usage_to_vk(desc.usage, desc.data.is_some()))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, allocation) = ctx.create_image(&desc.debug_name, &create_info)?;

        let view_type = match desc.texture_type {
            TextureType::Tex2D if desc.array_layers == 1 => vk::ImageViewType::TYPE_2D,
            TextureType::Tex2D | TextureType::Array2D => vk::ImageViewType::TYPE_2D_ARRAY,
            TextureType::Cube => vk::ImageViewType::CUBE,
        };

        let range = vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: desc.mip_levels,
            base_array_layer: 0,
            layer_count: desc.array_layers,
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(range);

        let view = match unsafe { ctx.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                ctx.destroy_now(PendingDestroy::Image { image, view: vk::ImageView::null(), allocation });
                return Err(rhi_err!(SOURCE, "Failed to create view of texture '{}': {:?}", desc.debug_name, e));
            }
        };

        ctx.resource_created();
        let texture = Self {
            id: ResourceId::next(),
            debug_name: desc.debug_name.clone(),
            ctx: Arc::clone(ctx),
            image,
            view,
            allocation: Some(allocation),
            info: TextureInfo::from(desc),
            aspect,
            layout: Mutex::new(vk::ImageLayout::UNDEFINED),
        };

        if let Some(data) = &desc.data {
            texture.upload(data)?;
        }
        Ok(texture)
    }

    /// Copy tightly packed mip-0 data of every layer through a staging buffer
    fn upload(&self, data: &[u8]) -> Result<()> {
        let (staging, staging_allocation) = self.ctx.create_buffer(
            "texture staging",
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;

        let Some(mapped) = staging_allocation.mapped_ptr() else {
            self.ctx.destroy_now(PendingDestroy::Buffer { buffer: staging, allocation: staging_allocation });
            return Err(rhi_err!(SOURCE, "Staging buffer for '{}' is not CPU-accessible", self.debug_name));
        };
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr() as *mut u8, data.len());
        }

        let final_layout = if self.info.usage.contains(TextureUsage::SAMPLED) {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        } else {
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        };

        let result = self.ctx.submit_one_shot(|cmd| {
            self.transition(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: self.aspect,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: self.info.array_layers,
                })
                .image_extent(vk::Extent3D { width: self.info.width, height: self.info.height, depth: 1 });

            unsafe {
                self.ctx.device.cmd_copy_buffer_to_image(
                    cmd,
                    staging,
                    self.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            self.transition(cmd, final_layout);
            Ok(())
        });

        // The one-shot submission has completed, the staging buffer is free
        self.ctx.destroy_now(PendingDestroy::Buffer { buffer: staging, allocation: staging_allocation });
        result
    }

    pub(crate) fn layout(&self) -> vk::ImageLayout {
        *lock(&self.layout)
    }

    pub(crate) fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub(crate) fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.info.mip_levels,
            base_array_layer: 0,
            layer_count: self.info.array_layers,
        }
    }

    /// Record a transition from the tracked layout to `new_layout`
    pub(crate) fn transition(&self, cmd: vk::CommandBuffer, new_layout: vk::ImageLayout) {
        let old_layout = self.layout();
        if old_layout != new_layout {
            self.transition_from(cmd, old_layout, new_layout);
        }
    }

    /// Record a transition from an explicit `old_layout`
    ///
    /// `UNDEFINED` discards the previous contents.
    pub(crate) fn transition_from(&self, cmd: vk::CommandBuffer, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) {
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.subresource_range());

        unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        *lock(&self.layout) = new_layout;
    }
}

impl Texture for VulkanTexture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.ctx.retire(PendingDestroy::Image {
                image: self.image,
                view: self.view,
                allocation,
            });
        }
    }
}
