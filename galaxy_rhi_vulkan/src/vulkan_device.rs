/// VulkanDevice - Vulkan implementation of the Device trait
///
/// Headless: the screen is an offscreen RGBA8 backbuffer and `present()`
/// reads it back into host memory.
///
/// Immediate operations are recorded into one frame command buffer opened
/// by `begin_frame()` and submitted by `end_frame()`, which waits for the
/// frame fence before draining the deletion queue. Draws and clears open an
/// implicit dynamic-rendering pass on the bound target; transfers end it.

use ash::vk;
use galaxy_rhi::rhi::device::{
    Buffer, BufferDesc, BufferType, ClearFlags, ClearParams, Device, DeviceCapabilities,
    DeviceFeatures, DeviceStats, DrawIndexedParams, DrawParams, Framebuffer, FramebufferDesc,
    LoadOp, Pipeline, PipelineDesc, PrimitiveTopology, Rect2D, RenderPassBegin, ResourceBarrier,
    ResourceState, Shader, ShaderCode, ShaderDesc, ShaderStage, SharedDevice, Texture,
    TextureDesc, TextureFormat, TextureType, TextureUsage, VertexArray, VertexArrayDesc, Viewport,
};
use galaxy_rhi::rhi::{Error, Result, RhiConfig, RhiType};
use galaxy_rhi::{rhi_debug, rhi_err, rhi_error, rhi_info, rhi_trace, rhi_warn};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use std::any::Any;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use crate::vulkan_buffer::VulkanBuffer;
use crate::vulkan_context::{GpuContext, SOURCE};
use crate::vulkan_format::{index_type_to_vk, load_op_to_vk, resource_state_to_layout};
use crate::vulkan_framebuffer::VulkanFramebuffer;
use crate::vulkan_pipeline::VulkanPipeline;
use crate::vulkan_shader::VulkanShader;
use crate::vulkan_texture::VulkanTexture;
use crate::vulkan_vertex_array::VulkanVertexArray;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

const MAX_TEXTURE_SLOTS: u32 = 16;

/// Descriptor sets allocated per frame (one per draw that samples textures)
const MAX_FRAME_DESCRIPTOR_SETS: u32 = 1024;

/// Backbuffer and readback buffer, not reported in the stats
const INTERNAL_RESOURCES: u64 = 2;

/// Downcast a resource to the Vulkan type and check it was created by `ctx`
fn vulkan<'a, T: 'static>(
    resource: &'a dyn Any,
    debug_name: &str,
    ctx: &Arc<GpuContext>,
    belongs: impl Fn(&T, &Arc<GpuContext>) -> bool,
) -> Result<&'a T> {
    match resource.downcast_ref::<T>() {
        Some(object) if belongs(object, ctx) => Ok(object),
        _ => Err(Error::InvalidResource(format!(
            "'{}' was not created by this Vulkan device", debug_name
        ))),
    }
}

/// Render pass currently open in the frame command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    Outside,
    /// Opened by a draw or clear, closed by the next transfer or target change
    Implicit,
    /// Opened by `begin_render_pass()`
    Explicit,
}

/// Device implementing [`RhiType::Vulkan`]
pub struct VulkanDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    #[cfg(feature = "vulkan-validation")]
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    device_name: String,
    ctx: Arc<GpuContext>,
    capabilities: DeviceCapabilities,

    // Frame objects
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    frame_fence: vk::Fence,
    descriptor_pool: vk::DescriptorPool,
    default_sampler: vk::Sampler,

    backbuffer: ManuallyDrop<VulkanTexture>,
    readback: ManuallyDrop<VulkanBuffer>,

    // Bound state
    viewport: Viewport,
    scissor: Option<Rect2D>,
    bound_pipeline: Option<Arc<dyn Pipeline>>,
    bound_vertex_array: Option<Arc<dyn VertexArray>>,
    bound_framebuffer: Option<Arc<dyn Framebuffer>>,
    bound_textures: Vec<Option<Arc<dyn Texture>>>,

    in_frame: bool,
    pass: PassState,
    stats: DeviceStats,
}

impl VulkanDevice {
    /// Create the instance, pick a GPU and build the headless device
    ///
    /// Requires Vulkan 1.3 with dynamic rendering.
    pub fn new(config: &RhiConfig) -> Result<Self> {
        if config.backbuffer_width == 0 || config.backbuffer_height == 0 {
            return Err(Error::InitializationFailed(format!(
                "invalid backbuffer size {}x{}",
                config.backbuffer_width, config.backbuffer_height
            )));
        }

        unsafe {
            let entry = ash::Entry::load().map_err(|e| {
                rhi_error!(SOURCE, "Failed to load Vulkan library: {:?}", e);
                Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
            })?;

            let validation = Self::validation_requested(&entry, config);

            let app_name = CString::new(config.app_name.as_str()).unwrap_or_default();
            let (major, minor, patch) = config.app_version;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, major, minor, patch))
                .engine_name(c"Galaxy RHI")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            #[allow(unused_mut)]
            let mut extension_names: Vec<*const std::os::raw::c_char> = Vec::new();
            let layer_names = if validation {
                #[cfg(feature = "vulkan-validation")]
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
                vec![VALIDATION_LAYER.as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                rhi_error!(SOURCE, "Failed to create Vulkan instance: {:?}", e);
                Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
            })?;

            #[cfg(feature = "vulkan-validation")]
            let debug_messenger = if validation {
                Self::create_debug_messenger(&entry, &instance)
            } else {
                None
            };

            match Self::create_on_instance(&instance, config) {
                // assemble() tears everything down on error
                Ok(parts) => Self::assemble(
                    entry,
                    parts,
                    instance,
                    #[cfg(feature = "vulkan-validation")]
                    debug_messenger,
                    config,
                ),
                Err(e) => {
                    #[cfg(feature = "vulkan-validation")]
                    if let Some((debug_utils, messenger)) = debug_messenger {
                        crate::debug::cleanup_debug_config();
                        debug_utils.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                    Err(e)
                }
            }
        }
    }

    /// Factory used by the backend registry
    pub fn create_shared(config: &RhiConfig) -> Result<SharedDevice> {
        let device: SharedDevice = Arc::new(Mutex::new(Self::new(config)?));
        Ok(device)
    }

    /// Whether validation layers should be enabled for this configuration
    unsafe fn validation_requested(entry: &ash::Entry, config: &RhiConfig) -> bool {
        if !config.enable_validation {
            return false;
        }
        if !cfg!(feature = "vulkan-validation") {
            rhi_warn!(SOURCE, "Validation requested but the 'vulkan-validation' feature is disabled");
            return false;
        }

        let available = entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers.iter().any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER))
            })
            .unwrap_or(false);
        if !available {
            rhi_warn!(SOURCE, "{:?} is not installed, continuing without validation", VALIDATION_LAYER);
        }
        available
    }

    #[cfg(feature = "vulkan-validation")]
    unsafe fn create_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);
        crate::debug::init_debug_config();

        let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(crate::debug::messenger_severity())
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));

        match debug_utils.create_debug_utils_messenger(&debug_info, None) {
            Ok(messenger) => Some((debug_utils, messenger)),
            Err(e) => {
                rhi_warn!(SOURCE, "Failed to create debug messenger: {:?}", e);
                crate::debug::cleanup_debug_config();
                None
            }
        }
    }

    /// Pick a physical device and create the logical device and its context
    unsafe fn create_on_instance(instance: &ash::Instance, config: &RhiConfig) -> Result<DeviceParts> {
        let physical_devices = instance.enumerate_physical_devices().map_err(|e| {
            rhi_error!(SOURCE, "Failed to enumerate physical devices: {:?}", e);
            Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
        })?;

        let candidate = physical_devices
            .into_iter()
            .filter_map(|pd| Self::evaluate_physical_device(instance, pd))
            .max_by_key(|candidate| candidate.score)
            .ok_or_else(|| {
                rhi_error!(SOURCE, "No GPU with Vulkan 1.3 dynamic rendering and a graphics queue found");
                Error::InitializationFailed("No suitable Vulkan GPU found".to_string())
            })?;

        let properties = instance.get_physical_device_properties(candidate.physical_device);
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown GPU".to_string());

        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(candidate.queue_family)
            .queue_priorities(&queue_priorities)];

        let enabled_features = vk::PhysicalDeviceFeatures::default()
            .geometry_shader(candidate.features.geometry_shader == vk::TRUE)
            .tessellation_shader(candidate.features.tessellation_shader == vk::TRUE);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_features(&enabled_features)
            .push_next(&mut features13);

        let device = instance
            .create_device(candidate.physical_device, &device_create_info, None)
            .map_err(|e| {
                rhi_error!(SOURCE, "Failed to create logical device: {:?}", e);
                Error::InitializationFailed(format!("Failed to create device: {:?}", e))
            })?;

        let queue = device.get_device_queue(candidate.queue_family, 0);

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device: candidate.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                device.destroy_device(None);
                rhi_error!(SOURCE, "Failed to create GPU allocator: {:?}", e);
                return Err(Error::InitializationFailed(format!("Failed to create allocator: {:?}", e)));
            }
        };

        let ctx = match GpuContext::new(device.clone(), allocator, queue, candidate.queue_family) {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => {
                device.destroy_device(None);
                return Err(e);
            }
        };

        let limits = properties.limits;
        let mut features = DeviceFeatures::MULTITHREADING;
        if candidate.compute {
            features |= DeviceFeatures::COMPUTE;
        }
        if candidate.features.geometry_shader == vk::TRUE {
            features |= DeviceFeatures::GEOMETRY_SHADER;
        }
        if candidate.features.tessellation_shader == vk::TRUE {
            features |= DeviceFeatures::TESSELLATION;
        }
        let capabilities = DeviceCapabilities {
            max_texture_size: limits.max_image_dimension2_d.min(config.max_texture_size.max(1)),
            max_color_attachments: limits.max_color_attachments,
            max_vertex_attributes: limits.max_vertex_input_attributes,
            max_texture_slots: MAX_TEXTURE_SLOTS.min(limits.max_per_stage_descriptor_samplers),
            features,
        };

        rhi_info!(SOURCE, "Using '{}' (queue family {})", device_name, candidate.queue_family);

        Ok(DeviceParts { device_name, ctx, capabilities })
    }

    /// Check Vulkan 1.3, dynamic rendering and a graphics queue; `None` when unusable
    unsafe fn evaluate_physical_device(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Option<Candidate> {
        let properties = instance.get_physical_device_properties(physical_device);
        if properties.api_version < vk::API_VERSION_1_3 {
            return None;
        }

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let features = {
            let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features13);
            instance.get_physical_device_features2(physical_device, &mut features2);
            features2.features
        };
        if features13.dynamic_rendering != vk::TRUE {
            return None;
        }

        let (queue_family, family) = instance
            .get_physical_device_queue_family_properties(physical_device)
            .into_iter()
            .enumerate()
            .find(|(_, family)| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;

        let score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 3,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
            _ => 0,
        };

        Some(Candidate {
            physical_device,
            queue_family: queue_family as u32,
            compute: family.queue_flags.contains(vk::QueueFlags::COMPUTE),
            features,
            score,
        })
    }

    /// Create frame objects and the backbuffer; destroys everything on failure
    unsafe fn assemble(
        entry: ash::Entry,
        parts: DeviceParts,
        instance: ash::Instance,
        #[cfg(feature = "vulkan-validation")] debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
        config: &RhiConfig,
    ) -> Result<Self> {
        let DeviceParts { device_name, ctx, capabilities } = parts;
        let frame = match FrameObjects::create(&ctx) {
            Ok(frame) => frame,
            Err(e) => {
                ctx.shutdown();
                ctx.device.destroy_device(None);
                #[cfg(feature = "vulkan-validation")]
                if let Some((debug_utils, messenger)) = debug_messenger {
                    crate::debug::cleanup_debug_config();
                    debug_utils.destroy_debug_utils_messenger(messenger, None);
                }
                instance.destroy_instance(None);
                return Err(e);
            }
        };

        let (width, height) = (config.backbuffer_width, config.backbuffer_height);
        let targets = Self::create_backbuffer(&ctx, width, height);

        // From here on Drop owns the cleanup
        let (backbuffer, readback) = match targets {
            Ok(targets) => targets,
            Err(e) => {
                frame.destroy(&ctx);
                ctx.shutdown();
                ctx.device.destroy_device(None);
                #[cfg(feature = "vulkan-validation")]
                if let Some((debug_utils, messenger)) = debug_messenger {
                    crate::debug::cleanup_debug_config();
                    debug_utils.destroy_debug_utils_messenger(messenger, None);
                }
                instance.destroy_instance(None);
                return Err(e);
            }
        };

        rhi_info!(SOURCE, "Vulkan device created for '{}' ({}x{})", config.app_name, width, height);

        Ok(Self {
            _entry: entry,
            instance,
            #[cfg(feature = "vulkan-validation")]
            debug_messenger,
            device_name,
            ctx,
            capabilities,
            command_pool: frame.command_pool,
            command_buffer: frame.command_buffer,
            frame_fence: frame.fence,
            descriptor_pool: frame.descriptor_pool,
            default_sampler: frame.sampler,
            backbuffer: ManuallyDrop::new(backbuffer),
            readback: ManuallyDrop::new(readback),
            viewport: Viewport::new(0.0, 0.0, width as f32, height as f32),
            scissor: None,
            bound_pipeline: None,
            bound_vertex_array: None,
            bound_framebuffer: None,
            bound_textures: vec![None; MAX_TEXTURE_SLOTS as usize],
            in_frame: false,
            pass: PassState::Outside,
            stats: DeviceStats::default(),
        })
    }

    /// Black RGBA8 backbuffer plus the host buffer `present()` copies it into
    fn create_backbuffer(ctx: &Arc<GpuContext>, width: u32, height: u32) -> Result<(VulkanTexture, VulkanBuffer)> {
        let desc = TextureDesc::new_2d(
            width,
            height,
            TextureFormat::R8G8B8A8_UNORM,
            TextureUsage::RENDER_TARGET | TextureUsage::TRANSFER_SRC | TextureUsage::TRANSFER_DST,
            "backbuffer",
        );
        let backbuffer = VulkanTexture::create(ctx, &desc)?;

        ctx.submit_one_shot(|cmd| {
            backbuffer.transition(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            let black = vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 1.0] };
            unsafe {
                ctx.device.cmd_clear_color_image(
                    cmd,
                    backbuffer.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &black,
                    &[backbuffer.subresource_range()],
                );
            }
            Ok(())
        })?;

        let readback = VulkanBuffer::create_readback(ctx, desc.byte_size(), "backbuffer readback")?;
        Ok((backbuffer, readback))
    }

    // ===== PUBLIC QUERIES =====

    /// Name of the GPU in use
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn backbuffer_size(&self) -> (u32, u32) {
        let info = self.backbuffer.info();
        (info.width, info.height)
    }

    /// RGBA8 contents of the backbuffer as of the last `present()`
    pub fn backbuffer_pixels(&self) -> Result<Vec<u8>> {
        self.readback.read(0, self.readback.size() as usize)
    }

    /// RGBA8 value of a backbuffer pixel as of the last `present()`
    pub fn backbuffer_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let (width, height) = self.backbuffer_size();
        if x >= width || y >= height {
            return None;
        }
        let offset = (y as u64 * width as u64 + x as u64) * 4;
        let bytes = self.readback.read(offset, 4).ok()?;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    // ===== RECORDING HELPERS =====

    /// Frame command buffer, or `InvalidState` outside `begin_frame()`/`end_frame()`
    fn recording(&self, operation: &str) -> Result<vk::CommandBuffer> {
        if !self.in_frame {
            rhi_error!(SOURCE, "{}() outside begin_frame()/end_frame()", operation);
            return Err(Error::InvalidState(format!(
                "{}() outside begin_frame()/end_frame()", operation
            )));
        }
        Ok(self.command_buffer)
    }

    fn texture<'a>(&self, texture: &'a Arc<dyn Texture>) -> Result<&'a VulkanTexture> {
        vulkan::<VulkanTexture>(texture.as_any(), texture.debug_name(), &self.ctx, VulkanTexture::belongs_to)
    }

    fn buffer<'a>(&self, buffer: &'a Arc<dyn Buffer>) -> Result<&'a VulkanBuffer> {
        vulkan::<VulkanBuffer>(buffer.as_any(), buffer.debug_name(), &self.ctx, VulkanBuffer::belongs_to)
    }

    /// Size of the bound render target
    fn target_extent(&self) -> vk::Extent2D {
        match &self.bound_framebuffer {
            Some(framebuffer) => vk::Extent2D { width: framebuffer.width(), height: framebuffer.height() },
            None => {
                let (width, height) = self.backbuffer_size();
                vk::Extent2D { width, height }
            }
        }
    }

    /// Scissor rectangle clamped to the bound target
    fn clamped_scissor(&self) -> vk::Rect2D {
        let extent = self.target_extent();
        let Some(rect) = self.scissor else {
            return vk::Rect2D { offset: vk::Offset2D::default(), extent };
        };
        let x0 = rect.x.clamp(0, extent.width as i32);
        let y0 = rect.y.clamp(0, extent.height as i32);
        let x1 = (rect.x as i64 + rect.width as i64).clamp(x0 as i64, extent.width as i64) as i32;
        let y1 = (rect.y as i64 + rect.height as i64).clamp(y0 as i64, extent.height as i64) as i32;
        vk::Rect2D {
            offset: vk::Offset2D { x: x0, y: y0 },
            extent: vk::Extent2D { width: (x1 - x0) as u32, height: (y1 - y0) as u32 },
        }
    }

    /// Color and depth attachments of the bound target
    fn target_attachments(&self) -> Result<(Vec<&VulkanTexture>, Option<&VulkanTexture>)> {
        match &self.bound_framebuffer {
            None => Ok((vec![&*self.backbuffer], None)),
            Some(framebuffer) => {
                let colors = framebuffer
                    .color_attachments()
                    .iter()
                    .map(|texture| self.texture(texture))
                    .collect::<Result<Vec<_>>>()?;
                let depth = framebuffer.depth_attachment().map(|texture| self.texture(texture)).transpose()?;
                Ok((colors, depth))
            }
        }
    }

    /// Record `vkCmdBeginRendering` on the bound target
    fn begin_rendering(&self, cmd: vk::CommandBuffer, load_op: LoadOp, clear: &ClearParams) -> Result<()> {
        let (colors, depth) = self.target_attachments()?;

        let color_op = if load_op == LoadOp::Clear && !clear.flags.contains(ClearFlags::COLOR) {
            vk::AttachmentLoadOp::LOAD
        } else {
            load_op_to_vk(load_op)
        };
        let depth_op = if load_op == LoadOp::Clear && !clear.flags.intersects(ClearFlags::DEPTH | ClearFlags::STENCIL) {
            vk::AttachmentLoadOp::LOAD
        } else {
            load_op_to_vk(load_op)
        };

        let color_attachments: Vec<vk::RenderingAttachmentInfo> = colors
            .iter()
            .map(|texture| {
                texture.transition(cmd, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                vk::RenderingAttachmentInfo::default()
                    .image_view(texture.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(color_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue { color: vk::ClearColorValue { float32: clear.color } })
            })
            .collect();

        let depth_attachment = depth.map(|texture| {
            texture.transition(cmd, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
            vk::RenderingAttachmentInfo::default()
                .image_view(texture.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(depth_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: clear.depth, stencil: clear.stencil },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent: self.target_extent() })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let (Some(texture), Some(attachment)) = (depth, depth_attachment.as_ref()) {
            rendering_info = rendering_info.depth_attachment(attachment);
            if texture.info().format.has_stencil() {
                rendering_info = rendering_info.stencil_attachment(attachment);
            }
        }

        unsafe { self.ctx.device.cmd_begin_rendering(cmd, &rendering_info) };
        Ok(())
    }

    /// Open an implicit pass if none is active
    fn ensure_rendering(&mut self, operation: &str) -> Result<vk::CommandBuffer> {
        let cmd = self.recording(operation)?;
        if self.pass == PassState::Outside {
            self.begin_rendering(cmd, LoadOp::Load, &ClearParams::color([0.0; 4]))?;
            self.pass = PassState::Implicit;
        }
        Ok(cmd)
    }

    /// Close an implicit pass; transfers and target changes are not allowed in an explicit one
    fn end_implicit_pass(&mut self, operation: &str) -> Result<()> {
        match self.pass {
            PassState::Outside => Ok(()),
            PassState::Implicit => {
                unsafe { self.ctx.device.cmd_end_rendering(self.command_buffer) };
                self.pass = PassState::Outside;
                Ok(())
            }
            PassState::Explicit => {
                rhi_error!(SOURCE, "{}() inside a render pass", operation);
                Err(Error::InvalidState(format!("{}() inside a render pass", operation)))
            }
        }
    }

    /// Bind everything a draw needs and push the pipeline's parameters
    fn prepare_draw(&mut self, operation: &str, indexed: bool) -> Result<vk::CommandBuffer> {
        let cmd = self.ensure_rendering(operation)?;

        let Some(pipeline) = self.bound_pipeline.clone() else {
            rhi_error!(SOURCE, "Draw without a bound pipeline");
            return Err(Error::InvalidState("draw without a bound pipeline".to_string()));
        };
        let pipeline = vulkan::<VulkanPipeline>(
            pipeline.as_any(), pipeline.debug_name(), &self.ctx, VulkanPipeline::belongs_to,
        )?;

        let vertex_array = match &self.bound_vertex_array {
            Some(vertex_array) => Some(vulkan::<VulkanVertexArray>(
                vertex_array.as_any(), vertex_array.debug_name(), &self.ctx, VulkanVertexArray::belongs_to,
            )?),
            None if pipeline.vertex_binding_count > 0 || indexed => {
                rhi_error!(SOURCE, "Draw with '{}' without a bound vertex array", pipeline.debug_name);
                return Err(Error::InvalidState("draw without a bound vertex array".to_string()));
            }
            None => None,
        };

        let descriptor_set = self.sampler_descriptor_set(pipeline)?;

        pipeline.commit_parameters();

        let device = &self.ctx.device;
        let scissor = self.clamped_scissor();
        let viewport = vk::Viewport {
            x: self.viewport.x,
            y: self.viewport.y,
            width: self.viewport.width,
            height: self.viewport.height,
            min_depth: self.viewport.min_depth,
            max_depth: self.viewport.max_depth,
        };

        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);

            if let Some(vertex_array) = vertex_array {
                for binding in vertex_array.vertex_buffers() {
                    let buffer = self.buffer(&binding.buffer)?;
                    device.cmd_bind_vertex_buffers(cmd, binding.binding, &[buffer.buffer], &[binding.offset]);
                }
                if indexed {
                    let Some(index) = vertex_array.index_buffer() else {
                        rhi_error!(SOURCE, "Indexed draw with '{}', which has no index buffer",
                            vertex_array.debug_name);
                        return Err(Error::InvalidState(format!(
                            "vertex array '{}' has no index buffer", vertex_array.debug_name
                        )));
                    };
                    let buffer = self.buffer(&index.buffer)?;
                    device.cmd_bind_index_buffer(cmd, buffer.buffer, index.offset, index_type_to_vk(index.index_type));
                }
            }

            if let Some(data) = pipeline.push_constant_data() {
                device.cmd_push_constants(cmd, pipeline.layout, pipeline.reflection.push_stages, 0, &data);
            }

            if let Some(set) = descriptor_set {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline.layout,
                    0,
                    &[set],
                    &[],
                );
            }
        }

        Ok(cmd)
    }

    /// Allocate and fill set 0 from the bound texture slots
    ///
    /// Sampler binding `n` reads texture slot `n`.
    fn sampler_descriptor_set(&self, pipeline: &VulkanPipeline) -> Result<Option<vk::DescriptorSet>> {
        if pipeline.reflection.sampler_bindings.is_empty() {
            return Ok(None);
        }

        let mut image_infos = Vec::with_capacity(pipeline.reflection.sampler_bindings.len());
        for (binding, _) in &pipeline.reflection.sampler_bindings {
            let Some(Some(texture)) = self.bound_textures.get(*binding as usize) else {
                rhi_error!(SOURCE, "Pipeline '{}' samples binding {} but no texture is bound to that slot",
                    pipeline.debug_name, binding);
                return Err(Error::InvalidState(format!("no texture bound to slot {}", binding)));
            };
            let texture = self.texture(texture)?;
            if texture.layout() != vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL {
                rhi_error!(SOURCE, "Texture '{}' is sampled while in {:?}, issue a ShaderRead barrier first",
                    texture.debug_name, texture.layout());
                return Err(Error::InvalidState(format!(
                    "texture '{}' is not in the ShaderRead state", texture.debug_name
                )));
            }
            image_infos.push(
                vk::DescriptorImageInfo::default()
                    .sampler(self.default_sampler)
                    .image_view(texture.view)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            );
        }

        let set_layouts = [pipeline.set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        let set = unsafe { self.ctx.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| rhi_err!(SOURCE, "Failed to allocate descriptor set for '{}': {:?}", pipeline.debug_name, e))?[0];

        let writes: Vec<vk::WriteDescriptorSet> = pipeline.reflection.sampler_bindings
            .iter()
            .zip(&image_infos)
            .map(|((binding, _), info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info))
            })
            .collect();
        unsafe { self.ctx.device.update_descriptor_sets(&writes, &[]) };

        Ok(Some(set))
    }

    fn count_draw(&mut self, topology: PrimitiveTopology, vertex_count: u32) {
        self.stats.draw_calls += 1;
        self.stats.vertices += vertex_count as u64;
        self.stats.triangles += topology.triangle_count(vertex_count) as u64;
    }

    fn release_bound_state(&mut self) {
        self.bound_pipeline = None;
        self.bound_vertex_array = None;
        self.bound_framebuffer = None;
        self.bound_textures.iter_mut().for_each(|slot| *slot = None);
    }
}

/// Result of the device-level setup, before the frame objects exist
struct DeviceParts {
    device_name: String,
    ctx: Arc<GpuContext>,
    capabilities: DeviceCapabilities,
}

struct Candidate {
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    compute: bool,
    features: vk::PhysicalDeviceFeatures,
    score: u32,
}

/// Objects owned by the device for frame recording
struct FrameObjects {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    descriptor_pool: vk::DescriptorPool,
    sampler: vk::Sampler,
}

impl FrameObjects {
    unsafe fn create(ctx: &GpuContext) -> Result<Self> {
        let mut frame = Self {
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            sampler: vk::Sampler::null(),
        };
        match frame.fill(ctx) {
            Ok(()) => Ok(frame),
            Err(e) => {
                frame.destroy(ctx);
                Err(e)
            }
        }
    }

    unsafe fn fill(&mut self, ctx: &GpuContext) -> Result<()> {
        let device = &ctx.device;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        self.command_pool = device.create_command_pool(&pool_info, None)
            .map_err(|e| init_error("Failed to create frame command pool", e))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        self.command_buffer = device.allocate_command_buffers(&alloc_info)
            .map_err(|e| init_error("Failed to allocate frame command buffer", e))?[0];

        self.fence = device.create_fence(&vk::FenceCreateInfo::default(), None)
            .map_err(|e| init_error("Failed to create frame fence", e))?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: MAX_FRAME_DESCRIPTOR_SETS * MAX_TEXTURE_SLOTS,
        }];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(MAX_FRAME_DESCRIPTOR_SETS)
            .pool_sizes(&pool_sizes);
        self.descriptor_pool = device.create_descriptor_pool(&descriptor_pool_info, None)
            .map_err(|e| init_error("Failed to create descriptor pool", e))?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);
        self.sampler = device.create_sampler(&sampler_info, None)
            .map_err(|e| init_error("Failed to create default sampler", e))?;

        Ok(())
    }

    /// Destroy every non-null object (the command buffer goes with its pool)
    unsafe fn destroy(&self, ctx: &GpuContext) {
        let device = &ctx.device;
        if self.sampler != vk::Sampler::null() {
            device.destroy_sampler(self.sampler, None);
        }
        if self.descriptor_pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.descriptor_pool, None);
        }
        if self.fence != vk::Fence::null() {
            device.destroy_fence(self.fence, None);
        }
        if self.command_pool != vk::CommandPool::null() {
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

fn init_error(what: &str, e: vk::Result) -> Error {
    rhi_error!(SOURCE, "{}: {:?}", what, e);
    Error::InitializationFailed(format!("{}: {:?}", what, e))
}

impl Device for VulkanDevice {
    fn backend(&self) -> RhiType {
        RhiType::Vulkan
    }

    // ===== RESOURCE CREATION =====

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>> {
        if desc.size == 0 {
            return Err(Error::InvalidResource(format!("buffer '{}' has zero size", desc.debug_name)));
        }
        if let Some(data) = &desc.data {
            if data.len() as u64 > desc.size {
                return Err(Error::InvalidResource(format!(
                    "buffer '{}': {} bytes of data for {} bytes of storage",
                    desc.debug_name, data.len(), desc.size
                )));
            }
        }

        let buffer = VulkanBuffer::create(&self.ctx, desc)?;
        rhi_trace!(SOURCE, "Created buffer '{}' ({} bytes)", desc.debug_name, desc.size);
        Ok(Arc::new(buffer))
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<Arc<dyn Texture>> {
        if desc.width == 0 || desc.height == 0 || desc.array_layers == 0 || desc.mip_levels == 0 {
            return Err(Error::InvalidResource(format!(
                "texture '{}' has an empty extent", desc.debug_name
            )));
        }
        let max = self.capabilities.max_texture_size;
        if desc.width > max || desc.height > max {
            return Err(Error::Unsupported(format!(
                "texture '{}' ({}x{}) exceeds the {} pixel limit",
                desc.debug_name, desc.width, desc.height, max
            )));
        }
        if desc.texture_type == TextureType::Cube && (desc.array_layers != 6 || desc.width != desc.height) {
            return Err(Error::InvalidResource(format!(
                "cubemap '{}' needs 6 square layers, got {} of {}x{}",
                desc.debug_name, desc.array_layers, desc.width, desc.height
            )));
        }
        if desc.format.is_depth() && desc.usage.contains(TextureUsage::RENDER_TARGET) {
            return Err(Error::InvalidResource(format!(
                "'{}' has a depth format and cannot be a color render target", desc.debug_name
            )));
        }
        if let Some(data) = &desc.data {
            if data.len() as u64 != desc.byte_size() {
                return Err(Error::InvalidResource(format!(
                    "texture '{}': expected {} bytes of data, got {}",
                    desc.debug_name, desc.byte_size(), data.len()
                )));
            }
        }

        let texture = VulkanTexture::create(&self.ctx, desc)?;
        rhi_trace!(SOURCE, "Created texture '{}' ({}x{})", desc.debug_name, desc.width, desc.height);
        Ok(Arc::new(texture))
    }

    fn create_shader(&mut self, desc: &ShaderDesc) -> Result<Arc<dyn Shader>> {
        let code = match &desc.code {
            ShaderCode::SpirV(words) if !words.is_empty() => words,
            ShaderCode::SpirV(_) => {
                return Err(Error::InvalidResource(format!("shader '{}' has no code", desc.debug_name)));
            }
            ShaderCode::Source(_) => {
                return Err(Error::Unsupported(format!(
                    "shader '{}': the Vulkan backend takes SPIR-V only", desc.debug_name
                )));
            }
        };

        let required = match desc.stage {
            ShaderStage::Geometry => Some(DeviceFeatures::GEOMETRY_SHADER),
            ShaderStage::TessControl | ShaderStage::TessEvaluation => Some(DeviceFeatures::TESSELLATION),
            ShaderStage::Compute => Some(DeviceFeatures::COMPUTE),
            ShaderStage::Vertex | ShaderStage::Fragment => None,
        };
        if let Some(feature) = required {
            if !self.capabilities.supports(feature) {
                return Err(Error::Unsupported(format!(
                    "{:?} shaders are not supported by '{}'", desc.stage, self.device_name
                )));
            }
        }

        let shader = VulkanShader::create(&self.ctx, code, desc.stage, &desc.entry_point, &desc.debug_name)?;
        rhi_trace!(SOURCE, "Created {:?} shader '{}'", desc.stage, desc.debug_name);
        Ok(Arc::new(shader))
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<Arc<dyn Pipeline>> {
        let mut shaders = Vec::with_capacity(desc.shaders.len());
        for shader in &desc.shaders {
            shaders.push(vulkan::<VulkanShader>(
                shader.as_any(), shader.debug_name(), &self.ctx, VulkanShader::belongs_to,
            )?);
        }

        let has_stage = |stage: ShaderStage| shaders.iter().any(|shader| shader.stage() == stage);
        if !has_stage(ShaderStage::Vertex) || !has_stage(ShaderStage::Fragment) {
            return Err(rhi_err!(SOURCE,
                "Pipeline '{}' needs a vertex and a fragment stage", desc.debug_name));
        }
        if has_stage(ShaderStage::Compute) {
            return Err(Error::InvalidResource(format!(
                "pipeline '{}': compute shaders cannot be part of a graphics pipeline", desc.debug_name
            )));
        }
        if desc.vertex_layout.attributes.len() as u32 > self.capabilities.max_vertex_attributes {
            return Err(Error::Unsupported(format!(
                "pipeline '{}' uses {} vertex attributes (max {})",
                desc.debug_name, desc.vertex_layout.attributes.len(), self.capabilities.max_vertex_attributes
            )));
        }
        if desc.color_formats.len() as u32 > self.capabilities.max_color_attachments {
            return Err(Error::Unsupported(format!(
                "pipeline '{}' renders into {} color attachments (max {})",
                desc.debug_name, desc.color_formats.len(), self.capabilities.max_color_attachments
            )));
        }

        let pipeline = VulkanPipeline::create(&self.ctx, desc, &shaders)?;
        rhi_debug!(SOURCE, "Created pipeline '{}'", desc.debug_name);
        Ok(Arc::new(pipeline))
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>> {
        if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
            return Err(Error::InvalidResource(format!(
                "framebuffer '{}' has no attachment", desc.debug_name
            )));
        }
        if desc.color_attachments.len() as u32 > self.capabilities.max_color_attachments {
            return Err(Error::Unsupported(format!(
                "framebuffer '{}' has {} color attachments (max {})",
                desc.debug_name, desc.color_attachments.len(), self.capabilities.max_color_attachments
            )));
        }

        let check_size = |texture: &VulkanTexture| -> Result<()> {
            let info = texture.info();
            if info.width != desc.width || info.height != desc.height {
                return Err(Error::InvalidResource(format!(
                    "attachment '{}' is {}x{}, framebuffer '{}' is {}x{}",
                    texture.debug_name, info.width, info.height, desc.debug_name, desc.width, desc.height
                )));
            }
            Ok(())
        };

        for attachment in &desc.color_attachments {
            let texture = self.texture(attachment)?;
            if !texture.info().usage.contains(TextureUsage::RENDER_TARGET) {
                return Err(Error::InvalidResource(format!(
                    "'{}' was not created with RENDER_TARGET usage", texture.debug_name
                )));
            }
            check_size(texture)?;
        }
        if let Some(attachment) = &desc.depth_attachment {
            let texture = self.texture(attachment)?;
            if !texture.info().format.is_depth() || !texture.info().usage.contains(TextureUsage::DEPTH_STENCIL) {
                return Err(Error::InvalidResource(format!(
                    "'{}' is not a depth-stencil texture", texture.debug_name
                )));
            }
            check_size(texture)?;
        }

        Ok(Arc::new(VulkanFramebuffer::new(
            &self.ctx,
            desc.width,
            desc.height,
            desc.color_attachments.clone(),
            desc.depth_attachment.clone(),
            &desc.debug_name,
        )))
    }

    fn create_vertex_array(&mut self, desc: &VertexArrayDesc) -> Result<Arc<dyn VertexArray>> {
        for binding in &desc.vertex_buffers {
            let buffer = self.buffer(&binding.buffer)?;
            if buffer.buffer_type() != BufferType::Vertex {
                return Err(Error::InvalidResource(format!(
                    "vertex array '{}': '{}' is not a vertex buffer", desc.debug_name, buffer.debug_name
                )));
            }
            if desc.layout.stride(binding.binding).is_none() {
                return Err(Error::InvalidResource(format!(
                    "vertex array '{}': binding {} is not declared in the layout",
                    desc.debug_name, binding.binding
                )));
            }
        }
        if let Some(index) = &desc.index_buffer {
            let buffer = self.buffer(&index.buffer)?;
            if buffer.buffer_type() != BufferType::Index {
                return Err(Error::InvalidResource(format!(
                    "vertex array '{}': '{}' is not an index buffer", desc.debug_name, buffer.debug_name
                )));
            }
        }

        Ok(Arc::new(VulkanVertexArray::new(&self.ctx, desc)))
    }

    // ===== FRAME =====

    fn begin_frame(&mut self) -> Result<()> {
        if self.in_frame {
            rhi_error!(SOURCE, "begin_frame() called twice without end_frame()");
            return Err(Error::InvalidState("frame already started".to_string()));
        }

        // The previous frame fence was waited in end_frame()
        self.ctx.drain_deletion_queue();

        let device = &self.ctx.device;
        unsafe {
            device.reset_descriptor_pool(self.descriptor_pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(|e| rhi_err!(SOURCE, "Failed to reset descriptor pool: {:?}", e))?;
            device.reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| rhi_err!(SOURCE, "Failed to reset frame command buffer: {:?}", e))?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(|e| rhi_err!(SOURCE, "Failed to begin frame command buffer: {:?}", e))?;
        }

        self.in_frame = true;
        self.pass = PassState::Outside;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        if !self.in_frame {
            rhi_error!(SOURCE, "end_frame() without begin_frame()");
            return Err(Error::InvalidState("end_frame() without begin_frame()".to_string()));
        }
        if self.pass == PassState::Explicit {
            rhi_error!(SOURCE, "end_frame() inside a render pass");
            return Err(Error::InvalidState("end_frame() inside a render pass".to_string()));
        }
        self.end_implicit_pass("end_frame")?;
        self.in_frame = false;

        let device = &self.ctx.device;
        unsafe {
            device.end_command_buffer(self.command_buffer)
                .map_err(|e| rhi_err!(SOURCE, "Failed to end frame command buffer: {:?}", e))?;

            device.reset_fences(&[self.frame_fence])
                .map_err(|e| rhi_err!(SOURCE, "Failed to reset frame fence: {:?}", e))?;

            let command_buffers = [self.command_buffer];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            device.queue_submit(self.ctx.queue, &[submit_info], self.frame_fence)
                .map_err(|e| rhi_err!(SOURCE, "Failed to submit frame: {:?}", e))?;

            device.wait_for_fences(&[self.frame_fence], true, u64::MAX)
                .map_err(|e| rhi_err!(SOURCE, "Failed to wait for frame fence: {:?}", e))?;
        }

        let destroyed = self.ctx.drain_deletion_queue();
        if destroyed > 0 {
            rhi_trace!(SOURCE, "Frame {} released {} resource(s)", self.stats.frames, destroyed);
        }
        self.stats.frames += 1;
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        if self.in_frame {
            return Err(Error::InvalidState("present() before end_frame()".to_string()));
        }

        let backbuffer = &*self.backbuffer;
        let readback = self.readback.buffer;
        let ctx = &self.ctx;
        ctx.submit_one_shot(|cmd| {
            backbuffer.transition(cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            let info = backbuffer.info();
            let region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: backbuffer.aspect(),
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D { width: info.width, height: info.height, depth: 1 });
            unsafe {
                ctx.device.cmd_copy_image_to_buffer(
                    cmd,
                    backbuffer.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    readback,
                    &[region],
                );
            }
            Ok(())
        })?;

        rhi_trace!(SOURCE, "Presented frame {}", self.stats.frames);
        Ok(())
    }

    // ===== IMMEDIATE OPERATIONS =====

    fn clear(&mut self, params: &ClearParams) -> Result<()> {
        let cmd = self.ensure_rendering("clear")?;
        let (colors, depth) = self.target_attachments()?;

        let mut attachments = Vec::new();
        if params.flags.contains(ClearFlags::COLOR) {
            for index in 0..colors.len() as u32 {
                attachments.push(vk::ClearAttachment {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    color_attachment: index,
                    clear_value: vk::ClearValue { color: vk::ClearColorValue { float32: params.color } },
                });
            }
        }
        if let Some(texture) = depth {
            let mut aspect = vk::ImageAspectFlags::empty();
            if params.flags.contains(ClearFlags::DEPTH) {
                aspect |= vk::ImageAspectFlags::DEPTH;
            }
            if params.flags.contains(ClearFlags::STENCIL) && texture.info().format.has_stencil() {
                aspect |= vk::ImageAspectFlags::STENCIL;
            }
            if !aspect.is_empty() {
                attachments.push(vk::ClearAttachment {
                    aspect_mask: aspect,
                    color_attachment: 0,
                    clear_value: vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue { depth: params.depth, stencil: params.stencil },
                    },
                });
            }
        }

        let rect = self.clamped_scissor();
        if attachments.is_empty() || rect.extent.width == 0 || rect.extent.height == 0 {
            return Ok(());
        }
        let clear_rect = vk::ClearRect { rect, base_array_layer: 0, layer_count: 1 };
        unsafe { self.ctx.device.cmd_clear_attachments(cmd, &attachments, &[clear_rect]) };
        Ok(())
    }

    fn draw(&mut self, params: &DrawParams) -> Result<()> {
        if let Some(vertex_array) = &self.bound_vertex_array {
            let available = vertex_array.vertex_count();
            let end = params.first_vertex as u64 + params.vertex_count as u64;
            if available > 0 && end > available {
                return Err(Error::InvalidResource(format!(
                    "draw reads vertices up to {} but '{}' holds {}",
                    end, vertex_array.debug_name(), available
                )));
            }
        }

        let cmd = self.prepare_draw("draw", false)?;
        unsafe { self.ctx.device.cmd_draw(cmd, params.vertex_count, 1, params.first_vertex, 0) };
        self.count_draw(params.topology, params.vertex_count);
        Ok(())
    }

    fn draw_indexed(&mut self, params: &DrawIndexedParams) -> Result<()> {
        if let Some(index_buffer) = self.bound_vertex_array.as_ref().and_then(|va| va.index_buffer()) {
            let end = params.first_index as u64 + params.index_count as u64;
            if end > index_buffer.index_count() {
                return Err(Error::InvalidResource(format!(
                    "indexed draw reads indices up to {} but '{}' holds {}",
                    end, index_buffer.buffer.debug_name(), index_buffer.index_count()
                )));
            }
        }

        let cmd = self.prepare_draw("draw_indexed", true)?;
        unsafe {
            self.ctx.device.cmd_draw_indexed(cmd, params.index_count, 1, params.first_index, params.vertex_offset, 0);
        }
        self.count_draw(params.topology, params.index_count);
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn Pipeline>) -> Result<()> {
        vulkan::<VulkanPipeline>(pipeline.as_any(), pipeline.debug_name(), &self.ctx, VulkanPipeline::belongs_to)?;
        self.bound_pipeline = Some(Arc::clone(pipeline));
        Ok(())
    }

    fn bind_vertex_array(&mut self, vertex_array: &Arc<dyn VertexArray>) -> Result<()> {
        vulkan::<VulkanVertexArray>(
            vertex_array.as_any(), vertex_array.debug_name(), &self.ctx, VulkanVertexArray::belongs_to,
        )?;
        self.bound_vertex_array = Some(Arc::clone(vertex_array));
        Ok(())
    }

    fn bind_texture(&mut self, texture: &Arc<dyn Texture>, slot: u32) -> Result<()> {
        self.texture(texture)?;
        if slot >= self.capabilities.max_texture_slots {
            return Err(Error::Unsupported(format!(
                "texture slot {} (the device has {})", slot, self.capabilities.max_texture_slots
            )));
        }
        self.bound_textures[slot as usize] = Some(Arc::clone(texture));
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<&Arc<dyn Framebuffer>>) -> Result<()> {
        if let Some(framebuffer) = framebuffer {
            vulkan::<VulkanFramebuffer>(
                framebuffer.as_any(), framebuffer.debug_name(), &self.ctx, VulkanFramebuffer::belongs_to,
            )?;
        }
        self.end_implicit_pass("bind_framebuffer")?;
        self.bound_framebuffer = framebuffer.cloned();
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.viewport = viewport;
        Ok(())
    }

    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()> {
        self.scissor = Some(scissor);
        Ok(())
    }

    fn resource_barrier(&mut self, barrier: &ResourceBarrier) -> Result<()> {
        let cmd = self.recording("resource_barrier")?;
        let texture = self.texture(&barrier.texture)?;
        self.end_implicit_pass("resource_barrier")?;

        let new_layout = resource_state_to_layout(barrier.after);
        if barrier.before == ResourceState::Undefined {
            texture.transition_from(cmd, vk::ImageLayout::UNDEFINED, new_layout);
        } else {
            let expected = resource_state_to_layout(barrier.before);
            if texture.layout() != expected {
                rhi_debug!(SOURCE, "Barrier on '{}' expects {:?}, texture is in {:?}",
                    texture.debug_name, expected, texture.layout());
            }
            texture.transition(cmd, new_layout);
        }
        Ok(())
    }

    fn blit_framebuffer_to_screen(&mut self, framebuffer: &Arc<dyn Framebuffer>) -> Result<()> {
        let cmd = self.recording("blit_framebuffer_to_screen")?;
        vulkan::<VulkanFramebuffer>(
            framebuffer.as_any(), framebuffer.debug_name(), &self.ctx, VulkanFramebuffer::belongs_to,
        )?;
        let Some(source) = framebuffer.color_attachments().first() else {
            return Err(Error::InvalidResource(format!(
                "framebuffer '{}' has no color attachment to blit", framebuffer.debug_name()
            )));
        };
        let source = self.texture(source)?;
        self.end_implicit_pass("blit_framebuffer_to_screen")?;

        let backbuffer = &*self.backbuffer;
        source.transition(cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        backbuffer.transition(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        let corner = |width: u32, height: u32| vk::Offset3D { x: width as i32, y: height as i32, z: 1 };
        let layers = |aspect_mask| vk::ImageSubresourceLayers {
            aspect_mask,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let src_info = source.info();
        let dst_info = backbuffer.info();
        let region = vk::ImageBlit::default()
            .src_subresource(layers(source.aspect()))
            .src_offsets([vk::Offset3D::default(), corner(src_info.width, src_info.height)])
            .dst_subresource(layers(backbuffer.aspect()))
            .dst_offsets([vk::Offset3D::default(), corner(dst_info.width, dst_info.height)]);

        unsafe {
            self.ctx.device.cmd_blit_image(
                cmd,
                source.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                backbuffer.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::NEAREST,
            );
        }
        Ok(())
    }

    fn begin_render_pass(&mut self, begin: &RenderPassBegin) -> Result<()> {
        let cmd = self.recording("begin_render_pass")?;
        if self.pass == PassState::Explicit {
            rhi_error!(SOURCE, "begin_render_pass() inside a render pass");
            return Err(Error::InvalidState("render pass already active".to_string()));
        }
        self.bind_framebuffer(begin.framebuffer.as_ref())?;
        self.begin_rendering(cmd, begin.load_op, &begin.clear)?;
        self.pass = PassState::Explicit;
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        let cmd = self.recording("end_render_pass")?;
        if self.pass != PassState::Explicit {
            rhi_error!(SOURCE, "end_render_pass() without an active render pass");
            return Err(Error::InvalidState("no active render pass".to_string()));
        }
        unsafe { self.ctx.device.cmd_end_rendering(cmd) };
        self.pass = PassState::Outside;
        Ok(())
    }

    // ===== QUERIES =====

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn stats(&self) -> DeviceStats {
        DeviceStats {
            live_resources: self.ctx.live_resources().saturating_sub(INTERNAL_RESOURCES),
            destroyed_resources: self.ctx.destroyed_resources(),
            parameter_commits: self.ctx.parameter_commits(),
            pending_destroys: self.ctx.pending_destroys(),
            ..self.stats
        }
    }

    fn make_context_current(&mut self, _thread_index: usize) -> bool {
        // No thread-bound context
        true
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.ctx.device.device_wait_idle() }
            .map_err(|e| rhi_err!(SOURCE, "Failed to wait for device idle: {:?}", e))?;
        // The frame being recorded may still reference retired objects
        if !self.in_frame {
            self.ctx.drain_deletion_queue();
        }
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            // Wait for device to finish
            self.ctx.device.device_wait_idle().ok();

            // 1. Release everything the device holds so it lands in the deletion queue
            self.release_bound_state();
            ManuallyDrop::drop(&mut self.backbuffer);
            ManuallyDrop::drop(&mut self.readback);

            // 2. Destroy device-owned frame objects
            FrameObjects {
                command_pool: self.command_pool,
                command_buffer: self.command_buffer,
                fence: self.frame_fence,
                descriptor_pool: self.descriptor_pool,
                sampler: self.default_sampler,
            }
            .destroy(&self.ctx);

            // 3. Drain retired objects, free the allocator's memory pages
            self.ctx.shutdown();
            let leaked = self.ctx.live_resources();
            if leaked > 0 {
                rhi_warn!(SOURCE, "{} resource(s) still referenced at device destruction", leaked);
            }

            // 4. Destroy debug messenger BEFORE device and instance
            #[cfg(feature = "vulkan-validation")]
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                crate::debug::cleanup_debug_config();
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            // 5. Destroy device and instance
            self.ctx.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        rhi_info!(SOURCE, "Vulkan device destroyed");
    }
}
