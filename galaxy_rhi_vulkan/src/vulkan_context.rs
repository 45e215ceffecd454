/// GpuContext - Shared GPU state for all Vulkan objects
///
/// Contains everything resources need after creation:
/// - Device for Vulkan API calls
/// - Allocator for memory management
/// - Queue for one-shot upload submissions
/// - Deletion queue for native objects released by their owners
///
/// Resources may be dropped on any thread. Their native handles are retired
/// into the deletion queue and destroyed by the device once the frame fence
/// proves the GPU is done with them.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use galaxy_rhi::rhi::{Error, Result};
use galaxy_rhi::{rhi_debug, rhi_err, rhi_error, rhi_warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

pub(crate) const SOURCE: &str = "galaxy_rhi::vulkan";

/// Lock a mutex, recovering the data if a panicking thread poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Native objects waiting for the GPU to finish with them
pub(crate) enum PendingDestroy {
    Buffer {
        buffer: vk::Buffer,
        allocation: Allocation,
    },
    Image {
        image: vk::Image,
        view: vk::ImageView,
        allocation: Allocation,
    },
    ShaderModule(vk::ShaderModule),
    Pipeline {
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        set_layout: vk::DescriptorSetLayout,
    },
}

/// Shared GPU context for all Vulkan resources.
///
/// Shared (via `Arc`) by every resource so buffers, textures and pipelines
/// do not each carry device/allocator/queue references of their own.
///
/// Device and instance destruction is handled by `VulkanDevice::drop()`,
/// which calls [`GpuContext::shutdown`] first.
pub struct GpuContext {
    /// Vulkan logical device
    pub(crate) device: ash::Device,

    /// GPU memory allocator, taken out on shutdown so its memory pages are
    /// freed before the device is destroyed
    allocator: Mutex<Option<Allocator>>,

    /// Graphics queue
    pub(crate) queue: vk::Queue,

    /// Graphics queue family index
    pub(crate) queue_family: u32,

    /// Reusable command pool for one-shot upload operations
    upload_pool: Mutex<vk::CommandPool>,

    deletion_queue: Mutex<Vec<PendingDestroy>>,

    shut_down: AtomicBool,

    live_resources: AtomicU64,
    destroyed_resources: AtomicU64,
    parameter_commits: AtomicU64,
}

impl fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuContext")
            .field("queue_family", &self.queue_family)
            .field("live_resources", &self.live_resources.load(Ordering::Relaxed))
            .field("pending_destroys", &self.pending_destroys())
            .finish_non_exhaustive()
    }
}

impl GpuContext {
    /// Create a new GPU context
    ///
    /// # Arguments
    ///
    /// * `device` - Vulkan logical device
    /// * `allocator` - GPU memory allocator created for `device`
    /// * `queue` - Graphics queue
    /// * `queue_family` - Graphics queue family index
    pub(crate) fn new(
        device: ash::Device,
        allocator: Allocator,
        queue: vk::Queue,
        queue_family: u32,
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let upload_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(|e| {
                rhi_error!(SOURCE, "Failed to create upload command pool: {:?}", e);
                Error::InitializationFailed(format!("Failed to create upload command pool: {:?}", e))
            })?;

        Ok(Self {
            device,
            allocator: Mutex::new(Some(allocator)),
            queue,
            queue_family,
            upload_pool: Mutex::new(upload_pool),
            deletion_queue: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
            live_resources: AtomicU64::new(0),
            destroyed_resources: AtomicU64::new(0),
            parameter_commits: AtomicU64::new(0),
        })
    }

    // ===== MEMORY =====

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        let mut allocator = lock(&self.allocator);
        let allocator = allocator
            .as_mut()
            .ok_or_else(|| Error::InvalidState("Vulkan device already destroyed".to_string()))?;

        allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                rhi_error!(SOURCE, "Out of GPU memory for '{}' (required: {:.2} MB): {}", name, size_mb, e);
                Error::OutOfMemory
            })
    }

    fn free(&self, allocation: Allocation) {
        if let Some(allocator) = lock(&self.allocator).as_mut() {
            if let Err(e) = allocator.free(allocation) {
                rhi_warn!(SOURCE, "Failed to free GPU allocation: {}", e);
            }
        }
    }

    /// Create a buffer and bind freshly allocated memory to it
    pub(crate) fn create_buffer(
        &self,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<(vk::Buffer, Allocation)> {
        unsafe {
            let create_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = self.device.create_buffer(&create_info, None)
                .map_err(|e| rhi_err!(SOURCE, "Failed to create buffer '{}' of {} bytes: {:?}", name, size, e))?;

            let requirements = self.device.get_buffer_memory_requirements(buffer);
            let allocation = match self.allocate(name, requirements, location, true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };

            if let Err(e) = self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                self.free(allocation);
                self.device.destroy_buffer(buffer, None);
                return Err(rhi_err!(SOURCE, "Failed to bind memory of buffer '{}': {:?}", name, e));
            }

            Ok((buffer, allocation))
        }
    }

    /// Create an image in GPU-only memory
    pub(crate) fn create_image(
        &self,
        name: &str,
        create_info: &vk::ImageCreateInfo,
    ) -> Result<(vk::Image, Allocation)> {
        unsafe {
            let image = self.device.create_image(create_info, None)
                .map_err(|e| rhi_err!(SOURCE, "Failed to create image '{}': {:?}", name, e))?;

            let requirements = self.device.get_image_memory_requirements(image);
            let allocation = match self.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    return Err(e);
                }
            };

            if let Err(e) = self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
                self.free(allocation);
                self.device.destroy_image(image, None);
                return Err(rhi_err!(SOURCE, "Failed to bind memory of image '{}': {:?}", name, e));
            }

            Ok((image, allocation))
        }
    }

    // ===== ONE-SHOT SUBMISSION =====

    /// Record commands into a transient command buffer, submit it and wait
    ///
    /// Used for uploads and readbacks outside the frame command buffer.
    pub(crate) fn submit_one_shot<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let pool = lock(&self.upload_pool);

        unsafe {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(*pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let command_buffer = self.device.allocate_command_buffers(&alloc_info)
                .map_err(|e| rhi_err!(SOURCE, "Failed to allocate upload command buffer: {:?}", e))?[0];

            let fence = match self.device.create_fence(&vk::FenceCreateInfo::default(), None) {
                Ok(fence) => fence,
                Err(e) => {
                    self.device.free_command_buffers(*pool, &[command_buffer]);
                    return Err(rhi_err!(SOURCE, "Failed to create upload fence: {:?}", e));
                }
            };

            let result = self.record_and_wait(command_buffer, fence, record);

            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(*pool, &[command_buffer]);
            result
        }
    }

    unsafe fn record_and_wait<F>(&self, command_buffer: vk::CommandBuffer, fence: vk::Fence, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.device.begin_command_buffer(command_buffer, &begin_info)
            .map_err(|e| rhi_err!(SOURCE, "Failed to begin upload command buffer: {:?}", e))?;

        let recorded = record(command_buffer);

        self.device.end_command_buffer(command_buffer)
            .map_err(|e| rhi_err!(SOURCE, "Failed to end upload command buffer: {:?}", e))?;
        recorded?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        self.device.queue_submit(self.queue, &[submit_info], fence)
            .map_err(|e| rhi_err!(SOURCE, "Failed to submit upload commands: {:?}", e))?;

        self.device.wait_for_fences(&[fence], true, u64::MAX)
            .map_err(|e| rhi_err!(SOURCE, "Failed to wait for upload fence: {:?}", e))
    }

    // ===== RESOURCE LIFETIME =====

    pub(crate) fn resource_created(&self) {
        self.live_resources.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for a resource without native objects of its own
    pub(crate) fn resource_released(&self) {
        self.live_resources.fetch_sub(1, Ordering::Relaxed);
        self.destroyed_resources.fetch_add(1, Ordering::Relaxed);
    }

    /// Queue native objects for destruction after the current frame fence
    pub(crate) fn retire(&self, pending: PendingDestroy) {
        if self.shut_down.load(Ordering::Acquire) {
            rhi_warn!(SOURCE, "Resource released after its Vulkan device was destroyed, leaking it");
            return;
        }
        lock(&self.deletion_queue).push(pending);
    }

    pub(crate) fn pending_destroys(&self) -> u64 {
        lock(&self.deletion_queue).len() as u64
    }

    /// Destroy every retired object
    ///
    /// Only called when the GPU no longer references them (after the frame
    /// fence or a device-wide idle wait with no frame being recorded).
    pub(crate) fn drain_deletion_queue(&self) -> usize {
        let pending = std::mem::take(&mut *lock(&self.deletion_queue));
        let count = pending.len();

        for object in pending {
            unsafe { self.destroy(object) };
        }

        if count > 0 {
            self.live_resources.fetch_sub(count as u64, Ordering::Relaxed);
            self.destroyed_resources.fetch_add(count as u64, Ordering::Relaxed);
            rhi_debug!(SOURCE, "Destroyed {} retired resource(s)", count);
        }
        count
    }

    /// Destroy objects the GPU never saw or has provably finished with
    ///
    /// Bypasses the deletion queue and the resource counters; used for
    /// staging buffers and half-built resources.
    pub(crate) fn destroy_now(&self, object: PendingDestroy) {
        unsafe { self.destroy(object) };
    }

    unsafe fn destroy(&self, object: PendingDestroy) {
        match object {
            PendingDestroy::Buffer { buffer, allocation } => {
                self.free(allocation);
                self.device.destroy_buffer(buffer, None);
            }
            PendingDestroy::Image { image, view, allocation } => {
                self.device.destroy_image_view(view, None);
                self.free(allocation);
                self.device.destroy_image(image, None);
            }
            PendingDestroy::ShaderModule(module) => {
                self.device.destroy_shader_module(module, None);
            }
            PendingDestroy::Pipeline { pipeline, layout, set_layout } => {
                self.device.destroy_pipeline(pipeline, None);
                self.device.destroy_pipeline_layout(layout, None);
                if set_layout != vk::DescriptorSetLayout::null() {
                    self.device.destroy_descriptor_set_layout(set_layout, None);
                }
            }
        }
    }

    // ===== STATISTICS =====

    pub(crate) fn record_parameter_commit(&self) {
        self.parameter_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn live_resources(&self) -> u64 {
        self.live_resources.load(Ordering::Relaxed)
    }

    pub(crate) fn destroyed_resources(&self) -> u64 {
        self.destroyed_resources.load(Ordering::Relaxed)
    }

    pub(crate) fn parameter_commits(&self) -> u64 {
        self.parameter_commits.load(Ordering::Relaxed)
    }

    // ===== SHUTDOWN =====

    /// Release everything owned by the context ahead of device destruction
    ///
    /// The caller must have waited for the device to be idle.
    pub(crate) fn shutdown(&self) {
        self.drain_deletion_queue();
        self.shut_down.store(true, Ordering::Release);

        let mut pool = lock(&self.upload_pool);
        if *pool != vk::CommandPool::null() {
            unsafe { self.device.destroy_command_pool(*pool, None) };
            *pool = vk::CommandPool::null();
        }

        // Frees the allocator's VkDeviceMemory pages
        drop(lock(&self.allocator).take());
    }
}
