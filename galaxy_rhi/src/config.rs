//! RHI configuration

use crate::backend::RhiType;

/// Startup configuration of the RHI
#[derive(Debug, Clone)]
pub struct RhiConfig {
    /// Backend to create
    pub rhi_type: RhiType,
    /// Fall back to the default backend when `rhi_type` is not registered
    pub allow_fallback: bool,
    /// Enable backend validation (Vulkan validation layers)
    pub enable_validation: bool,
    pub app_name: String,
    pub app_version: (u32, u32, u32),
    /// Size of the device-owned backbuffer
    pub backbuffer_width: u32,
    pub backbuffer_height: u32,
    /// Render thread pool size
    pub worker_threads: usize,
    /// Command queue thread count (configuration only)
    pub queue_thread_count: usize,
    /// Texture size limit reported by the legacy backend
    pub max_texture_size: u32,
}

impl Default for RhiConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        Self {
            rhi_type: RhiType::default(),
            allow_fallback: true,
            enable_validation: cfg!(debug_assertions),
            app_name: "Galaxy RHI Application".to_string(),
            app_version: (1, 0, 0),
            backbuffer_width: 1280,
            backbuffer_height: 720,
            worker_threads: cores.saturating_sub(1).max(1),
            queue_thread_count: 1,
            max_texture_size: 8192,
        }
    }
}
