#![allow(dead_code)]
//! GPU test utilities - Headless Vulkan devices for integration tests
//!
//! The Vulkan backend needs no window, so every test creates its own small
//! device. Tests still run serially: drivers and validation layers do not
//! like many instances being created at once.

use galaxy_rhi::rhi::device::*;
use galaxy_rhi::rhi::{RhiConfig, RhiType};
use galaxy_rhi_vulkan::VulkanDevice;
use std::sync::Arc;

pub const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
pub const GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
pub const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

/// Configuration for a `size`x`size` headless backbuffer
pub fn test_config(size: u32) -> RhiConfig {
    RhiConfig {
        rhi_type: RhiType::Vulkan,
        app_name: "Galaxy RHI Vulkan Tests".to_string(),
        backbuffer_width: size,
        backbuffer_height: size,
        max_texture_size: 4096,
        ..RhiConfig::default()
    }
}

/// Create a headless device with a 16x16 backbuffer
pub fn create_test_device() -> VulkanDevice {
    VulkanDevice::new(&test_config(16)).expect("Failed to create VulkanDevice for tests")
}

/// RGBA8 texture usable as a color attachment and blit source
pub fn color_texture(device: &mut VulkanDevice, size: u32, name: &str) -> Arc<dyn Texture> {
    device
        .create_texture(&TextureDesc::new_2d(
            size,
            size,
            TextureFormat::R8G8B8A8_UNORM,
            TextureUsage::RENDER_TARGET | TextureUsage::TRANSFER_SRC,
            name,
        ))
        .unwrap()
}

/// Run `record` inside a frame, then present
pub fn render_frame<F>(device: &mut VulkanDevice, record: F)
where
    F: FnOnce(&mut VulkanDevice),
{
    device.begin_frame().unwrap();
    record(device);
    device.end_frame().unwrap();
    device.present().unwrap();
}
