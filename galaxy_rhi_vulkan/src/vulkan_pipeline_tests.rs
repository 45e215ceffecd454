//! Unit tests for push-constant packing and reflection merging
//!
//! Operates on reflection data only, no GPU required.

use super::*;
use crate::vulkan_shader::PushConstantMember;
use galaxy_rhi::glam::{Mat3, Vec3};

fn member(name: &str, offset: u32, size: u32) -> PushConstantMember {
    PushConstantMember { name: name.to_string(), offset, size }
}

fn block(size: u32, members: Vec<PushConstantMember>) -> PushConstantBlock {
    PushConstantBlock { size, members }
}

// ============================================================================
// PUSH CONSTANT BLOCK TESTS
// ============================================================================

#[test]
fn test_block_write_at_member_offset() {
    let layout = block(32, vec![member("tint", 0, 16), member("time", 16, 4)]);
    let mut data = vec![0u8; 32];

    assert!(layout.write(&mut data, "time", &UniformValue::Float(2.5).to_gpu_bytes()));

    assert_eq!(&data[16..20], &2.5f32.to_ne_bytes());
    assert!(data[..16].iter().all(|b| *b == 0));
}

#[test]
fn test_block_write_unknown_member() {
    let layout = block(4, vec![member("time", 0, 4)]);
    let mut data = vec![0u8; 4];

    assert!(!layout.write(&mut data, "missing", &[1, 2, 3, 4]));
    assert_eq!(data, vec![0u8; 4]);
}

#[test]
fn test_block_write_truncates_to_member_size() {
    let layout = block(16, vec![member("color", 0, 12), member("alpha", 12, 4)]);
    let mut data = vec![0u8; 16];

    // vec4 written into a vec3 member leaves the next member untouched
    assert!(layout.write(&mut data, "color", &[7u8; 16]));
    assert_eq!(&data[..12], &[7u8; 12]);
    assert_eq!(&data[12..], &[0u8; 4]);
}

#[test]
fn test_block_write_out_of_block_is_rejected() {
    let layout = block(8, vec![member("broken", 4, 16)]);
    let mut data = vec![0u8; 8];

    assert!(!layout.write(&mut data, "broken", &[1u8; 16]));
}

#[test]
fn test_block_write_mat3_uses_padded_columns() {
    let layout = block(48, vec![member("normal_matrix", 0, 48)]);
    let mut data = vec![0u8; 48];
    let value = UniformValue::from(Mat3::from_cols(Vec3::X, Vec3::Y, Vec3::Z));

    assert!(layout.write(&mut data, "normal_matrix", &value.to_gpu_bytes()));

    // Second column starts at byte 16
    assert_eq!(&data[20..24], &1.0f32.to_ne_bytes());
}

// ============================================================================
// REFLECTION MERGE TESTS
// ============================================================================

#[test]
fn test_merge_shared_block_unions_stages() {
    let vertex = ShaderReflection {
        push_constants: Some(block(64, vec![member("mvp", 0, 64)])),
        sampler_bindings: vec![],
    };
    let fragment = ShaderReflection {
        push_constants: Some(block(80, vec![member("mvp", 0, 64), member("tint", 64, 16)])),
        sampler_bindings: vec![0],
    };

    let merged = merge_reflections(
        &[(vk::ShaderStageFlags::VERTEX, &vertex), (vk::ShaderStageFlags::FRAGMENT, &fragment)],
        "test",
    )
    .unwrap();

    let push = merged.push_constants.unwrap();
    assert_eq!(push.size, 80);
    assert_eq!(push.members.len(), 2);
    assert_eq!(push.member("tint").unwrap().offset, 64);
    assert_eq!(merged.push_stages, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
    assert_eq!(merged.sampler_bindings, vec![(0, vk::ShaderStageFlags::FRAGMENT)]);
}

#[test]
fn test_merge_conflicting_offsets_fails() {
    let vertex = ShaderReflection {
        push_constants: Some(block(16, vec![member("time", 0, 4)])),
        sampler_bindings: vec![],
    };
    let fragment = ShaderReflection {
        push_constants: Some(block(16, vec![member("time", 8, 4)])),
        sampler_bindings: vec![],
    };

    let result = merge_reflections(
        &[(vk::ShaderStageFlags::VERTEX, &vertex), (vk::ShaderStageFlags::FRAGMENT, &fragment)],
        "conflict",
    );

    assert!(matches!(result, Err(Error::BackendError(_))));
}

#[test]
fn test_merge_without_push_constants() {
    let vertex = ShaderReflection::default();
    let fragment = ShaderReflection { push_constants: None, sampler_bindings: vec![2, 0] };

    let merged = merge_reflections(
        &[(vk::ShaderStageFlags::VERTEX, &vertex), (vk::ShaderStageFlags::FRAGMENT, &fragment)],
        "plain",
    )
    .unwrap();

    assert!(merged.push_constants.is_none());
    assert!(merged.push_stages.is_empty());
    let bindings: Vec<u32> = merged.sampler_bindings.iter().map(|(b, _)| *b).collect();
    assert_eq!(bindings, vec![0, 2]);
}

#[test]
fn test_merge_sampler_shared_by_two_stages() {
    let vertex = ShaderReflection { push_constants: None, sampler_bindings: vec![1] };
    let fragment = ShaderReflection { push_constants: None, sampler_bindings: vec![1] };

    let merged = merge_reflections(
        &[(vk::ShaderStageFlags::VERTEX, &vertex), (vk::ShaderStageFlags::FRAGMENT, &fragment)],
        "shared",
    )
    .unwrap();

    assert_eq!(
        merged.sampler_bindings,
        vec![(1, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)]
    );
}
