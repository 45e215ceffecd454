//! Pipeline parameter cache
//!
//! Shader parameters are set by name into a CPU-side cache and only pushed to
//! the backend when the pipeline commits them, so setting the same parameter N
//! times before a draw costs a single backend call.

use std::sync::{Mutex, MutexGuard};
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;

/// Typed value of a shader parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    /// Size in bytes once laid out for the GPU (std430 rules, mat3 columns padded to vec4)
    pub fn gpu_size(&self) -> usize {
        match self {
            UniformValue::Int(_) | UniformValue::Float(_) => 4,
            UniformValue::Vec2(_) => 8,
            UniformValue::Vec3(_) => 12,
            UniformValue::Vec4(_) => 16,
            UniformValue::Mat3(_) => 48,
            UniformValue::Mat4(_) => 64,
        }
    }

    /// GPU byte layout of the value (see [`UniformValue::gpu_size`])
    pub fn to_gpu_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Int(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Float(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec2(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec3(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec4(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Mat3(m) => {
                let mut bytes = Vec::with_capacity(48);
                for column in [m.x_axis, m.y_axis, m.z_axis] {
                    bytes.extend_from_slice(bytemuck::bytes_of(&column.extend(0.0)));
                }
                bytes
            }
            UniformValue::Mat4(m) => bytemuck::bytes_of(m).to_vec(),
        }
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self { UniformValue::Int(v) }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self { UniformValue::Float(v) }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self { UniformValue::Vec2(v) }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self { UniformValue::Vec3(v) }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self { UniformValue::Vec4(v) }
}

impl From<Mat3> for UniformValue {
    fn from(v: Mat3) -> Self { UniformValue::Mat3(v) }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self { UniformValue::Mat4(v) }
}

/// Dirty-tracked mapping of parameter name to value
///
/// Any `set` marks the cache dirty (no equality check). Only
/// [`ParameterCache::take_dirty`] clears the flag.
#[derive(Debug, Clone, Default)]
pub struct ParameterCache {
    values: FxHashMap<String, UniformValue>,
    dirty: bool,
}

impl ParameterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite a value and mark the cache dirty
    pub fn set(&mut self, name: &str, value: UniformValue) {
        match self.values.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.values.insert(name.to_string(), value);
            }
        }
        self.dirty = true;
    }

    pub fn get(&self, name: &str) -> Option<UniformValue> {
        self.values.get(name).copied()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &FxHashMap<String, UniformValue> {
        &self.values
    }

    /// Every cached value, sorted by name, and clear the dirty flag
    ///
    /// Returns `None` (and changes nothing) when the cache is clean.
    pub fn take_dirty(&mut self) -> Option<Vec<(String, UniformValue)>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        let mut values: Vec<(String, UniformValue)> = self.values
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        Some(values)
    }
}

/// Thread-safe parameter cache embedded in backend pipeline objects
///
/// Taking the dirty values and clearing the flag happen under one lock, so a
/// `set_uniform` racing with a commit is never lost: it re-marks the cache
/// dirty for the next commit.
#[derive(Debug, Default)]
pub struct PipelineParameters {
    cache: Mutex<ParameterCache>,
}

impl PipelineParameters {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ParameterCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_uniform(&self, name: &str, value: UniformValue) {
        self.lock().set(name, value);
    }

    pub fn has_dirty(&self) -> bool {
        self.lock().is_dirty()
    }

    /// Copy of the current cache
    pub fn snapshot(&self) -> ParameterCache {
        self.lock().clone()
    }

    /// See [`ParameterCache::take_dirty`]
    pub fn take_dirty(&self) -> Option<Vec<(String, UniformValue)>> {
        self.lock().take_dirty()
    }

    /// Re-mark the cache dirty after a push that could not complete
    pub fn mark_dirty(&self) {
        self.lock().dirty = true;
    }
}

#[cfg(test)]
#[path = "parameter_cache_tests.rs"]
mod tests;
