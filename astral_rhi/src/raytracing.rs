//! Raytracing resources: acceleration structures and RT pipeline states

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::bindless::BindlessIndex;
use crate::buffer::BufferHandle;
use crate::format::PixelFormat;
use crate::shader::ShaderHandle;

/// Triangle geometry for a bottom-level acceleration structure
#[derive(Clone)]
pub struct AccelerationStructureGeometry {
    pub vertex_buffer: BufferHandle,
    pub vertex_offset: u64,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub vertex_format: PixelFormat,
    pub index_buffer: Option<BufferHandle>,
    pub index_offset: u64,
    pub index_count: u32,
    /// Geometry is opaque to any-hit shaders
    pub opaque: bool,
}

/// One instance referencing a bottom-level structure
#[derive(Clone)]
pub struct AccelerationStructureInstance {
    pub blas: Arc<dyn AccelerationStructure>,
    /// Row-major 3x4 object-to-world transform
    pub transform: [[f32; 4]; 3],
    pub instance_id: u32,
    pub mask: u8,
    pub hit_group_offset: u32,
}

/// Descriptor for creating an acceleration structure
#[derive(Clone)]
pub enum AccelerationStructureDesc {
    /// Bottom level, built from triangle geometry
    Bottom {
        geometry: Vec<AccelerationStructureGeometry>,
        debug_name: Option<String>,
    },
    /// Top level, built from BLAS instances
    Top {
        instances: Vec<AccelerationStructureInstance>,
        debug_name: Option<String>,
    },
}

/// Acceleration structure trait.
///
/// Creation allocates the backing storage; the actual build is recorded
/// through [`CommandRecorder::build_acceleration_structure`]
/// (crate::command::CommandRecorder::build_acceleration_structure).
pub trait AccelerationStructure: Send + Sync {
    /// Bindless acceleration-structure slot for shader access
    fn bindless(&self) -> BindlessIndex;

    /// Whether this is a top-level structure
    fn is_top_level(&self) -> bool;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Shared acceleration-structure handle
pub type AccelerationStructureHandle = Arc<dyn AccelerationStructure>;

/// A hit group combining closest-hit / any-hit / intersection shaders
#[derive(Clone)]
pub struct HitGroup {
    pub name: String,
    pub closest_hit: Option<ShaderHandle>,
    pub any_hit: Option<ShaderHandle>,
    pub intersection: Option<ShaderHandle>,
}

/// Descriptor for a raytracing pipeline state
#[derive(Clone)]
pub struct RaytracingPipelineDesc {
    pub ray_generation: ShaderHandle,
    pub miss_shaders: Vec<ShaderHandle>,
    pub hit_groups: Vec<HitGroup>,
    pub max_recursion_depth: u32,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub debug_name: Option<String>,
}

impl RaytracingPipelineDesc {
    /// Cache key over all participating shader identities and limits
    pub fn cache_key(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.ray_generation.bytecode_hash().hash(&mut hasher);
        for miss in &self.miss_shaders {
            miss.bytecode_hash().hash(&mut hasher);
        }
        for group in &self.hit_groups {
            group.name.hash(&mut hasher);
            for shader in [&group.closest_hit, &group.any_hit, &group.intersection]
                .into_iter()
                .flatten()
            {
                shader.bytecode_hash().hash(&mut hasher);
            }
        }
        self.max_recursion_depth.hash(&mut hasher);
        self.max_payload_size.hash(&mut hasher);
        self.max_attribute_size.hash(&mut hasher);
        hasher.finish()
    }
}
