//! Shader stage and module types
//!
//! The RHI does not parse shader source; it consumes pre-compiled bytecode
//! only. The D3D12 backend accepts DXIL (shader model 6.0-6.7), the Vulkan
//! backend SPIR-V 1.5+. Bytecode must be produced with the register-space
//! shifts documented in [`crate::types`] (`b +0`, `t +1000`, `u +2000`,
//! `s +3000`) so all HLSL register classes fold into one binding space.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

/// Shader pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
    Mesh,
    Amplification,
    RayGeneration,
    Miss,
    ClosestHit,
    AnyHit,
    Intersection,
}

/// Descriptor for creating a shader module
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub stage: ShaderStage,
    /// Native bytecode blob (DXIL or SPIR-V depending on the backend)
    pub bytecode: Vec<u8>,
    pub debug_name: Option<String>,
}

impl ShaderDesc {
    /// Stable identity of the bytecode, combined into pipeline cache keys
    pub fn bytecode_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.stage.hash(&mut hasher);
        self.bytecode.hash(&mut hasher);
        hasher.finish()
    }
}

/// Shader module trait
pub trait Shader: Send + Sync {
    fn stage(&self) -> ShaderStage;

    /// Bytecode identity used in pipeline cache keys
    fn bytecode_hash(&self) -> u64;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Shared shader handle
pub type ShaderHandle = Arc<dyn Shader>;
