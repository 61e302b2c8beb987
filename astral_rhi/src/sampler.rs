//! Sampler descriptor and trait

use std::sync::Arc;

use crate::bindless::BindlessIndex;

/// Texel filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Texture coordinate addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

/// Depth-compare operator for shadow samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

/// Border color for `AddressMode::ClampToBorder`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BorderColor {
    #[default]
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

/// Descriptor for creating a sampler
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mip_filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    /// 1.0 disables anisotropic filtering
    pub max_anisotropy: f32,
    pub compare: Option<CompareOp>,
    pub border_color: BorderColor,
    pub min_lod: f32,
    pub max_lod: f32,
    pub lod_bias: f32,
    pub debug_name: Option<String>,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            mip_filter: FilterMode::Linear,
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            max_anisotropy: 1.0,
            compare: None,
            border_color: BorderColor::TransparentBlack,
            min_lod: 0.0,
            max_lod: f32::MAX,
            lod_bias: 0.0,
            debug_name: None,
        }
    }
}

/// Sampler resource trait
pub trait Sampler: Send + Sync {
    fn desc(&self) -> &SamplerDesc;

    /// Bindless sampler slot
    fn bindless(&self) -> BindlessIndex;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Shared sampler handle
pub type SamplerHandle = Arc<dyn Sampler>;
