//! D3D12 sampler
//!
//! Samplers have no native object; the descriptor is written straight into
//! the shader-visible sampler heap and the bindless slot is the handle.

use std::sync::Arc;

use windows::Win32::Graphics::Direct3D12::*;

use astral_rhi::{BindlessIndex, DescriptorKind, RhiResult, Sampler, SamplerDesc};

use crate::d3d12_context::GpuContext;
use crate::d3d12_convert::{
    address_mode_to_d3d12, border_color_to_d3d12, compare_op_to_d3d12, filter_to_d3d12,
};

/// D3D12 sampler with its bindless slot
pub struct D3d12Sampler {
    desc: SamplerDesc,
    bindless: BindlessIndex,
    ctx: Arc<GpuContext>,
}

impl D3d12Sampler {
    pub fn new(ctx: Arc<GpuContext>, desc: SamplerDesc) -> RhiResult<Self> {
        let native = D3D12_SAMPLER_DESC {
            Filter: filter_to_d3d12(&desc),
            AddressU: address_mode_to_d3d12(desc.address_u),
            AddressV: address_mode_to_d3d12(desc.address_v),
            AddressW: address_mode_to_d3d12(desc.address_w),
            MipLODBias: desc.lod_bias,
            MaxAnisotropy: desc.max_anisotropy as u32,
            ComparisonFunc: match desc.compare {
                Some(compare) => compare_op_to_d3d12(compare),
                None => D3D12_COMPARISON_FUNC_ALWAYS,
            },
            BorderColor: border_color_to_d3d12(desc.border_color),
            MinLOD: desc.min_lod,
            MaxLOD: desc.max_lod,
        };

        let bindless = ctx.bindless.allocate(DescriptorKind::Sampler)?;
        unsafe {
            ctx.device
                .CreateSampler(&native, ctx.bindless.sampler_cpu(bindless));
        }

        Ok(Self {
            desc,
            bindless,
            ctx,
        })
    }
}

impl Sampler for D3d12Sampler {
    fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    fn bindless(&self) -> BindlessIndex {
        self.bindless
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for D3d12Sampler {
    fn drop(&mut self) {
        let frame = self.ctx.current_frame();
        self.ctx
            .bindless
            .free(DescriptorKind::Sampler, self.bindless, frame);
    }
}
