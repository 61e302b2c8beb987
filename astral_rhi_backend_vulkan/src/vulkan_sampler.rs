//! Vulkan sampler

use std::sync::Arc;

use ash::vk;

use astral_rhi::{rhi_err, BindlessIndex, DescriptorKind, RhiResult, Sampler, SamplerDesc};

use crate::vulkan_context::GpuContext;
use crate::vulkan_convert::{
    address_mode_to_vk, border_color_to_vk, compare_op_to_vk, filter_to_vk, mipmap_mode_to_vk,
};
use crate::vulkan_destroy::Zombie;

/// Vulkan sampler with its bindless slot
pub struct VulkanSampler {
    pub(crate) sampler: vk::Sampler,
    desc: SamplerDesc,
    bindless: BindlessIndex,
    ctx: Arc<GpuContext>,
}

impl VulkanSampler {
    pub fn new(ctx: Arc<GpuContext>, desc: SamplerDesc) -> RhiResult<Self> {
        let mut create_info = vk::SamplerCreateInfo::default()
            .min_filter(filter_to_vk(desc.min_filter))
            .mag_filter(filter_to_vk(desc.mag_filter))
            .mipmap_mode(mipmap_mode_to_vk(desc.mip_filter))
            .address_mode_u(address_mode_to_vk(desc.address_u))
            .address_mode_v(address_mode_to_vk(desc.address_v))
            .address_mode_w(address_mode_to_vk(desc.address_w))
            .border_color(border_color_to_vk(desc.border_color))
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod)
            .mip_lod_bias(desc.lod_bias)
            .anisotropy_enable(desc.max_anisotropy > 1.0)
            .max_anisotropy(desc.max_anisotropy);

        if let Some(compare) = desc.compare {
            create_info = create_info
                .compare_enable(true)
                .compare_op(compare_op_to_vk(compare));
        }

        let sampler = unsafe {
            ctx.device
                .create_sampler(&create_info, None)
                .map_err(|e| rhi_err!("Failed to create sampler: {:?}", e))?
        };

        let bindless = match ctx.bindless.allocate(DescriptorKind::Sampler) {
            Ok(index) => index,
            Err(e) => {
                unsafe { ctx.device.destroy_sampler(sampler, None) };
                return Err(e);
            }
        };
        ctx.bindless.write_sampler(&ctx.device, bindless, sampler);

        Ok(Self {
            sampler,
            desc,
            bindless,
            ctx,
        })
    }
}

impl Sampler for VulkanSampler {
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

impl Drop for VulkanSampler {
    fn drop(&mut self) {
        let frame = self.ctx.current_frame();
        self.ctx
            .bindless
            .free(DescriptorKind::Sampler, self.bindless, frame);
        self.ctx.destroy.push(Zombie::Sampler(self.sampler));
    }
}
