//! Vulkan shader module

use std::sync::Arc;

use ash::vk;

use astral_rhi::{rhi_err, RhiError, RhiResult, Shader, ShaderDesc, ShaderStage};

use crate::vulkan_context::GpuContext;
use crate::vulkan_destroy::Zombie;

/// Vulkan shader implementation wrapping a SPIR-V module
pub struct VulkanShader {
    pub(crate) module: vk::ShaderModule,
    stage: ShaderStage,
    bytecode_hash: u64,
    ctx: Arc<GpuContext>,
}

impl VulkanShader {
    /// Wrap pre-compiled SPIR-V bytecode. The blob must be produced with the
    /// register-space shifts from `astral_rhi::types`.
    pub fn new(ctx: Arc<GpuContext>, desc: ShaderDesc) -> RhiResult<Self> {
        if desc.bytecode.is_empty() {
            return Err(RhiError::InvalidDescriptor("shader bytecode is empty".into()));
        }
        if desc.bytecode.len() % 4 != 0 {
            return Err(RhiError::InvalidDescriptor(
                "SPIR-V bytecode length must be a multiple of 4".into(),
            ));
        }

        // SPIR-V words; the blob arrives as bytes
        let code: Vec<u32> = desc
            .bytecode
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

        let module = unsafe {
            ctx.device
                .create_shader_module(&create_info, None)
                .map_err(|e| rhi_err!("Failed to create shader module: {:?}", e))?
        };

        Ok(Self {
            module,
            stage: desc.stage,
            bytecode_hash: desc.bytecode_hash(),
            ctx,
        })
    }
}

impl Shader for VulkanShader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn bytecode_hash(&self) -> u64 {
        self.bytecode_hash
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for VulkanShader {
    fn drop(&mut self) {
        self.ctx.destroy.push(Zombie::ShaderModule(self.module));
    }
}
