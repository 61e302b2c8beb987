//! D3D12 shader module
//!
//! D3D12 has no shader-module object; the DXIL blob is kept on the CPU and
//! handed to pipeline creation by pointer.

use windows::Win32::Graphics::Direct3D12::D3D12_SHADER_BYTECODE;

use astral_rhi::{RhiError, RhiResult, Shader, ShaderDesc, ShaderStage};

/// D3D12 shader implementation holding the DXIL blob
pub struct D3d12Shader {
    bytecode: Vec<u8>,
    stage: ShaderStage,
    bytecode_hash: u64,
}

impl D3d12Shader {
    /// Wrap pre-compiled DXIL bytecode. The blob must be produced with the
    /// register-space shifts from `astral_rhi::types`.
    pub fn new(desc: ShaderDesc) -> RhiResult<Self> {
        if desc.bytecode.is_empty() {
            return Err(RhiError::InvalidDescriptor("shader bytecode is empty".into()));
        }
        // Signed DXIL containers start with the DXBC fourcc
        if desc.bytecode.len() < 4 || &desc.bytecode[0..4] != b"DXBC" {
            return Err(RhiError::InvalidDescriptor(
                "shader bytecode is not a DXIL container".into(),
            ));
        }

        let bytecode_hash = desc.bytecode_hash();
        Ok(Self {
            bytecode: desc.bytecode,
            stage: desc.stage,
            bytecode_hash,
        })
    }

    /// Bytecode reference for pipeline and state-object descs. Valid while
    /// the shader is alive.
    pub(crate) fn dxil(&self) -> D3D12_SHADER_BYTECODE {
        D3D12_SHADER_BYTECODE {
            pShaderBytecode: self.bytecode.as_ptr() as *const _,
            BytecodeLength: self.bytecode.len(),
        }
    }
}

impl Shader for D3d12Shader {
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
