//! D3D12 render pass
//!
//! D3D12 has no native pass object; a render pass resolves each attachment's
//! RTV or DSV handle once at creation, and `begin_render_pass` sets targets,
//! runs the clears and issues the entry barriers from the resolved data.

use std::sync::Arc;

use windows::Win32::Graphics::Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE;

use astral_rhi::{
    AttachmentKind, ClearValue, LoadOp, RenderPass, RenderPassAttachment, RenderPassDesc,
    ResourceLayout, RhiResult, StoreOp, Texture, TextureHandle,
};

use crate::d3d12_context::GpuContext;
use crate::d3d12_texture::D3d12Texture;

/// One resolved attachment: the CPU view handle plus the ops and layouts
/// copied out of the descriptor
pub(crate) struct ResolvedAttachment {
    pub kind: AttachmentKind,
    /// Keeps the resource and its cached view slot alive
    pub texture: TextureHandle,
    pub subresource: u32,
    /// RTV for render targets, DSV for depth-stencil; zero otherwise
    pub view: D3D12_CPU_DESCRIPTOR_HANDLE,
    pub has_stencil: bool,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear: ClearValue,
    pub initial_layout: ResourceLayout,
    pub subpass_layout: ResourceLayout,
    pub final_layout: ResourceLayout,
}

fn resolve_attachment(attachment: &RenderPassAttachment) -> RhiResult<ResolvedAttachment> {
    let texture_desc = attachment.texture.desc().clone();

    let view = match attachment.kind {
        AttachmentKind::RenderTarget => attachment
            .texture
            .as_any()
            .downcast_ref::<D3d12Texture>()
            .map(|t| t.rtv_handle(attachment.subresource))
            .transpose()?
            .unwrap_or_default(),
        AttachmentKind::DepthStencil => attachment
            .texture
            .as_any()
            .downcast_ref::<D3d12Texture>()
            .map(|t| t.dsv_handle(attachment.subresource))
            .transpose()?
            .unwrap_or_default(),
        // Resolve targets and shading-rate images need no CPU view
        AttachmentKind::Resolve | AttachmentKind::ShadingRate => {
            D3D12_CPU_DESCRIPTOR_HANDLE::default()
        }
    };

    Ok(ResolvedAttachment {
        kind: attachment.kind,
        texture: attachment.texture.clone(),
        subresource: attachment.subresource,
        view,
        has_stencil: texture_desc.format.has_stencil(),
        load_op: attachment.load_op,
        store_op: attachment.store_op,
        clear: attachment.clear,
        initial_layout: attachment.initial_layout,
        subpass_layout: attachment.subpass_layout,
        final_layout: attachment.final_layout,
    })
}

/// D3D12 render pass: the descriptor plus resolved attachment handles
pub struct D3d12RenderPass {
    desc: RenderPassDesc,
    signature: u64,
    pub(crate) attachments: Vec<ResolvedAttachment>,
    _ctx: Arc<GpuContext>,
}

impl D3d12RenderPass {
    pub fn new(ctx: Arc<GpuContext>, desc: RenderPassDesc) -> RhiResult<Self> {
        let attachments = desc
            .attachments
            .iter()
            .map(resolve_attachment)
            .collect::<RhiResult<Vec<_>>>()?;
        let signature = desc.format_signature();
        Ok(Self {
            desc,
            signature,
            attachments,
            _ctx: ctx,
        })
    }
}

impl RenderPass for D3d12RenderPass {
    fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    fn format_signature(&self) -> u64 {
        self.signature
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
