//! Vulkan render pass
//!
//! The backend renders through dynamic rendering (core in Vulkan 1.3), so a
//! render pass owns no native pass or framebuffer object. Creation resolves
//! each attachment's image view once; `begin_render_pass` assembles the
//! `vk::RenderingInfo` from the resolved views.

use std::sync::Arc;

use ash::vk;

use astral_rhi::{
    AttachmentKind, ClearValue, RenderPass, RenderPassAttachment, RenderPassDesc, RhiResult,
    Texture, TextureView, TextureViewDesc,
};

use crate::vulkan_context::GpuContext;
use crate::vulkan_texture::VulkanTextureView;

/// One resolved attachment: the image, the single-subresource view, and the
/// ops copied out of the descriptor
pub(crate) struct ResolvedAttachment {
    pub kind: AttachmentKind,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub aspect: vk::ImageAspectFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear: vk::ClearValue,
    pub initial_layout: vk::ImageLayout,
    pub subpass_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    pub src_layout: astral_rhi::ResourceLayout,
    pub subpass_resource_layout: astral_rhi::ResourceLayout,
    pub final_resource_layout: astral_rhi::ResourceLayout,
    /// Keeps the parent texture's cached view alive
    _view_handle: Arc<dyn astral_rhi::TextureView>,
}

pub(crate) fn clear_value_to_vk(clear: ClearValue) -> vk::ClearValue {
    match clear {
        ClearValue::Color(color) => vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

fn resolve_attachment(
    attachment: &RenderPassAttachment,
) -> RhiResult<ResolvedAttachment> {
    use crate::vulkan_convert::{aspect_to_vk, layout_to_vk, load_op_to_vk, store_op_to_vk};
    use crate::vulkan_texture::VulkanTexture;

    let texture_desc = attachment.texture.desc().clone();
    let mip = attachment.subresource % texture_desc.mip_levels;
    let layer = attachment.subresource / texture_desc.mip_levels;

    let view_handle = attachment.texture.get_view(TextureViewDesc {
        base_mip: mip,
        mip_count: 1,
        base_layer: layer,
        layer_count: 1,
        format: None,
    })?;
    let view = view_handle
        .as_any()
        .downcast_ref::<VulkanTextureView>()
        .map(|v| v.view)
        .unwrap_or(vk::ImageView::null());
    let image = attachment
        .texture
        .as_any()
        .downcast_ref::<VulkanTexture>()
        .map(|t| t.image)
        .unwrap_or(vk::Image::null());

    Ok(ResolvedAttachment {
        kind: attachment.kind,
        image,
        view,
        aspect: aspect_to_vk(texture_desc.format),
        load_op: load_op_to_vk(attachment.load_op),
        store_op: store_op_to_vk(attachment.store_op),
        clear: clear_value_to_vk(attachment.clear),
        initial_layout: layout_to_vk(attachment.initial_layout),
        subpass_layout: layout_to_vk(attachment.subpass_layout),
        final_layout: layout_to_vk(attachment.final_layout),
        src_layout: attachment.initial_layout,
        subpass_resource_layout: attachment.subpass_layout,
        final_resource_layout: attachment.final_layout,
        _view_handle: view_handle,
    })
}

/// Vulkan render pass: the descriptor plus resolved attachment views
pub struct VulkanRenderPass {
    desc: RenderPassDesc,
    signature: u64,
    pub(crate) attachments: Vec<ResolvedAttachment>,
    _ctx: Arc<GpuContext>,
}

impl VulkanRenderPass {
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

impl RenderPass for VulkanRenderPass {
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
