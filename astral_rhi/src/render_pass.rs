//! Render pass descriptor and trait

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::format::PixelFormat;
use crate::texture::TextureHandle;
use crate::types::ClearValue;

/// What happens to an attachment's contents at pass begin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    #[default]
    Load,
    Clear,
    DontCare,
}

/// What happens to an attachment's contents at pass end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

/// Image layout an attachment is in at a given point of the pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceLayout {
    #[default]
    Undefined,
    RenderTarget,
    DepthWrite,
    DepthRead,
    ShaderRead,
    Present,
    CopySrc,
    CopyDst,
    General,
}

/// Role an attachment plays in the pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    RenderTarget,
    DepthStencil,
    Resolve,
    ShadingRate,
}

/// One attachment of a render pass
#[derive(Clone)]
pub struct RenderPassAttachment {
    pub kind: AttachmentKind,
    pub texture: TextureHandle,
    /// Flat subresource index: `mip + layer * mip_levels`
    pub subresource: u32,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear: ClearValue,
    pub initial_layout: ResourceLayout,
    pub subpass_layout: ResourceLayout,
    pub final_layout: ResourceLayout,
}

/// Ordered attachment list describing a render pass
#[derive(Clone, Default)]
pub struct RenderPassDesc {
    pub attachments: Vec<RenderPassAttachment>,
    pub width: u32,
    pub height: u32,
    pub debug_name: Option<String>,
}

impl RenderPassDesc {
    /// Hash key: the attachment formats crossed with the sample count.
    /// Two passes with equal keys are compatible for pipeline creation.
    pub fn format_signature(&self) -> u64 {
        let mut hasher = FxHasher::default();
        for attachment in &self.attachments {
            attachment.kind.hash(&mut hasher);
            attachment.texture.desc().format.hash(&mut hasher);
            attachment.texture.desc().sample_count.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Render-target format signature for pipeline descriptors
    pub fn render_target_formats(&self) -> crate::pipeline::RenderTargetFormats {
        let mut formats = crate::pipeline::RenderTargetFormats {
            sample_count: 1,
            ..Default::default()
        };
        for attachment in &self.attachments {
            let desc = attachment.texture.desc();
            match attachment.kind {
                AttachmentKind::RenderTarget => {
                    formats.color.push(desc.format);
                    formats.sample_count = desc.sample_count;
                }
                AttachmentKind::DepthStencil => {
                    formats.depth_stencil = Some(desc.format);
                    formats.sample_count = desc.sample_count;
                }
                AttachmentKind::Resolve | AttachmentKind::ShadingRate => {}
            }
        }
        formats
    }

    /// First color attachment format, if any
    pub fn first_color_format(&self) -> Option<PixelFormat> {
        self.attachments
            .iter()
            .find(|a| a.kind == AttachmentKind::RenderTarget)
            .map(|a| a.texture.desc().format)
    }
}

/// Render pass trait
pub trait RenderPass: Send + Sync {
    fn desc(&self) -> &RenderPassDesc;

    /// Format signature this pass was created under
    fn format_signature(&self) -> u64;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Shared render-pass handle
pub type RenderPassHandle = Arc<dyn RenderPass>;
