//! Vulkan texture and image views
//!
//! Views are created lazily through `get_view` and cached on the texture,
//! keyed by the normalized view descriptor. Each view allocates its bindless
//! slots based on the texture usage: a sampled-image slot for SAMPLED, a
//! storage-image slot for STORAGE.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use rustc_hash::FxHashMap;

use astral_rhi::{
    rhi_err, BindlessIndex, DescriptorKind, RhiError, RhiResult, Texture, TextureDesc,
    TextureDimension, TextureUsage, TextureView, TextureViewDesc,
};

use crate::vulkan_context::GpuContext;
use crate::vulkan_convert::{aspect_to_vk, format_to_vk, image_type_to_vk, view_type_to_vk};
use crate::vulkan_destroy::Zombie;

/// Vulkan image view with its bindless slots
pub struct VulkanTextureView {
    pub(crate) view: vk::ImageView,
    desc: TextureViewDesc,
    srv: BindlessIndex,
    uav: BindlessIndex,
    ctx: Arc<GpuContext>,
}

impl TextureView for VulkanTextureView {
    fn desc(&self) -> &TextureViewDesc {
        &self.desc
    }

    fn bindless_srv(&self) -> BindlessIndex {
        self.srv
    }

    fn bindless_uav(&self) -> BindlessIndex {
        self.uav
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for VulkanTextureView {
    fn drop(&mut self) {
        let frame = self.ctx.current_frame();
        self.ctx
            .bindless
            .free(DescriptorKind::SampledImage, self.srv, frame);
        self.ctx
            .bindless
            .free(DescriptorKind::StorageImage, self.uav, frame);
        self.ctx.destroy.push(Zombie::ImageView(self.view));
    }
}

/// Vulkan texture with its cached views
pub struct VulkanTexture {
    pub(crate) image: vk::Image,
    allocation: Option<Allocation>,
    desc: TextureDesc,
    views: Mutex<FxHashMap<TextureViewDesc, Arc<VulkanTextureView>>>,
    /// Swap-chain back buffers wrap images owned by the native chain
    owns_image: bool,
    ctx: Arc<GpuContext>,
}

fn usage_to_vk(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    if usage.contains(TextureUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_TARGET) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsage::DEPTH_STENCIL) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    flags
}

impl VulkanTexture {
    pub fn new(ctx: Arc<GpuContext>, desc: TextureDesc) -> RhiResult<Arc<Self>> {
        desc.validate()?;

        let depth = if desc.dimension == TextureDimension::D3 {
            desc.depth_or_array_size
        } else {
            1
        };

        let mut flags = vk::ImageCreateFlags::empty();
        if desc.dimension == TextureDimension::Cube {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }

        let (sharing_mode, families) = ctx.sharing();
        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type_to_vk(desc.dimension))
            .format(format_to_vk(desc.format))
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.native_array_size())
            .samples(vk::SampleCountFlags::from_raw(desc.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage_to_vk(desc.usage))
            .sharing_mode(sharing_mode)
            .queue_family_indices(families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            ctx.device
                .create_image(&create_info, None)
                .map_err(|e| rhi_err!("Failed to create image: {:?}", e))?
        };

        let requirements = unsafe { ctx.device.get_image_memory_requirements(image) };

        let allocation = ctx
            .allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name: desc.debug_name.as_deref().unwrap_or("texture"),
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|_| {
                unsafe { ctx.device.destroy_image(image, None) };
                RhiError::OutOfMemory
            })?;

        unsafe {
            ctx.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(|e| rhi_err!("Failed to bind image memory: {:?}", e))?;
        }

        ctx.set_object_name(image, desc.debug_name.as_deref());

        Ok(Arc::new(Self {
            image,
            allocation: Some(allocation),
            desc,
            views: Mutex::new(FxHashMap::default()),
            owns_image: true,
            ctx,
        }))
    }

    /// Wrap an image owned elsewhere (swap-chain back buffers)
    pub(crate) fn from_native(
        ctx: Arc<GpuContext>,
        desc: TextureDesc,
        image: vk::Image,
    ) -> Arc<Self> {
        ctx.set_object_name(image, desc.debug_name.as_deref());
        Arc::new(Self {
            image,
            allocation: None,
            desc,
            views: Mutex::new(FxHashMap::default()),
            owns_image: false,
            ctx,
        })
    }

    fn create_view(&self, normalized: TextureViewDesc) -> RhiResult<Arc<VulkanTextureView>> {
        let format = normalized.format.unwrap_or(self.desc.format);

        // Depth-stencil images are sampled through the depth aspect only
        let mut aspect = aspect_to_vk(format);
        if aspect.contains(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
            && self.desc.usage.contains(TextureUsage::SAMPLED)
        {
            aspect = vk::ImageAspectFlags::DEPTH;
        }

        let create_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(view_type_to_vk(self.desc.dimension, normalized.layer_count))
            .format(format_to_vk(format))
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(normalized.base_mip)
                    .level_count(normalized.mip_count)
                    .base_array_layer(normalized.base_layer)
                    .layer_count(normalized.layer_count),
            );

        let view = unsafe {
            self.ctx
                .device
                .create_image_view(&create_info, None)
                .map_err(|e| rhi_err!("Failed to create image view: {:?}", e))?
        };

        let srv = if self.desc.usage.contains(TextureUsage::SAMPLED) {
            let index = self.ctx.bindless.allocate(DescriptorKind::SampledImage)?;
            self.ctx
                .bindless
                .write_sampled_image(&self.ctx.device, index, view);
            index
        } else {
            BindlessIndex::UNBOUND
        };
        let uav = if self.desc.usage.contains(TextureUsage::STORAGE) {
            let index = self.ctx.bindless.allocate(DescriptorKind::StorageImage)?;
            self.ctx
                .bindless
                .write_storage_image(&self.ctx.device, index, view);
            index
        } else {
            BindlessIndex::UNBOUND
        };

        Ok(Arc::new(VulkanTextureView {
            view,
            desc: normalized,
            srv,
            uav,
            ctx: self.ctx.clone(),
        }))
    }
}

impl Texture for VulkanTexture {
    fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    fn get_view(&self, desc: TextureViewDesc) -> RhiResult<Arc<dyn TextureView>> {
        let normalized = desc.normalized(&self.desc)?;
        let mut views = self.views.lock().unwrap();
        if let Some(view) = views.get(&normalized) {
            return Ok(view.clone());
        }
        let view = self.create_view(normalized)?;
        views.insert(normalized, view.clone());
        Ok(view)
    }

    fn bindless_srv(&self) -> BindlessIndex {
        self.get_view(TextureViewDesc::all())
            .map(|view| view.bindless_srv())
            .unwrap_or(BindlessIndex::UNBOUND)
    }

    fn bindless_uav(&self) -> BindlessIndex {
        self.get_view(TextureViewDesc::all())
            .map(|view| view.bindless_uav())
            .unwrap_or(BindlessIndex::UNBOUND)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        // Views drop first through their Arcs; the image follows
        self.views.lock().unwrap().clear();
        if self.owns_image {
            self.ctx.destroy.push(Zombie::Image {
                image: self.image,
                allocation: self.allocation.take(),
            });
        }
    }
}
