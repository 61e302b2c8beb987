//! D3D12 texture and views
//!
//! Shader-visible views are created lazily through `get_view` and cached on
//! the texture, keyed by the normalized view descriptor. Each view allocates
//! its bindless slots based on the texture usage: a shader-resource slot for
//! SAMPLED, an unordered-access slot for STORAGE. Render-target and
//! depth-stencil views live in the CPU heaps and are cached per subresource
//! for the render-pass path.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;

use astral_rhi::{
    rhi_err, BindlessIndex, DescriptorKind, PixelFormat, RhiError, RhiResult, Texture,
    TextureDesc, TextureDimension, TextureUsage, TextureView, TextureViewDesc,
};

use crate::d3d12_context::GpuContext;
use crate::d3d12_convert::{
    depth_srv_dxgi, depth_typeless_dxgi, format_to_dxgi, resource_dimension_to_d3d12,
};
use crate::d3d12_destroy::Zombie;

/// D3D12 shader-visible texture view with its bindless slots
pub struct D3d12TextureView {
    desc: TextureViewDesc,
    srv: BindlessIndex,
    uav: BindlessIndex,
    ctx: Arc<GpuContext>,
}

impl TextureView for D3d12TextureView {
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

impl Drop for D3d12TextureView {
    fn drop(&mut self) {
        let frame = self.ctx.current_frame();
        self.ctx
            .bindless
            .free(DescriptorKind::SampledImage, self.srv, frame);
        self.ctx
            .bindless
            .free(DescriptorKind::StorageImage, self.uav, frame);
    }
}

/// D3D12 texture with its cached views
pub struct D3d12Texture {
    pub(crate) resource: ID3D12Resource,
    desc: TextureDesc,
    views: Mutex<FxHashMap<TextureViewDesc, Arc<D3d12TextureView>>>,
    /// Render-target view heap slots, keyed by subresource
    rtvs: Mutex<FxHashMap<u32, u32>>,
    /// Depth-stencil view heap slots, keyed by subresource
    dsvs: Mutex<FxHashMap<u32, u32>>,
    /// Swap-chain back buffers wrap resources owned by the native chain
    owns_resource: bool,
    ctx: Arc<GpuContext>,
}

fn resource_flags(desc: &TextureDesc) -> D3D12_RESOURCE_FLAGS {
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if desc.usage.contains(TextureUsage::STORAGE) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }
    if desc.usage.contains(TextureUsage::RENDER_TARGET) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if desc.usage.contains(TextureUsage::DEPTH_STENCIL) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
        if !desc.usage.contains(TextureUsage::SAMPLED) {
            flags |= D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE;
        }
    }
    flags
}

/// Resource format; depth textures that are also sampled must be typeless so
/// both the DSV and the SRV can cast from them
fn resource_format(desc: &TextureDesc) -> windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT {
    if desc.format.is_depth() && desc.usage.contains(TextureUsage::SAMPLED) {
        depth_typeless_dxgi(desc.format)
    } else {
        format_to_dxgi(desc.format)
    }
}

fn srv_format(format: PixelFormat) -> windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT {
    if format.is_depth() {
        depth_srv_dxgi(format)
    } else {
        format_to_dxgi(format)
    }
}

impl D3d12Texture {
    pub fn new(ctx: Arc<GpuContext>, desc: TextureDesc) -> RhiResult<Arc<Self>> {
        desc.validate()?;

        let depth_or_array = if desc.dimension == TextureDimension::D3 {
            desc.depth_or_array_size
        } else {
            desc.native_array_size()
        };

        let heap_properties = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC1 {
            Dimension: resource_dimension_to_d3d12(desc.dimension),
            Width: desc.width as u64,
            Height: desc.height,
            DepthOrArraySize: depth_or_array as u16,
            MipLevels: desc.mip_levels as u16,
            Format: resource_format(&desc),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: desc.sample_count,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: resource_flags(&desc),
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            ctx.device
                .CreateCommittedResource3(
                    &heap_properties,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    D3D12_BARRIER_LAYOUT_UNDEFINED,
                    None,
                    None,
                    None,
                    &mut resource,
                )
                .map_err(|e| {
                    if e.code() == windows::Win32::Foundation::E_OUTOFMEMORY {
                        RhiError::OutOfMemory
                    } else {
                        rhi_err!("Failed to create texture: {:?}", e)
                    }
                })?;
        }
        let resource = resource.ok_or_else(|| rhi_err!("Texture creation returned no resource"))?;
        ctx.set_object_name(&resource, desc.debug_name.as_deref());

        Ok(Arc::new(Self {
            resource,
            desc,
            views: Mutex::new(FxHashMap::default()),
            rtvs: Mutex::new(FxHashMap::default()),
            dsvs: Mutex::new(FxHashMap::default()),
            owns_resource: true,
            ctx,
        }))
    }

    /// Wrap a resource owned elsewhere (swap-chain back buffers)
    pub(crate) fn from_native(
        ctx: Arc<GpuContext>,
        desc: TextureDesc,
        resource: ID3D12Resource,
    ) -> Arc<Self> {
        ctx.set_object_name(&resource, desc.debug_name.as_deref());
        Arc::new(Self {
            resource,
            desc,
            views: Mutex::new(FxHashMap::default()),
            rtvs: Mutex::new(FxHashMap::default()),
            dsvs: Mutex::new(FxHashMap::default()),
            owns_resource: false,
            ctx,
        })
    }

    fn write_srv(&self, index: BindlessIndex, normalized: &TextureViewDesc) {
        let format = srv_format(normalized.format.unwrap_or(self.desc.format));
        let mut view_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            ..Default::default()
        };

        let array = normalized.layer_count > 1 || normalized.base_layer > 0;
        match self.desc.dimension {
            TextureDimension::D1 => {
                if array {
                    view_desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE1DARRAY;
                    view_desc.Anonymous.Texture1DArray = D3D12_TEX1D_ARRAY_SRV {
                        MostDetailedMip: normalized.base_mip,
                        MipLevels: normalized.mip_count,
                        FirstArraySlice: normalized.base_layer,
                        ArraySize: normalized.layer_count,
                        ResourceMinLODClamp: 0.0,
                    };
                } else {
                    view_desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE1D;
                    view_desc.Anonymous.Texture1D = D3D12_TEX1D_SRV {
                        MostDetailedMip: normalized.base_mip,
                        MipLevels: normalized.mip_count,
                        ResourceMinLODClamp: 0.0,
                    };
                }
            }
            TextureDimension::D2 => {
                if self.desc.sample_count > 1 {
                    if array {
                        view_desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2DMSARRAY;
                        view_desc.Anonymous.Texture2DMSArray = D3D12_TEX2DMS_ARRAY_SRV {
                            FirstArraySlice: normalized.base_layer,
                            ArraySize: normalized.layer_count,
                        };
                    } else {
                        view_desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2DMS;
                    }
                } else if array {
                    view_desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2DARRAY;
                    view_desc.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_SRV {
                        MostDetailedMip: normalized.base_mip,
                        MipLevels: normalized.mip_count,
                        FirstArraySlice: normalized.base_layer,
                        ArraySize: normalized.layer_count,
                        PlaneSlice: 0,
                        ResourceMinLODClamp: 0.0,
                    };
                } else {
                    view_desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2D;
                    view_desc.Anonymous.Texture2D = D3D12_TEX2D_SRV {
                        MostDetailedMip: normalized.base_mip,
                        MipLevels: normalized.mip_count,
                        PlaneSlice: 0,
                        ResourceMinLODClamp: 0.0,
                    };
                }
            }
            TextureDimension::D3 => {
                view_desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE3D;
                view_desc.Anonymous.Texture3D = D3D12_TEX3D_SRV {
                    MostDetailedMip: normalized.base_mip,
                    MipLevels: normalized.mip_count,
                    ResourceMinLODClamp: 0.0,
                };
            }
            TextureDimension::Cube => {
                if normalized.layer_count > 6 {
                    view_desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURECUBEARRAY;
                    view_desc.Anonymous.TextureCubeArray = D3D12_TEXCUBE_ARRAY_SRV {
                        MostDetailedMip: normalized.base_mip,
                        MipLevels: normalized.mip_count,
                        First2DArrayFace: normalized.base_layer,
                        NumCubes: normalized.layer_count / 6,
                        ResourceMinLODClamp: 0.0,
                    };
                } else {
                    view_desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURECUBE;
                    view_desc.Anonymous.TextureCube = D3D12_TEXCUBE_SRV {
                        MostDetailedMip: normalized.base_mip,
                        MipLevels: normalized.mip_count,
                        ResourceMinLODClamp: 0.0,
                    };
                }
            }
        }

        unsafe {
            self.ctx.device.CreateShaderResourceView(
                &self.resource,
                Some(&view_desc),
                self.ctx.bindless.resource_cpu(index),
            );
        }
    }

    fn write_uav(&self, index: BindlessIndex, normalized: &TextureViewDesc) {
        let format = format_to_dxgi(normalized.format.unwrap_or(self.desc.format));
        let mut view_desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
            Format: format,
            ..Default::default()
        };

        // Storage views address one mip level
        let array = normalized.layer_count > 1
            || normalized.base_layer > 0
            || self.desc.dimension == TextureDimension::Cube;
        match self.desc.dimension {
            TextureDimension::D1 => {
                if array {
                    view_desc.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE1DARRAY;
                    view_desc.Anonymous.Texture1DArray = D3D12_TEX1D_ARRAY_UAV {
                        MipSlice: normalized.base_mip,
                        FirstArraySlice: normalized.base_layer,
                        ArraySize: normalized.layer_count,
                    };
                } else {
                    view_desc.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE1D;
                    view_desc.Anonymous.Texture1D = D3D12_TEX1D_UAV {
                        MipSlice: normalized.base_mip,
                    };
                }
            }
            TextureDimension::D2 | TextureDimension::Cube => {
                if array {
                    view_desc.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE2DARRAY;
                    view_desc.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_UAV {
                        MipSlice: normalized.base_mip,
                        FirstArraySlice: normalized.base_layer,
                        ArraySize: normalized.layer_count,
                        PlaneSlice: 0,
                    };
                } else {
                    view_desc.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE2D;
                    view_desc.Anonymous.Texture2D = D3D12_TEX2D_UAV {
                        MipSlice: normalized.base_mip,
                        PlaneSlice: 0,
                    };
                }
            }
            TextureDimension::D3 => {
                view_desc.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE3D;
                view_desc.Anonymous.Texture3D = D3D12_TEX3D_UAV {
                    MipSlice: normalized.base_mip,
                    FirstWSlice: 0,
                    WSize: u32::MAX,
                };
            }
        }

        unsafe {
            self.ctx.device.CreateUnorderedAccessView(
                &self.resource,
                None,
                Some(&view_desc),
                self.ctx.bindless.resource_cpu(index),
            );
        }
    }

    fn create_view(&self, normalized: TextureViewDesc) -> RhiResult<Arc<D3d12TextureView>> {
        let srv = if self.desc.usage.contains(TextureUsage::SAMPLED) {
            let index = self.ctx.bindless.allocate(DescriptorKind::SampledImage)?;
            self.write_srv(index, &normalized);
            index
        } else {
            BindlessIndex::UNBOUND
        };
        let uav = if self.desc.usage.contains(TextureUsage::STORAGE) {
            let index = self.ctx.bindless.allocate(DescriptorKind::StorageImage)?;
            self.write_uav(index, &normalized);
            index
        } else {
            BindlessIndex::UNBOUND
        };

        Ok(Arc::new(D3d12TextureView {
            desc: normalized,
            srv,
            uav,
            ctx: self.ctx.clone(),
        }))
    }

    fn subresource_location(&self, subresource: u32) -> (u32, u32) {
        let mip = subresource % self.desc.mip_levels;
        let layer = subresource / self.desc.mip_levels;
        (mip, layer)
    }

    /// CPU render-target view handle for one subresource, created on first use
    pub(crate) fn rtv_handle(&self, subresource: u32) -> RhiResult<D3D12_CPU_DESCRIPTOR_HANDLE> {
        if !self.desc.usage.contains(TextureUsage::RENDER_TARGET) {
            return Err(RhiError::InvalidDescriptor(
                "texture usage lacks RENDER_TARGET".into(),
            ));
        }
        let mut rtvs = self.rtvs.lock().unwrap();
        if let Some(&slot) = rtvs.get(&subresource) {
            return Ok(self.ctx.bindless.rtvs.cpu_handle(slot));
        }

        let (mip, layer) = self.subresource_location(subresource);
        let mut view_desc = D3D12_RENDER_TARGET_VIEW_DESC {
            Format: format_to_dxgi(self.desc.format),
            ..Default::default()
        };
        if self.desc.dimension == TextureDimension::D3 {
            view_desc.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE3D;
            view_desc.Anonymous.Texture3D = D3D12_TEX3D_RTV {
                MipSlice: mip,
                FirstWSlice: 0,
                WSize: u32::MAX,
            };
        } else if self.desc.sample_count > 1 {
            view_desc.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE2DMS;
        } else if self.desc.native_array_size() > 1 {
            view_desc.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE2DARRAY;
            view_desc.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_RTV {
                MipSlice: mip,
                FirstArraySlice: layer,
                ArraySize: 1,
                PlaneSlice: 0,
            };
        } else {
            view_desc.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE2D;
            view_desc.Anonymous.Texture2D = D3D12_TEX2D_RTV {
                MipSlice: mip,
                PlaneSlice: 0,
            };
        }

        let slot = self.ctx.bindless.allocate_rtv()?;
        let handle = self.ctx.bindless.rtvs.cpu_handle(slot);
        unsafe {
            self.ctx
                .device
                .CreateRenderTargetView(&self.resource, Some(&view_desc), handle);
        }
        rtvs.insert(subresource, slot);
        Ok(handle)
    }

    /// CPU depth-stencil view handle for one subresource, created on first use
    pub(crate) fn dsv_handle(&self, subresource: u32) -> RhiResult<D3D12_CPU_DESCRIPTOR_HANDLE> {
        if !self.desc.usage.contains(TextureUsage::DEPTH_STENCIL) {
            return Err(RhiError::InvalidDescriptor(
                "texture usage lacks DEPTH_STENCIL".into(),
            ));
        }
        let mut dsvs = self.dsvs.lock().unwrap();
        if let Some(&slot) = dsvs.get(&subresource) {
            return Ok(self.ctx.bindless.dsvs.cpu_handle(slot));
        }

        let (mip, layer) = self.subresource_location(subresource);
        let mut view_desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
            Format: format_to_dxgi(self.desc.format),
            Flags: D3D12_DSV_FLAG_NONE,
            ..Default::default()
        };
        if self.desc.sample_count > 1 {
            view_desc.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE2DMS;
        } else if self.desc.native_array_size() > 1 {
            view_desc.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE2DARRAY;
            view_desc.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_DSV {
                MipSlice: mip,
                FirstArraySlice: layer,
                ArraySize: 1,
            };
        } else {
            view_desc.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE2D;
            view_desc.Anonymous.Texture2D = D3D12_TEX2D_DSV { MipSlice: mip };
        }

        let slot = self.ctx.bindless.allocate_dsv()?;
        let handle = self.ctx.bindless.dsvs.cpu_handle(slot);
        unsafe {
            self.ctx
                .device
                .CreateDepthStencilView(&self.resource, Some(&view_desc), handle);
        }
        dsvs.insert(subresource, slot);
        Ok(handle)
    }
}

impl Texture for D3d12Texture {
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

impl Drop for D3d12Texture {
    fn drop(&mut self) {
        // Views drop first through their Arcs; the resource follows
        self.views.lock().unwrap().clear();
        for (_, slot) in self.rtvs.lock().unwrap().drain() {
            self.ctx.destroy.push(Zombie::RtvSlot(slot));
        }
        for (_, slot) in self.dsvs.lock().unwrap().drain() {
            self.ctx.destroy.push(Zombie::DsvSlot(slot));
        }
        if self.owns_resource {
            self.ctx.destroy.push(Zombie::Resource(self.resource.clone()));
        }
    }
}
