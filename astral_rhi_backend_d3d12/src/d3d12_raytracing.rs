//! D3D12 raytracing: acceleration structures and state objects
//!
//! Creation sizes and allocates the backing storage; the actual build is
//! recorded through `CommandRecorder::build_acceleration_structure`. The RT
//! pipeline is a state object assembled from one DXIL library per shader;
//! every library exports `main`, renamed to a unique export so the shader
//! binding table can address each record. The SBT lives in an upload buffer,
//! laid out raygen / miss / hit with the DXR record and table alignments.

use std::sync::Arc;

use windows::core::{w, Interface, PCWSTR};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R32_UINT, DXGI_FORMAT_UNKNOWN};

use astral_rhi::{
    rhi_err, AccelerationStructure, AccelerationStructureDesc, BindlessIndex, Buffer, BufferDesc,
    BufferResidency, BufferUsage, DescriptorKind, PipelineBindPoint, PipelineState,
    RaytracingPipelineDesc, RhiError, RhiResult,
};

use crate::d3d12_buffer::D3d12Buffer;
use crate::d3d12_context::GpuContext;
use crate::d3d12_convert::{align_up, format_to_dxgi};
use crate::d3d12_destroy::Zombie;
use crate::d3d12_shader::D3d12Shader;

/// TLAS instance record, laid out as DXR expects
#[repr(C)]
struct InstanceRecord {
    transform: [f32; 12],
    /// InstanceID in the low 24 bits, InstanceMask in the high 8
    id_and_mask: u32,
    /// Hit-group offset in the low 24 bits, flags in the high 8
    sbt_offset_and_flags: u32,
    acceleration_structure: u64,
}

/// D3D12 acceleration structure with its backing and scratch buffers
pub struct D3d12AccelerationStructure {
    /// Backing storage; its GPU address is the structure handle
    backing: D3d12Buffer,
    /// Scratch buffer sized for the initial build
    scratch: D3d12Buffer,
    desc: AccelerationStructureDesc,
    /// TLAS instance buffer, written at creation
    instance_buffer: Option<D3d12Buffer>,
    bindless: BindlessIndex,
    top_level: bool,
    ctx: Arc<GpuContext>,
}

impl D3d12AccelerationStructure {
    pub fn new(ctx: Arc<GpuContext>, desc: AccelerationStructureDesc) -> RhiResult<Arc<Self>> {
        if !ctx.raytracing {
            return Err(RhiError::InvalidDescriptor(
                "device does not support raytracing".to_string(),
            ));
        }

        let top_level = matches!(desc, AccelerationStructureDesc::Top { .. });
        let debug_name = match &desc {
            AccelerationStructureDesc::Bottom { debug_name, .. } => debug_name.clone(),
            AccelerationStructureDesc::Top { debug_name, .. } => debug_name.clone(),
        };

        // TLAS builds consume a device-visible array of instance records
        let instance_buffer = if let AccelerationStructureDesc::Top { instances, .. } = &desc {
            if instances.is_empty() {
                return Err(RhiError::InvalidDescriptor(
                    "top-level structure needs at least one instance".to_string(),
                ));
            }
            let mut records: Vec<InstanceRecord> = Vec::with_capacity(instances.len());
            for instance in instances {
                let blas = instance
                    .blas
                    .as_any()
                    .downcast_ref::<D3d12AccelerationStructure>()
                    .ok_or_else(|| rhi_err!("Foreign BLAS handle in TLAS instance"))?;
                let mut transform = [0.0f32; 12];
                for (row, cols) in instance.transform.iter().enumerate() {
                    transform[row * 4..row * 4 + 4].copy_from_slice(cols);
                }
                records.push(InstanceRecord {
                    transform,
                    id_and_mask: (instance.instance_id & 0x00ff_ffff)
                        | ((instance.mask as u32) << 24),
                    sbt_offset_and_flags: instance.hit_group_offset & 0x00ff_ffff,
                    acceleration_structure: blas.gpu_address(),
                });
            }
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    records.as_ptr() as *const u8,
                    std::mem::size_of_val(records.as_slice()),
                )
            };
            let buffer = D3d12Buffer::new(
                ctx.clone(),
                BufferDesc {
                    size: bytes.len() as u64,
                    usage: BufferUsage::empty(),
                    residency: BufferResidency::Upload,
                    debug_name: Some("tlas instances".to_string()),
                    ..Default::default()
                },
            )?;
            buffer.update(0, bytes)?;
            Some(buffer)
        } else {
            None
        };

        // Size the build without recording it
        let mut prebuild = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_PREBUILD_INFO::default();
        {
            let geometries = Self::geometry_descs(&desc)?;
            let inputs = Self::build_inputs(&desc, &geometries, instance_buffer.as_ref());
            unsafe {
                ctx.device
                    .GetRaytracingAccelerationStructurePrebuildInfo(&inputs, &mut prebuild);
            }
        }

        let backing = D3d12Buffer::new(
            ctx.clone(),
            BufferDesc {
                size: prebuild.ResultDataMaxSizeInBytes,
                usage: BufferUsage::ACCELERATION_STRUCTURE_STORAGE,
                residency: BufferResidency::DeviceLocal,
                debug_name: debug_name.clone(),
                ..Default::default()
            },
        )?;
        let scratch = D3d12Buffer::new(
            ctx.clone(),
            BufferDesc {
                size: prebuild.ScratchDataSizeInBytes.max(1),
                usage: BufferUsage::ACCELERATION_STRUCTURE_STORAGE,
                residency: BufferResidency::DeviceLocal,
                debug_name: Some("as scratch".to_string()),
                ..Default::default()
            },
        )?;

        let bindless = ctx.bindless.allocate(DescriptorKind::AccelerationStructure)?;
        let view_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: DXGI_FORMAT_UNKNOWN,
            ViewDimension: D3D12_SRV_DIMENSION_RAYTRACINGACCELERATIONSTRUCTURE,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                RaytracingAccelerationStructure: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_SRV {
                    Location: backing.gpu_address(),
                },
            },
        };
        unsafe {
            // Acceleration-structure views carry the address in the desc
            ctx.device.CreateShaderResourceView(
                None,
                Some(&view_desc),
                ctx.bindless.resource_cpu(bindless),
            );
        }

        Ok(Arc::new(Self {
            backing,
            scratch,
            desc,
            instance_buffer,
            bindless,
            top_level,
            ctx,
        }))
    }

    /// GPU address of the structure, used by TLAS instances and binding
    pub(crate) fn gpu_address(&self) -> u64 {
        self.backing.gpu_address()
    }

    fn geometry_descs(
        desc: &AccelerationStructureDesc,
    ) -> RhiResult<Vec<D3D12_RAYTRACING_GEOMETRY_DESC>> {
        let AccelerationStructureDesc::Bottom { geometry, .. } = desc else {
            return Ok(Vec::new());
        };
        let mut descs = Vec::with_capacity(geometry.len());
        for geo in geometry {
            let vertex_buffer = geo
                .vertex_buffer
                .as_any()
                .downcast_ref::<D3d12Buffer>()
                .ok_or_else(|| rhi_err!("Foreign vertex buffer in BLAS geometry"))?;
            let mut triangles = D3D12_RAYTRACING_GEOMETRY_TRIANGLES_DESC {
                Transform3x4: 0,
                IndexFormat: DXGI_FORMAT_UNKNOWN,
                VertexFormat: format_to_dxgi(geo.vertex_format),
                IndexCount: 0,
                VertexCount: geo.vertex_count,
                IndexBuffer: 0,
                VertexBuffer: D3D12_GPU_VIRTUAL_ADDRESS_AND_STRIDE {
                    StartAddress: vertex_buffer.gpu_address() + geo.vertex_offset,
                    StrideInBytes: geo.vertex_stride as u64,
                },
            };
            if let Some(index_handle) = &geo.index_buffer {
                let index_buffer = index_handle
                    .as_any()
                    .downcast_ref::<D3d12Buffer>()
                    .ok_or_else(|| rhi_err!("Foreign index buffer in BLAS geometry"))?;
                triangles.IndexFormat = DXGI_FORMAT_R32_UINT;
                triangles.IndexCount = geo.index_count;
                triangles.IndexBuffer = index_buffer.gpu_address() + geo.index_offset;
            }
            descs.push(D3D12_RAYTRACING_GEOMETRY_DESC {
                Type: D3D12_RAYTRACING_GEOMETRY_TYPE_TRIANGLES,
                Flags: if geo.opaque {
                    D3D12_RAYTRACING_GEOMETRY_FLAG_OPAQUE
                } else {
                    D3D12_RAYTRACING_GEOMETRY_FLAG_NONE
                },
                Anonymous: D3D12_RAYTRACING_GEOMETRY_DESC_0 {
                    Triangles: triangles,
                },
            });
        }
        Ok(descs)
    }

    /// Build inputs referencing `geometries` (BLAS) or the instance buffer
    /// (TLAS); `geometries` must outlive the returned value
    fn build_inputs(
        desc: &AccelerationStructureDesc,
        geometries: &[D3D12_RAYTRACING_GEOMETRY_DESC],
        instance_buffer: Option<&D3d12Buffer>,
    ) -> D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
        match desc {
            AccelerationStructureDesc::Bottom { .. } => {
                D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
                    Type: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_BOTTOM_LEVEL,
                    Flags: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PREFER_FAST_TRACE,
                    NumDescs: geometries.len() as u32,
                    DescsLayout: D3D12_ELEMENTS_LAYOUT_ARRAY,
                    Anonymous: D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                        pGeometryDescs: geometries.as_ptr(),
                    },
                }
            }
            AccelerationStructureDesc::Top { instances, .. } => {
                D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
                    Type: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_TOP_LEVEL,
                    Flags: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PREFER_FAST_TRACE,
                    NumDescs: instances.len() as u32,
                    DescsLayout: D3D12_ELEMENTS_LAYOUT_ARRAY,
                    Anonymous: D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                        InstanceDescs: instance_buffer.map(|b| b.gpu_address()).unwrap_or(0),
                    },
                }
            }
        }
    }

    /// Record the build into `list`. Called by the command recorder.
    pub(crate) fn record_build(&self, list: &ID3D12GraphicsCommandList7) -> RhiResult<()> {
        let geometries = Self::geometry_descs(&self.desc)?;
        let inputs = Self::build_inputs(&self.desc, &geometries, self.instance_buffer.as_ref());
        let build_desc = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_DESC {
            DestAccelerationStructureData: self.backing.gpu_address(),
            Inputs: inputs,
            SourceAccelerationStructureData: 0,
            ScratchAccelerationStructureData: self.scratch.gpu_address(),
        };
        unsafe {
            list.BuildRaytracingAccelerationStructure(&build_desc, None);
        }
        Ok(())
    }
}

impl AccelerationStructure for D3d12AccelerationStructure {
    fn bindless(&self) -> BindlessIndex {
        self.bindless
    }

    fn is_top_level(&self) -> bool {
        self.top_level
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for D3d12AccelerationStructure {
    fn drop(&mut self) {
        let frame = self.ctx.current_frame();
        self.ctx
            .bindless
            .free(DescriptorKind::AccelerationStructure, self.bindless, frame);
        // Backing, scratch and instance buffers queue themselves
    }
}

// ============================================================================
// Raytracing state object + shader binding table
// ============================================================================

/// Compiled raytracing state object with its shader binding table regions
pub struct D3d12RaytracingPipeline {
    key: u64,
    pub(crate) state_object: ID3D12StateObject,
    /// SBT backing storage; address ranges point into it
    _sbt: D3d12Buffer,
    pub(crate) raygen_record: D3D12_GPU_VIRTUAL_ADDRESS_RANGE,
    pub(crate) miss_table: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE,
    pub(crate) hit_table: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE,
    ctx: Arc<GpuContext>,
}

fn wide(name: &str) -> Vec<u16> {
    name.encode_utf16().chain(Some(0)).collect()
}

fn dxil(shader: &astral_rhi::ShaderHandle) -> D3D12_SHADER_BYTECODE {
    shader
        .as_any()
        .downcast_ref::<D3d12Shader>()
        .map(|s| s.dxil())
        .unwrap_or_default()
}

impl D3d12RaytracingPipeline {
    pub fn new(ctx: Arc<GpuContext>, desc: &RaytracingPipelineDesc) -> RhiResult<Self> {
        if !ctx.raytracing {
            return Err(RhiError::InvalidDescriptor(
                "device does not support raytracing".to_string(),
            ));
        }

        // Shader order: raygen, misses, then hit-group shaders. Every blob
        // exports `main`; each library renames it to a unique export.
        let mut shaders: Vec<&astral_rhi::ShaderHandle> = vec![&desc.ray_generation];
        let mut export_names: Vec<Vec<u16>> = vec![wide("raygen")];
        for (i, miss) in desc.miss_shaders.iter().enumerate() {
            shaders.push(miss);
            export_names.push(wide(&format!("miss_{}", i)));
        }
        // (hit-group shader index, export name index) per stage kind
        let mut hit_exports: Vec<(Option<usize>, Option<usize>, Option<usize>)> = Vec::new();
        for (i, group) in desc.hit_groups.iter().enumerate() {
            let mut push = |shader: &Option<astral_rhi::ShaderHandle>, prefix: &str| {
                shader.as_ref().map(|handle| {
                    // Borrow of `shaders` is rebuilt below; collect indices
                    let _ = handle;
                    export_names.push(wide(&format!("{}_{}", prefix, i)));
                    export_names.len() - 1
                })
            };
            let closest = push(&group.closest_hit, "chit");
            let any = push(&group.any_hit, "ahit");
            let intersection = push(&group.intersection, "isect");
            hit_exports.push((closest, any, intersection));
        }
        for group in &desc.hit_groups {
            for shader in [&group.closest_hit, &group.any_hit, &group.intersection] {
                if let Some(handle) = shader {
                    shaders.push(handle);
                }
            }
        }
        let group_names: Vec<Vec<u16>> =
            desc.hit_groups.iter().map(|g| wide(&g.name)).collect();

        // Exact capacities: pointers into these must stay stable
        let shader_count = shaders.len();
        let mut exports: Vec<D3D12_EXPORT_DESC> = Vec::with_capacity(shader_count);
        let mut libraries: Vec<D3D12_DXIL_LIBRARY_DESC> = Vec::with_capacity(shader_count);
        for (shader, name) in shaders.iter().zip(&export_names) {
            exports.push(D3D12_EXPORT_DESC {
                Name: PCWSTR(name.as_ptr()),
                ExportToRename: w!("main"),
                Flags: D3D12_EXPORT_FLAG_NONE,
            });
            libraries.push(D3D12_DXIL_LIBRARY_DESC {
                DXILLibrary: dxil(shader),
                NumExports: 1,
                pExports: &exports[exports.len() - 1] as *const _ as *mut _,
            });
        }

        let name_or_null = |index: Option<usize>| {
            index
                .map(|i| PCWSTR(export_names[i].as_ptr()))
                .unwrap_or(PCWSTR::null())
        };
        let hit_group_descs: Vec<D3D12_HIT_GROUP_DESC> = desc
            .hit_groups
            .iter()
            .zip(&hit_exports)
            .zip(&group_names)
            .map(|((group, &(closest, any, intersection)), name)| D3D12_HIT_GROUP_DESC {
                HitGroupExport: PCWSTR(name.as_ptr()),
                Type: if group.intersection.is_some() {
                    D3D12_HIT_GROUP_TYPE_PROCEDURAL_PRIMITIVE
                } else {
                    D3D12_HIT_GROUP_TYPE_TRIANGLES
                },
                AnyHitShaderImport: name_or_null(any),
                ClosestHitShaderImport: name_or_null(closest),
                IntersectionShaderImport: name_or_null(intersection),
            })
            .collect();

        let shader_config = D3D12_RAYTRACING_SHADER_CONFIG {
            MaxPayloadSizeInBytes: desc.max_payload_size,
            MaxAttributeSizeInBytes: desc.max_attribute_size,
        };
        let pipeline_config = D3D12_RAYTRACING_PIPELINE_CONFIG {
            MaxTraceRecursionDepth: desc.max_recursion_depth,
        };
        let global_root_signature = D3D12_GLOBAL_ROOT_SIGNATURE {
            pGlobalRootSignature: unsafe {
                std::mem::transmute_copy(ctx.bindless.root_signature())
            },
        };

        let mut subobjects: Vec<D3D12_STATE_SUBOBJECT> =
            Vec::with_capacity(libraries.len() + hit_group_descs.len() + 3);
        for library in &libraries {
            subobjects.push(D3D12_STATE_SUBOBJECT {
                Type: D3D12_STATE_SUBOBJECT_TYPE_DXIL_LIBRARY,
                pDesc: library as *const _ as *const std::ffi::c_void,
            });
        }
        for group in &hit_group_descs {
            subobjects.push(D3D12_STATE_SUBOBJECT {
                Type: D3D12_STATE_SUBOBJECT_TYPE_HIT_GROUP,
                pDesc: group as *const _ as *const std::ffi::c_void,
            });
        }
        subobjects.push(D3D12_STATE_SUBOBJECT {
            Type: D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_SHADER_CONFIG,
            pDesc: &shader_config as *const _ as *const std::ffi::c_void,
        });
        subobjects.push(D3D12_STATE_SUBOBJECT {
            Type: D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_PIPELINE_CONFIG,
            pDesc: &pipeline_config as *const _ as *const std::ffi::c_void,
        });
        subobjects.push(D3D12_STATE_SUBOBJECT {
            Type: D3D12_STATE_SUBOBJECT_TYPE_GLOBAL_ROOT_SIGNATURE,
            pDesc: &global_root_signature as *const _ as *const std::ffi::c_void,
        });

        let state_desc = D3D12_STATE_OBJECT_DESC {
            Type: D3D12_STATE_OBJECT_TYPE_RAYTRACING_PIPELINE,
            NumSubobjects: subobjects.len() as u32,
            pSubobjects: subobjects.as_ptr(),
        };

        let state_object: ID3D12StateObject = unsafe {
            ctx.device
                .CreateStateObject(&state_desc)
                .map_err(|e| rhi_err!("Failed to create raytracing state object: {:?}", e))?
        };
        ctx.set_object_name(&state_object, desc.debug_name.as_deref());

        // Shader binding table: one aligned record per export, tables in
        // raygen / miss / hit order
        let properties: ID3D12StateObjectProperties = state_object
            .cast()
            .map_err(|e| rhi_err!("State object exposes no properties: {:?}", e))?;
        let identifier = |name: &[u16]| -> RhiResult<[u8; 32]> {
            let ptr = unsafe { properties.GetShaderIdentifier(PCWSTR(name.as_ptr())) };
            if ptr.is_null() {
                return Err(rhi_err!("Missing shader identifier in state object"));
            }
            let mut bytes = [0u8; D3D12_SHADER_IDENTIFIER_SIZE_IN_BYTES as usize];
            unsafe {
                std::ptr::copy_nonoverlapping(ptr as *const u8, bytes.as_mut_ptr(), bytes.len());
            }
            Ok(bytes)
        };

        let record_stride = align_up(
            D3D12_SHADER_IDENTIFIER_SIZE_IN_BYTES as u64,
            D3D12_RAYTRACING_SHADER_RECORD_BYTE_ALIGNMENT as u64,
        );
        let table_alignment = D3D12_RAYTRACING_SHADER_TABLE_BYTE_ALIGNMENT as u64;
        let miss_count = desc.miss_shaders.len() as u64;
        let hit_count = desc.hit_groups.len() as u64;

        let raygen_size = align_up(record_stride, table_alignment);
        let miss_size = align_up(miss_count * record_stride, table_alignment);
        let hit_size = align_up(hit_count * record_stride, table_alignment);
        let sbt_size = raygen_size + miss_size + hit_size;

        let mut staged = vec![0u8; sbt_size as usize];
        staged[..32].copy_from_slice(&identifier(&export_names[0])?);
        for i in 0..miss_count {
            let offset = (raygen_size + i * record_stride) as usize;
            staged[offset..offset + 32]
                .copy_from_slice(&identifier(&export_names[1 + i as usize])?);
        }
        for (i, name) in group_names.iter().enumerate() {
            let offset = (raygen_size + miss_size + i as u64 * record_stride) as usize;
            staged[offset..offset + 32].copy_from_slice(&identifier(name)?);
        }

        let sbt = D3d12Buffer::new(
            ctx.clone(),
            BufferDesc {
                size: sbt_size,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Upload,
                debug_name: Some("shader binding table".to_string()),
                ..Default::default()
            },
        )?;
        sbt.update(0, &staged)?;

        let base = sbt.gpu_address();
        let raygen_record = D3D12_GPU_VIRTUAL_ADDRESS_RANGE {
            StartAddress: base,
            SizeInBytes: raygen_size,
        };
        let miss_table = D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
            StartAddress: base + raygen_size,
            SizeInBytes: miss_size,
            StrideInBytes: record_stride,
        };
        let hit_table = D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
            StartAddress: base + raygen_size + miss_size,
            SizeInBytes: hit_size,
            StrideInBytes: record_stride,
        };

        Ok(Self {
            key: desc.cache_key(),
            state_object,
            _sbt: sbt,
            raygen_record,
            miss_table,
            hit_table,
            ctx,
        })
    }
}

impl PipelineState for D3d12RaytracingPipeline {
    fn cache_key(&self) -> u64 {
        self.key
    }

    fn bind_point(&self) -> PipelineBindPoint {
        PipelineBindPoint::Raytracing
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for D3d12RaytracingPipeline {
    fn drop(&mut self) {
        self.ctx
            .destroy
            .push(Zombie::StateObject(self.state_object.clone()));
    }
}
