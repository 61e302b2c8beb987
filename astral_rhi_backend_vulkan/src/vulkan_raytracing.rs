//! Vulkan raytracing: acceleration structures and RT pipelines
//!
//! Creation sizes and allocates the backing storage; the actual build is
//! recorded through `CommandRecorder::build_acceleration_structure`. The RT
//! pipeline owns its shader binding table, laid out raygen / miss / hit with
//! the alignments reported by the driver.

use std::sync::Arc;

use ash::vk;

use astral_rhi::{
    rhi_err, AccelerationStructure, AccelerationStructureDesc, BindlessIndex, Buffer, BufferDesc,
    BufferResidency, BufferUsage, DescriptorKind, IndexFormat, PipelineBindPoint, PipelineState,
    RaytracingPipelineDesc, RhiError, RhiResult, Shader, ShaderStage,
};

use crate::vulkan_buffer::VulkanBuffer;
use crate::vulkan_context::GpuContext;
use crate::vulkan_convert::{format_to_vk, index_format_to_vk, shader_stage_to_vk};
use crate::vulkan_destroy::Zombie;
use crate::vulkan_shader::VulkanShader;

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Vulkan acceleration structure with its backing and scratch buffers
pub struct VulkanAccelerationStructure {
    pub(crate) accel: vk::AccelerationStructureKHR,
    /// Backing storage; kept alive for the structure's lifetime
    _backing: VulkanBuffer,
    /// Scratch buffer sized for the initial build
    scratch: VulkanBuffer,
    desc: AccelerationStructureDesc,
    /// TLAS instance buffer, written at creation
    instance_buffer: Option<VulkanBuffer>,
    bindless: BindlessIndex,
    top_level: bool,
    ctx: Arc<GpuContext>,
}

impl VulkanAccelerationStructure {
    pub fn new(ctx: Arc<GpuContext>, desc: AccelerationStructureDesc) -> RhiResult<Arc<Self>> {
        let loader = ctx
            .acceleration_loader
            .clone()
            .ok_or(RhiError::InvalidDescriptor(
                "device does not support raytracing".to_string(),
            ))?;

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
            let mut records: Vec<vk::AccelerationStructureInstanceKHR> = Vec::new();
            for instance in instances {
                let blas = instance
                    .blas
                    .as_any()
                    .downcast_ref::<VulkanAccelerationStructure>()
                    .ok_or_else(|| rhi_err!("Foreign BLAS handle in TLAS instance"))?;
                let blas_address = unsafe {
                    loader.get_acceleration_structure_device_address(
                        &vk::AccelerationStructureDeviceAddressInfoKHR::default()
                            .acceleration_structure(blas.accel),
                    )
                };
                let mut matrix = [0.0f32; 12];
                for (row, cols) in instance.transform.iter().enumerate() {
                    matrix[row * 4..row * 4 + 4].copy_from_slice(cols);
                }
                records.push(vk::AccelerationStructureInstanceKHR {
                    transform: vk::TransformMatrixKHR { matrix },
                    instance_custom_index_and_mask: vk::Packed24_8::new(
                        instance.instance_id,
                        instance.mask,
                    ),
                    instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                        instance.hit_group_offset,
                        0,
                    ),
                    acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                        device_handle: blas_address,
                    },
                });
            }
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    records.as_ptr() as *const u8,
                    std::mem::size_of_val(records.as_slice()),
                )
            };
            let buffer = VulkanBuffer::new(
                ctx.clone(),
                BufferDesc {
                    size: bytes.len() as u64,
                    usage: BufferUsage::ACCELERATION_STRUCTURE_STORAGE,
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
        let sizes = Self::query_sizes(&loader, &desc, instance_buffer.as_ref())?;

        let backing = VulkanBuffer::new(
            ctx.clone(),
            BufferDesc {
                size: sizes.acceleration_structure_size,
                usage: BufferUsage::ACCELERATION_STRUCTURE_STORAGE,
                residency: BufferResidency::DeviceLocal,
                debug_name: debug_name.clone(),
                ..Default::default()
            },
        )?;
        let scratch = VulkanBuffer::new(
            ctx.clone(),
            BufferDesc {
                size: sizes.build_scratch_size.max(1),
                usage: BufferUsage::ACCELERATION_STRUCTURE_STORAGE,
                residency: BufferResidency::DeviceLocal,
                debug_name: Some("as scratch".to_string()),
                ..Default::default()
            },
        )?;

        let ty = if top_level {
            vk::AccelerationStructureTypeKHR::TOP_LEVEL
        } else {
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL
        };
        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(backing.buffer)
            .size(sizes.acceleration_structure_size)
            .ty(ty);
        let accel = unsafe {
            loader
                .create_acceleration_structure(&create_info, None)
                .map_err(|e| rhi_err!("Failed to create acceleration structure: {:?}", e))?
        };

        let bindless = ctx.bindless.allocate(DescriptorKind::AccelerationStructure)?;
        ctx.bindless
            .write_acceleration_structure(&ctx.device, bindless, &accel);

        Ok(Arc::new(Self {
            accel,
            _backing: backing,
            scratch,
            desc,
            instance_buffer,
            bindless,
            top_level,
            ctx,
        }))
    }

    /// Geometry list and primitive counts for sizing or building
    fn geometries(
        desc: &AccelerationStructureDesc,
        instance_buffer: Option<&VulkanBuffer>,
    ) -> RhiResult<(Vec<vk::AccelerationStructureGeometryKHR<'static>>, Vec<u32>)> {
        match desc {
            AccelerationStructureDesc::Bottom { geometry, .. } => {
                let mut geometries = Vec::new();
                let mut counts = Vec::new();
                for geo in geometry {
                    let vertex_buffer = geo
                        .vertex_buffer
                        .as_any()
                        .downcast_ref::<VulkanBuffer>()
                        .ok_or_else(|| rhi_err!("Foreign vertex buffer in BLAS geometry"))?;
                    let mut triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                        .vertex_format(format_to_vk(geo.vertex_format))
                        .vertex_data(vk::DeviceOrHostAddressConstKHR {
                            device_address: vertex_buffer.device_address() + geo.vertex_offset,
                        })
                        .vertex_stride(geo.vertex_stride as u64)
                        .max_vertex(geo.vertex_count.saturating_sub(1));
                    let primitive_count = if let Some(index_handle) = &geo.index_buffer {
                        let index_buffer = index_handle
                            .as_any()
                            .downcast_ref::<VulkanBuffer>()
                            .ok_or_else(|| rhi_err!("Foreign index buffer in BLAS geometry"))?;
                        triangles = triangles
                            .index_type(index_format_to_vk(IndexFormat::Uint32))
                            .index_data(vk::DeviceOrHostAddressConstKHR {
                                device_address: index_buffer.device_address() + geo.index_offset,
                            });
                        geo.index_count / 3
                    } else {
                        geo.vertex_count / 3
                    };
                    let flags = if geo.opaque {
                        vk::GeometryFlagsKHR::OPAQUE
                    } else {
                        vk::GeometryFlagsKHR::empty()
                    };
                    geometries.push(
                        vk::AccelerationStructureGeometryKHR::default()
                            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
                            .flags(flags),
                    );
                    counts.push(primitive_count);
                }
                Ok((geometries, counts))
            }
            AccelerationStructureDesc::Top { instances, .. } => {
                let buffer = instance_buffer
                    .ok_or_else(|| rhi_err!("TLAS geometry requested without instance buffer"))?;
                let data = vk::AccelerationStructureGeometryInstancesDataKHR::default().data(
                    vk::DeviceOrHostAddressConstKHR {
                        device_address: buffer.device_address(),
                    },
                );
                let geometry = vk::AccelerationStructureGeometryKHR::default()
                    .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                    .geometry(vk::AccelerationStructureGeometryDataKHR { instances: data });
                Ok((vec![geometry], vec![instances.len() as u32]))
            }
        }
    }

    fn query_sizes(
        loader: &ash::khr::acceleration_structure::Device,
        desc: &AccelerationStructureDesc,
        instance_buffer: Option<&VulkanBuffer>,
    ) -> RhiResult<vk::AccelerationStructureBuildSizesInfoKHR<'static>> {
        let (geometries, counts) = Self::geometries(desc, instance_buffer)?;
        let ty = match desc {
            AccelerationStructureDesc::Bottom { .. } => {
                vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL
            }
            AccelerationStructureDesc::Top { .. } => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        };
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(ty)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);
        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &counts,
                &mut sizes,
            );
        }
        Ok(sizes)
    }

    /// Record the build into `cmd`. Called by the command recorder.
    pub(crate) fn record_build(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let loader = self
            .ctx
            .acceleration_loader
            .as_ref()
            .ok_or_else(|| rhi_err!("Raytracing loader missing at build time"))?;
        let (geometries, counts) = Self::geometries(&self.desc, self.instance_buffer.as_ref())?;
        let ty = if self.top_level {
            vk::AccelerationStructureTypeKHR::TOP_LEVEL
        } else {
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL
        };
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(ty)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .dst_acceleration_structure(self.accel)
            .geometries(&geometries)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: self.scratch.device_address(),
            });
        let ranges: Vec<vk::AccelerationStructureBuildRangeInfoKHR> = counts
            .iter()
            .map(|count| {
                vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(*count)
            })
            .collect();
        unsafe {
            loader.cmd_build_acceleration_structures(cmd, &[build_info], &[&ranges]);
        }
        Ok(())
    }
}

impl AccelerationStructure for VulkanAccelerationStructure {
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

impl Drop for VulkanAccelerationStructure {
    fn drop(&mut self) {
        let frame = self.ctx.current_frame();
        self.ctx
            .bindless
            .free(DescriptorKind::AccelerationStructure, self.bindless, frame);
        self.ctx
            .destroy
            .push(Zombie::AccelerationStructure(self.accel));
    }
}

// ============================================================================
// Raytracing pipeline + shader binding table
// ============================================================================

/// Compiled raytracing pipeline with its shader binding table regions
pub struct VulkanRaytracingPipeline {
    key: u64,
    pub(crate) pipeline: vk::Pipeline,
    /// SBT backing storage; address regions point into it
    _sbt: VulkanBuffer,
    pub(crate) raygen_region: vk::StridedDeviceAddressRegionKHR,
    pub(crate) miss_region: vk::StridedDeviceAddressRegionKHR,
    pub(crate) hit_region: vk::StridedDeviceAddressRegionKHR,
    pub(crate) callable_region: vk::StridedDeviceAddressRegionKHR,
    ctx: Arc<GpuContext>,
}

impl VulkanRaytracingPipeline {
    pub fn new(ctx: Arc<GpuContext>, desc: &RaytracingPipelineDesc) -> RhiResult<Self> {
        let loader = ctx
            .raytracing_loader
            .clone()
            .ok_or(RhiError::InvalidDescriptor(
                "device does not support raytracing".to_string(),
            ))?;
        let limits = ctx
            .rt_limits
            .ok_or_else(|| rhi_err!("Raytracing limits missing"))?;

        let module = |shader: &astral_rhi::ShaderHandle| {
            shader
                .as_any()
                .downcast_ref::<VulkanShader>()
                .map(|s| s.module)
                .unwrap_or(vk::ShaderModule::null())
        };

        // Stage order: raygen, misses, then hit-group shaders
        let mut stages: Vec<vk::PipelineShaderStageCreateInfo> = Vec::new();
        let mut groups: Vec<vk::RayTracingShaderGroupCreateInfoKHR> = Vec::new();

        let mut push_stage = |handle: &astral_rhi::ShaderHandle, stage: ShaderStage| -> u32 {
            let index = stages.len() as u32;
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(shader_stage_to_vk(stage))
                    .module(module(handle))
                    .name(c"main"),
            );
            index
        };

        let raygen_index = push_stage(&desc.ray_generation, ShaderStage::RayGeneration);
        groups.push(
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(raygen_index)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
        );

        for miss in &desc.miss_shaders {
            let index = push_stage(miss, ShaderStage::Miss);
            groups.push(
                vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                    .general_shader(index)
                    .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                    .any_hit_shader(vk::SHADER_UNUSED_KHR)
                    .intersection_shader(vk::SHADER_UNUSED_KHR),
            );
        }

        for group in &desc.hit_groups {
            let closest = group
                .closest_hit
                .as_ref()
                .map(|s| push_stage(s, ShaderStage::ClosestHit))
                .unwrap_or(vk::SHADER_UNUSED_KHR);
            let any = group
                .any_hit
                .as_ref()
                .map(|s| push_stage(s, ShaderStage::AnyHit))
                .unwrap_or(vk::SHADER_UNUSED_KHR);
            let intersection = group
                .intersection
                .as_ref()
                .map(|s| push_stage(s, ShaderStage::Intersection))
                .unwrap_or(vk::SHADER_UNUSED_KHR);
            let ty = if group.intersection.is_some() {
                vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP
            } else {
                vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP
            };
            groups.push(
                vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .ty(ty)
                    .general_shader(vk::SHADER_UNUSED_KHR)
                    .closest_hit_shader(closest)
                    .any_hit_shader(any)
                    .intersection_shader(intersection),
            );
        }

        let create_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(desc.max_recursion_depth)
            .layout(ctx.bindless.pipeline_layout());

        let pipeline = unsafe {
            loader
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    &[create_info],
                    None,
                )
                .map_err(|e| rhi_err!("Failed to create raytracing pipeline: {:?}", e.1))?[0]
        };
        ctx.set_object_name(pipeline, desc.debug_name.as_deref());

        // Shader binding table: one aligned record per group, regions in
        // raygen / miss / hit order
        let group_count = groups.len() as u32;
        let handle_size = limits.handle_size as u64;
        let record_stride = align_up(handle_size, limits.handle_alignment as u64);
        let miss_count = desc.miss_shaders.len() as u64;
        let hit_count = desc.hit_groups.len() as u64;

        let raygen_size = align_up(record_stride, limits.base_alignment as u64);
        let miss_size = align_up(miss_count * record_stride, limits.base_alignment as u64);
        let hit_size = align_up(hit_count * record_stride, limits.base_alignment as u64);
        let sbt_size = raygen_size + miss_size + hit_size;

        let handles = unsafe {
            loader
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    group_count,
                    (group_count as u64 * handle_size) as usize,
                )
                .map_err(|e| rhi_err!("Failed to read shader group handles: {:?}", e))?
        };

        let sbt = VulkanBuffer::new(
            ctx.clone(),
            BufferDesc {
                size: sbt_size,
                usage: BufferUsage::ACCELERATION_STRUCTURE_STORAGE,
                residency: BufferResidency::Upload,
                debug_name: Some("shader binding table".to_string()),
                ..Default::default()
            },
        )?;

        let mut staged = vec![0u8; sbt_size as usize];
        let mut copy_handle = |group: u64, dst_offset: u64| {
            let src = &handles[(group * handle_size) as usize..][..handle_size as usize];
            staged[dst_offset as usize..][..handle_size as usize].copy_from_slice(src);
        };
        copy_handle(0, 0);
        for i in 0..miss_count {
            copy_handle(1 + i, raygen_size + i * record_stride);
        }
        for i in 0..hit_count {
            copy_handle(1 + miss_count + i, raygen_size + miss_size + i * record_stride);
        }
        sbt.update(0, &staged)?;

        let base = sbt.device_address();
        let raygen_region = vk::StridedDeviceAddressRegionKHR {
            device_address: base,
            stride: raygen_size,
            size: raygen_size,
        };
        let miss_region = vk::StridedDeviceAddressRegionKHR {
            device_address: base + raygen_size,
            stride: record_stride,
            size: miss_size,
        };
        let hit_region = vk::StridedDeviceAddressRegionKHR {
            device_address: base + raygen_size + miss_size,
            stride: record_stride,
            size: hit_size,
        };

        Ok(Self {
            key: desc.cache_key(),
            pipeline,
            _sbt: sbt,
            raygen_region,
            miss_region,
            hit_region,
            callable_region: vk::StridedDeviceAddressRegionKHR::default(),
            ctx,
        })
    }
}

impl PipelineState for VulkanRaytracingPipeline {
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

impl Drop for VulkanRaytracingPipeline {
    fn drop(&mut self) {
        self.ctx.destroy.push(Zombie::Pipeline(self.pipeline));
    }
}
