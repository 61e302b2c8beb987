//! Bindless descriptor tables and the per-draw binding set
//!
//! The bindless arrays live in descriptor sets 1..N, one unbounded array per
//! [`DescriptorKind`] at binding 0, bound once per command list. Resources
//! allocate a slot from the matching [`BindlessAllocator`] at creation time
//! and write their descriptor into the array; shaders index the arrays with
//! the 32-bit slot carried in push constants or vertex data.
//!
//! Set 0 is reserved for per-draw bindings. HLSL `b/t/u/s` registers fold
//! into its single binding space with the fixed shifts `BINDING_SHIFT_B/T/U/S`
//! (+0/+1000/+2000/+3000); shader bytecode must be produced with matching
//! shifts. The legacy slot binds on the command recorder write into a fresh
//! set allocated from a per-frame pool, reset when the frame slot recycles.

use std::sync::Mutex;

use ash::vk;

use astral_rhi::{rhi_err, BindlessAllocator, BindlessIndex, DescriptorKind, RhiError, RhiResult};
use astral_rhi::{
    BINDING_SHIFT_B, BINDING_SHIFT_S, BINDING_SHIFT_T, BINDING_SHIFT_U, MAX_FRAMES_IN_FLIGHT,
    PER_DRAW_SLOT_CAPACITY, PUSH_CONSTANT_CAPACITY,
};

/// Per-draw sets one frame slot can hand out before its pool is exhausted
const DRAW_SETS_PER_FRAME: u32 = 1024;

/// HLSL register classes of the per-draw binding convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    Sampler,
}

/// Binding number a register `slot` of `class` occupies in the per-draw set
pub fn draw_binding(class: RegisterClass, slot: u32) -> u32 {
    let shift = match class {
        RegisterClass::ConstantBuffer => BINDING_SHIFT_B,
        RegisterClass::ShaderResource => BINDING_SHIFT_T,
        RegisterClass::UnorderedAccess => BINDING_SHIFT_U,
        RegisterClass::Sampler => BINDING_SHIFT_S,
    };
    shift + slot
}

/// One pending write into a per-draw set, keyed by its shifted binding
pub enum DrawWrite {
    UniformBuffer {
        binding: u32,
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    SampledImage {
        binding: u32,
        view: vk::ImageView,
    },
    StorageImage {
        binding: u32,
        view: vk::ImageView,
    },
}

/// Shader-visible descriptor arrays, the per-draw set pools and the pipeline
/// layout every pipeline in the backend shares
pub struct BindlessTable {
    pool: vk::DescriptorPool,
    /// Set 0 layout: shifted per-draw bindings
    draw_layout: vk::DescriptorSetLayout,
    /// Sets 1..N: one unbounded array per kind, binding 0
    array_layouts: Vec<vk::DescriptorSetLayout>,
    array_sets: Vec<vk::DescriptorSet>,
    /// Per-frame-slot pools the per-draw sets allocate from
    draw_pools: Vec<Mutex<vk::DescriptorPool>>,
    /// Shared layout: per-draw set + bindless arrays + 128 bytes of push constants
    pipeline_layout: vk::PipelineLayout,
    allocators: Mutex<Vec<BindlessAllocator>>,
    raytracing: bool,
}

fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        DescriptorKind::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        DescriptorKind::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
    }
}

impl BindlessTable {
    /// Create the descriptor pools, layouts, array sets and shared pipeline
    /// layout.
    ///
    /// The acceleration-structure array is only declared when `raytracing` is
    /// set; declaring the descriptor type without the extension trips the
    /// validation layers. It is the last kind in heap order, so omitting it
    /// keeps the set indices of the other arrays stable.
    pub fn new(device: &ash::Device, raytracing: bool) -> RhiResult<Self> {
        let kinds: Vec<DescriptorKind> = DescriptorKind::ALL
            .into_iter()
            .filter(|kind| raytracing || *kind != DescriptorKind::AccelerationStructure)
            .collect();

        let pool_sizes: Vec<vk::DescriptorPoolSize> = kinds
            .iter()
            .map(|kind| vk::DescriptorPoolSize {
                ty: descriptor_type(*kind),
                descriptor_count: kind.capacity(),
            })
            .collect();

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .pool_sizes(&pool_sizes)
            .max_sets(kinds.len() as u32);

        let pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(|e| rhi_err!("Failed to create bindless descriptor pool: {:?}", e))?
        };

        // One layout per kind: the unbounded array sits at binding 0 of its
        // own set; the set index is heap_index() + 1.
        let array_flags = [vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING];
        let mut array_layouts = Vec::with_capacity(kinds.len());
        for kind in &kinds {
            let bindings = [vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(descriptor_type(*kind))
                .descriptor_count(kind.capacity())
                .stage_flags(vk::ShaderStageFlags::ALL)];
            let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
                .binding_flags(&array_flags);
            let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
                .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                .bindings(&bindings)
                .push_next(&mut flags_info);
            let layout = unsafe {
                device
                    .create_descriptor_set_layout(&layout_info, None)
                    .map_err(|e| rhi_err!("Failed to create bindless set layout: {:?}", e))?
            };
            array_layouts.push(layout);
        }

        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&array_layouts);

        let array_sets = unsafe {
            device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| rhi_err!("Failed to allocate bindless descriptor sets: {:?}", e))?
        };

        let draw_layout = Self::create_draw_layout(device)?;
        let draw_pools = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Self::create_draw_pool(device).map(Mutex::new))
            .collect::<RhiResult<Vec<_>>>()?;

        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::ALL,
            offset: 0,
            size: PUSH_CONSTANT_CAPACITY as u32,
        }];

        let mut set_layouts = vec![draw_layout];
        set_layouts.extend_from_slice(&array_layouts);
        let layout_create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        let pipeline_layout = unsafe {
            device
                .create_pipeline_layout(&layout_create_info, None)
                .map_err(|e| rhi_err!("Failed to create shared pipeline layout: {:?}", e))?
        };

        let allocators = DescriptorKind::ALL
            .into_iter()
            .map(BindlessAllocator::new)
            .collect();

        Ok(Self {
            pool,
            draw_layout,
            array_layouts,
            array_sets,
            draw_pools,
            pipeline_layout,
            allocators: Mutex::new(allocators),
            raytracing,
        })
    }

    /// The set-0 layout: `PER_DRAW_SLOT_CAPACITY` slots per register class at
    /// the shifted binding numbers
    fn create_draw_layout(device: &ash::Device) -> RhiResult<vk::DescriptorSetLayout> {
        let classes = [
            (RegisterClass::ConstantBuffer, vk::DescriptorType::UNIFORM_BUFFER),
            (RegisterClass::ShaderResource, vk::DescriptorType::SAMPLED_IMAGE),
            (RegisterClass::UnorderedAccess, vk::DescriptorType::STORAGE_IMAGE),
            (RegisterClass::Sampler, vk::DescriptorType::SAMPLER),
        ];
        let mut bindings = Vec::with_capacity(classes.len() * PER_DRAW_SLOT_CAPACITY as usize);
        for (class, ty) in classes {
            for slot in 0..PER_DRAW_SLOT_CAPACITY {
                bindings.push(
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(draw_binding(class, slot))
                        .descriptor_type(ty)
                        .descriptor_count(1)
                        .stage_flags(vk::ShaderStageFlags::ALL),
                );
            }
        }
        // Sets are written only at the slots a draw actually binds
        let binding_flags = vec![vk::DescriptorBindingFlags::PARTIALLY_BOUND; bindings.len()];
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings)
            .push_next(&mut flags_info);
        unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(|e| rhi_err!("Failed to create per-draw set layout: {:?}", e))
        }
    }

    fn create_draw_pool(device: &ash::Device) -> RhiResult<vk::DescriptorPool> {
        let per_class = DRAW_SETS_PER_FRAME * PER_DRAW_SLOT_CAPACITY;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: per_class,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: per_class,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: per_class,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: per_class,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(DRAW_SETS_PER_FRAME);
        unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(|e| rhi_err!("Failed to create per-draw descriptor pool: {:?}", e))
        }
    }

    /// The bindless array sets, bound contiguously starting at set 1
    pub fn array_sets(&self) -> &[vk::DescriptorSet] {
        &self.array_sets
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Reset the per-draw pool of a recycled frame slot.
    /// The frame fence wait in `end_frame` keeps this safe.
    pub fn reset_draw_sets(&self, device: &ash::Device, frame_index: usize) -> RhiResult<()> {
        let pool = self.draw_pools[frame_index].lock().unwrap();
        unsafe {
            device
                .reset_descriptor_pool(*pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(|e| rhi_err!("Failed to reset per-draw descriptor pool: {:?}", e))
        }
    }

    /// Allocate a fresh per-draw set from the frame slot's pool
    pub fn allocate_draw_set(
        &self,
        device: &ash::Device,
        frame_index: usize,
    ) -> RhiResult<vk::DescriptorSet> {
        let pool = self.draw_pools[frame_index].lock().unwrap();
        let set_layouts = [self.draw_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(*pool)
            .set_layouts(&set_layouts);
        let sets = unsafe {
            device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|_| RhiError::OutOfMemory)?
        };
        Ok(sets[0])
    }

    /// Write the pending legacy binds into a per-draw set
    pub fn write_draw_set<'a>(
        &self,
        device: &ash::Device,
        set: vk::DescriptorSet,
        writes: impl Iterator<Item = &'a DrawWrite>,
    ) {
        let writes: Vec<&DrawWrite> = writes.collect();
        // Infos are laid down first so their pointers stay stable while the
        // write structs reference them
        let mut buffer_infos = Vec::with_capacity(writes.len());
        let mut image_infos = Vec::with_capacity(writes.len());
        for write in &writes {
            match write {
                DrawWrite::UniformBuffer {
                    buffer,
                    offset,
                    range,
                    ..
                } => buffer_infos.push(
                    vk::DescriptorBufferInfo::default()
                        .buffer(*buffer)
                        .offset(*offset)
                        .range(*range),
                ),
                DrawWrite::SampledImage { view, .. } => image_infos.push(
                    vk::DescriptorImageInfo::default()
                        .image_view(*view)
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                ),
                DrawWrite::StorageImage { view, .. } => image_infos.push(
                    vk::DescriptorImageInfo::default()
                        .image_view(*view)
                        .image_layout(vk::ImageLayout::GENERAL),
                ),
            }
        }

        let mut set_writes = Vec::with_capacity(writes.len());
        let (mut next_buffer, mut next_image) = (0, 0);
        for write in &writes {
            match write {
                DrawWrite::UniformBuffer { binding, .. } => {
                    set_writes.push(
                        vk::WriteDescriptorSet::default()
                            .dst_set(set)
                            .dst_binding(*binding)
                            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                            .buffer_info(std::slice::from_ref(&buffer_infos[next_buffer])),
                    );
                    next_buffer += 1;
                }
                DrawWrite::SampledImage { binding, .. } => {
                    set_writes.push(
                        vk::WriteDescriptorSet::default()
                            .dst_set(set)
                            .dst_binding(*binding)
                            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                            .image_info(std::slice::from_ref(&image_infos[next_image])),
                    );
                    next_image += 1;
                }
                DrawWrite::StorageImage { binding, .. } => {
                    set_writes.push(
                        vk::WriteDescriptorSet::default()
                            .dst_set(set)
                            .dst_binding(*binding)
                            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                            .image_info(std::slice::from_ref(&image_infos[next_image])),
                    );
                    next_image += 1;
                }
            }
        }
        if !set_writes.is_empty() {
            unsafe { device.update_descriptor_sets(&set_writes, &[]) };
        }
    }

    /// Allocate a slot in the array for `kind`
    pub fn allocate(&self, kind: DescriptorKind) -> RhiResult<BindlessIndex> {
        if kind == DescriptorKind::AccelerationStructure && !self.raytracing {
            return Err(RhiError::InvalidDescriptor(
                "acceleration structure descriptors require raytracing support".to_string(),
            ));
        }
        self.allocators.lock().unwrap()[kind.heap_index()]
            .allocate()
            .ok_or(RhiError::OutOfMemory)
    }

    /// Queue a slot for recycling once the frames that could reference it retire
    pub fn free(&self, kind: DescriptorKind, index: BindlessIndex, frame: u64) {
        self.allocators.lock().unwrap()[kind.heap_index()].free(index, frame);
    }

    /// Recycle retired slots; called once per frame
    pub fn update(&self, current_frame: u64) {
        for allocator in self.allocators.lock().unwrap().iter_mut() {
            allocator.update(current_frame, MAX_FRAMES_IN_FLIGHT);
        }
    }

    /// Recycle every pending slot regardless of frame (shutdown)
    pub fn drain(&self) {
        for allocator in self.allocators.lock().unwrap().iter_mut() {
            allocator.drain();
        }
    }

    fn array_set(&self, kind: DescriptorKind) -> vk::DescriptorSet {
        self.array_sets[kind.heap_index()]
    }

    /// Write a sampler descriptor into its array slot
    pub fn write_sampler(&self, device: &ash::Device, index: BindlessIndex, sampler: vk::Sampler) {
        let image_info = [vk::DescriptorImageInfo::default().sampler(sampler)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.array_set(DescriptorKind::Sampler))
            .dst_binding(0)
            .dst_array_element(index.slot())
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(&image_info);
        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    /// Write a sampled-image descriptor into its array slot
    pub fn write_sampled_image(
        &self,
        device: &ash::Device,
        index: BindlessIndex,
        view: vk::ImageView,
    ) {
        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.array_set(DescriptorKind::SampledImage))
            .dst_binding(0)
            .dst_array_element(index.slot())
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_info);
        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    /// Write a storage-image descriptor into its array slot
    pub fn write_storage_image(
        &self,
        device: &ash::Device,
        index: BindlessIndex,
        view: vk::ImageView,
    ) {
        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::GENERAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.array_set(DescriptorKind::StorageImage))
            .dst_binding(0)
            .dst_array_element(index.slot())
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .image_info(&image_info);
        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    /// Write a uniform- or storage-buffer descriptor into its array slot
    pub fn write_buffer(
        &self,
        device: &ash::Device,
        kind: DescriptorKind,
        index: BindlessIndex,
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    ) {
        debug_assert!(matches!(
            kind,
            DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer
        ));
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(offset)
            .range(range)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.array_set(kind))
            .dst_binding(0)
            .dst_array_element(index.slot())
            .descriptor_type(descriptor_type(kind))
            .buffer_info(&buffer_info);
        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    /// Write a texel-buffer descriptor (a `vk::BufferView`) into its array slot
    pub fn write_texel_buffer(
        &self,
        device: &ash::Device,
        kind: DescriptorKind,
        index: BindlessIndex,
        view: &vk::BufferView,
    ) {
        debug_assert!(matches!(
            kind,
            DescriptorKind::UniformTexelBuffer | DescriptorKind::StorageTexelBuffer
        ));
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.array_set(kind))
            .dst_binding(0)
            .dst_array_element(index.slot())
            .descriptor_type(descriptor_type(kind))
            .texel_buffer_view(std::slice::from_ref(view));
        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    /// Write an acceleration-structure descriptor into its array slot
    pub fn write_acceleration_structure(
        &self,
        device: &ash::Device,
        index: BindlessIndex,
        accel: &vk::AccelerationStructureKHR,
    ) {
        let mut accel_info = vk::WriteDescriptorSetAccelerationStructureKHR::default()
            .acceleration_structures(std::slice::from_ref(accel));
        let mut write = vk::WriteDescriptorSet::default()
            .dst_set(self.array_set(DescriptorKind::AccelerationStructure))
            .dst_binding(0)
            .dst_array_element(index.slot())
            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .push_next(&mut accel_info);
        write.descriptor_count = 1;
        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    /// Destroy the native objects. Called from `VulkanDevice::shutdown`.
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.draw_layout, None);
            for layout in &self.array_layouts {
                device.destroy_descriptor_set_layout(*layout, None);
            }
            for pool in &self.draw_pools {
                device.destroy_descriptor_pool(*pool.lock().unwrap(), None);
            }
            device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "vulkan_descriptors_tests.rs"]
mod tests;
