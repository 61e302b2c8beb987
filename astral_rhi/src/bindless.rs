//! Bindless index service
//!
//! Allocates stable 32-bit handles that shaders use to index the global
//! descriptor arrays. One allocator exists per descriptor kind. A slot freed
//! in frame F is recycled only after frame F + MAX_FRAMES_IN_FLIGHT retires;
//! the deferred-destroy queue carries the index alongside native handles.

use crate::destroy_queue::DestroyQueue;

/// Shader-visible descriptor kinds, each backed by its own bindless heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Sampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    UniformTexelBuffer,
    StorageTexelBuffer,
    AccelerationStructure,
}

impl DescriptorKind {
    /// All descriptor kinds, in heap order
    pub const ALL: [DescriptorKind; 8] = [
        DescriptorKind::Sampler,
        DescriptorKind::SampledImage,
        DescriptorKind::StorageImage,
        DescriptorKind::UniformBuffer,
        DescriptorKind::StorageBuffer,
        DescriptorKind::UniformTexelBuffer,
        DescriptorKind::StorageTexelBuffer,
        DescriptorKind::AccelerationStructure,
    ];

    /// Position of this kind's heap in [`DescriptorKind::ALL`]
    pub fn heap_index(self) -> usize {
        Self::ALL.iter().position(|k| *k == self).unwrap()
    }

    /// Heap capacity for this kind (Tier-1 limits)
    pub fn capacity(self) -> u32 {
        match self {
            DescriptorKind::Sampler => crate::types::BINDLESS_SAMPLER_CAPACITY,
            _ => crate::types::BINDLESS_RESOURCE_CAPACITY,
        }
    }
}

/// A slot in a shader-visible descriptor array; `UNBOUND` (-1) means no slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindlessIndex(pub i32);

impl BindlessIndex {
    pub const UNBOUND: BindlessIndex = BindlessIndex(-1);

    pub fn new(slot: u32) -> Self {
        Self(slot as i32)
    }

    /// Whether this index refers to an allocated slot
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// The slot number; panics in debug builds on `UNBOUND`
    pub fn slot(self) -> u32 {
        debug_assert!(self.is_valid(), "slot() on an unbound bindless index");
        self.0 as u32
    }
}

impl Default for BindlessIndex {
    fn default() -> Self {
        Self::UNBOUND
    }
}

/// Free-list slot allocator for one bindless heap.
///
/// Allocation bumps a monotonic offset until the heap is exhausted, then pops
/// from the free list. Freed slots pass through a deferred queue so a slot is
/// never reissued while an in-flight frame could still reference it.
pub struct BindlessAllocator {
    kind: DescriptorKind,
    capacity: u32,
    next: u32,
    free_list: Vec<u32>,
    pending: DestroyQueue<u32>,
    live: u32,
}

impl BindlessAllocator {
    pub fn new(kind: DescriptorKind) -> Self {
        Self {
            kind,
            capacity: kind.capacity(),
            next: 0,
            free_list: Vec::new(),
            pending: DestroyQueue::new(),
            live: 0,
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    /// Allocate a slot; `None` when the heap is exhausted
    pub fn allocate(&mut self) -> Option<BindlessIndex> {
        let slot = if let Some(recycled) = self.free_list.pop() {
            recycled
        } else if self.next < self.capacity {
            let slot = self.next;
            self.next += 1;
            slot
        } else {
            return None;
        };
        self.live += 1;
        Some(BindlessIndex::new(slot))
    }

    /// Queue a slot for recycling once frame `frame` + MAX_FRAMES_IN_FLIGHT retires
    pub fn free(&mut self, index: BindlessIndex, frame: u64) {
        if !index.is_valid() {
            return;
        }
        debug_assert!(index.slot() < self.next, "freeing an unallocated bindless slot");
        self.live -= 1;
        self.pending.push(index.slot(), frame);
    }

    /// Move retired slots back to the free list.
    ///
    /// Called once per frame with the device frame clock.
    pub fn update(&mut self, current_frame: u64, max_in_flight: u64) {
        let free_list = &mut self.free_list;
        self.pending
            .update(current_frame, max_in_flight, |slot| free_list.push(slot));
    }

    /// Recycle every pending slot regardless of frame (shutdown)
    pub fn drain(&mut self) {
        let free_list = &mut self.free_list;
        self.pending.drain(|slot| free_list.push(slot));
    }

    /// Highest slot ever allocated + 1; the minimum descriptor-array size the
    /// GPU heap must be able to address
    pub fn high_water_mark(&self) -> u32 {
        self.next
    }

    /// Number of currently allocated slots
    pub fn live(&self) -> u32 {
        self.live
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "bindless_tests.rs"]
mod tests;
