use super::*;

#[test]
fn unbound_index_is_invalid() {
    assert!(!BindlessIndex::UNBOUND.is_valid());
    assert_eq!(BindlessIndex::default(), BindlessIndex::UNBOUND);
    assert!(BindlessIndex::new(0).is_valid());
    assert_eq!(BindlessIndex::new(7).slot(), 7);
}

#[test]
fn allocates_sequential_slots() {
    let mut allocator = BindlessAllocator::new(DescriptorKind::SampledImage);
    assert_eq!(allocator.allocate(), Some(BindlessIndex::new(0)));
    assert_eq!(allocator.allocate(), Some(BindlessIndex::new(1)));
    assert_eq!(allocator.allocate(), Some(BindlessIndex::new(2)));
    assert_eq!(allocator.live(), 3);
    assert_eq!(allocator.high_water_mark(), 3);
}

#[test]
fn freed_slot_is_recycled_only_after_retire_window() {
    let mut allocator = BindlessAllocator::new(DescriptorKind::StorageBuffer);
    let first = allocator.allocate().unwrap();
    allocator.free(first, 0);

    // Frame 1: still in flight, allocation must not reuse the slot
    allocator.update(1, 2);
    let second = allocator.allocate().unwrap();
    assert_ne!(second, first);

    // Frame 2: retired, the original slot comes back
    allocator.update(2, 2);
    let third = allocator.allocate().unwrap();
    assert_eq!(third, first);
}

#[test]
fn freeing_unbound_is_a_no_op() {
    let mut allocator = BindlessAllocator::new(DescriptorKind::UniformBuffer);
    allocator.free(BindlessIndex::UNBOUND, 0);
    assert_eq!(allocator.live(), 0);
}

#[test]
fn sampler_heap_exhausts_at_capacity() {
    let mut allocator = BindlessAllocator::new(DescriptorKind::Sampler);
    for _ in 0..crate::types::BINDLESS_SAMPLER_CAPACITY {
        assert!(allocator.allocate().is_some());
    }
    assert_eq!(allocator.allocate(), None);
    assert_eq!(allocator.live(), crate::types::BINDLESS_SAMPLER_CAPACITY);
}

#[test]
fn drain_recycles_immediately() {
    let mut allocator = BindlessAllocator::new(DescriptorKind::StorageImage);
    let index = allocator.allocate().unwrap();
    allocator.free(index, 0);
    allocator.drain();
    assert_eq!(allocator.allocate(), Some(index));
}

#[test]
fn heap_order_matches_all() {
    for (position, kind) in DescriptorKind::ALL.iter().enumerate() {
        assert_eq!(kind.heap_index(), position);
    }
    assert_eq!(
        DescriptorKind::Sampler.capacity(),
        crate::types::BINDLESS_SAMPLER_CAPACITY
    );
    assert_eq!(
        DescriptorKind::SampledImage.capacity(),
        crate::types::BINDLESS_RESOURCE_CAPACITY
    );
}
