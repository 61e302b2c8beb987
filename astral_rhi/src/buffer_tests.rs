use super::*;

#[test]
fn zero_size_is_rejected() {
    let desc = BufferDesc {
        size: 0,
        usage: BufferUsage::VERTEX,
        ..Default::default()
    };
    assert!(matches!(desc.validate(), Err(RhiError::InvalidDescriptor(_))));
}

#[test]
fn readback_excludes_shader_usage() {
    let desc = BufferDesc {
        size: 256,
        usage: BufferUsage::SHADER_READ,
        residency: BufferResidency::Readback,
        ..Default::default()
    };
    assert!(desc.validate().is_err());

    let plain = BufferDesc {
        size: 256,
        usage: BufferUsage::empty(),
        residency: BufferResidency::Readback,
        ..Default::default()
    };
    assert!(plain.validate().is_ok());
}

#[test]
fn dynamic_requires_uniform_usage() {
    let desc = BufferDesc {
        size: 256,
        usage: BufferUsage::VERTEX,
        residency: BufferResidency::Dynamic,
        ..Default::default()
    };
    assert!(desc.validate().is_err());

    let uniform = BufferDesc {
        size: 256,
        usage: BufferUsage::UNIFORM,
        residency: BufferResidency::Dynamic,
        ..Default::default()
    };
    assert!(uniform.validate().is_ok());
}

#[test]
fn range_resolves_zero_size_to_end() {
    let range = BufferRange { offset: 64, size: 0 };
    assert_eq!(range.resolve(256).unwrap(), BufferRange { offset: 64, size: 192 });

    let explicit = BufferRange { offset: 0, size: 128 };
    assert_eq!(explicit.resolve(256).unwrap(), explicit);
}

#[test]
fn equal_resolved_ranges_are_equal_keys() {
    let implicit = BufferRange { offset: 0, size: 0 }.resolve(1024).unwrap();
    let explicit = BufferRange { offset: 0, size: 1024 }.resolve(1024).unwrap();
    assert_eq!(implicit, explicit);
}

#[test]
fn out_of_bounds_ranges_are_rejected() {
    // Offset past the end, even with the to-the-end size shorthand
    let past_end = BufferRange { offset: 2048, size: 0 };
    assert!(matches!(past_end.resolve(1024), Err(RhiError::InvalidDescriptor(_))));

    let overlong = BufferRange { offset: 512, size: 1024 };
    assert!(overlong.resolve(1024).is_err());

    let overflowing = BufferRange { offset: 8, size: u64::MAX };
    assert!(overflowing.resolve(1024).is_err());
}
