use super::*;

#[test]
fn register_classes_map_to_shifted_bindings() {
    assert_eq!(draw_binding(RegisterClass::ConstantBuffer, 0), 0);
    assert_eq!(draw_binding(RegisterClass::ConstantBuffer, 3), 3);
    assert_eq!(draw_binding(RegisterClass::ShaderResource, 0), 1000);
    assert_eq!(draw_binding(RegisterClass::ShaderResource, 7), 1007);
    assert_eq!(draw_binding(RegisterClass::UnorderedAccess, 2), 2002);
    assert_eq!(draw_binding(RegisterClass::Sampler, 5), 3005);
}

#[test]
fn register_classes_never_collide_within_slot_capacity() {
    let classes = [
        RegisterClass::ConstantBuffer,
        RegisterClass::ShaderResource,
        RegisterClass::UnorderedAccess,
        RegisterClass::Sampler,
    ];
    let mut seen = std::collections::HashSet::new();
    for class in classes {
        for slot in 0..PER_DRAW_SLOT_CAPACITY {
            assert!(seen.insert(draw_binding(class, slot)));
        }
    }
}
