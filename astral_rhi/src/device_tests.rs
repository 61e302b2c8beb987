use super::*;

use std::sync::atomic::{AtomicBool, Ordering};

use serial_test::serial;

use crate::mock::MockDevice;
use crate::types::DeviceConfig;

fn info(id: u32, queue: QueueKind, waits: &[u32]) -> SubmitInfo {
    SubmitInfo {
        id: CommandListId(id),
        queue,
        waits: waits.iter().map(|w| CommandListId(*w)).collect(),
    }
}

#[test]
fn same_queue_lists_batch_together() {
    let lists = [
        info(0, QueueKind::Graphics, &[]),
        info(1, QueueKind::Graphics, &[]),
        info(2, QueueKind::Graphics, &[]),
    ];
    let batches = partition_submissions(&lists);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].range, 0..3);
    assert!(batches[0].waits.is_empty());
}

#[test]
fn queue_change_breaks_the_batch() {
    let lists = [
        info(0, QueueKind::Graphics, &[]),
        info(1, QueueKind::Graphics, &[]),
        info(2, QueueKind::Compute, &[]),
        info(3, QueueKind::Graphics, &[]),
    ];
    let batches = partition_submissions(&lists);
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].range, 0..2);
    assert_eq!(batches[1].queue, QueueKind::Compute);
    assert_eq!(batches[2].range, 3..4);
}

#[test]
fn declared_wait_breaks_even_on_the_same_queue() {
    let lists = [
        info(0, QueueKind::Graphics, &[]),
        info(1, QueueKind::Graphics, &[0]),
        info(2, QueueKind::Graphics, &[]),
    ];
    let batches = partition_submissions(&lists);
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].range, 1..3);
    assert_eq!(batches[1].waits, vec![CommandListId(0)]);
}

#[test]
fn cross_queue_wait_carries_into_the_new_batch() {
    // Compute list writes, graphics list consumes
    let lists = [
        info(0, QueueKind::Compute, &[]),
        info(1, QueueKind::Graphics, &[0]),
    ];
    let batches = partition_submissions(&lists);
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].queue, QueueKind::Compute);
    assert_eq!(batches[1].queue, QueueKind::Graphics);
    assert_eq!(batches[1].waits, vec![CommandListId(0)]);
}

#[test]
fn empty_submission_yields_no_batches() {
    assert!(partition_submissions(&[]).is_empty());
}

#[test]
fn timeline_values_are_unique_per_list() {
    assert_eq!(timeline_value(0, 32, 0), 0);
    assert_eq!(timeline_value(0, 32, 31), 31);
    assert_eq!(timeline_value(1, 32, 0), 32);
    assert_eq!(timeline_value(2, 32, 5), 69);
}

#[test]
#[serial]
fn probe_order_prefers_d3d12_on_auto() {
    std::env::remove_var("ASTRAL_RHI_BACKEND");
    assert_eq!(
        probe_order(BackendKind::Auto),
        vec![BackendKind::D3d12, BackendKind::Vulkan]
    );
    assert_eq!(probe_order(BackendKind::Vulkan), vec![BackendKind::Vulkan]);
}

#[test]
#[serial]
fn environment_overrides_the_preference() {
    std::env::set_var("ASTRAL_RHI_BACKEND", "vulkan");
    assert_eq!(probe_order(BackendKind::Auto), vec![BackendKind::Vulkan]);

    std::env::set_var("ASTRAL_RHI_BACKEND", "d3d12");
    assert_eq!(probe_order(BackendKind::Vulkan), vec![BackendKind::D3d12]);

    std::env::remove_var("ASTRAL_RHI_BACKEND");
}

#[test]
#[serial]
fn initialize_probes_the_registered_backend() {
    std::env::remove_var("ASTRAL_RHI_BACKEND");
    MockDevice::register();

    static READY_SEEN: AtomicBool = AtomicBool::new(false);
    subscribe_device_events(|event| {
        if event == DeviceEvent::Ready {
            READY_SEEN.store(true, Ordering::SeqCst);
        }
    });

    let config = DeviceConfig {
        backend: BackendKind::Mock,
        ..Default::default()
    };
    let device = initialize(config).unwrap();
    assert!(READY_SEEN.load(Ordering::SeqCst));
    assert_eq!(
        device.lock().unwrap().capabilities().backend,
        BackendKind::Mock
    );

    shutdown(&device, 0);
}

#[test]
#[serial]
fn initialize_without_backends_reports_no_backend() {
    std::env::remove_var("ASTRAL_RHI_BACKEND");
    // Vulkan is never registered in this test binary
    let config = DeviceConfig {
        backend: BackendKind::Vulkan,
        ..Default::default()
    };
    assert!(matches!(initialize(config).err(), Some(RhiError::NoBackend)));
}
