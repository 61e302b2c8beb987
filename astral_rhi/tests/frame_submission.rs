//! Frame lifecycle, submission batching and transfer execution on the
//! software device

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use astral_rhi::mock::{MockCommandRecorder, MockDevice, MockSwapChain, NullWindow};
use astral_rhi::{
    Barrier, BlendState, BufferDesc, BufferResidency, BufferUsage, ClearValue, CommandListId,
    DepthStencilState, Device, DeviceConfig, GraphicsPipelineDesc, InputLayout, PixelFormat,
    PrimitiveTopology, QueueKind, RasterizerState, RenderTargetFormats, ResourceLayout, RhiError,
    ShaderDesc, ShaderStage, SwapChainDesc, TextureDesc, TextureUsage, Viewport,
    PER_DRAW_SLOT_CAPACITY,
};

fn device() -> MockDevice {
    MockDevice::new(DeviceConfig::default())
}

fn graphics_pipeline(device: &mut MockDevice) -> astral_rhi::PipelineStateHandle {
    let vs = device
        .create_shader(ShaderDesc {
            stage: ShaderStage::Vertex,
            bytecode: vec![0x10, 0x20],
            debug_name: None,
        })
        .unwrap();
    let ps = device
        .create_shader(ShaderDesc {
            stage: ShaderStage::Pixel,
            bytecode: vec![0x30, 0x40],
            debug_name: None,
        })
        .unwrap();
    device
        .create_graphics_pipeline(GraphicsPipelineDesc {
            vertex_shader: vs,
            pixel_shader: Some(ps),
            input_layout: InputLayout::default(),
            rasterizer: RasterizerState::default(),
            blend: BlendState::default(),
            depth_stencil: DepthStencilState::default(),
            topology: PrimitiveTopology::TriangleList,
            sample_mask: !0,
            render_target_formats: RenderTargetFormats {
                color: vec![PixelFormat::Bgra8Unorm],
                depth_stencil: None,
                sample_count: 1,
            },
            debug_name: None,
        })
        .unwrap()
}

#[test]
fn copy_round_trip_through_device_local_memory() {
    let mut device = device();
    const SIZE: u64 = 64 * 1024;
    let pattern: Vec<u8> = (0..SIZE).map(|i| (i % 251) as u8).collect();

    let upload = device
        .create_buffer(
            BufferDesc {
                size: SIZE,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Upload,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    upload.update(0, &pattern).unwrap();

    let local = device
        .create_buffer(
            BufferDesc {
                size: SIZE,
                usage: BufferUsage::SHADER_READ,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    let readback = device
        .create_buffer(
            BufferDesc {
                size: SIZE,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Readback,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Copy).unwrap();
    cmd.copy_buffer(&upload, 0, &local, 0, SIZE).unwrap();
    cmd.copy_buffer(&local, 0, &readback, 0, SIZE).unwrap();
    device.submit_command_lists(vec![cmd]).unwrap();
    device.end_frame().unwrap();

    let mut out = vec![0u8; SIZE as usize];
    readback.read(0, &mut out).unwrap();
    assert_eq!(out, pattern);
}

#[test]
fn initial_data_is_visible_to_copies() {
    let mut device = device();
    let local = device
        .create_buffer(
            BufferDesc {
                size: 8,
                usage: BufferUsage::VERTEX,
                ..Default::default()
            },
            Some(&[1, 2, 3, 4, 5, 6, 7, 8]),
        )
        .unwrap();
    let readback = device
        .create_buffer(
            BufferDesc {
                size: 8,
                residency: BufferResidency::Readback,
                usage: BufferUsage::empty(),
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Copy).unwrap();
    cmd.copy_buffer(&local, 0, &readback, 0, 8).unwrap();
    device.submit_command_lists(vec![cmd]).unwrap();

    let mut out = [0u8; 8];
    readback.read(0, &mut out).unwrap();
    assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn update_buffer_executes_at_submit() {
    let mut device = device();
    let readback = device
        .create_buffer(
            BufferDesc {
                size: 4,
                residency: BufferResidency::Readback,
                usage: BufferUsage::empty(),
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Copy).unwrap();
    cmd.update_buffer(&readback, 0, &[0xaa, 0xbb, 0xcc, 0xdd]).unwrap();

    let mut out = [0u8; 4];
    readback.read(0, &mut out).unwrap();
    assert_eq!(out, [0, 0, 0, 0]);

    device.submit_command_lists(vec![cmd]).unwrap();
    readback.read(0, &mut out).unwrap();
    assert_eq!(out, [0xaa, 0xbb, 0xcc, 0xdd]);
}

#[test]
fn cross_queue_wait_splits_the_submission() {
    let mut device = device();
    device.begin_frame().unwrap();

    let compute = device.begin_command_buffer(QueueKind::Compute).unwrap();
    let mut graphics = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    graphics.wait_for(compute.id()).unwrap();

    device.submit_command_lists(vec![compute, graphics]).unwrap();

    let batches = device.last_batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].queue, QueueKind::Compute);
    assert_eq!(batches[1].queue, QueueKind::Graphics);
    assert_eq!(batches[1].waits, vec![CommandListId(0)]);
}

#[test]
fn waits_may_only_reference_earlier_lists() {
    let mut device = device();
    device.begin_frame().unwrap();

    let first = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    let mut second = device.begin_command_buffer(QueueKind::Graphics).unwrap();

    // A list can never wait on itself or a later id
    assert!(second.wait_for(second.id()).is_err());
    second.wait_for(first.id()).unwrap();

    // The wait target must be part of the same submission, before the waiter
    let result = device.submit_command_lists(vec![second]);
    assert!(matches!(result, Err(RhiError::ValidationError(_))));
}

#[test]
fn command_buffer_budget_resets_each_frame() {
    let mut device = MockDevice::new(DeviceConfig {
        command_buffers_per_frame: 2,
        ..Default::default()
    });

    device.begin_frame().unwrap();
    let a = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    let b = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    assert!(device.begin_command_buffer(QueueKind::Graphics).is_err());

    device.submit_command_lists(vec![a, b]).unwrap();
    device.end_frame().unwrap();

    device.begin_frame().unwrap();
    assert!(device.begin_command_buffer(QueueKind::Graphics).is_ok());
}

#[test]
fn frame_clock_advances_and_wraps_the_index() {
    let mut device = device();
    assert_eq!(device.current_frame(), 0);
    assert_eq!(device.frame_index(), 0);

    device.begin_frame().unwrap();
    device.end_frame().unwrap();
    assert_eq!(device.current_frame(), 1);
    assert_eq!(device.frame_index(), 1);

    device.begin_frame().unwrap();
    device.end_frame().unwrap();
    assert_eq!(device.current_frame(), 2);
    assert_eq!(device.frame_index(), 0);
}

#[test]
fn swap_chain_pass_transitions_and_presents() {
    let mut device = device();
    let swap_chain = device
        .create_swap_chain(&NullWindow, SwapChainDesc::default())
        .unwrap();
    assert_eq!(swap_chain.format(), PixelFormat::Bgra8Unorm);
    assert_eq!(swap_chain.back_buffer_count(), 3);

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    cmd.begin_render_pass_swap_chain(&swap_chain, ClearValue::Color([0.0; 4]))
        .unwrap();
    cmd.end_render_pass().unwrap();
    device.submit_command_lists(vec![cmd]).unwrap();
    device.end_frame().unwrap();

    let mock = swap_chain.as_any().downcast_ref::<MockSwapChain>().unwrap();
    assert_eq!(
        mock.transitions(),
        vec![ResourceLayout::RenderTarget, ResourceLayout::Present]
    );
    assert_eq!(mock.present_count(), 1);
}

#[test]
fn swap_chain_resize_recreates_back_buffers() {
    let mut device = device();
    let swap_chain = device
        .create_swap_chain(
            &NullWindow,
            SwapChainDesc {
                width: 800,
                height: 600,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(swap_chain.extent(), (800, 600));

    swap_chain.resize(1920, 1080).unwrap();
    assert_eq!(swap_chain.extent(), (1920, 1080));

    let mock = swap_chain.as_any().downcast_ref::<MockSwapChain>().unwrap();
    for buffer in mock.back_buffers() {
        assert_eq!(buffer.desc().width, 1920);
        assert_eq!(buffer.desc().height, 1080);
    }

    assert!(swap_chain.resize(0, 1080).is_err());
}

#[test]
fn draws_require_a_pass_and_a_graphics_pipeline() {
    let mut device = device();
    let pipeline = graphics_pipeline(&mut device);
    let swap_chain = device
        .create_swap_chain(&NullWindow, SwapChainDesc::default())
        .unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Graphics).unwrap();

    assert!(cmd.draw(3, 0).is_err());

    cmd.begin_render_pass_swap_chain(&swap_chain, ClearValue::Color([0.0; 4]))
        .unwrap();
    assert!(cmd.draw(3, 0).is_err());

    cmd.bind_pipeline(&pipeline).unwrap();
    cmd.set_viewports(&[Viewport::from_extent(1280, 720)]).unwrap();
    cmd.draw(3, 0).unwrap();
    cmd.end_render_pass().unwrap();

    let recorder = cmd.as_any().downcast_ref::<MockCommandRecorder>().unwrap();
    assert_eq!(recorder.draw_count(), 1);
    device.submit_command_lists(vec![cmd]).unwrap();
}

#[test]
fn queued_barriers_flush_once_before_work() {
    let mut device = device();
    let texture = device
        .create_texture(
            TextureDesc {
                width: 64,
                height: 64,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    let src = device
        .create_buffer(
            BufferDesc {
                size: 16,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Upload,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    let dst = device
        .create_buffer(
            BufferDesc {
                size: 16,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Readback,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Copy).unwrap();
    cmd.barrier(Barrier::Texture {
        texture: texture.clone(),
        subresource: None,
        src: ResourceLayout::Undefined,
        dst: ResourceLayout::CopyDst,
    })
    .unwrap();
    cmd.barrier(Barrier::Texture {
        texture,
        subresource: None,
        src: ResourceLayout::CopyDst,
        dst: ResourceLayout::ShaderRead,
    })
    .unwrap();
    cmd.copy_buffer(&src, 0, &dst, 0, 16).unwrap();
    cmd.copy_buffer(&src, 0, &dst, 0, 16).unwrap();

    let recorder = cmd.as_any().downcast_ref::<MockCommandRecorder>().unwrap();
    // Both transitions coalesced into one flush; the second copy had nothing
    // left to flush
    assert_eq!(recorder.barrier_flush_log(), &[(1, 0, false)]);
    device.submit_command_lists(vec![cmd]).unwrap();
}

#[test]
fn push_constants_enforce_the_capacity() {
    let mut device = device();
    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    cmd.push_constants(0, &[0u8; 128]).unwrap();
    assert!(cmd.push_constants(64, &[0u8; 128]).is_err());
}

#[test]
fn lost_device_rejects_further_frames() {
    let mut device = device();
    let observed = Arc::new(AtomicBool::new(false));
    let flag = observed.clone();
    device.set_device_lost_callback(Box::new(move || {
        flag.store(true, Ordering::SeqCst);
    }));

    device.simulate_device_lost();
    assert!(observed.load(Ordering::SeqCst));
    assert_eq!(device.begin_frame(), Err(RhiError::DeviceLost));
    assert!(device.begin_command_buffer(QueueKind::Graphics).is_err());
}

#[test]
fn submitting_an_open_render_pass_is_an_error() {
    let mut device = device();
    let swap_chain = device
        .create_swap_chain(&NullWindow, SwapChainDesc::default())
        .unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    cmd.begin_render_pass_swap_chain(&swap_chain, ClearValue::Color([0.0; 4]))
        .unwrap();
    let result = device.submit_command_lists(vec![cmd]);
    assert!(matches!(result, Err(RhiError::ValidationError(_))));
}

#[test]
fn initial_data_survives_the_full_copy_path() {
    let mut device = device();
    const SIZE: u64 = 64 * 1024;
    let ascending: Vec<u8> = (0..SIZE).map(|i| i as u8).collect();

    let local = device
        .create_buffer(
            BufferDesc {
                size: SIZE,
                usage: BufferUsage::SHADER_READ,
                ..Default::default()
            },
            Some(&ascending),
        )
        .unwrap();
    let readback = device
        .create_buffer(
            BufferDesc {
                size: SIZE,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Readback,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Copy).unwrap();
    cmd.copy_buffer(&local, 0, &readback, 0, SIZE).unwrap();
    device.submit_command_lists(vec![cmd]).unwrap();
    device.end_frame().unwrap();

    let mut out = vec![0u8; SIZE as usize];
    readback.read(0, &mut out).unwrap();
    assert_eq!(out, ascending);
}

#[test]
fn graphics_observes_a_compute_write_it_waited_on() {
    let mut device = device();
    let shared = device
        .create_buffer(
            BufferDesc {
                size: 4,
                usage: BufferUsage::SHADER_READ | BufferUsage::SHADER_WRITE,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    let readback = device
        .create_buffer(
            BufferDesc {
                size: 4,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Readback,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();
    let mut compute = device.begin_command_buffer(QueueKind::Compute).unwrap();
    compute.update_buffer(&shared, 0, &[0xaa, 0xbb, 0xcc, 0xdd]).unwrap();

    let mut graphics = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    graphics.wait_for(compute.id()).unwrap();
    graphics.copy_buffer(&shared, 0, &readback, 0, 4).unwrap();

    device.submit_command_lists(vec![compute, graphics]).unwrap();
    assert_eq!(device.last_batches().len(), 2);

    let mut out = [0u8; 4];
    readback.read(0, &mut out).unwrap();
    assert_eq!(out, [0xaa, 0xbb, 0xcc, 0xdd]);
}

#[test]
fn vertex_strides_survive_pipeline_binds() {
    let mut device = device();
    let pipeline = graphics_pipeline(&mut device);
    let vertices = device
        .create_buffer(
            BufferDesc {
                size: 256,
                usage: BufferUsage::VERTEX,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();

    // Vertex buffer bound before the pipeline
    let mut before = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    before.bind_vertex_buffer(0, &vertices, 0, 16).unwrap();
    before.bind_pipeline(&pipeline).unwrap();
    let key_before = before
        .as_any()
        .downcast_ref::<MockCommandRecorder>()
        .unwrap()
        .effective_pipeline_key();
    assert!(key_before.is_some());

    // Binding order must not matter: vertex bindings stay live across
    // pipeline binds
    let mut after = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    after.bind_pipeline(&pipeline).unwrap();
    after.bind_vertex_buffer(0, &vertices, 0, 16).unwrap();
    let key_after = after
        .as_any()
        .downcast_ref::<MockCommandRecorder>()
        .unwrap()
        .effective_pipeline_key();
    assert_eq!(key_before, key_after);

    // With no vertex binding at all the digest is empty and the key differs
    let mut bare = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    bare.bind_pipeline(&pipeline).unwrap();
    let key_bare = bare
        .as_any()
        .downcast_ref::<MockCommandRecorder>()
        .unwrap()
        .effective_pipeline_key();
    assert_ne!(key_before, key_bare);

    device
        .submit_command_lists(vec![before, after, bare])
        .unwrap();
}

#[test]
fn single_slot_binds_validate_slot_and_usage() {
    let mut device = device();
    let uniform = device
        .create_buffer(
            BufferDesc {
                size: 256,
                usage: BufferUsage::UNIFORM,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    let sampled = device
        .create_texture(TextureDesc::default(), None)
        .unwrap();
    let storage = device
        .create_texture(
            TextureDesc {
                usage: TextureUsage::STORAGE,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Graphics).unwrap();

    cmd.bind_constant_buffer(0, &uniform).unwrap();
    cmd.bind_shader_resource(3, &sampled).unwrap();
    cmd.bind_unordered_access(7, &storage).unwrap();

    // Slots past the per-draw capacity are rejected
    assert!(cmd
        .bind_constant_buffer(PER_DRAW_SLOT_CAPACITY, &uniform)
        .is_err());

    // Usage has to match the bind point
    assert!(cmd.bind_shader_resource(0, &storage).is_err());
    assert!(cmd.bind_unordered_access(0, &sampled).is_err());
}
