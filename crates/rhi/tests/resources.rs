mod common;

use rhi::{
    backend::null::{read_descriptor, NullDescriptor},
    descriptor::ViewDesc,
    resource::desc::{HeapType, ResourceDesc, ResourceFlags},
    Adapter, BufferDesc, Format, LockMode, NodeIndex, RhiConfig, RhiError, UniformBufferUsage,
};

fn rgba_texture(width: u32, height: u32) -> ResourceDesc {
    ResourceDesc::texture_2d(width, height, 1, 1, Format::R8G8B8A8Unorm, ResourceFlags::empty())
}

#[test]
fn buffer_initial_data_reaches_the_gpu_copy() {
    let (_backend, adapter) = common::adapter(1);
    let data: Vec<u8> = (0..=255).collect();
    let buffer = adapter
        .create_buffer(&BufferDesc::new(256, 4, "lut"), Some(&data))
        .unwrap();

    let device = adapter.device_for(NodeIndex::ZERO).unwrap();
    device.default_context().lock().flush_commands(true).unwrap();

    let mut out = vec![0; 256];
    buffer
        .resource(NodeIndex::ZERO)
        .unwrap()
        .native()
        .read(0, &mut out)
        .unwrap();
    assert_eq!(out, data);
}

#[test]
fn upload_buffers_are_written_in_place() {
    let (backend, adapter) = common::adapter(1);
    let desc = BufferDesc {
        heap: HeapType::Upload,
        ..BufferDesc::new(16, 4, "constants")
    };

    backend.clear_queue_log();
    let buffer = adapter.create_buffer(&desc, Some(&[7; 16])).unwrap();

    let mut out = [0; 16];
    buffer.resource(NodeIndex::ZERO).unwrap().native().read(0, &mut out).unwrap();
    assert_eq!(out, [7; 16]);

    let device = adapter.device_for(NodeIndex::ZERO).unwrap();
    assert!(!device.default_context().lock().has_done_work());
}

#[test]
fn oversized_initial_data_is_rejected() {
    let (_backend, adapter) = common::adapter(1);
    let result = adapter.create_buffer(&BufferDesc::new(8, 4, "small"), Some(&[0; 9]));
    assert!(matches!(result, Err(RhiError::InvalidState(_))));
}

#[test]
fn buffer_views_reject_sizes_past_u32() {
    let (_backend, adapter) = common::adapter(1);
    let small = adapter.create_buffer(&BufferDesc::new(64, 16, "verts"), None).unwrap();
    assert_eq!(small.vertex_view(NodeIndex::ZERO).unwrap().size, 64);
    assert_eq!(small.index_view(NodeIndex::ZERO, Format::R16Uint).unwrap().size, 64);

    let huge = adapter
        .create_buffer(&BufferDesc::new(5 << 30, 16, "huge"), None)
        .unwrap();
    assert!(matches!(huge.vertex_view(NodeIndex::ZERO), Err(RhiError::InvalidState(_))));
    assert!(matches!(
        huge.index_view(NodeIndex::ZERO, Format::R32Uint),
        Err(RhiError::InvalidState(_))
    ));
}

#[test]
fn texture_locks_round_trip_through_staging_memory() {
    let (_backend, adapter) = common::adapter(1);
    let texture = adapter.create_texture(&rgba_texture(4, 4), "atlas", None).unwrap();
    let data: Vec<u8> = (0..64).collect();

    let lock = adapter.lock_texture(&texture, 0, 0, LockMode::WriteOnly).unwrap();
    assert!(texture.is_locked());
    assert!(lock.row_pitch() >= 16);
    assert!(lock.read_rows().is_err());
    lock.write_rows(&data).unwrap();
    adapter.unlock_texture(&texture, 0, 0).unwrap();
    assert!(!texture.is_locked());

    let lock = adapter.lock_texture(&texture, 0, 0, LockMode::ReadOnly).unwrap();
    assert_eq!(lock.read_rows().unwrap(), data);
    adapter.unlock_texture(&texture, 0, 0).unwrap();
}

#[test]
fn write_locks_survive_frames_of_other_uploads() {
    for nodes in [1, 2] {
        common::init_logging();
        let config = RhiConfig {
            upload_heap_size: 4096,
            ..common::config(nodes)
        };
        let adapter = Adapter::new(common::null_backend(nodes, true), config).unwrap();

        let held = adapter.create_texture(&rgba_texture(4, 4), "held", None).unwrap();
        let lock = adapter.lock_texture(&held, 0, 0, LockMode::WriteOnly).unwrap();
        lock.write_rows(&[0xaa; 64]).unwrap();

        for frame in 0..8 {
            adapter.begin_frame().unwrap();
            let other = adapter
                .create_texture(&rgba_texture(4, 4), "other", Some(&[0xbb; 64]))
                .unwrap();
            let other_lock = adapter.lock_texture(&other, 0, 0, LockMode::WriteOnly).unwrap();
            other_lock.write_rows(&[frame; 64]).unwrap();
            adapter.unlock_texture(&other, 0, 0).unwrap();
            adapter.end_frame().unwrap();
        }

        adapter.unlock_texture(&held, 0, 0).unwrap();
        let lock = adapter.lock_texture(&held, 0, 0, LockMode::ReadOnly).unwrap();
        assert_eq!(lock.read_rows().unwrap(), vec![0xaa; 64], "{nodes} node(s)");
        adapter.unlock_texture(&held, 0, 0).unwrap();
    }
}

#[test]
fn a_subresource_can_only_be_locked_once() {
    let (_backend, adapter) = common::adapter(1);
    let texture = adapter.create_texture(&rgba_texture(4, 4), "atlas", None).unwrap();

    let _lock = adapter.lock_texture(&texture, 0, 0, LockMode::WriteOnly).unwrap();
    assert!(adapter.lock_texture(&texture, 0, 0, LockMode::WriteOnly).is_err());
    assert!(adapter.lock_texture(&texture, 1, 0, LockMode::WriteOnly).is_err());

    adapter.unlock_texture(&texture, 0, 0).unwrap();
    assert!(adapter.unlock_texture(&texture, 0, 0).is_err());
}

#[test]
fn textures_upload_initial_data_per_mip() {
    let (_backend, adapter) = common::adapter(1);
    let desc = ResourceDesc::texture_2d(4, 4, 1, 2, Format::R8G8B8A8Unorm, ResourceFlags::empty());
    // 4x4 then 2x2 texels.
    let data: Vec<u8> = (0..80).collect();
    let texture = adapter.create_texture(&desc, "mipped", Some(&data)).unwrap();

    let lock = adapter.lock_texture(&texture, 1, 0, LockMode::ReadOnly).unwrap();
    assert_eq!(lock.read_rows().unwrap(), &data[64..]);
    adapter.unlock_texture(&texture, 1, 0).unwrap();
}

#[test]
fn uniform_buffers_point_their_view_at_the_memory() {
    let (_backend, adapter) = common::adapter(1);

    for usage in [UniformBufferUsage::SingleFrame, UniformBufferUsage::MultiFrame] {
        let uniforms = adapter.create_uniform_buffer(&[1; 20], usage).unwrap();
        let uniform = uniforms.get(NodeIndex::ZERO).unwrap();
        assert_eq!(uniform.usage(), usage);
        assert_eq!(uniform.size() % 256, 0);

        match read_descriptor(uniform.handle()) {
            Some(NullDescriptor::View {
                desc: ViewDesc::Cbv(cbv),
                resource: Some(address),
            }) => {
                assert_eq!(address + cbv.offset, uniform.gpu_address());
                assert_eq!(u64::from(cbv.size), uniform.size());
            }
            other => panic!("unexpected descriptor {other:?}"),
        }

        uniform.update(&[2; 20]).unwrap();
        let too_large = vec![0; uniform.size() as usize + 1];
        assert!(uniform.update(&too_large).is_err());
    }
}

#[test]
fn aliased_textures_view_the_source_resource() {
    let (_backend, adapter) = common::adapter(1);
    let dest = adapter.create_texture(&rgba_texture(8, 8), "dest", None).unwrap();
    let src = adapter.create_texture(&rgba_texture(8, 8), "src", None).unwrap();

    adapter.alias_texture_resources(&dest, &src).unwrap();

    let dest_node = dest.node(NodeIndex::ZERO).unwrap();
    let src_node = src.node(NodeIndex::ZERO).unwrap();
    let address = src_node.resource().gpu_address();
    assert_eq!(dest_node.resource().gpu_address(), address);

    let srv = dest_node.srv().unwrap();
    match read_descriptor(srv.handle()) {
        Some(NullDescriptor::View { resource, .. }) => assert_eq!(resource, Some(address)),
        other => panic!("unexpected descriptor {other:?}"),
    }
}

#[test]
fn aliasing_across_different_nodes_fails() {
    let (_backend, single) = common::adapter(1);
    let (_backend, linked) = common::adapter(2);
    let dest = linked.create_texture(&rgba_texture(8, 8), "dest", None).unwrap();
    let src = single.create_texture(&rgba_texture(8, 8), "src", None).unwrap();

    assert!(linked.alias_texture_resources(&dest, &src).is_err());
}
