mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use geometry::Viewport;
use rhi::{
    backend::{null::QueueOp, QueueKind},
    pipeline::{PrimitiveTopology, ShaderStage},
    Adapter, BatchingMode, BufferDesc, ContextKind, DeferredObject, GpuNodeMask, NodeIndex, SamplerDesc,
};

fn record_triangle(adapter: &Adapter, node: NodeIndex, seed: u8) {
    let pso = common::graphics_pipeline(adapter, seed);
    let sampler = adapter.create_sampler(&SamplerDesc::default()).unwrap();
    let device = adapter.device_for(node).unwrap();

    let mut context = device.default_context().lock();
    context.set_graphics_pipeline(&pso);
    context.set_viewport(Viewport::new(0.0, 0.0, 64.0, 64.0, 0.0, 1.0));
    context.set_primitive_topology(PrimitiveTopology::TriangleList);
    context.set_sampler(ShaderStage::Pixel, 0, sampler.get(node).cloned());
    context.draw(3, 1, 0, 0);
}

#[test]
fn flush_submits_one_list_and_resets_the_counters() {
    let (backend, adapter) = common::adapter(1);
    record_triangle(&adapter, NodeIndex::ZERO, 1);

    let device = adapter.device_for(NodeIndex::ZERO).unwrap();
    let mut context = device.default_context().lock();
    assert_eq!(context.counters().draws, 1);
    assert!(context.has_done_work());

    backend.clear_queue_log();
    context.flush_commands(false).unwrap();

    assert_eq!(context.counters().draws, 0);
    assert!(context.is_open());

    let executed = backend.executed(QueueKind::Direct);
    assert_eq!(executed.len(), 1);
    assert!(executed[0].contains(&"Draw"));
    assert!(executed[0].contains(&"SetGraphicsPipeline"));
    assert!(executed[0].contains(&"SetGraphicsDescriptorTable"));

    // Nothing recorded, nothing submitted.
    context.flush_commands(false).unwrap();
    assert_eq!(backend.executed(QueueKind::Direct).len(), 1);
}

#[test]
fn draw_without_a_pipeline_is_skipped() {
    let (backend, adapter) = common::adapter(1);
    let device = adapter.device_for(NodeIndex::ZERO).unwrap();
    let mut context = device.default_context().lock();

    context.draw(3, 1, 0, 0);
    assert_eq!(context.counters().draws, 0);

    backend.clear_queue_log();
    context.flush_commands(false).unwrap();
    assert!(backend.executed(QueueKind::Direct).is_empty());
}

#[test]
fn state_is_only_recorded_when_it_changes() {
    let (backend, adapter) = common::adapter(1);
    record_triangle(&adapter, NodeIndex::ZERO, 2);

    let device = adapter.device_for(NodeIndex::ZERO).unwrap();
    let mut context = device.default_context().lock();
    context.draw(3, 1, 3, 0);
    context.draw(3, 1, 6, 0);

    backend.clear_queue_log();
    context.flush_commands(false).unwrap();

    let executed = backend.executed(QueueKind::Direct);
    let commands = &executed[0];
    let count = |name| commands.iter().filter(|c| **c == name).count();
    assert_eq!(count("Draw"), 3);
    assert_eq!(count("SetGraphicsPipeline"), 1);
    assert_eq!(count("SetViewport"), 1);
    assert_eq!(count("SetPrimitiveTopology"), 1);
}

#[test]
fn frames_reuse_allocators_once_the_gpu_is_done() {
    common::init_logging();
    let backend = common::null_backend(1, false);
    let adapter = Adapter::new(backend.clone(), common::config(1)).unwrap();
    let device = adapter.device_for(NodeIndex::ZERO).unwrap();
    let allocators = device.core().direct().allocators();

    let initial = allocators.num_created();
    for _ in 0..3 {
        adapter.begin_frame().unwrap();
        adapter.end_frame().unwrap();
        assert!(device.default_context().lock().has_allocator());
    }
    // The GPU never finished a frame, so none could be reused.
    assert_eq!(allocators.num_created(), initial + 3);

    backend.advance_gpu();
    for _ in 0..10 {
        adapter.begin_frame().unwrap();
        adapter.end_frame().unwrap();
        backend.advance_gpu();
    }
    assert_eq!(allocators.num_created(), initial + 3);
}

#[test]
fn frame_fence_is_monotonic() {
    common::init_logging();
    let backend = common::null_backend(1, false);
    let adapter = Adapter::new(backend.clone(), common::config(1)).unwrap();
    let fence = adapter.shared().frame_fence().clone();

    let mut last_completed = 0;
    for frame in 1..=20_u64 {
        adapter.begin_frame().unwrap();
        adapter.end_frame().unwrap();
        assert_eq!(fence.current_value(), frame);

        if frame % 3 == 0 {
            backend.complete_signals(4);
        }

        let completed = fence.completed_value();
        assert!(completed >= last_completed);
        assert!(completed <= fence.current_value());
        last_completed = completed;
    }
}

#[test]
fn deferred_objects_outlive_the_frames_that_used_them() {
    common::init_logging();
    let backend = common::null_backend(1, false);
    let adapter = Adapter::new(backend.clone(), common::config(1)).unwrap();
    let fence = adapter.shared().frame_fence().clone();
    let deletion = adapter.shared().deletion().clone();
    let released = Arc::new(AtomicUsize::new(0));

    // A fixed LCG keeps the GPU's progress irregular but reproducible.
    let mut seed = 0x2545_f491_u32;
    let mut queued = 0;
    for _ in 0..64 {
        adapter.begin_frame().unwrap();

        for _ in 0..(seed % 3) {
            let tag = fence.next_value();
            let fence = fence.clone();
            let released = released.clone();
            deletion.enqueue(DeferredObject::Callback(Box::new(move || {
                assert!(fence.cached_completed_value() >= tag, "released before frame {tag} completed");
                released.fetch_add(1, Ordering::SeqCst);
            })));
            queued += 1;
        }

        adapter.end_frame().unwrap();

        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        backend.complete_signals((seed >> 16) as usize % 5);
    }

    assert!(released.load(Ordering::SeqCst) <= queued);
    adapter.block_until_idle().unwrap();
    deletion.release_all_blocking().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), queued);
}

#[test]
fn buffers_have_a_copy_on_every_node() {
    let (_backend, adapter) = common::adapter(2);
    let buffer = adapter
        .create_buffer(&BufferDesc::new(1024, 16, "vertices"), None)
        .unwrap();

    let chain = buffer.chain();
    assert_eq!(chain.len(), 2);
    assert!(!chain.is_single_node());
    assert_eq!(chain.head_node(), NodeIndex::ZERO);
    assert_eq!(chain.next(NodeIndex::ZERO).map(|(node, _)| node), Some(NodeIndex(1)));
    assert!(chain.next(NodeIndex(1)).is_none());
    assert_eq!(chain.previous(NodeIndex(1)).map(|(node, _)| node), Some(NodeIndex::ZERO));

    for (node, resource) in chain.iter() {
        assert_eq!(resource.node(), node);
        assert_eq!(resource.visible_nodes(), GpuNodeMask::first_n(2));
    }
}

#[test]
fn alternate_frames_rotate_through_the_nodes() {
    let (_backend, adapter) = common::adapter(2);
    assert_eq!(adapter.current_node(), NodeIndex::ZERO);
    assert_eq!(adapter.redirector().gpu_mask(), NodeIndex::ZERO.mask());

    let mut visited = Vec::new();
    for _ in 0..4 {
        adapter.begin_frame().unwrap();
        adapter.end_frame().unwrap();
        visited.push(adapter.current_node());
        assert_eq!(adapter.redirector().gpu_mask(), adapter.current_node().mask());
    }
    assert_eq!(visited, [NodeIndex(1), NodeIndex::ZERO, NodeIndex(1), NodeIndex::ZERO]);
}

#[test]
fn single_node_adapters_never_switch() {
    let (_backend, adapter) = common::adapter(1);
    assert_eq!(adapter.switch_to_next_gpu(), NodeIndex::ZERO.mask());
    adapter.begin_frame().unwrap();
    adapter.end_frame().unwrap();
    assert_eq!(adapter.current_node(), NodeIndex::ZERO);
}

#[test]
fn redirector_forwards_to_the_masked_contexts() {
    let (_backend, adapter) = common::adapter(2);
    let redirector = adapter.redirector();

    let nodes = redirector.execute(|context| context.node());
    assert_eq!(nodes.as_slice(), [NodeIndex::ZERO]);

    redirector.set_gpu_mask(GpuNodeMask::first_n(2));
    let nodes = redirector.execute(|context| context.node());
    assert_eq!(nodes.as_slice(), [NodeIndex::ZERO, NodeIndex(1)]);

    redirector.set_current_device_index(NodeIndex(1));
    let kinds = redirector.execute(|context| context.kind());
    assert_eq!(kinds.as_slice(), [ContextKind::Default]);
}

#[test]
fn temporal_effects_hand_resources_to_the_next_node() {
    let (backend, adapter) = common::adapter(2);
    let texture = adapter
        .create_texture(
            &rhi::resource::desc::ResourceDesc::texture_2d(
                16,
                16,
                1,
                1,
                rhi::Format::R8G8B8A8Unorm,
                rhi::resource::desc::ResourceFlags::ALLOW_RENDER_TARGET,
            ),
            "history",
            None,
        )
        .unwrap();

    backend.clear_queue_log();
    {
        let device = adapter.device_for(NodeIndex::ZERO).unwrap();
        let mut context = device.default_context().lock();
        context.broadcast_temporal_effect("history", &[&texture]).unwrap();
    }

    let copies = backend.executed(QueueKind::Copy);
    assert_eq!(copies, vec![vec!["CopyResource"]]);

    let effect = adapter.shared().temporal_effect("history").unwrap();
    let signalled = effect.last_signaled(NodeIndex::ZERO);
    assert!(signalled > 0);

    {
        let device = adapter.device_for(NodeIndex(1)).unwrap();
        let mut context = device.default_context().lock();
        context.wait_for_temporal_effect("history").unwrap();
    }

    let waited = backend.queue_log().into_iter().any(|op| {
        op == QueueOp::Wait {
            node: NodeIndex(1),
            kind: QueueKind::Direct,
            value: signalled,
        }
    });
    assert!(waited);
}

#[test]
fn aggressive_batching_holds_chunks_until_the_batch_ends() {
    common::init_logging();
    let backend = common::null_backend(1, false);
    let config = rhi::RhiConfig {
        batching: BatchingMode::Aggressive,
        ..common::config(1)
    };
    let adapter = Adapter::new(backend.clone(), config).unwrap();
    let device = adapter.device_for(NodeIndex::ZERO).unwrap();
    let pso = common::graphics_pipeline(&adapter, 7);

    // Keep the direct queue busy.
    device.default_context().lock().flush_commands(false).unwrap();
    {
        let mut context = device.default_context().lock();
        context.set_graphics_pipeline(&pso);
        context.draw(3, 1, 0, 0);
        context.flush_commands(false).unwrap();
    }
    assert!(!device.core().direct().is_idle());

    backend.clear_queue_log();
    for index in 0..device.num_worker_contexts() {
        let mut worker = device.worker_context(index).unwrap().lock();
        assert_eq!(worker.kind(), ContextKind::Worker(index as u32));
        worker.set_graphics_pipeline(&pso);
        worker.draw(3, 1, 0, 0);
        worker.finish_parallel_chunk().unwrap();
        assert!(worker.is_open());
    }

    assert!(backend.executed(QueueKind::Direct).is_empty());
    assert_eq!(device.core().direct().num_pending(), device.num_worker_contexts());

    device.end_parallel_batch().unwrap();
    assert_eq!(backend.executed(QueueKind::Direct).len(), device.num_worker_contexts());
    assert_eq!(device.core().direct().num_pending(), 0);
}
