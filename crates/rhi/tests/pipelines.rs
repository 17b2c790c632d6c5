mod common;

use std::sync::Arc;

use rhi::{
    error::DeviceRemovedReason,
    pipeline::{FillMode, GraphicsPipelineInitializer, Shader, ShaderResourceCounts, ShaderStage},
    Adapter,
};

fn compute_shader(adapter: &Adapter, seed: u8) -> Arc<rhi::pipeline::ComputeShader> {
    let counts = ShaderResourceCounts {
        srvs: 2,
        cbvs: 1,
        samplers: 0,
        uavs: 1,
    };
    adapter
        .create_compute_shader(Shader::new(ShaderStage::Compute, vec![seed; 40], counts))
        .unwrap()
}

#[test]
fn equal_initializers_share_one_pipeline() {
    let (backend, adapter) = common::adapter(1);

    let first = common::graphics_pipeline(&adapter, 3);
    let second = common::graphics_pipeline(&adapter, 3);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(backend.pipeline_compiles(), 1);

    let other = common::graphics_pipeline(&adapter, 4);
    assert_ne!(first.hash(), other.hash());
    assert_eq!(backend.pipeline_compiles(), 2);
}

#[test]
fn fixed_function_state_is_part_of_the_key() {
    let (_backend, adapter) = common::adapter(1);
    let solid = common::graphics_initializer(&adapter, 5);
    let mut wireframe = GraphicsPipelineInitializer {
        bound_shader_state: solid.bound_shader_state.clone(),
        state: solid.state,
    };
    wireframe.state.rasterizer.fill_mode = FillMode::Wireframe;

    let a = adapter.create_graphics_pipeline_state(&solid).unwrap();
    let b = adapter.create_graphics_pipeline_state(&wireframe).unwrap();
    assert_ne!(a.hash(), b.hash());
    assert!(Arc::ptr_eq(a.root_signature(), b.root_signature()));
}

#[test]
fn compute_pipelines_are_cached_by_bytecode() {
    let (backend, adapter) = common::adapter(2);

    let a = adapter.create_compute_pipeline_state(&compute_shader(&adapter, 1)).unwrap();
    let b = adapter.create_compute_pipeline_state(&compute_shader(&adapter, 1)).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(a.get().is_ok());
    assert_eq!(backend.pipeline_compiles(), 1);
}

#[test]
fn pipelines_persist_across_adapters() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();

    let first_backend = common::null_backend(1, true);
    {
        let adapter = Adapter::new(first_backend.clone(), common::cached_config(dir.path())).unwrap();
        common::graphics_pipeline(&adapter, 11);
        let shader = compute_shader(&adapter, 12);
        adapter.create_compute_pipeline_state(&shader).unwrap().get().unwrap();
    }
    assert_eq!(first_backend.pipeline_compiles(), 2);

    let second_backend = common::null_backend(1, true);
    let adapter = Adapter::new(second_backend.clone(), common::cached_config(dir.path())).unwrap();
    assert_eq!(adapter.shared().pipelines().stats().disk_loads, 2);

    let pso = common::graphics_pipeline(&adapter, 11);
    assert!(pso.is_ready());
    let shader = compute_shader(&adapter, 12);
    adapter.create_compute_pipeline_state(&shader).unwrap().get().unwrap();

    let stats = adapter.shared().pipelines().stats();
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.library_loads, 2);
    assert_eq!(second_backend.pipeline_compiles(), 0);
}

#[test]
#[should_panic(expected = "fatal RHI error")]
fn a_removed_device_is_fatal() {
    let (backend, adapter) = common::adapter(1);
    backend.remove_device(DeviceRemovedReason::Hung);
    adapter.check_device_removed();
}
