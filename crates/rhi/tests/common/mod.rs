#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use rhi::{
    backend::null::{NullBackend, NullOptions},
    pipeline::{
        FixedFunctionState, GraphicsPipelineInitializer, InputElement, Shader, ShaderResourceCounts, ShaderStage,
    },
    Adapter, MultiGpuMode, PipelineState, PsoCacheConfig, RhiConfig,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config(nodes: u32) -> RhiConfig {
    RhiConfig {
        multi_gpu: if nodes > 1 {
            MultiGpuMode::AlternateFrame
        } else {
            MultiGpuMode::Disabled
        },
        num_worker_contexts: 2,
        pso_cache: PsoCacheConfig {
            enabled: false,
            async_compile: false,
            ..PsoCacheConfig::default()
        },
        ..RhiConfig::default()
    }
}

pub fn cached_config(directory: &Path) -> RhiConfig {
    RhiConfig {
        pso_cache: PsoCacheConfig {
            enabled: true,
            directory: directory.to_path_buf(),
            async_compile: true,
            compile_threads: 2,
            use_pipeline_library: true,
        },
        ..config(1)
    }
}

pub fn null_backend(nodes: u32, auto_complete: bool) -> Arc<NullBackend> {
    Arc::new(NullBackend::with_options(NullOptions {
        node_count: nodes,
        auto_complete,
        pipeline_library: true,
        ..NullOptions::default()
    }))
}

pub fn adapter(nodes: u32) -> (Arc<NullBackend>, Adapter) {
    init_logging();
    let backend = null_backend(nodes, true);
    let adapter = Adapter::new(backend.clone(), config(nodes)).unwrap();
    (backend, adapter)
}

/// A vertex and pixel shader pair with one texture, sampler and constant
/// buffer each. Equal seeds produce equal bytecode.
pub fn graphics_initializer(adapter: &Adapter, seed: u8) -> GraphicsPipelineInitializer {
    let counts = ShaderResourceCounts {
        srvs: 1,
        cbvs: 1,
        samplers: 1,
        uavs: 0,
    };
    let stages = [
        Some(Shader::new(ShaderStage::Vertex, vec![seed; 64], counts)),
        None,
        None,
        None,
        Some(Shader::new(ShaderStage::Pixel, vec![seed.wrapping_add(1); 96], counts)),
    ];
    let layout = vec![InputElement {
        semantic_name: "POSITION".into(),
        semantic_index: 0,
        format: rhi::Format::R32G32B32Float,
        input_slot: 0,
        aligned_byte_offset: 0,
        per_instance: false,
        instance_step_rate: 0,
    }];

    GraphicsPipelineInitializer {
        bound_shader_state: adapter.create_bound_shader_state(stages, layout, None).unwrap(),
        state: FixedFunctionState::default(),
    }
}

pub fn graphics_pipeline(adapter: &Adapter, seed: u8) -> Arc<PipelineState> {
    let pso = adapter
        .create_graphics_pipeline_state(&graphics_initializer(adapter, seed))
        .unwrap();
    pso.get().unwrap();
    pso
}
