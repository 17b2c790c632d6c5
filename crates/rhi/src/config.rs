use std::path::PathBuf;

use crate::error::FatalPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerPreference {
    LowPower,
    HighPerformance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MultiGpuMode {
    /// Only node 0 of the adapter is used.
    Disabled,
    /// Successive frames are rendered by successive nodes.
    AlternateFrame,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchingMode {
    /// Command lists handed over by worker contexts are executed immediately.
    Normal,
    /// Command lists are held back until the queue goes idle or the batch is
    /// explicitly ended, trading latency for fewer submissions.
    Aggressive,
}

/// Per-heap-type descriptor capacities, overriding the binding tier budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorHeapSizes {
    pub render_target: u32,
    pub depth_stencil: u32,
    pub view: u32,
    pub sampler: u32,
}

#[derive(Clone, Debug)]
pub struct PsoCacheConfig {
    /// Whether compiled pipeline states are persisted between runs.
    ///
    /// Defaults to `true`.
    pub enabled: bool,

    /// Where the cache files live. Defaults to `pso_cache` under the working
    /// directory.
    pub directory: PathBuf,

    /// Whether missed pipeline states are compiled on worker threads. Callers
    /// still block in `PipelineState::get` until the state is ready.
    ///
    /// Defaults to `true`.
    pub async_compile: bool,

    /// The number of compile worker threads. Defaults to 2.
    pub compile_threads: usize,

    /// Whether compiled pipelines are stored in a driver pipeline library
    /// when the backend supports one. Defaults to `true`.
    pub use_pipeline_library: bool,
}

impl Default for PsoCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("pso_cache"),
            async_compile: true,
            compile_threads: 2,
            use_pipeline_library: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RhiConfig {
    /// The power preference used when enumerating adapters.
    ///
    /// Setting `LowPower` mode prefers integrated GPUs over discrete GPUs, and
    /// setting `HighPerformance` does the reverse. Defaults to
    /// `HighPerformance`.
    pub power_preference: PowerPreference,

    /// Whether or not to enable the native debug layer.
    ///
    /// This may have an outsized impact on performance. Defaults to `None`,
    /// which automatically enables debugging features in debug builds. Override
    /// with `Some(true)` or `Some(false)` to force enable or disable debugging.
    pub debug_mode: Option<bool>,

    /// How the nodes of a linked adapter are used. Defaults to `Disabled`.
    pub multi_gpu: MultiGpuMode,

    /// Upper bound on the number of nodes initialized, clamped to
    /// `MAX_NUM_GPUS`. Defaults to `MAX_NUM_GPUS`.
    pub max_gpu_nodes: u32,

    /// How worker-context command lists are submitted. Defaults to `Normal`.
    pub batching: BatchingMode,

    /// The number of worker contexts created per device. Defaults to 4.
    pub num_worker_contexts: u32,

    /// The number of async compute contexts created per device. Defaults to 1.
    pub num_async_compute_contexts: u32,

    pub pso_cache: PsoCacheConfig,

    /// Overrides the descriptor heap sizes derived from the resource binding
    /// tier. Defaults to `None`.
    pub descriptor_heaps: Option<DescriptorHeapSizes>,

    /// The number of shader-visible descriptors each context may use per
    /// frame. Defaults to 4096.
    pub online_descriptors_per_context: u32,

    /// The size of each device's ring buffer for per-frame uploads.
    ///
    /// Defaults to 4 Mib.
    pub upload_heap_size: u64,

    /// What happens after a fatal error is logged. Defaults to `Panic`.
    pub fatal_policy: FatalPolicy,

    /// Whether temporal effects are synchronized across nodes under
    /// alternate-frame rendering. Defaults to `true`.
    pub afr_sync_temporal_resources: bool,
}

impl RhiConfig {
    /// Resolves `debug_mode` against the build profile.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.debug_mode.unwrap_or(cfg!(debug_assertions))
    }
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::HighPerformance,
            debug_mode: None,
            multi_gpu: MultiGpuMode::Disabled,
            max_gpu_nodes: crate::node::MAX_NUM_GPUS as u32,
            batching: BatchingMode::Normal,
            num_worker_contexts: 4,
            num_async_compute_contexts: 1,
            pso_cache: PsoCacheConfig::default(),
            descriptor_heaps: None,
            online_descriptors_per_context: 4096,
            upload_heap_size: 4 * 1024 * 1024,
            fatal_policy: FatalPolicy::Panic,
            afr_sync_temporal_resources: true,
        }
    }
}
