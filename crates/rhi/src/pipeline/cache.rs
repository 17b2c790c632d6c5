//! The two-tier pipeline state cache.
//!
//! The high-level tier maps a caller's request (which bound shader state, which
//! fixed-function state) straight to a pipeline state. It is keyed by the
//! address of the shader state object, so every hit is checked against the
//! object's unique id: a recycled allocation carries a new id and the entry is
//! re-derived from the low-level tier.
//!
//! The low-level tier is keyed by the combined content hash of the flattened
//! description and owns at most one pipeline state per distinct description.
//! Every low-level entry is also appended to the disk cache, which the next
//! run replays through [`PipelineStateCache::rebuild_from_disk_cache`].

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use super::{
    compiler::{CompileTask, PipelineCompiler},
    desc::{ComputePipelineDesc, FixedFunctionState, GraphicsPipelineDesc, GraphicsPipelineInitializer},
    disk::{AdapterId, DiskCache, RecordFile},
    encode::{CacheReader, Encoding},
    root_signature::RootSignatureManager,
    shader::ComputeShader,
    state::{PipelineKind, PipelineState},
};
use crate::{
    backend::{Backend, NativePipeline, NativePipelineLibrary},
    config::PsoCacheConfig,
    error::RhiResult,
    node::GpuNodeMask,
};

type SharedLibrary = Arc<Mutex<Option<Box<dyn NativePipelineLibrary>>>>;

/// A snapshot of the cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineCacheStats {
    pub high_level_hits: u64,
    pub low_level_hits: u64,
    pub misses: u64,
    /// Pipelines created by the driver from scratch.
    pub native_compiles: u64,
    /// Pipelines loaded from the driver pipeline library.
    pub library_loads: u64,
    /// Descriptions restored from the disk cache.
    pub disk_loads: u64,
}

#[derive(Default)]
struct Counters {
    high_level_hits: AtomicU64,
    low_level_hits: AtomicU64,
    misses: AtomicU64,
    native_compiles: AtomicU64,
    library_loads: AtomicU64,
    disk_loads: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineCacheStats {
        PipelineCacheStats {
            high_level_hits: self.high_level_hits.load(Ordering::Relaxed),
            low_level_hits: self.low_level_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            native_compiles: self.native_compiles.load(Ordering::Relaxed),
            library_loads: self.library_loads.load(Ordering::Relaxed),
            disk_loads: self.disk_loads.load(Ordering::Relaxed),
        }
    }
}

/// The address of a shader state object, plus whatever else selects the
/// pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct GraphicsKey {
    bound_shader_state: usize,
    state_hash: u64,
    node_mask: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct ComputeKey {
    shader: usize,
    node_mask: u32,
}

struct HighLevelEntry {
    unique_id: u64,
    state: Option<FixedFunctionState>,
    pso: Arc<PipelineState>,
}

impl HighLevelEntry {
    fn matches(&self, unique_id: u64, state: Option<&FixedFunctionState>) -> bool {
        self.unique_id == unique_id && self.state.as_ref() == state
    }
}

#[derive(Default)]
struct CacheMaps {
    graphics_high: HashMap<GraphicsKey, HighLevelEntry>,
    compute_high: HashMap<ComputeKey, HighLevelEntry>,
    graphics: HashMap<u64, Vec<(GraphicsPipelineDesc, Arc<PipelineState>)>>,
    compute: HashMap<u64, Vec<(ComputePipelineDesc, Arc<PipelineState>)>>,
    disk: Option<DiskCache>,
}

impl CacheMaps {
    fn find_graphics(&self, hash: u64, desc: &GraphicsPipelineDesc) -> Option<&Arc<PipelineState>> {
        self.graphics
            .get(&hash)
            .and_then(|bucket| bucket.iter().find(|(d, _)| d == desc))
            .map(|(_, pso)| pso)
    }

    fn find_compute(&self, hash: u64, desc: &ComputePipelineDesc) -> Option<&Arc<PipelineState>> {
        self.compute
            .get(&hash)
            .and_then(|bucket| bucket.iter().find(|(d, _)| d == desc))
            .map(|(_, pso)| pso)
    }

    fn persist(&mut self, file: RecordFile, encode: impl FnOnce(&mut Vec<u8>)) {
        if let Some(disk) = self.disk.as_mut().filter(|disk| disk.is_enabled()) {
            let mut record = Vec::new();
            encode(&mut record);
            disk.append(file, &record);
        }
    }
}

/// What a compile worker is asked to build.
enum CompileRequest {
    Graphics(GraphicsPipelineDesc),
    Compute(ComputePipelineDesc),
}

impl CompileRequest {
    fn load(
        &self,
        library: &mut dyn NativePipelineLibrary,
        name: &str,
    ) -> RhiResult<Option<Arc<dyn NativePipeline>>> {
        match self {
            Self::Graphics(desc) => library.load_graphics(name, desc),
            Self::Compute(desc) => library.load_compute(name, desc),
        }
    }

    fn create(&self, backend: &dyn Backend) -> RhiResult<Arc<dyn NativePipeline>> {
        match self {
            Self::Graphics(desc) => backend.create_graphics_pipeline(desc),
            Self::Compute(desc) => backend.create_compute_pipeline(desc),
        }
    }

    fn into_task(
        self,
        name: String,
        backend: Arc<dyn Backend>,
        library: SharedLibrary,
        counters: Arc<Counters>,
    ) -> CompileTask {
        Box::new(move || {
            if let Some(library) = library.lock().as_mut() {
                match self.load(&mut **library, &name) {
                    Ok(Some(pipeline)) => {
                        Counters::bump(&counters.library_loads);
                        return Ok(pipeline);
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("pipeline library lookup of {name} failed: {e}"),
                }
            }

            let pipeline = self.create(&*backend)?;
            Counters::bump(&counters.native_compiles);

            if let Some(library) = library.lock().as_mut() {
                if let Err(e) = library.store(&name, &*pipeline) {
                    log::warn!("could not store {name} in the pipeline library: {e}");
                }
            }

            Ok(pipeline)
        })
    }
}

fn library_name(hash: u64) -> String {
    format!("{hash:016x}")
}

/// Deduplicates and compiles pipeline states, persisting them between runs.
///
/// One coarse lock covers both tiers and the disk writer. Compiles run
/// outside the lock, on the compile workers when asynchronous compilation is
/// enabled.
pub struct PipelineStateCache {
    backend: Arc<dyn Backend>,
    maps: Mutex<CacheMaps>,
    compiler: Mutex<Option<PipelineCompiler>>,
    library: SharedLibrary,
    counters: Arc<Counters>,
}

impl PipelineStateCache {
    /// Opens the disk cache (when enabled) and the driver pipeline library
    /// (when enabled and supported).
    ///
    /// ## Errors
    ///
    /// Fails only if the compile workers cannot be started. Disk cache
    /// problems are logged and leave the cache memory-only.
    pub fn new(backend: Arc<dyn Backend>, config: &PsoCacheConfig, adapter: AdapterId) -> RhiResult<Self> {
        let wants_library = config.use_pipeline_library && backend.supports_pipeline_library();

        let mut disk = config
            .enabled
            .then(|| DiskCache::open(&config.directory, wants_library, adapter));

        let library = if wants_library {
            let blob = disk.as_ref().map_or(&[][..], DiskCache::driver_blob);
            match backend.create_pipeline_library(blob) {
                Ok(library) => Some(library),
                Err(e) => {
                    log::warn!("could not open the pipeline library: {e}; starting an empty one");
                    if let Some(disk) = disk.as_mut() {
                        disk.set_driver_blob(Vec::new());
                    }
                    backend
                        .create_pipeline_library(&[])
                        .map_err(|e| log::warn!("pipeline library unavailable: {e}"))
                        .ok()
                }
            }
        } else {
            None
        };

        let compiler = if config.async_compile {
            Some(PipelineCompiler::new(config.compile_threads)?)
        } else {
            None
        };

        Ok(Self {
            backend,
            maps: Mutex::new(CacheMaps {
                disk,
                ..CacheMaps::default()
            }),
            compiler: Mutex::new(compiler),
            library: Arc::new(Mutex::new(library)),
            counters: Arc::new(Counters::default()),
        })
    }

    #[must_use]
    pub fn stats(&self) -> PipelineCacheStats {
        self.counters.snapshot()
    }

    /// The number of distinct pipeline states in the low-level tier.
    #[must_use]
    pub fn len(&self) -> usize {
        let maps = self.maps.lock();
        maps.graphics.values().map(Vec::len).sum::<usize>() + maps.compute.values().map(Vec::len).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether pipeline states are currently being persisted.
    #[must_use]
    pub fn is_disk_cache_enabled(&self) -> bool {
        self.maps
            .lock()
            .disk
            .as_ref()
            .map_or(false, DiskCache::is_enabled)
    }

    /// Returns the pipeline state for `initializer`, compiling it on a miss.
    ///
    /// The returned state may still be compiling; [`PipelineState::get`]
    /// blocks until it is ready.
    pub fn find_graphics(
        &self,
        initializer: &GraphicsPipelineInitializer,
        node_mask: GpuNodeMask,
    ) -> RhiResult<Arc<PipelineState>> {
        let bss = &initializer.bound_shader_state;
        let key = GraphicsKey {
            bound_shader_state: Arc::as_ptr(bss) as usize,
            state_hash: initializer.state.hash(),
            node_mask: node_mask.bits(),
        };

        let mut maps = self.maps.lock();

        if let Some(entry) = maps.graphics_high.get(&key) {
            if entry.matches(bss.unique_id(), Some(&initializer.state)) {
                Counters::bump(&self.counters.high_level_hits);
                return Ok(entry.pso.clone());
            }
            log::trace!(
                "stale high-level pipeline entry for shader state {} (was {})",
                bss.unique_id(),
                entry.unique_id
            );
        }

        let desc = GraphicsPipelineDesc::from_initializer(initializer, node_mask);
        let hash = desc.combined_hash();

        let (pso, compile) = match maps.find_graphics(hash, &desc) {
            Some(pso) => {
                Counters::bump(&self.counters.low_level_hits);
                (pso.clone(), None)
            }
            None => {
                Counters::bump(&self.counters.misses);
                log::debug!("pipeline cache miss for graphics state {hash:016x}");

                let pso = PipelineState::new(PipelineKind::Graphics, hash, desc.root_signature.clone());
                maps.persist(RecordFile::Graphics, |record| desc.encode(record, Encoding::Disk));
                maps.graphics
                    .entry(hash)
                    .or_default()
                    .push((desc.clone(), pso.clone()));
                (pso, Some(CompileRequest::Graphics(desc)))
            }
        };

        maps.graphics_high.insert(
            key,
            HighLevelEntry {
                unique_id: bss.unique_id(),
                state: Some(initializer.state),
                pso: pso.clone(),
            },
        );
        drop(maps);

        if let Some(request) = compile {
            self.compile(&pso, request);
        }

        Ok(pso)
    }

    /// Returns the pipeline state for `shader`, compiling it on a miss.
    pub fn find_compute(&self, shader: &Arc<ComputeShader>, node_mask: GpuNodeMask) -> RhiResult<Arc<PipelineState>> {
        let key = ComputeKey {
            shader: Arc::as_ptr(shader) as usize,
            node_mask: node_mask.bits(),
        };

        let mut maps = self.maps.lock();

        if let Some(entry) = maps.compute_high.get(&key) {
            if entry.matches(shader.unique_id(), None) {
                Counters::bump(&self.counters.high_level_hits);
                return Ok(entry.pso.clone());
            }
        }

        let desc = ComputePipelineDesc::from_shader(shader, node_mask);
        let hash = desc.combined_hash();

        let (pso, compile) = match maps.find_compute(hash, &desc) {
            Some(pso) => {
                Counters::bump(&self.counters.low_level_hits);
                (pso.clone(), None)
            }
            None => {
                Counters::bump(&self.counters.misses);
                log::debug!("pipeline cache miss for compute state {hash:016x}");

                let pso = PipelineState::new(PipelineKind::Compute, hash, desc.root_signature.clone());
                maps.persist(RecordFile::Compute, |record| desc.encode(record, Encoding::Disk));
                maps.compute
                    .entry(hash)
                    .or_default()
                    .push((desc.clone(), pso.clone()));
                (pso, Some(CompileRequest::Compute(desc)))
            }
        };

        maps.compute_high.insert(
            key,
            HighLevelEntry {
                unique_id: shader.unique_id(),
                state: None,
                pso: pso.clone(),
            },
        );
        drop(maps);

        if let Some(request) = compile {
            self.compile(&pso, request);
        }

        Ok(pso)
    }

    fn compile(&self, pso: &Arc<PipelineState>, request: CompileRequest) {
        if !pso.begin_compile() {
            return;
        }

        let task = request.into_task(
            library_name(pso.hash()),
            self.backend.clone(),
            self.library.clone(),
            self.counters.clone(),
        );

        match &*self.compiler.lock() {
            Some(compiler) => compiler.submit(pso.clone(), task),
            None => pso.complete(task()),
        }
    }

    /// Restores every description in the disk cache into the low-level tier
    /// and starts compiling them. Root signatures are recreated from their
    /// stored blobs through `root_signatures`.
    ///
    /// A record that fails to decode means the file is corrupted: the disk
    /// cache is cleared and disabled, and nothing further is restored.
    pub fn rebuild_from_disk_cache(&self, root_signatures: &RootSignatureManager) -> usize {
        let mut maps = self.maps.lock();
        let Some(disk) = maps.disk.as_mut().filter(|disk| disk.is_enabled()) else {
            return 0;
        };

        let graphics = decode_records(disk, RecordFile::Graphics, |reader| {
            GraphicsPipelineDesc::decode(reader, |r| root_signatures.decode(r))
        });
        let compute = decode_records(disk, RecordFile::Compute, |reader| {
            ComputePipelineDesc::decode(reader, |r| root_signatures.decode(r))
        });

        let (Some(graphics), Some(compute)) = (graphics, compute) else {
            log::warn!("pipeline disk cache is corrupted; clearing and disabling it");
            disk.disable();
            return 0;
        };

        let mut pending = Vec::with_capacity(graphics.len() + compute.len());

        for desc in graphics {
            let hash = desc.combined_hash();
            if maps.find_graphics(hash, &desc).is_some() {
                continue;
            }
            let pso = PipelineState::new(PipelineKind::Graphics, hash, desc.root_signature.clone());
            maps.graphics
                .entry(hash)
                .or_default()
                .push((desc.clone(), pso.clone()));
            pending.push((pso, CompileRequest::Graphics(desc)));
        }

        for desc in compute {
            let hash = desc.combined_hash();
            if maps.find_compute(hash, &desc).is_some() {
                continue;
            }
            let pso = PipelineState::new(PipelineKind::Compute, hash, desc.root_signature.clone());
            maps.compute
                .entry(hash)
                .or_default()
                .push((desc.clone(), pso.clone()));
            pending.push((pso, CompileRequest::Compute(desc)));
        }
        drop(maps);

        let restored = pending.len();
        self.counters
            .disk_loads
            .fetch_add(restored as u64, Ordering::Relaxed);
        log::info!("restored {restored} pipeline states from the disk cache");

        for (pso, request) in pending {
            self.compile(&pso, request);
        }

        restored
    }

    /// Writes new records and the driver pipeline library to disk.
    ///
    /// ## Errors
    ///
    /// Returns the I/O error if a file could not be written. The cache keeps
    /// working in memory.
    pub fn flush_to_disk(&self) -> RhiResult<()> {
        let mut maps = self.maps.lock();
        let Some(disk) = maps.disk.as_mut().filter(|disk| disk.is_enabled()) else {
            return Ok(());
        };

        if let Some(library) = self.library.lock().as_ref() {
            if !library.is_empty() {
                match library.serialize() {
                    Ok(blob) => disk.set_driver_blob(blob),
                    Err(e) => log::warn!("could not serialize the pipeline library: {e}"),
                }
            }
        }

        disk.flush()?;
        log::debug!("flushed pipeline cache to {}", disk.directory().display());
        Ok(())
    }

    /// Waits for every queued compile, then persists the cache.
    pub fn close(&self) -> RhiResult<()> {
        drop(self.compiler.lock().take());
        self.flush_to_disk()
    }
}

impl Drop for PipelineStateCache {
    fn drop(&mut self) {
        drop(self.compiler.get_mut().take());
    }
}

fn decode_records<T>(
    disk: &DiskCache,
    file: RecordFile,
    mut decode: impl FnMut(&mut CacheReader) -> Option<T>,
) -> Option<Vec<T>> {
    let mut descs = Vec::with_capacity(disk.len(file) as usize);
    for record in disk.records(file) {
        let record = record.map_err(|e| log::warn!("{e}")).ok()?;
        let mut reader = CacheReader::new(record);
        let desc = decode(&mut reader)?;
        if reader.has_error() || reader.remaining() != 0 {
            return None;
        }
        descs.push(desc);
    }
    Some(descs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::null::{NullBackend, NullOptions},
        descriptor::ResourceBindingTier,
        pipeline::{
            desc::{FillMode, InputElement},
            disk::{COMPUTE_FILE, HEADER_SIZE},
            root_signature::QuantizedBoundShaderState,
            shader::{BoundShaderState, Shader, ShaderResourceCounts, ShaderStage},
        },
        format::Format,
    };

    const ADAPTER: AdapterId = AdapterId {
        vendor_id: 1,
        device_id: 2,
    };

    struct Fixture {
        backend: Arc<NullBackend>,
        root_signatures: RootSignatureManager,
    }

    impl Fixture {
        fn new(pipeline_library: bool) -> Self {
            let backend = Arc::new(NullBackend::with_options(NullOptions {
                pipeline_library,
                ..NullOptions::default()
            }));
            let root_signatures = RootSignatureManager::new(
                backend.clone(),
                GpuNodeMask::first_n(1),
                ResourceBindingTier::Tier3,
            );
            Self {
                backend,
                root_signatures,
            }
        }

        fn bound_shader_state(&self, seed: u8) -> Arc<BoundShaderState> {
            let counts = ShaderResourceCounts {
                srvs: 1,
                cbvs: 1,
                samplers: 1,
                uavs: 0,
            };
            let stages = [
                Some(Shader::new(ShaderStage::Vertex, vec![seed; 32], counts)),
                None,
                None,
                None,
                Some(Shader::new(ShaderStage::Pixel, vec![seed + 1; 48], counts)),
            ];
            let quantized =
                QuantizedBoundShaderState::for_graphics(&stages, true, false, ResourceBindingTier::Tier3);
            let rs = self.root_signatures.get_or_create(&quantized).unwrap();
            let layout = vec![InputElement {
                semantic_name: "POSITION".into(),
                semantic_index: 0,
                format: Format::R32G32B32Float,
                input_slot: 0,
                aligned_byte_offset: 0,
                per_instance: false,
                instance_step_rate: 0,
            }];
            Arc::new(BoundShaderState::new(stages, layout, None, rs))
        }

        fn cache(&self, config: &PsoCacheConfig) -> PipelineStateCache {
            PipelineStateCache::new(self.backend.clone(), config, ADAPTER).unwrap()
        }
    }

    fn memory_only() -> PsoCacheConfig {
        PsoCacheConfig {
            enabled: false,
            async_compile: false,
            ..PsoCacheConfig::default()
        }
    }

    #[test]
    fn repeated_lookups_hit_the_high_level_tier() {
        let fixture = Fixture::new(false);
        let cache = fixture.cache(&memory_only());
        let bss = fixture.bound_shader_state(1);
        let init = GraphicsPipelineInitializer {
            bound_shader_state: bss,
            state: FixedFunctionState::default(),
        };

        let a = cache.find_graphics(&init, GpuNodeMask::first_n(1)).unwrap();
        let b = cache.find_graphics(&init, GpuNodeMask::first_n(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.get().is_ok());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.high_level_hits, 1);
        assert_eq!(stats.native_compiles, 1);
    }

    #[test]
    fn identical_content_shares_a_low_level_entry() {
        let fixture = Fixture::new(false);
        let cache = fixture.cache(&memory_only());

        // Two shader state objects built from equal bytecode.
        let first = GraphicsPipelineInitializer {
            bound_shader_state: fixture.bound_shader_state(5),
            state: FixedFunctionState::default(),
        };
        let second = GraphicsPipelineInitializer {
            bound_shader_state: fixture.bound_shader_state(5),
            state: FixedFunctionState::default(),
        };

        let a = cache.find_graphics(&first, GpuNodeMask::first_n(1)).unwrap();
        let b = cache.find_graphics(&second, GpuNodeMask::first_n(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats().low_level_hits, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn stale_high_level_entry_is_rederived() {
        let fixture = Fixture::new(false);
        let cache = fixture.cache(&memory_only());
        let init = GraphicsPipelineInitializer {
            bound_shader_state: fixture.bound_shader_state(2),
            state: FixedFunctionState::default(),
        };

        let first = cache.find_graphics(&init, GpuNodeMask::first_n(1)).unwrap();

        // Pretend the slot was recycled by a different shader state.
        for entry in cache.maps.lock().graphics_high.values_mut() {
            entry.unique_id = u64::MAX;
        }

        let second = cache.find_graphics(&init, GpuNodeMask::first_n(1)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = cache.stats();
        assert_eq!(stats.high_level_hits, 0);
        assert_eq!(stats.low_level_hits, 1);
        assert_eq!(stats.misses, 1);

        let third = cache.find_graphics(&init, GpuNodeMask::first_n(1)).unwrap();
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(cache.stats().high_level_hits, 1);
    }

    #[test]
    fn fixed_function_state_selects_the_pipeline() {
        let fixture = Fixture::new(false);
        let cache = fixture.cache(&memory_only());
        let bss = fixture.bound_shader_state(3);

        let mut wireframe = FixedFunctionState::default();
        wireframe.rasterizer.fill_mode = FillMode::Wireframe;

        let solid = cache
            .find_graphics(
                &GraphicsPipelineInitializer {
                    bound_shader_state: bss.clone(),
                    state: FixedFunctionState::default(),
                },
                GpuNodeMask::first_n(1),
            )
            .unwrap();
        let wire = cache
            .find_graphics(
                &GraphicsPipelineInitializer {
                    bound_shader_state: bss,
                    state: wireframe,
                },
                GpuNodeMask::first_n(1),
            )
            .unwrap();

        assert!(!Arc::ptr_eq(&solid, &wire));
        assert_ne!(solid.hash(), wire.hash());
    }

    #[test]
    fn disk_cache_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = PsoCacheConfig {
            directory: dir.path().to_path_buf(),
            async_compile: true,
            compile_threads: 2,
            ..PsoCacheConfig::default()
        };

        let fixture = Fixture::new(true);
        {
            let cache = fixture.cache(&config);
            let init = GraphicsPipelineInitializer {
                bound_shader_state: fixture.bound_shader_state(9),
                state: FixedFunctionState::default(),
            };
            cache
                .find_graphics(&init, GpuNodeMask::first_n(1))
                .unwrap()
                .get()
                .unwrap();
            cache.close().unwrap();
        }
        assert_eq!(fixture.backend.pipeline_compiles(), 1);

        // A new process: fresh root signatures, fresh shader objects.
        let restarted = Fixture::new(true);
        let cache = restarted.cache(&config);
        assert_eq!(cache.rebuild_from_disk_cache(&restarted.root_signatures), 1);

        let init = GraphicsPipelineInitializer {
            bound_shader_state: restarted.bound_shader_state(9),
            state: FixedFunctionState::default(),
        };
        let pso = cache.find_graphics(&init, GpuNodeMask::first_n(1)).unwrap();
        assert!(pso.get().is_ok());

        let stats = cache.stats();
        assert_eq!(stats.low_level_hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.disk_loads, 1);
        assert_eq!(stats.library_loads, 1);
        assert_eq!(restarted.backend.pipeline_compiles(), 0);
    }

    #[test]
    fn corrupted_disk_cache_disables_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let config = PsoCacheConfig {
            directory: dir.path().to_path_buf(),
            async_compile: false,
            ..PsoCacheConfig::default()
        };

        let fixture = Fixture::new(false);
        {
            let cache = fixture.cache(&config);
            let shader = Shader::new(ShaderStage::Compute, vec![4u8; 16], ShaderResourceCounts::default());
            let rs = fixture
                .root_signatures
                .get_or_create(&QuantizedBoundShaderState::for_compute(&shader, ResourceBindingTier::Tier3))
                .unwrap();
            let cs = Arc::new(ComputeShader::new(shader, rs));
            cache.find_compute(&cs, GpuNodeMask::first_n(1)).unwrap();
            cache.close().unwrap();
        }

        // Keep the header intact but make the first record's input layout
        // flag an invalid bool: past the record length and the root
        // signature's quantized resource counts.
        let path = dir.path().join(COMPUTE_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 4 + 96] = 7;
        std::fs::write(&path, &bytes).unwrap();

        let restarted = Fixture::new(false);
        let cache = restarted.cache(&config);
        assert_eq!(cache.rebuild_from_disk_cache(&restarted.root_signatures), 0);
        assert!(!cache.is_disk_cache_enabled());
    }
}
