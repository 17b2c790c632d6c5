//! The adapter: the set of GPU nodes driven together, and the state they
//! share.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
    backend::{AdapterDesc, Backend, FeatureLevel},
    command::CommandContextRedirector,
    config::{MultiGpuMode, RhiConfig},
    debug::MessageFilter,
    deferred_deletion::DeferredDeletionQueue,
    descriptor::ResourceBindingTier,
    device::{find_device, Device},
    error::{terminate, verify, RhiError, RhiResult},
    fence::Fence,
    node::{GpuNodeMask, LinkedObject, NodeIndex, MAX_NUM_GPUS},
    pipeline::{
        disk::AdapterId, BoundShaderState, ComputeShader, GraphicsPipelineInitializer, InputElement,
        PipelineState, PipelineStateCache, QuantizedBoundShaderState, RootSignatureManager, Shader,
        StreamOutput,
    },
    temporal::TemporalEffect,
};

/// State owned by the adapter and shared with its devices.
pub struct AdapterShared {
    backend: Arc<dyn Backend>,
    config: RhiConfig,
    desc: AdapterDesc,
    feature_level: FeatureLevel,
    binding_tier: ResourceBindingTier,
    active_nodes: GpuNodeMask,
    current_node: AtomicU32,
    root_signatures: RootSignatureManager,
    pipelines: PipelineStateCache,
    frame_fence: Arc<Fence>,
    deletion: Arc<DeferredDeletionQueue>,
    temporal_effects: Mutex<HashMap<String, Arc<TemporalEffect>>>,
    debug_filter: MessageFilter,
}

impl AdapterShared {
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    #[must_use]
    pub fn config(&self) -> &RhiConfig {
        &self.config
    }

    #[must_use]
    pub fn desc(&self) -> &AdapterDesc {
        &self.desc
    }

    #[must_use]
    pub fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    #[must_use]
    pub fn binding_tier(&self) -> ResourceBindingTier {
        self.binding_tier
    }

    /// The nodes a device was created for.
    #[must_use]
    pub fn active_nodes(&self) -> GpuNodeMask {
        self.active_nodes
    }

    /// The node rendering the current frame.
    #[must_use]
    pub fn current_node(&self) -> NodeIndex {
        NodeIndex(self.current_node.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn root_signatures(&self) -> &RootSignatureManager {
        &self.root_signatures
    }

    #[must_use]
    pub fn pipelines(&self) -> &PipelineStateCache {
        &self.pipelines
    }

    /// Signalled on every node's direct queue at the end of each frame.
    #[must_use]
    pub fn frame_fence(&self) -> &Arc<Fence> {
        &self.frame_fence
    }

    #[must_use]
    pub fn deletion(&self) -> &Arc<DeferredDeletionQueue> {
        &self.deletion
    }

    /// Returns the effect called `name`, creating it on first use.
    pub fn temporal_effect(&self, name: &str) -> RhiResult<Arc<TemporalEffect>> {
        let mut effects = self.temporal_effects.lock();
        if let Some(effect) = effects.get(name) {
            return Ok(effect.clone());
        }

        let effect = Arc::new(TemporalEffect::new(&*self.backend, name, self.active_nodes)?);
        effects.insert(name.to_owned(), effect.clone());
        Ok(effect)
    }
}

impl fmt::Debug for AdapterShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterShared")
            .field("desc", &self.desc)
            .field("feature_level", &self.feature_level)
            .field("binding_tier", &self.binding_tier)
            .field("active_nodes", &self.active_nodes)
            .field("current_node", &self.current_node())
            .finish_non_exhaustive()
    }
}

/// Owns a device per active node and drives frames across them.
///
/// Under alternate frame rendering each frame is recorded on the next active
/// node in turn; otherwise only node 0 is used.
pub struct Adapter {
    shared: Arc<AdapterShared>,
    devices: SmallVec<[Device; MAX_NUM_GPUS]>,
    redirector: CommandContextRedirector,
    cleaned_up: bool,
}

impl Adapter {
    pub fn new(backend: Arc<dyn Backend>, config: RhiConfig) -> RhiResult<Self> {
        let desc = backend.adapter_desc();
        let node_count = backend.node_count().max(1);

        let num_active = match config.multi_gpu {
            MultiGpuMode::Disabled => 1,
            MultiGpuMode::AlternateFrame => node_count
                .min(config.max_gpu_nodes.max(1))
                .min(MAX_NUM_GPUS as u32),
        };
        let active_nodes = GpuNodeMask::first_n(num_active);

        log::info!(
            "using adapter {} ({:04x}:{:04x}, {} MiB) with {num_active} of {node_count} nodes",
            desc.name,
            desc.vendor_id,
            desc.device_id,
            desc.dedicated_video_memory >> 20
        );

        let binding_tier = backend.resource_binding_tier();
        let frame_fence = Arc::new(Fence::new(&*backend, "frame", active_nodes, 0)?);
        let adapter_id = AdapterId {
            vendor_id: desc.vendor_id,
            device_id: desc.device_id,
        };

        let shared = Arc::new(AdapterShared {
            feature_level: backend.feature_level(),
            root_signatures: RootSignatureManager::new(backend.clone(), active_nodes, binding_tier),
            pipelines: PipelineStateCache::new(backend.clone(), &config.pso_cache, adapter_id)?,
            deletion: Arc::new(DeferredDeletionQueue::new(frame_fence.clone())),
            current_node: AtomicU32::new(0),
            temporal_effects: Mutex::default(),
            debug_filter: MessageFilter::default(),
            backend,
            config,
            desc,
            binding_tier,
            active_nodes,
            frame_fence,
        });

        let devices = Self::initialize_devices(&shared)?;
        let redirector = CommandContextRedirector::new(
            devices
                .iter()
                .map(|device| (device.node(), device.default_context().clone())),
        );

        shared.pipelines.rebuild_from_disk_cache(&shared.root_signatures);

        Ok(Self {
            shared,
            devices,
            redirector,
            cleaned_up: false,
        })
    }

    /// Creates a device for every active node, node 0 first.
    fn initialize_devices(shared: &Arc<AdapterShared>) -> RhiResult<SmallVec<[Device; MAX_NUM_GPUS]>> {
        shared
            .active_nodes
            .nodes()
            .map(|node| Device::new(shared.clone(), node))
            .collect()
    }

    #[must_use]
    pub fn shared(&self) -> &Arc<AdapterShared> {
        &self.shared
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.shared.backend
    }

    #[must_use]
    pub fn config(&self) -> &RhiConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn active_nodes(&self) -> GpuNodeMask {
        self.shared.active_nodes
    }

    #[must_use]
    pub fn current_node(&self) -> NodeIndex {
        self.shared.current_node()
    }

    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device_for(&self, node: NodeIndex) -> RhiResult<&Device> {
        find_device(&self.devices, node)
    }

    /// The device rendering the current frame.
    pub fn current_device(&self) -> RhiResult<&Device> {
        self.device_for(self.current_node())
    }

    #[must_use]
    pub fn redirector(&self) -> &CommandContextRedirector {
        &self.redirector
    }

    /// Calls `factory` once per active node and links the results.
    pub fn create_linked_object<T>(&self, factory: impl FnMut(NodeIndex) -> RhiResult<T>) -> RhiResult<LinkedObject<T>> {
        LinkedObject::create(self.shared.active_nodes, factory)
    }

    /// Moves rendering to the next active node, wrapping around. Does nothing
    /// unless alternate frame rendering is on.
    pub fn switch_to_next_gpu(&self) -> GpuNodeMask {
        let active = self.shared.active_nodes;
        let current = self.current_node();

        if self.shared.config.multi_gpu != MultiGpuMode::AlternateFrame || active.count() < 2 {
            return current.mask();
        }

        let next = active
            .next_after(current)
            .or_else(|| active.first())
            .unwrap_or(current);
        self.shared.current_node.store(next.0, Ordering::Release);
        log::trace!("switched rendering from {current} to {next}");
        next.mask()
    }

    pub fn begin_frame(&self) -> RhiResult<()> {
        for device in &self.devices {
            device.default_context().lock().begin_frame()?;
        }
        Ok(())
    }

    /// Submits the frame on every node, signals the frame fence and releases
    /// objects the GPU has finished with.
    pub fn end_frame(&self) -> RhiResult<()> {
        for device in &self.devices {
            device.default_context().lock().end_frame()?;
        }

        let value = self.shared.frame_fence.signal_all(
            self.devices
                .iter()
                .map(|device| &**device.core().direct().queue()),
        )?;

        let released = self.shared.deletion.release_completed();
        log::trace!("frame {value} submitted, released {released} deferred objects");

        if self.shared.config.is_debug() {
            self.shared.debug_filter.report(&*self.shared.backend);
        }
        self.check_device_removed();

        let mask = self.switch_to_next_gpu();
        self.redirector.set_gpu_mask(mask);
        Ok(())
    }

    /// Blocks until every queue of every device has drained.
    pub fn block_until_idle(&self) -> RhiResult<()> {
        for device in &self.devices {
            device.wait_for_idle()?;
        }
        Ok(())
    }

    /// Terminates if the driver has removed the device.
    pub fn check_device_removed(&self) {
        if let Some(reason) = self.shared.backend.device_removed_reason() {
            terminate(
                &RhiError::DeviceRemoved(reason),
                "Adapter::check_device_removed",
                self.shared.config.fatal_policy,
            );
        }
    }

    /// Combines graphics shaders with a vertex layout, picking the root
    /// signature that fits their resource counts.
    pub fn create_bound_shader_state(
        &self,
        stages: [Option<Arc<Shader>>; 5],
        input_layout: Vec<InputElement>,
        stream_output: Option<StreamOutput>,
    ) -> RhiResult<Arc<BoundShaderState>> {
        let quantized = QuantizedBoundShaderState::for_graphics(
            &stages,
            !input_layout.is_empty(),
            stream_output.is_some(),
            self.shared.binding_tier,
        );
        let root_signature = self.shared.root_signatures.get_or_create(&quantized)?;

        Ok(Arc::new(BoundShaderState::new(
            stages,
            input_layout,
            stream_output,
            root_signature,
        )))
    }

    pub fn create_compute_shader(&self, shader: Arc<Shader>) -> RhiResult<Arc<ComputeShader>> {
        let quantized = QuantizedBoundShaderState::for_compute(&shader, self.shared.binding_tier);
        let root_signature = self.shared.root_signatures.get_or_create(&quantized)?;
        Ok(Arc::new(ComputeShader::new(shader, root_signature)))
    }

    /// Returns the pipeline state for `initializer` on every active node.
    pub fn create_graphics_pipeline_state(
        &self,
        initializer: &GraphicsPipelineInitializer,
    ) -> RhiResult<Arc<PipelineState>> {
        self.shared
            .pipelines
            .find_graphics(initializer, self.shared.active_nodes)
    }

    pub fn create_compute_pipeline_state(&self, shader: &Arc<ComputeShader>) -> RhiResult<Arc<PipelineState>> {
        self.shared
            .pipelines
            .find_compute(shader, self.shared.active_nodes)
    }

    /// Drains the GPU, persists the pipeline cache and tears the devices down
    /// in reverse order. Called on drop if not called before.
    pub fn cleanup(&mut self) -> RhiResult<()> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;

        for device in &self.devices {
            device.flush()?;
        }

        if let Err(error) = self.shared.pipelines.close() {
            log::warn!("could not persist the pipeline cache: {error}");
        }

        while let Some(device) = self.devices.pop() {
            log::debug!("destroying device on {}", device.node());
            drop(device);
        }

        self.shared.deletion.release_all_blocking()?;
        Ok(())
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        let policy = self.shared.config.fatal_policy;
        let result = self.cleanup();
        if !std::thread::panicking() {
            verify(result, "Adapter::cleanup", policy);
        }
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("shared", &self.shared)
            .field("devices", &self.devices)
            .finish()
    }
}
