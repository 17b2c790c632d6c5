//! One node of the adapter: its queues, descriptor heaps, upload memory and
//! command contexts.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{
    adapter::AdapterShared,
    backend::{Backend, QueueKind},
    command::{CommandContext, CommandListManager, ContextKind},
    config::{MultiGpuMode, RhiConfig},
    deferred_deletion::DeferredDeletionQueue,
    descriptor::{
        heap_capacity,
        view_desc::{CbvDesc, SrvDesc, SrvDimension, UavDesc, UavDimension},
        DescriptorHeapAllocator, DescriptorHeapKind, DescriptorSlot, SamplerCache, SamplerDesc,
        ViewDesc,
    },
    error::{RhiError, RhiResult},
    format::Format,
    memory::FastAllocator,
    node::NodeIndex,
    resource::{
        desc::{HeapType, ResourceDesc, ResourceState},
        Resource,
    },
};

/// Descriptors bound in place of anything the caller left unset, so that
/// shaders reading an unbound slot see zeros instead of garbage.
pub struct NullDescriptors {
    pub srv: DescriptorSlot,
    pub uav: DescriptorSlot,
    pub cbv: DescriptorSlot,
    pub sampler: DescriptorSlot,
}

impl NullDescriptors {
    fn new(
        backend: &dyn Backend,
        view_heap: &Arc<DescriptorHeapAllocator>,
        sampler_heap: &Arc<DescriptorHeapAllocator>,
    ) -> RhiResult<Self> {
        let srv = view_heap.allocate()?;
        srv.write_view(
            backend,
            &ViewDesc::Srv(SrvDesc {
                format: Format::R8G8B8A8Unorm,
                dimension: SrvDimension::Texture2D {
                    most_detailed_mip: 0,
                    mip_levels: 1,
                    plane_slice: 0,
                },
            }),
            None,
        );

        let uav = view_heap.allocate()?;
        uav.write_view(
            backend,
            &ViewDesc::Uav(UavDesc {
                format: Format::R8G8B8A8Unorm,
                dimension: UavDimension::Texture2D {
                    mip_slice: 0,
                    plane_slice: 0,
                },
            }),
            None,
        );

        let cbv = view_heap.allocate()?;
        cbv.write_view(backend, &ViewDesc::Cbv(CbvDesc { offset: 0, size: 0 }), None);

        let sampler = sampler_heap.allocate()?;
        sampler.write_sampler(backend, &SamplerDesc::default());

        Ok(Self { srv, uav, cbv, sampler })
    }
}

/// The parts of a device shared with its contexts and resources.
pub struct DeviceCore {
    adapter: Arc<AdapterShared>,
    node: NodeIndex,
    direct: CommandListManager,
    copy: CommandListManager,
    compute: CommandListManager,
    rtv_heap: Arc<DescriptorHeapAllocator>,
    dsv_heap: Arc<DescriptorHeapAllocator>,
    view_heap: Arc<DescriptorHeapAllocator>,
    sampler_heap: Arc<DescriptorHeapAllocator>,
    samplers: SamplerCache,
    fast_allocator: FastAllocator,
    null_descriptors: NullDescriptors,
}

impl DeviceCore {
    fn new(adapter: Arc<AdapterShared>, node: NodeIndex) -> RhiResult<Self> {
        let backend = adapter.backend().clone();
        let config = adapter.config();
        let tier = adapter.binding_tier();

        let heap = |kind| {
            let capacity = heap_capacity(kind, tier, config.descriptor_heaps.as_ref());
            DescriptorHeapAllocator::new(&*backend, node, kind, capacity)
        };
        let rtv_heap = heap(DescriptorHeapKind::RenderTarget)?;
        let dsv_heap = heap(DescriptorHeapKind::DepthStencil)?;
        let view_heap = heap(DescriptorHeapKind::View)?;
        let sampler_heap = heap(DescriptorHeapKind::Sampler)?;

        let null_descriptors = NullDescriptors::new(&*backend, &view_heap, &sampler_heap)?;
        let fast_allocator = FastAllocator::new(backend.clone(), node, adapter.active_nodes(), config.upload_heap_size)?;

        Ok(Self {
            direct: CommandListManager::new(backend.clone(), node, QueueKind::Direct)?,
            copy: CommandListManager::new(backend.clone(), node, QueueKind::Copy)?,
            compute: CommandListManager::new(backend, node, QueueKind::Compute)?,
            samplers: SamplerCache::new(sampler_heap.clone()),
            rtv_heap,
            dsv_heap,
            view_heap,
            sampler_heap,
            fast_allocator,
            null_descriptors,
            adapter,
            node,
        })
    }

    #[must_use]
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<AdapterShared> {
        &self.adapter
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        self.adapter.backend()
    }

    #[must_use]
    pub fn config(&self) -> &RhiConfig {
        self.adapter.config()
    }

    #[must_use]
    pub fn deletion(&self) -> &Arc<DeferredDeletionQueue> {
        self.adapter.deletion()
    }

    #[must_use]
    pub fn queue_manager(&self, kind: QueueKind) -> &CommandListManager {
        match kind {
            QueueKind::Direct => &self.direct,
            QueueKind::Copy => &self.copy,
            QueueKind::Compute => &self.compute,
        }
    }

    #[must_use]
    pub fn direct(&self) -> &CommandListManager {
        &self.direct
    }

    #[must_use]
    pub fn copy(&self) -> &CommandListManager {
        &self.copy
    }

    #[must_use]
    pub fn compute(&self) -> &CommandListManager {
        &self.compute
    }

    #[must_use]
    pub fn heap(&self, kind: DescriptorHeapKind) -> &Arc<DescriptorHeapAllocator> {
        match kind {
            DescriptorHeapKind::RenderTarget => &self.rtv_heap,
            DescriptorHeapKind::DepthStencil => &self.dsv_heap,
            DescriptorHeapKind::View => &self.view_heap,
            DescriptorHeapKind::Sampler => &self.sampler_heap,
        }
    }

    #[must_use]
    pub fn samplers(&self) -> &SamplerCache {
        &self.samplers
    }

    #[must_use]
    pub fn fast_allocator(&self) -> &FastAllocator {
        &self.fast_allocator
    }

    #[must_use]
    pub fn null_descriptors(&self) -> &NullDescriptors {
        &self.null_descriptors
    }

    /// Whether temporal effects need copying between nodes.
    #[must_use]
    pub fn syncs_temporal_effects(&self) -> bool {
        let config = self.config();
        config.afr_sync_temporal_resources
            && config.multi_gpu == MultiGpuMode::AlternateFrame
            && self.adapter.active_nodes().count() > 1
    }

    /// Creates a committed resource on this node, readable by every active
    /// node.
    pub fn create_resource(
        &self,
        desc: &ResourceDesc,
        heap: HeapType,
        initial_state: ResourceState,
        name: &str,
    ) -> RhiResult<Arc<Resource>> {
        let visible = self.adapter.active_nodes();
        let native = self
            .backend()
            .create_resource(desc, heap, self.node, visible, initial_state, name)?;

        Ok(Resource::new(
            native,
            heap,
            self.node,
            visible,
            initial_state,
            name.to_owned(),
            self.deletion().clone(),
        ))
    }
}

impl fmt::Debug for DeviceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCore")
            .field("node", &self.node)
            .field("direct", &self.direct)
            .field("copy", &self.copy)
            .field("compute", &self.compute)
            .finish_non_exhaustive()
    }
}

type SharedContext = Arc<Mutex<CommandContext>>;

/// A node of the adapter and the contexts recording for it.
pub struct Device {
    core: Arc<DeviceCore>,
    default_context: SharedContext,
    worker_contexts: Vec<SharedContext>,
    async_compute_contexts: Vec<SharedContext>,
}

impl Device {
    pub(crate) fn new(adapter: Arc<AdapterShared>, node: NodeIndex) -> RhiResult<Self> {
        let core = Arc::new(DeviceCore::new(adapter, node)?);
        let config = core.config();

        let open = |kind| -> RhiResult<SharedContext> {
            let mut context = CommandContext::new(core.clone(), kind)?;
            context.open_command_list()?;
            Ok(Arc::new(Mutex::new(context)))
        };

        let default_context = open(ContextKind::Default)?;
        let worker_contexts = (0..config.num_worker_contexts)
            .map(|i| open(ContextKind::Worker(i)))
            .collect::<RhiResult<_>>()?;
        let async_compute_contexts = (0..config.num_async_compute_contexts)
            .map(|i| open(ContextKind::AsyncCompute(i)))
            .collect::<RhiResult<_>>()?;

        log::info!(
            "initialized device on {node} with {} worker and {} async compute contexts",
            config.num_worker_contexts,
            config.num_async_compute_contexts
        );

        Ok(Self {
            core,
            default_context,
            worker_contexts,
            async_compute_contexts,
        })
    }

    #[must_use]
    pub fn core(&self) -> &Arc<DeviceCore> {
        &self.core
    }

    #[must_use]
    pub fn node(&self) -> NodeIndex {
        self.core.node
    }

    #[must_use]
    pub fn default_context(&self) -> &SharedContext {
        &self.default_context
    }

    #[must_use]
    pub fn worker_context(&self, index: usize) -> Option<&SharedContext> {
        self.worker_contexts.get(index)
    }

    #[must_use]
    pub fn num_worker_contexts(&self) -> usize {
        self.worker_contexts.len()
    }

    #[must_use]
    pub fn async_compute_context(&self, index: usize) -> Option<&SharedContext> {
        self.async_compute_contexts.get(index)
    }

    /// Submits the chunks worker contexts held back during a parallel batch.
    pub fn end_parallel_batch(&self) -> RhiResult<()> {
        let Some(sync_point) = self.core.direct.execute_pending()? else {
            return Ok(());
        };

        for context in &self.worker_contexts {
            let mut context = context.lock();
            if context.has_unretired_tables() {
                context.retire_tables(sync_point.value());
            }
        }
        Ok(())
    }

    /// Whether every queue of the device has drained.
    #[must_use]
    pub fn is_gpu_idle(&self) -> bool {
        [&self.core.direct, &self.core.copy, &self.core.compute]
            .iter()
            .all(|manager| manager.num_pending() == 0 && manager.is_idle())
    }

    /// Blocks until every queue of the device has drained.
    pub fn wait_for_idle(&self) -> RhiResult<()> {
        self.end_parallel_batch()?;
        for manager in [&self.core.direct, &self.core.copy, &self.core.compute] {
            manager.wait_for_idle()?;
        }
        Ok(())
    }

    /// Executes whatever the default context has recorded and waits for it.
    pub(crate) fn flush(&self) -> RhiResult<()> {
        self.default_context.lock().flush_commands(true)?;
        self.wait_for_idle()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("node", &self.node())
            .field("worker_contexts", &self.worker_contexts.len())
            .field("async_compute_contexts", &self.async_compute_contexts.len())
            .finish()
    }
}

/// Looks up the device on `node` among `devices`.
pub(crate) fn find_device(devices: &[Device], node: NodeIndex) -> RhiResult<&Device> {
    devices
        .iter()
        .find(|device| device.node() == node)
        .ok_or(RhiError::InvalidState("no device on this node"))
}
