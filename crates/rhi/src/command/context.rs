use std::{fmt, sync::Arc};

use geometry::{Rect, Texel, Viewport};
use smallvec::SmallVec;

use super::{
    allocator::{CommandAllocator, SyncPoint},
    list::{CommandListHandle, CommandListManager},
};
use crate::{
    backend::{
        Barrier, Command, DescriptorHandle, IndexBufferView, NativeResource, QueueKind,
        TextureCopyLocation, VertexBufferView,
    },
    config::BatchingMode,
    descriptor::{
        view_desc::{DsvFlags, ViewDesc},
        DescriptorHeapKind, OnlineDescriptorRing, Sampler, View, ViewKind,
        NUM_SAMPLER_DESCRIPTORS,
    },
    device::DeviceCore,
    error::{terminate, RhiError, RhiResult},
    node::NodeIndex,
    pipeline::{
        DescriptorRangeKind, PipelineKind, PipelineState, PrimitiveTopology, RootSignature,
        ShaderStage, MAX_CBS, MAX_SAMPLERS, MAX_SRVS, MAX_UAVS,
    },
    resource::{
        desc::{ResourceState, ALL_SUBRESOURCES},
        Texture, UniformBuffer,
    },
};

/// The most render targets that can be bound at once.
pub const MAX_RENDER_TARGETS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// The context frame boundaries run on. One per device.
    Default,
    /// A context recording a chunk of a parallel batch.
    Worker(u32),
    AsyncCompute(u32),
}

impl ContextKind {
    #[must_use]
    pub fn queue(self) -> QueueKind {
        match self {
            Self::Default | Self::Worker(_) => QueueKind::Direct,
            Self::AsyncCompute(_) => QueueKind::Compute,
        }
    }
}

/// Work recorded into the current command list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkCounters {
    pub draws: u32,
    pub dispatches: u32,
    pub clears: u32,
    pub copies: u32,
    pub barriers: u32,
}

impl WorkCounters {
    #[must_use]
    pub fn total(&self) -> u32 {
        self.draws + self.dispatches + self.clears + self.copies + self.barriers
    }
}

bitflags::bitflags! {
    struct Dirty: u32 {
        const GRAPHICS_PIPELINE = 0x1;
        const COMPUTE_PIPELINE = 0x2;
        const GRAPHICS_TABLES = 0x4;
        const COMPUTE_TABLES = 0x8;
        const VIEWPORT = 0x10;
        const SCISSOR = 0x20;
        const RENDER_TARGETS = 0x40;
        const TOPOLOGY = 0x80;
        const VERTEX_BUFFERS = 0x100;
        const INDEX_BUFFER = 0x200;
    }
}

struct StageBindings {
    srvs: Vec<Option<Arc<View>>>,
    cbs: Vec<Option<Arc<UniformBuffer>>>,
    samplers: Vec<Option<Arc<Sampler>>>,
    uavs: Vec<Option<Arc<View>>>,
}

impl Default for StageBindings {
    fn default() -> Self {
        Self {
            srvs: vec![None; MAX_SRVS as usize],
            cbs: vec![None; MAX_CBS as usize],
            samplers: vec![None; MAX_SAMPLERS as usize],
            uavs: vec![None; MAX_UAVS as usize],
        }
    }
}

/// What has been set on the context, and what of it the list has not seen.
struct StateCache {
    dirty: Dirty,
    graphics_pipeline: Option<Arc<PipelineState>>,
    compute_pipeline: Option<Arc<PipelineState>>,
    graphics_root: Option<Arc<RootSignature>>,
    compute_root: Option<Arc<RootSignature>>,
    stages: [StageBindings; ShaderStage::COUNT],
    viewport: Option<Viewport>,
    scissor: Option<Rect<u32, Texel>>,
    render_targets: SmallVec<[Arc<View>; MAX_RENDER_TARGETS]>,
    depth_stencil: Option<Arc<View>>,
    topology: Option<PrimitiveTopology>,
    vertex_buffers: SmallVec<[VertexBufferView; 4]>,
    index_buffer: Option<IndexBufferView>,
}

impl StateCache {
    fn new() -> Self {
        Self {
            dirty: Dirty::all(),
            graphics_pipeline: None,
            compute_pipeline: None,
            graphics_root: None,
            compute_root: None,
            stages: std::array::from_fn(|_| StageBindings::default()),
            viewport: None,
            scissor: None,
            render_targets: SmallVec::new(),
            depth_stencil: None,
            topology: None,
            vertex_buffers: SmallVec::new(),
            index_buffer: None,
        }
    }

    /// Forgets what the command list has seen, so that everything is set
    /// again on the next draw or dispatch.
    fn invalidate(&mut self) {
        self.dirty = Dirty::all();
        self.graphics_root = None;
        self.compute_root = None;
    }

    fn mark_tables(&mut self, stage: ShaderStage) {
        self.dirty |= match stage {
            ShaderStage::Compute => Dirty::COMPUTE_TABLES,
            _ => Dirty::GRAPHICS_TABLES,
        };
    }
}

/// Records commands for one queue of one device.
///
/// State set on the context is cached and only written to the command list
/// when a draw or dispatch needs it. Descriptor tables are staged into the
/// context's shader-visible rings, with unbound slots filled by null
/// descriptors.
pub struct CommandContext {
    device: Arc<DeviceCore>,
    kind: ContextKind,
    allocator: Option<CommandAllocator>,
    list: Option<CommandListHandle>,
    online_views: OnlineDescriptorRing,
    online_samplers: OnlineDescriptorRing,
    state: StateCache,
    counters: WorkCounters,
    /// Set while the rings hold tables for lists that were deferred without
    /// a sync point.
    unretired_tables: bool,
    warned_clamp: bool,
}

impl CommandContext {
    pub fn new(device: Arc<DeviceCore>, kind: ContextKind) -> RhiResult<Self> {
        let node = device.node();
        let backend = device.backend().clone();
        let capacity = device.config().online_descriptors_per_context;

        let online_views = OnlineDescriptorRing::new(&*backend, node, DescriptorHeapKind::View, capacity)?;
        let online_samplers = OnlineDescriptorRing::new(
            &*backend,
            node,
            DescriptorHeapKind::Sampler,
            capacity.min(NUM_SAMPLER_DESCRIPTORS),
        )?;

        Ok(Self {
            device,
            kind,
            allocator: None,
            list: None,
            online_views,
            online_samplers,
            state: StateCache::new(),
            counters: WorkCounters::default(),
            unretired_tables: false,
            warned_clamp: false,
        })
    }

    #[must_use]
    pub fn node(&self) -> NodeIndex {
        self.device.node()
    }

    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    #[must_use]
    pub fn device(&self) -> &Arc<DeviceCore> {
        &self.device
    }

    #[must_use]
    pub fn counters(&self) -> WorkCounters {
        self.counters
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.list.as_ref().map_or(false, CommandListHandle::is_open)
    }

    #[must_use]
    pub fn has_allocator(&self) -> bool {
        self.allocator.is_some()
    }

    /// Whether anything has been recorded since the list was opened.
    #[must_use]
    pub fn has_done_work(&self) -> bool {
        self.counters.total() > 0
    }

    fn manager(&self) -> &CommandListManager {
        self.device.queue_manager(self.kind.queue())
    }

    /// Takes an allocator from the device if the context does not hold one.
    pub fn conditional_obtain_command_allocator(&mut self) -> RhiResult<()> {
        if self.allocator.is_none() {
            self.allocator = Some(self.manager().allocators().obtain()?);
        }
        Ok(())
    }

    /// Returns the context's allocator to the device, to be reused once
    /// everything submitted so far has executed.
    pub fn release_command_allocator(&mut self) {
        let Some(mut allocator) = self.allocator.take() else {
            return;
        };
        debug_assert!(!self.is_open(), "releasing the allocator of an open command list");

        let manager = self.device.queue_manager(self.kind.queue());
        allocator.set_sync_point(SyncPoint::new(manager.fence().clone(), manager.fence().current_value()));
        manager.allocators().release(allocator);
    }

    /// Opens a command list, obtaining an allocator first if needed.
    pub fn open_command_list(&mut self) -> RhiResult<()> {
        debug_assert!(self.list.is_none(), "a command list is already open");
        self.conditional_obtain_command_allocator()?;

        let device = self.device.clone();
        let manager = device.queue_manager(self.kind.queue());
        let allocator = self
            .allocator
            .as_ref()
            .ok_or(RhiError::InvalidState("no command allocator"))?;
        let mut list = manager.obtain_list(allocator)?;

        let completed = manager.fence().completed_value();
        self.online_views.reclaim(completed);
        self.online_samplers.reclaim(completed);

        list.record(Command::SetDescriptorHeaps {
            view: self.online_views.native().clone(),
            sampler: self.online_samplers.native().clone(),
        });

        self.list = Some(list);
        self.state.invalidate();
        self.counters = WorkCounters::default();
        Ok(())
    }

    /// Flushes pending barriers and closes the open list. It stays with the
    /// context until it is executed.
    pub fn close_command_list(&mut self) -> RhiResult<()> {
        match self.list.as_mut() {
            Some(list) => list.close(),
            None => Err(RhiError::InvalidState("no command list to close")),
        }
    }

    /// Executes what has been recorded and opens a new list. With `wait`,
    /// blocks until the GPU has finished it.
    ///
    /// Does nothing if there is nothing to execute and no need to wait.
    pub fn flush_commands(&mut self, wait: bool) -> RhiResult<()> {
        if !(wait || self.has_done_work() || self.manager().num_pending() > 0) {
            return Ok(());
        }

        let sync_point = self.execute_current()?;
        if wait {
            sync_point.wait()?;
            let completed = sync_point.fence().completed_value();
            self.online_views.reclaim(completed);
            self.online_samplers.reclaim(completed);
        }

        self.open_command_list()
    }

    /// Hints that now is a good time to submit, e.g. after a large batch of
    /// uploads.
    pub fn submit_commands_hint(&mut self) {
        if let Err(error) = self.flush_commands(false) {
            self.fail(error, "CommandContext::submit_commands_hint");
        }
    }

    fn execute_current(&mut self) -> RhiResult<SyncPoint> {
        let mut list = self
            .list
            .take()
            .ok_or(RhiError::InvalidState("no command list to execute"))?;
        list.close()?;

        let device = self.device.clone();
        let sync_point = device.queue_manager(self.kind.queue()).execute(list, None)?;

        if let Some(allocator) = self.allocator.as_mut() {
            allocator.set_sync_point(sync_point.clone());
        }
        self.retire_tables(sync_point.value());
        Ok(sync_point)
    }

    /// Closes the ring frames holding the tables of submitted lists against
    /// the fence value that covers them.
    pub(crate) fn retire_tables(&mut self, fence_value: u64) {
        self.online_views.finish_frame(fence_value);
        self.online_samplers.finish_frame(fence_value);
        self.unretired_tables = false;
    }

    pub(crate) fn has_unretired_tables(&self) -> bool {
        self.unretired_tables
    }

    /// Starts a frame on the default context.
    pub fn begin_frame(&mut self) -> RhiResult<()> {
        debug_assert_eq!(self.kind, ContextKind::Default, "frames begin on the default context");

        let completed = self.manager().fence().completed_value();
        self.device.fast_allocator().reclaim(completed);

        if self.list.is_none() {
            self.open_command_list()?;
        }
        Ok(())
    }

    /// Submits the frame's commands, releases the allocator and recycles
    /// upload memory the GPU has finished with.
    pub fn end_frame(&mut self) -> RhiResult<()> {
        debug_assert_eq!(self.kind, ContextKind::Default, "frames end on the default context");

        let sync_point = self.execute_current()?;
        self.release_command_allocator();

        let fast_allocator = self.device.fast_allocator();
        fast_allocator.finish_frame(sync_point.value());
        fast_allocator.reclaim(sync_point.fence().completed_value());

        self.open_command_list()
    }

    /// Hands the recorded chunk of a parallel batch to the device.
    ///
    /// In aggressive batching mode the list is held back while the queue is
    /// busy, to be submitted with the next one. A new list is opened for the
    /// next chunk either way.
    pub fn finish_parallel_chunk(&mut self) -> RhiResult<()> {
        let mut list = self
            .list
            .take()
            .ok_or(RhiError::InvalidState("no command list to finish"))?;
        list.close()?;

        let allocator = self.allocator.take();
        let device = self.device.clone();
        let manager = device.queue_manager(self.kind.queue());

        match device.config().batching {
            BatchingMode::Aggressive if !manager.is_idle() => {
                manager.defer(list, allocator)?;
                self.unretired_tables = true;
            }
            BatchingMode::Normal | BatchingMode::Aggressive => {
                let sync_point = manager.execute(list, allocator)?;
                self.retire_tables(sync_point.value());
            }
        }

        self.open_command_list()
    }

    fn fail(&self, error: RhiError, call_site: &'static str) {
        if error.is_fatal() {
            terminate(&error, call_site, self.device.config().fatal_policy);
        }
        log::error!("{call_site}: {error}");
    }

    fn list_mut(&mut self) -> Option<&mut CommandListHandle> {
        debug_assert!(self.is_open(), "recording without an open command list");
        self.list.as_mut()
    }

    fn record(&mut self, command: Command) {
        if let Some(list) = self.list_mut() {
            list.record(command);
        }
    }

    fn flush_barriers(&mut self) {
        if let Some(list) = self.list_mut() {
            list.flush_barriers();
        }
    }

    fn clamp_slot(&mut self, slot: u32, max: u32, what: &str) -> usize {
        if slot < max {
            return slot as usize;
        }

        if !self.warned_clamp {
            log::warn!("{what} slot {slot} is out of range (max {max}); clamping");
            self.warned_clamp = true;
        }
        (max - 1) as usize
    }

    pub fn set_graphics_pipeline(&mut self, pipeline: &Arc<PipelineState>) {
        debug_assert_eq!(pipeline.kind(), PipelineKind::Graphics);
        if let Some(current) = &self.state.graphics_pipeline {
            if Arc::ptr_eq(current, pipeline) {
                return;
            }
        }
        self.state.graphics_pipeline = Some(pipeline.clone());
        self.state.dirty |= Dirty::GRAPHICS_PIPELINE;
    }

    pub fn set_compute_pipeline(&mut self, pipeline: &Arc<PipelineState>) {
        debug_assert_eq!(pipeline.kind(), PipelineKind::Compute);
        if let Some(current) = &self.state.compute_pipeline {
            if Arc::ptr_eq(current, pipeline) {
                return;
            }
        }
        self.state.compute_pipeline = Some(pipeline.clone());
        self.state.dirty |= Dirty::COMPUTE_PIPELINE;
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.state.viewport != Some(viewport) {
            self.state.viewport = Some(viewport);
            self.state.dirty |= Dirty::VIEWPORT;
        }
    }

    pub fn set_scissor_rect(&mut self, rect: Rect<u32, Texel>) {
        if self.state.scissor != Some(rect) {
            self.state.scissor = Some(rect);
            self.state.dirty |= Dirty::SCISSOR;
        }
    }

    pub fn set_render_targets(&mut self, render_targets: &[Arc<View>], depth_stencil: Option<&Arc<View>>) {
        debug_assert!(render_targets.iter().all(|v| v.kind() == ViewKind::RenderTarget));
        debug_assert!(depth_stencil.map_or(true, |v| v.kind() == ViewKind::DepthStencil));

        let count = render_targets.len().min(MAX_RENDER_TARGETS);
        if count < render_targets.len() && !self.warned_clamp {
            log::warn!("{} render targets bound, only {MAX_RENDER_TARGETS} are used", render_targets.len());
            self.warned_clamp = true;
        }

        self.state.render_targets = render_targets[..count].iter().cloned().collect();
        self.state.depth_stencil = depth_stencil.cloned();
        self.state.dirty |= Dirty::RENDER_TARGETS;
    }

    pub fn set_shader_resource(&mut self, stage: ShaderStage, slot: u32, view: Option<Arc<View>>) {
        debug_assert!(view.as_ref().map_or(true, |v| v.kind() == ViewKind::ShaderResource));
        let slot = self.clamp_slot(slot, MAX_SRVS, "shader resource");
        self.state.stages[stage.index()].srvs[slot] = view;
        self.state.mark_tables(stage);
    }

    pub fn set_sampler(&mut self, stage: ShaderStage, slot: u32, sampler: Option<Arc<Sampler>>) {
        let slot = self.clamp_slot(slot, MAX_SAMPLERS, "sampler");
        self.state.stages[stage.index()].samplers[slot] = sampler;
        self.state.mark_tables(stage);
    }

    pub fn set_uav(&mut self, stage: ShaderStage, slot: u32, view: Option<Arc<View>>) {
        debug_assert!(view.as_ref().map_or(true, |v| v.kind() == ViewKind::UnorderedAccess));
        let slot = self.clamp_slot(slot, MAX_UAVS, "unordered access");
        self.state.stages[stage.index()].uavs[slot] = view;
        self.state.mark_tables(stage);
    }

    pub fn set_constant_buffer(&mut self, stage: ShaderStage, slot: u32, buffer: Option<Arc<UniformBuffer>>) {
        debug_assert!(buffer.as_ref().map_or(true, |b| b.node() == self.node()));
        let slot = self.clamp_slot(slot, MAX_CBS, "constant buffer");
        self.state.stages[stage.index()].cbs[slot] = buffer;
        self.state.mark_tables(stage);
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        if self.state.topology != Some(topology) {
            self.state.topology = Some(topology);
            self.state.dirty |= Dirty::TOPOLOGY;
        }
    }

    pub fn set_vertex_buffers(&mut self, views: &[VertexBufferView]) {
        self.state.vertex_buffers = views.iter().cloned().collect();
        self.state.dirty |= Dirty::VERTEX_BUFFERS;
    }

    pub fn set_index_buffer(&mut self, view: IndexBufferView) {
        self.state.index_buffer = Some(view);
        self.state.dirty |= Dirty::INDEX_BUFFER;
    }

    /// Batches a state transition. Nothing is recorded if the states match.
    pub fn transition_resource(
        &mut self,
        resource: &Arc<dyn NativeResource>,
        subresource: u32,
        before: ResourceState,
        after: ResourceState,
    ) {
        if before == after {
            return;
        }

        if let Some(list) = self.list_mut() {
            list.barrier(Barrier::Transition {
                resource: resource.clone(),
                subresource,
                before,
                after,
            });
            self.counters.barriers += 1;
        }
    }

    /// Orders unordered-access writes to `resource`, or to everything.
    pub fn uav_barrier(&mut self, resource: Option<&Arc<dyn NativeResource>>) {
        if let Some(list) = self.list_mut() {
            list.barrier(Barrier::Uav(resource.cloned()));
            self.counters.barriers += 1;
        }
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        if !self.prepare(PipelineKind::Graphics, "CommandContext::draw") {
            return;
        }

        self.record(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        self.counters.draws += 1;
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        debug_assert!(self.state.index_buffer.is_some(), "indexed draw without an index buffer");
        if !self.prepare(PipelineKind::Graphics, "CommandContext::draw_indexed") {
            return;
        }

        self.record(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
        self.counters.draws += 1;
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        if !self.prepare(PipelineKind::Compute, "CommandContext::dispatch") {
            return;
        }

        self.record(Command::Dispatch { x, y, z });
        self.counters.dispatches += 1;
    }

    pub fn clear_render_target(&mut self, view: &View, color: [f32; 4]) {
        debug_assert_eq!(view.kind(), ViewKind::RenderTarget);
        self.flush_barriers();
        self.record(Command::ClearRenderTarget {
            target: view.handle().clone(),
            color,
        });
        self.counters.clears += 1;
    }

    pub fn clear_depth_stencil(&mut self, view: &View, depth: Option<f32>, stencil: Option<u8>) {
        debug_assert_eq!(view.kind(), ViewKind::DepthStencil);
        self.flush_barriers();
        self.record(Command::ClearDepthStencil {
            target: view.handle().clone(),
            depth,
            stencil,
        });
        self.counters.clears += 1;
    }

    pub fn copy_resource(&mut self, dst: &Arc<dyn NativeResource>, src: &Arc<dyn NativeResource>) {
        self.flush_barriers();
        self.record(Command::CopyResource {
            dst: dst.clone(),
            src: src.clone(),
        });
        self.counters.copies += 1;
    }

    pub fn copy_buffer_region(
        &mut self,
        dst: &Arc<dyn NativeResource>,
        dst_offset: u64,
        src: &Arc<dyn NativeResource>,
        src_offset: u64,
        size: u64,
    ) {
        self.flush_barriers();
        self.record(Command::CopyBufferRegion {
            dst: dst.clone(),
            dst_offset,
            src: src.clone(),
            src_offset,
            size,
        });
        self.counters.copies += 1;
    }

    pub fn copy_texture_region(&mut self, dst: TextureCopyLocation, src: TextureCopyLocation) {
        self.flush_barriers();
        self.record(Command::CopyTextureRegion { dst, src });
        self.counters.copies += 1;
    }

    /// Makes this context's queue wait until the node that rendered the
    /// previous frame has broadcast the effect's resources.
    pub fn wait_for_temporal_effect(&mut self, name: &str) -> RhiResult<()> {
        let device = self.device.clone();
        if !device.syncs_temporal_effects() {
            return Ok(());
        }

        let effect = device.adapter().temporal_effect(name)?;
        // Work recorded so far does not depend on the effect.
        self.flush_commands(false)?;
        effect.wait_for_previous(&**device.direct().queue())
    }

    /// Copies this node's copy of each texture to every other node over the
    /// copy queue, then signals the effect.
    pub fn broadcast_temporal_effect(&mut self, name: &str, textures: &[&Texture]) -> RhiResult<()> {
        let device = self.device.clone();
        if !device.syncs_temporal_effects() {
            return Ok(());
        }

        let node = self.node();
        let effect = device.adapter().temporal_effect(name)?;

        let mut sources = SmallVec::<[(Arc<dyn NativeResource>, ResourceState); 8]>::new();
        for texture in textures {
            let source = texture
                .node(node)
                .ok_or(RhiError::InvalidState("temporal texture has no copy on this node"))?
                .resource();
            self.transition_resource(source.native(), ALL_SUBRESOURCES, texture.default_state(), ResourceState::COMMON);
            sources.push((source.native().clone(), texture.default_state()));
        }
        self.flush_commands(false)?;

        let direct = device.direct();
        let copy = device.copy();

        let allocator = copy.allocators().obtain()?;
        let mut list = copy.obtain_list(&allocator)?;
        for (texture, (source, _)) in textures.iter().zip(&sources) {
            for (other, texture_node) in texture.chain().iter() {
                if other != node {
                    list.record(Command::CopyResource {
                        dst: texture_node.resource().native().clone(),
                        src: source.clone(),
                    });
                }
            }
        }

        direct.fence().gpu_wait(&**copy.queue(), direct.fence().current_value())?;
        let copied = copy.execute(list, Some(allocator))?;
        effect.signal_sync_complete(&**copy.queue())?;

        // The sources go back to their default state only after the copy
        // queue is done reading them.
        copied.fence().gpu_wait(&**direct.queue(), copied.value())?;
        for (source, default_state) in &sources {
            self.transition_resource(source, ALL_SUBRESOURCES, ResourceState::COMMON, *default_state);
        }
        Ok(())
    }

    /// Checks that no bound shader resource reads the depth-stencil target
    /// while it is bound for writing.
    pub fn validate_exclusive_depth_stencil_access(&self) {
        let Some(dsv) = &self.state.depth_stencil else {
            return;
        };

        let read_only = matches!(
            dsv.desc(),
            ViewDesc::Dsv(desc) if desc.flags.contains(DsvFlags::READ_ONLY_DEPTH | DsvFlags::READ_ONLY_STENCIL)
        );
        if read_only {
            return;
        }

        for stage in &self.state.stages {
            for srv in stage.srvs.iter().flatten() {
                debug_assert!(
                    srv.does_not_overlap(dsv),
                    "a shader resource view reads the depth-stencil target bound for writing"
                );
            }
        }
    }

    fn prepare(&mut self, kind: PipelineKind, call_site: &'static str) -> bool {
        self.flush_barriers();

        let result = match self.apply_state(kind) {
            Err(RhiError::DescriptorHeapExhausted { kind: heap, capacity }) => {
                log::warn!("online {heap:?} descriptors exhausted ({capacity}) on {}; flushing", self.node());
                self.flush_commands(true).and_then(|()| self.apply_state(kind))
            }
            other => other,
        };

        match result {
            Ok(ready) => ready,
            Err(error) => {
                self.fail(error, call_site);
                false
            }
        }
    }

    /// Writes dirty state into the command list. Returns `false` if the work
    /// should be skipped.
    fn apply_state(&mut self, kind: PipelineKind) -> RhiResult<bool> {
        let graphics = kind == PipelineKind::Graphics;
        let pipeline = if graphics {
            self.state.graphics_pipeline.clone()
        } else {
            self.state.compute_pipeline.clone()
        };

        let Some(pipeline) = pipeline else {
            log::error!("{kind:?} work recorded with no pipeline state set; skipped");
            return Ok(false);
        };

        let native = match pipeline.get() {
            Ok(native) => native,
            Err(error) => {
                log::error!("pipeline state {:#x} is unusable, skipping {kind:?} work: {error}", pipeline.hash());
                return Ok(false);
            }
        };

        let (pipeline_flag, tables_flag) = if graphics {
            (Dirty::GRAPHICS_PIPELINE, Dirty::GRAPHICS_TABLES)
        } else {
            (Dirty::COMPUTE_PIPELINE, Dirty::COMPUTE_TABLES)
        };

        if self.state.dirty.contains(pipeline_flag) {
            self.record(if graphics {
                Command::SetGraphicsPipeline(native)
            } else {
                Command::SetComputePipeline(native)
            });
            self.state.dirty.remove(pipeline_flag);
        }

        let root = pipeline.root_signature().clone();
        let bound_root = if graphics {
            &mut self.state.graphics_root
        } else {
            &mut self.state.compute_root
        };
        if !bound_root.as_ref().map_or(false, |bound| bound.same_as(&root)) {
            *bound_root = Some(root.clone());
            self.state.dirty |= tables_flag;
            self.record(if graphics {
                Command::SetGraphicsRootSignature(root.native().clone())
            } else {
                Command::SetComputeRootSignature(root.native().clone())
            });
        }

        if self.state.dirty.contains(tables_flag) {
            self.apply_tables(&root, graphics)?;
            self.state.dirty.remove(tables_flag);
        }

        if graphics {
            self.apply_graphics_state();
        }
        Ok(true)
    }

    fn apply_tables(&mut self, root: &RootSignature, graphics: bool) -> RhiResult<()> {
        let stages: &[ShaderStage] = if graphics {
            &ShaderStage::GRAPHICS
        } else {
            &[ShaderStage::Compute]
        };

        for &stage in stages {
            for range in DescriptorRangeKind::ALL {
                let Some(root_index) = root.layout().table(stage, range) else {
                    continue;
                };

                let handles = self.gather_table(stage, range, root.table_size(root_index));
                let heap = match range {
                    DescriptorRangeKind::Sampler => DescriptorHeapKind::Sampler,
                    _ => DescriptorHeapKind::View,
                };
                let base = self.stage_table(heap, &handles)?;

                self.record(if graphics {
                    Command::SetGraphicsDescriptorTable { root_index, base }
                } else {
                    Command::SetComputeDescriptorTable { root_index, base }
                });
            }
        }
        Ok(())
    }

    fn gather_table(&self, stage: ShaderStage, range: DescriptorRangeKind, size: u32) -> Vec<DescriptorHandle> {
        let bindings = &self.state.stages[stage.index()];
        let nulls = self.device.null_descriptors();

        (0..size as usize)
            .map(|slot| match range {
                DescriptorRangeKind::Srv => bindings
                    .srvs
                    .get(slot)
                    .and_then(Option::as_ref)
                    .map_or_else(|| nulls.srv.handle(), |view| view.handle().clone()),
                DescriptorRangeKind::Cbv => bindings
                    .cbs
                    .get(slot)
                    .and_then(Option::as_ref)
                    .map_or_else(|| nulls.cbv.handle(), |buffer| buffer.handle().clone()),
                DescriptorRangeKind::Sampler => bindings
                    .samplers
                    .get(slot)
                    .and_then(Option::as_ref)
                    .map_or_else(|| nulls.sampler.handle(), |sampler| sampler.slot().handle()),
                DescriptorRangeKind::Uav => bindings
                    .uavs
                    .get(slot)
                    .and_then(Option::as_ref)
                    .map_or_else(|| nulls.uav.handle(), |view| view.handle().clone()),
            })
            .collect()
    }

    fn stage_table(&mut self, heap: DescriptorHeapKind, handles: &[DescriptorHandle]) -> RhiResult<DescriptorHandle> {
        let backend = self.device.backend().clone();
        let completed = self.manager().fence().completed_value();

        let ring = match heap {
            DescriptorHeapKind::Sampler => &mut self.online_samplers,
            _ => &mut self.online_views,
        };

        match ring.stage(&*backend, handles) {
            Err(RhiError::DescriptorHeapExhausted { .. }) => {
                ring.reclaim(completed);
                ring.stage(&*backend, handles)
            }
            other => other,
        }
    }

    fn apply_graphics_state(&mut self) {
        let dirty = self.state.dirty;

        if dirty.contains(Dirty::VIEWPORT) {
            if let Some(viewport) = self.state.viewport {
                self.record(Command::SetViewport(viewport));
            }
        }

        if dirty.contains(Dirty::SCISSOR) {
            if let Some(rect) = self.state.scissor {
                self.record(Command::SetScissor(rect));
            }
        }

        if dirty.contains(Dirty::RENDER_TARGETS) {
            if cfg!(debug_assertions) {
                self.validate_exclusive_depth_stencil_access();
            }
            let render_targets = self.state.render_targets.iter().map(|v| v.handle().clone()).collect();
            let depth_stencil = self.state.depth_stencil.as_ref().map(|v| v.handle().clone());
            self.record(Command::SetRenderTargets {
                render_targets,
                depth_stencil,
            });
        }

        if dirty.contains(Dirty::TOPOLOGY) {
            if let Some(topology) = self.state.topology {
                self.record(Command::SetPrimitiveTopology(topology));
            }
        }

        if dirty.contains(Dirty::VERTEX_BUFFERS) && !self.state.vertex_buffers.is_empty() {
            let views = self.state.vertex_buffers.clone();
            self.record(Command::SetVertexBuffers { start_slot: 0, views });
        }

        if dirty.contains(Dirty::INDEX_BUFFER) {
            if let Some(view) = self.state.index_buffer.clone() {
                self.record(Command::SetIndexBuffer(view));
            }
        }

        self.state.dirty.remove(
            Dirty::VIEWPORT
                | Dirty::SCISSOR
                | Dirty::RENDER_TARGETS
                | Dirty::TOPOLOGY
                | Dirty::VERTEX_BUFFERS
                | Dirty::INDEX_BUFFER,
        );
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("node", &self.node())
            .field("kind", &self.kind)
            .field("open", &self.is_open())
            .field("counters", &self.counters)
            .finish()
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        if let Some(list) = self.list.take() {
            if let Err(error) = self.manager().recycle(list) {
                log::warn!("dropping command list of {:?} context on {}: {error}", self.kind, self.node());
            }
        }
        self.release_command_allocator();
    }
}
