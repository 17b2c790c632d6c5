//! A software backend with no GPU behind it.
//!
//! Command lists record into vectors, queues execute copy commands against
//! CPU memory in submission order, and fences either complete as soon as they
//! are signalled or wait for the owner to advance the simulated timeline with
//! [`NullBackend::complete_signals`]. Every resource is CPU-accessible so
//! tests can inspect the results of copies.

use std::{
    any::Any,
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use super::{
    AdapterDesc, Backend, Command, DebugMessage, DescriptorHandle, FeatureLevel, NativeCommandAllocator,
    NativeCommandList, NativeDescriptorHeap, NativeFence, NativePipeline, NativePipelineLibrary,
    NativeQueue, NativeResource, NativeRootSignature, QueueKind, TextureCopyLocation,
};
use crate::{
    descriptor::{DescriptorHeapKind, ResourceBindingTier, SamplerDesc, ViewDesc},
    error::{DeviceRemovedReason, NativeErrorCode, RhiError, RhiResult},
    node::{GpuNodeMask, NodeIndex},
    pipeline::{
        encode::{CacheReader, Sink},
        ComputePipelineDesc, GraphicsPipelineDesc, PipelineKind, RootSignatureDesc, ShaderStage,
    },
    resource::desc::{HeapType, PlacedFootprint, ResourceDesc, ResourceState},
};

const LIBRARY_MAGIC: [u8; 4] = *b"NPLB";

#[derive(Clone, Debug)]
pub struct NullOptions {
    pub node_count: u32,
    /// Complete fence signals as soon as they are queued.
    pub auto_complete: bool,
    pub binding_tier: ResourceBindingTier,
    pub pipeline_library: bool,
    pub adapter: AdapterDesc,
    /// Fail resource creation with out-of-memory past this many bytes.
    pub memory_budget: Option<u64>,
}

impl Default for NullOptions {
    fn default() -> Self {
        Self {
            node_count: 1,
            auto_complete: true,
            binding_tier: ResourceBindingTier::Tier3,
            pipeline_library: false,
            adapter: AdapterDesc {
                name: "Null Adapter".into(),
                vendor_id: 0,
                device_id: 0,
                dedicated_video_memory: 0,
            },
            memory_budget: None,
        }
    }
}

/// One operation seen by a queue, in submission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueOp {
    Execute {
        node: NodeIndex,
        kind: QueueKind,
        commands: Vec<&'static str>,
    },
    Signal {
        node: NodeIndex,
        kind: QueueKind,
        value: u64,
    },
    Wait {
        node: NodeIndex,
        kind: QueueKind,
        value: u64,
    },
}

#[derive(Default)]
struct Timeline {
    pending: VecDeque<(Arc<AtomicU64>, u64)>,
    log: Vec<QueueOp>,
}

impl Timeline {
    fn complete_one(&mut self) -> bool {
        match self.pending.pop_front() {
            Some((fence, value)) => {
                fence.fetch_max(value, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }
}

struct Gpu {
    options: NullOptions,
    timeline: Mutex<Timeline>,
    removed: Mutex<Option<DeviceRemovedReason>>,
    messages: Mutex<Vec<DebugMessage>>,
    pipeline_compiles: AtomicU64,
    committed_bytes: AtomicU64,
    next_address: AtomicU64,
}

impl Gpu {
    fn check_removed(&self) -> RhiResult<()> {
        match *self.removed.lock() {
            Some(reason) => Err(RhiError::DeviceRemoved(reason)),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct NullBackend {
    gpu: Arc<Gpu>,
}

impl NullBackend {
    #[must_use]
    pub fn new(node_count: u32) -> Self {
        Self::with_options(NullOptions {
            node_count,
            ..NullOptions::default()
        })
    }

    #[must_use]
    pub fn with_options(options: NullOptions) -> Self {
        assert!(options.node_count > 0, "an adapter has at least one node");
        Self {
            gpu: Arc::new(Gpu {
                options,
                timeline: Mutex::default(),
                removed: Mutex::new(None),
                messages: Mutex::default(),
                pipeline_compiles: AtomicU64::new(0),
                committed_bytes: AtomicU64::new(0),
                next_address: AtomicU64::new(0x1_0000),
            }),
        }
    }

    /// The number of pipelines created from scratch.
    #[must_use]
    pub fn pipeline_compiles(&self) -> u64 {
        self.gpu.pipeline_compiles.load(Ordering::Relaxed)
    }

    /// Completes the oldest `count` queued fence signals. Returns how many
    /// were pending.
    pub fn complete_signals(&self, count: usize) -> usize {
        let mut timeline = self.gpu.timeline.lock();
        (0..count).take_while(|_| timeline.complete_one()).count()
    }

    /// Completes every queued fence signal.
    pub fn advance_gpu(&self) {
        let mut timeline = self.gpu.timeline.lock();
        while timeline.complete_one() {}
    }

    #[must_use]
    pub fn pending_signals(&self) -> usize {
        self.gpu.timeline.lock().pending.len()
    }

    #[must_use]
    pub fn queue_log(&self) -> Vec<QueueOp> {
        self.gpu.timeline.lock().log.clone()
    }

    pub fn clear_queue_log(&self) {
        self.gpu.timeline.lock().log.clear();
    }

    /// Command names of every list executed on queues of `kind`.
    #[must_use]
    pub fn executed(&self, kind: QueueKind) -> Vec<Vec<&'static str>> {
        self.gpu
            .timeline
            .lock()
            .log
            .iter()
            .filter_map(|op| match op {
                QueueOp::Execute { kind: k, commands, .. } if *k == kind => Some(commands.clone()),
                _ => None,
            })
            .collect()
    }

    /// Simulates the driver pulling the device.
    pub fn remove_device(&self, reason: DeviceRemovedReason) {
        *self.gpu.removed.lock() = Some(reason);
    }

    pub fn push_debug_message(&self, message: DebugMessage) {
        self.gpu.messages.lock().push(message);
    }

    #[must_use]
    pub fn committed_bytes(&self) -> u64 {
        self.gpu.committed_bytes.load(Ordering::Relaxed)
    }
}

impl Backend for NullBackend {
    fn adapter_desc(&self) -> AdapterDesc {
        self.gpu.options.adapter.clone()
    }

    fn node_count(&self) -> u32 {
        self.gpu.options.node_count
    }

    fn feature_level(&self) -> FeatureLevel {
        FeatureLevel::Level12_1
    }

    fn resource_binding_tier(&self) -> ResourceBindingTier {
        self.gpu.options.binding_tier
    }

    fn supports_pipeline_library(&self) -> bool {
        self.gpu.options.pipeline_library
    }

    fn create_queue(&self, node: NodeIndex, kind: QueueKind) -> RhiResult<Arc<dyn NativeQueue>> {
        debug_assert!(node.0 < self.node_count());
        Ok(Arc::new(NullQueue {
            gpu: self.gpu.clone(),
            node,
            kind,
        }))
    }

    fn create_fence(&self, initial_value: u64) -> RhiResult<Arc<dyn NativeFence>> {
        Ok(Arc::new(NullFence {
            gpu: self.gpu.clone(),
            value: Arc::new(AtomicU64::new(initial_value)),
        }))
    }

    fn create_command_allocator(
        &self,
        node: NodeIndex,
        kind: QueueKind,
    ) -> RhiResult<Box<dyn NativeCommandAllocator>> {
        Ok(Box::new(NullCommandAllocator { node, kind }))
    }

    fn create_command_list(
        &self,
        node: NodeIndex,
        kind: QueueKind,
        allocator: &dyn NativeCommandAllocator,
    ) -> RhiResult<Box<dyn NativeCommandList>> {
        let allocator = downcast::<NullCommandAllocator>(allocator.as_any())?;
        debug_assert_eq!((allocator.node, allocator.kind), (node, kind));
        Ok(Box::new(NullCommandList {
            node,
            kind,
            commands: Vec::new(),
            closed: false,
        }))
    }

    fn create_descriptor_heap(
        &self,
        node: NodeIndex,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> RhiResult<Arc<dyn NativeDescriptorHeap>> {
        debug_assert!(node.0 < self.node_count());
        if shader_visible && matches!(kind, DescriptorHeapKind::RenderTarget | DescriptorHeapKind::DepthStencil) {
            return Err(RhiError::native("CreateDescriptorHeap", NativeErrorCode::INVALID_ARG));
        }

        Ok(Arc::new(NullDescriptorHeap {
            kind,
            capacity,
            shader_visible,
            entries: Mutex::default(),
        }))
    }

    fn create_resource(
        &self,
        desc: &ResourceDesc,
        heap: HeapType,
        node: NodeIndex,
        visible: GpuNodeMask,
        initial_state: ResourceState,
        name: &str,
    ) -> RhiResult<Arc<dyn NativeResource>> {
        self.gpu.check_removed()?;
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 || desc.depth_or_array_size == 0 {
            return Err(RhiError::native("CreateCommittedResource", NativeErrorCode::INVALID_ARG));
        }
        debug_assert!(visible.contains(node));

        let size = resource_size(desc);
        let committed = self.gpu.committed_bytes.fetch_add(size, Ordering::AcqRel) + size;
        if self.gpu.options.memory_budget.map_or(false, |budget| committed > budget) {
            self.gpu.committed_bytes.fetch_sub(size, Ordering::AcqRel);
            return Err(RhiError::native("CreateCommittedResource", NativeErrorCode::OUT_OF_MEMORY));
        }

        let address = self.gpu.next_address.fetch_add(size.max(1).next_multiple_of(0x1_0000), Ordering::Relaxed);
        log::trace!("null resource {name:?} on {node}: {size} bytes in {heap:?}, {initial_state:?}");

        Ok(Arc::new(NullResource {
            gpu: self.gpu.clone(),
            desc: *desc,
            heap,
            node,
            name: name.to_owned(),
            address,
            size,
            memory: Mutex::default(),
        }))
    }

    fn write_view(
        &self,
        heap: &dyn NativeDescriptorHeap,
        index: u32,
        view: &ViewDesc,
        resource: Option<&dyn NativeResource>,
    ) {
        if let Ok(heap) = downcast::<NullDescriptorHeap>(heap.as_any()) {
            heap.set(
                index,
                NullDescriptor::View {
                    desc: *view,
                    resource: resource.map(|r| r.gpu_address()),
                },
            );
        }
    }

    fn write_sampler(&self, heap: &dyn NativeDescriptorHeap, index: u32, desc: &SamplerDesc) {
        if let Ok(heap) = downcast::<NullDescriptorHeap>(heap.as_any()) {
            heap.set(index, NullDescriptor::Sampler(desc.clone()));
        }
    }

    fn copy_descriptors(&self, dst: &dyn NativeDescriptorHeap, dst_start: u32, src: &[DescriptorHandle]) {
        let Ok(dst) = downcast::<NullDescriptorHeap>(dst.as_any()) else {
            return;
        };

        let copied: Vec<_> = src
            .iter()
            .map(|handle| {
                downcast::<NullDescriptorHeap>(handle.heap.as_any())
                    .ok()
                    .and_then(|heap| heap.descriptor(handle.index))
            })
            .collect();

        for (i, descriptor) in copied.into_iter().enumerate() {
            let index = dst_start + i as u32;
            match descriptor {
                Some(descriptor) => dst.set(index, descriptor),
                None => dst.clear(index),
            }
        }
    }

    fn serialize_root_signature(&self, desc: &RootSignatureDesc) -> RhiResult<Vec<u8>> {
        let mut blob = Vec::new();
        desc.encode(&mut blob);
        Ok(blob)
    }

    fn create_root_signature(&self, nodes: GpuNodeMask, blob: &[u8]) -> RhiResult<Arc<dyn NativeRootSignature>> {
        let mut reader = CacheReader::new(blob);
        match RootSignatureDesc::decode(&mut reader) {
            Some(desc) if reader.remaining() == 0 => Ok(Arc::new(NullRootSignature {
                nodes,
                parameters: desc.parameters.len(),
            })),
            _ => Err(RhiError::native("CreateRootSignature", NativeErrorCode::INVALID_ARG)),
        }
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<Arc<dyn NativePipeline>> {
        self.gpu.check_removed()?;
        match &desc.shaders[ShaderStage::Vertex.index()] {
            Some(vs) if !vs.is_empty() => {}
            _ => return Err(RhiError::PipelineCompile("graphics pipeline without vertex shader".into())),
        }
        if desc.shaders.iter().flatten().any(|s| s.is_empty()) {
            return Err(RhiError::PipelineCompile("empty shader bytecode".into()));
        }

        self.gpu.pipeline_compiles.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(NullPipeline {
            kind: PipelineKind::Graphics,
            hash: desc.combined_hash(),
        }))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> RhiResult<Arc<dyn NativePipeline>> {
        self.gpu.check_removed()?;
        if desc.shader.is_empty() {
            return Err(RhiError::PipelineCompile("empty shader bytecode".into()));
        }

        self.gpu.pipeline_compiles.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(NullPipeline {
            kind: PipelineKind::Compute,
            hash: desc.combined_hash(),
        }))
    }

    fn create_pipeline_library(&self, blob: &[u8]) -> RhiResult<Box<dyn NativePipelineLibrary>> {
        if !self.gpu.options.pipeline_library {
            return Err(RhiError::native("CreatePipelineLibrary", NativeErrorCode::UNSUPPORTED));
        }

        let entries = if blob.is_empty() {
            HashMap::new()
        } else {
            NullPipelineLibrary::parse(blob)
                .ok_or_else(|| RhiError::native("CreatePipelineLibrary", NativeErrorCode::CACHE_MISS))?
        };

        Ok(Box::new(NullPipelineLibrary { entries }))
    }

    fn device_removed_reason(&self) -> Option<DeviceRemovedReason> {
        *self.gpu.removed.lock()
    }

    fn drain_debug_messages(&self) -> Vec<DebugMessage> {
        std::mem::take(&mut *self.gpu.messages.lock())
    }
}

fn downcast<T: 'static>(any: &dyn Any) -> RhiResult<&T> {
    any.downcast_ref::<T>()
        .ok_or(RhiError::InvalidState("object belongs to a different backend"))
}

fn resource_size(desc: &ResourceDesc) -> u64 {
    desc.copyable_footprints(0).1
}

struct NullQueue {
    gpu: Arc<Gpu>,
    node: NodeIndex,
    kind: QueueKind,
}

impl NativeQueue for NullQueue {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn node(&self) -> NodeIndex {
        self.node
    }

    fn kind(&self) -> QueueKind {
        self.kind
    }

    fn execute(&self, lists: &[&dyn NativeCommandList]) -> RhiResult<()> {
        self.gpu.check_removed()?;

        for list in lists {
            let list = downcast::<NullCommandList>(list.as_any())?;
            if !list.closed {
                return Err(RhiError::native("ExecuteCommandLists", NativeErrorCode::INVALID_CALL));
            }
            debug_assert_eq!((list.node, list.kind), (self.node, self.kind));

            for command in &list.commands {
                execute_copy(command)?;
            }

            self.gpu.timeline.lock().log.push(QueueOp::Execute {
                node: self.node,
                kind: self.kind,
                commands: list.commands.iter().map(Command::name).collect(),
            });
        }
        Ok(())
    }

    fn signal(&self, fence: &dyn NativeFence, value: u64) -> RhiResult<()> {
        let fence = downcast::<NullFence>(fence.as_any())?;
        let mut timeline = self.gpu.timeline.lock();
        timeline.log.push(QueueOp::Signal {
            node: self.node,
            kind: self.kind,
            value,
        });

        if self.gpu.options.auto_complete {
            fence.value.fetch_max(value, Ordering::AcqRel);
        } else {
            timeline.pending.push_back((fence.value.clone(), value));
        }
        Ok(())
    }

    fn wait(&self, fence: &dyn NativeFence, value: u64) -> RhiResult<()> {
        downcast::<NullFence>(fence.as_any())?;
        self.gpu.timeline.lock().log.push(QueueOp::Wait {
            node: self.node,
            kind: self.kind,
            value,
        });
        Ok(())
    }
}

fn execute_copy(command: &Command) -> RhiResult<()> {
    match command {
        Command::CopyResource { dst, src } => {
            let size = resource_size(src.desc()).min(resource_size(dst.desc()));
            copy_bytes(&**src, 0, &**dst, 0, size)
        }
        Command::CopyBufferRegion {
            dst,
            dst_offset,
            src,
            src_offset,
            size,
        } => copy_bytes(&**src, *src_offset, &**dst, *dst_offset, *size),
        Command::CopyTextureRegion { dst, src } => {
            let (src, src_footprint) = locate(src)?;
            let (dst, dst_footprint) = locate(dst)?;

            let rows = src_footprint.row_count().min(dst_footprint.row_count())
                * src_footprint.depth.min(dst_footprint.depth);
            let row_size = src_footprint.row_size().min(dst_footprint.row_size());

            for row in 0..u64::from(rows) {
                copy_bytes(
                    src,
                    src_footprint.offset + row * u64::from(src_footprint.row_pitch),
                    dst,
                    dst_footprint.offset + row * u64::from(dst_footprint.row_pitch),
                    u64::from(row_size),
                )?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn locate(location: &TextureCopyLocation) -> RhiResult<(&dyn NativeResource, PlacedFootprint)> {
    match location {
        TextureCopyLocation::Subresource { resource, index } => {
            let (footprints, _) = resource.desc().copyable_footprints(0);
            let footprint = footprints
                .get(*index as usize)
                .copied()
                .ok_or(RhiError::InvalidState("copy from a subresource that does not exist"))?;
            Ok((&**resource, footprint))
        }
        TextureCopyLocation::Footprint { resource, footprint } => Ok((&**resource, *footprint)),
    }
}

fn copy_bytes(src: &dyn NativeResource, src_offset: u64, dst: &dyn NativeResource, dst_offset: u64, size: u64) -> RhiResult<()> {
    let mut staging = vec![0; size as usize];
    src.read(src_offset, &mut staging)?;
    dst.write(dst_offset, &staging)
}

struct NullFence {
    gpu: Arc<Gpu>,
    value: Arc<AtomicU64>,
}

impl NativeFence for NullFence {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn completed_value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Runs the timeline forward until this fence reaches `value`.
    fn wait_for_value(&self, value: u64) -> RhiResult<()> {
        let mut timeline = self.gpu.timeline.lock();
        while self.completed_value() < value {
            if !timeline.complete_one() {
                return Err(RhiError::InvalidState("waited for a fence value that was never signalled"));
            }
        }
        Ok(())
    }
}

struct NullCommandAllocator {
    node: NodeIndex,
    kind: QueueKind,
}

impl NativeCommandAllocator for NullCommandAllocator {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn reset(&mut self) -> RhiResult<()> {
        Ok(())
    }
}

struct NullCommandList {
    node: NodeIndex,
    kind: QueueKind,
    commands: Vec<Command>,
    closed: bool,
}

impl NativeCommandList for NullCommandList {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn reset(&mut self, allocator: &dyn NativeCommandAllocator) -> RhiResult<()> {
        if !self.closed {
            return Err(RhiError::native("ID3D12GraphicsCommandList::Reset", NativeErrorCode::INVALID_CALL));
        }
        downcast::<NullCommandAllocator>(allocator.as_any())?;
        self.commands.clear();
        self.closed = false;
        Ok(())
    }

    fn close(&mut self) -> RhiResult<()> {
        if self.closed {
            return Err(RhiError::native("ID3D12GraphicsCommandList::Close", NativeErrorCode::INVALID_CALL));
        }
        self.closed = true;
        Ok(())
    }

    fn record(&mut self, command: Command) {
        debug_assert!(!self.closed, "recording {command:?} into a closed list");
        self.commands.push(command);
    }
}

/// What a null descriptor slot holds.
#[derive(Clone, Debug, PartialEq)]
pub enum NullDescriptor {
    View {
        desc: ViewDesc,
        resource: Option<u64>,
    },
    Sampler(SamplerDesc),
}

/// Slots are stored sparsely so tier-sized heaps cost nothing until used.
struct NullDescriptorHeap {
    kind: DescriptorHeapKind,
    capacity: u32,
    shader_visible: bool,
    entries: Mutex<HashMap<u32, NullDescriptor>>,
}

impl NullDescriptorHeap {
    fn set(&self, index: u32, descriptor: NullDescriptor) {
        assert!(index < self.capacity, "descriptor {index} outside heap of {}", self.capacity);
        self.entries.lock().insert(index, descriptor);
    }

    fn clear(&self, index: u32) {
        self.entries.lock().remove(&index);
    }

    fn descriptor(&self, index: u32) -> Option<NullDescriptor> {
        self.entries.lock().get(&index).cloned()
    }
}

impl NativeDescriptorHeap for NullDescriptorHeap {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }
}

/// Reads back what was last written to a null descriptor slot.
#[must_use]
pub fn read_descriptor(handle: &DescriptorHandle) -> Option<NullDescriptor> {
    downcast::<NullDescriptorHeap>(handle.heap.as_any())
        .ok()?
        .descriptor(handle.index)
}

struct NullResource {
    gpu: Arc<Gpu>,
    desc: ResourceDesc,
    heap: HeapType,
    node: NodeIndex,
    name: String,
    address: u64,
    size: u64,
    /// Grown on first write; unwritten bytes read as zero.
    memory: Mutex<Vec<u8>>,
}

impl NullResource {
    fn check_range(&self, offset: u64, len: usize) -> RhiResult<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(RhiError::InvalidState("access outside the resource")),
        }
    }
}

impl NativeResource for NullResource {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    fn gpu_address(&self) -> u64 {
        self.address
    }

    fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        self.check_range(offset, data.len())?;
        let start = offset as usize;
        let end = start + data.len();

        let mut memory = self.memory.lock();
        if memory.len() < end {
            memory.resize(end, 0);
        }
        memory[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> RhiResult<()> {
        self.check_range(offset, out.len())?;
        let start = offset as usize;

        let memory = self.memory.lock();
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = memory.get(start + i).copied().unwrap_or(0);
        }
        Ok(())
    }
}

impl Drop for NullResource {
    fn drop(&mut self) {
        log::trace!("null resource {:?} on {} ({:?}) released", self.name, self.node, self.heap);
        self.gpu.committed_bytes.fetch_sub(self.size, Ordering::AcqRel);
    }
}

struct NullRootSignature {
    nodes: GpuNodeMask,
    parameters: usize,
}

impl NativeRootSignature for NullRootSignature {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for NullRootSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NullRootSignature({:?}, {} parameters)", self.nodes, self.parameters)
    }
}

struct NullPipeline {
    kind: PipelineKind,
    hash: u64,
}

impl NativePipeline for NullPipeline {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Pipelines by name, remembered by the hash of the description they were
/// built from.
struct NullPipelineLibrary {
    entries: HashMap<String, (PipelineKind, u64)>,
}

impl NullPipelineLibrary {
    fn parse(blob: &[u8]) -> Option<HashMap<String, (PipelineKind, u64)>> {
        let mut reader = CacheReader::new(blob);
        if reader.bytes(LIBRARY_MAGIC.len()) != LIBRARY_MAGIC {
            return None;
        }

        let count = reader.u32();
        let mut entries = HashMap::new();
        for _ in 0..count {
            let name = reader.string();
            let kind = if reader.bool() {
                PipelineKind::Compute
            } else {
                PipelineKind::Graphics
            };
            let hash = reader.u64();
            if reader.has_error() {
                return None;
            }
            entries.insert(name, (kind, hash));
        }

        (!reader.has_error() && reader.remaining() == 0).then_some(entries)
    }

    fn load(&self, name: &str, kind: PipelineKind, hash: u64) -> RhiResult<Option<Arc<dyn NativePipeline>>> {
        match self.entries.get(name) {
            None => Ok(None),
            Some(&entry) if entry == (kind, hash) => Ok(Some(Arc::new(NullPipeline { kind, hash }))),
            Some(_) => Err(RhiError::native("LoadPipeline", NativeErrorCode::INVALID_ARG)),
        }
    }
}

impl NativePipelineLibrary for NullPipelineLibrary {
    fn load_graphics(&mut self, name: &str, desc: &GraphicsPipelineDesc) -> RhiResult<Option<Arc<dyn NativePipeline>>> {
        self.load(name, PipelineKind::Graphics, desc.combined_hash())
    }

    fn load_compute(&mut self, name: &str, desc: &ComputePipelineDesc) -> RhiResult<Option<Arc<dyn NativePipeline>>> {
        self.load(name, PipelineKind::Compute, desc.combined_hash())
    }

    fn store(&mut self, name: &str, pipeline: &dyn NativePipeline) -> RhiResult<()> {
        let pipeline = downcast::<NullPipeline>(pipeline.as_any())?;
        if self.entries.contains_key(name) {
            return Err(RhiError::native("StorePipeline", NativeErrorCode::INVALID_ARG));
        }
        self.entries.insert(name.to_owned(), (pipeline.kind, pipeline.hash));
        Ok(())
    }

    fn serialize(&self) -> RhiResult<Vec<u8>> {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();

        let mut blob = LIBRARY_MAGIC.to_vec();
        blob.u32(names.len() as u32);
        for name in names {
            let (kind, hash) = self.entries[name];
            blob.str(name);
            blob.bool(kind == PipelineKind::Compute);
            blob.u64(hash);
        }
        Ok(blob)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::{
        format::Format,
        resource::desc::{ResourceDimension, ResourceFlags},
    };

    fn upload(backend: &NullBackend, size: u64) -> Arc<dyn NativeResource> {
        backend
            .create_resource(
                &ResourceDesc::buffer(size, ResourceFlags::empty()),
                HeapType::Upload,
                NodeIndex::ZERO,
                GpuNodeMask::first_n(1),
                ResourceState::GENERIC_READ,
                "upload",
            )
            .unwrap()
    }

    #[test]
    fn copies_execute_in_submission_order() {
        let backend = NullBackend::new(1);
        let queue = backend.create_queue(NodeIndex::ZERO, QueueKind::Copy).unwrap();
        let allocator = backend.create_command_allocator(NodeIndex::ZERO, QueueKind::Copy).unwrap();
        let mut list = backend
            .create_command_list(NodeIndex::ZERO, QueueKind::Copy, &*allocator)
            .unwrap();

        let src = upload(&backend, 16);
        let dst = upload(&backend, 16);
        src.write(0, &[9; 16]).unwrap();

        list.record(Command::CopyBufferRegion {
            dst: dst.clone(),
            dst_offset: 4,
            src,
            src_offset: 0,
            size: 8,
        });
        list.close().unwrap();
        queue.execute(&[&*list]).unwrap();

        let mut out = [0; 16];
        dst.read(0, &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0, 9, 9, 9, 9, 9, 9, 9, 9, 0, 0, 0, 0]);
        assert_eq!(backend.executed(QueueKind::Copy), vec![vec!["CopyBufferRegion"]]);
    }

    #[test]
    fn open_lists_cannot_execute() {
        let backend = NullBackend::new(1);
        let queue = backend.create_queue(NodeIndex::ZERO, QueueKind::Direct).unwrap();
        let allocator = backend.create_command_allocator(NodeIndex::ZERO, QueueKind::Direct).unwrap();
        let mut list = backend
            .create_command_list(NodeIndex::ZERO, QueueKind::Direct, &*allocator)
            .unwrap();
        list.record(Command::Barriers(smallvec![]));

        assert!(queue.execute(&[&*list]).is_err());
        list.close().unwrap();
        assert!(queue.execute(&[&*list]).is_ok());
    }

    #[test]
    fn texture_copies_use_placed_footprints() {
        let backend = NullBackend::new(1);
        let desc = ResourceDesc {
            dimension: ResourceDimension::Texture2D,
            width: 4,
            height: 2,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: Format::R8G8B8A8Unorm,
            sample_count: 1,
            flags: ResourceFlags::empty(),
        };
        let texture = backend
            .create_resource(
                &desc,
                HeapType::Default,
                NodeIndex::ZERO,
                GpuNodeMask::first_n(1),
                ResourceState::COMMON,
                "texture",
            )
            .unwrap();

        let staging = upload(&backend, 1024);
        let footprint = desc.copyable_footprint(0, 0);
        staging.write(0, &[1; 16]).unwrap();
        staging.write(u64::from(footprint.row_pitch), &[2; 16]).unwrap();

        execute_copy(&Command::CopyTextureRegion {
            dst: TextureCopyLocation::Subresource {
                resource: texture.clone(),
                index: 0,
            },
            src: TextureCopyLocation::Footprint {
                resource: staging,
                footprint,
            },
        })
        .unwrap();

        let mut row = [0; 16];
        texture.read(u64::from(footprint.row_pitch), &mut row).unwrap();
        assert_eq!(row, [2; 16]);
    }

    #[test]
    fn memory_budget_reports_out_of_memory() {
        let backend = NullBackend::with_options(NullOptions {
            memory_budget: Some(100),
            ..NullOptions::default()
        });

        let kept = upload(&backend, 64);
        let err = backend
            .create_resource(
                &ResourceDesc::buffer(64, ResourceFlags::empty()),
                HeapType::Default,
                NodeIndex::ZERO,
                GpuNodeMask::first_n(1),
                ResourceState::COMMON,
                "too much",
            )
            .err()
            .unwrap();
        assert!(matches!(err, RhiError::OutOfMemory(_)));

        drop(kept);
        assert_eq!(backend.committed_bytes(), 0);
    }

    #[test]
    fn pipeline_library_round_trips_through_its_blob() {
        let backend = NullBackend::with_options(NullOptions {
            pipeline_library: true,
            ..NullOptions::default()
        });

        let mut library = backend.create_pipeline_library(&[]).unwrap();
        let pipeline = NullPipeline {
            kind: PipelineKind::Compute,
            hash: 42,
        };
        library.store("a", &pipeline).unwrap();
        assert!(library.store("a", &pipeline).is_err());

        let blob = library.serialize().unwrap();
        let reopened = backend.create_pipeline_library(&blob).unwrap();
        assert_eq!(reopened.len(), 1);

        assert!(backend.create_pipeline_library(&blob[..blob.len() - 1]).is_err());
    }
}
