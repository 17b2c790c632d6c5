//! The seam between the RHI core and the native graphics API.
//!
//! Everything that would reach the driver goes through [`Backend`] and the
//! native object traits. Command lists record [`Command`]s, which each backend
//! translates to its own calls.

use std::{any::Any, fmt, sync::Arc};

use geometry::{Rect, Texel, Viewport};
use smallvec::SmallVec;

use crate::{
    descriptor::{DescriptorHeapKind, ResourceBindingTier, SamplerDesc, ViewDesc},
    error::{DeviceRemovedReason, RhiResult},
    format::Format,
    node::{GpuNodeMask, NodeIndex},
    pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, PrimitiveTopology, RootSignatureDesc},
    resource::desc::{HeapType, PlacedFootprint, ResourceDesc, ResourceState},
};

#[cfg(target_os = "windows")]
pub mod dx12;
pub mod null;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Direct,
    Copy,
    Compute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FeatureLevel {
    Level11_0,
    Level11_1,
    Level12_0,
    Level12_1,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterDesc {
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub dedicated_video_memory: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugSeverity {
    Message,
    Info,
    Warning,
    Error,
    Corruption,
}

/// A message reported by the native debug layer.
#[derive(Clone, Debug)]
pub struct DebugMessage {
    pub severity: DebugSeverity,
    pub id: u32,
    pub description: String,
}

pub trait Backend: Send + Sync + 'static {
    fn adapter_desc(&self) -> AdapterDesc;

    /// The number of physical nodes behind the adapter.
    fn node_count(&self) -> u32;

    fn feature_level(&self) -> FeatureLevel;

    fn resource_binding_tier(&self) -> ResourceBindingTier;

    fn supports_pipeline_library(&self) -> bool;

    fn create_queue(&self, node: NodeIndex, kind: QueueKind) -> RhiResult<Arc<dyn NativeQueue>>;

    /// Creates a fence that every node of the adapter can signal and wait on.
    fn create_fence(&self, initial_value: u64) -> RhiResult<Arc<dyn NativeFence>>;

    fn create_command_allocator(
        &self,
        node: NodeIndex,
        kind: QueueKind,
    ) -> RhiResult<Box<dyn NativeCommandAllocator>>;

    /// Creates a command list in the open state, recording into `allocator`.
    fn create_command_list(
        &self,
        node: NodeIndex,
        kind: QueueKind,
        allocator: &dyn NativeCommandAllocator,
    ) -> RhiResult<Box<dyn NativeCommandList>>;

    fn create_descriptor_heap(
        &self,
        node: NodeIndex,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> RhiResult<Arc<dyn NativeDescriptorHeap>>;

    /// Creates a committed resource on `node`, accessible from `visible`.
    fn create_resource(
        &self,
        desc: &ResourceDesc,
        heap: HeapType,
        node: NodeIndex,
        visible: GpuNodeMask,
        initial_state: ResourceState,
        name: &str,
    ) -> RhiResult<Arc<dyn NativeResource>>;

    fn write_view(
        &self,
        heap: &dyn NativeDescriptorHeap,
        index: u32,
        view: &ViewDesc,
        resource: Option<&dyn NativeResource>,
    );

    fn write_sampler(&self, heap: &dyn NativeDescriptorHeap, index: u32, desc: &SamplerDesc);

    /// Copies `src` descriptors into consecutive slots of `dst`.
    fn copy_descriptors(&self, dst: &dyn NativeDescriptorHeap, dst_start: u32, src: &[DescriptorHandle]);

    fn serialize_root_signature(&self, desc: &RootSignatureDesc) -> RhiResult<Vec<u8>>;

    fn create_root_signature(
        &self,
        nodes: GpuNodeMask,
        blob: &[u8],
    ) -> RhiResult<Arc<dyn NativeRootSignature>>;

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<Arc<dyn NativePipeline>>;

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> RhiResult<Arc<dyn NativePipeline>>;

    /// Opens a driver pipeline library from a previously serialized blob, or
    /// an empty library if `blob` is empty.
    fn create_pipeline_library(&self, blob: &[u8]) -> RhiResult<Box<dyn NativePipelineLibrary>>;

    /// Returns why the device was removed, if it has been.
    fn device_removed_reason(&self) -> Option<DeviceRemovedReason>;

    /// Takes the debug layer messages reported since the last call.
    fn drain_debug_messages(&self) -> Vec<DebugMessage>;
}

pub trait NativeQueue: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn node(&self) -> NodeIndex;

    fn kind(&self) -> QueueKind;

    /// Submits closed command lists for execution in order.
    fn execute(&self, lists: &[&dyn NativeCommandList]) -> RhiResult<()>;

    /// Sets `fence` to `value` once all previously submitted work completes.
    fn signal(&self, fence: &dyn NativeFence, value: u64) -> RhiResult<()>;

    /// Stalls the queue until `fence` reaches `value`.
    fn wait(&self, fence: &dyn NativeFence, value: u64) -> RhiResult<()>;
}

pub trait NativeFence: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn completed_value(&self) -> u64;

    /// Blocks the calling thread until the fence reaches `value`.
    fn wait_for_value(&self, value: u64) -> RhiResult<()>;
}

pub trait NativeCommandAllocator: Send {
    fn as_any(&self) -> &dyn Any;

    /// Releases the memory of every list recorded from this allocator. The
    /// caller guarantees the GPU has finished with it.
    fn reset(&mut self) -> RhiResult<()>;
}

pub trait NativeCommandList: Send {
    fn as_any(&self) -> &dyn Any;

    /// Reopens a closed list, recording into `allocator`.
    fn reset(&mut self, allocator: &dyn NativeCommandAllocator) -> RhiResult<()>;

    fn close(&mut self) -> RhiResult<()>;

    fn record(&mut self, command: Command);
}

pub trait NativeDescriptorHeap: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn kind(&self) -> DescriptorHeapKind;

    fn capacity(&self) -> u32;

    fn is_shader_visible(&self) -> bool;
}

pub trait NativeResource: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn desc(&self) -> &ResourceDesc;

    fn gpu_address(&self) -> u64;

    /// Writes into a CPU-visible (upload) resource.
    fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()>;

    /// Reads from a CPU-visible (readback) resource.
    fn read(&self, offset: u64, out: &mut [u8]) -> RhiResult<()>;
}

pub trait NativeRootSignature: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

pub trait NativePipeline: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// A driver-managed store of compiled pipelines, persisted as one blob.
pub trait NativePipelineLibrary: Send {
    fn load_graphics(
        &mut self,
        name: &str,
        desc: &GraphicsPipelineDesc,
    ) -> RhiResult<Option<Arc<dyn NativePipeline>>>;

    fn load_compute(
        &mut self,
        name: &str,
        desc: &ComputePipelineDesc,
    ) -> RhiResult<Option<Arc<dyn NativePipeline>>>;

    fn store(&mut self, name: &str, pipeline: &dyn NativePipeline) -> RhiResult<()>;

    fn serialize(&self) -> RhiResult<Vec<u8>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A descriptor within a native heap.
#[derive(Clone)]
pub struct DescriptorHandle {
    pub heap: Arc<dyn NativeDescriptorHeap>,
    pub index: u32,
}

impl PartialEq for DescriptorHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.heap, &other.heap) && self.index == other.index
    }
}

impl fmt::Debug for DescriptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DescriptorHandle({:?}, {})", self.heap.kind(), self.index)
    }
}

#[derive(Clone)]
pub enum Barrier {
    Transition {
        resource: Arc<dyn NativeResource>,
        subresource: u32,
        before: ResourceState,
        after: ResourceState,
    },
    /// Orders unordered-access writes, for one resource or all of them.
    Uav(Option<Arc<dyn NativeResource>>),
    Aliasing {
        before: Option<Arc<dyn NativeResource>>,
        after: Option<Arc<dyn NativeResource>>,
    },
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transition {
                subresource,
                before,
                after,
                ..
            } => write!(f, "Transition({subresource}, {before:?} -> {after:?})"),
            Self::Uav(_) => f.write_str("Uav"),
            Self::Aliasing { .. } => f.write_str("Aliasing"),
        }
    }
}

#[derive(Clone)]
pub enum TextureCopyLocation {
    Subresource {
        resource: Arc<dyn NativeResource>,
        index: u32,
    },
    Footprint {
        resource: Arc<dyn NativeResource>,
        footprint: PlacedFootprint,
    },
}

#[derive(Clone)]
pub struct VertexBufferView {
    pub resource: Arc<dyn NativeResource>,
    pub offset: u64,
    pub size: u32,
    pub stride: u32,
}

#[derive(Clone)]
pub struct IndexBufferView {
    pub resource: Arc<dyn NativeResource>,
    pub offset: u64,
    pub size: u32,
    pub format: Format,
}

/// One recorded command.
///
/// Commands own references to everything they touch so that a list keeps its
/// inputs alive until it is reset.
#[derive(Clone)]
pub enum Command {
    SetGraphicsPipeline(Arc<dyn NativePipeline>),
    SetComputePipeline(Arc<dyn NativePipeline>),
    SetGraphicsRootSignature(Arc<dyn NativeRootSignature>),
    SetComputeRootSignature(Arc<dyn NativeRootSignature>),
    SetDescriptorHeaps {
        view: Arc<dyn NativeDescriptorHeap>,
        sampler: Arc<dyn NativeDescriptorHeap>,
    },
    SetGraphicsDescriptorTable {
        root_index: u32,
        base: DescriptorHandle,
    },
    SetComputeDescriptorTable {
        root_index: u32,
        base: DescriptorHandle,
    },
    SetPrimitiveTopology(PrimitiveTopology),
    SetViewport(Viewport),
    SetScissor(Rect<u32, Texel>),
    SetRenderTargets {
        render_targets: SmallVec<[DescriptorHandle; 8]>,
        depth_stencil: Option<DescriptorHandle>,
    },
    SetVertexBuffers {
        start_slot: u32,
        views: SmallVec<[VertexBufferView; 4]>,
    },
    SetIndexBuffer(IndexBufferView),
    Barriers(SmallVec<[Barrier; 8]>),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    ClearRenderTarget {
        target: DescriptorHandle,
        color: [f32; 4],
    },
    ClearDepthStencil {
        target: DescriptorHandle,
        depth: Option<f32>,
        stencil: Option<u8>,
    },
    CopyResource {
        dst: Arc<dyn NativeResource>,
        src: Arc<dyn NativeResource>,
    },
    CopyBufferRegion {
        dst: Arc<dyn NativeResource>,
        dst_offset: u64,
        src: Arc<dyn NativeResource>,
        src_offset: u64,
        size: u64,
    },
    CopyTextureRegion {
        dst: TextureCopyLocation,
        src: TextureCopyLocation,
    },
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetGraphicsPipeline(_) => "SetGraphicsPipeline",
            Self::SetComputePipeline(_) => "SetComputePipeline",
            Self::SetGraphicsRootSignature(_) => "SetGraphicsRootSignature",
            Self::SetComputeRootSignature(_) => "SetComputeRootSignature",
            Self::SetDescriptorHeaps { .. } => "SetDescriptorHeaps",
            Self::SetGraphicsDescriptorTable { .. } => "SetGraphicsDescriptorTable",
            Self::SetComputeDescriptorTable { .. } => "SetComputeDescriptorTable",
            Self::SetPrimitiveTopology(_) => "SetPrimitiveTopology",
            Self::SetViewport(_) => "SetViewport",
            Self::SetScissor(_) => "SetScissor",
            Self::SetRenderTargets { .. } => "SetRenderTargets",
            Self::SetVertexBuffers { .. } => "SetVertexBuffers",
            Self::SetIndexBuffer(_) => "SetIndexBuffer",
            Self::Barriers(_) => "Barriers",
            Self::Draw { .. } => "Draw",
            Self::DrawIndexed { .. } => "DrawIndexed",
            Self::Dispatch { .. } => "Dispatch",
            Self::ClearRenderTarget { .. } => "ClearRenderTarget",
            Self::ClearDepthStencil { .. } => "ClearDepthStencil",
            Self::CopyResource { .. } => "CopyResource",
            Self::CopyBufferRegion { .. } => "CopyBufferRegion",
            Self::CopyTextureRegion { .. } => "CopyTextureRegion",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Barriers(barriers) => write!(f, "Barriers({barriers:?})"),
            Self::Draw { vertex_count, .. } => write!(f, "Draw({vertex_count})"),
            Self::Dispatch { x, y, z } => write!(f, "Dispatch({x}, {y}, {z})"),
            other => f.write_str(other.name()),
        }
    }
}
