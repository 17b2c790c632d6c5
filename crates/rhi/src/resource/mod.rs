//! GPU resources: buffers, textures and uniform buffers.

use std::{fmt, sync::Arc};

pub mod desc;
mod texture;

pub use texture::{LockMode, Texture, TextureLock, TextureNode};

use self::desc::{align_up, HeapType, ResourceDesc, ResourceFlags, ResourceState, ALL_SUBRESOURCES};
use crate::{
    adapter::Adapter,
    backend::{DescriptorHandle, IndexBufferView, NativeResource, VertexBufferView},
    deferred_deletion::{DeferredDeletionQueue, DeferredObject},
    descriptor::{view_desc::CbvDesc, DescriptorHeapKind, DescriptorSlot, Sampler, SamplerDesc, ViewDesc},
    error::{RhiError, RhiResult},
    format::Format,
    memory::UploadAllocation,
    node::{GpuNodeMask, LinkedObject, NodeIndex},
};

/// Constant buffer views must start and end on this boundary.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// A native resource on one node.
///
/// The native object is handed to deferred deletion when the last reference
/// drops, since commands in flight may still use it.
pub struct Resource {
    native: Arc<dyn NativeResource>,
    heap: HeapType,
    node: NodeIndex,
    visible: GpuNodeMask,
    default_state: ResourceState,
    name: String,
    deletion: Arc<DeferredDeletionQueue>,
}

impl Resource {
    pub(crate) fn new(
        native: Arc<dyn NativeResource>,
        heap: HeapType,
        node: NodeIndex,
        visible: GpuNodeMask,
        default_state: ResourceState,
        name: String,
        deletion: Arc<DeferredDeletionQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            native,
            heap,
            node,
            visible,
            default_state,
            name,
            deletion,
        })
    }

    #[must_use]
    pub fn native(&self) -> &Arc<dyn NativeResource> {
        &self.native
    }

    #[must_use]
    pub fn desc(&self) -> &ResourceDesc {
        self.native.desc()
    }

    #[must_use]
    pub fn heap(&self) -> HeapType {
        self.heap
    }

    #[must_use]
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    /// The nodes that may read the resource.
    #[must_use]
    pub fn visible_nodes(&self) -> GpuNodeMask {
        self.visible
    }

    /// The state the resource is kept in between uses.
    #[must_use]
    pub fn default_state(&self) -> ResourceState {
        self.default_state
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn gpu_address(&self) -> u64 {
        self.native.gpu_address()
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        self.deletion.enqueue(DeferredObject::Resource(self.native.clone()));
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("node", &self.node)
            .field("heap", &self.heap)
            .field("address", &format_args!("{:#x}", self.gpu_address()))
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub size: u64,
    /// The size of one element, for vertex and structured buffers.
    pub stride: u32,
    pub flags: ResourceFlags,
    pub heap: HeapType,
    pub name: String,
}

impl BufferDesc {
    #[must_use]
    pub fn new(size: u64, stride: u32, name: impl Into<String>) -> Self {
        Self {
            size,
            stride,
            flags: ResourceFlags::empty(),
            heap: HeapType::Default,
            name: name.into(),
        }
    }

    fn default_state(&self) -> ResourceState {
        match self.heap {
            HeapType::Upload => ResourceState::GENERIC_READ,
            HeapType::Readback => ResourceState::COPY_DEST,
            HeapType::Default if self.flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS) => {
                ResourceState::UNORDERED_ACCESS
            }
            HeapType::Default => ResourceState::COMMON,
        }
    }
}

/// A buffer with a copy on every active node.
pub struct Buffer {
    desc: BufferDesc,
    chain: LinkedObject<Arc<Resource>>,
}

impl Buffer {
    #[must_use]
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.desc.size
    }

    #[must_use]
    pub fn chain(&self) -> &LinkedObject<Arc<Resource>> {
        &self.chain
    }

    #[must_use]
    pub fn resource(&self, node: NodeIndex) -> Option<&Arc<Resource>> {
        self.chain.get(node)
    }

    /// ## Errors
    ///
    /// Fails if the buffer has no copy on `node`, or is too large for a view
    /// to address.
    pub fn vertex_view(&self, node: NodeIndex) -> RhiResult<VertexBufferView> {
        Ok(VertexBufferView {
            resource: self.node_resource(node)?.native().clone(),
            offset: 0,
            size: view_size(self.desc.size)?,
            stride: self.desc.stride,
        })
    }

    /// ## Errors
    ///
    /// Same as [`Buffer::vertex_view`].
    pub fn index_view(&self, node: NodeIndex, format: Format) -> RhiResult<IndexBufferView> {
        debug_assert!(matches!(format, Format::R16Uint | Format::R32Uint));
        Ok(IndexBufferView {
            resource: self.node_resource(node)?.native().clone(),
            offset: 0,
            size: view_size(self.desc.size)?,
            format,
        })
    }

    fn node_resource(&self, node: NodeIndex) -> RhiResult<&Arc<Resource>> {
        self.resource(node)
            .ok_or(RhiError::InvalidState("buffer has no copy on this node"))
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("desc", &self.desc)
            .field("nodes", &self.chain.node_mask())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformBufferUsage {
    /// Contents live in the per-frame upload ring and are only valid for the
    /// frame they were created in.
    SingleFrame,
    /// Contents live in a dedicated upload buffer.
    MultiFrame,
}

/// Constants read by shaders through a constant buffer view.
pub struct UniformBuffer {
    node: NodeIndex,
    usage: UniformBufferUsage,
    memory: UploadAllocation,
    _owner: Option<Arc<Resource>>,
    slot: Option<DescriptorSlot>,
    handle: DescriptorHandle,
    deletion: Arc<DeferredDeletionQueue>,
}

impl UniformBuffer {
    #[must_use]
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    #[must_use]
    pub fn usage(&self) -> UniformBufferUsage {
        self.usage
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.memory.size
    }

    #[must_use]
    pub fn handle(&self) -> &DescriptorHandle {
        &self.handle
    }

    #[must_use]
    pub fn gpu_address(&self) -> u64 {
        self.memory.resource.gpu_address() + self.memory.offset
    }

    /// Overwrites the start of the buffer. The GPU sees the new contents in
    /// commands executed after the call.
    pub fn update(&self, data: &[u8]) -> RhiResult<()> {
        if data.len() as u64 > self.memory.size {
            return Err(RhiError::InvalidState("uniform buffer update larger than the buffer"));
        }
        self.memory.write(0, data)
    }
}

impl Drop for UniformBuffer {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.deletion.enqueue(DeferredObject::Descriptor(slot));
        }
    }
}

impl fmt::Debug for UniformBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniformBuffer")
            .field("node", &self.node)
            .field("usage", &self.usage)
            .field("size", &self.memory.size)
            .finish()
    }
}

impl Adapter {
    /// Creates a buffer on every active node, uploading `initial_data` into
    /// each copy.
    pub fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> RhiResult<Buffer> {
        if let Some(data) = initial_data {
            if data.len() as u64 > desc.size {
                return Err(RhiError::InvalidState("initial data larger than the buffer"));
            }
            if desc.heap == HeapType::Readback {
                return Err(RhiError::InvalidState("readback buffers cannot take initial data"));
            }
        }

        let native_desc = ResourceDesc::buffer(desc.size, desc.flags);
        let default_state = desc.default_state();

        let chain = self.create_linked_object(|node| {
            let device = self.device_for(node)?;
            let resource = device
                .core()
                .create_resource(&native_desc, desc.heap, default_state, &desc.name)?;

            match (initial_data, desc.heap) {
                (Some(data), HeapType::Upload) => resource.native().write(0, data)?,
                (Some(data), _) => {
                    let staging = device.core().fast_allocator().upload(data, 4)?;
                    let mut context = device.default_context().lock();
                    context.transition_resource(
                        resource.native(),
                        ALL_SUBRESOURCES,
                        default_state,
                        ResourceState::COPY_DEST,
                    );
                    context.copy_buffer_region(
                        resource.native(),
                        0,
                        &staging.resource,
                        staging.offset,
                        data.len() as u64,
                    );
                    context.transition_resource(
                        resource.native(),
                        ALL_SUBRESOURCES,
                        ResourceState::COPY_DEST,
                        default_state,
                    );
                }
                (None, _) => {}
            }

            Ok(resource)
        })?;

        Ok(Buffer {
            desc: desc.clone(),
            chain,
        })
    }

    /// Creates a uniform buffer on every active node, holding `data`.
    pub fn create_uniform_buffer(
        &self,
        data: &[u8],
        usage: UniformBufferUsage,
    ) -> RhiResult<LinkedObject<Arc<UniformBuffer>>> {
        let size = align_up(data.len().max(1) as u64, CONSTANT_BUFFER_ALIGNMENT);
        let cbv_size = view_size(size)?;

        self.create_linked_object(|node| {
            let core = self.device_for(node)?.core();

            let (memory, owner) = match usage {
                UniformBufferUsage::SingleFrame => (
                    core.fast_allocator().allocate(size, CONSTANT_BUFFER_ALIGNMENT)?,
                    None,
                ),
                UniformBufferUsage::MultiFrame => {
                    let owner = core.create_resource(
                        &ResourceDesc::buffer(size, ResourceFlags::empty()),
                        HeapType::Upload,
                        ResourceState::GENERIC_READ,
                        "uniform buffer",
                    )?;
                    let memory = UploadAllocation {
                        resource: owner.native().clone(),
                        offset: 0,
                        size,
                    };
                    (memory, Some(owner))
                }
            };
            memory.write(0, data)?;

            let slot = core.heap(DescriptorHeapKind::View).allocate()?;
            slot.write_view(
                &**core.backend(),
                &ViewDesc::Cbv(CbvDesc {
                    offset: memory.offset,
                    size: cbv_size,
                }),
                Some(&*memory.resource),
            );

            Ok(Arc::new(UniformBuffer {
                node,
                usage,
                memory,
                _owner: owner,
                handle: slot.handle(),
                slot: Some(slot),
                deletion: core.deletion().clone(),
            }))
        })
    }

    /// Returns the sampler matching `desc` on every active node.
    pub fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<LinkedObject<Arc<Sampler>>> {
        self.create_linked_object(|node| {
            let core = self.device_for(node)?.core();
            core.samplers().get_or_create(&**core.backend(), desc)
        })
    }
}

/// Buffer views address at most `u32::MAX` bytes.
fn view_size(size: u64) -> RhiResult<u32> {
    u32::try_from(size).map_err(|_| RhiError::InvalidState("buffer too large for a view"))
}
