//! Native object wrappers.

use std::{any::Any, sync::Arc};

use parking_lot::Mutex;
use smallvec::SmallVec;
#[allow(clippy::wildcard_imports)]
use windows::{
    core::{ComInterface, HSTRING},
    Win32::{
        Foundation::{CloseHandle, HANDLE},
        Graphics::Direct3D12::*,
        System::Threading::{CreateEventW, WaitForSingleObject, INFINITE},
    },
};

use super::{convert, downcast, pipeline};
use crate::{
    backend::{
        Barrier, Command, DescriptorHandle, NativeCommandAllocator, NativeCommandList, NativeDescriptorHeap,
        NativeFence, NativePipeline, NativePipelineLibrary, NativeQueue, NativeResource, NativeRootSignature,
        QueueKind, TextureCopyLocation,
    },
    descriptor::DescriptorHeapKind,
    error::{RhiError, RhiResult},
    node::NodeIndex,
    pipeline::{ComputePipelineDesc, GraphicsPipelineDesc},
    resource::desc::{ResourceDesc, ALL_SUBRESOURCES},
};

pub struct Dx12Queue {
    pub queue: ID3D12CommandQueue,
    pub node: NodeIndex,
    pub kind: QueueKind,
}

// SAFETY: command queues are free-threaded.
unsafe impl Send for Dx12Queue {}
unsafe impl Sync for Dx12Queue {}

impl NativeQueue for Dx12Queue {
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
        let lists = lists
            .iter()
            .map(|list| {
                let list = downcast::<Dx12CommandList>(list.as_any())?;
                list.list
                    .cast::<ID3D12CommandList>()
                    .map(Some)
                    .map_err(convert::error("ID3D12GraphicsCommandList::cast"))
            })
            .collect::<RhiResult<SmallVec<[_; 8]>>>()?;

        unsafe { self.queue.ExecuteCommandLists(&lists) };
        Ok(())
    }

    fn signal(&self, fence: &dyn NativeFence, value: u64) -> RhiResult<()> {
        let fence = downcast::<Dx12Fence>(fence.as_any())?;
        unsafe { self.queue.Signal(&fence.fence, value) }.map_err(convert::error("ID3D12CommandQueue::Signal"))
    }

    fn wait(&self, fence: &dyn NativeFence, value: u64) -> RhiResult<()> {
        let fence = downcast::<Dx12Fence>(fence.as_any())?;
        unsafe { self.queue.Wait(&fence.fence, value) }.map_err(convert::error("ID3D12CommandQueue::Wait"))
    }
}

pub struct Dx12Fence {
    pub fence: ID3D12Fence,
    event: Mutex<HANDLE>,
}

// SAFETY: fences are free-threaded and the event handle is only used under
// the lock.
unsafe impl Send for Dx12Fence {}
unsafe impl Sync for Dx12Fence {}

impl Dx12Fence {
    pub fn new(fence: ID3D12Fence) -> RhiResult<Self> {
        let event = unsafe { CreateEventW(None, false, false, None) }.map_err(convert::error("CreateEventW"))?;
        Ok(Self {
            fence,
            event: Mutex::new(event),
        })
    }
}

impl NativeFence for Dx12Fence {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait_for_value(&self, value: u64) -> RhiResult<()> {
        if self.completed_value() >= value {
            return Ok(());
        }

        let event = self.event.lock();
        unsafe {
            self.fence
                .SetEventOnCompletion(value, *event)
                .map_err(convert::error("ID3D12Fence::SetEventOnCompletion"))?;
            WaitForSingleObject(*event, INFINITE);
        }
        Ok(())
    }
}

impl Drop for Dx12Fence {
    fn drop(&mut self) {
        unsafe { CloseHandle(*self.event.get_mut()) };
    }
}

pub struct Dx12CommandAllocator {
    pub allocator: ID3D12CommandAllocator,
}

unsafe impl Send for Dx12CommandAllocator {}

impl NativeCommandAllocator for Dx12CommandAllocator {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn reset(&mut self) -> RhiResult<()> {
        unsafe { self.allocator.Reset() }.map_err(convert::error("ID3D12CommandAllocator::Reset"))
    }
}

pub struct Dx12CommandList {
    pub list: ID3D12GraphicsCommandList,
    kind: QueueKind,
    /// Commands recorded since the last reset, holding their inputs alive.
    recorded: Vec<Command>,
}

unsafe impl Send for Dx12CommandList {}

impl Dx12CommandList {
    pub fn new(list: ID3D12GraphicsCommandList, kind: QueueKind) -> Self {
        Self {
            list,
            kind,
            recorded: Vec::new(),
        }
    }

    fn translate(&self, command: &Command) -> RhiResult<()> {
        let list = &self.list;
        match command {
            Command::SetGraphicsPipeline(pso) | Command::SetComputePipeline(pso) => {
                let pso = downcast::<Dx12Pipeline>(pso.as_any())?;
                unsafe { list.SetPipelineState(&pso.pipeline) };
            }
            Command::SetGraphicsRootSignature(rs) => {
                let rs = downcast::<Dx12RootSignature>(rs.as_any())?;
                unsafe { list.SetGraphicsRootSignature(&rs.root_signature) };
            }
            Command::SetComputeRootSignature(rs) => {
                let rs = downcast::<Dx12RootSignature>(rs.as_any())?;
                unsafe { list.SetComputeRootSignature(&rs.root_signature) };
            }
            Command::SetDescriptorHeaps { view, sampler } => {
                let heaps = [
                    Some(downcast::<Dx12DescriptorHeap>(view.as_any())?.heap.clone()),
                    Some(downcast::<Dx12DescriptorHeap>(sampler.as_any())?.heap.clone()),
                ];
                unsafe { list.SetDescriptorHeaps(&heaps) };
            }
            Command::SetGraphicsDescriptorTable { root_index, base } => {
                let base = gpu_handle(base)?;
                unsafe { list.SetGraphicsRootDescriptorTable(*root_index, base) };
            }
            Command::SetComputeDescriptorTable { root_index, base } => {
                let base = gpu_handle(base)?;
                unsafe { list.SetComputeRootDescriptorTable(*root_index, base) };
            }
            Command::SetPrimitiveTopology(topology) => unsafe {
                list.IASetPrimitiveTopology(convert::topology(*topology));
            },
            Command::SetViewport(viewport) => unsafe {
                list.RSSetViewports(&[convert::viewport(viewport)]);
            },
            Command::SetScissor(rect) => unsafe {
                list.RSSetScissorRects(&[convert::rect(rect)]);
            },
            Command::SetRenderTargets {
                render_targets,
                depth_stencil,
            } => {
                let targets = render_targets
                    .iter()
                    .map(cpu_handle)
                    .collect::<RhiResult<SmallVec<[_; 8]>>>()?;
                let depth = depth_stencil.as_ref().map(cpu_handle).transpose()?;
                unsafe {
                    list.OMSetRenderTargets(
                        targets.len() as u32,
                        Some(targets.as_ptr()),
                        false,
                        depth.as_ref().map(|d| d as *const _),
                    );
                }
            }
            Command::SetVertexBuffers { start_slot, views } => {
                let views = views
                    .iter()
                    .map(|view| D3D12_VERTEX_BUFFER_VIEW {
                        BufferLocation: view.resource.gpu_address() + view.offset,
                        SizeInBytes: view.size,
                        StrideInBytes: view.stride,
                    })
                    .collect::<SmallVec<[_; 4]>>();
                unsafe { list.IASetVertexBuffers(*start_slot, Some(&views)) };
            }
            Command::SetIndexBuffer(view) => {
                let view = D3D12_INDEX_BUFFER_VIEW {
                    BufferLocation: view.resource.gpu_address() + view.offset,
                    SizeInBytes: view.size,
                    Format: convert::format(view.format),
                };
                unsafe { list.IASetIndexBuffer(Some(&view)) };
            }
            Command::Barriers(barriers) => {
                let barriers = barriers
                    .iter()
                    .map(native_barrier)
                    .collect::<RhiResult<SmallVec<[_; 8]>>>()?;
                unsafe { list.ResourceBarrier(&barriers) };
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => unsafe {
                list.DrawInstanced(*vertex_count, *instance_count, *first_vertex, *first_instance);
            },
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => unsafe {
                list.DrawIndexedInstanced(*index_count, *instance_count, *first_index, *base_vertex, *first_instance);
            },
            Command::Dispatch { x, y, z } => unsafe { list.Dispatch(*x, *y, *z) },
            Command::ClearRenderTarget { target, color } => {
                let target = cpu_handle(target)?;
                unsafe { list.ClearRenderTargetView(target, color.as_ptr(), &[]) };
            }
            Command::ClearDepthStencil { target, depth, stencil } => {
                let target = cpu_handle(target)?;
                let mut flags = D3D12_CLEAR_FLAGS(0);
                if depth.is_some() {
                    flags |= D3D12_CLEAR_FLAG_DEPTH;
                }
                if stencil.is_some() {
                    flags |= D3D12_CLEAR_FLAG_STENCIL;
                }
                unsafe {
                    list.ClearDepthStencilView(target, flags, depth.unwrap_or(1.0), stencil.unwrap_or(0), &[]);
                }
            }
            Command::CopyResource { dst, src } => {
                let dst = downcast::<Dx12Resource>(dst.as_any())?;
                let src = downcast::<Dx12Resource>(src.as_any())?;
                unsafe { list.CopyResource(&dst.resource, &src.resource) };
            }
            Command::CopyBufferRegion {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                let dst = downcast::<Dx12Resource>(dst.as_any())?;
                let src = downcast::<Dx12Resource>(src.as_any())?;
                unsafe { list.CopyBufferRegion(&dst.resource, *dst_offset, &src.resource, *src_offset, *size) };
            }
            Command::CopyTextureRegion { dst, src } => {
                let dst = copy_location(dst)?;
                let src = copy_location(src)?;
                unsafe { list.CopyTextureRegion(&dst, 0, 0, 0, &src, None) };
            }
        }
        Ok(())
    }
}

impl NativeCommandList for Dx12CommandList {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn reset(&mut self, allocator: &dyn NativeCommandAllocator) -> RhiResult<()> {
        let allocator = downcast::<Dx12CommandAllocator>(allocator.as_any())?;
        self.recorded.clear();
        unsafe { self.list.Reset(&allocator.allocator, None) }
            .map_err(convert::error("ID3D12GraphicsCommandList::Reset"))
    }

    fn close(&mut self) -> RhiResult<()> {
        unsafe { self.list.Close() }.map_err(convert::error("ID3D12GraphicsCommandList::Close"))
    }

    fn record(&mut self, command: Command) {
        if let Err(e) = self.translate(&command) {
            log::error!("could not record {command:?} into a {:?} list: {e}", self.kind);
            return;
        }
        self.recorded.push(command);
    }
}

fn native_barrier(barrier: &Barrier) -> RhiResult<D3D12_RESOURCE_BARRIER> {
    let raw = |resource: &Arc<dyn NativeResource>| -> RhiResult<Option<ID3D12Resource>> {
        let resource = downcast::<Dx12Resource>(resource.as_any())?;
        // SAFETY: the barrier borrows the resource without a reference; the
        // recorded command keeps it alive.
        Ok(unsafe { std::mem::transmute_copy(&resource.resource) })
    };

    Ok(match barrier {
        Barrier::Transition {
            resource,
            subresource,
            before,
            after,
        } => D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: std::mem::ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    pResource: std::mem::ManuallyDrop::new(raw(resource)?),
                    Subresource: if *subresource == ALL_SUBRESOURCES {
                        D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES
                    } else {
                        *subresource
                    },
                    StateBefore: convert::resource_state(*before),
                    StateAfter: convert::resource_state(*after),
                }),
            },
        },
        Barrier::Uav(resource) => D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                UAV: std::mem::ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                    pResource: std::mem::ManuallyDrop::new(resource.as_ref().map(raw).transpose()?.flatten()),
                }),
            },
        },
        Barrier::Aliasing { before, after } => D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_ALIASING,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Aliasing: std::mem::ManuallyDrop::new(D3D12_RESOURCE_ALIASING_BARRIER {
                    pResourceBefore: std::mem::ManuallyDrop::new(before.as_ref().map(raw).transpose()?.flatten()),
                    pResourceAfter: std::mem::ManuallyDrop::new(after.as_ref().map(raw).transpose()?.flatten()),
                }),
            },
        },
    })
}

fn copy_location(location: &TextureCopyLocation) -> RhiResult<D3D12_TEXTURE_COPY_LOCATION> {
    let (resource, kind, anonymous) = match location {
        TextureCopyLocation::Subresource { resource, index } => (
            resource,
            D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: *index,
            },
        ),
        TextureCopyLocation::Footprint { resource, footprint } => (
            resource,
            D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: footprint.offset,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: convert::format(footprint.format),
                        Width: footprint.width,
                        Height: footprint.height,
                        Depth: footprint.depth,
                        RowPitch: footprint.row_pitch,
                    },
                },
            },
        ),
    };

    let resource = downcast::<Dx12Resource>(resource.as_any())?;
    Ok(D3D12_TEXTURE_COPY_LOCATION {
        // SAFETY: as for barriers, the recorded command owns the reference.
        pResource: unsafe { std::mem::transmute_copy(&resource.resource) },
        Type: kind,
        Anonymous: anonymous,
    })
}

pub struct Dx12DescriptorHeap {
    pub heap: ID3D12DescriptorHeap,
    kind: DescriptorHeapKind,
    capacity: u32,
    shader_visible: bool,
    increment: u32,
    cpu_start: D3D12_CPU_DESCRIPTOR_HANDLE,
    gpu_start: D3D12_GPU_DESCRIPTOR_HANDLE,
}

// SAFETY: descriptor heaps are free-threaded; writes to distinct slots are
// coordinated by the heap allocators.
unsafe impl Send for Dx12DescriptorHeap {}
unsafe impl Sync for Dx12DescriptorHeap {}

impl Dx12DescriptorHeap {
    pub fn new(
        device: &ID3D12Device,
        heap: ID3D12DescriptorHeap,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Self {
        let increment = unsafe { device.GetDescriptorHandleIncrementSize(convert::heap_kind(kind)) };
        let cpu_start = unsafe { heap.GetCPUDescriptorHandleForHeapStart() };
        let gpu_start = if shader_visible {
            unsafe { heap.GetGPUDescriptorHandleForHeapStart() }
        } else {
            D3D12_GPU_DESCRIPTOR_HANDLE::default()
        };

        Self {
            heap,
            kind,
            capacity,
            shader_visible,
            increment,
            cpu_start,
            gpu_start,
        }
    }

    pub fn cpu(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.cpu_start.ptr + (index * self.increment) as usize,
        }
    }

    pub fn gpu(&self, index: u32) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: self.gpu_start.ptr + u64::from(index * self.increment),
        }
    }
}

impl NativeDescriptorHeap for Dx12DescriptorHeap {
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

pub fn cpu_handle(handle: &DescriptorHandle) -> RhiResult<D3D12_CPU_DESCRIPTOR_HANDLE> {
    Ok(downcast::<Dx12DescriptorHeap>(handle.heap.as_any())?.cpu(handle.index))
}

fn gpu_handle(handle: &DescriptorHandle) -> RhiResult<D3D12_GPU_DESCRIPTOR_HANDLE> {
    let heap = downcast::<Dx12DescriptorHeap>(handle.heap.as_any())?;
    if !heap.shader_visible {
        return Err(RhiError::InvalidState("descriptor table in a CPU-only heap"));
    }
    Ok(heap.gpu(handle.index))
}

pub struct Dx12Resource {
    pub resource: ID3D12Resource,
    desc: ResourceDesc,
    address: u64,
    /// Persistently mapped for upload and readback buffers.
    mapped: Option<*mut u8>,
}

// SAFETY: resources are free-threaded; mapped memory is only written through
// ranges the caller owns.
unsafe impl Send for Dx12Resource {}
unsafe impl Sync for Dx12Resource {}

impl Dx12Resource {
    pub fn new(resource: ID3D12Resource, desc: ResourceDesc, cpu_visible: bool) -> RhiResult<Self> {
        let address = if desc.is_buffer() {
            unsafe { resource.GetGPUVirtualAddress() }
        } else {
            0
        };

        let mapped = if cpu_visible && desc.is_buffer() {
            let mut data = std::ptr::null_mut();
            unsafe { resource.Map(0, None, Some(&mut data)) }.map_err(convert::error("ID3D12Resource::Map"))?;
            Some(data.cast::<u8>())
        } else {
            None
        };

        Ok(Self {
            resource,
            desc,
            address,
            mapped,
        })
    }

    fn mapped_range(&self, offset: u64, len: usize) -> RhiResult<*mut u8> {
        let base = self
            .mapped
            .ok_or(RhiError::InvalidState("CPU access to a resource that is not mapped"))?;
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.desc.width => Ok(unsafe { base.add(offset as usize) }),
            _ => Err(RhiError::InvalidState("access outside the resource")),
        }
    }
}

impl NativeResource for Dx12Resource {
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
        let dst = self.mapped_range(offset, data.len())?;
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> RhiResult<()> {
        let src = self.mapped_range(offset, out.len())?;
        unsafe { std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len()) };
        Ok(())
    }
}

impl Drop for Dx12Resource {
    fn drop(&mut self) {
        if self.mapped.is_some() {
            unsafe { self.resource.Unmap(0, None) };
        }
    }
}

pub struct Dx12RootSignature {
    pub root_signature: ID3D12RootSignature,
}

unsafe impl Send for Dx12RootSignature {}
unsafe impl Sync for Dx12RootSignature {}

impl NativeRootSignature for Dx12RootSignature {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct Dx12Pipeline {
    pub pipeline: ID3D12PipelineState,
}

unsafe impl Send for Dx12Pipeline {}
unsafe impl Sync for Dx12Pipeline {}

impl NativePipeline for Dx12Pipeline {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct Dx12PipelineLibrary {
    pub library: ID3D12PipelineLibrary,
    /// The library reads pipelines out of the blob it was created from.
    pub _blob: Box<[u8]>,
    pub stored: usize,
}

unsafe impl Send for Dx12PipelineLibrary {}

impl NativePipelineLibrary for Dx12PipelineLibrary {
    fn load_graphics(
        &mut self,
        name: &str,
        desc: &GraphicsPipelineDesc,
    ) -> RhiResult<Option<Arc<dyn NativePipeline>>> {
        let name = HSTRING::from(name);
        let result = pipeline::with_graphics_desc(desc, |native| unsafe {
            self.library
                .LoadGraphicsPipeline::<ID3D12PipelineState>(&name, native)
        });
        Ok(result.ok().map(|pipeline| Arc::new(Dx12Pipeline { pipeline }) as Arc<dyn NativePipeline>))
    }

    fn load_compute(
        &mut self,
        name: &str,
        desc: &ComputePipelineDesc,
    ) -> RhiResult<Option<Arc<dyn NativePipeline>>> {
        let name = HSTRING::from(name);
        let native = pipeline::compute_desc(desc)?;
        let result = unsafe {
            self.library
                .LoadComputePipeline::<ID3D12PipelineState>(&name, &native)
        };
        Ok(result.ok().map(|pipeline| Arc::new(Dx12Pipeline { pipeline }) as Arc<dyn NativePipeline>))
    }

    fn store(&mut self, name: &str, pipeline: &dyn NativePipeline) -> RhiResult<()> {
        let pipeline = downcast::<Dx12Pipeline>(pipeline.as_any())?;
        unsafe {
            self.library
                .StorePipeline(&HSTRING::from(name), &pipeline.pipeline)
        }
        .map_err(convert::error("ID3D12PipelineLibrary::StorePipeline"))?;
        self.stored += 1;
        Ok(())
    }

    fn serialize(&self) -> RhiResult<Vec<u8>> {
        let size = unsafe { self.library.GetSerializedSize() };
        let mut blob = vec![0; size];
        unsafe { self.library.Serialize(blob.as_mut_ptr().cast(), size) }
            .map_err(convert::error("ID3D12PipelineLibrary::Serialize"))?;
        Ok(blob)
    }

    fn len(&self) -> usize {
        self.stored
    }
}
