//! The Direct3D 12 backend.

mod convert;
mod objects;
mod pipeline;

use std::{any::Any, sync::Arc};

#[allow(clippy::wildcard_imports)]
use windows::{
    core::{ComInterface, HSTRING},
    Win32::Graphics::{
        Direct3D::{D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_12_0, D3D_FEATURE_LEVEL_12_1},
        Direct3D12::*,
        Dxgi::*,
    },
};

use self::objects::{
    cpu_handle, Dx12CommandAllocator, Dx12CommandList, Dx12DescriptorHeap, Dx12Fence, Dx12Pipeline,
    Dx12PipelineLibrary, Dx12Queue, Dx12Resource, Dx12RootSignature,
};
use super::{
    AdapterDesc, Backend, DebugMessage, DebugSeverity, DescriptorHandle, FeatureLevel, NativeCommandAllocator,
    NativeCommandList, NativeDescriptorHeap, NativeFence, NativePipeline, NativePipelineLibrary, NativeQueue,
    NativeResource, NativeRootSignature, QueueKind,
};
use crate::{
    config::{PowerPreference, RhiConfig},
    descriptor::{DescriptorHeapKind, ResourceBindingTier, SamplerDesc, ViewDesc},
    error::{DeviceRemovedReason, NativeErrorCode, RhiError, RhiResult},
    node::{GpuNodeMask, NodeIndex},
    pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, RootSignatureDesc},
    resource::desc::{HeapType, ResourceDesc, ResourceState},
};

fn downcast<T: 'static>(any: &dyn Any) -> RhiResult<&T> {
    any.downcast_ref::<T>()
        .ok_or(RhiError::InvalidState("object belongs to a different backend"))
}

pub struct Dx12Backend {
    is_debug: bool,
    _factory: IDXGIFactory6,
    adapter: IDXGIAdapter1,
    device: ID3D12Device,
    info_queue: Option<ID3D12InfoQueue>,
    node_count: u32,
    feature_level: FeatureLevel,
    binding_tier: ResourceBindingTier,
    pipeline_library: bool,
}

// SAFETY: the device, factory and info queue are free-threaded.
unsafe impl Send for Dx12Backend {}
unsafe impl Sync for Dx12Backend {}

impl Dx12Backend {
    pub fn new(config: &RhiConfig) -> RhiResult<Self> {
        let is_debug = config.is_debug();

        // IDXGIFactory6 for power preference selection
        let factory: IDXGIFactory6 = {
            let flags = if is_debug { DXGI_CREATE_FACTORY_DEBUG } else { 0 };
            unsafe { CreateDXGIFactory2(flags) }.map_err(convert::error("CreateDXGIFactory2"))?
        };

        let preference = match config.power_preference {
            PowerPreference::LowPower => DXGI_GPU_PREFERENCE_MINIMUM_POWER,
            PowerPreference::HighPerformance => DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE,
        };

        let adapter: IDXGIAdapter1 = unsafe { factory.EnumAdapterByGpuPreference(0, preference) }
            .or_else(|_| {
                log::warn!("no hardware adapter found, falling back to WARP");
                unsafe { factory.EnumWarpAdapter() }
            })
            .map_err(convert::error("EnumAdapterByGpuPreference"))?;

        if is_debug {
            let mut debug: Option<ID3D12Debug> = None;
            match unsafe { D3D12GetDebugInterface(&mut debug) } {
                Ok(()) => {
                    if let Some(debug) = debug {
                        unsafe { debug.EnableDebugLayer() };
                    }
                }
                Err(e) => log::warn!("D3D12 debug layer unavailable: {e}"),
            }
        }

        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }
            .map_err(convert::error("D3D12CreateDevice"))?;
        let device = device.ok_or(RhiError::InvalidState("D3D12CreateDevice returned no device"))?;

        let info_queue = if is_debug { device.cast::<ID3D12InfoQueue>().ok() } else { None };

        let node_count = unsafe { device.GetNodeCount() }.max(1);
        let feature_level = max_feature_level(&device);
        let binding_tier = binding_tier(&device);
        let pipeline_library = supports_pipeline_library(&device);

        let backend = Self {
            is_debug,
            _factory: factory,
            adapter,
            device,
            info_queue,
            node_count,
            feature_level,
            binding_tier,
            pipeline_library,
        };

        let desc = backend.adapter_desc();
        log::info!(
            "D3D12 adapter {} ({:04x}:{:04x}), {} MiB video memory, {} node(s), {:?}, binding {:?}",
            desc.name,
            desc.vendor_id,
            desc.device_id,
            desc.dedicated_video_memory >> 20,
            node_count,
            feature_level,
            binding_tier,
        );

        Ok(backend)
    }

    fn set_name(object: &ID3D12Object, name: &str) {
        if let Err(e) = unsafe { object.SetName(&HSTRING::from(name)) } {
            log::debug!("failed to name {name}: {e}");
        }
    }
}

fn max_feature_level(device: &ID3D12Device) -> FeatureLevel {
    let requested = [
        D3D_FEATURE_LEVEL_12_1,
        D3D_FEATURE_LEVEL_12_0,
        D3D_FEATURE_LEVEL_11_1,
        D3D_FEATURE_LEVEL_11_0,
    ];
    let mut levels = D3D12_FEATURE_DATA_FEATURE_LEVELS {
        NumFeatureLevels: requested.len() as u32,
        pFeatureLevelsRequested: requested.as_ptr(),
        MaxSupportedFeatureLevel: D3D_FEATURE_LEVEL_11_0,
    };

    let supported = unsafe {
        device.CheckFeatureSupport(
            D3D12_FEATURE_FEATURE_LEVELS,
            std::ptr::addr_of_mut!(levels).cast(),
            std::mem::size_of_val(&levels) as u32,
        )
    };

    match supported.map(|()| levels.MaxSupportedFeatureLevel) {
        Ok(D3D_FEATURE_LEVEL(level)) if level >= D3D_FEATURE_LEVEL_12_1.0 => FeatureLevel::Level12_1,
        Ok(D3D_FEATURE_LEVEL(level)) if level >= D3D_FEATURE_LEVEL_12_0.0 => FeatureLevel::Level12_0,
        Ok(D3D_FEATURE_LEVEL(level)) if level >= D3D_FEATURE_LEVEL_11_1.0 => FeatureLevel::Level11_1,
        _ => FeatureLevel::Level11_0,
    }
}

fn binding_tier(device: &ID3D12Device) -> ResourceBindingTier {
    let mut options = D3D12_FEATURE_DATA_D3D12_OPTIONS::default();
    let supported = unsafe {
        device.CheckFeatureSupport(
            D3D12_FEATURE_D3D12_OPTIONS,
            std::ptr::addr_of_mut!(options).cast(),
            std::mem::size_of_val(&options) as u32,
        )
    };

    match supported.map(|()| options.ResourceBindingTier) {
        Ok(D3D12_RESOURCE_BINDING_TIER_3) => ResourceBindingTier::Tier3,
        Ok(D3D12_RESOURCE_BINDING_TIER_2) => ResourceBindingTier::Tier2,
        _ => ResourceBindingTier::Tier1,
    }
}

fn supports_pipeline_library(device: &ID3D12Device) -> bool {
    if device.cast::<ID3D12Device1>().is_err() {
        return false;
    }

    let mut cache = D3D12_FEATURE_DATA_SHADER_CACHE::default();
    let supported = unsafe {
        device.CheckFeatureSupport(
            D3D12_FEATURE_SHADER_CACHE,
            std::ptr::addr_of_mut!(cache).cast(),
            std::mem::size_of_val(&cache) as u32,
        )
    };

    supported.is_ok() && (cache.SupportFlags & D3D12_SHADER_CACHE_SUPPORT_LIBRARY).0 != 0
}

impl Backend for Dx12Backend {
    fn adapter_desc(&self) -> AdapterDesc {
        let desc = unsafe { self.adapter.GetDesc1() }.unwrap_or_default();
        let len = desc.Description.iter().position(|c| *c == 0).unwrap_or(desc.Description.len());

        AdapterDesc {
            name: String::from_utf16_lossy(&desc.Description[..len]),
            vendor_id: desc.VendorId,
            device_id: desc.DeviceId,
            dedicated_video_memory: desc.DedicatedVideoMemory as u64,
        }
    }

    fn node_count(&self) -> u32 {
        self.node_count
    }

    fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    fn resource_binding_tier(&self) -> ResourceBindingTier {
        self.binding_tier
    }

    fn supports_pipeline_library(&self) -> bool {
        self.pipeline_library
    }

    fn create_queue(&self, node: NodeIndex, kind: QueueKind) -> RhiResult<Arc<dyn NativeQueue>> {
        let queue: ID3D12CommandQueue = unsafe {
            self.device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: convert::queue_kind(kind),
                NodeMask: node.mask().bits(),
                ..Default::default()
            })
        }
        .map_err(convert::error("CreateCommandQueue"))?;

        if self.is_debug {
            Self::set_name(&queue, &format!("{kind:?} queue ({node})"));
        }

        Ok(Arc::new(Dx12Queue { queue, node, kind }))
    }

    fn create_fence(&self, initial_value: u64) -> RhiResult<Arc<dyn NativeFence>> {
        let fence: ID3D12Fence = unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
            .map_err(convert::error("CreateFence"))?;
        Ok(Arc::new(Dx12Fence::new(fence)?))
    }

    fn create_command_allocator(
        &self,
        _node: NodeIndex,
        kind: QueueKind,
    ) -> RhiResult<Box<dyn NativeCommandAllocator>> {
        let allocator = unsafe { self.device.CreateCommandAllocator(convert::queue_kind(kind)) }
            .map_err(convert::error("CreateCommandAllocator"))?;
        Ok(Box::new(Dx12CommandAllocator { allocator }))
    }

    fn create_command_list(
        &self,
        node: NodeIndex,
        kind: QueueKind,
        allocator: &dyn NativeCommandAllocator,
    ) -> RhiResult<Box<dyn NativeCommandList>> {
        let allocator = downcast::<Dx12CommandAllocator>(allocator.as_any())?;
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device
                .CreateCommandList(node.mask().bits(), convert::queue_kind(kind), &allocator.allocator, None)
        }
        .map_err(convert::error("CreateCommandList"))?;
        Ok(Box::new(Dx12CommandList::new(list, kind)))
    }

    fn create_descriptor_heap(
        &self,
        node: NodeIndex,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> RhiResult<Arc<dyn NativeDescriptorHeap>> {
        let heap: ID3D12DescriptorHeap = unsafe {
            self.device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: convert::heap_kind(kind),
                NumDescriptors: capacity,
                Flags: if shader_visible {
                    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                } else {
                    D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                },
                NodeMask: node.mask().bits(),
            })
        }
        .map_err(convert::error("CreateDescriptorHeap"))?;

        Ok(Arc::new(Dx12DescriptorHeap::new(
            &self.device,
            heap,
            kind,
            capacity,
            shader_visible,
        )))
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
        let properties = D3D12_HEAP_PROPERTIES {
            Type: convert::heap_type(heap),
            CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
            MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
            CreationNodeMask: node.mask().bits(),
            VisibleNodeMask: (visible | node.mask()).bits(),
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &properties,
                D3D12_HEAP_FLAG_NONE,
                &convert::resource_desc(desc),
                convert::resource_state(initial_state),
                None,
                &mut resource,
            )
        }
        .map_err(convert::error("CreateCommittedResource"))?;
        let resource = resource.ok_or(RhiError::InvalidState("CreateCommittedResource returned no resource"))?;

        if self.is_debug {
            Self::set_name(&resource, name);
        }

        Ok(Arc::new(Dx12Resource::new(
            resource,
            desc.clone(),
            heap != HeapType::Default,
        )?))
    }

    fn write_view(
        &self,
        heap: &dyn NativeDescriptorHeap,
        index: u32,
        view: &ViewDesc,
        resource: Option<&dyn NativeResource>,
    ) {
        let Ok(heap) = downcast::<Dx12DescriptorHeap>(heap.as_any()) else {
            log::error!("descriptor heap belongs to a different backend");
            return;
        };
        let resource = resource.and_then(|r| downcast::<Dx12Resource>(r.as_any()).ok());
        let native = resource.map(|r| &r.resource);
        let slot = heap.cpu(index);

        unsafe {
            match view {
                ViewDesc::Srv(srv) => {
                    let (dimension, anonymous) = convert::srv_dimension(&srv.dimension);
                    let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                        Format: convert::format(srv.format),
                        ViewDimension: dimension,
                        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                        Anonymous: anonymous,
                    };
                    self.device.CreateShaderResourceView(native, Some(&desc as *const _), slot);
                }
                ViewDesc::Rtv(rtv) => {
                    let (dimension, anonymous) = convert::rtv_dimension(&rtv.dimension);
                    let desc = D3D12_RENDER_TARGET_VIEW_DESC {
                        Format: convert::format(rtv.format),
                        ViewDimension: dimension,
                        Anonymous: anonymous,
                    };
                    self.device.CreateRenderTargetView(native, Some(&desc as *const _), slot);
                }
                ViewDesc::Dsv(dsv) => {
                    let (dimension, anonymous) = convert::dsv_dimension(&dsv.dimension);
                    let desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
                        Format: convert::format(dsv.format),
                        ViewDimension: dimension,
                        Flags: D3D12_DSV_FLAGS(dsv.flags.bits() as i32),
                        Anonymous: anonymous,
                    };
                    self.device.CreateDepthStencilView(native, Some(&desc as *const _), slot);
                }
                ViewDesc::Uav(uav) => {
                    let (dimension, anonymous) = convert::uav_dimension(&uav.dimension);
                    let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                        Format: convert::format(uav.format),
                        ViewDimension: dimension,
                        Anonymous: anonymous,
                    };
                    self.device
                        .CreateUnorderedAccessView(native, None::<&ID3D12Resource>, Some(&desc as *const _), slot);
                }
                ViewDesc::Cbv(cbv) => {
                    let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                        BufferLocation: resource.map_or(0, |r| r.gpu_address() + cbv.offset),
                        SizeInBytes: cbv.size,
                    };
                    self.device.CreateConstantBufferView(Some(&desc as *const _), slot);
                }
            }
        }
    }

    fn write_sampler(&self, heap: &dyn NativeDescriptorHeap, index: u32, desc: &SamplerDesc) {
        match downcast::<Dx12DescriptorHeap>(heap.as_any()) {
            Ok(heap) => unsafe { self.device.CreateSampler(&convert::sampler_desc(desc), heap.cpu(index)) },
            Err(e) => log::error!("{e}"),
        }
    }

    fn copy_descriptors(&self, dst: &dyn NativeDescriptorHeap, dst_start: u32, src: &[DescriptorHandle]) {
        let Ok(dst) = downcast::<Dx12DescriptorHeap>(dst.as_any()) else {
            log::error!("descriptor heap belongs to a different backend");
            return;
        };
        let kind = convert::heap_kind(dst.kind());

        for (offset, handle) in (0..).zip(src) {
            match cpu_handle(handle) {
                Ok(source) => unsafe {
                    self.device
                        .CopyDescriptorsSimple(1, dst.cpu(dst_start + offset), source, kind);
                },
                Err(e) => log::error!("{e}"),
            }
        }
    }

    fn serialize_root_signature(&self, desc: &RootSignatureDesc) -> RhiResult<Vec<u8>> {
        pipeline::serialize_root_signature(desc)
    }

    fn create_root_signature(
        &self,
        nodes: GpuNodeMask,
        blob: &[u8],
    ) -> RhiResult<Arc<dyn NativeRootSignature>> {
        let root_signature = unsafe { self.device.CreateRootSignature(nodes.bits(), blob) }
            .map_err(convert::error("CreateRootSignature"))?;
        Ok(Arc::new(Dx12RootSignature { root_signature }))
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<Arc<dyn NativePipeline>> {
        let pipeline = pipeline::with_graphics_desc(desc, |native| unsafe {
            self.device.CreateGraphicsPipelineState::<ID3D12PipelineState>(native)
        })?;
        Ok(Arc::new(Dx12Pipeline { pipeline }))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> RhiResult<Arc<dyn NativePipeline>> {
        let native = pipeline::compute_desc(desc)?;
        let pipeline = unsafe { self.device.CreateComputePipelineState::<ID3D12PipelineState>(&native) }
            .map_err(convert::error("CreateComputePipelineState"))?;
        Ok(Arc::new(Dx12Pipeline { pipeline }))
    }

    fn create_pipeline_library(&self, blob: &[u8]) -> RhiResult<Box<dyn NativePipelineLibrary>> {
        if !self.pipeline_library {
            return Err(RhiError::native("CreatePipelineLibrary", NativeErrorCode::UNSUPPORTED));
        }

        let device = self
            .device
            .cast::<ID3D12Device1>()
            .map_err(convert::error("ID3D12Device::cast"))?;
        let blob: Box<[u8]> = blob.into();
        let library: ID3D12PipelineLibrary = unsafe { device.CreatePipelineLibrary(blob.as_ptr().cast(), blob.len()) }
            .map_err(convert::error("CreatePipelineLibrary"))?;

        Ok(Box::new(Dx12PipelineLibrary {
            library,
            _blob: blob,
            stored: 0,
        }))
    }

    fn device_removed_reason(&self) -> Option<DeviceRemovedReason> {
        unsafe { self.device.GetDeviceRemovedReason() }
            .err()
            .map(|e| DeviceRemovedReason::from_code(NativeErrorCode(e.code().0)))
    }

    fn drain_debug_messages(&self) -> Vec<DebugMessage> {
        let Some(queue) = &self.info_queue else {
            return Vec::new();
        };

        let count = unsafe { queue.GetNumStoredMessages() };
        let mut messages = Vec::with_capacity(count as usize);

        for index in 0..count {
            let mut size = 0;
            if unsafe { queue.GetMessage(index, None, &mut size) }.is_err() {
                continue;
            }

            // D3D12_MESSAGE is followed by its description in the same buffer.
            let mut buffer = vec![0u64; size.div_ceil(8)];
            let message = buffer.as_mut_ptr().cast::<D3D12_MESSAGE>();
            if unsafe { queue.GetMessage(index, Some(message), &mut size) }.is_err() {
                continue;
            }

            let message = unsafe { &*message };
            let description =
                unsafe { std::slice::from_raw_parts(message.pDescription, message.DescriptionByteLength) };
            let description = description.strip_suffix(&[0]).unwrap_or(description);
            messages.push(DebugMessage {
                severity: match message.Severity {
                    D3D12_MESSAGE_SEVERITY_CORRUPTION => DebugSeverity::Corruption,
                    D3D12_MESSAGE_SEVERITY_ERROR => DebugSeverity::Error,
                    D3D12_MESSAGE_SEVERITY_WARNING => DebugSeverity::Warning,
                    D3D12_MESSAGE_SEVERITY_INFO => DebugSeverity::Info,
                    _ => DebugSeverity::Message,
                },
                id: message.ID.0 as u32,
                description: String::from_utf8_lossy(description).into_owned(),
            });
        }

        unsafe { queue.ClearStoredMessages() };
        messages
    }
}

impl Drop for Dx12Backend {
    fn drop(&mut self) {
        if !self.is_debug {
            return;
        }

        match unsafe { DXGIGetDebugInterface1::<IDXGIDebug1>(0) } {
            Ok(debug) => {
                let report = unsafe {
                    debug.ReportLiveObjects(DXGI_DEBUG_ALL, DXGI_DEBUG_RLO_SUMMARY | DXGI_DEBUG_RLO_IGNORE_INTERNAL)
                };
                if let Err(e) = report {
                    log::warn!("failed to report live objects: {e}");
                }
            }
            Err(e) => log::warn!("DXGI debug interface unavailable: {e}"),
        }
    }
}
