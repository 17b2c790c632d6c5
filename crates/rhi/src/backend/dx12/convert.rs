//! Translation of RHI descriptions into D3D12 structures.

use geometry::{Rect, Texel, Viewport};
#[allow(clippy::wildcard_imports)]
use windows::Win32::{
    Foundation::{BOOL, RECT},
    Graphics::{Direct3D::*, Direct3D12::*, Dxgi::Common::*},
};

use crate::{
    backend::QueueKind,
    descriptor::{
        view_desc::{DsvDimension, RtvDimension, SrvDimension, UavDimension},
        AddressMode, DescriptorHeapKind, Filter, SamplerDesc,
    },
    error::{NativeErrorCode, RhiError},
    format::Format,
    pipeline::{
        Blend, BlendOp, ComparisonFunc, CullMode, DepthStencilState, FillMode, FixedFunctionState,
        PrimitiveTopology, PrimitiveTopologyType, RasterizerState, StencilFace, StencilOp,
    },
    resource::desc::{HeapType, ResourceDesc, ResourceDimension, ResourceFlags, ResourceState},
};

pub fn error(call: &'static str) -> impl FnOnce(windows::core::Error) -> RhiError {
    move |e| RhiError::native(call, NativeErrorCode(e.code().0))
}

pub fn bool(value: bool) -> BOOL {
    value.into()
}

pub fn format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::R8Unorm => DXGI_FORMAT_R8_UNORM,
        Format::R8G8Unorm => DXGI_FORMAT_R8G8_UNORM,
        Format::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::R8G8B8A8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::B8G8R8A8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::B8G8R8A8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        Format::R10G10B10A2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        Format::R16Float => DXGI_FORMAT_R16_FLOAT,
        Format::R16G16Float => DXGI_FORMAT_R16G16_FLOAT,
        Format::R16G16B16A16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::R16Uint => DXGI_FORMAT_R16_UINT,
        Format::R32Float => DXGI_FORMAT_R32_FLOAT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::R32G32Float => DXGI_FORMAT_R32G32_FLOAT,
        Format::R32G32B32Float => DXGI_FORMAT_R32G32B32_FLOAT,
        Format::R32G32B32A32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::Bc1Unorm => DXGI_FORMAT_BC1_UNORM,
        Format::Bc3Unorm => DXGI_FORMAT_BC3_UNORM,
        Format::Bc5Unorm => DXGI_FORMAT_BC5_UNORM,
        Format::Bc7Unorm => DXGI_FORMAT_BC7_UNORM,
        Format::D16Unorm => DXGI_FORMAT_D16_UNORM,
        Format::D32Float => DXGI_FORMAT_D32_FLOAT,
        Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        Format::D32FloatS8X24Uint => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,
        Format::R24UnormX8Typeless => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        Format::X24TypelessG8Uint => DXGI_FORMAT_X24_TYPELESS_G8_UINT,
        Format::R32FloatX8X24Typeless => DXGI_FORMAT_R32_FLOAT_X8X24_TYPELESS,
        Format::X32TypelessG8X24Uint => DXGI_FORMAT_X32_TYPELESS_G8X24_UINT,
    }
}

pub fn queue_kind(kind: QueueKind) -> D3D12_COMMAND_LIST_TYPE {
    match kind {
        QueueKind::Direct => D3D12_COMMAND_LIST_TYPE_DIRECT,
        QueueKind::Copy => D3D12_COMMAND_LIST_TYPE_COPY,
        QueueKind::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
    }
}

pub fn heap_kind(kind: DescriptorHeapKind) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match kind {
        DescriptorHeapKind::RenderTarget => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapKind::DepthStencil => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
        DescriptorHeapKind::View => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapKind::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
    }
}

pub fn heap_type(heap: HeapType) -> D3D12_HEAP_TYPE {
    match heap {
        HeapType::Default => D3D12_HEAP_TYPE_DEFAULT,
        HeapType::Upload => D3D12_HEAP_TYPE_UPLOAD,
        HeapType::Readback => D3D12_HEAP_TYPE_READBACK,
    }
}

pub fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    D3D12_RESOURCE_STATES(state.bits() as i32)
}

pub fn resource_desc(desc: &ResourceDesc) -> D3D12_RESOURCE_DESC {
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    for (ours, theirs) in [
        (ResourceFlags::ALLOW_RENDER_TARGET, D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET),
        (ResourceFlags::ALLOW_DEPTH_STENCIL, D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL),
        (ResourceFlags::ALLOW_UNORDERED_ACCESS, D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS),
        (ResourceFlags::DENY_SHADER_RESOURCE, D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE),
        (ResourceFlags::ALLOW_CROSS_ADAPTER, D3D12_RESOURCE_FLAG_ALLOW_CROSS_ADAPTER),
    ] {
        if desc.flags.contains(ours) {
            flags |= theirs;
        }
    }

    let (dimension, layout) = match desc.dimension {
        ResourceDimension::Buffer => (D3D12_RESOURCE_DIMENSION_BUFFER, D3D12_TEXTURE_LAYOUT_ROW_MAJOR),
        ResourceDimension::Texture1D => (D3D12_RESOURCE_DIMENSION_TEXTURE1D, D3D12_TEXTURE_LAYOUT_UNKNOWN),
        ResourceDimension::Texture2D => (D3D12_RESOURCE_DIMENSION_TEXTURE2D, D3D12_TEXTURE_LAYOUT_UNKNOWN),
        ResourceDimension::Texture3D => (D3D12_RESOURCE_DIMENSION_TEXTURE3D, D3D12_TEXTURE_LAYOUT_UNKNOWN),
    };

    D3D12_RESOURCE_DESC {
        Dimension: dimension,
        Alignment: 0,
        Width: desc.width,
        Height: desc.height,
        DepthOrArraySize: desc.depth_or_array_size as u16,
        MipLevels: desc.mip_levels as u16,
        Format: format(desc.format),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: desc.sample_count,
            Quality: 0,
        },
        Layout: layout,
        Flags: flags,
    }
}

pub fn srv_dimension(dimension: &SrvDimension) -> (D3D12_SRV_DIMENSION, D3D12_SHADER_RESOURCE_VIEW_DESC_0) {
    match *dimension {
        SrvDimension::Buffer {
            first_element,
            num_elements,
            structure_byte_stride,
        } => (
            D3D12_SRV_DIMENSION_BUFFER,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Buffer: D3D12_BUFFER_SRV {
                    FirstElement: first_element,
                    NumElements: num_elements,
                    StructureByteStride: structure_byte_stride,
                    Flags: D3D12_BUFFER_SRV_FLAG_NONE,
                },
            },
        ),
        SrvDimension::Texture1D {
            most_detailed_mip,
            mip_levels,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE1D,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture1D: D3D12_TEX1D_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        SrvDimension::Texture1DArray {
            most_detailed_mip,
            mip_levels,
            first_array_slice,
            array_size,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE1DARRAY,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture1DArray: D3D12_TEX1D_ARRAY_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        SrvDimension::Texture2D {
            most_detailed_mip,
            mip_levels,
            plane_slice,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE2D,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    PlaneSlice: plane_slice,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        SrvDimension::Texture2DArray {
            most_detailed_mip,
            mip_levels,
            first_array_slice,
            array_size,
            plane_slice,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE2DARRAY,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                    PlaneSlice: plane_slice,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        SrvDimension::Texture2DMs => (
            D3D12_SRV_DIMENSION_TEXTURE2DMS,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DMS: D3D12_TEX2DMS_SRV::default(),
            },
        ),
        SrvDimension::Texture2DMsArray {
            first_array_slice,
            array_size,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE2DMSARRAY,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DMSArray: D3D12_TEX2DMS_ARRAY_SRV {
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        SrvDimension::Texture3D {
            most_detailed_mip,
            mip_levels,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE3D,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture3D: D3D12_TEX3D_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        SrvDimension::TextureCube {
            most_detailed_mip,
            mip_levels,
        } => (
            D3D12_SRV_DIMENSION_TEXTURECUBE,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                TextureCube: D3D12_TEXCUBE_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        SrvDimension::TextureCubeArray {
            most_detailed_mip,
            mip_levels,
            first_2d_array_face,
            num_cubes,
        } => (
            D3D12_SRV_DIMENSION_TEXTURECUBEARRAY,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                TextureCubeArray: D3D12_TEXCUBE_ARRAY_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    First2DArrayFace: first_2d_array_face,
                    NumCubes: num_cubes,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
    }
}

pub fn rtv_dimension(dimension: &RtvDimension) -> (D3D12_RTV_DIMENSION, D3D12_RENDER_TARGET_VIEW_DESC_0) {
    match *dimension {
        RtvDimension::Buffer {
            first_element,
            num_elements,
        } => (
            D3D12_RTV_DIMENSION_BUFFER,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Buffer: D3D12_BUFFER_RTV {
                    FirstElement: first_element,
                    NumElements: num_elements,
                },
            },
        ),
        RtvDimension::Texture1D { mip_slice } => (
            D3D12_RTV_DIMENSION_TEXTURE1D,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture1D: D3D12_TEX1D_RTV { MipSlice: mip_slice },
            },
        ),
        RtvDimension::Texture1DArray {
            mip_slice,
            first_array_slice,
            array_size,
        } => (
            D3D12_RTV_DIMENSION_TEXTURE1DARRAY,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture1DArray: D3D12_TEX1D_ARRAY_RTV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        RtvDimension::Texture2D { mip_slice, plane_slice } => (
            D3D12_RTV_DIMENSION_TEXTURE2D,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_RTV {
                    MipSlice: mip_slice,
                    PlaneSlice: plane_slice,
                },
            },
        ),
        RtvDimension::Texture2DArray {
            mip_slice,
            first_array_slice,
            array_size,
            plane_slice,
        } => (
            D3D12_RTV_DIMENSION_TEXTURE2DARRAY,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_RTV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                    PlaneSlice: plane_slice,
                },
            },
        ),
        RtvDimension::Texture2DMs => (
            D3D12_RTV_DIMENSION_TEXTURE2DMS,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DMS: D3D12_TEX2DMS_RTV::default(),
            },
        ),
        RtvDimension::Texture2DMsArray {
            first_array_slice,
            array_size,
        } => (
            D3D12_RTV_DIMENSION_TEXTURE2DMSARRAY,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DMSArray: D3D12_TEX2DMS_ARRAY_RTV {
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        RtvDimension::Texture3D {
            mip_slice,
            first_w_slice,
            w_size,
        } => (
            D3D12_RTV_DIMENSION_TEXTURE3D,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture3D: D3D12_TEX3D_RTV {
                    MipSlice: mip_slice,
                    FirstWSlice: first_w_slice,
                    WSize: w_size,
                },
            },
        ),
    }
}

pub fn dsv_dimension(dimension: &DsvDimension) -> (D3D12_DSV_DIMENSION, D3D12_DEPTH_STENCIL_VIEW_DESC_0) {
    match *dimension {
        DsvDimension::Texture1D { mip_slice } => (
            D3D12_DSV_DIMENSION_TEXTURE1D,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture1D: D3D12_TEX1D_DSV { MipSlice: mip_slice },
            },
        ),
        DsvDimension::Texture1DArray {
            mip_slice,
            first_array_slice,
            array_size,
        } => (
            D3D12_DSV_DIMENSION_TEXTURE1DARRAY,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture1DArray: D3D12_TEX1D_ARRAY_DSV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        DsvDimension::Texture2D { mip_slice } => (
            D3D12_DSV_DIMENSION_TEXTURE2D,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_DSV { MipSlice: mip_slice },
            },
        ),
        DsvDimension::Texture2DArray {
            mip_slice,
            first_array_slice,
            array_size,
        } => (
            D3D12_DSV_DIMENSION_TEXTURE2DARRAY,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_DSV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        DsvDimension::Texture2DMs => (
            D3D12_DSV_DIMENSION_TEXTURE2DMS,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DMS: D3D12_TEX2DMS_DSV::default(),
            },
        ),
        DsvDimension::Texture2DMsArray {
            first_array_slice,
            array_size,
        } => (
            D3D12_DSV_DIMENSION_TEXTURE2DMSARRAY,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DMSArray: D3D12_TEX2DMS_ARRAY_DSV {
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
    }
}

pub fn uav_dimension(dimension: &UavDimension) -> (D3D12_UAV_DIMENSION, D3D12_UNORDERED_ACCESS_VIEW_DESC_0) {
    match *dimension {
        UavDimension::Buffer {
            first_element,
            num_elements,
            structure_byte_stride,
            counter_offset,
        } => (
            D3D12_UAV_DIMENSION_BUFFER,
            D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Buffer: D3D12_BUFFER_UAV {
                    FirstElement: first_element,
                    NumElements: num_elements,
                    StructureByteStride: structure_byte_stride,
                    CounterOffsetInBytes: counter_offset,
                    Flags: D3D12_BUFFER_UAV_FLAG_NONE,
                },
            },
        ),
        UavDimension::Texture1D { mip_slice } => (
            D3D12_UAV_DIMENSION_TEXTURE1D,
            D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture1D: D3D12_TEX1D_UAV { MipSlice: mip_slice },
            },
        ),
        UavDimension::Texture1DArray {
            mip_slice,
            first_array_slice,
            array_size,
        } => (
            D3D12_UAV_DIMENSION_TEXTURE1DARRAY,
            D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture1DArray: D3D12_TEX1D_ARRAY_UAV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        UavDimension::Texture2D { mip_slice, plane_slice } => (
            D3D12_UAV_DIMENSION_TEXTURE2D,
            D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_UAV {
                    MipSlice: mip_slice,
                    PlaneSlice: plane_slice,
                },
            },
        ),
        UavDimension::Texture2DArray {
            mip_slice,
            first_array_slice,
            array_size,
            plane_slice,
        } => (
            D3D12_UAV_DIMENSION_TEXTURE2DARRAY,
            D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_UAV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                    PlaneSlice: plane_slice,
                },
            },
        ),
        UavDimension::Texture3D {
            mip_slice,
            first_w_slice,
            w_size,
        } => (
            D3D12_UAV_DIMENSION_TEXTURE3D,
            D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture3D: D3D12_TEX3D_UAV {
                    MipSlice: mip_slice,
                    FirstWSlice: first_w_slice,
                    WSize: w_size,
                },
            },
        ),
    }
}

fn address_mode(mode: AddressMode) -> D3D12_TEXTURE_ADDRESS_MODE {
    match mode {
        AddressMode::Wrap => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressMode::Mirror => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
        AddressMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressMode::Border => D3D12_TEXTURE_ADDRESS_MODE_BORDER,
        AddressMode::MirrorOnce => D3D12_TEXTURE_ADDRESS_MODE_MIRROR_ONCE,
    }
}

pub fn sampler_desc(desc: &SamplerDesc) -> D3D12_SAMPLER_DESC {
    let filter = match (desc.filter, desc.comparison.is_some()) {
        (Filter::MinMagMipPoint, false) => D3D12_FILTER_MIN_MAG_MIP_POINT,
        (Filter::MinMagLinearMipPoint, false) => D3D12_FILTER_MIN_MAG_LINEAR_MIP_POINT,
        (Filter::MinMagMipLinear, false) => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        (Filter::Anisotropic, false) => D3D12_FILTER_ANISOTROPIC,
        (Filter::MinMagMipPoint, true) => D3D12_FILTER_COMPARISON_MIN_MAG_MIP_POINT,
        (Filter::MinMagLinearMipPoint, true) => D3D12_FILTER_COMPARISON_MIN_MAG_LINEAR_MIP_POINT,
        (Filter::MinMagMipLinear, true) => D3D12_FILTER_COMPARISON_MIN_MAG_MIP_LINEAR,
        (Filter::Anisotropic, true) => D3D12_FILTER_COMPARISON_ANISOTROPIC,
    };

    D3D12_SAMPLER_DESC {
        Filter: filter,
        AddressU: address_mode(desc.address_u),
        AddressV: address_mode(desc.address_v),
        AddressW: address_mode(desc.address_w),
        MipLODBias: desc.mip_lod_bias,
        MaxAnisotropy: desc.max_anisotropy,
        ComparisonFunc: comparison(desc.comparison.unwrap_or(ComparisonFunc::Never)),
        BorderColor: desc.border_color,
        MinLOD: desc.min_lod,
        MaxLOD: desc.max_lod,
    }
}

pub fn comparison(func: ComparisonFunc) -> D3D12_COMPARISON_FUNC {
    match func {
        ComparisonFunc::Never => D3D12_COMPARISON_FUNC_NEVER,
        ComparisonFunc::Less => D3D12_COMPARISON_FUNC_LESS,
        ComparisonFunc::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        ComparisonFunc::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        ComparisonFunc::Greater => D3D12_COMPARISON_FUNC_GREATER,
        ComparisonFunc::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        ComparisonFunc::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        ComparisonFunc::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

fn blend(blend: Blend) -> D3D12_BLEND {
    match blend {
        Blend::Zero => D3D12_BLEND_ZERO,
        Blend::One => D3D12_BLEND_ONE,
        Blend::SrcColor => D3D12_BLEND_SRC_COLOR,
        Blend::InvSrcColor => D3D12_BLEND_INV_SRC_COLOR,
        Blend::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        Blend::InvSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
        Blend::DestAlpha => D3D12_BLEND_DEST_ALPHA,
        Blend::InvDestAlpha => D3D12_BLEND_INV_DEST_ALPHA,
        Blend::DestColor => D3D12_BLEND_DEST_COLOR,
        Blend::InvDestColor => D3D12_BLEND_INV_DEST_COLOR,
        Blend::BlendFactor => D3D12_BLEND_BLEND_FACTOR,
        Blend::InvBlendFactor => D3D12_BLEND_INV_BLEND_FACTOR,
    }
}

fn blend_op(op: BlendOp) -> D3D12_BLEND_OP {
    match op {
        BlendOp::Add => D3D12_BLEND_OP_ADD,
        BlendOp::Subtract => D3D12_BLEND_OP_SUBTRACT,
        BlendOp::RevSubtract => D3D12_BLEND_OP_REV_SUBTRACT,
        BlendOp::Min => D3D12_BLEND_OP_MIN,
        BlendOp::Max => D3D12_BLEND_OP_MAX,
    }
}

fn stencil_op(op: StencilOp) -> D3D12_STENCIL_OP {
    match op {
        StencilOp::Keep => D3D12_STENCIL_OP_KEEP,
        StencilOp::Zero => D3D12_STENCIL_OP_ZERO,
        StencilOp::Replace => D3D12_STENCIL_OP_REPLACE,
        StencilOp::IncrSat => D3D12_STENCIL_OP_INCR_SAT,
        StencilOp::DecrSat => D3D12_STENCIL_OP_DECR_SAT,
        StencilOp::Invert => D3D12_STENCIL_OP_INVERT,
        StencilOp::Incr => D3D12_STENCIL_OP_INCR,
        StencilOp::Decr => D3D12_STENCIL_OP_DECR,
    }
}

fn stencil_face(face: &StencilFace) -> D3D12_DEPTH_STENCILOP_DESC {
    D3D12_DEPTH_STENCILOP_DESC {
        StencilFailOp: stencil_op(face.fail_op),
        StencilDepthFailOp: stencil_op(face.depth_fail_op),
        StencilPassOp: stencil_op(face.pass_op),
        StencilFunc: comparison(face.func),
    }
}

pub fn blend_desc(state: &FixedFunctionState) -> D3D12_BLEND_DESC {
    let blend_state = &state.blend;
    let mut targets = [D3D12_RENDER_TARGET_BLEND_DESC::default(); 8];
    for (target, ours) in targets.iter_mut().zip(&blend_state.render_targets) {
        *target = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: bool(ours.blend_enable),
            LogicOpEnable: bool(false),
            SrcBlend: blend(ours.src_color),
            DestBlend: blend(ours.dst_color),
            BlendOp: blend_op(ours.color_op),
            SrcBlendAlpha: blend(ours.src_alpha),
            DestBlendAlpha: blend(ours.dst_alpha),
            BlendOpAlpha: blend_op(ours.alpha_op),
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: ours.write_mask.bits(),
        };
    }

    D3D12_BLEND_DESC {
        AlphaToCoverageEnable: bool(blend_state.alpha_to_coverage),
        IndependentBlendEnable: bool(blend_state.independent_blend),
        RenderTarget: targets,
    }
}

pub fn rasterizer_desc(state: &RasterizerState) -> D3D12_RASTERIZER_DESC {
    D3D12_RASTERIZER_DESC {
        FillMode: match state.fill_mode {
            FillMode::Solid => D3D12_FILL_MODE_SOLID,
            FillMode::Wireframe => D3D12_FILL_MODE_WIREFRAME,
        },
        CullMode: match state.cull_mode {
            CullMode::None => D3D12_CULL_MODE_NONE,
            CullMode::Front => D3D12_CULL_MODE_FRONT,
            CullMode::Back => D3D12_CULL_MODE_BACK,
        },
        FrontCounterClockwise: bool(state.front_counter_clockwise),
        DepthBias: state.depth_bias,
        DepthBiasClamp: state.depth_bias_clamp,
        SlopeScaledDepthBias: state.slope_scaled_depth_bias,
        DepthClipEnable: bool(state.depth_clip),
        MultisampleEnable: bool(state.multisample),
        AntialiasedLineEnable: bool(false),
        ForcedSampleCount: 0,
        ConservativeRaster: if state.conservative {
            D3D12_CONSERVATIVE_RASTERIZATION_MODE_ON
        } else {
            D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF
        },
    }
}

pub fn depth_stencil_desc(state: &DepthStencilState) -> D3D12_DEPTH_STENCIL_DESC {
    D3D12_DEPTH_STENCIL_DESC {
        DepthEnable: bool(state.depth_enable),
        DepthWriteMask: if state.depth_write {
            D3D12_DEPTH_WRITE_MASK_ALL
        } else {
            D3D12_DEPTH_WRITE_MASK_ZERO
        },
        DepthFunc: comparison(state.depth_func),
        StencilEnable: bool(state.stencil_enable),
        StencilReadMask: state.stencil_read_mask,
        StencilWriteMask: state.stencil_write_mask,
        FrontFace: stencil_face(&state.front),
        BackFace: stencil_face(&state.back),
    }
}

pub fn topology_type(kind: PrimitiveTopologyType) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match kind {
        PrimitiveTopologyType::Undefined => D3D12_PRIMITIVE_TOPOLOGY_TYPE_UNDEFINED,
        PrimitiveTopologyType::Point => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        PrimitiveTopologyType::Line => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        PrimitiveTopologyType::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        PrimitiveTopologyType::Patch => D3D12_PRIMITIVE_TOPOLOGY_TYPE_PATCH,
    }
}

pub fn topology(topology: PrimitiveTopology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        PrimitiveTopology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        PrimitiveTopology::LineStrip => D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
        PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
        PrimitiveTopology::PatchList { control_points } => D3D_PRIMITIVE_TOPOLOGY(
            D3D_PRIMITIVE_TOPOLOGY_1_CONTROL_POINT_PATCHLIST.0 + i32::from(control_points.clamp(1, 32)) - 1,
        ),
    }
}

pub fn viewport(viewport: &Viewport) -> D3D12_VIEWPORT {
    D3D12_VIEWPORT {
        TopLeftX: viewport.rect.left(),
        TopLeftY: viewport.rect.top(),
        Width: viewport.width(),
        Height: viewport.rect.bottom() - viewport.rect.top(),
        MinDepth: viewport.min_depth,
        MaxDepth: viewport.max_depth,
    }
}

pub fn rect(rect: &Rect<u32, Texel>) -> RECT {
    RECT {
        left: rect.left() as i32,
        top: rect.top() as i32,
        right: rect.right() as i32,
        bottom: rect.bottom() as i32,
    }
}
