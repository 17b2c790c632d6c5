//! Pipeline state and root signature descriptions.
//!
//! Native pipeline descriptions point into strings and arrays that must
//! outlive the call consuming them, so they are only handed out inside a
//! closure.

use std::ffi::CString;

use smallvec::SmallVec;
#[allow(clippy::wildcard_imports)]
use windows::{
    core::PCSTR,
    Win32::Graphics::{Direct3D::ID3DBlob, Direct3D12::*, Dxgi::Common::*},
};

use super::{convert, downcast, objects::Dx12RootSignature};
use crate::{
    error::{RhiError, RhiResult},
    pipeline::{
        root_signature::{DescriptorRangeKind, RootSignatureFlags, ShaderVisibility},
        ComputePipelineDesc, GraphicsPipelineDesc, RootSignatureDesc, ShaderBytecode, ShaderStage,
    },
};

fn bytecode(shader: Option<&ShaderBytecode>) -> D3D12_SHADER_BYTECODE {
    shader.map_or_else(D3D12_SHADER_BYTECODE::default, |shader| D3D12_SHADER_BYTECODE {
        pShaderBytecode: shader.bytes().as_ptr().cast(),
        BytecodeLength: shader.len(),
    })
}

fn root_signature(desc: &crate::pipeline::RootSignature) -> RhiResult<Option<ID3D12RootSignature>> {
    let native = downcast::<Dx12RootSignature>(desc.native().as_any())?;
    // SAFETY: the description borrows the root signature, which the caller's
    // pipeline description keeps alive.
    Ok(unsafe { std::mem::transmute_copy(&native.root_signature) })
}

/// Calls `f` with the native form of `desc`.
pub fn with_graphics_desc<T>(
    desc: &GraphicsPipelineDesc,
    f: impl FnOnce(&D3D12_GRAPHICS_PIPELINE_STATE_DESC) -> windows::core::Result<T>,
) -> RhiResult<T> {
    let names = desc
        .input_layout
        .iter()
        .map(|element| CString::new(element.semantic_name.as_str()))
        .collect::<Result<SmallVec<[_; 8]>, _>>()
        .map_err(|_| RhiError::InvalidState("semantic name contains a nul byte"))?;

    let elements = desc
        .input_layout
        .iter()
        .zip(&names)
        .map(|(element, name)| D3D12_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR(name.as_ptr().cast()),
            SemanticIndex: element.semantic_index,
            Format: convert::format(element.format),
            InputSlot: element.input_slot,
            AlignedByteOffset: element.aligned_byte_offset,
            InputSlotClass: if element.per_instance {
                D3D12_INPUT_CLASSIFICATION_PER_INSTANCE_DATA
            } else {
                D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA
            },
            InstanceDataStepRate: element.instance_step_rate,
        })
        .collect::<SmallVec<[_; 8]>>();

    let so_names = desc
        .stream_output
        .iter()
        .flat_map(|so| &so.decls)
        .map(|decl| decl.semantic_name.as_deref().map(CString::new).transpose())
        .collect::<Result<SmallVec<[_; 8]>, _>>()
        .map_err(|_| RhiError::InvalidState("semantic name contains a nul byte"))?;

    let so_entries = desc
        .stream_output
        .iter()
        .flat_map(|so| &so.decls)
        .zip(&so_names)
        .map(|(decl, name)| D3D12_SO_DECLARATION_ENTRY {
            Stream: decl.stream,
            SemanticName: name
                .as_ref()
                .map_or(PCSTR::null(), |name| PCSTR(name.as_ptr().cast())),
            SemanticIndex: decl.semantic_index,
            StartComponent: decl.start_component,
            ComponentCount: decl.component_count,
            OutputSlot: decl.output_slot,
        })
        .collect::<SmallVec<[_; 8]>>();

    let stream_output = desc.stream_output.as_ref().map_or_else(D3D12_STREAM_OUTPUT_DESC::default, |so| {
        D3D12_STREAM_OUTPUT_DESC {
            pSODeclaration: so_entries.as_ptr(),
            NumEntries: so_entries.len() as u32,
            pBufferStrides: so.strides.as_ptr(),
            NumStrides: so.strides.len() as u32,
            RasterizedStream: so.rasterized_stream,
        }
    });

    let state = &desc.state;
    let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
    for (native, format) in rtv_formats.iter_mut().zip(&state.targets.formats) {
        *native = convert::format(*format);
    }

    let native = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        pRootSignature: std::mem::ManuallyDrop::new(root_signature(&desc.root_signature)?),
        VS: bytecode(desc.shader(ShaderStage::Vertex)),
        PS: bytecode(desc.shader(ShaderStage::Pixel)),
        DS: bytecode(desc.shader(ShaderStage::Domain)),
        HS: bytecode(desc.shader(ShaderStage::Hull)),
        GS: bytecode(desc.shader(ShaderStage::Geometry)),
        StreamOutput: stream_output,
        BlendState: convert::blend_desc(state),
        SampleMask: state.sample_mask,
        RasterizerState: convert::rasterizer_desc(&state.rasterizer),
        DepthStencilState: convert::depth_stencil_desc(&state.depth_stencil),
        InputLayout: D3D12_INPUT_LAYOUT_DESC {
            pInputElementDescs: elements.as_ptr(),
            NumElements: elements.len() as u32,
        },
        IBStripCutValue: D3D12_INDEX_BUFFER_STRIP_CUT_VALUE_DISABLED,
        PrimitiveTopologyType: convert::topology_type(state.primitive_type),
        NumRenderTargets: state.targets.count,
        RTVFormats: rtv_formats,
        DSVFormat: convert::format(state.targets.depth_stencil),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: state.targets.sample_count,
            Quality: state.targets.sample_quality,
        },
        NodeMask: desc.node_mask.bits(),
        CachedPSO: D3D12_CACHED_PIPELINE_STATE::default(),
        Flags: D3D12_PIPELINE_STATE_FLAG_NONE,
    };

    f(&native).map_err(convert::error("CreateGraphicsPipelineState"))
}

pub fn compute_desc(desc: &ComputePipelineDesc) -> RhiResult<D3D12_COMPUTE_PIPELINE_STATE_DESC> {
    Ok(D3D12_COMPUTE_PIPELINE_STATE_DESC {
        pRootSignature: std::mem::ManuallyDrop::new(root_signature(&desc.root_signature)?),
        CS: bytecode(Some(&desc.shader)),
        NodeMask: desc.node_mask.bits(),
        CachedPSO: D3D12_CACHED_PIPELINE_STATE::default(),
        Flags: D3D12_PIPELINE_STATE_FLAG_NONE,
    })
}

fn visibility(visibility: ShaderVisibility) -> D3D12_SHADER_VISIBILITY {
    match visibility {
        ShaderVisibility::All => D3D12_SHADER_VISIBILITY_ALL,
        ShaderVisibility::Vertex => D3D12_SHADER_VISIBILITY_VERTEX,
        ShaderVisibility::Hull => D3D12_SHADER_VISIBILITY_HULL,
        ShaderVisibility::Domain => D3D12_SHADER_VISIBILITY_DOMAIN,
        ShaderVisibility::Geometry => D3D12_SHADER_VISIBILITY_GEOMETRY,
        ShaderVisibility::Pixel => D3D12_SHADER_VISIBILITY_PIXEL,
    }
}

fn range_type(kind: DescriptorRangeKind) -> D3D12_DESCRIPTOR_RANGE_TYPE {
    match kind {
        DescriptorRangeKind::Srv => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        DescriptorRangeKind::Cbv => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
        DescriptorRangeKind::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
        DescriptorRangeKind::Uav => D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
    }
}

fn root_flags(flags: RootSignatureFlags) -> D3D12_ROOT_SIGNATURE_FLAGS {
    let mut native = D3D12_ROOT_SIGNATURE_FLAG_NONE;
    for (ours, theirs) in [
        (
            RootSignatureFlags::ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
            D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        ),
        (
            RootSignatureFlags::DENY_VERTEX_SHADER_ROOT_ACCESS,
            D3D12_ROOT_SIGNATURE_FLAG_DENY_VERTEX_SHADER_ROOT_ACCESS,
        ),
        (
            RootSignatureFlags::DENY_HULL_SHADER_ROOT_ACCESS,
            D3D12_ROOT_SIGNATURE_FLAG_DENY_HULL_SHADER_ROOT_ACCESS,
        ),
        (
            RootSignatureFlags::DENY_DOMAIN_SHADER_ROOT_ACCESS,
            D3D12_ROOT_SIGNATURE_FLAG_DENY_DOMAIN_SHADER_ROOT_ACCESS,
        ),
        (
            RootSignatureFlags::DENY_GEOMETRY_SHADER_ROOT_ACCESS,
            D3D12_ROOT_SIGNATURE_FLAG_DENY_GEOMETRY_SHADER_ROOT_ACCESS,
        ),
        (
            RootSignatureFlags::DENY_PIXEL_SHADER_ROOT_ACCESS,
            D3D12_ROOT_SIGNATURE_FLAG_DENY_PIXEL_SHADER_ROOT_ACCESS,
        ),
        (RootSignatureFlags::ALLOW_STREAM_OUTPUT, D3D12_ROOT_SIGNATURE_FLAG_ALLOW_STREAM_OUTPUT),
    ] {
        if flags.contains(ours) {
            native |= theirs;
        }
    }
    native
}

/// Serializes `desc` as a version 1.0 root signature blob.
pub fn serialize_root_signature(desc: &RootSignatureDesc) -> RhiResult<Vec<u8>> {
    let ranges = desc
        .parameters
        .iter()
        .map(|parameter| D3D12_DESCRIPTOR_RANGE {
            RangeType: range_type(parameter.kind),
            NumDescriptors: parameter.count,
            BaseShaderRegister: 0,
            RegisterSpace: 0,
            OffsetInDescriptorsFromTableStart: 0,
        })
        .collect::<Vec<_>>();

    let parameters = desc
        .parameters
        .iter()
        .zip(&ranges)
        .map(|(parameter, range)| D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: range,
                },
            },
            ShaderVisibility: visibility(parameter.visibility),
        })
        .collect::<Vec<_>>();

    let native = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null(),
        Flags: root_flags(desc.flags),
    };

    let mut blob: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let result = unsafe {
        D3D12SerializeRootSignature(&native, D3D_ROOT_SIGNATURE_VERSION_1, &mut blob, Some(&mut errors as *mut _))
    };

    if let Err(e) = result {
        if let Some(errors) = errors {
            log::error!("root signature serialization failed: {}", String::from_utf8_lossy(blob_bytes(&errors)));
        }
        return Err(convert::error("D3D12SerializeRootSignature")(e));
    }

    blob.map(|blob| blob_bytes(&blob).to_vec())
        .ok_or(RhiError::InvalidState("root signature serialization produced no blob"))
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer().cast::<u8>(), blob.GetBufferSize()) }
}
