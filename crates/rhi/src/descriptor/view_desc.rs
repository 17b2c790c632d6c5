//! Plain descriptions of the views a descriptor can hold.
//!
//! `u32::MAX` for a mip count selects every mip from the most detailed one
//! down, matching the native convention.

use crate::format::Format;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SrvDimension {
    Buffer {
        first_element: u64,
        num_elements: u32,
        structure_byte_stride: u32,
    },
    Texture1D {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    Texture1DArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        most_detailed_mip: u32,
        mip_levels: u32,
        plane_slice: u32,
    },
    Texture2DArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_array_slice: u32,
        array_size: u32,
        plane_slice: u32,
    },
    Texture2DMs,
    Texture2DMsArray {
        first_array_slice: u32,
        array_size: u32,
    },
    Texture3D {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    TextureCube {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    TextureCubeArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_2d_array_face: u32,
        num_cubes: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SrvDesc {
    pub format: Format,
    pub dimension: SrvDimension,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RtvDimension {
    Buffer {
        first_element: u64,
        num_elements: u32,
    },
    Texture1D {
        mip_slice: u32,
    },
    Texture1DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        mip_slice: u32,
        plane_slice: u32,
    },
    Texture2DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
        plane_slice: u32,
    },
    Texture2DMs,
    Texture2DMsArray {
        first_array_slice: u32,
        array_size: u32,
    },
    Texture3D {
        mip_slice: u32,
        first_w_slice: u32,
        w_size: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtvDesc {
    pub format: Format,
    pub dimension: RtvDimension,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DsvDimension {
    Texture1D {
        mip_slice: u32,
    },
    Texture1DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        mip_slice: u32,
    },
    Texture2DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2DMs,
    Texture2DMsArray {
        first_array_slice: u32,
        array_size: u32,
    },
}

bitflags::bitflags! {
    pub struct DsvFlags: u32 {
        const READ_ONLY_DEPTH = 0x1;
        const READ_ONLY_STENCIL = 0x2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DsvDesc {
    pub format: Format,
    pub dimension: DsvDimension,
    pub flags: DsvFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UavDimension {
    Buffer {
        first_element: u64,
        num_elements: u32,
        structure_byte_stride: u32,
        counter_offset: u64,
    },
    Texture1D {
        mip_slice: u32,
    },
    Texture1DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        mip_slice: u32,
        plane_slice: u32,
    },
    Texture2DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
        plane_slice: u32,
    },
    Texture3D {
        mip_slice: u32,
        first_w_slice: u32,
        w_size: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UavDesc {
    pub format: Format,
    pub dimension: UavDimension,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CbvDesc {
    pub offset: u64,
    pub size: u32,
}

/// Any view that can be written into a descriptor slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewDesc {
    Srv(SrvDesc),
    Rtv(RtvDesc),
    Dsv(DsvDesc),
    Uav(UavDesc),
    Cbv(CbvDesc),
}
