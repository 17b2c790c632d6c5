use crate::format::Format;

/// Row pitch alignment required for buffer-side texture copies.
pub const TEXTURE_DATA_PITCH_ALIGNMENT: u32 = 256;

/// Offset alignment required for buffer-side texture copies.
pub const TEXTURE_DATA_PLACEMENT_ALIGNMENT: u64 = 512;

/// Passed as a subresource index to address every subresource at once.
pub const ALL_SUBRESOURCES: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// GPU-local memory.
    Default,
    /// CPU-writable memory read by the GPU.
    Upload,
    /// GPU-writable memory read by the CPU.
    Readback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    Buffer,
    Texture1D,
    Texture2D,
    Texture3D,
}

bitflags::bitflags! {
    pub struct ResourceFlags: u32 {
        const ALLOW_RENDER_TARGET = 0x1;
        const ALLOW_DEPTH_STENCIL = 0x2;
        const ALLOW_UNORDERED_ACCESS = 0x4;
        const DENY_SHADER_RESOURCE = 0x8;
        const ALLOW_CROSS_ADAPTER = 0x10;
    }
}

bitflags::bitflags! {
    /// Native resource states. The values match `D3D12_RESOURCE_STATES`.
    pub struct ResourceState: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const UNORDERED_ACCESS = 0x8;
        const DEPTH_WRITE = 0x10;
        const DEPTH_READ = 0x20;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const STREAM_OUT = 0x100;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits
            | Self::INDEX_BUFFER.bits
            | Self::NON_PIXEL_SHADER_RESOURCE.bits
            | Self::PIXEL_SHADER_RESOURCE.bits
            | Self::INDIRECT_ARGUMENT.bits
            | Self::COPY_SOURCE.bits;
        const ALL_SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits
            | Self::PIXEL_SHADER_RESOURCE.bits;
    }
}

impl ResourceState {
    /// Whether the state permits GPU writes.
    #[must_use]
    pub fn is_writable(self) -> bool {
        self.intersects(
            Self::RENDER_TARGET
                | Self::UNORDERED_ACCESS
                | Self::DEPTH_WRITE
                | Self::STREAM_OUT
                | Self::COPY_DEST,
        )
    }
}

/// The layout of one subresource inside a buffer, as used by texture copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacedFootprint {
    pub offset: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub row_pitch: u32,
}

impl PlacedFootprint {
    /// The number of block rows in one depth slice.
    #[must_use]
    pub fn row_count(&self) -> u32 {
        self.format.row_count(self.height)
    }

    /// The number of meaningful bytes in each row.
    #[must_use]
    pub fn row_size(&self) -> u32 {
        self.format.row_pitch(self.width)
    }

    /// The number of bytes spanned by the footprint, excluding `offset`.
    #[must_use]
    pub fn size(&self) -> u64 {
        let rows = u64::from(self.row_count()) * u64::from(self.depth);
        if rows == 0 {
            return 0;
        }
        (rows - 1) * u64::from(self.row_pitch) + u64::from(self.row_size())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceDesc {
    pub dimension: ResourceDimension,
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub sample_count: u32,
    pub flags: ResourceFlags,
}

impl ResourceDesc {
    #[must_use]
    pub fn buffer(size: u64, flags: ResourceFlags) -> Self {
        Self {
            dimension: ResourceDimension::Buffer,
            width: size,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: Format::Unknown,
            sample_count: 1,
            flags,
        }
    }

    #[must_use]
    pub fn texture_2d(
        width: u32,
        height: u32,
        array_size: u32,
        mip_levels: u32,
        format: Format,
        flags: ResourceFlags,
    ) -> Self {
        Self {
            dimension: ResourceDimension::Texture2D,
            width: u64::from(width),
            height,
            depth_or_array_size: array_size,
            mip_levels,
            format,
            sample_count: 1,
            flags,
        }
    }

    #[must_use]
    pub fn is_buffer(&self) -> bool {
        self.dimension == ResourceDimension::Buffer
    }

    /// The number of array slices. Volume textures have a single slice.
    #[must_use]
    pub fn array_size(&self) -> u32 {
        match self.dimension {
            ResourceDimension::Texture3D => 1,
            _ => self.depth_or_array_size,
        }
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        match self.dimension {
            ResourceDimension::Texture3D => self.depth_or_array_size,
            _ => 1,
        }
    }

    #[must_use]
    pub fn plane_count(&self) -> u32 {
        if self.is_buffer() {
            1
        } else {
            self.format.plane_count()
        }
    }

    #[must_use]
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_size() * self.plane_count()
    }

    /// Flattens a (mip, array slice, plane) triple into a subresource index.
    #[must_use]
    pub fn subresource_index(&self, mip: u32, array_slice: u32, plane: u32) -> u32 {
        calc_subresource(mip, array_slice, plane, self.mip_levels, self.array_size())
    }

    /// Returns (mip, array slice, plane) for a subresource index.
    #[must_use]
    pub fn decompose_subresource(&self, index: u32) -> (u32, u32, u32) {
        let mip = index % self.mip_levels;
        let array = (index / self.mip_levels) % self.array_size();
        let plane = index / (self.mip_levels * self.array_size());
        (mip, array, plane)
    }

    /// The dimensions of one mip level, in texels.
    #[must_use]
    pub fn mip_dimensions(&self, mip: u32) -> (u32, u32, u32) {
        let extent = geometry::mip_extent(
            geometry::Extent3::<u32, geometry::Texel>::new(
                self.width as u32,
                self.height,
                self.depth(),
            ),
            mip,
        );
        (extent.width, extent.height, extent.depth)
    }

    /// The buffer layout used to copy subresource `index` to or from a
    /// buffer, starting at `base_offset`.
    #[must_use]
    pub fn copyable_footprint(&self, index: u32, base_offset: u64) -> PlacedFootprint {
        let (mip, _, _) = self.decompose_subresource(index);
        let (width, height, depth) = self.mip_dimensions(mip);
        let row_pitch = align_up(
            u64::from(self.format.row_pitch(width)),
            u64::from(TEXTURE_DATA_PITCH_ALIGNMENT),
        ) as u32;

        PlacedFootprint {
            offset: align_up(base_offset, TEXTURE_DATA_PLACEMENT_ALIGNMENT),
            format: self.format,
            width,
            height,
            depth,
            row_pitch,
        }
    }

    /// Lays every subresource out back to back, as a buffer copy of the whole
    /// resource would. Returns the footprints and the total size in bytes.
    #[must_use]
    pub fn copyable_footprints(&self, base_offset: u64) -> (Vec<PlacedFootprint>, u64) {
        if self.is_buffer() {
            return (Vec::new(), self.width);
        }

        let mut offset = base_offset;
        let footprints = (0..self.subresource_count())
            .map(|index| {
                let footprint = self.copyable_footprint(index, offset);
                offset = footprint.offset + footprint.size();
                footprint
            })
            .collect();

        (footprints, offset - base_offset)
    }
}

/// Flattens a (mip, array slice, plane) triple into a subresource index.
#[must_use]
pub fn calc_subresource(
    mip: u32,
    array_slice: u32,
    plane: u32,
    mip_levels: u32,
    array_size: u32,
) -> u32 {
    mip + array_slice * mip_levels + plane * mip_levels * array_size
}

#[must_use]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    match value % alignment {
        0 => value,
        r => value + alignment - r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_desc() -> ResourceDesc {
        ResourceDesc {
            dimension: ResourceDimension::Texture2D,
            width: 64,
            height: 64,
            depth_or_array_size: 6,
            mip_levels: 7,
            format: Format::D24UnormS8Uint,
            sample_count: 1,
            flags: ResourceFlags::ALLOW_DEPTH_STENCIL,
        }
    }

    #[test]
    fn subresource_indexing() {
        let desc = cube_desc();

        assert_eq!(desc.subresource_count(), 7 * 6 * 2);
        assert_eq!(desc.subresource_index(0, 0, 0), 0);
        assert_eq!(desc.subresource_index(2, 1, 0), 9);
        assert_eq!(desc.subresource_index(0, 0, 1), 42);

        for index in 0..desc.subresource_count() {
            let (mip, array, plane) = desc.decompose_subresource(index);
            assert_eq!(desc.subresource_index(mip, array, plane), index);
        }
    }

    #[test]
    fn footprints_are_aligned() {
        let desc = ResourceDesc {
            format: Format::R8G8B8A8Unorm,
            depth_or_array_size: 1,
            mip_levels: 1,
            width: 10,
            height: 3,
            ..cube_desc()
        };

        let footprint = desc.copyable_footprint(0, 100);
        assert_eq!(footprint.offset, 512);
        assert_eq!(footprint.row_pitch, 256);
        assert_eq!(footprint.size(), 256 * 2 + 40);
    }
}
