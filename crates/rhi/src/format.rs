/// Pixel and vertex element formats understood by the RHI.
///
/// The discriminants are stable and are written to the pipeline disk cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Format {
    #[default]
    Unknown = 0,
    R8Unorm = 1,
    R8G8Unorm = 2,
    R8G8B8A8Unorm = 3,
    R8G8B8A8UnormSrgb = 4,
    B8G8R8A8Unorm = 5,
    B8G8R8A8UnormSrgb = 6,
    R10G10B10A2Unorm = 7,
    R16Float = 8,
    R16G16Float = 9,
    R16G16B16A16Float = 10,
    R16Uint = 11,
    R32Float = 12,
    R32Uint = 13,
    R32G32Float = 14,
    R32G32B32Float = 15,
    R32G32B32A32Float = 16,
    Bc1Unorm = 17,
    Bc3Unorm = 18,
    Bc5Unorm = 19,
    Bc7Unorm = 20,
    D16Unorm = 21,
    D32Float = 22,
    D24UnormS8Uint = 23,
    D32FloatS8X24Uint = 24,
    /// The depth plane of a `D24UnormS8Uint` texture viewed as a shader input.
    R24UnormX8Typeless = 25,
    /// The stencil plane of a `D24UnormS8Uint` texture viewed as a shader input.
    X24TypelessG8Uint = 26,
    /// The depth plane of a `D32FloatS8X24Uint` texture viewed as a shader input.
    R32FloatX8X24Typeless = 27,
    /// The stencil plane of a `D32FloatS8X24Uint` texture viewed as a shader input.
    X32TypelessG8X24Uint = 28,
}

impl Format {
    const ALL: [Format; 29] = [
        Self::Unknown,
        Self::R8Unorm,
        Self::R8G8Unorm,
        Self::R8G8B8A8Unorm,
        Self::R8G8B8A8UnormSrgb,
        Self::B8G8R8A8Unorm,
        Self::B8G8R8A8UnormSrgb,
        Self::R10G10B10A2Unorm,
        Self::R16Float,
        Self::R16G16Float,
        Self::R16G16B16A16Float,
        Self::R16Uint,
        Self::R32Float,
        Self::R32Uint,
        Self::R32G32Float,
        Self::R32G32B32Float,
        Self::R32G32B32A32Float,
        Self::Bc1Unorm,
        Self::Bc3Unorm,
        Self::Bc5Unorm,
        Self::Bc7Unorm,
        Self::D16Unorm,
        Self::D32Float,
        Self::D24UnormS8Uint,
        Self::D32FloatS8X24Uint,
        Self::R24UnormX8Typeless,
        Self::X24TypelessG8Uint,
        Self::R32FloatX8X24Typeless,
        Self::X32TypelessG8X24Uint,
    ];

    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    #[must_use]
    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Whether texels are stored in 4x4 compressed blocks.
    #[must_use]
    pub fn is_block_compressed(self) -> bool {
        matches!(
            self,
            Self::Bc1Unorm | Self::Bc3Unorm | Self::Bc5Unorm | Self::Bc7Unorm
        )
    }

    /// The size of one texel, or of one 4x4 block for compressed formats.
    #[must_use]
    pub fn bytes_per_block(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R8Unorm => 1,
            Self::R8G8Unorm | Self::R16Float | Self::R16Uint | Self::D16Unorm => 2,
            Self::R8G8B8A8Unorm
            | Self::R8G8B8A8UnormSrgb
            | Self::B8G8R8A8Unorm
            | Self::B8G8R8A8UnormSrgb
            | Self::R10G10B10A2Unorm
            | Self::R16G16Float
            | Self::R32Float
            | Self::R32Uint
            | Self::D32Float
            | Self::D24UnormS8Uint
            | Self::R24UnormX8Typeless
            | Self::X24TypelessG8Uint => 4,
            Self::R16G16B16A16Float
            | Self::R32G32Float
            | Self::Bc1Unorm
            | Self::D32FloatS8X24Uint
            | Self::R32FloatX8X24Typeless
            | Self::X32TypelessG8X24Uint => 8,
            Self::R32G32B32Float => 12,
            Self::R32G32B32A32Float | Self::Bc3Unorm | Self::Bc5Unorm | Self::Bc7Unorm => 16,
        }
    }

    /// Width and height of one block in texels.
    #[must_use]
    pub fn block_dimension(self) -> u32 {
        if self.is_block_compressed() {
            4
        } else {
            1
        }
    }

    /// The number of bytes in one row of a `width` texel wide image.
    #[must_use]
    pub fn row_pitch(self, width: u32) -> u32 {
        let blocks = (width + self.block_dimension() - 1) / self.block_dimension();
        blocks * self.bytes_per_block()
    }

    /// The number of block rows in a `height` texel tall image.
    #[must_use]
    pub fn row_count(self, height: u32) -> u32 {
        (height + self.block_dimension() - 1) / self.block_dimension()
    }

    #[must_use]
    pub fn is_depth_stencil(self) -> bool {
        matches!(
            self,
            Self::D16Unorm | Self::D32Float | Self::D24UnormS8Uint | Self::D32FloatS8X24Uint
        )
    }

    #[must_use]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint | Self::D32FloatS8X24Uint)
    }

    /// The number of planes in a resource of this format. Depth-stencil
    /// formats keep depth and stencil in separate planes.
    #[must_use]
    pub fn plane_count(self) -> u32 {
        if self.has_stencil() {
            2
        } else {
            1
        }
    }

    /// The plane a shader-resource view of this format reads, for formats
    /// that select a single plane of a depth-stencil resource.
    #[must_use]
    pub fn view_plane_slice(self) -> Option<u32> {
        match self {
            Self::R24UnormX8Typeless | Self::R32FloatX8X24Typeless => Some(0),
            Self::X24TypelessG8Uint | Self::X32TypelessG8X24Uint => Some(1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_are_stable() {
        for format in Format::ALL {
            assert_eq!(Format::from_raw(format.raw()), Some(format));
        }
        assert_eq!(Format::from_raw(999), None);
    }

    #[test]
    fn pitch_of_compressed_formats() {
        assert_eq!(Format::R8G8B8A8Unorm.row_pitch(7), 28);
        assert_eq!(Format::Bc1Unorm.row_pitch(7), 16);
        assert_eq!(Format::Bc1Unorm.row_count(9), 3);
    }

    #[test]
    fn depth_planes() {
        assert_eq!(Format::D32Float.plane_count(), 1);
        assert_eq!(Format::D24UnormS8Uint.plane_count(), 2);
        assert_eq!(Format::X24TypelessG8Uint.view_plane_slice(), Some(1));
        assert_eq!(Format::R8G8B8A8Unorm.view_plane_slice(), None);
    }
}
