//! Tracking which subresources a view touches.
//!
//! A view covers a box of half-open ranges along three axes: array slice,
//! mip level and plane. Two views whose boxes are disjoint on at least one
//! axis can be bound simultaneously without a read/write hazard.

use std::ops::Range;

use super::view_desc::{
    DsvDesc, DsvDimension, DsvFlags, RtvDesc, RtvDimension, SrvDesc, SrvDimension, UavDesc,
    UavDimension, ViewDesc,
};
use crate::resource::desc::{calc_subresource, ResourceDesc};

/// The shape of the resource a subset indexes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceLayout {
    pub mip_levels: u32,
    pub array_size: u32,
    pub plane_count: u32,
}

impl SubresourceLayout {
    #[must_use]
    pub fn of(desc: &ResourceDesc) -> Self {
        Self {
            mip_levels: desc.mip_levels,
            array_size: desc.array_size(),
            plane_count: desc.plane_count(),
        }
    }

    #[must_use]
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_size * self.plane_count
    }
}

/// Half-open ranges of array slices, mips and planes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceSubset {
    pub begin_array: u32,
    pub end_array: u32,
    pub begin_mip: u32,
    pub end_mip: u32,
    pub begin_plane: u32,
    pub end_plane: u32,
}

impl SubresourceSubset {
    #[must_use]
    pub fn new(arrays: Range<u32>, mips: Range<u32>, planes: Range<u32>) -> Self {
        Self {
            begin_array: arrays.start,
            end_array: arrays.end,
            begin_mip: mips.start,
            end_mip: mips.end,
            begin_plane: planes.start,
            end_plane: planes.end,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.begin_array >= self.end_array
            || self.begin_mip >= self.end_mip
            || self.begin_plane >= self.end_plane
    }

    /// True when the two subsets share no subresource, i.e. when they are
    /// disjoint along at least one axis.
    #[must_use]
    pub fn does_not_overlap(&self, other: &Self) -> bool {
        self.is_empty()
            || other.is_empty()
            || self.end_array <= other.begin_array
            || other.end_array <= self.begin_array
            || self.end_mip <= other.begin_mip
            || other.end_mip <= self.begin_mip
            || self.end_plane <= other.begin_plane
            || other.end_plane <= self.begin_plane
    }

    #[must_use]
    pub fn array_count(&self) -> u32 {
        self.end_array.saturating_sub(self.begin_array)
    }

    #[must_use]
    pub fn mip_count(&self) -> u32 {
        self.end_mip.saturating_sub(self.begin_mip)
    }

    #[must_use]
    pub fn plane_count(&self) -> u32 {
        self.end_plane.saturating_sub(self.begin_plane)
    }
}

/// The subresources a single view covers, together with the shape of the
/// resource it views.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewSubresourceSubset {
    subset: SubresourceSubset,
    layout: SubresourceLayout,
}

impl ViewSubresourceSubset {
    /// A subset covering every subresource of the resource.
    #[must_use]
    pub fn whole(layout: SubresourceLayout) -> Self {
        Self {
            subset: SubresourceSubset::new(
                0..layout.array_size,
                0..layout.mip_levels,
                0..layout.plane_count,
            ),
            layout,
        }
    }

    #[must_use]
    pub fn from_view(view: &ViewDesc, layout: SubresourceLayout) -> Self {
        match view {
            ViewDesc::Srv(desc) => Self::from_srv(desc, layout),
            ViewDesc::Rtv(desc) => Self::from_rtv(desc, layout),
            ViewDesc::Dsv(desc) => Self::from_dsv(desc, layout),
            ViewDesc::Uav(desc) => Self::from_uav(desc, layout),
            ViewDesc::Cbv(_) => Self::whole(layout),
        }
    }

    #[must_use]
    pub fn from_srv(desc: &SrvDesc, layout: SubresourceLayout) -> Self {
        let mips = |most_detailed: u32, levels: u32| {
            let levels = if levels == u32::MAX {
                layout.mip_levels.saturating_sub(most_detailed)
            } else {
                levels
            };
            most_detailed..most_detailed + levels
        };
        let plane = |plane_slice: u32| {
            let plane = desc.format.view_plane_slice().unwrap_or(plane_slice);
            plane..plane + 1
        };

        let (arrays, mip_range, planes) = match desc.dimension {
            SrvDimension::Buffer { .. } => return Self::whole(layout),
            SrvDimension::Texture1D {
                most_detailed_mip,
                mip_levels,
            }
            | SrvDimension::Texture3D {
                most_detailed_mip,
                mip_levels,
            } => (0..1, mips(most_detailed_mip, mip_levels), plane(0)),
            SrvDimension::Texture1DArray {
                most_detailed_mip,
                mip_levels,
                first_array_slice,
                array_size,
            } => (
                first_array_slice..first_array_slice + array_size,
                mips(most_detailed_mip, mip_levels),
                plane(0),
            ),
            SrvDimension::Texture2D {
                most_detailed_mip,
                mip_levels,
                plane_slice,
            } => (0..1, mips(most_detailed_mip, mip_levels), plane(plane_slice)),
            SrvDimension::Texture2DArray {
                most_detailed_mip,
                mip_levels,
                first_array_slice,
                array_size,
                plane_slice,
            } => (
                first_array_slice..first_array_slice + array_size,
                mips(most_detailed_mip, mip_levels),
                plane(plane_slice),
            ),
            SrvDimension::Texture2DMs => (0..1, 0..1, plane(0)),
            SrvDimension::Texture2DMsArray {
                first_array_slice,
                array_size,
            } => (
                first_array_slice..first_array_slice + array_size,
                0..1,
                plane(0),
            ),
            SrvDimension::TextureCube {
                most_detailed_mip,
                mip_levels,
            } => (0..6, mips(most_detailed_mip, mip_levels), plane(0)),
            SrvDimension::TextureCubeArray {
                most_detailed_mip,
                mip_levels,
                first_2d_array_face,
                num_cubes,
            } => (
                first_2d_array_face..first_2d_array_face + num_cubes * 6,
                mips(most_detailed_mip, mip_levels),
                plane(0),
            ),
        };

        Self::clamped(arrays, mip_range, planes, layout)
    }

    #[must_use]
    pub fn from_rtv(desc: &RtvDesc, layout: SubresourceLayout) -> Self {
        let (arrays, mip, plane) = match desc.dimension {
            RtvDimension::Buffer { .. } => return Self::whole(layout),
            RtvDimension::Texture1D { mip_slice } | RtvDimension::Texture3D { mip_slice, .. } => {
                (0..1, mip_slice, 0)
            }
            RtvDimension::Texture1DArray {
                mip_slice,
                first_array_slice,
                array_size,
            } => (first_array_slice..first_array_slice + array_size, mip_slice, 0),
            RtvDimension::Texture2D {
                mip_slice,
                plane_slice,
            } => (0..1, mip_slice, plane_slice),
            RtvDimension::Texture2DArray {
                mip_slice,
                first_array_slice,
                array_size,
                plane_slice,
            } => (
                first_array_slice..first_array_slice + array_size,
                mip_slice,
                plane_slice,
            ),
            RtvDimension::Texture2DMs => (0..1, 0, 0),
            RtvDimension::Texture2DMsArray {
                first_array_slice,
                array_size,
            } => (first_array_slice..first_array_slice + array_size, 0, 0),
        };

        Self::clamped(arrays, mip..mip + 1, plane..plane + 1, layout)
    }

    /// Depth-stencil views cover only the planes they write: a view with a
    /// read-only stencil touches the depth plane alone, and vice versa.
    #[must_use]
    pub fn from_dsv(desc: &DsvDesc, layout: SubresourceLayout) -> Self {
        let (arrays, mip) = match desc.dimension {
            DsvDimension::Texture1D { mip_slice } | DsvDimension::Texture2D { mip_slice } => {
                (0..1, mip_slice)
            }
            DsvDimension::Texture1DArray {
                mip_slice,
                first_array_slice,
                array_size,
            }
            | DsvDimension::Texture2DArray {
                mip_slice,
                first_array_slice,
                array_size,
            } => (first_array_slice..first_array_slice + array_size, mip_slice),
            DsvDimension::Texture2DMs => (0..1, 0),
            DsvDimension::Texture2DMsArray {
                first_array_slice,
                array_size,
            } => (first_array_slice..first_array_slice + array_size, 0),
        };

        let planes = if desc.format.has_stencil() {
            let read_only_depth = desc.flags.contains(DsvFlags::READ_ONLY_DEPTH);
            let read_only_stencil = desc.flags.contains(DsvFlags::READ_ONLY_STENCIL);
            match (read_only_depth, read_only_stencil) {
                (false, false) => 0..2,
                (false, true) => 0..1,
                (true, false) => 1..2,
                (true, true) => 1..1,
            }
        } else {
            0..1
        };

        Self::clamped(arrays, mip..mip + 1, planes, layout)
    }

    #[must_use]
    pub fn from_uav(desc: &UavDesc, layout: SubresourceLayout) -> Self {
        let (arrays, mip, plane) = match desc.dimension {
            UavDimension::Buffer { .. } => return Self::whole(layout),
            UavDimension::Texture1D { mip_slice } | UavDimension::Texture3D { mip_slice, .. } => {
                (0..1, mip_slice, 0)
            }
            UavDimension::Texture1DArray {
                mip_slice,
                first_array_slice,
                array_size,
            } => (first_array_slice..first_array_slice + array_size, mip_slice, 0),
            UavDimension::Texture2D {
                mip_slice,
                plane_slice,
            } => (0..1, mip_slice, plane_slice),
            UavDimension::Texture2DArray {
                mip_slice,
                first_array_slice,
                array_size,
                plane_slice,
            } => (
                first_array_slice..first_array_slice + array_size,
                mip_slice,
                plane_slice,
            ),
        };

        Self::clamped(arrays, mip..mip + 1, plane..plane + 1, layout)
    }

    fn clamped(
        arrays: Range<u32>,
        mips: Range<u32>,
        planes: Range<u32>,
        layout: SubresourceLayout,
    ) -> Self {
        debug_assert!(arrays.end <= layout.array_size, "view array range exceeds resource");
        debug_assert!(mips.end <= layout.mip_levels, "view mip range exceeds resource");
        debug_assert!(planes.end <= layout.plane_count, "view plane range exceeds resource");

        let clamp = |r: Range<u32>, max: u32| r.start.min(max)..r.end.min(max);

        Self {
            subset: SubresourceSubset::new(
                clamp(arrays, layout.array_size),
                clamp(mips, layout.mip_levels),
                clamp(planes, layout.plane_count),
            ),
            layout,
        }
    }

    #[must_use]
    pub fn subset(&self) -> &SubresourceSubset {
        &self.subset
    }

    #[must_use]
    pub fn layout(&self) -> &SubresourceLayout {
        &self.layout
    }

    #[must_use]
    pub fn is_whole_resource(&self) -> bool {
        self.subset.begin_array == 0
            && self.subset.end_array == self.layout.array_size
            && self.subset.begin_mip == 0
            && self.subset.end_mip == self.layout.mip_levels
            && self.subset.begin_plane == 0
            && self.subset.end_plane == self.layout.plane_count
    }

    /// True when the views share no subresource of the same resource.
    ///
    /// A whole-resource subset overlaps every non-empty subset, which keeps
    /// the answer unchanged by [`Self::reduce`].
    #[must_use]
    pub fn does_not_overlap(&self, other: &Self) -> bool {
        if self.subset.is_empty() || other.subset.is_empty() {
            return true;
        }

        if self.is_whole_resource() || other.is_whole_resource() {
            return false;
        }

        self.subset.does_not_overlap(&other.subset)
    }

    /// Flattens a whole-resource subset into a single linear range of
    /// subresource indices. Other subsets are left untouched.
    pub fn reduce(&mut self) {
        if !self.is_whole_resource() {
            return;
        }

        let total = self.layout.subresource_count();
        self.layout = SubresourceLayout {
            mip_levels: 1,
            array_size: total,
            plane_count: 1,
        };
        self.subset = SubresourceSubset::new(0..total, 0..1, 0..1);
    }

    /// The covered subresource indices as sorted, coalesced ranges.
    #[must_use]
    pub fn ranges(&self) -> Vec<Range<u32>> {
        let mut ranges: Vec<Range<u32>> = Vec::new();
        if self.subset.is_empty() {
            return ranges;
        }

        let s = &self.subset;
        let l = &self.layout;

        for plane in s.begin_plane..s.end_plane {
            for array in s.begin_array..s.end_array {
                let start = calc_subresource(s.begin_mip, array, plane, l.mip_levels, l.array_size);
                let end = start + s.mip_count();

                match ranges.last_mut() {
                    Some(last) if last.end == start => last.end = end,
                    _ => ranges.push(start..end),
                }
            }
        }

        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;

    const LAYOUT: SubresourceLayout = SubresourceLayout {
        mip_levels: 4,
        array_size: 3,
        plane_count: 2,
    };

    fn all_subsets() -> Vec<ViewSubresourceSubset> {
        let mut subsets = Vec::new();
        for a0 in 0..3 {
            for a1 in a0..=3 {
                for m0 in 0..4 {
                    for m1 in m0..=4 {
                        for p0 in 0..2 {
                            for p1 in p0..=2 {
                                subsets.push(ViewSubresourceSubset {
                                    subset: SubresourceSubset::new(a0..a1, m0..m1, p0..p1),
                                    layout: LAYOUT,
                                });
                            }
                        }
                    }
                }
            }
        }
        subsets
    }

    fn shares_a_subresource(a: &ViewSubresourceSubset, b: &ViewSubresourceSubset) -> bool {
        let a_ranges = a.ranges();
        let b_ranges = b.ranges();
        a_ranges.iter().any(|ra| {
            b_ranges
                .iter()
                .any(|rb| ra.start < rb.end && rb.start < ra.end)
        })
    }

    #[test]
    fn overlap_is_symmetric_and_exact() {
        let subsets = all_subsets();

        for a in &subsets {
            for b in &subsets {
                assert_eq!(a.does_not_overlap(b), b.does_not_overlap(a));
                assert_eq!(a.does_not_overlap(b), !shares_a_subresource(a, b), "{a:?} {b:?}");
            }
        }
    }

    #[test]
    fn reduce_is_idempotent_and_preserves_overlap() {
        let subsets = all_subsets();

        for a in &subsets {
            let mut once = *a;
            once.reduce();
            let mut twice = once;
            twice.reduce();

            assert_eq!(once, twice);
            assert_eq!(once.is_whole_resource(), a.is_whole_resource());

            for b in &subsets {
                assert_eq!(once.does_not_overlap(b), a.does_not_overlap(b));
                assert_eq!(b.does_not_overlap(&once), b.does_not_overlap(a));
            }
        }
    }

    #[test]
    fn reduced_whole_resource_is_one_range() {
        let mut whole = ViewSubresourceSubset::whole(LAYOUT);
        assert_eq!(whole.ranges(), vec![0..24]);

        whole.reduce();
        assert_eq!(whole.ranges(), vec![0..24]);
        assert_eq!(whole.layout().mip_levels, 1);
        assert!(whole.is_whole_resource());

        let mut partial = ViewSubresourceSubset {
            subset: SubresourceSubset::new(1..3, 0..2, 0..1),
            layout: LAYOUT,
        };
        let before = partial;
        partial.reduce();
        assert_eq!(partial, before);
        assert_eq!(partial.ranges(), vec![4..6, 8..10]);
    }

    #[test]
    fn depth_only_dsv_and_stencil_srv_are_disjoint() {
        let layout = SubresourceLayout {
            mip_levels: 1,
            array_size: 1,
            plane_count: 2,
        };

        let dsv = ViewSubresourceSubset::from_dsv(
            &DsvDesc {
                format: Format::D24UnormS8Uint,
                dimension: DsvDimension::Texture2D { mip_slice: 0 },
                flags: DsvFlags::READ_ONLY_STENCIL,
            },
            layout,
        );
        let stencil_srv = ViewSubresourceSubset::from_srv(
            &SrvDesc {
                format: Format::X24TypelessG8Uint,
                dimension: SrvDimension::Texture2D {
                    most_detailed_mip: 0,
                    mip_levels: 1,
                    plane_slice: 0,
                },
            },
            layout,
        );
        let depth_srv = ViewSubresourceSubset::from_srv(
            &SrvDesc {
                format: Format::R24UnormX8Typeless,
                dimension: SrvDimension::Texture2D {
                    most_detailed_mip: 0,
                    mip_levels: 1,
                    plane_slice: 0,
                },
            },
            layout,
        );

        assert!(dsv.does_not_overlap(&stencil_srv));
        assert!(!dsv.does_not_overlap(&depth_srv));
    }

    #[test]
    fn fully_read_only_dsv_writes_no_plane() {
        let layout = SubresourceLayout {
            mip_levels: 1,
            array_size: 1,
            plane_count: 2,
        };

        let dsv = ViewSubresourceSubset::from_dsv(
            &DsvDesc {
                format: Format::D24UnormS8Uint,
                dimension: DsvDimension::Texture2D { mip_slice: 0 },
                flags: DsvFlags::READ_ONLY_DEPTH | DsvFlags::READ_ONLY_STENCIL,
            },
            layout,
        );
        assert!(dsv.ranges().is_empty());
        assert!(!dsv.is_whole_resource());

        for format in [Format::R24UnormX8Typeless, Format::X24TypelessG8Uint] {
            let srv = ViewSubresourceSubset::from_srv(
                &SrvDesc {
                    format,
                    dimension: SrvDimension::Texture2D {
                        most_detailed_mip: 0,
                        mip_levels: 1,
                        plane_slice: 0,
                    },
                },
                layout,
            );
            assert!(dsv.does_not_overlap(&srv), "{format:?}");
        }
    }

    #[test]
    fn srv_mip_ranges() {
        let layout = SubresourceLayout {
            mip_levels: 8,
            array_size: 6,
            plane_count: 1,
        };
        let cube = ViewSubresourceSubset::from_srv(
            &SrvDesc {
                format: Format::R8G8B8A8Unorm,
                dimension: SrvDimension::TextureCube {
                    most_detailed_mip: 2,
                    mip_levels: u32::MAX,
                },
            },
            layout,
        );

        assert_eq!(cube.subset().begin_mip, 2);
        assert_eq!(cube.subset().end_mip, 8);
        assert_eq!(cube.subset().array_count(), 6);
        assert!(!cube.is_whole_resource());

        let rtv = ViewSubresourceSubset::from_rtv(
            &RtvDesc {
                format: Format::R8G8B8A8Unorm,
                dimension: RtvDimension::Texture2DArray {
                    mip_slice: 1,
                    first_array_slice: 0,
                    array_size: 6,
                    plane_slice: 0,
                },
            },
            layout,
        );
        assert!(!rtv.does_not_overlap(&cube));

        let top_mip = ViewSubresourceSubset::from_rtv(
            &RtvDesc {
                format: Format::R8G8B8A8Unorm,
                dimension: RtvDimension::Texture2DArray {
                    mip_slice: 0,
                    first_array_slice: 0,
                    array_size: 6,
                    plane_slice: 0,
                },
            },
            layout,
        );
        assert!(top_mip.does_not_overlap(&cube));
    }
}
