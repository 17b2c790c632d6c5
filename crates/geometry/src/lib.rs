use std::ops::{Add, Sub};

pub use euclid::{Point2D as Point, Size2D as Extent, Size3D as Extent3, Vector2D as Offset};

/// Unit of texture-space coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Texel();

/// An axis-aligned rectangle, half-open on the max edges.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect<T, U>(euclid::Box2D<T, U>);

impl<T, U> Rect<T, U> {
    pub fn new(origin: Point<T, U>, extent: Extent<T, U>) -> Self
    where
        T: Copy + Add<T, Output = T>,
    {
        Self(euclid::Box2D::from_origin_and_size(origin, extent))
    }

    pub fn from_corners(min: Point<T, U>, max: Point<T, U>) -> Self {
        Self(euclid::Box2D::new(min, max))
    }

    pub fn left(&self) -> T
    where
        T: Copy,
    {
        self.0.min.x
    }

    pub fn top(&self) -> T
    where
        T: Copy,
    {
        self.0.min.y
    }

    pub fn right(&self) -> T
    where
        T: Copy,
    {
        self.0.max.x
    }

    pub fn bottom(&self) -> T
    where
        T: Copy,
    {
        self.0.max.y
    }

    pub fn extent(&self) -> Extent<T, U>
    where
        T: Copy + Sub<T, Output = T>,
    {
        self.0.size()
    }

    pub fn is_empty(&self) -> bool
    where
        T: PartialOrd,
    {
        self.0.is_empty()
    }

    pub fn intersection(&self, rhs: &Rect<T, U>) -> Option<Rect<T, U>>
    where
        T: Copy + PartialOrd,
    {
        self.0.intersection(&rhs.0).map(Rect)
    }
}

impl<U> Rect<u32, U> {
    /// A rectangle covering `extent` from the origin.
    #[must_use]
    pub fn covering(extent: Extent<u32, U>) -> Self {
        Self::new(Point::new(0, 0), extent)
    }

    /// Shrinks the rectangle so that it lies within `bounds`, returning an
    /// empty rectangle at the origin if they do not intersect.
    #[must_use]
    pub fn clamp_to(&self, bounds: Extent<u32, U>) -> Self {
        self.intersection(&Self::covering(bounds))
            .unwrap_or_else(|| Self::covering(Extent::new(0, 0)))
    }
}

/// Returns the size of mip `level` of a resource whose top mip is `extent`.
/// Each dimension halves per level and never drops below one.
#[must_use]
pub fn mip_extent<U>(extent: Extent3<u32, U>, level: u32) -> Extent3<u32, U> {
    let shrink = |v: u32| v.checked_shr(level).unwrap_or(0).max(1);
    Extent3::new(
        shrink(extent.width),
        shrink(extent.height),
        shrink(extent.depth),
    )
}

/// The length of a full mip chain for `extent`.
#[must_use]
pub fn full_mip_count<U>(extent: Extent3<u32, U>) -> u32 {
    let largest = extent.width.max(extent.height).max(extent.depth).max(1);
    32 - largest.leading_zeros()
}

/// A rasterizer viewport with its depth range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub rect: Rect<f32, Texel>,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    #[must_use]
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32, min_depth: f32, max_depth: f32) -> Self {
        debug_assert!(min_x <= max_x && min_y <= max_y, "viewport corners are inverted");
        Self {
            rect: Rect::from_corners(Point::new(min_x, min_y), Point::new(max_x, max_y)),
            min_depth,
            max_depth,
        }
    }

    /// A viewport covering a render target of the given size with the full
    /// depth range.
    #[must_use]
    pub fn covering(extent: Extent<u32, Texel>) -> Self {
        Self::new(0.0, 0.0, extent.width as f32, extent.height as f32, 0.0, 1.0)
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.rect.right() - self.rect.left()
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.rect.bottom() - self.rect.top()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain() {
        let extent = Extent3::<u32, Texel>::new(256, 64, 1);

        assert_eq!(full_mip_count(extent), 9);
        assert_eq!(mip_extent(extent, 0), extent);
        assert_eq!(mip_extent(extent, 3), Extent3::new(32, 8, 1));
        assert_eq!(mip_extent(extent, 8), Extent3::new(1, 1, 1));
        assert_eq!(mip_extent(extent, 40), Extent3::new(1, 1, 1));
    }

    #[test]
    fn clamp_scissor() {
        let rect = Rect::<u32, Texel>::from_corners(Point::new(10, 10), Point::new(500, 50));
        let clamped = rect.clamp_to(Extent::new(100, 100));

        assert_eq!(clamped.right(), 100);
        assert_eq!(clamped.bottom(), 50);

        let outside = Rect::<u32, Texel>::from_corners(Point::new(200, 200), Point::new(300, 300));
        assert!(outside.clamp_to(Extent::new(100, 100)).is_empty());
    }

    #[test]
    fn viewport_size() {
        let viewport = Viewport::covering(Extent::new(1920, 1080));
        assert_eq!(viewport.width(), 1920.0);
        assert_eq!(viewport.height(), 1080.0);
        assert_eq!(viewport.max_depth, 1.0);
    }
}
