//! GPU node addressing for linked (multi-node) adapters.

use std::fmt;

use smallvec::SmallVec;

use crate::error::RhiResult;

/// The largest number of nodes a single adapter may expose.
pub const MAX_NUM_GPUS: usize = 4;

/// The index of one physical GPU within a linked adapter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn mask(self) -> GpuNodeMask {
        GpuNodeMask::single(self)
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// A set of GPU nodes, one bit per node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GpuNodeMask(u32);

impl GpuNodeMask {
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn single(node: NodeIndex) -> Self {
        Self(1 << node.0)
    }

    /// A mask of the first `count` nodes.
    #[must_use]
    pub fn first_n(count: u32) -> Self {
        debug_assert!(count as usize <= MAX_NUM_GPUS);
        Self((1u32 << count) - 1)
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    #[must_use]
    pub fn contains(self, node: NodeIndex) -> bool {
        self.0 & (1 << node.0) != 0
    }

    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// The lowest node in the mask.
    #[must_use]
    pub fn first(self) -> Option<NodeIndex> {
        (self.0 != 0).then(|| NodeIndex(self.0.trailing_zeros()))
    }

    /// Iterates the nodes in the mask in ascending order.
    pub fn nodes(self) -> impl Iterator<Item = NodeIndex> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                None
            } else {
                let node = bits.trailing_zeros();
                bits &= bits - 1;
                Some(NodeIndex(node))
            }
        })
    }

    /// The next node in the mask after `node`, wrapping to the lowest.
    #[must_use]
    pub fn next_after(self, node: NodeIndex) -> Option<NodeIndex> {
        let above = self.0 & !((2u32 << node.0) - 1);
        if above != 0 {
            Some(NodeIndex(above.trailing_zeros()))
        } else {
            self.first()
        }
    }

    /// The previous node in the mask before `node`, wrapping to the highest.
    #[must_use]
    pub fn previous_before(self, node: NodeIndex) -> Option<NodeIndex> {
        let below = self.0 & ((1u32 << node.0) - 1);
        let candidates = if below != 0 { below } else { self.0 };
        (candidates != 0).then(|| NodeIndex(31 - candidates.leading_zeros()))
    }
}

impl fmt::Debug for GpuNodeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuNodeMask({:#06b})", self.0)
    }
}

impl std::ops::BitOr for GpuNodeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One object per node of a linked adapter.
///
/// The per-node objects live in a fixed-size arena in node order. The head is
/// the object on the lowest node, and navigation between nodes goes through
/// the arena instead of through the objects themselves.
pub struct LinkedObject<T> {
    links: SmallVec<[(NodeIndex, T); MAX_NUM_GPUS]>,
}

impl<T> LinkedObject<T> {
    /// Calls `factory` once for every node in `mask`, in ascending node order.
    ///
    /// ## Errors
    ///
    /// Propagates the first error returned by `factory`; objects created
    /// before the failure are dropped.
    pub fn create(
        mask: GpuNodeMask,
        mut factory: impl FnMut(NodeIndex) -> RhiResult<T>,
    ) -> RhiResult<Self> {
        debug_assert!(!mask.is_empty(), "linked object with no nodes");

        let mut links = SmallVec::new();
        for node in mask.nodes() {
            links.push((node, factory(node)?));
        }

        Ok(Self { links })
    }

    /// Wraps a single object that lives on `node` only.
    pub fn single(node: NodeIndex, value: T) -> Self {
        let mut links = SmallVec::new();
        links.push((node, value));
        Self { links }
    }

    #[must_use]
    pub fn head(&self) -> &T {
        &self.links[0].1
    }

    #[must_use]
    pub fn head_node(&self) -> NodeIndex {
        self.links[0].0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    #[must_use]
    pub fn is_single_node(&self) -> bool {
        self.links.len() == 1
    }

    #[must_use]
    pub fn node_mask(&self) -> GpuNodeMask {
        self.links
            .iter()
            .fold(GpuNodeMask::NONE, |mask, (node, _)| mask | node.mask())
    }

    #[must_use]
    pub fn get(&self, node: NodeIndex) -> Option<&T> {
        self.position(node).map(|i| &self.links[i].1)
    }

    pub fn get_mut(&mut self, node: NodeIndex) -> Option<&mut T> {
        self.position(node).map(move |i| &mut self.links[i].1)
    }

    /// The link after `node` in the chain, if any.
    #[must_use]
    pub fn next(&self, node: NodeIndex) -> Option<(NodeIndex, &T)> {
        let i = self.position(node)?;
        self.links.get(i + 1).map(|(n, v)| (*n, v))
    }

    /// The link before `node` in the chain, if any.
    #[must_use]
    pub fn previous(&self, node: NodeIndex) -> Option<(NodeIndex, &T)> {
        let i = self.position(node)?;
        i.checked_sub(1)
            .map(|i| &self.links[i])
            .map(|(n, v)| (*n, v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &T)> {
        self.links.iter().map(|(n, v)| (*n, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NodeIndex, &mut T)> {
        self.links.iter_mut().map(|(n, v)| (*n, v))
    }

    fn position(&self, node: NodeIndex) -> Option<usize> {
        self.links.iter().position(|(n, _)| *n == node)
    }
}

impl<T: fmt::Debug> fmt::Debug for LinkedObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_iteration() {
        let mask = GpuNodeMask::from_bits(0b1011);
        let nodes: Vec<_> = mask.nodes().collect();

        assert_eq!(nodes, vec![NodeIndex(0), NodeIndex(1), NodeIndex(3)]);
        assert_eq!(mask.count(), 3);
        assert!(mask.contains(NodeIndex(3)));
        assert!(!mask.contains(NodeIndex(2)));
    }

    #[test]
    fn mask_rotation_wraps() {
        let mask = GpuNodeMask::first_n(3);

        assert_eq!(mask.next_after(NodeIndex(0)), Some(NodeIndex(1)));
        assert_eq!(mask.next_after(NodeIndex(2)), Some(NodeIndex(0)));
        assert_eq!(mask.previous_before(NodeIndex(0)), Some(NodeIndex(2)));
        assert_eq!(mask.previous_before(NodeIndex(2)), Some(NodeIndex(1)));

        let single = GpuNodeMask::single(NodeIndex(0));
        assert_eq!(single.next_after(NodeIndex(0)), Some(NodeIndex(0)));
        assert_eq!(single.previous_before(NodeIndex(0)), Some(NodeIndex(0)));
    }

    #[test]
    fn linked_chain_navigation() {
        let linked = LinkedObject::create(GpuNodeMask::first_n(3), |node| Ok(node.0 * 10)).unwrap();

        assert_eq!(linked.len(), 3);
        assert_eq!(*linked.head(), 0);
        assert!(linked.previous(NodeIndex(0)).is_none());
        assert_eq!(linked.next(NodeIndex(0)), Some((NodeIndex(1), &10)));
        assert_eq!(linked.previous(NodeIndex(2)), Some((NodeIndex(1), &10)));
        assert!(linked.next(NodeIndex(2)).is_none());
        assert_eq!(linked.node_mask(), GpuNodeMask::first_n(3));
    }

    #[test]
    fn factory_error_is_propagated() {
        let result = LinkedObject::create(GpuNodeMask::first_n(2), |node| {
            if node.0 == 1 {
                Err(crate::error::RhiError::OutOfMemory("test"))
            } else {
                Ok(())
            }
        });

        assert!(result.is_err());
    }
}
