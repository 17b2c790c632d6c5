use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use structures::{SlotAllocator, SlotError};

use super::{view_desc::ViewDesc, SamplerDesc};
use crate::{
    backend::{Backend, DescriptorHandle, NativeDescriptorHeap, NativeResource},
    config::DescriptorHeapSizes,
    error::{RhiError, RhiResult},
    node::NodeIndex,
};

pub const NUM_VIEW_DESCRIPTORS_TIER_1: u32 = 1_000_000;
pub const NUM_VIEW_DESCRIPTORS_TIER_2: u32 = 1_000_000;
pub const NUM_VIEW_DESCRIPTORS_TIER_3: u32 = 1_000_000;
pub const NUM_SAMPLER_DESCRIPTORS: u32 = 2048;
pub const NUM_RTV_DESCRIPTORS: u32 = 4096;
pub const NUM_DSV_DESCRIPTORS: u32 = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    RenderTarget,
    DepthStencil,
    /// Constant buffer, shader resource and unordered access views.
    View,
    Sampler,
}

/// The hardware's resource binding tier, which bounds descriptor table sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceBindingTier {
    Tier1 = 1,
    Tier2 = 2,
    Tier3 = 3,
}

impl ResourceBindingTier {
    #[must_use]
    pub fn max_view_descriptors(self) -> u32 {
        match self {
            Self::Tier1 => NUM_VIEW_DESCRIPTORS_TIER_1,
            Self::Tier2 => NUM_VIEW_DESCRIPTORS_TIER_2,
            Self::Tier3 => NUM_VIEW_DESCRIPTORS_TIER_3,
        }
    }
}

/// The capacity of a CPU-only heap of `kind`, from the binding tier unless
/// overridden.
#[must_use]
pub fn heap_capacity(
    kind: DescriptorHeapKind,
    tier: ResourceBindingTier,
    overrides: Option<&DescriptorHeapSizes>,
) -> u32 {
    match (kind, overrides) {
        (DescriptorHeapKind::RenderTarget, Some(sizes)) => sizes.render_target,
        (DescriptorHeapKind::DepthStencil, Some(sizes)) => sizes.depth_stencil,
        (DescriptorHeapKind::View, Some(sizes)) => sizes.view,
        (DescriptorHeapKind::Sampler, Some(sizes)) => sizes.sampler,
        (DescriptorHeapKind::RenderTarget, None) => NUM_RTV_DESCRIPTORS,
        (DescriptorHeapKind::DepthStencil, None) => NUM_DSV_DESCRIPTORS,
        (DescriptorHeapKind::View, None) => tier.max_view_descriptors(),
        (DescriptorHeapKind::Sampler, None) => NUM_SAMPLER_DESCRIPTORS,
    }
}

/// A fixed-capacity CPU descriptor heap with a free list.
///
/// Allocation never grows the heap. Running out of descriptors is reported
/// as [`RhiError::DescriptorHeapExhausted`], which the device treats as fatal.
pub struct DescriptorHeapAllocator {
    kind: DescriptorHeapKind,
    native: Arc<dyn NativeDescriptorHeap>,
    slots: Mutex<SlotAllocator>,
}

impl DescriptorHeapAllocator {
    pub fn new(
        backend: &dyn Backend,
        node: NodeIndex,
        kind: DescriptorHeapKind,
        capacity: u32,
    ) -> RhiResult<Arc<Self>> {
        let native = backend.create_descriptor_heap(node, kind, capacity, false)?;

        Ok(Arc::new(Self {
            kind,
            native,
            slots: Mutex::new(SlotAllocator::new(capacity)),
        }))
    }

    #[must_use]
    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.slots.lock().capacity()
    }

    /// The number of descriptors currently in use.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.slots.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    #[must_use]
    pub fn native(&self) -> &Arc<dyn NativeDescriptorHeap> {
        &self.native
    }

    /// Takes one descriptor slot from the heap.
    ///
    /// ## Errors
    ///
    /// Returns `RhiError::DescriptorHeapExhausted` if every slot is in use.
    pub fn allocate(self: &Arc<Self>) -> RhiResult<DescriptorSlot> {
        let index = self
            .slots
            .lock()
            .allocate()
            .map_err(|SlotError::Exhausted { capacity }| {
                log::error!("{:?} descriptor heap exhausted at {capacity} descriptors", self.kind);
                RhiError::DescriptorHeapExhausted {
                    kind: self.kind,
                    capacity,
                }
            })?;

        Ok(DescriptorSlot {
            heap: self.clone(),
            index,
        })
    }

    fn free(&self, index: u32) {
        self.slots.lock().free(index);
    }
}

impl fmt::Debug for DescriptorHeapAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorHeapAllocator")
            .field("kind", &self.kind)
            .field("slots", &*self.slots.lock())
            .finish()
    }
}

/// One allocated descriptor. Returned to its heap on drop.
pub struct DescriptorSlot {
    heap: Arc<DescriptorHeapAllocator>,
    index: u32,
}

impl DescriptorSlot {
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[must_use]
    pub fn heap(&self) -> &Arc<DescriptorHeapAllocator> {
        &self.heap
    }

    #[must_use]
    pub fn handle(&self) -> DescriptorHandle {
        DescriptorHandle {
            heap: self.heap.native.clone(),
            index: self.index,
        }
    }

    /// Writes a view of `resource` into the slot.
    pub fn write_view(
        &self,
        backend: &dyn Backend,
        view: &ViewDesc,
        resource: Option<&dyn NativeResource>,
    ) {
        backend.write_view(&*self.heap.native, self.index, view, resource);
    }

    pub fn write_sampler(&self, backend: &dyn Backend, desc: &SamplerDesc) {
        backend.write_sampler(&*self.heap.native, self.index, desc);
    }
}

impl Drop for DescriptorSlot {
    fn drop(&mut self) {
        self.heap.free(self.index);
    }
}

impl fmt::Debug for DescriptorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DescriptorSlot({:?}, {})", self.heap.kind, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    #[test]
    fn capacity_from_tier_or_override() {
        assert_eq!(
            heap_capacity(DescriptorHeapKind::View, ResourceBindingTier::Tier2, None),
            1_000_000
        );
        assert_eq!(
            heap_capacity(DescriptorHeapKind::Sampler, ResourceBindingTier::Tier3, None),
            2048
        );

        let sizes = DescriptorHeapSizes {
            render_target: 8,
            depth_stencil: 4,
            view: 64,
            sampler: 16,
        };
        assert_eq!(
            heap_capacity(DescriptorHeapKind::View, ResourceBindingTier::Tier1, Some(&sizes)),
            64
        );
    }

    #[test]
    fn slots_return_to_the_heap_on_drop() {
        let backend = NullBackend::new(1);
        let heap = DescriptorHeapAllocator::new(&backend, NodeIndex::ZERO, DescriptorHeapKind::View, 2)
            .unwrap();

        let a = heap.allocate().unwrap();
        let b = heap.allocate().unwrap();
        assert_eq!(heap.len(), 2);

        let err = heap.allocate().unwrap_err();
        assert!(matches!(
            err,
            RhiError::DescriptorHeapExhausted {
                kind: DescriptorHeapKind::View,
                capacity: 2
            }
        ));
        assert!(err.is_fatal());

        let freed = a.index();
        drop(a);
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.allocate().unwrap().index(), freed);
        drop(b);
    }
}
