use std::{fmt, sync::Arc};

use crate::{
    backend::{Backend, DescriptorHandle, NativeDescriptorHeap},
    error::{RhiError, RhiResult},
    memory::ring::RingAllocator,
    node::NodeIndex,
};

use super::DescriptorHeapKind;

/// A shader-visible descriptor heap that tables are staged into before a draw
/// or dispatch.
///
/// Tables are copied from CPU descriptor slots into a ring. Each submission
/// closes a frame of the ring against its fence value, and frames return to
/// the ring once the queue's fence passes them.
pub struct OnlineDescriptorRing {
    kind: DescriptorHeapKind,
    native: Arc<dyn NativeDescriptorHeap>,
    ring: RingAllocator,
}

impl OnlineDescriptorRing {
    pub fn new(backend: &dyn Backend, node: NodeIndex, kind: DescriptorHeapKind, capacity: u32) -> RhiResult<Self> {
        debug_assert!(matches!(kind, DescriptorHeapKind::View | DescriptorHeapKind::Sampler));
        let native = backend.create_descriptor_heap(node, kind, capacity, true)?;

        Ok(Self {
            kind,
            native,
            ring: RingAllocator::new(u64::from(capacity)),
        })
    }

    #[must_use]
    pub fn native(&self) -> &Arc<dyn NativeDescriptorHeap> {
        &self.native
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.ring.capacity() as u32
    }

    #[must_use]
    pub fn in_use(&self) -> u32 {
        self.ring.bytes_in_use() as u32
    }

    /// Copies `descriptors` into consecutive slots and returns the first.
    ///
    /// ## Errors
    ///
    /// Returns `RhiError::DescriptorHeapExhausted` if every slot is still
    /// referenced by in-flight work.
    pub fn stage(&mut self, backend: &dyn Backend, descriptors: &[DescriptorHandle]) -> RhiResult<DescriptorHandle> {
        let allocation = self
            .ring
            .allocate(descriptors.len() as u64, 1)
            .map_err(|_| RhiError::DescriptorHeapExhausted {
                kind: self.kind,
                capacity: self.capacity(),
            })?;

        let base = allocation.offset as u32;
        backend.copy_descriptors(&*self.native, base, descriptors);

        Ok(DescriptorHandle {
            heap: self.native.clone(),
            index: base,
        })
    }

    /// Closes the tables staged since the last call against `fence_value`.
    pub fn finish_frame(&mut self, fence_value: u64) {
        self.ring.finish_frame(fence_value);
    }

    pub fn reclaim(&mut self, completed: u64) {
        self.ring.reclaim(completed);
    }
}

impl fmt::Debug for OnlineDescriptorRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnlineDescriptorRing")
            .field("kind", &self.kind)
            .field("in_use", &self.in_use())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::null::{read_descriptor, NullBackend, NullDescriptor},
        descriptor::{DescriptorHeapAllocator, SamplerDesc},
    };

    #[test]
    fn staged_tables_copy_their_descriptors() {
        let backend = NullBackend::new(1);
        let offline = DescriptorHeapAllocator::new(&backend, NodeIndex::ZERO, DescriptorHeapKind::Sampler, 4).unwrap();
        let slot = offline.allocate().unwrap();
        slot.write_sampler(&backend, &SamplerDesc::default());

        let mut ring = OnlineDescriptorRing::new(&backend, NodeIndex::ZERO, DescriptorHeapKind::Sampler, 8).unwrap();
        let first = ring.stage(&backend, &[slot.handle(), slot.handle()]).unwrap();
        let second = ring.stage(&backend, &[slot.handle()]).unwrap();

        assert_eq!((first.index, second.index), (0, 2));
        assert_eq!(
            read_descriptor(&second),
            Some(NullDescriptor::Sampler(SamplerDesc::default()))
        );
    }

    #[test]
    fn exhaustion_is_reported_until_frames_retire() {
        let backend = NullBackend::new(1);
        let offline = DescriptorHeapAllocator::new(&backend, NodeIndex::ZERO, DescriptorHeapKind::View, 4).unwrap();
        let slot = offline.allocate().unwrap();
        let table = vec![slot.handle(); 3];

        let mut ring = OnlineDescriptorRing::new(&backend, NodeIndex::ZERO, DescriptorHeapKind::View, 4).unwrap();
        ring.stage(&backend, &table).unwrap();
        ring.finish_frame(1);

        assert!(matches!(
            ring.stage(&backend, &table),
            Err(RhiError::DescriptorHeapExhausted { capacity: 4, .. })
        ));

        ring.reclaim(1);
        assert!(ring.stage(&backend, &table).is_ok());
    }
}
