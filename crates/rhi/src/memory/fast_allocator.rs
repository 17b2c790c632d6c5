use std::sync::Arc;

use parking_lot::Mutex;

use super::ring::{RingAllocator, RingError};
use crate::{
    backend::{Backend, NativeResource},
    error::RhiResult,
    node::{GpuNodeMask, NodeIndex},
    resource::desc::{HeapType, ResourceDesc, ResourceFlags, ResourceState},
};

/// A range of upload memory.
#[derive(Clone)]
pub struct UploadAllocation {
    pub resource: Arc<dyn NativeResource>,
    pub offset: u64,
    pub size: u64,
}

impl UploadAllocation {
    pub fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        debug_assert!(offset + data.len() as u64 <= self.size);
        self.resource.write(self.offset + offset, data)
    }
}

/// Per-frame upload memory for one device.
///
/// Small, short-lived uploads (texture lock staging, initial data) come from
/// a ring in a single upload buffer and are recycled once the frame fence
/// proves the GPU has consumed them. Requests that do not fit get a buffer of
/// their own, which lives as long as the commands that reference it.
pub struct FastAllocator {
    backend: Arc<dyn Backend>,
    node: NodeIndex,
    visible: GpuNodeMask,
    buffer: Arc<dyn NativeResource>,
    ring: Mutex<RingAllocator>,
}

impl FastAllocator {
    pub fn new(backend: Arc<dyn Backend>, node: NodeIndex, visible: GpuNodeMask, capacity: u64) -> RhiResult<Self> {
        let buffer = backend.create_resource(
            &ResourceDesc::buffer(capacity, ResourceFlags::empty()),
            HeapType::Upload,
            node,
            visible,
            ResourceState::GENERIC_READ,
            "upload ring",
        )?;

        Ok(Self {
            backend,
            node,
            visible,
            buffer,
            ring: Mutex::new(RingAllocator::new(capacity)),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.ring.lock().capacity()
    }

    #[must_use]
    pub fn bytes_in_use(&self) -> u64 {
        self.ring.lock().bytes_in_use()
    }

    pub fn allocate(&self, size: u64, alignment: u64) -> RhiResult<UploadAllocation> {
        let result = self.ring.lock().allocate(size, alignment);

        match result {
            Ok(allocation) => Ok(UploadAllocation {
                resource: self.buffer.clone(),
                offset: allocation.offset,
                size,
            }),
            Err(e @ (RingError::OutOfMemory { .. } | RingError::InsufficientCapacity)) => {
                log::debug!("upload ring on {}: {e}; using a standalone buffer", self.node);
                let resource = self.backend.create_resource(
                    &ResourceDesc::buffer(size, ResourceFlags::empty()),
                    HeapType::Upload,
                    self.node,
                    self.visible,
                    ResourceState::GENERIC_READ,
                    "standalone upload",
                )?;
                Ok(UploadAllocation {
                    resource,
                    offset: 0,
                    size,
                })
            }
        }
    }

    /// Allocates and fills upload memory with `data`.
    pub fn upload(&self, data: &[u8], alignment: u64) -> RhiResult<UploadAllocation> {
        let allocation = self.allocate(data.len() as u64, alignment)?;
        allocation.write(0, data)?;
        Ok(allocation)
    }

    /// Closes the current frame of allocations against `fence_value`.
    pub fn finish_frame(&self, fence_value: u64) {
        self.ring.lock().finish_frame(fence_value);
    }

    /// Recycles frames whose fence value has completed.
    pub fn reclaim(&self, completed: u64) {
        let freed = self.ring.lock().reclaim(completed);
        if freed > 0 {
            log::trace!("upload ring on {} reclaimed {freed} bytes", self.node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    #[test]
    fn oversized_requests_get_their_own_buffer() {
        let backend = Arc::new(NullBackend::new(1));
        let allocator =
            FastAllocator::new(backend, NodeIndex::ZERO, GpuNodeMask::first_n(1), 1024).unwrap();

        let small = allocator.upload(&[1, 2, 3, 4], 4).unwrap();
        assert!(Arc::ptr_eq(&small.resource, &allocator.buffer));

        let large = allocator.allocate(4096, 512).unwrap();
        assert!(!Arc::ptr_eq(&large.resource, &allocator.buffer));
        assert_eq!(large.offset, 0);

        let mut out = [0; 4];
        small.resource.read(small.offset, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn frames_are_recycled_after_their_fence() {
        let backend = Arc::new(NullBackend::new(1));
        let allocator =
            FastAllocator::new(backend, NodeIndex::ZERO, GpuNodeMask::first_n(1), 1024).unwrap();

        allocator.allocate(512, 256).unwrap();
        allocator.finish_frame(3);
        assert_eq!(allocator.bytes_in_use(), 512);

        allocator.reclaim(2);
        assert_eq!(allocator.bytes_in_use(), 512);
        allocator.reclaim(3);
        assert_eq!(allocator.bytes_in_use(), 0);
    }
}
