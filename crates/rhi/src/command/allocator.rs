use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{
    backend::{Backend, NativeCommandAllocator, QueueKind},
    error::RhiResult,
    fence::Fence,
    node::NodeIndex,
};

/// A point on a queue's timeline.
#[derive(Clone)]
pub struct SyncPoint {
    fence: Arc<Fence>,
    value: u64,
}

impl SyncPoint {
    #[must_use]
    pub fn new(fence: Arc<Fence>, value: u64) -> Self {
        Self { fence, value }
    }

    #[must_use]
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.value
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.fence.is_complete(self.value)
    }

    pub fn wait(&self) -> RhiResult<()> {
        self.fence.wait_for(self.value)
    }
}

impl fmt::Debug for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncPoint({}, {})", self.fence.name(), self.value)
    }
}

/// Backing memory for command lists, reusable once the GPU has executed
/// every list recorded into it.
pub struct CommandAllocator {
    native: Box<dyn NativeCommandAllocator>,
    sync_point: Option<SyncPoint>,
}

impl CommandAllocator {
    #[must_use]
    pub fn native(&self) -> &dyn NativeCommandAllocator {
        &*self.native
    }

    /// Records that lists from this allocator run up to `sync_point`.
    pub fn set_sync_point(&mut self, sync_point: SyncPoint) {
        self.sync_point = Some(sync_point);
    }

    #[must_use]
    pub fn sync_point(&self) -> Option<&SyncPoint> {
        self.sync_point.as_ref()
    }

    /// Whether the GPU is done with everything recorded into the allocator.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.sync_point.as_ref().map_or(true, SyncPoint::is_complete)
    }

    fn reset(&mut self) -> RhiResult<()> {
        debug_assert!(self.is_ready(), "resetting an allocator the GPU is still using");
        self.native.reset()?;
        self.sync_point = None;
        Ok(())
    }
}

impl fmt::Debug for CommandAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandAllocator")
            .field("sync_point", &self.sync_point)
            .finish()
    }
}

/// A pool of command allocators for one queue.
///
/// Allocators are released to the back of the pool after use. Since work on
/// a queue completes in submission order, only the front of the pool needs to
/// be checked: if it is still in use, so is everything behind it.
pub struct CommandAllocatorManager {
    backend: Arc<dyn Backend>,
    node: NodeIndex,
    kind: QueueKind,
    pool: Mutex<VecDeque<CommandAllocator>>,
    created: Mutex<usize>,
}

impl CommandAllocatorManager {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, node: NodeIndex, kind: QueueKind) -> Self {
        Self {
            backend,
            node,
            kind,
            pool: Mutex::default(),
            created: Mutex::new(0),
        }
    }

    /// Takes an allocator whose previous work has finished, or creates one.
    pub fn obtain(&self) -> RhiResult<CommandAllocator> {
        let mut pool = self.pool.lock();

        match pool.front() {
            Some(allocator) if allocator.is_ready() => {
                if let Some(mut allocator) = pool.pop_front() {
                    allocator.reset()?;
                    return Ok(allocator);
                }
            }
            _ => {}
        }
        drop(pool);

        let native = self.backend.create_command_allocator(self.node, self.kind)?;
        let mut created = self.created.lock();
        *created += 1;
        log::debug!("created {:?} command allocator #{} on {}", self.kind, *created, self.node);

        Ok(CommandAllocator {
            native,
            sync_point: None,
        })
    }

    /// Returns an allocator to the pool. It is reused once its sync point
    /// has completed.
    pub fn release(&self, allocator: CommandAllocator) {
        self.pool.lock().push_back(allocator);
    }

    /// The number of allocators ever created by this pool.
    #[must_use]
    pub fn num_created(&self) -> usize {
        *self.created.lock()
    }

    #[must_use]
    pub fn num_pooled(&self) -> usize {
        self.pool.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::null::{NullBackend, NullOptions},
        node::GpuNodeMask,
    };

    #[test]
    fn busy_allocators_are_not_reused() {
        let backend = Arc::new(NullBackend::with_options(NullOptions {
            auto_complete: false,
            ..NullOptions::default()
        }));
        let queue = backend.create_queue(NodeIndex::ZERO, QueueKind::Direct).unwrap();
        let fence = Arc::new(Fence::new(&*backend, "direct", GpuNodeMask::first_n(1), 0).unwrap());
        let manager = CommandAllocatorManager::new(backend.clone(), NodeIndex::ZERO, QueueKind::Direct);

        let mut first = manager.obtain().unwrap();
        let value = fence.signal(&*queue).unwrap();
        first.set_sync_point(SyncPoint::new(fence.clone(), value));
        manager.release(first);

        let second = manager.obtain().unwrap();
        assert_eq!(manager.num_created(), 2);
        manager.release(second);

        backend.advance_gpu();
        let reused = manager.obtain().unwrap();
        assert_eq!(manager.num_created(), 2);
        assert!(reused.sync_point().is_none());
    }
}
