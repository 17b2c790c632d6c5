//! Objects whose release waits for the GPU to stop using them.

use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{
    backend::{NativePipeline, NativeResource},
    descriptor::DescriptorSlot,
    error::RhiResult,
    fence::Fence,
};

/// Something the GPU may still be reading.
pub enum DeferredObject {
    Resource(Arc<dyn NativeResource>),
    Descriptor(DescriptorSlot),
    Pipeline(Arc<dyn NativePipeline>),
    Callback(Box<dyn FnOnce() + Send>),
}

impl DeferredObject {
    fn release(self) {
        match self {
            Self::Callback(callback) => callback(),
            Self::Resource(_) | Self::Descriptor(_) | Self::Pipeline(_) => {}
        }
    }
}

impl fmt::Debug for DeferredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(resource) => write!(f, "Resource({:#x})", resource.gpu_address()),
            Self::Descriptor(slot) => write!(f, "Descriptor({slot:?})"),
            Self::Pipeline(_) => f.write_str("Pipeline"),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// A FIFO of objects tagged with the frame fence value after which they are
/// safe to release.
///
/// An object queued now may still be referenced by commands recorded this
/// frame, so it is tagged with the value the frame fence will be signalled
/// with next, not the one it was last signalled with.
pub struct DeferredDeletionQueue {
    fence: Arc<Fence>,
    queue: Mutex<VecDeque<(DeferredObject, u64)>>,
}

impl DeferredDeletionQueue {
    #[must_use]
    pub fn new(fence: Arc<Fence>) -> Self {
        Self {
            fence,
            queue: Mutex::default(),
        }
    }

    #[must_use]
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Queues `object` for release after the next frame fence signal.
    pub fn enqueue(&self, object: DeferredObject) {
        // Read under the lock so a concurrent signal cannot reorder tags.
        let mut queue = self.queue.lock();
        let value = self.fence.next_value();
        push(&mut queue, object, value);
    }

    /// Queues `object` for release once the fence reaches `value`.
    pub fn enqueue_at(&self, object: DeferredObject, value: u64) {
        push(&mut self.queue.lock(), object, value);
    }

    /// Releases every object whose fence value has completed. Returns how
    /// many were released.
    pub fn release_completed(&self) -> usize {
        let completed = self.fence.completed_value();

        let released: Vec<_> = {
            let mut queue = self.queue.lock();
            let ready = queue.iter().take_while(|(_, value)| *value <= completed).count();
            queue.drain(..ready).map(|(object, _)| object).collect()
        };

        // Callbacks may queue more objects.
        let count = released.len();
        released.into_iter().for_each(DeferredObject::release);
        count
    }

    /// Waits for the last signalled fence value and releases everything.
    ///
    /// Every queue must have been drained first: objects tagged with a value
    /// that was never signalled are released too.
    pub fn release_all_blocking(&self) -> RhiResult<usize> {
        self.fence.wait_for(self.fence.current_value())?;

        let released: Vec<_> = self.queue.lock().drain(..).map(|(object, _)| object).collect();
        let count = released.len();
        released.into_iter().for_each(DeferredObject::release);

        log::debug!("released {count} deferred objects at shutdown");
        Ok(count)
    }
}

impl fmt::Debug for DeferredDeletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredDeletionQueue")
            .field("fence", &self.fence)
            .field("pending", &self.len())
            .finish()
    }
}

fn push(queue: &mut VecDeque<(DeferredObject, u64)>, object: DeferredObject, value: u64) {
    debug_assert!(
        queue.back().map_or(true, |(_, last)| *last <= value),
        "deferred deletions must be queued in fence order"
    );
    log::trace!("deferring release of {object:?} until {value}");
    queue.push_back((object, value));
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        backend::{
            null::{NullBackend, NullOptions},
            Backend, QueueKind,
        },
        node::{GpuNodeMask, NodeIndex},
    };

    fn counter_callback(counter: &Arc<AtomicUsize>) -> DeferredObject {
        let counter = counter.clone();
        DeferredObject::Callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn objects_wait_for_the_next_signal() {
        let backend = NullBackend::with_options(NullOptions {
            auto_complete: false,
            ..NullOptions::default()
        });
        let queue = backend.create_queue(NodeIndex::ZERO, QueueKind::Direct).unwrap();
        let fence = Arc::new(Fence::new(&backend, "frame", GpuNodeMask::first_n(1), 0).unwrap());
        let deletions = DeferredDeletionQueue::new(fence.clone());
        let released = Arc::new(AtomicUsize::new(0));

        deletions.enqueue(counter_callback(&released));

        // The last signalled value completing is not enough.
        fence.signal(&*queue).unwrap();
        deletions.enqueue(counter_callback(&released));
        backend.advance_gpu();
        assert_eq!(deletions.release_completed(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        fence.signal(&*queue).unwrap();
        assert_eq!(deletions.release_completed(), 0);
        backend.advance_gpu();
        assert_eq!(deletions.release_completed(), 1);
        assert!(deletions.is_empty());
    }

    #[test]
    fn shutdown_releases_everything() {
        let backend = NullBackend::with_options(NullOptions {
            auto_complete: false,
            ..NullOptions::default()
        });
        let queue = backend.create_queue(NodeIndex::ZERO, QueueKind::Direct).unwrap();
        let fence = Arc::new(Fence::new(&backend, "frame", GpuNodeMask::first_n(1), 0).unwrap());
        let deletions = DeferredDeletionQueue::new(fence.clone());
        let released = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            deletions.enqueue(counter_callback(&released));
            fence.signal(&*queue).unwrap();
        }

        assert_eq!(deletions.release_all_blocking().unwrap(), 3);
        assert_eq!(released.load(Ordering::SeqCst), 3);
        assert_eq!(backend.pending_signals(), 0);
    }

    #[test]
    fn concurrent_enqueues_stay_in_fence_order() {
        let backend = NullBackend::new(1);
        let queue = backend.create_queue(NodeIndex::ZERO, QueueKind::Direct).unwrap();
        let fence = Arc::new(Fence::new(&backend, "frame", GpuNodeMask::first_n(1), 0).unwrap());
        let deletions = DeferredDeletionQueue::new(fence.clone());

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..500 {
                        deletions.enqueue(DeferredObject::Callback(Box::new(|| {})));
                    }
                });
            }
            for _ in 0..200 {
                fence.signal(&*queue).unwrap();
            }
        });

        let tags: Vec<u64> = deletions.queue.lock().iter().map(|(_, value)| *value).collect();
        assert_eq!(tags.len(), 2000);
        assert!(tags.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
