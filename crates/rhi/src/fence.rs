//! Monotonic GPU/CPU synchronization counters.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
    backend::{Backend, NativeFence, NativeQueue},
    error::{RhiError, RhiResult},
    node::{GpuNodeMask, NodeIndex, MAX_NUM_GPUS},
};

/// A fence shared by the nodes in its mask.
///
/// Each node has its own native fence ("core"). Values are allocated from a
/// single counter, so a value identifies one signal regardless of which node
/// issued it. The fence tracks two values:
///
/// - `current`: the highest value handed to a queue to signal.
/// - `completed`: the highest value every core is known to have reached.
///
/// `completed` never decreases and never exceeds `current`.
pub struct Fence {
    name: String,
    cores: SmallVec<[(NodeIndex, Arc<dyn NativeFence>); MAX_NUM_GPUS]>,
    current: AtomicU64,
    last_completed: AtomicU64,
    wait_lock: Mutex<()>,
}

impl Fence {
    pub fn new(backend: &dyn Backend, name: impl Into<String>, nodes: GpuNodeMask, initial_value: u64) -> RhiResult<Self> {
        let cores = nodes
            .nodes()
            .map(|node| Ok((node, backend.create_fence(initial_value)?)))
            .collect::<RhiResult<_>>()?;

        Ok(Self {
            name: name.into(),
            cores,
            current: AtomicU64::new(initial_value),
            last_completed: AtomicU64::new(initial_value),
            wait_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn node_mask(&self) -> GpuNodeMask {
        self.cores
            .iter()
            .fold(GpuNodeMask::NONE, |mask, (node, _)| mask | node.mask())
    }

    fn core(&self, node: NodeIndex) -> RhiResult<&Arc<dyn NativeFence>> {
        self.cores
            .iter()
            .find(|(n, _)| *n == node)
            .map(|(_, core)| core)
            .ok_or(RhiError::InvalidState("fence has no core on this node"))
    }

    /// The highest value handed out for signalling.
    #[must_use]
    pub fn current_value(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// The value the next [`Fence::signal`] will use.
    #[must_use]
    pub fn next_value(&self) -> u64 {
        self.current_value() + 1
    }

    /// Signals the next value from `queue`.
    pub fn signal(&self, queue: &dyn NativeQueue) -> RhiResult<u64> {
        let value = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        queue.signal(&**self.core(queue.node())?, value)?;
        Ok(value)
    }

    /// Signals one value from every queue, one queue per node.
    ///
    /// The value is complete once all of them have reached it.
    pub fn signal_all<'a>(&self, queues: impl IntoIterator<Item = &'a dyn NativeQueue>) -> RhiResult<u64> {
        let value = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        for queue in queues {
            queue.signal(&**self.core(queue.node())?, value)?;
        }
        Ok(value)
    }

    /// Signals an explicit value from `queue`. Values must not go backwards.
    pub fn signal_value(&self, queue: &dyn NativeQueue, value: u64) -> RhiResult<()> {
        let previous = self.current.fetch_max(value, Ordering::AcqRel);
        debug_assert!(value >= previous, "{}: signalled {value} after {previous}", self.name);
        queue.signal(&**self.core(queue.node())?, value)
    }

    /// Makes `queue` wait until this fence reaches `value` on the queue's
    /// own node.
    pub fn gpu_wait(&self, queue: &dyn NativeQueue, value: u64) -> RhiResult<()> {
        self.gpu_wait_core(queue, queue.node(), value)
    }

    /// Makes `queue` wait until the core of `node` reaches `value`. Used to
    /// wait on work produced by another node.
    pub fn gpu_wait_core(&self, queue: &dyn NativeQueue, node: NodeIndex, value: u64) -> RhiResult<()> {
        queue.wait(&**self.core(node)?, value)
    }

    /// The value the core of `node` has reached.
    pub fn core_completed(&self, node: NodeIndex) -> RhiResult<u64> {
        Ok(self.core(node)?.completed_value())
    }

    /// Queries the native fences and returns the highest value every core
    /// has reached.
    pub fn completed_value(&self) -> u64 {
        let reached = self
            .cores
            .iter()
            .map(|(_, core)| core.completed_value())
            .min()
            .unwrap_or(0);

        let previous = self.last_completed.fetch_max(reached, Ordering::AcqRel);
        previous.max(reached)
    }

    /// The completed value as of the last query, without querying.
    #[must_use]
    pub fn cached_completed_value(&self) -> u64 {
        self.last_completed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_complete(&self, value: u64) -> bool {
        value <= self.cached_completed_value() || value <= self.completed_value()
    }

    /// Blocks until the fence reaches `value`.
    ///
    /// Only one thread waits on the native fence at a time. Threads that
    /// queue up behind it usually find the value already reached.
    pub fn wait_for(&self, value: u64) -> RhiResult<()> {
        if self.is_complete(value) {
            return Ok(());
        }

        debug_assert!(
            value <= self.current_value(),
            "{}: waiting for {value}, which was never signalled",
            self.name
        );

        let _guard = self.wait_lock.lock();
        if self.is_complete(value) {
            return Ok(());
        }

        log::trace!("{}: waiting for {value}", self.name);
        for (_, core) in &self.cores {
            if core.completed_value() < value {
                core.wait_for_value(value)?;
            }
        }

        self.last_completed.fetch_max(value, Ordering::AcqRel);
        Ok(())
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("name", &self.name)
            .field("current", &self.current_value())
            .field("completed", &self.cached_completed_value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        null::{NullBackend, NullOptions},
        QueueKind,
    };

    fn manual(nodes: u32) -> NullBackend {
        NullBackend::with_options(NullOptions {
            node_count: nodes,
            auto_complete: false,
            ..NullOptions::default()
        })
    }

    #[test]
    fn completed_never_passes_current() {
        let backend = manual(1);
        let queue = backend.create_queue(NodeIndex::ZERO, QueueKind::Direct).unwrap();
        let fence = Fence::new(&backend, "test", GpuNodeMask::first_n(1), 0).unwrap();

        let mut observed = Vec::new();
        for round in 0..16 {
            fence.signal(&*queue).unwrap();
            if round % 3 == 0 {
                backend.complete_signals(2);
            }
            let completed = fence.completed_value();
            assert!(completed <= fence.current_value());
            observed.push(completed);
        }

        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(fence.current_value(), 16);
    }

    #[test]
    fn wait_completes_pending_signals() {
        let backend = manual(1);
        let queue = backend.create_queue(NodeIndex::ZERO, QueueKind::Copy).unwrap();
        let fence = Fence::new(&backend, "copy", GpuNodeMask::first_n(1), 0).unwrap();

        let first = fence.signal(&*queue).unwrap();
        let second = fence.signal(&*queue).unwrap();
        assert!(!fence.is_complete(first));

        fence.wait_for(first).unwrap();
        assert!(fence.is_complete(first));
        assert!(!fence.is_complete(second));
    }

    #[test]
    fn every_core_must_reach_the_value() {
        let backend = manual(2);
        let q0 = backend.create_queue(NodeIndex(0), QueueKind::Direct).unwrap();
        let q1 = backend.create_queue(NodeIndex(1), QueueKind::Direct).unwrap();
        let fence = Fence::new(&backend, "frame", GpuNodeMask::first_n(2), 0).unwrap();

        let value = fence.signal_all([&*q0, &*q1]).unwrap();
        backend.complete_signals(1);

        assert_eq!(fence.core_completed(NodeIndex(0)).unwrap(), value);
        assert_eq!(fence.core_completed(NodeIndex(1)).unwrap(), 0);
        assert!(!fence.is_complete(value));

        backend.complete_signals(1);
        assert!(fence.is_complete(value));
    }
}
