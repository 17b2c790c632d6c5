//! Cross-GPU synchronization for resources carried from one frame to the next
//! under alternate frame rendering.
//!
//! The GPU that produced a frame copies its temporal resources to the other
//! nodes over its copy queue and signals the effect fence on its own core.
//! The GPU rendering the following frame waits on that core before reading
//! them.

use std::fmt;

use parking_lot::Mutex;

use crate::{
    backend::{Backend, NativeQueue},
    error::RhiResult,
    fence::Fence,
    node::{GpuNodeMask, NodeIndex, MAX_NUM_GPUS},
};

pub struct TemporalEffect {
    name: String,
    nodes: GpuNodeMask,
    fence: Fence,
    last_signaled: Mutex<[u64; MAX_NUM_GPUS]>,
}

impl TemporalEffect {
    pub fn new(backend: &dyn Backend, name: impl Into<String>, nodes: GpuNodeMask) -> RhiResult<Self> {
        let name = name.into();
        let fence = Fence::new(backend, format!("temporal effect {name}"), nodes, 0)?;
        Ok(Self {
            name,
            nodes,
            fence,
            last_signaled: Mutex::new([0; MAX_NUM_GPUS]),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node that rendered the frame before the one `node` renders.
    #[must_use]
    pub fn previous_node(&self, node: NodeIndex) -> Option<NodeIndex> {
        let previous = self
            .nodes
            .previous_before(node)
            .or_else(|| self.nodes.nodes().last())?;
        (previous != node).then_some(previous)
    }

    /// The value last signalled from `node`, or 0 if it never has been.
    #[must_use]
    pub fn last_signaled(&self, node: NodeIndex) -> u64 {
        self.last_signaled.lock()[node.0 as usize]
    }

    /// Makes `queue` wait for the previous node's last broadcast.
    pub fn wait_for_previous(&self, queue: &dyn NativeQueue) -> RhiResult<()> {
        let Some(previous) = self.previous_node(queue.node()) else {
            return Ok(());
        };

        let value = self.last_signaled(previous);
        if value > 0 {
            log::trace!("{}: {} waits for {value} from {previous}", self.name, queue.node());
            self.fence.gpu_wait_core(queue, previous, value)?;
        }
        Ok(())
    }

    /// Signals that the broadcast submitted on `queue` is complete once the
    /// queue reaches this point.
    pub fn signal_sync_complete(&self, queue: &dyn NativeQueue) -> RhiResult<u64> {
        let mut last = self.last_signaled.lock();
        let value = self.fence.signal(queue)?;
        last[queue.node().0 as usize] = value;
        Ok(value)
    }
}

impl fmt::Debug for TemporalEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporalEffect")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .field("last_signaled", &*self.last_signaled.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        null::{NullBackend, QueueOp},
        QueueKind,
    };

    #[test]
    fn consumer_waits_on_the_producer_core() {
        let backend = NullBackend::new(2);
        let copy0 = backend.create_queue(NodeIndex(0), QueueKind::Copy).unwrap();
        let direct1 = backend.create_queue(NodeIndex(1), QueueKind::Direct).unwrap();
        let effect = TemporalEffect::new(&backend, "taa history", GpuNodeMask::first_n(2)).unwrap();

        // Nothing broadcast yet: no wait.
        effect.wait_for_previous(&*direct1).unwrap();
        assert!(backend.queue_log().is_empty());

        let value = effect.signal_sync_complete(&*copy0).unwrap();
        assert_eq!(effect.last_signaled(NodeIndex(0)), value);
        effect.wait_for_previous(&*direct1).unwrap();

        assert_eq!(
            backend.queue_log(),
            vec![
                QueueOp::Signal {
                    node: NodeIndex(0),
                    kind: QueueKind::Copy,
                    value,
                },
                QueueOp::Wait {
                    node: NodeIndex(1),
                    kind: QueueKind::Direct,
                    value,
                },
            ]
        );
    }

    #[test]
    fn previous_node_wraps_around() {
        let backend = NullBackend::new(3);
        let effect = TemporalEffect::new(&backend, "e", GpuNodeMask::first_n(3)).unwrap();
        assert_eq!(effect.previous_node(NodeIndex(0)), Some(NodeIndex(2)));
        assert_eq!(effect.previous_node(NodeIndex(2)), Some(NodeIndex(1)));

        let single = TemporalEffect::new(&backend, "s", GpuNodeMask::first_n(1)).unwrap();
        assert_eq!(single.previous_node(NodeIndex(0)), None);
    }
}
