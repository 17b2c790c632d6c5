use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::CommandContext;
use crate::node::{GpuNodeMask, NodeIndex, MAX_NUM_GPUS};

/// Forwards recording calls to the default contexts of the nodes in its
/// current mask.
///
/// Under alternate frame rendering the mask follows the node rendering the
/// current frame, so callers record through one object regardless of which
/// GPU the frame lands on.
pub struct CommandContextRedirector {
    contexts: SmallVec<[(NodeIndex, Arc<Mutex<CommandContext>>); MAX_NUM_GPUS]>,
    mask: AtomicU32,
}

impl CommandContextRedirector {
    pub fn new(contexts: impl IntoIterator<Item = (NodeIndex, Arc<Mutex<CommandContext>>)>) -> Self {
        let contexts: SmallVec<_> = contexts.into_iter().collect();
        let mask = contexts.first().map_or(GpuNodeMask::NONE, |(node, _): &(NodeIndex, _)| node.mask());

        Self {
            contexts,
            mask: AtomicU32::new(mask.bits()),
        }
    }

    #[must_use]
    pub fn gpu_mask(&self) -> GpuNodeMask {
        GpuNodeMask::from_bits(self.mask.load(Ordering::Acquire))
    }

    /// Sets the nodes that receive forwarded calls. Nodes without a context
    /// are ignored.
    pub fn set_gpu_mask(&self, mask: GpuNodeMask) {
        debug_assert!(!mask.is_empty(), "redirector mask must name at least one node");
        self.mask.store(mask.bits(), Ordering::Release);
    }

    /// Forwards calls to a single node.
    pub fn set_current_device_index(&self, node: NodeIndex) {
        self.set_gpu_mask(node.mask());
    }

    #[must_use]
    pub fn context(&self, node: NodeIndex) -> Option<&Arc<Mutex<CommandContext>>> {
        self.contexts
            .iter()
            .find_map(|(n, context)| (*n == node).then_some(context))
    }

    /// Runs `f` on each context in the mask, in node order.
    pub fn execute<R>(&self, mut f: impl FnMut(&mut CommandContext) -> R) -> SmallVec<[R; MAX_NUM_GPUS]> {
        let mask = self.gpu_mask();
        self.contexts
            .iter()
            .filter(|(node, _)| mask.contains(*node))
            .map(|(_, context)| f(&mut context.lock()))
            .collect()
    }
}

impl fmt::Debug for CommandContextRedirector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContextRedirector")
            .field("nodes", &self.contexts.iter().map(|(node, _)| *node).collect::<SmallVec<[_; 4]>>())
            .field("mask", &self.gpu_mask())
            .finish()
    }
}
