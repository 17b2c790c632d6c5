use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::allocator::{CommandAllocator, CommandAllocatorManager, SyncPoint};
use crate::{
    backend::{Backend, Barrier, Command, NativeCommandList, NativeQueue, QueueKind},
    error::RhiResult,
    fence::Fence,
    node::NodeIndex,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListState {
    Open,
    Closed,
}

/// A native command list and the barriers batched for it.
pub struct CommandListHandle {
    native: Box<dyn NativeCommandList>,
    node: NodeIndex,
    kind: QueueKind,
    state: ListState,
    pending_barriers: SmallVec<[Barrier; 8]>,
    num_commands: u32,
}

impl CommandListHandle {
    #[must_use]
    pub fn native(&self) -> &dyn NativeCommandList {
        &*self.native
    }

    #[must_use]
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    #[must_use]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    #[must_use]
    pub fn state(&self) -> ListState {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ListState::Open
    }

    /// The number of commands recorded since the list was last opened.
    #[must_use]
    pub fn num_commands(&self) -> u32 {
        self.num_commands
    }

    #[must_use]
    pub fn num_pending_barriers(&self) -> usize {
        self.pending_barriers.len()
    }

    pub fn record(&mut self, command: Command) {
        debug_assert!(self.is_open(), "recording {} into a closed command list", command.name());
        self.native.record(command);
        self.num_commands += 1;
    }

    /// Batches a barrier until the next [`CommandListHandle::flush_barriers`].
    pub fn barrier(&mut self, barrier: Barrier) {
        self.pending_barriers.push(barrier);
    }

    /// Records the batched barriers as one command. Returns how many there
    /// were.
    pub fn flush_barriers(&mut self) -> usize {
        if self.pending_barriers.is_empty() {
            return 0;
        }

        let barriers = std::mem::take(&mut self.pending_barriers);
        let count = barriers.len();
        self.record(Command::Barriers(barriers));
        count
    }

    /// Flushes pending barriers and closes the list. Closing a closed list
    /// does nothing.
    pub fn close(&mut self) -> RhiResult<()> {
        if self.state == ListState::Closed {
            return Ok(());
        }

        self.flush_barriers();
        self.native.close()?;
        self.state = ListState::Closed;
        Ok(())
    }

    fn reset(&mut self, allocator: &CommandAllocator) -> RhiResult<()> {
        debug_assert_eq!(self.state, ListState::Closed);
        self.native.reset(allocator.native())?;
        self.state = ListState::Open;
        self.num_commands = 0;
        Ok(())
    }
}

impl fmt::Debug for CommandListHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandListHandle")
            .field("node", &self.node)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("num_commands", &self.num_commands)
            .finish()
    }
}

type PendingList = (CommandListHandle, Option<CommandAllocator>);

/// Owns one queue: its fence, allocator pool, recycled lists and the lists
/// held back for batched submission.
pub struct CommandListManager {
    backend: Arc<dyn Backend>,
    node: NodeIndex,
    kind: QueueKind,
    queue: Arc<dyn NativeQueue>,
    fence: Arc<Fence>,
    allocators: CommandAllocatorManager,
    free_lists: Mutex<Vec<CommandListHandle>>,
    pending: Mutex<Vec<PendingList>>,
    submission: Mutex<()>,
}

impl CommandListManager {
    pub fn new(backend: Arc<dyn Backend>, node: NodeIndex, kind: QueueKind) -> RhiResult<Self> {
        let queue = backend.create_queue(node, kind)?;
        let fence = Arc::new(Fence::new(&*backend, format!("{kind:?} queue on {node}"), node.mask(), 0)?);
        let allocators = CommandAllocatorManager::new(backend.clone(), node, kind);

        Ok(Self {
            backend,
            node,
            kind,
            queue,
            fence,
            allocators,
            free_lists: Mutex::default(),
            pending: Mutex::default(),
            submission: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    #[must_use]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<dyn NativeQueue> {
        &self.queue
    }

    #[must_use]
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    #[must_use]
    pub fn allocators(&self) -> &CommandAllocatorManager {
        &self.allocators
    }

    /// Opens a list recording into `allocator`, reusing a recycled one if
    /// possible.
    pub fn obtain_list(&self, allocator: &CommandAllocator) -> RhiResult<CommandListHandle> {
        let recycled = self.free_lists.lock().pop();

        if let Some(mut list) = recycled {
            list.reset(allocator)?;
            return Ok(list);
        }

        let native = self
            .backend
            .create_command_list(self.node, self.kind, allocator.native())?;
        log::debug!("created {:?} command list on {}", self.kind, self.node);

        Ok(CommandListHandle {
            native,
            node: self.node,
            kind: self.kind,
            state: ListState::Open,
            pending_barriers: SmallVec::new(),
            num_commands: 0,
        })
    }

    /// Executes any held-back lists followed by `list`, and signals the
    /// queue fence after them.
    ///
    /// `allocator` is returned to the pool tagged with the new sync point.
    pub fn execute(&self, list: CommandListHandle, allocator: Option<CommandAllocator>) -> RhiResult<SyncPoint> {
        let _submission = self.submission.lock();

        let mut batch = std::mem::take(&mut *self.pending.lock());
        batch.push((list, allocator));
        self.submit(batch)
    }

    /// Holds `list` back until the next submission on this queue.
    pub fn defer(&self, mut list: CommandListHandle, allocator: Option<CommandAllocator>) -> RhiResult<()> {
        list.close()?;
        self.pending.lock().push((list, allocator));
        Ok(())
    }

    /// Executes the held-back lists, if there are any.
    pub fn execute_pending(&self) -> RhiResult<Option<SyncPoint>> {
        let _submission = self.submission.lock();

        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(None);
        }
        self.submit(batch).map(Some)
    }

    #[must_use]
    pub fn num_pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns a list with nothing worth executing to the free list.
    pub fn recycle(&self, mut list: CommandListHandle) -> RhiResult<()> {
        list.pending_barriers.clear();
        list.close()?;
        self.free_lists.lock().push(list);
        Ok(())
    }

    /// Whether the GPU has finished everything submitted to the queue.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.fence.is_complete(self.fence.current_value())
    }

    /// Submits held-back lists and blocks until the queue drains.
    pub fn wait_for_idle(&self) -> RhiResult<()> {
        self.execute_pending()?;
        self.fence.wait_for(self.fence.current_value())
    }

    fn submit(&self, batch: Vec<PendingList>) -> RhiResult<SyncPoint> {
        let mut lists = Vec::with_capacity(batch.len());
        let mut allocators = SmallVec::<[CommandAllocator; 4]>::new();

        for (mut list, allocator) in batch {
            list.close()?;
            lists.push(list);
            allocators.extend(allocator);
        }

        {
            let natives: SmallVec<[&dyn NativeCommandList; 8]> = lists.iter().map(CommandListHandle::native).collect();
            self.queue.execute(&natives)?;
        }

        let value = self.fence.signal(&*self.queue)?;
        let sync_point = SyncPoint::new(self.fence.clone(), value);
        log::trace!("{:?} queue on {} executed {} lists, signalled {value}", self.kind, self.node, lists.len());

        for mut allocator in allocators {
            allocator.set_sync_point(sync_point.clone());
            self.allocators.release(allocator);
        }
        self.free_lists.lock().extend(lists);

        Ok(sync_point)
    }
}

impl fmt::Debug for CommandListManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandListManager")
            .field("node", &self.node)
            .field("kind", &self.kind)
            .field("fence", &self.fence)
            .field("pending", &self.num_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::{NullBackend, NullOptions};

    fn manager(auto_complete: bool) -> (Arc<NullBackend>, CommandListManager) {
        let backend = Arc::new(NullBackend::with_options(NullOptions {
            auto_complete,
            ..NullOptions::default()
        }));
        let manager = CommandListManager::new(backend.clone(), NodeIndex::ZERO, QueueKind::Direct).unwrap();
        (backend, manager)
    }

    #[test]
    fn deferred_lists_run_before_the_next_submission() {
        let (backend, manager) = manager(true);

        let allocator = manager.allocators().obtain().unwrap();
        let mut first = manager.obtain_list(&allocator).unwrap();
        first.record(Command::Dispatch { x: 1, y: 1, z: 1 });
        manager.defer(first, None).unwrap();
        assert_eq!(manager.num_pending(), 1);

        let mut second = manager.obtain_list(&allocator).unwrap();
        second.record(Command::Draw {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        });
        let sync_point = manager.execute(second, Some(allocator)).unwrap();

        assert_eq!(sync_point.value(), 1);
        assert_eq!(manager.num_pending(), 0);
        assert_eq!(
            backend.executed(QueueKind::Direct),
            vec![vec!["Dispatch"], vec!["Draw"]]
        );
        assert_eq!(manager.allocators().num_pooled(), 1);
    }

    #[test]
    fn barriers_are_flushed_on_close() {
        let (backend, manager) = manager(true);

        let allocator = manager.allocators().obtain().unwrap();
        let mut list = manager.obtain_list(&allocator).unwrap();
        list.barrier(Barrier::Uav(None));
        list.barrier(Barrier::Uav(None));
        assert_eq!(list.num_commands(), 0);

        manager.execute(list, Some(allocator)).unwrap();
        assert_eq!(backend.executed(QueueKind::Direct), vec![vec!["Barriers"]]);
    }

    #[test]
    fn idle_tracks_the_fence() {
        let (backend, manager) = manager(false);
        assert!(manager.is_idle());

        let allocator = manager.allocators().obtain().unwrap();
        let list = manager.obtain_list(&allocator).unwrap();
        manager.execute(list, Some(allocator)).unwrap();
        assert!(!manager.is_idle());

        backend.advance_gpu();
        assert!(manager.is_idle());
    }
}
