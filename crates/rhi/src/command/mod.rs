//! Command recording and submission.
//!
//! Every queue of a device is owned by a [`CommandListManager`], which
//! recycles native lists and allocators against the queue's fence. Contexts
//! record into lists obtained from their queue's manager.

mod allocator;
mod context;
mod list;
mod redirector;

pub use allocator::{CommandAllocator, CommandAllocatorManager, SyncPoint};
pub use context::{CommandContext, ContextKind, WorkCounters, MAX_RENDER_TARGETS};
pub use list::{CommandListHandle, CommandListManager, ListState};
pub use redirector::CommandContextRedirector;
