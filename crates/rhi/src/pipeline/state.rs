use std::{fmt, sync::Arc};

use parking_lot::{Condvar, Mutex};

use super::root_signature::RootSignature;
use crate::{
    backend::NativePipeline,
    error::{RhiError, RhiResult},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

enum CompileState {
    Pending,
    Compiling,
    Ready(Arc<dyn NativePipeline>),
    Failed(String),
}

impl CompileState {
    fn name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Compiling => "Compiling",
            Self::Ready(_) => "Ready",
            Self::Failed(_) => "Failed",
        }
    }
}

/// A cached pipeline state object.
///
/// The native pipeline moves through `Pending -> Compiling -> Ready | Failed`.
/// [`PipelineState::get`] blocks until the compile has finished, so a state
/// handed out while still compiling on a worker is safe to record with.
pub struct PipelineState {
    kind: PipelineKind,
    hash: u64,
    root_signature: Arc<RootSignature>,
    state: Mutex<CompileState>,
    finished: Condvar,
}

impl PipelineState {
    pub(crate) fn new(kind: PipelineKind, hash: u64, root_signature: Arc<RootSignature>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            hash,
            root_signature,
            state: Mutex::new(CompileState::Pending),
            finished: Condvar::new(),
        })
    }

    #[must_use]
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// The combined hash of the description the state was built from.
    #[must_use]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[must_use]
    pub fn root_signature(&self) -> &Arc<RootSignature> {
        &self.root_signature
    }

    /// Marks the state as being compiled. Returns false if a compile was
    /// already started.
    pub(crate) fn begin_compile(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            CompileState::Pending => {
                *state = CompileState::Compiling;
                true
            }
            _ => false,
        }
    }

    /// Stores the outcome of a compile and wakes every waiter.
    pub(crate) fn complete(&self, result: RhiResult<Arc<dyn NativePipeline>>) {
        let mut state = self.state.lock();
        debug_assert!(
            matches!(*state, CompileState::Pending | CompileState::Compiling),
            "pipeline state completed twice (was {})",
            state.name()
        );

        *state = match result {
            Ok(pipeline) => CompileState::Ready(pipeline),
            Err(e) => {
                log::error!("pipeline state {:016x} failed to compile: {e}", self.hash);
                CompileState::Failed(e.to_string())
            }
        };

        self.finished.notify_all();
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), CompileState::Ready(_))
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(
            *self.state.lock(),
            CompileState::Ready(_) | CompileState::Failed(_)
        )
    }

    /// The native pipeline if it has finished compiling, without blocking.
    #[must_use]
    pub fn try_get(&self) -> Option<Arc<dyn NativePipeline>> {
        match &*self.state.lock() {
            CompileState::Ready(pipeline) => Some(pipeline.clone()),
            _ => None,
        }
    }

    /// The native pipeline, blocking until its compile has finished.
    ///
    /// ## Errors
    ///
    /// Returns `RhiError::PipelineCompile` if the compile failed.
    pub fn get(&self) -> RhiResult<Arc<dyn NativePipeline>> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                CompileState::Ready(pipeline) => return Ok(pipeline.clone()),
                CompileState::Failed(message) => return Err(RhiError::PipelineCompile(message.clone())),
                CompileState::Pending | CompileState::Compiling => self.finished.wait(&mut state),
            }
        }
    }
}

impl fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineState")
            .field("kind", &self.kind)
            .field("hash", &format_args!("{:016x}", self.hash))
            .field("state", &self.state.lock().name())
            .finish()
    }
}
