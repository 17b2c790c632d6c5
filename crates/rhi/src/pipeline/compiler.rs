//! Background compilation of pipeline states.

use std::{sync::Arc, thread};

use crossbeam::channel::{self, Receiver, Sender};

use super::state::PipelineState;
use crate::{backend::NativePipeline, error::RhiResult};

pub type CompileTask = Box<dyn FnOnce() -> RhiResult<Arc<dyn NativePipeline>> + Send>;

struct Job {
    pso: Arc<PipelineState>,
    task: CompileTask,
}

/// A fixed pool of threads that compile pipeline states.
///
/// Dropping the compiler finishes every queued job before returning.
pub struct PipelineCompiler {
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl PipelineCompiler {
    pub fn new(num_threads: usize) -> RhiResult<Self> {
        let (sender, receiver) = channel::unbounded();

        let mut workers = Vec::with_capacity(num_threads.max(1));
        for worker_id in 0..num_threads.max(1) {
            let receiver: Receiver<Job> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("pso-compile-{worker_id}"))
                .spawn(move || {
                    for job in receiver {
                        let result = (job.task)();
                        job.pso.complete(result);
                    }
                })?;
            workers.push(handle);
        }

        log::debug!("started {} pipeline compile workers", workers.len());

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Queues `task` to produce the native pipeline of `pso`.
    ///
    /// `pso` must already be in the compiling state.
    pub fn submit(&self, pso: Arc<PipelineState>, task: CompileTask) {
        let job = Job { pso, task };

        // The sender only goes away in drop, so a send can only fail if every
        // worker has panicked. Compile inline rather than leave the state
        // pending forever.
        let job = match &self.sender {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                Err(channel::SendError(job)) => job,
            },
            None => job,
        };

        log::warn!("pipeline compile workers unavailable, compiling inline");
        let result = (job.task)();
        job.pso.complete(result);
    }
}

impl Drop for PipelineCompiler {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("pipeline compile worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;
    use crate::{
        backend::{null::NullBackend, Backend},
        descriptor::ResourceBindingTier,
        node::GpuNodeMask,
        pipeline::{
            root_signature::{QuantizedBoundShaderState, RootSignatureManager},
            state::PipelineKind,
        },
        RhiError,
    };

    fn root_signature() -> Arc<crate::pipeline::RootSignature> {
        let backend: Arc<dyn Backend> = Arc::new(NullBackend::new(1));
        let manager = RootSignatureManager::new(backend, GpuNodeMask::first_n(1), ResourceBindingTier::Tier3);
        manager
            .get_or_create(&QuantizedBoundShaderState::default())
            .unwrap()
    }

    #[test]
    fn get_blocks_until_the_worker_finishes() {
        let compiler = PipelineCompiler::new(1).unwrap();
        let pso = PipelineState::new(PipelineKind::Compute, 7, root_signature());
        assert!(pso.begin_compile());
        assert!(!pso.begin_compile());

        let gate = Arc::new(Barrier::new(2));
        let worker_gate = gate.clone();
        compiler.submit(
            pso.clone(),
            Box::new(move || {
                worker_gate.wait();
                Err(RhiError::PipelineCompile("no bytecode".into()))
            }),
        );

        assert!(!pso.is_finished());
        gate.wait();

        let err = pso.get().err().unwrap();
        assert!(matches!(err, RhiError::PipelineCompile(_)));
        assert!(pso.is_finished());
        assert!(!pso.is_ready());
    }

    #[test]
    fn drop_drains_queued_jobs() {
        let pso = PipelineState::new(PipelineKind::Compute, 1, root_signature());
        {
            let compiler = PipelineCompiler::new(2).unwrap();
            pso.begin_compile();
            compiler.submit(
                pso.clone(),
                Box::new(|| Err(RhiError::PipelineCompile("expected".into()))),
            );
        }
        assert!(pso.is_finished());
    }
}
