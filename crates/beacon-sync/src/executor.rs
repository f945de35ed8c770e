//! # Cycle Executor
//!
//! Runs sync cycles one at a time with a single waiting slot.
//!
//! ```text
//!             try_submit
//!                 │
//!     ┌───────────┼──────────────────────┐
//!     ▼           ▼                      ▼
//!   idle       running,               running,
//!     │        slot empty             slot taken
//!     ▼           ▼                      ▼
//!  spawn      fill slot              CycleRejected
//!  runner         │
//!     │           │
//!     └─► run ◄───┘ runner drains the slot before going idle
//! ```
//!
//! Bursts of triggers therefore collapse into at most one extra cycle.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::{SyncError, SyncResult};

/// Delta cycles look back from the watermark; full cycles fetch everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Delta,
    Full,
}

/// One sync cycle. Errors are the runner's to log.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self, kind: CycleKind);
}

struct Job {
    kind: CycleKind,
    done: oneshot::Sender<()>,
}

#[derive(Default)]
struct ExecutorState {
    running: bool,
    pending: Option<Job>,
}

/// Single-slot debouncing executor.
#[derive(Clone)]
pub struct CycleExecutor {
    runner: Arc<dyn CycleRunner>,
    state: Arc<Mutex<ExecutorState>>,
}

impl CycleExecutor {
    pub fn new(runner: Arc<dyn CycleRunner>) -> Self {
        CycleExecutor {
            runner,
            state: Arc::new(Mutex::new(ExecutorState::default())),
        }
    }

    /// Runs now, queues behind the running cycle, or rejects.
    ///
    /// The receiver resolves when the submitted cycle has finished.
    pub fn try_submit(&self, kind: CycleKind) -> SyncResult<oneshot::Receiver<()>> {
        let (done, finished) = oneshot::channel();
        let job = Job { kind, done };

        let mut state = self.state.lock();
        if !state.running {
            state.running = true;
            drop(state);
            debug!(?kind, "Starting sync cycle");
            tokio::spawn(Self::run(self.runner.clone(), self.state.clone(), job));
        } else if state.pending.is_none() {
            debug!(?kind, "Sync cycle queued");
            state.pending = Some(job);
        } else {
            return Err(SyncError::CycleRejected);
        }
        Ok(finished)
    }

    /// True while a cycle runs or waits.
    pub fn is_busy(&self) -> bool {
        self.state.lock().running
    }

    async fn run(runner: Arc<dyn CycleRunner>, state: Arc<Mutex<ExecutorState>>, mut job: Job) {
        loop {
            let cycle = runner.clone();
            let kind = job.kind;
            // A panicking cycle must not leave the executor marked as running.
            if let Err(e) = tokio::spawn(async move { cycle.run_cycle(kind).await }).await {
                error!(?e, ?kind, "Sync cycle aborted");
            }
            let _ = job.done.send(());

            let next = {
                let mut state = state.lock();
                match state.pending.take() {
                    Some(next) => next,
                    None => {
                        state.running = false;
                        return;
                    }
                }
            };
            job = next;
        }
    }
}
