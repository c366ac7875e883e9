//! # Executor - streaming workflow interpreter
//!
//! Runs a parsed [`Workflow`] against a [`Backend`] and reports progress as a
//! stream of [`OutEvent`]s.
//!
//! ## Model
//!
//! 1. **One coordinating task per run**: walks the top-level stage chain in
//!    order and owns the single mutable buffer (the pipeline input).
//! 2. **Final stage streams, earlier stages buffer**: chunks of the last
//!    operator call are forwarded as `delta` events as they arrive; chunks of
//!    intermediate stages are only accumulated.
//! 3. **Parallel stages fan out**: one task per branch, all reading the same
//!    snapshot of the buffer. Outputs are joined in declaration order. The
//!    first failing branch cancels its siblings and fails the run.
//! 4. **Cancellation is cooperative**: every backend call receives a child of
//!    the run's [`CancellationToken`]. Cancelling the run, or dropping its
//!    event stream, stops all in-flight calls and ends the stream silently.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::{Backend, BackendError};
use crate::config::ExecutorConfig;
use crate::events::OutEvent;
use crate::types::{Environment, Workflow};

mod run;
mod stages;

#[cfg(test)]
mod tests;

use run::Run;

/* ===================== Errors ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("variable '{0}' is not bound to a value of the expected kind")]
    UnresolvedVariable(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/* ===================== Executor ===================== */

/// Starts workflow runs against one backend. Cheap to clone.
#[derive(Clone)]
pub struct Executor {
    backend: Arc<dyn Backend>,
    config: Arc<ExecutorConfig>,
}

impl Executor {
    pub fn new(backend: Arc<dyn Backend>, config: ExecutorConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    /// Start a run seeded with `root_input`.
    ///
    /// Spawns the coordinating task, so this must be called from within a
    /// Tokio runtime.
    pub fn execute(
        &self,
        env: Arc<Environment>,
        workflow: Arc<Workflow>,
        root_input: String,
    ) -> RunHandle {
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));

        let span = tracing::info_span!("zflow_run", %run_id);
        let run = Run::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.config),
            env,
            workflow,
            root_input,
            cancel.clone(),
            tx,
        );
        tokio::spawn(run.drive().instrument(span));

        RunHandle {
            run_id,
            cancel: cancel.clone(),
            events: EventStream { rx, cancel },
        }
    }

    /// Start a run seeded from the workflow's leading input variable
    pub fn execute_workflow(
        &self,
        env: Arc<Environment>,
        workflow: Arc<Workflow>,
    ) -> Result<RunHandle, ExecError> {
        let root_input = env
            .input(&workflow.start_input)
            .ok_or_else(|| ExecError::UnresolvedVariable(workflow.start_input.clone()))?
            .to_string();
        Ok(self.execute(env, workflow, root_input))
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/* ===================== Run handle ===================== */

/// Caller's side of a run: the event stream plus the cancel switch
pub struct RunHandle {
    run_id: Uuid,
    cancel: CancellationToken,
    events: EventStream,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Stop the run. In-flight backend calls are cancelled and no further
    /// events are delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn events(&mut self) -> &mut EventStream {
        &mut self.events
    }

    pub fn into_events(self) -> EventStream {
        self.events
    }
}

/// Events of one run, in emission order. Dropping it cancels the run.
pub struct EventStream {
    rx: mpsc::Receiver<OutEvent>,
    cancel: CancellationToken,
}

impl Stream for EventStream {
    type Item = OutEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<OutEvent>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
