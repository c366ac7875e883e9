//! Coordinating task of a single run
//!
//! Owns the pipeline buffer and walks the stage chain. Terminal events are
//! sent from here only, so `done` and `error` are mutually exclusive and
//! always last.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stages;
use super::ExecError;
use crate::backend::{Backend, InvokeRequest};
use crate::config::ExecutorConfig;
use crate::events::OutEvent;
use crate::types::{Environment, OperatorCall, Stage, Workflow};

pub(super) struct Run {
    backend: Arc<dyn Backend>,
    config: Arc<ExecutorConfig>,
    env: Arc<Environment>,
    workflow: Arc<Workflow>,
    root_input: String,
    cancel: CancellationToken,
    events: mpsc::Sender<OutEvent>,
}

impl Run {
    pub(super) fn new(
        backend: Arc<dyn Backend>,
        config: Arc<ExecutorConfig>,
        env: Arc<Environment>,
        workflow: Arc<Workflow>,
        root_input: String,
        cancel: CancellationToken,
        events: mpsc::Sender<OutEvent>,
    ) -> Self {
        Self {
            backend,
            config,
            env,
            workflow,
            root_input,
            cancel,
            events,
        }
    }

    /// Run to completion, failure or cancellation, then close the stream
    pub(super) async fn drive(self) {
        info!(
            workflow = %self.workflow,
            stages = self.workflow.stage_count(),
            "zflow run started"
        );

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExecError::Cancelled),
            result = self.run_stages() => result,
        };

        match outcome {
            Ok(()) => {
                info!("zflow run completed");
                let _ = self.events.send(OutEvent::Done).await;
            }
            Err(ExecError::Cancelled) => {
                info!("zflow run cancelled");
            }
            Err(err) => {
                warn!(error = %err, "zflow run failed");
                let _ = self.events.send(OutEvent::error(err.to_string())).await;
            }
        }
    }

    async fn run_stages(&self) -> Result<(), ExecError> {
        let stages = self.workflow.stages();
        let last = stages.len().saturating_sub(1);
        let mut buffer = self.root_input.clone();

        for (index, stage) in stages.into_iter().enumerate() {
            let is_final = index == last;
            buffer = match stage {
                Stage::Call(call) => {
                    debug!(stage = index, call = %call, is_final, "running operator call");
                    let request = self.request_for(call, buffer)?;
                    let sink = is_final.then_some(&self.events);
                    stages::invoke(self.backend.as_ref(), request, self.cancel.child_token(), sink)
                        .await?
                }
                Stage::Parallel(branches) => {
                    debug!(stage = index, branches = branches.len(), is_final, "running parallel stage");
                    let requests = branches
                        .iter()
                        .map(|call| self.request_for(call, buffer.clone()))
                        .collect::<Result<Vec<_>, _>>()?;
                    let merged = stages::fan_out(
                        &self.backend,
                        requests,
                        &self.cancel,
                        &self.config.parallel_delimiter,
                    )
                    .await?;
                    if is_final {
                        self.emit(OutEvent::delta(merged.clone())).await?;
                    }
                    merged
                }
            };
        }

        Ok(())
    }

    /// Resolve a call's variables against the environment
    fn request_for(&self, call: &OperatorCall, user_content: String) -> Result<InvokeRequest, ExecError> {
        let model = self
            .env
            .model(&call.model)
            .ok_or_else(|| ExecError::UnresolvedVariable(call.model.clone()))?;

        let system_prompt = match &call.prompt {
            Some(name) => Some(
                self.env
                    .prompt(name)
                    .ok_or_else(|| ExecError::UnresolvedVariable(name.clone()))?
                    .to_string(),
            ),
            None => None,
        };

        let side_context = match &call.extra_input {
            Some(name) => Some(
                self.env
                    .input(name)
                    .ok_or_else(|| ExecError::UnresolvedVariable(name.clone()))?
                    .to_string(),
            ),
            None => None,
        };

        Ok(InvokeRequest {
            model: model.clone(),
            system_prompt,
            user_content,
            side_context,
        })
    }

    async fn emit(&self, event: OutEvent) -> Result<(), ExecError> {
        // A closed channel means the consumer went away
        self.events.send(event).await.map_err(|_| ExecError::Cancelled)
    }
}
