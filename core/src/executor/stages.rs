//! Stage execution: single operator calls and parallel fan-out

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ExecError;
use crate::backend::{Backend, InvokeRequest};
use crate::events::OutEvent;

/// Invoke the backend once and drain its chunk stream into a buffer.
///
/// With a `sink`, every chunk is also forwarded as a `delta` event as soon as
/// it arrives.
pub(super) async fn invoke(
    backend: &dyn Backend,
    request: InvokeRequest,
    cancel: CancellationToken,
    sink: Option<&mpsc::Sender<OutEvent>>,
) -> Result<String, ExecError> {
    let model = request.model.to_string();

    let mut chunks = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ExecError::Cancelled),
        stream = backend.invoke(request, cancel.clone()) => stream?,
    };

    let mut buffer = String::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
            next = chunks.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk?;

        if let Some(sink) = sink {
            sink.send(OutEvent::delta(chunk.clone()))
                .await
                .map_err(|_| ExecError::Cancelled)?;
        }
        buffer.push_str(&chunk);
    }

    debug!(%model, bytes = buffer.len(), "invocation finished");
    Ok(buffer)
}

/// Run every request concurrently and join the outputs in request order.
///
/// The first failure cancels the remaining branches and is returned as is.
pub(super) async fn fan_out(
    backend: &Arc<dyn Backend>,
    requests: Vec<InvokeRequest>,
    cancel: &CancellationToken,
    delimiter: &str,
) -> Result<String, ExecError> {
    let stage_cancel = cancel.child_token();
    // Siblings are cancelled however this function exits
    let _guard = stage_cancel.clone().drop_guard();

    let mut tasks = JoinSet::new();
    let branch_count = requests.len();
    for (slot, request) in requests.into_iter().enumerate() {
        let backend = Arc::clone(backend);
        let token = stage_cancel.child_token();
        tasks.spawn(async move {
            let result = invoke(backend.as_ref(), request, token, None).await;
            (slot, result)
        });
    }

    let mut outputs: Vec<Option<String>> = vec![None; branch_count];
    while let Some(joined) = tasks.join_next().await {
        let (slot, result) =
            joined.map_err(|err| ExecError::Internal(format!("parallel branch task failed: {}", err)))?;
        match result {
            Ok(text) => outputs[slot] = Some(text),
            Err(err) => {
                debug!(branch = slot, error = %err, "parallel branch failed, cancelling siblings");
                stage_cancel.cancel();
                tasks.abort_all();
                return Err(err);
            }
        }
    }

    let outputs: Vec<String> = outputs.into_iter().flatten().collect();
    Ok(outputs.join(delimiter))
}
