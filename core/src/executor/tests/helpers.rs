//! Test helpers for executor tests
//!
//! A scripted stub backend and utilities for parsing scripts and draining runs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendError, ChunkStream, InvokeRequest};
use crate::config::{ExecutorConfig, ParserConfig};
use crate::events::OutEvent;
use crate::executor::{Executor, RunHandle};
use crate::parser::{parse_script, Script};

/// Scripted behaviour for one model
#[derive(Debug, Clone)]
pub enum Reply {
    /// Fixed chunks
    Chunks(Vec<&'static str>),
    /// The user content, split into two chunks at a byte offset
    EchoSplitAt(usize),
    /// The user content as one chunk
    Echo,
    /// The user content, then the suffix, as two chunks
    Suffix(&'static str),
    /// One chunk, then an error
    FailAfter(&'static str, &'static str),
    /// An error as the first item
    Fail(&'static str),
    /// Wait, then behave like the inner reply
    Delayed(Duration, Box<Reply>),
    /// Fixed chunks, then nothing until cancelled
    ChunksThenHang(Vec<&'static str>),
    /// Never produce anything
    Hang,
}

/// Deterministic backend keyed by `provider:model`. Unknown models echo.
#[derive(Default)]
pub struct StubBackend {
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<InvokeRequest>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, model: &str, reply: Reply) -> Self {
        self.replies.insert(model.to_string(), reply);
        self
    }

    /// Requests received so far, in arrival order
    pub fn calls(&self) -> Vec<InvokeRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Cancellation tokens handed to each invocation
    pub fn tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn call_for(&self, model: &str) -> InvokeRequest {
        self.calls()
            .into_iter()
            .find(|c| c.model.to_string() == model)
            .unwrap_or_else(|| panic!("no call for {}", model))
    }
}

fn reply_stream(reply: &Reply, request: &InvokeRequest) -> ChunkStream {
    let provider = request.model.provider.clone();
    let text = request.user_content.clone();
    match reply {
        Reply::Chunks(chunks) => {
            let items: Vec<Result<String, BackendError>> =
                chunks.iter().map(|c| Ok(c.to_string())).collect();
            stream::iter(items).boxed()
        }
        Reply::EchoSplitAt(at) => {
            let (head, tail) = text.split_at((*at).min(text.len()));
            stream::iter(vec![Ok(head.to_string()), Ok(tail.to_string())]).boxed()
        }
        Reply::Echo => stream::iter(vec![Ok(text)]).boxed(),
        Reply::Suffix(suffix) => stream::iter(vec![Ok(text), Ok(suffix.to_string())]).boxed(),
        Reply::FailAfter(chunk, cause) => stream::iter(vec![
            Ok(chunk.to_string()),
            Err(BackendError::new(provider, *cause)),
        ])
        .boxed(),
        Reply::Fail(cause) => stream::iter(vec![Err(BackendError::new(provider, *cause))]).boxed(),
        Reply::Delayed(delay, inner) => {
            let inner = reply_stream(inner, request);
            let delay = *delay;
            stream::once(async move {
                tokio::time::sleep(delay).await;
                inner
            })
            .flatten()
            .boxed()
        }
        Reply::ChunksThenHang(chunks) => {
            let items: Vec<Result<String, BackendError>> =
                chunks.iter().map(|c| Ok(c.to_string())).collect();
            stream::iter(items).chain(stream::pending()).boxed()
        }
        Reply::Hang => stream::pending().boxed(),
    }
}

#[async_trait]
impl Backend for StubBackend {
    async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, BackendError> {
        self.calls.lock().unwrap().push(request.clone());
        self.tokens.lock().unwrap().push(cancel);
        let stream = match self.replies.get(&request.model.to_string()) {
            Some(reply) => reply_stream(reply, &request),
            None => reply_stream(&Reply::Echo, &request),
        };
        Ok(stream)
    }
}

pub fn parse(source: &str) -> Script {
    parse_script(source, &ParserConfig::default()).expect("Parse script failed")
}

/// Parse `source` and start a run with default executor settings
pub fn run_script(source: &str, backend: &Arc<StubBackend>) -> RunHandle {
    run_script_with(source, backend, ExecutorConfig::default())
}

pub fn run_script_with(source: &str, backend: &Arc<StubBackend>, config: ExecutorConfig) -> RunHandle {
    let script = parse(source);
    let backend: Arc<dyn Backend> = backend.clone();
    Executor::new(backend, config)
        .execute_workflow(Arc::new(script.env), Arc::new(script.workflow))
        .expect("Start run failed")
}

/// Drain a run's events, failing the test if the stream never ends
pub async fn collect(handle: RunHandle) -> Vec<OutEvent> {
    tokio::time::timeout(Duration::from_secs(5), handle.into_events().collect::<Vec<_>>())
        .await
        .expect("run did not finish")
}

/// Wait until the backend has seen `count` invocations
pub async fn wait_for_calls(backend: &StubBackend, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.calls().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("backend was not invoked in time");
}
