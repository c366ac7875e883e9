//! Script-in, events-out entry point
//!
//! Wraps the parser and [`Executor`] behind one call, the way a chat front end
//! consumes Zflow: hand over the script text, get back a run handle or a
//! ready-to-send SSE stream.

use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use tracing::warn;

use crate::backend::Backend;
use crate::config::{Config, ParserConfig};
use crate::error::Result;
use crate::events::OutEvent;
use crate::executor::{Executor, RunHandle};
use crate::parser::{parse_script, Script};

#[derive(Debug, Clone)]
pub struct ZflowService {
    executor: Executor,
    parser: ParserConfig,
}

impl ZflowService {
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self {
            executor: Executor::new(backend, config.executor.clone()),
            parser: config.parser.clone(),
        }
    }

    /// Lex and parse without executing
    pub fn compile(&self, source: &str) -> Result<Script> {
        parse_script(source, &self.parser)
    }

    /// Parse and start a run seeded from the leading input variable.
    ///
    /// A script that fails to parse never starts a run.
    pub fn execute(&self, source: &str) -> Result<RunHandle> {
        self.execute_with_input(source, None)
    }

    /// Like [`execute`](Self::execute), with `input` replacing the leading
    /// input variable's text when given
    pub fn execute_with_input(&self, source: &str, input: Option<String>) -> Result<RunHandle> {
        let script = self.compile(source)?;
        let env = Arc::new(script.env);
        let workflow = Arc::new(script.workflow);

        let handle = match input {
            Some(text) => self.executor.execute(env, workflow, text),
            None => self.executor.execute_workflow(env, workflow)?,
        };
        Ok(handle)
    }

    /// Run a script and encode its events as SSE frames.
    ///
    /// Rejected scripts yield a single `error` frame. Dropping the stream
    /// cancels the run.
    pub fn execute_sse(&self, source: &str) -> BoxStream<'static, String> {
        match self.execute(source) {
            Ok(handle) => handle.into_events().map(|event| event.to_sse()).boxed(),
            Err(err) => {
                warn!(code = err.code(), error = %err, "zflow script rejected");
                stream::iter(Some(OutEvent::error(err.to_string()).to_sse())).boxed()
            }
        }
    }
}
