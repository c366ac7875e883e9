//! Sequential pipelines: streaming, buffering and input threading

use std::sync::Arc;

use super::helpers::*;
use crate::backend::Backend;
use crate::config::{ExecutorConfig, ParserConfig};
use crate::events::OutEvent;
use crate::executor::{ExecError, Executor};
use crate::parser::parse_script;
use crate::types::{Environment, Node, OperatorCall, Span, Workflow};

const HEADER: &str = "A = provX:m1\nB = provY:m2\ni = 'hello'\np1 = 'be terse'\np2 = 'summarize'\n";

fn script(workflow: &str) -> String {
    format!("{}{}", HEADER, workflow)
}

#[tokio::test]
async fn test_single_call_streams_each_chunk_then_done() {
    let backend = Arc::new(StubBackend::new().reply("provX:m1", Reply::EchoSplitAt(2)));

    let events = collect(run_script(&script("i -> A_p1"), &backend)).await;

    assert_eq!(
        events,
        vec![OutEvent::delta("he"), OutEvent::delta("llo"), OutEvent::Done]
    );
    let call = backend.call_for("provX:m1");
    assert_eq!(call.system_prompt.as_deref(), Some("be terse"));
    assert_eq!(call.user_content, "hello");
    assert_eq!(call.side_context, None);
}

#[tokio::test]
async fn test_intermediate_stage_is_buffered_not_streamed() {
    let backend = Arc::new(
        StubBackend::new()
            .reply("provX:m1", Reply::Chunks(vec!["alpha ", "beta"]))
            .reply("provY:m2", Reply::Chunks(vec!["x", "y"])),
    );

    let events = collect(run_script(&script("i -> A_p1 -> B_p2"), &backend)).await;

    assert_eq!(
        events,
        vec![OutEvent::delta("x"), OutEvent::delta("y"), OutEvent::Done]
    );
    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].model.to_string(), "provX:m1");
    assert_eq!(calls[1].user_content, "alpha beta");
    assert_eq!(calls[1].system_prompt.as_deref(), Some("summarize"));
}

#[tokio::test]
async fn test_extra_input_is_passed_as_side_context() {
    let backend = Arc::new(StubBackend::new());
    let source = script("i2 = 'background'\ni -> A_p1(i2)");

    let events = collect(run_script(&source, &backend)).await;

    let call = backend.call_for("provX:m1");
    assert_eq!(call.user_content, "hello");
    assert_eq!(call.side_context.as_deref(), Some("background"));
    assert_eq!(events.last(), Some(&OutEvent::Done));
}

#[tokio::test]
async fn test_call_without_prompt_has_no_system_prompt() {
    let backend = Arc::new(StubBackend::new());

    let events = collect(run_script(&script("i -> A"), &backend)).await;

    assert_eq!(events, vec![OutEvent::delta("hello"), OutEvent::Done]);
    assert_eq!(backend.call_for("provX:m1").system_prompt, None);
}

#[tokio::test]
async fn test_intermediate_failure_emits_single_error() {
    let backend = Arc::new(StubBackend::new().reply("provX:m1", Reply::Fail("rate limited")));

    let events = collect(run_script(&script("i -> A_p1 -> B_p2"), &backend)).await;

    assert_eq!(
        events,
        vec![OutEvent::error("backend 'provX' failed: rate limited")]
    );
    // B is never reached
    assert_eq!(backend.calls().len(), 1);
}

#[tokio::test]
async fn test_final_stage_failure_after_partial_output() {
    let backend = Arc::new(
        StubBackend::new().reply("provX:m1", Reply::FailAfter("partial", "stream reset")),
    );

    let events = collect(run_script(&script("i -> A_p1"), &backend)).await;

    assert_eq!(
        events,
        vec![
            OutEvent::delta("partial"),
            OutEvent::error("backend 'provX' failed: stream reset"),
        ]
    );
}

#[tokio::test]
async fn test_loop_feeds_each_iteration_forward() {
    let backend = Arc::new(StubBackend::new().reply("provX:m1", Reply::Suffix("!")));

    let events = collect(run_script(&script("i [-> A]*3"), &backend)).await;

    assert_eq!(
        events,
        vec![OutEvent::delta("hello!!"), OutEvent::delta("!"), OutEvent::Done]
    );
    let inputs: Vec<String> = backend.calls().into_iter().map(|c| c.user_content).collect();
    assert_eq!(inputs, vec!["hello", "hello!", "hello!!"]);
}

#[tokio::test]
async fn test_same_script_produces_same_events() {
    let source = script("i -> A_p1 -> B_p2");
    let first = collect(run_script(&source, &Arc::new(StubBackend::new()))).await;
    let second = collect(run_script(&source, &Arc::new(StubBackend::new()))).await;

    assert_eq!(first, second);
    assert_eq!(first, vec![OutEvent::delta("hello"), OutEvent::Done]);
}

#[tokio::test]
async fn test_execute_with_explicit_root_input() {
    let backend = Arc::new(StubBackend::new());
    let script = parse(&script("i -> A_p1"));
    let executor = Executor::new(backend.clone(), ExecutorConfig::default());

    let handle = executor.execute(
        Arc::new(script.env),
        Arc::new(script.workflow),
        "override".to_string(),
    );
    let events = collect(handle).await;

    assert_eq!(events, vec![OutEvent::delta("override"), OutEvent::Done]);
    assert_eq!(backend.calls()[0].user_content, "override");
}

#[tokio::test]
async fn test_unbound_variable_fails_the_run() {
    let backend: Arc<dyn Backend> = Arc::new(StubBackend::new());
    let workflow = Workflow {
        start_input: "i".to_string(),
        root: Node::OperatorCall(OperatorCall::new("A")),
        span: Span::default(),
    };
    let executor = Executor::new(backend, ExecutorConfig::default());

    let handle = executor.execute(Arc::new(Environment::new()), Arc::new(workflow), "x".to_string());
    let events = collect(handle).await;

    assert_eq!(
        events,
        vec![OutEvent::error(ExecError::UnresolvedVariable("A".to_string()).to_string())]
    );
}

#[tokio::test]
async fn test_execute_workflow_requires_bound_start_input() {
    let executor = Executor::new(Arc::new(StubBackend::new()), ExecutorConfig::default());
    let workflow = Workflow {
        start_input: "i".to_string(),
        root: Node::OperatorCall(OperatorCall::new("A")),
        span: Span::default(),
    };

    let err = executor
        .execute_workflow(Arc::new(Environment::new()), Arc::new(workflow))
        .err()
        .expect("expected an error");

    assert_eq!(err, ExecError::UnresolvedVariable("i".to_string()));
}

#[tokio::test]
async fn test_long_chain_runs_every_stage() {
    let backend = Arc::new(StubBackend::new());
    let config = ParserConfig {
        max_stages: 50_000,
        ..ParserConfig::default()
    };
    let source = format!("A = provX:m1\ni = 'x'\ni{}", "->A".repeat(20_001));
    let script = parse_script(&source, &config).expect("Parse script failed");
    let executor = Executor::new(backend.clone(), ExecutorConfig::default());

    let handle = executor
        .execute_workflow(Arc::new(script.env), Arc::new(script.workflow))
        .expect("Start run failed");
    let events = collect(handle).await;

    assert_eq!(events, vec![OutEvent::delta("x"), OutEvent::Done]);
    assert_eq!(backend.calls().len(), 20_001);
}
