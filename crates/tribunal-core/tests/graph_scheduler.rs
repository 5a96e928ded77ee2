//! Scheduler behaviour under concurrent fan-out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tribunal_core::graph::node::router;
use tribunal_core::{
    AuditError, CompiledGraph, Evidence, GraphBuilder, Node, NodeStatus, PartialUpdate, Result,
    RunState,
};

/// Sleeps, then contributes one evidence item and one log line.
struct Branch {
    id: usize,
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl Node for Branch {
    async fn run(&self, state: Arc<RunState>) -> Result<PartialUpdate> {
        tokio::time::sleep(self.delay).await;
        // Siblings are invisible before the barrier.
        assert!(state.evidences.is_empty());
        if self.fail {
            return Err(AuditError::Collaborator(format!("branch {} exploded", self.id)));
        }
        let id = format!("branch.b{}", self.id);
        Ok(PartialUpdate::new()
            .evidence(Evidence::new(&id, "g", true, "here", "r", 0.5).unwrap())
            .log(format!("b{} done", self.id)))
    }
}

/// Counts invocations and records how many evidence items it saw.
struct Join {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for Join {
    async fn run(&self, state: Arc<RunState>) -> Result<PartialUpdate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PartialUpdate::new().log(format!("join saw {} evidence", state.evidences.len())))
    }
}

struct Start;

#[async_trait]
impl Node for Start {
    async fn run(&self, _state: Arc<RunState>) -> Result<PartialUpdate> {
        Ok(PartialUpdate::new().log("start"))
    }
}

fn fan_graph(delays: &[u64], failing: Option<usize>, calls: Arc<AtomicUsize>) -> CompiledGraph {
    let mut builder = GraphBuilder::new().node("start", Start).node("join", Join { calls });
    for (i, delay) in delays.iter().enumerate() {
        let name = format!("b{i}");
        builder = builder
            .node(
                name.clone(),
                Branch {
                    id: i,
                    delay: Duration::from_millis(*delay),
                    fail: failing == Some(i),
                },
            )
            .edge("start", name.clone())
            .edge(name, "join");
    }
    builder.compile().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_barrier_fires_once_and_merge_ignores_arrival_order() {
    let mut finals = Vec::new();
    for delays in [[10, 20, 30, 40], [40, 30, 20, 10], [25, 5, 40, 15]] {
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = fan_graph(&delays, None, Arc::clone(&calls));
        let outcome = graph.execute(RunState::new()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.trace.iter().filter(|r| r.name == "join").count(), 1);
        finals.push(outcome.state);
    }

    let expected_logs = vec!["start", "b0 done", "b1 done", "b2 done", "b3 done", "join saw 4 evidence"];
    for state in &finals {
        assert_eq!(state.logs, expected_logs);
        assert_eq!(state, &finals[0]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_branch_still_releases_barrier() {
    let calls = Arc::new(AtomicUsize::new(0));
    let graph = fan_graph(&[5, 1, 5], Some(1), Arc::clone(&calls));
    let outcome = graph.execute(RunState::new()).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(outcome.record("b1").unwrap().status, NodeStatus::Failed(_)));
    assert!(!outcome.state.evidences.contains_key("branch.b1"));
    assert_eq!(outcome.state.evidences.len(), 2);
    assert!(outcome
        .state
        .logs
        .iter()
        .any(|l| l.contains("node b1 failed") && l.contains("branch 1 exploded")));
    assert_eq!(outcome.state.logs.last().unwrap(), "join saw 2 evidence");
}

struct SetsFatal;

#[async_trait]
impl Node for SetsFatal {
    async fn run(&self, _state: Arc<RunState>) -> Result<PartialUpdate> {
        Ok(PartialUpdate::new().fatal("clone failed"))
    }
}

#[tokio::test]
async fn test_fatal_short_circuits_conditional_routing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let graph = GraphBuilder::new()
        .node("check", SetsFatal)
        .node("work", Start)
        .node("report", Join { calls: Arc::clone(&calls) })
        .conditional(
            "check",
            router(|_s: &RunState| "go".to_string()),
            &[("go", "work"), ("stop", "report")],
        )
        .edge("work", "report")
        .compile()
        .unwrap();

    let outcome = graph.execute(RunState::new()).await;
    assert_eq!(outcome.state.routing["check"], "stop");
    assert_eq!(outcome.skipped(), vec!["work"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.state.fatal.as_deref(), Some("clone failed"));
}

#[tokio::test]
async fn test_skip_propagates_through_chain() {
    let calls = Arc::new(AtomicUsize::new(0));
    let graph = GraphBuilder::new()
        .node("gate", Start)
        .node("a", Start)
        .node("b", Start)
        .node("end", Join { calls: Arc::clone(&calls) })
        .conditional(
            "gate",
            router(|_s: &RunState| "skip".to_string()),
            &[("run", "a"), ("skip", "end")],
        )
        .edge("a", "b")
        .edge("b", "end")
        .compile()
        .unwrap();

    let outcome = graph.execute(RunState::new()).await;
    assert_eq!(outcome.skipped(), vec!["a", "b"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(outcome.ran("end"));
}
