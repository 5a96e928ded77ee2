//! Concurrent execution of a compiled graph.
//!
//! Every launched node runs in its own tokio task against an immutable
//! snapshot of the state taken at launch. A finished node's patch is parked
//! until one of its successors launches; at that point the patches of all
//! the successor's predecessors are merged in declaration order, so a
//! barrier's merged state does not depend on which branch finished first.
//!
//! Conditional edges not taken send a skip signal instead of an activation.
//! A node whose predecessors have all resolved runs if at least one of them
//! activated it and is skipped otherwise, which propagates the skip. This
//! keeps every barrier firing exactly once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinError;
use tracing::Instrument;

use crate::domain::error::Result;
use crate::graph::error::GraphError;
use crate::graph::table::{CompiledGraph, NodeEntry, Successors};
use crate::obs;
use crate::state::{PartialUpdate, RunState};

/// How a node ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum NodeStatus {
    Completed,
    /// Error or panic captured as a log entry.
    Failed(String),
    /// Not activated by any predecessor.
    Skipped,
}

/// One entry of the execution trace, in resolution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub name: String,
    pub status: NodeStatus,
    /// Label chosen by the node's router, if it has one.
    pub route: Option<String>,
}

/// Final state and trace of one graph execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub state: RunState,
    pub trace: Vec<NodeRecord>,
}

impl ExecutionOutcome {
    pub fn record(&self, name: &str) -> Option<&NodeRecord> {
        self.trace.iter().find(|r| r.name == name)
    }

    /// Whether `name` was launched (completed or failed).
    pub fn ran(&self, name: &str) -> bool {
        self.record(name)
            .is_some_and(|r| r.status != NodeStatus::Skipped)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.trace
            .iter()
            .filter(|r| r.status == NodeStatus::Skipped)
            .map(|r| r.name.as_str())
            .collect()
    }
}

type Completion = (usize, Instant, std::result::Result<Result<PartialUpdate>, JoinError>);

fn merge_logged(state: &mut RunState, update: PartialUpdate) {
    let before = state.logs.len();
    state.apply(update);
    for line in &state.logs[before..] {
        obs::emit_state_log(line);
    }
}

impl CompiledGraph {
    /// Run the graph to completion from `initial`.
    ///
    /// Node failures never abort execution; they end up in `state.logs`
    /// and as [`NodeStatus::Failed`] in the trace.
    pub async fn execute(&self, initial: RunState) -> ExecutionOutcome {
        let n = self.nodes.len();
        let mut state = initial;
        let mut pending: Vec<Option<PartialUpdate>> = (0..n).map(|_| None).collect();
        let mut resolved = vec![0usize; n];
        let mut activated = vec![false; n];
        let mut trace = Vec::with_capacity(n);
        let mut running: FuturesUnordered<BoxFuture<'static, Completion>> = FuturesUnordered::new();

        self.launch(self.entry, &mut state, &mut pending, &mut running);

        while let Some((idx, started, joined)) = running.next().await {
            let entry = &self.nodes[idx];
            let (mut update, status) = match joined {
                Ok(Ok(update)) => {
                    obs::emit_node_completed(&entry.name, started.elapsed().as_millis() as u64);
                    (update, NodeStatus::Completed)
                }
                Ok(Err(e)) => Self::failure(entry, e.to_string()),
                Err(join_err) => {
                    let reason = if join_err.is_panic() {
                        "task panicked".to_string()
                    } else {
                        format!("task cancelled: {join_err}")
                    };
                    Self::failure(entry, reason)
                }
            };

            let mut route = None;
            let signals: Vec<(usize, bool)> = match &entry.successors {
                Successors::Static(targets) => targets.iter().map(|&t| (t, true)).collect(),
                Successors::Conditional { router, routes } => {
                    let preview = state.clone().merge(update.clone());
                    let mut label = router(&preview);
                    let known = routes.iter().any(|(l, _)| *l == label);
                    let terminal_label = self
                        .terminal_label(routes)
                        .unwrap_or_else(|| routes[0].0.clone());
                    let mut short_circuit = false;
                    if !known {
                        let err = GraphError::UnknownRoute {
                            node: entry.name.clone(),
                            label: label.clone(),
                        };
                        update.logs.push(format!("scheduler: {err}, routing to terminal"));
                        label = terminal_label;
                        short_circuit = true;
                    } else if preview.is_fatal() {
                        let target = routes.iter().find(|(l, _)| *l == label).map(|(_, t)| *t);
                        if target != Some(self.terminal) {
                            label = terminal_label;
                        }
                        short_circuit = true;
                    }
                    obs::emit_route_selected(&entry.name, &label, short_circuit);
                    update.routing.insert(entry.name.clone(), label.clone());

                    let chosen = routes.iter().find(|(l, _)| *l == label).map(|(_, t)| *t);
                    let signals = entry
                        .successors
                        .targets()
                        .into_iter()
                        .map(|t| (t, Some(t) == chosen))
                        .collect();
                    route = Some(label);
                    signals
                }
            };

            pending[idx] = Some(update);
            trace.push(NodeRecord {
                name: entry.name.clone(),
                status,
                route,
            });

            let mut queue: VecDeque<(usize, bool)> = signals.into();
            while let Some((t, active)) = queue.pop_front() {
                resolved[t] += 1;
                if active {
                    activated[t] = true;
                }
                if resolved[t] < self.nodes[t].predecessors.len() {
                    continue;
                }
                if activated[t] {
                    self.launch(t, &mut state, &mut pending, &mut running);
                } else {
                    trace.push(NodeRecord {
                        name: self.nodes[t].name.clone(),
                        status: NodeStatus::Skipped,
                        route: None,
                    });
                    queue.extend(self.nodes[t].successors.targets().into_iter().map(|s| (s, false)));
                }
            }
        }

        for update in pending.into_iter().flatten() {
            merge_logged(&mut state, update);
        }

        ExecutionOutcome { state, trace }
    }

    fn failure(entry: &NodeEntry, reason: String) -> (PartialUpdate, NodeStatus) {
        let err = GraphError::NodeFailed {
            node: entry.name.clone(),
            reason: reason.clone(),
        };
        obs::emit_node_failed(&entry.name, &err);
        (
            PartialUpdate::new().log(format!("scheduler: {err}")),
            NodeStatus::Failed(reason),
        )
    }

    fn launch(
        &self,
        idx: usize,
        state: &mut RunState,
        pending: &mut [Option<PartialUpdate>],
        running: &mut FuturesUnordered<BoxFuture<'static, Completion>>,
    ) {
        let entry = &self.nodes[idx];
        for &p in &entry.predecessors {
            if let Some(update) = pending[p].take() {
                merge_logged(state, update);
            }
        }
        let snapshot = Arc::new(state.clone());
        let node = Arc::clone(&entry.node);
        let started = Instant::now();
        let handle = tokio::spawn(async move { node.run(snapshot).await }.in_current_span());
        running.push(async move { (idx, started, handle.await) }.boxed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::AuditError;
    use crate::graph::node::{router, FnNode};
    use crate::graph::table::GraphBuilder;

    fn logs(line: &'static str) -> FnNode<impl Fn(Arc<RunState>) -> futures::future::Ready<Result<PartialUpdate>> + Send + Sync> {
        FnNode::new(move |_s: Arc<RunState>| futures::future::ready(Ok(PartialUpdate::new().log(line))))
    }

    #[tokio::test]
    async fn test_linear_chain_sees_predecessor_writes() {
        let graph = GraphBuilder::new()
            .node("a", logs("a"))
            .node(
                "b",
                FnNode::new(|s: Arc<RunState>| async move {
                    Ok(PartialUpdate::new().log(format!("b saw {:?}", s.logs)))
                }),
            )
            .edge("a", "b")
            .compile()
            .unwrap();
        let outcome = graph.execute(RunState::new()).await;
        assert_eq!(outcome.state.logs, vec!["a", "b saw [\"a\"]"]);
    }

    #[tokio::test]
    async fn test_failed_node_becomes_log_and_run_continues() {
        let graph = GraphBuilder::new()
            .node(
                "a",
                FnNode::new(|_s: Arc<RunState>| async move {
                    Err::<PartialUpdate, _>(AuditError::Collaborator("boom".to_string()))
                }),
            )
            .node("b", logs("b ran"))
            .edge("a", "b")
            .compile()
            .unwrap();
        let outcome = graph.execute(RunState::new()).await;
        assert!(matches!(outcome.record("a").unwrap().status, NodeStatus::Failed(_)));
        assert!(outcome.ran("b"));
        assert!(outcome.state.logs[0].contains("node a failed"));
    }

    #[tokio::test]
    async fn test_untaken_branch_is_skipped() {
        let graph = GraphBuilder::new()
            .node("start", logs("start"))
            .node("work", logs("work"))
            .node("end", logs("end"))
            .conditional(
                "start",
                router(|_s: &RunState| "bail".to_string()),
                &[("go", "work"), ("bail", "end")],
            )
            .edge("work", "end")
            .compile()
            .unwrap();
        let outcome = graph.execute(RunState::new()).await;
        assert_eq!(outcome.skipped(), vec!["work"]);
        assert!(outcome.ran("end"));
        assert_eq!(outcome.state.routing["start"], "bail");
        assert_eq!(outcome.record("start").unwrap().route.as_deref(), Some("bail"));
    }

    #[tokio::test]
    async fn test_unknown_label_routes_to_terminal() {
        let graph = GraphBuilder::new()
            .node("start", logs("start"))
            .node("work", logs("work"))
            .node("end", logs("end"))
            .conditional(
                "start",
                router(|_s: &RunState| "sideways".to_string()),
                &[("go", "work"), ("done", "end")],
            )
            .edge("work", "end")
            .compile()
            .unwrap();
        let outcome = graph.execute(RunState::new()).await;
        assert!(!outcome.ran("work"));
        assert_eq!(outcome.state.routing["start"], "done");
        assert!(outcome.state.logs.iter().any(|l| l.contains("unknown label")));
    }
}
