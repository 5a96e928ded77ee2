//! The unit of work executed by the scheduler.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::error::Result;
use crate::state::{PartialUpdate, RunState};

/// A graph node: reads a state snapshot and returns a sparse patch.
///
/// An `Err` is captured by the scheduler as a log entry; it never aborts
/// the run.
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, state: Arc<RunState>) -> Result<PartialUpdate>;
}

/// Pure routing predicate of a conditional node.
///
/// Receives the state as it will be seen after the node's own patch.
pub type Router = Arc<dyn Fn(&RunState) -> String + Send + Sync>;

/// Adapts an async closure into a [`Node`].
pub struct FnNode<F> {
    f: F,
}

impl<F> FnNode<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Node for FnNode<F>
where
    F: Fn(Arc<RunState>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PartialUpdate>> + Send,
{
    async fn run(&self, state: Arc<RunState>) -> Result<PartialUpdate> {
        (self.f)(state).await
    }
}

/// Build a [`Router`] from a plain function or closure.
pub fn router<F>(f: F) -> Router
where
    F: Fn(&RunState) -> String + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_node_runs_closure() {
        let node = FnNode::new(|state: Arc<RunState>| async move {
            Ok(PartialUpdate::new().log(format!("saw {} logs", state.logs.len())))
        });
        let update = node.run(Arc::new(RunState::new())).await.unwrap();
        assert_eq!(update.logs, vec!["saw 0 logs"]);
    }

    #[test]
    fn test_router_reads_state() {
        let r = router(|s: &RunState| {
            if s.is_fatal() { "stop" } else { "go" }.to_string()
        });
        assert_eq!(r(&RunState::new()), "go");
    }
}
