//! Fan-out / fan-in task graph.
//!
//! A graph is declared once with [`GraphBuilder`], validated and compiled
//! into a static table by [`GraphBuilder::compile`], then executed with
//! [`CompiledGraph::execute`].
//!
//! # Module layout
//!
//! - [`node`]: `Node` trait, `FnNode` closure adapter, `Router`
//! - [`error`]: `GraphError`, `GraphResult`
//! - [`table`]: `GraphBuilder`, `CompiledGraph`, `Successors`
//! - [`scheduler`]: execution, `ExecutionOutcome`, `NodeRecord`

pub mod error;
pub mod node;
pub mod scheduler;
pub mod table;

pub use error::{GraphError, GraphResult};
pub use node::{router, FnNode, Node, Router};
pub use scheduler::{ExecutionOutcome, NodeRecord, NodeStatus};
pub use table::{CompiledGraph, GraphBuilder, Successors};
