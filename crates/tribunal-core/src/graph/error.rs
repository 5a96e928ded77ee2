//! Error types for graph construction and execution.

/// Errors produced while compiling or running a task graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("graph has no entry node")]
    NoEntry,

    #[error("graph has more than one entry node: {}", .0.join(", "))]
    MultipleEntries(Vec<String>),

    #[error("graph must have exactly one terminal node, found: {}", .0.join(", "))]
    TerminalCount(Vec<String>),

    #[error("edge {from} -> {to} references unknown node {missing}")]
    UnknownNode {
        from: String,
        to: String,
        missing: String,
    },

    #[error("node {0} declared more than once")]
    DuplicateNode(String),

    #[error("node {node} has conflicting successor rules: {reason}")]
    ConflictingSuccessors { node: String, reason: String },

    #[error("node {0} is not reachable from the entry node")]
    Unreachable(String),

    #[error("graph contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("conditional node {node} has no route to terminal node {terminal}")]
    MissingTerminalRoute { node: String, terminal: String },

    #[error("router of {node} returned unknown label {label:?}")]
    UnknownRoute { node: String, label: String },

    #[error("node {node} failed: {reason}")]
    NodeFailed { node: String, reason: String },
}

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_display() {
        let err = GraphError::MultipleEntries(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "graph has more than one entry node: a, b");

        let err = GraphError::NodeFailed {
            node: "doc_analyst".to_string(),
            reason: "report unreadable".to_string(),
        };
        assert_eq!(err.to_string(), "node doc_analyst failed: report unreadable");
    }
}
