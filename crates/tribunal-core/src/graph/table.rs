//! Graph declaration and compile-time validation.
//!
//! [`GraphBuilder`] collects nodes and edges in any order; [`GraphBuilder::compile`]
//! resolves names to indices and checks, before anything runs, that:
//!
//! - node names are unique and every edge endpoint exists
//! - each node has either static successors or one router, never both
//! - there is exactly one entry node and exactly one terminal node
//! - every node is reachable from the entry
//! - the graph is acyclic
//! - every router can reach the terminal node directly

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::graph::error::{GraphError, GraphResult};
use crate::graph::node::{Node, Router};

/// Successor rule of a compiled node.
pub enum Successors {
    /// Unconditional fan-out to every listed node.
    Static(Vec<usize>),
    /// Exactly one labeled edge is selected by the router.
    Conditional {
        router: Router,
        routes: Vec<(String, usize)>,
    },
}

impl Successors {
    /// Distinct successor indices, in declaration order.
    pub fn targets(&self) -> Vec<usize> {
        match self {
            Successors::Static(targets) => targets.clone(),
            Successors::Conditional { routes, .. } => {
                let mut targets = Vec::new();
                for (_, t) in routes {
                    if !targets.contains(t) {
                        targets.push(*t);
                    }
                }
                targets
            }
        }
    }
}

impl fmt::Debug for Successors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Successors::Static(targets) => f.debug_tuple("Static").field(targets).finish(),
            Successors::Conditional { routes, .. } => {
                f.debug_struct("Conditional").field("routes", routes).finish()
            }
        }
    }
}

pub(crate) struct NodeEntry {
    pub(crate) name: String,
    pub(crate) node: Arc<dyn Node>,
    /// Sorted by declaration index.
    pub(crate) predecessors: Vec<usize>,
    pub(crate) successors: Successors,
}

/// A validated, immutable graph table.
pub struct CompiledGraph {
    pub(crate) nodes: Vec<NodeEntry>,
    pub(crate) entry: usize,
    pub(crate) terminal: usize,
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.node_names())
            .field("entry", &self.entry_name())
            .field("terminal", &self.terminal_name())
            .finish()
    }
}

type Conditional = (String, Router, Vec<(String, String)>);

/// Collects the declaration of a graph.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<(String, Arc<dyn Node>)>,
    edges: Vec<(String, String)>,
    conditionals: Vec<Conditional>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(self, name: impl Into<String>, node: impl Node + 'static) -> Self {
        self.node_arc(name, Arc::new(node))
    }

    pub fn node_arc(mut self, name: impl Into<String>, node: Arc<dyn Node>) -> Self {
        self.nodes.push((name.into(), node));
        self
    }

    /// Static edge: `to` starts once `from` (and `to`'s other predecessors) complete.
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Conditional successor rule: `router` picks one `(label, target)` pair.
    pub fn conditional(mut self, from: impl Into<String>, router: Router, routes: &[(&str, &str)]) -> Self {
        let routes = routes
            .iter()
            .map(|(label, to)| (label.to_string(), to.to_string()))
            .collect();
        self.conditionals.push((from.into(), router, routes));
        self
    }

    pub fn compile(self) -> GraphResult<CompiledGraph> {
        let n = self.nodes.len();
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, (name, _)) in self.nodes.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(GraphError::DuplicateNode(name.clone()));
            }
        }

        let lookup = |from: &str, to: &str, name: &str| -> GraphResult<usize> {
            index.get(name).copied().ok_or_else(|| GraphError::UnknownNode {
                from: from.to_string(),
                to: to.to_string(),
                missing: name.to_string(),
            })
        };

        let mut statics: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (from, to) in &self.edges {
            let f = lookup(from, to, from)?;
            let t = lookup(from, to, to)?;
            if !statics[f].contains(&t) {
                statics[f].push(t);
            }
        }

        let mut routers: Vec<Option<(Router, Vec<(String, usize)>)>> = (0..n).map(|_| None).collect();
        for (from, router, routes) in self.conditionals {
            let f = lookup(&from, &from, &from)?;
            if routers[f].is_some() {
                return Err(GraphError::ConflictingSuccessors {
                    node: from,
                    reason: "more than one router declared".to_string(),
                });
            }
            if routes.is_empty() {
                return Err(GraphError::ConflictingSuccessors {
                    node: from,
                    reason: "router declares no routes".to_string(),
                });
            }
            let mut resolved: Vec<(String, usize)> = Vec::new();
            for (label, to) in routes {
                let t = lookup(&from, &to, &to)?;
                if resolved.iter().any(|(l, _)| *l == label) {
                    return Err(GraphError::ConflictingSuccessors {
                        node: from,
                        reason: format!("route label {label:?} declared twice"),
                    });
                }
                resolved.push((label, t));
            }
            routers[f] = Some((router, resolved));
        }

        let mut successors = Vec::with_capacity(n);
        for (i, targets) in statics.into_iter().enumerate() {
            match routers[i].take() {
                Some(_) if !targets.is_empty() => {
                    return Err(GraphError::ConflictingSuccessors {
                        node: self.nodes[i].0.clone(),
                        reason: "both static edges and a router declared".to_string(),
                    });
                }
                Some((router, routes)) => successors.push(Successors::Conditional { router, routes }),
                None => successors.push(Successors::Static(targets)),
            }
        }

        let targets: Vec<Vec<usize>> = successors.iter().map(Successors::targets).collect();
        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, ts) in targets.iter().enumerate() {
            for &t in ts {
                predecessors[t].push(i);
            }
        }

        let name_of = |i: usize| self.nodes[i].0.clone();

        let entries: Vec<usize> = (0..n).filter(|&i| predecessors[i].is_empty()).collect();
        let entry = match entries.as_slice() {
            [] => return Err(GraphError::NoEntry),
            [only] => *only,
            many => {
                return Err(GraphError::MultipleEntries(
                    many.iter().map(|&i| name_of(i)).collect(),
                ))
            }
        };

        let mut seen = vec![false; n];
        let mut queue = VecDeque::from([entry]);
        seen[entry] = true;
        while let Some(i) = queue.pop_front() {
            for &t in &targets[i] {
                if !seen[t] {
                    seen[t] = true;
                    queue.push_back(t);
                }
            }
        }
        if let Some(i) = seen.iter().position(|s| !s) {
            return Err(GraphError::Unreachable(name_of(i)));
        }

        let mut indegree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
        let mut ready: VecDeque<usize> = VecDeque::from([entry]);
        let mut visited = 0usize;
        while let Some(i) = ready.pop_front() {
            visited += 1;
            for &t in &targets[i] {
                indegree[t] -= 1;
                if indegree[t] == 0 {
                    ready.push_back(t);
                }
            }
        }
        if visited < n {
            return Err(GraphError::Cycle(
                (0..n).filter(|&i| indegree[i] > 0).map(name_of).collect(),
            ));
        }

        let sinks: Vec<usize> = (0..n).filter(|&i| targets[i].is_empty()).collect();
        let terminal = match sinks.as_slice() {
            [only] => *only,
            other => {
                return Err(GraphError::TerminalCount(
                    other.iter().map(|&i| name_of(i)).collect(),
                ))
            }
        };

        for (i, succ) in successors.iter().enumerate() {
            if let Successors::Conditional { routes, .. } = succ {
                if !routes.iter().any(|(_, t)| *t == terminal) {
                    return Err(GraphError::MissingTerminalRoute {
                        node: name_of(i),
                        terminal: name_of(terminal),
                    });
                }
            }
        }

        let nodes = self
            .nodes
            .into_iter()
            .zip(predecessors)
            .zip(successors)
            .map(|(((name, node), predecessors), successors)| NodeEntry {
                name,
                node,
                predecessors,
                successors,
            })
            .collect();

        Ok(CompiledGraph {
            nodes,
            entry,
            terminal,
        })
    }
}

impl CompiledGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn entry_name(&self) -> &str {
        &self.nodes[self.entry].name
    }

    pub fn terminal_name(&self) -> &str {
        &self.nodes[self.terminal].name
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn predecessors_of(&self, name: &str) -> Option<Vec<&str>> {
        let node = self.nodes.iter().find(|n| n.name == name)?;
        Some(
            node.predecessors
                .iter()
                .map(|&p| self.nodes[p].name.as_str())
                .collect(),
        )
    }

    /// Label of the route from `node` straight to the terminal node.
    pub(crate) fn terminal_label(&self, routes: &[(String, usize)]) -> Option<String> {
        routes
            .iter()
            .find(|(_, t)| *t == self.terminal)
            .map(|(label, _)| label.clone())
    }

    /// Mermaid flowchart of the table.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        for node in &self.nodes {
            match &node.successors {
                Successors::Static(targets) => {
                    for &t in targets {
                        out.push_str(&format!("    {} --> {}\n", node.name, self.nodes[t].name));
                    }
                }
                Successors::Conditional { routes, .. } => {
                    for (label, t) in routes {
                        out.push_str(&format!(
                            "    {} -->|{}| {}\n",
                            node.name, label, self.nodes[*t].name
                        ));
                    }
                }
            }
        }
        out
    }
}
