//! Graph store: owns the registered nodes and both edge indices.
//!
//! Edges are registered as `(target, source)` pairs, matching how flows are
//! authored ("this node follows that one"). Internally the store maintains
//! an adjacency-by-source index built at registration time so the frontier
//! query `outgoing_edges_of` is a direct lookup, plus the predecessor lists
//! the registration order implies. The two views stay symmetric:
//! `b ∈ outgoing(a) ⇔ a ∈ predecessors(b)`.
//!
//! The store is mutable during setup only; traversal holds it behind an
//! `Arc` and reads from any context.
//!
//! # Examples
//!
//! ```
//! use chatflow::graph::FlowGraph;
//! use chatflow::node::MessageNode;
//!
//! let mut graph = FlowGraph::new();
//! let hello = MessageNode::builder("hello").text("Hi!").build().unwrap();
//! let bye = MessageNode::builder("bye").text("Bye!").build().unwrap();
//! graph.register_node(hello.into());
//! graph.register_node(bye.into());
//! graph.register_edge(&"bye".into(), &"hello".into()).unwrap();
//!
//! let next = graph.outgoing_edges_of(&"hello".into());
//! assert_eq!(next[0].id().as_str(), "bye");
//! ```

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::node::{Node, NodeId};

/// Fatal graph-shape errors: authoring bugs, never recoverable at runtime.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    /// A node id was referenced that is not registered.
    #[error("node \"{id}\" does not exist in the graph")]
    #[diagnostic(
        code(chatflow::graph::not_found),
        help("Register the node with register_node before referencing it.")
    )]
    NotFound { id: NodeId },

    /// An edge endpoint was not registered before the edge.
    #[error("edge endpoint \"{id}\" is not registered in the graph")]
    #[diagnostic(
        code(chatflow::graph::unregistered_endpoint),
        help("All nodes must be registered before appearing in an edge.")
    )]
    UnregisteredEndpoint { id: NodeId },

    /// Siblings sharing a predecessor are not all actions.
    #[error("nodes after \"{after}\" branch but are not all actions")]
    #[diagnostic(
        code(chatflow::graph::mixed_branch),
        help("Only actions may represent several edges out of one node.")
    )]
    MixedBranch { after: NodeId },

    /// An action has more than one outgoing edge.
    #[error("action \"{id}\" has multiple outgoing edges")]
    #[diagnostic(
        code(chatflow::graph::action_fan_out),
        help("An action can have at most one outgoing edge.")
    )]
    ActionFanOut { id: NodeId },

    /// An action's single outgoing edge leads to another action.
    #[error("action \"{id}\" is connected to another action")]
    #[diagnostic(
        code(chatflow::graph::action_to_action),
        help("An action can only be connected to a message.")
    )]
    ActionToAction { id: NodeId },
}

/// Registry of flow nodes and their directed edges.
#[derive(Debug, Default)]
pub struct FlowGraph {
    nodes: FxHashMap<NodeId, Node>,
    /// Source -> targets, in registration order. Answers the frontier query.
    outgoing: FxHashMap<NodeId, Vec<NodeId>>,
    /// Target -> sources, in registration order.
    predecessors: FxHashMap<NodeId, Vec<NodeId>>,
}

impl FlowGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent insert; a node already registered under the same id is
    /// kept untouched.
    pub fn register_node(&mut self, node: Node) {
        let id = node.id().clone();
        if self.nodes.contains_key(&id) {
            tracing::debug!(%id, "node already registered; keeping existing");
            return;
        }
        self.nodes.insert(id, node);
    }

    /// Register a directed edge `source -> target`.
    ///
    /// Both endpoints must already be registered; shape validation beyond
    /// that (branch well-formedness) is deliberately deferred to traversal,
    /// since it depends on all edges existing.
    pub fn register_edge(&mut self, target: &NodeId, source: &NodeId) -> Result<(), GraphError> {
        for endpoint in [target, source] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::UnregisteredEndpoint {
                    id: endpoint.clone(),
                });
            }
        }
        self.outgoing
            .entry(source.clone())
            .or_default()
            .push(target.clone());
        self.predecessors
            .entry(target.clone())
            .or_default()
            .push(source.clone());
        Ok(())
    }

    pub fn lookup_by_id(&self, id: &NodeId) -> Result<&Node, GraphError> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::NotFound { id: id.clone() })
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Ordered frontier out of `id`; empty means terminal leaf.
    #[must_use]
    pub fn outgoing_edges_of(&self, id: &NodeId) -> Vec<&Node> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|target| self.nodes.get(target))
            .collect()
    }

    /// Sources of edges pointing at `id`, in registration order.
    #[must_use]
    pub fn predecessors_of(&self, id: &NodeId) -> Vec<&Node> {
        self.predecessors
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|source| self.nodes.get(source))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
