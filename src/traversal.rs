//! Traversal engine: frontier computation, resume replay, and branch choice.
//!
//! Pure queries over an `Arc`-shared [`FlowGraph`]; all mutation of flow
//! state happens in the controller. Malformed shapes (mixed branches,
//! actions that fan out) are detected here, lazily, because shape depends on
//! the complete edge set rather than any single registration.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::graph::{FlowGraph, GraphError};
use crate::node::{ActionGroup, ActionNode, DisplayItem, Node, NodeId};
use crate::store::StateStore;

/// Where one `advance` step lands.
#[derive(Clone, Debug)]
pub enum Step {
    /// A single non-action node to present next.
    AtNode(Node),
    /// A branch of sibling actions awaiting a choice. A lone action is
    /// wrapped as a singleton group so branches are the only way actions
    /// are ever presented.
    AtBranch(ActionGroup),
    /// Empty frontier: the flow is finished.
    Done,
}

/// Read-only traversal over a finished graph.
#[derive(Clone)]
pub struct Traversal {
    graph: Arc<FlowGraph>,
}

impl Traversal {
    #[must_use]
    pub fn new(graph: Arc<FlowGraph>) -> Self {
        Self { graph }
    }

    #[must_use]
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Compute the frontier out of `current`.
    pub fn advance(&self, current: &NodeId) -> Result<Step, GraphError> {
        let out = self.graph.outgoing_edges_of(current);
        match out.as_slice() {
            [] => Ok(Step::Done),
            [Node::Action(action)] => {
                Ok(Step::AtBranch(ActionGroup::new(vec![(*action).clone()])))
            }
            [node] => Ok(Step::AtNode((*node).clone())),
            siblings => Ok(Step::AtBranch(Self::group_of(current, siblings)?)),
        }
    }

    /// Validate an action's exit for position tracking.
    ///
    /// Returns the id of the single following message, if any. This is
    /// where the "at most one outgoing edge, and only to a message"
    /// invariant on actions is enforced.
    pub fn tracked_exit(&self, action: &ActionNode) -> Result<Option<NodeId>, GraphError> {
        let out = self.graph.outgoing_edges_of(action.id());
        match out.as_slice() {
            [] => Ok(None),
            [Node::Message(m)] => Ok(Some(m.id().clone())),
            [Node::Action(_)] => Err(GraphError::ActionToAction {
                id: action.id().clone(),
            }),
            _ => Err(GraphError::ActionFanOut {
                id: action.id().clone(),
            }),
        }
    }

    /// Reconstruct, without pacing, the display items between `root`
    /// (exclusive) and `target` (inclusive).
    ///
    /// Non-branch nodes are appended as-is. A branch is crossed through the
    /// lowest-ranked sibling present in `visited`: its sub-state is restored
    /// from `store` and its feedback message is appended in place of the
    /// prompt. A branch with no visited sibling stops the replay.
    pub fn replay(
        &self,
        root: &NodeId,
        target: &NodeId,
        visited: &FxHashSet<String>,
        store: &dyn StateStore,
    ) -> Result<Vec<DisplayItem>, GraphError> {
        let mut items = Vec::new();
        let mut cursor = root.clone();
        loop {
            if cursor == *target {
                break;
            }
            let out = self.graph.outgoing_edges_of(&cursor);
            match out.as_slice() {
                [] => break,
                [node] if *node.id() == *target => {
                    items.push(DisplayItem::Node((*node).clone()));
                    break;
                }
                [Node::Action(action)] => {
                    debug!(id = %action.id(), "replaying through action");
                    action.restore_state(store);
                    items.push(DisplayItem::Node(Node::Message(action.build_feedback())));
                    cursor = action.id().clone();
                }
                [node] => {
                    items.push(DisplayItem::Node((*node).clone()));
                    cursor = node.id().clone();
                }
                siblings => {
                    let group = Self::group_of(&cursor, siblings)?;
                    let Some(action) = group.visited_in(visited) else {
                        debug!(after = %cursor, "branch has no visited sibling; replay stops");
                        break;
                    };
                    debug!(id = %action.id(), "replaying branch through visited action");
                    action.restore_state(store);
                    items.push(DisplayItem::Node(Node::Message(action.build_feedback())));
                    cursor = action.id().clone();
                }
            }
        }
        Ok(items)
    }

    /// Validate a host- or recognizer-chosen action against its branch.
    pub fn choose<'g>(
        &self,
        group: &'g ActionGroup,
        chosen: &NodeId,
    ) -> Result<&'g ActionNode, GraphError> {
        group
            .get(chosen)
            .ok_or_else(|| GraphError::NotFound { id: chosen.clone() })
    }

    fn group_of(after: &NodeId, siblings: &[&Node]) -> Result<ActionGroup, GraphError> {
        let mut actions = Vec::with_capacity(siblings.len());
        for node in siblings {
            match node {
                Node::Action(action) => actions.push((*action).clone()),
                Node::Message(_) => {
                    return Err(GraphError::MixedBranch {
                        after: after.clone(),
                    });
                }
            }
        }
        Ok(ActionGroup::new(actions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MessageNode;
    use crate::store::InMemoryStateStore;

    fn message(id: &str) -> Node {
        MessageNode::builder(id).text(id).build().unwrap().into()
    }

    fn action(id: &str, order: u32) -> Node {
        ActionNode::builder(id)
            .text(id)
            .order(order)
            .build()
            .unwrap()
            .into()
    }

    fn traversal(build: impl FnOnce(&mut FlowGraph)) -> Traversal {
        let mut g = FlowGraph::new();
        build(&mut g);
        Traversal::new(Arc::new(g))
    }

    #[test]
    fn empty_frontier_is_done() {
        let t = traversal(|g| g.register_node(message("a")));
        assert!(matches!(t.advance(&"a".into()).unwrap(), Step::Done));
    }

    #[test]
    fn single_message_edge_is_at_node() {
        let t = traversal(|g| {
            g.register_node(message("a"));
            g.register_node(message("b"));
            g.register_edge(&"b".into(), &"a".into()).unwrap();
        });
        match t.advance(&"a".into()).unwrap() {
            Step::AtNode(n) => assert_eq!(n.id().as_str(), "b"),
            other => panic!("expected AtNode, got {other:?}"),
        }
    }

    #[test]
    /// A lone action still presents as a (singleton) branch.
    fn single_action_edge_wraps_as_branch() {
        let t = traversal(|g| {
            g.register_node(message("a"));
            g.register_node(action("x", 0));
            g.register_edge(&"x".into(), &"a".into()).unwrap();
        });
        match t.advance(&"a".into()).unwrap() {
            Step::AtBranch(group) => {
                assert_eq!(group.len(), 1);
                assert!(group.contains(&"x".into()));
            }
            other => panic!("expected AtBranch, got {other:?}"),
        }
    }

    #[test]
    fn multi_edge_frontier_must_be_all_actions() {
        let t = traversal(|g| {
            g.register_node(message("a"));
            g.register_node(action("x", 0));
            g.register_node(message("m"));
            g.register_edge(&"x".into(), &"a".into()).unwrap();
            g.register_edge(&"m".into(), &"a".into()).unwrap();
        });
        let err = t.advance(&"a".into()).unwrap_err();
        assert!(matches!(err, GraphError::MixedBranch { .. }));
    }

    #[test]
    fn branch_is_sorted_by_rank() {
        let t = traversal(|g| {
            g.register_node(message("a"));
            g.register_node(action("late", 5));
            g.register_node(action("early", 1));
            g.register_edge(&"late".into(), &"a".into()).unwrap();
            g.register_edge(&"early".into(), &"a".into()).unwrap();
        });
        match t.advance(&"a".into()).unwrap() {
            Step::AtBranch(group) => {
                let ids: Vec<&str> = group.iter().map(|a| a.id().as_str()).collect();
                assert_eq!(ids, ["early", "late"]);
            }
            other => panic!("expected AtBranch, got {other:?}"),
        }
    }

    #[test]
    fn tracked_exit_rejects_action_fan_out() {
        let t = traversal(|g| {
            g.register_node(action("x", 0));
            g.register_node(message("m1"));
            g.register_node(message("m2"));
            g.register_edge(&"m1".into(), &"x".into()).unwrap();
            g.register_edge(&"m2".into(), &"x".into()).unwrap();
        });
        let x = ActionNode::builder("x").text("x").build().unwrap();
        let err = t.tracked_exit(&x).unwrap_err();
        assert!(matches!(err, GraphError::ActionFanOut { .. }));
    }

    #[test]
    fn tracked_exit_rejects_action_to_action() {
        let t = traversal(|g| {
            g.register_node(action("x", 0));
            g.register_node(action("y", 0));
            g.register_edge(&"y".into(), &"x".into()).unwrap();
        });
        let x = ActionNode::builder("x").text("x").build().unwrap();
        let err = t.tracked_exit(&x).unwrap_err();
        assert!(matches!(err, GraphError::ActionToAction { .. }));
    }

    #[test]
    /// Pointer at root with nothing visited replays nothing.
    fn replay_at_root_is_empty() {
        let t = traversal(|g| {
            g.register_node(message("a"));
            g.register_node(message("b"));
            g.register_edge(&"b".into(), &"a".into()).unwrap();
        });
        let store = InMemoryStateStore::new();
        let items = t
            .replay(&"a".into(), &"a".into(), &FxHashSet::default(), &store)
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    /// Chain a->b->c with pointer c replays [b, c].
    fn replay_walks_a_chain() {
        let t = traversal(|g| {
            g.register_node(message("a"));
            g.register_node(message("b"));
            g.register_node(message("c"));
            g.register_edge(&"b".into(), &"a".into()).unwrap();
            g.register_edge(&"c".into(), &"b".into()).unwrap();
        });
        let store = InMemoryStateStore::new();
        let items = t
            .replay(&"a".into(), &"c".into(), &FxHashSet::default(), &store)
            .unwrap();
        let ids: Vec<&str> = items
            .iter()
            .map(|i| i.node_id().unwrap().as_str())
            .collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    /// A branch is crossed through the visited sibling, substituting its
    /// feedback message for the prompt.
    fn replay_crosses_branch_through_visited() {
        let t = traversal(|g| {
            g.register_node(message("a"));
            g.register_node(action("x", 0));
            g.register_node(action("y", 1));
            g.register_node(message("m"));
            g.register_edge(&"x".into(), &"a".into()).unwrap();
            g.register_edge(&"y".into(), &"a".into()).unwrap();
            g.register_edge(&"m".into(), &"y".into()).unwrap();
        });
        let store = InMemoryStateStore::new();
        let mut visited = FxHashSet::default();
        visited.insert("y".to_owned());
        let items = t
            .replay(&"a".into(), &"m".into(), &visited, &store)
            .unwrap();
        let ids: Vec<&str> = items
            .iter()
            .map(|i| i.node_id().unwrap().as_str())
            .collect();
        assert_eq!(ids, ["y.feedback", "m"]);
    }

    #[test]
    /// An unresolvable branch (no visited sibling) stops the replay early.
    fn replay_stops_at_unvisited_branch() {
        let t = traversal(|g| {
            g.register_node(message("a"));
            g.register_node(action("x", 0));
            g.register_node(action("y", 1));
            g.register_node(message("m"));
            g.register_edge(&"x".into(), &"a".into()).unwrap();
            g.register_edge(&"y".into(), &"a".into()).unwrap();
            g.register_edge(&"m".into(), &"x".into()).unwrap();
        });
        let store = InMemoryStateStore::new();
        let items = t
            .replay(&"a".into(), &"m".into(), &FxHashSet::default(), &store)
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn choose_rejects_non_members() {
        let t = traversal(|g| g.register_node(message("a")));
        let group = ActionGroup::new(vec![ActionNode::builder("x").text("x").build().unwrap()]);
        assert!(t.choose(&group, &"x".into()).is_ok());
        let err = t.choose(&group, &"z".into()).unwrap_err();
        assert!(matches!(err, GraphError::NotFound { .. }));
    }
}
