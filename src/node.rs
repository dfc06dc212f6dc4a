//! Node model for the conversational flow graph.
//!
//! This module defines the vertex vocabulary of a flow: plain chat messages,
//! user-choosable actions, and ordered groups of sibling actions presented as
//! a branch. Nodes carry stable string identity; equality and hashing go
//! through the id so the same logical node can be registered, persisted, and
//! recognized across process restarts.
//!
//! # Examples
//!
//! ```
//! use chatflow::node::{ActionNode, MessageNode};
//!
//! let greeting = MessageNode::builder("greeting")
//!     .text("Hello! How can I help you today?")
//!     .aloud(true)
//!     .build()
//!     .unwrap();
//!
//! let yes = ActionNode::builder("yes")
//!     .text("Yes, please")
//!     .order(0)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(greeting.id().as_str(), "greeting");
//! assert_eq!(yes.build_feedback().text(), Some("Yes, please"));
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StateStore;

/// Stable identity of a node within a flow graph.
///
/// Identity is host-supplied and must be unique per graph. All equality,
/// hashing, and persistence of nodes is keyed by this id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Callback run once a message node has been presented.
pub type OnLoaded = Arc<dyn Fn() + Send + Sync>;

/// Side effect run when an action is selected, before the flow resumes.
pub type OnSelected = Arc<dyn Fn(&ActionNode) + Send + Sync>;

/// Custom sub-state an action can persist and restore against the
/// key-value store, alongside the flow's own two entries.
pub trait ActionState: Send + Sync {
    fn save(&self, store: &mut dyn StateStore);
    fn restore(&self, store: &dyn StateStore);
}

/// Validation failures when constructing nodes.
///
/// Construction is the only place node shape is checked; traversal assumes
/// built nodes are well formed.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeConfigError {
    /// A message was built with neither text nor an image payload.
    #[error("message \"{id}\" has no payload: set text or image")]
    #[diagnostic(
        code(chatflow::node::missing_payload),
        help("At least one of text or image must be set on a message.")
    )]
    MissingPayload { id: NodeId },

    /// An action was built without prompt text.
    #[error("action \"{id}\" has no text")]
    #[diagnostic(
        code(chatflow::node::missing_text),
        help("Actions are presented and recognized by their text; set it.")
    )]
    MissingText { id: NodeId },
}

// ============================================================================
// Message nodes
// ============================================================================

/// A presentational chat message.
///
/// Opaque to the engine beyond "has text" (used for speech synthesis) and
/// "has a completion callback". Presentation details such as the image
/// payload travel through untouched for the rendering layer.
#[derive(Clone)]
pub struct MessageNode {
    id: NodeId,
    text: Option<String>,
    image: Option<String>,
    aloud: bool,
    shown_as_head: bool,
    shown_as_action: bool,
    on_loaded: Option<OnLoaded>,
}

impl MessageNode {
    /// Start building a message with the given id.
    #[must_use]
    pub fn builder(id: impl Into<NodeId>) -> MessageBuilder {
        MessageBuilder {
            id: id.into(),
            text: None,
            image: None,
            aloud: false,
            shown_as_head: false,
            shown_as_action: false,
            on_loaded: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    #[must_use]
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    #[must_use]
    pub fn aloud(&self) -> bool {
        self.aloud
    }

    #[must_use]
    pub fn shown_as_head(&self) -> bool {
        self.shown_as_head
    }

    #[must_use]
    pub fn shown_as_action(&self) -> bool {
        self.shown_as_action
    }

    /// Text to hand to a synthesizer, if this message is marked aloud.
    #[must_use]
    pub fn speakable_text(&self) -> Option<&str> {
        if self.aloud { self.text() } else { None }
    }

    /// Run the completion callback, if any.
    pub fn notify_loaded(&self) {
        if let Some(cb) = &self.on_loaded {
            cb();
        }
    }
}

impl fmt::Debug for MessageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageNode")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("aloud", &self.aloud)
            .field("on_loaded", &self.on_loaded.is_some())
            .finish_non_exhaustive()
    }
}

impl PartialEq for MessageNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageNode {}

impl Hash for MessageNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Builder for [`MessageNode`], validated at [`build`](MessageBuilder::build).
pub struct MessageBuilder {
    id: NodeId,
    text: Option<String>,
    image: Option<String>,
    aloud: bool,
    shown_as_head: bool,
    shown_as_action: bool,
    on_loaded: Option<OnLoaded>,
}

impl MessageBuilder {
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Opaque image payload for the rendering layer.
    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Mark this message for speech synthesis when presented.
    #[must_use]
    pub fn aloud(mut self, aloud: bool) -> Self {
        self.aloud = aloud;
        self
    }

    #[must_use]
    pub fn shown_as_head(mut self, head: bool) -> Self {
        self.shown_as_head = head;
        self
    }

    #[must_use]
    pub fn shown_as_action(mut self, as_action: bool) -> Self {
        self.shown_as_action = as_action;
        self
    }

    #[must_use]
    pub fn on_loaded(mut self, cb: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_loaded = Some(Arc::new(cb));
        self
    }

    /// Validate and build. A message must carry at least text or an image.
    pub fn build(self) -> Result<MessageNode, NodeConfigError> {
        if self.text.as_deref().is_none_or(str::is_empty) && self.image.is_none() {
            return Err(NodeConfigError::MissingPayload { id: self.id });
        }
        Ok(MessageNode {
            id: self.id,
            text: self.text,
            image: self.image,
            aloud: self.aloud,
            shown_as_head: self.shown_as_head,
            shown_as_action: self.shown_as_action,
            on_loaded: self.on_loaded,
        })
    }
}

// ============================================================================
// Action nodes
// ============================================================================

/// A user-choosable option.
///
/// Actions appear inside a branch ([`ActionGroup`]); choosing one substitutes
/// the branch prompt with the action's feedback message and resumes the flow.
/// `order` is the comparable rank driving both display order and resume
/// disambiguation, so replay stays deterministic.
#[derive(Clone)]
pub struct ActionNode {
    id: NodeId,
    text: String,
    order: u32,
    stop_flow: bool,
    skip_tracking: bool,
    on_selected: Option<OnSelected>,
    state_handler: Option<Arc<dyn ActionState>>,
}

impl ActionNode {
    /// Start building an action with the given id.
    #[must_use]
    pub fn builder(id: impl Into<NodeId>) -> ActionBuilder {
        ActionBuilder {
            id: id.into(),
            text: None,
            order: 0,
            stop_flow: false,
            skip_tracking: false,
            on_selected: None,
            state_handler: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Whether choosing this action halts automatic flow continuation.
    #[must_use]
    pub fn stops_flow(&self) -> bool {
        self.stop_flow
    }

    /// Whether this action is excluded from visited tracking.
    #[must_use]
    pub fn skips_tracking(&self) -> bool {
        self.skip_tracking
    }

    /// Feedback message substituted for the branch prompt once chosen.
    #[must_use]
    pub fn build_feedback(&self) -> MessageNode {
        MessageNode {
            id: NodeId::new(format!("{}.feedback", self.id)),
            text: Some(self.text.clone()),
            image: None,
            aloud: false,
            shown_as_head: false,
            shown_as_action: true,
            on_loaded: None,
        }
    }

    /// Run the selection side effect, if any.
    pub fn notify_selected(&self) {
        if let Some(cb) = &self.on_selected {
            cb(self);
        }
    }

    /// Persist this action's custom sub-state, if it has one.
    pub fn save_state(&self, store: &mut dyn StateStore) {
        if let Some(handler) = &self.state_handler {
            handler.save(store);
        }
    }

    /// Restore this action's custom sub-state, if it has one.
    pub fn restore_state(&self, store: &dyn StateStore) {
        if let Some(handler) = &self.state_handler {
            handler.restore(store);
        }
    }
}

impl fmt::Debug for ActionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionNode")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("order", &self.order)
            .field("stop_flow", &self.stop_flow)
            .field("skip_tracking", &self.skip_tracking)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ActionNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ActionNode {}

impl Hash for ActionNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Builder for [`ActionNode`], validated at [`build`](ActionBuilder::build).
pub struct ActionBuilder {
    id: NodeId,
    text: Option<String>,
    order: u32,
    stop_flow: bool,
    skip_tracking: bool,
    on_selected: Option<OnSelected>,
    state_handler: Option<Arc<dyn ActionState>>,
}

impl ActionBuilder {
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Rank among siblings; lower shows first and wins resume ties.
    #[must_use]
    pub fn order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    /// Selecting this action stops the flow until the host calls `next`.
    #[must_use]
    pub fn stop_flow(mut self, stop: bool) -> Self {
        self.stop_flow = stop;
        self
    }

    /// Exclude this action from the persisted visited set and pointer.
    #[must_use]
    pub fn skip_tracking(mut self, skip: bool) -> Self {
        self.skip_tracking = skip;
        self
    }

    #[must_use]
    pub fn on_selected(mut self, cb: impl Fn(&ActionNode) + Send + Sync + 'static) -> Self {
        self.on_selected = Some(Arc::new(cb));
        self
    }

    #[must_use]
    pub fn state_handler(mut self, handler: Arc<dyn ActionState>) -> Self {
        self.state_handler = Some(handler);
        self
    }

    /// Validate and build. Prompt text is required.
    pub fn build(self) -> Result<ActionNode, NodeConfigError> {
        let Some(text) = self.text.filter(|t| !t.is_empty()) else {
            return Err(NodeConfigError::MissingText { id: self.id });
        };
        Ok(ActionNode {
            id: self.id,
            text,
            order: self.order,
            stop_flow: self.stop_flow,
            skip_tracking: self.skip_tracking,
            on_selected: self.on_selected,
            state_handler: self.state_handler,
        })
    }
}

// ============================================================================
// Tagged vertex and groups
// ============================================================================

/// Closed set of vertex kinds held by the graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Node {
    Message(MessageNode),
    Action(ActionNode),
}

impl Node {
    #[must_use]
    pub fn id(&self) -> &NodeId {
        match self {
            Node::Message(m) => m.id(),
            Node::Action(a) => a.id(),
        }
    }

    #[must_use]
    pub fn is_action(&self) -> bool {
        matches!(self, Node::Action(_))
    }

    #[must_use]
    pub fn as_action(&self) -> Option<&ActionNode> {
        match self {
            Node::Action(a) => Some(a),
            Node::Message(_) => None,
        }
    }
}

impl From<MessageNode> for Node {
    fn from(m: MessageNode) -> Self {
        Node::Message(m)
    }
}

impl From<ActionNode> for Node {
    fn from(a: ActionNode) -> Self {
        Node::Action(a)
    }
}

/// Ordered sibling actions sharing one predecessor, presented as mutually
/// exclusive choices.
///
/// Construction sorts by `(order, id)`; that single total order drives both
/// display and resume disambiguation.
#[derive(Clone, Debug)]
pub struct ActionGroup {
    actions: Vec<ActionNode>,
}

impl ActionGroup {
    #[must_use]
    pub fn new(mut actions: Vec<ActionNode>) -> Self {
        actions.sort_by(|a, b| {
            a.order()
                .cmp(&b.order())
                .then_with(|| a.id().cmp(b.id()))
        });
        Self { actions }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionNode> {
        self.actions.iter()
    }

    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&ActionNode> {
        self.actions.iter().find(|a| a.id() == id)
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.get(id).is_some()
    }

    /// The lowest-ranked member whose id is in the persisted visited set.
    ///
    /// Deliberately insensitive to recency: if several siblings were ever
    /// visited, replay always converges on the lowest rank, which is what
    /// keeps resume reproducible.
    #[must_use]
    pub fn visited_in(&self, visited: &FxHashSet<String>) -> Option<&ActionNode> {
        self.actions
            .iter()
            .find(|a| visited.contains(a.id().as_str()))
    }
}

impl PartialEq for ActionGroup {
    fn eq(&self, other: &Self) -> bool {
        self.actions
            .iter()
            .map(ActionNode::id)
            .eq(other.actions.iter().map(ActionNode::id))
    }
}

impl Eq for ActionGroup {}

/// What the rendering layer receives, in display order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayItem {
    /// A plain node: message, or a raw action replayed at the resume point.
    Node(Node),
    /// A branch prompt awaiting a choice.
    Branch(ActionGroup),
    /// Transient loading placeholder; at most one exists at a time.
    Loading,
}

impl DisplayItem {
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            DisplayItem::Node(n) => Some(n.id()),
            DisplayItem::Branch(_) | DisplayItem::Loading => None,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, DisplayItem::Loading)
    }
}
