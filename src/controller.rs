//! Flow controller: composes graph, traversal, pacing, persistence, and
//! speech behind a small host-facing handle.
//!
//! # Ownership model
//!
//! All mutable flow state (current position, last action, timers, phase)
//! lives inside one spawned task. The public [`FlowController`] handle only
//! enqueues commands over a flume channel, so no host call ever blocks and
//! no two callbacks can mutate engine state concurrently. Timer deadlines
//! are arms of the task's `select!` loop rather than free-running tasks,
//! which makes `pause` atomic: once the command is processed, no due time
//! is exposed and nothing can fire. Speech completions are marshaled back
//! as commands tagged with an epoch counter; completions from a superseded
//! epoch (perform, release) are discarded.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatflow::controller::FlowController;
//! use chatflow::display::ChannelSink;
//! use chatflow::graph::FlowGraph;
//! use chatflow::node::MessageNode;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = FlowGraph::new();
//! let hello = MessageNode::builder("hello").text("Hi!").build()?;
//! graph.register_node(hello.into());
//!
//! let (tx, rx) = flume::unbounded();
//! let flow = FlowController::builder(Arc::new(graph))
//!     .sink(ChannelSink::new(tx))
//!     .spawn();
//!
//! flow.start("hello");
//! while let Ok(event) = rx.recv_async().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::{debug, instrument, warn};

use crate::display::{DisplaySink, FlowEvent};
use crate::graph::{FlowGraph, GraphError};
use crate::node::{ActionGroup, ActionNode, DisplayItem, Node, NodeId};
use crate::pacing::{DEFAULT_LOADING_THRESHOLD, DEFAULT_SHOW_DELAY, PacingScheduler};
use crate::speech::SpeechCoordinator;
use crate::store::{InMemoryStateStore, StateStore, VisitedLog};
use crate::traversal::{Step, Traversal};

/// Tunables for a flow run.
#[derive(Clone, Debug)]
pub struct FlowConfig {
    /// Delay before each scheduled node is shown.
    pub show_delay: Duration,
    /// Threshold after which the loading placeholder appears.
    pub loading_threshold: Duration,
    /// Persist the resume pointer and visited set. When off, every start
    /// begins at the root and nothing is recorded.
    pub persist_position: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            show_delay: DEFAULT_SHOW_DELAY,
            loading_threshold: DEFAULT_LOADING_THRESHOLD,
            persist_position: true,
        }
    }
}

impl FlowConfig {
    #[must_use]
    pub fn with_show_delay(mut self, delay: Duration) -> Self {
        self.show_delay = delay;
        self
    }

    #[must_use]
    pub fn with_loading_threshold(mut self, threshold: Duration) -> Self {
        self.loading_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_persist_position(mut self, persist: bool) -> Self {
        self.persist_position = persist;
        self
    }
}

/// Lifecycle of a flow. `Failed` and `Released` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Paused,
    Done,
    /// A fatal error stopped the flow; only release remains meaningful.
    Failed,
    Released,
}

/// Point-in-time view of the flow state, for hosts and tests.
#[derive(Clone, Debug)]
pub struct FlowSnapshot {
    pub phase: Phase,
    /// Current node id, when positioned at a single node.
    pub position: Option<NodeId>,
    /// Whether a branch prompt is currently awaiting a choice.
    pub at_branch: bool,
    /// Number of items in the display sequence.
    pub display_len: usize,
    /// Absolute due time of the pending show, when armed and not paused.
    pub pending_show_due: Option<Instant>,
}

enum Command {
    Start(NodeId),
    Next,
    Perform(NodeId),
    Pause,
    Resume,
    Release,
    ClearSaved,
    SpeakDone { epoch: u64 },
    Recognized { epoch: u64, chosen: Option<NodeId> },
    Inspect(oneshot::Sender<FlowSnapshot>),
}

/// Host-facing handle to a running flow. Cheap to clone; every method is
/// non-blocking and marshals onto the flow's owning task.
#[derive(Clone, Debug)]
pub struct FlowController {
    tx: flume::Sender<Command>,
}

impl FlowController {
    /// Start building a controller over a finished graph.
    #[must_use]
    pub fn builder(graph: Arc<FlowGraph>) -> FlowControllerBuilder {
        FlowControllerBuilder {
            graph,
            store: None,
            speech: SpeechCoordinator::disabled(),
            sinks: Vec::new(),
            config: FlowConfig::default(),
        }
    }

    /// Begin (or resume) the flow from `root`.
    ///
    /// The persisted pointer is consulted, the path from root to it is
    /// replayed without pacing, and presentation continues from there.
    #[instrument(skip(self))]
    pub fn start(&self, root: impl Into<NodeId> + std::fmt::Debug) {
        self.send(Command::Start(root.into()));
    }

    /// Advance past the current node. Invoked automatically after
    /// non-branch nodes unless speech defers it; hosts call it after a
    /// stop-flow action.
    pub fn next(&self) {
        self.send(Command::Next);
    }

    /// Choose an action of the currently displayed branch.
    #[instrument(skip(self))]
    pub fn perform(&self, action: impl Into<NodeId> + std::fmt::Debug) {
        self.send(Command::Perform(action.into()));
    }

    /// Suspend pacing and speech. No item is displayed and no advance
    /// happens until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    /// Re-arm a paused flow for the remaining pacing time.
    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Tear the flow down: cancel timers, stop speech, detach the store.
    /// Terminal and idempotent.
    pub fn release(&self) {
        self.send(Command::Release);
    }

    /// Forget the persisted position (both store entries).
    pub fn clear_saved_state(&self) {
        self.send(Command::ClearSaved);
    }

    /// Inspect current flow state. Returns `None` once released.
    pub async fn snapshot(&self) -> Option<FlowSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Inspect(tx)).ok()?;
        rx.await.ok()
    }

    fn send(&self, cmd: Command) {
        if self.tx.send(cmd).is_err() {
            debug!("flow already released; command dropped");
        }
    }
}

/// Builder wiring collaborators into a [`FlowController`].
pub struct FlowControllerBuilder {
    graph: Arc<FlowGraph>,
    store: Option<Box<dyn StateStore>>,
    speech: SpeechCoordinator,
    sinks: Vec<Box<dyn DisplaySink>>,
    config: FlowConfig,
}

impl FlowControllerBuilder {
    /// Persistent key-value store; defaults to [`InMemoryStateStore`].
    #[must_use]
    pub fn store(mut self, store: Box<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn speech(mut self, speech: SpeechCoordinator) -> Self {
        self.speech = speech;
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: impl DisplaySink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    #[must_use]
    pub fn config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the owning task and return the handle.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn spawn(self) -> FlowController {
        let (tx, rx) = flume::unbounded();
        let store = self
            .store
            .unwrap_or_else(|| Box::new(InMemoryStateStore::new()));
        let task = FlowTask {
            traversal: Traversal::new(self.graph),
            visited: VisitedLog::new(store),
            speech: self.speech,
            sinks: self.sinks,
            pacing: PacingScheduler::new(self.config.loading_threshold),
            config: self.config,
            phase: Phase::Idle,
            position: None,
            last_action: None,
            display_len: 0,
            loading_at: None,
            epoch: 0,
            deferred_next: false,
            done_notified: false,
            tx: tx.clone(),
            rx,
        };
        tokio::spawn(task.run());
        FlowController { tx }
    }
}

enum Position {
    At(NodeId),
    Branch(ActionGroup),
}

struct FlowTask {
    traversal: Traversal,
    visited: VisitedLog,
    speech: SpeechCoordinator,
    sinks: Vec<Box<dyn DisplaySink>>,
    pacing: PacingScheduler,
    config: FlowConfig,
    phase: Phase,
    position: Option<Position>,
    last_action: Option<ActionNode>,
    display_len: usize,
    loading_at: Option<usize>,
    epoch: u64,
    deferred_next: bool,
    done_notified: bool,
    tx: flume::Sender<Command>,
    rx: flume::Receiver<Command>,
}

impl FlowTask {
    async fn run(mut self) {
        debug!("flow task started");
        loop {
            let show_due = self.pacing.show_due();
            let loading_due = self.pacing.loading_due();
            tokio::select! {
                // Commands win over simultaneously-ready timers, so a pause
                // processed in this iteration suppresses the timer.
                biased;
                cmd = self.rx.recv_async() => match cmd {
                    Ok(cmd) => {
                        if self.handle(cmd).is_break() {
                            break;
                        }
                    }
                    // Every handle dropped; tear down like a release.
                    Err(_) => break,
                },
                () = sleep_until(show_due.unwrap_or_else(Instant::now)),
                    if show_due.is_some() => self.on_show_timer(),
                () = sleep_until(loading_due.unwrap_or_else(Instant::now)),
                    if loading_due.is_some() => self.on_loading_timer(),
            }
        }
        debug!("flow task stopped");
    }

    fn handle(&mut self, cmd: Command) -> ControlFlow<()> {
        match cmd {
            Command::Start(root) => self.on_start(root),
            Command::Next => {
                if self.phase == Phase::Running {
                    self.advance_flow();
                } else {
                    warn!(phase = ?self.phase, "next ignored outside Running");
                }
            }
            Command::Perform(chosen) => self.on_perform(chosen),
            Command::Pause => self.on_pause(),
            Command::Resume => self.on_resume(),
            Command::Release => {
                self.on_release();
                return ControlFlow::Break(());
            }
            Command::ClearSaved => self.visited.clear(),
            Command::SpeakDone { epoch } => self.on_speak_done(epoch),
            Command::Recognized { epoch, chosen } => self.on_recognized(epoch, chosen),
            Command::Inspect(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
        ControlFlow::Continue(())
    }

    fn on_start(&mut self, root: NodeId) {
        if self.phase != Phase::Idle {
            warn!(phase = ?self.phase, "start ignored outside Idle");
            return;
        }
        let root_node = match self.traversal.graph().lookup_by_id(&root) {
            Ok(node) => node.clone(),
            Err(error) => return self.fail(error),
        };
        let target = if self.config.persist_position {
            self.visited.last_visited(&root)
        } else {
            root.clone()
        };
        if let Err(error) = self.traversal.graph().lookup_by_id(&target) {
            return self.fail(error);
        }
        debug!(%root, %target, "starting flow");
        self.phase = Phase::Running;
        self.append(DisplayItem::Node(root_node));
        let visited_set = self.visited.visited_ids();
        let replayed =
            match self
                .traversal
                .replay(&root, &target, &visited_set, self.visited.store())
            {
                Ok(items) => items,
                Err(error) => return self.fail(error),
            };
        for item in replayed {
            self.append(item);
        }
        self.position = Some(Position::At(target));
        self.advance_flow();
    }

    /// Compute and schedule the next frontier from the current position.
    fn advance_flow(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        if let Err(error) = self.track_last_action() {
            return self.fail(error);
        }
        match &self.position {
            None => {}
            Some(Position::Branch(_)) => {
                // A branch is showing; nothing advances until a choice is
                // made, and that is not a "done" condition.
                self.hide_loading();
            }
            Some(Position::At(current)) => {
                let current = current.clone();
                match self.traversal.advance(&current) {
                    Ok(Step::Done) => self.finish(),
                    Ok(Step::AtNode(node)) => self.pacing.schedule(
                        DisplayItem::Node(node),
                        self.config.show_delay,
                        Instant::now(),
                    ),
                    Ok(Step::AtBranch(group)) => self.pacing.schedule(
                        DisplayItem::Branch(group),
                        self.config.show_delay,
                        Instant::now(),
                    ),
                    Err(error) => self.fail(error),
                }
            }
        }
    }

    /// Persist the pointer past the last chosen action, validating its
    /// exit shape on the way.
    fn track_last_action(&mut self) -> Result<(), GraphError> {
        let Some(action) = self.last_action.clone() else {
            return Ok(());
        };
        if action.skips_tracking() {
            return Ok(());
        }
        if let Some(next_id) = self.traversal.tracked_exit(&action)?
            && self.config.persist_position
        {
            self.visited.set_last_visited(&next_id);
        }
        Ok(())
    }

    fn on_show_timer(&mut self) {
        let Some(item) = self.pacing.take_pending_show() else {
            return;
        };
        self.hide_loading();
        self.append(item.clone());
        match item {
            DisplayItem::Node(Node::Message(message)) => {
                self.position = Some(Position::At(message.id().clone()));
                message.notify_loaded();
                let epoch = self.epoch;
                let tx = self.tx.clone();
                let speak = self.speech.try_speak(&message, move || {
                    let _ = tx.send(Command::SpeakDone { epoch });
                });
                match speak {
                    Ok(true) => self.pacing.arm_loading(Instant::now()),
                    Ok(false) => self.advance_flow(),
                    Err(error) => self.fail(error),
                }
            }
            DisplayItem::Branch(group) => {
                self.position = Some(Position::Branch(group.clone()));
                let epoch = self.epoch;
                let tx = self.tx.clone();
                let listen = self.speech.try_listen(&group, move |chosen| {
                    let _ = tx.send(Command::Recognized { epoch, chosen });
                });
                if let Err(error) = listen {
                    self.fail(error);
                }
                // Never advance automatically past a branch.
            }
            DisplayItem::Node(Node::Action(_)) | DisplayItem::Loading => {}
        }
    }

    fn on_loading_timer(&mut self) {
        self.pacing.take_loading_deadline();
        if self.loading_at.is_none() {
            self.append(DisplayItem::Loading);
            self.loading_at = Some(self.display_len - 1);
        }
    }

    fn hide_loading(&mut self) {
        self.pacing.disarm_loading();
        if let Some(position) = self.loading_at.take() {
            self.emit(&FlowEvent::RemoveAt(position));
            self.display_len -= 1;
        }
    }

    fn on_perform(&mut self, chosen: NodeId) {
        if self.phase != Phase::Running {
            warn!(phase = ?self.phase, %chosen, "perform ignored outside Running");
            return;
        }
        let group = match &self.position {
            Some(Position::Branch(group)) => group.clone(),
            _ => {
                warn!(%chosen, "perform outside a branch; ignoring");
                return;
            }
        };
        let action = match self.traversal.choose(&group, &chosen) {
            Ok(action) => action.clone(),
            Err(error) => return self.fail(error),
        };
        debug!(id = %action.id(), "action performed");
        // Supersede in-flight recognition and synthesis.
        self.epoch += 1;
        self.speech.stop();
        action.notify_selected();
        if action.stops_flow() {
            self.position = Some(Position::At(action.id().clone()));
            self.last_action = Some(action);
            return;
        }
        if !action.skips_tracking() && self.config.persist_position {
            self.visited.record_visited(&action);
        }
        // Swap the branch prompt for the chosen action's feedback.
        if self.display_len > 0 {
            self.emit(&FlowEvent::RemoveAt(self.display_len - 1));
            self.display_len -= 1;
        }
        action.restore_state(self.visited.store());
        self.append(DisplayItem::Node(Node::Message(action.build_feedback())));
        self.position = Some(Position::At(action.id().clone()));
        self.last_action = Some(action);
        self.advance_flow();
    }

    fn on_pause(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        debug!("flow paused");
        self.phase = Phase::Paused;
        self.pacing.pause(Instant::now());
        self.speech.stop();
    }

    fn on_resume(&mut self) {
        if self.phase != Phase::Paused {
            return;
        }
        debug!("flow resumed");
        self.phase = Phase::Running;
        self.pacing.resume(Instant::now());
        if std::mem::take(&mut self.deferred_next) {
            self.advance_flow();
        }
    }

    fn on_speak_done(&mut self, epoch: u64) {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "stale synthesis completion");
            return;
        }
        match self.phase {
            Phase::Running => {
                self.hide_loading();
                self.advance_flow();
            }
            // Advance is owed, but deferred until resume.
            Phase::Paused => self.deferred_next = true,
            _ => {}
        }
    }

    fn on_recognized(&mut self, epoch: u64, chosen: Option<NodeId>) {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "stale recognition result");
            return;
        }
        match chosen {
            Some(id) => self.on_perform(id),
            None => debug!("recognition yielded no match"),
        }
    }

    fn finish(&mut self) {
        self.hide_loading();
        self.pacing.cancel();
        self.phase = Phase::Done;
        if !self.done_notified {
            self.done_notified = true;
            self.emit(&FlowEvent::Done);
        }
    }

    fn on_release(&mut self) {
        debug!("releasing flow");
        self.pacing.cancel();
        self.epoch += 1;
        self.speech.stop();
        self.position = None;
        self.last_action = None;
        self.loading_at = None;
        self.display_len = 0;
        self.deferred_next = false;
        self.done_notified = false;
        self.phase = Phase::Released;
        // The run loop breaks after this, dropping the store and sinks.
    }

    /// Stop the flow on a fatal error. Terminal: every later command short
    /// of release is ignored by the phase guards.
    fn fail(&mut self, error: impl std::fmt::Display) {
        tracing::error!(%error, "fatal flow error");
        self.pacing.cancel();
        self.epoch += 1;
        self.speech.stop();
        self.phase = Phase::Failed;
        let message = error.to_string();
        self.emit(&FlowEvent::Failed { message });
    }

    fn append(&mut self, item: DisplayItem) {
        self.display_len += 1;
        self.emit(&FlowEvent::Append(item));
    }

    fn emit(&mut self, event: &FlowEvent) {
        for sink in &mut self.sinks {
            if let Err(error) = sink.handle(event) {
                warn!(%error, "display sink rejected event");
            }
        }
    }

    fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            phase: self.phase,
            position: match &self.position {
                Some(Position::At(id)) => Some(id.clone()),
                _ => None,
            },
            at_branch: matches!(self.position, Some(Position::Branch(_))),
            display_len: self.display_len,
            pending_show_due: self.pacing.show_due(),
        }
    }
}
