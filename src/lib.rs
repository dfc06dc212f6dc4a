//! # Chatflow: Graph-driven Conversational Flow Engine
//!
//! Chatflow runs turn-based conversational interfaces as a directed graph of
//! chat messages and user-choosable actions. The engine owns traversal,
//! human-like pacing, resumable persisted position, and an optional speech
//! bridge; the host owns rendering, storage, and the speech engines.
//!
//! ## Core Concepts
//!
//! - **Nodes**: Messages presented to the user and actions the user chooses
//! - **Graph**: Directed edges between nodes; several actions out of one
//!   node form a branch of mutually exclusive choices
//! - **Traversal**: Frontier computation plus instant replay of the path to
//!   a persisted resume point
//! - **Pacing**: A show delay per node and a loading placeholder when a
//!   step runs long, both pause/resume aware
//! - **Controller**: The single owning task composing all of the above and
//!   emitting display events to sinks
//!
//! ## Quick Start
//!
//! ### Building a flow graph
//!
//! ```
//! use chatflow::graph::FlowGraph;
//! use chatflow::node::{ActionNode, MessageNode};
//!
//! # fn build() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = FlowGraph::new();
//!
//! let greeting = MessageNode::builder("greeting")
//!     .text("Hi! Ready to begin?")
//!     .aloud(true)
//!     .build()?;
//! let yes = ActionNode::builder("yes").text("Yes!").order(0).build()?;
//! let no = ActionNode::builder("no").text("Not yet").order(1).build()?;
//! let onward = MessageNode::builder("onward").text("Great, let's go.").build()?;
//!
//! graph.register_node(greeting.into());
//! graph.register_node(yes.into());
//! graph.register_node(no.into());
//! graph.register_node(onward.into());
//!
//! // Edges read "target follows source".
//! graph.register_edge(&"yes".into(), &"greeting".into())?;
//! graph.register_edge(&"no".into(), &"greeting".into())?;
//! graph.register_edge(&"onward".into(), &"yes".into())?;
//! # Ok(())
//! # }
//! # build().unwrap();
//! ```
//!
//! ### Running it
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatflow::controller::FlowController;
//! use chatflow::display::{ChannelSink, FlowEvent};
//! use chatflow::graph::FlowGraph;
//!
//! # async fn run(graph: FlowGraph) {
//! let (events_tx, events_rx) = flume::unbounded();
//! let flow = FlowController::builder(Arc::new(graph))
//!     .sink(ChannelSink::new(events_tx))
//!     .spawn();
//!
//! flow.start("greeting");
//! while let Ok(event) = events_rx.recv_async().await {
//!     match event {
//!         FlowEvent::Append(item) => println!("show {item:?}"),
//!         FlowEvent::RemoveAt(i) => println!("remove item {i}"),
//!         FlowEvent::Done => break,
//!         FlowEvent::Failed { message } => panic!("{message}"),
//!     }
//! }
//! flow.release();
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`node`] - Messages, actions, groups, and display items
//! - [`graph`] - Node registry and both edge indices
//! - [`traversal`] - Frontier computation, replay, and branch choice
//! - [`store`] - Persisted resume pointer and visited set
//! - [`pacing`] - Show delay and loading-placeholder timers
//! - [`speech`] - Optional synthesis/recognition bridge
//! - [`display`] - Events the host renders from
//! - [`controller`] - The owning task and host-facing handle
//! - [`telemetry`] - Tracing subscriber setup for hosts and demos

pub mod controller;
pub mod display;
pub mod graph;
pub mod node;
pub mod pacing;
pub mod speech;
pub mod store;
pub mod telemetry;
pub mod traversal;
