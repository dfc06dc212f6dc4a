//! Host-facing display events and sinks.
//!
//! The controller mutates the host's display sequence through a small event
//! vocabulary instead of owning any rendering: append an item, remove the
//! item at a position, and the terminal one-time done notification. Sinks
//! receive every event in order on the owning context.

use thiserror::Error;

use crate::node::DisplayItem;

/// Mutation of the host's display sequence, plus terminal notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowEvent {
    /// Append an item at the end of the display sequence.
    Append(DisplayItem),
    /// Remove the item at the given position.
    RemoveAt(usize),
    /// The flow reached an empty frontier. Fired at most once per start.
    Done,
    /// A fatal error stopped the flow; the host should release.
    Failed { message: String },
}

/// A sink failed to accept an event (e.g. its channel disconnected).
#[derive(Debug, Error)]
#[error("display sink disconnected")]
pub struct SinkError;

/// Receives flow events in order.
///
/// Handlers run on the flow's owning context; keep them cheap and marshal
/// to a rendering thread if needed.
pub trait DisplaySink: Send {
    fn handle(&mut self, event: &FlowEvent) -> Result<(), SinkError>;
}

/// Sink that forwards events into a flume channel, for hosts that consume
/// the display sequence asynchronously (and for tests).
pub struct ChannelSink {
    tx: flume::Sender<FlowEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: flume::Sender<FlowEvent>) -> Self {
        Self { tx }
    }
}

impl DisplaySink for ChannelSink {
    fn handle(&mut self, event: &FlowEvent) -> Result<(), SinkError> {
        self.tx.send(event.clone()).map_err(|_| SinkError)
    }
}
