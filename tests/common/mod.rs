//! Shared fixtures and helpers for the integration suite.

use std::sync::{Arc, Mutex};

use chatflow::display::FlowEvent;
use chatflow::node::{ActionGroup, ActionNode, DisplayItem, MessageNode, Node};
use chatflow::store::{InMemoryStateStore, StateStore};

pub fn message(id: &str, text: &str) -> Node {
    MessageNode::builder(id).text(text).build().unwrap().into()
}

pub fn aloud_message(id: &str, text: &str) -> Node {
    MessageNode::builder(id)
        .text(text)
        .aloud(true)
        .build()
        .unwrap()
        .into()
}

pub fn action(id: &str, text: &str, order: u32) -> Node {
    ActionNode::builder(id)
        .text(text)
        .order(order)
        .build()
        .unwrap()
        .into()
}

/// Store handle that survives a released flow, so a second run can resume
/// from what the first persisted.
#[derive(Clone, Default)]
pub struct SharedStore(Arc<Mutex<InMemoryStateStore>>);

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for SharedStore {
    fn get(&self, key: &str) -> Option<String> {
        self.0.lock().unwrap().get(key)
    }

    fn put(&mut self, key: &str, value: &str) {
        self.0.lock().unwrap().put(key, value);
    }

    fn remove(&mut self, key: &str) {
        self.0.lock().unwrap().remove(key);
    }
}

pub fn appended_id(event: &FlowEvent) -> Option<String> {
    match event {
        FlowEvent::Append(item) => item.node_id().map(|id| id.as_str().to_owned()),
        _ => None,
    }
}

pub async fn next_event(rx: &flume::Receiver<FlowEvent>) -> FlowEvent {
    rx.recv_async().await.expect("flow event stream ended")
}

/// Receive the next event and require it to append the node with `id`.
pub async fn expect_append(rx: &flume::Receiver<FlowEvent>, id: &str) {
    let event = next_event(rx).await;
    match appended_id(&event) {
        Some(appended) => assert_eq!(appended, id),
        None => panic!("expected append of {id:?}, got {event:?}"),
    }
}

/// Receive the next event and require it to present a branch.
pub async fn expect_branch(rx: &flume::Receiver<FlowEvent>) -> ActionGroup {
    match next_event(rx).await {
        FlowEvent::Append(DisplayItem::Branch(group)) => group,
        other => panic!("expected a branch prompt, got {other:?}"),
    }
}
