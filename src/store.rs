//! Persisted visited-state: the "where was the user" record.
//!
//! The flow persists exactly two entries into a host-supplied key-value
//! store: the id of the last visited node (the resume pointer) and the set
//! of visited node ids (branch disambiguation). Actions may additionally
//! persist custom sub-state through [`ActionState`](crate::node::ActionState)
//! under their own keys.
//!
//! Absent entries are normal defaults, never errors: a missing pointer means
//! "start at the root", a missing set means "nothing visited yet".

use rustc_hash::{FxHashMap, FxHashSet};

use crate::node::{ActionNode, NodeId};

/// Key under which the resume pointer is persisted.
pub const LAST_VISITED_KEY: &str = "chatflow.last_visited_node_id";
/// Key under which the visited id set is persisted (JSON string array).
pub const VISITED_SET_KEY: &str = "chatflow.visited_node_ids";

/// Narrow contract over the host's persistent key-value store.
///
/// Implementations only need string round-tripping; the flow does its own
/// encoding. The crate ships [`InMemoryStateStore`] for tests and hosts
/// without durable storage.
pub trait StateStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
}

/// Volatile store, mirroring durable implementations for tests and demos.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: FxHashMap<String, String>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_owned(), value.to_owned());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// The flow's view over a [`StateStore`]: the two flow entries plus access
/// for per-action sub-state.
pub struct VisitedLog {
    store: Box<dyn StateStore>,
}

impl VisitedLog {
    #[must_use]
    pub fn new(store: Box<dyn StateStore>) -> Self {
        Self { store }
    }

    /// The persisted resume pointer, defaulting to `default` when absent.
    #[must_use]
    pub fn last_visited(&self, default: &NodeId) -> NodeId {
        self.store
            .get(LAST_VISITED_KEY)
            .map_or_else(|| default.clone(), NodeId::from)
    }

    pub fn set_last_visited(&mut self, id: &NodeId) {
        self.store.put(LAST_VISITED_KEY, id.as_str());
    }

    /// The persisted visited set; empty when absent. A malformed entry is
    /// logged and treated as empty rather than failing the resume.
    #[must_use]
    pub fn visited_ids(&self) -> FxHashSet<String> {
        let Some(raw) = self.store.get(VISITED_SET_KEY) else {
            return FxHashSet::default();
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(ids) => ids.into_iter().collect(),
            Err(error) => {
                tracing::warn!(%error, "discarding malformed visited set");
                FxHashSet::default()
            }
        }
    }

    /// Record an action as visited and let it persist its sub-state.
    pub fn record_visited(&mut self, action: &ActionNode) {
        let mut ids = self.visited_ids();
        ids.insert(action.id().as_str().to_owned());
        // Sorted for a stable persisted representation.
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort_unstable();
        match serde_json::to_string(&ids) {
            Ok(encoded) => self.store.put(VISITED_SET_KEY, &encoded),
            Err(error) => tracing::warn!(%error, "failed to encode visited set"),
        }
        action.save_state(self.store.as_mut());
    }

    /// Remove both flow entries, forgetting the persisted position.
    pub fn clear(&mut self) {
        self.store.remove(LAST_VISITED_KEY);
        self.store.remove(VISITED_SET_KEY);
    }

    /// Read access for action sub-state restoration.
    #[must_use]
    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    /// Write access for action sub-state persistence.
    pub fn store_mut(&mut self) -> &mut dyn StateStore {
        self.store.as_mut()
    }
}
