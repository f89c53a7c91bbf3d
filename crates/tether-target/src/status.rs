// status.rs: Read-only status snapshot of a target.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::TargetState;

/// Key under which the current state appears in a status map.
pub const STATE_KEY: &str = "state";

/// The status of a target at one instant: its state merged with any
/// auxiliary entries the orchestrator or backends have set.
///
/// Serializes flat, e.g. `{"state": "stopped", "pid": 4242}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub state: TargetState,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TargetStatus {
    /// Merge the state into the auxiliary entries. A stored `state` entry
    /// is shadowed by the real state.
    pub(crate) fn merge(state: TargetState, extra: &BTreeMap<String, Value>) -> Self {
        let mut extra = extra.clone();
        extra.remove(STATE_KEY);
        Self { state, extra }
    }

    /// Look up a key, including `"state"`.
    pub fn get(&self, key: &str) -> Option<Value> {
        if key == STATE_KEY {
            return serde_json::to_value(self.state).ok();
        }
        self.extra.get(key).cloned()
    }

    /// The status as one JSON object.
    pub fn to_map(&self) -> serde_json::Map<String, Value> {
        let mut map: serde_json::Map<String, Value> = self
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Ok(state) = serde_json::to_value(self.state) {
            map.insert(STATE_KEY.to_string(), state);
        }
        map
    }
}
