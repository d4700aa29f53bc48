//! Per-node execution status.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a single graph node during execution.
///
/// Backends disagree on spelling, so both cases and a few synonyms are
/// accepted when decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Implicit status of any node not yet reported.
    #[default]
    #[serde(alias = "IDLE")]
    Idle,
    #[serde(alias = "PROCESSING", alias = "running", alias = "RUNNING")]
    Processing,
    #[serde(
        alias = "SUCCEEDED",
        alias = "success",
        alias = "SUCCESS",
        alias = "completed",
        alias = "COMPLETED"
    )]
    Succeeded,
    #[serde(alias = "FAILED", alias = "error", alias = "ERROR", alias = "failure")]
    Failed,
    /// Debug sessions only.
    #[serde(alias = "PAUSED")]
    Paused,
}

impl NodeStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Processing => "PROCESSING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a node plus whatever the backend attached to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl NodeState {
    #[must_use]
    pub const fn new(status: NodeStatus, payload: Option<Value>) -> Self {
        Self { status, payload }
    }

    /// Human readable failure detail extracted from the payload, if any.
    ///
    /// Prefers an `error` or `message` string field, falling back to the
    /// compact JSON of the whole payload.
    #[must_use]
    pub fn failure_detail(&self) -> Option<String> {
        let payload = self.payload.as_ref()?;
        match payload {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => ["error", "message", "detail"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::to_owned)
                .or_else(|| Some(payload.to_string())),
            other => Some(other.to_string()),
        }
    }
}

/// Tally of nodes per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub idle: usize,
    pub processing: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub paused: usize,
}

/// Map from node ID to its latest reported state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NodeStateMap {
    states: HashMap<String, NodeState>,
}

impl NodeStateMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `node_id` wholesale. Payloads are never merged.
    pub fn apply(
        &mut self,
        node_id: impl Into<String>,
        status: NodeStatus,
        payload: Option<Value>,
    ) -> &NodeState {
        let slot = self.states.entry(node_id.into()).or_default();
        *slot = NodeState::new(status, payload);
        slot
    }

    /// Status of a node; unseen nodes are idle.
    #[must_use]
    pub fn status(&self, node_id: &str) -> NodeStatus {
        self.states
            .get(node_id)
            .map_or(NodeStatus::Idle, |state| state.status)
    }

    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<&NodeState> {
        self.states.get(node_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeState)> {
        self.states.iter().map(|(id, state)| (id.as_str(), state))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Put every known node back to idle, dropping payloads.
    pub fn reset_to_idle(&mut self) {
        for state in self.states.values_mut() {
            *state = NodeState::default();
        }
    }

    #[must_use]
    pub fn status_counts(&self) -> StatusCounts {
        self.states
            .values()
            .fold(StatusCounts::default(), |mut counts, state| {
                match state.status {
                    NodeStatus::Idle => counts.idle += 1,
                    NodeStatus::Processing => counts.processing += 1,
                    NodeStatus::Succeeded => counts.succeeded += 1,
                    NodeStatus::Failed => counts.failed += 1,
                    NodeStatus::Paused => counts.paused += 1,
                }
                counts
            })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_unseen_node_is_idle() {
        let map = NodeStateMap::new();
        assert_eq!(map.status("missing"), NodeStatus::Idle);
        assert!(map.get("missing").is_none());
    }

    #[test]
    fn test_apply_is_last_write_wins() {
        let mut map = NodeStateMap::new();
        map.apply("a", NodeStatus::Processing, Some(json!({"partial": true})));
        map.apply("a", NodeStatus::Succeeded, Some(json!({"result": 1})));

        let state = map.get("a").unwrap();
        assert_eq!(state.status, NodeStatus::Succeeded);
        assert_eq!(state.payload, Some(json!({"result": 1})));

        map.apply("a", NodeStatus::Failed, None);
        assert_eq!(map.get("a").unwrap().payload, None);
    }

    #[test]
    fn test_status_aliases() {
        let parsed: Vec<NodeStatus> =
            serde_json::from_value(json!(["PROCESSING", "success", "error", "paused", "IDLE"]))
                .unwrap();
        assert_eq!(
            parsed,
            vec![
                NodeStatus::Processing,
                NodeStatus::Succeeded,
                NodeStatus::Failed,
                NodeStatus::Paused,
                NodeStatus::Idle,
            ]
        );
    }

    #[test]
    fn test_failure_detail() {
        let with_error = NodeState::new(NodeStatus::Failed, Some(json!({"error": "bad input"})));
        assert_eq!(with_error.failure_detail().as_deref(), Some("bad input"));

        let opaque = NodeState::new(NodeStatus::Failed, Some(json!({"code": 7})));
        assert_eq!(opaque.failure_detail().as_deref(), Some(r#"{"code":7}"#));

        let bare = NodeState::new(NodeStatus::Failed, None);
        assert_eq!(bare.failure_detail(), None);
    }

    #[test]
    fn test_counts_and_reset() {
        let mut map = NodeStateMap::new();
        map.apply("a", NodeStatus::Succeeded, None);
        map.apply("b", NodeStatus::Failed, Some(json!("x")));
        map.apply("c", NodeStatus::Processing, None);

        let counts = map.status_counts();
        assert_eq!((counts.succeeded, counts.failed, counts.processing), (1, 1, 1));

        map.reset_to_idle();
        assert_eq!(map.status_counts().idle, 3);
        assert!(map.iter().all(|(_, s)| s.payload.is_none()));
    }
}
