//! Debug breakpoints.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Node IDs where a debug run is expected to pause.
///
/// Lives outside any session and survives across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakpointSet {
    nodes: BTreeSet<String>,
}

impl BreakpointSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the breakpoint on `node_id`. Returns whether it is now set.
    pub fn toggle(&mut self, node_id: &str) -> bool {
        if self.nodes.remove(node_id) {
            false
        } else {
            self.nodes.insert(node_id.to_owned());
            true
        }
    }

    /// Returns `false` if the breakpoint was already set.
    pub fn insert(&mut self, node_id: impl Into<String>) -> bool {
        self.nodes.insert(node_id.into())
    }

    pub fn remove(&mut self, node_id: &str) -> bool {
        self.nodes.remove(node_id)
    }

    #[must_use]
    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains(node_id)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Sorted list of node IDs, as sent on the wire.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.nodes.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for BreakpointSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().map(Into::into).collect(),
        }
    }
}
