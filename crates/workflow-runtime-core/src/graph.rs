//! Graph document collaborator.

use std::{collections::HashMap, path::Path};

use serde_json::Value;
use thiserror::Error;

/// Graph document error.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid graph JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Graph must be a JSON object")]
    NotAnObject,
}

/// The graph being executed.
///
/// Owned by the editor; the runtime only snapshots it when a run starts.
pub trait GraphDocument {
    /// Serialize the current graph.
    fn to_json(&self) -> Value;

    /// Remove every node and edge.
    fn clear(&mut self);

    /// Replace the graph with `graph`.
    ///
    /// # Errors
    /// Returns error if `graph` is not a valid document.
    fn render_json(&mut self, graph: Value) -> Result<(), GraphError>;
}

/// Plain JSON-backed graph document.
///
/// Stores the document verbatim plus arbitrary metadata for app-specific
/// needs.
#[derive(Debug, Clone, Default)]
pub struct JsonGraph {
    document: Value,
    metadata: HashMap<String, Value>,
}

impl JsonGraph {
    /// Create a graph from a JSON value.
    ///
    /// # Errors
    /// Returns error if `document` is not an object.
    pub fn from_value(document: Value) -> Result<Self, GraphError> {
        let mut graph = Self::default();
        graph.render_json(document)?;
        Ok(graph)
    }

    /// Load a graph from a JSON file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_value(serde_json::from_str(&text)?)
    }

    /// IDs of the nodes in the `nodes` array, in document order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        self.document
            .get("nodes")
            .and_then(Value::as_array)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|node| node.get("id").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}

impl GraphDocument for JsonGraph {
    fn to_json(&self) -> Value {
        if self.document.is_null() {
            serde_json::json!({ "nodes": [], "edges": [] })
        } else {
            self.document.clone()
        }
    }

    fn clear(&mut self) {
        self.document = Value::Null;
    }

    fn render_json(&mut self, graph: Value) -> Result<(), GraphError> {
        if !graph.is_object() {
            return Err(GraphError::NotAnObject);
        }
        self.document = graph;
        Ok(())
    }
}
