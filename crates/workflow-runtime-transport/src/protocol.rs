//! Wire protocol for client-backend communication.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use workflow_runtime_core::NodeStatus;

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Debug control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugCommand {
    Resume,
    Pause,
    StepOver,
    Terminate,
}

impl DebugCommand {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resume => "resume",
            Self::Pause => "pause",
            Self::StepOver => "step_over",
            Self::Terminate => "terminate",
        }
    }
}

/// Message from client to backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Run the serialized graph.
    StartProcess(Value),
    /// Run the serialized graph under the debugger.
    StartDebug {
        #[serde(rename = "graphJSON")]
        graph_json: Value,
        breakpoints: Vec<String>,
    },
    /// Control an active debug run.
    DebugCommand { run_id: String, command: DebugCommand },
}

impl OutboundMessage {
    /// Serialize into a text frame.
    ///
    /// # Errors
    /// Returns error if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartProcess(_) => "start_process",
            Self::StartDebug { .. } => "start_debug",
            Self::DebugCommand { .. } => "debug_command",
        }
    }
}

/// Payload shared by the log-like events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    /// Usually a string; anything else is rendered as compact JSON.
    #[serde(default)]
    pub message: Value,
    #[serde(rename = "nodeId", default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl LogPayload {
    #[must_use]
    pub fn new(message: impl Into<String>, node_id: Option<String>) -> Self {
        Self {
            message: Value::String(message.into()),
            node_id,
            run_id: None,
        }
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Message text for the console.
    #[must_use]
    pub fn text(&self) -> String {
        render_text(&self.message)
    }
}

/// Console text for a free-form payload field.
///
/// Strings are taken as-is, `null` is empty, anything else is compact JSON.
#[must_use]
pub fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Like [`render_text`], but `None` when there is nothing to show.
#[must_use]
pub fn render_optional(value: Option<&Value>) -> Option<String> {
    value.map(render_text).filter(|text| !text.is_empty())
}

/// Event delivered to a session.
///
/// `Connect`, `ConnectError` and `Disconnect` are synthesized by the
/// transport; the rest arrive from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    Connect,
    ConnectError {
        error: String,
    },
    Disconnect {
        reason: String,
    },
    DebugSessionStarted {
        run_id: String,
    },
    NodeStatusChange {
        #[serde(rename = "nodeId")]
        node_id: String,
        status: NodeStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
    ExecutionPaused {
        #[serde(rename = "nodeId")]
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
    ExecutionTerminated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
    Info(LogPayload),
    Warning(LogPayload),
    NodesOutput(LogPayload),
    Over {
        #[serde(default)]
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
}

impl InboundEvent {
    /// Parse a text frame.
    ///
    /// # Errors
    /// Returns error on malformed JSON or an unknown event.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Run identifier carried by the event, if any.
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        match self {
            Self::DebugSessionStarted { run_id } => Some(run_id.as_str()),
            Self::NodeStatusChange { run_id, .. }
            | Self::ExecutionPaused { run_id, .. }
            | Self::ExecutionTerminated { run_id, .. }
            | Self::Over { run_id, .. } => run_id.as_deref(),
            Self::Info(p) | Self::Warning(p) | Self::NodesOutput(p) => p.run_id.as_deref(),
            Self::Connect | Self::ConnectError { .. } | Self::Disconnect { .. } => None,
        }
    }

    /// Whether the event describes the connection rather than a run.
    #[must_use]
    pub const fn is_transport_level(&self) -> bool {
        matches!(
            self,
            Self::Connect | Self::ConnectError { .. } | Self::Disconnect { .. }
        )
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::ConnectError { .. } => "connect_error",
            Self::Disconnect { .. } => "disconnect",
            Self::DebugSessionStarted { .. } => "debug_session_started",
            Self::NodeStatusChange { .. } => "node_status_change",
            Self::ExecutionPaused { .. } => "execution_paused",
            Self::ExecutionTerminated { .. } => "execution_terminated",
            Self::Info(_) => "info",
            Self::Warning(_) => "warning",
            Self::NodesOutput(_) => "nodes_output",
            Self::Over { .. } => "over",
        }
    }
}

/// Whether an `over` status string reports success.
#[must_use]
pub fn is_success_status(status: &str) -> bool {
    ["success", "succeeded", "completed", "ok"]
        .iter()
        .any(|s| status.eq_ignore_ascii_case(s))
}
