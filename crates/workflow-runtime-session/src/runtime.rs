//! Session state machine for workflow runs.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use workflow_runtime_core::{
    BreakpointSet, GraphDocument, LogEntry, LogLevel, LogStore, LogUpdate, NodeState,
    NodeStateMap, NodeStatus, SessionKind, SessionView,
};
use workflow_runtime_transport::{
    ConnectRequest, Connector, DebugCommand, InboundEvent, OutboundMessage, Transport,
    TransportEvent, protocol::is_success_status, render_optional,
};

use crate::{RunGuard, RuntimeConfig};

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Another session is live; nothing happened.
    AlreadyActive,
}

/// Result of a debug command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Sent,
    /// Preconditions not met; nothing was sent.
    Ignored,
}

/// Change notification for UI subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeUpdate {
    NodeChanged { node_id: String, state: NodeState },
    NodesCleared,
    Log(LogUpdate),
    SessionChanged(SessionView),
}

/// One execution attempt.
struct Session {
    kind: SessionKind,
    epoch: u64,
    transport: Box<dyn Transport>,
    guard: RunGuard,
    running: bool,
    paused: bool,
    paused_node: Option<String>,
    /// Sent once the transport reports `Connect`.
    pending_start: Option<OutboundMessage>,
}

impl Session {
    fn view(&self) -> SessionView {
        SessionView {
            active: true,
            kind: Some(self.kind),
            running: self.running,
            paused: self.paused,
            paused_node: self.paused_node.clone(),
            run_id: self.guard.run_id().map(str::to_owned),
        }
    }
}

/// Owned execution/debug session state machine.
///
/// All mutation goes through `&mut self`; the caller provides the single
/// event queue (see [`crate::RuntimeDriver`]) by feeding the receiver
/// returned from [`WorkflowRuntime::new`] into [`WorkflowRuntime::handle_event`].
pub struct WorkflowRuntime {
    config: RuntimeConfig,
    connector: Arc<dyn Connector>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    session: Option<Session>,
    nodes: NodeStateMap,
    logs: Arc<LogStore>,
    breakpoints: BreakpointSet,
    next_epoch: u64,
    updates: broadcast::Sender<RuntimeUpdate>,
}

impl WorkflowRuntime {
    /// Create a runtime and the receiver its transports deliver into.
    #[must_use]
    pub fn new(
        config: RuntimeConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(config.update_channel_capacity.max(1));
        let logs = Arc::new(LogStore::with_limit(config.log_history_limit));

        let runtime = Self {
            config,
            connector,
            events_tx,
            session: None,
            nodes: NodeStateMap::new(),
            logs,
            breakpoints: BreakpointSet::new(),
            next_epoch: 0,
            updates,
        };
        (runtime, events_rx)
    }

    /// Start a run of `graph`.
    ///
    /// Debug runs send `breakpoints`, or the runtime's own breakpoint set
    /// when `None`. A no-op if a session is already live.
    pub fn start_session(
        &mut self,
        kind: SessionKind,
        graph: Value,
        breakpoints: Option<Vec<String>>,
    ) -> StartOutcome {
        if let Some(session) = &self.session {
            tracing::warn!(
                epoch = session.epoch,
                "Ignoring start request: a session is already active"
            );
            return StartOutcome::AlreadyActive;
        }

        self.nodes.clear();
        self.publish(RuntimeUpdate::NodesCleared);
        self.logs.clear();
        self.publish(RuntimeUpdate::Log(LogUpdate::Cleared));

        let start = match kind {
            SessionKind::Normal => OutboundMessage::StartProcess(graph),
            SessionKind::Debug => OutboundMessage::StartDebug {
                graph_json: graph,
                breakpoints: breakpoints.unwrap_or_else(|| self.breakpoints.to_vec()),
            },
        };

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        tracing::info!(epoch, ?kind, url = %self.config.backend_url, "Starting session");

        let transport = self.connector.connect(
            ConnectRequest {
                url: self.config.backend_url.clone(),
                epoch,
                connect_timeout: self.config.connect_timeout(),
            },
            self.events_tx.clone(),
        );

        let session = Session {
            kind,
            epoch,
            transport,
            guard: RunGuard::new(),
            running: true,
            paused: false,
            paused_node: None,
            pending_start: Some(start),
        };
        self.publish(RuntimeUpdate::SessionChanged(session.view()));
        self.session = Some(session);

        StartOutcome::Started
    }

    /// Snapshot `document` and start a run, using the runtime's breakpoints.
    pub fn start_from_document(
        &mut self,
        kind: SessionKind,
        document: &dyn GraphDocument,
    ) -> StartOutcome {
        self.start_session(kind, document.to_json(), None)
    }

    /// Process one transport event.
    ///
    /// Events from a closed connection, or carrying another run's identifier,
    /// are dropped without touching any state.
    pub fn handle_event(&mut self, event: TransportEvent) {
        let TransportEvent { epoch, event } = event;

        let Some(session) = &self.session else {
            tracing::trace!(event = event.name(), "Dropping event: no active session");
            return;
        };
        if session.epoch != epoch {
            tracing::trace!(
                event = event.name(),
                epoch,
                current = session.epoch,
                "Dropping event from closed connection"
            );
            return;
        }
        if !event.is_transport_level() && !session.guard.accepted(event.run_id()) {
            tracing::trace!(
                event = event.name(),
                run_id = ?event.run_id(),
                "Dropping event from superseded run"
            );
            return;
        }

        self.dispatch(event);
    }

    fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Connect => self.on_connect(),
            InboundEvent::ConnectError { error } => {
                self.append_log(
                    LogLevel::Error,
                    format!("Could not connect to execution backend: {error}"),
                    None,
                );
                self.cleanup();
            }
            InboundEvent::Disconnect { reason } => {
                self.append_log(
                    LogLevel::System,
                    format!("Disconnected from execution backend: {reason}"),
                    None,
                );
                self.cleanup();
            }
            InboundEvent::DebugSessionStarted { run_id } => self.on_debug_session_started(&run_id),
            InboundEvent::NodeStatusChange {
                node_id,
                status,
                payload,
                ..
            } => self.apply_status_event(&node_id, status, payload),
            InboundEvent::ExecutionPaused {
                node_id, reason, ..
            } => self.on_paused(node_id, reason),
            InboundEvent::ExecutionTerminated { reason, .. } => {
                let message = render_optional(reason.as_ref()).map_or_else(
                    || "Execution terminated".to_string(),
                    |r| format!("Execution terminated: {r}"),
                );
                self.append_log(LogLevel::System, message, None);
                self.cleanup();
            }
            InboundEvent::Info(payload) => {
                self.append_log(LogLevel::Info, payload.text(), payload.node_id);
            }
            InboundEvent::Warning(payload) => {
                self.append_log(LogLevel::Warn, payload.text(), payload.node_id);
            }
            InboundEvent::NodesOutput(payload) => {
                self.append_log(LogLevel::Output, payload.text(), payload.node_id);
            }
            InboundEvent::Over {
                status, message, ..
            } => self.on_over(&status, message.as_ref()),
        }
    }

    fn on_connect(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(start) = session.pending_start.take() else {
            tracing::debug!(epoch = session.epoch, "Ignoring repeated connect");
            return;
        };

        let message = match &start {
            OutboundMessage::StartDebug { breakpoints, .. } => format!(
                "Connected to execution backend, starting debug run with {} breakpoint(s)",
                breakpoints.len()
            ),
            _ => "Connected to execution backend, starting run".to_string(),
        };
        let name = start.name();
        let sent = session.transport.emit(start);

        match sent {
            Ok(()) => {
                self.append_log(LogLevel::System, message, None);
            }
            Err(e) => {
                self.append_log(LogLevel::Error, format!("Failed to send {name}: {e}"), None);
                self.cleanup();
            }
        }
    }

    fn on_debug_session_started(&mut self, run_id: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.guard.run_id().is_some() {
            tracing::debug!(run_id, "Ignoring repeated debug_session_started");
            return;
        }
        session.guard.assign(run_id);
        let view = session.view();
        tracing::info!(run_id, "Debug session started");
        self.append_log(
            LogLevel::System,
            format!("Debug session started (run {run_id})"),
            None,
        );
        self.publish(RuntimeUpdate::SessionChanged(view));
    }

    fn on_paused(&mut self, node_id: String, reason: Option<Value>) {
        let text = render_optional(reason.as_ref());
        let payload = reason.map(|r| json!({ "reason": r }));
        self.apply_status_event(&node_id, NodeStatus::Paused, payload);

        let message = match text {
            Some(r) => format!("Paused at node {node_id}: {r}"),
            None => format!("Paused at node {node_id}"),
        };
        self.append_log(LogLevel::Warn, message, Some(node_id));
    }

    fn on_over(&mut self, status: &str, message: Option<&Value>) {
        let message = render_optional(message);
        if is_success_status(status) {
            let message =
                message.unwrap_or_else(|| "Workflow completed successfully".to_string());
            self.append_log(LogLevel::Success, message, None);
        } else {
            let detail = message.unwrap_or_else(|| format!("status '{status}'"));
            self.append_log(LogLevel::Error, format!("Workflow failed: {detail}"), None);
        }
        self.cleanup();
    }

    /// Record a node status. Replaces any previous state for the node.
    ///
    /// A failure also lands in the console log. Status reports for the node
    /// the session is paused on reconcile the paused flag.
    pub fn apply_status_event(
        &mut self,
        node_id: &str,
        status: NodeStatus,
        payload: Option<Value>,
    ) {
        let state = self.nodes.apply(node_id, status, payload).clone();

        if status == NodeStatus::Failed {
            let message = state.failure_detail().map_or_else(
                || format!("Node {node_id} failed"),
                |detail| format!("Node {node_id} failed: {detail}"),
            );
            self.append_log(LogLevel::Error, message, Some(node_id.to_string()));
        }

        self.publish(RuntimeUpdate::NodeChanged {
            node_id: node_id.to_string(),
            state,
        });
        self.reconcile_pause(node_id, status);
    }

    fn reconcile_pause(&mut self, node_id: &str, status: NodeStatus) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let changed = if status == NodeStatus::Paused {
            let changed = !session.paused || session.paused_node.as_deref() != Some(node_id);
            session.paused = true;
            session.paused_node = Some(node_id.to_string());
            changed
        } else if session.paused_node.as_deref() == Some(node_id) {
            session.paused = false;
            session.paused_node = None;
            true
        } else {
            false
        };

        if changed {
            let view = session.view();
            self.publish(RuntimeUpdate::SessionChanged(view));
        }
    }

    /// Append a console entry and notify subscribers.
    pub fn append_log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        node_id: Option<String>,
    ) -> LogEntry {
        let entry = self.logs.append(level, message, node_id);
        self.publish(RuntimeUpdate::Log(LogUpdate::Appended(entry.clone())));
        entry
    }

    /// Send a debug command for the current run.
    ///
    /// Requires a live session with an assigned run identifier. `resume` and
    /// `step_over` clear the paused state immediately, ahead of the backend;
    /// `terminate` closes the session without waiting for it.
    pub fn send_command(&mut self, command: DebugCommand) -> CommandOutcome {
        let Some(session) = self.session.as_mut() else {
            tracing::warn!(command = command.as_str(), "Ignoring command: no active session");
            return CommandOutcome::Ignored;
        };
        let Some(run_id) = session.guard.run_id().map(str::to_owned) else {
            tracing::warn!(
                command = command.as_str(),
                "Ignoring command: backend has not assigned a run id"
            );
            return CommandOutcome::Ignored;
        };

        let applicable = match command {
            DebugCommand::Resume | DebugCommand::StepOver => session.paused,
            DebugCommand::Pause => !session.paused,
            DebugCommand::Terminate => true,
        };
        if !applicable {
            tracing::warn!(
                command = command.as_str(),
                paused = session.paused,
                "Ignoring command in current state"
            );
            return CommandOutcome::Ignored;
        }

        let sent = session
            .transport
            .emit(OutboundMessage::DebugCommand { run_id, command });
        if let Err(e) = sent {
            self.append_log(
                LogLevel::Error,
                format!("Failed to send {}: {e}", command.as_str()),
                None,
            );
            self.cleanup();
            return CommandOutcome::Ignored;
        }

        match command {
            DebugCommand::Resume | DebugCommand::StepOver => {
                if let Some(session) = self.session.as_mut() {
                    session.paused = false;
                    session.paused_node = None;
                    let view = session.view();
                    self.publish(RuntimeUpdate::SessionChanged(view));
                }
            }
            DebugCommand::Pause => {}
            DebugCommand::Terminate => {
                self.append_log(LogLevel::System, "Execution terminated by user", None);
                self.cleanup();
            }
        }

        CommandOutcome::Sent
    }

    /// Cancel the current run, whatever its kind.
    ///
    /// Runs with a backend-assigned identifier are terminated through the
    /// backend; others (normal runs, or debug runs not yet acknowledged) are
    /// closed locally. Returns `false` if no session was active.
    pub fn stop(&mut self) -> bool {
        let has_run_id = match &self.session {
            Some(session) => session.guard.run_id().is_some(),
            None => return false,
        };
        if has_run_id
            && self.send_command(DebugCommand::Terminate) == CommandOutcome::Sent
        {
            return true;
        }
        if self.session.is_some() {
            self.append_log(LogLevel::System, "Execution cancelled by user", None);
            self.cleanup();
        }
        true
    }

    /// Tear down the current session. Safe to call with none active.
    ///
    /// Node states and log entries are kept for inspection until the next
    /// session starts.
    pub fn cleanup(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.transport.disconnect();
        tracing::info!(
            epoch = session.epoch,
            run_id = ?session.guard.run_id(),
            "Session closed"
        );
        self.publish(RuntimeUpdate::SessionChanged(SessionView::default()));
    }

    #[must_use]
    pub fn session_view(&self) -> SessionView {
        self.session.as_ref().map(Session::view).unwrap_or_default()
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub const fn nodes(&self) -> &NodeStateMap {
        &self.nodes
    }

    #[must_use]
    pub fn node_status(&self, node_id: &str) -> NodeStatus {
        self.nodes.status(node_id)
    }

    #[must_use]
    pub fn logs(&self) -> Arc<LogStore> {
        Arc::clone(&self.logs)
    }

    #[must_use]
    pub const fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    /// Flip a breakpoint. Returns whether it is now set.
    pub fn toggle_breakpoint(&mut self, node_id: &str) -> bool {
        self.breakpoints.toggle(node_id)
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeUpdate> {
        self.updates.subscribe()
    }

    /// Sender half of the update channel, for handing out more receivers.
    #[must_use]
    pub fn update_sender(&self) -> broadcast::Sender<RuntimeUpdate> {
        self.updates.clone()
    }

    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn publish(&self, update: RuntimeUpdate) {
        let _ = self.updates.send(update);
    }
}
