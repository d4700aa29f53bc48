//! Single-queue driver and control handle for a [`WorkflowRuntime`].

use std::sync::Arc;

use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use workflow_runtime_core::{LogStore, NodeStateMap, SessionKind, SessionView};
use workflow_runtime_transport::{Connector, DebugCommand, TransportEvent};

use crate::{CommandOutcome, RuntimeConfig, RuntimeUpdate, StartOutcome, WorkflowRuntime};

/// Driver error.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Runtime driver has stopped")]
    Closed,
}

enum ControlRequest {
    Start {
        kind: SessionKind,
        graph: Value,
        breakpoints: Option<Vec<String>>,
        reply: oneshot::Sender<StartOutcome>,
    },
    Command {
        command: DebugCommand,
        reply: oneshot::Sender<CommandOutcome>,
    },
    Stop {
        reply: oneshot::Sender<bool>,
    },
    Cleanup {
        reply: oneshot::Sender<()>,
    },
    ToggleBreakpoint {
        node_id: String,
        reply: oneshot::Sender<bool>,
    },
    Breakpoints {
        reply: oneshot::Sender<Vec<String>>,
    },
    View {
        reply: oneshot::Sender<SessionView>,
    },
    Nodes {
        reply: oneshot::Sender<NodeStateMap>,
    },
}

/// Owns a [`WorkflowRuntime`] and feeds it transport events and control
/// requests from one task, so the runtime never sees concurrent mutation.
pub struct RuntimeDriver {
    runtime: WorkflowRuntime,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    control: mpsc::UnboundedReceiver<ControlRequest>,
}

impl RuntimeDriver {
    /// Create a driver and its control handle.
    #[must_use]
    pub fn new(config: RuntimeConfig, connector: Arc<dyn Connector>) -> (Self, RuntimeHandle) {
        let (runtime, events) = WorkflowRuntime::new(config, connector);
        let (tx, control) = mpsc::unbounded_channel();
        let handle = RuntimeHandle {
            tx,
            logs: runtime.logs(),
            updates: runtime.update_sender(),
        };
        (
            Self {
                runtime,
                events,
                control,
            },
            handle,
        )
    }

    /// Create a driver and run it on a new task.
    #[must_use]
    pub fn spawn(
        config: RuntimeConfig,
        connector: Arc<dyn Connector>,
    ) -> (RuntimeHandle, JoinHandle<()>) {
        let (driver, handle) = Self::new(config, connector);
        (handle, tokio::spawn(driver.run()))
    }

    /// Spawn a driver that talks to the backend over WebSocket.
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn spawn_websocket(config: RuntimeConfig) -> (RuntimeHandle, JoinHandle<()>) {
        Self::spawn(
            config,
            Arc::new(workflow_runtime_transport::WebSocketConnector::new()),
        )
    }

    /// Process events until every [`RuntimeHandle`] is dropped, then tear
    /// down any live session.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                request = self.control.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some(event) = self.events.recv() => self.runtime.handle_event(event),
            }
        }

        self.runtime.cleanup();
        tracing::debug!("Runtime driver stopped");
    }

    fn handle_request(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Start {
                kind,
                graph,
                breakpoints,
                reply,
            } => {
                let _ = reply.send(self.runtime.start_session(kind, graph, breakpoints));
            }
            ControlRequest::Command { command, reply } => {
                let _ = reply.send(self.runtime.send_command(command));
            }
            ControlRequest::Stop { reply } => {
                let _ = reply.send(self.runtime.stop());
            }
            ControlRequest::Cleanup { reply } => {
                self.runtime.cleanup();
                let _ = reply.send(());
            }
            ControlRequest::ToggleBreakpoint { node_id, reply } => {
                let _ = reply.send(self.runtime.toggle_breakpoint(&node_id));
            }
            ControlRequest::Breakpoints { reply } => {
                let _ = reply.send(self.runtime.breakpoints().to_vec());
            }
            ControlRequest::View { reply } => {
                let _ = reply.send(self.runtime.session_view());
            }
            ControlRequest::Nodes { reply } => {
                let _ = reply.send(self.runtime.nodes().clone());
            }
        }
    }
}

/// Cloneable control surface for a running [`RuntimeDriver`].
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: mpsc::UnboundedSender<ControlRequest>,
    logs: Arc<LogStore>,
    updates: broadcast::Sender<RuntimeUpdate>,
}

impl RuntimeHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControlRequest,
    ) -> Result<T, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| DriverError::Closed)?;
        rx.await.map_err(|_| DriverError::Closed)
    }

    /// Start a normal or debug run.
    ///
    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn start(
        &self,
        kind: SessionKind,
        graph: Value,
        breakpoints: Option<Vec<String>>,
    ) -> Result<StartOutcome, DriverError> {
        self.request(|reply| ControlRequest::Start {
            kind,
            graph,
            breakpoints,
            reply,
        })
        .await
    }

    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn send_command(
        &self,
        command: DebugCommand,
    ) -> Result<CommandOutcome, DriverError> {
        self.request(|reply| ControlRequest::Command { command, reply })
            .await
    }

    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn resume(&self) -> Result<CommandOutcome, DriverError> {
        self.send_command(DebugCommand::Resume).await
    }

    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn pause(&self) -> Result<CommandOutcome, DriverError> {
        self.send_command(DebugCommand::Pause).await
    }

    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn step_over(&self) -> Result<CommandOutcome, DriverError> {
        self.send_command(DebugCommand::StepOver).await
    }

    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn terminate(&self) -> Result<CommandOutcome, DriverError> {
        self.send_command(DebugCommand::Terminate).await
    }

    /// Cancel the active run, normal or debug. Returns `false` if none was
    /// active.
    ///
    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn stop(&self) -> Result<bool, DriverError> {
        self.request(|reply| ControlRequest::Stop { reply }).await
    }

    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn cleanup(&self) -> Result<(), DriverError> {
        self.request(|reply| ControlRequest::Cleanup { reply }).await
    }

    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn toggle_breakpoint(
        &self,
        node_id: impl Into<String>,
    ) -> Result<bool, DriverError> {
        let node_id = node_id.into();
        self.request(|reply| ControlRequest::ToggleBreakpoint { node_id, reply })
            .await
    }

    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn breakpoints(&self) -> Result<Vec<String>, DriverError> {
        self.request(|reply| ControlRequest::Breakpoints { reply })
            .await
    }

    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn session_view(&self) -> Result<SessionView, DriverError> {
        self.request(|reply| ControlRequest::View { reply }).await
    }

    /// # Errors
    /// Returns error only if the driver has stopped.
    pub async fn node_states(&self) -> Result<NodeStateMap, DriverError> {
        self.request(|reply| ControlRequest::Nodes { reply }).await
    }

    /// The console log. Readable without going through the driver.
    #[must_use]
    pub fn logs(&self) -> Arc<LogStore> {
        Arc::clone(&self.logs)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeUpdate> {
        self.updates.subscribe()
    }
}
