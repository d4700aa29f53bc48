//! Session descriptors.

use serde::{Deserialize, Serialize};

/// Kind of execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Run the whole graph.
    Normal,
    /// Run with breakpoints and step control.
    Debug,
}

/// Coarse session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Running,
    Paused,
}

/// Read-only snapshot of the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    /// A session exists.
    pub active: bool,
    pub kind: Option<SessionKind>,
    pub running: bool,
    pub paused: bool,
    pub paused_node: Option<String>,
    /// Backend-assigned run identifier.
    pub run_id: Option<String>,
}

impl SessionView {
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        if !self.active {
            SessionPhase::Idle
        } else if self.paused {
            SessionPhase::Paused
        } else {
            SessionPhase::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase() {
        let mut view = SessionView::default();
        assert_eq!(view.phase(), SessionPhase::Idle);

        view.active = true;
        view.running = true;
        assert_eq!(view.phase(), SessionPhase::Running);

        view.paused = true;
        assert_eq!(view.phase(), SessionPhase::Paused);
    }
}
