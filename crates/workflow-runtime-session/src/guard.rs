//! Run identity guard.

/// Tracks the run identifier assigned to the current session.
///
/// Until the backend assigns one, every event is accepted. Afterwards only
/// events carrying exactly that identifier are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunGuard {
    run_id: Option<String>,
}

impl RunGuard {
    #[must_use]
    pub const fn new() -> Self {
        Self { run_id: None }
    }

    /// Whether an event carrying `event_run_id` belongs to this session.
    #[must_use]
    pub fn accepted(&self, event_run_id: Option<&str>) -> bool {
        match &self.run_id {
            None => true,
            Some(current) => event_run_id == Some(current.as_str()),
        }
    }

    /// Record the backend-assigned run identifier.
    ///
    /// Returns `false` if a different identifier is already assigned.
    pub fn assign(&mut self, run_id: impl Into<String>) -> bool {
        let run_id = run_id.into();
        match &self.run_id {
            Some(current) => *current == run_id,
            None => {
                self.run_id = Some(run_id);
                true
            }
        }
    }

    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }
}
