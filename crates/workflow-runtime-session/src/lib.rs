//! Execution and debug session orchestration for workflow runs.
//!
//! Provides:
//! - `WorkflowRuntime` - Owned session state machine
//! - `RunGuard` - Drops events from superseded runs
//! - `RuntimeDriver` / `RuntimeHandle` - Single event queue and control surface
//! - `RuntimeConfig` - Backend address and limits

pub mod config;
pub mod driver;
pub mod guard;
pub mod runtime;

pub use config::{ConfigError, RuntimeConfig};
pub use driver::{DriverError, RuntimeDriver, RuntimeHandle};
pub use guard::RunGuard;
pub use runtime::{CommandOutcome, RuntimeUpdate, StartOutcome, WorkflowRuntime};
