//! Core types and state stores for workflow execution sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `LogStore` - Ordered console log with broadcast + history
//! - `NodeStateMap` - Per-node execution status, last write wins
//! - `BreakpointSet` - Debug breakpoints, independent of any session
//! - `GraphDocument` - Collaborator contract for the graph being run
//! - Session descriptors shared by the transport and session crates

pub mod breakpoints;
pub mod graph;
pub mod log;
pub mod log_store;
pub mod node;
pub mod session;

pub use breakpoints::BreakpointSet;
pub use graph::{GraphDocument, GraphError, JsonGraph};
pub use log::{LogEntry, LogLevel};
pub use log_store::{LogStore, LogUpdate};
pub use node::{NodeState, NodeStateMap, NodeStatus, StatusCounts};
pub use session::{SessionKind, SessionPhase, SessionView};
