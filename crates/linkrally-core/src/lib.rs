//! Core domain model for the linkrally race engine.
//!
//! This crate holds the pure domain types (sessions, runs, steps), the
//! limit-resolution and path-reconstruction rules, title matching, and the
//! session state store that the orchestration layer mutates through narrow
//! append/finish operations.

pub mod error;
pub mod session;
pub mod title;

pub use error::{RallyError, Result};
pub use session::limits::RunLimits;
pub use session::model::{
    AgentIdentity, Rules, Run, RunKind, RunResult, RunStatus, RunTimer, Session, Step, StepKind,
};
pub use session::store::{InMemorySessionStore, SessionStore};
