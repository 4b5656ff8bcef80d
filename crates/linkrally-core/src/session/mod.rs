//! Session domain: model, limit resolution, path rules, and the state store.

pub mod limits;
pub mod model;
pub mod path;
pub mod store;

pub use limits::RunLimits;
pub use model::{
    AgentIdentity, Rules, Run, RunKind, RunResult, RunStatus, RunTimer, Session, Step, StepKind,
};
pub use store::{InMemorySessionStore, SessionStore};
