//! Run orchestration engine.
//!
//! Discovers which runs should be executing, drives automated agent runs
//! through a bounded multi-turn decision loop, validates human moves, and
//! keeps at most one concurrent task per run.

pub mod agent;
pub mod answer;
pub mod human;
pub mod orchestrator;
pub mod prompt;

pub use agent::{AgentDriver, RunOutcome, RunSnapshot, MODEL_ATTEMPTS_PER_TURN};
pub use answer::{parse_answer, ParseAnswerError};
pub use human::{HumanMoveValidator, MoveOutcome};
pub use orchestrator::RunOrchestrator;
