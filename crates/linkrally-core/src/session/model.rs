//! Session domain model.
//!
//! A `Session` is one contest between a fixed start article and a
//! destination article, holding the competing `Run`s and the shared rule
//! limits. Runs hold an append-only sequence of `Step`s; a Run's current
//! position is the article of its last Step, or the session start if it
//! has none yet.

use serde::{Deserialize, Serialize};

/// One contest from a start article to a destination article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (UUID format)
    pub id: String,
    /// Article every run starts from
    pub start_article: String,
    /// Article that wins the race
    pub destination_article: String,
    /// Shared rule limits, inherited by runs without overrides
    pub rules: Rules,
    /// Competing runs, in creation order
    pub runs: Vec<Run>,
    /// Timestamp when the session was created (RFC 3339)
    pub created_at: String,
    /// Timestamp when the session was last updated (RFC 3339)
    pub updated_at: String,
}

impl Session {
    /// Creates a new session with no runs.
    pub fn new(
        start_article: impl Into<String>,
        destination_article: impl Into<String>,
        rules: Rules,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            start_article: start_article.into(),
            destination_article: destination_article.into(),
            rules,
            runs: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Finds a run by id.
    pub fn run(&self, run_id: &str) -> Option<&Run> {
        self.runs.iter().find(|r| r.id == run_id)
    }
}

/// Session-wide rule limits. `None` means "no limit set at this level".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rules {
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub max_links: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// When set, accepting a human move starts that run's timer and pauses
    /// every other run's timer in the session.
    #[serde(default)]
    pub auto_start_timer: bool,
}

/// One competitor's attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier (UUID format)
    pub id: String,
    pub kind: RunKind,
    pub status: RunStatus,
    /// Terminal result, set exactly once together with the terminal status
    #[serde(default)]
    pub result: Option<RunResult>,
    /// Append-only step record
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Per-run limit overrides; session rules apply where `None`
    #[serde(default)]
    pub limit_overrides: Rules,
    /// Agent identity; required for a run to be driven automatically
    #[serde(default)]
    pub agent: Option<AgentIdentity>,
    #[serde(default)]
    pub timer: RunTimer,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl Run {
    fn new(kind: RunKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: RunStatus::NotStarted,
            result: None,
            steps: Vec::new(),
            limit_overrides: Rules::default(),
            agent: None,
            timer: RunTimer::default(),
            finished_at: None,
            duration_ms: None,
        }
    }

    /// Creates a human-driven run.
    pub fn new_human() -> Self {
        Self::new(RunKind::Human)
    }

    /// Creates an agent-driven run with the given identity.
    pub fn new_agent(agent: AgentIdentity) -> Self {
        let mut run = Self::new(RunKind::Agent);
        run.agent = Some(agent);
        run
    }

    /// The article this run currently sits on.
    pub fn current_article<'a>(&'a self, start_article: &'a str) -> &'a str {
        self.steps
            .last()
            .map(|s| s.article.as_str())
            .unwrap_or(start_article)
    }

    /// Whether the run has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Finished | RunStatus::Abandoned)
    }

    /// Whether the orchestrator should be driving this run: an agent run,
    /// currently running, with a non-empty model identity.
    pub fn is_agent_eligible(&self) -> bool {
        self.kind == RunKind::Agent
            && self.status == RunStatus::Running
            && self
                .agent
                .as_ref()
                .is_some_and(|a| !a.model.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Human,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Finished,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Win,
    Lose,
    Abandoned,
}

/// Identity an agent run uses when calling the model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

/// Per-run stopwatch for human-timer sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTimer {
    #[serde(default)]
    pub running: bool,
    /// When the current running span started (RFC 3339)
    #[serde(default)]
    pub started_at: Option<String>,
    /// Accumulated time from completed spans
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// An immutable record of one transition within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "type")]
    pub kind: StepKind,
    /// Resulting article title
    pub article: String,
    /// Timestamp (RFC 3339)
    pub at: String,
    /// Free-form diagnostics: chosen link index, token usage, failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Step {
    /// Creates a step stamped with the current time.
    pub fn now(kind: StepKind, article: impl Into<String>, metadata: Option<serde_json::Value>) -> Self {
        Self {
            kind,
            article: article.into(),
            at: chrono::Utc::now().to_rfc3339(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Start,
    Move,
    Win,
    Lose,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_article_falls_back_to_start() {
        let run = Run::new_human();
        assert_eq!(run.current_article("Capybara"), "Capybara");
    }

    #[test]
    fn current_article_is_last_step() {
        let mut run = Run::new_human();
        run.steps.push(Step::now(StepKind::Move, "Rodent", None));
        run.steps.push(Step::now(StepKind::Move, "Animal", None));
        assert_eq!(run.current_article("Capybara"), "Animal");
    }

    #[test]
    fn agent_eligibility_requires_model_and_running_status() {
        let mut run = Run::new_agent(AgentIdentity {
            model: "gpt-4o".into(),
            api_base: None,
            reasoning_effort: None,
        });
        assert!(!run.is_agent_eligible());
        run.status = RunStatus::Running;
        assert!(run.is_agent_eligible());

        run.agent = Some(AgentIdentity {
            model: "  ".into(),
            api_base: None,
            reasoning_effort: None,
        });
        assert!(!run.is_agent_eligible());

        let mut human = Run::new_human();
        human.status = RunStatus::Running;
        assert!(!human.is_agent_eligible());
    }

    #[test]
    fn step_kind_serializes_snake_case() {
        let step = Step::now(StepKind::Win, "Pokémon", None);
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "win");
        assert_eq!(json["article"], "Pokémon");
    }
}
