//! Agent decision loop.
//!
//! Drives one agent run from its current position toward the destination,
//! one turn per hop, with bounded model retries per turn. All failures are
//! contained at the loop boundary: the run always ends with a terminal
//! step and status, except for cooperative cancellation, which leaves the
//! run `running` for the canceller to manage.

use crate::answer::parse_answer;
use crate::prompt::{DecisionPrompt, render_decision_prompt};
use linkrally_client::{BackendApi, CanonicalTitleResolver, ChatRequest, TokenUsage};
use linkrally_core::session::path::{hops_taken, reconstruct_path};
use linkrally_core::{AgentIdentity, Result, RunLimits, RunResult, SessionStore, Step, StepKind};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Bounded model retries within one turn.
pub const MODEL_ATTEMPTS_PER_TURN: usize = 3;

/// Everything a driving task needs, captured at spawn time.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub session_id: String,
    pub run_id: String,
    pub start_article: String,
    pub destination_article: String,
    /// Steps recorded before this task started (for resumption)
    pub steps: Vec<Step>,
    pub limits: RunLimits,
    pub agent: AgentIdentity,
}

/// How a driving task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Win,
    Lose,
    /// Cooperative cancellation; the run's status is left untouched
    Abandoned,
}

/// Drives agent runs through their decision loops.
pub struct AgentDriver {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn BackendApi>,
    resolver: Arc<CanonicalTitleResolver>,
}

impl AgentDriver {
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn BackendApi>,
        resolver: Arc<CanonicalTitleResolver>,
    ) -> Self {
        Self {
            store,
            backend,
            resolver,
        }
    }

    /// Runs the decision loop to completion.
    ///
    /// Never returns an error: failures become a `lose` step plus a
    /// terminal status, and cancellation becomes `Abandoned`.
    pub async fn drive(&self, snapshot: RunSnapshot, cancel: CancellationToken) -> RunOutcome {
        let run_id = snapshot.run_id.clone();
        let outcome = match self.drive_inner(&snapshot, &cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(target: "agent", run_id = %run_id, error = %e, "turn failed");
                // read back the committed position so the loss is recorded
                // where the run actually stopped
                let article = self
                    .store
                    .find_run(&run_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|(session, run)| run.current_article(&session.start_article).to_string())
                    .unwrap_or_else(|| current_position(&snapshot));
                self.emit(
                    &run_id,
                    Step::now(
                        StepKind::Lose,
                        article,
                        Some(serde_json::json!({
                            "reason": "error",
                            "message": e.to_string(),
                        })),
                    ),
                )
                .await;
                RunOutcome::Lose
            }
        };

        match outcome {
            RunOutcome::Win => self.finish(&run_id, RunResult::Win).await,
            RunOutcome::Lose => self.finish(&run_id, RunResult::Lose).await,
            RunOutcome::Abandoned => {
                tracing::debug!(target: "agent", run_id = %run_id, "task abandoned");
            }
        }
        outcome
    }

    async fn drive_inner(
        &self,
        snapshot: &RunSnapshot,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let mut path = reconstruct_path(&snapshot.start_article, &snapshot.steps);
        let mut current = path
            .last()
            .cloned()
            .unwrap_or_else(|| snapshot.start_article.clone());
        let mut turn = hops_taken(&path);

        tracing::info!(
            target: "agent",
            run_id = %snapshot.run_id,
            current = %current,
            destination = %snapshot.destination_article,
            turn,
            "driving run"
        );

        loop {
            if cancel.is_cancelled() {
                return self.abort(snapshot, &current).await;
            }

            if self
                .resolver
                .canonically_equal(&current, &snapshot.destination_article)
                .await
            {
                // already there; the win step (if any) was committed earlier
                return Ok(RunOutcome::Win);
            }
            if cancel.is_cancelled() {
                return self.abort(snapshot, &current).await;
            }

            if turn >= snapshot.limits.max_steps {
                self.emit(
                    &snapshot.run_id,
                    Step::now(
                        StepKind::Lose,
                        current.clone(),
                        Some(serde_json::json!({
                            "reason": "max_steps",
                            "max_steps": snapshot.limits.max_steps,
                        })),
                    ),
                )
                .await;
                return Ok(RunOutcome::Lose);
            }

            let links = self.backend.article_links(&current).await?;
            if cancel.is_cancelled() {
                return self.abort(snapshot, &current).await;
            }
            if links.is_empty() {
                self.emit(
                    &snapshot.run_id,
                    Step::now(
                        StepKind::Lose,
                        current.clone(),
                        Some(serde_json::json!({ "reason": "no_links" })),
                    ),
                )
                .await;
                return Ok(RunOutcome::Lose);
            }

            let considered: &[String] = match snapshot.limits.max_links {
                Some(n) if n > 0 => &links[..links.len().min(n as usize)],
                _ => &links,
            };

            let turn_result = self
                .choose_link(snapshot, cancel, &current, &path, considered)
                .await?;
            let (index, usage) = match turn_result {
                TurnResult::Selected { index, usage } => (index, usage),
                TurnResult::Exhausted {
                    raw_outputs,
                    parse_errors,
                    usage,
                } => {
                    self.emit(
                        &snapshot.run_id,
                        Step::now(
                            StepKind::Lose,
                            current.clone(),
                            Some(serde_json::json!({
                                "reason": "bad_answer",
                                "tries": MODEL_ATTEMPTS_PER_TURN,
                                "raw_outputs": raw_outputs,
                                "parse_errors": parse_errors,
                                "usage": usage_value(&usage),
                            })),
                        ),
                    )
                    .await;
                    return Ok(RunOutcome::Lose);
                }
                TurnResult::Cancelled => return self.abort(snapshot, &current).await,
            };

            let chosen = considered[index - 1].clone();
            let arrived = self
                .resolver
                .canonically_equal(&chosen, &snapshot.destination_article)
                .await;
            if cancel.is_cancelled() {
                return self.abort(snapshot, &current).await;
            }

            let metadata = serde_json::json!({
                "link_index": index,
                "usage": usage_value(&usage),
            });
            if arrived {
                self.emit(
                    &snapshot.run_id,
                    Step::now(StepKind::Win, chosen.clone(), Some(metadata)),
                )
                .await;
                return Ok(RunOutcome::Win);
            }

            self.emit(
                &snapshot.run_id,
                Step::now(StepKind::Move, chosen.clone(), Some(metadata)),
            )
            .await;
            path.push(chosen.clone());
            current = chosen;
            turn += 1;
        }
    }

    /// One turn's model interaction: up to [`MODEL_ATTEMPTS_PER_TURN`]
    /// attempts, feeding each parse error back into the next prompt and
    /// summing usage across attempts.
    async fn choose_link(
        &self,
        snapshot: &RunSnapshot,
        cancel: &CancellationToken,
        current: &str,
        path: &[String],
        links: &[String],
    ) -> Result<TurnResult> {
        let mut usage = TokenUsage::default();
        let mut raw_outputs: Vec<String> = Vec::new();
        let mut parse_errors: Vec<String> = Vec::new();
        let mut previous_error: Option<String> = None;

        for attempt in 1..=MODEL_ATTEMPTS_PER_TURN {
            let prompt = render_decision_prompt(&DecisionPrompt {
                current,
                destination: &snapshot.destination_article,
                links,
                path,
                previous_error: previous_error.as_deref(),
            })?;
            let reply = self
                .backend
                .chat(ChatRequest {
                    model: snapshot.agent.model.clone(),
                    prompt,
                    max_tokens: snapshot.limits.max_tokens,
                    api_base: snapshot.agent.api_base.clone(),
                    reasoning_effort: snapshot.agent.reasoning_effort.clone(),
                })
                .await?;
            if cancel.is_cancelled() {
                return Ok(TurnResult::Cancelled);
            }
            if let Some(reported) = &reply.usage {
                usage.add(reported);
            }
            raw_outputs.push(reply.content.clone());

            match parse_answer(&reply.content, links.len()) {
                Ok(index) => {
                    return Ok(TurnResult::Selected { index, usage });
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::debug!(
                        target: "agent",
                        run_id = %snapshot.run_id,
                        attempt,
                        error = %message,
                        "model reply did not parse"
                    );
                    parse_errors.push(message.clone());
                    previous_error = Some(message);
                }
            }
        }

        Ok(TurnResult::Exhausted {
            raw_outputs,
            parse_errors,
            usage,
        })
    }

    async fn abort(&self, snapshot: &RunSnapshot, current: &str) -> Result<RunOutcome> {
        tracing::info!(target: "agent", run_id = %snapshot.run_id, "cancellation observed");
        self.emit(
            &snapshot.run_id,
            Step::now(
                StepKind::Lose,
                current,
                Some(serde_json::json!({ "reason": "aborted" })),
            ),
        )
        .await;
        Ok(RunOutcome::Abandoned)
    }

    async fn emit(&self, run_id: &str, step: Step) {
        if let Err(e) = self.store.append_step(run_id, step).await {
            tracing::warn!(target: "agent", run_id = %run_id, error = %e, "step emission failed");
        }
    }

    async fn finish(&self, run_id: &str, result: RunResult) {
        if let Err(e) = self.store.finish_run(run_id, result).await {
            tracing::warn!(target: "agent", run_id = %run_id, error = %e, "finish failed");
        }
    }
}

enum TurnResult {
    Selected {
        index: usize,
        usage: TokenUsage,
    },
    Exhausted {
        raw_outputs: Vec<String>,
        parse_errors: Vec<String>,
        usage: TokenUsage,
    },
    Cancelled,
}

fn current_position(snapshot: &RunSnapshot) -> String {
    snapshot
        .steps
        .last()
        .map(|s| s.article.clone())
        .unwrap_or_else(|| snapshot.start_article.clone())
}

fn usage_value(usage: &TokenUsage) -> serde_json::Value {
    serde_json::to_value(usage).unwrap_or(serde_json::Value::Null)
}
