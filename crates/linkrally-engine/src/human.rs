//! Human move validation.
//!
//! Server-side validation is preferred and trusted when well formed; a
//! deterministic client-side fallback covers the cases where the server
//! call is unavailable or fails with a retryable condition. A non-retryable
//! rejection from the server propagates as a rejection, never as a
//! fallback. Rejections are return values, not errors.

use linkrally_client::{BackendApi, CanonicalTitleResolver, MoveValidation, MoveValidationRequest};
use linkrally_core::session::path::{hops_taken, reconstruct_path};
use linkrally_core::title::{strip_fragment, titles_equal};
use linkrally_core::{
    RallyError, Result, Run, RunKind, RunLimits, RunResult, RunStatus, Session, SessionStore, Step,
    StepKind,
};
use std::sync::Arc;

/// Verdict on a submitted move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Accepted without a step (fragment-only navigation)
    Noop,
    /// Accepted; a step of this kind was recorded
    Recorded(StepKind),
    /// Not a legal move; no state was changed
    Rejected,
}

/// Validates and records human-submitted navigation.
pub struct HumanMoveValidator {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn BackendApi>,
    resolver: Arc<CanonicalTitleResolver>,
}

impl HumanMoveValidator {
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

    /// Validates `candidate` as the next article for `run_id`.
    pub async fn submit_move(&self, run_id: &str, candidate: &str) -> Result<MoveOutcome> {
        let (session, run) = self
            .store
            .find_run(run_id)
            .await?
            .ok_or_else(|| RallyError::not_found("run", run_id))?;

        if run.kind != RunKind::Human || run.status != RunStatus::Running {
            tracing::warn!(
                target: "human_move",
                run_id = %run_id,
                kind = ?run.kind,
                status = ?run.status,
                "move submitted for a run that is not a running human run"
            );
            return Ok(MoveOutcome::Rejected);
        }

        let current = strip_fragment(run.current_article(&session.start_article)).to_string();
        let candidate = strip_fragment(candidate).to_string();
        if titles_equal(&candidate, &current) {
            // fragment-only navigation changes nothing
            return Ok(MoveOutcome::Noop);
        }

        let path = reconstruct_path(&session.start_article, &run.steps);
        let current_hops = hops_taken(&path);
        let limits = RunLimits::resolve(&run, &session.rules);

        let verdict = self
            .backend
            .validate_move(MoveValidationRequest {
                current_article: current.clone(),
                to_article: candidate.clone(),
                destination_article: session.destination_article.clone(),
                current_hops,
                max_hops: limits.max_steps,
            })
            .await;

        match verdict {
            Ok(MoveValidation::Noop { .. }) => Ok(MoveOutcome::Noop),
            Ok(MoveValidation::Step { step }) => self.accept(&session, &run, step).await,
            Err(e) if !e.is_retryable() => {
                tracing::debug!(target: "human_move", run_id = %run_id, error = %e, "server rejected move");
                Ok(MoveOutcome::Rejected)
            }
            Err(e) => {
                tracing::warn!(
                    target: "human_move",
                    run_id = %run_id,
                    error = %e,
                    "server validation unavailable; falling back to client checks"
                );
                self.fallback(&session, &run, &current, &candidate, current_hops, limits)
                    .await
            }
        }
    }

    /// Client-side validation when the server cannot answer.
    async fn fallback(
        &self,
        session: &Session,
        run: &Run,
        current: &str,
        candidate: &str,
        current_hops: u32,
        limits: RunLimits,
    ) -> Result<MoveOutcome> {
        if self
            .resolver
            .canonically_equal(candidate, &session.destination_article)
            .await
        {
            let step = Step::now(StepKind::Win, candidate, None);
            return self.accept(session, run, step).await;
        }

        match self.backend.article_links(current).await {
            Ok(links) => {
                if !links.iter().any(|link| titles_equal(link, candidate)) {
                    return Ok(MoveOutcome::Rejected);
                }
            }
            Err(e) => {
                // unverifiable is not a rejection; deliberate leniency
                tracing::warn!(
                    target: "human_move",
                    run_id = %run.id,
                    error = %e,
                    "link data unavailable; accepting unverified move"
                );
            }
        }

        if current_hops + 1 >= limits.max_steps {
            let step = Step::now(
                StepKind::Lose,
                candidate,
                Some(serde_json::json!({
                    "reason": "max_steps",
                    "max_steps": limits.max_steps,
                })),
            );
            return self.accept(session, run, step).await;
        }

        let step = Step::now(StepKind::Move, candidate, None);
        self.accept(session, run, step).await
    }

    /// Records an accepted step, with timer side effects applied first so
    /// duration accounting stays consistent with the step that caused it.
    async fn accept(&self, session: &Session, run: &Run, step: Step) -> Result<MoveOutcome> {
        if session.rules.auto_start_timer && !run.timer.running {
            self.store.pause_other_timers(&session.id, &run.id).await?;
            self.store.resume_timer(&run.id).await?;
        }

        let kind = step.kind;
        self.store.append_step(&run.id, step).await?;
        match kind {
            StepKind::Win => self.store.finish_run(&run.id, RunResult::Win).await?,
            StepKind::Lose => self.store.finish_run(&run.id, RunResult::Lose).await?,
            StepKind::Move | StepKind::Start => {}
        }
        Ok(MoveOutcome::Recorded(kind))
    }
}
