//! Session state store.
//!
//! The orchestration layer never holds sessions directly; it mutates them
//! through the narrow per-run operations here. Each operation is atomic
//! with respect to a single run id, so concurrent tasks driving different
//! runs can interleave freely. Every mutation bumps a watch revision that
//! the orchestrator's reconcile loop subscribes to.

use super::model::{Run, RunResult, RunStatus, Session, Step, StepKind};
use crate::error::{RallyError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{RwLock, watch};

/// Storage seam for session and run state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: Session) -> Result<()>;
    async fn find_session(&self, session_id: &str) -> Result<Option<Session>>;
    async fn list_sessions(&self) -> Result<Vec<Session>>;
    async fn delete_session(&self, session_id: &str) -> Result<()>;
    /// Looks up a run together with its owning session.
    async fn find_run(&self, run_id: &str) -> Result<Option<(Session, Run)>>;
    /// Moves a non-terminal run to a new non-terminal status.
    async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<()>;
    /// Begins a not-yet-started run: marks it running and records a
    /// `start` step at the session's start article.
    async fn start_run(&self, run_id: &str) -> Result<()>;
    /// Appends one step to a run's record. A no-op on terminal runs, so a
    /// late emission from a cancelled task cannot corrupt a finished run.
    async fn append_step(&self, run_id: &str, step: Step) -> Result<()>;
    /// Finishes a run exactly once: sets the terminal status, result,
    /// `finished_at`, and `duration_ms` atomically. Idempotent.
    async fn finish_run(&self, run_id: &str, result: RunResult) -> Result<()>;
    /// Pauses every running timer in the session except `run_id`'s.
    async fn pause_other_timers(&self, session_id: &str, run_id: &str) -> Result<()>;
    /// Starts `run_id`'s timer if it is not already running.
    async fn resume_timer(&self, run_id: &str) -> Result<()>;
    /// Change notification; the value is a monotonically increasing revision.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

struct Inner {
    sessions: HashMap<String, Session>,
    /// run id -> owning session id
    run_index: HashMap<String, String>,
}

/// In-memory implementation of [`SessionStore`].
pub struct InMemorySessionStore {
    inner: RwLock<Inner>,
    revision: watch::Sender<u64>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
                run_index: HashMap::new(),
            }),
            revision,
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Runs `mutate` against the run and its session under one write lock.
    async fn with_run<F>(&self, run_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Session, usize) -> Result<bool>,
    {
        let mut inner = self.inner.write().await;
        let session_id = inner
            .run_index
            .get(run_id)
            .cloned()
            .ok_or_else(|| RallyError::not_found("run", run_id))?;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| RallyError::not_found("session", &session_id))?;
        let idx = session
            .runs
            .iter()
            .position(|r| r.id == run_id)
            .ok_or_else(|| RallyError::not_found("run", run_id))?;
        let changed = mutate(session, idx)?;
        if changed {
            session.updated_at = chrono::Utc::now().to_rfc3339();
            drop(inner);
            self.bump();
        }
        Ok(())
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds a running timer span into `elapsed_ms` and stops the timer.
fn fold_timer(run: &mut Run) {
    if !run.timer.running {
        return;
    }
    if let Some(started) = run.timer.started_at.take() {
        if let Ok(start) = chrono::DateTime::parse_from_rfc3339(&started) {
            let span = chrono::Utc::now().signed_duration_since(start);
            run.timer.elapsed_ms += span.num_milliseconds().max(0) as u64;
        }
    }
    run.timer.running = false;
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert_session(&self, session: Session) -> Result<()> {
        let mut inner = self.inner.write().await;
        for run in &session.runs {
            inner.run_index.insert(run.id.clone(), session.id.clone());
        }
        inner.sessions.insert(session.id.clone(), session);
        drop(inner);
        self.bump();
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(session_id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.values().cloned().collect())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.remove(session_id) {
            for run in &session.runs {
                inner.run_index.remove(&run.id);
            }
            drop(inner);
            self.bump();
        }
        Ok(())
    }

    async fn find_run(&self, run_id: &str) -> Result<Option<(Session, Run)>> {
        let inner = self.inner.read().await;
        let Some(session_id) = inner.run_index.get(run_id) else {
            return Ok(None);
        };
        let Some(session) = inner.sessions.get(session_id) else {
            return Ok(None);
        };
        Ok(session
            .run(run_id)
            .map(|run| (session.clone(), run.clone())))
    }

    async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.with_run(run_id, |session, idx| {
            let run = &mut session.runs[idx];
            if run.is_terminal() {
                tracing::warn!(
                    target: "store",
                    run_id = %run.id,
                    "ignoring status change on terminal run"
                );
                return Ok(false);
            }
            if run.status == status {
                return Ok(false);
            }
            run.status = status;
            Ok(true)
        })
        .await
    }

    async fn start_run(&self, run_id: &str) -> Result<()> {
        self.with_run(run_id, |session, idx| {
            let start_article = session.start_article.clone();
            let run = &mut session.runs[idx];
            if run.status != RunStatus::NotStarted {
                tracing::warn!(
                    target: "store",
                    run_id = %run.id,
                    status = ?run.status,
                    "ignoring start for a run that already began"
                );
                return Ok(false);
            }
            run.status = RunStatus::Running;
            run.steps.push(Step::now(StepKind::Start, start_article, None));
            Ok(true)
        })
        .await
    }

    async fn append_step(&self, run_id: &str, step: Step) -> Result<()> {
        self.with_run(run_id, |session, idx| {
            let run = &mut session.runs[idx];
            if run.is_terminal() {
                tracing::warn!(
                    target: "store",
                    run_id = %run.id,
                    kind = ?step.kind,
                    "dropping step emission for terminal run"
                );
                return Ok(false);
            }
            run.steps.push(step);
            Ok(true)
        })
        .await
    }

    async fn finish_run(&self, run_id: &str, result: RunResult) -> Result<()> {
        self.with_run(run_id, |session, idx| {
            let run = &mut session.runs[idx];
            if run.is_terminal() {
                return Ok(false);
            }
            fold_timer(run);
            run.status = match result {
                RunResult::Abandoned => RunStatus::Abandoned,
                _ => RunStatus::Finished,
            };
            run.result = Some(result);
            run.finished_at = Some(chrono::Utc::now().to_rfc3339());
            let mut duration = run.timer.elapsed_ms;
            if duration == 0 {
                // Untimed runs fall back to wall time since the first step.
                if let Some(first) = run.steps.first() {
                    if let Ok(start) = chrono::DateTime::parse_from_rfc3339(&first.at) {
                        let span = chrono::Utc::now().signed_duration_since(start);
                        duration = span.num_milliseconds().max(0) as u64;
                    }
                }
            }
            run.duration_ms = Some(duration);
            Ok(true)
        })
        .await
    }

    async fn pause_other_timers(&self, session_id: &str, run_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RallyError::not_found("session", session_id))?;
        let mut changed = false;
        for run in session.runs.iter_mut().filter(|r| r.id != run_id) {
            if run.timer.running {
                fold_timer(run);
                changed = true;
            }
        }
        if changed {
            session.updated_at = chrono::Utc::now().to_rfc3339();
            drop(inner);
            self.bump();
        }
        Ok(())
    }

    async fn resume_timer(&self, run_id: &str) -> Result<()> {
        self.with_run(run_id, |session, idx| {
            let run = &mut session.runs[idx];
            if run.timer.running {
                return Ok(false);
            }
            run.timer.running = true;
            run.timer.started_at = Some(chrono::Utc::now().to_rfc3339());
            Ok(true)
        })
        .await
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
