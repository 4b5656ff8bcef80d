//! Run reconciliation.
//!
//! The orchestrator owns an explicit map from run id to the cancellation
//! handle of its driving task, and reconciles it against the set of
//! eligible runs on every observed state change. Invariant: at most one
//! concurrently executing task per run id, exactly one per eligible run.

use crate::agent::{AgentDriver, RunSnapshot};
use linkrally_client::{BackendApi, CanonicalTitleResolver};
use linkrally_core::{RunLimits, RunResult, SessionStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct ActiveTask {
    token: CancellationToken,
    /// Distinguishes this task from a later task for the same run id, so
    /// a finished task only removes its own bookkeeping.
    generation: u64,
    handle: JoinHandle<()>,
}

/// Reconciles eligible runs against running tasks.
pub struct RunOrchestrator {
    store: Arc<dyn SessionStore>,
    resolver: Arc<CanonicalTitleResolver>,
    driver: AgentDriver,
    tasks: Mutex<HashMap<String, ActiveTask>>,
    next_generation: AtomicU64,
}

impl RunOrchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn BackendApi>,
        resolver: Arc<CanonicalTitleResolver>,
    ) -> Self {
        let driver = AgentDriver::new(store.clone(), backend, resolver.clone());
        Self {
            store,
            resolver,
            driver,
            tasks: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Runs one reconciliation pass. Never fails: errors from started
    /// tasks are contained within those tasks.
    pub async fn reconcile(self: &Arc<Self>) {
        let sessions = match self.store.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(target: "orchestrator", error = %e, "session listing failed");
                return;
            }
        };

        let mut eligible: HashMap<String, RunSnapshot> = HashMap::new();
        for session in &sessions {
            for run in &session.runs {
                if !run.is_agent_eligible() {
                    continue;
                }
                let Some(agent) = run.agent.clone() else {
                    continue;
                };
                eligible.insert(
                    run.id.clone(),
                    RunSnapshot {
                        session_id: session.id.clone(),
                        run_id: run.id.clone(),
                        start_article: session.start_article.clone(),
                        destination_article: session.destination_article.clone(),
                        steps: run.steps.clone(),
                        limits: RunLimits::resolve(run, &session.rules),
                        agent,
                    },
                );
            }
        }

        let mut tasks = self.tasks.lock().await;

        // cancel tasks whose runs are no longer eligible; bookkeeping is
        // removed immediately, the task handles cancellation on its own
        let stale: Vec<String> = tasks
            .keys()
            .filter(|id| !eligible.contains_key(*id))
            .cloned()
            .collect();
        for run_id in stale {
            if let Some(task) = tasks.remove(&run_id) {
                tracing::info!(target: "orchestrator", run_id = %run_id, "cancelling stale task");
                task.token.cancel();
            }
        }

        // start tasks for newly eligible runs
        for (run_id, snapshot) in eligible {
            if tasks.contains_key(&run_id) {
                continue;
            }
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
            let token = CancellationToken::new();
            let child_token = token.clone();
            let orchestrator = Arc::clone(self);
            let task_run_id = run_id.clone();
            tracing::info!(target: "orchestrator", run_id = %run_id, generation, "starting task");
            let handle = tokio::spawn(async move {
                orchestrator.execute_run(snapshot, child_token).await;
                orchestrator.release(&task_run_id, generation).await;
            });
            tasks.insert(
                run_id,
                ActiveTask {
                    token,
                    generation,
                    handle,
                },
            );
        }
    }

    /// Drives one run, after a cheap pre-check: if the run's last known
    /// position already canonically matches the destination, the run is
    /// forced to a win without spinning up any agent turns.
    async fn execute_run(&self, snapshot: RunSnapshot, cancel: CancellationToken) {
        let current = snapshot
            .steps
            .last()
            .map(|s| s.article.clone())
            .unwrap_or_else(|| snapshot.start_article.clone());
        if self
            .resolver
            .canonically_equal(&current, &snapshot.destination_article)
            .await
        {
            tracing::info!(
                target: "orchestrator",
                run_id = %snapshot.run_id,
                "run already at destination; forcing win"
            );
            if let Err(e) = self.store.finish_run(&snapshot.run_id, RunResult::Win).await {
                tracing::warn!(target: "orchestrator", run_id = %snapshot.run_id, error = %e, "forced win failed");
            }
            return;
        }
        if cancel.is_cancelled() {
            return;
        }

        let run_id = snapshot.run_id.clone();
        // an Abandoned outcome leaves the run's status untouched; a later
        // reconcile may re-attach under a new identity
        let outcome = self.driver.drive(snapshot, cancel).await;
        tracing::debug!(target: "orchestrator", run_id = %run_id, ?outcome, "task completed");
    }

    /// Removes the handle of a completed task, unless a newer task for
    /// the same run has replaced it in the meantime.
    async fn release(&self, run_id: &str, generation: u64) {
        let mut tasks = self.tasks.lock().await;
        if tasks
            .get(run_id)
            .is_some_and(|task| task.generation == generation)
        {
            tasks.remove(run_id);
        }
    }

    /// Spawns the reconcile loop: one pass now, then one per store change.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut changes = orchestrator.store.subscribe();
        tokio::spawn(async move {
            loop {
                orchestrator.reconcile().await;
                if changes.changed().await.is_err() {
                    tracing::debug!(target: "orchestrator", "store closed; reconcile loop exiting");
                    break;
                }
            }
        })
    }

    /// Cancels every active task and waits for each to stop. When this
    /// returns, no task of this orchestrator touches the store anymore.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, ActiveTask)> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().collect()
        };
        for (run_id, task) in &drained {
            tracing::debug!(target: "orchestrator", run_id = %run_id, "cancelling on shutdown");
            task.token.cancel();
        }
        for (run_id, task) in drained {
            if let Err(e) = task.handle.await {
                tracing::warn!(target: "orchestrator", run_id = %run_id, error = %e, "task join failed");
            }
        }
    }

    /// Number of active task handles (diagnostic/test hook).
    pub async fn active_task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Whether a task handle exists for `run_id`.
    pub async fn has_active_task(&self, run_id: &str) -> bool {
        self.tasks.lock().await.contains_key(run_id)
    }
}
