//! End-to-end race: an agent run driven from insertion to a recorded win
//! through the reconcile loop, with nothing but a scripted backend.

use async_trait::async_trait;
use linkrally_client::{
    BackendApi, CanonicalTitleResolver, ChatRequest, ChatResponse, MoveValidation,
    MoveValidationRequest,
};
use linkrally_core::session::path::reconstruct_path;
use linkrally_core::{
    AgentIdentity, InMemorySessionStore, RallyError, Result, Rules, Run, RunResult, RunStatus,
    Session, SessionStore, StepKind,
};
use linkrally_engine::RunOrchestrator;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Backend with a fixed link graph. Chat replies are chosen by finding the
/// prompt's current article and picking the link that shortens the distance
/// to Pokémon, the way the real model is asked to.
struct ScriptedBackend {
    links: HashMap<&'static str, Vec<&'static str>>,
    choices: HashMap<&'static str, usize>,
}

impl ScriptedBackend {
    fn capybara_to_pokemon() -> Self {
        let mut links = HashMap::new();
        links.insert("Capybara", vec!["Rodent", "South America"]);
        links.insert("Rodent", vec!["Mammal", "Pokémon"]);
        let mut choices = HashMap::new();
        choices.insert("Capybara", 1);
        choices.insert("Rodent", 2);
        Self { links, choices }
    }
}

#[async_trait]
impl BackendApi for ScriptedBackend {
    async fn health(&self) -> Result<()> {
        Ok(())
    }

    async fn all_articles(&self) -> Result<Vec<String>> {
        Ok(self.links.keys().map(|k| k.to_string()).collect())
    }

    async fn canonical_title(&self, title: &str) -> Result<String> {
        Ok(title.to_string())
    }

    async fn article_links(&self, title: &str) -> Result<Vec<String>> {
        Ok(self
            .links
            .get(title)
            .map(|ls| ls.iter().map(|l| l.to_string()).collect())
            .unwrap_or_default())
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let current = request
            .prompt
            .lines()
            .find_map(|line| line.strip_prefix("Current article: "))
            .ok_or_else(|| RallyError::internal("prompt missing current article"))?;
        let choice = self
            .choices
            .get(current)
            .ok_or_else(|| RallyError::internal(format!("no scripted choice for {current}")))?;
        Ok(ChatResponse {
            content: format!("Heading on. <answer>{choice}</answer>"),
            usage: None,
        })
    }

    async fn validate_move(&self, _request: MoveValidationRequest) -> Result<MoveValidation> {
        Err(RallyError::internal("not used by agent runs"))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agent_run_races_to_a_win() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let backend = Arc::new(ScriptedBackend::capybara_to_pokemon());
    let store = Arc::new(InMemorySessionStore::new());
    let resolver = Arc::new(CanonicalTitleResolver::new(backend.clone()));
    let orchestrator = Arc::new(RunOrchestrator::new(store.clone(), backend, resolver));
    let loop_handle = orchestrator.spawn();

    let mut session = Session::new("Capybara", "Pokémon", Rules::default());
    let mut run = Run::new_agent(AgentIdentity {
        model: "gpt-4o".to_string(),
        api_base: None,
        reasoning_effort: None,
    });
    run.status = RunStatus::Running;
    let run_id = run.id.clone();
    session.runs.push(run);
    let start = session.start_article.clone();
    store.insert_session(session).await.unwrap();

    // the loop picks the run up from the insert notification and drives it
    // Capybara -> Rodent -> Pokémon
    let mut finished = None;
    for _ in 0..400 {
        let (_, run) = store.find_run(&run_id).await.unwrap().unwrap();
        if run.is_terminal() {
            finished = Some(run);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let run = finished.expect("run did not finish in time");
    loop_handle.abort();

    assert_eq!(run.status, RunStatus::Finished);
    assert_eq!(run.result, Some(RunResult::Win));
    assert!(run.finished_at.is_some());
    assert!(run.duration_ms.is_some());

    let path = reconstruct_path(&start, &run.steps);
    assert_eq!(path, vec!["Capybara", "Rodent", "Pokémon"]);

    let last = run.steps.last().unwrap();
    assert_eq!(last.kind, StepKind::Win);
    assert_eq!(last.article, "Pokémon");
    // the winning step records which numbered link was followed
    assert_eq!(last.metadata.as_ref().unwrap()["link_index"], 2);

    // the task released its bookkeeping after finishing
    for _ in 0..200 {
        if orchestrator.active_task_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(orchestrator.active_task_count().await, 0);
}
