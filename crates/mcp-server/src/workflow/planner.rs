//! Plan Workflow Orchestrator
//!
//! Sequences knowledge fetch, grounded generation and session persistence for
//! `plan_task`, serves `check_list` lookups, and drives the streamed
//! exploratory path. Fetch always precedes generation, which always precedes
//! persistence.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::PlanState;
use crate::generation::{
    build_grounded_prompt, FragmentStream, GenerationError, GroundedGenerationEngine, GroundedPrompt,
    SamplingConfig,
};
use crate::knowledge::{FetchError, KnowledgeDocument, KnowledgeLocation, KnowledgeSource};
use crate::metrics::{SESSIONS_CREATED_TOTAL, SESSIONS_UNPERSISTED_TOTAL};
use crate::store::{Plan, SessionStore};

/// Whether a returned plan can later be found by `check_list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Durability {
    Durable,
    /// The plan was generated but the session write failed.
    Ephemeral { reason: String },
}

/// Result of a successful `plan_task` run.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub durability: Durability,
}

impl PlanOutcome {
    pub fn is_durable(&self) -> bool {
        self.durability == Durability::Durable
    }

    /// Caller-visible record, identical for durable and ephemeral outcomes.
    pub fn to_json(&self) -> crate::Result<String> {
        self.plan.to_json()
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Knowledge(#[from] FetchError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("Failed to build prompt: {0}")]
    Prompt(String),
}

impl PlanError {
    pub fn diagnostic(&self) -> String {
        match self {
            PlanError::Knowledge(e) => e.diagnostic(),
            PlanError::Generation(e) => e.diagnostic(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckListError {
    #[error("session_id must not be empty")]
    Invalid,
    #[error("Session {0} not found")]
    NotFound(String),
    #[error("Failed to read session {session_id}: {source}")]
    Store {
        session_id: String,
        #[source]
        source: crate::Error,
    },
}

impl CheckListError {
    pub fn diagnostic(&self) -> String {
        self.to_string()
    }
}

pub struct PlanWorkflow {
    knowledge: Arc<dyn KnowledgeSource>,
    engine: GroundedGenerationEngine,
    store: Arc<dyn SessionStore>,
    location: KnowledgeLocation,
    max_knowledge_chars: usize,
}

impl PlanWorkflow {
    pub fn new(
        knowledge: Arc<dyn KnowledgeSource>,
        engine: GroundedGenerationEngine,
        store: Arc<dyn SessionStore>,
        location: KnowledgeLocation,
        max_knowledge_chars: usize,
    ) -> Self {
        Self {
            knowledge,
            engine,
            store,
            location,
            max_knowledge_chars,
        }
    }

    fn validate_issues(issues: &str) -> Result<(), PlanError> {
        if issues.trim().is_empty() {
            return Err(PlanError::Validation("issues must not be empty".to_string()));
        }
        Ok(())
    }

    async fn fetch_knowledge(&self) -> Result<KnowledgeDocument, FetchError> {
        debug!("Fetching knowledge document {}", self.location);
        self.knowledge.fetch(&self.location).await
    }

    fn prompt_for(&self, document: &KnowledgeDocument, issues: &str) -> Result<GroundedPrompt, PlanError> {
        build_grounded_prompt(document, issues, self.max_knowledge_chars)
            .map_err(|e| PlanError::Prompt(e.to_string()))
    }

    /// Produce a grounded remediation plan and file it under a fresh session.
    ///
    /// A failed session write does not fail the call: the plan comes back
    /// marked [`Durability::Ephemeral`].
    pub async fn plan_task(&self, issues: &str) -> Result<PlanOutcome, PlanError> {
        Self::validate_issues(issues)?;

        let mut state = PlanState::FetchingKnowledge;
        debug!("plan_task state: {}", state);
        let document = match self.fetch_knowledge().await {
            Ok(document) => document,
            Err(e) => {
                state = PlanState::Failed;
                warn!("plan_task state: {} ({})", state, e);
                return Err(e.into());
            }
        };

        state = PlanState::Generating;
        debug!("plan_task state: {}", state);
        let prompt = self.prompt_for(&document, issues)?;
        let to_do_list = match self
            .engine
            .generate(&prompt, SamplingConfig::deterministic())
            .await
        {
            Ok(text) => text,
            Err(e) => {
                state = PlanState::Failed;
                error!("plan_task state: {} ({})", state, e);
                return Err(e.into());
            }
        };

        state = PlanState::Persisting;
        let plan = Plan::new(to_do_list);
        debug!(session_id = %plan.session_id, "plan_task state: {}", state);
        let durability = match self.store.put(&plan).await {
            Ok(()) => {
                SESSIONS_CREATED_TOTAL.inc();
                Durability::Durable
            }
            Err(e) => {
                SESSIONS_UNPERSISTED_TOTAL.inc();
                error!(session_id = %plan.session_id, "Failed to persist plan session: {}", e);
                Durability::Ephemeral {
                    reason: e.to_string(),
                }
            }
        };

        state = PlanState::Done;
        let durable = durability == Durability::Durable;
        info!(session_id = %plan.session_id, durable, "plan_task state: {}", state);
        Ok(PlanOutcome { plan, durability })
    }

    /// Look up a previously issued plan.
    pub async fn check_list(&self, session_id: &str) -> Result<Plan, CheckListError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(CheckListError::Invalid);
        }

        match self.store.get(session_id).await {
            Ok(Some(plan)) => {
                debug!(session_id, "Session found");
                Ok(plan)
            }
            Ok(None) => {
                info!(session_id, "Session not found");
                Err(CheckListError::NotFound(session_id.to_string()))
            }
            Err(e) => {
                error!(session_id, "Session lookup failed: {}", e);
                Err(CheckListError::Store {
                    session_id: session_id.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Streamed exploratory analysis. Nothing is persisted and no session is
    /// issued; every failure arrives as a single diagnostic fragment.
    pub async fn think_stream(&self, issues: &str) -> FragmentStream {
        if let Err(e) = Self::validate_issues(issues) {
            return FragmentStream::from_fragments([e.diagnostic()]);
        }

        let document = match self.fetch_knowledge().await {
            Ok(document) => document,
            Err(e) => {
                warn!("Streamed analysis short-circuited: {}", e);
                return FragmentStream::from_fragments([e.diagnostic()]);
            }
        };

        match self.prompt_for(&document, issues) {
            Ok(prompt) => self.engine.generate_stream(&prompt, SamplingConfig::balanced()),
            Err(e) => FragmentStream::from_fragments([e.diagnostic()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::provider::MockGenerationBackend;
    use crate::generation::ScriptedBackend;
    use crate::knowledge::MockKnowledgeSource;
    use crate::store::{MockSessionStore, SqliteStore};
    use futures::StreamExt;

    const VACUUM_RULE: &str = "Rule 1: vacuum tables weekly.";
    const VACUUM_PLAN: &str = "Analysis: tables have not been vacuumed.\n1. Run VACUUM on the affected tables weekly.";

    fn location() -> KnowledgeLocation {
        KnowledgeLocation::new("kb", "redshift.md")
    }

    fn knowledge_with(content: &'static str) -> MockKnowledgeSource {
        let mut knowledge = MockKnowledgeSource::new();
        knowledge
            .expect_fetch()
            .returning(move |loc| Ok(KnowledgeDocument::new(loc.clone(), content.to_string())));
        knowledge
    }

    fn failing_knowledge() -> MockKnowledgeSource {
        let mut knowledge = MockKnowledgeSource::new();
        knowledge
            .expect_fetch()
            .times(1)
            .returning(|loc| Err(FetchError::not_found(loc)));
        knowledge
    }

    async fn memory_store() -> Arc<dyn SessionStore> {
        let store = SqliteStore::new(":memory:", 1).await.unwrap();
        store.init().await.unwrap();
        Arc::new(store)
    }

    fn workflow(
        knowledge: MockKnowledgeSource,
        backend: Arc<dyn crate::generation::GenerationBackend>,
        store: Arc<dyn SessionStore>,
    ) -> PlanWorkflow {
        PlanWorkflow::new(
            Arc::new(knowledge),
            GroundedGenerationEngine::new(backend),
            store,
            location(),
            10_000,
        )
    }

    #[tokio::test]
    async fn plan_round_trips_through_check_list() {
        let workflow = workflow(
            knowledge_with(VACUUM_RULE),
            Arc::new(ScriptedBackend::new([VACUUM_PLAN])),
            memory_store().await,
        );

        let outcome = workflow.plan_task("queries are slow").await.unwrap();
        assert!(outcome.is_durable());
        assert!(outcome.plan.to_do_list.contains("VACUUM"));

        let response = outcome.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        let session_id = value["sessionId"].as_str().unwrap().to_string();
        assert_eq!(value["to-do list"], VACUUM_PLAN);

        let stored = workflow.check_list(&session_id).await.unwrap();
        assert_eq!(stored.to_do_list, VACUUM_PLAN);
        assert_eq!(stored.to_json().unwrap(), response);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let workflow = workflow(
            knowledge_with(VACUUM_RULE),
            Arc::new(ScriptedBackend::canned()),
            memory_store().await,
        );

        for id in [uuid::Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
            let err = workflow.check_list(&id).await.unwrap_err();
            assert!(matches!(err, CheckListError::NotFound(_)));
            assert!(err.diagnostic().contains("not found"));
        }
    }

    #[tokio::test]
    async fn blank_session_id_is_rejected_without_lookup() {
        let workflow = workflow(
            MockKnowledgeSource::new(),
            Arc::new(ScriptedBackend::canned()),
            Arc::new(MockSessionStore::new()),
        );

        let err = workflow.check_list("   ").await.unwrap_err();
        assert!(matches!(err, CheckListError::Invalid));
    }

    #[tokio::test]
    async fn store_failure_on_lookup_is_a_diagnostic() {
        let mut store = MockSessionStore::new();
        store
            .expect_get()
            .times(1)
            .returning(|_| Err(crate::Error::Internal("connection reset".to_string())));

        let workflow = workflow(
            MockKnowledgeSource::new(),
            Arc::new(ScriptedBackend::canned()),
            Arc::new(store),
        );

        let err = workflow.check_list("abc").await.unwrap_err();
        assert!(matches!(err, CheckListError::Store { .. }));
        assert!(err.diagnostic().contains("connection reset"));
    }

    #[tokio::test]
    async fn identical_requests_get_distinct_sessions() {
        let workflow = workflow(
            knowledge_with(VACUUM_RULE),
            Arc::new(ScriptedBackend::new([VACUUM_PLAN])),
            memory_store().await,
        );

        let first = workflow.plan_task("queries are slow").await.unwrap();
        let second = workflow.plan_task("queries are slow").await.unwrap();

        assert_eq!(first.plan.to_do_list, second.plan.to_do_list);
        assert_ne!(first.plan.session_id, second.plan.session_id);
    }

    #[tokio::test]
    async fn fetch_failure_skips_generation_and_persistence() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_complete().times(0);
        backend.expect_stream().times(0);
        let mut store = MockSessionStore::new();
        store.expect_put().times(0);

        let workflow = workflow(failing_knowledge(), Arc::new(backend), Arc::new(store));

        let err = workflow.plan_task("queries are slow").await.unwrap_err();
        assert!(matches!(err, PlanError::Knowledge(FetchError::NotFound { .. })));
        assert!(err.diagnostic().starts_with("Failed to fetch knowledge base:"));
    }

    #[tokio::test]
    async fn persistence_failure_still_returns_plan() {
        let mut store = MockSessionStore::new();
        store
            .expect_put()
            .times(1)
            .returning(|_| Err(crate::Error::Internal("disk full".to_string())));

        let workflow = workflow(
            knowledge_with(VACUUM_RULE),
            Arc::new(ScriptedBackend::new([VACUUM_PLAN])),
            Arc::new(store),
        );

        let outcome = workflow.plan_task("queries are slow").await.unwrap();
        assert!(!outcome.is_durable());
        assert!(matches!(
            &outcome.durability,
            Durability::Ephemeral { reason } if reason.contains("disk full")
        ));

        let value: serde_json::Value = serde_json::from_str(&outcome.to_json().unwrap()).unwrap();
        assert!(uuid::Uuid::parse_str(value["sessionId"].as_str().unwrap()).is_ok());
        assert_eq!(value["to-do list"], VACUUM_PLAN);
    }

    #[tokio::test]
    async fn generation_failure_skips_persistence() {
        let mut store = MockSessionStore::new();
        store.expect_put().times(0);

        let workflow = workflow(
            knowledge_with(VACUUM_RULE),
            Arc::new(
                ScriptedBackend::new(Vec::<String>::new())
                    .failing_with(GenerationError::Throttled("rate exceeded".to_string())),
            ),
            Arc::new(store),
        );

        let err = workflow.plan_task("queries are slow").await.unwrap_err();
        assert!(err.diagnostic().starts_with("Failed to generate Redshift analysis:"));
    }

    #[tokio::test]
    async fn plans_use_deterministic_sampling_grounded_in_knowledge() {
        let mut backend = MockGenerationBackend::new();
        backend
            .expect_complete()
            .withf(|req| {
                req.sampling == SamplingConfig::deterministic()
                    && req.user.contains(VACUUM_RULE)
                    && req.user.contains("queries are slow")
            })
            .times(1)
            .returning(|_| Ok(VACUUM_PLAN.to_string()));

        let workflow = workflow(knowledge_with(VACUUM_RULE), Arc::new(backend), memory_store().await);
        workflow.plan_task("queries are slow").await.unwrap();
    }

    #[tokio::test]
    async fn blank_issues_touch_no_collaborator() {
        let mut knowledge = MockKnowledgeSource::new();
        knowledge.expect_fetch().times(0);
        let backend = Arc::new(ScriptedBackend::canned());

        let workflow = workflow(knowledge, backend.clone(), Arc::new(MockSessionStore::new()));

        let err = workflow.plan_task("  \n").await.unwrap_err();
        assert!(matches!(err, PlanError::Validation(_)));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn streamed_analysis_matches_blocking_plan_and_persists_nothing() {
        let backend = Arc::new(ScriptedBackend::new([
            "Analysis: tables have not been vacuumed.\n",
            "1. Run VACUUM on the affected tables weekly.",
        ]));
        let mut store = MockSessionStore::new();
        store.expect_put().times(1).returning(|_| Ok(()));

        let workflow = workflow(knowledge_with(VACUUM_RULE), backend.clone(), Arc::new(store));

        let streamed = workflow.think_stream("queries are slow").await.collect_text().await;
        let blocking = workflow.plan_task("queries are slow").await.unwrap();

        assert_eq!(streamed, blocking.plan.to_do_list);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn streamed_fetch_failure_is_single_diagnostic() {
        let backend = Arc::new(ScriptedBackend::canned());
        let workflow = workflow(failing_knowledge(), backend.clone(), Arc::new(MockSessionStore::new()));

        let fragments: Vec<String> = workflow.think_stream("queries are slow").await.collect().await;

        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].starts_with("Failed to fetch knowledge base:"));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn streamed_analysis_uses_balanced_sampling() {
        let mut backend = MockGenerationBackend::new();
        backend
            .expect_stream()
            .withf(|req| req.sampling == SamplingConfig::balanced())
            .times(1)
            .returning(|_| futures::stream::iter(vec![Ok("ok".to_string())]).boxed());

        let workflow = workflow(
            knowledge_with(VACUUM_RULE),
            Arc::new(backend),
            Arc::new(MockSessionStore::new()),
        );

        assert_eq!(workflow.think_stream("disk full").await.collect_text().await, "ok");
    }
}
