//! The adaptive retrieval loop.
//!
//! The [`Orchestrator`] drives one [`SessionState`] per user turn through the
//! stages in [`crate::stage`], one stage at a time, writing a checkpoint after
//! every transition. Each stage handler below reads and writes only the fields
//! listed in its doc comment.
//!
//! # Example
//!
//! ```rust,ignore
//! use arag_core::{InMemorySearchBackend, LoopConfig, Orchestrator};
//!
//! let orchestrator = Orchestrator::builder()
//!     .config(LoopConfig::default())
//!     .generator(Arc::new(my_generator))
//!     .search_backend(Arc::new(InMemorySearchBackend::with_embedder(embedder)))
//!     .build()?;
//!
//! let response = orchestrator.answer("thread-1", "万达增值服务有哪些？").await?;
//! println!("{}", response.answer_text);
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::answer::AnswerGenerator;
use crate::backend::SearchBackend;
use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use crate::config::{HallucinationPolicy, LoopConfig};
use crate::deadline::bounded;
use crate::document::Citation;
use crate::error::{RagError, Result};
use crate::evidence::EvidenceFilter;
use crate::llm::Generator;
use crate::planner::QueryPlanner;
use crate::quality::{AnswerGrade, QualityGate};
use crate::refiner::QueryRefiner;
use crate::retrieval::Retriever;
use crate::session::{QualitySignals, SessionState, signals};
use crate::stage::{Gate, Stage, next_stage};
use crate::web::WebSearch;

/// What a finished turn returns to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub session_id: String,
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub round_count: u32,
    pub quality: QualitySignals,
}

impl From<&SessionState> for AnswerResponse {
    fn from(state: &SessionState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            answer_text: state.answer_text.clone(),
            citations: state.citations.clone(),
            round_count: state.round_count,
            quality: state.quality.clone(),
        }
    }
}

/// The bounded state machine tying planning, retrieval, grading and
/// generation together.
///
/// Construct one via [`Orchestrator::builder()`]. An orchestrator is shared
/// across sessions; each call works on its own [`SessionState`].
pub struct Orchestrator {
    config: LoopConfig,
    planner: QueryPlanner,
    refiner: QueryRefiner,
    retriever: Retriever,
    evidence_filter: EvidenceFilter,
    answerer: AnswerGenerator,
    quality_gate: QualityGate,
    web_search: Option<Arc<dyn WebSearch>>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl Orchestrator {
    /// Create a new [`OrchestratorBuilder`].
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Answer `user_input` for `session_id`.
    ///
    /// If the session has a non-terminal checkpoint for the same input, the
    /// loop resumes from it; otherwise a fresh turn starts.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] for configuration defects and
    /// [`RagError::Checkpoint`] when the checkpoint store fails. Collaborator
    /// outages never surface here.
    pub async fn answer(&self, session_id: &str, user_input: &str) -> Result<AnswerResponse> {
        let state = match self.checkpoints.get(session_id).await? {
            Some(saved) if !saved.is_terminal() && saved.original_query == user_input => {
                info!(session_id, stage = %saved.stage, round = saved.round_count, "resuming session");
                saved
            }
            _ => {
                let state = SessionState::new(session_id, user_input);
                self.checkpoints.put(session_id, &state).await?;
                state
            }
        };

        let state = self.run(state).await?;
        Ok(AnswerResponse::from(&state))
    }

    /// Continue the checkpointed turn of `session_id`, if there is one.
    ///
    /// A terminal checkpoint is returned as is.
    ///
    /// # Errors
    ///
    /// See [`answer`](Self::answer).
    pub async fn resume(&self, session_id: &str) -> Result<Option<AnswerResponse>> {
        let Some(state) = self.checkpoints.get(session_id).await? else {
            return Ok(None);
        };
        let state = self.run(state).await?;
        Ok(Some(AnswerResponse::from(&state)))
    }

    /// The latest checkpoint of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Checkpoint`] when the store fails.
    pub async fn checkpoint(&self, session_id: &str) -> Result<Option<SessionState>> {
        self.checkpoints.get(session_id).await
    }

    /// Step `state` until it is terminal.
    ///
    /// # Errors
    ///
    /// See [`answer`](Self::answer).
    pub async fn run(&self, mut state: SessionState) -> Result<SessionState> {
        while !state.is_terminal() {
            self.step(&mut state).await?;
        }
        info!(
            session_id = %state.session_id,
            rounds = state.round_count,
            citations = state.citations.len(),
            insufficient_context = state.insufficient_context,
            "session finished"
        );
        Ok(state)
    }

    /// Execute the current stage, transition, and checkpoint the result.
    ///
    /// Does nothing on a terminal state.
    ///
    /// # Errors
    ///
    /// See [`answer`](Self::answer).
    pub async fn step(&self, state: &mut SessionState) -> Result<()> {
        let from = state.stage;
        let gate = match from {
            Stage::RefineQuery => {
                self.refine_query(state).await;
                Gate::Pass
            }
            Stage::PlanRoute => {
                self.plan_route(state)?;
                Gate::Pass
            }
            Stage::Retrieve => {
                self.retrieve(state).await?;
                Gate::Pass
            }
            Stage::GradeEvidence => self.grade_evidence(state),
            Stage::WebFallback => {
                self.web_fallback(state).await;
                Gate::Pass
            }
            Stage::Generate => {
                self.generate(state).await;
                Gate::Pass
            }
            Stage::GradeAnswer => self.grade_answer(state).await,
            Stage::GroundCheck => self.ground_check(state).await,
            Stage::Terminal => return Ok(()),
        };

        let to = next_stage(from, gate);
        state.advance(to);
        debug!(
            session_id = %state.session_id,
            from = %from,
            to = %to,
            round = state.round_count,
            "transition"
        );
        self.checkpoints.put(&state.session_id, state).await
    }

    /// Reads `current_query`, `round_count`; writes `current_query`.
    async fn refine_query(&self, state: &mut SessionState) {
        state.current_query = self.refiner.refine_round(&state.current_query, state.round_count).await;
    }

    /// Reads `current_query`, `original_query`, `retrieval_parameters`;
    /// writes `retrieval_parameters`, `needs_web_fallback`.
    fn plan_route(&self, state: &mut SessionState) -> Result<()> {
        let plan = self.planner.plan(&state.current_query, state.retrieval_parameters.as_ref())?;
        let needs_web_fallback = plan.needs_web_fallback
            || self.planner.open_world_trigger(&state.original_query).is_some();

        info!(
            session_id = %state.session_id,
            strategy = %plan.parameters.strategy,
            top_k = plan.parameters.top_k,
            needs_web_fallback,
            trigger = plan.matched_trigger.as_deref().unwrap_or(""),
            "route planned"
        );
        state.retrieval_parameters = Some(plan.parameters);
        state.needs_web_fallback = needs_web_fallback;
        Ok(())
    }

    /// Reads `current_query`, `retrieval_parameters`; writes `raw_documents`.
    async fn retrieve(&self, state: &mut SessionState) -> Result<()> {
        let params = match &state.retrieval_parameters {
            Some(params) => params.clone(),
            None => self.config.retrieval.clone(),
        };
        let docs = self.retriever.retrieve(&state.current_query, &params).await?;
        info!(
            session_id = %state.session_id,
            round = state.round_count,
            strategy = %params.strategy,
            retrieved = docs.len(),
            "retrieved documents"
        );
        state.raw_documents = docs;
        Ok(())
    }

    /// Reads `raw_documents`, `needs_web_fallback`; writes `evidence_set`,
    /// `quality`, `rounds`, `round_count`.
    fn grade_evidence(&self, state: &mut SessionState) -> Gate {
        let (evidence, assessment) = self.evidence_filter.grade(&state.raw_documents);
        state.evidence_set = evidence;
        state.record_coverage(&assessment);

        let gate = state.gate(
            assessment.need_more_evidence,
            state.needs_web_fallback,
            self.config.max_rounds,
        );
        info!(
            session_id = %state.session_id,
            round = state.round_count,
            kept = assessment.kept,
            total = assessment.total,
            average = assessment.average_score,
            need_more_evidence = assessment.need_more_evidence,
            ?gate,
            "evidence graded"
        );
        gate
    }

    /// Reads `current_query`, `raw_documents`; writes `raw_documents`, `quality`.
    async fn web_fallback(&self, state: &mut SessionState) {
        let Some(web) = &self.web_search else {
            warn!(session_id = %state.session_id, "web fallback requested but no web search is configured");
            state.quality.record(signals::WEB_RESULTS, 0usize);
            return;
        };

        let provider = web.name();
        let result = bounded(self.config.call_timeout(), web.search(&state.current_query), |after| {
            RagError::WebSearchUnavailable {
                provider: provider.to_string(),
                message: format!("timed out after {after:?}"),
            }
        })
        .await;
        let results = match result {
            Ok(results) => results,
            Err(e) => {
                warn!(session_id = %state.session_id, provider, error = %e, "web search failed");
                Vec::new()
            }
        };

        let mut appended = 0usize;
        for result in results {
            let doc = result.into_document(self.config.web_content_chars);
            let key = doc.identity();
            if state.raw_documents.iter().any(|d| d.identity() == key) {
                continue;
            }
            state.raw_documents.push(doc);
            appended += 1;
        }
        state.quality.record(signals::WEB_RESULTS, appended);
        info!(session_id = %state.session_id, provider, appended, "web results added");
    }

    /// Reads `original_query`, `evidence_set`; writes `answer_text`,
    /// `citations`, `insufficient_context`.
    async fn generate(&self, state: &mut SessionState) {
        let answer = self.answerer.generate(&state.original_query, &state.evidence_set).await;
        info!(
            session_id = %state.session_id,
            evidence = state.evidence_set.len(),
            insufficient_context = answer.insufficient_context,
            "answer generated"
        );
        state.answer_text = answer.text;
        state.citations = answer.citations;
        state.insufficient_context = answer.insufficient_context;
    }

    /// Reads `original_query`, `evidence_set`, `answer_text`,
    /// `insufficient_context`; writes `quality`, `round_count`.
    async fn grade_answer(&self, state: &mut SessionState) -> Gate {
        let grade = if state.insufficient_context {
            AnswerGrade::FAILING
        } else {
            match self
                .quality_gate
                .grade_answer(&state.original_query, &state.evidence_set, &state.answer_text)
                .await
            {
                Ok(grade) => grade,
                Err(e) => {
                    warn!(session_id = %state.session_id, error = %e, "answer grading failed, treating as failing grade");
                    AnswerGrade::FAILING
                }
            }
        };

        state.quality.record(signals::ANSWER_RELEVANCE, grade.relevance);
        state.quality.record(signals::ANSWER_USES_CITATIONS, grade.uses_citations);
        state.quality.record(signals::ANSWER_SUFFICIENT, grade.sufficient);

        let adequate = grade.is_adequate(self.quality_gate.relevance_threshold());
        let gate = state.gate(!adequate, false, self.config.max_rounds);
        info!(
            session_id = %state.session_id,
            round = state.round_count,
            relevance = grade.relevance,
            sufficient = grade.sufficient,
            ?gate,
            "answer graded"
        );
        gate
    }

    /// Reads `evidence_set`, `answer_text`; writes `quality`, and
    /// `round_count` under [`HallucinationPolicy::Retry`].
    async fn ground_check(&self, state: &mut SessionState) -> Gate {
        let hallucination =
            match self.quality_gate.check_grounding(&state.evidence_set, &state.answer_text).await {
                Ok(grade) => grade.hallucination,
                Err(e) => {
                    warn!(session_id = %state.session_id, error = %e, "grounding check failed, flagging answer");
                    true
                }
            };
        state.quality.record(signals::HALLUCINATION, hallucination);

        let gate = match self.config.hallucination_policy {
            HallucinationPolicy::RecordOnly => Gate::Pass,
            HallucinationPolicy::Retry => state.gate(hallucination, false, self.config.max_rounds),
        };
        info!(session_id = %state.session_id, hallucination, ?gate, "grounding checked");
        gate
    }
}

/// Builder for constructing an [`Orchestrator`].
///
/// `generator` and `search_backend` are required. Without a web search the
/// web fallback stage adds nothing; without a checkpoint store an
/// [`InMemoryCheckpointStore`] is used.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: LoopConfig,
    generator: Option<Arc<dyn Generator>>,
    search_backend: Option<Arc<dyn SearchBackend>>,
    web_search: Option<Arc<dyn WebSearch>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl OrchestratorBuilder {
    /// Set the loop configuration.
    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the generation collaborator.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the retrieval backend.
    pub fn search_backend(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.search_backend = Some(backend);
        self
    }

    /// Set the web search collaborator.
    pub fn web_search(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.web_search = Some(web);
        self
    }

    /// Set the checkpoint store.
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Build the [`Orchestrator`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] if the configuration is invalid
    /// or a required collaborator is missing.
    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;
        let generator = self
            .generator
            .ok_or_else(|| RagError::InvalidParameter("generator is required".to_string()))?;
        let backend = self
            .search_backend
            .ok_or_else(|| RagError::InvalidParameter("search_backend is required".to_string()))?;

        let config = self.config;
        let timeout = config.call_timeout();
        Ok(Orchestrator {
            planner: QueryPlanner::new(config.retrieval.clone(), &config.open_world_triggers),
            refiner: QueryRefiner::new(generator.clone(), config.refine_min_chars, timeout)
                .with_rewrite_on_retry(config.rewrite_on_retry),
            retriever: Retriever::new(backend, timeout),
            evidence_filter: EvidenceFilter::from_config(&config),
            answerer: AnswerGenerator::new(
                generator.clone(),
                config.snippet_chars,
                config.insufficient_context_answer.clone(),
                timeout,
            ),
            quality_gate: QualityGate::new(
                generator,
                config.answer_relevance_threshold,
                config.preview_chars,
                timeout,
            ),
            web_search: self.web_search,
            checkpoints: self
                .checkpoints
                .unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new())),
            config,
        })
    }
}
