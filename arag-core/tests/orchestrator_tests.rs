//! End-to-end behavior of the retrieval loop with scripted collaborators.

mod common;

use std::sync::Arc;

use arag_core::stage::is_loop_back;
use arag_core::{
    CheckpointStore, FileCheckpointStore, HallucinationPolicy, InMemoryCheckpointStore,
    InMemorySearchBackend, LoopConfig, Orchestrator, RetrievalParameters, SessionState, Stage,
    Strategy, UNPAGED, signals,
};
use common::{
    Call, ScriptedBackend, ScriptedGenerator, ScriptedWeb, doc, grade, strong_docs, weak_docs,
    web_result,
};

const QUESTION: &str = "What value-added services does the plaza offer?";

fn dense_config() -> LoopConfig {
    LoopConfig::builder()
        .retrieval(RetrievalParameters { strategy: Strategy::Dense, ..Default::default() })
        .build()
        .unwrap()
}

struct Harness {
    orchestrator: Orchestrator,
    generator: Arc<ScriptedGenerator>,
    backend: Arc<ScriptedBackend>,
    checkpoints: Arc<InMemoryCheckpointStore>,
}

fn harness(config: LoopConfig, generator: ScriptedGenerator, backend: ScriptedBackend) -> Harness {
    harness_with_web(config, generator, backend, None)
}

fn harness_with_web(
    config: LoopConfig,
    generator: ScriptedGenerator,
    backend: ScriptedBackend,
    web: Option<Arc<ScriptedWeb>>,
) -> Harness {
    let generator = Arc::new(generator);
    let backend = Arc::new(backend);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let mut builder = Orchestrator::builder()
        .config(config)
        .generator(generator.clone())
        .search_backend(backend.clone())
        .checkpoint_store(checkpoints.clone());
    if let Some(web) = web {
        builder = builder.web_search(web);
    }
    Harness { orchestrator: builder.build().unwrap(), generator, backend, checkpoints }
}

async fn final_state(h: &Harness, session_id: &str) -> SessionState {
    h.checkpoints.get(session_id).await.unwrap().unwrap()
}

fn stages(state: &SessionState) -> Vec<Stage> {
    std::iter::once(Stage::RefineQuery).chain(state.trail.iter().map(|t| t.to)).collect()
}

fn loop_backs(state: &SessionState) -> usize {
    state.trail.iter().filter(|t| is_loop_back(t.from, t.to)).count()
}

#[tokio::test]
async fn strong_evidence_answers_in_a_single_round() {
    let h = harness(
        dense_config(),
        ScriptedGenerator::new(),
        ScriptedBackend::fixed(strong_docs(), Vec::new()),
    );

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.answer_text, "scripted answer");
    assert_eq!(response.round_count, 0);
    assert_eq!(response.citations.len(), 3);
    assert_eq!(response.citations[0].source, "guide.pdf");
    assert_eq!(response.quality.flag(signals::HALLUCINATION), Some(false));
    assert_eq!(response.quality.score(signals::ANSWER_RELEVANCE), Some(0.9));

    let state = final_state(&h, "s1").await;
    assert_eq!(
        stages(&state),
        vec![
            Stage::RefineQuery,
            Stage::PlanRoute,
            Stage::Retrieve,
            Stage::GradeEvidence,
            Stage::Generate,
            Stage::GradeAnswer,
            Stage::GroundCheck,
            Stage::Terminal,
        ]
    );
    assert_eq!(h.generator.calls(), vec![Call::Answer, Call::GradeAnswer, Call::Grounding]);
    assert_eq!(h.backend.calls(), 1);
}

#[tokio::test]
async fn hybrid_retrieval_queries_both_modes() {
    let h = harness(
        LoopConfig::default(),
        ScriptedGenerator::new(),
        ScriptedBackend::fixed(strong_docs(), strong_docs()),
    );
    h.orchestrator.answer("s1", QUESTION).await.unwrap();

    let state = final_state(&h, "s1").await;
    // Fused scores never reach the default threshold, so every round retries.
    assert_eq!(state.rounds.len(), 3);
    assert_eq!(state.rounds[0].strategy, Strategy::Hybrid);
    assert_eq!(h.backend.calls(), 6);
    assert!(state.evidence_set.iter().all(|d| d.relevance_score < 0.05));
}

#[tokio::test]
async fn ceiling_forces_generation_over_weak_evidence() {
    let h = harness(
        dense_config(),
        ScriptedGenerator::new(),
        ScriptedBackend::fixed(weak_docs(), Vec::new()),
    );

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.round_count, 3);
    assert_eq!(response.answer_text, "scripted answer");
    assert_eq!(response.citations.len(), 2, "fallback keeps the best documents");

    let state = final_state(&h, "s1").await;
    assert_eq!(state.rounds.len(), 3);
    assert!(state.rounds.iter().all(|r| r.need_more_evidence));
    assert_eq!(h.backend.calls(), 3);
    assert_eq!(h.generator.count(Call::Answer), 1);
    assert!(state.trail.iter().any(|t| t.from == Stage::GradeEvidence && t.to == Stage::Generate));
    assert_eq!(state.stage, Stage::Terminal);
}

#[tokio::test]
async fn empty_evidence_short_circuits_without_generation() {
    let config = dense_config();
    let h = harness(config.clone(), ScriptedGenerator::new(), ScriptedBackend::empty());

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.answer_text, config.insufficient_context_answer);
    assert!(response.citations.is_empty());
    assert_eq!(response.round_count, 3);
    assert!(h.generator.calls().is_empty(), "generator must not be called: {:?}", h.generator.calls());

    let state = final_state(&h, "s1").await;
    assert!(state.insufficient_context);
    let last = state.trail.last().unwrap();
    assert_eq!((last.from, last.to), (Stage::GradeAnswer, Stage::Terminal));
    assert_eq!(state.quality.flag(signals::ANSWER_SUFFICIENT), Some(false));
}

#[tokio::test]
async fn backend_outage_degrades_to_insufficient_context() {
    let config = dense_config();
    let h = harness(config.clone(), ScriptedGenerator::new(), ScriptedBackend::failing());

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.answer_text, config.insufficient_context_answer);
    assert!(response.citations.is_empty());
    assert!(h.generator.calls().is_empty());
}

#[tokio::test]
async fn open_world_query_routes_to_web_fallback() {
    let web = Arc::new(ScriptedWeb::returning(vec![
        web_result("https://news.example/a", 0.8),
        web_result("https://news.example/b", 0.7),
    ]));
    let h = harness_with_web(
        dense_config(),
        ScriptedGenerator::new(),
        ScriptedBackend::fixed(vec![doc("misc.pdf", 3, 0.1)], Vec::new()),
        Some(web.clone()),
    );

    let response = h.orchestrator.answer("s1", "万达广场最新的增值服务有哪些").await.unwrap();
    assert_eq!(response.round_count, 1);
    assert_eq!(response.quality.count(signals::WEB_RESULTS), Some(2));
    assert_eq!(response.citations.len(), 2);
    assert!(response.citations.iter().all(|c| c.page_number == UNPAGED && c.keywords == "web"));

    let state = final_state(&h, "s1").await;
    assert!(state.needs_web_fallback);
    assert!(state.trail.iter().any(|t| (t.from, t.to) == (Stage::GradeEvidence, Stage::WebFallback)));
    assert!(!state.trail.iter().any(|t| (t.from, t.to) == (Stage::GradeEvidence, Stage::RefineQuery)));
    assert!(state.trail.iter().any(|t| (t.from, t.to) == (Stage::WebFallback, Stage::GradeEvidence)));
    assert_eq!(web.calls(), 1);
    assert_eq!(h.backend.calls(), 1, "web fallback re-grades without retrieving again");
}

#[tokio::test]
async fn repeated_web_results_are_not_appended_twice() {
    let web = Arc::new(ScriptedWeb::returning(vec![web_result("https://news.example/a", 0.05)]));
    let h = harness_with_web(
        dense_config(),
        ScriptedGenerator::new(),
        ScriptedBackend::fixed(vec![doc("misc.pdf", 3, 0.1)], Vec::new()),
        Some(web.clone()),
    );

    let response = h.orchestrator.answer("s1", "latest news about the plaza").await.unwrap();
    assert_eq!(response.round_count, 3);
    assert_eq!(web.calls(), 2);
    assert_eq!(response.quality.count(signals::WEB_RESULTS), Some(0));

    let state = final_state(&h, "s1").await;
    let web_docs = state.raw_documents.iter().filter(|d| d.page_number == UNPAGED).count();
    assert_eq!(web_docs, 1);
}

#[tokio::test]
async fn web_outage_is_an_empty_result() {
    let web = Arc::new(ScriptedWeb::failing());
    let h = harness_with_web(
        dense_config(),
        ScriptedGenerator::new(),
        ScriptedBackend::fixed(weak_docs(), Vec::new()),
        Some(web.clone()),
    );

    let response = h.orchestrator.answer("s1", "最新 停车 收费 标准 是多少").await.unwrap();
    assert_eq!(response.round_count, 3);
    assert_eq!(response.quality.count(signals::WEB_RESULTS), Some(0));
    assert_eq!(web.calls(), 2);
}

#[tokio::test]
async fn failing_answer_grade_loops_back_to_refinement() {
    let generator = ScriptedGenerator::new().with_grades(vec![Some(grade(0.2, true))]);
    let h = harness(dense_config(), generator, ScriptedBackend::fixed(strong_docs(), Vec::new()));

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.round_count, 1);

    let state = final_state(&h, "s1").await;
    assert!(state.trail.iter().any(|t| (t.from, t.to) == (Stage::GradeAnswer, Stage::RefineQuery)));
    assert_eq!(h.generator.count(Call::Answer), 2);
    assert_eq!(h.generator.count(Call::Grounding), 1);
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn answer_retries_share_the_ceiling() {
    let generator = ScriptedGenerator::new().with_default_grade(Some(grade(0.9, false)));
    let h = harness(dense_config(), generator, ScriptedBackend::fixed(strong_docs(), Vec::new()));

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.round_count, 3);
    assert_eq!(response.answer_text, "scripted answer", "the last answer is kept");
    assert_eq!(h.generator.count(Call::Answer), 3);
    assert_eq!(h.generator.count(Call::Grounding), 0);

    let state = final_state(&h, "s1").await;
    let last = state.trail.last().unwrap();
    assert_eq!((last.from, last.to), (Stage::GradeAnswer, Stage::Terminal));
}

#[tokio::test]
async fn grading_failure_counts_as_failing_grade() {
    let generator = ScriptedGenerator::new().with_default_grade(None);
    let h = harness(dense_config(), generator, ScriptedBackend::fixed(strong_docs(), Vec::new()));

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.round_count, 3);
    assert_eq!(response.quality.score(signals::ANSWER_RELEVANCE), Some(0.0));
    assert_eq!(h.generator.count(Call::GradeAnswer), 3);
}

#[tokio::test]
async fn answer_generation_failure_retries_then_gives_up() {
    let config = dense_config();
    let generator = ScriptedGenerator::new().failing_answers();
    let h = harness(config.clone(), generator, ScriptedBackend::fixed(strong_docs(), Vec::new()));

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.answer_text, config.insufficient_context_answer);
    assert!(response.citations.is_empty());
    assert_eq!(h.generator.count(Call::Answer), 3);
    assert_eq!(h.generator.count(Call::GradeAnswer), 0, "insufficient answers are not graded");
}

#[tokio::test]
async fn grounding_flag_is_recorded_only_by_default() {
    let generator = ScriptedGenerator::new().with_grounding(Some(true));
    let h = harness(dense_config(), generator, ScriptedBackend::fixed(strong_docs(), Vec::new()));

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.round_count, 0);
    assert_eq!(response.quality.flag(signals::HALLUCINATION), Some(true));
}

#[tokio::test]
async fn grounding_failure_flags_hallucination() {
    let generator = ScriptedGenerator::new().with_grounding(None);
    let h = harness(dense_config(), generator, ScriptedBackend::fixed(strong_docs(), Vec::new()));

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.quality.flag(signals::HALLUCINATION), Some(true));
    assert_eq!(response.round_count, 0);
}

#[tokio::test]
async fn retry_policy_loops_on_hallucination() {
    let config = LoopConfig::builder()
        .retrieval(RetrievalParameters { strategy: Strategy::Dense, ..Default::default() })
        .hallucination_policy(HallucinationPolicy::Retry)
        .build()
        .unwrap();
    let generator = ScriptedGenerator::new().with_grounding(Some(true));
    let h = harness(config, generator, ScriptedBackend::fixed(strong_docs(), Vec::new()));

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.round_count, 3);
    assert_eq!(h.generator.count(Call::Grounding), 3);

    let state = final_state(&h, "s1").await;
    assert_eq!(loop_backs(&state), 2);
    let last = state.trail.last().unwrap();
    assert_eq!((last.from, last.to), (Stage::GroundCheck, Stage::Terminal));
}

#[tokio::test]
async fn short_queries_are_refined_before_retrieval() {
    let generator = ScriptedGenerator::new().rewriting_to("万达 停车 收费 标准 时长");
    let h = harness(dense_config(), generator, ScriptedBackend::fixed(strong_docs(), Vec::new()));

    h.orchestrator.answer("s1", "停车费").await.unwrap();

    let state = final_state(&h, "s1").await;
    assert_eq!(state.original_query, "停车费");
    assert_eq!(state.current_query, "万达 停车 收费 标准 时长");
    assert_eq!(h.backend.queries()[0].1, "万达 停车 收费 标准 时长");
    assert_eq!(h.generator.calls()[0], Call::Rewrite);
    // The answer addresses what the user asked.
    assert!(h.generator.prompts()[1].contains("Question:\n停车费"));
}

#[tokio::test]
async fn malformed_filter_is_a_hard_failure() {
    let config = LoopConfig::builder()
        .retrieval(RetrievalParameters {
            filter_expression: "page_number ~ 1".to_string(),
            ..Default::default()
        })
        .build()
        .unwrap();
    let orchestrator = Orchestrator::builder()
        .config(config)
        .generator(Arc::new(ScriptedGenerator::new()))
        .search_backend(Arc::new(InMemorySearchBackend::new()))
        .build()
        .unwrap();

    let err = orchestrator.answer("s1", QUESTION).await.unwrap_err();
    assert!(err.is_invalid_parameter());
}

#[tokio::test]
async fn builder_requires_collaborators() {
    let err = Orchestrator::builder()
        .search_backend(Arc::new(ScriptedBackend::empty()))
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("generator"));

    let err = Orchestrator::builder()
        .generator(Arc::new(ScriptedGenerator::new()))
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("search_backend"));
}

#[tokio::test]
async fn every_transition_is_checkpointed_and_resumable() {
    let h = harness(
        dense_config(),
        ScriptedGenerator::new(),
        ScriptedBackend::fixed(strong_docs(), Vec::new()),
    );

    let mut state = SessionState::new("s1", QUESTION);
    for _ in 0..3 {
        h.orchestrator.step(&mut state).await.unwrap();
    }
    let saved = h.checkpoints.get("s1").await.unwrap().unwrap();
    assert_eq!(saved, state);
    assert_eq!(saved.stage, Stage::GradeEvidence);

    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.citations.len(), 3);
    assert_eq!(h.backend.calls(), 1, "resumed turn does not retrieve again");

    let state = final_state(&h, "s1").await;
    assert_eq!(state.trail.len(), 7);
    assert!(state.is_terminal());
}

#[tokio::test]
async fn new_question_starts_a_fresh_turn() {
    let h = harness(
        dense_config(),
        ScriptedGenerator::new(),
        ScriptedBackend::fixed(strong_docs(), Vec::new()),
    );
    h.orchestrator.answer("s1", QUESTION).await.unwrap();
    h.orchestrator.answer("s1", "How long is free parking at the plaza?").await.unwrap();

    let state = final_state(&h, "s1").await;
    assert_eq!(state.original_query, "How long is free parking at the plaza?");
    assert_eq!(state.trail.len(), 7);
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn resume_continues_or_reports_missing_sessions() {
    let h = harness(
        dense_config(),
        ScriptedGenerator::new(),
        ScriptedBackend::fixed(strong_docs(), Vec::new()),
    );
    assert!(h.orchestrator.resume("nobody").await.unwrap().is_none());

    let mut state = SessionState::new("s2", QUESTION);
    h.orchestrator.step(&mut state).await.unwrap();
    let response = h.orchestrator.resume("s2").await.unwrap().unwrap();
    assert_eq!(response.answer_text, "scripted answer");
    assert!(final_state(&h, "s2").await.is_terminal());
}

#[tokio::test]
async fn file_checkpoints_capture_the_finished_turn() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCheckpointStore::open(dir.path()).await.unwrap());
    let orchestrator = Orchestrator::builder()
        .config(dense_config())
        .generator(Arc::new(ScriptedGenerator::new()))
        .search_backend(Arc::new(ScriptedBackend::fixed(strong_docs(), Vec::new())))
        .checkpoint_store(store.clone())
        .build()
        .unwrap();

    let response = orchestrator.answer("thread-1", QUESTION).await.unwrap();
    let saved = store.get("thread-1").await.unwrap().unwrap();
    assert!(saved.is_terminal());
    assert_eq!(saved.answer_text, response.answer_text);
    assert_eq!(saved.citations, response.citations);
}

#[tokio::test]
async fn corrupt_file_checkpoint_starts_a_fresh_turn() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("s1.json"), b"{not json").await.unwrap();
    let store = Arc::new(FileCheckpointStore::open(dir.path()).await.unwrap());
    let orchestrator = Orchestrator::builder()
        .config(dense_config())
        .generator(Arc::new(ScriptedGenerator::new()))
        .search_backend(Arc::new(ScriptedBackend::fixed(strong_docs(), Vec::new())))
        .checkpoint_store(store.clone())
        .build()
        .unwrap();

    let response = orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.answer_text, "scripted answer");
    assert!(store.get("s1").await.unwrap().unwrap().is_terminal());
}

#[tokio::test]
async fn round_counter_matches_loop_backs() {
    let h = harness(
        dense_config(),
        ScriptedGenerator::new(),
        ScriptedBackend::rounds(vec![weak_docs(), weak_docs(), strong_docs()], Vec::new()),
    );
    let response = h.orchestrator.answer("s1", QUESTION).await.unwrap();
    assert_eq!(response.round_count, 2);

    let state = final_state(&h, "s1").await;
    let mut seen = 0;
    let mut previous = 0;
    for t in &state.trail {
        assert!(t.round_count >= previous);
        previous = t.round_count;
        if is_loop_back(t.from, t.to) {
            seen += 1;
            assert_eq!(t.round_count, seen);
        }
    }
    assert_eq!(seen, 2);
    assert_eq!(state.rounds.iter().map(|r| r.round).collect::<Vec<_>>(), vec![0, 1, 2]);
}
