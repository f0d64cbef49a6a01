//! # arag-core
//!
//! An adaptive retrieval-augmented answering loop.
//!
//! Each user turn runs through a bounded state machine that refines the
//! query, plans a retrieval route, retrieves and grades evidence, optionally
//! falls back to web search, generates an answer strictly from the evidence,
//! and grades the answer. Failed gates loop back for another round until a
//! shared round ceiling forces a best-effort answer.
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`fusion`] | Reciprocal-rank fusion of dense and lexical result lists |
//! | [`evidence`] | Score threshold filtering with a guaranteed minimum yield |
//! | [`retrieval`] | Dense, lexical and hybrid retrieval with per-call timeouts |
//! | [`planner`] | Retrieval parameters and open-world detection |
//! | [`refiner`] | Generator-backed rewriting of weak queries |
//! | [`quality`] | Answer adequacy and grounding checks |
//! | [`answer`] | Evidence-only answer generation with citations |
//! | [`orchestrator`] | The state machine and its checkpoints |
//!
//! Collaborators sit behind traits: [`SearchBackend`], [`Generator`],
//! [`WebSearch`], [`EmbeddingProvider`] and [`CheckpointStore`].
//!
//! ## Features
//!
//! - `openai`: OpenAI-compatible chat and embedding collaborators.
//! - `tavily`: Tavily web search.
//! - `full`: everything above.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use arag_core::{InMemorySearchBackend, LoopConfig, Orchestrator};
//! use arag_core::openai::{OpenAIChatGenerator, OpenAIEmbeddingProvider};
//!
//! let backend = InMemorySearchBackend::with_embedder(Arc::new(OpenAIEmbeddingProvider::from_env()?));
//! backend.add_documents(documents).await?;
//!
//! let orchestrator = Orchestrator::builder()
//!     .config(LoopConfig::default())
//!     .generator(Arc::new(OpenAIChatGenerator::from_env()?))
//!     .search_backend(Arc::new(backend))
//!     .build()?;
//!
//! let response = orchestrator.answer("thread-1", "停车怎么收费？").await?;
//! ```

pub mod answer;
pub mod backend;
pub mod checkpoint;
pub mod config;
mod deadline;
pub mod document;
pub mod embedding;
pub mod error;
pub mod evidence;
pub mod expr;
pub mod fusion;
pub mod inmemory;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod quality;
pub mod refiner;
pub mod retrieval;
pub mod session;
pub mod stage;
pub mod web;

#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "tavily")]
pub mod tavily;

pub use answer::{AnswerGenerator, GeneratedAnswer, render_context};
pub use backend::{SearchBackend, SearchMode, SearchRequest};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use config::{HallucinationPolicy, LoopConfig, LoopConfigBuilder};
pub use document::{Citation, Document, DocumentKey, UNPAGED};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use evidence::{CoverageAssessment, EvidenceFilter, filter_by_score};
pub use expr::FilterExpr;
pub use fusion::reciprocal_rank_fusion;
pub use inmemory::InMemorySearchBackend;
pub use llm::{Generator, OutputSchema, StructuredOutput};
pub use orchestrator::{AnswerResponse, Orchestrator, OrchestratorBuilder};
pub use planner::{QueryPlanner, RoutePlan};
pub use quality::{AnswerGrade, GroundingGrade, QualityGate};
pub use refiner::QueryRefiner;
pub use retrieval::Retriever;
pub use session::{QualitySignals, RetrievalParameters, SessionState, Signal, Strategy, signals};
pub use stage::{Gate, Stage, TransitionRecord, next_stage};
pub use web::{WebResult, WebSearch};
