//! `arag-server` exposes the adaptive retrieval loop over HTTP.
//!
//! One `POST /api/ask/{session_id}` runs a full turn and returns the answer
//! with its citations. Sessions are checkpointed, so a repeated question for
//! an interrupted session resumes where it stopped.

pub mod config;
pub mod corpus;
pub mod protocol;
pub mod server;

pub use config::ServerConfig;
pub use server::{AppState, app_router, build_orchestrator, run_server};
