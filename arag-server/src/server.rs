use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use arag_core::openai::{OpenAIChatGenerator, OpenAIEmbeddingProvider};
use arag_core::tavily::TavilyWebSearch;
use arag_core::{
    AnswerResponse, FileCheckpointStore, InMemorySearchBackend, Orchestrator, RagError,
    SessionState,
};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::ServerConfig,
    corpus::load_corpus,
    protocol::{AskRequest, ErrorResponse, SessionCreateResponse},
};

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator: Arc::new(orchestrator) }
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/session", post(create_session))
        .route("/api/session/{session_id}", get(get_session))
        .route("/api/ask/{session_id}", post(ask))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Assemble an orchestrator from OpenAI-compatible collaborators, the
/// configured corpus, optional Tavily web search and checkpoint directory.
pub async fn build_orchestrator(config: &ServerConfig) -> anyhow::Result<Orchestrator> {
    let loop_config = config.load_loop_config()?;
    let api_key = config
        .openai_api_key
        .clone()
        .context("OPENAI_API_KEY must be set to run the answering loop")?;

    let mut generator = OpenAIChatGenerator::new(api_key.clone())?;
    let mut embedder = OpenAIEmbeddingProvider::new(api_key)?;
    if let Some(base_url) = &config.openai_base_url {
        generator = generator.with_base_url(base_url.clone());
        embedder = embedder.with_base_url(base_url.clone());
    }
    if let Some(model) = &config.chat_model {
        generator = generator.with_model(model.clone());
    }
    if let Some(model) = &config.embedding_model {
        embedder = embedder.with_model(model.clone());
    }

    let backend = InMemorySearchBackend::with_embedder(Arc::new(embedder));
    match &config.corpus {
        Some(path) => {
            let documents = load_corpus(path).await?;
            let indexed = backend.add_documents(documents).await?;
            info!(documents = indexed, corpus = %path.display(), "corpus indexed");
        }
        None => warn!("no corpus configured, retrieval will find nothing"),
    }

    let mut builder = Orchestrator::builder()
        .config(loop_config)
        .generator(Arc::new(generator))
        .search_backend(Arc::new(backend));

    if let Some(key) = &config.tavily_api_key {
        builder = builder.web_search(Arc::new(TavilyWebSearch::new(key.clone())?));
    } else {
        info!("TAVILY_API_KEY not set, web fallback disabled");
    }

    if let Some(dir) = &config.checkpoint_dir {
        let store = FileCheckpointStore::open(dir.clone()).await?;
        info!(dir = %dir.display(), "file checkpoints enabled");
        builder = builder.checkpoint_store(Arc::new(store));
    }

    Ok(builder.build()?)
}

pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config).await?;
    let app = app_router(AppState::new(orchestrator));
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for arag server")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("arag listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({"status":"ok","service":"arag"}))
}

async fn create_session() -> impl IntoResponse {
    let session_id = Uuid::new_v4().to_string();
    Json(SessionCreateResponse { session_id })
}

async fn ask(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    if request.user_input.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("user_input cannot be empty")),
        ));
    }

    let response = state
        .orchestrator
        .answer(&session_id, &request.user_input)
        .await
        .map_err(|e| rag_error_response(&session_id, e))?;

    info!(
        session_id = %session_id,
        round = response.round_count,
        citations = response.citations.len(),
        "answered"
    );
    Ok(Json(response))
}

async fn get_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SessionState>, ApiError> {
    match state.orchestrator.checkpoint(&session_id).await {
        Ok(Some(session)) => Ok(Json(session)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("session {session_id} not found"))),
        )),
        Err(e) => Err(rag_error_response(&session_id, e)),
    }
}

fn rag_error_response(session_id: &str, err: RagError) -> ApiError {
    let status = match err {
        RagError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(session_id, error = %err, "request failed");
    } else {
        warn!(session_id, error = %err, "request rejected");
    }
    (status, Json(ErrorResponse::new(err.to_string())))
}
