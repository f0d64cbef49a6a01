//! Process configuration read from the environment.

use std::path::{Path, PathBuf};

use anyhow::Context;
use arag_core::LoopConfig;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8099;

/// Everything the `arag` binary needs to assemble an orchestrator.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JSON array or JSON-lines corpus loaded at start.
    pub corpus: Option<PathBuf>,
    /// JSON file deserialized into [`LoopConfig`].
    pub loop_config: Option<PathBuf>,
    /// Directory for file checkpoints; in-memory when unset.
    pub checkpoint_dir: Option<PathBuf>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub chat_model: Option<String>,
    pub embedding_model: Option<String>,
    pub tavily_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            corpus: None,
            loop_config: None,
            checkpoint_dir: None,
            openai_api_key: None,
            openai_base_url: None,
            chat_model: None,
            embedding_model: None,
            tavily_api_key: None,
        }
    }
}

impl ServerConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            host: get("ARAG_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: get("ARAG_PORT")
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
            corpus: get("ARAG_CORPUS").map(PathBuf::from),
            loop_config: get("ARAG_LOOP_CONFIG").map(PathBuf::from),
            checkpoint_dir: get("ARAG_CHECKPOINT_DIR").map(PathBuf::from),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            chat_model: get("ARAG_CHAT_MODEL"),
            embedding_model: get("ARAG_EMBEDDING_MODEL"),
            tavily_api_key: get("TAVILY_API_KEY"),
        }
    }

    /// The loop configuration file contents, or defaults when none is set.
    pub fn load_loop_config(&self) -> anyhow::Result<LoopConfig> {
        match &self.loop_config {
            Some(path) => read_loop_config(path),
            None => Ok(LoopConfig::default()),
        }
    }
}

fn read_loop_config(path: &Path) -> anyhow::Result<LoopConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read loop config {}", path.display()))?;
    let config: LoopConfig = serde_json::from_str(&raw)
        .with_context(|| format!("invalid loop config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
