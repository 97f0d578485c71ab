//! TOML configuration parsing and validation.
//!
//! Every section is optional; omitted sections take the defaults below.
//! Credentials are never read from the file, only from the environment
//! variables named here.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("./documents")
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks handed to the generation backend.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Candidate pool size fetched by similarity before diversity re-ranking.
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    /// 1.0 = pure relevance, 0.0 = pure diversity.
    #[serde(default = "default_diversity")]
    pub diversity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            diversity: default_diversity(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_fetch_k() -> usize {
    20
}
fn default_diversity() -> f32 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider (default: `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// Environment variable holding the API key. Defaults per provider:
    /// `GOOGLE_API_KEY` for gemini, `OPENAI_API_KEY` for openai.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Overrides the provider's API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            temperature: default_temperature(),
            max_output_tokens: None,
            api_key_env: None,
            base_url: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "gemini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

impl LifecycleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}
fn default_max_wait_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| Error::config(format!("failed to parse config file: {}", e)))?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_chars == 0 {
            return Err(Error::config("chunking.max_chars must be > 0"));
        }
        if self.chunking.overlap_chars >= self.chunking.max_chars {
            return Err(Error::config(
                "chunking.overlap_chars must be smaller than chunking.max_chars",
            ));
        }

        if self.retrieval.k == 0 {
            return Err(Error::config("retrieval.k must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.retrieval.diversity) {
            return Err(Error::config("retrieval.diversity must be in [0.0, 1.0]"));
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::config("embedding.batch_size must be > 0"));
        }
        if self.embedding.dims == Some(0) {
            return Err(Error::config("embedding.dims must be > 0"));
        }
        match self.embedding.provider.as_str() {
            "local" | "openai" | "ollama" | "hashing" => {}
            other => {
                return Err(Error::config(format!(
                    "unknown embedding provider: '{}'. Must be local, openai, ollama, or hashing.",
                    other
                )))
            }
        }
        if matches!(self.embedding.provider.as_str(), "openai" | "ollama")
            && self.embedding.model.is_none()
        {
            return Err(Error::config(format!(
                "embedding.model must be specified when provider is '{}'",
                self.embedding.provider
            )));
        }

        match self.generation.provider.as_str() {
            "gemini" | "openai" => {}
            other => {
                return Err(Error::config(format!(
                    "unknown generation provider: '{}'. Must be gemini or openai.",
                    other
                )))
            }
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(Error::config("generation.temperature must be in [0.0, 2.0]"));
        }

        if self.lifecycle.poll_interval_ms == 0 {
            return Err(Error::config("lifecycle.poll_interval_ms must be > 0"));
        }

        Ok(())
    }
}
