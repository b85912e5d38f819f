//! Configuration system for pdfrag.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> CLI overrides. The user-level file
//! lives at `~/.config/pdfrag/config.toml` (platform equivalent), the
//! workspace file is `pdfrag.toml` next to where the server is started.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the pdfrag server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Origins allowed by CORS (credentials are allowed for these).
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body, in bytes. Bounds PDF uploads.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".to_string()],
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Where uploaded files and derived artifacts are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; each upload gets `<data_root>/<fileId>/`.
    pub data_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
        }
    }
}

/// Chat model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai" (any OpenAI-compatible endpoint) or "mock".
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable consulted when `base_url` is unset.
    pub base_url_env: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate in an answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retry policy for transient provider errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            base_url_env: "OPENAI_BASE_URL".to_string(),
            temperature: 0.3,
            max_tokens: Some(1024),
            timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "llm.temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push("llm.timeout_secs is 0; requests will fail immediately".to_string());
        }
        if !matches!(self.provider.as_str(), "openai" | "mock") {
            warnings.push(format!("llm.provider '{}' is not recognized", self.provider));
        }
        warnings
    }
}

/// Exponential backoff settings for LLM calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "openai" or "local".
    pub provider: String,
    /// Provider-specific model name.
    pub model: String,
    /// Environment variables tried in order for the API key.
    pub api_key_envs: Vec<String>,
    /// Optional base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variables tried in order when `base_url` is unset.
    pub base_url_envs: Vec<String>,
    /// Embedding dimensions for the local provider (0 = default of 256).
    pub dimensions: usize,
    /// Number of texts sent per embedding request.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-large".to_string(),
            api_key_envs: vec![
                "OPENAI_API_KEY".to_string(),
                "OPENAI_EMBEDDING_API_KEY".to_string(),
            ],
            base_url: None,
            base_url_envs: vec![
                "OPENAI_BASE_URL".to_string(),
                "OPENAI_EMBEDDING_BASE_URL".to_string(),
            ],
            dimensions: 0,
            batch_size: 64,
        }
    }
}

/// Chunking and search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Chunks longer than this many characters are truncated before embedding.
    pub max_chunk_chars: usize,
    /// Number of hits returned by `/index/search` when `k` is omitted.
    pub default_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 8000,
            default_k: 5,
        }
    }
}

/// Retrieval-augmented answering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Characters of chunk text kept in a citation snippet.
    pub snippet_chars: usize,
    /// Previous question/answer pairs replayed to the model.
    pub history_turns: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            snippet_chars: 200,
            history_turns: 6,
        }
    }
}

/// External rasterizer used for page images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Command compatible with `pdftoppm -png -r <dpi> <pdf> <prefix>`.
    /// Page images are skipped when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Resolution of the pages rendered at upload time.
    pub original_dpi: u32,
    /// Resolution of the pages rendered by the parse pipeline.
    pub parsed_dpi: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            command: None,
            original_dpi: 72,
            parsed_dpi: 110,
        }
    }
}

impl AppConfig {
    /// Collect non-fatal warnings for the whole configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        if self.server.cors_origins.iter().any(|o| o == "*") {
            warnings.push(
                "server.cors_origins contains '*'; credentials cannot be used with a wildcard"
                    .to_string(),
            );
        }
        if !matches!(self.embedding.provider.as_str(), "openai" | "local") {
            warnings.push(format!(
                "embedding.provider '{}' is not recognized; falling back to local",
                self.embedding.provider
            ));
        }
        if self.embedding.batch_size == 0 {
            warnings.push("embedding.batch_size is 0; using 1".to_string());
        }
        if self.index.max_chunk_chars == 0 {
            warnings.push("index.max_chunk_chars is 0; every chunk will be empty".to_string());
        }
        if self.rag.top_k == 0 {
            warnings.push("rag.top_k is 0; chat will never use retrieval".to_string());
        }
        warnings
    }
}

/// Values supplied on the command line; each one set overrides every file and
/// environment layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_root: Option<PathBuf>,
}

/// Name of the workspace-level configuration file.
pub const WORKSPACE_CONFIG_FILE: &str = "pdfrag.toml";

/// Path of the user-level configuration file, if a home directory exists.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "pdfrag", "pdfrag")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration with layered sources.
///
/// `config_file`, when given, replaces the workspace-level file and must exist.
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<AppConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    match config_file {
        Some(path) => {
            if !path.exists() {
                return Err(Box::new(figment::Error::from(format!(
                    "configuration file not found: {}",
                    path.display()
                ))));
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(ws) = workspace {
                let ws_config = ws.join(WORKSPACE_CONFIG_FILE);
                if ws_config.exists() {
                    figment = figment.merge(Toml::file(&ws_config));
                }
            }
        }
    }

    // Environment variables (PDFRAG_SERVER__PORT, PDFRAG_LLM__MODEL, etc.)
    figment = figment.merge(Env::prefixed("PDFRAG_").split("__"));

    if let Some(host) = &overrides.host {
        figment = figment.merge(Serialized::default("server.host", host));
    }
    if let Some(port) = overrides.port {
        figment = figment.merge(Serialized::default("server.port", port));
    }
    if let Some(root) = &overrides.data_root {
        figment = figment.merge(Serialized::default("storage.data_root", root));
    }

    figment.extract().map_err(Box::new)
}
