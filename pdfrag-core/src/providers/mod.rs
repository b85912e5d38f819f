//! LLM provider implementations.
//!
//! Provides the OpenAI-compatible chat provider (OpenAI, Azure OpenAI, Ollama,
//! vLLM, LM Studio, and proxies) and the retry helper shared by HTTP calls.
//!
//! Use `create_provider()` to instantiate the provider named in the config.

pub mod openai_compat;

use crate::brain::{LlmProvider, MockLlmProvider};
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use openai_compat::OpenAiCompatibleProvider;

/// Default endpoint when neither the config nor the environment names one.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`), `LlmError::Streaming`,
/// `LlmError::Connection`, and `LlmError::Timeout`. Permanent errors (auth, parse) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt >= config.max_retries {
                    return Err(e);
                }
                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Check if an error is retryable (transient).
fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. }
            | LlmError::Streaming { .. }
            | LlmError::Connection { .. }
            | LlmError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    if let LlmError::RateLimited { retry_after_secs } = err {
        return (retry_after_secs * 1000).max(computed);
    }
    computed
}

/// Exponential backoff with up to 25% jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        let jitter = (capped as f64 * 0.25 * rand::thread_rng().r#gen::<f64>()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Read the API key for the chat provider from its environment variable.
///
/// Local endpoints (localhost / 127.0.0.1) do not require a key.
pub fn resolve_api_key(config: &LlmConfig, base_url: &str) -> Result<String, LlmError> {
    match std::env::var(&config.api_key_env) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ if is_local_url(base_url) => Ok(String::new()),
        _ => Err(LlmError::AuthFailed {
            provider: format!("env var '{}' not set", config.api_key_env),
        }),
    }
}

/// Resolve the chat endpoint: explicit config, then environment, then OpenAI.
pub fn resolve_base_url(config: &LlmConfig) -> String {
    config
        .base_url
        .clone()
        .or_else(|| std::env::var(&config.base_url_env).ok())
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
        .trim_end_matches('/')
        .to_string()
}

pub(crate) fn is_local_url(url: &str) -> bool {
    url.contains("localhost") || url.contains("127.0.0.1")
}

/// Create the LLM provider named by `config.provider`.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiCompatibleProvider::new(config)?)),
        "mock" => {
            tracing::warn!("Using the mock LLM provider; answers are canned");
            Ok(Arc::new(MockLlmProvider::new()))
        }
        other => Err(LlmError::UnknownProvider {
            provider: other.to_string(),
        }),
    }
}
