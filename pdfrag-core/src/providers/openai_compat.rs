//! OpenAI-compatible LLM provider.
//!
//! Supports OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any
//! endpoint that follows the OpenAI chat completions API format.

use super::{resolve_api_key, resolve_base_url, with_retry};
use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, StreamEvent, TokenUsage};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// OpenAI-compatible LLM provider.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiCompatibleProvider {
    /// Create a new provider from configuration.
    ///
    /// Reads the API key from the environment variable named in `config.api_key_env`.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = resolve_base_url(config);
        let api_key = resolve_api_key(config, &base_url)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        debug!(base_url = %base_url, model = %config.model, "Created OpenAI-compatible provider");
        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            retry: config.retry.clone(),
        })
    }

    fn messages_to_json(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({ "role": m.role.to_string(), "content": m.content }))
            .collect()
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": Self::messages_to_json(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header("Content-Type", "application/json")
            .json(body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        builder
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            LlmError::Connection {
                message: format!("Request failed: {}", e),
            }
        }
    }

    /// Parse a single SSE line into a JSON chunk. Returns `None` for comments,
    /// blank lines, non-data fields and the `[DONE]` sentinel.
    fn parse_sse_line(line: &str) -> Option<Value> {
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            return None;
        }
        serde_json::from_str(data).ok()
    }

    fn parse_usage(chunk: &Value) -> Option<TokenUsage> {
        let u = chunk.get("usage").filter(|u| !u.is_null())?;
        Some(TokenUsage {
            input_tokens: u.get("prompt_tokens").and_then(|t| t.as_u64()).unwrap_or(0) as usize,
            output_tokens: u
                .get("completion_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize,
        })
    }

    fn delta_content(chunk: &Value) -> Option<&str> {
        chunk
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()
            .filter(|s| !s.is_empty())
    }

    /// Map an HTTP error status to an `LlmError`.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed ({})", status);
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                // "Rate limit reached ... try again in 20s"
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim().trim_end_matches('.').trim_end_matches('s').parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            s if s >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }

    async fn complete_once(&self, body: &Value) -> Result<CompletionResponse, LlmError> {
        let response = self
            .post(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &text));
        }

        let json: Value = response.json().await.map_err(|e| LlmError::ResponseParse {
            message: format!("Invalid JSON body: {}", e),
        })?;
        let choice = json
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Response has no choices".to_string(),
            })?;
        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default();

        Ok(CompletionResponse {
            message: Message::assistant(content),
            usage: Self::parse_usage(&json).unwrap_or_default(),
            model: json
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(&self.model)
                .to_string(),
            finish_reason: choice
                .get("finish_reason")
                .and_then(|f| f.as_str())
                .map(|s| s.to_string()),
        })
    }
}

/// Splits a byte stream into text lines, buffering partial lines (and partial
/// UTF-8 sequences) across chunk boundaries.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    /// Feed a chunk and return every line completed by it, without the line
    /// terminator.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Whatever is left after the stream ends.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        Some(rest)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.request_body(&request, false);
        with_retry(&self.retry, || self.complete_once(&body)).await
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let body = self.request_body(&request, true);
        let response = self
            .post(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &text));
        }

        let mut usage = TokenUsage::default();
        let mut buffer = SseLineBuffer::default();
        let mut stream = response.bytes_stream();
        let mut finished = false;

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Streaming {
                message: format!("Failed to read stream: {}", e),
            })?;
            for line in buffer.push(&chunk) {
                let line = line.trim();
                if line == "data: [DONE]" || line == "data:[DONE]" {
                    finished = true;
                    break 'outer;
                }
                let Some(data) = Self::parse_sse_line(line) else {
                    continue;
                };
                if let Some(err) = data.get("error") {
                    return Err(LlmError::Streaming {
                        message: err
                            .get("message")
                            .and_then(|m| m.as_str())
                            .unwrap_or("provider reported an error")
                            .to_string(),
                    });
                }
                if let Some(u) = Self::parse_usage(&data) {
                    usage = u;
                }
                if let Some(content) = Self::delta_content(&data)
                    && tx.send(StreamEvent::Token(content.to_string())).await.is_err()
                {
                    debug!("Stream receiver dropped; aborting completion");
                    return Ok(());
                }
            }
        }

        if !finished {
            if let Some(rest) = buffer.finish()
                && let Some(data) = Self::parse_sse_line(&rest)
                && let Some(content) = Self::delta_content(&data)
            {
                let _ = tx.send(StreamEvent::Token(content.to_string())).await;
            }
            warn!("Completion stream ended without [DONE]");
        }

        let _ = tx.send(StreamEvent::Done { usage }).await;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_line() {
        let v = OpenAiCompatibleProvider::parse_sse_line(
            r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
        )
        .unwrap();
        assert_eq!(OpenAiCompatibleProvider::delta_content(&v), Some("Hi"));
        assert!(OpenAiCompatibleProvider::parse_sse_line("data: [DONE]").is_none());
        assert!(OpenAiCompatibleProvider::parse_sse_line(": keep-alive").is_none());
        assert!(OpenAiCompatibleProvider::parse_sse_line("event: ping").is_none());
    }

    #[test]
    fn test_delta_content_skips_empty_and_role_chunks() {
        let v: Value =
            serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#)
                .unwrap();
        assert_eq!(OpenAiCompatibleProvider::delta_content(&v), None);
    }

    #[test]
    fn test_parse_usage() {
        let v: Value = serde_json::from_str(
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":7}}"#,
        )
        .unwrap();
        let usage = OpenAiCompatibleProvider::parse_usage(&v).unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 7);

        let v: Value = serde_json::from_str(r#"{"usage":null}"#).unwrap();
        assert!(OpenAiCompatibleProvider::parse_usage(&v).is_none());
    }

    #[test]
    fn test_line_buffer_handles_split_chunks() {
        let mut buf = SseLineBuffer::default();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        let lines = buf.push(b":1}\r\n\ndata: [DO");
        assert_eq!(lines, vec!["data: {\"a\":1}".to_string(), String::new()]);
        let lines = buf.push(b"NE]\n");
        assert_eq!(lines, vec!["data: [DONE]".to_string()]);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_line_buffer_keeps_multibyte_chars_intact() {
        let mut buf = SseLineBuffer::default();
        let text = "data: 页面\n".as_bytes();
        let (a, b) = text.split_at(8); // splits inside the first CJK character
        assert!(buf.push(a).is_empty());
        assert_eq!(buf.push(b), vec!["data: 页面".to_string()]);
    }

    #[test]
    fn test_map_http_error() {
        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::UNAUTHORIZED,
            "{}",
        );
        assert!(matches!(err, LlmError::AuthFailed { .. }));

        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"Rate limit reached. Please try again in 20s"}}"#,
        );
        assert!(matches!(
            err,
            LlmError::RateLimited {
                retry_after_secs: 20
            }
        ));

        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::BAD_GATEWAY,
            "upstream down",
        );
        assert!(err.to_string().contains("Server error"));
    }

    #[test]
    fn test_request_body_streaming_flags() {
        let config = LlmConfig {
            base_url: Some("http://localhost:1234/v1".into()),
            ..LlmConfig::default()
        };
        let provider = OpenAiCompatibleProvider::new(&config).unwrap();
        let request = CompletionRequest {
            messages: vec![Message::system("sys"), Message::user("q")],
            max_tokens: Some(64),
            ..Default::default()
        };
        let body = provider.request_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "q");
        assert_eq!(body["model"], "gpt-4o-mini");
    }
}
