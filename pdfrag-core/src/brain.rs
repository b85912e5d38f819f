//! Brain module: LLM provider abstraction.
//!
//! Defines the `LlmProvider` trait used by the retrieval service, plus a
//! deterministic `MockLlmProvider` for tests and offline runs.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, StreamEvent, TokenUsage};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Trait for LLM providers, supporting both full and streaming completions.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Perform a streaming completion, sending events to the channel.
    ///
    /// Implementations send zero or more `Token` events followed by exactly one
    /// `Done` on success. A send failure means the receiver went away; the
    /// provider stops and returns `Ok(())`.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// A provider that replays a canned answer, token by token.
pub struct MockLlmProvider {
    model: String,
    response: String,
    failure: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl std::fmt::Debug for MockLlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLlmProvider")
            .field("model", &self.model)
            .field("failure", &self.failure)
            .finish()
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self::with_response("This is a mock response.")
    }

    /// Create a MockLlmProvider that always answers with the given text.
    pub fn with_response(text: &str) -> Self {
        Self {
            model: "mock-model".to_string(),
            response: text.to_string(),
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider whose calls always fail with a streaming error.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new()
        }
    }

    /// All requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The most recent request, if any.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests().pop()
    }

    fn record(&self, request: CompletionRequest) {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
    }

    fn usage(&self, request: &CompletionRequest) -> TokenUsage {
        let input_words: usize = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count())
            .sum();
        TokenUsage {
            input_tokens: input_words,
            output_tokens: self.response.split_whitespace().count(),
        }
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let usage = self.usage(&request);
        self.record(request);
        if let Some(message) = &self.failure {
            return Err(LlmError::ApiRequest {
                message: message.clone(),
            });
        }
        Ok(CompletionResponse {
            message: Message::assistant(self.response.clone()),
            usage,
            model: self.model.clone(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let usage = self.usage(&request);
        self.record(request);
        if let Some(message) = &self.failure {
            return Err(LlmError::Streaming {
                message: message.clone(),
            });
        }
        for token in self.response.split_inclusive(' ') {
            if tx.send(StreamEvent::Token(token.to_string())).await.is_err() {
                return Ok(());
            }
        }
        let _ = tx.send(StreamEvent::Done { usage }).await;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
