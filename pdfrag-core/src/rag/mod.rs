//! Retrieval-augmented answering.
//!
//! [`RagService::retrieve`] turns index hits into citations and a numbered
//! context block; [`RagService::answer_stream`] prompts the LLM with that
//! context plus the session's recent history and forwards the streamed tokens.

pub mod history;
pub mod prompts;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RagConfig};
use crate::error::{LlmError, RagError};
use crate::gateway::API_PREFIX;
use crate::ids::rid;
use crate::index::{HEADER_2, IndexService};
use crate::types::{CompletionRequest, Message, StreamEvent};
use history::SessionHistory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Whether an answer is grounded in retrieved excerpts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    NoContext,
    WithContext,
}

/// A reference to the document passage an answer drew on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub citation_id: String,
    pub file_id: String,
    pub page: u32,
    pub snippet: String,
    /// Page coordinates are not tracked; always `null`.
    pub bbox: Option<[f32; 4]>,
    pub preview_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    Token(String),
    Done { used_retrieval: bool },
}

#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub question: String,
    pub citations: Vec<Citation>,
    pub context_text: String,
    pub branch: Branch,
    pub session_id: String,
}

pub struct RagService {
    index: Arc<IndexService>,
    llm: Arc<dyn LlmProvider>,
    config: RagConfig,
    temperature: f32,
    max_tokens: Option<usize>,
    history: SessionHistory,
}

impl std::fmt::Debug for RagService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagService")
            .field("model", &self.llm.model_name())
            .field("config", &self.config)
            .finish()
    }
}

impl RagService {
    pub fn new(
        index: Arc<IndexService>,
        llm: Arc<dyn LlmProvider>,
        config: &RagConfig,
        llm_config: &LlmConfig,
    ) -> Self {
        Self {
            index,
            llm,
            history: SessionHistory::new(config.history_turns),
            config: config.clone(),
            temperature: llm_config.temperature,
            max_tokens: llm_config.max_tokens,
        }
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    /// Search the file's index and build citations plus the context block.
    ///
    /// Fails with `IndexNotFound` when the file was never indexed.
    pub async fn retrieve(
        &self,
        question: &str,
        file_id: &str,
    ) -> Result<(Vec<Citation>, String), RagError> {
        let hits = self
            .index
            .search(file_id, question, self.config.top_k)
            .await?;

        let mut citations = Vec::with_capacity(hits.len());
        let mut blocks = Vec::with_capacity(hits.len());
        for (n, hit) in hits.iter().enumerate() {
            let page = page_from_metadata(&hit.metadata);
            citations.push(Citation {
                citation_id: rid("c"),
                file_id: file_id.to_string(),
                page,
                snippet: hit.text.chars().take(self.config.snippet_chars).collect(),
                bbox: None,
                preview_url: format!(
                    "{}/pdf/page?fileId={}&page={}&type=original",
                    API_PREFIX, file_id, page
                ),
            });
            blocks.push(format!("[{}] (page {})\n{}", n + 1, page, hit.text.trim()));
        }
        tracing::debug!(file_id, hits = citations.len(), "Retrieved context");
        Ok((citations, blocks.join("\n\n")))
    }

    /// Stream an answer into `tx`: `Token`s, then one `Done`.
    ///
    /// The exchange is appended to the session history only when the model
    /// finished and the receiver was still listening.
    pub async fn answer_stream(
        &self,
        request: AnswerRequest,
        tx: mpsc::Sender<AnswerEvent>,
    ) -> Result<(), RagError> {
        let completion = CompletionRequest {
            messages: self.build_messages(&request),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: None,
        };

        let (stream_tx, mut stream_rx) = mpsc::channel::<StreamEvent>(64);
        let token_tx = tx.clone();
        let forward = async move {
            let mut answer = String::new();
            let mut stream_error = None;
            while let Some(event) = stream_rx.recv().await {
                match event {
                    StreamEvent::Token(text) => {
                        answer.push_str(&text);
                        if token_tx.send(AnswerEvent::Token(text)).await.is_err() {
                            return Err(RagError::ClientGone);
                        }
                    }
                    StreamEvent::Done { usage } => {
                        tracing::debug!(
                            input_tokens = usage.input_tokens,
                            output_tokens = usage.output_tokens,
                            "Answer complete"
                        );
                    }
                    StreamEvent::Error(message) => stream_error = Some(message),
                }
            }
            match stream_error {
                Some(message) => Err(RagError::Llm(LlmError::Streaming { message })),
                None => Ok(answer),
            }
        };

        let (provider_result, forwarded) =
            tokio::join!(self.llm.complete_streaming(completion, stream_tx), forward);
        let answer = forwarded?;
        provider_result?;

        self.history
            .append(&request.session_id, &request.question, &answer);
        tx.send(AnswerEvent::Done {
            used_retrieval: request.branch == Branch::WithContext,
        })
        .await
        .map_err(|_| RagError::ClientGone)
    }

    pub fn clear_history(&self, session_id: &str) -> bool {
        let cleared = self.history.clear(session_id);
        tracing::debug!(session_id, cleared, "Chat history cleared");
        cleared
    }

    fn build_messages(&self, request: &AnswerRequest) -> Vec<Message> {
        let mut messages = vec![Message::system(prompts::system_prompt(request.branch))];
        messages.extend(self.history.messages(&request.session_id));
        messages.push(Message::user(prompts::user_prompt(
            &request.question,
            &request.context_text,
            request.branch,
        )));
        messages
    }
}

/// Page number from `Header 2` metadata of the form `Page N`; defaults to 1.
fn page_from_metadata(metadata: &BTreeMap<String, String>) -> u32 {
    metadata
        .get(HEADER_2)
        .and_then(|h| h.trim().strip_prefix("Page"))
        .and_then(|n| n.trim().parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::config::IndexConfig;
    use crate::embeddings::LocalEmbedder;
    use crate::pdf::StorageLayout;
    use crate::types::Role;
    use tempfile::TempDir;

    const MD: &str = "# notes.pdf\n\n## Page 1\n\nThe mitochondria is the powerhouse of the cell.\n\n## Page 3\n\nChloroplasts capture sunlight for photosynthesis.\n";

    async fn indexed(dir: &TempDir) -> Arc<IndexService> {
        let layout = StorageLayout::new(dir.path());
        std::fs::create_dir_all(layout.workdir("f_doc")).unwrap();
        std::fs::write(layout.markdown_output("f_doc"), MD).unwrap();
        let index = Arc::new(IndexService::new(
            layout,
            Arc::new(LocalEmbedder::new(128)),
            &IndexConfig::default(),
        ));
        index.build("f_doc").await.unwrap();
        index
    }

    fn rag(index: Arc<IndexService>, llm: Arc<MockLlmProvider>) -> RagService {
        RagService::new(index, llm, &RagConfig::default(), &LlmConfig::default())
    }

    async fn collect(service: &RagService, request: AnswerRequest) -> (Vec<AnswerEvent>, Result<(), RagError>) {
        let (tx, mut rx) = mpsc::channel(64);
        let result = service.answer_stream(request, tx).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (events, result)
    }

    fn request(question: &str, branch: Branch, context: &str) -> AnswerRequest {
        AnswerRequest {
            question: question.into(),
            citations: Vec::new(),
            context_text: context.into(),
            branch,
            session_id: "default".into(),
        }
    }

    #[test]
    fn test_page_from_metadata() {
        let mut meta = BTreeMap::new();
        assert_eq!(page_from_metadata(&meta), 1);
        meta.insert(HEADER_2.to_string(), "Page 12".to_string());
        assert_eq!(page_from_metadata(&meta), 12);
        meta.insert(HEADER_2.to_string(), "Appendix".to_string());
        assert_eq!(page_from_metadata(&meta), 1);
    }

    #[tokio::test]
    async fn test_retrieve_builds_citations_and_context() {
        let dir = TempDir::new().unwrap();
        let service = rag(indexed(&dir).await, Arc::new(MockLlmProvider::new()));

        let (citations, context) = service
            .retrieve("mitochondria cell", "f_doc")
            .await
            .unwrap();
        assert_eq!(citations.len(), 2);
        let top = &citations[0];
        assert!(top.citation_id.starts_with("c_"));
        assert_eq!(top.page, 1);
        assert!(top.snippet.contains("mitochondria"));
        assert!(top.bbox.is_none());
        assert_eq!(
            top.preview_url,
            "/api/v1/pdf/page?fileId=f_doc&page=1&type=original"
        );
        assert!(context.starts_with("[1] (page 1)\n"));
        assert!(context.contains("[2] (page 3)\n"));
    }

    #[tokio::test]
    async fn test_retrieve_without_index() {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(IndexService::new(
            StorageLayout::new(dir.path()),
            Arc::new(LocalEmbedder::new(16)),
            &IndexConfig::default(),
        ));
        let err = rag(index, Arc::new(MockLlmProvider::new()))
            .retrieve("q", "f_none")
            .await
            .unwrap_err();
        assert!(err.is_index_missing());
    }

    #[tokio::test]
    async fn test_snippet_is_truncated() {
        let dir = TempDir::new().unwrap();
        let config = RagConfig {
            snippet_chars: 10,
            ..RagConfig::default()
        };
        let service = RagService::new(
            indexed(&dir).await,
            Arc::new(MockLlmProvider::new()),
            &config,
            &LlmConfig::default(),
        );
        let (citations, _) = service.retrieve("cell", "f_doc").await.unwrap();
        assert!(citations.iter().all(|c| c.snippet.chars().count() <= 10));
    }

    #[tokio::test]
    async fn test_answer_stream_tokens_then_done() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(MockLlmProvider::with_response("It is the cell powerhouse."));
        let service = rag(indexed(&dir).await, llm.clone());

        let (events, result) = collect(
            &service,
            request("What is it?", Branch::WithContext, "[1] (page 1)\nctx"),
        )
        .await;
        result.unwrap();

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                AnswerEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "It is the cell powerhouse.");
        assert_eq!(
            events.last(),
            Some(&AnswerEvent::Done {
                used_retrieval: true
            })
        );

        let sent = llm.last_request().unwrap();
        assert_eq!(sent.messages[0].role, Role::System);
        assert!(sent.messages[1].content.contains("[1] (page 1)"));
        assert_eq!(service.history().len("default"), 1);
    }

    #[tokio::test]
    async fn test_history_replayed_on_next_question() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(MockLlmProvider::with_response("Answer."));
        let service = rag(indexed(&dir).await, llm.clone());

        let (_, first) = collect(&service, request("First?", Branch::NoContext, "")).await;
        first.unwrap();
        let (events, second) = collect(&service, request("Second?", Branch::NoContext, "")).await;
        second.unwrap();
        assert_eq!(
            events.last(),
            Some(&AnswerEvent::Done {
                used_retrieval: false
            })
        );

        let sent = llm.last_request().unwrap();
        let contents: Vec<&str> = sent.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[1..], ["First?", "Answer.", "Second?"]);

        assert!(service.clear_history("default"));
        assert_eq!(service.history().len("default"), 0);
    }

    #[tokio::test]
    async fn test_answer_stream_provider_failure() {
        let dir = TempDir::new().unwrap();
        let service = rag(
            indexed(&dir).await,
            Arc::new(MockLlmProvider::failing("model overloaded")),
        );
        let (events, result) = collect(&service, request("q", Branch::NoContext, "")).await;
        assert!(result.unwrap_err().to_string().contains("model overloaded"));
        assert!(events.is_empty());
        assert_eq!(service.history().len("default"), 0);
    }
}
