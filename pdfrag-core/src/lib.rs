//! # pdfrag Core
//!
//! Core library for pdfrag: a backend that stores an uploaded PDF, parses it
//! into Markdown and images, builds a vector index over the text chunks, and
//! answers questions with an LLM that streams tokens and cites the chunks it
//! used.
//!
//! The HTTP surface lives in [`gateway`]; it composes the [`pdf`], [`index`]
//! and [`rag`] services built from an [`AppConfig`].

pub mod brain;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod index;
pub mod pdf;
pub mod persistence;
pub mod providers;
pub mod rag;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{AppConfig, load_config};
pub use embeddings::{Embedder, LocalEmbedder};
pub use error::{PdfRagError, Result};
pub use gateway::{AppState, CurrentPdf, ParseStatus, SharedState, router, run};
pub use index::{IndexService, SearchHit};
pub use pdf::{PdfService, SavedPdf};
pub use rag::{AnswerEvent, Branch, Citation, RagService};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StreamEvent, TokenUsage};
