//! # REST Gateway
//!
//! The HTTP surface of pdfrag: request validation, status polling, file
//! serving and SSE formatting around the pdf, index and rag services. All
//! routes live under [`API_PREFIX`].

mod chat;
mod error;
mod files;
mod indexing;
mod server;
mod state;

pub use error::ApiError;
pub use files::PARSE_FAILED_MSG;
pub use server::{router, run};
pub use state::{AppState, CurrentPdf, ParseStatus, SharedState};

/// Prefix of every route.
pub const API_PREFIX: &str = "/api/v1";
