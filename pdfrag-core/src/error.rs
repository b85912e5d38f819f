//! Error types for the pdfrag core library.
//!
//! Uses `thiserror` for public API error types with structured variants for
//! the PDF, index, LLM, retrieval and configuration domains. Service errors
//! expose a stable machine-readable `code()` that the gateway puts into its
//! JSON error envelopes.

use std::path::PathBuf;

/// Top-level error type for the pdfrag core library.
#[derive(Debug, thiserror::Error)]
pub enum PdfRagError {
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Retrieval error: {0}")]
    Rag(#[from] RagError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from storing and parsing uploaded PDFs.
#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("Uploaded file is empty")]
    EmptyUpload,

    #[error("Not a readable PDF: {message}")]
    InvalidPdf { message: String },

    #[error("No stored PDF for file {file_id}")]
    NotFound { file_id: String },

    #[error("Text extraction failed on page {page}: {message}")]
    Extraction { page: u32, message: String },

    #[error("Page rendering failed: {message}")]
    Render { message: String },

    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PdfError {
    /// Stable error code used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            PdfError::EmptyUpload => "NO_FILE",
            PdfError::InvalidPdf { .. } => "INVALID_PDF",
            PdfError::NotFound { .. } => "FILE_NOT_FOUND",
            PdfError::Extraction { .. } => "EXTRACTION_ERROR",
            PdfError::Render { .. } => "RENDER_ERROR",
            PdfError::Storage { .. } => "STORAGE_ERROR",
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PdfError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Errors from building and querying the vector index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("No Markdown output for file {file_id}; parse it first")]
    MarkdownNotFound { file_id: String },

    #[error("Markdown for file {file_id} produced no chunks")]
    EmptyMarkdown { file_id: String },

    #[error("No index for file {file_id}; build it first")]
    IndexNotFound { file_id: String },

    #[error("Index was built with {built_with} but queried with {queried_with}")]
    Mismatch {
        built_with: String,
        queried_with: String,
    },

    #[error("Embedding failed: {message}")]
    Embedding { message: String },

    #[error("Index storage failed: {message}")]
    Storage { message: String },
}

impl IndexError {
    /// Stable error code used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::MarkdownNotFound { .. } => "MARKDOWN_NOT_FOUND",
            IndexError::EmptyMarkdown { .. } => "EMPTY_MD",
            IndexError::IndexNotFound { .. } => "INDEX_NOT_FOUND",
            IndexError::Mismatch { .. } => "INDEX_MISMATCH",
            IndexError::Embedding { .. } => "EMBEDDING_ERROR",
            IndexError::Storage { .. } => "INDEX_BUILD_ERROR",
        }
    }
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Unknown LLM provider: {provider}")]
    UnknownProvider { provider: String },
}

/// Errors from retrieval and answer generation.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Answer stream closed by client")]
    ClientGone,
}

impl RagError {
    /// True when retrieval failed only because the file has no index yet.
    pub fn is_index_missing(&self) -> bool {
        matches!(self, RagError::Index(IndexError::IndexNotFound { .. }))
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `PdfRagError`.
pub type Result<T> = std::result::Result<T, PdfRagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_pdf() {
        let err = PdfRagError::Pdf(PdfError::InvalidPdf {
            message: "missing header".into(),
        });
        assert_eq!(
            err.to_string(),
            "PDF error: Not a readable PDF: missing header"
        );
    }

    #[test]
    fn test_error_display_index() {
        let err = PdfRagError::Index(IndexError::IndexNotFound {
            file_id: "f_abc".into(),
        });
        assert_eq!(
            err.to_string(),
            "Index error: No index for file f_abc; build it first"
        );
    }

    #[test]
    fn test_index_error_codes() {
        let cases = [
            (
                IndexError::MarkdownNotFound { file_id: "f".into() },
                "MARKDOWN_NOT_FOUND",
            ),
            (IndexError::EmptyMarkdown { file_id: "f".into() }, "EMPTY_MD"),
            (
                IndexError::IndexNotFound { file_id: "f".into() },
                "INDEX_NOT_FOUND",
            ),
            (
                IndexError::Storage {
                    message: "disk full".into(),
                },
                "INDEX_BUILD_ERROR",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_pdf_error_codes() {
        assert_eq!(PdfError::EmptyUpload.code(), "NO_FILE");
        assert_eq!(
            PdfError::InvalidPdf {
                message: String::new()
            }
            .code(),
            "INVALID_PDF"
        );
    }

    #[test]
    fn test_rag_error_index_missing() {
        let err = RagError::from(IndexError::IndexNotFound {
            file_id: "f_1".into(),
        });
        assert!(err.is_index_missing());

        let err = RagError::from(LlmError::Timeout { timeout_secs: 30 });
        assert!(!err.is_index_missing());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PdfRagError = io_err.into();
        assert!(matches!(err, PdfRagError::Io(_)));
    }

    #[test]
    fn test_llm_error_variants() {
        let err = LlmError::RateLimited {
            retry_after_secs: 60,
        };
        assert_eq!(err.to_string(), "Rate limited by provider, retry after 60s");
    }
}
