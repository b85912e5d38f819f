//! JSON error responses.
//!
//! Most failures use the envelope
//! `{"error": {"code", "message"}, "requestId", "ts"}`. The index build
//! preconditions answer with a bare `{"detail": ...}` body, and a few file
//! routes answer with a status code and no body at all.

use crate::error::{IndexError, PdfError, RagError};
use crate::ids::{now_ts, rid};
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    Envelope {
        status: StatusCode,
        code: String,
        message: String,
    },
    Detail {
        status: StatusCode,
        detail: &'static str,
    },
    Empty(StatusCode),
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Envelope {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn detail(status: StatusCode, detail: &'static str) -> Self {
        ApiError::Detail { status, detail }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Envelope { status, .. } | ApiError::Detail { status, .. } => *status,
            ApiError::Empty(status) => *status,
        }
    }

    /// Index failures carry their own code with a caller-chosen status.
    pub fn from_index(status: StatusCode, err: &IndexError) -> Self {
        Self::new(status, err.code(), err.to_string())
    }
}

impl From<PdfError> for ApiError {
    fn from(err: PdfError) -> Self {
        let status = match &err {
            PdfError::EmptyUpload | PdfError::InvalidPdf { .. } => StatusCode::BAD_REQUEST,
            PdfError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.code(), err.to_string())
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        match &err {
            RagError::Index(index) => Self::from_index(StatusCode::BAD_REQUEST, index),
            _ => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CHAT_ERROR",
                err.to_string(),
            ),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Envelope {
                status,
                code,
                message,
            } => {
                if status.is_server_error() {
                    tracing::error!(code = %code, message = %message, "Request failed");
                } else {
                    tracing::debug!(code = %code, message = %message, "Request rejected");
                }
                let body = json!({
                    "error": { "code": code, "message": message },
                    "requestId": rid("req"),
                    "ts": now_ts(),
                });
                (status, Json(body)).into_response()
            }
            ApiError::Detail { status, detail } => {
                (status, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::Empty(status) => status.into_response(),
        }
    }
}
