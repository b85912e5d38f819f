//! `/index/*` routes.

use super::error::ApiError;
use super::files::{FileRequest, require_file_id};
use super::state::{ParseStatus, SharedState};
use crate::index::SearchHit;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct BuildResponse {
    pub ok: bool,
    pub chunks: usize,
}

pub async fn build(
    State(state): State<SharedState>,
    payload: Result<Json<FileRequest>, JsonRejection>,
) -> Result<Json<BuildResponse>, ApiError> {
    let Json(req) = payload?;
    let Some(current) = state.current_if(req.file_id.trim()).await else {
        return Err(ApiError::detail(
            StatusCode::BAD_REQUEST,
            "FILE_NOT_FOUND_OR_NOT_CURRENT",
        ));
    };
    if current.status != ParseStatus::Ready {
        return Err(ApiError::detail(StatusCode::CONFLICT, "NEED_PARSE_FIRST"));
    }

    let chunks = state
        .index
        .build(&current.file_id)
        .await
        .map_err(|e| ApiError::from_index(StatusCode::INTERNAL_SERVER_ERROR, &e))?;
    Ok(Json(BuildResponse { ok: true, chunks }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub file_id: String,
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub ok: bool,
    pub results: Vec<SearchHit>,
}

/// A missing or zero `k` means the configured default.
fn effective_k(requested: Option<usize>, default_k: usize) -> usize {
    requested.filter(|k| *k > 0).unwrap_or(default_k)
}

/// Searches any indexed file, current or not.
pub async fn search(
    State(state): State<SharedState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(req) = payload?;
    let file_id = require_file_id(&req.file_id)?;
    let k = effective_k(req.k, state.config.index.default_k);

    let results = state
        .index
        .search(file_id, &req.query, k)
        .await
        .map_err(|e| ApiError::from_index(StatusCode::BAD_REQUEST, &e))?;
    Ok(Json(SearchResponse { ok: true, results }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_k_defaults_on_missing_or_zero() {
        assert_eq!(effective_k(None, 5), 5);
        assert_eq!(effective_k(Some(0), 5), 5);
        assert_eq!(effective_k(Some(2), 5), 2);
    }
}
