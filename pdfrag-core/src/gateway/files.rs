//! `/pdf/*` routes: upload, parse, status and file serving.

use super::error::ApiError;
use super::state::{ParseStatus, SharedState};
use crate::ids::rid;
use crate::pdf::{is_valid_file_id, page_file_name};
use axum::Json;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Component, Path};

/// Fixed message reported while a parse has failed.
pub const PARSE_FAILED_MSG: &str = "parse failed";

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Accepted for compatibility; an upload always replaces the current file.
    #[serde(default)]
    pub replace: Option<bool>,
}

pub async fn upload(
    State(state): State<SharedState>,
    query: Result<Query<UploadQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let mut multipart =
        multipart.map_err(|e| ApiError::bad_request("NO_FILE", e.body_text()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("NO_FILE", e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request("NO_FILE", e.body_text()))?;
        upload = Some((filename, bytes));
        break;
    }
    let Some((filename, bytes)) = upload else {
        return Err(ApiError::bad_request("NO_FILE", "no file field in upload"));
    };

    let file_id = rid("f");
    let saved = state
        .pdf
        .save_upload(&file_id, bytes, filename.as_deref())
        .await?;
    tracing::info!(
        file_id = %saved.file_id,
        pages = saved.pages,
        replace = query.replace.unwrap_or(true),
        "Upload is now the current file"
    );
    state.replace_current(saved.clone()).await;
    Ok(Json(saved).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequest {
    pub file_id: String,
}

pub async fn parse(
    State(state): State<SharedState>,
    payload: Result<Json<FileRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let file_id = req.file_id.trim().to_string();

    let started = state
        .update_if_current(&file_id, |current| {
            current.status = ParseStatus::Parsing;
            current.progress = 5;
        })
        .await;
    if !started {
        return Err(ApiError::bad_request(
            "FILE_NOT_FOUND",
            format!("{} is not the current file", file_id),
        ));
    }

    let job_id = rid("j");
    tracing::info!(file_id = %file_id, job_id = %job_id, "Parse job started");
    tokio::spawn(run_parse_job(state.clone(), file_id, job_id.clone()));
    Ok(Json(json!({ "jobId": job_id })).into_response())
}

/// Background half of `POST /pdf/parse`. Writes to the current record only
/// while `file_id` is still current.
pub(crate) async fn run_parse_job(state: SharedState, file_id: String, job_id: String) {
    if !state
        .update_if_current(&file_id, |current| current.progress = 20)
        .await
    {
        tracing::debug!(file_id = %file_id, job_id = %job_id, "Parse job superseded before start");
        return;
    }

    match state.pdf.run_full_parse_pipeline(&file_id).await {
        Ok(report) => {
            let applied = state
                .update_if_current(&file_id, |current| {
                    current.status = ParseStatus::Ready;
                    current.progress = 100;
                })
                .await;
            tracing::info!(
                file_id = %file_id,
                job_id = %job_id,
                text_pages = report.text_pages,
                applied,
                "Parse job finished"
            );
        }
        Err(e) => {
            tracing::error!(file_id = %file_id, job_id = %job_id, error = %e, "Parse job failed");
            state
                .update_if_current(&file_id, |current| {
                    current.status = ParseStatus::Error;
                    current.progress = 0;
                })
                .await;
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub file_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: ParseStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<&'static str>,
}

pub async fn status(
    State(state): State<SharedState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Query(query) = query?;
    let response = match state.current_if(query.file_id.trim()).await {
        Some(current) => StatusResponse {
            status: current.status,
            progress: current.progress,
            error_msg: (current.status == ParseStatus::Error).then_some(PARSE_FAILED_MSG),
        },
        None => StatusResponse {
            status: ParseStatus::Idle,
            progress: 0,
            error_msg: None,
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub file_id: String,
    pub page: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

pub async fn page(
    State(state): State<SharedState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    if query.page < 1 {
        return Err(ApiError::validation("page must be >= 1"));
    }
    let parsed = match query.kind.as_str() {
        "original" => false,
        "parsed" => true,
        other => {
            return Err(ApiError::validation(format!(
                "type must be 'original' or 'parsed', got '{}'",
                other
            )));
        }
    };
    let page = u32::try_from(query.page).map_err(|_| ApiError::validation("page out of range"))?;

    let Some(current) = state.current_if(&query.file_id).await else {
        return Err(ApiError::Empty(StatusCode::NOT_FOUND));
    };
    if parsed && current.status != ParseStatus::Ready {
        return Err(ApiError::Empty(StatusCode::NO_CONTENT));
    }

    let layout = state.pdf.layout();
    let dir = if parsed {
        layout.dir_parsed_pages(&current.file_id)
    } else {
        layout.dir_original_pages(&current.file_id)
    };
    let path = dir.join(page_file_name(page));
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response()),
        Err(_) => Err(ApiError::not_found(
            "PAGE_NOT_FOUND",
            format!("page {} has no {} image", page, query.kind),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageQuery {
    pub file_id: String,
    pub image_path: String,
}

pub async fn images(
    State(state): State<SharedState>,
    query: Result<Query<ImageQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let Some(current) = state.current_if(&query.file_id).await else {
        return Err(ApiError::Empty(StatusCode::NOT_FOUND));
    };

    let relative = query
        .image_path
        .trim()
        .trim_start_matches("images/");
    if !is_contained(relative) {
        return Err(ApiError::bad_request(
            "INVALID_PATH",
            "imagePath must stay inside the images directory",
        ));
    }

    let path = state.pdf.layout().images_dir(&current.file_id).join(relative);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, content_type_for(&path))], bytes).into_response()),
        Err(_) => Err(ApiError::not_found(
            "IMAGE_NOT_FOUND",
            format!("no image at {}", relative),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkQuery {
    pub citation_id: String,
}

pub async fn chunk(
    State(state): State<SharedState>,
    query: Result<Query<ChunkQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    match state.citation(&query.citation_id).await {
        Some(citation) => Ok(Json(citation).into_response()),
        None => Err(ApiError::not_found(
            "NOT_FOUND",
            format!("unknown citation {}", query.citation_id),
        )),
    }
}

/// Only plain relative components are allowed.
fn is_contained(relative: &str) -> bool {
    let path = Path::new(relative);
    !relative.is_empty()
        && !relative.contains('\\')
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Guards the file-id values that end up in filesystem paths.
pub(crate) fn require_file_id(file_id: &str) -> Result<&str, ApiError> {
    let file_id = file_id.trim();
    if is_valid_file_id(file_id) {
        Ok(file_id)
    } else {
        Err(ApiError::validation(format!("invalid fileId '{}'", file_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_contained() {
        assert!(is_contained("page-0001-1.jpg"));
        assert!(is_contained("sub/figure.png"));
        assert!(!is_contained(""));
        assert!(!is_contained("../original.pdf"));
        assert!(!is_contained("a/../../b.png"));
        assert!(!is_contained("/etc/passwd"));
        assert!(!is_contained("..\\secret"));
        assert!(!is_contained("./x.png"));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.png")), "image/png");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }

    #[test]
    fn test_require_file_id() {
        assert_eq!(require_file_id(" f_abc ").unwrap(), "f_abc");
        assert!(require_file_id("../x").is_err());
    }
}
