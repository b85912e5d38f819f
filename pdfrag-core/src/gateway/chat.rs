//! `/chat` routes. Answers stream as Server-Sent Events:
//! `citation`* then `token`* then `done`, or `error` on failure.

use super::error::ApiError;
use super::state::SharedState;
use crate::error::RagError;
use crate::pdf::is_valid_file_id;
use crate::rag::{AnswerEvent, AnswerRequest, Branch, Citation};
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub pdf_file_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

fn session_or_default(session_id: Option<&str>) -> String {
    match session_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => DEFAULT_SESSION.to_string(),
    }
}

pub async fn chat(
    State(state): State<SharedState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(stream_chat(state, req, tx));

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let sse = Sse::new(stream).keep_alive(KeepAlive::default());
    Ok((
        [
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::CONNECTION, "keep-alive"),
        ],
        sse,
    )
        .into_response())
}

async fn stream_chat(state: SharedState, req: ChatRequest, tx: mpsc::Sender<Event>) {
    match drive_chat(&state, req, &tx).await {
        Ok(()) => {}
        Err(RagError::ClientGone) => tracing::debug!("Chat client disconnected"),
        Err(e) => {
            tracing::warn!(error = %e, "Chat stream failed");
            let _ = tx
                .send(json_event("error", &json!({ "message": e.to_string() })))
                .await;
        }
    }
}

async fn drive_chat(
    state: &SharedState,
    req: ChatRequest,
    tx: &mpsc::Sender<Event>,
) -> Result<(), RagError> {
    let question = req.message.trim().to_string();
    let session_id = session_or_default(req.session_id.as_deref());
    let file_id = req.pdf_file_id.as_deref().map(str::trim).unwrap_or_default();

    let (citations, context_text, branch) = retrieve_context(state, &question, file_id).await?;
    tracing::info!(
        session_id = %session_id,
        file_id,
        branch = ?branch,
        citations = citations.len(),
        "Answering question"
    );

    if branch == Branch::WithContext {
        state.register_citations(&citations).await;
        for citation in &citations {
            send(tx, json_event("citation", citation)).await?;
        }
    }

    let request = AnswerRequest {
        question,
        citations,
        context_text,
        branch,
        session_id,
    };
    let (answer_tx, mut answer_rx) = mpsc::channel::<AnswerEvent>(64);
    let forward = async move {
        while let Some(event) = answer_rx.recv().await {
            let event = match event {
                AnswerEvent::Token(text) => json_event("token", &json!({ "text": text })),
                AnswerEvent::Done { used_retrieval } => {
                    json_event("done", &json!({ "used_retrieval": used_retrieval }))
                }
            };
            send(tx, event).await?;
        }
        Ok::<(), RagError>(())
    };

    let (answered, forwarded) = tokio::join!(state.rag.answer_stream(request, answer_tx), forward);
    forwarded?;
    answered
}

/// Retrieval falls back to no context when there is no file, no index yet,
/// or nothing relevant came back.
async fn retrieve_context(
    state: &SharedState,
    question: &str,
    file_id: &str,
) -> Result<(Vec<Citation>, String, Branch), RagError> {
    if file_id.is_empty() || !is_valid_file_id(file_id) {
        return Ok((Vec::new(), String::new(), Branch::NoContext));
    }
    match state.rag.retrieve(question, file_id).await {
        Ok((citations, context)) if !context.is_empty() => {
            Ok((citations, context, Branch::WithContext))
        }
        Ok(_) => Ok((Vec::new(), String::new(), Branch::NoContext)),
        Err(e) if e.is_index_missing() => {
            tracing::debug!(file_id, "No index yet; answering without context");
            Ok((Vec::new(), String::new(), Branch::NoContext))
        }
        Err(e) => Err(e),
    }
}

async fn send(tx: &mpsc::Sender<Event>, event: Event) -> Result<(), RagError> {
    tx.send(event).await.map_err(|_| RagError::ClientGone)
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| {
            Event::default()
                .event("error")
                .data(json!({ "message": e.to_string() }).to_string())
        })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResponse {
    pub ok: bool,
    pub session_id: String,
    pub cleared: bool,
}

pub async fn chat_clear(
    State(state): State<SharedState>,
    payload: Result<Json<ClearRequest>, JsonRejection>,
) -> Result<Json<ClearResponse>, ApiError> {
    let Json(req) = payload?;
    let session_id = session_or_default(req.session_id.as_deref());
    state.rag.clear_history(&session_id);
    Ok(Json(ClearResponse {
        ok: true,
        session_id,
        cleared: true,
    }))
}
