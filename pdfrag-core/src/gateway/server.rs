//! HTTP server built on axum.

use super::state::SharedState;
use super::{API_PREFIX, chat, files, indexing};
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the router with every route nested under `/api/v1`.
pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat::chat))
        .route("/chat/clear", post(chat::chat_clear))
        .route("/pdf/upload", post(files::upload))
        .route("/pdf/parse", post(files::parse))
        .route("/pdf/status", get(files::status))
        .route("/pdf/page", get(files::page))
        .route("/pdf/images", get(files::images))
        .route("/pdf/chunk", get(files::chunk))
        .route("/index/build", post(indexing::build))
        .route("/index/search", post(indexing::search));

    let body_limit = state.config.server.max_upload_bytes;
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .nest(API_PREFIX, api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the configured origins, with credentials and any method/header.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Serve on the configured host and port until Ctrl-C.
pub async fn run(state: SharedState) -> Result<(), std::io::Error> {
    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "pdfrag API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C; running until killed");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::config::AppConfig;
    use crate::embeddings::LocalEmbedder;
    use crate::gateway::AppState;
    use axum::body::Body;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn make_state() -> SharedState {
        Arc::new(AppState::with_providers(
            AppConfig::default(),
            Arc::new(LocalEmbedder::new(16)),
            Arc::new(MockLlmProvider::new()),
        ))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = router(make_state());
        let req = axum::http::Request::builder()
            .uri("/api/v1/health")
            .body(Body::empty())
            .unwrap();

        let resp = ServiceExt::<axum::http::Request<Body>>::oneshot(app, req)
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_frontend_origin() {
        let app = router(make_state());
        let req = axum::http::Request::builder()
            .method("OPTIONS")
            .uri("/api/v1/chat")
            .header("origin", "http://localhost:3000")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        let headers = resp.headers();
        assert_eq!(
            headers["access-control-allow-origin"],
            "http://localhost:3000"
        );
        assert_eq!(headers["access-control-allow-credentials"], "true");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = router(make_state());
        let req = axum::http::Request::builder()
            .uri("/api/v2/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 404);
    }
}
