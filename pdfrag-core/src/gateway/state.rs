//! Process-wide state shared by every handler.

use crate::brain::LlmProvider;
use crate::config::AppConfig;
use crate::embeddings::{Embedder, create_embedder};
use crate::error::PdfRagError;
use crate::index::IndexService;
use crate::pdf::{PdfService, SavedPdf};
use crate::providers::create_provider;
use crate::rag::{Citation, RagService};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe shared state reference for axum handlers.
pub type SharedState = Arc<AppState>;

/// Lifecycle of the current upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    #[default]
    Idle,
    Parsing,
    Ready,
    Error,
}

/// The single "current" upload. Replaced wholesale by every upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPdf {
    pub file_id: String,
    pub name: String,
    pub pages: u32,
    pub status: ParseStatus,
    pub progress: u8,
}

impl From<SavedPdf> for CurrentPdf {
    fn from(saved: SavedPdf) -> Self {
        Self {
            file_id: saved.file_id,
            name: saved.name,
            pages: saved.pages,
            status: ParseStatus::Idle,
            progress: 0,
        }
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub pdf: Arc<PdfService>,
    pub index: Arc<IndexService>,
    pub rag: Arc<RagService>,
    current: RwLock<Option<CurrentPdf>>,
    citations: RwLock<HashMap<String, Citation>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("data_root", &self.config.storage.data_root)
            .field("index", &self.index)
            .field("rag", &self.rag)
            .finish()
    }
}

impl AppState {
    /// Build every service from configuration, creating the embedder and LLM
    /// provider the config names.
    pub fn from_config(config: AppConfig) -> Result<Self, PdfRagError> {
        let embedder = create_embedder(&config.embedding)?;
        let llm = create_provider(&config.llm)?;
        Ok(Self::with_providers(config, embedder, llm))
    }

    /// Build the services around an explicit embedder and LLM provider.
    pub fn with_providers(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        let pdf = Arc::new(PdfService::new(&config.storage, &config.renderer));
        let index = Arc::new(IndexService::new(
            pdf.layout().clone(),
            embedder,
            &config.index,
        ));
        let rag = Arc::new(RagService::new(
            Arc::clone(&index),
            llm,
            &config.rag,
            &config.llm,
        ));
        Self {
            config,
            pdf,
            index,
            rag,
            current: RwLock::new(None),
            citations: RwLock::new(HashMap::new()),
        }
    }

    pub async fn current(&self) -> Option<CurrentPdf> {
        self.current.read().await.clone()
    }

    /// The current record, but only if it belongs to `file_id`.
    pub async fn current_if(&self, file_id: &str) -> Option<CurrentPdf> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|c| c.file_id == file_id)
            .cloned()
    }

    /// Make `saved` the current upload and forget every citation.
    pub async fn replace_current(&self, saved: SavedPdf) {
        *self.current.write().await = Some(CurrentPdf::from(saved));
        self.citations.write().await.clear();
    }

    /// Apply `update` if `file_id` is still current. Returns whether it ran.
    pub async fn update_if_current(
        &self,
        file_id: &str,
        update: impl FnOnce(&mut CurrentPdf),
    ) -> bool {
        let mut current = self.current.write().await;
        match current.as_mut() {
            Some(record) if record.file_id == file_id => {
                update(record);
                true
            }
            _ => false,
        }
    }

    pub async fn register_citations(&self, citations: &[Citation]) {
        let mut store = self.citations.write().await;
        for citation in citations {
            store.insert(citation.citation_id.clone(), citation.clone());
        }
    }

    pub async fn citation(&self, citation_id: &str) -> Option<Citation> {
        self.citations.read().await.get(citation_id).cloned()
    }
}
