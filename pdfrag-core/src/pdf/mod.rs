//! PDF storage and the parse pipeline.
//!
//! `PdfService` owns the per-file working directories under the data root:
//! it saves uploads, counts pages, extracts text into `output.md`, pulls out
//! embedded images and drives the optional page rasterizer.

pub mod extract;
pub mod render;

use crate::config::{RendererConfig, StorageConfig};
use crate::error::PdfError;
use crate::persistence;
use bytes::Bytes;
use render::PageRenderer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use render::page_file_name;

/// File ids become directory names, so only `[A-Za-z0-9_-]` is accepted.
pub fn is_valid_file_id(file_id: &str) -> bool {
    !file_id.is_empty()
        && file_id.len() <= 64
        && file_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Paths of every artifact derived from one upload.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workdir(&self, file_id: &str) -> PathBuf {
        self.root.join(file_id)
    }

    pub fn original_pdf_path(&self, file_id: &str) -> PathBuf {
        self.workdir(file_id).join("original.pdf")
    }

    pub fn meta_path(&self, file_id: &str) -> PathBuf {
        self.workdir(file_id).join("meta.json")
    }

    pub fn dir_original_pages(&self, file_id: &str) -> PathBuf {
        self.workdir(file_id).join("original_pages")
    }

    pub fn dir_parsed_pages(&self, file_id: &str) -> PathBuf {
        self.workdir(file_id).join("parsed_pages")
    }

    pub fn images_dir(&self, file_id: &str) -> PathBuf {
        self.workdir(file_id).join("images")
    }

    pub fn markdown_output(&self, file_id: &str) -> PathBuf {
        self.workdir(file_id).join("output.md")
    }

    pub fn index_dir(&self, file_id: &str) -> PathBuf {
        self.workdir(file_id).join("index")
    }
}

/// What `save_upload` returns and what `meta.json` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPdf {
    pub file_id: String,
    pub name: String,
    pub pages: u32,
}

/// Summary of one parse pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseReport {
    pub pages: u32,
    pub text_pages: usize,
    pub images: usize,
    pub rendered_pages: usize,
}

/// Stores uploads and turns them into Markdown, images and page renders.
#[derive(Debug, Clone)]
pub struct PdfService {
    layout: StorageLayout,
    renderer: Option<PageRenderer>,
    original_dpi: u32,
    parsed_dpi: u32,
}

impl PdfService {
    pub fn new(storage: &StorageConfig, renderer: &RendererConfig) -> Self {
        Self {
            layout: StorageLayout::new(&storage.data_root),
            renderer: renderer
                .command
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(PageRenderer::new),
            original_dpi: renderer.original_dpi,
            parsed_dpi: renderer.parsed_dpi,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Validate and store an uploaded PDF under `file_id`.
    ///
    /// Nothing is written when the bytes are not a readable PDF.
    pub async fn save_upload(
        &self,
        file_id: &str,
        bytes: Bytes,
        filename: Option<&str>,
    ) -> Result<SavedPdf, PdfError> {
        if bytes.is_empty() {
            return Err(PdfError::EmptyUpload);
        }
        let counted = bytes.clone();
        let pages = tokio::task::spawn_blocking(move || extract::count_pages(&counted))
            .await
            .map_err(|e| PdfError::InvalidPdf {
                message: format!("page count task failed: {}", e),
            })??;

        let workdir = self.layout.workdir(file_id);
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| PdfError::storage(&workdir, e))?;

        let pdf_path = self.layout.original_pdf_path(file_id);
        tokio::fs::write(&pdf_path, &bytes)
            .await
            .map_err(|e| PdfError::storage(&pdf_path, e))?;

        let saved = SavedPdf {
            file_id: file_id.to_string(),
            name: display_name(filename),
            pages,
        };
        let meta_path = self.layout.meta_path(file_id);
        let meta = saved.clone();
        let target = meta_path.clone();
        tokio::task::spawn_blocking(move || persistence::atomic_write_json(&target, &meta))
            .await
            .map_err(|e| PdfError::storage(&meta_path, std::io::Error::other(e)))?
            .map_err(|e| PdfError::storage(&meta_path, e))?;

        if let Some(renderer) = &self.renderer {
            let out_dir = self.layout.dir_original_pages(file_id);
            match renderer.render(&pdf_path, &out_dir, self.original_dpi).await {
                Ok(rendered) => tracing::debug!(file_id, rendered, "Rendered original pages"),
                Err(e) => tracing::warn!(file_id, error = %e, "Original page rendering failed"),
            }
        }

        tracing::info!(file_id, name = %saved.name, pages, "Stored upload");
        Ok(saved)
    }

    /// Read back `meta.json` for a stored upload.
    pub async fn load_meta(&self, file_id: &str) -> Result<SavedPdf, PdfError> {
        let path = self.layout.meta_path(file_id);
        let source = path.clone();
        tokio::task::spawn_blocking(move || persistence::load_json::<SavedPdf>(&source))
            .await
            .map_err(|e| PdfError::storage(&path, std::io::Error::other(e)))?
            .map_err(|e| PdfError::storage(&path, e))?
            .ok_or_else(|| PdfError::NotFound {
                file_id: file_id.to_string(),
            })
    }

    /// Extract text and images from `original.pdf` into `output.md` and
    /// `images/`, then render the parsed page images.
    pub async fn run_full_parse_pipeline(&self, file_id: &str) -> Result<ParseReport, PdfError> {
        let pdf_path = self.layout.original_pdf_path(file_id);
        let bytes = match tokio::fs::read(&pdf_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PdfError::NotFound {
                    file_id: file_id.to_string(),
                });
            }
            Err(e) => return Err(PdfError::storage(&pdf_path, e)),
        };

        let title = self
            .load_meta(file_id)
            .await
            .map(|m| m.name)
            .unwrap_or_else(|_| file_id.to_string());

        let (document, markdown) = tokio::task::spawn_blocking(move || {
            let document = extract::extract_document(&bytes)?;
            let markdown = extract::to_markdown(&title, &document);
            Ok::<_, PdfError>((document, markdown))
        })
        .await
        .map_err(|e| PdfError::Extraction {
            page: 0,
            message: format!("extraction task failed: {}", e),
        })??;

        let images_dir = self.layout.images_dir(file_id);
        tokio::fs::create_dir_all(&images_dir)
            .await
            .map_err(|e| PdfError::storage(&images_dir, e))?;
        for image in &document.images {
            let path = images_dir.join(&image.name);
            tokio::fs::write(&path, &image.bytes)
                .await
                .map_err(|e| PdfError::storage(&path, e))?;
        }

        let md_path = self.layout.markdown_output(file_id);
        tokio::fs::write(&md_path, markdown.as_bytes())
            .await
            .map_err(|e| PdfError::storage(&md_path, e))?;

        let mut report = ParseReport {
            pages: document.page_count,
            text_pages: document.pages.len(),
            images: document.images.len(),
            rendered_pages: 0,
        };

        if let Some(renderer) = &self.renderer {
            let out_dir = self.layout.dir_parsed_pages(file_id);
            report.rendered_pages = renderer
                .render(&pdf_path, &out_dir, self.parsed_dpi)
                .await?;
        }

        tracing::info!(
            file_id,
            pages = report.pages,
            text_pages = report.text_pages,
            images = report.images,
            rendered = report.rendered_pages,
            "Parse pipeline finished"
        );
        Ok(report)
    }
}

/// Last path component of the client-supplied name, or a fallback.
fn display_name(filename: Option<&str>) -> String {
    filename
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("document.pdf")
        .to_string()
}
