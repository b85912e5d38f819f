//! Page rasterization through an external `pdftoppm`-compatible command.

use crate::error::PdfError;
use std::path::Path;
use tokio::process::Command;

/// File name of a rendered page image, e.g. `page-0003.png`.
pub fn page_file_name(page: u32) -> String {
    format!("page-{:04}.png", page)
}

/// Runs `<command> -png -r <dpi> <pdf> <out_dir>/page`.
#[derive(Debug, Clone)]
pub struct PageRenderer {
    command: String,
}

impl PageRenderer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Render every page of `pdf` into `out_dir` and return how many page
    /// images ended up there.
    pub async fn render(&self, pdf: &Path, out_dir: &Path, dpi: u32) -> Result<usize, PdfError> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| PdfError::storage(out_dir, e))?;

        let output = Command::new(&self.command)
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg(pdf)
            .arg(out_dir.join("page"))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PdfError::Render {
                message: format!("failed to run '{}': {}", self.command, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PdfError::Render {
                message: format!(
                    "'{}' exited with {}: {}",
                    self.command,
                    output.status,
                    stderr.trim()
                ),
            });
        }

        normalize_page_names(out_dir).await
    }
}

/// Rename `page-1.png` / `page-01.png` style outputs to `page-0001.png`.
pub(crate) async fn normalize_page_names(dir: &Path) -> Result<usize, PdfError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PdfError::storage(dir, e))?;

    let mut found = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PdfError::storage(dir, e))?
    {
        if let Some(page) = entry.file_name().to_str().and_then(page_number) {
            found.push((entry.path(), page));
        }
    }

    for (path, page) in &found {
        let target = dir.join(page_file_name(*page));
        if *path != target {
            tokio::fs::rename(path, &target)
                .await
                .map_err(|e| PdfError::storage(&target, e))?;
        }
    }
    Ok(found.len())
}

fn page_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("page-")?
        .strip_suffix(".png")?
        .parse()
        .ok()
        .filter(|n| *n > 0)
}
