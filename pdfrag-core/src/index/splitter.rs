//! Markdown header splitter.
//!
//! Splits on `#` and `##` headers. Each chunk keeps the text between headers
//! (header lines themselves are stripped) and records the active headers as
//! `Header 1` / `Header 2` metadata. Lines inside fenced code blocks are never
//! treated as headers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const HEADER_1: &str = "Header 1";
pub const HEADER_2: &str = "Header 2";

/// Default upper bound on chunk length, in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 8000;

/// A piece of Markdown plus the headers it sits under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct MarkdownHeaderSplitter {
    max_chunk_chars: usize,
}

impl Default for MarkdownHeaderSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_CHARS)
    }
}

impl MarkdownHeaderSplitter {
    pub fn new(max_chunk_chars: usize) -> Self {
        Self { max_chunk_chars }
    }

    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        let mut body: Vec<&str> = Vec::new();
        let mut fence: Option<&str> = None;

        for line in text.lines() {
            let stripped = line.trim();

            if let Some(marker) = fence {
                if stripped.starts_with(marker) {
                    fence = None;
                }
                body.push(line);
                continue;
            }
            if let Some(marker) = fence_marker(stripped) {
                fence = Some(marker);
                body.push(line);
                continue;
            }

            // `##` must be checked before `#`.
            if let Some(title) = header_text(stripped, "##") {
                self.flush(&mut body, &headers, &mut chunks);
                headers.insert(HEADER_2.to_string(), title);
            } else if let Some(title) = header_text(stripped, "#") {
                self.flush(&mut body, &headers, &mut chunks);
                headers.remove(HEADER_2);
                headers.insert(HEADER_1.to_string(), title);
            } else {
                body.push(line);
            }
        }
        self.flush(&mut body, &headers, &mut chunks);
        chunks
    }

    fn flush(
        &self,
        body: &mut Vec<&str>,
        headers: &BTreeMap<String, String>,
        chunks: &mut Vec<Chunk>,
    ) {
        let joined = body.join("\n");
        body.clear();
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            return;
        }
        chunks.push(Chunk {
            text: trimmed.chars().take(self.max_chunk_chars).collect(),
            metadata: headers.clone(),
        });
    }
}

/// Split with the default chunk length.
pub fn split_markdown(text: &str) -> Vec<Chunk> {
    MarkdownHeaderSplitter::default().split(text)
}

fn header_text(line: &str, marker: &str) -> Option<String> {
    let rest = line.strip_prefix(marker)?;
    if rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t') {
        Some(rest.trim().to_string())
    } else {
        None
    }
}

fn fence_marker(line: &str) -> Option<&'static str> {
    if line.starts_with("```") {
        Some("```")
    } else if line.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_split_pages_under_title() {
        let md = "# report.pdf\n\n## Page 1\n\nIntro text\n\n## Page 2\n\nMore text\n";
        let chunks = split_markdown(md);
        assert_eq!(
            chunks,
            vec![
                Chunk {
                    text: "Intro text".into(),
                    metadata: meta(&[(HEADER_1, "report.pdf"), (HEADER_2, "Page 1")]),
                },
                Chunk {
                    text: "More text".into(),
                    metadata: meta(&[(HEADER_1, "report.pdf"), (HEADER_2, "Page 2")]),
                },
            ]
        );
    }

    #[test]
    fn test_new_h1_resets_h2() {
        let md = "# A\n## Sub\nx\n# B\ny\n";
        let chunks = split_markdown(md);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].metadata, meta(&[(HEADER_1, "B")]));
        assert_eq!(chunks[1].text, "y");
    }

    #[test]
    fn test_text_before_any_header_has_no_metadata() {
        let chunks = split_markdown("preamble\n# Title\nbody");
        assert_eq!(chunks[0].text, "preamble");
        assert!(chunks[0].metadata.is_empty());
    }

    #[test]
    fn test_deeper_headers_and_hashtags_are_body() {
        let chunks = split_markdown("## Page 1\n### Detail\n#hashtag\n\\# escaped");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "### Detail\n#hashtag\n\\# escaped");
    }

    #[test]
    fn test_headers_inside_code_fence_ignored() {
        let md = "## Page 1\n```\n# not a header\n```\nafter";
        let chunks = split_markdown(md);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("# not a header"));
        assert!(chunks[0].text.ends_with("after"));
    }

    #[test]
    fn test_empty_sections_dropped() {
        assert!(split_markdown("# Title\n\n## Page 1\n\n   \n").is_empty());
        assert!(split_markdown("").is_empty());
    }

    #[test]
    fn test_truncation_counts_chars() {
        let splitter = MarkdownHeaderSplitter::new(4);
        let chunks = splitter.split("## P\nhéllo wörld");
        assert_eq!(chunks[0].text, "héll");
    }
}
