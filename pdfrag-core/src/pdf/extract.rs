//! Text and image extraction with `lopdf`.
//!
//! Everything here is synchronous and CPU-bound; callers run it on the
//! blocking pool.

use crate::error::PdfError;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use std::collections::BTreeSet;

/// Text of one page, 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// An embedded image pulled out of a page's XObject resources.
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    pub page: u32,
    /// File name relative to the images directory, e.g. `page-0002-1.jpg`.
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Result of running extraction over a whole document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub page_count: u32,
    pub pages: Vec<PageText>,
    pub images: Vec<ExtractedImage>,
}

pub(crate) fn load(bytes: &[u8]) -> Result<Document, PdfError> {
    if bytes.is_empty() {
        return Err(PdfError::EmptyUpload);
    }
    let doc = Document::load_mem(bytes).map_err(|e| PdfError::InvalidPdf {
        message: e.to_string(),
    })?;
    if doc.get_pages().is_empty() {
        return Err(PdfError::InvalidPdf {
            message: "document has no pages".to_string(),
        });
    }
    Ok(doc)
}

/// Count the pages of a PDF held in memory.
pub fn count_pages(bytes: &[u8]) -> Result<u32, PdfError> {
    Ok(load(bytes)?.get_pages().len() as u32)
}

/// Extract per-page text and embedded JPEG images.
pub fn extract_document(bytes: &[u8]) -> Result<ExtractedDocument, PdfError> {
    let doc = load(bytes)?;
    let pages = doc.get_pages();
    let mut out = ExtractedDocument {
        page_count: pages.len() as u32,
        ..Default::default()
    };

    for (&number, &page_id) in &pages {
        match doc.extract_text(&[number]) {
            Ok(raw) => {
                let text = clean_page_text(&raw);
                if !text.is_empty() {
                    out.pages.push(PageText { number, text });
                }
            }
            Err(e) => {
                tracing::warn!(page = number, error = %e, "Skipping page without extractable text");
            }
        }
        out.images.extend(page_images(&doc, number, page_id));
    }
    Ok(out)
}

/// Normalize extracted text: trim lines, collapse runs of blank lines, and
/// escape leading `#`, ```` ``` ```` and `~~~` so page text never opens a
/// Markdown header or code fence.
pub fn clean_page_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !lines.is_empty() {
                lines.push(String::new());
            }
            continue;
        }
        blank_run = 0;
        if starts_markdown_block(line) {
            lines.push(format!("\\{}", line));
        } else {
            lines.push(line.to_string());
        }
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn starts_markdown_block(line: &str) -> bool {
    line.starts_with('#') || line.starts_with("```") || line.starts_with("~~~")
}

/// Render extracted pages as Markdown: a `#` title, then one `## Page N`
/// section per page with text, followed by links to that page's images.
pub fn to_markdown(title: &str, doc: &ExtractedDocument) -> String {
    let mut md = String::new();
    let title = title.trim();
    if !title.is_empty() {
        md.push_str(&format!("# {}\n\n", title.replace('\n', " ")));
    }

    let image_pages: BTreeSet<u32> = doc.images.iter().map(|i| i.page).collect();
    let text_pages: BTreeSet<u32> = doc.pages.iter().map(|p| p.number).collect();

    for number in text_pages.union(&image_pages) {
        md.push_str(&format!("## Page {}\n\n", number));
        if let Some(page) = doc.pages.iter().find(|p| p.number == *number) {
            md.push_str(&page.text);
            md.push_str("\n\n");
        }
        for image in doc.images.iter().filter(|i| i.page == *number) {
            md.push_str(&format!("![](images/{})\n\n", image.name));
        }
    }
    md
}

/// Collect `DCTDecode` image XObjects reachable from a page's resources,
/// following inherited `Resources` up the page tree.
fn page_images(doc: &Document, number: u32, page_id: ObjectId) -> Vec<ExtractedImage> {
    let Some(xobjects) = page_xobjects(doc, page_id) else {
        return Vec::new();
    };

    let mut images = Vec::new();
    for (_, value) in xobjects.iter() {
        let Ok(id) = value.as_reference() else {
            continue;
        };
        let Ok(stream) = doc.get_object(id).and_then(Object::as_stream) else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .is_ok_and(|n| n == b"Image");
        if !is_image {
            continue;
        }
        let Some(bytes) = jpeg_bytes(stream) else {
            continue;
        };
        images.push(ExtractedImage {
            page: number,
            name: format!("page-{:04}-{}.jpg", number, images.len() + 1),
            bytes,
        });
    }
    images
}

fn page_xobjects(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    // Bounded walk; malformed trees can contain parent cycles.
    for _ in 0..32 {
        if let Ok(resources) = node.get(b"Resources") {
            let resources = resolve_dict(doc, resources)?;
            let xobjects = resources.get(b"XObject").ok()?;
            return resolve_dict(doc, xobjects);
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Dictionary(dict) => Some(dict),
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        _ => None,
    }
}

/// JPEG bytes of an image stream whose filter chain ends in `DCTDecode`.
/// Leading `FlateDecode` stages are undone; any other chain is skipped.
fn jpeg_bytes(stream: &Stream) -> Option<Vec<u8>> {
    let filters = filter_names(&stream.dict);
    let (last, leading) = filters.split_last()?;
    if last.as_slice() != b"DCTDecode" {
        return None;
    }
    let mut bytes = stream.content.clone();
    for filter in leading {
        if filter.as_slice() != b"FlateDecode" {
            return None;
        }
        let stage = Stream::new(dictionary! { "Filter" => "FlateDecode" }, bytes);
        bytes = stage.decompressed_content().ok()?;
    }
    Some(bytes)
}

fn filter_names(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(filters)) => filters
            .iter()
            .filter_map(|f| f.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{image_pdf, sample_pdf};
    use super::*;

    #[test]
    fn test_count_pages() {
        let bytes = sample_pdf(&["one", "two", "three"]);
        assert_eq!(count_pages(&bytes).unwrap(), 3);
    }

    #[test]
    fn test_count_pages_rejects_garbage() {
        assert!(matches!(
            count_pages(b"definitely not a pdf"),
            Err(PdfError::InvalidPdf { .. })
        ));
        assert!(matches!(count_pages(b""), Err(PdfError::EmptyUpload)));
    }

    #[test]
    fn test_extract_document_text_per_page() {
        let bytes = sample_pdf(&["Alpha particles", "", "Gamma rays"]);
        let doc = extract_document(&bytes).unwrap();
        assert_eq!(doc.page_count, 3);
        let numbers: Vec<u32> = doc.pages.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert!(doc.pages[0].text.contains("Alpha"));
        assert!(doc.pages[1].text.contains("Gamma"));
        assert!(doc.images.is_empty());
    }

    #[test]
    fn test_clean_page_text() {
        let raw = "  Intro  \n\n\n\n# not a header\nbody\n\n";
        assert_eq!(clean_page_text(raw), "Intro\n\n\\# not a header\nbody");
        assert_eq!(clean_page_text("\n\n  \n"), "");
    }

    #[test]
    fn test_to_markdown_sections_and_images() {
        let doc = ExtractedDocument {
            page_count: 3,
            pages: vec![
                PageText {
                    number: 1,
                    text: "First".into(),
                },
                PageText {
                    number: 3,
                    text: "Third".into(),
                },
            ],
            images: vec![ExtractedImage {
                page: 2,
                name: "page-0002-1.jpg".into(),
                bytes: vec![0xFF, 0xD8],
            }],
        };
        let md = to_markdown("report.pdf", &doc);
        assert_eq!(
            md,
            "# report.pdf\n\n## Page 1\n\nFirst\n\n## Page 2\n\n![](images/page-0002-1.jpg)\n\n## Page 3\n\nThird\n\n"
        );
    }

    fn fake_jpeg() -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend(std::iter::repeat_n(0x42, 512));
        bytes.extend([0xFF, 0xD9]);
        bytes
    }

    #[test]
    fn test_clean_page_text_escapes_fences() {
        let raw = "```rust\n~~~ break\n  ``` indented";
        assert_eq!(
            clean_page_text(raw),
            "\\```rust\n\\~~~ break\n\\``` indented"
        );
    }

    #[test]
    fn test_fence_in_page_text_keeps_page_sections() {
        let raw_pages = ["Intro\n~~~ section break", "Mitochondria", "Chloroplasts"];
        let doc = ExtractedDocument {
            page_count: 3,
            pages: raw_pages
                .iter()
                .zip(1..)
                .map(|(raw, number)| PageText {
                    number,
                    text: clean_page_text(raw),
                })
                .collect(),
            images: Vec::new(),
        };
        let chunks = crate::index::split_markdown(&to_markdown("cells.pdf", &doc));

        let pages: Vec<&str> = chunks
            .iter()
            .map(|c| c.metadata[crate::index::HEADER_2].as_str())
            .collect();
        assert_eq!(pages, vec!["Page 1", "Page 2", "Page 3"]);
        assert!(chunks[1].text.contains("Mitochondria"));
        assert!(!chunks[0].text.contains("Mitochondria"));
    }

    #[test]
    fn test_extract_plain_dct_image() {
        let jpeg = fake_jpeg();
        let bytes = image_pdf(Object::Name(b"DCTDecode".to_vec()), jpeg.clone(), false);
        let doc = extract_document(&bytes).unwrap();
        assert_eq!(doc.images.len(), 1);
        assert_eq!(doc.images[0].page, 1);
        assert_eq!(doc.images[0].name, "page-0001-1.jpg");
        assert_eq!(doc.images[0].bytes, jpeg);
    }

    #[test]
    fn test_extract_flate_wrapped_dct_image() {
        let jpeg = fake_jpeg();
        let mut zipped = Stream::new(dictionary! {}, jpeg.clone());
        zipped.compress().unwrap();
        assert!(zipped.dict.has(b"Filter"));

        let filter = Object::Array(vec![
            Object::Name(b"FlateDecode".to_vec()),
            Object::Name(b"DCTDecode".to_vec()),
        ]);
        let bytes = image_pdf(filter, zipped.content, false);
        let doc = extract_document(&bytes).unwrap();
        assert_eq!(doc.images.len(), 1);
        assert_eq!(doc.images[0].bytes, jpeg);
    }

    #[test]
    fn test_extract_skips_non_jpeg_images() {
        let bytes = image_pdf(Object::Name(b"FlateDecode".to_vec()), vec![0; 3], false);
        assert!(extract_document(&bytes).unwrap().images.is_empty());

        let filter = Object::Array(vec![
            Object::Name(b"DCTDecode".to_vec()),
            Object::Name(b"FlateDecode".to_vec()),
        ]);
        let bytes = image_pdf(filter, fake_jpeg(), false);
        assert!(extract_document(&bytes).unwrap().images.is_empty());
    }

    #[test]
    fn test_extract_image_from_inherited_resources() {
        let jpeg = fake_jpeg();
        let bytes = image_pdf(Object::Name(b"DCTDecode".to_vec()), jpeg.clone(), true);
        let doc = extract_document(&bytes).unwrap();
        assert_eq!(doc.images.len(), 1);
        assert_eq!(doc.images[0].bytes, jpeg);
    }

    #[test]
    fn test_filter_names_name_and_array() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        assert_eq!(filter_names(&dict), vec![b"DCTDecode".to_vec()]);

        dict.set(
            "Filter",
            Object::Array(vec![
                Object::Name(b"FlateDecode".to_vec()),
                Object::Name(b"DCTDecode".to_vec()),
            ]),
        );
        assert_eq!(
            filter_names(&dict),
            vec![b"FlateDecode".to_vec(), b"DCTDecode".to_vec()]
        );
        assert!(filter_names(&Dictionary::new()).is_empty());
    }
}
