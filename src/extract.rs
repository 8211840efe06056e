//! Document parsing for uploaded files (plain text, PDF, DOCX).
//!
//! Callers supply bytes plus a MIME type; this module returns ordered
//! [`Segment`]s of UTF-8 text. PDFs produce one segment per page so the
//! chunker can keep page numbers; text and DOCX produce a single segment.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use thiserror::Error;

use crate::models::{Document, Segment};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub const SUPPORTED_MIME_TYPES: &[&str] = &[MIME_TEXT, MIME_PDF, MIME_DOCX];

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Parse `bytes` according to `mime_type`.
pub fn parse_document(bytes: &[u8], mime_type: &str) -> Result<Vec<Segment>, ExtractError> {
    match mime_type {
        MIME_TEXT => Ok(vec![Segment::text(decode_text(bytes))]),
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes).map(|text| vec![Segment::text(text)]),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

pub fn is_supported(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime_type)
}

/// Settle on a MIME type for an upload.
///
/// A declared type wins unless it is missing or the generic
/// `application/octet-stream`, in which case the file extension decides.
/// Parameters such as `; charset=utf-8` are dropped.
pub fn resolve_mime(declared: Option<&str>, file_name: &str) -> String {
    let declared = declared
        .map(|d| d.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty() && d != "application/octet-stream");

    match declared {
        Some(d) => d,
        None => mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Read and parse a local file; the MIME type comes from its extension.
pub fn load_file(path: &Path) -> anyhow::Result<Document> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mime = resolve_mime(None, &name);
    let segments = parse_document(&bytes, &mime)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Document::new(&name, &mime, segments))
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<Segment>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| Segment::page(text, i as u32 + 1))
        .collect())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    extract_paragraphs(&doc_xml)
}

/// Collect `<w:t>` runs, one paragraph per `<w:p>`, paragraphs separated by
/// blank lines so the chunker sees the document's structure.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }

    Ok(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = parse_document(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn plain_text_is_one_segment() {
        let segs = parse_document(b"\xEF\xBB\xBFhello there", MIME_TEXT).unwrap();
        assert_eq!(segs, vec![Segment::text("hello there")]);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = parse_document(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = parse_document(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn docx_keeps_paragraph_breaks() {
        let bytes = docx_with_paragraphs(&["First paragraph.", "Second &amp; last."]);
        let segs = parse_document(&bytes, MIME_DOCX).unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].text, "First paragraph.\n\nSecond & last.");
        assert_eq!(segs[0].page, None);
    }

    #[test]
    fn resolve_mime_prefers_declared_type() {
        assert_eq!(resolve_mime(Some("text/plain; charset=utf-8"), "a.pdf"), MIME_TEXT);
        assert_eq!(resolve_mime(None, "notes.txt"), MIME_TEXT);
        assert_eq!(resolve_mime(Some("application/octet-stream"), "paper.pdf"), MIME_PDF);
        assert_eq!(resolve_mime(None, "letter.docx"), MIME_DOCX);
        assert!(!is_supported(&resolve_mime(None, "image.png")));
    }

    #[test]
    fn load_file_uses_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faq.txt");
        std::fs::write(&path, "Shipping takes three days.").unwrap();

        let doc = load_file(&path).unwrap();
        assert_eq!(doc.source_name, "faq.txt");
        assert_eq!(doc.mime_type, MIME_TEXT);
        assert_eq!(doc.raw_text(), "Shipping takes three days.");

        let png = dir.path().join("logo.png");
        std::fs::write(&png, [0u8, 1, 2]).unwrap();
        assert!(load_file(&png).is_err());
    }
}
