//! Multi-format text extraction.
//!
//! Extraction is pipeline-layer: the ingestion orchestrator supplies bytes
//! plus a declared content type; this module returns plain UTF-8 text.
//! Supported inputs: PDF, DOCX, Markdown, HTML, plain text, and source code
//! (code passes through untouched so the structural chunker sees the real
//! file).

use std::io::Read;

use pulldown_cmark::{Event, Parser, TagEnd};

/// Supported MIME types for extraction.
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_HTML: &str = "text/html";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_CODE: &str = "text/x-source";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction error. Never panics; the pipeline marks the document failed.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("HTML extraction failed: {0}")]
    Html(String),
    #[error("invalid UTF-8: {0}")]
    Utf8(String),
}

/// Map a file extension to the declared content type used on documents.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.trim_start_matches('.') {
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "md" | "markdown" => MIME_MARKDOWN,
        "html" | "htm" => MIME_HTML,
        "dart" | "ts" | "tsx" | "js" | "jsx" | "py" | "rs" | "go" | "java" | "kt" | "swift" => {
            MIME_CODE
        }
        _ => MIME_TEXT,
    }
}

/// Extract plain text from document content.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_MARKDOWN => Ok(extract_markdown(utf8(bytes)?.as_ref())),
        MIME_HTML => extract_html(utf8(bytes)?.as_bytes()),
        MIME_TEXT | MIME_CODE => Ok(utf8(bytes)?),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

fn utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| ExtractError::Utf8(e.to_string()))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

// ============ DOCX ============

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut doc_xml = Vec::new();
    let mut found = false;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        if entry.name() == "word/document.xml" {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(ExtractError::Ooxml(
                    "word/document.xml exceeds size limit".to_string(),
                ));
            }
            found = true;
            break;
        }
    }
    if !found {
        return Err(ExtractError::Ooxml(
            "word/document.xml not found".to_string(),
        ));
    }
    extract_w_t_elements(&doc_xml)
}

/// Walk `w:t` text runs; paragraphs (`w:p`) become newlines.
fn extract_w_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

// ============ Markdown ============

/// Strip Markdown syntax, keeping heading/paragraph breaks and code blocks.
fn extract_markdown(source: &str) -> String {
    let mut out = String::new();
    for event in Parser::new(source) {
        match event {
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::List(_),
            ) => {
                if !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
    out.trim().to_string()
}

// ============ HTML ============

/// Tags whose content never belongs in extracted text.
const HTML_SKIP_TAGS: &[&[u8]] = &[b"script", b"style", b"head", b"noscript"];

/// Strip tags from an HTML page, dropping script/style/head content.
fn extract_html(html: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(html);
    reader.config_mut().trim_text(true);
    // Real-world pages are rarely well-formed XML.
    reader.config_mut().check_end_names = false;
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if HTML_SKIP_TAGS.contains(&name.as_ref()) {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name();
                if HTML_SKIP_TAGS.contains(&name.as_ref()) {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if skip_depth == 0
                    && matches!(
                        name.as_ref(),
                        b"p" | b"div" | b"h1" | b"h2" | b"h3" | b"h4" | b"li" | b"br" | b"tr"
                    )
                    && !out.ends_with('\n')
                    && !out.is_empty()
                {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if skip_depth == 0 => {
                let text = te.unescape().unwrap_or_default();
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                        out.push(' ');
                    }
                    out.push_str(trimmed);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Html(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn plain_text_passes_through() {
        let text = extract_text(b"Alpha beta gamma.", MIME_TEXT).unwrap();
        assert_eq!(text, "Alpha beta gamma.");
    }

    #[test]
    fn code_passes_through_unchanged() {
        let src = "fn main() {\n    println!(\"hi\");\n}\n";
        let text = extract_text(src.as_bytes(), MIME_CODE).unwrap();
        assert_eq!(text, src);
    }

    #[test]
    fn markdown_strips_syntax() {
        let md = "# Title\n\nSome *emphasised* text with `code`.\n\n- item one\n- item two\n";
        let text = extract_text(md.as_bytes(), MIME_MARKDOWN).unwrap();
        assert!(text.contains("Title"));
        assert!(text.contains("emphasised"));
        assert!(text.contains("code"));
        assert!(!text.contains('#'));
        assert!(!text.contains('*'));
    }

    #[test]
    fn html_strips_tags_and_scripts() {
        let html = b"<html><head><title>t</title><script>var x = 1;</script></head>\
                     <body><h1>Widgets</h1><p>State management basics.</p></body></html>";
        let text = extract_text(html, MIME_HTML).unwrap();
        assert!(text.contains("Widgets"));
        assert!(text.contains("State management basics."));
        assert!(!text.contains("var x"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(content_type_for_extension("pdf"), MIME_PDF);
        assert_eq!(content_type_for_extension(".md"), MIME_MARKDOWN);
        assert_eq!(content_type_for_extension("dart"), MIME_CODE);
        assert_eq!(content_type_for_extension("txt"), MIME_TEXT);
        assert_eq!(content_type_for_extension("unknown"), MIME_TEXT);
    }
}
