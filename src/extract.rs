//! Text extraction for uploaded documents.
//!
//! Intake hands this module raw bytes plus a detected [`ContentKind`]; it
//! returns plain UTF-8 text and a page count. PDF pages are counted from
//! the document itself; for everything else the page count is estimated
//! from the word count.

use std::io::Read;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

/// Words assumed per page when a format carries no page structure.
pub const WORDS_PER_PAGE: usize = 300;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Document format, decided from the declared content type or the file
/// extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    Docx,
    Text,
}

impl ContentKind {
    /// A declared PDF or DOCX content type wins; otherwise the extension
    /// decides, and anything unrecognized is plain text.
    pub fn detect(file_name: &str, content_type: Option<&str>) -> Self {
        match content_type.map(|ct| ct.trim().to_ascii_lowercase()).as_deref() {
            Some(MIME_PDF) | Some("pdf") => return ContentKind::Pdf,
            Some(MIME_DOCX) => return ContentKind::Docx,
            _ => {}
        }
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".pdf") {
            ContentKind::Pdf
        } else if lower.ends_with(".docx") {
            ContentKind::Docx
        } else {
            ContentKind::Text
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ContentKind::Pdf => MIME_PDF,
            ContentKind::Docx => MIME_DOCX,
            ContentKind::Text => MIME_TEXT,
        }
    }
}

#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    Docx(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Plain text of a document and its page count (at least 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub num_pages: usize,
}

pub fn extract_text(bytes: &[u8], kind: ContentKind) -> Result<Extracted, ExtractError> {
    match kind {
        ContentKind::Pdf => extract_pdf(bytes),
        ContentKind::Docx => {
            let text = extract_docx(bytes)?;
            let num_pages = estimate_pages(&text);
            Ok(Extracted { text, num_pages })
        }
        ContentKind::Text => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            let num_pages = estimate_pages(&text);
            Ok(Extracted { text, num_pages })
        }
    }
}

/// `max(1, words / 300)`, counting whitespace-separated words.
pub fn estimate_pages(text: &str) -> usize {
    (text.split_whitespace().count() / WORDS_PER_PAGE).max(1)
}

fn extract_pdf(bytes: &[u8]) -> Result<Extracted, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(Extracted {
        num_pages: pages.len().max(1),
        text: pages.join("\n"),
    })
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
    paragraphs_from_document_xml(&doc_xml)
}

/// Collects `w:t` runs, one output line per `w:p` paragraph.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"p" => {
                paragraphs.push(String::new());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_by_content_type_then_extension() {
        assert_eq!(ContentKind::detect("a.bin", Some(MIME_PDF)), ContentKind::Pdf);
        assert_eq!(ContentKind::detect("REPORT.PDF", None), ContentKind::Pdf);
        assert_eq!(ContentKind::detect("memo.docx", Some("")), ContentKind::Docx);
        assert_eq!(ContentKind::detect("notes.md", None), ContentKind::Text);
        assert_eq!(ContentKind::detect("x.txt", Some("text/markdown")), ContentKind::Text);
    }

    #[test]
    fn page_estimate_is_at_least_one() {
        assert_eq!(estimate_pages(""), 1);
        assert_eq!(estimate_pages("a few words"), 1);
        assert_eq!(estimate_pages(&"word ".repeat(299)), 1);
        assert_eq!(estimate_pages(&"word ".repeat(600)), 2);
        // punctuation does not add words
        assert_eq!(estimate_pages(&"word, ".repeat(900)), 3);
    }

    #[test]
    fn plain_text_is_read_lossily() {
        let out = extract_text(b"caf\xff ok", ContentKind::Text).unwrap();
        assert!(out.text.starts_with("caf"));
        assert!(out.text.ends_with(" ok"));
        assert_eq!(out.num_pages, 1);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", ContentKind::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", ContentKind::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = br#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Bananas are</w:t></w:r><w:r><w:t xml:space="preserve"> yellow.</w:t></w:r></w:p>
            <w:p/>
            <w:p><w:r><w:t>Apples &amp; pears.</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let text = paragraphs_from_document_xml(xml).unwrap();
        assert_eq!(text, "Bananas are yellow.\n\nApples & pears.");
    }
}
