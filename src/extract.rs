//! Text extraction for uploaded documents.
//!
//! Dispatches on the file extension: PDF via `pdf-extract`, DOCX (and
//! `.doc` files that are really OOXML) via `zip` + `quick-xml`, TXT and MD
//! as lossy UTF-8. Failures are [`RagError::ExtractionError`]; nothing here
//! panics on malformed input except inside `pdf-extract`, which callers run
//! on a blocking task.

use std::io::Read;

use docqa_core::storage::file_extension;
use docqa_core::{RagError, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

fn fail(filename: &str, message: impl Into<String>) -> RagError {
    RagError::ExtractionError {
        filename: filename.to_string(),
        message: message.into(),
    }
}

/// Extract plain text from `bytes`, choosing the parser by `filename`'s
/// extension. Whitespace-only output is an error.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String> {
    let ext = file_extension(filename).unwrap_or_default();
    let text = match ext.as_str() {
        ".pdf" => extract_pdf(bytes, filename)?,
        ".docx" => extract_docx(bytes, filename)?,
        ".doc" if bytes.starts_with(ZIP_MAGIC) => extract_docx(bytes, filename)?,
        ".doc" => {
            return Err(fail(
                filename,
                "legacy binary .doc is not supported; save the file as .docx",
            ))
        }
        ".txt" | ".md" => String::from_utf8_lossy(bytes).into_owned(),
        other => return Err(fail(filename, format!("unsupported file type '{}'", other))),
    };

    if text.trim().is_empty() {
        return Err(fail(filename, "no extractable text"));
    }
    Ok(text)
}

fn extract_pdf(bytes: &[u8], filename: &str) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| fail(filename, format!("PDF extraction failed: {}", e)))
}

fn extract_docx(bytes: &[u8], filename: &str) -> Result<String> {
    let ooxml = |e: &dyn std::fmt::Display| fail(filename, format!("OOXML extraction failed: {}", e));

    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ooxml(&e))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ooxml(&"word/document.xml not found"))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ooxml(&e))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml(&"word/document.xml exceeds size limit"));
    }

    paragraphs_from_document_xml(&doc_xml).map_err(|e| ooxml(&e))
}

/// Collect `w:t` runs, one line per `w:p` paragraph.
fn paragraphs_from_document_xml(xml: &[u8]) -> std::result::Result<String, quick_xml::Error> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::Text(te) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"tab" => out.push('\t'),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
