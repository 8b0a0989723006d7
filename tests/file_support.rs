//! Word and PDF uploads through the full pipeline.

mod common;

use common::{harness, words};
use docqa::extract::extract_text;
use docqa::ingest::UploadRequest;
use docqa_core::models::DocumentStatus;

/// Minimal docx (ZIP) with one `w:p` per paragraph.
fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// A zip archive without `word/document.xml`.
fn zip_without_document() -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"not a word document").unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[test]
fn docx_paragraphs_are_extracted_in_order() {
    let bytes = docx_with_paragraphs(&["office test phrase", "second paragraph"]);
    let text = extract_text(&bytes, "report.docx").unwrap();
    assert_eq!(text, "office test phrase\nsecond paragraph");
}

#[test]
fn ooxml_saved_as_doc_is_extracted() {
    let bytes = docx_with_paragraphs(&["renamed document"]);
    assert_eq!(extract_text(&bytes, "renamed.DOC").unwrap(), "renamed document");
}

#[test]
fn docx_without_document_xml_fails() {
    let err = extract_text(&zip_without_document(), "odd.docx").unwrap_err();
    assert!(err.to_string().contains("word/document.xml"));
}

#[test]
fn empty_docx_fails() {
    let err = extract_text(&docx_with_paragraphs(&[]), "empty.docx").unwrap_err();
    assert!(err.to_string().contains("no extractable text"));
}

#[tokio::test]
async fn docx_upload_is_ingested_and_answerable() {
    let h = harness().await;
    let mango = words("mango", 40);
    let bytes = docx_with_paragraphs(&[&words("apple", 40), &mango]);

    let receipt = h
        .app
        .pipeline
        .upload(UploadRequest {
            owner_id: "alice".to_string(),
            filename: "uploads/fruit.docx".to_string(),
            bytes,
            model: None,
            storage_mode: None,
        })
        .await
        .unwrap();
    h.app.pipeline.wait(&receipt.document_id).await;

    let status = h.app.pipeline.status(&receipt.document_id).await.unwrap();
    assert_eq!(status.document.status, DocumentStatus::Processed);
    assert_eq!(status.document.original_filename, "fruit.docx");
    assert!(status.document.storage_key.ends_with(".docx"));
    assert_eq!(status.vectors, 1);

    let answer = h.app.engine.ask("alice", "mango").await.unwrap();
    assert_eq!(answer.used_chunks[0].filename, "fruit.docx");
    let prompt = h.chat.last_user_prompt.lock().unwrap().clone().unwrap();
    assert!(prompt.contains(&mango));
}

#[tokio::test]
async fn legacy_doc_upload_fails_with_hint() {
    let h = harness().await;
    let receipt = h
        .app
        .pipeline
        .upload(UploadRequest {
            owner_id: "alice".to_string(),
            filename: "old.doc".to_string(),
            bytes: b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1legacy".to_vec(),
            model: None,
            storage_mode: None,
        })
        .await
        .unwrap();
    h.app.pipeline.wait(&receipt.document_id).await;

    let doc = h.app.docs.require(&receipt.document_id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.error_message.unwrap().contains(".docx"));
}
