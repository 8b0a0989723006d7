//! End-to-end tests for ingestion and answering over a temp SQLite
//! database, local storage and fake model backends.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{harness, harness_with, words, Harness, KeywordEmbedder};
use docqa::answer::{NO_ACCESSIBLE_CONTENT, NO_RELEVANT_CONTENT};
use docqa::ingest::{UpdateReport, UploadRequest};
use docqa_core::models::{collection_name_for, Document, DocumentStatus, StorageMode, StorageState};
use docqa_core::RagError;

fn request(owner: &str, filename: &str, text: &str) -> UploadRequest {
    UploadRequest {
        owner_id: owner.to_string(),
        filename: filename.to_string(),
        bytes: text.as_bytes().to_vec(),
        model: None,
        storage_mode: None,
    }
}

/// Upload and wait for ingestion to finish.
async fn upload(h: &Harness, owner: &str, filename: &str, text: &str) -> String {
    let receipt = h
        .app
        .pipeline
        .upload(request(owner, filename, text))
        .await
        .unwrap();
    h.app.pipeline.wait(&receipt.document_id).await;
    receipt.document_id
}

/// Files under local storage's document prefix.
fn stored_files(h: &Harness) -> usize {
    std::fs::read_dir(h.tmp.path().join("uploads/documents"))
        .map(|dir| dir.count())
        .unwrap_or(0)
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// 1400 characters: apple region, mango region, grape region. At size 500
/// and overlap 50 the middle chunk is all mango.
fn fruit_text() -> String {
    format!(
        "{}{}{}",
        words("apple", 90),
        words("mango", 100),
        words("grape", 90)
    )
}

#[tokio::test]
async fn test_question_about_middle_chunk_ranks_it_first() {
    let h = harness().await;
    let id = upload(&h, "alice", "fruit.txt", &fruit_text()).await;

    let report = h.app.pipeline.status(&id).await.unwrap();
    assert_eq!(report.document.status, DocumentStatus::Processed);
    assert_eq!(report.vectors, 3);
    assert!(!report.running);

    let answer = h
        .app
        .engine
        .ask("alice", "Tell me about the mango?")
        .await
        .unwrap();
    assert_eq!(answer.answer, "answer #1");
    assert!(!answer.cached);
    assert_eq!(answer.used_chunks[0].chunk_index, 1);
    assert_eq!(answer.used_chunks[0].document_id, id);
    assert_eq!(answer.used_chunks[0].filename, "fruit.txt");
    assert!(answer.used_chunks[0].score > answer.used_chunks[1].score);

    let prompt = h.chat.last_user_prompt.lock().unwrap().clone().unwrap();
    assert!(prompt.contains("Tell me about the mango?"));
    assert!(prompt.contains(&words("mango", 100)));

    let history = h.app.docs.history_for("alice", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].answer, "answer #1");
}

#[tokio::test]
async fn test_failed_reingestion_keeps_previous_version() {
    let h = harness().await;
    // 4500 characters: ten chunks at size 500 / overlap 50.
    let id = upload(&h, "alice", "v1.txt", &words("mango", 900)).await;
    let before = h.app.pipeline.status(&id).await.unwrap();
    assert_eq!(before.vectors, 10);

    // The rejected marker sits at offset 3400, inside chunk 7 only.
    let v2 = format!("{}venom{}", words("grape", 680), words("grape", 219));
    let err = h
        .app
        .pipeline
        .update(&id, "v2.txt", v2.into_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::EmbeddingBackendError { .. }), "{err}");

    let after = h.app.pipeline.status(&id).await.unwrap();
    assert_eq!(after.document.status, DocumentStatus::Processed);
    assert_eq!(after.vectors, 10);
    assert_eq!(after.document.storage_key, before.document.storage_key);
    assert_eq!(after.document.original_filename, "v1.txt");
    assert!(after.document.error_message.is_none());
    // The rejected version's file is gone before update returns.
    assert_eq!(stored_files(&h), 1);

    let answer = h.app.engine.ask("alice", "mango").await.unwrap();
    assert!(answer.used_chunks.iter().all(|c| c.filename == "v1.txt"));
}

#[tokio::test]
async fn test_update_swaps_in_new_version() {
    let h = harness().await;
    let id = upload(&h, "alice", "v1.txt", &words("mango", 200)).await;
    let old_key = h.app.docs.require(&id).await.unwrap().storage_key;

    let report = h
        .app
        .pipeline
        .update(&id, "v2.txt", words("grape", 150).into_bytes())
        .await
        .unwrap();
    assert!(matches!(report, UpdateReport::Swapped { chunks: 2, .. }));

    let status = h.app.pipeline.status(&id).await.unwrap();
    assert_eq!(status.document.status, DocumentStatus::Processed);
    assert_eq!(status.document.original_filename, "v2.txt");
    assert_eq!(status.vectors, 2);
    assert_ne!(status.document.storage_key, old_key);
    assert!(!h.tmp.path().join("uploads").join(&old_key).exists());

    let answer = h.app.engine.ask("alice", "grape").await.unwrap();
    assert!(answer.used_chunks.iter().all(|c| c.filename == "v2.txt"));
}

#[tokio::test]
async fn test_update_rejected_while_ingestion_running() {
    let h = harness().await;
    let receipt = h
        .app
        .pipeline
        .upload(request("alice", "slow.txt", &format!("sloth{}", words("mango", 10))))
        .await
        .unwrap();
    let id = receipt.document_id;
    assert!(h.app.pipeline.status(&id).await.unwrap().running);

    let err = h
        .app
        .pipeline
        .update(&id, "other.txt", b"apple".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::IngestionInProgress(_)));
    assert!(matches!(
        h.app.pipeline.delete(&id).await,
        Err(RagError::IngestionInProgress(_))
    ));

    h.embedder.open_gate();
    h.app.pipeline.wait(&id).await;
    let status = h.app.pipeline.status(&id).await.unwrap();
    assert_eq!(status.document.status, DocumentStatus::Processed);
    assert_eq!(status.document.original_filename, "slow.txt");
}

#[tokio::test]
async fn test_cancel_marks_document_failed_and_retry_recovers() {
    let h = harness().await;
    let receipt = h
        .app
        .pipeline
        .upload(request("alice", "slow.txt", &format!("sloth{}", words("mango", 10))))
        .await
        .unwrap();
    let id = receipt.document_id;

    assert!(h.app.pipeline.cancel(&id).await.unwrap());
    let status = h.app.pipeline.status(&id).await.unwrap();
    assert_eq!(status.document.status, DocumentStatus::Failed);
    assert_eq!(status.document.error_message.as_deref(), Some("cancelled"));
    assert_eq!(status.vectors, 0);
    assert!(!status.running);

    h.embedder.open_gate();
    h.app.pipeline.retry(&id).await.unwrap();
    h.app.pipeline.wait(&id).await;
    let status = h.app.pipeline.status(&id).await.unwrap();
    assert_eq!(status.document.status, DocumentStatus::Processed);
    assert!(status.document.error_message.is_none());
    assert_eq!(status.vectors, 1);
}

#[tokio::test]
async fn test_retry_requires_failed_status() {
    let h = harness().await;
    let id = upload(&h, "alice", "a.txt", "apple").await;
    assert!(matches!(
        h.app.pipeline.retry(&id).await,
        Err(RagError::InvalidState { .. })
    ));
    assert!(matches!(
        h.app.pipeline.retry("missing").await,
        Err(RagError::DocumentNotFound(_))
    ));
}

#[tokio::test]
async fn test_extraction_failure_marks_document_failed() {
    let h = harness().await;
    let id = upload(&h, "alice", "broken.pdf", "not a pdf at all").await;

    let status = h.app.pipeline.status(&id).await.unwrap();
    assert_eq!(status.document.status, DocumentStatus::Failed);
    let message = status.document.error_message.unwrap();
    assert!(message.contains("extraction failed"), "{message}");
    assert_eq!(status.vectors, 0);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unsupported_upload_is_rejected_before_storage() {
    let h = harness().await;
    let err = h
        .app
        .pipeline
        .upload(request("alice", "sheet.xlsx", "a,b,c"))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::InvalidRequest(_)));
    assert!(h.app.docs.list_for_owner("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_model_is_rejected_at_upload() {
    let h = harness().await;
    let mut req = request("alice", "a.txt", "apple");
    req.model = Some("missing-model".to_string());
    let err = h.app.pipeline.upload(req).await.unwrap_err();
    assert!(matches!(err, RagError::ModelNotFound { .. }));
}

#[tokio::test]
async fn test_no_accessible_documents_short_circuits() {
    let h = harness().await;
    upload(&h, "alice", "fruit.txt", &fruit_text()).await;

    let answer = h.app.engine.ask("bob", "Tell me about mango").await.unwrap();
    assert_eq!(answer.answer, NO_ACCESSIBLE_CONTENT);
    assert!(answer.used_chunks.is_empty());
    assert_eq!(h.chat.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.app.docs.history_count("bob").await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_documents_are_not_searched() {
    let h = harness().await;
    upload(&h, "alice", "broken.pdf", "garbage").await;

    let answer = h.app.engine.ask("alice", "anything").await.unwrap();
    assert_eq!(answer.answer, NO_ACCESSIBLE_CONTENT);
    assert_eq!(h.chat.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_repeated_question_is_served_from_cache() {
    let h = harness().await;
    upload(&h, "alice", "fruit.txt", &fruit_text()).await;

    let first = h.app.engine.ask("alice", "What about mango?").await.unwrap();
    let second = h
        .app
        .engine
        .ask("alice", "  what ABOUT   mango? ")
        .await
        .unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.answer, second.answer);
    assert_eq!(first.used_chunks, second.used_chunks);
    assert_eq!(h.chat.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.app.docs.history_count("alice").await.unwrap(), 1);
}

#[tokio::test]
async fn test_new_upload_invalidates_cached_answers() {
    let h = harness().await;
    upload(&h, "alice", "fruit.txt", &fruit_text()).await;
    h.app.engine.ask("alice", "mango").await.unwrap();

    upload(&h, "alice", "more.txt", &words("mango", 50)).await;
    let again = h.app.engine.ask("alice", "mango").await.unwrap();
    assert!(!again.cached);
    assert_eq!(h.chat.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_file_update_invalidates_cached_answers() {
    let h = harness().await;
    let id = upload(&h, "alice", "fruit.txt", &words("mango", 50)).await;
    h.app.engine.ask("alice", "mango").await.unwrap();

    h.app
        .pipeline
        .update(&id, "fruit.txt", words("mango", 60).into_bytes())
        .await
        .unwrap();
    let again = h.app.engine.ask("alice", "mango").await.unwrap();
    assert!(!again.cached);
    assert_eq!(h.chat.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let h = harness().await;
    assert!(matches!(
        h.app.engine.ask("alice", "   ").await,
        Err(RagError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_dimension_mismatch_fails_before_chat() {
    let wide = Arc::new(KeywordEmbedder::named("wide", 2));
    let h = harness_with(StorageMode::Local, vec![wide]).await;

    let mut req = request("alice", "fruit.txt", &fruit_text());
    req.model = Some("wide".to_string());
    let receipt = h.app.pipeline.upload(req).await.unwrap();
    h.app.pipeline.wait(&receipt.document_id).await;
    let status = h.app.pipeline.status(&receipt.document_id).await.unwrap();
    assert_eq!(status.document.embedding_model, "wide");
    assert_eq!(status.document.status, DocumentStatus::Processed);

    let err = h.app.engine.ask("alice", "mango").await.unwrap_err();
    assert!(matches!(
        err,
        RagError::DimensionMismatch {
            expected: 6,
            actual: 4
        }
    ));
    assert_eq!(h.chat.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_delete_removes_vectors_and_file() {
    let h = harness().await;
    let id = upload(&h, "alice", "fruit.txt", &fruit_text()).await;
    let key = h.app.docs.require(&id).await.unwrap().storage_key;
    assert!(h.tmp.path().join("uploads").join(&key).exists());

    let report = h.app.pipeline.delete(&id).await.unwrap();
    assert_eq!(report.vectors_removed, 3);
    assert!(report.file_removed);
    assert!(!h.tmp.path().join("uploads").join(&key).exists());

    assert!(h.app.docs.list_for_owner("alice").await.unwrap().is_empty());
    let answer = h.app.engine.ask("alice", "mango").await.unwrap();
    assert_eq!(answer.answer, NO_ACCESSIBLE_CONTENT);
}

#[tokio::test]
async fn test_no_hits_returns_fixed_answer() {
    let h = harness().await;
    let id = upload(&h, "alice", "fruit.txt", &fruit_text()).await;
    h.app
        .store
        .delete_by_document(&h.app.docs.require(&id).await.unwrap().vector_collection_name, &id)
        .await
        .unwrap();

    let answer = h.app.engine.ask("alice", "mango").await.unwrap();
    assert_eq!(answer.answer, NO_RELEVANT_CONTENT);
    assert_eq!(h.chat.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_restart_fails_interrupted_ingestion() {
    let h = harness().await;

    // A row left `processing` by a process that died mid-ingestion.
    let id = "0b8f6a1e-5a34-4c1f-9d0a-3f1f0e6e7c11".to_string();
    let now = chrono::Utc::now().timestamp();
    h.app
        .docs
        .insert(&Document {
            vector_collection_name: collection_name_for(&id),
            id: id.clone(),
            owner_id: "alice".to_string(),
            original_filename: "lost.txt".to_string(),
            storage_key: "documents/lost.txt".to_string(),
            storage_mode: StorageMode::Local,
            storage_state: StorageState::Redundant,
            embedding_model: "keywords".to_string(),
            status: DocumentStatus::Processing,
            error_message: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    let queued = h.app.pipeline.resume_unfinished().await.unwrap();
    assert_eq!(queued, 0);
    let doc = h.app.docs.require(&id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(doc.error_message.as_deref(), Some("interrupted by restart"));
}

#[tokio::test]
async fn test_cancelled_update_keeps_previous_version() {
    let h = harness().await;
    let id = upload(&h, "alice", "v1.txt", &words("mango", 200)).await;
    let before = h.app.pipeline.status(&id).await.unwrap();

    let pipeline = h.app.pipeline.clone();
    let doc_id = id.clone();
    let update = tokio::spawn(async move {
        pipeline
            .update(&doc_id, "v2.txt", words("sloth", 20).into_bytes())
            .await
    });
    wait_until(|| h.app.pipeline.tracker().is_running(&id) && stored_files(&h) == 2).await;

    assert!(h.app.pipeline.cancel(&id).await.unwrap());
    let err = update.await.unwrap().unwrap_err();
    assert!(matches!(err, RagError::InvalidState { .. }), "{err}");
    assert!(err.to_string().contains("update cancelled"));

    let after = h.app.pipeline.status(&id).await.unwrap();
    assert_eq!(after.document.status, DocumentStatus::Processed);
    assert_eq!(after.document.storage_key, before.document.storage_key);
    assert_eq!(after.vectors, before.vectors);
    assert!(after.document.error_message.is_none());
    assert!(!after.running);

    // The staged copy of v2 is removed in the background.
    wait_until(|| stored_files(&h) == 1).await;

    let report = h
        .app
        .pipeline
        .update(&id, "v3.txt", words("grape", 150).into_bytes())
        .await
        .unwrap();
    assert!(matches!(report, UpdateReport::Swapped { chunks: 2, .. }));
}

#[tokio::test]
async fn test_update_cannot_be_cancelled_once_vectors_are_swapping() {
    let h = harness().await;
    let id = upload(&h, "alice", "v1.txt", &words("mango", 200)).await;
    let replaces_before = h.store.replace_calls.load(Ordering::SeqCst);
    h.store.hold_replaces.store(true, Ordering::SeqCst);

    let pipeline = h.app.pipeline.clone();
    let doc_id = id.clone();
    let update = tokio::spawn(async move {
        pipeline
            .update(&doc_id, "v2.txt", words("grape", 150).into_bytes())
            .await
    });
    wait_until(|| h.store.replace_calls.load(Ordering::SeqCst) > replaces_before).await;

    assert!(!h.app.pipeline.cancel(&id).await.unwrap());
    let err = h
        .app
        .pipeline
        .update(&id, "v3.txt", words("apple", 150).into_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::IngestionInProgress(_)), "{err}");

    h.store.release_replaces();
    let report = update.await.unwrap().unwrap();
    assert!(matches!(report, UpdateReport::Swapped { chunks: 2, .. }));
    assert_eq!(h.store.max_concurrent_replaces.load(Ordering::SeqCst), 1);

    let status = h.app.pipeline.status(&id).await.unwrap();
    assert_eq!(status.document.original_filename, "v2.txt");
    assert_eq!(stored_files(&h), 1);
}

#[tokio::test]
async fn test_concurrent_updates_of_one_document_are_serialized() {
    let h = harness().await;
    let id = upload(&h, "alice", "v1.txt", &words("mango", 200)).await;

    let pipeline = h.app.pipeline.clone();
    let doc_id = id.clone();
    let first = tokio::spawn(async move {
        pipeline
            .update(&doc_id, "slow.txt", words("sloth", 20).into_bytes())
            .await
    });
    wait_until(|| h.app.pipeline.tracker().is_running(&id) && stored_files(&h) == 2).await;

    let err = h
        .app
        .pipeline
        .update(&id, "v3.txt", words("grape", 150).into_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::IngestionInProgress(_)), "{err}");

    h.embedder.open_gate();
    let report = first.await.unwrap().unwrap();
    assert!(matches!(report, UpdateReport::Swapped { chunks: 1, .. }));

    let report = h
        .app
        .pipeline
        .update(&id, "v3.txt", words("grape", 150).into_bytes())
        .await
        .unwrap();
    assert!(matches!(report, UpdateReport::Swapped { chunks: 2, .. }));
    assert_eq!(h.store.max_concurrent_replaces.load(Ordering::SeqCst), 1);

    let status = h.app.pipeline.status(&id).await.unwrap();
    assert_eq!(status.document.original_filename, "v3.txt");
    assert_eq!(status.vectors, 2);
    assert_eq!(stored_files(&h), 1);
}

#[tokio::test]
async fn test_delete_keeps_document_when_vector_removal_fails() {
    let h = harness().await;
    let id = upload(&h, "alice", "fruit.txt", &fruit_text()).await;
    let key = h.app.docs.require(&id).await.unwrap().storage_key;

    h.store.fail_deletes.store(true, Ordering::SeqCst);
    let err = h.app.pipeline.delete(&id).await.unwrap_err();
    assert!(matches!(err, RagError::VectorStoreError { .. }), "{err}");

    let doc = h.app.docs.get(&id).await.unwrap().unwrap();
    assert!(!doc.is_deleted);
    assert_eq!(h.app.pipeline.status(&id).await.unwrap().vectors, 3);
    assert!(h.tmp.path().join("uploads").join(&key).exists());
    assert!(!h.app.pipeline.tracker().is_running(&id));

    h.store.fail_deletes.store(false, Ordering::SeqCst);
    let report = h.app.pipeline.delete(&id).await.unwrap();
    assert_eq!(report.vectors_removed, 3);
    assert!(h.app.docs.get(&id).await.unwrap().unwrap().is_deleted);
}

#[tokio::test]
async fn test_each_collection_is_searched_for_its_own_document() {
    let h = harness().await;
    upload(&h, "alice", "fruit.txt", &fruit_text()).await;
    upload(&h, "alice", "mango.txt", &words("mango", 60)).await;
    upload(&h, "bob", "other.txt", &words("mango", 60)).await;
    h.store.search_filter_sizes.lock().unwrap().clear();

    let answer = h.app.engine.ask("alice", "mango").await.unwrap();
    assert!(!answer.used_chunks.is_empty());

    let sizes = h.store.search_filter_sizes.lock().unwrap().clone();
    assert_eq!(sizes, vec![1, 1]);
}
