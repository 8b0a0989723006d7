//! HTTP API over a live listener.

mod common;

use common::{harness, words, Harness};
use docqa::server::router;
use serde_json::Value;

async fn serve(h: &Harness) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(h.app.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health() {
    let h = harness().await;
    let base = serve(&h).await;

    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_missing_user_header_is_bad_request() {
    let h = harness().await;
    let base = serve(&h).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/documents", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("x-user-id"));
}

#[tokio::test]
async fn test_upload_status_and_ask() {
    let h = harness().await;
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/documents?filename=fruit.txt", base))
        .header("x-user-id", "alice")
        .body(words("mango", 30))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let receipt: Value = resp.json().await.unwrap();
    let id = receipt["document_id"].as_str().unwrap().to_string();
    assert_eq!(receipt["status"], "pending");

    h.app.pipeline.wait(&id).await;

    let status: Value = client
        .get(format!("{}/documents/{}", base, id))
        .header("x-user-id", "alice")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["document"]["status"], "processed");
    assert_eq!(status["vectors"], 1);

    // Someone else's document does not exist for bob.
    let resp = client
        .get(format!("{}/documents/{}", base, id))
        .header("x-user-id", "bob")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let answer: Value = client
        .post(format!("{}/ask", base))
        .header("x-user-id", "alice")
        .json(&serde_json::json!({ "question": "mango?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(answer["answer"], "answer #1");
    assert_eq!(answer["cached"], false);
    assert_eq!(answer["used_chunks"][0]["document_id"], id.as_str());

    let history: Value = client
        .get(format!("{}/history", base))
        .header("x-user-id", "alice")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["total"], 1);
    assert_eq!(history["entries"][0]["question"], "mango?");
}

#[tokio::test]
async fn test_error_contract_for_conflicts_and_unknown_models() {
    let h = harness().await;
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/documents?filename=a.txt&model=nope", base))
        .header("x-user-id", "alice")
        .body("some text")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .post(format!("{}/documents?filename=slow.txt", base))
        .header("x-user-id", "alice")
        .body(words("sloth", 10))
        .send()
        .await
        .unwrap();
    let receipt: Value = resp.json().await.unwrap();
    let id = receipt["document_id"].as_str().unwrap().to_string();

    let resp = client
        .delete(format!("{}/documents/{}", base, id))
        .header("x-user-id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "conflict");

    h.embedder.open_gate();
    h.app.pipeline.wait(&id).await;

    let resp = client
        .delete(format!("{}/documents/{}", base, id))
        .header("x-user-id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_storage_info_and_models() {
    let h = harness().await;
    let base = serve(&h).await;

    let info: Value = reqwest::get(format!("{}/storage/info", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["mode"], "local");
    assert_eq!(info["local_available"], true);

    let models: Value = reqwest::get(format!("{}/models", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = models["models"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"keywords"));
    assert!(names.contains(&"recording"));
}
