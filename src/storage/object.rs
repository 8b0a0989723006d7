//! S3-compatible object storage (AWS S3, MinIO, LocalStack).
//!
//! Objects are written with signed `PUT`, read with `GET`, removed with
//! `DELETE`, probed with `HEAD`. Requests are signed with
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html)
//! using only `hmac` + `sha2`.
//!
//! With `endpoint_url` set, requests use path-style addressing
//! (`{endpoint}/{bucket}/{key}`) and keep the endpoint's scheme, which is
//! what MinIO expects. Without it, virtual-hosted style against
//! `{bucket}.s3.{region}.amazonaws.com` over HTTPS.
//!
//! # Credentials
//!
//! `[storage.object] access_key_id` / `secret_access_key`, falling back to
//! `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docqa_core::storage::{content_type_for, validate_key, SaveOutcome, StorageBackend};
use docqa_core::{RagError, Result};
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::ObjectStorageConfig;

type HmacSha256 = Hmac<Sha256>;

const BACKEND: &str = "object";

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn resolve(config: &ObjectStorageConfig) -> Result<Self> {
        let from_env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let access_key_id = config
            .access_key_id
            .clone()
            .or_else(|| from_env("AWS_ACCESS_KEY_ID"))
            .ok_or_else(|| {
                RagError::InvalidConfig(
                    "object storage needs access_key_id or AWS_ACCESS_KEY_ID".to_string(),
                )
            })?;
        let secret_access_key = config
            .secret_access_key
            .clone()
            .or_else(|| from_env("AWS_SECRET_ACCESS_KEY"))
            .ok_or_else(|| {
                RagError::InvalidConfig(
                    "object storage needs secret_access_key or AWS_SECRET_ACCESS_KEY".to_string(),
                )
            })?;

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: from_env("AWS_SESSION_TOKEN"),
        })
    }
}

/// Where a request goes and what gets signed.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    url: String,
    host: String,
    canonical_uri: String,
}

pub struct ObjectStorage {
    client: reqwest::Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    credentials: AwsCredentials,
}

impl ObjectStorage {
    pub fn new(config: &ObjectStorageConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::InvalidConfig(format!("object storage http client: {}", e)))?;

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config
                .endpoint_url
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_string()),
            credentials: AwsCredentials::resolve(config)?,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Request target for `key`, or for the bucket itself when `None`.
    fn target(&self, key: Option<&str>) -> Target {
        let encoded_key = key.map(|k| k.split('/').map(uri_encode).collect::<Vec<_>>().join("/"));

        match self.endpoint {
            Some(ref endpoint) => {
                let (scheme, host) = match endpoint.split_once("://") {
                    Some((scheme, rest)) => (scheme, rest),
                    None => ("https", endpoint.as_str()),
                };
                let canonical_uri = match encoded_key {
                    Some(k) => format!("/{}/{}", uri_encode(&self.bucket), k),
                    None => format!("/{}", uri_encode(&self.bucket)),
                };
                Target {
                    url: format!("{}://{}{}", scheme, host, canonical_uri),
                    host: host.to_string(),
                    canonical_uri,
                }
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let canonical_uri = match encoded_key {
                    Some(k) => format!("/{}", k),
                    None => "/".to_string(),
                };
                Target {
                    url: format!("https://{}{}", host, canonical_uri),
                    host,
                    canonical_uri,
                }
            }
        }
    }

    /// SigV4 headers (`authorization`, `x-amz-*`) for one request.
    fn sign(
        &self,
        method: &Method,
        target: &Target,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), target.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method.as_str(),
            target.canonical_uri,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.credentials.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        )?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.credentials.access_key_id, credential_scope, signed_headers, signature
        );

        let mut out: Vec<(String, String)> = headers
            .into_iter()
            .filter(|(k, _)| k != "host")
            .collect();
        out.push(("authorization".to_string(), authorization));
        Ok(out)
    }

    async fn send(
        &self,
        method: Method,
        key: Option<&str>,
        body: Option<&[u8]>,
    ) -> Result<reqwest::Response> {
        if let Some(k) = key {
            validate_key(k)?;
        }
        let target = self.target(key);
        let payload_hash = hex_sha256(body.unwrap_or_default());
        let headers = self.sign(&method, &target, &payload_hash, Utc::now())?;

        let mut request = self.client.request(method.clone(), &target.url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(bytes) = body {
            request = request
                .header("content-type", content_type_for(key.unwrap_or_default()))
                .body(bytes.to_vec());
        }

        debug!(method = %method, url = %target.url, "object storage request");
        request.send().await.map_err(|e| {
            RagError::storage(
                BACKEND,
                format!(
                    "{} s3://{}/{} failed: {}",
                    method,
                    self.bucket,
                    key.unwrap_or_default(),
                    e
                ),
            )
        })
    }
}

async fn status_error(op: &str, key: &str, response: reqwest::Response) -> RagError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    RagError::storage(
        BACKEND,
        format!(
            "{} failed (HTTP {}) for key '{}': {}",
            op,
            status,
            key,
            body.chars().take(500).collect::<String>()
        ),
    )
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    fn kind(&self) -> &str {
        BACKEND
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<SaveOutcome> {
        let response = self.send(Method::PUT, Some(key), Some(bytes)).await?;
        if !response.status().is_success() {
            return Err(status_error("PutObject", key, response).await);
        }
        Ok(SaveOutcome::Stored)
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let response = self.send(Method::GET, Some(key), None).await?;
        if !response.status().is_success() {
            return Err(status_error("GetObject", key, response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RagError::storage(BACKEND, format!("reading '{}': {}", key, e)))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        // S3 answers 204 whether or not the object existed.
        let existed = self.exists(key).await?;
        let response = self.send(Method::DELETE, Some(key), None).await?;
        match response.status() {
            s if s.is_success() => Ok(existed),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error("DeleteObject", key, response).await),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let response = self.send(Method::HEAD, Some(key), None).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error("HeadObject", key, response).await),
        }
    }

    async fn available(&self) -> bool {
        match self.send(Method::HEAD, None, None).await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| RagError::storage(BACKEND, format!("hmac key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
