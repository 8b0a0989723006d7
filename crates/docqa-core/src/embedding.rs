//! Embedding backend trait and vector utilities.
//!
//! Defines the [`EmbeddingBackend`] capability that every embedding
//! provider implements, plus pure helpers for vector serialization,
//! similarity and dimension checks.
//!
//! Concrete providers (OpenAI-compatible, Ollama, fastembed) and the
//! batching/retrying client live in the `docqa` app crate.

use async_trait::async_trait;

use crate::error::{RagError, Result};

/// A model that turns text into fixed-dimension vectors.
///
/// `embed` performs exactly one backend call for the whole slice; callers
/// own batching, concurrency limits and retries. Implementations report
/// retryable failures with a transient
/// [`RagError::EmbeddingBackendError`].
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Provider identifier (e.g. `"openai"`), used in errors and logs.
    fn provider(&self) -> &str;
    /// Returns the model identifier (e.g. `"text-embedding-ada-002"`).
    fn model_name(&self) -> &str;
    /// Returns the declared vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed `texts`, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Fail with [`RagError::DimensionMismatch`] on the first vector whose
/// length differs from `expected`.
pub fn check_dims(vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    match vectors.iter().find(|v| v.len() != expected) {
        Some(v) => Err(RagError::DimensionMismatch {
            expected,
            actual: v.len(),
        }),
        None => Ok(()),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use docqa_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Euclidean distance. Returns `f32::INFINITY` for mismatched lengths.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
