//! Embedding gateway trait and vector utilities.
//!
//! Defines the [`EmbeddingGateway`] trait that all embedding backends
//! implement, an offline [`HashingEmbedder`], and pure helpers for vector
//! serialization and similarity computation.
//!
//! Network-backed gateways (OpenAI, Ollama) live in the `rvault` app crate.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{ProviderErrorKind, Result, VaultError};

/// Maps text to fixed-dimension vectors.
///
/// Implementations must preserve input order and return exactly
/// [`dims`](EmbeddingGateway::dims) values per vector.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        let mut vectors = check_dimensions(self, 1, vectors)?;
        Ok(vectors.remove(0))
    }
}

/// Verify a gateway response: one vector per input, each of the gateway's
/// declared dimension.
pub fn check_dimensions<G: EmbeddingGateway + ?Sized>(
    gateway: &G,
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(VaultError::provider(
            gateway.model_name(),
            ProviderErrorKind::Malformed,
            format!("expected {} embeddings, got {}", expected, vectors.len()),
        ));
    }
    let dims = gateway.dims();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(VaultError::provider(
            gateway.model_name(),
            ProviderErrorKind::Malformed,
            format!("expected dimension {}, got {}", dims, bad.len()),
        ));
    }
    Ok(vectors)
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dims` buckets
/// with a signed weight, and the result is L2-normalized. Identical texts
/// always map to identical vectors and texts sharing vocabulary score
/// higher than unrelated ones. Needs no network or model download.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(VaultError::configuration("embedding.dims must be > 0"));
        }
        Ok(Self { dims })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dims;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingGateway for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use ragvault_core::embedding::{vec_to_blob, blob_to_vec};
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

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or
/// zero-magnitude vectors.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hashing_embedder_deterministic() {
        let e = HashingEmbedder::new(64).unwrap();
        let a = e.embed("The mitochondria is the powerhouse").await.unwrap();
        let b = e.embed("the MITOCHONDRIA is the powerhouse").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashing_embedder_similarity_ordering() {
        let e = HashingEmbedder::new(256).unwrap();
        let q = e.embed("rust borrow checker").await.unwrap();
        let near = e.embed("the rust borrow checker rejects aliasing").await.unwrap();
        let far = e.embed("banana bread recipe with walnuts").await.unwrap();
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn test_hashing_embedder_rejects_zero_dims() {
        assert!(HashingEmbedder::new(0).is_err());
    }

    struct WrongDims;

    #[async_trait]
    impl EmbeddingGateway for WrongDims {
        fn model_name(&self) -> &str {
            "wrong"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_provider_error() {
        let err = WrongDims.embed("hello").await.unwrap_err();
        assert_eq!(err.code(), "provider_error");
        assert!(err.to_string().contains("dimension"));
    }
}
