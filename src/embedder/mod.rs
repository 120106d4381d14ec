//! Embedding capability.
//!
//! The engine treats embedding as an opaque capability: text in, a
//! fixed-dimension vector out. Provider SDKs implement [`Embedder`] outside
//! the core; [`HashEmbedder`] is the built-in deterministic implementation
//! used for local runs and tests.

use async_trait::async_trait;

/// Text to fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder produces. Fixed per deployment.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, anyhow::Error>;
}

/// Cosine similarity between two equal-length vectors, in [-1, 1].
/// Returns 0.0 for zero vectors or mismatched lengths.
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
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Deterministic bag-of-tokens embedder.
///
/// Tokens are hashed into `dimension` buckets and the vector is L2
/// normalized, so identical texts embed identically and texts sharing
/// vocabulary land close together. No external service involved.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = md5::compute(token.as_bytes());
        let mut acc = 0usize;
        for byte in digest.0.iter().take(8) {
            acc = (acc << 8) | *byte as usize;
        }
        acc % self.dimension
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, anyhow::Error> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
            .filter(|t| t.len() >= 2)
        {
            vector[self.bucket(token)] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_text_embeds_identically() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("Rust is a systems language").await.unwrap();
        let b = embedder.embed("Rust is a systems language").await.unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn overlapping_text_scores_higher_than_disjoint() {
        let embedder = HashEmbedder::default();
        let base = embedder.embed("memory storage vector search").await.unwrap();
        let near = embedder.embed("vector search over memory").await.unwrap();
        let far = embedder.embed("quarterly revenue projections").await.unwrap();
        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
    }

    #[test]
    fn zero_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
