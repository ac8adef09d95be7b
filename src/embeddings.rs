//! The embedding provider protocol, a null reference implementation, and
//! the cosine similarity helper recall and reflection both depend on.

use async_trait::async_trait;

use crate::error::Result;

/// A pluggable embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed each of `texts`, returning one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed dimension of vectors this embedder produces.
    fn dimension(&self) -> usize;
}

/// Returns zero vectors of a configured dimension. The reflection and
/// recall pipelines treat an all-zero vector as "no semantic signal".
#[derive(Debug, Clone, Copy)]
pub struct NullEmbedder {
    dimension: usize,
}

impl NullEmbedder {
    /// Construct a null embedder with the given vector dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for NullEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.0; self.dimension]).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine similarity between two vectors. Mismatched dimensions or a
/// zero-magnitude vector on either side return `0.0` rather than `NaN`.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Whether `vector` is empty or every component is exactly zero — the
/// signal a null embedder produces for "no semantic content".
#[must_use]
pub fn is_zero_vector(vector: &[f32]) -> bool {
    vector.is_empty() || vector.iter().all(|x| *x == 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_embedder_returns_zero_vectors_matching_input_length() {
        let embedder = NullEmbedder::new(4);
        let out = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v == &vec![0.0; 4]));
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_handles_zero_magnitude() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_requires_matching_dimensions() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn is_zero_vector_detects_all_zero_and_empty() {
        assert!(is_zero_vector(&[]));
        assert!(is_zero_vector(&[0.0, 0.0]));
        assert!(!is_zero_vector(&[0.0, 0.1]));
    }
}
