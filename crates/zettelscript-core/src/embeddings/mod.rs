//! Embedding math and the provider seam (§4.7, §4.9).
//!
//! Generation is out of scope; this module houses the vector arithmetic the
//! suggestion sweep and the related-notes ranker both need, plus the trait
//! callers implement to plug in an actual embedding backend.

use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("dimension mismatch: {0} vs {1}")]
    DimensionMismatch(usize, usize),
}

pub type EmbeddingResult<T> = std::result::Result<T, EmbeddingError>;

/// A backend that turns text into a fixed-dimension vector.
pub trait EmbeddingProvider {
    fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;
    fn dimension(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` if either vector is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

/// Matryoshka-style truncation: keep the first `dims` components and
/// re-normalize, so a truncated vector stays comparable by cosine similarity.
pub fn matryoshka_truncate(vector: &[f32], dims: usize) -> Vec<f32> {
    let mut truncated: Vec<f32> = vector.iter().take(dims).copied().collect();
    let norm = truncated.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut truncated {
            *x /= norm;
        }
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn euclidean_distance_of_identical_vectors_is_zero() {
        assert_eq!(euclidean_distance(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn matryoshka_truncate_shrinks_and_renormalizes() {
        let v = vec![3.0, 4.0, 0.0, 0.0];
        let truncated = matryoshka_truncate(&v, 2);
        assert_eq!(truncated.len(), 2);
        let norm = truncated.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
