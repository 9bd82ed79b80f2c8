//! Similarity functions for vector comparisons.
//!
//! All comparisons are normalized into `[0, 1]` scores where higher means
//! more similar, so that candidate queues, neighbor lists and search results
//! order the same way regardless of the underlying metric.

use serde::{Deserialize, Serialize};

use crate::simd;

/// Similarity function for vector comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorSimilarity {
    /// Cosine similarity. Best for normalized text embeddings.
    Cosine,

    /// Euclidean (squared-L2 based). Best when magnitude matters.
    Euclidean,

    /// Dot product (inner product). Best for MIPS-style workloads.
    DotProduct,
}

impl VectorSimilarity {
    /// Compares two vectors, returning a normalized similarity score.
    ///
    /// Normalization: dot product maps through `(1 + dp) / 2`, Euclidean
    /// through `1 / (1 + d^2)`, cosine through `(1 + cos) / 2`.
    ///
    /// # Panics
    ///
    /// Panics if the vectors have different lengths.
    #[must_use]
    pub fn compare(&self, a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len(), "Vector dimensions must match");

        match self {
            Self::Cosine => (1.0 + simd::cosine(a, b)) / 2.0,
            Self::Euclidean => 1.0 / (1.0 + simd::squared_l2(a, b)),
            Self::DotProduct => (1.0 + simd::dot_product(a, b)) / 2.0,
        }
    }

    /// Converts a raw accumulated metric value into the normalized score.
    ///
    /// The raw value is a dot product for `DotProduct`/`Cosine` and a squared
    /// L2 distance for `Euclidean`; this is the conversion applied by the
    /// quantized decoders after partial-sum assembly.
    #[must_use]
    pub fn score_from_raw(&self, raw: f32) -> f32 {
        match self {
            Self::Cosine | Self::DotProduct => (1.0 + raw) / 2.0,
            Self::Euclidean => 1.0 / (1.0 + raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product_normalization() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        let score = VectorSimilarity::DotProduct.compare(&a, &b);
        assert!((score - 1.0).abs() < 1e-6);

        let c = vec![-1.0, 0.0];
        let score = VectorSimilarity::DotProduct.compare(&a, &c);
        assert!(score.abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_normalization() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        // d^2 = 25, score = 1/26
        let score = VectorSimilarity::Euclidean.compare(&a, &b);
        assert!((score - 1.0 / 26.0).abs() < 1e-6);

        let score = VectorSimilarity::Euclidean.compare(&a, &a);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_normalization() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let score = VectorSimilarity::Cosine.compare(&a, &b);
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_score_from_raw_matches_compare() {
        let a = vec![0.5, -0.25, 0.125];
        let b = vec![-0.5, 0.75, 0.25];

        let dp = simd::dot_product(&a, &b);
        assert!(
            (VectorSimilarity::DotProduct.score_from_raw(dp)
                - VectorSimilarity::DotProduct.compare(&a, &b))
            .abs()
                < 1e-6
        );

        let d2 = simd::squared_l2(&a, &b);
        assert!(
            (VectorSimilarity::Euclidean.score_from_raw(d2)
                - VectorSimilarity::Euclidean.compare(&a, &b))
            .abs()
                < 1e-6
        );
    }
}
