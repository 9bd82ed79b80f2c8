//! Score providers: strategy objects binding a query to score functions.
//!
//! A [`SearchScoreProvider`] pairs the approximate function driving the beam
//! with an optional exact function for reranking. A [`BuildScoreProvider`]
//! manufactures those per insertion candidate during construction, plus the
//! pairwise functions the diversity predicate needs.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::quantization::pq_vectors::PqVectors;
use crate::similarity::VectorSimilarity;
use crate::vectors::VectorSource;

/// A score function over graph ordinals, higher is better.
pub type ScoreFn = Box<dyn Fn(u32) -> f32 + Send + Sync>;

/// Scoring for a single search: an approximate function and an optional
/// exact rerank function.
pub struct SearchScoreProvider {
    approx: ScoreFn,
    rerank: Option<ScoreFn>,
}

impl std::fmt::Debug for SearchScoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchScoreProvider")
            .field("rerank", &self.rerank.is_some())
            .finish()
    }
}

impl SearchScoreProvider {
    /// Creates a provider from an approximate and an optional exact function.
    #[must_use]
    pub fn new(approx: ScoreFn, rerank: Option<ScoreFn>) -> Self {
        Self { approx, rerank }
    }

    /// Creates a provider whose approximate function is already exact.
    #[must_use]
    pub fn exact(approx: ScoreFn) -> Self {
        Self {
            approx,
            rerank: None,
        }
    }

    /// Scores a node with the approximate function.
    #[inline]
    #[must_use]
    pub fn score(&self, node: u32) -> f32 {
        (self.approx)(node)
    }

    /// The exact rerank function, if reranking applies.
    #[must_use]
    pub fn rerank(&self) -> Option<&ScoreFn> {
        self.rerank.as_ref()
    }
}

/// Supplies scoring for graph construction.
pub trait BuildScoreProvider: Send + Sync {
    /// Scoring for a search with an external query vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] on wrong query length.
    fn search_provider_for(&self, query: &[f32]) -> Result<SearchScoreProvider>;

    /// Scoring for the insertion of an existing graph node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrdinalOutOfBounds`] if the node has no vector.
    fn search_provider_for_node(&self, node: u32) -> Result<SearchScoreProvider>;

    /// Pairwise score function anchored at `node`, for diversity checks.
    fn diversity_function_for(&self, node: u32) -> ScoreFn;
}

/// Fetches a vector that must exist.
///
/// # Panics
///
/// Panics when the ordinal has no vector; score functions only ever see
/// ordinals the graph handed out, so a miss is a wiring bug.
fn must_vector(source: &dyn VectorSource, ordinal: usize) -> &[f32] {
    match source.vector(ordinal) {
        Some(vector) => vector,
        None => panic!("no vector for ordinal {ordinal}"),
    }
}

fn exact_score_fn(
    source: Arc<dyn VectorSource>,
    ordinal_map: Option<Arc<Vec<u32>>>,
    query: Vec<f32>,
    similarity: VectorSimilarity,
) -> ScoreFn {
    Box::new(move |node| {
        let ordinal = match &ordinal_map {
            Some(map) => map[node as usize] as usize,
            None => node as usize,
        };
        similarity.compare(&query, must_vector(source.as_ref(), ordinal))
    })
}

/// Exact scoring straight from a [`VectorSource`].
///
/// With an ordinal map, graph ordinals are translated before the vector
/// fetch, so the graph's ordinal space may differ from the storage's.
pub struct RandomAccessScoreProvider {
    source: Arc<dyn VectorSource>,
    ordinal_map: Option<Arc<Vec<u32>>>,
    similarity: VectorSimilarity,
}

impl RandomAccessScoreProvider {
    /// Creates a provider with the identity ordinal mapping.
    #[must_use]
    pub fn new(source: Arc<dyn VectorSource>, similarity: VectorSimilarity) -> Self {
        Self {
            source,
            ordinal_map: None,
            similarity,
        }
    }

    /// Creates a provider translating graph ordinals through `ordinal_map`.
    #[must_use]
    pub fn with_ordinal_map(
        source: Arc<dyn VectorSource>,
        ordinal_map: Arc<Vec<u32>>,
        similarity: VectorSimilarity,
    ) -> Self {
        Self {
            source,
            ordinal_map: Some(ordinal_map),
            similarity,
        }
    }

    fn resolve(&self, node: u32) -> usize {
        match &self.ordinal_map {
            Some(map) => map[node as usize] as usize,
            None => node as usize,
        }
    }

    fn node_query(&self, node: u32) -> Result<Vec<f32>> {
        let ordinal = self.resolve(node);
        self.source
            .vector(ordinal)
            .map(<[f32]>::to_vec)
            .ok_or(Error::OrdinalOutOfBounds {
                ordinal,
                bound: self.source.size(),
            })
    }
}

impl BuildScoreProvider for RandomAccessScoreProvider {
    fn search_provider_for(&self, query: &[f32]) -> Result<SearchScoreProvider> {
        if query.len() != self.source.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.source.dimension(),
                actual: query.len(),
            });
        }
        Ok(SearchScoreProvider::exact(exact_score_fn(
            Arc::clone(&self.source),
            self.ordinal_map.clone(),
            query.to_vec(),
            self.similarity,
        )))
    }

    fn search_provider_for_node(&self, node: u32) -> Result<SearchScoreProvider> {
        let query = self.node_query(node)?;
        Ok(SearchScoreProvider::exact(exact_score_fn(
            Arc::clone(&self.source),
            self.ordinal_map.clone(),
            query,
            self.similarity,
        )))
    }

    fn diversity_function_for(&self, node: u32) -> ScoreFn {
        let query = self
            .node_query(node)
            .unwrap_or_else(|_| panic!("no vector for graph node {node}"));
        exact_score_fn(
            Arc::clone(&self.source),
            self.ordinal_map.clone(),
            query,
            self.similarity,
        )
    }
}

/// PQ-backed scoring: approximate functions from encoded codes, exact
/// reranking when a raw vector source is bound.
pub struct PqBuildScoreProvider {
    pq_vectors: Arc<PqVectors>,
    rerank_source: Option<Arc<dyn VectorSource>>,
    similarity: VectorSimilarity,
}

impl PqBuildScoreProvider {
    /// Creates a provider scoring purely from the encoded vectors.
    #[must_use]
    pub fn new(pq_vectors: Arc<PqVectors>, similarity: VectorSimilarity) -> Self {
        Self {
            pq_vectors,
            rerank_source: None,
            similarity,
        }
    }

    /// Binds a raw vector source for exact reranking.
    #[must_use]
    pub fn with_rerank(
        pq_vectors: Arc<PqVectors>,
        rerank_source: Arc<dyn VectorSource>,
        similarity: VectorSimilarity,
    ) -> Self {
        Self {
            pq_vectors,
            rerank_source: Some(rerank_source),
            similarity,
        }
    }

    fn node_query(&self, node: u32) -> Result<Vec<f32>> {
        if let Some(source) = &self.rerank_source {
            if let Some(vector) = source.vector(node as usize) {
                return Ok(vector.to_vec());
            }
        }
        // no raw vectors bound: reconstruct the query from the node's code
        let pq = self.pq_vectors.quantizer();
        let mut decoded = vec![0.0f32; pq.original_dimension()];
        pq.decode(self.pq_vectors.get(node as usize)?, &mut decoded)?;
        Ok(decoded)
    }
}

impl BuildScoreProvider for PqBuildScoreProvider {
    fn search_provider_for(&self, query: &[f32]) -> Result<SearchScoreProvider> {
        let approx = self.pq_vectors.score_function_for(query, self.similarity)?;
        let rerank = self.rerank_source.as_ref().map(|source| {
            exact_score_fn(Arc::clone(source), None, query.to_vec(), self.similarity)
        });
        Ok(SearchScoreProvider::new(approx, rerank))
    }

    fn search_provider_for_node(&self, node: u32) -> Result<SearchScoreProvider> {
        let query = self.node_query(node)?;
        let approx = self.pq_vectors.score_function_for(&query, self.similarity)?;
        let rerank = self.rerank_source.as_ref().map(|source| {
            exact_score_fn(Arc::clone(source), None, query.clone(), self.similarity)
        });
        Ok(SearchScoreProvider::new(approx, rerank))
    }

    fn diversity_function_for(&self, node: u32) -> ScoreFn {
        self.pq_vectors.diversity_function_for(node, self.similarity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::DenseVectorSource;

    #[test]
    fn test_ordinal_mapping() {
        let similarity = VectorSimilarity::DotProduct;
        let rows = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]];
        let source = Arc::new(DenseVectorSource::from_rows(&rows, 2).unwrap());

        // graph node 0 -> vector 2, node 1 -> vector 0, node 2 -> vector 1
        let map = Arc::new(vec![2u32, 0, 1]);
        let bsp = RandomAccessScoreProvider::with_ordinal_map(
            source.clone(),
            map,
            similarity,
        );

        let ssp0 = bsp.search_provider_for_node(0).unwrap();
        let ssp1 = bsp.search_provider_for_node(1).unwrap();
        let ssp2 = bsp.search_provider_for_node(2).unwrap();

        // graph node 0 (vector [-1, 0]) vs graph node 1 (vector [1, 0])
        assert!((ssp0.score(1) - similarity.compare(&rows[2], &rows[0])).abs() < 1e-6);
        assert!((ssp1.score(0) - similarity.compare(&rows[0], &rows[2])).abs() < 1e-6);
        assert!((ssp2.score(1) - similarity.compare(&rows[1], &rows[0])).abs() < 1e-6);

        // the diversity function uses the same mapping
        let dsp0 = bsp.diversity_function_for(0);
        assert!((dsp0(1) - similarity.compare(&rows[2], &rows[0])).abs() < 1e-6);
    }

    #[test]
    fn test_exact_provider_has_no_rerank() {
        let rows = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let source = Arc::new(DenseVectorSource::from_rows(&rows, 2).unwrap());
        let bsp = RandomAccessScoreProvider::new(source, VectorSimilarity::Euclidean);

        let ssp = bsp.search_provider_for(&[1.0, 0.0]).unwrap();
        assert!(ssp.rerank().is_none());
        assert!((ssp.score(0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_wrong_query_dimension_is_rejected() {
        let rows = vec![vec![1.0, 0.0]];
        let source = Arc::new(DenseVectorSource::from_rows(&rows, 2).unwrap());
        let bsp = RandomAccessScoreProvider::new(source, VectorSimilarity::Euclidean);

        let err = bsp.search_provider_for(&[1.0]).unwrap_err();
        assert_eq!(err.code(), "PROX-002");
    }
}
