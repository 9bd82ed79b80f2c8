//! Vamana-style diverse neighbor selection.

use std::sync::Arc;

use crate::graph::node_array::NodeArray;
use crate::graph::score::BuildScoreProvider;

/// Robust-prune diversity with an `alpha` relaxation.
///
/// Candidates are visited in score-descending order; a candidate with score
/// `s` against the source node survives only if no previously-accepted
/// neighbor is more similar to it than `s * alpha`. With `alpha = 1.0` this
/// is the classic heuristic; larger values relax the pruning and keep more
/// edges, which buys recall on large datasets. If the diverse set comes up
/// short of the degree quota, the remaining closest candidates fill it.
pub struct VamanaDiversityProvider {
    provider: Arc<dyn BuildScoreProvider>,
    /// Relaxation factor, `>= 1.0`.
    pub alpha: f32,
}

impl VamanaDiversityProvider {
    /// Creates a diversity provider over the given scoring.
    #[must_use]
    pub fn new(provider: Arc<dyn BuildScoreProvider>, alpha: f32) -> Self {
        Self { provider, alpha }
    }

    /// The scoring this provider prunes with.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn BuildScoreProvider> {
        &self.provider
    }

    /// Prunes `candidates` in place to at most `max_degree` entries.
    ///
    /// The input must be sorted by descending score; the output is sorted
    /// the same way, diverse entries taking priority over quota fills.
    pub fn retain_diverse(&self, candidates: &mut NodeArray, max_degree: usize) {
        if candidates.len() <= max_degree {
            return;
        }
        if max_degree == 0 {
            candidates.clear();
            return;
        }

        let mut kept = NodeArray::new(max_degree);
        for entry in candidates.iter() {
            if kept.len() >= max_degree {
                break;
            }
            if kept.is_empty() {
                kept.push_in_order(entry.node, entry.score);
                continue;
            }

            let similarity_to = self.provider.diversity_function_for(entry.node);
            let diverse = (0..kept.len())
                .all(|j| similarity_to(kept.node(j)) <= entry.score * self.alpha);
            if diverse {
                kept.push_in_order(entry.node, entry.score);
            }
        }

        // under quota: fill with the closest pruned candidates
        if kept.len() < max_degree {
            for entry in candidates.iter() {
                if kept.len() >= max_degree {
                    break;
                }
                if !kept.contains(entry.node) {
                    kept.insert_sorted(entry.node, entry.score);
                }
            }
        }

        *candidates = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::score::RandomAccessScoreProvider;
    use crate::similarity::VectorSimilarity;
    use crate::vectors::DenseVectorSource;

    // source node 0 plus three candidates: node 2 sits between node 1 and
    // the source (closer to node 1 than to the source), node 3 points away
    fn rows() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0],
            vec![0.9, 0.4],
            vec![0.8, 0.6],
            vec![0.5, -0.8],
        ]
    }

    fn provider(rows: &[Vec<f32>], alpha: f32) -> VamanaDiversityProvider {
        let source = Arc::new(DenseVectorSource::from_rows(rows, 2).unwrap());
        let bsp = Arc::new(RandomAccessScoreProvider::new(
            source,
            VectorSimilarity::DotProduct,
        ));
        VamanaDiversityProvider::new(bsp, alpha)
    }

    fn candidates_for_source(rows: &[Vec<f32>]) -> NodeArray {
        let sim = VectorSimilarity::DotProduct;
        let mut candidates = NodeArray::new(3);
        for node in 1..rows.len() as u32 {
            candidates.insert_sorted(node, sim.compare(&rows[0], &rows[node as usize]));
        }
        candidates
    }

    #[test]
    fn test_redundant_neighbor_is_pruned() {
        let rows = rows();
        let diversity = provider(&rows, 1.0);
        let mut candidates = candidates_for_source(&rows);

        diversity.retain_diverse(&mut candidates, 2);

        // node 2 is more similar to node 1 than to the source, so the
        // diverse picks are node 1 and the outlier node 3
        let nodes: Vec<u32> = candidates.iter().map(|e| e.node).collect();
        assert_eq!(nodes, vec![1, 3]);
    }

    #[test]
    fn test_quota_fill_restores_pruned_candidates() {
        let rows = rows();
        let diversity = provider(&rows, 1.0);
        let mut candidates = candidates_for_source(&rows);

        diversity.retain_diverse(&mut candidates, 3);

        // with room for three, the pruned node 2 fills the quota back in
        let nodes: Vec<u32> = candidates.iter().map(|e| e.node).collect();
        assert_eq!(nodes, vec![1, 2, 3]);
    }

    #[test]
    fn test_higher_alpha_relaxes_pruning() {
        let rows = rows();
        let diversity = provider(&rows, 1.2);
        let mut candidates = candidates_for_source(&rows);

        diversity.retain_diverse(&mut candidates, 2);

        // at alpha 1.2 node 2 passes the diversity check and outranks the
        // outlier for the two slots
        let nodes: Vec<u32> = candidates.iter().map(|e| e.node).collect();
        assert_eq!(nodes, vec![1, 2]);
    }
}
