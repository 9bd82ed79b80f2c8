//! Best-first graph search.
//!
//! A search runs in three phases: a greedy descent through the upper layers,
//! a best-first beam over the base layer driven by the approximate score
//! function, and an optional exact rerank of the collected results. The
//! searcher owns its scratch state (visited set, candidate heap, result
//! buffer) and is reusable across searches; it is not thread-safe, one
//! searcher per concurrent search.

use std::collections::BinaryHeap;

use rustc_hash::FxHashSet;

use crate::bits::Bits;
use crate::graph::index::{GraphView, LayeredGraph};
use crate::graph::node_array::{NodeArray, NodeScore};
use crate::graph::ordered_float::OrderedFloat;
use crate::graph::score::SearchScoreProvider;

/// Results of a search with diagnostic counters.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    /// Matches in score-descending order.
    pub node_scores: Vec<NodeScore>,
    /// Nodes whose score was evaluated.
    pub visited: usize,
    /// Nodes whose neighborhood was expanded.
    pub expanded: usize,
    /// Nodes expanded in the base layer.
    pub expanded_base_layer: usize,
    /// Results rescored with the exact function.
    pub reranked: usize,
}

/// Reusable searcher over a [`LayeredGraph`].
pub struct GraphSearcher {
    visited: FxHashSet<u32>,
    candidates: BinaryHeap<(OrderedFloat, u32)>,
    results: NodeArray,
    /// Stop after this many score evaluations, if set.
    pub visited_budget: Option<usize>,
    /// Admit a neighbor into the candidate queue only when its score clears
    /// `k-th result score * factor`, if set. `1.0` reproduces the plain
    /// displacement bound; larger factors prune harder.
    pub prune_factor: Option<f32>,
}

impl Default for GraphSearcher {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphSearcher {
    /// Creates a searcher with empty scratch state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            visited: FxHashSet::default(),
            candidates: BinaryHeap::new(),
            results: NodeArray::new(0),
            visited_budget: None,
            prune_factor: None,
        }
    }

    /// Searches for the `top_k` best nodes for the provider's query.
    ///
    /// `rerank_k >= top_k` bounds the result buffer the beam maintains;
    /// when the provider carries an exact function, those `rerank_k`
    /// results are rescored exactly and truncated to `top_k`. `accept`
    /// gates admission into the results, not traversal. An empty or fully
    /// filtered graph yields an empty result, not an error.
    pub fn search(
        &mut self,
        graph: &LayeredGraph,
        provider: &SearchScoreProvider,
        top_k: usize,
        rerank_k: usize,
        accept: &Bits,
    ) -> SearchResult {
        let view = graph.get_view();
        let mut result = SearchResult::default();
        let Some(entry) = view.entry_node() else {
            return result;
        };
        let rerank_k = rerank_k.max(top_k);

        // descent: greedy single-best walk down to layer 1
        let mut entry_point = entry.node;
        for level in (1..=entry.level).rev() {
            entry_point = self.greedy_descend(&view, provider, level, entry_point, &mut result);
        }

        self.beam_search(&view, provider, 0, &[entry_point], rerank_k, accept, &mut result);

        if let Some(rerank) = provider.rerank() {
            let mut reranked = NodeArray::new(self.results.len());
            for entry in self.results.iter() {
                reranked.insert_sorted(entry.node, rerank(entry.node));
                result.reranked += 1;
            }
            self.results = reranked;
        }

        self.results.truncate(top_k);
        result.node_scores = std::mem::take(&mut self.results).into_vec();
        result
    }

    /// Greedy walk at `level`: follow the best improving neighbor until a
    /// local maximum.
    fn greedy_descend(
        &mut self,
        view: &GraphView<'_>,
        provider: &SearchScoreProvider,
        level: usize,
        entry_point: u32,
        result: &mut SearchResult,
    ) -> u32 {
        let mut best = entry_point;
        let mut best_score = provider.score(best);
        result.visited += 1;

        loop {
            let mut improved = false;
            result.expanded += 1;
            for neighbor in view.neighbors(level, best) {
                let score = provider.score(neighbor);
                result.visited += 1;
                if score > best_score {
                    best = neighbor;
                    best_score = score;
                    improved = true;
                }
            }
            if !improved {
                return best;
            }
        }
    }

    /// Best-first beam over one layer, collecting up to `ef` results.
    #[allow(clippy::too_many_arguments)]
    fn beam_search(
        &mut self,
        view: &GraphView<'_>,
        provider: &SearchScoreProvider,
        level: usize,
        entry_points: &[u32],
        ef: usize,
        accept: &Bits,
        result: &mut SearchResult,
    ) {
        self.visited.clear();
        self.candidates.clear();
        self.results.clear();

        for &entry_point in entry_points {
            if !self.visited.insert(entry_point) {
                continue;
            }
            let score = provider.score(entry_point);
            result.visited += 1;
            self.candidates.push((OrderedFloat(score), entry_point));
            if accept.contains(entry_point) && view.is_live(entry_point) {
                self.results.insert_bounded(entry_point, score, ef);
            }
        }

        while let Some((OrderedFloat(candidate_score), candidate)) = self.candidates.pop() {
            let bound = if self.results.len() >= ef {
                self.results.score(self.results.len() - 1)
            } else {
                f32::MIN
            };
            if self.results.len() >= ef && candidate_score < bound {
                break;
            }

            result.expanded += 1;
            if level == 0 {
                result.expanded_base_layer += 1;
            }

            for neighbor in view.neighbors(level, candidate) {
                if !self.visited.insert(neighbor) {
                    continue;
                }
                let score = provider.score(neighbor);
                result.visited += 1;

                let admit = if self.results.len() >= ef {
                    let threshold = self
                        .prune_factor
                        .map_or(bound, |factor| bound * factor);
                    score > threshold
                } else {
                    true
                };
                if admit {
                    self.candidates.push((OrderedFloat(score), neighbor));
                    if accept.contains(neighbor) && view.is_live(neighbor) {
                        self.results.insert_bounded(neighbor, score, ef);
                    }
                }
            }

            if let Some(budget) = self.visited_budget {
                if result.visited >= budget {
                    break;
                }
            }
        }
    }

    /// Runs a beam search at an arbitrary level, returning up to `ef`
    /// scored candidates. Used by the builder to collect insertion
    /// candidates layer by layer.
    pub(crate) fn search_layer(
        &mut self,
        view: &GraphView<'_>,
        provider: &SearchScoreProvider,
        level: usize,
        entry_points: &[u32],
        ef: usize,
        result: &mut SearchResult,
    ) -> NodeArray {
        self.beam_search(view, provider, level, entry_points, ef, &Bits::All, result);
        std::mem::take(&mut self.results)
    }

    /// Greedy descent from the entry node down to `target_level + 1`,
    /// returning the entry point for `target_level`.
    pub(crate) fn descend_to(
        &mut self,
        view: &GraphView<'_>,
        provider: &SearchScoreProvider,
        target_level: usize,
        result: &mut SearchResult,
    ) -> Option<u32> {
        let entry = view.entry_node()?;
        let mut entry_point = entry.node;
        for level in (target_level + 1..=entry.level).rev() {
            entry_point = self.greedy_descend(view, provider, level, entry_point, result);
        }
        Some(entry_point)
    }
}
