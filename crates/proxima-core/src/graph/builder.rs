//! Concurrent graph construction.
//!
//! Insertions are safe to run from many threads at once: empty-slot adds
//! are atomic, neighbor edits go through the per-node locks, the entry node
//! advances by a monotonic compare-and-swap, and concurrent searches only
//! observe snapshot-isolated completed nodes.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::graph::diversity::VamanaDiversityProvider;
use crate::graph::index::{LayeredGraph, NodeAtLevel};
use crate::graph::persistence;
use crate::graph::score::BuildScoreProvider;
use crate::graph::searcher::{GraphSearcher, SearchResult};
use crate::vectors::VectorSource;

/// Cap on the sampled insertion level.
const MAX_LEVEL: usize = 8;

/// Builds a [`LayeredGraph`] by concurrent insertion.
pub struct GraphBuilder {
    graph: Arc<LayeredGraph>,
    provider: Arc<dyn BuildScoreProvider>,
    beam_width: usize,
    add_hierarchy: bool,
    /// Level multiplier `1 / ln(M)` for the geometric level distribution.
    level_multiplier: f64,
    rng_state: AtomicU64,
}

impl GraphBuilder {
    /// Creates a builder over an empty graph.
    ///
    /// `max_degree` bounds every layer's degree, `beam_width` is the
    /// construction-time search depth, `neighbor_overflow >= 1.0` the
    /// temporary degree headroom, and `alpha >= 1.0` the diversity
    /// relaxation. With `add_hierarchy` disabled every node lands at
    /// level 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for out-of-range parameters.
    pub fn new(
        provider: Arc<dyn BuildScoreProvider>,
        max_degree: usize,
        beam_width: usize,
        neighbor_overflow: f32,
        alpha: f32,
        add_hierarchy: bool,
    ) -> Result<Self> {
        if beam_width == 0 {
            return Err(Error::InvalidArgument("beam width must be positive".into()));
        }
        if alpha < 1.0 {
            return Err(Error::InvalidArgument(format!(
                "alpha {alpha} must be >= 1.0"
            )));
        }

        let diversity = VamanaDiversityProvider::new(Arc::clone(&provider), alpha);
        let graph = Arc::new(LayeredGraph::new(
            vec![max_degree],
            neighbor_overflow,
            diversity,
        )?);
        Ok(Self::from_graph(graph, provider, beam_width, add_hierarchy))
    }

    /// Creates a builder that continues inserting into an existing graph.
    #[must_use]
    pub fn from_graph(
        graph: Arc<LayeredGraph>,
        provider: Arc<dyn BuildScoreProvider>,
        beam_width: usize,
        add_hierarchy: bool,
    ) -> Self {
        let max_degree = graph.max_degree();
        let level_multiplier = if max_degree > 1 {
            1.0 / (max_degree as f64).ln()
        } else {
            0.0
        };
        Self {
            graph,
            provider,
            beam_width,
            add_hierarchy,
            level_multiplier,
            rng_state: AtomicU64::new(0x5DEE_CE66_D1A4_B5B5),
        }
    }

    /// The graph under construction.
    #[must_use]
    pub fn graph(&self) -> &Arc<LayeredGraph> {
        &self.graph
    }

    /// Samples an insertion level from the geometric distribution
    /// `floor(-ln(U) / ln(M))`, capped at [`MAX_LEVEL`].
    fn random_level(&self) -> usize {
        if !self.add_hierarchy {
            return 0;
        }
        // racy xorshift update is fine, this only needs to be well spread
        let mut state = self.rng_state.load(Ordering::Relaxed);
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state.store(state, Ordering::Relaxed);

        let uniform = (state >> 11) as f64 / (1u64 << 53) as f64;
        let uniform = uniform.max(f64::MIN_POSITIVE); // U in (0, 1]
        ((-uniform.ln() * self.level_multiplier) as usize).min(MAX_LEVEL)
    }

    /// Inserts one node into the graph.
    ///
    /// Searches the current graph for candidates level by level, installs a
    /// diversified neighbor list, backlinks, and publishes completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrdinalOutOfBounds`] if the provider has no vector
    /// for `node`.
    pub fn add_graph_node(&self, node: u32) -> Result<()> {
        let ssp = self.provider.search_provider_for_node(node)?;
        let level = self.random_level();

        self.graph.add_node(level, node);

        if let Some(entry) = self.graph.entry_node() {
            let view = self.graph.get_view();
            let mut searcher = GraphSearcher::new();
            let mut diagnostics = SearchResult::default();

            let top_level = level.min(entry.level);
            let mut entry_point = searcher
                .descend_to(&view, &ssp, top_level, &mut diagnostics)
                .unwrap_or(entry.node);

            for current_level in (0..=top_level).rev() {
                let mut candidates = searcher.search_layer(
                    &view,
                    &ssp,
                    current_level,
                    &[entry_point],
                    self.beam_width,
                    &mut diagnostics,
                );
                candidates.remove(node);
                if !candidates.is_empty() {
                    entry_point = candidates.node(0);
                }
                self.graph.add_edges(current_level, node, &candidates);
            }
        }

        self.graph.mark_complete(NodeAtLevel { level, node });
        Ok(())
    }

    /// Inserts every present ordinal of `source` in parallel, then runs
    /// [`Self::cleanup`].
    ///
    /// # Errors
    ///
    /// Propagates the first insertion failure; absent ordinals are skipped.
    pub fn build(&self, source: &dyn VectorSource) -> Result<()> {
        let size = source.size() as u32;

        // seed the first present ordinal synchronously so every concurrent
        // insertion finds an entry node to wire against
        let mut first_inserted = None;
        if self.graph.entry_node().is_none() {
            for node in 0..size {
                match self.add_graph_node(node) {
                    Ok(()) => {
                        first_inserted = Some(node);
                        break;
                    }
                    Err(Error::OrdinalOutOfBounds { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
        }

        (0..size)
            .into_par_iter()
            .filter(|&node| Some(node) != first_inserted)
            .try_for_each(|node| match self.add_graph_node(node) {
                // holes in the source are not an error
                Err(Error::OrdinalOutOfBounds { .. }) => Ok(()),
                other => other,
            })?;
        self.cleanup();
        Ok(())
    }

    /// Enforces the degree bound on every node in every layer and freezes
    /// the graph.
    pub fn cleanup(&self) {
        let bound = self.graph.id_upper_bound();
        (0..bound).into_par_iter().for_each(|node| {
            if self.graph.contains(0, node) {
                self.graph.enforce_degree(node);
            }
        });
        self.graph.set_all_mutations_completed();
        tracing::debug!(size = self.graph.size(0), "graph construction cleaned up");
    }

    /// Marks `node` soft-deleted; edges to it remain until
    /// [`Self::remove_deleted_nodes`] runs.
    pub fn mark_deleted(&self, node: u32) {
        self.graph.mark_deleted(node);
    }

    /// Rewires every node whose neighborhood touches the delete set, then
    /// physically removes the deleted nodes.
    ///
    /// Replacement candidates come from a fresh beam search around each
    /// affected node. Returns the number of nodes removed.
    ///
    /// # Errors
    ///
    /// Propagates scoring failures from the rewiring searches.
    pub fn remove_deleted_nodes(&self) -> Result<usize> {
        let deleted = self.graph.deleted_nodes().to_bitmap();
        if deleted.is_empty() {
            return Ok(0);
        }

        let max_level = self.graph.get_max_level().unwrap_or(0);
        for node in 0..self.graph.id_upper_bound() {
            if deleted.contains(node) || !self.graph.contains(0, node) {
                continue;
            }
            for level in 0..=max_level {
                let Some(neighbors) = self.graph.neighbors_snapshot(level, node) else {
                    continue;
                };
                if !neighbors.iter().any(|entry| deleted.contains(entry.node)) {
                    continue;
                }

                let ssp = self.provider.search_provider_for_node(node)?;
                let view = self.graph.get_view();
                let mut searcher = GraphSearcher::new();
                let mut diagnostics = SearchResult::default();
                let entry_point = searcher
                    .descend_to(&view, &ssp, level, &mut diagnostics)
                    .unwrap_or(node);
                let mut candidates = searcher.search_layer(
                    &view,
                    &ssp,
                    level,
                    &[entry_point],
                    self.beam_width,
                    &mut diagnostics,
                );
                candidates.remove(node);
                self.graph.replace_deleted_neighbors(level, node, &candidates);
            }
        }

        let mut removed = 0;
        for node in &deleted {
            removed += usize::from(self.graph.remove_node(node) > 0);
        }
        self.repair_entry_node(&deleted);

        tracing::debug!(removed, "deleted nodes purged");
        Ok(removed)
    }

    /// Moves the entry node onto a live node if the current one was purged.
    fn repair_entry_node(&self, deleted: &roaring::RoaringBitmap) {
        let Some(entry) = self.graph.entry_node() else {
            return;
        };
        if !deleted.contains(entry.node) {
            return;
        }
        let mut level = self.graph.get_max_level();
        while let Some(current) = level {
            if let Some(&node) = self.graph.node_ids(current).first() {
                self.graph.update_entry_node(NodeAtLevel {
                    level: current,
                    node,
                });
                return;
            }
            level = current.checked_sub(1);
        }
    }
}

/// Loads a saved base graph and inserts the ordinals
/// `num_base_vectors..source.size()` with the standard insertion protocol.
///
/// The merged graph's recall on the union dataset tracks a from-scratch
/// build of the same parameters.
///
/// # Errors
///
/// Propagates load failures and insertion failures.
#[allow(clippy::too_many_arguments)]
pub fn build_and_merge_new_nodes<R: Read>(
    input: &mut R,
    source: &dyn VectorSource,
    provider: Arc<dyn BuildScoreProvider>,
    num_base_vectors: usize,
    beam_width: usize,
    neighbor_overflow: f32,
    alpha: f32,
    add_hierarchy: bool,
) -> Result<Arc<LayeredGraph>> {
    let diversity = VamanaDiversityProvider::new(Arc::clone(&provider), alpha);
    let graph = Arc::new(persistence::load(input, neighbor_overflow, diversity)?);

    let builder = GraphBuilder::from_graph(Arc::clone(&graph), provider, beam_width, add_hierarchy);
    (num_base_vectors as u32..source.size() as u32)
        .into_par_iter()
        .try_for_each(|node| match builder.add_graph_node(node) {
            Err(Error::OrdinalOutOfBounds { .. }) => Ok(()),
            other => other,
        })?;
    builder.cleanup();

    Ok(graph)
}
