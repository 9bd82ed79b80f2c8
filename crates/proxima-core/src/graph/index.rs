//! The layered graph index.
//!
//! Layer 0 is dense and holds every live node; higher layers are sparse and
//! geometrically smaller. The entry node lives at the highest non-empty
//! level and advances through a monotonic compare-and-swap, so concurrent
//! inserts can race on it safely. Concurrent searches read through views
//! with snapshot isolation driven by the completion tracker.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bits::{AtomicBitSet, Bits};
use crate::error::{Error, Result};
use crate::graph::completion::CompletionTracker;
use crate::graph::diversity::VamanaDiversityProvider;
use crate::graph::neighbors::ConcurrentNeighborMap;
use crate::graph::node_array::NodeArray;

/// A node together with the highest level it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAtLevel {
    /// Highest layer the node is present in.
    pub level: usize,
    /// Graph ordinal.
    pub node: u32,
}

const ENTRY_EMPTY: u64 = u64::MAX;

fn pack_entry(entry: NodeAtLevel) -> u64 {
    ((entry.level as u64) << 32) | u64::from(entry.node)
}

fn unpack_entry(packed: u64) -> Option<NodeAtLevel> {
    if packed == ENTRY_EMPTY {
        return None;
    }
    Some(NodeAtLevel {
        level: (packed >> 32) as usize,
        node: packed as u32,
    })
}

/// A concurrently mutable, hierarchically layered proximity graph.
pub struct LayeredGraph {
    layers: RwLock<Vec<ConcurrentNeighborMap>>,
    max_degrees: RwLock<Vec<usize>>,
    overflow_ratio: f32,
    entry_point: AtomicU64,
    completions: CompletionTracker,
    deleted: AtomicBitSet,
    max_node_id: AtomicI64,
    all_mutations_completed: AtomicBool,
    diversity: VamanaDiversityProvider,
}

impl LayeredGraph {
    /// Creates an empty graph.
    ///
    /// `max_degrees[level]` bounds the degree per layer, the last entry
    /// covering all higher layers. `overflow_ratio >= 1.0` is the factor by
    /// which a neighborhood may temporarily exceed its bound during
    /// construction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty or zero degree list
    /// or an overflow ratio below 1.0.
    pub fn new(
        max_degrees: Vec<usize>,
        overflow_ratio: f32,
        diversity: VamanaDiversityProvider,
    ) -> Result<Self> {
        if max_degrees.is_empty() || max_degrees.iter().any(|&d| d == 0) {
            return Err(Error::InvalidArgument(
                "max degrees must be non-empty and positive".into(),
            ));
        }
        if overflow_ratio < 1.0 {
            return Err(Error::InvalidArgument(format!(
                "overflow ratio {overflow_ratio} must be >= 1.0"
            )));
        }

        let base_degree = max_degrees[0];
        let base_overflow = (base_degree as f32 * overflow_ratio) as usize;
        let graph = Self {
            layers: RwLock::new(vec![ConcurrentNeighborMap::dense(
                base_degree,
                base_overflow,
                1024,
            )]),
            max_degrees: RwLock::new(max_degrees),
            overflow_ratio,
            entry_point: AtomicU64::new(ENTRY_EMPTY),
            completions: CompletionTracker::new(1024),
            deleted: AtomicBitSet::new(0),
            max_node_id: AtomicI64::new(-1),
            all_mutations_completed: AtomicBool::new(false),
            diversity,
        };
        Ok(graph)
    }

    /// The diversity provider edges are pruned with.
    #[must_use]
    pub fn diversity(&self) -> &VamanaDiversityProvider {
        &self.diversity
    }

    pub(crate) fn completions(&self) -> &CompletionTracker {
        &self.completions
    }

    /// Maximum degree for `level`; levels past the configured list reuse
    /// the last entry.
    #[must_use]
    pub fn degree(&self, level: usize) -> usize {
        let degrees = self.max_degrees.read();
        degrees.get(level).copied().unwrap_or(*degrees.last().expect("non-empty"))
    }

    /// The largest configured per-layer degree.
    #[must_use]
    pub fn max_degree(&self) -> usize {
        *self.max_degrees.read().iter().max().expect("non-empty")
    }

    /// The configured per-layer degrees.
    #[must_use]
    pub fn max_degrees(&self) -> Vec<usize> {
        self.max_degrees.read().clone()
    }

    /// Replaces the per-layer degree configuration.
    pub fn set_degrees(&self, degrees: Vec<usize>) {
        *self.max_degrees.write() = degrees;
    }

    /// The construction-time overflow ratio.
    #[must_use]
    pub fn overflow_ratio(&self) -> f32 {
        self.overflow_ratio
    }

    fn ensure_layers_exist(&self, level: usize) {
        {
            let layers = self.layers.read();
            if level < layers.len() {
                return;
            }
        }
        let mut layers = self.layers.write();
        while layers.len() <= level {
            let degree = self.degree(layers.len());
            let overflow = (degree as f32 * self.overflow_ratio) as usize;
            layers.push(ConcurrentNeighborMap::sparse(degree, overflow));
        }
    }

    /// Inserts `node` with empty neighbor lists into layers `0..=level`.
    ///
    /// Populating the neighbors and establishing backlinks is the caller's
    /// responsibility, as is calling [`Self::mark_complete`] afterwards.
    pub fn add_node(&self, level: usize, node: u32) {
        self.ensure_layers_exist(level);
        let layers = self.layers.read();
        for layer in layers.iter().take(level + 1) {
            layer.add_node(node);
        }
        self.max_node_id.fetch_max(i64::from(node), Ordering::AcqRel);
    }

    /// Replaces layer `level`'s neighbor list for `node`.
    pub fn connect_node(&self, level: usize, node: u32, nodes: NodeArray) {
        self.ensure_layers_exist(level);
        self.layers.read()[level].connect(node, nodes);
        self.max_node_id.fetch_max(i64::from(node), Ordering::AcqRel);
    }

    /// Merges `candidates` into `node`'s neighbors at `level` under the
    /// diversity predicate, then backlinks `node` from each resulting
    /// neighbor (best effort, bounded by the overflow window).
    pub fn add_edges(&self, level: usize, node: u32, candidates: &NodeArray) {
        let layers = self.layers.read();
        let layer = &layers[level];
        let new_neighbors = layer.insert_diverse(node, candidates, &self.diversity);
        layer.backlink(&new_neighbors, node);
    }

    /// Re-applies diversity and truncates `node` to the max degree in every
    /// layer that contains it.
    pub fn enforce_degree(&self, node: u32) {
        let layers = self.layers.read();
        for layer in layers.iter() {
            layer.enforce_degree(node, &self.diversity);
        }
    }

    /// Replaces `node`'s deleted neighbors at `level` with diversified
    /// candidates.
    pub fn replace_deleted_neighbors(&self, level: usize, node: u32, candidates: &NodeArray) {
        let layers = self.layers.read();
        layers[level].replace_deleted_neighbors(node, &self.deleted, candidates, &self.diversity);
    }

    /// Marks `node` soft-deleted. Does not remove it from the graph.
    pub fn mark_deleted(&self, node: u32) {
        self.deleted.set(node as usize);
    }

    /// The soft-delete bitset.
    #[must_use]
    pub fn deleted_nodes(&self) -> &AtomicBitSet {
        &self.deleted
    }

    /// Records that `entry.node` finished wiring at `entry.level` and
    /// advances the entry point if this node sits at a strictly higher
    /// level.
    pub fn mark_complete(&self, entry: NodeAtLevel) {
        let packed = pack_entry(entry);
        let mut current = self.entry_point.load(Ordering::Acquire);
        loop {
            let advance = match unpack_entry(current) {
                None => true,
                Some(existing) => entry.level > existing.level,
            };
            if !advance {
                break;
            }
            match self.entry_point.compare_exchange_weak(
                current,
                packed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.completions.mark_complete(entry.node);
    }

    /// Overrides the entry node; used by the loader.
    pub fn update_entry_node(&self, entry: NodeAtLevel) {
        self.entry_point.store(pack_entry(entry), Ordering::Release);
    }

    /// The node searches start from, if any.
    #[must_use]
    pub fn entry_node(&self) -> Option<NodeAtLevel> {
        unpack_entry(self.entry_point.load(Ordering::Acquire))
    }

    /// Number of nodes in `level`.
    #[must_use]
    pub fn size(&self, level: usize) -> usize {
        let layers = self.layers.read();
        layers.get(level).map_or(0, ConcurrentNeighborMap::size)
    }

    /// The highest level with any node, or `None` for an empty graph.
    #[must_use]
    pub fn get_max_level(&self) -> Option<usize> {
        let layers = self.layers.read();
        let mut max_level = None;
        for (level, layer) in layers.iter().enumerate() {
            if layer.size() == 0 {
                break;
            }
            max_level = Some(level);
        }
        max_level
    }

    /// Whether `node` is present in `level`.
    #[must_use]
    pub fn contains(&self, level: usize, node: u32) -> bool {
        let layers = self.layers.read();
        layers.get(level).is_some_and(|layer| layer.contains(node))
    }

    /// Node ids present in `level`, ascending.
    #[must_use]
    pub fn node_ids(&self, level: usize) -> Vec<u32> {
        let layers = self.layers.read();
        layers.get(level).map_or_else(Vec::new, ConcurrentNeighborMap::node_ids)
    }

    /// One past the largest node id ever added.
    #[must_use]
    pub fn id_upper_bound(&self) -> u32 {
        (self.max_node_id.load(Ordering::Acquire) + 1) as u32
    }

    /// Mean degree over the nodes of `level`; NaN when the level is empty.
    #[must_use]
    pub fn average_degree(&self, level: usize) -> f64 {
        let layers = self.layers.read();
        let Some(layer) = layers.get(level) else {
            return f64::NAN;
        };
        let ids = layer.node_ids();
        if ids.is_empty() {
            return f64::NAN;
        }
        let total: usize = ids
            .iter()
            .filter_map(|&node| layer.get(node))
            .map(|neighbors| neighbors.len())
            .sum();
        total as f64 / ids.len() as f64
    }

    /// The neighbor list of `node` at `level`, with scores.
    #[must_use]
    pub fn neighbors_snapshot(&self, level: usize, node: u32) -> Option<NodeArray> {
        let layers = self.layers.read();
        layers
            .get(level)?
            .get(node)
            .map(|neighbors| neighbors.snapshot())
    }

    /// Removes `node` from every layer and clears its deleted bit.
    ///
    /// Returns the number of layers it was removed from.
    pub fn remove_node(&self, node: u32) -> usize {
        let layers = self.layers.read();
        let mut found = 0;
        for layer in layers.iter() {
            if layer.remove(node).is_some() {
                found += 1;
            }
        }
        drop(layers);
        self.deleted.clear(node as usize);
        found
    }

    /// Signals that the graph will not be mutated any further; subsequent
    /// views skip snapshot filtering.
    pub fn set_all_mutations_completed(&self) {
        self.all_mutations_completed.store(true, Ordering::Release);
    }

    /// Whether [`Self::set_all_mutations_completed`] has been called.
    #[must_use]
    pub fn all_mutations_completed(&self) -> bool {
        self.all_mutations_completed.load(Ordering::Acquire)
    }

    /// Returns a view for searching.
    ///
    /// Before the graph is frozen the view is snapshot-isolated: only nodes
    /// whose wiring completed before the view was created are reachable
    /// through neighbor iteration. Keeping incomplete nodes out of the
    /// search path entirely (rather than just out of the result set) is the
    /// only approach that cannot observe half-wired neighborhoods.
    #[must_use]
    pub fn get_view(&self) -> GraphView<'_> {
        let snapshot_clock = if self.all_mutations_completed() {
            None
        } else {
            Some(self.completions.clock())
        };
        GraphView {
            graph: self,
            snapshot_clock,
        }
    }
}

impl std::fmt::Debug for LayeredGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredGraph")
            .field("size", &self.size(0))
            .field("entry", &self.entry_node())
            .finish_non_exhaustive()
    }
}

/// A read view over a [`LayeredGraph`].
pub struct GraphView<'a> {
    graph: &'a LayeredGraph,
    /// `None` once all mutations completed (frozen view).
    snapshot_clock: Option<u32>,
}

impl GraphView<'_> {
    /// The entry node, if the graph is non-empty.
    #[must_use]
    pub fn entry_node(&self) -> Option<NodeAtLevel> {
        self.graph.entry_node()
    }

    /// Number of nodes in the base layer.
    #[must_use]
    pub fn size(&self) -> usize {
        self.graph.size(0)
    }

    /// One past the largest node id.
    #[must_use]
    pub fn id_upper_bound(&self) -> u32 {
        self.graph.id_upper_bound()
    }

    /// Whether `node` is present in `level`.
    #[must_use]
    pub fn contains(&self, level: usize, node: u32) -> bool {
        self.graph.contains(level, node)
    }

    /// The neighbors of `node` at `level` visible to this view.
    ///
    /// Under snapshot isolation, neighbors whose completion time is at or
    /// after the view's clock are hidden.
    #[must_use]
    pub fn neighbors(&self, level: usize, node: u32) -> Vec<u32> {
        let Some(snapshot) = self.graph.neighbors_snapshot(level, node) else {
            return Vec::new();
        };
        match self.snapshot_clock {
            None => snapshot.iter().map(|entry| entry.node).collect(),
            Some(clock) => snapshot
                .iter()
                .map(|entry| entry.node)
                .filter(|&n| self.graph.completions.completed_at(n) < clock)
                .collect(),
        }
    }

    /// Whether `node` is live (not soft-deleted).
    #[must_use]
    pub fn is_live(&self, node: u32) -> bool {
        !self.graph.deleted.get(node as usize)
    }

    /// Live-node filter: everything when no deletions exist, otherwise the
    /// complement of the soft-delete set.
    ///
    /// Soft-deleted ordinals remain edge endpoints until a rewiring pass
    /// moves them out, so traversal may still pass through them.
    #[must_use]
    pub fn live_nodes(&self) -> Bits {
        if self.graph.deleted.is_empty() {
            Bits::All
        } else {
            Bits::Excluding(Arc::new(self.graph.deleted.to_bitmap()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::score::RandomAccessScoreProvider;
    use crate::similarity::VectorSimilarity;
    use crate::vectors::DenseVectorSource;

    fn test_graph(n: usize) -> LayeredGraph {
        let rows: Vec<Vec<f32>> = (0..n)
            .map(|i| {
                let angle = i as f32 * 0.7;
                vec![angle.cos(), angle.sin()]
            })
            .collect();
        let source = Arc::new(DenseVectorSource::from_rows(&rows, 2).unwrap());
        let bsp = Arc::new(RandomAccessScoreProvider::new(
            source,
            VectorSimilarity::DotProduct,
        ));
        let diversity = VamanaDiversityProvider::new(bsp, 1.0);
        LayeredGraph::new(vec![4], 1.5, diversity).unwrap()
    }

    #[test]
    fn test_new_validates_arguments() {
        let graph = test_graph(4);
        drop(graph);

        let rows = vec![vec![0.0, 0.0]];
        let source = Arc::new(DenseVectorSource::from_rows(&rows, 2).unwrap());
        let bsp = Arc::new(RandomAccessScoreProvider::new(
            source,
            VectorSimilarity::DotProduct,
        ));
        assert!(LayeredGraph::new(
            vec![],
            1.0,
            VamanaDiversityProvider::new(bsp.clone(), 1.0)
        )
        .is_err());
        assert!(LayeredGraph::new(
            vec![4],
            0.5,
            VamanaDiversityProvider::new(bsp, 1.0)
        )
        .is_err());
    }

    #[test]
    fn test_add_node_populates_all_lower_layers() {
        let graph = test_graph(4);
        graph.add_node(2, 0);

        assert!(graph.contains(0, 0));
        assert!(graph.contains(1, 0));
        assert!(graph.contains(2, 0));
        assert_eq!(graph.get_max_level(), Some(2));
        assert_eq!(graph.id_upper_bound(), 1);
    }

    #[test]
    fn test_entry_advances_only_on_higher_level() {
        let graph = test_graph(4);

        graph.add_node(0, 0);
        graph.mark_complete(NodeAtLevel { level: 0, node: 0 });
        assert_eq!(graph.entry_node(), Some(NodeAtLevel { level: 0, node: 0 }));

        // same level does not displace the incumbent
        graph.add_node(0, 1);
        graph.mark_complete(NodeAtLevel { level: 0, node: 1 });
        assert_eq!(graph.entry_node(), Some(NodeAtLevel { level: 0, node: 0 }));

        // a higher level does
        graph.add_node(1, 2);
        graph.mark_complete(NodeAtLevel { level: 1, node: 2 });
        assert_eq!(graph.entry_node(), Some(NodeAtLevel { level: 1, node: 2 }));
    }

    #[test]
    fn test_concurrent_view_hides_incomplete_nodes() {
        let graph = test_graph(4);

        graph.add_node(0, 0);
        graph.mark_complete(NodeAtLevel { level: 0, node: 0 });

        let view_before = graph.get_view();

        // wire node 1 into node 0's neighborhood, completing it after the
        // view was created
        graph.add_node(0, 1);
        let mut list = NodeArray::new(2);
        list.insert_sorted(1, 0.9);
        graph.connect_node(0, 0, list);
        graph.mark_complete(NodeAtLevel { level: 0, node: 1 });

        // the old view must not surface node 1 anywhere
        assert!(!view_before.neighbors(0, 0).contains(&1));

        // a fresh view does
        let view_after = graph.get_view();
        assert!(view_after.neighbors(0, 0).contains(&1));
    }

    #[test]
    fn test_frozen_view_skips_filtering() {
        let graph = test_graph(4);
        graph.add_node(0, 0);
        graph.add_node(0, 1);
        let mut list = NodeArray::new(2);
        list.insert_sorted(1, 0.9);
        graph.connect_node(0, 0, list);
        // node 1 never marked complete, but the graph is frozen
        graph.mark_complete(NodeAtLevel { level: 0, node: 0 });
        graph.set_all_mutations_completed();

        let view = graph.get_view();
        assert!(view.neighbors(0, 0).contains(&1));
    }

    #[test]
    fn test_live_nodes_and_deletion() {
        let graph = test_graph(4);
        graph.add_node(0, 0);
        graph.add_node(0, 1);

        let view = graph.get_view();
        assert!(matches!(view.live_nodes(), Bits::All));

        graph.mark_deleted(1);
        let view = graph.get_view();
        assert!(view.is_live(0));
        assert!(!view.is_live(1));
        assert!(!view.live_nodes().contains(1));

        assert_eq!(graph.remove_node(1), 1);
        assert!(!graph.deleted_nodes().get(1));
    }

    #[test]
    fn test_average_degree() {
        let graph = test_graph(4);
        assert!(graph.average_degree(0).is_nan());

        graph.add_node(0, 0);
        graph.add_node(0, 1);
        let mut list = NodeArray::new(2);
        list.insert_sorted(1, 0.5);
        graph.connect_node(0, 0, list);

        assert!((graph.average_degree(0) - 0.5).abs() < 1e-9);
    }
}
