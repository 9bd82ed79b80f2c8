//! Concurrent per-node neighbor lists.
//!
//! Each node's neighbors live in a [`NodeArray`] behind a short mutex; all
//! edge operations lock exactly one node at a time, so there is no lock
//! ordering to get wrong. The base layer uses a dense array indexed by
//! ordinal, upper layers a sparse map since their population drops
//! geometrically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::bits::AtomicBitSet;
use crate::graph::diversity::VamanaDiversityProvider;
use crate::graph::node_array::NodeArray;

/// A single node's neighbor list under its lock.
#[derive(Debug)]
pub(crate) struct Neighbors {
    list: Mutex<NodeArray>,
}

impl Neighbors {
    fn new(capacity: usize) -> Self {
        Self {
            list: Mutex::new(NodeArray::new(capacity)),
        }
    }

    fn with_list(list: NodeArray) -> Self {
        Self {
            list: Mutex::new(list),
        }
    }

    /// Clones the current list out of the lock.
    pub(crate) fn snapshot(&self) -> NodeArray {
        self.list.lock().clone()
    }

    /// Current degree.
    pub(crate) fn len(&self) -> usize {
        self.list.lock().len()
    }
}

enum Backing {
    Dense(RwLock<Vec<Option<Arc<Neighbors>>>>),
    Sparse(RwLock<FxHashMap<u32, Arc<Neighbors>>>),
}

/// Mapping ordinal -> neighbor list for one graph layer.
pub(crate) struct ConcurrentNeighborMap {
    backing: Backing,
    max_degree: usize,
    max_overflow_degree: usize,
    dense_count: AtomicUsize,
}

impl ConcurrentNeighborMap {
    /// Dense map for the base layer.
    pub(crate) fn dense(max_degree: usize, max_overflow_degree: usize, capacity: usize) -> Self {
        Self {
            backing: Backing::Dense(RwLock::new(Vec::with_capacity(capacity))),
            max_degree,
            max_overflow_degree,
            dense_count: AtomicUsize::new(0),
        }
    }

    /// Sparse map for the upper layers.
    pub(crate) fn sparse(max_degree: usize, max_overflow_degree: usize) -> Self {
        Self {
            backing: Backing::Sparse(RwLock::new(FxHashMap::default())),
            max_degree,
            max_overflow_degree,
            dense_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Adds `node` with an empty neighbor list; no-op if present.
    pub(crate) fn add_node(&self, node: u32) {
        match &self.backing {
            Backing::Dense(slots) => {
                {
                    let slots_read = slots.read();
                    if let Some(Some(_)) = slots_read.get(node as usize) {
                        return;
                    }
                }
                let mut slots = slots.write();
                while slots.len() <= node as usize {
                    slots.push(None);
                }
                if slots[node as usize].is_none() {
                    slots[node as usize] = Some(Arc::new(Neighbors::new(self.max_overflow_degree)));
                    self.dense_count.fetch_add(1, Ordering::Relaxed);
                }
            }
            Backing::Sparse(map) => {
                map.write()
                    .entry(node)
                    .or_insert_with(|| Arc::new(Neighbors::new(self.max_overflow_degree)));
            }
        }
    }

    /// Installs `list` as the neighbor list of `node`, replacing any
    /// previous list.
    pub(crate) fn connect(&self, node: u32, list: NodeArray) {
        match &self.backing {
            Backing::Dense(slots) => {
                {
                    let slots_read = slots.read();
                    if let Some(Some(neighbors)) = slots_read.get(node as usize) {
                        *neighbors.list.lock() = list;
                        return;
                    }
                }
                let mut slots = slots.write();
                while slots.len() <= node as usize {
                    slots.push(None);
                }
                if slots[node as usize].is_none() {
                    self.dense_count.fetch_add(1, Ordering::Relaxed);
                }
                slots[node as usize] = Some(Arc::new(Neighbors::with_list(list)));
            }
            Backing::Sparse(map) => {
                let mut map = map.write();
                match map.get(&node) {
                    Some(neighbors) => *neighbors.list.lock() = list,
                    None => {
                        map.insert(node, Arc::new(Neighbors::with_list(list)));
                    }
                }
            }
        }
    }

    pub(crate) fn get(&self, node: u32) -> Option<Arc<Neighbors>> {
        match &self.backing {
            Backing::Dense(slots) => slots.read().get(node as usize).and_then(Clone::clone),
            Backing::Sparse(map) => map.read().get(&node).cloned(),
        }
    }

    pub(crate) fn contains(&self, node: u32) -> bool {
        self.get(node).is_some()
    }

    /// Number of nodes in this layer.
    pub(crate) fn size(&self) -> usize {
        match &self.backing {
            Backing::Dense(_) => self.dense_count.load(Ordering::Relaxed),
            Backing::Sparse(map) => map.read().len(),
        }
    }

    /// The node ids of this layer, ascending.
    pub(crate) fn node_ids(&self) -> Vec<u32> {
        match &self.backing {
            Backing::Dense(slots) => slots
                .read()
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| slot.as_ref().map(|_| i as u32))
                .collect(),
            Backing::Sparse(map) => {
                let mut ids: Vec<u32> = map.read().keys().copied().collect();
                ids.sort_unstable();
                ids
            }
        }
    }

    /// Removes `node` from the layer, returning its list if it was present.
    pub(crate) fn remove(&self, node: u32) -> Option<Arc<Neighbors>> {
        match &self.backing {
            Backing::Dense(slots) => {
                let mut slots = slots.write();
                let taken = slots.get_mut(node as usize).and_then(Option::take);
                if taken.is_some() {
                    self.dense_count.fetch_sub(1, Ordering::Relaxed);
                }
                taken
            }
            Backing::Sparse(map) => map.write().remove(&node),
        }
    }

    /// Merges `candidates` into `node`'s list under the diversity predicate.
    ///
    /// Returns the resulting list; the caller backlinks from it. The node
    /// must already be present in the layer.
    pub(crate) fn insert_diverse(
        &self,
        node: u32,
        candidates: &NodeArray,
        diversity: &VamanaDiversityProvider,
    ) -> NodeArray {
        let Some(neighbors) = self.get(node) else {
            return NodeArray::new(0);
        };

        let mut list = neighbors.list.lock();
        let mut merged = NodeArray::merge(&list, candidates);
        merged.remove(node);
        diversity.retain_diverse(&mut merged, self.max_degree);
        *list = merged.clone();
        merged
    }

    /// Best-effort backlinks: appends `node` to each new neighbor's list.
    ///
    /// A neighbor already at its overflow capacity skips the append; the
    /// later degree-enforcement pass normalizes whatever this leaves.
    pub(crate) fn backlink(&self, new_neighbors: &NodeArray, node: u32) {
        for entry in new_neighbors.iter() {
            if entry.node == node {
                continue;
            }
            let Some(neighbors) = self.get(entry.node) else {
                continue;
            };
            let mut list = neighbors.list.lock();
            if list.len() < self.max_overflow_degree {
                list.insert_sorted(node, entry.score);
            }
        }
    }

    /// Re-applies diversity and truncates `node`'s list to the max degree.
    pub(crate) fn enforce_degree(&self, node: u32, diversity: &VamanaDiversityProvider) {
        let Some(neighbors) = self.get(node) else {
            return;
        };
        let mut list = neighbors.list.lock();
        let mut pruned = list.clone();
        diversity.retain_diverse(&mut pruned, self.max_degree);
        *list = pruned;
    }

    /// Atomically drops edges into `to_delete` and installs diversified
    /// replacements from `candidates`.
    pub(crate) fn replace_deleted_neighbors(
        &self,
        node: u32,
        to_delete: &AtomicBitSet,
        candidates: &NodeArray,
        diversity: &VamanaDiversityProvider,
    ) {
        let Some(neighbors) = self.get(node) else {
            return;
        };
        let mut list = neighbors.list.lock();
        let mut kept = list.clone();
        kept.retain(|n| !to_delete.get(n as usize));

        let mut live_candidates = candidates.clone();
        live_candidates.retain(|n| n != node && !to_delete.get(n as usize));

        let mut merged = NodeArray::merge(&kept, &live_candidates);
        diversity.retain_diverse(&mut merged, self.max_degree);
        *list = merged;
    }
}
