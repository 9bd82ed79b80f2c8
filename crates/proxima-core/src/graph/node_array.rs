//! Score-ordered node arrays.
//!
//! A [`NodeArray`] is the workhorse buffer of both construction and search:
//! a list of `(node, score)` pairs kept sorted by descending score. It backs
//! the neighbor list of every graph node and the bounded result buffer of
//! the searcher.

/// A scored node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeScore {
    /// Graph ordinal.
    pub node: u32,
    /// Normalized similarity score, higher is better.
    pub score: f32,
}

/// A sequence of `(node, score)` pairs sorted by descending score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeArray {
    entries: Vec<NodeScore>,
}

impl NodeArray {
    /// Creates an empty array with the given capacity hint.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Node at position `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    #[must_use]
    pub fn node(&self, i: usize) -> u32 {
        self.entries[i].node
    }

    /// Score at position `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    #[must_use]
    pub fn score(&self, i: usize) -> f32 {
        self.entries[i].score
    }

    /// Iterates the entries in score-descending order.
    pub fn iter(&self) -> impl Iterator<Item = NodeScore> + '_ {
        self.entries.iter().copied()
    }

    /// Appends an entry that is already in order.
    ///
    /// Used when reading a saved graph, where neighbor lists are persisted
    /// sorted.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the score breaks the descending order.
    pub fn push_in_order(&mut self, node: u32, score: f32) {
        debug_assert!(
            self.entries.last().map_or(true, |last| last.score >= score),
            "push_in_order out of order"
        );
        self.entries.push(NodeScore { node, score });
    }

    /// Inserts an entry at its sorted position.
    ///
    /// Duplicate nodes with the same score are dropped. Returns true if the
    /// entry was inserted.
    pub fn insert_sorted(&mut self, node: u32, score: f32) -> bool {
        let at = self
            .entries
            .partition_point(|entry| entry.score > score);

        // scan the equal-score run for a duplicate
        let mut probe = at;
        while probe < self.entries.len() && self.entries[probe].score == score {
            if self.entries[probe].node == node {
                return false;
            }
            probe += 1;
        }

        self.entries.insert(at, NodeScore { node, score });
        true
    }

    /// Inserts an entry, keeping at most `bound` best entries.
    ///
    /// Returns true if the entry was admitted.
    pub fn insert_bounded(&mut self, node: u32, score: f32, bound: usize) -> bool {
        if self.entries.len() >= bound {
            match self.entries.last() {
                Some(worst) if score <= worst.score => return false,
                _ => {}
            }
        }
        if !self.insert_sorted(node, score) {
            return false;
        }
        self.entries.truncate(bound);
        true
    }

    /// Returns true if the array contains `node`.
    #[must_use]
    pub fn contains(&self, node: u32) -> bool {
        self.entries.iter().any(|entry| entry.node == node)
    }

    /// Removes the entry for `node` if present; returns true if removed.
    pub fn remove(&mut self, node: u32) -> bool {
        match self.entries.iter().position(|entry| entry.node == node) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    /// Keeps only entries whose nodes pass the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(u32) -> bool) {
        self.entries.retain(|entry| keep(entry.node));
    }

    /// Truncates to at most `len` entries.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Merges two sorted arrays into a new sorted array, dropping duplicate
    /// nodes (the higher-scored occurrence wins).
    #[must_use]
    pub fn merge(a: &Self, b: &Self) -> Self {
        let mut merged = Self::new(a.len() + b.len());
        let mut ai = 0;
        let mut bi = 0;
        while ai < a.len() || bi < b.len() {
            let take_a = match (a.entries.get(ai), b.entries.get(bi)) {
                (Some(x), Some(y)) => x.score >= y.score,
                (Some(_), None) => true,
                _ => false,
            };
            let entry = if take_a {
                ai += 1;
                a.entries[ai - 1]
            } else {
                bi += 1;
                b.entries[bi - 1]
            };
            if !merged.contains(entry.node) {
                merged.entries.push(entry);
            }
        }
        merged
    }

    /// Converts into the underlying entries.
    #[must_use]
    pub fn into_vec(self) -> Vec<NodeScore> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sorted_keeps_descending_order() {
        let mut array = NodeArray::new(4);
        array.insert_sorted(1, 0.5);
        array.insert_sorted(2, 0.9);
        array.insert_sorted(3, 0.7);

        let nodes: Vec<u32> = array.iter().map(|e| e.node).collect();
        assert_eq!(nodes, vec![2, 3, 1]);
    }

    #[test]
    fn test_insert_sorted_rejects_duplicates() {
        let mut array = NodeArray::new(4);
        assert!(array.insert_sorted(1, 0.5));
        assert!(!array.insert_sorted(1, 0.5));
        assert_eq!(array.len(), 1);
    }

    #[test]
    fn test_insert_bounded_evicts_worst() {
        let mut array = NodeArray::new(2);
        array.insert_bounded(1, 0.3, 2);
        array.insert_bounded(2, 0.6, 2);
        assert!(!array.insert_bounded(3, 0.1, 2));
        assert!(array.insert_bounded(4, 0.9, 2));

        let nodes: Vec<u32> = array.iter().map(|e| e.node).collect();
        assert_eq!(nodes, vec![4, 2]);
    }

    #[test]
    fn test_merge_dedups() {
        let mut a = NodeArray::new(2);
        a.insert_sorted(1, 0.9);
        a.insert_sorted(2, 0.5);

        let mut b = NodeArray::new(2);
        b.insert_sorted(2, 0.5);
        b.insert_sorted(3, 0.7);

        let merged = NodeArray::merge(&a, &b);
        let nodes: Vec<u32> = merged.iter().map(|e| e.node).collect();
        assert_eq!(nodes, vec![1, 3, 2]);
    }

    #[test]
    fn test_remove_and_retain() {
        let mut array = NodeArray::new(3);
        array.insert_sorted(1, 0.9);
        array.insert_sorted(2, 0.5);
        array.insert_sorted(3, 0.2);

        assert!(array.remove(2));
        assert!(!array.remove(2));

        array.retain(|node| node != 3);
        assert_eq!(array.len(), 1);
        assert_eq!(array.node(0), 1);
    }
}
