//! Graph persistence (save/load).
//!
//! Versioned container, explicit little-endian. Header: magic, version,
//! layer count, per-layer max degree, entry ordinal. Then per layer: node
//! count, and for each node its ordinal, neighbor count, and the neighbor
//! `(ordinal, score)` pairs in score-descending order.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::graph::diversity::VamanaDiversityProvider;
use crate::graph::index::{LayeredGraph, NodeAtLevel};
use crate::graph::node_array::NodeArray;

/// Magic number of the persisted graph container.
pub const GRAPH_MAGIC: u32 = 0x75EC_4012;

/// Current container version.
pub const GRAPH_VERSION: u32 = 4;

/// Saves the graph for reloading into memory later.
///
/// # Errors
///
/// Returns [`Error::InvariantViolation`] if mutations are still pending
/// (call the builder's cleanup first) or if the graph is empty, and
/// propagates I/O failures.
pub fn save<W: Write>(graph: &LayeredGraph, out: &mut W) -> Result<()> {
    if !graph.all_mutations_completed() {
        return Err(Error::InvariantViolation(
            "cannot save a graph with pending mutations".into(),
        ));
    }
    let Some(entry) = graph.entry_node() else {
        return Err(Error::InvariantViolation("cannot save an empty graph".into()));
    };
    let layer_count = graph.get_max_level().map_or(0, |level| level + 1);
    debug_assert_eq!(entry.level, layer_count - 1);

    out.write_u32::<LittleEndian>(GRAPH_MAGIC)?;
    out.write_u32::<LittleEndian>(GRAPH_VERSION)?;

    out.write_u32::<LittleEndian>(layer_count as u32)?;
    for level in 0..layer_count {
        out.write_u32::<LittleEndian>(graph.degree(level) as u32)?;
    }
    out.write_u32::<LittleEndian>(entry.node)?;

    for level in 0..layer_count {
        let nodes = graph.node_ids(level);
        out.write_u32::<LittleEndian>(nodes.len() as u32)?;

        for node in nodes {
            let neighbors = graph
                .neighbors_snapshot(level, node)
                .unwrap_or_default();
            out.write_u32::<LittleEndian>(node)?;
            out.write_u32::<LittleEndian>(neighbors.len() as u32)?;
            for entry in neighbors.iter() {
                out.write_u32::<LittleEndian>(entry.node)?;
                out.write_f32::<LittleEndian>(entry.score)?;
            }
        }
    }

    tracing::debug!(layers = layer_count, size = graph.size(0), "graph saved");
    Ok(())
}

/// Loads a graph written by [`save`].
///
/// Every node is marked complete during the replay, so the loaded graph is
/// immediately searchable and accepts further insertions.
///
/// # Errors
///
/// Returns [`Error::BadMagic`] / [`Error::UnsupportedVersion`] for foreign
/// containers and propagates I/O failures.
pub fn load<R: Read>(
    input: &mut R,
    overflow_ratio: f32,
    diversity: VamanaDiversityProvider,
) -> Result<LayeredGraph> {
    let magic = input.read_u32::<LittleEndian>()?;
    if magic != GRAPH_MAGIC {
        return Err(Error::BadMagic(magic));
    }
    let version = input.read_u32::<LittleEndian>()?;
    if version != GRAPH_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let layer_count = input.read_u32::<LittleEndian>()? as usize;
    if layer_count == 0 {
        return Err(Error::InvalidArgument("graph has no layers".into()));
    }
    let mut degrees = Vec::with_capacity(layer_count);
    for _ in 0..layer_count {
        degrees.push(input.read_u32::<LittleEndian>()? as usize);
    }
    let entry_node = input.read_u32::<LittleEndian>()?;

    let graph = LayeredGraph::new(degrees.clone(), overflow_ratio, diversity)?;

    let mut node_levels: Vec<(u32, usize)> = Vec::new();
    for level in 0..layer_count {
        let layer_size = input.read_u32::<LittleEndian>()? as usize;
        for _ in 0..layer_size {
            let node = input.read_u32::<LittleEndian>()?;
            let neighbor_count = input.read_u32::<LittleEndian>()? as usize;

            let mut neighbors = NodeArray::new(neighbor_count);
            for _ in 0..neighbor_count {
                let neighbor = input.read_u32::<LittleEndian>()?;
                let score = input.read_f32::<LittleEndian>()?;
                neighbors.push_in_order(neighbor, score);
            }
            graph.connect_node(level, node, neighbors);

            match node_levels.iter_mut().find(|(n, _)| *n == node) {
                Some(entry) => entry.1 = level,
                None => node_levels.push((node, level)),
            }
        }
    }

    for (node, level) in node_levels {
        graph.mark_complete(NodeAtLevel { level, node });
    }
    graph.set_degrees(degrees);
    graph.update_entry_node(NodeAtLevel {
        level: layer_count - 1,
        node: entry_node,
    });

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use std::io::Seek;
    use std::sync::Arc;

    use super::*;
    use crate::graph::score::RandomAccessScoreProvider;
    use crate::similarity::VectorSimilarity;
    use crate::vectors::DenseVectorSource;

    fn diversity(rows: &[Vec<f32>]) -> VamanaDiversityProvider {
        let source = Arc::new(DenseVectorSource::from_rows(rows, 2).unwrap());
        let bsp = Arc::new(RandomAccessScoreProvider::new(
            source,
            VectorSimilarity::DotProduct,
        ));
        VamanaDiversityProvider::new(bsp, 1.2)
    }

    fn sample_rows(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let angle = i as f32 * 0.45;
                vec![angle.cos(), angle.sin()]
            })
            .collect()
    }

    /// Builds a small two-layer graph by hand.
    fn sample_graph(rows: &[Vec<f32>]) -> LayeredGraph {
        let graph = LayeredGraph::new(vec![3], 1.5, diversity(rows)).unwrap();
        let sim = VectorSimilarity::DotProduct;

        for node in 0..rows.len() as u32 {
            let level = usize::from(node == 2);
            graph.add_node(level, node);
            let mut candidates = crate::graph::node_array::NodeArray::new(4);
            for other in 0..node {
                candidates.insert_sorted(
                    other,
                    sim.compare(&rows[node as usize], &rows[other as usize]),
                );
            }
            for level in (0..=level).rev() {
                graph.add_edges(level, node, &candidates);
            }
            graph.mark_complete(NodeAtLevel { level, node });
        }
        graph.set_all_mutations_completed();
        graph
    }

    fn assert_graph_equals(a: &LayeredGraph, b: &LayeredGraph) {
        assert_eq!(a.entry_node(), b.entry_node());
        assert_eq!(a.get_max_level(), b.get_max_level());
        let levels = a.get_max_level().unwrap();
        for level in 0..=levels {
            assert_eq!(a.node_ids(level), b.node_ids(level), "level {level} node set");
            for node in a.node_ids(level) {
                let na = a.neighbors_snapshot(level, node).unwrap();
                let nb = b.neighbors_snapshot(level, node).unwrap();
                assert_eq!(na, nb, "level {level} node {node} neighbors");
            }
        }
    }

    #[test]
    fn test_save_requires_completed_mutations() {
        let rows = sample_rows(4);
        let graph = LayeredGraph::new(vec![3], 1.5, diversity(&rows)).unwrap();
        graph.add_node(0, 0);
        graph.mark_complete(NodeAtLevel { level: 0, node: 0 });

        let mut buffer = Vec::new();
        let err = save(&graph, &mut buffer).unwrap_err();
        assert_eq!(err.code(), "PROX-004");
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let rows = sample_rows(8);
        let graph = sample_graph(&rows);

        let mut file = tempfile::tempfile().unwrap();
        save(&graph, &mut file).unwrap();
        file.rewind().unwrap();

        let loaded = load(&mut file, graph.overflow_ratio(), diversity(&rows)).unwrap();
        assert_graph_equals(&graph, &loaded);
    }

    #[test]
    fn test_loaded_graph_is_searchable() {
        let rows = sample_rows(8);
        let graph = sample_graph(&rows);

        let mut buffer = Vec::new();
        save(&graph, &mut buffer).unwrap();
        let loaded = load(&mut buffer.as_slice(), 1.5, diversity(&rows)).unwrap();

        // every loaded node was marked complete, so a fresh concurrent view
        // sees the whole neighborhood
        let view = loaded.get_view();
        assert_eq!(view.size(), 8);
        for node in 0..8u32 {
            assert_eq!(
                view.neighbors(0, node).len(),
                loaded.neighbors_snapshot(0, node).unwrap().len()
            );
        }
    }

    #[test]
    fn test_rejects_foreign_containers() {
        let mut bad_magic = Vec::new();
        bad_magic.write_u32::<LittleEndian>(0xdead_beef).unwrap();
        let rows = sample_rows(2);
        let err = load(&mut bad_magic.as_slice(), 1.0, diversity(&rows)).unwrap_err();
        assert_eq!(err.code(), "PROX-006");

        let mut bad_version = Vec::new();
        bad_version.write_u32::<LittleEndian>(GRAPH_MAGIC).unwrap();
        bad_version.write_u32::<LittleEndian>(99).unwrap();
        let err = load(&mut bad_version.as_slice(), 1.0, diversity(&rows)).unwrap_err();
        assert_eq!(err.code(), "PROX-007");
    }
}
