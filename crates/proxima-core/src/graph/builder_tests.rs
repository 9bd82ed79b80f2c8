//! End-to-end construction and search tests.

use std::sync::Arc;

use crate::bits::Bits;
use crate::graph::builder::{build_and_merge_new_nodes, GraphBuilder};
use crate::graph::persistence;
use crate::graph::score::{BuildScoreProvider, RandomAccessScoreProvider};
use crate::graph::searcher::GraphSearcher;
use crate::similarity::VectorSimilarity;
use crate::vectors::{DenseVectorSource, VectorSource};

fn next_state(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut state = seed | 1;
    (0..n)
        .map(|_| {
            (0..dim)
                .map(|_| (next_state(&mut state) >> 40) as f32 / (1u64 << 24) as f32)
                .collect()
        })
        .collect()
}

fn exact_provider(
    rows: &[Vec<f32>],
    dim: usize,
    similarity: VectorSimilarity,
) -> Arc<RandomAccessScoreProvider> {
    let source = Arc::new(DenseVectorSource::from_rows(rows, dim).unwrap());
    Arc::new(RandomAccessScoreProvider::new(source, similarity))
}

fn brute_force_top_k(
    rows: &[Vec<f32>],
    query: &[f32],
    similarity: VectorSimilarity,
    k: usize,
) -> Vec<u32> {
    let mut scored: Vec<(u32, f32)> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| (i as u32, similarity.compare(query, row)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().take(k).map(|(node, _)| node).collect()
}

fn recall(found: &[u32], truth: &[u32]) -> f32 {
    let hits = truth.iter().filter(|node| found.contains(node)).count();
    hits as f32 / truth.len() as f32
}

#[test]
fn test_sequential_insertion_backlinks_both_neighbors() {
    // max_degree = 2, alpha = 1.0, dot product: after inserting the three
    // vectors in order, both later nodes are backlinked into node 0
    let rows = vec![vec![1.0, 0.0], vec![0.99, 0.01], vec![0.0, 1.0]];
    let provider = exact_provider(&rows, 2, VectorSimilarity::DotProduct);
    let builder = GraphBuilder::new(provider, 2, 4, 1.0, 1.0, false).unwrap();

    for node in 0..3 {
        builder.add_graph_node(node).unwrap();
    }

    let neighbors = builder.graph().neighbors_snapshot(0, 0).unwrap();
    assert!(neighbors.contains(1), "node 1 missing from node 0");
    assert!(neighbors.contains(2), "node 2 missing from node 0");
}

#[test]
fn test_flat_build_recall() {
    // 200 random 16-D vectors, M = 8, beam 100, alpha 1.2, overflow 1.2
    let rows = random_vectors(200, 16, 4242);
    let similarity = VectorSimilarity::Euclidean;
    let provider = exact_provider(&rows, 16, similarity);
    let builder = GraphBuilder::new(provider.clone(), 8, 100, 1.2, 1.2, false).unwrap();

    let source = DenseVectorSource::from_rows(&rows, 16).unwrap();
    builder.build(&source).unwrap();

    let queries = random_vectors(10, 16, 777);
    let mut searcher = GraphSearcher::new();
    let mut total_recall = 0.0f32;
    for query in &queries {
        let truth = brute_force_top_k(&rows, query, similarity, 10);
        let ssp = provider.search_provider_for(query).unwrap();
        let result = searcher.search(builder.graph(), &ssp, 10, 100, &Bits::All);
        let found: Vec<u32> = result.node_scores.iter().map(|ns| ns.node).collect();
        total_recall += recall(&found, &truth);
    }

    let mean_recall = total_recall / queries.len() as f32;
    assert!(mean_recall >= 0.9, "recall {mean_recall} below 0.9");
}

#[test]
fn test_hierarchical_build_searches_through_layers() {
    let rows = random_vectors(300, 8, 99);
    let similarity = VectorSimilarity::Euclidean;
    let provider = exact_provider(&rows, 8, similarity);
    let builder = GraphBuilder::new(provider.clone(), 8, 60, 1.2, 1.2, true).unwrap();

    let source = DenseVectorSource::from_rows(&rows, 8).unwrap();
    builder.build(&source).unwrap();

    // with 300 nodes and M = 8 some node lands above the base layer almost
    // surely; the entry node sits at the highest populated level
    let graph = builder.graph();
    let entry = graph.entry_node().unwrap();
    assert_eq!(Some(entry.level), graph.get_max_level());

    let mut searcher = GraphSearcher::new();
    let mut total_recall = 0.0f32;
    let queries = random_vectors(10, 8, 555);
    for query in &queries {
        let truth = brute_force_top_k(&rows, query, similarity, 10);
        let ssp = provider.search_provider_for(query).unwrap();
        let result = searcher.search(graph, &ssp, 10, 80, &Bits::All);
        let found: Vec<u32> = result.node_scores.iter().map(|ns| ns.node).collect();
        total_recall += recall(&found, &truth);
    }
    assert!(total_recall / 10.0 >= 0.85);
}

#[test]
fn test_incremental_merge_matches_from_scratch_recall() {
    // 100 base + 100 new 16-D vectors, top-10
    let all_rows = random_vectors(200, 16, 31337);
    let base_rows: Vec<Vec<f32>> = all_rows[..100].to_vec();
    let similarity = VectorSimilarity::Euclidean;

    let base_provider = exact_provider(&base_rows, 16, similarity);
    let base_builder = GraphBuilder::new(base_provider, 8, 100, 1.2, 1.2, false).unwrap();
    let base_source = DenseVectorSource::from_rows(&base_rows, 16).unwrap();
    base_builder.build(&base_source).unwrap();

    let mut saved = Vec::new();
    persistence::save(base_builder.graph(), &mut saved).unwrap();

    // merge the new half into the loaded base graph
    let all_provider = exact_provider(&all_rows, 16, similarity);
    let all_source = DenseVectorSource::from_rows(&all_rows, 16).unwrap();
    let merged = build_and_merge_new_nodes(
        &mut saved.as_slice(),
        &all_source,
        all_provider.clone(),
        100,
        100,
        1.2,
        1.2,
        false,
    )
    .unwrap();
    assert_eq!(merged.size(0), 200);

    // from-scratch build over the union
    let scratch_builder =
        GraphBuilder::new(all_provider.clone(), 8, 100, 1.2, 1.2, false).unwrap();
    scratch_builder.build(&all_source).unwrap();

    let mut searcher = GraphSearcher::new();
    let queries = random_vectors(5, 16, 2024);
    for query in &queries {
        let truth = brute_force_top_k(&all_rows, query, similarity, 10);
        let ssp = all_provider.search_provider_for(query).unwrap();

        let merged_result = searcher.search(&merged, &ssp, 10, 100, &Bits::All);
        let merged_found: Vec<u32> =
            merged_result.node_scores.iter().map(|ns| ns.node).collect();

        let scratch_result =
            searcher.search(scratch_builder.graph(), &ssp, 10, 100, &Bits::All);
        let scratch_found: Vec<u32> =
            scratch_result.node_scores.iter().map(|ns| ns.node).collect();

        let merged_recall = recall(&merged_found, &truth);
        let scratch_recall = recall(&scratch_found, &truth);
        assert!(
            (merged_recall - scratch_recall).abs() <= 0.01,
            "merged {merged_recall} vs scratch {scratch_recall}"
        );
    }
}

#[test]
fn test_deleted_nodes_are_rewired_and_removed() {
    let rows = random_vectors(60, 8, 11);
    let similarity = VectorSimilarity::Euclidean;
    let provider = exact_provider(&rows, 8, similarity);
    let builder = GraphBuilder::new(provider.clone(), 6, 40, 1.2, 1.2, false).unwrap();

    let source = DenseVectorSource::from_rows(&rows, 8).unwrap();
    builder.build(&source).unwrap();

    builder.mark_deleted(3);
    builder.mark_deleted(17);
    let removed = builder.remove_deleted_nodes().unwrap();
    assert_eq!(removed, 2);

    let graph = builder.graph();
    assert!(!graph.contains(0, 3));
    assert!(!graph.contains(0, 17));

    // no surviving node still points at a removed one
    for node in graph.node_ids(0) {
        let neighbors = graph.neighbors_snapshot(0, node).unwrap();
        assert!(!neighbors.contains(3) && !neighbors.contains(17));
    }

    // search still works and never returns the removed ordinals
    let mut searcher = GraphSearcher::new();
    let ssp = provider.search_provider_for(&rows[3]).unwrap();
    let result = searcher.search(graph, &ssp, 5, 20, &Bits::All);
    assert!(!result.node_scores.is_empty());
    assert!(!result.node_scores.iter().any(|ns| ns.node == 3 || ns.node == 17));
}

#[test]
fn test_parallel_build_contains_every_node() {
    let rows = random_vectors(128, 8, 321);
    let provider = exact_provider(&rows, 8, VectorSimilarity::DotProduct);
    let builder = GraphBuilder::new(provider, 8, 32, 1.2, 1.2, false).unwrap();

    let source = DenseVectorSource::from_rows(&rows, 8).unwrap();
    builder.build(&source).unwrap();

    let graph = builder.graph();
    assert_eq!(graph.size(0), 128);
    assert!(graph.all_mutations_completed());

    // degree enforcement leaves every node at or under the bound
    for node in graph.node_ids(0) {
        assert!(graph.neighbors_snapshot(0, node).unwrap().len() <= 8);
    }
}

#[test]
fn test_build_skips_absent_ordinals() {
    struct Holey(DenseVectorSource);
    impl VectorSource for Holey {
        fn size(&self) -> usize {
            self.0.size() + 1
        }
        fn dimension(&self) -> usize {
            self.0.dimension()
        }
        fn vector(&self, ordinal: usize) -> Option<&[f32]> {
            self.0.vector(ordinal)
        }
    }

    let rows = random_vectors(20, 4, 5);
    let holey = Holey(DenseVectorSource::from_rows(&rows, 4).unwrap());
    let provider = Arc::new(RandomAccessScoreProvider::new(
        Arc::new(Holey(DenseVectorSource::from_rows(&rows, 4).unwrap())),
        VectorSimilarity::Euclidean,
    ));
    let builder = GraphBuilder::new(provider, 4, 16, 1.2, 1.2, false).unwrap();
    builder.build(&holey).unwrap();

    assert_eq!(builder.graph().size(0), 20);
}
