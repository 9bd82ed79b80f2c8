//! The layered proximity graph: construction, search, and persistence.

pub mod builder;
pub mod completion;
pub mod diversity;
pub mod index;
pub mod neighbors;
pub mod node_array;
pub mod ordered_float;
pub mod persistence;
pub mod score;
pub mod searcher;

#[cfg(test)]
mod builder_tests;

pub use builder::{build_and_merge_new_nodes, GraphBuilder};
pub use diversity::VamanaDiversityProvider;
pub use index::{GraphView, LayeredGraph, NodeAtLevel};
pub use node_array::{NodeArray, NodeScore};
pub use score::{
    BuildScoreProvider, PqBuildScoreProvider, RandomAccessScoreProvider, ScoreFn,
    SearchScoreProvider,
};
pub use searcher::{GraphSearcher, SearchResult};
