//! # Proxima Core
//!
//! Approximate nearest-neighbor search over dense `f32` vectors.
//!
//! The index is a concurrently-constructed, hierarchically-layered
//! proximity graph (Vamana-style diversified edges with optional upper
//! layers) paired with a product-quantization engine, so construction and
//! search can run on compact approximate codes and rerank the final
//! candidates with exact distances.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use proxima_core::{
//!     Bits, DenseVectorSource, GraphBuilder, GraphSearcher,
//!     RandomAccessScoreProvider, VectorSimilarity,
//! };
//!
//! let source = Arc::new(DenseVectorSource::from_rows(&rows, 768)?);
//! let provider = Arc::new(RandomAccessScoreProvider::new(
//!     source.clone(),
//!     VectorSimilarity::Cosine,
//! ));
//!
//! // max degree 16, beam width 100, 20% overflow, alpha 1.2, no hierarchy
//! let builder = GraphBuilder::new(provider.clone(), 16, 100, 1.2, 1.2, false)?;
//! builder.build(source.as_ref())?;
//!
//! let mut searcher = GraphSearcher::new();
//! let ssp = provider.search_provider_for(&query)?;
//! let results = searcher.search(builder.graph(), &ssp, 10, 50, &Bits::All);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod bits;
pub mod error;
pub mod graph;
pub mod nvq;
pub mod quantization;
pub mod similarity;
pub mod simd;
pub mod simd_dispatch;
pub mod simd_explicit;
pub mod vectors;


pub use bits::{AtomicBitSet, Bits};
pub use error::{Error, Result};
pub use graph::{
    build_and_merge_new_nodes, BuildScoreProvider, GraphBuilder, GraphSearcher, GraphView,
    LayeredGraph, NodeArray, NodeAtLevel, NodeScore, PqBuildScoreProvider,
    RandomAccessScoreProvider, ScoreFn, SearchResult, SearchScoreProvider,
    VamanaDiversityProvider,
};
pub use quantization::{PqLayout, PqVectors, ProductQuantization};
pub use similarity::VectorSimilarity;
pub use vectors::{DenseVectorSource, VectorSource};
