//! Product quantization: codebook training, encoding, and chunked storage.

pub mod kmeans;
pub mod pq;
pub mod pq_vectors;

pub use kmeans::{KMeansPlusPlusClusterer, UNWEIGHTED};
pub use pq::{subvector_sizes_and_offsets, ProductQuantization, DEFAULT_CLUSTERS, PQ_VERSION};
pub use pq_vectors::{PqLayout, PqVectors, MAX_CHUNK_BYTES};
