//! Product quantization codebooks.
//!
//! A [`ProductQuantization`] splits the original dimension into `M`
//! contiguous subspaces and trains a codebook of up to 256 centroids per
//! subspace, so a vector compresses to `M` bytes. Codebooks are immutable
//! once built and freely shared.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::quantization::kmeans::{KMeansPlusPlusClusterer, MAX_ITERATIONS, UNWEIGHTED};
use crate::similarity::VectorSimilarity;
use crate::simd;
use crate::vectors::VectorSource;

/// Default (and maximum) cluster count; a centroid index must fit in a byte.
pub const DEFAULT_CLUSTERS: usize = 256;

/// Cap on the number of vectors sampled for codebook training.
const MAX_TRAINING_VECTORS: usize = 128 * 1024;

/// Current persisted-format version.
pub const PQ_VERSION: u32 = 1;

/// Trained product-quantization codebooks.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuantization {
    /// Per-subspace codebooks, each `clusters * size` floats row-major.
    pub(crate) codebooks: Vec<Vec<f32>>,
    /// Per-subspace `(size, offset)` over the original dimension.
    pub(crate) subvector_layout: Vec<(usize, usize)>,
    /// Centroids per subspace.
    pub(crate) clusters: usize,
    /// Optional mean subtracted before encoding.
    pub(crate) global_centroid: Option<Vec<f32>>,
    /// Anisotropic training threshold, [`UNWEIGHTED`] when not used.
    pub(crate) anisotropic_threshold: f32,
    /// Dimension of the vectors this quantizer encodes.
    pub(crate) original_dimension: usize,
}

impl ProductQuantization {
    /// Trains codebooks over the vectors of `source`.
    ///
    /// `globally_center` subtracts the dataset mean before training and
    /// encoding, which helps inner-product workloads. An
    /// `anisotropic_threshold` above [`UNWEIGHTED`] switches training to the
    /// direction-weighted mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the source is empty, `m` does
    /// not fit the dimension, or `clusters` is outside `1..=256`.
    pub fn compute(
        source: &dyn VectorSource,
        m: usize,
        clusters: usize,
        globally_center: bool,
        anisotropic_threshold: f32,
    ) -> Result<Self> {
        let dimension = source.dimension();
        validate_params(source.size(), dimension, m, clusters)?;

        let mut training: Vec<f32> = Vec::new();
        let mut count = 0usize;
        for ordinal in 0..source.size() {
            if count >= MAX_TRAINING_VECTORS {
                break;
            }
            if let Some(vector) = source.vector(ordinal) {
                training.extend_from_slice(vector);
                count += 1;
            }
        }
        if count == 0 {
            return Err(Error::InvalidArgument(
                "vector source has no present vectors".into(),
            ));
        }

        let global_centroid = if globally_center {
            let mut centroid = vec![0.0f32; dimension];
            for i in 0..count {
                simd::add_in_place(&mut centroid, &training[i * dimension..(i + 1) * dimension]);
            }
            simd::scale(&mut centroid, 1.0 / count as f32);
            for i in 0..count {
                simd::sub_in_place(&mut training[i * dimension..(i + 1) * dimension], &centroid);
            }
            Some(centroid)
        } else {
            None
        };

        let subvector_layout = subvector_sizes_and_offsets(dimension, m);
        let mut codebooks = Vec::with_capacity(m);
        for &(size, offset) in &subvector_layout {
            let subvectors = extract_subvectors(&training, count, dimension, size, offset);
            let k = clusters.min(count);
            let mut clusterer =
                KMeansPlusPlusClusterer::new(&subvectors, size, k, anisotropic_threshold);
            clusterer.cluster(MAX_ITERATIONS);
            codebooks.push(pad_codebook(clusterer.centroids(), size, k, clusters));
        }

        Ok(Self {
            codebooks,
            subvector_layout,
            clusters,
            global_centroid,
            anisotropic_threshold,
            original_dimension: dimension,
        })
    }

    /// Continues clustering on a fresh vector stream from the existing
    /// centroids, returning the refined quantizer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the source dimension differs,
    /// or [`Error::InvalidArgument`] if it has no present vectors.
    pub fn refine(&self, source: &dyn VectorSource) -> Result<Self> {
        if source.dimension() != self.original_dimension {
            return Err(Error::DimensionMismatch {
                expected: self.original_dimension,
                actual: source.dimension(),
            });
        }

        let dimension = self.original_dimension;
        let mut training: Vec<f32> = Vec::new();
        let mut count = 0usize;
        for ordinal in 0..source.size() {
            if count >= MAX_TRAINING_VECTORS {
                break;
            }
            if let Some(vector) = source.vector(ordinal) {
                training.extend_from_slice(vector);
                count += 1;
            }
        }
        if count == 0 {
            return Err(Error::InvalidArgument(
                "vector source has no present vectors".into(),
            ));
        }
        if let Some(centroid) = &self.global_centroid {
            for i in 0..count {
                simd::sub_in_place(&mut training[i * dimension..(i + 1) * dimension], centroid);
            }
        }

        let mut codebooks = Vec::with_capacity(self.subvector_layout.len());
        for (m, &(size, offset)) in self.subvector_layout.iter().enumerate() {
            let subvectors = extract_subvectors(&training, count, dimension, size, offset);
            let mut clusterer = KMeansPlusPlusClusterer::with_centroids(
                &subvectors,
                size,
                self.codebooks[m].clone(),
                self.anisotropic_threshold,
            );
            clusterer.cluster(MAX_ITERATIONS);
            codebooks.push(clusterer.centroids().to_vec());
        }

        Ok(Self {
            codebooks,
            subvector_layout: self.subvector_layout.clone(),
            clusters: self.clusters,
            global_centroid: self.global_centroid.clone(),
            anisotropic_threshold: self.anisotropic_threshold,
            original_dimension: self.original_dimension,
        })
    }

    /// Number of subspaces `M`.
    #[must_use]
    pub fn subspace_count(&self) -> usize {
        self.subvector_layout.len()
    }

    /// Centroids per subspace `K`.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.clusters
    }

    /// Encoded size of one vector, in bytes.
    #[must_use]
    pub fn compressed_vector_size(&self) -> usize {
        self.subvector_layout.len()
    }

    /// Dimension of the vectors this quantizer encodes.
    #[must_use]
    pub fn original_dimension(&self) -> usize {
        self.original_dimension
    }

    /// The global centroid subtracted before encoding, if any.
    #[must_use]
    pub fn global_centroid(&self) -> Option<&[f32]> {
        self.global_centroid.as_deref()
    }

    /// Per-subspace `(size, offset)` pairs.
    #[must_use]
    pub fn subvector_layout(&self) -> &[(usize, usize)] {
        &self.subvector_layout
    }

    /// Encodes a vector into a fresh `M`-byte code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] on wrong input length.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        let mut code = vec![0u8; self.subspace_count()];
        self.encode_to(vector, &mut code)?;
        Ok(code)
    }

    /// Encodes a vector into the provided `M`-byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] on wrong input length or
    /// [`Error::InvalidArgument`] if `code` is not `M` bytes.
    pub fn encode_to(&self, vector: &[f32], code: &mut [u8]) -> Result<()> {
        if vector.len() != self.original_dimension {
            return Err(Error::DimensionMismatch {
                expected: self.original_dimension,
                actual: vector.len(),
            });
        }
        if code.len() != self.subspace_count() {
            return Err(Error::InvalidArgument(format!(
                "code buffer must be {} bytes, got {}",
                self.subspace_count(),
                code.len()
            )));
        }

        let centered;
        let vector = match &self.global_centroid {
            Some(centroid) => {
                centered = simd::sub(vector, centroid);
                centered.as_slice()
            }
            None => vector,
        };

        for (m, &(size, offset)) in self.subvector_layout.iter().enumerate() {
            code[m] = self.nearest_centroid(m, &vector[offset..offset + size], size);
        }
        Ok(())
    }

    fn nearest_centroid(&self, subspace: usize, subvector: &[f32], size: usize) -> u8 {
        let codebook = &self.codebooks[subspace];
        let mut best = 0usize;
        let mut best_dist = f32::MAX;
        for c in 0..self.clusters {
            let dist = simd::squared_l2_range(codebook, c * size, subvector, 0, size);
            if dist < best_dist {
                best_dist = dist;
                best = c;
            }
        }
        best as u8
    }

    /// Reconstructs the vector a code represents into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] on wrong code or output length.
    pub fn decode(&self, code: &[u8], out: &mut [f32]) -> Result<()> {
        if code.len() != self.subspace_count() {
            return Err(Error::InvalidArgument(format!(
                "code must be {} bytes, got {}",
                self.subspace_count(),
                code.len()
            )));
        }
        if out.len() != self.original_dimension {
            return Err(Error::DimensionMismatch {
                expected: self.original_dimension,
                actual: out.len(),
            });
        }

        for (m, &(size, offset)) in self.subvector_layout.iter().enumerate() {
            let centroid_base = code[m] as usize * size;
            out[offset..offset + size]
                .copy_from_slice(&self.codebooks[m][centroid_base..centroid_base + size]);
        }
        if let Some(centroid) = &self.global_centroid {
            simd::add_in_place(out, centroid);
        }
        Ok(())
    }

    /// Builds the triangular symmetric-distance table for a similarity.
    ///
    /// Per subspace `m`, the block holds one entry for every unordered
    /// centroid pair `(r, c)` with `r <= c`: the raw dot product for
    /// dot-product and cosine scoring, the raw squared L2 distance for
    /// Euclidean. Consumed by [`crate::simd::assemble_and_sum_pq`].
    #[must_use]
    pub fn create_codebook_partial_sums(&self, similarity: VectorSimilarity) -> Vec<f32> {
        let k = self.clusters;
        let block = k * (k + 1) / 2;
        let mut table = vec![0.0f32; self.subspace_count() * block];

        for (m, &(size, _)) in self.subvector_layout.iter().enumerate() {
            let codebook = &self.codebooks[m];
            let base = m * block;
            let mut at = base;
            for r in 0..k {
                for c in r..k {
                    table[at] = match similarity {
                        VectorSimilarity::DotProduct | VectorSimilarity::Cosine => {
                            simd::dot_product_range(codebook, r * size, codebook, c * size, size)
                        }
                        VectorSimilarity::Euclidean => {
                            simd::squared_l2_range(codebook, r * size, codebook, c * size, size)
                        }
                    };
                    at += 1;
                }
            }
        }
        table
    }

    /// Writes the quantizer in the given container version.
    ///
    /// Version 0 predates anisotropic training and omits the threshold;
    /// re-saving a version-0 file at version 0 is byte-identical.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedVersion`] for unknown versions and
    /// propagates I/O failures.
    pub fn write<W: Write>(&self, out: &mut W, version: u32) -> Result<()> {
        if version > PQ_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        out.write_u32::<LittleEndian>(version)?;
        out.write_u32::<LittleEndian>(self.original_dimension as u32)?;

        match &self.global_centroid {
            Some(centroid) => {
                out.write_u32::<LittleEndian>(centroid.len() as u32)?;
                for &value in centroid {
                    out.write_f32::<LittleEndian>(value)?;
                }
            }
            None => out.write_u32::<LittleEndian>(0)?,
        }

        out.write_u32::<LittleEndian>(self.subspace_count() as u32)?;
        for &(size, offset) in &self.subvector_layout {
            out.write_u32::<LittleEndian>(size as u32)?;
            out.write_u32::<LittleEndian>(offset as u32)?;
        }

        out.write_u32::<LittleEndian>(self.clusters as u32)?;
        if version >= 1 {
            out.write_f32::<LittleEndian>(self.anisotropic_threshold)?;
        }

        for codebook in &self.codebooks {
            for &value in codebook {
                out.write_f32::<LittleEndian>(value)?;
            }
        }
        Ok(())
    }

    /// Loads a quantizer written by [`Self::write`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedVersion`] for unknown versions,
    /// [`Error::InvalidArgument`] for inconsistent layout fields, and
    /// propagates I/O failures.
    pub fn load<R: Read>(input: &mut R) -> Result<Self> {
        let version = input.read_u32::<LittleEndian>()?;
        if version > PQ_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let original_dimension = input.read_u32::<LittleEndian>()? as usize;

        let centroid_len = input.read_u32::<LittleEndian>()? as usize;
        let global_centroid = if centroid_len > 0 {
            let mut centroid = vec![0.0f32; centroid_len];
            input.read_f32_into::<LittleEndian>(&mut centroid)?;
            Some(centroid)
        } else {
            None
        };

        let m = input.read_u32::<LittleEndian>()? as usize;
        if m == 0 {
            return Err(Error::InvalidArgument("subspace count must be positive".into()));
        }
        let mut subvector_layout = Vec::with_capacity(m);
        let mut covered = 0usize;
        for _ in 0..m {
            let size = input.read_u32::<LittleEndian>()? as usize;
            let offset = input.read_u32::<LittleEndian>()? as usize;
            covered += size;
            subvector_layout.push((size, offset));
        }
        if covered != original_dimension {
            return Err(Error::InvalidArgument(format!(
                "subvector sizes cover {covered} dimensions, expected {original_dimension}"
            )));
        }

        let clusters = input.read_u32::<LittleEndian>()? as usize;
        if clusters == 0 || clusters > DEFAULT_CLUSTERS {
            return Err(Error::InvalidArgument(format!(
                "cluster count {clusters} outside 1..=256"
            )));
        }
        let anisotropic_threshold = if version >= 1 {
            input.read_f32::<LittleEndian>()?
        } else {
            UNWEIGHTED
        };

        let mut codebooks = Vec::with_capacity(m);
        for &(size, _) in &subvector_layout {
            let mut codebook = vec![0.0f32; clusters * size];
            input.read_f32_into::<LittleEndian>(&mut codebook)?;
            codebooks.push(codebook);
        }

        Ok(Self {
            codebooks,
            subvector_layout,
            clusters,
            global_centroid,
            anisotropic_threshold,
            original_dimension,
        })
    }
}

/// Splits `dimension` into `m` contiguous subspaces.
///
/// When the dimension is not divisible by `m`, the remainder is spread so
/// that earlier subspaces are one dimension larger.
#[must_use]
pub fn subvector_sizes_and_offsets(dimension: usize, m: usize) -> Vec<(usize, usize)> {
    let base = dimension / m;
    let remainder = dimension % m;

    let mut layout = Vec::with_capacity(m);
    let mut offset = 0;
    for i in 0..m {
        let size = base + usize::from(i < remainder);
        layout.push((size, offset));
        offset += size;
    }
    layout
}

fn validate_params(size: usize, dimension: usize, m: usize, clusters: usize) -> Result<()> {
    if size == 0 {
        return Err(Error::InvalidArgument("vector source is empty".into()));
    }
    if m == 0 || m > dimension {
        return Err(Error::InvalidArgument(format!(
            "subspace count {m} must be in 1..={dimension}"
        )));
    }
    if clusters == 0 || clusters > DEFAULT_CLUSTERS {
        return Err(Error::InvalidArgument(format!(
            "cluster count {clusters} outside 1..=256"
        )));
    }
    Ok(())
}

fn extract_subvectors(
    training: &[f32],
    count: usize,
    dimension: usize,
    size: usize,
    offset: usize,
) -> Vec<f32> {
    let mut subvectors = Vec::with_capacity(count * size);
    for i in 0..count {
        let start = i * dimension + offset;
        subvectors.extend_from_slice(&training[start..start + size]);
    }
    subvectors
}

/// Pads a trained codebook out to `clusters` centroids by cycling the
/// trained ones; reached only when the training set is smaller than the
/// cluster count.
fn pad_codebook(trained: &[f32], size: usize, k: usize, clusters: usize) -> Vec<f32> {
    if k == clusters {
        return trained.to_vec();
    }
    let mut codebook = Vec::with_capacity(clusters * size);
    codebook.extend_from_slice(trained);
    for c in k..clusters {
        let source = (c % k) * size;
        let copy: Vec<f32> = trained[source..source + size].to_vec();
        codebook.extend_from_slice(&copy);
    }
    codebook
}
