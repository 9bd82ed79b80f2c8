//! Chunked storage for PQ-encoded vectors and the quantized score functions.
//!
//! The logical `N x M` byte array of codes is split into chunks so no single
//! allocation exceeds the addressing limit; [`PqLayout`] consolidates the
//! chunk arithmetic. Scoring precomputes per-query partial-sum tables so a
//! candidate costs `M` gathers instead of a full decode.

use std::io::{Read, Write};
use std::sync::{Arc, OnceLock};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::graph::score::ScoreFn;
use crate::quantization::pq::ProductQuantization;
use crate::similarity::VectorSimilarity;
use crate::simd;
use crate::vectors::VectorSource;

/// Upper bound on a single chunk allocation, in bytes.
pub const MAX_CHUNK_BYTES: usize = i32::MAX as usize;

/// Chunk dimensions and layout for `N` encoded vectors of `M` bytes.
///
/// Chunk sizing is bounded against [`MAX_CHUNK_BYTES`] using the
/// next-power-of-two aligned byte size per vector, purely to keep the
/// arithmetic overflow-free; the chunks themselves are packed tight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PqLayout {
    /// Total number of vectors.
    pub vector_count: usize,
    /// Total number of chunks, including any trailing partial chunk.
    pub total_chunks: usize,
    /// Number of fully-filled chunks.
    pub full_size_chunks: usize,
    /// Vectors per fully-filled chunk.
    pub full_chunk_vectors: usize,
    /// Vectors in the trailing partial chunk, zero if none.
    pub last_chunk_vectors: usize,
    /// Compressed dimension `M`.
    pub compressed_dimension: usize,
    /// Bytes per fully-filled chunk.
    pub full_chunk_bytes: usize,
    /// Bytes in the trailing partial chunk, zero if none.
    pub last_chunk_bytes: usize,
}

impl PqLayout {
    /// Computes the layout for `vector_count` vectors of `compressed_dimension` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if either argument is zero.
    pub fn new(vector_count: usize, compressed_dimension: usize) -> Result<Self> {
        if vector_count == 0 {
            return Err(Error::InvalidArgument(format!(
                "invalid vector count {vector_count}"
            )));
        }
        if compressed_dimension == 0 {
            return Err(Error::InvalidArgument(format!(
                "invalid compressed dimension {compressed_dimension}"
            )));
        }

        // aligned bytes per vector, only to bound the chunk size
        let layout_bytes_per_vector = if compressed_dimension == 1 {
            1
        } else {
            highest_one_bit(compressed_dimension - 1) << 1
        };
        // truncation welcome here, biasing for smaller chunks
        let addressable_vectors_per_chunk = MAX_CHUNK_BYTES / layout_bytes_per_vector;

        let full_chunk_vectors = vector_count.min(addressable_vectors_per_chunk);
        let last_chunk_vectors = vector_count % full_chunk_vectors;
        let full_size_chunks = vector_count / full_chunk_vectors;

        Ok(Self {
            vector_count,
            total_chunks: full_size_chunks + usize::from(last_chunk_vectors > 0),
            full_size_chunks,
            full_chunk_vectors,
            last_chunk_vectors,
            compressed_dimension,
            full_chunk_bytes: full_chunk_vectors * compressed_dimension,
            last_chunk_bytes: last_chunk_vectors * compressed_dimension,
        })
    }
}

fn highest_one_bit(value: usize) -> usize {
    1 << (usize::BITS - 1 - value.leading_zeros())
}

/// PQ-encoded vectors in chunked storage.
///
/// Written once by [`PqVectors::encode_all`] (or a load), read-only
/// afterwards; the quantizer and the per-similarity scoring tables are
/// shared across queries.
pub struct PqVectors {
    pq: Arc<ProductQuantization>,
    chunks: Vec<Box<[u8]>>,
    vector_count: usize,
    vectors_per_chunk: usize,
    dot_codebook_partials: OnceLock<Arc<Vec<f32>>>,
    l2_codebook_partials: OnceLock<Arc<Vec<f32>>>,
    centroid_magnitudes: OnceLock<Arc<Vec<f32>>>,
}

impl PqVectors {
    /// Encodes every vector of `source` in parallel.
    ///
    /// Absent ordinals are materialized as all-zero codes. Chunk sizes come
    /// from [`PqLayout`], so nothing reallocates during encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty source and
    /// [`Error::DimensionMismatch`] if any vector has the wrong length.
    pub fn encode_all(pq: Arc<ProductQuantization>, source: &dyn VectorSource) -> Result<Self> {
        let m = pq.compressed_vector_size();
        let layout = PqLayout::new(source.size(), m)?;

        let mut chunks: Vec<Box<[u8]>> = Vec::with_capacity(layout.total_chunks);
        for _ in 0..layout.full_size_chunks {
            chunks.push(vec![0u8; layout.full_chunk_bytes].into_boxed_slice());
        }
        if layout.last_chunk_vectors > 0 {
            chunks.push(vec![0u8; layout.last_chunk_bytes].into_boxed_slice());
        }

        for (chunk_index, chunk) in chunks.iter_mut().enumerate() {
            let base = chunk_index * layout.full_chunk_vectors;
            chunk
                .par_chunks_mut(m)
                .enumerate()
                .try_for_each(|(i, code)| match source.vector(base + i) {
                    Some(vector) => pq.encode_to(vector, code),
                    None => {
                        code.fill(0);
                        Ok(())
                    }
                })?;
        }

        Ok(Self {
            pq,
            chunks,
            vector_count: layout.vector_count,
            vectors_per_chunk: layout.full_chunk_vectors,
            dot_codebook_partials: OnceLock::new(),
            l2_codebook_partials: OnceLock::new(),
            centroid_magnitudes: OnceLock::new(),
        })
    }

    /// Number of encoded vectors.
    #[must_use]
    pub fn count(&self) -> usize {
        self.vector_count
    }

    /// The quantizer that produced these codes.
    #[must_use]
    pub fn quantizer(&self) -> &Arc<ProductQuantization> {
        &self.pq
    }

    /// Uncompressed size of one vector, in bytes.
    #[must_use]
    pub fn original_size(&self) -> usize {
        self.pq.original_dimension() * std::mem::size_of::<f32>()
    }

    /// Compressed size of one vector, in bytes.
    #[must_use]
    pub fn compressed_size(&self) -> usize {
        self.pq.compressed_vector_size()
    }

    /// Returns the code for `ordinal`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrdinalOutOfBounds`] for an invalid ordinal.
    pub fn get(&self, ordinal: usize) -> Result<&[u8]> {
        if ordinal >= self.vector_count {
            return Err(Error::OrdinalOutOfBounds {
                ordinal,
                bound: self.vector_count,
            });
        }
        Ok(self.code(ordinal))
    }

    /// Code slice for a valid ordinal.
    ///
    /// # Panics
    ///
    /// Panics if `ordinal` is out of bounds; graph ordinals are valid by
    /// construction on the scoring hot path.
    #[inline]
    pub(crate) fn code(&self, ordinal: usize) -> &[u8] {
        let m = self.pq.compressed_vector_size();
        let chunk = ordinal / self.vectors_per_chunk;
        let offset = (ordinal % self.vectors_per_chunk) * m;
        &self.chunks[chunk][offset..offset + m]
    }

    /// Builds a precomputed approximate score function for `query`.
    ///
    /// Asymmetric scoring: one `M x K` partial table is computed up front,
    /// then each candidate costs `M` gathers. Scores are normalized to
    /// `[0, 1]` by the similarity's usual mapping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] on wrong query length.
    pub fn score_function_for(
        self: &Arc<Self>,
        query: &[f32],
        similarity: VectorSimilarity,
    ) -> Result<ScoreFn> {
        let pq = &self.pq;
        if query.len() != pq.original_dimension() {
            return Err(Error::DimensionMismatch {
                expected: pq.original_dimension(),
                actual: query.len(),
            });
        }

        let centered: Vec<f32> = match pq.global_centroid() {
            Some(centroid) => simd::sub(query, centroid),
            None => query.to_vec(),
        };

        let k = pq.cluster_count();
        let m = pq.subspace_count();

        match similarity {
            VectorSimilarity::DotProduct | VectorSimilarity::Euclidean => {
                let mut partials = vec![0.0f32; m * k];
                for (index, &(size, offset)) in pq.subvector_layout().iter().enumerate() {
                    simd::calculate_partial_sums(
                        &pq.codebooks[index],
                        index,
                        size,
                        k,
                        &centered,
                        offset,
                        similarity,
                        &mut partials,
                    )?;
                }

                let this = Arc::clone(self);
                Ok(Box::new(move |node| {
                    let raw = simd::assemble_and_sum(&partials, k, this.code(node as usize));
                    similarity.score_from_raw(raw)
                }))
            }
            VectorSimilarity::Cosine => {
                let magnitudes = Arc::clone(self.centroid_magnitudes());

                let mut partials = vec![0.0f32; m * k];
                for (index, &(size, offset)) in pq.subvector_layout().iter().enumerate() {
                    simd::calculate_partial_sums(
                        &pq.codebooks[index],
                        index,
                        size,
                        k,
                        &centered,
                        offset,
                        VectorSimilarity::DotProduct,
                        &mut partials,
                    )?;
                }
                let b_magnitude = simd::dot_product(&centered, &centered);

                let this = Arc::clone(self);
                Ok(Box::new(move |node| {
                    let cosine = simd::pq_decoded_cosine_similarity(
                        this.code(node as usize),
                        k,
                        &partials,
                        &magnitudes,
                        b_magnitude,
                    );
                    (1.0 + cosine) / 2.0
                }))
            }
        }
    }

    /// Builds a symmetric code-to-code score function anchored at `node`.
    ///
    /// Used by the diversity predicate during construction: both sides are
    /// encoded, so the comparison reads the shared triangular
    /// centroid-pair table.
    #[must_use]
    pub fn diversity_function_for(
        self: &Arc<Self>,
        node: u32,
        similarity: VectorSimilarity,
    ) -> ScoreFn {
        let k = self.pq.cluster_count();
        let m = self.pq.subspace_count();
        let table = Arc::clone(self.codebook_partials(similarity));

        match similarity {
            VectorSimilarity::DotProduct => {
                let this = Arc::clone(self);
                Box::new(move |other| {
                    let raw = simd::assemble_and_sum_pq(
                        &table,
                        m,
                        this.code(node as usize),
                        this.code(other as usize),
                        k,
                    );
                    (1.0 + raw) / 2.0
                })
            }
            VectorSimilarity::Euclidean => {
                let this = Arc::clone(self);
                Box::new(move |other| {
                    let raw = simd::assemble_and_sum_pq(
                        &table,
                        m,
                        this.code(node as usize),
                        this.code(other as usize),
                        k,
                    );
                    1.0 / (1.0 + raw)
                })
            }
            VectorSimilarity::Cosine => {
                let code = self.code(node as usize);
                let norm1 = simd::assemble_and_sum_pq(&table, m, code, code, k);
                let this = Arc::clone(self);
                Box::new(move |other| {
                    let other_code = this.code(other as usize);
                    let sum = simd::assemble_and_sum_pq(
                        &table,
                        m,
                        this.code(node as usize),
                        other_code,
                        k,
                    );
                    let norm2 = simd::assemble_and_sum_pq(&table, m, other_code, other_code, k);
                    let cosine = sum / (norm1 * norm2).sqrt();
                    (1.0 + cosine) / 2.0
                })
            }
        }
    }

    fn codebook_partials(&self, similarity: VectorSimilarity) -> &Arc<Vec<f32>> {
        match similarity {
            VectorSimilarity::DotProduct | VectorSimilarity::Cosine => self
                .dot_codebook_partials
                .get_or_init(|| {
                    Arc::new(self.pq.create_codebook_partial_sums(VectorSimilarity::DotProduct))
                }),
            VectorSimilarity::Euclidean => self.l2_codebook_partials.get_or_init(|| {
                Arc::new(self.pq.create_codebook_partial_sums(VectorSimilarity::Euclidean))
            }),
        }
    }

    /// `|centroid_m_j|^2` table, computed once and shared across queries.
    fn centroid_magnitudes(&self) -> &Arc<Vec<f32>> {
        self.centroid_magnitudes.get_or_init(|| {
            let pq = &self.pq;
            let k = pq.cluster_count();
            let mut magnitudes = vec![0.0f32; pq.subspace_count() * k];
            for (m, &(size, _)) in pq.subvector_layout().iter().enumerate() {
                let codebook = &pq.codebooks[m];
                for j in 0..k {
                    magnitudes[m * k + j] =
                        simd::dot_product_range(codebook, j * size, codebook, j * size, size);
                }
            }
            Arc::new(magnitudes)
        })
    }

    /// Writes the quantizer and codes in the given container version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedVersion`] for unknown versions and
    /// propagates I/O failures.
    pub fn write<W: Write>(&self, out: &mut W, version: u32) -> Result<()> {
        self.pq.write(out, version)?;

        out.write_u32::<LittleEndian>(self.vector_count as u32)?;
        out.write_u32::<LittleEndian>(self.pq.compressed_vector_size() as u32)?;
        for chunk in &self.chunks {
            out.write_all(chunk)?;
        }
        Ok(())
    }

    /// Loads encoded vectors written by [`Self::write`].
    ///
    /// # Errors
    ///
    /// Returns the underlying format error for bad headers and propagates
    /// I/O failures.
    pub fn load<R: Read>(input: &mut R) -> Result<Self> {
        let pq = Arc::new(ProductQuantization::load(input)?);

        let vector_count = input.read_u32::<LittleEndian>()? as usize;
        let compressed_dimension = input.read_u32::<LittleEndian>()? as usize;
        if compressed_dimension != pq.compressed_vector_size() {
            return Err(Error::InvalidArgument(format!(
                "compressed dimension {compressed_dimension} does not match quantizer ({})",
                pq.compressed_vector_size()
            )));
        }

        let layout = PqLayout::new(vector_count, compressed_dimension)?;
        let mut chunks = Vec::with_capacity(layout.total_chunks);
        for _ in 0..layout.full_size_chunks {
            let mut chunk = vec![0u8; layout.full_chunk_bytes];
            input.read_exact(&mut chunk)?;
            chunks.push(chunk.into_boxed_slice());
        }
        if layout.last_chunk_vectors > 0 {
            let mut chunk = vec![0u8; layout.last_chunk_bytes];
            input.read_exact(&mut chunk)?;
            chunks.push(chunk.into_boxed_slice());
        }

        Ok(Self {
            pq,
            chunks,
            vector_count,
            vectors_per_chunk: layout.full_chunk_vectors,
            dot_codebook_partials: OnceLock::new(),
            l2_codebook_partials: OnceLock::new(),
            centroid_magnitudes: OnceLock::new(),
        })
    }
}

impl std::fmt::Debug for PqVectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PqVectors")
            .field("count", &self.vector_count)
            .field("compressed_dimension", &self.pq.compressed_vector_size())
            .finish_non_exhaustive()
    }
}

/// Two encoded stores are equal when their quantizers and per-ordinal codes
/// are equal; the chunking strategy is an implementation detail excluded
/// from the comparison.
impl PartialEq for PqVectors {
    fn eq(&self, other: &Self) -> bool {
        if self.pq != other.pq || self.vector_count != other.vector_count {
            return false;
        }
        (0..self.vector_count).all(|ordinal| self.code(ordinal) == other.code(ordinal))
    }
}
