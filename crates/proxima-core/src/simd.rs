//! Vectorized kernel facade.
//!
//! Public surface for every distance and assembly kernel in the crate. The
//! dense float kernels go through the [`crate::simd_dispatch`] tier selected
//! at startup. The byte-indexed assembly kernels (the PQ hot paths) use
//! multi-accumulator unrolling: gathering through an 8-bit index vector does
//! not map onto the portable lane set, and narrow-SIMD gathers benchmarked
//! worse than scalar, so the unrolled scalar gather is the canonical
//! implementation.
//!
//! All kernels are total functions on validated lengths. Binary operators
//! require equal lengths and panic otherwise; callers that cannot guarantee
//! this must pre-check and surface [`crate::Error::DimensionMismatch`]
//! themselves.

use crate::error::{Error, Result};
use crate::similarity::VectorSimilarity;
use crate::simd_dispatch;

/// Computes the dot product of two equal-length vectors.
///
/// # Panics
///
/// Panics if the vectors have different lengths.
#[inline]
#[must_use]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    simd_dispatch::dot_product_fn()(a, b)
}

/// Computes the dot product over subranges of two vectors.
///
/// # Panics
///
/// Panics if either range is out of bounds.
#[inline]
#[must_use]
pub fn dot_product_range(
    a: &[f32],
    a_offset: usize,
    b: &[f32],
    b_offset: usize,
    length: usize,
) -> f32 {
    simd_dispatch::dot_product_fn()(
        &a[a_offset..a_offset + length],
        &b[b_offset..b_offset + length],
    )
}

/// Computes the squared L2 distance between two equal-length vectors.
///
/// # Panics
///
/// Panics if the vectors have different lengths.
#[inline]
#[must_use]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    simd_dispatch::squared_l2_fn()(a, b)
}

/// Computes the squared L2 distance over subranges of two vectors.
///
/// # Panics
///
/// Panics if either range is out of bounds.
#[inline]
#[must_use]
pub fn squared_l2_range(
    a: &[f32],
    a_offset: usize,
    b: &[f32],
    b_offset: usize,
    length: usize,
) -> f32 {
    simd_dispatch::squared_l2_fn()(
        &a[a_offset..a_offset + length],
        &b[b_offset..b_offset + length],
    )
}

/// Computes cosine similarity of two equal-length vectors.
///
/// Undefined for zero-magnitude input; the kernel returns 0.0 in that case
/// and callers must guard degenerate vectors themselves.
///
/// # Panics
///
/// Panics if the vectors have different lengths.
#[inline]
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    simd_dispatch::cosine_fn()(a, b)
}

/// Computes cosine similarity over subranges of two vectors.
///
/// # Panics
///
/// Panics if either range is out of bounds.
#[inline]
#[must_use]
pub fn cosine_range(a: &[f32], a_offset: usize, b: &[f32], b_offset: usize, length: usize) -> f32 {
    simd_dispatch::cosine_fn()(
        &a[a_offset..a_offset + length],
        &b[b_offset..b_offset + length],
    )
}

/// Sums the elements of a vector. Returns 0.0 for empty input.
#[inline]
#[must_use]
pub fn sum(v: &[f32]) -> f32 {
    simd_dispatch::sum_fn()(v)
}

/// Returns the minimum element of a non-empty vector.
///
/// # Panics
///
/// Panics if the vector is empty.
#[inline]
#[must_use]
pub fn min(v: &[f32]) -> f32 {
    crate::simd_explicit::min_simd(v)
}

/// Returns the maximum element of a non-empty vector.
///
/// # Panics
///
/// Panics if the vector is empty.
#[inline]
#[must_use]
pub fn max(v: &[f32]) -> f32 {
    crate::simd_explicit::max_simd(v)
}

/// Adds `b` into `a` elementwise.
///
/// # Panics
///
/// Panics if the vectors have different lengths.
#[inline]
pub fn add_in_place(a: &mut [f32], b: &[f32]) {
    crate::simd_explicit::add_in_place_simd(a, b);
}

/// Subtracts `b` from `a` elementwise, in place.
///
/// # Panics
///
/// Panics if the vectors have different lengths.
#[inline]
pub fn sub_in_place(a: &mut [f32], b: &[f32]) {
    crate::simd_explicit::sub_in_place_simd(a, b);
}

/// Multiplies every element of `v` by `multiplier`, in place.
#[inline]
pub fn scale(v: &mut [f32], multiplier: f32) {
    crate::simd_explicit::scale_simd(v, multiplier);
}

/// Replaces each element of `a` with `min(a[i], b[i])`.
///
/// # Panics
///
/// Panics if the vectors have different lengths.
#[inline]
pub fn min_in_place(a: &mut [f32], b: &[f32]) {
    crate::simd_explicit::min_in_place_simd(a, b);
}

/// Returns `a - b` as a freshly allocated vector.
///
/// # Panics
///
/// Panics if the vectors have different lengths.
#[must_use]
pub fn sub(a: &[f32], b: &[f32]) -> Vec<f32> {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    a.iter().zip(b.iter()).map(|(x, y)| x - y).collect()
}

/// Assembles and sums partial values selected by byte offsets.
///
/// Returns `sum(data[stride * i + offsets[i]])` over `i in 0..offsets.len()`.
/// This is the asymmetric-distance hot path: `data` is a per-subspace table
/// with `stride` entries per subspace and `offsets` is an encoded vector.
///
/// # Panics
///
/// Panics if any selected index is out of bounds for `data`.
#[must_use]
pub fn assemble_and_sum(data: &[f32], stride: usize, offsets: &[u8]) -> f32 {
    // Four independent accumulators keep the gather loads pipelined.
    let mut sum0 = 0.0f32;
    let mut sum1 = 0.0f32;
    let mut sum2 = 0.0f32;
    let mut sum3 = 0.0f32;

    let chunks = offsets.len() / 4;
    for i in 0..chunks {
        let base = i * 4;
        sum0 += data[stride * base + offsets[base] as usize];
        sum1 += data[stride * (base + 1) + offsets[base + 1] as usize];
        sum2 += data[stride * (base + 2) + offsets[base + 2] as usize];
        sum3 += data[stride * (base + 3) + offsets[base + 3] as usize];
    }

    for i in chunks * 4..offsets.len() {
        sum0 += data[stride * i + offsets[i] as usize];
    }

    sum0 + sum1 + sum2 + sum3
}

/// Assembles and sums symmetric partial values for two encoded vectors.
///
/// `partials` holds, per subspace, a triangular block of `K*(K+1)/2` entries
/// covering every unordered centroid pair `(r, c)` with `r <= c`, laid out
/// row-major: `tri(r, c) = r*K - r*(r-1)/2 + (c - r)`. Returns the sum of
/// the selected entry per subspace. This is the symmetric-distance hot path
/// used by the diversity predicate over encoded codes.
///
/// # Panics
///
/// Panics if the code slices are shorter than `subspace_count` or a selected
/// index is out of bounds for `partials`.
#[must_use]
pub fn assemble_and_sum_pq(
    partials: &[f32],
    subspace_count: usize,
    code1: &[u8],
    code2: &[u8],
    cluster_count: usize,
) -> f32 {
    let block_size = cluster_count * (cluster_count + 1) / 2;

    let mut sum0 = 0.0f32;
    let mut sum1 = 0.0f32;

    let chunks = subspace_count / 2;
    for i in 0..chunks {
        let base = i * 2;
        sum0 += partials[base * block_size + triangular_index(code1[base], code2[base], cluster_count)];
        sum1 += partials[(base + 1) * block_size
            + triangular_index(code1[base + 1], code2[base + 1], cluster_count)];
    }

    for i in chunks * 2..subspace_count {
        sum0 += partials[i * block_size + triangular_index(code1[i], code2[i], cluster_count)];
    }

    sum0 + sum1
}

/// Index of the unordered pair `(c1, c2)` within a triangular block.
#[inline]
pub(crate) fn triangular_index(c1: u8, c2: u8, cluster_count: usize) -> usize {
    let r = c1.min(c2) as usize;
    let c = c1.max(c2) as usize;
    r * cluster_count - r * (r.saturating_sub(1)) / 2 + (c - r)
}

/// Computes the Hamming distance over bit-packed 64-bit words.
///
/// # Panics
///
/// Panics if the slices have different lengths.
#[must_use]
pub fn hamming_distance(a: &[u64], b: &[u64]) -> u32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Quantizes partial-sum tables to little-endian u16 values.
///
/// For each subspace `i` with base `bases[i]`, every partial is mapped
/// through `(value - base) / delta`, saturated into `[0, 65535]`, and stored
/// as a little-endian u16 at byte offset `2 * (i * block + j)`.
///
/// # Panics
///
/// Panics if `partials.len()` is not a multiple of `bases.len()`, or if
/// `quantized` is shorter than `2 * partials.len()` bytes.
pub fn quantize_partials(delta: f32, partials: &[f32], bases: &[f32], quantized: &mut [u8]) {
    assert!(
        partials.len() % bases.len() == 0,
        "partials length must be a multiple of the subspace count"
    );
    let block = partials.len() / bases.len();

    for (i, &base) in bases.iter().enumerate() {
        for j in 0..block {
            let value = partials[i * block + j];
            let scaled = ((value - base) / delta).clamp(0.0, 65535.0) as u16;
            let at = 2 * (i * block + j);
            quantized[at..at + 2].copy_from_slice(&scaled.to_le_bytes());
        }
    }
}

/// Computes cosine similarity between a query and a PQ-encoded vector.
///
/// `partial_sums[m*K + j]` holds `dot(query_m, centroid_m_j)` and
/// `a_magnitudes[m*K + j]` holds `|centroid_m_j|^2`; `b_magnitude` is the
/// squared magnitude of the query. The encoded vector selects one entry per
/// subspace from both tables.
///
/// # Panics
///
/// Panics if a selected index is out of bounds for either table.
#[must_use]
pub fn pq_decoded_cosine_similarity(
    code: &[u8],
    cluster_count: usize,
    partial_sums: &[f32],
    a_magnitudes: &[f32],
    b_magnitude: f32,
) -> f32 {
    let mut sum = 0.0f32;
    let mut a_mag = 0.0f32;

    for (m, &byte) in code.iter().enumerate() {
        let index = m * cluster_count + byte as usize;
        sum += partial_sums[index];
        a_mag += a_magnitudes[index];
    }

    sum / (a_mag * b_magnitude).sqrt()
}

/// Fills one subspace's slice of an asymmetric partial-sum table.
///
/// For each of the `cluster_count` centroids in `codebook` (row-major,
/// `size` floats each), writes `sim(centroid, query[query_offset..])` into
/// `partial_sums[codebook_index * cluster_count + i]` where `sim` is the raw
/// dot product or squared L2 distance.
///
/// # Errors
///
/// Returns [`Error::Unsupported`] for [`VectorSimilarity::Cosine`]; the
/// cosine path uses its dedicated decoder with per-subspace magnitudes.
#[allow(clippy::too_many_arguments)]
pub fn calculate_partial_sums(
    codebook: &[f32],
    codebook_index: usize,
    size: usize,
    cluster_count: usize,
    query: &[f32],
    query_offset: usize,
    similarity: VectorSimilarity,
    partial_sums: &mut [f32],
) -> Result<()> {
    let base = codebook_index * cluster_count;
    match similarity {
        VectorSimilarity::DotProduct => {
            for i in 0..cluster_count {
                partial_sums[base + i] =
                    dot_product_range(codebook, i * size, query, query_offset, size);
            }
        }
        VectorSimilarity::Euclidean => {
            for i in 0..cluster_count {
                partial_sums[base + i] =
                    squared_l2_range(codebook, i * size, query, query_offset, size);
            }
        }
        VectorSimilarity::Cosine => {
            return Err(Error::Unsupported(
                "cosine similarity is not supported for calculate_partial_sums".into(),
            ));
        }
    }
    Ok(())
}

/// Like [`calculate_partial_sums`], additionally recording the best partial.
///
/// The best value for the subspace (maximum for dot product, minimum for
/// Euclidean) is written to `partial_best[codebook_index]`; it seeds the
/// base of the quantized-partials encoding.
///
/// # Errors
///
/// Returns [`Error::Unsupported`] for [`VectorSimilarity::Cosine`].
#[allow(clippy::too_many_arguments)]
pub fn calculate_partial_sums_with_best(
    codebook: &[f32],
    codebook_index: usize,
    size: usize,
    cluster_count: usize,
    query: &[f32],
    query_offset: usize,
    similarity: VectorSimilarity,
    partial_sums: &mut [f32],
    partial_best: &mut [f32],
) -> Result<()> {
    let base = codebook_index * cluster_count;
    match similarity {
        VectorSimilarity::DotProduct => {
            let mut best = -f32::MAX;
            for i in 0..cluster_count {
                let value = dot_product_range(codebook, i * size, query, query_offset, size);
                partial_sums[base + i] = value;
                best = best.max(value);
            }
            partial_best[codebook_index] = best;
        }
        VectorSimilarity::Euclidean => {
            let mut best = f32::MAX;
            for i in 0..cluster_count {
                let value = squared_l2_range(codebook, i * size, query, query_offset, size);
                partial_sums[base + i] = value;
                best = best.min(value);
            }
            partial_best[codebook_index] = best;
        }
        VectorSimilarity::Cosine => {
            return Err(Error::Unsupported(
                "cosine similarity is not supported for calculate_partial_sums".into(),
            ));
        }
    }
    Ok(())
}
