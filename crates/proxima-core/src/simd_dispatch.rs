//! Kernel dispatch using `OnceLock`.
//!
//! The scalar and accelerated tiers are both total functions over validated
//! inputs; this module selects one of them once per process and hands out
//! plain function pointers so there is no per-call branching in the hot
//! loops. The scalar tier doubles as the reference implementation for the
//! kernel-equivalence tests.

use std::sync::OnceLock;

use crate::simd_explicit;

/// Function pointer type for binary `(a, b) -> f32` kernels.
pub type DistanceFn = fn(&[f32], &[f32]) -> f32;

/// Function pointer type for unary reduction kernels.
pub type ReduceFn = fn(&[f32]) -> f32;

static DOT_PRODUCT_FN: OnceLock<DistanceFn> = OnceLock::new();
static SQUARED_L2_FN: OnceLock<DistanceFn> = OnceLock::new();
static COSINE_FN: OnceLock<DistanceFn> = OnceLock::new();
static SUM_FN: OnceLock<ReduceFn> = OnceLock::new();

/// Whether the accelerated tier is usable on this target.
///
/// `wide` compiles everywhere, but on targets without any vector unit the
/// scalar tier avoids the lane-emulation overhead.
const fn accelerated_tier_available() -> bool {
    cfg!(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "wasm32"
    ))
}

fn select_dot_product() -> DistanceFn {
    if accelerated_tier_available() {
        simd_explicit::dot_product_simd
    } else {
        dot_product_scalar
    }
}

fn select_squared_l2() -> DistanceFn {
    if accelerated_tier_available() {
        simd_explicit::squared_l2_simd
    } else {
        squared_l2_scalar
    }
}

fn select_cosine() -> DistanceFn {
    if accelerated_tier_available() {
        simd_explicit::cosine_simd
    } else {
        cosine_scalar
    }
}

fn select_sum() -> ReduceFn {
    if accelerated_tier_available() {
        simd_explicit::sum_simd
    } else {
        sum_scalar
    }
}

/// Returns the dispatched dot product function.
#[inline]
pub fn dot_product_fn() -> DistanceFn {
    *DOT_PRODUCT_FN.get_or_init(select_dot_product)
}

/// Returns the dispatched squared L2 function.
#[inline]
pub fn squared_l2_fn() -> DistanceFn {
    *SQUARED_L2_FN.get_or_init(select_squared_l2)
}

/// Returns the dispatched cosine function.
#[inline]
pub fn cosine_fn() -> DistanceFn {
    *COSINE_FN.get_or_init(select_cosine)
}

/// Returns the dispatched elementwise sum function.
#[inline]
pub fn sum_fn() -> ReduceFn {
    *SUM_FN.get_or_init(select_sum)
}

// =============================================================================
// Scalar reference tier
// =============================================================================

/// Scalar dot product.
///
/// # Panics
///
/// Panics if the vectors have different lengths.
#[must_use]
pub fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scalar squared L2 distance.
///
/// # Panics
///
/// Panics if the vectors have different lengths.
#[must_use]
pub fn squared_l2_scalar(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Scalar cosine similarity. Returns 0.0 when either magnitude is zero.
///
/// # Panics
///
/// Panics if the vectors have different lengths.
#[must_use]
pub fn cosine_scalar(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut sum = 0.0f32;
    let mut a_mag = 0.0f32;
    let mut b_mag = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
        a_mag += x * x;
        b_mag += y * y;
    }

    let denom = a_mag * b_mag;
    if denom <= 0.0 {
        return 0.0;
    }
    sum / denom.sqrt()
}

/// Scalar elementwise sum. Returns 0.0 for empty input.
#[must_use]
pub fn sum_scalar(v: &[f32]) -> f32 {
    v.iter().sum()
}
