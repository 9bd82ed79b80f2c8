//! Error types for Proxima.
//!
//! This module provides a unified error type for all Proxima operations.
//! Error codes follow the pattern `PROX-XXX` for easy debugging.

use thiserror::Error;

/// Result type alias for Proxima operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Proxima operations.
///
/// The core recovers nothing locally; every failure surfaces synchronously
/// to the caller. Tolerated construction states (backlinks skipped at
/// capacity, temporary degree overflow) are not errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument (PROX-001).
    #[error("[PROX-001] Invalid argument: {0}")]
    InvalidArgument(String),

    /// Vector dimension mismatch (PROX-002).
    #[error("[PROX-002] Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Ordinal outside the current bounds (PROX-003).
    #[error("[PROX-003] Ordinal {ordinal} out of bounds for size {bound}")]
    OrdinalOutOfBounds {
        /// The offending ordinal.
        ordinal: usize,
        /// The exclusive upper bound at the time of the access.
        bound: usize,
    },

    /// Invariant violation (PROX-004).
    ///
    /// Indicates a programming error, e.g. saving a graph with pending
    /// mutations or feeding unsorted candidates to the diversity predicate.
    #[error("[PROX-004] Invariant violation: {0}")]
    InvariantViolation(String),

    /// Operation not supported by the selected code path (PROX-005).
    #[error("[PROX-005] Unsupported: {0}")]
    Unsupported(String),

    /// Unrecognized magic number in a persisted container (PROX-006).
    #[error("[PROX-006] Unsupported magic number: {0:#010x}")]
    BadMagic(u32),

    /// Unrecognized version in a persisted container (PROX-007).
    #[error("[PROX-007] Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// IO error (PROX-008).
    #[error("[PROX-008] IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the error code (e.g., "PROX-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "PROX-001",
            Self::DimensionMismatch { .. } => "PROX-002",
            Self::OrdinalOutOfBounds { .. } => "PROX-003",
            Self::InvariantViolation(_) => "PROX-004",
            Self::Unsupported(_) => "PROX-005",
            Self::BadMagic(_) => "PROX-006",
            Self::UnsupportedVersion(_) => "PROX-007",
            Self::Io(_) => "PROX-008",
        }
    }
}
