//! Random-access vector sources.
//!
//! The core never owns the dataset it indexes; it reads vectors by ordinal
//! through [`VectorSource`] and never mutates them. The in-memory
//! implementation here backs tests, benchmarks and small indexes; file- or
//! network-backed sources implement the same trait outside the core.

use crate::error::{Error, Result};

/// Random-access read-only view over a set of fixed-dimension vectors.
pub trait VectorSource: Send + Sync {
    /// Number of ordinals, present or not.
    fn size(&self) -> usize;

    /// Dimension of every vector.
    fn dimension(&self) -> usize;

    /// Returns the vector at `ordinal`, or `None` for an absent ordinal.
    ///
    /// Absent ordinals are legal: parallel encoding zero-fills them and the
    /// graph builder skips them.
    fn vector(&self, ordinal: usize) -> Option<&[f32]>;
}

/// An in-memory, densely-populated [`VectorSource`] over a flat arena.
#[derive(Debug, Clone)]
pub struct DenseVectorSource {
    data: Vec<f32>,
    dimension: usize,
}

impl DenseVectorSource {
    /// Creates an empty source with the given dimension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `dimension` is zero.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidArgument("dimension must be positive".into()));
        }
        Ok(Self {
            data: Vec::new(),
            dimension,
        })
    }

    /// Builds a source from individual rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if any row has the wrong length.
    pub fn from_rows(rows: &[Vec<f32>], dimension: usize) -> Result<Self> {
        let mut source = Self::new(dimension)?;
        for row in rows {
            source.push(row)?;
        }
        Ok(source)
    }

    /// Appends a vector, returning its ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the vector has the wrong length.
    pub fn push(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let ordinal = self.data.len() / self.dimension;
        self.data.extend_from_slice(vector);
        Ok(ordinal)
    }
}

impl VectorSource for DenseVectorSource {
    fn size(&self) -> usize {
        self.data.len() / self.dimension
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal * self.dimension;
        self.data.get(start..start + self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read() {
        let mut source = DenseVectorSource::new(2).unwrap();
        assert_eq!(source.push(&[1.0, 2.0]).unwrap(), 0);
        assert_eq!(source.push(&[3.0, 4.0]).unwrap(), 1);

        assert_eq!(source.size(), 2);
        assert_eq!(source.vector(1), Some(&[3.0, 4.0][..]));
        assert_eq!(source.vector(2), None);
    }

    #[test]
    fn test_dimension_checks() {
        assert!(DenseVectorSource::new(0).is_err());

        let mut source = DenseVectorSource::new(3).unwrap();
        let err = source.push(&[1.0]).unwrap_err();
        assert_eq!(err.code(), "PROX-002");
    }

    #[test]
    fn test_from_rows() {
        let rows = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let source = DenseVectorSource::from_rows(&rows, 2).unwrap();
        assert_eq!(source.size(), 2);
        assert_eq!(source.vector(0), Some(&[1.0, 0.0][..]));
    }
}
