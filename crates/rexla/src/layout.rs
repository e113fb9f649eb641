//! Physical array layouts.
//!
//! A layout lists the logical dimensions of an array from the fastest varying
//! (most minor) to the slowest varying (most major). `[1, 0]` is row-major for
//! a matrix, `[0, 1]` column-major. Literals and device buffers store their
//! elements in layout order; all arithmetic works on the logical order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{XlaError, XlaResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layout {
    minor_to_major: Vec<usize>,
}

impl Layout {
    /// Wraps a minor-to-major order without validating it; see [`Layout::validate`].
    pub fn new(minor_to_major: impl Into<Vec<usize>>) -> Self {
        Self {
            minor_to_major: minor_to_major.into(),
        }
    }

    /// Default layout: the last logical dimension is the most minor.
    pub fn row_major(rank: usize) -> Self {
        Self::new((0..rank).rev().collect::<Vec<_>>())
    }

    pub fn col_major(rank: usize) -> Self {
        Self::new((0..rank).collect::<Vec<_>>())
    }

    pub fn minor_to_major(&self) -> &[usize] {
        &self.minor_to_major
    }

    pub fn rank(&self) -> usize {
        self.minor_to_major.len()
    }

    pub fn is_row_major(&self) -> bool {
        *self == Layout::row_major(self.rank())
    }

    /// Checks that the layout is a permutation of `0..rank`.
    pub fn validate(&self, rank: usize) -> XlaResult<()> {
        if self.minor_to_major.len() != rank {
            return Err(XlaError::InvalidLayout(format!(
                "layout {self} has {} entries but the array has rank {rank}",
                self.minor_to_major.len()
            )));
        }
        let mut seen = vec![false; rank];
        for &dim in &self.minor_to_major {
            if dim >= rank || seen[dim] {
                return Err(XlaError::InvalidLayout(format!(
                    "layout {self} is not a permutation of the dimensions of a rank-{rank} array"
                )));
            }
            seen[dim] = true;
        }
        Ok(())
    }

    /// Per-dimension strides, in elements, indexed by logical dimension.
    pub fn strides(&self, dims: &[usize]) -> Vec<usize> {
        let mut strides = vec![0; dims.len()];
        let mut stride = 1usize;
        for &dim in &self.minor_to_major {
            strides[dim] = stride;
            stride = stride.saturating_mul(dims[dim]);
        }
        strides
    }

    /// Maps a logical multi-index to its offset in physical storage.
    pub fn linear_index(&self, dims: &[usize], index: &[usize]) -> usize {
        self.strides(dims)
            .iter()
            .zip(index)
            .map(|(stride, idx)| stride * idx)
            .sum()
    }

    /// Physical offset of every element, enumerated in logical row-major order.
    ///
    /// `offsets[i]` is where the `i`-th row-major element lives under this layout.
    pub fn physical_offsets(&self, dims: &[usize]) -> Vec<usize> {
        let count: usize = dims.iter().product();
        if count == 0 {
            return Vec::new();
        }
        let strides = self.strides(dims);
        let mut offsets = Vec::with_capacity(count);
        let mut index = vec![0usize; dims.len()];
        for _ in 0..count {
            offsets.push(strides.iter().zip(&index).map(|(s, i)| s * i).sum());
            for axis in (0..dims.len()).rev() {
                index[axis] += 1;
                if index[axis] < dims[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        offsets
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .minor_to_major
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{{{dims}}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_and_col_major() {
        assert_eq!(Layout::row_major(3).minor_to_major(), &[2, 1, 0]);
        assert_eq!(Layout::col_major(2).minor_to_major(), &[0, 1]);
        assert!(Layout::row_major(0).is_row_major());
        assert_eq!(Layout::col_major(2).to_string(), "{0,1}");
    }

    #[test]
    fn validate_rejects_non_permutations() {
        assert!(Layout::new([0, 1]).validate(2).is_ok());
        assert!(Layout::new([0, 0]).validate(2).is_err());
        assert!(Layout::new([0, 2]).validate(2).is_err());
        assert!(Layout::new([0, 1, 2, 3]).validate(2).is_err());
    }

    #[test]
    fn col_major_offsets_transpose_a_matrix() {
        // Logical [[a, b, c], [d, e, f]] stored column-major is a d b e c f.
        let offsets = Layout::col_major(2).physical_offsets(&[2, 3]);
        assert_eq!(offsets, vec![0, 2, 4, 1, 3, 5]);
        assert_eq!(Layout::col_major(2).linear_index(&[2, 3], &[1, 2]), 5);
        assert_eq!(Layout::row_major(2).linear_index(&[2, 3], &[1, 2]), 5);
        assert_eq!(Layout::row_major(2).linear_index(&[2, 3], &[1, 0]), 3);
    }

    #[test]
    fn zero_element_arrays_have_no_offsets() {
        assert!(Layout::row_major(1).physical_offsets(&[0]).is_empty());
        assert_eq!(Layout::row_major(0).physical_offsets(&[]), vec![0]);
    }
}
