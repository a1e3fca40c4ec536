// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Coordinate-list entries and the three formatting primitives.

use crate::SparseError;
use tile_core::Matrix;

/// Largest dimension addressable with 16-bit indices.
pub const MAX_INDEXED_DIM: usize = 1 << 16;

/// One nonzero (or padding) entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooEntry {
    pub row: u16,
    pub col: u16,
    pub value: f32,
}

impl CooEntry {
    /// The inert padding entry: value 0 at (0, 0).
    pub const PADDING: CooEntry = CooEntry {
        row: 0,
        col: 0,
        value: 0.0,
    };
}

/// Extracts the nonzero entries of `matrix` in row-major order.
pub fn extract_nonzeros(matrix: &Matrix<f32>) -> Result<Vec<CooEntry>, SparseError> {
    let (rows, cols) = matrix.shape();
    if rows > MAX_INDEXED_DIM {
        return Err(SparseError::IndexOverflow { dim: "rows", size: rows });
    }
    if cols > MAX_INDEXED_DIM {
        return Err(SparseError::IndexOverflow { dim: "cols", size: cols });
    }

    let mut entries = Vec::new();
    for r in 0..rows {
        for (c, &value) in matrix.row(r).iter().enumerate() {
            if value != 0.0 {
                entries.push(CooEntry {
                    row: r as u16,
                    col: c as u16,
                    value,
                });
            }
        }
    }
    Ok(entries)
}

/// Appends padding entries until the count is a multiple of `granularity`.
pub fn pad_nnz(entries: &mut Vec<CooEntry>, granularity: usize) {
    if granularity == 0 {
        return;
    }
    let padded = entries.len().div_ceil(granularity) * granularity;
    entries.resize(padded, CooEntry::PADDING);
}

/// Stable sort by `(col, row)`.
pub fn sort_column_major(entries: &mut [CooEntry]) {
    entries.sort_by_key(|e| (e.col, e.row));
}

/// Whether entries are non-decreasing in `(col, row)`.
pub fn is_column_major(entries: &[CooEntry]) -> bool {
    entries
        .windows(2)
        .all(|w| (w[0].col, w[0].row) <= (w[1].col, w[1].row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract() {
        let m = Matrix::from_vec(2, 3, vec![0.0, 1.5, 0.0, -2.0, 0.0, 3.0]).unwrap();
        let e = extract_nonzeros(&m).unwrap();
        assert_eq!(e.len(), 3);
        assert_eq!(e[0], CooEntry { row: 0, col: 1, value: 1.5 });
        assert_eq!(e[2], CooEntry { row: 1, col: 2, value: 3.0 });
    }

    #[test]
    fn test_pad_nnz() {
        let mut e = vec![CooEntry { row: 3, col: 4, value: 1.0 }; 5];
        pad_nnz(&mut e, 4);
        assert_eq!(e.len(), 8);
        assert!(e[5..].iter().all(|&p| p == CooEntry::PADDING));

        let mut aligned = vec![CooEntry::PADDING; 8];
        pad_nnz(&mut aligned, 4);
        assert_eq!(aligned.len(), 8);
    }

    #[test]
    fn test_sort_is_stable_column_major() {
        let mut e = vec![
            CooEntry { row: 1, col: 2, value: 1.0 },
            CooEntry { row: 0, col: 2, value: 2.0 },
            CooEntry { row: 5, col: 0, value: 3.0 },
            CooEntry::PADDING,
        ];
        sort_column_major(&mut e);
        assert!(is_column_major(&e));
        assert_eq!(e[0], CooEntry::PADDING);
        assert_eq!(e[1].value, 3.0);
        assert_eq!(e[2].value, 2.0);
        assert_eq!(e[3].value, 1.0);
    }

    #[test]
    fn test_index_overflow() {
        let m = Matrix::<f32>::zeros(1, MAX_INDEXED_DIM + 1);
        assert!(matches!(
            extract_nonzeros(&m),
            Err(SparseError::IndexOverflow { dim: "cols", .. })
        ));
    }
}
