// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Block-granularity padding.
//!
//! The accelerator reads operands in fixed-size blocks, so every dense
//! dimension must be an exact multiple of its block constant:
//!
//! ```text
//!   logical (rows × cols)            padded (R × C)
//!   ┌─────────┐                      ┌─────────┬───┐
//!   │  data   │   format_for_hw ──►  │  data   │ 0 │
//!   └─────────┘                      ├─────────┘   │
//!                ◄── strip_padding   │      0      │
//!                                    └─────────────┘
//! ```
//!
//! Zero padding never perturbs the logical block of a product `A·B + X`
//! as long as the bias padding is zero as well.

use crate::{HostMatrix, LayoutError, Matrix};
use crate::dtype::Element;

/// Rounds `value` up to the next multiple of `block`.
///
/// # Examples
/// ```
/// use tile_core::layout::round_up;
/// assert_eq!(round_up(100, 32, "rows").unwrap(), 128);
/// assert_eq!(round_up(128, 32, "rows").unwrap(), 128);
/// ```
pub fn round_up(value: usize, block: usize, dim: &'static str) -> Result<usize, LayoutError> {
    if block == 0 {
        return Err(LayoutError::InvalidBlock { dim, block });
    }
    Ok(value.div_ceil(block) * block)
}

/// Greatest common divisor.
pub fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple; `lcm(0, x) == 0`.
pub fn lcm(a: usize, b: usize) -> usize {
    if a == 0 || b == 0 {
        return 0;
    }
    a / gcd(a, b) * b
}

/// Rounds each dimension independently up to its block multiple.
///
/// Idempotent: padding an already padded shape returns it unchanged.
pub fn padded_shape(
    rows: usize,
    cols: usize,
    min_row: usize,
    min_col: usize,
) -> Result<(usize, usize), LayoutError> {
    Ok((
        round_up(rows, min_row, "rows")?,
        round_up(cols, min_col, "cols")?,
    ))
}

/// Returns a zero-filled copy of `matrix` padded to block multiples, with
/// the original in the top-left block.
pub fn format_for_hardware<T: Element>(
    matrix: &Matrix<T>,
    min_row: usize,
    min_col: usize,
) -> Result<Matrix<T>, LayoutError> {
    let (rows, cols) = matrix.shape();
    let (padded_rows, padded_cols) = padded_shape(rows, cols, min_row, min_col)?;
    if (padded_rows, padded_cols) == (rows, cols) {
        return Ok(matrix.clone());
    }

    let mut out = Matrix::zeros(padded_rows, padded_cols);
    let dst = out.as_mut_slice();
    for r in 0..rows {
        dst[r * padded_cols..r * padded_cols + cols].copy_from_slice(matrix.row(r));
    }
    Ok(out)
}

/// Slices the top-left `rows × cols` block out of a padded matrix.
pub fn strip_padding<T: Element>(
    matrix: &Matrix<T>,
    rows: usize,
    cols: usize,
) -> Result<Matrix<T>, LayoutError> {
    let (src_rows, src_cols) = matrix.shape();
    if rows > src_rows || cols > src_cols {
        return Err(LayoutError::StripOutOfBounds {
            rows,
            cols,
            src_rows,
            src_cols,
        });
    }
    if (rows, cols) == (src_rows, src_cols) {
        return Ok(matrix.clone());
    }

    let mut data = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        data.extend_from_slice(&matrix.row(r)[..cols]);
    }
    Matrix::from_vec(rows, cols, data)
}

// ── PaddedMatrix ───────────────────────────────────────────────────

/// A hardware-formatted host matrix that remembers its logical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedMatrix {
    host: HostMatrix,
    logical: (usize, usize),
}

impl PaddedMatrix {
    /// Pads `host` to block multiples.
    pub fn new(host: &HostMatrix, min_row: usize, min_col: usize) -> Result<Self, LayoutError> {
        Ok(Self {
            logical: host.shape(),
            host: host.format_for_hardware(min_row, min_col)?,
        })
    }

    pub fn logical_shape(&self) -> (usize, usize) {
        self.logical
    }

    pub fn padded_shape(&self) -> (usize, usize) {
        self.host.shape()
    }

    pub fn host(&self) -> &HostMatrix {
        &self.host
    }

    pub fn into_host(self) -> HostMatrix {
        self.host
    }

    /// Returns the logical block without padding.
    pub fn strip(&self) -> Result<HostMatrix, LayoutError> {
        self.host.strip_padding(self.logical.0, self.logical.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 16, "rows").unwrap(), 0);
        assert_eq!(round_up(1, 16, "rows").unwrap(), 16);
        assert_eq!(round_up(33, 16, "rows").unwrap(), 48);
        assert!(matches!(
            round_up(5, 0, "cols"),
            Err(LayoutError::InvalidBlock { dim: "cols", block: 0 })
        ));
    }

    #[test]
    fn test_lcm() {
        assert_eq!(lcm(64, 32), 64);
        assert_eq!(lcm(48, 32), 96);
        assert_eq!(lcm(16, 16), 16);
        assert_eq!(lcm(0, 16), 0);
    }

    #[test]
    fn test_already_aligned_is_unchanged() {
        let m = Matrix::<i16>::filled(32, 16, 3);
        let padded = format_for_hardware(&m, 32, 16).unwrap();
        assert_eq!(padded, m);
    }

    #[test]
    fn test_format_places_data_top_left() {
        let m = Matrix::from_vec(2, 3, vec![1i32, 2, 3, 4, 5, 6]).unwrap();
        let padded = format_for_hardware(&m, 4, 4).unwrap();
        assert_eq!(padded.shape(), (4, 4));
        assert_eq!(padded.row(0), &[1, 2, 3, 0]);
        assert_eq!(padded.row(1), &[4, 5, 6, 0]);
        assert!(padded.row(2).iter().chain(padded.row(3)).all(|&v| v == 0));
    }

    #[test]
    fn test_strip_out_of_bounds() {
        let m = Matrix::<f32>::zeros(4, 4);
        assert!(strip_padding(&m, 5, 4).is_err());
    }

    #[test]
    fn test_padded_matrix() {
        let host = HostMatrix::from(Matrix::<f32>::filled(3, 7, 1.5));
        let padded = PaddedMatrix::new(&host, 16, 8).unwrap();
        assert_eq!(padded.logical_shape(), (3, 7));
        assert_eq!(padded.padded_shape(), (16, 8));
        assert_eq!(padded.strip().unwrap(), host);
    }

    proptest! {
        #[test]
        fn prop_padding_is_idempotent(
            rows in 0usize..500,
            cols in 0usize..500,
            min_row in 1usize..64,
            min_col in 1usize..64,
        ) {
            let once = padded_shape(rows, cols, min_row, min_col).unwrap();
            let twice = padded_shape(once.0, once.1, min_row, min_col).unwrap();
            prop_assert_eq!(once, twice);
            prop_assert_eq!(once.0 % min_row, 0);
            prop_assert_eq!(once.1 % min_col, 0);
            prop_assert!(once.0 >= rows && once.0 < rows + min_row);
            prop_assert!(once.1 >= cols && once.1 < cols + min_col);
        }

        #[test]
        fn prop_pad_strip_roundtrip(
            rows in 1usize..40,
            cols in 1usize..40,
            min_row in 1usize..24,
            min_col in 1usize..24,
            seed in any::<i16>(),
        ) {
            let m = Matrix::from_fn(rows, cols, |r, c| {
                seed.wrapping_add((r * 31 + c * 7) as i16)
            });
            let padded = format_for_hardware(&m, min_row, min_col).unwrap();
            let back = strip_padding(&padded, rows, cols).unwrap();
            prop_assert_eq!(back, m);
        }
    }
}
