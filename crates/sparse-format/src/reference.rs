// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! CPU reference multiplies over formatted sparse data.
//!
//! Outputs are padded-width vectors; the tail past the logical `m` stays
//! zero because padding entries are inert.

use crate::formatter::SparseMatrixBuffer;
use crate::image::SparseImage;
use crate::SparseError;
use tile_core::Matrix;

/// Scales negative values by `negative_slope` (0 rectifies, 1 passes).
pub fn apply_activation(values: &mut [f32], negative_slope: f32) {
    for v in values.iter_mut().filter(|v| **v < 0.0) {
        *v *= negative_slope;
    }
}

/// Accumulates `y[row] += value · x[col]` over parallel entry arrays.
pub fn multiply(
    rows: &[u16],
    cols: &[u16],
    values: &[f32],
    x: &[f32],
    out_len: usize,
) -> Result<Vec<f32>, SparseError> {
    let mut y = vec![0.0f32; out_len];
    for ((&r, &c), &v) in rows.iter().zip(cols).zip(values) {
        let (r, c) = (usize::from(r), usize::from(c));
        if r >= out_len || c >= x.len() {
            return Err(SparseError::ShapeMismatch(format!(
                "entry ({r}, {c}) outside {out_len} × {}",
                x.len()
            )));
        }
        y[r] += v * x[c];
    }
    Ok(y)
}

/// `y = act(A · x)` for one formatted matrix; `y` has the padded row count.
pub fn spmv(buffer: &SparseMatrixBuffer, x: &[f32]) -> Result<Vec<f32>, SparseError> {
    let (_, k) = buffer.shape();
    if x.len() < k {
        return Err(SparseError::ShapeMismatch(format!(
            "vector has {} elements, matrix expects {k}",
            x.len()
        )));
    }
    let mut y = multiply(
        buffer.rows(),
        buffer.cols(),
        buffer.values(),
        x,
        buffer.padded_shape().0,
    )?;
    apply_activation(&mut y, buffer.negative_slope());
    Ok(y)
}

/// Runs every row of `input` through all stages of `image`.
///
/// Returns a `runs × padded_m_last` matrix.
pub fn stage_chain(image: &SparseImage, input: &Matrix<f32>) -> Result<Matrix<f32>, SparseError> {
    let first = image.stages().first().ok_or(SparseError::EmptyGroup)?;
    if input.cols() < first.k {
        return Err(SparseError::ShapeMismatch(format!(
            "input has {} columns, first stage expects {}",
            input.cols(),
            first.k
        )));
    }

    let out_width = image.output_width();
    let mut out = Vec::with_capacity(input.rows() * out_width);
    for run in 0..input.rows() {
        let mut x = input.row(run).to_vec();
        for (i, stage) in image.stages().iter().enumerate() {
            let (rows, cols, values) = image.stage_entries(i);
            x = multiply(rows, cols, values, &x, stage.padded_m)?;
            apply_activation(&mut x, stage.negative_slope);
        }
        out.extend_from_slice(&x);
    }
    Ok(Matrix::from_vec(input.rows(), out_width, out)?)
}
