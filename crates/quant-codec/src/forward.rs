// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reference evaluation of one dense layer, `C = A·B + X`.
//!
//! ```text
//!   A (m × k, i16) · B (k × n, i16)  ──► i64 accumulate
//!                         + X (m × n, i32 widened)
//!                         ──► post rescale ──► clip i16 ──► negative branch
//! ```
//!
//! These are the numerics the accelerator implements; the simulated
//! device and the tests both evaluate layers through here.

use crate::{codec, LayerScales, QuantError, Rescale};
use tile_core::Matrix;

fn check_operands(
    a: (usize, usize),
    b: (usize, usize),
    bias: (usize, usize),
) -> Result<(), QuantError> {
    if a.1 != b.0 {
        return Err(QuantError::ShapeMismatch {
            op: "matmul",
            lhs: a,
            rhs: b,
        });
    }
    if bias != (a.0, b.1) {
        return Err(QuantError::ShapeMismatch {
            op: "bias add",
            lhs: (a.0, b.1),
            rhs: bias,
        });
    }
    Ok(())
}

/// Fixed-point forward: i64 accumulation, widened bias, `requantize`.
pub fn dense_forward_fixed(
    a: &Matrix<i16>,
    b: &Matrix<i16>,
    bias: &Matrix<i32>,
    post: Rescale,
    negative: Rescale,
) -> Result<Matrix<i16>, QuantError> {
    check_operands(a.shape(), b.shape(), bias.shape())?;
    let (m, k) = a.shape();
    let n = b.cols();
    let (av, bv) = (a.as_slice(), b.as_slice());

    let mut acc = vec![0i64; m * n];
    for i in 0..m {
        let row = &mut acc[i * n..(i + 1) * n];
        for p in 0..k {
            let a_ip = i64::from(av[i * k + p]);
            if a_ip == 0 {
                continue;
            }
            for (j, out) in row.iter_mut().enumerate() {
                *out += a_ip * i64::from(bv[p * n + j]);
            }
        }
    }

    let xv = bias.as_slice();
    Ok(Matrix::from_fn(m, n, |i, j| {
        let idx = i * n + j;
        codec::requantize(acc[idx] + i64::from(xv[idx]), post, negative)
    }))
}

/// Native floating-point forward. Quantization is bypassed; only the
/// negative branch applies (`RECTIFY` clamps to zero).
pub fn dense_forward_float(
    a: &Matrix<f32>,
    b: &Matrix<f32>,
    bias: &Matrix<f32>,
    negative: Rescale,
) -> Result<Matrix<f32>, QuantError> {
    check_operands(a.shape(), b.shape(), bias.shape())?;
    let (m, k) = a.shape();
    let n = b.cols();
    let (av, bv) = (a.as_slice(), b.as_slice());

    let mut out = bias.clone();
    let data = out.as_mut_slice();
    for i in 0..m {
        for p in 0..k {
            let a_ip = av[i * k + p];
            for j in 0..n {
                data[i * n + j] += a_ip * bv[p * n + j];
            }
        }
    }
    if !negative.is_identity() {
        for v in data.iter_mut().filter(|v| **v < 0.0) {
            *v = negative.apply_f32(*v);
        }
    }
    Ok(out)
}

/// End-to-end fixed-point reference of one layer in model orientation.
///
/// `input` is `batch × in`, `weight` is `in × out`; returns `batch × out`.
/// The device sees the transposed problem `Wᵀ·inputᵀ`, which yields the
/// same numbers.
pub fn dense_layer_reference(
    input: &Matrix<i16>,
    weight: &Matrix<f32>,
    bias: &[f32],
    scales: &LayerScales,
) -> Result<Matrix<i16>, QuantError> {
    let qw = codec::quantize_weights(&weight.transpose(), scales.weight_scale)?;
    let qb = codec::quantize_bias(bias, scales.bias_scale)?;
    let batch = input.rows();
    if qb.len() != qw.rows() {
        return Err(QuantError::ShapeMismatch {
            op: "bias",
            lhs: qw.shape(),
            rhs: (qb.len(), 1),
        });
    }
    let bias_matrix = Matrix::from_fn(qw.rows(), batch, |r, _| qb[r]);
    let out = dense_forward_fixed(&qw, &input.transpose(), &bias_matrix, scales.post, scales.negative)?;
    Ok(out.transpose())
}
