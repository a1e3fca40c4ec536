// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for quantization and reference evaluation.

/// Errors that can occur while quantizing or evaluating a layer.
#[derive(Debug, thiserror::Error)]
pub enum QuantError {
    /// Operand shapes are incompatible for the requested operation.
    #[error("incompatible shapes for {op}: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: (usize, usize),
        rhs: (usize, usize),
    },

    /// A scale factor is zero, negative or not finite.
    #[error("invalid scale {scale} for {what}")]
    InvalidScale { what: &'static str, scale: f32 },

    /// A rescale field does not fit its instruction encoding.
    #[error("{field} = {value} is outside the encodable range [{min}, {max}]")]
    ScalarOutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
}
