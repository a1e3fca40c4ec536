// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for sparse formatting.

/// Errors raised while formatting or chaining sparse matrices.
#[derive(Debug, thiserror::Error)]
pub enum SparseError {
    /// A dimension or nonzero count exceeds what the engine can hold.
    #[error("{what} = {value} exceeds the hardware maximum of {limit}")]
    CapacityExceeded {
        what: &'static str,
        value: usize,
        limit: usize,
    },

    /// Consecutive stages do not chain, or an operand has the wrong length.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The matrix has no nonzero entries.
    #[error("sparse matrix has no nonzero entries")]
    EmptyMatrix,

    /// A stage group was built from zero stages.
    #[error("stage group contains no stages")]
    EmptyGroup,

    /// A dimension is too large for 16-bit indices.
    #[error("{dim} = {size} does not fit 16-bit indices")]
    IndexOverflow { dim: &'static str, size: usize },

    /// A device image could not be decoded.
    #[error("malformed sparse image: {0}")]
    MalformedImage(String),

    /// The hardware profile lacks a required sparse-engine key.
    #[error("profile error: {0}")]
    Profile(#[from] tile_core::ProfileError),

    /// Padding arithmetic failed.
    #[error("layout error: {0}")]
    Layout(#[from] tile_core::LayoutError),
}
