// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for layer descriptors and graph validation.

/// Errors raised while building or validating a model description.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A layer definition is invalid (e.g., bias length does not match).
    #[error("invalid layer '{layer}': {detail}")]
    InvalidLayer { layer: String, detail: String },

    /// The layer sequence is empty or does not chain.
    #[error("invalid model graph: {0}")]
    InvalidGraph(String),
}
