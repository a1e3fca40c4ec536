// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for layout arithmetic and hardware profiles.

use crate::{DType, Engine};

/// Errors raised by padding, stripping and host-matrix construction.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    /// A block constant of zero cannot be used as a padding multiple.
    #[error("invalid block size {block} for {dim}")]
    InvalidBlock { dim: &'static str, block: usize },

    /// The provided buffer does not match the element count of the shape.
    #[error("buffer size mismatch: expected {expected} elements, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// The requested logical block is larger than the padded source.
    #[error("cannot strip {rows}x{cols} from a {src_rows}x{src_cols} matrix")]
    StripOutOfBounds {
        rows: usize,
        cols: usize,
        src_rows: usize,
        src_cols: usize,
    },

    /// Two host matrices of different element types were combined.
    #[error("dtype mismatch in {op}: expected {expected}, got {actual}")]
    DTypeMismatch {
        op: &'static str,
        expected: DType,
        actual: DType,
    },
}

/// Configuration errors raised by [`crate::HardwareProfile`].
///
/// Parsing only rejects tokens that are not `KEY=VALUE`; missing or
/// malformed values surface lazily from the typed accessors.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// The profile file could not be read.
    #[error("cannot read profile '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A whitespace-separated token has no `=` separator or an empty key.
    #[error("malformed profile token '{token}': expected KEY=VALUE")]
    MalformedToken { token: String },

    /// A required key is absent.
    #[error("profile key '{key}' is missing")]
    MissingKey { key: String },

    /// A key is present but its value cannot be interpreted.
    #[error("profile key '{key}' has invalid value '{value}': {detail}")]
    InvalidValue {
        key: String,
        value: String,
        detail: String,
    },

    /// The requested engine is not part of the active accelerator build.
    #[error("engine '{engine}' is not enabled in this accelerator build")]
    EngineNotEnabled { engine: Engine },
}
