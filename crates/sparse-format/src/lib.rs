// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # sparse-format
//!
//! Coordinate-list formatting for the accelerator's sparse engines.
//!
//! - [`SparseFormatter`]: block constants and maxima of the single-vector
//!   (`spmv`) or multi-stage (`uspmv`) engine, and the formatting pipeline.
//! - [`SparseMatrixBuffer`]: padded, `(col, row)`-sorted index/value arrays.
//! - [`StageGroup`]: a validated chain of stages in one [`SparseImage`].
//! - [`reference`]: CPU multiplies over formatted data.
//!
//! Padding entries are `(0, 0, 0.0)` and never change an accumulation.

pub mod coo;
mod error;
mod formatter;
mod image;
pub mod reference;
mod stage;

pub use coo::{CooEntry, MAX_INDEXED_DIM};
pub use error::SparseError;
pub use formatter::{SparseEngine, SparseFormatter, SparseMatrixBuffer};
pub use image::{SparseImage, StageDims};
pub use stage::StageGroup;
