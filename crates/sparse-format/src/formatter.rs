// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Turns a dense float matrix into an engine-ready sparse buffer.
//!
//! ```text
//!  weight (in × out) ──transpose──▶ A (m × k)
//!        │
//!        ├─ 1. extract nonzeros
//!        ├─ 2. capacity check (logical m, k, nnz)
//!        ├─ 3. pad nnz with (0, 0, 0.0)
//!        ├─ 4. stable sort by (col, row)
//!        └─ 5. pad (m, k) to the engine's block multiple
//! ```

use crate::coo::{extract_nonzeros, pad_nnz, sort_column_major, CooEntry};
use crate::image::{SparseImage, StageDims};
use crate::SparseError;
use tile_core::layout::round_up;
use tile_core::{HardwareProfile, Matrix};

/// Sparse engine a buffer is formatted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SparseEngine {
    /// Single matrix-vector engine with square padding.
    Spmv,
    /// Multi-stage engine with independent row/column padding.
    Uspmv,
}

impl SparseEngine {
    pub fn as_str(self) -> &'static str {
        match self {
            SparseEngine::Spmv => "spmv",
            SparseEngine::Uspmv => "uspmv",
        }
    }
}

impl std::fmt::Display for SparseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block constants and hardware maxima for one sparse engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseFormatter {
    engine: SparseEngine,
    min_m: usize,
    granularity: usize,
    max_m: usize,
    max_k: Option<usize>,
    max_nnz: Option<usize>,
    square_floor: usize,
}

impl SparseFormatter {
    pub fn for_spmv(profile: &HardwareProfile) -> Result<Self, SparseError> {
        let b = profile.spmv_blocks()?;
        Ok(Self {
            engine: SparseEngine::Spmv,
            min_m: b.min_m,
            granularity: b.nnz_granularity,
            max_m: b.capacity_c,
            max_k: Some(b.capacity_b),
            max_nnz: None,
            square_floor: 0,
        })
    }

    pub fn for_uspmv(profile: &HardwareProfile) -> Result<Self, SparseError> {
        let b = profile.uspmv_blocks()?;
        Ok(Self {
            engine: SparseEngine::Uspmv,
            min_m: b.min_m,
            granularity: b.nnz_granularity,
            max_m: b.max_m,
            max_k: None,
            max_nnz: Some(b.max_nnz),
            square_floor: 0,
        })
    }

    /// Raises the minimum square side used by the spmv engine so that
    /// every layer of a network shares one padded size.
    pub fn with_square_floor(mut self, floor: usize) -> Self {
        self.square_floor = floor;
        self
    }

    pub fn engine(&self) -> SparseEngine {
        self.engine
    }

    pub fn min_m(&self) -> usize {
        self.min_m
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }

    pub fn max_m(&self) -> usize {
        self.max_m
    }

    /// Rejects shapes the engine cannot hold. Uses logical sizes.
    pub fn check_capacity(&self, m: usize, k: usize, nnz: usize) -> Result<(), SparseError> {
        if nnz == 0 {
            return Err(SparseError::EmptyMatrix);
        }
        if m > self.max_m {
            return Err(SparseError::CapacityExceeded {
                what: "m",
                value: m,
                limit: self.max_m,
            });
        }
        if let Some(limit) = self.max_k.filter(|&limit| k > limit) {
            return Err(SparseError::CapacityExceeded {
                what: "k",
                value: k,
                limit,
            });
        }
        if let Some(limit) = self.max_nnz.filter(|&limit| nnz > limit) {
            return Err(SparseError::CapacityExceeded {
                what: "nnz",
                value: nnz,
                limit,
            });
        }
        Ok(())
    }

    /// Padded `(m, k)` for the engine.
    pub fn pad_dims(&self, m: usize, k: usize) -> Result<(usize, usize), SparseError> {
        match self.engine {
            SparseEngine::Uspmv => Ok((
                round_up(m, self.min_m, "m")?,
                round_up(k, self.min_m, "k")?,
            )),
            SparseEngine::Spmv => {
                let side = round_up(m.max(k).max(self.square_floor), self.min_m, "m")?;
                Ok((side, side))
            }
        }
    }

    /// Formats an `m × k` matrix whose rows are outputs.
    pub fn format(
        &self,
        matrix: &Matrix<f32>,
        negative_slope: f32,
    ) -> Result<SparseMatrixBuffer, SparseError> {
        let (m, k) = matrix.shape();
        let mut entries = extract_nonzeros(matrix)?;
        let nnz = entries.len();
        self.check_capacity(m, k, nnz)?;

        pad_nnz(&mut entries, self.granularity);
        sort_column_major(&mut entries);
        let (padded_m, padded_k) = self.pad_dims(m, k)?;

        tracing::debug!(
            engine = %self.engine,
            m, k, nnz,
            padded_nnz = entries.len(),
            padded_m, padded_k,
            "Formatted sparse matrix"
        );

        Ok(SparseMatrixBuffer::from_entries(
            StageDims {
                m,
                k,
                padded_m,
                padded_k,
                nnz,
                padded_nnz: entries.len(),
                negative_slope,
            },
            &entries,
        ))
    }

    /// Formats a layer weight stored `in × out`.
    pub fn format_weight(
        &self,
        weight: &Matrix<f32>,
        negative_slope: f32,
    ) -> Result<SparseMatrixBuffer, SparseError> {
        self.format(&weight.transpose(), negative_slope)
    }
}

/// A formatted sparse matrix: parallel index/value arrays sorted by
/// `(col, row)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrixBuffer {
    dims: StageDims,
    rows: Vec<u16>,
    cols: Vec<u16>,
    values: Vec<f32>,
}

impl SparseMatrixBuffer {
    fn from_entries(dims: StageDims, entries: &[CooEntry]) -> Self {
        Self {
            dims,
            rows: entries.iter().map(|e| e.row).collect(),
            cols: entries.iter().map(|e| e.col).collect(),
            values: entries.iter().map(|e| e.value).collect(),
        }
    }

    pub fn dims(&self) -> &StageDims {
        &self.dims
    }

    /// Logical `(m, k)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.dims.m, self.dims.k)
    }

    pub fn padded_shape(&self) -> (usize, usize) {
        (self.dims.padded_m, self.dims.padded_k)
    }

    pub fn nnz(&self) -> usize {
        self.dims.nnz
    }

    pub fn padded_nnz(&self) -> usize {
        self.values.len()
    }

    pub fn negative_slope(&self) -> f32 {
        self.dims.negative_slope
    }

    pub fn rows(&self) -> &[u16] {
        &self.rows
    }

    pub fn cols(&self) -> &[u16] {
        &self.cols
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn entries(&self) -> impl Iterator<Item = CooEntry> + '_ {
        (0..self.values.len()).map(move |i| CooEntry {
            row: self.rows[i],
            col: self.cols[i],
            value: self.values[i],
        })
    }

    /// Single-stage device image.
    pub fn to_image(&self) -> SparseImage {
        SparseImage::from_parts(vec![self.dims], self.entries())
    }
}
