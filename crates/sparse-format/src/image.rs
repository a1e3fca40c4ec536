// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device image of one or more sparse stages.
//!
//! # Layout (little endian)
//! ```text
//! u32 stage_count
//! per stage:  u32 m, k, padded_m, padded_k, nnz, padded_nnz, slope_bits
//! per stage:  padded_nnz × { u16 row, u16 col, f32 value }
//! ```
//!
//! The header is the size-vector part of a multi-stage invocation; the
//! entry stream is the concatenation of every stage's sorted entries.

use crate::{CooEntry, SparseError};

const HEADER_WORDS: usize = 7;
const ENTRY_BYTES: usize = 8;

/// Logical and padded sizes of one stage plus its negative-branch slope.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct StageDims {
    pub m: usize,
    pub k: usize,
    pub padded_m: usize,
    pub padded_k: usize,
    pub nnz: usize,
    pub padded_nnz: usize,
    /// Factor applied to negative outputs: 0 rectifies, 1 passes through.
    pub negative_slope: f32,
}

/// Concatenated stages ready to be sent to a sparse engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseImage {
    pub(crate) stages: Vec<StageDims>,
    pub(crate) rows: Vec<u16>,
    pub(crate) cols: Vec<u16>,
    pub(crate) values: Vec<f32>,
}

impl SparseImage {
    pub fn stages(&self) -> &[StageDims] {
        &self.stages
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Padded input width of the first stage.
    pub fn input_width(&self) -> usize {
        self.stages.first().map_or(0, |s| s.padded_k)
    }

    /// Padded output width of the last stage.
    pub fn output_width(&self) -> usize {
        self.stages.last().map_or(0, |s| s.padded_m)
    }

    /// Total padded nonzeros across all stages.
    pub fn total_nnz(&self) -> usize {
        self.values.len()
    }

    /// Returns the entries of stage `index` as parallel slices.
    pub fn stage_entries(&self, index: usize) -> (&[u16], &[u16], &[f32]) {
        let start: usize = self.stages[..index].iter().map(|s| s.padded_nnz).sum();
        let end = start + self.stages[index].padded_nnz;
        (
            &self.rows[start..end],
            &self.cols[start..end],
            &self.values[start..end],
        )
    }

    /// Encoded size in bytes.
    pub fn size_bytes(&self) -> usize {
        4 + self.stages.len() * HEADER_WORDS * 4 + self.values.len() * ENTRY_BYTES
    }

    /// Encodes the image for the device.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size_bytes());
        out.extend_from_slice(&(self.stages.len() as u32).to_le_bytes());
        for s in &self.stages {
            for word in [s.m, s.k, s.padded_m, s.padded_k, s.nnz, s.padded_nnz] {
                out.extend_from_slice(&(word as u32).to_le_bytes());
            }
            out.extend_from_slice(&s.negative_slope.to_bits().to_le_bytes());
        }
        for i in 0..self.values.len() {
            out.extend_from_slice(&self.rows[i].to_le_bytes());
            out.extend_from_slice(&self.cols[i].to_le_bytes());
            out.extend_from_slice(&self.values[i].to_le_bytes());
        }
        out
    }

    /// Decodes an image produced by [`SparseImage::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SparseError> {
        let mut reader = Reader { bytes, pos: 0 };
        let count = reader.u32()? as usize;
        let mut stages = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let mut w = [0usize; 6];
            for slot in &mut w {
                *slot = reader.u32()? as usize;
            }
            stages.push(StageDims {
                m: w[0],
                k: w[1],
                padded_m: w[2],
                padded_k: w[3],
                nnz: w[4],
                padded_nnz: w[5],
                negative_slope: f32::from_bits(reader.u32()?),
            });
        }

        let total: usize = stages.iter().map(|s| s.padded_nnz).sum();
        if reader.remaining() != total * ENTRY_BYTES {
            return Err(SparseError::MalformedImage(format!(
                "expected {} entry bytes, found {}",
                total * ENTRY_BYTES,
                reader.remaining()
            )));
        }
        let (mut rows, mut cols, mut values) = (
            Vec::with_capacity(total),
            Vec::with_capacity(total),
            Vec::with_capacity(total),
        );
        for _ in 0..total {
            rows.push(reader.u16()?);
            cols.push(reader.u16()?);
            values.push(f32::from_bits(reader.u32()?));
        }
        Ok(Self {
            stages,
            rows,
            cols,
            values,
        })
    }

    pub(crate) fn from_parts(stages: Vec<StageDims>, entries: impl IntoIterator<Item = CooEntry>) -> Self {
        let mut image = Self {
            stages,
            rows: Vec::new(),
            cols: Vec::new(),
            values: Vec::new(),
        };
        for e in entries {
            image.rows.push(e.row);
            image.cols.push(e.col);
            image.values.push(e.value);
        }
        image
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], SparseError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + N)
            .ok_or_else(|| SparseError::MalformedImage(format!("truncated at byte {}", self.pos)))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, SparseError> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, SparseError> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage_image() -> SparseImage {
        let dims = |m, k, nnz| StageDims {
            m,
            k,
            padded_m: 16,
            padded_k: 16,
            nnz,
            padded_nnz: 4,
            negative_slope: 0.0,
        };
        let entries = (0..8).map(|i| CooEntry {
            row: i,
            col: i,
            value: f32::from(i) * 0.5,
        });
        SparseImage::from_parts(vec![dims(10, 12, 3), dims(5, 10, 4)], entries)
    }

    #[test]
    fn test_encode_decode() {
        let image = two_stage_image();
        let bytes = image.to_bytes();
        assert_eq!(bytes.len(), image.size_bytes());
        let back = SparseImage::from_bytes(&bytes).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn test_stage_entries() {
        let image = two_stage_image();
        let (rows, _, values) = image.stage_entries(1);
        assert_eq!(rows, &[4, 5, 6, 7]);
        assert_eq!(values[0], 2.0);
        assert_eq!(image.total_nnz(), 8);
    }

    #[test]
    fn test_truncated_image() {
        let bytes = two_stage_image().to_bytes();
        assert!(matches!(
            SparseImage::from_bytes(&bytes[..bytes.len() - 3]),
            Err(SparseError::MalformedImage(_))
        ));
        assert!(SparseImage::from_bytes(&[1, 0]).is_err());
    }
}
