// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Row-major host matrices and the tagged buffer union.

use crate::{layout, DType, Element, LayoutError};

/// An owned, row-major 2-D matrix of a single element type.
///
/// This is the host-side carrier for every operand the accelerator sees.
/// Unlike a byte buffer it is typed, so a matrix can never be read back
/// as the wrong element type.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Element> Matrix<T> {
    /// Creates a zero-filled matrix.
    ///
    /// # Examples
    /// ```
    /// use tile_core::Matrix;
    /// let m = Matrix::<i16>::zeros(2, 3);
    /// assert_eq!(m.shape(), (2, 3));
    /// assert_eq!(m.size_bytes(), 12);
    /// ```
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![T::default(); rows * cols],
        }
    }

    /// Creates a matrix from row-major data.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Result<Self, LayoutError> {
        if data.len() != rows * cols {
            return Err(LayoutError::BufferSizeMismatch {
                expected: rows * cols,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Creates a matrix by evaluating `f(row, col)` for every element.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    /// Creates a matrix with every element set to `value`.
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Returns the element at `(row, col)`.
    ///
    /// # Panics
    /// Panics if the index is out of bounds.
    pub fn get(&self, row: usize, col: usize) -> T {
        assert!(row < self.rows && col < self.cols, "index ({row}, {col}) out of bounds");
        self.data[row * self.cols + col]
    }

    /// Sets the element at `(row, col)`.
    ///
    /// # Panics
    /// Panics if the index is out of bounds.
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        assert!(row < self.rows && col < self.cols, "index ({row}, {col}) out of bounds");
        self.data[row * self.cols + col] = value;
    }

    /// Returns one row as a slice.
    pub fn row(&self, row: usize) -> &[T] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Returns the transposed matrix.
    pub fn transpose(&self) -> Self {
        Self::from_fn(self.cols, self.rows, |r, c| self.data[c * self.cols + r])
    }

    /// Applies `f` element-wise, producing a matrix of another type.
    pub fn map<U: Element>(&self, f: impl FnMut(T) -> U) -> Matrix<U> {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    /// Returns the byte footprint on the device.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * T::DTYPE.size_bytes()
    }

    /// Encodes the matrix as little-endian bytes in row-major order.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size_bytes());
        for &v in &self.data {
            v.write_le(&mut out);
        }
        out
    }

    /// Decodes a row-major little-endian byte buffer.
    pub fn from_le_bytes(rows: usize, cols: usize, bytes: &[u8]) -> Result<Self, LayoutError> {
        let width = T::DTYPE.size_bytes();
        if bytes.len() != rows * cols * width {
            return Err(LayoutError::BufferSizeMismatch {
                expected: rows * cols,
                actual: bytes.len() / width,
            });
        }
        let data = bytes.chunks_exact(width).map(T::read_le).collect();
        Ok(Self { rows, cols, data })
    }
}

// ── Tagged union ───────────────────────────────────────────────────

/// A host matrix of any supported element type.
///
/// The runtime moves buffers of mixed element types through one registry;
/// this enum is the single dispatch point instead of branching on dtype at
/// every call site.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMatrix {
    I16(Matrix<i16>),
    I32(Matrix<i32>),
    F32(Matrix<f32>),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            HostMatrix::I16($m) => $body,
            HostMatrix::I32($m) => $body,
            HostMatrix::F32($m) => $body,
        }
    };
}

macro_rules! dispatch_wrap {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            HostMatrix::I16($m) => HostMatrix::I16($body),
            HostMatrix::I32($m) => HostMatrix::I32($body),
            HostMatrix::F32($m) => HostMatrix::F32($body),
        }
    };
}

impl HostMatrix {
    /// Creates a zero-filled matrix of the given element type.
    pub fn zeros(dtype: DType, rows: usize, cols: usize) -> Self {
        match dtype {
            DType::I16 => HostMatrix::I16(Matrix::zeros(rows, cols)),
            DType::I32 => HostMatrix::I32(Matrix::zeros(rows, cols)),
            DType::F32 => HostMatrix::F32(Matrix::zeros(rows, cols)),
        }
    }

    /// Decodes little-endian bytes into a matrix of the given element type.
    pub fn from_le_bytes(
        dtype: DType,
        rows: usize,
        cols: usize,
        bytes: &[u8],
    ) -> Result<Self, LayoutError> {
        Ok(match dtype {
            DType::I16 => HostMatrix::I16(Matrix::from_le_bytes(rows, cols, bytes)?),
            DType::I32 => HostMatrix::I32(Matrix::from_le_bytes(rows, cols, bytes)?),
            DType::F32 => HostMatrix::F32(Matrix::from_le_bytes(rows, cols, bytes)?),
        })
    }

    pub fn dtype(&self) -> DType {
        match self {
            HostMatrix::I16(_) => DType::I16,
            HostMatrix::I32(_) => DType::I32,
            HostMatrix::F32(_) => DType::F32,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        dispatch!(self, m => m.shape())
    }

    pub fn size_bytes(&self) -> usize {
        dispatch!(self, m => m.size_bytes())
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        dispatch!(self, m => m.to_le_bytes())
    }

    pub fn transpose(&self) -> Self {
        dispatch_wrap!(self, m => m.transpose())
    }

    /// Zero-pads to block multiples; see [`layout::format_for_hardware`].
    pub fn format_for_hardware(&self, min_row: usize, min_col: usize) -> Result<Self, LayoutError> {
        Ok(dispatch_wrap!(self, m => layout::format_for_hardware(m, min_row, min_col)?))
    }

    /// Slices the logical block back out; see [`layout::strip_padding`].
    pub fn strip_padding(&self, rows: usize, cols: usize) -> Result<Self, LayoutError> {
        Ok(dispatch_wrap!(self, m => layout::strip_padding(m, rows, cols)?))
    }

    pub fn as_i16(&self) -> Option<&Matrix<i16>> {
        match self {
            HostMatrix::I16(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&Matrix<i32>> {
        match self {
            HostMatrix::I32(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&Matrix<f32>> {
        match self {
            HostMatrix::F32(m) => Some(m),
            _ => None,
        }
    }

    /// Converts every element to `f32` (lossy for large `i32` values).
    pub fn to_f32(&self) -> Matrix<f32> {
        match self {
            HostMatrix::I16(m) => m.map(f32::from),
            HostMatrix::I32(m) => m.map(|v| v as f32),
            HostMatrix::F32(m) => m.clone(),
        }
    }
}

impl From<Matrix<i16>> for HostMatrix {
    fn from(m: Matrix<i16>) -> Self {
        HostMatrix::I16(m)
    }
}

impl From<Matrix<i32>> for HostMatrix {
    fn from(m: Matrix<i32>) -> Self {
        HostMatrix::I32(m)
    }
}

impl From<Matrix<f32>> for HostMatrix {
    fn from(m: Matrix<f32>) -> Self {
        HostMatrix::F32(m)
    }
}
