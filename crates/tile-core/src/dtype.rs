// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element data types understood by the accelerator.

use std::fmt;

/// Enumerates the numeric types a device buffer can hold.
///
/// The accelerator datapath is fixed: dense engines consume 16-bit
/// operands with 32-bit bias in fixed-point builds, or `f32` everywhere
/// in floating-point builds. Sparse engines always stream `f32` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DType {
    /// 16-bit signed fixed point (weights, activations).
    I16,
    /// 32-bit signed fixed point (bias, wide accumulators).
    I32,
    /// 32-bit IEEE 754 floating point.
    F32,
}

impl DType {
    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::I16 => 2,
            DType::I32 => 4,
            DType::F32 => 4,
        }
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::F32 => "f32",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar that can live in a [`crate::Matrix`] and cross the device
/// boundary as little-endian bytes.
///
/// Implemented for exactly the three element types in [`DType`].
pub trait Element:
    Copy + Default + PartialEq + PartialOrd + fmt::Debug + Send + Sync + 'static + private::Sealed
{
    /// The runtime tag for this element type.
    const DTYPE: DType;

    /// Appends the little-endian encoding of `self` to `out`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decodes one element from exactly `DTYPE.size_bytes()` bytes.
    fn read_le(bytes: &[u8]) -> Self;

    /// Lossless widening used by comparison diagnostics.
    fn to_f64(self) -> f64;
}

mod private {
    pub trait Sealed {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for f32 {}
}

impl Element for i16 {
    const DTYPE: DType = DType::I16;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_roundtrip() {
        for dtype in [DType::I16, DType::I32, DType::F32] {
            let json = serde_json::to_string(&dtype).unwrap();
            assert_eq!(serde_json::from_str::<DType>(&json).unwrap(), dtype);
        }
    }

    #[test]
    fn test_size_bytes() {
        assert_eq!(DType::I16.size_bytes(), 2);
        assert_eq!(DType::I32.size_bytes(), 4);
        assert_eq!(DType::F32.size_bytes(), 4);
    }

    #[test]
    fn test_element_le_encoding() {
        let mut out = Vec::new();
        (-2i16).write_le(&mut out);
        assert_eq!(out, vec![0xfe, 0xff]);
        assert_eq!(i16::read_le(&out), -2);

        let mut out = Vec::new();
        1.5f32.write_le(&mut out);
        assert_eq!(f32::read_le(&out), 1.5);
    }

    #[test]
    fn test_dtype_tags() {
        assert_eq!(<i16 as Element>::DTYPE, DType::I16);
        assert_eq!(<i32 as Element>::DTYPE, DType::I32);
        assert_eq!(<f32 as Element>::DTYPE, DType::F32);
        assert_eq!(DType::I32.to_string(), "i32");
    }
}
