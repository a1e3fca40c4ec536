// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Float ↔ fixed-point conversion.
//!
//! Rounding is half-to-even, and every cast saturates at the bounds of
//! the target type instead of wrapping.

use crate::{QuantError, Rescale};
use tile_core::Matrix;

fn check_scale(what: &'static str, scale: f32) -> Result<(), QuantError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(QuantError::InvalidScale { what, scale })
    }
}

/// Quantizes one value: `round(x × scale)` saturated to `i16`.
pub fn quantize_i16(x: f32, scale: f32) -> i16 {
    (f64::from(x) * f64::from(scale)).round_ties_even() as i16
}

/// Quantizes one value: `round(x × scale)` saturated to `i32`.
pub fn quantize_i32(x: f32, scale: f32) -> i32 {
    (f64::from(x) * f64::from(scale)).round_ties_even() as i32
}

/// Number of values whose `x × scale` falls outside the `i16` range.
pub fn saturated_count(values: &[f32], scale: f32) -> usize {
    let (lo, hi) = (f64::from(i16::MIN) - 0.5, f64::from(i16::MAX) + 0.5);
    values
        .iter()
        .filter(|&&x| {
            let v = f64::from(x) * f64::from(scale);
            v < lo || v >= hi
        })
        .count()
}

/// Quantizes a weight matrix to 16-bit fixed point.
pub fn quantize_weights(weights: &Matrix<f32>, scale: f32) -> Result<Matrix<i16>, QuantError> {
    check_scale("weights", scale)?;
    let clipped = saturated_count(weights.as_slice(), scale);
    if clipped > 0 {
        tracing::warn!(
            clipped,
            total = weights.as_slice().len(),
            scale,
            "Weights saturate at 16 bits"
        );
    }
    Ok(weights.map(|w| quantize_i16(w, scale)))
}

/// Quantizes a bias vector to 32-bit fixed point.
pub fn quantize_bias(bias: &[f32], scale: f32) -> Result<Vec<i32>, QuantError> {
    check_scale("bias", scale)?;
    Ok(bias.iter().map(|&b| quantize_i32(b, scale)).collect())
}

/// Quantizes an activation batch to 16-bit fixed point.
pub fn quantize_input(input: &Matrix<f32>, scale: f32) -> Result<Matrix<i16>, QuantError> {
    check_scale("input", scale)?;
    let clipped = saturated_count(input.as_slice(), scale);
    if clipped > 0 {
        tracing::debug!(clipped, scale, "Input saturates at 16 bits");
    }
    Ok(input.map(|x| quantize_i16(x, scale)))
}

/// Converts fixed-point values back to float: `q / scale`.
pub fn dequantize(values: &Matrix<i16>, scale: f32) -> Result<Matrix<f32>, QuantError> {
    check_scale("dequantize", scale)?;
    Ok(values.map(|q| (f64::from(q) / f64::from(scale)) as f32))
}

/// Saturating narrow from the 64-bit domain.
pub fn saturate_i16(x: i64) -> i16 {
    x.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
}

/// Turns a widened accumulator into a 16-bit output.
///
/// `post` is applied first and the result is clipped to `i16`. A negative
/// result then goes through `negative` and is clipped again.
pub fn requantize(acc: i64, post: Rescale, negative: Rescale) -> i16 {
    let out = saturate_i16(post.apply(acc));
    if out < 0 {
        saturate_i16(negative.apply(i64::from(out)))
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_half_even() {
        assert_eq!(quantize_i16(0.5, 1.0), 0);
        assert_eq!(quantize_i16(1.5, 1.0), 2);
        assert_eq!(quantize_i16(2.5, 1.0), 2);
        assert_eq!(quantize_i16(-2.5, 1.0), -2);
        assert_eq!(quantize_i16(0.26, 10.0), 3);
    }

    #[test]
    fn test_saturation() {
        assert_eq!(quantize_i16(1.0e6, 1.0), i16::MAX);
        assert_eq!(quantize_i16(-1.0e6, 1.0), i16::MIN);
        assert_eq!(quantize_i32(1.0e12, 1.0), i32::MAX);
        assert_eq!(saturate_i16(40_000), i16::MAX);
        assert_eq!(saturate_i16(-40_000), i16::MIN);
    }

    #[test]
    fn test_saturated_count() {
        let values = [0.0, 100.0, 327.67, 327.68, -327.68, -327.7, f32::INFINITY];
        // 32768.0 clips; -32768.0 is in range.
        assert_eq!(saturated_count(&values, 100.0), 3);
        assert_eq!(saturated_count(&values[..3], 100.0), 0);

        let m = Matrix::from_vec(1, 3, vec![1.0, 400.0, -400.0]).unwrap();
        let q = quantize_weights(&m, 100.0).unwrap();
        assert_eq!(q.as_slice(), &[100, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_invalid_scale() {
        let m = Matrix::<f32>::zeros(1, 1);
        assert!(quantize_weights(&m, 0.0).is_err());
        assert!(quantize_bias(&[1.0], f32::NAN).is_err());
        assert!(quantize_input(&m, -1.0).is_err());
    }

    #[test]
    fn test_quantize_bias_scale() {
        let q = quantize_bias(&[0.25, -1.0, 3.0], 1024.0).unwrap();
        assert_eq!(q, vec![256, -1024, 3072]);
    }

    #[test]
    fn test_requantize_branches() {
        // Positive values only see the post rescale.
        assert_eq!(requantize(100, Rescale::new(1, 1), Rescale::RECTIFY), 50);
        // Rectified.
        assert_eq!(requantize(-100, Rescale::new(1, 1), Rescale::RECTIFY), 0);
        // Identity passthrough.
        assert_eq!(requantize(-100, Rescale::new(1, 1), Rescale::IDENTITY), -50);
        // Leaky branch: -50 * 3 / 8 = -18.75 -> -19.
        assert_eq!(requantize(-100, Rescale::new(1, 1), Rescale::new(3, 3)), -19);
        // Clipped before the negative branch.
        assert_eq!(requantize(-1_000_000, Rescale::IDENTITY, Rescale::new(1, 1)), -16384);
    }

    proptest! {
        #[test]
        fn prop_quantize_error_bound(x in -100.0f32..100.0, scale in 1.0f32..300.0) {
            let q = quantize_i16(x, scale);
            let back = f64::from(q) / f64::from(scale);
            let bound = 0.5 / f64::from(scale) + 1e-9;
            prop_assert!((back - f64::from(x)).abs() <= bound);
        }
    }
}
