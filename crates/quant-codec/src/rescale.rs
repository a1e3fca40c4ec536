// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed-point rescale parameters.

use crate::QuantError;
use std::fmt;

/// Multiply-then-arithmetic-shift correction applied after integer
/// accumulation: `floor(x × multiplier / 2^shift)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Rescale {
    pub multiplier: i32,
    pub shift: u32,
}

impl Rescale {
    /// Leaves values unchanged. As a negative-branch rescale this is
    /// identity passthrough.
    pub const IDENTITY: Rescale = Rescale {
        multiplier: 1,
        shift: 0,
    };

    /// Maps every value to zero. As a negative-branch rescale this is plain
    /// rectification.
    pub const RECTIFY: Rescale = Rescale {
        multiplier: 0,
        shift: 0,
    };

    /// Largest shift the 64-bit reference arithmetic accepts.
    pub const MAX_SHIFT: u32 = 63;

    pub const fn new(multiplier: i32, shift: u32) -> Self {
        Self { multiplier, shift }
    }

    /// Applies the rescale with floor rounding (arithmetic right shift).
    ///
    /// The product is formed in 128 bits, so the only saturation happens
    /// when the shifted result itself leaves the `i64` range.
    pub fn apply(&self, x: i64) -> i64 {
        let shift = self.shift.min(127);
        let v = (i128::from(x) * i128::from(self.multiplier)) >> shift;
        v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    /// Floating-point analogue used by native float builds.
    pub fn apply_f32(&self, x: f32) -> f32 {
        if self.multiplier == 0 {
            return 0.0;
        }
        (f64::from(x) * f64::from(self.multiplier) / 2f64.powi(self.shift as i32)) as f32
    }

    /// The real-valued factor this rescale represents.
    pub fn as_f64(&self) -> f64 {
        f64::from(self.multiplier) / 2f64.powi(self.shift as i32)
    }

    pub fn is_identity(&self) -> bool {
        self.multiplier == 1 && self.shift == 0
    }

    pub fn validate(&self, field: &'static str) -> Result<(), QuantError> {
        if self.shift > Self::MAX_SHIFT {
            return Err(QuantError::ScalarOutOfRange {
                field,
                value: i64::from(self.shift),
                min: 0,
                max: i64::from(Self::MAX_SHIFT),
            });
        }
        Ok(())
    }
}

impl Default for Rescale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for Rescale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/2^{}", self.multiplier, self.shift)
    }
}

/// Externally calibrated scale parameters of one layer.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayerScales {
    /// Float-to-fixed factor for the weights.
    pub weight_scale: f32,
    /// Float-to-fixed factor for the bias, normally `weight_scale × input_scale`.
    pub bias_scale: f32,
    /// Post-accumulation rescale.
    pub post: Rescale,
    /// Rescale applied to negative results only.
    pub negative: Rescale,
}

impl LayerScales {
    /// Scales that leave integer-valued data untouched.
    pub fn unit() -> Self {
        Self {
            weight_scale: 1.0,
            bias_scale: 1.0,
            post: Rescale::IDENTITY,
            negative: Rescale::IDENTITY,
        }
    }

    pub fn validate(&self) -> Result<(), QuantError> {
        for (what, scale) in [("weights", self.weight_scale), ("bias", self.bias_scale)] {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(QuantError::InvalidScale { what, scale });
            }
        }
        self.post.validate("post shift")?;
        self.negative.validate("negative shift")
    }
}
