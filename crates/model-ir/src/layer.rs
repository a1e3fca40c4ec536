// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer descriptors for fully connected networks.
//!
//! Each [`LayerDef`] owns its float weight (`in × out`) and bias. The
//! runtime decides how a layer is laid out on the device from its
//! [`WeightFormat`]; the [`Activation`] becomes either a fused negative
//! rescale (dense engines) or a stage slope (sparse engines).

use crate::ModelError;
use tile_core::Matrix;

/// Activation applied to a layer's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Negative values are clamped to zero.
    Rectified,
    /// Output passes through unchanged.
    Identity,
}

impl Activation {
    /// Parses an activation name, accepting the usual aliases
    /// (`"relu"`, `"linear"`, `"none"`).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "relu" | "rectified" | "rectifier" => Some(Self::Rectified),
            "identity" | "linear" | "none" | "" => Some(Self::Identity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rectified => "rectified",
            Self::Identity => "identity",
        }
    }

    /// Factor applied to negative outputs: 0 for rectified, 1 for identity.
    pub fn negative_slope(&self) -> f32 {
        match self {
            Self::Rectified => 0.0,
            Self::Identity => 1.0,
        }
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a layer's weight is stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightFormat {
    /// Padded dense tiles for the GEMM / FCN engines.
    #[default]
    Dense,
    /// Coordinate entries for the sparse engines.
    Sparse,
}

impl WeightFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Sparse => "sparse",
        }
    }
}

impl std::fmt::Display for WeightFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fully connected layer: `y = act(x · W + b)`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LayerDef {
    /// Display name (e.g., `"fc.0"`).
    pub name: String,
    /// Position in execution order (0-based).
    pub index: usize,
    /// Weight laid out `in × out`.
    pub weight: Matrix<f32>,
    /// One bias value per output.
    pub bias: Vec<f32>,
    pub activation: Activation,
    pub format: WeightFormat,
}

impl LayerDef {
    /// Creates a dense layer, checking that `bias` matches the output width.
    pub fn new(
        name: impl Into<String>,
        index: usize,
        weight: Matrix<f32>,
        bias: Vec<f32>,
        activation: Activation,
    ) -> Result<Self, ModelError> {
        let layer = Self {
            name: name.into(),
            index,
            weight,
            bias,
            activation,
            format: WeightFormat::Dense,
        };
        layer.check()?;
        Ok(layer)
    }

    /// Marks the weight for the sparse engines.
    pub fn sparse(mut self) -> Self {
        self.format = WeightFormat::Sparse;
        self
    }

    pub fn in_dim(&self) -> usize {
        self.weight.rows()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.cols()
    }

    /// Number of nonzero weight entries.
    pub fn nnz(&self) -> usize {
        self.weight.as_slice().iter().filter(|v| **v != 0.0).count()
    }

    /// Fraction of nonzero weights in `[0, 1]`.
    pub fn density(&self) -> f64 {
        let total = self.weight.as_slice().len();
        if total == 0 {
            0.0
        } else {
            self.nnz() as f64 / total as f64
        }
    }

    /// Host footprint of weight and bias as `f32`.
    pub fn weight_bytes(&self) -> usize {
        self.weight.size_bytes() + self.bias.len() * std::mem::size_of::<f32>()
    }

    pub(crate) fn check(&self) -> Result<(), ModelError> {
        if self.in_dim() == 0 || self.out_dim() == 0 {
            return Err(self.invalid(format!(
                "weight has a zero dimension ({} × {})",
                self.in_dim(),
                self.out_dim()
            )));
        }
        if self.bias.len() != self.out_dim() {
            return Err(self.invalid(format!(
                "bias has {} values, layer has {} outputs",
                self.bias.len(),
                self.out_dim()
            )));
        }
        Ok(())
    }

    fn invalid(&self, detail: String) -> ModelError {
        ModelError::InvalidLayer {
            layer: self.name.clone(),
            detail,
        }
    }

    /// Returns a concise summary string for display.
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} {}→{} ({}, {}) density {:.1}%",
            self.index,
            self.name,
            self.in_dim(),
            self.out_dim(),
            self.activation,
            self.format,
            self.density() * 100.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layer(index: usize) -> LayerDef {
        let weight = Matrix::from_vec(3, 2, vec![1.0, 0.0, 0.0, 2.0, 0.0, 0.0]).unwrap();
        LayerDef::new(format!("fc.{index}"), index, weight, vec![0.5, -0.5], Activation::Rectified)
            .unwrap()
    }

    #[test]
    fn test_dims_and_nnz() {
        let layer = sample_layer(0);
        assert_eq!((layer.in_dim(), layer.out_dim()), (3, 2));
        assert_eq!(layer.nnz(), 2);
        assert!((layer.density() - 2.0 / 6.0).abs() < 1e-9);
        assert_eq!(layer.weight_bytes(), (6 + 2) * 4);
    }

    #[test]
    fn test_bias_mismatch() {
        let weight = Matrix::<f32>::zeros(4, 3);
        let err = LayerDef::new("fc", 0, weight, vec![0.0; 4], Activation::Identity).unwrap_err();
        assert!(matches!(err, ModelError::InvalidLayer { ref layer, .. } if layer == "fc"));
    }

    #[test]
    fn test_zero_dimension() {
        let weight = Matrix::<f32>::zeros(0, 3);
        assert!(LayerDef::new("fc", 0, weight, vec![0.0; 3], Activation::Identity).is_err());
    }

    #[test]
    fn test_activation_from_str() {
        assert_eq!(Activation::from_str_loose("ReLU"), Some(Activation::Rectified));
        assert_eq!(Activation::from_str_loose("linear"), Some(Activation::Identity));
        assert_eq!(Activation::from_str_loose("none"), Some(Activation::Identity));
        assert_eq!(Activation::from_str_loose("tanh"), None);
    }

    #[test]
    fn test_negative_slope() {
        assert_eq!(Activation::Rectified.negative_slope(), 0.0);
        assert_eq!(Activation::Identity.negative_slope(), 1.0);
    }

    #[test]
    fn test_sparse_marker() {
        let layer = sample_layer(1).sparse();
        assert_eq!(layer.format, WeightFormat::Sparse);
        let s = layer.summary();
        assert!(s.contains("[1]"));
        assert!(s.contains("3→2"));
        assert!(s.contains("rectified"));
        assert!(s.contains("sparse"));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&sample_layer(0)).unwrap();
        assert!(json.contains("\"activation\":\"rectified\""));
        assert!(json.contains("\"format\":\"dense\""));
        let back: Activation = serde_json::from_str("\"identity\"").unwrap();
        assert_eq!(back, Activation::Identity);
    }
}
