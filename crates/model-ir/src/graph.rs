// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model graph: a sequential chain of fully connected layers.
//!
//! # Type-State Pattern
//!
//! ```text
//! ModelGraph<Loaded>     layers collected, not yet checked.
//!       │  .validate()
//!       ▼
//! ModelGraph<Validated>  widths chain, ready for the pipeline runtime.
//! ```
//!
//! The runtime only accepts `ModelGraph<Validated>`, so a pipeline is
//! never built over layers whose widths disagree.

use crate::{LayerDef, ModelError, WeightFormat};
use std::fmt;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: graph has been assembled but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph has been validated.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for graph states.
pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

// ── ModelGraph ─────────────────────────────────────────────────────

/// An ordered sequence of layers; `S` encodes the validation state.
#[derive(Debug, Clone)]
pub struct ModelGraph<S: GraphState = Loaded> {
    pub name: String,
    pub layers: Vec<LayerDef>,
    _state: std::marker::PhantomData<S>,
}

// ── Loaded state ───────────────────────────────────────────────────

impl ModelGraph<Loaded> {
    pub fn new(name: impl Into<String>, layers: Vec<LayerDef>) -> Self {
        Self {
            name: name.into(),
            layers,
            _state: std::marker::PhantomData,
        }
    }

    /// Validates the graph and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - The graph is non-empty.
    /// - Layer indices are consecutive starting from 0.
    /// - Every layer has nonzero widths and a bias per output.
    /// - Each layer's output width equals the next layer's input width.
    pub fn validate(self) -> Result<ModelGraph<Validated>, ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::InvalidGraph(
                "model graph contains no layers".into(),
            ));
        }

        for (i, layer) in self.layers.iter().enumerate() {
            if layer.index != i {
                return Err(ModelError::InvalidLayer {
                    layer: layer.name.clone(),
                    detail: format!("expected index {i}, got {}", layer.index),
                });
            }
            layer.check()?;
        }

        for pair in self.layers.windows(2) {
            let (current, next) = (&pair[0], &pair[1]);
            if current.out_dim() != next.in_dim() {
                return Err(ModelError::InvalidGraph(format!(
                    "'{}' produces {} values but '{}' expects {}",
                    current.name,
                    current.out_dim(),
                    next.name,
                    next.in_dim()
                )));
            }
        }

        tracing::debug!(
            model = %self.name,
            layers = self.layers.len(),
            "Model graph validated"
        );

        Ok(ModelGraph {
            name: self.name,
            layers: self.layers,
            _state: std::marker::PhantomData,
        })
    }
}

// ── Validated state ────────────────────────────────────────────────

impl ModelGraph<Validated> {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Width of the network input.
    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, LayerDef::in_dim)
    }

    /// Width of the network output.
    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, LayerDef::out_dim)
    }

    /// Largest input or output width across all layers.
    pub fn max_dim(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.in_dim().max(l.out_dim()))
            .max()
            .unwrap_or(0)
    }

    pub fn total_weight_bytes(&self) -> usize {
        self.layers.iter().map(LayerDef::weight_bytes).sum()
    }

    /// Whether every layer is stored sparse.
    pub fn is_sparse(&self) -> bool {
        self.layers.iter().all(|l| l.format == WeightFormat::Sparse)
    }

    pub fn iter_layers(&self) -> impl Iterator<Item = &LayerDef> {
        self.layers.iter()
    }

    pub fn layer(&self, index: usize) -> Option<&LayerDef> {
        self.layers.get(index)
    }

    pub fn summary(&self) -> String {
        let widths: Vec<String> = std::iter::once(self.input_dim())
            .chain(self.layers.iter().map(LayerDef::out_dim))
            .map(|d| d.to_string())
            .collect();
        format!(
            "Model '{}': {} layers ({}), {:.1} KB weights",
            self.name,
            self.num_layers(),
            widths.join("→"),
            self.total_weight_bytes() as f64 / 1024.0,
        )
    }
}

// ── Shared implementations ─────────────────────────────────────────

impl<S: GraphState> fmt::Display for ModelGraph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ModelGraph '{}' ({} layers):", self.name, self.layers.len())?;
        for layer in &self.layers {
            writeln!(f, "  {}", layer.summary())?;
        }
        Ok(())
    }
}
