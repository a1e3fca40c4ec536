// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the layer pipeline runtime.

use crate::PipelineState;

/// Errors that can occur while building or running a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A pipeline operation was attempted from the wrong state.
    #[error("illegal pipeline transition {from} → {to}")]
    State {
        from: PipelineState,
        to: PipelineState,
    },

    /// The model or call cannot be expressed on the selected engines.
    #[error("unsupported by the {engine} pipeline: {detail}")]
    Unsupported { engine: &'static str, detail: String },

    /// The input batch does not match the model.
    #[error("input shape mismatch: {0}")]
    InputShape(String),

    #[error("model error: {0}")]
    Model(#[from] model_ir::ModelError),

    #[error("profile error: {0}")]
    Profile(#[from] tile_core::ProfileError),

    #[error("layout error: {0}")]
    Layout(#[from] tile_core::LayoutError),

    #[error("quantization error: {0}")]
    Quant(#[from] quant_codec::QuantError),

    #[error("sparse format error: {0}")]
    Sparse(#[from] sparse_format::SparseError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] buffer_orchestrator::OrchestratorError),

    #[error("driver error: {0}")]
    Driver(#[from] buffer_orchestrator::DriverError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
