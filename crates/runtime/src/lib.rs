// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Runs a sequential fully-connected network on one accelerator kernel.
//!
//! The runtime takes:
//! - A validated `ModelGraph` from `model-ir`.
//! - Per-layer `LayerScales` from `quant-codec` (fixed-point builds only).
//! - A `KernelContext` from `buffer-orchestrator`.
//!
//! Weights are padded, quantized or sparse-formatted once and kept resident.
//! Each `predict` call sizes activation buffers for the batch, emits one
//! instruction per layer (or per stage group), executes and fetches the
//! trimmed result.
//!
//! # Pipeline States
//! ```text
//! Idle ─▶ BuffersAllocated ─▶ InstructionsLoaded ─▶ Executing ─▶ ResultsReady
//!  ▲                                  ▲                 │             │
//!  │                                  └─────────────────┘             │
//!  └──────────────────────────────────────────────────────────────────┘
//! ```
//! The loop between `InstructionsLoaded` and `Executing` covers programs
//! longer than the instruction queue and per-row spmv passes.

mod config;
mod dense;
mod error;
mod metrics;
mod pipeline;
mod sparse;
mod state;

pub use config::RuntimeConfig;
pub use dense::DensePipeline;
pub use error::RuntimeError;
pub use metrics::PredictMetrics;
pub use pipeline::{LayerPipelineRuntime, PipelineOptions, Prediction};
pub use sparse::SparsePipeline;
pub use state::PipelineState;
