// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! Description of a sequential fully connected network as consumed by the
//! accelerator pipeline runtime:
//!
//! - [`Activation`]: rectified or identity output.
//! - [`WeightFormat`]: whether a layer runs on the dense or sparse engines.
//! - [`LayerDef`]: one layer's float weight (`in × out`), bias and flags.
//! - [`ModelGraph`]: the ordered layers, with a **type-state pattern**
//!   (`Loaded` → `Validated`).
//!
//! # Example
//! ```
//! use model_ir::{Activation, LayerDef, ModelGraph};
//! use tile_core::Matrix;
//!
//! let fc = LayerDef::new("fc.0", 0, Matrix::filled(4, 2, 0.25), vec![0.0; 2], Activation::Rectified)?;
//! let graph = ModelGraph::new("tiny", vec![fc]).validate()?;
//! assert_eq!(graph.output_dim(), 2);
//! println!("{}", graph.summary());
//! # Ok::<(), model_ir::ModelError>(())
//! ```

mod error;
pub mod graph;
mod layer;

pub use error::ModelError;
pub use graph::ModelGraph;
pub use layer::{Activation, LayerDef, WeightFormat};
