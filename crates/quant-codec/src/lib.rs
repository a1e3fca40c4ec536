// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # quant-codec
//!
//! Float-to-fixed-point conversion and post-accumulation rescaling for
//! a 16-bit accelerator datapath.
//!
//! - [`LayerScales`] / [`Rescale`]: externally calibrated per-layer
//!   parameters.
//! - [`codec`]: quantize / dequantize / requantize with saturation.
//! - [`forward`]: reference evaluation of a dense layer in fixed and
//!   native float modes.
//! - [`pack`]: bit packing of rescale parameters into instruction fields.
//! - [`scale_table`]: nearest `mantissa·2^-shift` lookup for calibration.
//!
//! # Example
//! ```
//! use quant_codec::{codec, Rescale};
//!
//! let q = codec::quantize_i16(0.75, 256.0);
//! assert_eq!(q, 192);
//! assert_eq!(codec::requantize(-40, Rescale::new(1, 2), Rescale::RECTIFY), 0);
//! ```

pub mod codec;
mod error;
pub mod forward;
pub mod pack;
mod rescale;
pub mod scale_table;

pub use codec::{dequantize, quantize_bias, quantize_input, quantize_weights, requantize};
pub use error::QuantError;
pub use forward::{dense_forward_fixed, dense_forward_float, dense_layer_reference};
pub use rescale::{LayerScales, Rescale};
