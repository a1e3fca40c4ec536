// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tile-core
//!
//! Host-side matrices and the layout rules of a fixed-function
//! linear-algebra accelerator.
//!
//! This crate provides:
//! - [`Matrix`]: a typed, row-major host matrix.
//! - [`HostMatrix`]: the tagged union over the three device element types.
//! - [`DType`] / [`Element`]: the element types the datapath supports.
//! - [`HardwareProfile`]: the key/value block constants of one build, with
//!   derived [`DenseBlocks`], [`SpmvBlocks`] and [`UspmvBlocks`].
//! - [`layout`]: block-multiple padding and its inverse.
//! - [`verify`]: result comparison and deterministic test vectors.
//!
//! # Design Goals
//! - Every padded dimension is an exact multiple of its block constant.
//! - Profile keys are read lazily; a missing key fails at first use.
//! - Clean error types via `thiserror`.

mod dtype;
mod error;
pub mod layout;
mod matrix;
pub mod profile;
pub mod verify;

pub use dtype::{DType, Element};
pub use error::{LayoutError, ProfileError};
pub use layout::{format_for_hardware, padded_shape, strip_padding, PaddedMatrix};
pub use matrix::{HostMatrix, Matrix};
pub use profile::{
    DenseBlocks, Engine, HardwareProfile, NumericMode, SpmvBlocks, UspmvBlocks,
    INSTRUCTION_BYTES, INSTRUCTION_CAPACITY, PAGE_SIZE,
};
pub use verify::{compare_exact, compare_within_tolerance, fill_mod, Comparison, Tolerance};
