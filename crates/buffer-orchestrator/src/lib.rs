// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # buffer-orchestrator
//!
//! Device buffer registry, host↔device transfers and bounded per-kernel
//! instruction queues on top of an opaque accelerator [`Driver`].
//!
//! # Key Components
//!
//! - [`AcceleratorSession`]: explicit per-device context; hands out one
//!   [`KernelContext`] per kernel index.
//! - [`KernelContext`]: registers buffers, validates and queues
//!   instructions, executes, transfers results back.
//! - [`Driver`]: the driver boundary; [`sim::SimDevice`] implements it in
//!   software.
//! - [`instruction`]: opcodes and the 64-byte instruction encoding.
//! - [`TransferStats`]: per-context counters.
//!
//! # Ownership Model
//!
//! ```text
//! AcceleratorSession ── Arc<D: Driver> ──┐
//!        │ open_kernel(i)                │
//!        ▼                               ▼
//!  KernelContext(i) ── owns ──▶ DeviceBuffer { host copy, device addr }
//!        │
//!        │ drop()
//!        ▼
//!  buffers freed, index i released
//! ```
//!
//! Every shape, dtype, engine and scalar-range check runs when the
//! instruction is built, before anything is sent.
//!
//! # Example
//! ```
//! use buffer_orchestrator::{sim::SimDevice, AcceleratorSession, ExecMode, TransferMode};
//! use quant_codec::Rescale;
//! use tile_core::{DType, HardwareProfile, HostMatrix, Matrix};
//!
//! let profile = HardwareProfile::parse(
//!     "GEMX_ddrWidth=4 GEMX_gemmMBlocks=1 GEMX_gemmKBlocks=1 GEMX_gemmNBlocks=1 \
//!      GEMX_dataType=short GEMX_numKernels=1 GEMX_runGemm=1",
//! ).unwrap();
//! let session = AcceleratorSession::<SimDevice>::open("sim.xclbin".as_ref(), profile).unwrap();
//! let mut ctx = session.open_kernel(0).unwrap();
//!
//! let a = ctx.register(Matrix::<i16>::filled(4, 4, 1).into()).unwrap();
//! let c = ctx.register(HostMatrix::zeros(DType::I16, 4, 4)).unwrap();
//! let x = ctx.register(HostMatrix::zeros(DType::I32, 4, 4)).unwrap();
//! ctx.send(a, TransferMode::Sync).unwrap();
//! ctx.add_dense_linear(a, a, c, x, Rescale::IDENTITY).unwrap();
//! ctx.execute(ExecMode::Sync).unwrap();
//! ctx.fetch(c, TransferMode::Sync).unwrap();
//! assert_eq!(ctx.host(c).unwrap().as_i16().unwrap().get(0, 0), 4);
//! ```

mod capacity;
mod context;
mod driver;
mod error;
pub mod instruction;
mod session;
pub mod sim;
mod stats;

pub use capacity::DeviceCapacity;
pub use context::{BufferId, ExecMode, KernelContext, TransferMode};
pub use driver::{DeviceAddr, Driver, Readback};
pub use error::{DriverError, OrchestratorError};
pub use instruction::{Instruction, InstructionWord, Opcode, Scalars};
pub use session::AcceleratorSession;
pub use stats::TransferStats;
