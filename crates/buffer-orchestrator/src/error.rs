// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for buffer orchestration and the driver boundary.

use crate::BufferId;

/// Errors reported by a [`Driver`](crate::Driver) implementation.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The device bank of a kernel cannot hold the requested buffer.
    #[error("out of device memory on kernel {kernel}: requested {requested_bytes} bytes, {available_bytes} available")]
    OutOfDeviceMemory {
        kernel: usize,
        requested_bytes: usize,
        available_bytes: usize,
    },

    /// No buffer is bound at the given device address.
    #[error("no device buffer at address {addr:#x} on kernel {kernel}")]
    UnknownAddress { kernel: usize, addr: u64 },

    /// The kernel index is not part of this build.
    #[error("kernel index {kernel} out of range (build has {num_kernels})")]
    KernelOutOfRange { kernel: usize, num_kernels: usize },

    /// The device refused an instruction word.
    #[error("instruction rejected by kernel {kernel}: {reason}")]
    Rejected { kernel: usize, reason: String },

    /// Executing a loaded instruction failed on the device.
    #[error("execution fault on kernel {kernel}: {reason}")]
    ExecutionFault { kernel: usize, reason: String },

    /// A capacity string such as `"512M"` could not be parsed.
    #[error("invalid device capacity: {0}")]
    InvalidCapacity(String),

    /// Internal driver state was poisoned by a panicking thread.
    #[error("driver state for kernel {0} is poisoned")]
    Poisoned(usize),

    #[error("profile error: {0}")]
    Profile(#[from] tile_core::ProfileError),
}

/// Errors raised while registering buffers, building instructions or
/// running a kernel context.
///
/// Validation errors are raised before anything reaches the device.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Operand dimensions are incompatible.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Unsupported or inconsistent element type for an operation.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A hardware limit would be exceeded.
    #[error("{what} = {value} exceeds the hardware capacity of {limit}")]
    CapacityExceeded {
        what: &'static str,
        value: usize,
        limit: usize,
    },

    /// The buffer id is not registered with this context.
    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferId),

    /// The buffer is referenced by a deferred transfer that was not joined.
    #[error("buffer {0} has a deferred transfer in flight; call wait() first")]
    TransferInFlight(BufferId),

    /// Another context already owns this kernel index.
    #[error("kernel {0} is already owned by another context")]
    KernelBusy(usize),

    /// Missing or malformed profile key, or a disabled engine.
    #[error("profile error: {0}")]
    Profile(#[from] tile_core::ProfileError),

    /// A rescale field does not fit its encoding.
    #[error("quantization error: {0}")]
    Quant(#[from] quant_codec::QuantError),

    #[error("sparse format error: {0}")]
    Sparse(#[from] sparse_format::SparseError),

    #[error("layout error: {0}")]
    Layout(#[from] tile_core::LayoutError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}
