// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-kernel execution context.
//!
//! A [`KernelContext`] owns every device buffer it registered, the pending
//! instruction queue and the bookkeeping for deferred transfers. It is the
//! only handle through which a kernel index is driven, so one thread per
//! index needs no further synchronization.
//!
//! ```text
//!  register ──▶ send / mark_send_on_execute ──▶ add_* (validated)
//!                                                   │
//!           fetch ◀── wait ◀── execute(Async) ◀─────┤
//!           fetch ◀────────── execute(Sync)  ◀──────┘
//! ```

use crate::driver::{DeviceAddr, Driver};
use crate::instruction::{Instruction, Opcode, Scalars};
use crate::{DriverError, OrchestratorError, TransferStats};
use quant_codec::pack::{pack_negative, pack_post_scale};
use quant_codec::Rescale;
use sparse_format::{SparseFormatter, SparseImage};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use tile_core::{DType, Engine, HardwareProfile, HostMatrix, NumericMode, INSTRUCTION_CAPACITY};

/// Handle to a buffer registered with one [`KernelContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host-to-device and device-to-host transfer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Returns once the transfer is complete.
    Sync,
    /// Returns immediately; the transfer must be joined with `wait`.
    Deferred,
}

/// Kernel start mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Sync,
    /// Starts the kernel and returns; join with `wait`.
    Async,
}

enum Contents {
    Dense(HostMatrix),
    Sparse(SparseImage),
}

impl Contents {
    fn to_bytes(&self) -> Vec<u8> {
        match self {
            Contents::Dense(host) => host.to_le_bytes(),
            Contents::Sparse(image) => image.to_bytes(),
        }
    }
}

/// A host buffer with its exclusive device binding.
struct DeviceBuffer {
    addr: DeviceAddr,
    size_bytes: usize,
    contents: Contents,
}

/// Element types of `(A, B, C)` and `X` for the dense opcodes.
fn dense_dtypes(mode: NumericMode) -> Result<(DType, DType), OrchestratorError> {
    match mode {
        NumericMode::Fixed16 => Ok((DType::I16, DType::I32)),
        NumericMode::Float32 => Ok((DType::F32, DType::F32)),
        NumericMode::Fixed32 => Err(OrchestratorError::TypeMismatch(format!(
            "dense engines built for '{}' are not supported",
            mode.as_str()
        ))),
    }
}

/// Exclusive handle to one kernel index.
pub struct KernelContext<D: Driver> {
    index: usize,
    driver: Arc<D>,
    profile: Arc<HardwareProfile>,
    open: Arc<Mutex<HashSet<usize>>>,
    buffers: BTreeMap<BufferId, DeviceBuffer>,
    next_id: u32,
    pending: Vec<Instruction>,
    /// Instructions sitting in the device instruction buffer.
    loaded: usize,
    send_on_execute: BTreeSet<BufferId>,
    deferred_sends: HashSet<BufferId>,
    deferred_fetches: HashMap<DeviceAddr, BufferId>,
    epoch: u64,
    stats: TransferStats,
}

impl<D: Driver> KernelContext<D> {
    pub(crate) fn new(
        index: usize,
        driver: Arc<D>,
        profile: Arc<HardwareProfile>,
        open: Arc<Mutex<HashSet<usize>>>,
    ) -> Self {
        Self {
            index,
            driver,
            profile,
            open,
            buffers: BTreeMap::new(),
            next_id: 0,
            pending: Vec::new(),
            loaded: 0,
            send_on_execute: BTreeSet::new(),
            deferred_sends: HashSet::new(),
            deferred_fetches: HashMap::new(),
            epoch: 0,
            stats: TransferStats::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    /// Number of completed `execute` calls.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Pending plus loaded instructions.
    pub fn queue_depth(&self) -> usize {
        self.loaded + self.pending.len()
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn diagnostics(&self) -> String {
        self.driver.diagnostics()
    }

    // ── Buffer registry ────────────────────────────────────────────

    fn bind(&mut self, contents: Contents, size_bytes: usize) -> Result<BufferId, OrchestratorError> {
        let addr = self.driver.allocate(self.index, size_bytes)?;
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(
            id,
            DeviceBuffer {
                addr,
                size_bytes,
                contents,
            },
        );
        tracing::debug!(kernel = self.index, %id, %addr, size_bytes, "Registered buffer");
        Ok(id)
    }

    /// Binds a (padded) dense host matrix to device memory. Nothing is
    /// transferred yet.
    pub fn register(&mut self, host: HostMatrix) -> Result<BufferId, OrchestratorError> {
        let size = host.size_bytes();
        self.bind(Contents::Dense(host), size)
    }

    /// Binds a sparse image to device memory.
    pub fn register_sparse(&mut self, image: &SparseImage) -> Result<BufferId, OrchestratorError> {
        self.bind(Contents::Sparse(image.clone()), image.size_bytes())
    }

    fn buffer(&self, id: BufferId) -> Result<&DeviceBuffer, OrchestratorError> {
        self.buffers.get(&id).ok_or(OrchestratorError::UnknownBuffer(id))
    }

    fn addr_of(&self, id: BufferId) -> Result<DeviceAddr, OrchestratorError> {
        Ok(self.buffer(id)?.addr)
    }

    /// Host copy of a dense buffer.
    pub fn host(&self, id: BufferId) -> Result<&HostMatrix, OrchestratorError> {
        match &self.buffer(id)?.contents {
            Contents::Dense(host) => Ok(host),
            Contents::Sparse(_) => Err(OrchestratorError::TypeMismatch(format!(
                "buffer {id} holds a sparse image"
            ))),
        }
    }

    fn image(&self, id: BufferId) -> Result<&SparseImage, OrchestratorError> {
        match &self.buffer(id)?.contents {
            Contents::Sparse(image) => Ok(image),
            Contents::Dense(_) => Err(OrchestratorError::TypeMismatch(format!(
                "buffer {id} is dense, a sparse image is required"
            ))),
        }
    }

    fn in_flight(&self, id: BufferId) -> bool {
        self.deferred_sends.contains(&id) || self.deferred_fetches.values().any(|&f| f == id)
    }

    /// Replaces the host contents of a dense buffer. The binding keeps its
    /// dtype and shape.
    pub fn write(&mut self, id: BufferId, host: HostMatrix) -> Result<(), OrchestratorError> {
        if self.in_flight(id) {
            return Err(OrchestratorError::TransferInFlight(id));
        }
        let current = self.host(id)?;
        if current.dtype() != host.dtype() {
            return Err(OrchestratorError::TypeMismatch(format!(
                "buffer {id} is bound as {}, got {}",
                current.dtype(),
                host.dtype()
            )));
        }
        if current.shape() != host.shape() {
            return Err(OrchestratorError::ShapeMismatch(format!(
                "buffer {id} is {:?}, got {:?}",
                current.shape(),
                host.shape()
            )));
        }
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.contents = Contents::Dense(host);
        }
        Ok(())
    }

    /// Frees the device binding of `id`.
    pub fn release(&mut self, id: BufferId) -> Result<(), OrchestratorError> {
        if self.in_flight(id) {
            return Err(OrchestratorError::TransferInFlight(id));
        }
        let buffer = self
            .buffers
            .remove(&id)
            .ok_or(OrchestratorError::UnknownBuffer(id))?;
        self.send_on_execute.remove(&id);
        self.driver.free(self.index, buffer.addr)?;
        tracing::debug!(kernel = self.index, %id, "Released buffer");
        Ok(())
    }

    // ── Transfers ──────────────────────────────────────────────────

    fn transmit(&mut self, id: BufferId, sync: bool) -> Result<(), OrchestratorError> {
        let buffer = self.buffer(id)?;
        let (addr, bytes) = (buffer.addr, buffer.contents.to_bytes());
        self.driver.send_buffer(self.index, addr, &bytes, sync)?;
        self.stats.record_send(bytes.len());
        if !sync {
            self.deferred_sends.insert(id);
        }
        tracing::debug!(kernel = self.index, %id, bytes = bytes.len(), sync, "Sent buffer");
        Ok(())
    }

    /// Copies the host contents of `id` to the device.
    pub fn send(&mut self, id: BufferId, mode: TransferMode) -> Result<(), OrchestratorError> {
        self.transmit(id, mode == TransferMode::Sync)
    }

    /// Defers the transfer of `id` to the next `execute` call.
    pub fn mark_send_on_execute(&mut self, id: BufferId) -> Result<(), OrchestratorError> {
        self.buffer(id)?;
        self.send_on_execute.insert(id);
        Ok(())
    }

    /// Copies the device contents of dense buffer `id` back to its host copy.
    pub fn fetch(&mut self, id: BufferId, mode: TransferMode) -> Result<(), OrchestratorError> {
        let (dtype, (rows, cols)) = {
            let host = self.host(id)?;
            (host.dtype(), host.shape())
        };
        let buffer = self.buffer(id)?;
        let (addr, size) = (buffer.addr, buffer.size_bytes);

        match mode {
            TransferMode::Sync => {
                let bytes = self.driver.get_buffer(self.index, addr, true)?.ok_or(
                    DriverError::Rejected {
                        kernel: self.index,
                        reason: format!("synchronous read of {addr} returned no data"),
                    },
                )?;
                let host = HostMatrix::from_le_bytes(dtype, rows, cols, &bytes)?;
                if let Some(buffer) = self.buffers.get_mut(&id) {
                    buffer.contents = Contents::Dense(host);
                }
            }
            TransferMode::Deferred => {
                self.driver.get_buffer(self.index, addr, false)?;
                self.deferred_fetches.insert(addr, id);
            }
        }
        self.stats.record_fetch(size);
        Ok(())
    }

    /// Joins every deferred transfer and asynchronous execution.
    pub fn wait(&mut self) -> Result<(), OrchestratorError> {
        let readbacks = self.driver.wait(self.index)?;
        let joined = self.deferred_sends.len() + self.deferred_fetches.len();
        self.deferred_sends.clear();

        for readback in readbacks {
            let Some(id) = self.deferred_fetches.remove(&readback.addr) else {
                continue;
            };
            let (dtype, (rows, cols)) = {
                let host = self.host(id)?;
                (host.dtype(), host.shape())
            };
            let host = HostMatrix::from_le_bytes(dtype, rows, cols, &readback.bytes)?;
            if let Some(buffer) = self.buffers.get_mut(&id) {
                buffer.contents = Contents::Dense(host);
            }
        }
        self.deferred_fetches.clear();
        self.stats.deferred_joined += joined as u64;
        Ok(())
    }

    // ── Instruction construction ───────────────────────────────────

    fn reserve_slot(&self) -> Result<(), OrchestratorError> {
        let depth = self.queue_depth() + 1;
        if depth > INSTRUCTION_CAPACITY {
            return Err(OrchestratorError::CapacityExceeded {
                what: "instruction queue",
                value: depth,
                limit: INSTRUCTION_CAPACITY,
            });
        }
        Ok(())
    }

    fn push(&mut self, instruction: Instruction) {
        tracing::debug!(
            kernel = self.index,
            opcode = %instruction.opcode,
            depth = self.queue_depth() + 1,
            "Queued instruction"
        );
        self.pending.push(instruction);
        let depth = self.queue_depth();
        self.stats.update_queue_depth(depth);
    }

    fn expect_dtype(&self, id: BufferId, expected: DType, op: Opcode) -> Result<&HostMatrix, OrchestratorError> {
        let host = self.host(id)?;
        if host.dtype() != expected {
            return Err(OrchestratorError::TypeMismatch(format!(
                "{op} operand {id} is {}, expected {expected}",
                host.dtype()
            )));
        }
        Ok(host)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_dense(
        &mut self,
        opcode: Opcode,
        a: BufferId,
        b: BufferId,
        c: BufferId,
        x: BufferId,
        post: Rescale,
        negative: Rescale,
    ) -> Result<(), OrchestratorError> {
        self.profile.require_engine(opcode.engine())?;
        let (operand, bias) = dense_dtypes(self.profile.numeric_mode()?)?;

        let (m, k) = self.expect_dtype(a, operand, opcode)?.shape();
        let (kb, n) = self.expect_dtype(b, operand, opcode)?.shape();
        let c_shape = self.expect_dtype(c, operand, opcode)?.shape();
        let x_shape = self.expect_dtype(x, bias, opcode)?.shape();
        if kb != k {
            return Err(OrchestratorError::ShapeMismatch(format!(
                "{opcode}: A is {m}×{k} but B is {kb}×{n}"
            )));
        }
        if c_shape != (m, n) {
            return Err(OrchestratorError::ShapeMismatch(format!(
                "{opcode}: output is {c_shape:?}, expected ({m}, {n})"
            )));
        }
        if x_shape != (m, n) {
            return Err(OrchestratorError::ShapeMismatch(format!(
                "{opcode}: bias is {x_shape:?}, expected ({m}, {n})"
            )));
        }

        let blocks = self.profile.dense_blocks()?;
        for (dim, value, block) in [("m", m, blocks.min_m), ("k", k, blocks.min_k), ("n", n, blocks.min_n)] {
            if value % block != 0 {
                return Err(OrchestratorError::ShapeMismatch(format!(
                    "{opcode}: {dim} = {value} is not a multiple of {block}"
                )));
            }
        }

        let post = pack_post_scale(post)?;
        let negative = pack_negative(negative)?;
        self.reserve_slot()?;
        self.push(Instruction {
            opcode,
            a,
            b,
            c,
            x: Some(x),
            scalars: Scalars::Dense {
                m,
                k,
                n,
                post,
                negative,
            },
            kernel: self.index,
        });
        Ok(())
    }

    /// Queues `C = post(A·B + X)`.
    pub fn add_dense_linear(
        &mut self,
        a: BufferId,
        b: BufferId,
        c: BufferId,
        x: BufferId,
        post: Rescale,
    ) -> Result<(), OrchestratorError> {
        self.add_dense(Opcode::DenseLinear, a, b, c, x, post, Rescale::IDENTITY)
    }

    /// Queues `C = negative(post(A·B + X))`.
    pub fn add_dense_fused(
        &mut self,
        a: BufferId,
        b: BufferId,
        c: BufferId,
        x: BufferId,
        post: Rescale,
        negative: Rescale,
    ) -> Result<(), OrchestratorError> {
        self.add_dense(Opcode::DenseFused, a, b, c, x, post, negative)
    }

    fn expect_vector(
        &self,
        op: Opcode,
        id: BufferId,
        shape: (usize, usize),
        what: &str,
    ) -> Result<(), OrchestratorError> {
        let host = self.expect_dtype(id, DType::F32, op)?;
        if host.shape() != shape {
            return Err(OrchestratorError::ShapeMismatch(format!(
                "{what} {id} is {:?}, expected {shape:?}",
                host.shape()
            )));
        }
        Ok(())
    }

    /// Queues `c = act(A·b)` on the single-vector sparse engine.
    pub fn add_sparse_matvec(
        &mut self,
        a: BufferId,
        b: BufferId,
        c: BufferId,
    ) -> Result<(), OrchestratorError> {
        self.profile.require_engine(Engine::Spmv)?;
        let image = self.image(a)?;
        let [stage] = image.stages() else {
            return Err(OrchestratorError::ShapeMismatch(format!(
                "sparse-matvec expects one stage, buffer {a} has {}",
                image.num_stages()
            )));
        };
        let stage = *stage;
        SparseFormatter::for_spmv(&self.profile)?.check_capacity(stage.m, stage.k, stage.nnz)?;
        self.expect_vector(Opcode::SparseMatVec, b, (stage.padded_k, 1), "input")?;
        self.expect_vector(Opcode::SparseMatVec, c, (stage.padded_m, 1), "output")?;

        let blocks = self.profile.spmv_blocks()?;
        self.reserve_slot()?;
        self.push(Instruction {
            opcode: Opcode::SparseMatVec,
            a,
            b,
            c,
            x: None,
            scalars: Scalars::SparseMatVec {
                m: stage.padded_m,
                k: stage.padded_k,
                nnz: stage.padded_nnz,
                relu: stage.negative_slope == 0.0,
                num_cblocks: blocks.num_cblocks,
                capacity_c: blocks.capacity_c,
                capacity_b: blocks.capacity_b,
            },
            kernel: self.index,
        });
        Ok(())
    }

    /// Queues a multi-stage sparse chain over `runs` input rows.
    pub fn add_multi_stage_sparse(
        &mut self,
        a: BufferId,
        b: BufferId,
        c: BufferId,
        runs: usize,
    ) -> Result<(), OrchestratorError> {
        self.profile.require_engine(Engine::Uspmv)?;
        let limits = self.profile.uspmv_blocks()?;
        let formatter = SparseFormatter::for_uspmv(&self.profile)?;
        let image = self.image(a)?;
        if image.num_stages() > limits.stages {
            return Err(OrchestratorError::CapacityExceeded {
                what: "stages",
                value: image.num_stages(),
                limit: limits.stages,
            });
        }
        for stage in image.stages() {
            formatter.check_capacity(stage.m, stage.k, stage.nnz)?;
        }
        if let Some(pair) = image.stages().windows(2).find(|p| p[0].m != p[1].k) {
            return Err(OrchestratorError::ShapeMismatch(format!(
                "stage output {} does not feed stage input {}",
                pair[0].m, pair[1].k
            )));
        }
        if runs == 0 {
            return Err(OrchestratorError::ShapeMismatch("runs must be positive".into()));
        }
        let (input_width, output_width) = (image.input_width(), image.output_width());
        self.expect_vector(Opcode::MultiStageSparse, b, (runs, input_width), "input")?;
        self.expect_vector(Opcode::MultiStageSparse, c, (runs, output_width), "output")?;

        self.reserve_slot()?;
        self.push(Instruction {
            opcode: Opcode::MultiStageSparse,
            a,
            b,
            c,
            x: None,
            scalars: Scalars::MultiStage { runs },
            kernel: self.index,
        });
        Ok(())
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Sends send-on-execute buffers, loads pending instructions and
    /// starts the kernel. Loaded instructions stay in the device buffer
    /// until [`clear_queue`](Self::clear_queue).
    pub fn execute(&mut self, mode: ExecMode) -> Result<(), OrchestratorError> {
        let sync = mode == ExecMode::Sync;
        for id in std::mem::take(&mut self.send_on_execute) {
            self.transmit(id, sync)?;
        }

        let pending = std::mem::take(&mut self.pending);
        for instruction in &pending {
            let word = instruction.encode(|id| self.addr_of(id))?;
            if !self.driver.add_instruction(self.index, &word)? {
                return Err(DriverError::Rejected {
                    kernel: self.index,
                    reason: format!("instruction buffer full at {}", self.loaded),
                }
                .into());
            }
            self.loaded += 1;
        }

        self.driver.execute(self.index, sync)?;
        self.epoch += 1;
        self.stats.record_execute(pending.len());
        tracing::debug!(
            kernel = self.index,
            submitted = pending.len(),
            loaded = self.loaded,
            epoch = self.epoch,
            sync,
            "Executed kernel"
        );
        Ok(())
    }

    /// Empties the device instruction buffer and drops pending instructions.
    pub fn clear_queue(&mut self) -> Result<(), OrchestratorError> {
        self.driver.clear_instruction_queue(self.index)?;
        self.pending.clear();
        self.loaded = 0;
        self.stats.queue_clears += 1;
        Ok(())
    }
}

impl<D: Driver> Drop for KernelContext<D> {
    fn drop(&mut self) {
        for (id, buffer) in std::mem::take(&mut self.buffers) {
            if let Err(e) = self.driver.free(self.index, buffer.addr) {
                tracing::warn!(kernel = self.index, %id, error = %e, "Failed to free buffer");
            }
        }
        if let Ok(mut open) = self.open.lock() {
            open.remove(&self.index);
        }
        tracing::debug!(kernel = self.index, "Closed kernel context");
    }
}
