// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Software accelerator implementing [`Driver`].
//!
//! # Memory model
//!
//! ```text
//!  kernel bank:  page 0          page 1 ..
//!               ┌──────────────┬──────────────────────────────┐
//!               │ instructions │ buffers (bump allocated)     │
//!               │ 16 × 64 B    │                              │
//!               └──────────────┴──────────────────────────────┘
//! ```
//!
//! Each kernel has its own bank, lock and deferred queue. Deferred sends,
//! fetches and executions are applied in submission order when a
//! synchronous call or `wait` arrives for that kernel.

mod exec;

use crate::driver::{DeviceAddr, Driver, Readback};
use crate::instruction::InstructionWord;
use crate::{DeviceCapacity, DriverError};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tile_core::{HardwareProfile, INSTRUCTION_CAPACITY, PAGE_SIZE};

enum Deferred {
    Send { addr: DeviceAddr, bytes: Vec<u8> },
    Fetch { addr: DeviceAddr },
    Run,
}

struct SimKernel {
    memory: BTreeMap<DeviceAddr, Vec<u8>>,
    next_addr: u64,
    used_bytes: usize,
    instructions: Vec<InstructionWord>,
    deferred: VecDeque<Deferred>,
    readbacks: Vec<Readback>,
    runs: u64,
}

impl SimKernel {
    fn new() -> Self {
        Self {
            memory: BTreeMap::new(),
            // Page 0 holds the instruction buffer.
            next_addr: PAGE_SIZE as u64,
            used_bytes: 0,
            instructions: Vec::with_capacity(INSTRUCTION_CAPACITY),
            deferred: VecDeque::new(),
            readbacks: Vec::new(),
            runs: 0,
        }
    }

    fn write(&mut self, kernel: usize, addr: DeviceAddr, bytes: &[u8]) -> Result<(), DriverError> {
        let buf = self
            .memory
            .get_mut(&addr)
            .ok_or(DriverError::UnknownAddress { kernel, addr: addr.0 })?;
        if bytes.len() > buf.len() {
            return Err(DriverError::Rejected {
                kernel,
                reason: format!(
                    "{} bytes sent to a {}-byte buffer at {addr}",
                    bytes.len(),
                    buf.len()
                ),
            });
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, kernel: usize, addr: DeviceAddr) -> Result<Vec<u8>, DriverError> {
        self.memory
            .get(&addr)
            .cloned()
            .ok_or(DriverError::UnknownAddress { kernel, addr: addr.0 })
    }

    fn drain(&mut self, kernel: usize, profile: &HardwareProfile) -> Result<(), DriverError> {
        while let Some(op) = self.deferred.pop_front() {
            match op {
                Deferred::Send { addr, bytes } => self.write(kernel, addr, &bytes)?,
                Deferred::Fetch { addr } => {
                    let bytes = self.read(kernel, addr)?;
                    self.readbacks.push(Readback { addr, bytes });
                }
                Deferred::Run => self.run(kernel, profile)?,
            }
        }
        Ok(())
    }

    fn run(&mut self, kernel: usize, profile: &HardwareProfile) -> Result<(), DriverError> {
        let words = self.instructions.clone();
        for word in &words {
            exec::execute_word(&mut self.memory, kernel, word, profile)?;
        }
        self.runs += 1;
        Ok(())
    }
}

/// Software model of the accelerator.
pub struct SimDevice {
    profile: Arc<HardwareProfile>,
    bitstream: PathBuf,
    capacity: DeviceCapacity,
    kernels: Vec<Mutex<SimKernel>>,
}

impl SimDevice {
    /// Creates a device with `capacity` bytes of memory per kernel.
    pub fn with_capacity(
        bitstream: &Path,
        profile: Arc<HardwareProfile>,
        capacity: DeviceCapacity,
    ) -> Result<Self, DriverError> {
        let num_kernels = profile.num_kernels()?;
        tracing::info!(
            bitstream = %bitstream.display(),
            num_kernels,
            capacity = %capacity,
            "Opened simulated accelerator"
        );
        Ok(Self {
            profile,
            bitstream: bitstream.to_path_buf(),
            capacity,
            kernels: (0..num_kernels).map(|_| Mutex::new(SimKernel::new())).collect(),
        })
    }

    pub fn capacity(&self) -> DeviceCapacity {
        self.capacity
    }

    /// Bytes allocated on `kernel`.
    pub fn used_bytes(&self, kernel: usize) -> Result<usize, DriverError> {
        Ok(self.lock(kernel)?.used_bytes)
    }

    /// Number of instructions currently loaded on `kernel`.
    pub fn loaded_instructions(&self, kernel: usize) -> Result<usize, DriverError> {
        Ok(self.lock(kernel)?.instructions.len())
    }

    fn lock(&self, kernel: usize) -> Result<MutexGuard<'_, SimKernel>, DriverError> {
        self.kernels
            .get(kernel)
            .ok_or(DriverError::KernelOutOfRange {
                kernel,
                num_kernels: self.kernels.len(),
            })?
            .lock()
            .map_err(|_| DriverError::Poisoned(kernel))
    }
}

impl Driver for SimDevice {
    fn create(bitstream: &Path, profile: Arc<HardwareProfile>) -> Result<Self, DriverError> {
        Self::with_capacity(bitstream, profile, DeviceCapacity::default())
    }

    fn num_kernels(&self) -> usize {
        self.kernels.len()
    }

    fn allocate(&self, kernel: usize, bytes: usize) -> Result<DeviceAddr, DriverError> {
        let mut k = self.lock(kernel)?;
        let reserved = bytes.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let available = self.capacity.as_bytes().saturating_sub(k.used_bytes);
        if reserved > available {
            return Err(DriverError::OutOfDeviceMemory {
                kernel,
                requested_bytes: reserved,
                available_bytes: available,
            });
        }
        let addr = DeviceAddr(k.next_addr);
        k.next_addr += reserved as u64;
        k.used_bytes += reserved;
        k.memory.insert(addr, vec![0u8; bytes]);
        tracing::trace!(kernel, %addr, bytes, "Device allocation");
        Ok(addr)
    }

    fn free(&self, kernel: usize, addr: DeviceAddr) -> Result<(), DriverError> {
        let mut k = self.lock(kernel)?;
        let buf = k
            .memory
            .remove(&addr)
            .ok_or(DriverError::UnknownAddress { kernel, addr: addr.0 })?;
        k.used_bytes -= buf.len().max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        Ok(())
    }

    fn send_buffer(
        &self,
        kernel: usize,
        addr: DeviceAddr,
        bytes: &[u8],
        sync: bool,
    ) -> Result<(), DriverError> {
        let mut k = self.lock(kernel)?;
        if sync {
            k.drain(kernel, &self.profile)?;
            k.write(kernel, addr, bytes)
        } else {
            k.deferred.push_back(Deferred::Send {
                addr,
                bytes: bytes.to_vec(),
            });
            Ok(())
        }
    }

    fn get_buffer(
        &self,
        kernel: usize,
        addr: DeviceAddr,
        sync: bool,
    ) -> Result<Option<Vec<u8>>, DriverError> {
        let mut k = self.lock(kernel)?;
        if sync {
            k.drain(kernel, &self.profile)?;
            k.read(kernel, addr).map(Some)
        } else {
            k.deferred.push_back(Deferred::Fetch { addr });
            Ok(None)
        }
    }

    fn add_instruction(&self, kernel: usize, word: &InstructionWord) -> Result<bool, DriverError> {
        let mut k = self.lock(kernel)?;
        if k.instructions.len() >= INSTRUCTION_CAPACITY {
            tracing::warn!(kernel, "Instruction buffer full; word dropped");
            return Ok(false);
        }
        k.instructions.push(*word);
        Ok(true)
    }

    fn execute(&self, kernel: usize, sync: bool) -> Result<(), DriverError> {
        let mut k = self.lock(kernel)?;
        if sync {
            k.drain(kernel, &self.profile)?;
            k.run(kernel, &self.profile)
        } else {
            k.deferred.push_back(Deferred::Run);
            Ok(())
        }
    }

    fn wait(&self, kernel: usize) -> Result<Vec<Readback>, DriverError> {
        let mut k = self.lock(kernel)?;
        k.drain(kernel, &self.profile)?;
        Ok(std::mem::take(&mut k.readbacks))
    }

    fn clear_instruction_queue(&self, kernel: usize) -> Result<(), DriverError> {
        let mut k = self.lock(kernel)?;
        k.drain(kernel, &self.profile)?;
        k.instructions.clear();
        Ok(())
    }

    fn diagnostics(&self) -> String {
        let mut out = format!(
            "SimDevice [{}]: {} kernel(s), {} per kernel\n",
            self.bitstream.display(),
            self.kernels.len(),
            self.capacity
        );
        for (i, kernel) in self.kernels.iter().enumerate() {
            match kernel.lock() {
                Ok(k) => {
                    let _ = writeln!(
                        out,
                        "  kernel {i}: {} buffers, {:.2} MB used, {} instructions loaded, {} deferred, {} runs",
                        k.memory.len(),
                        k.used_bytes as f64 / (1024.0 * 1024.0),
                        k.instructions.len(),
                        k.deferred.len(),
                        k.runs
                    );
                }
                Err(_) => {
                    let _ = writeln!(out, "  kernel {i}: poisoned");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(kb: usize) -> SimDevice {
        let profile = HardwareProfile::from_pairs([("GEMX_numKernels", "2"), ("GEMX_ddrWidth", "4")]);
        SimDevice::with_capacity(
            Path::new("sim.xclbin"),
            Arc::new(profile),
            DeviceCapacity::from_bytes(kb * 1024),
        )
        .unwrap()
    }

    #[test]
    fn test_allocation_is_page_aligned() {
        let dev = device(64);
        let a = dev.allocate(0, 10).unwrap();
        let b = dev.allocate(0, 5000).unwrap();
        assert_eq!(a.0 % PAGE_SIZE as u64, 0);
        assert_eq!(a, DeviceAddr(PAGE_SIZE as u64));
        assert_eq!(b.0, a.0 + PAGE_SIZE as u64);
        assert_eq!(dev.used_bytes(0).unwrap(), 3 * PAGE_SIZE);
        dev.free(0, a).unwrap();
        assert_eq!(dev.used_bytes(0).unwrap(), 2 * PAGE_SIZE);
        assert_eq!(dev.used_bytes(1).unwrap(), 0);
    }

    #[test]
    fn test_out_of_device_memory() {
        let dev = device(8);
        dev.allocate(0, 8 * 1024).unwrap();
        assert!(matches!(
            dev.allocate(0, 1),
            Err(DriverError::OutOfDeviceMemory { kernel: 0, .. })
        ));
    }

    #[test]
    fn test_deferred_ordering() {
        let dev = device(64);
        let a = dev.allocate(1, 4).unwrap();
        dev.send_buffer(1, a, &[1, 2, 3, 4], false).unwrap();
        assert_eq!(dev.get_buffer(1, a, false).unwrap(), None);
        dev.send_buffer(1, a, &[9, 9, 9, 9], false).unwrap();
        let readbacks = dev.wait(1).unwrap();
        assert_eq!(readbacks, vec![Readback { addr: a, bytes: vec![1, 2, 3, 4] }]);
        assert_eq!(dev.get_buffer(1, a, true).unwrap(), Some(vec![9, 9, 9, 9]));
    }

    #[test]
    fn test_instruction_buffer_capacity() {
        let dev = device(64);
        let word = InstructionWord([0; 16]);
        for _ in 0..INSTRUCTION_CAPACITY {
            assert!(dev.add_instruction(0, &word).unwrap());
        }
        assert!(!dev.add_instruction(0, &word).unwrap());
        dev.clear_instruction_queue(0).unwrap();
        assert_eq!(dev.loaded_instructions(0).unwrap(), 0);
    }

    #[test]
    fn test_kernel_out_of_range() {
        let dev = device(64);
        assert!(matches!(
            dev.allocate(2, 16),
            Err(DriverError::KernelOutOfRange { kernel: 2, num_kernels: 2 })
        ));
        assert!(dev.diagnostics().contains("2 kernel(s)"));
    }
}
