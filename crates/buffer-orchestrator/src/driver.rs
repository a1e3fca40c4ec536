// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The accelerator driver boundary.
//!
//! Everything below this trait is opaque: the orchestrator only moves
//! bytes to and from device addresses, loads 64-byte instruction words and
//! starts kernels. [`SimDevice`](crate::sim::SimDevice) implements it in
//! software.

use crate::instruction::InstructionWord;
use crate::DriverError;
use std::path::Path;
use std::sync::Arc;
use tile_core::{HardwareProfile, PAGE_SIZE};

/// Byte address in a kernel's device memory. Always page aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceAddr(pub u64);

impl DeviceAddr {
    /// Page offset used in instruction operands.
    pub fn page(self) -> i32 {
        (self.0 / PAGE_SIZE as u64) as i32
    }

    pub fn from_page(page: i32) -> Self {
        Self(page.max(0) as u64 * PAGE_SIZE as u64)
    }
}

impl std::fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Contents of a deferred device-to-host transfer, delivered by
/// [`Driver::wait`].
#[derive(Debug, Clone, PartialEq)]
pub struct Readback {
    pub addr: DeviceAddr,
    pub bytes: Vec<u8>,
}

/// Operations consumed from the accelerator driver.
///
/// Every method addresses one kernel index. Calls for different indices
/// must not interfere; calls for the same index arrive from one thread.
/// `sync == false` defers the operation until the next synchronous call
/// or [`Driver::wait`] on that index, preserving submission order.
pub trait Driver: Send + Sync {
    /// Opens the device programmed with `bitstream`.
    fn create(bitstream: &Path, profile: Arc<HardwareProfile>) -> Result<Self, DriverError>
    where
        Self: Sized;

    fn num_kernels(&self) -> usize;

    /// Reserves `bytes` of device memory. The address is page aligned.
    fn allocate(&self, kernel: usize, bytes: usize) -> Result<DeviceAddr, DriverError>;

    fn free(&self, kernel: usize, addr: DeviceAddr) -> Result<(), DriverError>;

    fn send_buffer(
        &self,
        kernel: usize,
        addr: DeviceAddr,
        bytes: &[u8],
        sync: bool,
    ) -> Result<(), DriverError>;

    /// Reads a buffer back. Returns `None` when deferred; the bytes then
    /// arrive through [`Driver::wait`].
    fn get_buffer(
        &self,
        kernel: usize,
        addr: DeviceAddr,
        sync: bool,
    ) -> Result<Option<Vec<u8>>, DriverError>;

    /// Loads one instruction word. `Ok(false)` means the device refused it
    /// because its instruction buffer is full.
    fn add_instruction(&self, kernel: usize, word: &InstructionWord) -> Result<bool, DriverError>;

    /// Runs every loaded instruction in order.
    fn execute(&self, kernel: usize, sync: bool) -> Result<(), DriverError>;

    /// Completes all deferred work on `kernel`.
    fn wait(&self, kernel: usize) -> Result<Vec<Readback>, DriverError>;

    fn clear_instruction_queue(&self, kernel: usize) -> Result<(), DriverError>;

    fn diagnostics(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offsets() {
        let addr = DeviceAddr(3 * PAGE_SIZE as u64);
        assert_eq!(addr.page(), 3);
        assert_eq!(DeviceAddr::from_page(3), addr);
        assert_eq!(DeviceAddr::from_page(-1), DeviceAddr(0));
        assert_eq!(addr.to_string(), "0x3000");
    }
}
