// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The accelerator session: one per opened device.

use crate::{Driver, KernelContext, OrchestratorError};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tile_core::HardwareProfile;

/// Explicit context for one opened accelerator.
///
/// Created once and passed to every pipeline. Hands out at most one
/// [`KernelContext`] per kernel index at a time.
pub struct AcceleratorSession<D: Driver> {
    driver: Arc<D>,
    profile: Arc<HardwareProfile>,
    open: Arc<Mutex<HashSet<usize>>>,
}

impl<D: Driver> Clone for AcceleratorSession<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            profile: Arc::clone(&self.profile),
            open: Arc::clone(&self.open),
        }
    }
}

impl<D: Driver> AcceleratorSession<D> {
    /// Wraps an already created driver.
    pub fn new(driver: D, profile: Arc<HardwareProfile>) -> Self {
        Self {
            driver: Arc::new(driver),
            profile,
            open: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Creates the driver for `bitstream` and wraps it.
    pub fn open(bitstream: &Path, profile: HardwareProfile) -> Result<Self, OrchestratorError> {
        let profile = Arc::new(profile);
        let driver = D::create(bitstream, Arc::clone(&profile))?;
        tracing::info!(
            bitstream = %bitstream.display(),
            kernels = driver.num_kernels(),
            "Accelerator session opened"
        );
        Ok(Self::new(driver, profile))
    }

    pub fn profile(&self) -> &Arc<HardwareProfile> {
        &self.profile
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn num_kernels(&self) -> usize {
        self.driver.num_kernels()
    }

    /// Takes exclusive ownership of kernel `index` until the returned
    /// context is dropped.
    pub fn open_kernel(&self, index: usize) -> Result<KernelContext<D>, OrchestratorError> {
        let num_kernels = self.num_kernels();
        if index >= num_kernels {
            return Err(OrchestratorError::CapacityExceeded {
                what: "kernel index",
                value: index,
                limit: num_kernels.saturating_sub(1),
            });
        }
        {
            let mut open = self
                .open
                .lock()
                .map_err(|_| crate::DriverError::Poisoned(index))?;
            if !open.insert(index) {
                return Err(OrchestratorError::KernelBusy(index));
            }
        }
        tracing::debug!(kernel = index, "Opened kernel context");
        Ok(KernelContext::new(
            index,
            Arc::clone(&self.driver),
            Arc::clone(&self.profile),
            Arc::clone(&self.open),
        ))
    }

    pub fn diagnostics(&self) -> String {
        self.driver.diagnostics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDevice;

    fn session() -> AcceleratorSession<SimDevice> {
        let profile = HardwareProfile::from_pairs([("GEMX_numKernels", "2")]);
        AcceleratorSession::open(Path::new("sim.xclbin"), profile).unwrap()
    }

    #[test]
    fn test_kernel_ownership() {
        let s = session();
        let k0 = s.open_kernel(0).unwrap();
        assert!(matches!(s.open_kernel(0), Err(OrchestratorError::KernelBusy(0))));
        let _k1 = s.clone().open_kernel(1).unwrap();
        drop(k0);
        assert!(s.open_kernel(0).is_ok());
    }

    #[test]
    fn test_kernel_index_range() {
        let s = session();
        assert!(matches!(
            s.open_kernel(2),
            Err(OrchestratorError::CapacityExceeded { what: "kernel index", value: 2, .. })
        ));
    }

    #[test]
    fn test_missing_kernel_count() {
        let result = AcceleratorSession::<SimDevice>::open(Path::new("x"), HardwareProfile::default());
        assert!(matches!(result, Err(OrchestratorError::Driver(_))));
    }

    #[test]
    fn test_context_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<KernelContext<SimDevice>>();
    }
}
