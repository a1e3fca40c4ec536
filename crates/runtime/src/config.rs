// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! profile_path = "./profiles/fcn-short.txt"
//! bitstream = "./gemx.xclbin"
//! kernel_index = 0
//! sync_transfers = true
//! sync_execute = true
//! retrieve_intermediates = false
//! sparse_engine = "auto"
//! device_memory = "512M"
//! enable_profiling = true
//! ```

use buffer_orchestrator::{DeviceCapacity, ExecMode, TransferMode};
use sparse_format::SparseEngine;
use std::path::{Path, PathBuf};
use tile_core::HardwareProfile;

/// Configuration for a pipeline runtime.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Hardware profile file (`KEY=VALUE` tokens).
    pub profile_path: PathBuf,
    /// Accelerator image handed to the driver.
    pub bitstream: PathBuf,
    /// Kernel index the pipeline drives.
    #[serde(default)]
    pub kernel_index: usize,
    /// Block on every host↔device transfer.
    #[serde(default = "default_true")]
    pub sync_transfers: bool,
    /// Block on every kernel execution.
    #[serde(default = "default_true")]
    pub sync_execute: bool,
    /// Fetch every layer boundary, not just the final output.
    #[serde(default)]
    pub retrieve_intermediates: bool,
    /// Sparse engine: `"auto"`, `"spmv"` or `"uspmv"`.
    #[serde(default = "default_sparse_engine")]
    pub sparse_engine: String,
    /// Simulated device memory per kernel (human-readable, e.g., `"512M"`).
    #[serde(default = "default_device_memory")]
    pub device_memory: String,
    /// Whether to time each `predict` call.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
}

fn default_true() -> bool {
    true
}

fn default_sparse_engine() -> String {
    "auto".to_string()
}

fn default_device_memory() -> String {
    "512M".to_string()
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, super::RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            super::RuntimeError::ConfigError(format!(
                "cannot read config '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, super::RuntimeError> {
        toml::from_str(toml_str).map_err(|e| {
            super::RuntimeError::ConfigError(format!("TOML parse error: {e}"))
        })
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, super::RuntimeError> {
        toml::to_string_pretty(self).map_err(|e| {
            super::RuntimeError::ConfigError(format!("TOML serialise error: {e}"))
        })
    }

    /// Reads the hardware profile named by `profile_path`.
    pub fn load_profile(&self) -> Result<HardwareProfile, super::RuntimeError> {
        Ok(HardwareProfile::from_file(&self.profile_path)?)
    }

    /// Parses the device memory string into a [`DeviceCapacity`].
    pub fn parse_device_memory(&self) -> Result<DeviceCapacity, super::RuntimeError> {
        DeviceCapacity::parse(&self.device_memory).map_err(|e| {
            super::RuntimeError::ConfigError(format!("invalid device memory: {e}"))
        })
    }

    /// Explicit sparse engine, or `None` for automatic selection.
    pub fn sparse_engine(&self) -> Result<Option<SparseEngine>, super::RuntimeError> {
        match self.sparse_engine.to_lowercase().as_str() {
            "auto" => Ok(None),
            "spmv" => Ok(Some(SparseEngine::Spmv)),
            "uspmv" | "multi-stage" => Ok(Some(SparseEngine::Uspmv)),
            other => Err(super::RuntimeError::ConfigError(format!(
                "unknown sparse engine '{other}'; expected 'auto', 'spmv', or 'uspmv'"
            ))),
        }
    }

    pub fn transfer_mode(&self) -> TransferMode {
        if self.sync_transfers {
            TransferMode::Sync
        } else {
            TransferMode::Deferred
        }
    }

    pub fn exec_mode(&self) -> ExecMode {
        if self.sync_execute {
            ExecMode::Sync
        } else {
            ExecMode::Async
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            profile_path: PathBuf::from("./profiles/fcn-short.txt"),
            bitstream: PathBuf::from("./gemx.xclbin"),
            kernel_index: 0,
            sync_transfers: true,
            sync_execute: true,
            retrieve_intermediates: false,
            sparse_engine: default_sparse_engine(),
            device_memory: default_device_memory(),
            enable_profiling: true,
        }
    }
}
