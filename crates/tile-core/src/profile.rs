// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Hardware profile: the block constants of one accelerator build.
//!
//! # Format
//! Whitespace-separated `KEY=VALUE` tokens, written by the accelerator
//! build flow next to the bitstream:
//!
//! ```text
//! GEMX_ddrWidth=32 GEMX_dataType=short
//! GEMX_gemmMBlocks=4 GEMX_gemmKBlocks=4 GEMX_gemmNBlocks=4
//! GEMX_runGemm=1 GEMX_runFcn=1 GEMX_numKernels=1
//! ```
//!
//! Duplicate keys: the last occurrence wins. Values are kept as strings
//! and interpreted lazily, so a missing key is only an error once some
//! component actually needs it.

use crate::{layout, ProfileError};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Maximum number of instructions one kernel's instruction buffer holds.
pub const INSTRUCTION_CAPACITY: usize = 16;

/// Device page size; operand addresses are expressed in pages.
pub const PAGE_SIZE: usize = 4096;

/// Size of one encoded instruction word (16 × `i32`).
pub const INSTRUCTION_BYTES: usize = 64;

// ── Keys ───────────────────────────────────────────────────────────

pub mod keys {
    pub const DDR_WIDTH: &str = "GEMX_ddrWidth";
    pub const DATA_TYPE: &str = "GEMX_dataType";
    pub const NUM_KERNELS: &str = "GEMX_numKernels";
    pub const GEMM_M_BLOCKS: &str = "GEMX_gemmMBlocks";
    pub const GEMM_K_BLOCKS: &str = "GEMX_gemmKBlocks";
    pub const GEMM_N_BLOCKS: &str = "GEMX_gemmNBlocks";
    pub const SPMV_WIDTH: &str = "GEMX_spmvWidth";
    pub const SPMV_MAC_GROUPS: &str = "GEMX_spmvMacGroups";
    pub const SPMV_NUM_CBLOCKS: &str = "GEMX_spmvNumCblocks";
    pub const SPMV_COL_ADD_IDX_BITS: &str = "GEMX_spmvColAddIdxBits";
    pub const SPMV_K_VECTOR_BLOCKS: &str = "GEMX_spmvkVectorBlocks";
    pub const USPMV_INTERLEAVES: &str = "GEMX_uspmvInterleaves";
    pub const USPMV_STAGES: &str = "GEMX_uspmvStages";
    pub const USPMV_M_VECTOR_BLOCKS: &str = "GEMX_uspmvMvectorBlocks";
    pub const USPMV_NNZ_VECTOR_BLOCKS: &str = "GEMX_uspmvNnzVectorBlocks";
}

// ── Engines & numeric mode ─────────────────────────────────────────

/// A compute engine that may or may not be compiled into a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Engine {
    /// Dense matrix multiply with bias and post-rescale.
    Gemm,
    /// Dense multiply fused with the negative-branch rescale.
    Fcn,
    /// Single-vector sparse matrix-vector multiply.
    Spmv,
    /// Multi-stage streaming sparse matrix-vector multiply.
    Uspmv,
}

impl Engine {
    /// The profile flag that enables this engine.
    pub fn flag_key(self) -> &'static str {
        match self {
            Engine::Gemm => "GEMX_runGemm",
            Engine::Fcn => "GEMX_runFcn",
            Engine::Spmv => "GEMX_runSpmv",
            Engine::Uspmv => "GEMX_runUspmv",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Gemm => "gemm",
            Engine::Fcn => "fcn",
            Engine::Spmv => "spmv",
            Engine::Uspmv => "uspmv",
        }
    }

    pub const ALL: [Engine; 4] = [Engine::Gemm, Engine::Fcn, Engine::Spmv, Engine::Uspmv];
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The numeric mode the dense engines were built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NumericMode {
    /// `short`: 16-bit operands, 32-bit bias, 64-bit accumulation.
    Fixed16,
    /// `int32_t`: 32-bit integer operands.
    Fixed32,
    /// `float`: native floating point, quantization bypassed.
    Float32,
}

impl NumericMode {
    pub fn as_str(self) -> &'static str {
        match self {
            NumericMode::Fixed16 => "short",
            NumericMode::Fixed32 => "int32_t",
            NumericMode::Float32 => "float",
        }
    }
}

// ── Derived block constants ────────────────────────────────────────

/// Padding multiples for the dense engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DenseBlocks {
    /// Multiple for output rows (`ddr × max(KBlocks, MBlocks)`).
    pub min_m: usize,
    /// Multiple for the contraction dimension (`ddr × KBlocks`).
    pub min_k: usize,
    /// Multiple for the batch dimension (`ddr × NBlocks`).
    pub min_n: usize,
}

impl DenseBlocks {
    /// Multiple for a dimension that is the output of one layer and the
    /// contraction of the next. Padding both to `lcm(min_m, min_k)` keeps
    /// chained buffers identical in size for any profile.
    pub fn chain_block(&self) -> usize {
        layout::lcm(self.min_m, self.min_k)
    }
}

/// Constants of the single-vector sparse engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SpmvBlocks {
    pub width: usize,
    pub mac_groups: usize,
    /// Square padding multiple (`macGroups × width`).
    pub min_m: usize,
    pub nnz_granularity: usize,
    pub num_cblocks: usize,
    pub m_vector_blocks: usize,
    /// Maximum output rows one pass can hold.
    pub capacity_c: usize,
    /// Maximum input vector length one pass can hold.
    pub capacity_b: usize,
}

/// Constants of the multi-stage streaming sparse engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct UspmvBlocks {
    /// Padding multiple for both `m` and `k` (`interleaves × ddr`).
    pub min_m: usize,
    pub nnz_granularity: usize,
    /// Largest logical `m` of a stage.
    pub max_m: usize,
    /// Largest logical nnz of a stage.
    pub max_nnz: usize,
    /// Stages chained inside one invocation.
    pub stages: usize,
}

// ── HardwareProfile ────────────────────────────────────────────────

/// The immutable key/value configuration of one accelerator build.
///
/// # Example
/// ```
/// use tile_core::HardwareProfile;
///
/// let profile = HardwareProfile::parse(
///     "GEMX_ddrWidth=32 GEMX_gemmMBlocks=4 GEMX_gemmKBlocks=2 GEMX_gemmNBlocks=1",
/// ).unwrap();
/// let blocks = profile.dense_blocks().unwrap();
/// assert_eq!((blocks.min_m, blocks.min_k, blocks.min_n), (128, 64, 32));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HardwareProfile {
    entries: BTreeMap<String, String>,
}

impl HardwareProfile {
    /// Parses `KEY=VALUE` tokens. Only tokens without `=` are rejected here.
    pub fn parse(text: &str) -> Result<Self, ProfileError> {
        let mut entries = BTreeMap::new();
        for token in text.split_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) if !k.is_empty() => (k, v),
                _ => {
                    return Err(ProfileError::MalformedToken {
                        token: token.to_string(),
                    })
                }
            };
            if let Some(previous) = entries.insert(key.to_string(), value.to_string()) {
                tracing::warn!("profile key '{key}' redefined: '{previous}' -> '{value}'");
            }
        }
        Ok(Self { entries })
    }

    /// Reads and parses a profile file.
    pub fn from_file(path: &Path) -> Result<Self, ProfileError> {
        let text = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let profile = Self::parse(&text)?;
        tracing::info!("loaded hardware profile '{}' ({} keys)", path.display(), profile.len());
        Ok(profile)
    }

    /// Builds a profile from key/value pairs (later pairs win).
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the raw string value of a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns a required key as a raw string.
    pub fn require(&self, key: &str) -> Result<&str, ProfileError> {
        self.get(key).ok_or_else(|| ProfileError::MissingKey {
            key: key.to_string(),
        })
    }

    /// Returns a required non-negative integer.
    pub fn get_usize(&self, key: &str) -> Result<usize, ProfileError> {
        let value = self.require(key)?;
        value.parse().map_err(|e| ProfileError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            detail: format!("{e}"),
        })
    }

    /// Returns a required integer that must be at least 1.
    pub fn get_positive(&self, key: &str) -> Result<usize, ProfileError> {
        let v = self.get_usize(key)?;
        if v == 0 {
            return Err(ProfileError::InvalidValue {
                key: key.to_string(),
                value: "0".into(),
                detail: "must be positive".into(),
            });
        }
        Ok(v)
    }

    pub fn ddr_width(&self) -> Result<usize, ProfileError> {
        self.get_positive(keys::DDR_WIDTH)
    }

    pub fn num_kernels(&self) -> Result<usize, ProfileError> {
        self.get_positive(keys::NUM_KERNELS)
    }

    pub fn numeric_mode(&self) -> Result<NumericMode, ProfileError> {
        match self.require(keys::DATA_TYPE)? {
            "short" => Ok(NumericMode::Fixed16),
            "int32_t" => Ok(NumericMode::Fixed32),
            "float" => Ok(NumericMode::Float32),
            other => Err(ProfileError::InvalidValue {
                key: keys::DATA_TYPE.into(),
                value: other.into(),
                detail: "expected 'short', 'int32_t' or 'float'".into(),
            }),
        }
    }

    /// Whether an engine is compiled into this build. An absent flag means
    /// the engine is not present.
    pub fn is_enabled(&self, engine: Engine) -> Result<bool, ProfileError> {
        match self.get(engine.flag_key()) {
            None | Some("0") => Ok(false),
            Some("1") => Ok(true),
            Some(other) => Err(ProfileError::InvalidValue {
                key: engine.flag_key().into(),
                value: other.into(),
                detail: "expected '0' or '1'".into(),
            }),
        }
    }

    /// Fails with [`ProfileError::EngineNotEnabled`] unless the engine is built in.
    pub fn require_engine(&self, engine: Engine) -> Result<(), ProfileError> {
        if self.is_enabled(engine)? {
            Ok(())
        } else {
            Err(ProfileError::EngineNotEnabled { engine })
        }
    }

    pub fn dense_blocks(&self) -> Result<DenseBlocks, ProfileError> {
        let ddr = self.ddr_width()?;
        let m_blocks = self.get_positive(keys::GEMM_M_BLOCKS)?;
        let k_blocks = self.get_positive(keys::GEMM_K_BLOCKS)?;
        let n_blocks = self.get_positive(keys::GEMM_N_BLOCKS)?;
        Ok(DenseBlocks {
            min_m: ddr * k_blocks.max(m_blocks),
            min_k: ddr * k_blocks,
            min_n: ddr * n_blocks,
        })
    }

    pub fn spmv_blocks(&self) -> Result<SpmvBlocks, ProfileError> {
        let ddr = self.ddr_width()?;
        let width = self.get_positive(keys::SPMV_WIDTH)?;
        let mac_groups = self.get_positive(keys::SPMV_MAC_GROUPS)?;
        let num_cblocks = self.get_positive(keys::SPMV_NUM_CBLOCKS)?;
        let idx_bits = self.get_usize(keys::SPMV_COL_ADD_IDX_BITS)?;
        let k_vector_blocks = self.get_positive(keys::SPMV_K_VECTOR_BLOCKS)?;

        if idx_bits >= 16 {
            return Err(ProfileError::InvalidValue {
                key: keys::SPMV_COL_ADD_IDX_BITS.into(),
                value: idx_bits.to_string(),
                detail: "must be below 16".into(),
            });
        }
        let m_vector_blocks = (1usize << (16 - idx_bits)) / width / mac_groups / ddr;
        if m_vector_blocks == 0 {
            return Err(ProfileError::InvalidValue {
                key: keys::SPMV_COL_ADD_IDX_BITS.into(),
                value: idx_bits.to_string(),
                detail: "leaves no room for output vector blocks".into(),
            });
        }

        Ok(SpmvBlocks {
            width,
            mac_groups,
            min_m: mac_groups * width,
            nnz_granularity: ddr,
            num_cblocks,
            m_vector_blocks,
            capacity_c: width * mac_groups * m_vector_blocks * ddr,
            capacity_b: width * k_vector_blocks * ddr,
        })
    }

    pub fn uspmv_blocks(&self) -> Result<UspmvBlocks, ProfileError> {
        let ddr = self.ddr_width()?;
        Ok(UspmvBlocks {
            min_m: self.get_positive(keys::USPMV_INTERLEAVES)? * ddr,
            nnz_granularity: ddr,
            max_m: self.get_positive(keys::USPMV_M_VECTOR_BLOCKS)? * ddr,
            max_nnz: self.get_positive(keys::USPMV_NNZ_VECTOR_BLOCKS)? * ddr,
            stages: self.get_positive(keys::USPMV_STAGES)?,
        })
    }

    /// Returns the enabled engines, skipping malformed flags.
    pub fn enabled_engines(&self) -> Vec<Engine> {
        Engine::ALL
            .into_iter()
            .filter(|&e| self.is_enabled(e).unwrap_or(false))
            .collect()
    }

    /// Returns a one-line summary for logs and CLI output.
    pub fn summary(&self) -> String {
        let engines: Vec<&str> = self.enabled_engines().iter().map(|e| e.as_str()).collect();
        format!(
            "Profile: ddr width {}, data type {}, {} kernel(s), engines [{}]",
            self.get(keys::DDR_WIDTH).unwrap_or("?"),
            self.get(keys::DATA_TYPE).unwrap_or("?"),
            self.get(keys::NUM_KERNELS).unwrap_or("?"),
            engines.join(", "),
        )
    }
}

impl fmt::Display for HardwareProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.entries {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}
