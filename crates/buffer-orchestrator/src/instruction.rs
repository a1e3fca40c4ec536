// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Instructions and their 64-byte device encoding.
//!
//! ```text
//! dense   [op, A, B, C, X, m, k, n, lda, ldb, ldc, ldx, post, neg, 0, 0]
//! spmv    [op, A, B, C, m, k, nnz, relu, cblocks, capC, capB, 0, 0, 0, 0, 0]
//! uspmv   [op, A, B, C, runs, 0, ...]
//! ```
//!
//! Operands are page offsets into the kernel's device memory. `post` is
//! the packed post rescale and `neg` the packed negative-branch rescale
//! (see [`quant_codec::pack`]).

use crate::{BufferId, DeviceAddr};
use tile_core::{Engine, INSTRUCTION_BYTES};

/// Words per instruction.
pub const WORDS: usize = INSTRUCTION_BYTES / 4;

/// Operation performed by one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Opcode {
    /// `C = post(A·B + X)`.
    DenseLinear,
    /// `C = neg(post(A·B + X))`: bias, rescale and rectification fused.
    DenseFused,
    /// `c = act(A·b)` with a single-stage sparse `A`.
    SparseMatVec,
    /// A chain of sparse stages applied to each of `runs` input rows.
    MultiStageSparse,
}

impl Opcode {
    pub fn code(self) -> i32 {
        match self {
            Opcode::DenseLinear => 2,
            Opcode::SparseMatVec => 4,
            Opcode::MultiStageSparse => 5,
            Opcode::DenseFused => 8,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            2 => Some(Opcode::DenseLinear),
            4 => Some(Opcode::SparseMatVec),
            5 => Some(Opcode::MultiStageSparse),
            8 => Some(Opcode::DenseFused),
            _ => None,
        }
    }

    /// Engine that must be enabled in the build for this opcode.
    pub fn engine(self) -> Engine {
        match self {
            Opcode::DenseLinear => Engine::Gemm,
            Opcode::DenseFused => Engine::Fcn,
            Opcode::SparseMatVec => Engine::Spmv,
            Opcode::MultiStageSparse => Engine::Uspmv,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::DenseLinear => "dense-linear",
            Opcode::DenseFused => "dense-fused",
            Opcode::SparseMatVec => "sparse-matvec",
            Opcode::MultiStageSparse => "multi-stage-sparse",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar parameters, already validated and packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalars {
    Dense {
        m: usize,
        k: usize,
        n: usize,
        post: i32,
        negative: i16,
    },
    SparseMatVec {
        m: usize,
        k: usize,
        nnz: usize,
        relu: bool,
        num_cblocks: usize,
        capacity_c: usize,
        capacity_b: usize,
    },
    MultiStage {
        runs: usize,
    },
}

/// One validated operation bound to a kernel index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub a: BufferId,
    pub b: BufferId,
    pub c: BufferId,
    /// Bias operand of the dense opcodes.
    pub x: Option<BufferId>,
    pub scalars: Scalars,
    pub kernel: usize,
}

impl Instruction {
    /// Buffers read or written by this instruction.
    pub fn operands(&self) -> impl Iterator<Item = BufferId> + '_ {
        [Some(self.a), Some(self.b), Some(self.c), self.x]
            .into_iter()
            .flatten()
    }

    /// Encodes the instruction, resolving operands to device addresses.
    pub fn encode<E>(
        &self,
        mut resolve: impl FnMut(BufferId) -> Result<DeviceAddr, E>,
    ) -> Result<InstructionWord, E> {
        let mut w = [0i32; WORDS];
        w[0] = self.opcode.code();
        w[1] = resolve(self.a)?.page();
        w[2] = resolve(self.b)?.page();
        w[3] = resolve(self.c)?.page();
        match self.scalars {
            Scalars::Dense {
                m,
                k,
                n,
                post,
                negative,
            } => {
                w[4] = match self.x {
                    Some(x) => resolve(x)?.page(),
                    None => 0,
                };
                w[5] = m as i32;
                w[6] = k as i32;
                w[7] = n as i32;
                w[8] = k as i32;
                w[9] = n as i32;
                w[10] = n as i32;
                w[11] = n as i32;
                w[12] = post;
                w[13] = i32::from(negative);
            }
            Scalars::SparseMatVec {
                m,
                k,
                nnz,
                relu,
                num_cblocks,
                capacity_c,
                capacity_b,
            } => {
                w[4] = m as i32;
                w[5] = k as i32;
                w[6] = nnz as i32;
                w[7] = i32::from(relu);
                w[8] = num_cblocks as i32;
                w[9] = capacity_c as i32;
                w[10] = capacity_b as i32;
            }
            Scalars::MultiStage { runs } => {
                w[4] = runs as i32;
            }
        }
        Ok(InstructionWord(w))
    }
}

/// One encoded instruction as it sits in the device instruction page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionWord(pub [i32; WORDS]);

impl InstructionWord {
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_code(self.0[0])
    }

    pub fn field(&self, index: usize) -> i32 {
        self.0[index]
    }

    /// Operand address at word `index`.
    pub fn operand(&self, index: usize) -> DeviceAddr {
        DeviceAddr::from_page(self.0[index])
    }

    pub fn to_le_bytes(&self) -> [u8; INSTRUCTION_BYTES] {
        let mut out = [0u8; INSTRUCTION_BYTES];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.0) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }
}
