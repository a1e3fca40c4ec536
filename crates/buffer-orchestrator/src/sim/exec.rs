// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Software execution of one instruction word.

use crate::driver::DeviceAddr;
use crate::instruction::{InstructionWord, Opcode};
use crate::DriverError;
use quant_codec::pack::{unpack_negative, unpack_post_scale};
use quant_codec::{dense_forward_fixed, dense_forward_float, Rescale};
use sparse_format::reference::{apply_activation, multiply, stage_chain};
use sparse_format::SparseImage;
use std::collections::BTreeMap;
use tile_core::{Element, HardwareProfile, Matrix, NumericMode};

type Memory = BTreeMap<DeviceAddr, Vec<u8>>;

fn fault(kernel: usize, reason: impl std::fmt::Display) -> DriverError {
    DriverError::ExecutionFault {
        kernel,
        reason: reason.to_string(),
    }
}

fn region(memory: &Memory, kernel: usize, addr: DeviceAddr) -> Result<&[u8], DriverError> {
    memory
        .get(&addr)
        .map(Vec::as_slice)
        .ok_or(DriverError::UnknownAddress { kernel, addr: addr.0 })
}

fn load<T: Element>(
    memory: &Memory,
    kernel: usize,
    addr: DeviceAddr,
    rows: usize,
    cols: usize,
) -> Result<Matrix<T>, DriverError> {
    let bytes = region(memory, kernel, addr)?;
    let len = rows * cols * T::DTYPE.size_bytes();
    let slice = bytes
        .get(..len)
        .ok_or_else(|| fault(kernel, format!("{rows}×{cols} operand overruns buffer at {addr}")))?;
    Matrix::from_le_bytes(rows, cols, slice).map_err(|e| fault(kernel, e))
}

fn store(memory: &mut Memory, kernel: usize, addr: DeviceAddr, bytes: &[u8]) -> Result<(), DriverError> {
    let buf = memory
        .get_mut(&addr)
        .ok_or(DriverError::UnknownAddress { kernel, addr: addr.0 })?;
    let dst = buf
        .get_mut(..bytes.len())
        .ok_or_else(|| fault(kernel, format!("result overruns buffer at {addr}")))?;
    dst.copy_from_slice(bytes);
    Ok(())
}

fn dim(word: &InstructionWord, index: usize) -> usize {
    word.field(index).max(0) as usize
}

pub(super) fn execute_word(
    memory: &mut Memory,
    kernel: usize,
    word: &InstructionWord,
    profile: &HardwareProfile,
) -> Result<(), DriverError> {
    let opcode = word
        .opcode()
        .ok_or_else(|| fault(kernel, format!("unknown opcode {}", word.field(0))))?;
    tracing::trace!(kernel, %opcode, "Executing instruction");
    match opcode {
        Opcode::DenseLinear | Opcode::DenseFused => dense(memory, kernel, word, opcode, profile),
        Opcode::SparseMatVec => sparse_matvec(memory, kernel, word),
        Opcode::MultiStageSparse => multi_stage(memory, kernel, word),
    }
}

fn dense(
    memory: &mut Memory,
    kernel: usize,
    word: &InstructionWord,
    opcode: Opcode,
    profile: &HardwareProfile,
) -> Result<(), DriverError> {
    let (a, b, c, x) = (word.operand(1), word.operand(2), word.operand(3), word.operand(4));
    let (m, k, n) = (dim(word, 5), dim(word, 6), dim(word, 7));
    let post = unpack_post_scale(word.field(12));
    let negative = match opcode {
        Opcode::DenseFused => unpack_negative(word.field(13) as i16),
        _ => Rescale::IDENTITY,
    };

    let out = match profile.numeric_mode()? {
        NumericMode::Fixed16 => {
            let a = load::<i16>(memory, kernel, a, m, k)?;
            let b = load::<i16>(memory, kernel, b, k, n)?;
            let x = load::<i32>(memory, kernel, x, m, n)?;
            dense_forward_fixed(&a, &b, &x, post, negative)
                .map_err(|e| fault(kernel, e))?
                .to_le_bytes()
        }
        NumericMode::Float32 => {
            let a = load::<f32>(memory, kernel, a, m, k)?;
            let b = load::<f32>(memory, kernel, b, k, n)?;
            let x = load::<f32>(memory, kernel, x, m, n)?;
            dense_forward_float(&a, &b, &x, negative)
                .map_err(|e| fault(kernel, e))?
                .to_le_bytes()
        }
        NumericMode::Fixed32 => return Err(fault(kernel, "32-bit integer datapath not modelled")),
    };
    store(memory, kernel, c, &out)
}

fn sparse_image(memory: &Memory, kernel: usize, addr: DeviceAddr) -> Result<SparseImage, DriverError> {
    SparseImage::from_bytes(region(memory, kernel, addr)?).map_err(|e| fault(kernel, e))
}

fn sparse_matvec(memory: &mut Memory, kernel: usize, word: &InstructionWord) -> Result<(), DriverError> {
    let (a, b, c) = (word.operand(1), word.operand(2), word.operand(3));
    let (m, k) = (dim(word, 4), dim(word, 5));
    let relu = word.field(7) != 0;

    let image = sparse_image(memory, kernel, a)?;
    let x = load::<f32>(memory, kernel, b, k, 1)?;
    let (rows, cols, values) = image.stage_entries(0);
    let mut y = multiply(rows, cols, values, x.as_slice(), m).map_err(|e| fault(kernel, e))?;
    if relu {
        apply_activation(&mut y, 0.0);
    }
    let out = Matrix::from_vec(m, 1, y).map_err(|e| fault(kernel, e))?;
    store(memory, kernel, c, &out.to_le_bytes())
}

fn multi_stage(memory: &mut Memory, kernel: usize, word: &InstructionWord) -> Result<(), DriverError> {
    let (a, b, c) = (word.operand(1), word.operand(2), word.operand(3));
    let runs = dim(word, 4);

    let image = sparse_image(memory, kernel, a)?;
    let input = load::<f32>(memory, kernel, b, runs, image.input_width())?;
    let out = stage_chain(&image, &input).map_err(|e| fault(kernel, e))?;
    store(memory, kernel, c, &out.to_le_bytes())
}
