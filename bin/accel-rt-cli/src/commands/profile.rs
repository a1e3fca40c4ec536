// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `accel-rt profile` command: print what a build supports.
//!
//! Derived values that need keys the profile lacks are reported as
//! unavailable rather than failing the whole command.

use std::path::PathBuf;
use tile_core::{Engine, HardwareProfile, INSTRUCTION_CAPACITY, PAGE_SIZE};

pub async fn execute(config: runtime::RuntimeConfig, profile: Option<PathBuf>) -> anyhow::Result<()> {
    let config = super::with_profile(config, profile);
    super::banner("accel-rt · Hardware Profile");

    let profile = config.load_profile().map_err(|e| {
        anyhow::anyhow!("failed to load profile '{}': {e}", config.profile_path.display())
    })?;

    println!("  File:     {}", config.profile_path.display());
    println!("  {}", profile.summary());
    println!();

    // ── Engines ────────────────────────────────────────────────
    println!("  {:<8} {:>8}", "Engine", "Enabled");
    println!("  {}", "-".repeat(17));
    for engine in Engine::ALL {
        let state = match profile.is_enabled(engine) {
            Ok(true) => "yes".to_string(),
            Ok(false) => "no".to_string(),
            Err(e) => format!("? ({e})"),
        };
        println!("  {:<8} {:>8}", engine.as_str(), state);
    }
    println!();

    print_dense(&profile);
    print_spmv(&profile);
    print_uspmv(&profile);

    println!("  Device");
    println!("   Instruction queue: {INSTRUCTION_CAPACITY} words");
    println!("   Page size:         {PAGE_SIZE} B");
    println!("   Memory per kernel: {}", config.parse_device_memory()?);
    Ok(())
}

fn print_dense(profile: &HardwareProfile) {
    println!("  Dense (gemm / fcn)");
    match (profile.numeric_mode(), profile.dense_blocks()) {
        (Ok(mode), Ok(blocks)) => {
            println!("   Numeric mode: {}", mode.as_str());
            println!(
                "   min m × k × n: {} × {} × {}",
                blocks.min_m, blocks.min_k, blocks.min_n
            );
            println!("   Chain block:   {}", blocks.chain_block());
        }
        (Err(e), _) | (_, Err(e)) => println!("   unavailable: {e}"),
    }
    println!();
}

fn print_spmv(profile: &HardwareProfile) {
    println!("  Single-vector sparse (spmv)");
    match profile.spmv_blocks() {
        Ok(b) => {
            println!("   min m:            {}", b.min_m);
            println!("   nnz granularity:  {}", b.nnz_granularity);
            println!("   m vector blocks:  {}", b.m_vector_blocks);
            println!("   Output capacity:  {}", b.capacity_c);
            println!("   Input capacity:   {}", b.capacity_b);
        }
        Err(e) => println!("   unavailable: {e}"),
    }
    println!();
}

fn print_uspmv(profile: &HardwareProfile) {
    println!("  Multi-stage sparse (uspmv)");
    match profile.uspmv_blocks() {
        Ok(b) => {
            println!("   Stages:           {}", b.stages);
            println!("   min m:            {}", b.min_m);
            println!("   nnz granularity:  {}", b.nnz_granularity);
            println!("   max m:            {}", b.max_m);
            println!("   max nnz:          {}", b.max_nnz);
        }
        Err(e) => println!("   unavailable: {e}"),
    }
    println!();
}
