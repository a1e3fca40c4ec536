// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # accel-rt
//!
//! Command-line interface for the accelerator runtime.
//!
//! ## Usage
//! ```bash
//! # Print the constants derived from a hardware profile
//! accel-rt profile --profile ./profiles/fcn-short.txt
//!
//! # Run a synthetic 128→64→32→8 network on every kernel of the build
//! accel-rt simulate --profile ./profiles/fcn-float.txt --dims 128,64,32,8 --batch 16
//!
//! # Same network stored sparse, on the multi-stage engine
//! accel-rt simulate --profile ./profiles/uspmv-float.txt --sparse --density 0.1
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "accel-rt",
    about = "Layer pipeline runtime for a fixed-function linear-algebra accelerator",
    version,
    author
)]
struct Cli {
    /// Path to a TOML runtime configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the block sizes and capacities derived from a hardware profile.
    Profile {
        /// Profile file (defaults to the configured `profile_path`).
        #[arg(short, long)]
        profile: Option<PathBuf>,
    },

    /// Run a synthetic chained network on the simulated device.
    Simulate {
        /// Profile file (defaults to the configured `profile_path`).
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// Comma-separated layer widths, input first (e.g. "128,64,32,8").
        #[arg(short, long, default_value = "128,64,32,8")]
        dims: String,

        /// Rows per prediction.
        #[arg(short, long, default_value_t = 16)]
        batch: usize,

        /// Predictions per kernel.
        #[arg(short, long, default_value_t = 10)]
        iterations: usize,

        /// Kernels to drive (defaults to every kernel of the build).
        #[arg(short, long)]
        kernels: Option<usize>,

        /// Store the weights sparse and run on a sparse engine.
        #[arg(long)]
        sparse: bool,

        /// Fraction of nonzero weights for `--sparse`.
        #[arg(long, default_value_t = 0.1)]
        density: f64,

        /// Print the per-kernel metrics as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Profile { profile } => commands::profile::execute(config, profile).await,
        Commands::Simulate {
            profile,
            dims,
            batch,
            iterations,
            kernels,
            sparse,
            density,
            json,
        } => {
            let args = commands::simulate::SimulateArgs {
                profile,
                dims,
                batch,
                iterations,
                kernels,
                sparse,
                density,
                json,
            };
            commands::simulate::execute(config, args).await
        }
    }
}
