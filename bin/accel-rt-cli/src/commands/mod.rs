// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

pub mod profile;
pub mod simulate;

use runtime::RuntimeConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Reads `path` when given, otherwise the built-in defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(p) => RuntimeConfig::from_file(p)
            .map_err(|e| anyhow::anyhow!("failed to load config '{}': {e}", p.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Applies a `--profile` override.
pub fn with_profile(mut config: RuntimeConfig, profile: Option<PathBuf>) -> RuntimeConfig {
    if let Some(p) = profile {
        config.profile_path = p;
    }
    config
}

pub fn banner(title: &str) {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║  {title:<52}║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
}
