// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `accel-rt simulate` command: drive a synthetic network on every kernel.
//!
//! ```text
//! profile ─▶ SimDevice ─▶ AcceleratorSession
//!                              ├─ kernel 0 ─▶ pipeline ─▶ spawn_blocking (predict × N)
//!                              ├─ kernel 1 ─▶ pipeline ─▶ spawn_blocking (predict × N)
//!                              └─ …
//! ```
//!
//! Pipelines are built on the async task, then each one moves to its own
//! blocking task; kernels share nothing but the driver.

use buffer_orchestrator::sim::SimDevice;
use buffer_orchestrator::AcceleratorSession;
use model_ir::{graph::Validated, Activation, LayerDef, ModelGraph};
use quant_codec::scale_table::nearest_post_scale;
use quant_codec::{LayerScales, Rescale};
use runtime::{LayerPipelineRuntime, PredictMetrics, RuntimeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tile_core::{compare_within_tolerance, fill_mod, Matrix, NumericMode, Tolerance};

/// Fixed-point scale for inputs and weights of the synthetic network.
const FIXED_SCALE: f32 = 64.0;

pub struct SimulateArgs {
    pub profile: Option<PathBuf>,
    pub dims: String,
    pub batch: usize,
    pub iterations: usize,
    pub kernels: Option<usize>,
    pub sparse: bool,
    pub density: f64,
    pub json: bool,
}

struct KernelRun {
    kernel: usize,
    metrics: Vec<PredictMetrics>,
    output: Matrix<f32>,
}

pub async fn execute(config: RuntimeConfig, args: SimulateArgs) -> anyhow::Result<()> {
    let config = super::with_profile(config, args.profile.clone());
    if !args.json {
        super::banner("accel-rt · Simulator");
    }

    // ── Device ─────────────────────────────────────────────────
    let profile = Arc::new(config.load_profile().map_err(|e| {
        anyhow::anyhow!("failed to load profile '{}': {e}", config.profile_path.display())
    })?);
    let device = SimDevice::with_capacity(&config.bitstream, profile.clone(), config.parse_device_memory()?)?;
    let session = AcceleratorSession::new(device, profile.clone());

    let available = session.num_kernels();
    let kernels = args.kernels.unwrap_or(available);
    if kernels == 0 || kernels > available {
        anyhow::bail!("--kernels must be between 1 and {available}");
    }
    if args.batch == 0 || args.iterations == 0 {
        anyhow::bail!("--batch and --iterations must be positive");
    }

    // ── Model ──────────────────────────────────────────────────
    let dims = parse_dims(&args.dims)?;
    let graph = synthetic_graph(&dims, args.sparse, args.density)?;
    let fixed = !args.sparse && profile.numeric_mode()? == NumericMode::Fixed16;
    let (scales, input_scale) = if fixed {
        (vec![synthetic_scales(); graph.num_layers()], FIXED_SCALE)
    } else {
        (Vec::new(), 1.0)
    };

    if !args.json {
        println!("  {}", profile.summary());
        println!("  {}", graph.summary());
        println!(
            "  Kernels: {kernels}, batch {}, {} iterations each",
            args.batch, args.iterations
        );
        println!();
    }

    // ── Pipelines ──────────────────────────────────────────────
    let mut pipelines = Vec::with_capacity(kernels);
    for index in 0..kernels {
        let ctx = session.open_kernel(index)?;
        let pipeline = LayerPipelineRuntime::build(ctx, &graph, &scales, &config)?;
        tracing::info!("{}", pipeline.summary());
        pipelines.push(pipeline);
    }

    let input = Arc::new(Matrix::from_vec(
        args.batch,
        graph.input_dim(),
        fill_mod(args.batch * graph.input_dim(), 4.0),
    )?);

    let handles: Vec<_> = pipelines
        .into_iter()
        .enumerate()
        .map(|(kernel, mut pipeline)| {
            let input = Arc::clone(&input);
            let iterations = args.iterations;
            tokio::task::spawn_blocking(move || -> anyhow::Result<KernelRun> {
                let mut metrics = Vec::with_capacity(iterations);
                let mut output = Matrix::zeros(0, 0);
                for _ in 0..iterations {
                    let prediction = pipeline.predict(&input, input_scale)?;
                    output = prediction.output_f32();
                    metrics.push(prediction.metrics);
                }
                Ok(KernelRun {
                    kernel,
                    metrics,
                    output,
                })
            })
        })
        .collect();

    let mut runs = Vec::with_capacity(handles.len());
    for handle in handles {
        runs.push(handle.await??);
    }

    // ── Report ─────────────────────────────────────────────────
    if args.json {
        let report: Vec<_> = runs
            .iter()
            .map(|r| serde_json::json!({ "kernel": r.kernel, "metrics": r.metrics }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "  {:<7} {:>6} {:>9} {:>11} {:>11} {:>12}",
        "Kernel", "Instr", "Executes", "Mean", "Last", "Rows/s"
    );
    println!("  {}", "-".repeat(62));
    for run in &runs {
        print_row(run);
    }
    println!();

    let reference = &runs[0].output;
    let agree = runs[1..].iter().all(|r| {
        compare_within_tolerance(reference, &r.output, Tolerance::default()).is_match()
    });
    println!("  Output: {}×{}", reference.rows(), reference.cols());
    if runs.len() > 1 {
        println!("  Kernels agree: {}", if agree { "yes" } else { "NO" });
    }
    if let Some(last) = runs[0].metrics.last() {
        println!("  {}", last.summary());
    }
    Ok(())
}

fn print_row(run: &KernelRun) {
    let Some(last) = run.metrics.last() else {
        return;
    };
    let total: Duration = run.metrics.iter().map(|m| m.total_duration).sum();
    let mean = total / run.metrics.len() as u32;
    println!(
        "  {:<7} {:>6} {:>9} {:>9.3}ms {:>9.3}ms {:>12.0}",
        run.kernel,
        last.instructions,
        last.executes,
        mean.as_secs_f64() * 1000.0,
        last.total_duration.as_secs_f64() * 1000.0,
        last.throughput(),
    );
}

fn parse_dims(s: &str) -> anyhow::Result<Vec<usize>> {
    let dims = s
        .split(',')
        .map(|d| {
            d.trim()
                .parse::<usize>()
                .map_err(|e| anyhow::anyhow!("invalid layer width '{}': {e}", d.trim()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if dims.len() < 2 {
        anyhow::bail!("--dims needs an input width and at least one layer");
    }
    Ok(dims)
}

/// Rectified layers with a linear head. Weights follow a fixed pattern so
/// runs are reproducible; sparse builds keep roughly `density` of them and
/// drop the bias.
fn synthetic_graph(dims: &[usize], sparse: bool, density: f64) -> anyhow::Result<ModelGraph<Validated>> {
    if sparse && !(f64::EPSILON..=1.0).contains(&density) {
        anyhow::bail!("--density must be in (0, 1]");
    }
    let keep_every = (1.0 / density).round().max(1.0) as usize;
    let last = dims.len() - 2;

    let mut layers = Vec::with_capacity(dims.len() - 1);
    for (index, pair) in dims.windows(2).enumerate() {
        let (in_dim, out_dim) = (pair[0], pair[1]);
        let weight = Matrix::from_fn(in_dim, out_dim, |i, j| {
            let flat = i * out_dim + j;
            if sparse && flat % keep_every != 0 {
                0.0
            } else {
                ((flat * 7 + index) % 11) as f32 / 11.0 - 0.45
            }
        });
        let bias = if sparse {
            vec![0.0; out_dim]
        } else {
            (0..out_dim).map(|j| (j % 3) as f32 * 0.1).collect()
        };
        let activation = if index == last {
            Activation::Identity
        } else {
            Activation::Rectified
        };
        let layer = LayerDef::new(format!("fc.{index}"), index, weight, bias, activation)?;
        layers.push(if sparse { layer.sparse() } else { layer });
    }
    Ok(ModelGraph::new("synthetic", layers).validate()?)
}

/// Keeps activations at `FIXED_SCALE` from layer to layer.
fn synthetic_scales() -> LayerScales {
    LayerScales {
        weight_scale: FIXED_SCALE,
        bias_scale: FIXED_SCALE * FIXED_SCALE,
        post: nearest_post_scale(1.0 / f64::from(FIXED_SCALE)),
        negative: Rescale::IDENTITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dims() {
        assert_eq!(parse_dims("128, 64,8").unwrap(), vec![128, 64, 8]);
        assert!(parse_dims("128").is_err());
        assert!(parse_dims("128,x").is_err());
    }

    #[test]
    fn test_synthetic_graph_shapes() {
        let graph = synthetic_graph(&[16, 8, 4], false, 1.0).unwrap();
        assert_eq!(graph.num_layers(), 2);
        assert_eq!(graph.output_dim(), 4);
        assert_eq!(graph.layer(1).unwrap().activation, Activation::Identity);
    }

    #[test]
    fn test_synthetic_sparse_density() {
        let graph = synthetic_graph(&[40, 40], true, 0.25).unwrap();
        let layer = graph.layer(0).unwrap();
        assert!(graph.is_sparse());
        assert!(layer.density() <= 0.25);
        assert!(synthetic_graph(&[4, 4], true, 0.0).is_err());
    }

    #[test]
    fn test_synthetic_scales_are_valid() {
        assert!(synthetic_scales().validate().is_ok());
    }
}
