// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Engine selection and the pieces every pipeline shares.
//!
//! ```text
//!                      ┌── all dense  ──▶ DensePipeline  (gemm / fcn)
//! ModelGraph<Validated>┤
//!                      └── all sparse ──▶ SparsePipeline (spmv / uspmv)
//! ```

use crate::{DensePipeline, PipelineState, PredictMetrics, RuntimeConfig, RuntimeError, SparsePipeline};
use buffer_orchestrator::{BufferId, Driver, ExecMode, KernelContext, TransferMode, TransferStats};
use model_ir::{graph::Validated, ModelGraph, WeightFormat};
use quant_codec::LayerScales;
use std::time::{Duration, Instant};
use tile_core::{HostMatrix, Matrix};

// ── Options ────────────────────────────────────────────────────────

/// Transfer and execution behaviour of one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub transfer: TransferMode,
    pub exec: ExecMode,
    /// Fetch every layer boundary, not just the final output.
    pub retrieve_intermediates: bool,
    /// Time each call.
    pub profiling: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            transfer: config.transfer_mode(),
            exec: config.exec_mode(),
            retrieve_intermediates: config.retrieve_intermediates,
            profiling: config.enable_profiling,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            transfer: TransferMode::Sync,
            exec: ExecMode::Sync,
            retrieve_intermediates: false,
            profiling: true,
        }
    }
}

// ── Prediction ─────────────────────────────────────────────────────

/// The result of one `predict` call.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// `batch × out`; `I16` for fixed-point dense builds, `F32` otherwise.
    pub output: HostMatrix,
    /// Outputs of every instruction but the last, `batch × width`, when
    /// intermediate retrieval is enabled.
    pub intermediates: Vec<HostMatrix>,
    pub metrics: PredictMetrics,
}

impl Prediction {
    /// The output as `f32`, without rescaling fixed-point values.
    pub fn output_f32(&self) -> Matrix<f32> {
        self.output.to_f32()
    }
}

// ── Shared helpers ─────────────────────────────────────────────────

/// Sends `ids` and joins them when transfers are deferred.
pub(crate) fn upload<D: Driver>(
    ctx: &mut KernelContext<D>,
    ids: &[BufferId],
    mode: TransferMode,
) -> Result<(), RuntimeError> {
    for &id in ids {
        ctx.send(id, mode)?;
    }
    if mode == TransferMode::Deferred && !ids.is_empty() {
        ctx.wait()?;
    }
    Ok(())
}

/// Fetches `ids` and joins them when transfers are deferred.
pub(crate) fn download<D: Driver>(
    ctx: &mut KernelContext<D>,
    ids: &[BufferId],
    mode: TransferMode,
) -> Result<(), RuntimeError> {
    for &id in ids {
        ctx.fetch(id, mode)?;
    }
    if mode == TransferMode::Deferred && !ids.is_empty() {
        ctx.wait()?;
    }
    Ok(())
}

/// Executes the loaded program and joins it when asynchronous.
pub(crate) fn run<D: Driver>(ctx: &mut KernelContext<D>, mode: ExecMode) -> Result<(), RuntimeError> {
    ctx.execute(mode)?;
    if mode == ExecMode::Async {
        ctx.wait()?;
    }
    Ok(())
}

/// Releases `ids`, logging rather than failing.
pub(crate) fn release_all<D: Driver>(ctx: &mut KernelContext<D>, ids: &[BufferId]) {
    for &id in ids {
        if let Err(e) = ctx.release(id) {
            tracing::warn!(kernel = ctx.index(), %id, error = %e, "Failed to release buffer");
        }
    }
}

/// Drops everything in flight after a failed call. Device contents are
/// undefined afterwards, so callers also forget their resident state.
pub(crate) fn abandon<D: Driver>(ctx: &mut KernelContext<D>) {
    if let Err(e) = ctx.wait() {
        tracing::warn!(kernel = ctx.index(), error = %e, "Failed to join transfers");
    }
    if let Err(e) = ctx.clear_queue() {
        tracing::warn!(kernel = ctx.index(), error = %e, "Failed to clear instruction queue");
    }
}

pub(crate) fn check_input(input: &Matrix<f32>, in_dim: usize) -> Result<usize, RuntimeError> {
    let (batch, width) = input.shape();
    if batch == 0 {
        return Err(RuntimeError::InputShape("batch is empty".into()));
    }
    if width != in_dim {
        return Err(RuntimeError::InputShape(format!(
            "input has {width} features, model expects {in_dim}"
        )));
    }
    Ok(batch)
}

/// Lap timer that records nothing when profiling is off.
pub(crate) struct Stopwatch {
    start: Option<Instant>,
    lap: Option<Instant>,
}

impl Stopwatch {
    pub(crate) fn start(enabled: bool) -> Self {
        let now = enabled.then(Instant::now);
        Self { start: now, lap: now }
    }

    pub(crate) fn lap(&mut self) -> Duration {
        let Some(prev) = self.lap else {
            return Duration::ZERO;
        };
        let now = Instant::now();
        self.lap = Some(now);
        now - prev
    }

    pub(crate) fn total(&self) -> Duration {
        self.start.map_or(Duration::ZERO, |s| s.elapsed())
    }
}

// ── LayerPipelineRuntime ───────────────────────────────────────────

/// A pipeline bound to one kernel, selected from the layer descriptors.
///
/// # Example
/// ```
/// use buffer_orchestrator::{sim::SimDevice, AcceleratorSession};
/// use model_ir::{Activation, LayerDef, ModelGraph};
/// use runtime::{LayerPipelineRuntime, RuntimeConfig};
/// use std::path::Path;
/// use tile_core::{HardwareProfile, Matrix};
///
/// let profile = HardwareProfile::parse(
///     "GEMX_ddrWidth=4 GEMX_gemmMBlocks=1 GEMX_gemmKBlocks=1 GEMX_gemmNBlocks=1 \
///      GEMX_dataType=float GEMX_numKernels=1 GEMX_runGemm=1 GEMX_runFcn=1",
/// )?;
/// let session = AcceleratorSession::<SimDevice>::open(Path::new("sim.xclbin"), profile)?;
/// let fc = LayerDef::new("fc.0", 0, Matrix::filled(6, 3, 1.0), vec![0.0; 3], Activation::Rectified)?;
/// let graph = ModelGraph::new("tiny", vec![fc]).validate()?;
///
/// let mut pipeline =
///     LayerPipelineRuntime::build(session.open_kernel(0)?, &graph, &[], &RuntimeConfig::default())?;
/// let out = pipeline.predict(&Matrix::filled(2, 6, 0.5), 1.0)?;
/// assert_eq!(out.output.shape(), (2, 3));
/// assert_eq!(out.output_f32().get(1, 2), 3.0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub enum LayerPipelineRuntime<D: Driver> {
    Dense(DensePipeline<D>),
    Sparse(SparsePipeline<D>),
}

impl<D: Driver> LayerPipelineRuntime<D> {
    /// Builds the pipeline the layer formats call for.
    ///
    /// `scales` holds one entry per layer for fixed-point dense builds and
    /// is ignored otherwise.
    pub fn build(
        ctx: KernelContext<D>,
        graph: &ModelGraph<Validated>,
        scales: &[LayerScales],
        config: &RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        let options = PipelineOptions::from_config(config);
        let sparse = graph
            .iter_layers()
            .filter(|l| l.format == WeightFormat::Sparse)
            .count();

        if sparse == 0 {
            Ok(Self::Dense(DensePipeline::new(ctx, graph, scales, options)?))
        } else if sparse == graph.num_layers() {
            Ok(Self::Sparse(SparsePipeline::new(
                ctx,
                graph,
                config.sparse_engine()?,
                options,
            )?))
        } else {
            Err(RuntimeError::Unsupported {
                engine: "layer",
                detail: format!(
                    "model '{}' mixes {sparse} sparse and {} dense layers",
                    graph.name,
                    graph.num_layers() - sparse
                ),
            })
        }
    }

    /// Runs `input` (`batch × in`) through every layer.
    ///
    /// `input_scale` quantizes the input for fixed-point dense builds.
    pub fn predict(&mut self, input: &Matrix<f32>, input_scale: f32) -> Result<Prediction, RuntimeError> {
        match self {
            Self::Dense(p) => p.predict(input, input_scale),
            Self::Sparse(p) => p.predict(input),
        }
    }

    /// `"dense"`, `"spmv"` or `"uspmv"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dense(_) => "dense",
            Self::Sparse(p) => p.engine().as_str(),
        }
    }

    pub fn state(&self) -> PipelineState {
        match self {
            Self::Dense(p) => p.state(),
            Self::Sparse(p) => p.state(),
        }
    }

    pub fn num_layers(&self) -> usize {
        match self {
            Self::Dense(p) => p.num_layers(),
            Self::Sparse(p) => p.num_layers(),
        }
    }

    pub fn context(&self) -> &KernelContext<D> {
        match self {
            Self::Dense(p) => p.context(),
            Self::Sparse(p) => p.context(),
        }
    }

    pub fn stats(&self) -> &TransferStats {
        self.context().stats()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} pipeline on kernel {}: {} layers, {}",
            self.kind(),
            self.context().index(),
            self.num_layers(),
            self.stats().summary()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffer_orchestrator::sim::SimDevice;
    use buffer_orchestrator::AcceleratorSession;
    use model_ir::{Activation, LayerDef};
    use std::path::Path;
    use tile_core::HardwareProfile;

    fn session() -> AcceleratorSession<SimDevice> {
        let profile = HardwareProfile::parse(
            "GEMX_ddrWidth=4 GEMX_gemmMBlocks=1 GEMX_gemmKBlocks=1 GEMX_gemmNBlocks=1 \
             GEMX_dataType=float GEMX_numKernels=1 GEMX_runGemm=1 GEMX_runFcn=1 \
             GEMX_runUspmv=1 GEMX_uspmvInterleaves=1 GEMX_uspmvStages=1 \
             GEMX_uspmvMvectorBlocks=16 GEMX_uspmvNnzVectorBlocks=16",
        )
        .unwrap();
        AcceleratorSession::open(Path::new("sim.xclbin"), profile).unwrap()
    }

    fn layer(index: usize, sparse: bool) -> LayerDef {
        let l = LayerDef::new(
            format!("fc.{index}"),
            index,
            Matrix::from_fn(4, 4, |r, c| if r == c { 1.0 } else { 0.0 }),
            vec![0.0; 4],
            Activation::Identity,
        )
        .unwrap();
        if sparse {
            l.sparse()
        } else {
            l
        }
    }

    #[test]
    fn test_selects_by_format() {
        let session = session();
        let dense = ModelGraph::new("d", vec![layer(0, false)]).validate().unwrap();
        let p = LayerPipelineRuntime::build(session.open_kernel(0).unwrap(), &dense, &[], &RuntimeConfig::default())
            .unwrap();
        assert_eq!(p.kind(), "dense");
        drop(p);

        let sparse = ModelGraph::new("s", vec![layer(0, true)]).validate().unwrap();
        let p = LayerPipelineRuntime::build(session.open_kernel(0).unwrap(), &sparse, &[], &RuntimeConfig::default())
            .unwrap();
        assert_eq!(p.kind(), "uspmv");
        assert_eq!(p.num_layers(), 1);
    }

    #[test]
    fn test_mixed_formats_rejected() {
        let session = session();
        let graph = ModelGraph::new("mixed", vec![layer(0, false), layer(1, true)])
            .validate()
            .unwrap();
        let err = LayerPipelineRuntime::build(
            session.open_kernel(0).unwrap(),
            &graph,
            &[],
            &RuntimeConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, RuntimeError::Unsupported { .. }));
    }

    #[test]
    fn test_check_input() {
        assert_eq!(check_input(&Matrix::zeros(3, 4), 4).unwrap(), 3);
        assert!(check_input(&Matrix::zeros(0, 4), 4).is_err());
        assert!(check_input(&Matrix::zeros(3, 5), 4).is_err());
    }

    #[test]
    fn test_stopwatch_disabled() {
        let mut sw = Stopwatch::start(false);
        assert_eq!(sw.lap(), Duration::ZERO);
        assert_eq!(sw.total(), Duration::ZERO);
    }
}
