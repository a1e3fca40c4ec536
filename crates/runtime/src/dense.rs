// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dense pipeline on the GEMM / FCN engines.
//!
//! Every layer runs transposed, so the batch streams along `n`:
//!
//! ```text
//!   A_i = W_iᵀ (m_i × k_i)   resident, sent once
//!   X_i       (m_i × n)      bias broadcast, sent per batch size
//!   act_0 (k_0 × n) ─▶ act_1 (m_0 × n) ─▶ … ─▶ act_L (m_{L-1} × n)
//! ```
//!
//! `m` and `k` pad to the chain block, so `act_{i+1}` is both the output
//! of layer `i` and the input of layer `i+1` without any copy.

use crate::pipeline::{abandon, check_input, download, release_all, run, upload, Stopwatch};
use crate::{PipelineOptions, PipelineState, PredictMetrics, Prediction, RuntimeError};
use buffer_orchestrator::{BufferId, Driver, KernelContext, OrchestratorError};
use model_ir::{graph::Validated, Activation, LayerDef, ModelGraph, WeightFormat};
use quant_codec::{codec, pack, LayerScales, Rescale};
use tile_core::layout::round_up;
use tile_core::{DType, Engine, HostMatrix, Matrix, NumericMode, PaddedMatrix, INSTRUCTION_CAPACITY};

/// Bias values before broadcasting over the batch.
enum BiasValues {
    Fixed(Vec<i32>),
    Float(Vec<f32>),
}

impl BiasValues {
    /// `rows × cols`, every column a copy of the bias; padded rows are zero.
    fn broadcast(&self, rows: usize, cols: usize) -> HostMatrix {
        match self {
            Self::Fixed(b) => Matrix::from_fn(rows, cols, |r, _| b.get(r).copied().unwrap_or(0)).into(),
            Self::Float(b) => Matrix::from_fn(rows, cols, |r, _| b.get(r).copied().unwrap_or(0.0)).into(),
        }
    }
}

struct DenseLayer {
    name: String,
    weight: BufferId,
    bias: BiasValues,
    /// Padded output rows.
    m: usize,
    out_dim: usize,
    fused: bool,
    post: Rescale,
    negative: Rescale,
}

/// Buffers that depend on the batch size.
struct BatchBuffers {
    batch: usize,
    activations: Vec<BufferId>,
    biases: Vec<BufferId>,
}

impl BatchBuffers {
    fn ids(&self) -> Vec<BufferId> {
        self.activations.iter().chain(&self.biases).copied().collect()
    }
}

/// Sequential dense network resident on one kernel.
pub struct DensePipeline<D: Driver> {
    ctx: KernelContext<D>,
    mode: NumericMode,
    layers: Vec<DenseLayer>,
    in_dim: usize,
    /// Padded input rows.
    k0: usize,
    min_n: usize,
    chain_block: usize,
    options: PipelineOptions,
    memo: Option<BatchBuffers>,
    state: PipelineState,
    resident: bool,
}

/// Negative-branch rescale for a layer. A rectified layer keeps a
/// calibrated leaky branch; an identity branch on it means plain clamping.
fn negative_branch(activation: Activation, calibrated: Rescale) -> Rescale {
    match activation {
        Activation::Identity => Rescale::IDENTITY,
        Activation::Rectified if calibrated.is_identity() => Rescale::RECTIFY,
        Activation::Rectified => calibrated,
    }
}

impl<D: Driver> DensePipeline<D> {
    /// Quantizes, pads, registers and sends every layer's weight.
    ///
    /// Fixed-point builds take one [`LayerScales`] per layer; float builds
    /// ignore `scales`. Nothing is sent unless every layer validates.
    pub fn new(
        mut ctx: KernelContext<D>,
        graph: &ModelGraph<Validated>,
        scales: &[LayerScales],
        options: PipelineOptions,
    ) -> Result<Self, RuntimeError> {
        let profile = ctx.profile();
        let mode = profile.numeric_mode()?;
        if mode == NumericMode::Fixed32 {
            return Err(OrchestratorError::TypeMismatch(format!(
                "dense pipeline cannot run a '{}' build",
                mode.as_str()
            ))
            .into());
        }
        if mode == NumericMode::Fixed16 && scales.len() != graph.num_layers() {
            return Err(RuntimeError::ConfigError(format!(
                "fixed-point build needs {} layer scales, got {}",
                graph.num_layers(),
                scales.len()
            )));
        }

        let blocks = profile.dense_blocks()?;
        let chain_block = blocks.chain_block();
        let min_n = blocks.min_n;

        let mut prepared = Vec::with_capacity(graph.num_layers());
        for layer in graph.iter_layers() {
            if layer.format != WeightFormat::Dense {
                return Err(RuntimeError::Unsupported {
                    engine: "dense",
                    detail: format!("layer '{}' is stored sparse", layer.name),
                });
            }
            let engine = match layer.activation {
                Activation::Rectified => Engine::Fcn,
                Activation::Identity => Engine::Gemm,
            };
            profile.require_engine(engine)?;
            let scale = scales.get(layer.index).copied();
            prepared.push(prepare_layer(layer, mode, scale, chain_block)?);
        }

        let mut layers = Vec::with_capacity(prepared.len());
        for (layer, weight) in graph.iter_layers().zip(prepared) {
            let (host, bias, post, negative) = weight;
            let m = host.padded_shape().0;
            let id = ctx.register(host.into_host())?;
            layers.push(DenseLayer {
                name: layer.name.clone(),
                weight: id,
                bias,
                m,
                out_dim: layer.out_dim(),
                fused: layer.activation == Activation::Rectified,
                post,
                negative,
            });
        }

        let k0 = round_up(graph.input_dim(), chain_block, "k")?;
        let mut pipeline = Self {
            ctx,
            mode,
            layers,
            in_dim: graph.input_dim(),
            k0,
            min_n,
            chain_block,
            options,
            memo: None,
            state: PipelineState::Idle,
            resident: false,
        };
        pipeline.ensure_resident()?;

        tracing::info!(
            model = %graph.name,
            kernel = pipeline.ctx.index(),
            layers = pipeline.layers.len(),
            mode = mode.as_str(),
            chain_block,
            "Dense pipeline ready"
        );
        Ok(pipeline)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn context(&self) -> &KernelContext<D> {
        &self.ctx
    }

    /// Batch size the intermediate buffers are currently sized for.
    pub fn allocated_batch(&self) -> Option<usize> {
        self.memo.as_ref().map(|m| m.batch)
    }

    fn operand_dtype(&self) -> DType {
        match self.mode {
            NumericMode::Float32 => DType::F32,
            _ => DType::I16,
        }
    }

    fn ensure_resident(&mut self) -> Result<(), RuntimeError> {
        if self.resident {
            return Ok(());
        }
        let weights: Vec<_> = self.layers.iter().map(|l| l.weight).collect();
        upload(&mut self.ctx, &weights, self.options.transfer)?;
        self.resident = true;
        Ok(())
    }

    /// Sizes activations and biases for `batch`; returns whether anything
    /// was (re)allocated.
    fn ensure_buffers(&mut self, batch: usize) -> Result<bool, RuntimeError> {
        if self.memo.as_ref().is_some_and(|m| m.batch == batch) {
            return Ok(false);
        }
        if let Some(old) = self.memo.take() {
            tracing::warn!(
                kernel = self.ctx.index(),
                from = old.batch,
                to = batch,
                "Batch size changed, reallocating buffers"
            );
            release_all(&mut self.ctx, &old.ids());
        }

        let n = round_up(batch, self.min_n, "n")?;
        let dtype = self.operand_dtype();
        let mut activations = vec![self.ctx.register(HostMatrix::zeros(dtype, self.k0, n))?];
        let mut biases = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            activations.push(self.ctx.register(HostMatrix::zeros(dtype, layer.m, n))?);
            biases.push(self.ctx.register(layer.bias.broadcast(layer.m, n))?);
        }
        upload(&mut self.ctx, &biases, self.options.transfer)?;

        tracing::debug!(kernel = self.ctx.index(), batch, n, "Allocated batch buffers");
        self.memo = Some(BatchBuffers {
            batch,
            activations,
            biases,
        });
        Ok(true)
    }

    fn input_host(&self, input: &Matrix<f32>, input_scale: f32) -> Result<HostMatrix, RuntimeError> {
        let transposed: HostMatrix = match self.mode {
            NumericMode::Float32 => input.transpose().into(),
            _ => codec::quantize_input(input, input_scale)?.transpose().into(),
        };
        Ok(transposed.format_for_hardware(self.chain_block, self.min_n)?)
    }

    /// Runs `input` (`batch × in`) through the network.
    ///
    /// Input errors are reported before the device is touched and leave
    /// resident weights and batch buffers in place.
    pub fn predict(&mut self, input: &Matrix<f32>, input_scale: f32) -> Result<Prediction, RuntimeError> {
        let batch = check_input(input, self.in_dim)?;
        let mut watch = Stopwatch::start(self.options.profiling);
        let host = self.input_host(input, input_scale)?;
        let result = self.try_predict(host, batch, &mut watch);
        if result.is_err() {
            self.recover();
        }
        result
    }

    fn try_predict(&mut self, host: HostMatrix, batch: usize, watch: &mut Stopwatch) -> Result<Prediction, RuntimeError> {
        let mut metrics = PredictMetrics::new(batch, self.layers.len());
        let before = self.ctx.stats().clone();

        self.ensure_resident()?;
        metrics.reallocated = self.ensure_buffers(batch)?;
        let (activations, biases) = match &self.memo {
            Some(m) => (m.activations.clone(), m.biases.clone()),
            None => return Err(RuntimeError::State {
                from: self.state,
                to: PipelineState::BuffersAllocated,
            }),
        };
        self.ctx.write(activations[0], host)?;
        self.ctx.mark_send_on_execute(activations[0])?;
        self.state.advance(PipelineState::BuffersAllocated)?;
        metrics.prepare_duration = watch.lap();

        for (chunk_index, chunk) in self.layers.chunks(INSTRUCTION_CAPACITY).enumerate() {
            self.ctx.clear_queue()?;
            self.state.advance(PipelineState::InstructionsLoaded)?;
            for (offset, layer) in chunk.iter().enumerate() {
                let i = chunk_index * INSTRUCTION_CAPACITY + offset;
                let (a, b, c, x) = (layer.weight, activations[i], activations[i + 1], biases[i]);
                if layer.fused {
                    self.ctx.add_dense_fused(a, b, c, x, layer.post, layer.negative)?;
                } else {
                    self.ctx.add_dense_linear(a, b, c, x, layer.post)?;
                }
            }
            self.state.advance(PipelineState::Executing)?;
            run(&mut self.ctx, self.options.exec)?;
        }
        self.state.advance(PipelineState::ResultsReady)?;
        metrics.execute_duration = watch.lap();

        let first = if self.options.retrieve_intermediates {
            1
        } else {
            activations.len() - 1
        };
        download(&mut self.ctx, &activations[first..], self.options.transfer)?;

        let mut outputs = Vec::with_capacity(activations.len() - first);
        for (j, &id) in activations.iter().enumerate().skip(first) {
            let width = self.layers[j - 1].out_dim;
            outputs.push(self.ctx.host(id)?.strip_padding(width, batch)?.transpose());
        }
        let output = outputs.pop().ok_or_else(|| {
            RuntimeError::InputShape("network produced no output".into())
        })?;
        metrics.fetch_duration = watch.lap();
        metrics.total_duration = watch.total();
        metrics.record_transfers(&before, self.ctx.stats());
        self.state.advance(PipelineState::Idle)?;

        tracing::info!(kernel = self.ctx.index(), "{}", metrics.summary());
        Ok(Prediction {
            output,
            intermediates: outputs,
            metrics,
        })
    }

    fn recover(&mut self) {
        tracing::warn!(
            kernel = self.ctx.index(),
            state = %self.state,
            "Predict failed, dropping device state"
        );
        abandon(&mut self.ctx);
        if let Some(old) = self.memo.take() {
            release_all(&mut self.ctx, &old.ids());
        }
        self.resident = false;
        self.state.reset();
    }

    /// Names of the layers in execution order.
    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|l| l.name.as_str())
    }
}

type PreparedLayer = (PaddedMatrix, BiasValues, Rescale, Rescale);

/// Host-side work for one layer: transpose, quantize, pad.
fn prepare_layer(
    layer: &LayerDef,
    mode: NumericMode,
    scales: Option<LayerScales>,
    chain_block: usize,
) -> Result<PreparedLayer, RuntimeError> {
    let transposed = layer.weight.transpose();
    let (weight, bias, post, calibrated) = match (mode, scales) {
        (NumericMode::Fixed16, Some(s)) => {
            s.validate()?;
            let weight: HostMatrix = codec::quantize_weights(&transposed, s.weight_scale)?.into();
            let bias = BiasValues::Fixed(codec::quantize_bias(&layer.bias, s.bias_scale)?);
            (weight, bias, s.post, s.negative)
        }
        (NumericMode::Float32, _) => (
            transposed.into(),
            BiasValues::Float(layer.bias.clone()),
            Rescale::IDENTITY,
            Rescale::IDENTITY,
        ),
        _ => {
            return Err(RuntimeError::ConfigError(format!(
                "no scales for layer '{}'",
                layer.name
            )))
        }
    };
    let negative = negative_branch(layer.activation, calibrated);
    pack::pack_post_scale(post)?;
    pack::pack_negative(negative)?;
    let padded = PaddedMatrix::new(&weight, chain_block, chain_block)?;
    Ok((padded, bias, post, negative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffer_orchestrator::sim::SimDevice;
    use buffer_orchestrator::AcceleratorSession;
    use std::path::Path;
    use tile_core::HardwareProfile;

    fn session(data_type: &str) -> AcceleratorSession<SimDevice> {
        let profile = HardwareProfile::parse(&format!(
            "GEMX_ddrWidth=4 GEMX_gemmMBlocks=1 GEMX_gemmKBlocks=1 GEMX_gemmNBlocks=1 \
             GEMX_dataType={data_type} GEMX_numKernels=1 GEMX_runGemm=1 GEMX_runFcn=1"
        ))
        .unwrap();
        AcceleratorSession::open(Path::new("sim.xclbin"), profile).unwrap()
    }

    fn graph(activations: &[Activation]) -> ModelGraph<Validated> {
        let layers = activations
            .iter()
            .enumerate()
            .map(|(i, &act)| {
                // 3 → 3 with w[r][c] = 1 when r == c, -1 on the anti-diagonal
                let w = Matrix::from_fn(3, 3, |r, c| {
                    if r == c {
                        1.0
                    } else if r + c == 2 {
                        -1.0
                    } else {
                        0.0
                    }
                });
                LayerDef::new(format!("fc.{i}"), i, w, vec![1.0, 0.0, 0.0], act).unwrap()
            })
            .collect();
        ModelGraph::new("dense", layers).validate().unwrap()
    }

    #[test]
    fn test_negative_branch() {
        assert_eq!(negative_branch(Activation::Identity, Rescale::RECTIFY), Rescale::IDENTITY);
        assert_eq!(negative_branch(Activation::Rectified, Rescale::IDENTITY), Rescale::RECTIFY);
        let leaky = Rescale::new(1, 3);
        assert_eq!(negative_branch(Activation::Rectified, leaky), leaky);
    }

    #[test]
    fn test_float_matches_host_math() {
        let session = session("float");
        let graph = graph(&[Activation::Identity]);
        let mut p = DensePipeline::new(session.open_kernel(0).unwrap(), &graph, &[], PipelineOptions::default())
            .unwrap();
        let input = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0]).unwrap();
        let out = p.predict(&input, 1.0).unwrap().output_f32();
        // x·W + b: [1-3+1, 2, 3-1] and [4+1, 0, -4]
        assert_eq!(out.as_slice(), &[-1.0, 2.0, 2.0, 5.0, 0.0, -4.0]);
        assert_eq!(p.state(), PipelineState::Idle);
    }

    #[test]
    fn test_fixed_rectified() {
        let session = session("short");
        let graph = graph(&[Activation::Rectified]);
        let mut p = DensePipeline::new(
            session.open_kernel(0).unwrap(),
            &graph,
            &[LayerScales::unit()],
            PipelineOptions::default(),
        )
        .unwrap();
        let input = Matrix::from_vec(1, 3, vec![4.0, 0.0, 0.0]).unwrap();
        let out = p.predict(&input, 1.0).unwrap();
        assert_eq!(out.output.dtype(), DType::I16);
        assert_eq!(out.output.as_i16().unwrap().as_slice(), &[5, 0, 0]);
    }

    #[test]
    fn test_missing_scales() {
        let session = session("short");
        let graph = graph(&[Activation::Rectified, Activation::Identity]);
        let result = DensePipeline::new(
            session.open_kernel(0).unwrap(),
            &graph,
            &[LayerScales::unit()],
            PipelineOptions::default(),
        );
        assert!(matches!(result, Err(RuntimeError::ConfigError(_))));
    }

    #[test]
    fn test_batch_memo() {
        let session = session("float");
        let graph = graph(&[Activation::Rectified, Activation::Identity]);
        let mut p = DensePipeline::new(session.open_kernel(0).unwrap(), &graph, &[], PipelineOptions::default())
            .unwrap();

        let first = p.predict(&Matrix::filled(2, 3, 1.0), 1.0).unwrap();
        assert!(first.metrics.reallocated);
        let buffers = p.context().num_buffers();

        let again = p.predict(&Matrix::filled(2, 3, 1.0), 1.0).unwrap();
        assert!(!again.metrics.reallocated);
        assert_eq!(p.context().num_buffers(), buffers);
        assert_eq!(first.output, again.output);

        let bigger = p.predict(&Matrix::filled(5, 3, 1.0), 1.0).unwrap();
        assert!(bigger.metrics.reallocated);
        assert_eq!(p.allocated_batch(), Some(5));
        assert_eq!(p.context().num_buffers(), buffers);
        assert_eq!(bigger.output.shape(), (5, 3));
    }

    #[test]
    fn test_wrong_input_width_recovers() {
        let session = session("float");
        let graph = graph(&[Activation::Identity]);
        let mut p = DensePipeline::new(session.open_kernel(0).unwrap(), &graph, &[], PipelineOptions::default())
            .unwrap();
        assert!(matches!(
            p.predict(&Matrix::zeros(1, 4), 1.0),
            Err(RuntimeError::InputShape(_))
        ));
        assert_eq!(p.state(), PipelineState::Idle);
        assert!(p.predict(&Matrix::zeros(1, 3), 1.0).is_ok());
    }

    #[test]
    fn test_rejected_input_keeps_residency() {
        let session = session("short");
        let graph = graph(&[Activation::Rectified, Activation::Identity]);
        let scales = [LayerScales::unit(); 2];
        let mut p = DensePipeline::new(session.open_kernel(0).unwrap(), &graph, &scales, PipelineOptions::default())
            .unwrap();
        let x = Matrix::filled(2, 3, 1.0);
        p.predict(&x, 1.0).unwrap();
        let steady = p.predict(&x, 1.0).unwrap().metrics.bytes_sent;

        assert!(matches!(p.predict(&x, f32::NAN), Err(RuntimeError::Quant(_))));
        assert!(p.predict(&Matrix::zeros(2, 5), 1.0).is_err());
        assert_eq!(p.allocated_batch(), Some(2));

        let after = p.predict(&x, 1.0).unwrap();
        assert!(!after.metrics.reallocated);
        assert_eq!(after.metrics.bytes_sent, steady);
    }

    #[test]
    fn test_fcn_disabled() {
        let profile = HardwareProfile::parse(
            "GEMX_ddrWidth=4 GEMX_gemmMBlocks=1 GEMX_gemmKBlocks=1 GEMX_gemmNBlocks=1 \
             GEMX_dataType=float GEMX_numKernels=1 GEMX_runGemm=1 GEMX_runFcn=0",
        )
        .unwrap();
        let session = AcceleratorSession::<SimDevice>::open(Path::new("sim.xclbin"), profile).unwrap();
        let graph = graph(&[Activation::Rectified]);
        let ctx = session.open_kernel(0).unwrap();
        let result = DensePipeline::new(ctx, &graph, &[], PipelineOptions::default());
        assert!(matches!(result, Err(RuntimeError::Profile(_))));
    }
}
