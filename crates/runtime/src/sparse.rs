// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Sparse pipeline on the single-vector (spmv) or multi-stage (uspmv)
//! engine. Both run in `f32`.
//!
//! ```text
//! uspmv   layers grouped `stages` at a time, one instruction per group,
//!         every batch row is one run:
//!           act_0 (batch × k) ─▶ act_1 ─▶ … ─▶ act_G (batch × m)
//!
//! spmv    every layer padded to one square side P, one instruction per
//!         layer, the program re-executed once per batch row:
//!           v_0 (P × 1) ─▶ v_1 ─▶ … ─▶ v_L (P × 1)
//! ```

use crate::pipeline::{abandon, check_input, download, release_all, run, upload, Stopwatch};
use crate::{PipelineOptions, PipelineState, PredictMetrics, Prediction, RuntimeError};
use buffer_orchestrator::{BufferId, Driver, KernelContext};
use model_ir::{graph::Validated, ModelGraph, WeightFormat};
use sparse_format::{SparseEngine, SparseFormatter, SparseImage, StageGroup};
use tile_core::{format_for_hardware, DType, Engine, HostMatrix, Matrix, INSTRUCTION_CAPACITY};

/// One device instruction's worth of weights.
struct SparseBlock {
    image: BufferId,
    /// Padded input and output widths.
    input_width: usize,
    output_width: usize,
    /// Logical output width of the last layer in the block.
    out_dim: usize,
}

/// Sequential sparse network resident on one kernel.
pub struct SparsePipeline<D: Driver> {
    ctx: KernelContext<D>,
    engine: SparseEngine,
    blocks: Vec<SparseBlock>,
    num_layers: usize,
    in_dim: usize,
    options: PipelineOptions,
    /// Activation buffers and the batch size they were sized for.
    memo: Option<(usize, Vec<BufferId>)>,
    state: PipelineState,
    resident: bool,
}

impl<D: Driver> SparsePipeline<D> {
    /// Formats every layer and sends the images.
    ///
    /// `engine` of `None` picks uspmv when the build has it, spmv otherwise.
    /// Every layer is formatted and capacity-checked before anything is
    /// registered.
    pub fn new(
        mut ctx: KernelContext<D>,
        graph: &ModelGraph<Validated>,
        engine: Option<SparseEngine>,
        options: PipelineOptions,
    ) -> Result<Self, RuntimeError> {
        let profile = ctx.profile();
        let engine = match engine {
            Some(e) => e,
            None if profile.is_enabled(Engine::Uspmv)? => SparseEngine::Uspmv,
            None => SparseEngine::Spmv,
        };
        profile.require_engine(match engine {
            SparseEngine::Spmv => Engine::Spmv,
            SparseEngine::Uspmv => Engine::Uspmv,
        })?;

        for layer in graph.iter_layers() {
            if layer.format != WeightFormat::Sparse {
                return Err(RuntimeError::Unsupported {
                    engine: engine.as_str(),
                    detail: format!("layer '{}' is stored dense", layer.name),
                });
            }
            if layer.bias.iter().any(|b| *b != 0.0) {
                return Err(RuntimeError::Unsupported {
                    engine: engine.as_str(),
                    detail: format!("layer '{}' has a nonzero bias", layer.name),
                });
            }
        }

        let (formatter, group_size) = match engine {
            SparseEngine::Uspmv => {
                let stages = profile.uspmv_blocks()?.stages.max(1);
                (SparseFormatter::for_uspmv(profile)?, stages)
            }
            SparseEngine::Spmv => (
                SparseFormatter::for_spmv(profile)?.with_square_floor(graph.max_dim()),
                1,
            ),
        };

        let formatted = graph
            .iter_layers()
            .map(|l| formatter.format_weight(&l.weight, l.activation.negative_slope()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut images: Vec<(SparseImage, usize)> = Vec::new();
        for (chunk_index, chunk) in formatted.chunks(group_size).enumerate() {
            let image = StageGroup::build(chunk, &formatter, group_size)?.into_image();
            let last = (chunk_index * group_size + chunk.len()).saturating_sub(1);
            let out_dim = graph.layer(last).map_or(0, |l| l.out_dim());
            images.push((image, out_dim));
        }

        let mut blocks = Vec::with_capacity(images.len());
        for (image, out_dim) in &images {
            blocks.push(SparseBlock {
                image: ctx.register_sparse(image)?,
                input_width: image.input_width(),
                output_width: image.output_width(),
                out_dim: *out_dim,
            });
        }

        let mut pipeline = Self {
            ctx,
            engine,
            blocks,
            num_layers: graph.num_layers(),
            in_dim: graph.input_dim(),
            options,
            memo: None,
            state: PipelineState::Idle,
            resident: false,
        };
        pipeline.ensure_resident()?;

        tracing::info!(
            model = %graph.name,
            kernel = pipeline.ctx.index(),
            %engine,
            layers = pipeline.num_layers,
            instructions = pipeline.blocks.len(),
            nnz = formatted.iter().map(|b| b.padded_nnz()).sum::<usize>(),
            "Sparse pipeline ready"
        );
        Ok(pipeline)
    }

    pub fn engine(&self) -> SparseEngine {
        self.engine
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// Instructions issued per pass.
    pub fn num_instructions(&self) -> usize {
        self.blocks.len()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn context(&self) -> &KernelContext<D> {
        &self.ctx
    }

    fn ensure_resident(&mut self) -> Result<(), RuntimeError> {
        if self.resident {
            return Ok(());
        }
        let images: Vec<_> = self.blocks.iter().map(|b| b.image).collect();
        upload(&mut self.ctx, &images, self.options.transfer)?;
        self.resident = true;
        Ok(())
    }

    /// Rows per activation buffer: the batch for uspmv, one vector for spmv.
    fn runs(&self, batch: usize) -> usize {
        match self.engine {
            SparseEngine::Uspmv => batch,
            SparseEngine::Spmv => 1,
        }
    }

    fn ensure_buffers(&mut self, batch: usize) -> Result<bool, RuntimeError> {
        if self.memo.as_ref().is_some_and(|(b, _)| *b == batch) {
            return Ok(false);
        }
        if let Some((old, ids)) = self.memo.take() {
            tracing::warn!(
                kernel = self.ctx.index(),
                from = old,
                to = batch,
                "Batch size changed, reallocating buffers"
            );
            release_all(&mut self.ctx, &ids);
        }

        let runs = self.runs(batch);
        let engine = self.engine;
        let shape = |width: usize| match engine {
            SparseEngine::Uspmv => (runs, width),
            SparseEngine::Spmv => (width, 1),
        };
        let mut widths = Vec::with_capacity(self.blocks.len() + 1);
        widths.push(self.blocks.first().map_or(0, |b| b.input_width));
        widths.extend(self.blocks.iter().map(|b| b.output_width));

        let mut ids = Vec::with_capacity(widths.len());
        for width in widths {
            let (rows, cols) = shape(width);
            ids.push(self.ctx.register(HostMatrix::zeros(DType::F32, rows, cols))?);
        }
        tracing::debug!(kernel = self.ctx.index(), batch, runs, "Allocated batch buffers");
        self.memo = Some((batch, ids));
        Ok(true)
    }

    /// Runs `input` (`batch × in`) through the network.
    ///
    /// A malformed input is rejected before the device is touched.
    pub fn predict(&mut self, input: &Matrix<f32>) -> Result<Prediction, RuntimeError> {
        let batch = check_input(input, self.in_dim)?;
        let result = self.try_predict(input, batch);
        if result.is_err() {
            self.recover();
        }
        result
    }

    fn try_predict(&mut self, input: &Matrix<f32>, batch: usize) -> Result<Prediction, RuntimeError> {
        let mut metrics = PredictMetrics::new(batch, self.num_layers);
        let mut watch = Stopwatch::start(self.options.profiling);
        let before = self.ctx.stats().clone();

        self.ensure_resident()?;
        metrics.reallocated = self.ensure_buffers(batch)?;
        let activations = match &self.memo {
            Some((_, ids)) => ids.clone(),
            None => {
                return Err(RuntimeError::State {
                    from: self.state,
                    to: PipelineState::BuffersAllocated,
                })
            }
        };
        self.state.advance(PipelineState::BuffersAllocated)?;

        let (output, intermediates) = match self.engine {
            SparseEngine::Uspmv => self.run_batched(input, &activations, &mut metrics, &mut watch)?,
            SparseEngine::Spmv => self.run_per_row(input, &activations, &mut metrics, &mut watch)?,
        };

        metrics.fetch_duration = watch.lap();
        metrics.total_duration = watch.total();
        metrics.record_transfers(&before, self.ctx.stats());
        self.state.advance(PipelineState::Idle)?;

        tracing::info!(kernel = self.ctx.index(), engine = %self.engine, "{}", metrics.summary());
        Ok(Prediction {
            output: output.into(),
            intermediates: intermediates.into_iter().map(HostMatrix::from).collect(),
            metrics,
        })
    }

    /// Loads the instructions of `range` after clearing the device queue.
    fn load(&mut self, range: std::ops::Range<usize>, activations: &[BufferId], runs: usize) -> Result<(), RuntimeError> {
        self.ctx.clear_queue()?;
        for i in range {
            let (a, b, c) = (self.blocks[i].image, activations[i], activations[i + 1]);
            match self.engine {
                SparseEngine::Uspmv => self.ctx.add_multi_stage_sparse(a, b, c, runs)?,
                SparseEngine::Spmv => self.ctx.add_sparse_matvec(a, b, c)?,
            }
        }
        Ok(())
    }

    /// Indices of the activation buffers to read back.
    fn fetched(&self, activations: &[BufferId]) -> std::ops::Range<usize> {
        if self.options.retrieve_intermediates {
            1..activations.len()
        } else {
            activations.len() - 1..activations.len()
        }
    }

    /// uspmv: every batch row is one run of each instruction.
    fn run_batched(
        &mut self,
        input: &Matrix<f32>,
        activations: &[BufferId],
        metrics: &mut PredictMetrics,
        watch: &mut Stopwatch,
    ) -> Result<(Matrix<f32>, Vec<Matrix<f32>>), RuntimeError> {
        let batch = input.rows();
        let width = self.blocks.first().map_or(0, |b| b.input_width);
        let host = format_for_hardware(input, 1, width)?;
        self.ctx.write(activations[0], host.into())?;
        self.ctx.mark_send_on_execute(activations[0])?;
        metrics.prepare_duration = watch.lap();

        let count = self.blocks.len();
        for start in (0..count).step_by(INSTRUCTION_CAPACITY) {
            self.state.advance(PipelineState::InstructionsLoaded)?;
            self.load(start..count.min(start + INSTRUCTION_CAPACITY), activations, batch)?;
            self.state.advance(PipelineState::Executing)?;
            run(&mut self.ctx, self.options.exec)?;
        }
        self.state.advance(PipelineState::ResultsReady)?;
        metrics.execute_duration = watch.lap();

        let range = self.fetched(activations);
        download(&mut self.ctx, &activations[range.clone()], self.options.transfer)?;
        let mut outputs = Vec::with_capacity(range.len());
        for j in range {
            let host = self.ctx.host(activations[j])?;
            let out = host.strip_padding(batch, self.blocks[j - 1].out_dim)?.to_f32();
            outputs.push(out);
        }
        let output = outputs
            .pop()
            .ok_or_else(|| RuntimeError::InputShape("network produced no output".into()))?;
        Ok((output, outputs))
    }

    /// spmv: the program is loaded once and re-executed for every row.
    fn run_per_row(
        &mut self,
        input: &Matrix<f32>,
        activations: &[BufferId],
        metrics: &mut PredictMetrics,
        watch: &mut Stopwatch,
    ) -> Result<(Matrix<f32>, Vec<Matrix<f32>>), RuntimeError> {
        let batch = input.rows();
        let side = self.blocks.first().map_or(0, |b| b.input_width);
        let count = self.blocks.len();
        let single_load = count <= INSTRUCTION_CAPACITY;
        let range = self.fetched(activations);
        let mut rows: Vec<Vec<f32>> = vec![Vec::with_capacity(batch); range.len()];
        metrics.prepare_duration = watch.lap();

        for r in 0..batch {
            let x = Matrix::from_fn(side, 1, |i, _| if i < self.in_dim { input.get(r, i) } else { 0.0 });
            self.ctx.write(activations[0], x.into())?;
            self.ctx.mark_send_on_execute(activations[0])?;

            for start in (0..count).step_by(INSTRUCTION_CAPACITY) {
                self.state.advance(PipelineState::InstructionsLoaded)?;
                if !single_load || r == 0 {
                    self.load(start..count.min(start + INSTRUCTION_CAPACITY), activations, 1)?;
                }
                self.state.advance(PipelineState::Executing)?;
                run(&mut self.ctx, self.options.exec)?;
            }

            download(&mut self.ctx, &activations[range.clone()], self.options.transfer)?;
            for (slot, j) in range.clone().enumerate() {
                let host = self.ctx.host(activations[j])?;
                let width = self.blocks[j - 1].out_dim;
                let values = host
                    .as_f32()
                    .map(|m| m.as_slice()[..width].to_vec())
                    .ok_or_else(|| RuntimeError::InputShape("sparse output is not f32".into()))?;
                rows[slot].extend(values);
            }
        }
        self.state.advance(PipelineState::ResultsReady)?;
        metrics.execute_duration = watch.lap();

        let mut outputs = Vec::with_capacity(rows.len());
        for (data, j) in rows.into_iter().zip(range) {
            outputs.push(Matrix::from_vec(batch, self.blocks[j - 1].out_dim, data)?);
        }
        let output = outputs
            .pop()
            .ok_or_else(|| RuntimeError::InputShape("network produced no output".into()))?;
        Ok((output, outputs))
    }

    fn recover(&mut self) {
        tracing::warn!(
            kernel = self.ctx.index(),
            state = %self.state,
            "Predict failed, dropping device state"
        );
        abandon(&mut self.ctx);
        if let Some((_, ids)) = self.memo.take() {
            release_all(&mut self.ctx, &ids);
        }
        self.resident = false;
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffer_orchestrator::sim::SimDevice;
    use buffer_orchestrator::AcceleratorSession;
    use model_ir::{Activation, LayerDef};
    use sparse_format::reference;
    use std::path::Path;
    use tile_core::HardwareProfile;

    const BOTH: &str = "GEMX_ddrWidth=4 GEMX_dataType=float GEMX_numKernels=1 \
                        GEMX_runSpmv=1 GEMX_spmvWidth=2 GEMX_spmvMacGroups=2 \
                        GEMX_spmvNumCblocks=1 GEMX_spmvColAddIdxBits=4 GEMX_spmvkVectorBlocks=16 \
                        GEMX_runUspmv=1 GEMX_uspmvInterleaves=1 GEMX_uspmvStages=2 \
                        GEMX_uspmvMvectorBlocks=16 GEMX_uspmvNnzVectorBlocks=16";

    fn session() -> AcceleratorSession<SimDevice> {
        AcceleratorSession::open(Path::new("sim.xclbin"), HardwareProfile::parse(BOTH).unwrap()).unwrap()
    }

    /// 6 → 5 → 3, rectified then identity.
    fn graph() -> ModelGraph<Validated> {
        let w0 = Matrix::from_fn(6, 5, |r, c| {
            let base = if (r + c) % 3 == 0 { 1.0 } else { 0.0 };
            if r == c {
                base - 2.0
            } else {
                base
            }
        });
        let w1 = Matrix::from_fn(5, 3, |r, c| if r % 3 == c { 0.5 } else { 0.0 });
        let layers = vec![
            LayerDef::new("sp.0", 0, w0, vec![0.0; 5], Activation::Rectified).unwrap().sparse(),
            LayerDef::new("sp.1", 1, w1, vec![0.0; 3], Activation::Identity).unwrap().sparse(),
        ];
        ModelGraph::new("sparse", layers).validate().unwrap()
    }

    fn host_reference(graph: &ModelGraph<Validated>, input: &Matrix<f32>) -> Matrix<f32> {
        let mut x = input.clone();
        for layer in graph.iter_layers() {
            let (batch, out) = (x.rows(), layer.out_dim());
            let mut y = Matrix::zeros(batch, out);
            for b in 0..batch {
                for c in 0..out {
                    let v: f32 = (0..layer.in_dim()).map(|i| x.get(b, i) * layer.weight.get(i, c)).sum();
                    y.set(b, c, v);
                }
                reference::apply_activation(&mut y.as_mut_slice()[b * out..(b + 1) * out], layer.activation.negative_slope());
            }
            x = y;
        }
        x
    }

    fn input() -> Matrix<f32> {
        Matrix::from_fn(3, 6, |r, c| (r as f32 + 1.0) * if c % 2 == 0 { 1.0 } else { -0.5 })
    }

    #[test]
    fn test_uspmv_groups_stages() {
        let session = session();
        let g = graph();
        let mut p = SparsePipeline::new(session.open_kernel(0).unwrap(), &g, None, PipelineOptions::default()).unwrap();
        assert_eq!(p.engine(), SparseEngine::Uspmv);
        assert_eq!(p.num_instructions(), 1);

        let out = p.predict(&input()).unwrap();
        assert_eq!(out.output.shape(), (3, 3));
        assert_eq!(out.output_f32(), host_reference(&g, &input()));
        assert_eq!(out.metrics.executes, 1);
    }

    #[test]
    fn test_spmv_per_row() {
        let session = session();
        let g = graph();
        let options = PipelineOptions {
            retrieve_intermediates: true,
            ..PipelineOptions::default()
        };
        let mut p =
            SparsePipeline::new(session.open_kernel(0).unwrap(), &g, Some(SparseEngine::Spmv), options).unwrap();
        assert_eq!(p.num_instructions(), 2);

        let out = p.predict(&input()).unwrap();
        assert_eq!(out.output_f32(), host_reference(&g, &input()));
        assert_eq!(out.intermediates.len(), 1);
        assert_eq!(out.intermediates[0].shape(), (3, 5));
        // one execute per batch row, instructions loaded once
        assert_eq!(out.metrics.executes, 3);
        assert_eq!(out.metrics.instructions, 2);
    }

    #[test]
    fn test_rejected_input_keeps_residency() {
        let session = session();
        let g = graph();
        for engine in [SparseEngine::Uspmv, SparseEngine::Spmv] {
            let mut p =
                SparsePipeline::new(session.open_kernel(0).unwrap(), &g, Some(engine), PipelineOptions::default())
                    .unwrap();
            p.predict(&input()).unwrap();
            let steady = p.predict(&input()).unwrap().metrics.bytes_sent;

            assert!(matches!(p.predict(&Matrix::zeros(3, 4)), Err(RuntimeError::InputShape(_))));
            assert!(matches!(p.predict(&Matrix::zeros(0, 6)), Err(RuntimeError::InputShape(_))));
            assert_eq!(p.state(), PipelineState::Idle);

            let after = p.predict(&input()).unwrap();
            assert!(!after.metrics.reallocated, "{engine}");
            assert_eq!(after.metrics.bytes_sent, steady, "{engine}");
        }
    }

    #[test]
    fn test_nonzero_bias_rejected() {
        let session = session();
        let layer = LayerDef::new("sp", 0, Matrix::filled(4, 4, 1.0), vec![1.0; 4], Activation::Identity)
            .unwrap()
            .sparse();
        let g = ModelGraph::new("bias", vec![layer]).validate().unwrap();
        let result = SparsePipeline::new(session.open_kernel(0).unwrap(), &g, None, PipelineOptions::default());
        assert!(matches!(result, Err(RuntimeError::Unsupported { .. })));
    }
}
