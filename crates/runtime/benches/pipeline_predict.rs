// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for end-to-end prediction on the simulated device.

use buffer_orchestrator::sim::SimDevice;
use buffer_orchestrator::AcceleratorSession;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use model_ir::{graph::Validated, Activation, LayerDef, ModelGraph};
use runtime::{LayerPipelineRuntime, RuntimeConfig};
use std::path::Path;
use tile_core::{fill_mod, HardwareProfile, Matrix};

const DENSE: &str = "GEMX_ddrWidth=16 GEMX_gemmMBlocks=2 GEMX_gemmKBlocks=2 \
                     GEMX_gemmNBlocks=2 GEMX_dataType=float GEMX_numKernels=1 \
                     GEMX_runGemm=1 GEMX_runFcn=1";

const USPMV: &str = "GEMX_ddrWidth=16 GEMX_dataType=float GEMX_numKernels=1 \
                     GEMX_runUspmv=1 GEMX_uspmvInterleaves=2 GEMX_uspmvStages=2 \
                     GEMX_uspmvMvectorBlocks=16 GEMX_uspmvNnzVectorBlocks=256";

fn session(text: &str) -> AcceleratorSession<SimDevice> {
    let profile = HardwareProfile::parse(text).unwrap();
    AcceleratorSession::open(Path::new("sim.xclbin"), profile).unwrap()
}

fn layer(index: usize, in_dim: usize, out_dim: usize, keep_every: usize) -> LayerDef {
    let w = Matrix::from_fn(in_dim, out_dim, |i, j| {
        if (i * out_dim + j) % keep_every == 0 {
            ((i + j) % 5) as f32 * 0.1 - 0.2
        } else {
            0.0
        }
    });
    let activation = if index < 2 {
        Activation::Rectified
    } else {
        Activation::Identity
    };
    LayerDef::new(format!("fc.{index}"), index, w, vec![0.0; out_dim], activation).unwrap()
}

fn graph(dims: &[usize], keep_every: usize, sparse: bool) -> ModelGraph<Validated> {
    let layers = dims
        .windows(2)
        .enumerate()
        .map(|(i, w)| {
            let l = layer(i, w[0], w[1], keep_every);
            if sparse {
                l.sparse()
            } else {
                l
            }
        })
        .collect();
    ModelGraph::new("bench", layers).validate().unwrap()
}

fn bench_dense(c: &mut Criterion) {
    let session = session(DENSE);
    let graph = graph(&[128, 64, 32, 8], 1, false);
    let mut pipeline =
        LayerPipelineRuntime::build(session.open_kernel(0).unwrap(), &graph, &[], &RuntimeConfig::default())
            .unwrap();

    let mut group = c.benchmark_group("dense predict");
    for &batch in &[1usize, 16, 64] {
        let input = Matrix::from_vec(batch, 128, fill_mod(batch * 128, 4.0)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(batch), &input, |b, input| {
            b.iter(|| pipeline.predict(black_box(input), 1.0).unwrap())
        });
    }
    group.finish();
}

fn bench_sparse(c: &mut Criterion) {
    let session = session(USPMV);
    let graph = graph(&[128, 128, 64, 64], 7, true);
    let mut pipeline =
        LayerPipelineRuntime::build(session.open_kernel(0).unwrap(), &graph, &[], &RuntimeConfig::default())
            .unwrap();

    let input = Matrix::from_vec(16, 128, fill_mod(16 * 128, 4.0)).unwrap();
    c.bench_function("uspmv predict batch 16", |b| {
        b.iter(|| pipeline.predict(black_box(&input), 1.0).unwrap())
    });
}

criterion_group!(benches, bench_dense, bench_sparse);
criterion_main!(benches);
