// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! End-to-end programs on the simulated device.

use buffer_orchestrator::sim::SimDevice;
use buffer_orchestrator::{AcceleratorSession, ExecMode, OrchestratorError, TransferMode};
use quant_codec::Rescale;
use sparse_format::{reference, SparseError, SparseFormatter};
use std::path::Path;
use tile_core::{
    compare_exact, compare_within_tolerance, fill_mod, DType, HardwareProfile, HostMatrix, Matrix,
    Tolerance,
};

fn open(text: &str) -> AcceleratorSession<SimDevice> {
    let profile = HardwareProfile::parse(text).unwrap();
    AcceleratorSession::open(Path::new("sim.xclbin"), profile).unwrap()
}

const DENSE: &str = "GEMX_ddrWidth=4 GEMX_gemmMBlocks=1 GEMX_gemmKBlocks=1 \
                     GEMX_gemmNBlocks=1 GEMX_dataType=short GEMX_numKernels=1 \
                     GEMX_runGemm=1 GEMX_runFcn=1";

const USPMV: &str = "GEMX_ddrWidth=16 GEMX_dataType=float GEMX_numKernels=1 \
                     GEMX_runUspmv=1 GEMX_uspmvInterleaves=2 GEMX_uspmvStages=1 \
                     GEMX_uspmvMvectorBlocks=8 GEMX_uspmvNnzVectorBlocks=32";

/// 250 distinct nonzeros in a 64 × 64 matrix.
fn sparse_weight() -> Matrix<f32> {
    let mut m = Matrix::zeros(64, 64);
    for i in 0..250usize {
        let p = (i * 37) % 4096;
        let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
        m.set(p / 64, p % 64, sign * (0.5 + (i % 7) as f32 * 0.25));
    }
    m
}

#[test]
fn dense_identity_scaling() {
    let session = open(DENSE);
    let mut ctx = session.open_kernel(0).unwrap();

    let a = Matrix::<i16>::filled(4, 4, 1);
    let b = Matrix::<i16>::from_fn(4, 4, |r, c| if r == c { 2 } else { 0 });
    let ia = ctx.register(a.clone().into()).unwrap();
    let ib = ctx.register(b.into()).unwrap();
    let ic = ctx.register(HostMatrix::zeros(DType::I16, 4, 4)).unwrap();
    let ix = ctx.register(HostMatrix::zeros(DType::I32, 4, 4)).unwrap();
    for id in [ia, ib, ix] {
        ctx.send(id, TransferMode::Sync).unwrap();
    }
    ctx.add_dense_fused(ia, ib, ic, ix, Rescale::new(1, 0), Rescale::RECTIFY)
        .unwrap();
    ctx.execute(ExecMode::Sync).unwrap();
    ctx.fetch(ic, TransferMode::Sync).unwrap();

    let out = ctx.host(ic).unwrap().strip_padding(4, 4).unwrap();
    let expected = a.map(|v| v * 2);
    assert!(compare_exact(&expected, out.as_i16().unwrap()).is_match());
}

#[test]
fn sparse_matches_reference_multiply() {
    let session = open(USPMV);
    let mut ctx = session.open_kernel(0).unwrap();
    let formatter = SparseFormatter::for_uspmv(session.profile()).unwrap();

    let buf = formatter.format(&sparse_weight(), 1.0).unwrap();
    assert_eq!(buf.nnz(), 250);
    assert_eq!(buf.padded_nnz(), 256);

    let x = fill_mod(64, 10.0);
    let image = buf.to_image();
    let ia = ctx.register_sparse(&image).unwrap();
    let ib = ctx
        .register(Matrix::from_vec(1, 64, x.clone()).unwrap().into())
        .unwrap();
    let ic = ctx.register(HostMatrix::zeros(DType::F32, 1, 64)).unwrap();
    ctx.mark_send_on_execute(ia).unwrap();
    ctx.mark_send_on_execute(ib).unwrap();
    ctx.add_multi_stage_sparse(ia, ib, ic, 1).unwrap();
    ctx.execute(ExecMode::Sync).unwrap();
    ctx.fetch(ic, TransferMode::Sync).unwrap();

    let expected = Matrix::from_vec(1, 64, reference::spmv(&buf, &x).unwrap()).unwrap();
    let actual = ctx.host(ic).unwrap().as_f32().unwrap().clone();
    let cmp = compare_within_tolerance(&expected, &actual, Tolerance::default());
    assert!(cmp.is_match(), "{cmp}");
}

#[test]
fn oversized_stage_fails_before_any_send() {
    let session = open(USPMV);
    let mut ctx = session.open_kernel(0).unwrap();

    // Formatted for a larger build, then submitted to this one (max m = 128).
    let roomy = HardwareProfile::parse(
        "GEMX_ddrWidth=16 GEMX_uspmvInterleaves=2 GEMX_uspmvStages=1 \
         GEMX_uspmvMvectorBlocks=64 GEMX_uspmvNnzVectorBlocks=64",
    )
    .unwrap();
    let tall = Matrix::from_fn(200, 32, |r, c| if r % 32 == c { 1.0 } else { 0.0 });
    let buf = SparseFormatter::for_uspmv(&roomy)
        .unwrap()
        .format(&tall, 0.0)
        .unwrap();

    let ia = ctx.register_sparse(&buf.to_image()).unwrap();
    let ib = ctx.register(HostMatrix::zeros(DType::F32, 1, 32)).unwrap();
    let ic = ctx.register(HostMatrix::zeros(DType::F32, 1, 224)).unwrap();
    ctx.mark_send_on_execute(ia).unwrap();

    let err = ctx.add_multi_stage_sparse(ia, ib, ic, 1).unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Sparse(SparseError::CapacityExceeded { what: "m", value: 200, limit: 128 })
    ));
    assert_eq!(ctx.stats().sends, 0);
    assert_eq!(ctx.queue_depth(), 0);
}

#[test]
fn sparse_operand_type_error_names_its_opcode() {
    let session = open(USPMV);
    let mut ctx = session.open_kernel(0).unwrap();
    let formatter = SparseFormatter::for_uspmv(session.profile()).unwrap();
    let buf = formatter.format(&sparse_weight(), 1.0).unwrap();

    let ia = ctx.register_sparse(&buf.to_image()).unwrap();
    let ib = ctx.register(HostMatrix::zeros(DType::I16, 1, 64)).unwrap();
    let ic = ctx.register(HostMatrix::zeros(DType::F32, 1, 64)).unwrap();

    match ctx.add_multi_stage_sparse(ia, ib, ic, 1) {
        Err(OrchestratorError::TypeMismatch(msg)) => {
            assert!(msg.starts_with("multi-stage-sparse operand"), "{msg}");
        }
        other => panic!("expected a type mismatch, got {other:?}"),
    }
    assert_eq!(ctx.queue_depth(), 0);
}

#[test]
fn kernels_run_on_separate_threads() {
    let profile = HardwareProfile::parse(&DENSE.replace("GEMX_numKernels=1", "GEMX_numKernels=2"))
        .unwrap();
    let session = AcceleratorSession::<SimDevice>::open(Path::new("sim.xclbin"), profile).unwrap();

    let handles: Vec<_> = (0..2)
        .map(|index| {
            let mut ctx = session.open_kernel(index).unwrap();
            std::thread::spawn(move || {
                let fill = index as i16 + 1;
                let a = ctx.register(Matrix::<i16>::filled(4, 4, fill).into()).unwrap();
                let c = ctx.register(HostMatrix::zeros(DType::I16, 4, 4)).unwrap();
                let x = ctx.register(HostMatrix::zeros(DType::I32, 4, 4)).unwrap();
                ctx.send(a, TransferMode::Deferred).unwrap();
                ctx.add_dense_linear(a, a, c, x, Rescale::IDENTITY).unwrap();
                ctx.execute(ExecMode::Async).unwrap();
                ctx.fetch(c, TransferMode::Deferred).unwrap();
                ctx.wait().unwrap();
                ctx.host(c).unwrap().as_i16().unwrap().get(0, 0)
            })
        })
        .collect();

    let results: Vec<i16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![4, 16]);
}
