// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for block padding and host matrix encoding.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tile_core::{fill_mod, format_for_hardware, strip_padding, Matrix};

fn sample(rows: usize, cols: usize) -> Matrix<f32> {
    Matrix::from_vec(rows, cols, fill_mod(rows * cols, 10.0)).unwrap()
}

fn bench_pad(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_for_hardware");
    for &dim in &[100usize, 500, 1000] {
        let m = sample(dim, dim);
        group.bench_with_input(BenchmarkId::from_parameter(dim), &m, |b, m| {
            b.iter(|| format_for_hardware(black_box(m), 64, 64).unwrap())
        });
    }
    group.finish();
}

fn bench_strip(c: &mut Criterion) {
    let padded = format_for_hardware(&sample(1000, 1000), 64, 64).unwrap();
    c.bench_function("strip_padding 1024→1000", |b| {
        b.iter(|| strip_padding(black_box(&padded), 1000, 1000).unwrap())
    });
}

fn bench_transpose(c: &mut Criterion) {
    let m = sample(512, 256);
    c.bench_function("transpose 512×256", |b| b.iter(|| black_box(&m).transpose()));
}

fn bench_le_bytes(c: &mut Criterion) {
    let m = sample(512, 512);
    let bytes = m.to_le_bytes();
    c.bench_function("to_le_bytes 512×512", |b| b.iter(|| black_box(&m).to_le_bytes()));
    c.bench_function("from_le_bytes 512×512", |b| {
        b.iter(|| Matrix::<f32>::from_le_bytes(512, 512, black_box(&bytes)).unwrap())
    });
}

criterion_group!(benches, bench_pad, bench_strip, bench_transpose, bench_le_bytes);
criterion_main!(benches);
