// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Result comparison helpers and deterministic test vectors.
//!
//! Comparisons return a [`Comparison`] value and leave the decision to the
//! caller; nothing in here panics or exits on a mismatch.

use crate::{Element, Matrix};
use std::fmt;

/// Outcome of comparing a device result against a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// Every element satisfied the comparison.
    Match,
    /// The two matrices have different shapes.
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    /// At least one element differs; reports the first offender.
    Mismatch {
        row: usize,
        col: usize,
        expected: f64,
        actual: f64,
        mismatches: usize,
    },
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        matches!(self, Comparison::Match)
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Match => f.write_str("match"),
            Comparison::ShapeMismatch { expected, actual } => write!(
                f,
                "shape mismatch: expected {}x{}, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            Comparison::Mismatch {
                row,
                col,
                expected,
                actual,
                mismatches,
            } => write!(
                f,
                "{mismatches} mismatching element(s); first at ({row}, {col}): expected {expected}, got {actual}"
            ),
        }
    }
}

/// Relative/absolute tolerance, `|actual − expected| ≤ atol + rtol·|expected|`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Tolerance {
    pub fn within(&self, expected: f64, actual: f64) -> bool {
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

impl Default for Tolerance {
    /// `rtol = 1e-3`, `atol = 1e-5`.
    fn default() -> Self {
        Self {
            rtol: 1e-3,
            atol: 1e-5,
        }
    }
}

fn compare_by<T: Element>(
    expected: &Matrix<T>,
    actual: &Matrix<T>,
    mut equal: impl FnMut(f64, f64) -> bool,
) -> Comparison {
    if expected.shape() != actual.shape() {
        return Comparison::ShapeMismatch {
            expected: expected.shape(),
            actual: actual.shape(),
        };
    }

    let cols = expected.cols().max(1);
    let mut first = None;
    let mut mismatches = 0;
    for (i, (&e, &a)) in expected.as_slice().iter().zip(actual.as_slice()).enumerate() {
        let (e, a) = (e.to_f64(), a.to_f64());
        if !equal(e, a) {
            mismatches += 1;
            first.get_or_insert((i / cols, i % cols, e, a));
        }
    }

    match first {
        None => Comparison::Match,
        Some((row, col, expected, actual)) => Comparison::Mismatch {
            row,
            col,
            expected,
            actual,
            mismatches,
        },
    }
}

/// Element-wise exact comparison.
pub fn compare_exact<T: Element>(expected: &Matrix<T>, actual: &Matrix<T>) -> Comparison {
    compare_by(expected, actual, |e, a| e == a)
}

/// Element-wise comparison within `tol`.
pub fn compare_within_tolerance(
    expected: &Matrix<f32>,
    actual: &Matrix<f32>,
    tol: Tolerance,
) -> Comparison {
    compare_by(expected, actual, |e, a| tol.within(e, a))
}

/// Deterministic, non-random fill: starts at 1.0, alternately adds and
/// subtracts a step of 0.3 that drifts by 1e-5 each element, and wraps
/// back down by `max` whenever the value exceeds it.
pub fn fill_mod(len: usize, max: f32) -> Vec<f32> {
    let mut val = 1.0f32;
    let mut step = 0.3f32;
    let drift = 0.00001f32;
    let mut sign = 1.0f32;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(val);
        val += sign * step;
        step += drift;
        sign = -sign;
        if val > max {
            val -= max;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let a = Matrix::from_vec(2, 2, vec![1i16, 2, 3, 4]).unwrap();
        assert!(compare_exact(&a, &a.clone()).is_match());
    }

    #[test]
    fn test_exact_mismatch_reports_first() {
        let a = Matrix::from_vec(2, 2, vec![1i16, 2, 3, 4]).unwrap();
        let b = Matrix::from_vec(2, 2, vec![1i16, 2, 9, 8]).unwrap();
        match compare_exact(&a, &b) {
            Comparison::Mismatch { row, col, expected, actual, mismatches } => {
                assert_eq!((row, col), (1, 0));
                assert_eq!((expected, actual), (3.0, 9.0));
                assert_eq!(mismatches, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Matrix::<f32>::zeros(2, 2);
        let b = Matrix::<f32>::zeros(2, 3);
        assert!(matches!(
            compare_within_tolerance(&a, &b, Tolerance::default()),
            Comparison::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_tolerance() {
        let tol = Tolerance::default();
        assert!(tol.within(1000.0, 1000.9));
        assert!(!tol.within(1000.0, 1001.1));
        assert!(tol.within(0.0, 5e-6));
        assert!(!tol.within(0.0, 2e-5));
    }

    #[test]
    fn test_fill_mod_sequence() {
        let v = fill_mod(4, 32764.0);
        assert_eq!(v[0], 1.0);
        assert!((v[1] - 1.3).abs() < 1e-6);
        assert!((v[2] - (1.3 - 0.30001)).abs() < 1e-6);
        assert!((v[3] - (1.3 - 0.30001 + 0.30002)).abs() < 1e-6);
    }

    #[test]
    fn test_fill_mod_wraps() {
        let v = fill_mod(16, 1.2);
        assert!(v.iter().all(|&x| x <= 1.2 + 1e-6));
    }

    #[test]
    fn test_display() {
        let c = Comparison::ShapeMismatch { expected: (1, 2), actual: (3, 4) };
        assert_eq!(c.to_string(), "shape mismatch: expected 1x2, got 3x4");
    }
}
