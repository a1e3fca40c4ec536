// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Nearest post-rescale lookup for offline calibration.
//!
//! Candidates are `mantissa · 2^-shift` for mantissa 6..=1 and shift
//! 32..=1, enumerated in that order. Values that coincide (for example
//! `4·2^-3 == 2·2^-2`) keep the position of their first occurrence but
//! take the parameters of their last, i.e. the smallest mantissa.
//! Candidates are compared by plain absolute difference and the first
//! minimum wins.

use crate::Rescale;

/// Returns the candidate table in search order.
pub fn post_scale_table() -> Vec<(f64, Rescale)> {
    let mut table: Vec<(f64, Rescale)> = Vec::with_capacity(6 * 32);
    for mantissa in (1..=6).rev() {
        for shift in (1..=32u32).rev() {
            let value = f64::from(mantissa) * 2f64.powi(-(shift as i32));
            let rescale = Rescale::new(mantissa, shift);
            match table.iter_mut().find(|(v, _)| *v == value) {
                Some(slot) => slot.1 = rescale,
                None => table.push((value, rescale)),
            }
        }
    }
    table
}

/// Finds the table entry closest to `target`.
pub fn nearest_post_scale(target: f64) -> Rescale {
    let rescale = nearest_in(&post_scale_table(), target);
    tracing::debug!(wanted = target, %rescale, "Nearest post scale");
    rescale
}

/// Finds the entry of `table` closest to `target` (first minimum wins).
pub fn nearest_in(table: &[(f64, Rescale)], target: f64) -> Rescale {
    let mut best = Rescale::IDENTITY;
    let mut best_diff = f64::INFINITY;
    for &(value, rescale) in table {
        let diff = (value - target).abs();
        if diff < best_diff {
            best_diff = diff;
            best = rescale;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_hit_prefers_smallest_mantissa() {
        assert_eq!(nearest_post_scale(0.5), Rescale::new(1, 1));
        assert_eq!(nearest_post_scale(0.75), Rescale::new(3, 2));
        assert_eq!(nearest_post_scale(0.375), Rescale::new(3, 3));
    }

    #[test]
    fn test_nearest() {
        // 5/16 = 0.3125 is the closest candidate to 0.31.
        assert_eq!(nearest_post_scale(0.31), Rescale::new(5, 4));
    }

    #[test]
    fn test_table_dedup() {
        let table = post_scale_table();
        let halves: Vec<_> = table.iter().filter(|(v, _)| *v == 0.5).collect();
        assert_eq!(halves.len(), 1);
        // First candidate enumerated is 6·2^-32.
        assert_eq!(table[0].0, 6.0 * 2f64.powi(-32));
    }

    #[test]
    fn test_large_target_clamps_to_largest() {
        // 6·2^-1 = 3.0 is the largest candidate.
        assert_eq!(nearest_post_scale(100.0), Rescale::new(6, 1));
    }
}
