// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-call profiling metrics.
//!
//! [`PredictMetrics`] splits one `predict` call into host preparation,
//! device execution and readback, and records what crossed the bus.

use buffer_orchestrator::TransferStats;
use std::time::Duration;

/// Metrics for a single `predict` call.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PredictMetrics {
    pub batch_size: usize,
    pub num_layers: usize,
    /// Whether intermediate buffers were (re)allocated for this call.
    pub reallocated: bool,
    /// Instructions submitted to the device.
    pub instructions: u64,
    pub executes: u64,
    pub peak_queue_depth: usize,
    pub bytes_sent: u64,
    pub bytes_fetched: u64,
    /// Quantization, padding and buffer allocation.
    pub prepare_duration: Duration,
    /// Instruction loading and kernel execution.
    pub execute_duration: Duration,
    /// Readback, unpadding and transposition.
    pub fetch_duration: Duration,
    pub total_duration: Duration,
}

impl PredictMetrics {
    pub fn new(batch_size: usize, num_layers: usize) -> Self {
        Self {
            batch_size,
            num_layers,
            ..Self::default()
        }
    }

    /// Fills the transfer counters from the difference of two snapshots.
    pub fn record_transfers(&mut self, before: &TransferStats, after: &TransferStats) {
        self.instructions = after.instructions_submitted - before.instructions_submitted;
        self.executes = after.executes - before.executes;
        self.bytes_sent = after.bytes_sent - before.bytes_sent;
        self.bytes_fetched = after.bytes_fetched - before.bytes_fetched;
        self.peak_queue_depth = after.peak_queue_depth;
    }

    /// Samples per second over the whole call.
    pub fn throughput(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs <= 0.0 || self.batch_size == 0 {
            return 0.0;
        }
        self.batch_size as f64 / secs
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        format!(
            "Predict: batch {} through {} layers in {:.2}ms \
             (prepare {:.2}ms, execute {:.2}ms, fetch {:.2}ms), \
             {} instructions / {} executes, {:.1} KB sent, {:.1} KB fetched{}",
            self.batch_size,
            self.num_layers,
            self.total_duration.as_secs_f64() * 1000.0,
            self.prepare_duration.as_secs_f64() * 1000.0,
            self.execute_duration.as_secs_f64() * 1000.0,
            self.fetch_duration.as_secs_f64() * 1000.0,
            self.instructions,
            self.executes,
            self.bytes_sent as f64 / 1024.0,
            self.bytes_fetched as f64 / 1024.0,
            if self.reallocated { ", reallocated" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics() {
        let m = PredictMetrics::new(4, 3);
        assert_eq!(m.throughput(), 0.0);
        assert_eq!(m.num_layers, 3);
    }

    #[test]
    fn test_record_transfers() {
        let before = TransferStats {
            bytes_sent: 100,
            executes: 2,
            instructions_submitted: 6,
            ..Default::default()
        };
        let after = TransferStats {
            bytes_sent: 612,
            bytes_fetched: 64,
            executes: 3,
            instructions_submitted: 9,
            peak_queue_depth: 3,
            ..Default::default()
        };
        let mut m = PredictMetrics::new(2, 3);
        m.record_transfers(&before, &after);
        assert_eq!(m.bytes_sent, 512);
        assert_eq!(m.bytes_fetched, 64);
        assert_eq!(m.executes, 1);
        assert_eq!(m.instructions, 3);
        assert_eq!(m.peak_queue_depth, 3);
    }

    #[test]
    fn test_throughput() {
        let mut m = PredictMetrics::new(100, 1);
        m.total_duration = Duration::from_secs(2);
        assert!((m.throughput() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_summary_format() {
        let mut m = PredictMetrics::new(8, 3);
        m.reallocated = true;
        let s = m.summary();
        assert!(s.contains("batch 8"));
        assert!(s.contains("3 layers"));
        assert!(s.contains("reallocated"));
    }

    #[test]
    fn test_serializes_counters() {
        let mut m = PredictMetrics::new(8, 3);
        m.instructions = 3;
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["batch_size"], 8);
        assert_eq!(json["instructions"], 3);
        assert_eq!(json["reallocated"], false);
    }
}
