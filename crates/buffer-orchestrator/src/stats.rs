// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Transfer and queue statistics of one kernel context.

/// Cumulative counters kept by a [`KernelContext`](crate::KernelContext).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TransferStats {
    /// Host-to-device transfers, including send-on-execute ones.
    pub sends: u64,
    pub bytes_sent: u64,
    /// Device-to-host transfers.
    pub fetches: u64,
    pub bytes_fetched: u64,
    /// Deferred transfers joined by `wait`.
    pub deferred_joined: u64,
    pub executes: u64,
    /// Instruction words handed to the driver.
    pub instructions_submitted: u64,
    /// Highest number of loaded plus pending instructions seen.
    pub peak_queue_depth: usize,
    pub queue_clears: u64,
}

impl TransferStats {
    pub(crate) fn record_send(&mut self, bytes: usize) {
        self.sends += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_fetch(&mut self, bytes: usize) {
        self.fetches += 1;
        self.bytes_fetched += bytes as u64;
    }

    pub(crate) fn record_execute(&mut self, submitted: usize) {
        self.executes += 1;
        self.instructions_submitted += submitted as u64;
    }

    pub(crate) fn update_queue_depth(&mut self, depth: usize) {
        if depth > self.peak_queue_depth {
            self.peak_queue_depth = depth;
        }
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Transfers: {} sends ({:.2} MB), {} fetches ({:.2} MB), \
             {} executes, {} instructions, peak queue {}, {} clears",
            self.sends,
            self.bytes_sent as f64 / (1024.0 * 1024.0),
            self.fetches,
            self.bytes_fetched as f64 / (1024.0 * 1024.0),
            self.executes,
            self.instructions_submitted,
            self.peak_queue_depth,
            self.queue_clears,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut s = TransferStats::default();
        s.record_send(1024);
        s.record_send(1024);
        s.record_fetch(512);
        s.record_execute(3);
        assert_eq!(s.sends, 2);
        assert_eq!(s.bytes_sent, 2048);
        assert_eq!(s.instructions_submitted, 3);
    }

    #[test]
    fn test_peak_queue_depth() {
        let mut s = TransferStats::default();
        s.update_queue_depth(5);
        s.update_queue_depth(2);
        assert_eq!(s.peak_queue_depth, 5);
    }

    #[test]
    fn test_summary() {
        let mut s = TransferStats::default();
        s.record_execute(4);
        s.queue_clears = 1;
        let text = s.summary();
        assert!(text.contains("1 executes"));
        assert!(text.contains("4 instructions"));
        assert!(text.contains("1 clears"));
    }
}
