// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-call pipeline state machine.
//!
//! ```text
//! Idle ──▶ BuffersAllocated ──▶ InstructionsLoaded ──▶ Executing ──▶ ResultsReady
//!  ▲                                  ▲                   │              │
//!  │                                  └───── next chunk ──┘              │
//!  └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any state may fall back to `Idle` through [`PipelineState::reset`].

use crate::RuntimeError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum PipelineState {
    #[default]
    Idle,
    BuffersAllocated,
    InstructionsLoaded,
    Executing,
    ResultsReady,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BuffersAllocated => "buffers-allocated",
            Self::InstructionsLoaded => "instructions-loaded",
            Self::Executing => "executing",
            Self::ResultsReady => "results-ready",
        }
    }

    /// Whether `self → next` is a legal step.
    pub fn can_advance_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, BuffersAllocated)
                | (BuffersAllocated, InstructionsLoaded)
                | (InstructionsLoaded, Executing)
                | (Executing, InstructionsLoaded)
                | (Executing, ResultsReady)
                | (ResultsReady, Idle)
        )
    }

    /// Moves to `next`, or fails with [`RuntimeError::State`].
    pub fn advance(&mut self, next: PipelineState) -> Result<(), RuntimeError> {
        if !self.can_advance_to(next) {
            return Err(RuntimeError::State {
                from: *self,
                to: next,
            });
        }
        tracing::trace!(from = %self, to = %next, "Pipeline state");
        *self = next;
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = PipelineState::Idle;
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
