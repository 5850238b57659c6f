// SPDX-License-Identifier: GPL-3.0-only

//! Stream statistics: counters for the conditions spec.md requires to be
//! "surfaced via a counter" rather than through the frame stream itself
//! (dropped frames, errored frames, parameter-set-missing drops).
//!
//! Shared between the reassembler and the bitstream normaliser via `Arc`,
//! read by the application through [`crate::UvcCamera::stats`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared, lock-free counters updated from the iso I/O thread and read
/// from any thread.
#[derive(Debug, Default)]
pub struct Stats {
    dropped_frames: AtomicU64,
    errored_frames: AtomicU64,
    truncated_frames: AtomicU64,
    parameter_set_missing_drops: AtomicU64,
}

/// A point-in-time copy of [`Stats`], returned by [`Stats::snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub dropped_frames: u64,
    pub errored_frames: u64,
    pub truncated_frames: u64,
    pub parameter_set_missing_drops: u64,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_errored(&self) {
        self.errored_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_truncated(&self) {
        self.truncated_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_parameter_set_missing(&self) {
        self.parameter_set_missing_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            errored_frames: self.errored_frames.load(Ordering::Relaxed),
            truncated_frames: self.truncated_frames.load(Ordering::Relaxed),
            parameter_set_missing_drops: self
                .parameter_set_missing_drops
                .load(Ordering::Relaxed),
        }
    }
}
