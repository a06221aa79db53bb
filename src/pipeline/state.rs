//! Pipeline lifecycle state and frame accounting

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crossbeam::utils::CachePadded;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Streaming = 1,
    Draining = 2,
    Stopped = 3,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::Idle,
            1 => PipelineState::Streaming,
            2 => PipelineState::Draining,
            _ => PipelineState::Stopped,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Shared, forward-only state cell
pub struct StateCell(CachePadded<AtomicU8>);

impl StateCell {
    pub fn new() -> Self {
        Self(CachePadded::new(AtomicU8::new(PipelineState::Idle as u8)))
    }

    pub fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` if it is later than the current state.
    pub fn advance(&self, to: PipelineState) -> bool {
        let moved = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (to as u8 > cur).then_some(to as u8)
            });
        match moved {
            Ok(from) => {
                debug!("Pipeline {} -> {}", PipelineState::from_u8(from), to);
                true
            }
            Err(_) => false,
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame counters shared by the loops
#[derive(Default)]
pub struct PipelineStats {
    captured: CachePadded<AtomicU64>,
    encoded: CachePadded<AtomicU64>,
    encode_failures: AtomicU64,
    drain_dropped: AtomicU64,
    capture_timeouts: AtomicU64,
    capture_errors: AtomicU64,
    driver_gaps: AtomicU64,
    backpressure_waits: AtomicU64,
    preview_shown: AtomicU64,
    preview_skipped: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub captured: u64,
    pub encoded: u64,
    pub encode_failures: u64,
    pub drain_dropped: u64,
    pub capture_timeouts: u64,
    pub capture_errors: u64,
    pub driver_gaps: u64,
    pub backpressure_waits: u64,
    pub preview_shown: u64,
    pub preview_skipped: u64,
}

impl StatsSnapshot {
    /// Frames that entered the pipeline but never reached the video
    pub fn dropped(&self) -> u64 {
        self.encode_failures + self.drain_dropped
    }
}

impl PipelineStats {
    pub fn frame_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_captured").increment(1);
    }

    pub fn frame_encoded(&self) {
        self.encoded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_encoded").increment(1);
    }

    pub fn encode_failed(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("encode_failures").increment(1);
    }

    pub fn dropped_while_draining(&self, n: u64) {
        self.drain_dropped.fetch_add(n, Ordering::Relaxed);
        metrics::counter!("drain_dropped").increment(n);
    }

    pub fn capture_timed_out(&self) {
        self.capture_timeouts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("capture_timeouts").increment(1);
    }

    pub fn capture_failed(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("capture_errors").increment(1);
    }

    pub fn set_driver_gaps(&self, n: u64) {
        self.driver_gaps.store(n, Ordering::Relaxed);
    }

    pub fn add_backpressure_waits(&self, n: u64) {
        self.backpressure_waits.fetch_add(n, Ordering::Relaxed);
    }

    pub fn preview_shown(&self) {
        self.preview_shown.fetch_add(1, Ordering::Relaxed);
    }

    pub fn preview_skipped(&self) {
        self.preview_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            encoded: self.encoded.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            drain_dropped: self.drain_dropped.load(Ordering::Relaxed),
            capture_timeouts: self.capture_timeouts.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            driver_gaps: self.driver_gaps.load(Ordering::Relaxed),
            backpressure_waits: self.backpressure_waits.load(Ordering::Relaxed),
            preview_shown: self.preview_shown.load(Ordering::Relaxed),
            preview_skipped: self.preview_skipped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_only_moves_forward() {
        let state = StateCell::new();
        assert_eq!(state.get(), PipelineState::Idle);
        assert!(state.advance(PipelineState::Streaming));
        assert!(state.advance(PipelineState::Draining));
        assert!(!state.advance(PipelineState::Streaming));
        assert!(!state.advance(PipelineState::Draining));
        assert!(state.advance(PipelineState::Stopped));
        assert_eq!(state.get(), PipelineState::Stopped);
    }

    #[test]
    fn snapshot_counts_drops() {
        let stats = PipelineStats::default();
        stats.frame_captured();
        stats.frame_captured();
        stats.frame_encoded();
        stats.encode_failed();
        let snap = stats.snapshot();
        assert_eq!(snap.captured, 2);
        assert_eq!(snap.dropped(), 1);
    }
}
