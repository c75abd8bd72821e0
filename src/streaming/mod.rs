//! Streaming
//!
//! Audio blocks, the frame queue shared with the render worker and the
//! statistics the worker keeps about its cycles.
//!
//! Features:
//! - Reference-counted interleaved blocks with a consumption cursor
//! - Mutex-guarded FIFO with `queued_frames` / `frames_written` counters
//! - Per-cycle copy through the channel reorder table
//! - Underrun and skipped-buffer statistics

pub mod block;
pub mod queue;

pub use block::AudioBlock;
pub use queue::{FrameQueue, QueueCounters, RenderOutcome};

/// Render statistics for monitoring underruns and buffer health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Render cycles run (update brackets opened successfully)
    pub cycles: u64,
    /// Cycles that found fewer queued frames than requested
    pub underruns: u64,
    /// Cycles whose copy ran out of blocks early
    pub partial_cycles: u64,
    /// Slot buffers that could not be acquired
    pub skipped_buffers: u64,
    /// Cycles whose update bracket could not be opened
    pub failed_updates: u64,
    /// Frames copied into object buffers
    pub frames_delivered: u64,
}

impl RenderStats {
    /// Account for one completed cycle
    pub fn record(&mut self, outcome: RenderOutcome, skipped: usize) {
        self.cycles += 1;
        self.skipped_buffers += skipped as u64;
        match outcome {
            RenderOutcome::Delivered { frames } => self.frames_delivered += frames as u64,
            RenderOutcome::Underrun { .. } => self.underruns += 1,
            RenderOutcome::Partial { delivered, .. } => {
                self.partial_cycles += 1;
                self.frames_delivered += delivered as u64;
            }
        }
    }

    /// Fraction of cycles that underran (0.0 to 1.0)
    pub fn underrun_ratio(&self) -> f32 {
        if self.cycles == 0 {
            0.0
        } else {
            self.underruns as f32 / self.cycles as f32
        }
    }
}
