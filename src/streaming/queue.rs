//! Frame queue shared by the producer and the render worker
//!
//! The queue is the only state both threads touch. Every access goes through
//! one `parking_lot::Mutex`; the worker holds it only for the copy-or-skip
//! decision of a cycle and never across a backend call.

use super::AudioBlock;
use crate::channels::{ReorderTable, SlotBuffers};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Snapshot of the queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounters {
    /// Frames queued but not yet handed to the backend
    pub queued_frames: u64,
    /// Frames handed to the backend since start or the last flush
    pub frames_written: u64,
}

impl QueueCounters {
    /// Everything the pipeline has handed over
    pub fn total_frames(&self) -> u64 {
        self.frames_written + self.queued_frames
    }
}

/// What one render cycle did with the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Exactly `frames` frames were copied
    Delivered {
        /// Frames copied
        frames: usize,
    },
    /// Not enough data queued; nothing was copied
    Underrun {
        /// Frames queued at decision time
        queued: u64,
        /// Frames the backend asked for
        requested: usize,
    },
    /// Blocks ran out before `requested` frames although the counter said
    /// otherwise; the tail of the cycle stays silent
    Partial {
        /// Frames actually copied
        delivered: usize,
        /// Frames the backend asked for
        requested: usize,
    },
}

#[derive(Debug, Default)]
struct QueueState {
    blocks: VecDeque<AudioBlock>,
    queued_frames: u64,
    frames_written: u64,
}

/// FIFO of audio blocks plus its frame counters
#[derive(Debug, Default)]
pub struct FrameQueue {
    inner: Mutex<QueueState>,
}

impl FrameQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block
    ///
    /// Empty blocks are dropped without touching the counters.
    pub fn push(&self, block: AudioBlock) {
        if block.is_empty() {
            return;
        }
        let mut state = self.inner.lock();
        state.queued_frames += block.frames() as u64;
        state.blocks.push_back(block);
    }

    /// Current counters
    pub fn counters(&self) -> QueueCounters {
        let state = self.inner.lock();
        QueueCounters {
            queued_frames: state.queued_frames,
            frames_written: state.frames_written,
        }
    }

    /// Number of queued blocks
    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Drop every queued block and reset both counters
    pub fn flush(&self) {
        let mut state = self.inner.lock();
        state.blocks.clear();
        state.queued_frames = 0;
        state.frames_written = 0;
    }

    /// Drop every queued block without forwarding it; returns the frames dropped
    ///
    /// `frames_written` is kept so a final delay query still sees it.
    pub fn discard(&self) -> u64 {
        let mut state = self.inner.lock();
        let dropped = state.queued_frames;
        state.blocks.clear();
        state.queued_frames = 0;
        dropped
    }

    /// Fill one cycle's slot buffers from the queue
    ///
    /// `buffers[slot]` receives input channel `table.source(slot)`. Slots
    /// without a buffer are skipped. On underrun nothing is copied and no block
    /// is touched; `frames_written` advances by `requested` either way.
    pub fn render(
        &self,
        requested: usize,
        buffers: &mut SlotBuffers<'_>,
        table: &ReorderTable,
    ) -> RenderOutcome {
        let mut state = self.inner.lock();

        if state.queued_frames < requested as u64 {
            let queued = state.queued_frames;
            state.frames_written += requested as u64;
            return RenderOutcome::Underrun { queued, requested };
        }

        let mut delivered = 0usize;
        while delivered < requested {
            let Some(block) = state.blocks.front_mut() else {
                break;
            };

            let frames = block.frames().min(requested - delivered);
            copy_frames(block, frames, delivered, buffers, table);
            block.advance(frames);
            delivered += frames;

            if block.is_empty() {
                state.blocks.pop_front();
            }
        }

        state.frames_written += requested as u64;

        if delivered < requested {
            state.queued_frames = 0;
            return RenderOutcome::Partial {
                delivered,
                requested,
            };
        }

        state.queued_frames -= requested as u64;
        RenderOutcome::Delivered { frames: delivered }
    }
}

/// Copy `frames` frames from the head of `block` into the slot buffers
/// starting at destination frame `offset`
#[inline]
fn copy_frames(
    block: &AudioBlock,
    frames: usize,
    offset: usize,
    buffers: &mut SlotBuffers<'_>,
    table: &ReorderTable,
) {
    let channels = block.channels();
    let src = block.as_interleaved();

    for (slot, buffer) in buffers.iter_mut().enumerate() {
        let Some(dst) = buffer.as_deref_mut() else {
            continue;
        };
        let Some(source) = table.source(slot) else {
            continue;
        };
        if source >= channels {
            continue;
        }

        let end = (offset + frames).min(dst.len());
        if end <= offset {
            continue;
        }
        for (f, sample) in dst[offset..end].iter_mut().enumerate() {
            if let Some(value) = src.get(f * channels + source) {
                *sample = *value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MAX_SLOTS;
    use crate::format::ChannelMask;

    fn ramp(frames: usize, channels: usize) -> AudioBlock {
        // sample value encodes frame * 10 + channel
        let samples = (0..frames)
            .flat_map(|f| (0..channels).map(move |c| (f * 10 + c) as f32))
            .collect();
        AudioBlock::from_interleaved(samples, channels).unwrap()
    }

    fn with_buffers<R>(
        slots: usize,
        frames: usize,
        f: impl FnOnce(&mut SlotBuffers<'_>) -> R,
    ) -> (R, Vec<Vec<f32>>) {
        let mut storage = vec![vec![0.0f32; frames]; slots];
        let result = {
            let mut buffers: SlotBuffers<'_> = Default::default();
            for (slot, buf) in storage.iter_mut().enumerate() {
                buffers[slot] = Some(buf.as_mut_slice());
            }
            f(&mut buffers)
        };
        (result, storage)
    }

    #[test]
    fn test_stereo_cycle_fills_both_slots() {
        let queue = FrameQueue::new();
        queue.push(ramp(480, 2));
        let table = ReorderTable::new(ChannelMask::STEREO);

        let (outcome, out) = with_buffers(2, 480, |buffers| queue.render(480, buffers, &table));

        assert_eq!(outcome, RenderOutcome::Delivered { frames: 480 });
        for f in 0..480 {
            assert_eq!(out[0][f], (f * 10) as f32);
            assert_eq!(out[1][f], (f * 10 + 1) as f32);
        }
        let counters = queue.counters();
        assert_eq!(counters.queued_frames, 0);
        assert_eq!(counters.frames_written, 480);
        assert_eq!(queue.block_count(), 0);
    }

    #[test]
    fn test_underrun_touches_nothing() {
        let queue = FrameQueue::new();
        queue.push(ramp(100, 2));
        let table = ReorderTable::new(ChannelMask::STEREO);

        let (outcome, out) = with_buffers(2, 480, |buffers| queue.render(480, buffers, &table));

        assert_eq!(
            outcome,
            RenderOutcome::Underrun {
                queued: 100,
                requested: 480
            }
        );
        assert!(out.iter().all(|buf| buf.iter().all(|s| *s == 0.0)));
        let counters = queue.counters();
        assert_eq!(counters.queued_frames, 100);
        assert_eq!(counters.frames_written, 480);
        assert_eq!(queue.block_count(), 1);
    }

    #[test]
    fn test_copy_spans_blocks_and_reorders() {
        let queue = FrameQueue::new();
        queue.push(ramp(3, 6));
        queue.push(ramp(5, 6));
        let table = ReorderTable::new(ChannelMask::SURROUND_5_1);

        let (outcome, out) = with_buffers(6, 6, |buffers| queue.render(6, buffers, &table));
        assert_eq!(outcome, RenderOutcome::Delivered { frames: 6 });

        // slot 2 is FC, pipeline index 4
        assert_eq!(out[2][0], 4.0);
        // frame 3 comes from frame 0 of the second block
        assert_eq!(out[2][3], 4.0);
        assert_eq!(out[2][5], 24.0);
        // slot 4 is BL, pipeline index 2
        assert_eq!(out[4][1], 12.0);

        let counters = queue.counters();
        assert_eq!(counters.queued_frames, 2);
        assert_eq!(counters.frames_written, 6);
        assert_eq!(queue.block_count(), 1);
    }

    #[test]
    fn test_full_drain_counts_every_frame() {
        let queue = FrameQueue::new();
        let sizes = [480usize, 17, 960, 3, 100];
        let total: usize = sizes.iter().sum();
        for size in sizes {
            queue.push(ramp(size, 2));
        }
        let table = ReorderTable::new(ChannelMask::STEREO);

        let mut remaining = total;
        while remaining > 0 {
            let requested = remaining.min(256);
            let (outcome, _) =
                with_buffers(2, requested, |buffers| queue.render(requested, buffers, &table));
            assert_eq!(outcome, RenderOutcome::Delivered { frames: requested });
            remaining -= requested;
        }

        let counters = queue.counters();
        assert_eq!(counters.frames_written, total as u64);
        assert_eq!(counters.queued_frames, 0);
    }

    #[test]
    fn test_missing_buffer_is_skipped() {
        let queue = FrameQueue::new();
        queue.push(ramp(4, 2));
        let table = ReorderTable::new(ChannelMask::STEREO);

        let mut right = vec![0.0f32; 4];
        let mut buffers: SlotBuffers<'_> = Default::default();
        buffers[1] = Some(right.as_mut_slice());

        let outcome = queue.render(4, &mut buffers, &table);
        assert_eq!(outcome, RenderOutcome::Delivered { frames: 4 });
        assert_eq!(right, vec![1.0, 11.0, 21.0, 31.0]);
        assert_eq!(queue.counters().queued_frames, 0);
    }

    #[test]
    fn test_short_destination_is_not_overrun() {
        let queue = FrameQueue::new();
        queue.push(ramp(8, 1));
        let table = ReorderTable::new(ChannelMask::MONO);

        let mut short = vec![0.0f32; 5];
        let mut buffers: SlotBuffers<'_> = Default::default();
        buffers[0] = Some(short.as_mut_slice());

        let outcome = queue.render(8, &mut buffers, &table);
        assert_eq!(outcome, RenderOutcome::Delivered { frames: 8 });
        assert_eq!(short, vec![0.0, 10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_flush_on_empty_queue() {
        let queue = FrameQueue::new();
        queue.flush();
        assert_eq!(queue.counters(), QueueCounters::default());
    }

    #[test]
    fn test_flush_resets_counters() {
        let queue = FrameQueue::new();
        for _ in 0..3 {
            queue.push(ramp(300, 2));
        }
        let table = ReorderTable::new(ChannelMask::STEREO);
        let _ = with_buffers(2, 100, |buffers| queue.render(100, buffers, &table));

        queue.flush();
        assert_eq!(queue.counters(), QueueCounters::default());
        assert_eq!(queue.block_count(), 0);
    }

    #[test]
    fn test_discard_keeps_frames_written() {
        let queue = FrameQueue::new();
        queue.push(ramp(300, 2));
        let table = ReorderTable::new(ChannelMask::STEREO);
        let _ = with_buffers(2, 100, |buffers| queue.render(100, buffers, &table));

        assert_eq!(queue.discard(), 200);
        let counters = queue.counters();
        assert_eq!(counters.queued_frames, 0);
        assert_eq!(counters.frames_written, 100);
    }

    #[test]
    fn test_empty_block_ignored() {
        let queue = FrameQueue::new();
        queue.push(AudioBlock::from_interleaved(Vec::new(), 2).unwrap());
        assert_eq!(queue.block_count(), 0);
        assert_eq!(queue.counters().total_frames(), 0);
    }

    #[test]
    fn test_unbound_slots_left_alone() {
        let queue = FrameQueue::new();
        queue.push(ramp(2, 2));
        let table = ReorderTable::new(ChannelMask::STEREO);

        let (_, out) = with_buffers(MAX_SLOTS, 2, |buffers| queue.render(2, buffers, &table));
        assert!(out[2..].iter().all(|buf| buf.iter().all(|s| *s == 0.0)));
    }
}
