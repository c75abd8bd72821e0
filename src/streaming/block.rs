//! Interleaved audio blocks handed over by the media pipeline

use crate::{Result, SpatialError};
use std::sync::Arc;

/// Reference-counted block of interleaved `f32` samples with a read cursor
///
/// Cloning shares the sample storage; each clone keeps its own cursor.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    samples: Arc<[f32]>,
    channels: usize,
    offset: usize,
    frames: usize,
}

impl AudioBlock {
    /// Wrap interleaved samples
    ///
    /// Fails when `channels` is zero or the sample count is not a whole number
    /// of frames.
    pub fn from_interleaved(samples: Vec<f32>, channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(SpatialError::InvalidBlock("zero channel count".into()));
        }
        if samples.len() % channels != 0 {
            return Err(SpatialError::InvalidBlock(format!(
                "{} samples is not a multiple of {} channels",
                samples.len(),
                channels
            )));
        }

        let frames = samples.len() / channels;
        Ok(AudioBlock {
            samples: samples.into(),
            channels,
            offset: 0,
            frames,
        })
    }

    /// Block of `frames` silent frames
    pub fn silence(frames: usize, channels: usize) -> Result<Self> {
        Self::from_interleaved(vec![0.0; frames * channels], channels)
    }

    /// Remaining (unconsumed) frames
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Interleaved channel count
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// True when every frame has been consumed
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Remaining samples, interleaved
    #[inline]
    pub fn as_interleaved(&self) -> &[f32] {
        let start = self.offset * self.channels;
        &self.samples[start..start + self.frames * self.channels]
    }

    /// Consume up to `frames` frames; returns how many were consumed
    pub fn advance(&mut self, frames: usize) -> usize {
        let consumed = frames.min(self.frames);
        self.offset += consumed;
        self.frames -= consumed;
        consumed
    }
}
