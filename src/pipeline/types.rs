//! Data types flowing through the detection pipeline.

use crate::classes::{ClassId, ClassScores};
use std::time::{Duration, Instant};

/// A frame of raw audio samples with timing information.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM samples (16-bit signed integers, mono).
    pub samples: Vec<i16>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
    /// Monotonic capture time of the first sample.
    pub timestamp: Instant,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(samples: Vec<i16>, sample_rate: u32, timestamp: Instant, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp,
            sequence,
        }
    }

    /// Duration covered by this frame.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

/// A fixed-length slice of audio handed to the classifier as one unit.
#[derive(Debug, Clone)]
pub struct AnalysisWindow {
    /// Exactly `window_len` samples.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Capture time of the first sample in the window.
    pub start: Instant,
    /// Position of this window in the stream.
    pub sequence: u64,
}

impl AnalysisWindow {
    pub fn new(samples: Vec<i16>, sample_rate: u32, start: Instant, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            start,
            sequence,
        }
    }

    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Samples normalized to [-1.0, 1.0], the layout most models expect.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples
            .iter()
            .map(|&s| s as f32 / i16::MAX as f32)
            .collect()
    }
}

/// Classifier output for one window.
#[derive(Debug, Clone)]
pub struct ScoredWindow {
    /// Start of the window the scores belong to.
    pub start: Instant,
    pub sequence: u64,
    pub scores: ClassScores,
}

/// A class that just crossed from idle into a sustained detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Confirmation {
    pub class: ClassId,
    /// Start of the window on which the class was confirmed.
    pub timestamp: Instant,
    /// Highest score seen since the class started rising.
    pub peak_confidence: f32,
}

pub(crate) fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = samples as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}
