//! Overlapping analysis windows over a stream of fixed-length frames.

use crate::error::{EarshotError, Result};
use crate::pipeline::types::{AnalysisWindow, AudioFrame, samples_to_duration};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, warn};

/// Window geometry in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowerConfig {
    /// Samples per analysis window (the classifier input size).
    pub window_len: usize,
    /// New samples between consecutive windows.
    pub hop_len: usize,
    /// Samples per capture frame.
    pub frame_len: usize,
}

impl WindowerConfig {
    /// Derives the hop from an overlap fraction in [0, 1).
    pub fn from_overlap(window_len: usize, frame_len: usize, overlap: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&overlap) {
            return Err(EarshotError::ConfigInvalidValue {
                key: "audio.overlap".to_string(),
                message: format!("must be in [0, 1), got {}", overlap),
            });
        }
        let hop_len = (window_len as f64 * (1.0 - overlap as f64)).round() as usize;
        let config = Self {
            window_len,
            hop_len,
            frame_len,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that windows are whole frames and hops are whole frames.
    ///
    /// A whole-frame hop guarantees each pushed frame completes at most one window.
    pub fn validate(&self) -> Result<()> {
        if self.frame_len == 0 {
            return Err(invalid("audio.frame_ms", "frame must contain at least one sample"));
        }
        if self.window_len == 0 || self.window_len % self.frame_len != 0 {
            return Err(invalid(
                "audio.window_ms",
                &format!(
                    "window of {} samples is not a positive multiple of the {}-sample frame",
                    self.window_len, self.frame_len
                ),
            ));
        }
        if self.hop_len == 0 || self.hop_len > self.window_len || self.hop_len % self.frame_len != 0
        {
            return Err(invalid(
                "audio.overlap",
                &format!(
                    "hop of {} samples must be a whole, non-zero number of {}-sample frames no longer than the window",
                    self.hop_len, self.frame_len
                ),
            ));
        }
        Ok(())
    }

    /// Samples shared by consecutive windows.
    pub fn overlap_len(&self) -> usize {
        self.window_len - self.hop_len
    }
}

fn invalid(key: &str, message: &str) -> EarshotError {
    EarshotError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Accumulates frames and cuts overlapping windows.
///
/// Deterministic: the same frame sequence always yields the same windows.
pub struct Windower {
    config: WindowerConfig,
    buffer: VecDeque<i16>,
    /// Capture time of `buffer[0]`.
    buffer_start: Option<Instant>,
    sample_rate: u32,
    sequence: u64,
    rejected: u64,
}

impl Windower {
    pub fn new(config: WindowerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            buffer: VecDeque::with_capacity(config.window_len),
            buffer_start: None,
            sample_rate: 0,
            sequence: 0,
            rejected: 0,
        })
    }

    pub fn config(&self) -> &WindowerConfig {
        &self.config
    }

    /// Samples currently held back for the next window.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Frames dropped for having the wrong length.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Adds a frame; returns a window when one is complete.
    ///
    /// Frames must be exactly `frame_len` samples. Anything else is dropped,
    /// since a longer frame would leave audio buffered past the next hop.
    pub fn push(&mut self, frame: &AudioFrame) -> Option<AnalysisWindow> {
        if frame.samples.len() != self.config.frame_len {
            self.rejected += 1;
            if self.rejected == 1 {
                warn!(
                    expected = self.config.frame_len,
                    got = frame.samples.len(),
                    "dropping frame of the wrong length"
                );
            } else {
                debug!(got = frame.samples.len(), "dropping frame of the wrong length");
            }
            return None;
        }
        if self.buffer.is_empty() {
            self.buffer_start = Some(frame.timestamp);
        }
        self.sample_rate = frame.sample_rate;
        self.buffer.extend(frame.samples.iter().copied());

        if self.buffer.len() < self.config.window_len {
            return None;
        }

        let start = self.buffer_start.unwrap_or(frame.timestamp);
        let samples: Vec<i16> = self
            .buffer
            .iter()
            .take(self.config.window_len)
            .copied()
            .collect();
        let window = AnalysisWindow::new(samples, self.sample_rate, start, self.sequence);
        self.sequence += 1;

        self.buffer.drain(..self.config.hop_len);
        self.buffer_start = if self.buffer.is_empty() {
            None
        } else {
            Some(start + samples_to_duration(self.config.hop_len, self.sample_rate))
        };

        Some(window)
    }

    /// Forget buffered audio, as on a pipeline restart.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.buffer_start = None;
        self.sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const RATE: u32 = 16000;

    fn frames(count: usize, frame_len: usize, origin: Instant) -> Vec<AudioFrame> {
        (0..count)
            .map(|i| {
                let samples = (0..frame_len)
                    .map(|j| (i * frame_len + j) as i16)
                    .collect();
                let ts = origin + samples_to_duration(i * frame_len, RATE);
                AudioFrame::new(samples, RATE, ts, i as u64)
            })
            .collect()
    }

    #[test]
    fn test_half_overlap_two_windows_of_audio_yield_three_windows() {
        let frame_len = 4;
        let window_len = 16;
        let config = WindowerConfig::from_overlap(window_len, frame_len, 0.5).unwrap();
        let mut windower = Windower::new(config).unwrap();

        // 2W samples
        let input = frames(2 * window_len / frame_len, frame_len, Instant::now());
        let windows: Vec<AnalysisWindow> =
            input.iter().filter_map(|f| windower.push(f)).collect();

        assert_eq!(windows.len(), 3);
        for pair in windows.windows(2) {
            let prev = &pair[0].samples;
            let next = &pair[1].samples;
            assert_eq!(prev.len(), window_len);
            assert_eq!(&prev[window_len / 2..], &next[..window_len / 2]);
        }
        assert_eq!(windows[0].samples[0], 0);
        assert_eq!(windows[1].samples[0], 8);
        assert_eq!(windows[2].samples[0], 16);
    }

    #[test]
    fn test_window_start_timestamps_advance_by_hop() {
        let origin = Instant::now();
        let config = WindowerConfig::from_overlap(320 * 4, 320, 0.5).unwrap();
        let mut windower = Windower::new(config).unwrap();
        let windows: Vec<AnalysisWindow> = frames(12, 320, origin)
            .iter()
            .filter_map(|f| windower.push(f))
            .collect();

        assert_eq!(windows[0].start, origin);
        assert_eq!(windows[1].start, origin + Duration::from_millis(40));
        assert_eq!(windows[2].start, origin + Duration::from_millis(80));
        assert_eq!(windows[2].sequence, 2);
    }

    #[test]
    fn test_no_overlap_windows_are_disjoint() {
        let config = WindowerConfig::from_overlap(8, 4, 0.0).unwrap();
        let mut windower = Windower::new(config).unwrap();
        let windows: Vec<AnalysisWindow> = frames(8, 4, Instant::now())
            .iter()
            .filter_map(|f| windower.push(f))
            .collect();
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[1].samples[0], 8);
    }

    #[test]
    fn test_fractional_frame_hop_rejected() {
        // 12 * 0.5 = 6 is not a whole number of 4-sample frames
        let err = WindowerConfig::from_overlap(12, 4, 0.5).unwrap_err();
        assert!(matches!(err, EarshotError::ConfigInvalidValue { .. }));
    }

    #[test]
    fn test_deterministic_for_same_input() {
        let config = WindowerConfig::from_overlap(16, 4, 0.75).unwrap();
        let input = frames(20, 4, Instant::now());
        let run = |input: &[AudioFrame]| {
            let mut w = Windower::new(config).unwrap();
            input
                .iter()
                .filter_map(|f| w.push(f))
                .map(|w| w.samples)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(&input), run(&input));
    }

    #[test]
    fn test_window_must_be_multiple_of_frame() {
        let config = WindowerConfig {
            window_len: 10,
            hop_len: 4,
            frame_len: 4,
        };
        assert!(Windower::new(config).is_err());
    }

    #[test]
    fn test_overlap_out_of_range_rejected() {
        assert!(WindowerConfig::from_overlap(16, 4, 1.0).is_err());
        assert!(WindowerConfig::from_overlap(16, 4, -0.1).is_err());
    }

    #[test]
    fn test_wrong_length_frames_are_dropped() {
        let config = WindowerConfig::from_overlap(8, 4, 0.5).unwrap();
        let mut windower = Windower::new(config).unwrap();
        let origin = Instant::now();

        assert!(windower.push(&AudioFrame::new(vec![1; 12], RATE, origin, 0)).is_none());
        assert!(windower.push(&AudioFrame::new(Vec::new(), RATE, origin, 1)).is_none());
        assert_eq!(windower.buffered(), 0);
        assert_eq!(windower.rejected(), 2);

        // Well-formed frames still window normally afterwards.
        let windows: Vec<AnalysisWindow> = frames(4, 4, origin)
            .iter()
            .filter_map(|f| windower.push(f))
            .collect();
        assert_eq!(windows.len(), 3);
        assert_eq!(windower.buffered(), 4);
    }

    #[test]
    fn test_reset_discards_buffer() {
        let config = WindowerConfig::from_overlap(8, 4, 0.5).unwrap();
        let mut windower = Windower::new(config).unwrap();
        let input = frames(3, 4, Instant::now());
        windower.push(&input[0]);
        assert_eq!(windower.buffered(), 4);
        windower.reset();
        assert_eq!(windower.buffered(), 0);
        assert!(windower.push(&input[1]).is_none());
    }
}
