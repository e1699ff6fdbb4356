//! Fixed-duration frame stream over an [`AudioSource`].
//!
//! The source delivers whatever the device buffered since the last read;
//! `FrameSource` re-slices that into frames of exactly `frame_len` samples
//! and stamps each one on a sample clock anchored at open time, so frame
//! timestamps are monotonic and gap-free regardless of read jitter.
//!
//! A `FrameSource` owns the microphone from `open` until `close` or drop,
//! and cannot be reopened once closed.

use crate::audio::recorder::AudioSource;
use crate::clock::Clock;
use crate::defaults;
use crate::error::{EarshotError, Result};
use crate::pipeline::types::{AudioFrame, samples_to_duration};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for frame slicing and read polling.
#[derive(Debug, Clone)]
pub struct FrameSourceConfig {
    /// Samples per frame.
    pub frame_len: usize,
    /// Sleep between reads that return no samples.
    pub poll_interval: Duration,
    /// Consecutive failed reads before the microphone is declared lost.
    pub max_consecutive_errors: u32,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            frame_len: (defaults::SAMPLE_RATE * defaults::FRAME_MS / 1000) as usize,
            poll_interval: Duration::from_millis(10),
            max_consecutive_errors: defaults::MAX_CONSECUTIVE_READ_ERRORS,
        }
    }
}

/// Lazy, non-restartable stream of fixed-length audio frames.
pub struct FrameSource {
    source: Box<dyn AudioSource>,
    config: FrameSourceConfig,
    sample_rate: u32,
    pending: Vec<i16>,
    origin: Instant,
    samples_emitted: u64,
    sequence: u64,
    running: Arc<AtomicBool>,
    acquired: bool,
    exhausted: bool,
}

impl FrameSource {
    /// Acquire the microphone and start capturing.
    ///
    /// Any failure to open the device is reported as
    /// `EarshotError::CaptureUnavailable`.
    pub fn open(
        mut source: Box<dyn AudioSource>,
        config: FrameSourceConfig,
        clock: &dyn Clock,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        if config.frame_len == 0 {
            return Err(EarshotError::ConfigInvalidValue {
                key: "audio.frame_ms".to_string(),
                message: "frame must contain at least one sample".to_string(),
            });
        }

        source.start().map_err(|e| match e {
            EarshotError::CaptureUnavailable { .. } => e,
            other => EarshotError::CaptureUnavailable {
                message: other.to_string(),
            },
        })?;

        let sample_rate = source.sample_rate();
        debug!(
            frame_len = config.frame_len,
            sample_rate, "microphone acquired"
        );

        Ok(Self {
            source,
            config,
            sample_rate,
            pending: Vec::new(),
            origin: clock.now(),
            samples_emitted: 0,
            sequence: 0,
            running,
            acquired: true,
            exhausted: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_len(&self) -> usize {
        self.config.frame_len
    }

    /// Whether the underlying source ends on its own (file replay).
    pub fn is_finite(&self) -> bool {
        self.source.is_finite()
    }

    /// Frames produced so far.
    pub fn frames_emitted(&self) -> u64 {
        self.sequence
    }

    /// Blocks until the next full frame is available.
    ///
    /// Returns `Ok(None)` once the stream has ended: the running flag was
    /// cleared, a finite source ran dry, or the source was closed.
    /// Returns `CaptureUnavailable` when reads keep failing.
    pub fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        let mut consecutive_errors: u32 = 0;

        loop {
            if self.pending.len() >= self.config.frame_len {
                return Ok(Some(self.take_frame()));
            }
            if self.exhausted || !self.acquired || !self.running.load(Ordering::SeqCst) {
                return Ok(None);
            }

            match self.source.read_samples() {
                Ok(samples) if samples.is_empty() => {
                    if self.source.is_finite() {
                        if !self.pending.is_empty() {
                            debug!(
                                samples = self.pending.len(),
                                "dropping partial trailing frame"
                            );
                            self.pending.clear();
                        }
                        self.exhausted = true;
                        return Ok(None);
                    }
                    thread::sleep(self.config.poll_interval);
                }
                Ok(samples) => {
                    consecutive_errors = 0;
                    self.pending.extend_from_slice(&samples);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(attempt = consecutive_errors, "audio read failed: {}", e);
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        self.exhausted = true;
                        return Err(EarshotError::CaptureUnavailable {
                            message: format!(
                                "audio capture failed {} times in a row: {}",
                                consecutive_errors, e
                            ),
                        });
                    }
                    thread::sleep(self.config.poll_interval);
                }
            }
        }
    }

    fn take_frame(&mut self) -> AudioFrame {
        let samples: Vec<i16> = self.pending.drain(..self.config.frame_len).collect();
        let timestamp =
            self.origin + samples_to_duration(self.samples_emitted as usize, self.sample_rate);
        self.samples_emitted += samples.len() as u64;
        let sequence = self.sequence;
        self.sequence += 1;
        AudioFrame::new(samples, self.sample_rate, timestamp, sequence)
    }

    /// Release the microphone. Buffered samples are discarded.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.acquired {
            return Ok(());
        }
        self.acquired = false;
        self.pending.clear();
        debug!(frames = self.sequence, "releasing microphone");
        self.source.stop()
    }
}

impl Iterator for FrameSource {
    type Item = Result<AudioFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("failed to release microphone: {}", e);
        }
    }
}
