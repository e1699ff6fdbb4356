use crate::defaults;
use crate::error::{EarshotError, Result};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real microphone, WAV file, mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    ///
    /// Implementations report a microphone that cannot be opened as
    /// `EarshotError::CaptureUnavailable`.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio and release the device.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever samples were captured since the last call.
    ///
    /// An empty vector means "nothing yet" for a live source and
    /// "exhausted" for a finite one.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Whether the source ends on its own (files) or runs until stopped (microphones).
    fn is_finite(&self) -> bool {
        false
    }

    /// Sample rate of the samples returned by `read_samples`.
    fn sample_rate(&self) -> u32 {
        defaults::SAMPLE_RATE
    }
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    samples: Vec<i16>,
    should_fail_start: bool,
    should_fail_read: bool,
    max_reads: Option<u32>,
    reads: u32,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings
    pub fn new() -> Self {
        Self {
            is_started: false,
            samples: vec![0i16; 320],
            should_fail_start: false,
            should_fail_read: false,
            max_reads: None,
            reads: 0,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return specific samples on every read
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = samples;
        self
    }

    /// Make the source finite: after `reads` reads it returns empty buffers.
    pub fn with_max_reads(mut self, reads: u32) -> Self {
        self.max_reads = Some(reads);
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(EarshotError::CaptureUnavailable {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(EarshotError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        if let Some(max) = self.max_reads {
            if self.reads >= max {
                return Ok(Vec::new());
            }
            self.reads += 1;
        }
        Ok(self.samples.clone())
    }

    fn is_finite(&self) -> bool {
        self.max_reads.is_some()
    }
}
