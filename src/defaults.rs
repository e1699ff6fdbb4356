//! Default configuration constants for earshot.
//!
//! Shared between the TOML config and the pipeline config so both agree
//! on what an unconfigured install does.

/// Default audio sample rate in Hz.
///
/// 16kHz matches the input rate of common audio event classifiers.
pub const SAMPLE_RATE: u32 = 16000;

/// Duration of one capture frame in milliseconds.
pub const FRAME_MS: u32 = 20;

/// Duration of one analysis window in milliseconds.
///
/// Must be a whole number of frames.
pub const WINDOW_MS: u32 = 1000;

/// Fraction of each window shared with the next one.
pub const OVERLAP: f32 = 0.5;

/// Maximum number of windows waiting for inference before the oldest is dropped.
pub const QUEUE_CAPACITY: usize = 4;

/// Score at or above which a class starts rising toward confirmation.
pub const T_ENTER: f32 = 0.6;

/// Score below which an active class starts falling back to idle.
pub const T_EXIT: f32 = 0.3;

/// Consecutive windows at or above `T_ENTER` needed to confirm an event.
pub const N_ENTER: u32 = 3;

/// Consecutive windows below `T_EXIT` needed to end an event.
pub const N_EXIT: u32 = 2;

/// Minimum time between two alerts of the same class, in seconds.
pub const COOLDOWN_SECS: u64 = 30;

/// Maximum age of a location fix still attached to an alert, in seconds.
pub const LOCATION_STALENESS_SECS: u64 = 300;

/// Consecutive failed microphone reads before capture is declared lost.
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;

/// Consecutive classifier failures before the model is declared dead.
pub const MAX_CONSECUTIVE_CLASSIFIER_ERRORS: u32 = 10;

/// Base text of the emergency message attached to alerts.
pub const EMERGENCY_MESSAGE: &str = "Help! A hazard sound was detected near me.";

/// Hazard classes enabled on a fresh install.
pub const DEFAULT_CLASSES: &[&str] = &[
    "siren",
    "alarm",
    "horn",
    "gunshot",
    "scream",
    "glass_break",
    "fire_alarm",
];

/// Label scored by the built-in loudness classifier.
pub const RMS_LABEL: &str = "alarm";

/// RMS level that the loudness classifier maps to full confidence.
pub const RMS_FULL_SCALE: f32 = 0.25;
