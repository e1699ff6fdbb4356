//! earshot - hazard sound detection with geo-tagged alerts
//!
//! Listens to the microphone, scores overlapping windows with a sound
//! classifier, confirms hazards with per-class hysteresis, and emits
//! alerts carrying the device's latest position.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod classes;
#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
pub mod location;
pub mod pipeline;

// Composition root for the binary
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Capability seams
pub use audio::recorder::AudioSource;
pub use clock::{Clock, SystemClock};
pub use location::{LocationProvider, LocationSample};
pub use pipeline::inference::Classifier;
pub use pipeline::sink::AlertSink;

// Pipeline
pub use pipeline::alert::AlertEvent;
pub use pipeline::orchestrator::{FatalError, Pipeline, PipelineConfig, PipelineHandle};

// Error handling
pub use error::{EarshotError, Result};

// Config
pub use config::Config;

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_hash_only_when_built_from_git() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "unexpected hash in {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
