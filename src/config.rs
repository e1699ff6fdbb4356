use crate::audio::frame_source::FrameSourceConfig;
use crate::classes::ClassRegistry;
use crate::defaults;
use crate::error::{EarshotError, Result};
use crate::pipeline::alert::CooldownPolicy;
use crate::pipeline::detection::HysteresisConfig;
use crate::pipeline::orchestrator::PipelineConfig;
use crate::pipeline::windower::WindowerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub inference: InferenceConfig,
    pub location: LocationConfig,
    pub alert: AlertConfig,
    pub classes: Vec<ClassConfig>,
}

/// Audio capture and windowing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub window_ms: u32,
    pub overlap: f32,
}

/// Classifier and pending-window queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    pub queue_capacity: usize,
    pub classifier: ClassifierKind,
    /// Label scored by the loudness classifier.
    pub rms_label: String,
    pub rms_full_scale: f32,
    /// Classifier errors in a row before detection is declared stopped.
    pub max_consecutive_failures: u32,
}

/// Which scorer the binary hands to the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    Rms,
}

/// Location configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocationConfig {
    pub staleness_secs: u64,
    /// Fixed position for stationary installs. Both or neither.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: f32,
}

/// Alert policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub default_cooldown_secs: u64,
    pub emergency_message: String,
    pub alert_buffer: usize,
}

/// One hazard class and its detection tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassConfig {
    pub label: String,
    pub enabled: bool,
    pub t_enter: f32,
    pub t_exit: f32,
    pub n_enter: u32,
    pub n_exit: u32,
    /// Overrides `alert.default_cooldown_secs` for this class.
    pub cooldown_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            inference: InferenceConfig::default(),
            location: LocationConfig::default(),
            alert: AlertConfig::default(),
            classes: defaults::DEFAULT_CLASSES
                .iter()
                .map(|label| ClassConfig::named(label))
                .collect(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
            window_ms: defaults::WINDOW_MS,
            overlap: defaults::OVERLAP,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::QUEUE_CAPACITY,
            classifier: ClassifierKind::Rms,
            rms_label: defaults::RMS_LABEL.to_string(),
            rms_full_scale: defaults::RMS_FULL_SCALE,
            max_consecutive_failures: defaults::MAX_CONSECUTIVE_CLASSIFIER_ERRORS,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            staleness_secs: defaults::LOCATION_STALENESS_SECS,
            latitude: None,
            longitude: None,
            accuracy_m: 50.0,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            default_cooldown_secs: defaults::COOLDOWN_SECS,
            emergency_message: defaults::EMERGENCY_MESSAGE.to_string(),
            alert_buffer: 16,
        }
    }
}

impl Default for ClassConfig {
    fn default() -> Self {
        Self::named("")
    }
}

impl ClassConfig {
    /// An enabled class with default tuning.
    pub fn named(label: &str) -> Self {
        let hysteresis = HysteresisConfig::default();
        Self {
            label: label.to_string(),
            enabled: true,
            t_enter: hysteresis.t_enter,
            t_exit: hysteresis.t_exit,
            n_enter: hysteresis.n_enter,
            n_exit: hysteresis.n_exit,
            cooldown_secs: None,
        }
    }

    pub fn hysteresis(&self) -> HysteresisConfig {
        HysteresisConfig {
            t_enter: self.t_enter,
            t_exit: self.t_exit,
            n_enter: self.n_enter,
            n_exit: self.n_exit,
        }
    }
}

impl LocationConfig {
    /// The configured fixed position, if both coordinates are set.
    pub fn fixed_position(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

fn invalid(key: &str, message: impl Into<String>) -> EarshotError {
    EarshotError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values. The file is not validated here;
    /// call [`Config::validate`] once overrides are applied.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EarshotError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                EarshotError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(EarshotError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - EARSHOT_AUDIO_DEVICE → audio.device
    /// - EARSHOT_QUEUE_CAPACITY → inference.queue_capacity
    /// - EARSHOT_STALENESS_SECS → location.staleness_secs
    ///
    /// Empty or unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("EARSHOT_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(capacity) = std::env::var("EARSHOT_QUEUE_CAPACITY")
            && let Ok(capacity) = capacity.parse()
        {
            self.inference.queue_capacity = capacity;
        }

        if let Ok(secs) = std::env::var("EARSHOT_STALENESS_SECS")
            && let Ok(secs) = secs.parse()
        {
            self.location.staleness_secs = secs;
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/earshot/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("earshot")
            .join("config.toml")
    }

    /// Labels of the classes that take part in detection, in file order.
    pub fn enabled_classes(&self) -> impl Iterator<Item = &ClassConfig> {
        self.classes.iter().filter(|c| c.enabled)
    }

    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if audio.frame_ms == 0 {
            return Err(invalid("audio.frame_ms", "must be positive"));
        }
        if audio.window_ms == 0 || audio.window_ms % audio.frame_ms != 0 {
            return Err(invalid(
                "audio.window_ms",
                format!(
                    "{} ms is not a positive multiple of the {} ms frame",
                    audio.window_ms, audio.frame_ms
                ),
            ));
        }
        if (audio.sample_rate as u64 * audio.frame_ms as u64) % 1000 != 0 {
            return Err(invalid(
                "audio.frame_ms",
                format!(
                    "{} ms at {} Hz is not a whole number of samples",
                    audio.frame_ms, audio.sample_rate
                ),
            ));
        }
        if self.inference.queue_capacity == 0 {
            return Err(invalid("inference.queue_capacity", "must be at least 1"));
        }
        if self.inference.max_consecutive_failures == 0 {
            return Err(invalid(
                "inference.max_consecutive_failures",
                "must be at least 1",
            ));
        }
        if self.inference.rms_full_scale.is_nan() || self.inference.rms_full_scale <= 0.0 {
            return Err(invalid("inference.rms_full_scale", "must be positive"));
        }
        if self.alert.alert_buffer == 0 {
            return Err(invalid("alert.alert_buffer", "must be at least 1"));
        }
        if self.location.latitude.is_some() != self.location.longitude.is_some() {
            return Err(invalid(
                "location",
                "latitude and longitude must be set together",
            ));
        }

        let mut seen: Vec<&str> = Vec::new();
        for class in &self.classes {
            if class.label.trim().is_empty() {
                return Err(invalid("classes.label", "must not be empty"));
            }
            if seen.contains(&class.label.as_str()) {
                return Err(invalid(
                    &format!("classes.{}", class.label),
                    "declared more than once",
                ));
            }
            seen.push(&class.label);
            class.hysteresis().validate(&class.label)?;
        }
        if self.enabled_classes().next().is_none() {
            return Err(invalid("classes", "at least one class must be enabled"));
        }

        // Overlap and whole-frame hop are checked where the hop is derived.
        self.windower_config().map(|_| ())
    }

    fn frame_len(&self) -> usize {
        (self.audio.sample_rate as u64 * self.audio.frame_ms as u64 / 1000) as usize
    }

    fn windower_config(&self) -> Result<WindowerConfig> {
        let window_len =
            (self.audio.sample_rate as u64 * self.audio.window_ms as u64 / 1000) as usize;
        WindowerConfig::from_overlap(window_len, self.frame_len(), self.audio.overlap)
    }

    /// Resolve into the sample counts, durations and class set the pipeline runs on.
    pub fn to_pipeline_config(&self) -> Result<PipelineConfig> {
        self.validate()?;

        let enabled: Vec<&ClassConfig> = self.enabled_classes().collect();
        let registry = Arc::new(ClassRegistry::new(
            enabled.iter().map(|c| c.label.clone()),
        ));
        let default_cooldown = Duration::from_secs(self.alert.default_cooldown_secs);
        let cooldown = CooldownPolicy::new(
            default_cooldown,
            enabled
                .iter()
                .map(|c| c.cooldown_secs.map_or(default_cooldown, Duration::from_secs))
                .collect(),
        );

        Ok(PipelineConfig {
            sample_rate: self.audio.sample_rate,
            frame: FrameSourceConfig {
                frame_len: self.frame_len(),
                ..FrameSourceConfig::default()
            },
            windower: self.windower_config()?,
            queue_capacity: self.inference.queue_capacity,
            max_classifier_failures: self.inference.max_consecutive_failures,
            registry,
            hysteresis: enabled.iter().map(|c| c.hysteresis()).collect(),
            cooldown,
            location_staleness: Duration::from_secs(self.location.staleness_secs),
            alert_buffer: self.alert.alert_buffer,
            ..PipelineConfig::default()
        })
    }
}
