//! Error types for earshot.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EarshotError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Microphone unavailable: {message}")]
    CaptureUnavailable { message: String },

    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Classification errors
    #[error("Invalid model output for {label}: confidence {confidence} is not a probability")]
    InvalidModelOutput { label: String, confidence: f32 },

    #[error("Classification failed: {message}")]
    Classification { message: String },

    // Location errors
    #[error("Location provider error: {message}")]
    Location { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl EarshotError {
    /// Whether this error stops hazard detection.
    ///
    /// Only loss of the microphone is fatal; classifier anomalies degrade
    /// to dropped windows.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EarshotError::CaptureUnavailable { .. }
                | EarshotError::AudioDeviceNotFound { .. }
                | EarshotError::AudioCapture { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EarshotError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = EarshotError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = EarshotError::ConfigInvalidValue {
            key: "classes.siren.t_exit".to_string(),
            message: "must be below t_enter".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for classes.siren.t_exit: must be below t_enter"
        );
    }

    #[test]
    fn test_capture_unavailable_display() {
        let error = EarshotError::CaptureUnavailable {
            message: "permission denied".to_string(),
        };
        assert_eq!(error.to_string(), "Microphone unavailable: permission denied");
    }

    #[test]
    fn test_invalid_model_output_display() {
        let error = EarshotError::InvalidModelOutput {
            label: "siren".to_string(),
            confidence: 1.5,
        };
        assert_eq!(
            error.to_string(),
            "Invalid model output for siren: confidence 1.5 is not a probability"
        );
    }

    #[test]
    fn test_audio_device_not_found_display() {
        let error = EarshotError::AudioDeviceNotFound {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: default");
    }

    #[test]
    fn test_only_capture_errors_are_fatal() {
        assert!(
            EarshotError::CaptureUnavailable {
                message: "busy".to_string()
            }
            .is_fatal()
        );
        assert!(
            EarshotError::AudioCapture {
                message: "stream died".to_string()
            }
            .is_fatal()
        );
        assert!(
            !EarshotError::InvalidModelOutput {
                label: "horn".to_string(),
                confidence: f32::NAN,
            }
            .is_fatal()
        );
        assert!(
            !EarshotError::Classification {
                message: "timeout".to_string()
            }
            .is_fatal()
        );
        assert!(!EarshotError::Other("x".to_string()).is_fatal());
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: EarshotError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: EarshotError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: EarshotError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<EarshotError>();
        assert_sync::<EarshotError>();
    }
}
