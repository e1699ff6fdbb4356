//! Command-line interface for earshot
//!
//! Provides argument parsing using clap derive macros.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Hazard sound detection with geo-tagged alerts
#[derive(Parser, Debug)]
#[command(
    name = "earshot",
    version,
    about = "Hazard sound detection with geo-tagged alerts"
)]
pub struct Cli {
    /// Subcommand to execute (default: listen)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print alerts and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: per-window scores)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print alerts as JSON lines
    #[arg(long, global = true)]
    pub json: bool,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Options shared by every command that runs the detector.
#[derive(Args, Debug, Clone, Default)]
pub struct DetectArgs {
    /// Minimum time between two alerts of the same class, for every class (e.g. 10s, 2m)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub cooldown: Option<Duration>,

    /// Print the emergency message with a map link for each alert
    #[arg(long)]
    pub message: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen to the microphone and alert on hazard sounds
    Listen {
        /// Audio input device (see `earshot devices`)
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        /// Stop after this long (e.g. 30s, 1h30m); default: until Ctrl+C
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        duration: Option<Duration>,

        #[command(flatten)]
        detect: DetectArgs,
    },

    /// Run a WAV file through the detector
    Replay {
        /// WAV file to analyze
        file: PathBuf,

        #[command(flatten)]
        detect: DetectArgs,
    },

    /// List available audio input devices
    Devices,

    /// View and create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file, defaults, and environment)
    Show,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
