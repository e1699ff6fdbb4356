//! Hazard detection application entry point.
//!
//! Wires configuration, capture, the classifier, and the location provider
//! into a [`Pipeline`], then writes alerts to an [`AlertSink`] until the user
//! interrupts, the time limit passes, the source ends, or capture fails.

use crate::audio::capture::CpalAudioSource;
use crate::audio::recorder::AudioSource;
use crate::audio::wav::WavAudioSource;
use crate::clock::{Clock, SystemClock};
use crate::config::{ClassifierKind, Config};
use crate::error::{EarshotError, Result};
use crate::location::{FixedLocationProvider, LocationProvider};
use crate::pipeline::alert::CooldownPolicy;
use crate::pipeline::diagnostics::DiagnosticsSnapshot;
use crate::pipeline::inference::{Classifier, RmsClassifier};
use crate::pipeline::orchestrator::{FatalError, Pipeline, PipelineConfig, PipelineHandle};
use crate::pipeline::sink::{AlertSink, EmergencyMessageSink, JsonLinesSink, LogSink};
use crossbeam_channel::{never, select};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How alerts are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertFormat {
    /// One status line per alert.
    Log,
    /// One JSON object per line.
    Json,
    /// The emergency message with a map link.
    Message,
}

impl AlertFormat {
    /// `--json` wins over `--message`.
    pub fn from_flags(json: bool, message: bool) -> Self {
        match (json, message) {
            (true, _) => AlertFormat::Json,
            (false, true) => AlertFormat::Message,
            (false, false) => AlertFormat::Log,
        }
    }
}

/// Command-line overrides applied on top of the configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub format: AlertFormat,
    pub cooldown: Option<Duration>,
    pub quiet: bool,
}

/// Why the alert loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Interrupted,
    TimeLimit,
    SourceEnded,
    Fatal(FatalError),
}

/// Listen to the microphone until Ctrl+C, the optional time limit, or a fatal error.
pub async fn run_listen_command(
    mut config: Config,
    device: Option<String>,
    duration: Option<Duration>,
    options: RunOptions,
) -> Result<()> {
    if let Some(d) = device {
        config.audio.device = Some(d);
    }
    let pipeline_config = build_pipeline_config(&config, &options)?;

    let source: Box<dyn AudioSource> = Box::new(CpalAudioSource::new(
        config.audio.device.as_deref(),
        pipeline_config.sample_rate,
    )?);

    if !options.quiet {
        eprintln!(
            "Listening for {} on {}. Press Ctrl+C to stop.",
            pipeline_config.registry.labels().join(", "),
            config.audio.device.as_deref().unwrap_or("default device"),
        );
    }

    let deadline = duration.map(|d| Instant::now() + d);
    run_detection(&config, pipeline_config, source, deadline, &options).await
}

/// Run a WAV file through the same pipeline as the microphone.
pub async fn run_replay_command(config: Config, path: &Path, options: RunOptions) -> Result<()> {
    let pipeline_config = build_pipeline_config(&config, &options)?;
    let source = WavAudioSource::open(path, pipeline_config.sample_rate)?;

    if !options.quiet {
        eprintln!(
            "Replaying {} ({:.1}s)",
            path.display(),
            source.len() as f64 / pipeline_config.sample_rate as f64
        );
    }

    run_detection(&config, pipeline_config, Box::new(source), None, &options).await
}

async fn run_detection(
    config: &Config,
    pipeline_config: PipelineConfig,
    source: Box<dyn AudioSource>,
    deadline: Option<Instant>,
    options: &RunOptions,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let classifier = build_classifier(config, &pipeline_config);
    let location = build_location_provider(config, clock.clone())?;
    let sink = build_sink(options.format, config);

    let handle = Pipeline::new(pipeline_config)
        .with_clock(clock)
        .start(source, classifier, location)?;

    let (reason, snapshot) = drive(handle, sink, deadline).await?;
    if !options.quiet {
        eprintln!("{}", snapshot);
    }

    match reason {
        StopReason::Fatal(fatal) => Err(EarshotError::Other(fatal.to_string())),
        StopReason::Interrupted => {
            info!("interrupted");
            Ok(())
        }
        StopReason::TimeLimit | StopReason::SourceEnded => Ok(()),
    }
}

/// Pump alerts into the sink on a blocking thread while Ctrl+C is watched
/// on the runtime, then stop the pipeline.
async fn drive(
    handle: PipelineHandle,
    mut sink: Box<dyn AlertSink>,
    deadline: Option<Instant>,
) -> Result<(StopReason, DiagnosticsSnapshot)> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let (handle, mut sink, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = consume_alerts(&handle, sink.as_mut(), &interrupted, deadline);
        (handle, sink, outcome)
    })
    .await
    .map_err(|e| EarshotError::Other(format!("alert consumer failed: {}", e)))?;
    watcher.abort();

    // Alerts already emitted still reach the user, whatever stopped the run.
    let (snapshot, undelivered) = handle.finish();
    for alert in &undelivered {
        sink.handle(alert)?;
    }
    sink.finish()?;
    Ok((outcome?, snapshot))
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Write alerts to `sink` until something ends the run.
///
/// Returns as soon as a fatal error arrives; alerts still in flight are
/// left to [`PipelineHandle::finish`]. The alert stream closing on a live
/// source means a stage died, so it is reported as fatal too.
pub fn consume_alerts(
    handle: &PipelineHandle,
    sink: &mut dyn AlertSink,
    interrupted: &AtomicBool,
    deadline: Option<Instant>,
) -> Result<StopReason> {
    let mut fatal_open = true;
    loop {
        let fatal_rx = if fatal_open {
            handle.fatal().clone()
        } else {
            never()
        };

        select! {
            recv(handle.alerts()) -> msg => match msg {
                Ok(alert) => sink.handle(&alert)?,
                Err(_) => {
                    return Ok(match handle.fatal().recv_timeout(POLL_INTERVAL) {
                        Ok(fatal) => StopReason::Fatal(fatal),
                        Err(_) if handle.is_live() => StopReason::Fatal(FatalError {
                            component: "pipeline".to_string(),
                            message: "alert stream closed while listening".to_string(),
                        }),
                        Err(_) => StopReason::SourceEnded,
                    });
                }
            },
            recv(fatal_rx) -> msg => match msg {
                Ok(fatal) => return Ok(StopReason::Fatal(fatal)),
                Err(_) => fatal_open = false,
            },
            default(POLL_INTERVAL) => {}
        }

        if interrupted.load(Ordering::SeqCst) {
            return Ok(StopReason::Interrupted);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(StopReason::TimeLimit);
        }
    }
}

/// Resolve the configuration, applying a uniform `--cooldown` if given.
pub fn build_pipeline_config(config: &Config, options: &RunOptions) -> Result<PipelineConfig> {
    let mut pipeline_config = config.to_pipeline_config()?;
    if let Some(cooldown) = options.cooldown {
        pipeline_config.cooldown = CooldownPolicy::uniform(cooldown);
    }
    Ok(pipeline_config)
}

pub fn build_classifier(config: &Config, pipeline_config: &PipelineConfig) -> Arc<dyn Classifier> {
    match config.inference.classifier {
        ClassifierKind::Rms => {
            let label = config.inference.rms_label.as_str();
            if pipeline_config.registry.id_of(label).is_none() {
                warn!(
                    label,
                    "loudness classifier label is not an enabled class, nothing will be detected"
                );
            }
            Arc::new(RmsClassifier::new(label, config.inference.rms_full_scale))
        }
    }
}

/// A fixed provider when `[location]` has coordinates, otherwise none.
pub fn build_location_provider(
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<Option<Box<dyn LocationProvider>>> {
    match config.location.fixed_position() {
        Some((latitude, longitude)) => {
            let provider = FixedLocationProvider::new(
                latitude,
                longitude,
                config.location.accuracy_m,
                clock,
            )?;
            Ok(Some(Box::new(provider)))
        }
        None => Ok(None),
    }
}

pub fn build_sink(format: AlertFormat, config: &Config) -> Box<dyn AlertSink> {
    match format {
        AlertFormat::Log => Box::new(LogSink::stdout()),
        AlertFormat::Json => Box::new(JsonLinesSink::stdout()),
        AlertFormat::Message => Box::new(EmergencyMessageSink::stdout(
            &config.alert.emergency_message,
        )),
    }
}
