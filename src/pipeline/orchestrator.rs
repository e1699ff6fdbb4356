//! Detection pipeline that runs from startup until shutdown.
//!
//! ```text
//! capture thread:  FrameSource -> Windower -> PendingWindowQueue (drop-oldest)
//! stations:        InferenceStation -> DetectionStation -> AlertStation
//! publisher:       Vec<AlertEvent> -> alert channel
//! ```
//!
//! Location is merged only inside the alert station. Fatal conditions go to
//! a separate channel so consumers can tell "no hazards" from "not listening".

use crate::audio::frame_source::{FrameSource, FrameSourceConfig};
use crate::audio::recorder::AudioSource;
use crate::classes::ClassRegistry;
use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::{EarshotError, Result};
use crate::location::{LocationCell, LocationProvider, LocationUpdater};
use crate::pipeline::alert::{AlertDispatcher, AlertEvent, AlertStation, CooldownPolicy};
use crate::pipeline::detection::{DetectionStation, DetectorBank, HysteresisConfig};
use crate::pipeline::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::pipeline::error::{ErrorReporter, StationError, TracingReporter};
use crate::pipeline::inference::{Classifier, InferenceEngine, InferenceStation};
use crate::pipeline::queue::{PendingWindowQueue, PushOutcome};
use crate::pipeline::station::{Station, StationRunner};
use crate::pipeline::types::AnalysisWindow;
use crate::pipeline::windower::{Windower, WindowerConfig};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Resolved pipeline settings. Built from [`crate::config::Config`] or by hand in tests.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub frame: FrameSourceConfig,
    pub windower: WindowerConfig,
    /// Windows waiting for inference before the oldest is dropped.
    pub queue_capacity: usize,
    /// Classifier errors in a row before inference stops with a fatal error.
    pub max_classifier_failures: u32,
    pub registry: Arc<ClassRegistry>,
    /// `hysteresis[i]` drives `ClassId(i)`.
    pub hysteresis: Vec<HysteresisConfig>,
    pub cooldown: CooldownPolicy,
    pub location_staleness: Duration,
    /// Capacity of the external alert channel.
    pub alert_buffer: usize,
    /// Capacity of the channels between stations.
    pub station_buffer: usize,
    /// How long `stop` waits for threads before detaching them.
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let frame = FrameSourceConfig::default();
        let window_len = (defaults::SAMPLE_RATE * defaults::WINDOW_MS / 1000) as usize;
        let registry = Arc::new(ClassRegistry::new(defaults::DEFAULT_CLASSES.iter().copied()));
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            windower: WindowerConfig {
                window_len,
                hop_len: window_len / 2,
                frame_len: frame.frame_len,
            },
            frame,
            queue_capacity: defaults::QUEUE_CAPACITY,
            max_classifier_failures: defaults::MAX_CONSECUTIVE_CLASSIFIER_ERRORS,
            hysteresis: vec![HysteresisConfig::default(); registry.len()],
            registry,
            cooldown: CooldownPolicy::uniform(Duration::from_secs(defaults::COOLDOWN_SECS)),
            location_staleness: Duration::from_secs(defaults::LOCATION_STALENESS_SECS),
            alert_buffer: 16,
            station_buffer: 16,
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.registry.is_empty() {
            return Err(EarshotError::ConfigInvalidValue {
                key: "classes".to_string(),
                message: "at least one class must be enabled".to_string(),
            });
        }
        if self.hysteresis.len() != self.registry.len() {
            return Err(EarshotError::ConfigInvalidValue {
                key: "classes".to_string(),
                message: format!(
                    "{} hysteresis settings for {} classes",
                    self.hysteresis.len(),
                    self.registry.len()
                ),
            });
        }
        for (label, hysteresis) in self.registry.labels().iter().zip(&self.hysteresis) {
            hysteresis.validate(label)?;
        }
        self.windower.validate()?;
        if self.windower.frame_len != self.frame.frame_len {
            return Err(EarshotError::ConfigInvalidValue {
                key: "audio.frame_ms".to_string(),
                message: format!(
                    "windower expects {}-sample frames, capture produces {}",
                    self.windower.frame_len, self.frame.frame_len
                ),
            });
        }
        if self.queue_capacity == 0 {
            return Err(EarshotError::ConfigInvalidValue {
                key: "inference.queue_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Notification that hazard detection has stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub component: String,
    pub message: String,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hazard detection stopped ({}): {}",
            self.component, self.message
        )
    }
}

impl std::error::Error for FatalError {}

/// Best-effort delivery; the first fatal error is the one that matters.
fn send_fatal(fatal_tx: &Sender<FatalError>, component: &str, message: String) {
    let fatal = FatalError {
        component: component.to_string(),
        message,
    };
    if fatal_tx.try_send(fatal).is_err() {
        debug!(component, "fatal channel full");
    }
}

/// Passes reports through. A fatal one also stops capture and goes to
/// the fatal channel.
struct FatalForwarder {
    inner: Arc<dyn ErrorReporter>,
    running: Arc<AtomicBool>,
    fatal_tx: Sender<FatalError>,
}

impl ErrorReporter for FatalForwarder {
    fn report(&self, station: &str, err: &StationError) {
        self.inner.report(station, err);
        if let StationError::Fatal(message) = err {
            self.running.store(false, Ordering::SeqCst);
            send_fatal(&self.fatal_tx, station, message.clone());
        }
    }
}

/// Handle to a running pipeline.
///
/// Dropping the handle stops the pipeline like [`PipelineHandle::stop`].
pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
    threads: Vec<JoinHandle<()>>,
    alert_rx: Receiver<AlertEvent>,
    fatal_rx: Receiver<FatalError>,
    /// Alerts still queued when the pipeline stopped.
    undelivered: Vec<AlertEvent>,
    live: bool,
    diagnostics: Arc<Diagnostics>,
    location: LocationCell,
    location_provider: Option<Box<dyn LocationProvider>>,
    shutdown_timeout: Duration,
    stopped: bool,
}

impl PipelineHandle {
    /// Alerts in emission order. Disconnects once the pipeline has drained.
    pub fn alerts(&self) -> &Receiver<AlertEvent> {
        &self.alert_rx
    }

    /// Fatal conditions, e.g. loss of the microphone.
    pub fn fatal(&self) -> &Receiver<FatalError> {
        &self.fatal_rx
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Publish fixes from outside the pipeline, e.g. a platform callback.
    pub fn location_updater(&self) -> LocationUpdater {
        self.location.updater()
    }

    /// True for microphone capture, false for a replayed recording.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// True until `stop`, a fatal error, or the end of capture.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.capture.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the pipeline and returns the final counters.
    ///
    /// Releases resources in reverse acquisition order: location provider,
    /// then the microphone, then the stations drain and exit. Threads still
    /// running after the shutdown timeout are detached.
    ///
    /// Alerts nobody read are logged at warn; use [`PipelineHandle::finish`]
    /// to get them back instead.
    pub fn stop(mut self) -> DiagnosticsSnapshot {
        self.shutdown();
        self.warn_undelivered();
        self.diagnostics.snapshot()
    }

    /// Like [`PipelineHandle::stop`], but also returns the alerts that were
    /// emitted and not yet read from [`PipelineHandle::alerts`].
    pub fn finish(mut self) -> (DiagnosticsSnapshot, Vec<AlertEvent>) {
        self.shutdown();
        let undelivered = std::mem::take(&mut self.undelivered);
        (self.diagnostics.snapshot(), undelivered)
    }

    fn warn_undelivered(&mut self) {
        for alert in self.undelivered.drain(..) {
            warn!(
                class = alert.label.as_str(),
                confidence = alert.peak_confidence,
                "alert not delivered before shutdown"
            );
        }
    }

    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Some(mut provider) = self.location_provider.take()
            && let Err(e) = provider.stop()
        {
            warn!(provider = provider.name(), "failed to stop location provider: {}", e);
        }

        self.running.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + self.shutdown_timeout;
        let poll_interval = Duration::from_millis(20);

        if let Some(capture) = self.capture.take() {
            self.threads.insert(0, capture);
        }

        loop {
            // Unread alerts would otherwise block the publisher.
            self.undelivered.extend(self.alert_rx.try_iter());

            let mut remaining = Vec::new();
            for handle in self.threads.drain(..) {
                if handle.is_finished() {
                    if let Err(panic_info) = handle.join() {
                        let msg = panic_info
                            .downcast_ref::<&str>()
                            .copied()
                            .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                            .unwrap_or("unknown panic");
                        error!("pipeline thread panicked: {}", msg);
                    }
                } else {
                    remaining.push(handle);
                }
            }
            self.threads = remaining;

            if self.threads.is_empty() {
                break;
            }

            if Instant::now() >= deadline {
                warn!(
                    threads = self.threads.len(),
                    "shutdown timeout, detaching remaining threads"
                );
                self.threads.clear();
                break;
            }

            thread::sleep(poll_interval);
        }
        self.undelivered.extend(self.alert_rx.try_iter());

        info!("{}", self.diagnostics.snapshot());
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.shutdown();
        self.warn_undelivered();
    }
}

/// Detection pipeline: AudioSource -> windows -> scores -> confirmations -> alerts.
pub struct Pipeline {
    config: PipelineConfig,
    error_reporter: Arc<dyn ErrorReporter>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            error_reporter: Arc::new(TracingReporter),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Sets a custom clock (for deterministic testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Acquires the microphone and starts every stage.
    ///
    /// Fails with `CaptureUnavailable` if the source cannot be opened; no
    /// thread is left running in that case. A location provider that fails
    /// to start only costs location on alerts.
    pub fn start(
        self,
        audio_source: Box<dyn AudioSource>,
        classifier: Arc<dyn Classifier>,
        location_provider: Option<Box<dyn LocationProvider>>,
    ) -> Result<PipelineHandle> {
        self.config.validate()?;
        let config = self.config;

        let running = Arc::new(AtomicBool::new(true));
        let diagnostics = Arc::new(Diagnostics::new());
        let location = LocationCell::new();

        let mut frames = FrameSource::open(
            audio_source,
            config.frame.clone(),
            self.clock.as_ref(),
            running.clone(),
        )?;
        if frames.sample_rate() != config.sample_rate {
            return Err(EarshotError::CaptureUnavailable {
                message: format!(
                    "source delivers {} Hz, pipeline expects {} Hz",
                    frames.sample_rate(),
                    config.sample_rate
                ),
            });
        }

        let location_provider = location_provider.and_then(|mut provider| {
            match provider.start(location.updater()) {
                Ok(()) => Some(provider),
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        "location unavailable, alerts will carry none: {}", e
                    );
                    None
                }
            }
        });

        let windower = Windower::new(config.windower)?;

        let (fatal_tx, fatal_rx) = bounded(8);
        let reporter: Arc<dyn ErrorReporter> = Arc::new(FatalForwarder {
            inner: self.error_reporter.clone(),
            running: running.clone(),
            fatal_tx: fatal_tx.clone(),
        });

        let (queue, window_rx) =
            PendingWindowQueue::new(config.queue_capacity, diagnostics.clone());
        let (scored_tx, scored_rx) = bounded(config.station_buffer);
        let (confirm_tx, confirm_rx) = bounded(config.station_buffer);
        let (batch_tx, batch_rx) = bounded::<Vec<AlertEvent>>(config.station_buffer);
        let (alert_tx, alert_rx) = bounded(config.alert_buffer);

        let engine = InferenceEngine::new(classifier, config.registry.clone());
        info!(
            model = engine.model_name(),
            classes = config.registry.len(),
            window = config.windower.window_len,
            hop = config.windower.hop_len,
            "starting detection pipeline"
        );

        let inference_runner = StationRunner::spawn(
            InferenceStation::new(engine, diagnostics.clone())
                .with_failure_limit(config.max_classifier_failures),
            window_rx,
            scored_tx,
            reporter.clone(),
        );
        let detection_runner = StationRunner::spawn(
            DetectionStation::new(
                DetectorBank::new(&config.hysteresis),
                config.registry.clone(),
                diagnostics.clone(),
            ),
            scored_rx,
            confirm_tx,
            reporter.clone(),
        );
        let alert_runner = StationRunner::spawn(
            AlertStation::new(AlertDispatcher::new(
                config.registry.clone(),
                config.cooldown.clone(),
                config.location_staleness,
                location.clone(),
                self.clock.clone(),
                diagnostics.clone(),
            )),
            confirm_rx,
            batch_tx,
            reporter,
        );

        let publisher = thread::Builder::new()
            .name("earshot-publisher".to_string())
            .spawn(move || {
                for batch in batch_rx {
                    for alert in batch {
                        if alert_tx.send(alert).is_err() {
                            debug!("alert receiver gone");
                        }
                    }
                }
            })?;

        let live = !frames.is_finite();
        let mut threads = vec![publisher];
        threads.push(watch_station(inference_runner, &running, &fatal_tx)?);
        threads.push(watch_station(detection_runner, &running, &fatal_tx)?);
        threads.push(watch_station(alert_runner, &running, &fatal_tx)?);

        let capture_running = running.clone();
        let capture_diagnostics = diagnostics.clone();
        let capture = thread::Builder::new()
            .name("earshot-capture".to_string())
            .spawn(move || {
                run_capture(
                    &mut frames,
                    windower,
                    &queue,
                    &capture_running,
                    &capture_diagnostics,
                    &fatal_tx,
                );
                if let Err(e) = frames.close() {
                    warn!("failed to release microphone: {}", e);
                }
                // Dropping the queue lets the stations drain and exit.
                drop(queue);
            })?;

        Ok(PipelineHandle {
            running,
            capture: Some(capture),
            threads,
            alert_rx,
            fatal_rx,
            undelivered: Vec::new(),
            live,
            diagnostics,
            location,
            location_provider,
            shutdown_timeout: config.shutdown_timeout,
            stopped: false,
        })
    }
}

/// Waits on a station thread. A station that dies stops capture and is
/// reported on the fatal channel like any other fatal error.
fn watch_station<S: Station>(
    runner: StationRunner<S>,
    running: &Arc<AtomicBool>,
    fatal_tx: &Sender<FatalError>,
) -> std::io::Result<JoinHandle<()>> {
    let running = running.clone();
    let fatal_tx = fatal_tx.clone();
    let station = runner.name();
    thread::Builder::new()
        .name(format!("earshot-{}-watch", station))
        .spawn(move || {
            if let Err(msg) = runner.join() {
                error!("{}", msg);
                running.store(false, Ordering::SeqCst);
                send_fatal(&fatal_tx, station, msg);
            }
        })
}

fn run_capture(
    frames: &mut FrameSource,
    mut windower: Windower,
    queue: &PendingWindowQueue<AnalysisWindow>,
    running: &AtomicBool,
    diagnostics: &Diagnostics,
    fatal_tx: &Sender<FatalError>,
) {
    let replay = frames.is_finite();

    loop {
        let frame = match frames.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                error!("{}", e);
                running.store(false, Ordering::SeqCst);
                send_fatal(fatal_tx, "capture", e.to_string());
                break;
            }
        };

        let Some(window) = windower.push(&frame) else {
            continue;
        };
        diagnostics.record_window_captured();

        let outcome = if replay {
            queue.push_wait(window, || running.load(Ordering::SeqCst))
        } else {
            queue.push(window)
        };
        if outcome == PushOutcome::Abandoned {
            break;
        }
    }

    debug!(frames = frames.frames_emitted(), "capture finished");
}
