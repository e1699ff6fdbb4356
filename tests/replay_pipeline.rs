//! End-to-end runs of the detection pipeline over synthesized recordings.

use earshot::audio::recorder::MockAudioSource;
use earshot::audio::wav::WavAudioSource;
use earshot::audio::FrameSourceConfig;
use earshot::clock::SystemClock;
use earshot::config::Config;
use earshot::location::FixedLocationProvider;
use earshot::pipeline::{
    AlertEvent, MockClassifier, Pipeline, PipelineConfig, PipelineHandle, RmsClassifier,
    WindowerConfig,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const RATE: u32 = 16000;

/// Write a mono 16 kHz WAV where each `(seconds, loud)` segment is either
/// silence or a 440 Hz tone.
fn write_wav(path: &Path, segments: &[(f32, bool)]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let mut n: u64 = 0;
    for &(seconds, loud) in segments {
        let count = (seconds * RATE as f32) as u64;
        for _ in 0..count {
            let sample = if loud {
                let t = n as f32 / RATE as f32;
                (16000.0 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16
            } else {
                0
            };
            writer.write_sample(sample).unwrap();
            n += 1;
        }
    }
    writer.finalize().unwrap();
}

fn replay(config: &Config, segments: &[(f32, bool)]) -> (Vec<AlertEvent>, PipelineHandle) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("street.wav");
    write_wav(&path, segments);

    let source = WavAudioSource::open(&path, RATE).unwrap();
    let classifier = RmsClassifier::new(&config.inference.rms_label, config.inference.rms_full_scale);
    let location = config.location.fixed_position().map(|(lat, lon)| {
        Box::new(
            FixedLocationProvider::new(lat, lon, config.location.accuracy_m, Arc::new(SystemClock))
                .unwrap(),
        ) as Box<dyn earshot::LocationProvider>
    });

    let handle = Pipeline::new(config.to_pipeline_config().unwrap())
        .start(Box::new(source), Arc::new(classifier), location)
        .unwrap();
    let alerts = handle.alerts().iter().collect();
    (alerts, handle)
}

#[test]
fn test_single_burst_raises_one_alert() {
    let config = Config::default();
    let (alerts, handle) = replay(&config, &[(1.0, false), (3.0, true), (1.0, false)]);
    let snapshot = handle.stop();

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].label, "alarm");
    assert!(alerts[0].peak_confidence > 0.9);
    assert!(alerts[0].location.is_none());
    // 5 s of audio, 1 s windows every 0.5 s
    assert_eq!(snapshot.windows_captured, 9);
    assert_eq!(snapshot.windows_classified, 9);
    assert_eq!(snapshot.queue_overflows, 0);
    assert_eq!(snapshot.confirmations, 1);
}

#[test]
fn test_silence_raises_nothing() {
    let config = Config::default();
    let (alerts, handle) = replay(&config, &[(4.0, false)]);
    assert!(alerts.is_empty());
    assert_eq!(handle.stop().confirmations, 0);
}

#[test]
fn test_second_burst_inside_cooldown_is_suppressed() {
    let config = Config::default();
    let segments = [
        (1.0, false),
        (2.0, true),
        (4.0, false),
        (2.0, true),
        (1.0, false),
    ];
    let (alerts, handle) = replay(&config, &segments);
    let snapshot = handle.stop();

    assert_eq!(alerts.len(), 1);
    assert_eq!(snapshot.confirmations, 2);
    assert_eq!(snapshot.alerts_suppressed, 1);
}

#[test]
fn test_second_burst_after_cooldown_alerts_again() {
    let mut config = Config::default();
    config.alert.default_cooldown_secs = 2;
    let segments = [
        (1.0, false),
        (2.0, true),
        (4.0, false),
        (2.0, true),
        (1.0, false),
    ];
    let (alerts, handle) = replay(&config, &segments);
    handle.stop();

    assert_eq!(alerts.len(), 2);
    let gap = alerts[1].confirmed_at - alerts[0].confirmed_at;
    assert_eq!(gap, Duration::from_secs(6));
}

#[test]
fn test_fixed_location_is_attached_with_map_link() {
    let mut config = Config::default();
    config.location.latitude = Some(40.4168);
    config.location.longitude = Some(-3.7038);
    let (alerts, handle) = replay(&config, &[(3.0, true)]);
    handle.stop();

    assert_eq!(alerts.len(), 1);
    assert_eq!(
        alerts[0].emergency_message("Help!"),
        "Help!\nLocation: https://maps.google.com/?q=40.4168,-3.7038"
    );
}

#[test]
fn test_disabled_class_never_alerts() {
    let mut config = Config::default();
    for class in &mut config.classes {
        if class.label == "alarm" {
            class.enabled = false;
        }
    }
    let (alerts, handle) = replay(&config, &[(3.0, true)]);
    let snapshot = handle.stop();

    assert!(alerts.is_empty());
    assert_eq!(snapshot.windows_classified, 5);
}

#[test]
fn test_slow_classifier_drops_oldest_windows_without_blocking_capture() {
    let capacity = 2;
    let config = PipelineConfig {
        frame: FrameSourceConfig {
            frame_len: 160,
            ..FrameSourceConfig::default()
        },
        windower: WindowerConfig {
            window_len: 1600,
            hop_len: 800,
            frame_len: 160,
        },
        queue_capacity: capacity,
        ..PipelineConfig::default()
    };
    // Live source that always has audio ready: far faster than the classifier.
    let source = MockAudioSource::new().with_samples(vec![1000; 1600]);
    let classifier = MockClassifier::new()
        .with_score("siren", 0.1)
        .with_delay(Duration::from_millis(20));

    let handle = Pipeline::new(config)
        .start(Box::new(source), Arc::new(classifier), None)
        .unwrap();
    std::thread::sleep(Duration::from_millis(300));
    let snapshot = handle.stop();

    assert!(snapshot.queue_overflows > 0);
    assert!(snapshot.windows_classified > 0);
    assert!(snapshot.windows_classified < snapshot.windows_captured);
    // Everything captured was either classified, dropped, or still queued.
    let unaccounted =
        snapshot.windows_captured - snapshot.windows_classified - snapshot.queue_overflows;
    assert!(unaccounted <= capacity as u64 + 1, "{}", snapshot);
}
