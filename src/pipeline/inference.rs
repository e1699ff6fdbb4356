//! Window classification.
//!
//! The model is an opaque scorer behind the [`Classifier`] trait. The
//! [`InferenceEngine`] maps its (label, confidence) output onto the
//! configured class set and rejects anything that is not a probability.

use crate::classes::{ClassRegistry, ClassScores};
use crate::defaults;
use crate::error::{EarshotError, Result};
use crate::pipeline::diagnostics::Diagnostics;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{AnalysisWindow, ScoredWindow};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, trace};

/// Floor below which the strongest class is not worth reporting in traces.
const REPORT_FLOOR: f32 = 0.3;

/// Trait for audio event classifiers.
///
/// Implementations are shared across threads by reference and must not
/// keep per-call state; scratch buffers are allocated per call.
pub trait Classifier: Send + Sync {
    /// Score one window.
    ///
    /// Labels the model does not know may be omitted; labels outside the
    /// configured class set are ignored by the engine.
    fn classify(&self, window: &AnalysisWindow) -> Result<Vec<(String, f32)>>;

    /// Name of the loaded model.
    fn model_name(&self) -> &str;
}

impl<T: Classifier> Classifier for Arc<T> {
    fn classify(&self, window: &AnalysisWindow) -> Result<Vec<(String, f32)>> {
        (**self).classify(window)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Stateless wrapper that turns raw model output into [`ClassScores`].
#[derive(Clone)]
pub struct InferenceEngine {
    classifier: Arc<dyn Classifier>,
    registry: Arc<ClassRegistry>,
}

impl InferenceEngine {
    pub fn new(classifier: Arc<dyn Classifier>, registry: Arc<ClassRegistry>) -> Self {
        Self {
            classifier,
            registry,
        }
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn model_name(&self) -> &str {
        self.classifier.model_name()
    }

    /// Classify a window into one score per known class.
    ///
    /// Known classes the model did not report score 0.0. A non-finite or
    /// out-of-range confidence anywhere in the output fails the whole window
    /// with `InvalidModelOutput`.
    pub fn classify(&self, window: &AnalysisWindow) -> Result<ClassScores> {
        let raw = self.classifier.classify(window)?;
        let mut confidences = vec![0.0f32; self.registry.len()];

        for (label, confidence) in raw {
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(EarshotError::InvalidModelOutput { label, confidence });
            }
            if let Some(id) = self.registry.id_of(&label) {
                let slot = &mut confidences[id.index()];
                *slot = slot.max(confidence);
            }
        }

        Ok(ClassScores::from_confidences(confidences))
    }
}

/// Station that runs the engine on each pending window.
///
/// A window with invalid model output is dropped and counted. Any other
/// classifier error also drops the window, but `max_failures` of them in a
/// row mean the model is gone and the station stops with a fatal error.
pub struct InferenceStation {
    engine: InferenceEngine,
    diagnostics: Arc<Diagnostics>,
    consecutive_failures: u32,
    max_failures: u32,
}

impl InferenceStation {
    pub fn new(engine: InferenceEngine, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            engine,
            diagnostics,
            consecutive_failures: 0,
            max_failures: defaults::MAX_CONSECUTIVE_CLASSIFIER_ERRORS,
        }
    }

    /// Consecutive classifier failures tolerated before giving up (min 1).
    pub fn with_failure_limit(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }
}

impl Station for InferenceStation {
    type Input = AnalysisWindow;
    type Output = ScoredWindow;

    fn name(&self) -> &'static str {
        "inference"
    }

    fn process(
        &mut self,
        window: AnalysisWindow,
    ) -> std::result::Result<Option<ScoredWindow>, StationError> {
        match self.engine.classify(&window) {
            Ok(scores) => {
                self.consecutive_failures = 0;
                self.diagnostics.record_window_classified();
                if let Some(top) = scores.top(REPORT_FLOOR) {
                    trace!(
                        window = window.sequence,
                        class = self.engine.registry().label(top.class),
                        confidence = top.confidence,
                        "strongest class"
                    );
                }
                Ok(Some(ScoredWindow {
                    start: window.start,
                    sequence: window.sequence,
                    scores,
                }))
            }
            Err(e @ EarshotError::InvalidModelOutput { .. }) => {
                self.diagnostics.record_invalid_output();
                Err(StationError::Recoverable(format!(
                    "window {} dropped: {}",
                    window.sequence, e
                )))
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.max_failures {
                    error!(
                        model = self.engine.model_name(),
                        failures = self.consecutive_failures,
                        "classifier keeps failing, giving up"
                    );
                    return Err(StationError::Fatal(format!(
                        "classifier failed {} windows in a row: {}",
                        self.consecutive_failures, e
                    )));
                }
                Err(StationError::Recoverable(format!(
                    "window {} dropped: {}",
                    window.sequence, e
                )))
            }
        }
    }

    fn shutdown(&mut self) {
        debug!(model = self.engine.model_name(), "inference stopped");
    }
}

/// Loudness-based stand-in classifier.
///
/// Scores a single label by window RMS relative to `full_scale`, so the
/// pipeline can run end to end without a trained model.
#[derive(Debug, Clone)]
pub struct RmsClassifier {
    label: String,
    full_scale: f32,
}

impl RmsClassifier {
    pub fn new(label: &str, full_scale: f32) -> Self {
        Self {
            label: label.to_string(),
            full_scale: if full_scale > 0.0 { full_scale } else { 1.0 },
        }
    }
}

impl Classifier for RmsClassifier {
    fn classify(&self, window: &AnalysisWindow) -> Result<Vec<(String, f32)>> {
        let confidence = (calculate_rms(&window.samples) / self.full_scale).clamp(0.0, 1.0);
        Ok(vec![(self.label.clone(), confidence)])
    }

    fn model_name(&self) -> &str {
        "rms"
    }
}

/// Normalized RMS level of `samples`, 0.0 for silence up to 1.0.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Mock classifier for testing.
///
/// Returns scripted outputs in order, then the fixed output forever.
#[derive(Debug, Default)]
pub struct MockClassifier {
    fixed: Vec<(String, f32)>,
    script: Mutex<VecDeque<Vec<(String, f32)>>>,
    delay: Option<Duration>,
    should_fail: bool,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score returned for `label` once the script is exhausted.
    pub fn with_score(mut self, label: &str, confidence: f32) -> Self {
        self.fixed.push((label.to_string(), confidence));
        self
    }

    /// One output per call for `label`, consumed in order.
    pub fn with_script(self, label: &str, scores: &[f32]) -> Self {
        {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            script.extend(scores.iter().map(|&s| vec![(label.to_string(), s)]));
        }
        self
    }

    /// Sleep this long in every call, to model a slow model.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Number of classify calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for MockClassifier {
    fn classify(&self, _window: &AnalysisWindow) -> Result<Vec<(String, f32)>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.should_fail {
            return Err(EarshotError::Classification {
                message: "mock classification failure".to_string(),
            });
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(next.unwrap_or_else(|| self.fixed.clone()))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ClassId;
    use std::time::Instant;

    fn registry() -> Arc<ClassRegistry> {
        Arc::new(ClassRegistry::new(["siren", "alarm", "horn"]))
    }

    fn window(samples: Vec<i16>) -> AnalysisWindow {
        AnalysisWindow::new(samples, 16000, Instant::now(), 7)
    }

    #[test]
    fn test_one_score_per_known_class() {
        let classifier = MockClassifier::new()
            .with_score("alarm", 0.8)
            .with_score("dog_bark", 0.9);
        let engine = InferenceEngine::new(Arc::new(classifier), registry());

        let scores = engine.classify(&window(vec![0; 16])).unwrap();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores.get(ClassId(0)), Some(0.0));
        assert_eq!(scores.get(ClassId(1)), Some(0.8));
        assert_eq!(scores.ranked()[0].class, ClassId(1));
    }

    #[test]
    fn test_out_of_range_confidence_is_invalid() {
        let classifier = MockClassifier::new().with_score("siren", 1.5);
        let engine = InferenceEngine::new(Arc::new(classifier), registry());
        let err = engine.classify(&window(vec![0; 16])).unwrap_err();
        assert!(matches!(err, EarshotError::InvalidModelOutput { .. }));
    }

    #[test]
    fn test_nan_confidence_is_invalid_even_for_unknown_label() {
        let classifier = MockClassifier::new().with_score("dog_bark", f32::NAN);
        let engine = InferenceEngine::new(Arc::new(classifier), registry());
        assert!(matches!(
            engine.classify(&window(vec![0; 16])),
            Err(EarshotError::InvalidModelOutput { .. })
        ));
    }

    #[test]
    fn test_engine_is_stateless_across_calls() {
        let classifier = MockClassifier::new().with_score("horn", 0.4);
        let engine = InferenceEngine::new(Arc::new(classifier), registry());
        let w = window(vec![0; 16]);
        assert_eq!(engine.classify(&w).unwrap(), engine.classify(&w).unwrap());
    }

    #[test]
    fn test_station_counts_and_drops_invalid_windows() {
        let classifier = MockClassifier::new()
            .with_script("siren", &[0.7, -0.1, 0.2])
            .with_score("siren", 0.0);
        let diag = Arc::new(Diagnostics::new());
        let mut station = InferenceStation::new(
            InferenceEngine::new(Arc::new(classifier), registry()),
            diag.clone(),
        );

        let first = station.process(window(vec![0; 16])).unwrap().unwrap();
        assert_eq!(first.sequence, 7);
        assert_eq!(first.scores.get(ClassId(0)), Some(0.7));

        let second = station.process(window(vec![0; 16]));
        assert!(matches!(second, Err(StationError::Recoverable(_))));

        assert!(station.process(window(vec![0; 16])).unwrap().is_some());

        let snap = diag.snapshot();
        assert_eq!(snap.windows_classified, 2);
        assert_eq!(snap.invalid_outputs, 1);
    }

    #[test]
    fn test_classifier_failure_is_recoverable() {
        let diag = Arc::new(Diagnostics::new());
        let mut station = InferenceStation::new(
            InferenceEngine::new(Arc::new(MockClassifier::new().with_failure()), registry()),
            diag.clone(),
        );
        assert!(matches!(
            station.process(window(vec![0; 16])),
            Err(StationError::Recoverable(_))
        ));
        assert_eq!(diag.snapshot().invalid_outputs, 0);
    }

    #[test]
    fn test_repeated_classifier_failures_become_fatal() {
        let mut station = InferenceStation::new(
            InferenceEngine::new(Arc::new(MockClassifier::new().with_failure()), registry()),
            Arc::new(Diagnostics::new()),
        )
        .with_failure_limit(3);

        for _ in 0..2 {
            assert!(matches!(
                station.process(window(vec![0; 16])),
                Err(StationError::Recoverable(_))
            ));
        }
        assert!(matches!(
            station.process(window(vec![0; 16])),
            Err(StationError::Fatal(_))
        ));
    }

    /// Fails only while `failing` is set.
    struct FlakyClassifier {
        failing: std::sync::atomic::AtomicBool,
    }

    impl Classifier for FlakyClassifier {
        fn classify(&self, _window: &AnalysisWindow) -> Result<Vec<(String, f32)>> {
            if self.failing.load(Ordering::SeqCst) {
                Err(EarshotError::Classification {
                    message: "busy".to_string(),
                })
            } else {
                Ok(vec![("siren".to_string(), 0.5)])
            }
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    #[test]
    fn test_success_resets_failure_count() {
        let classifier = Arc::new(FlakyClassifier {
            failing: std::sync::atomic::AtomicBool::new(true),
        });
        let mut station = InferenceStation::new(
            InferenceEngine::new(classifier.clone(), registry()),
            Arc::new(Diagnostics::new()),
        )
        .with_failure_limit(2);

        assert!(station.process(window(vec![0; 16])).is_err());
        classifier.failing.store(false, Ordering::SeqCst);
        assert!(station.process(window(vec![0; 16])).unwrap().is_some());
        classifier.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            station.process(window(vec![0; 16])),
            Err(StationError::Recoverable(_))
        ));
        assert!(matches!(
            station.process(window(vec![0; 16])),
            Err(StationError::Fatal(_))
        ));
    }

    #[test]
    fn test_invalid_output_never_becomes_fatal() {
        let classifier = MockClassifier::new().with_score("siren", 2.0);
        let mut station = InferenceStation::new(
            InferenceEngine::new(Arc::new(classifier), registry()),
            Arc::new(Diagnostics::new()),
        )
        .with_failure_limit(1);
        for _ in 0..5 {
            assert!(matches!(
                station.process(window(vec![0; 16])),
                Err(StationError::Recoverable(_))
            ));
        }
    }

    #[test]
    fn test_rms_classifier_silence_and_loud() {
        let classifier = RmsClassifier::new("alarm", 0.25);
        let silent = classifier.classify(&window(vec![0; 160])).unwrap();
        assert_eq!(silent, vec![("alarm".to_string(), 0.0)]);

        let loud = classifier.classify(&window(vec![i16::MAX; 160])).unwrap();
        assert_eq!(loud[0].1, 1.0);
    }

    #[test]
    fn test_rms_classifier_scales_by_full_scale() {
        let classifier = RmsClassifier::new("alarm", 0.5);
        // Constant amplitude 0.25 of full scale
        let samples = vec![(i16::MAX as f32 * 0.25) as i16; 160];
        let score = classifier.classify(&window(samples)).unwrap()[0].1;
        assert!((score - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_calculate_rms() {
        assert_eq!(calculate_rms(&[]), 0.0);
        assert!((calculate_rms(&[i16::MAX, i16::MAX]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mock_classifier_script_then_fixed() {
        let classifier = MockClassifier::new()
            .with_script("siren", &[0.9])
            .with_score("siren", 0.1);
        let w = window(vec![]);
        assert_eq!(classifier.classify(&w).unwrap()[0].1, 0.9);
        assert_eq!(classifier.classify(&w).unwrap()[0].1, 0.1);
        assert_eq!(classifier.calls(), 2);
    }
}
