//! Hazard detection pipeline.
//!
//! Capture and windowing run on one thread; inference, detection, and alert
//! dispatch are stations, each on its own thread, connected by bounded
//! crossbeam channels. The only lossy hop is the drop-oldest queue in
//! front of inference.

pub mod alert;
pub mod detection;
pub mod diagnostics;
pub mod error;
pub mod inference;
pub mod orchestrator;
pub mod queue;
pub mod sink;
pub mod station;
pub mod types;
pub mod windower;

pub use alert::{AlertDispatcher, AlertEvent, AlertStation, CooldownPolicy, DispatchOutcome};
pub use detection::{
    DetectionEvent, DetectionStateMachine, DetectionStation, DetectorBank, HysteresisConfig, Phase,
};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use error::{ErrorReporter, StationError, TracingReporter};
pub use inference::{Classifier, InferenceEngine, InferenceStation, MockClassifier, RmsClassifier};
pub use orchestrator::{FatalError, Pipeline, PipelineConfig, PipelineHandle};
pub use queue::{PendingWindowQueue, PushOutcome};
pub use sink::{AlertSink, CollectorSink, EmergencyMessageSink, JsonLinesSink, LogSink};
pub use station::{Station, StationRunner};
pub use types::{AnalysisWindow, AudioFrame, Confirmation, ScoredWindow};
pub use windower::{Windower, WindowerConfig};
