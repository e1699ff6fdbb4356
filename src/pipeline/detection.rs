//! Per-class hysteresis smoothing of window scores.
//!
//! Each known class owns one [`DetectionStateMachine`]:
//!
//! ```text
//!   Idle --score >= t_enter--> Rising --n_enter windows--> Active (confirmed)
//!    ^                           | score < t_enter           |  score < t_exit
//!    +---------------------------+                           v
//!    +--------------n_exit windows below t_exit-------- Falling
//!                                       score >= t_exit: back to Active
//! ```
//!
//! Only the Rising -> Active edge is externally visible.

use crate::classes::{ClassId, ClassRegistry};
use crate::defaults;
use crate::error::{EarshotError, Result};
use crate::pipeline::diagnostics::Diagnostics;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{Confirmation, ScoredWindow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Thresholds and window counts for one class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HysteresisConfig {
    /// Score at or above which a class rises.
    pub t_enter: f32,
    /// Score below which an active class falls.
    pub t_exit: f32,
    /// Consecutive rising windows needed to confirm.
    pub n_enter: u32,
    /// Consecutive falling windows needed to return to idle.
    pub n_exit: u32,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            t_enter: defaults::T_ENTER,
            t_exit: defaults::T_EXIT,
            n_enter: defaults::N_ENTER,
            n_exit: defaults::N_EXIT,
        }
    }
}

impl HysteresisConfig {
    /// Requires `0 <= t_exit < t_enter <= 1` and non-zero counts.
    pub fn validate(&self, label: &str) -> Result<()> {
        let key = |field: &str| format!("classes.{}.{}", label, field);
        if !(0.0..=1.0).contains(&self.t_enter) {
            return Err(EarshotError::ConfigInvalidValue {
                key: key("t_enter"),
                message: format!("must be in [0, 1], got {}", self.t_enter),
            });
        }
        if !(0.0..=1.0).contains(&self.t_exit) || self.t_exit >= self.t_enter {
            return Err(EarshotError::ConfigInvalidValue {
                key: key("t_exit"),
                message: format!(
                    "must be in [0, t_enter) = [0, {}), got {}",
                    self.t_enter, self.t_exit
                ),
            });
        }
        if self.n_enter == 0 {
            return Err(EarshotError::ConfigInvalidValue {
                key: key("n_enter"),
                message: "must be at least 1".to_string(),
            });
        }
        if self.n_exit == 0 {
            return Err(EarshotError::ConfigInvalidValue {
                key: key("n_exit"),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Rising,
    Active,
    Falling,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Rising => "rising",
            Phase::Active => "active",
            Phase::Falling => "falling",
        };
        f.write_str(name)
    }
}

/// Edge reported by [`DetectionStateMachine::observe`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionEvent {
    /// Rising -> Active. `timestamp` is the start of the confirming window.
    Confirmed { timestamp: Instant, peak: f32 },
    /// Falling (or Active, when `n_exit` is 1) -> Idle.
    Cleared { timestamp: Instant },
}

/// Hysteresis state for a single class.
#[derive(Debug, Clone)]
pub struct DetectionStateMachine {
    config: HysteresisConfig,
    phase: Phase,
    counter: u32,
    peak: f32,
    last_transition: Option<Instant>,
}

impl DetectionStateMachine {
    pub fn new(config: HysteresisConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            counter: 0,
            peak: 0.0,
            last_transition: None,
        }
    }

    pub fn config(&self) -> &HysteresisConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Consecutive windows counted toward the current pending transition.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Highest score since the class last left Idle.
    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn last_transition(&self) -> Option<Instant> {
        self.last_transition
    }

    /// Feed the score of the window starting at `at`.
    pub fn observe(&mut self, score: f32, at: Instant) -> Option<DetectionEvent> {
        let HysteresisConfig {
            t_enter,
            t_exit,
            n_enter,
            n_exit,
        } = self.config;

        match self.phase {
            Phase::Idle => {
                if score >= t_enter {
                    self.counter = 1;
                    self.peak = score;
                    self.transition(Phase::Rising, at);
                    return self.try_confirm(n_enter, at);
                }
                None
            }
            Phase::Rising => {
                if score >= t_enter {
                    self.counter += 1;
                    self.peak = self.peak.max(score);
                    self.try_confirm(n_enter, at)
                } else {
                    self.counter = 0;
                    self.peak = 0.0;
                    self.transition(Phase::Idle, at);
                    None
                }
            }
            Phase::Active => {
                if score >= t_exit {
                    self.peak = self.peak.max(score);
                    return None;
                }
                self.counter = 1;
                self.transition(Phase::Falling, at);
                self.try_clear(n_exit, at)
            }
            Phase::Falling => {
                if score >= t_exit {
                    self.counter = 0;
                    self.peak = self.peak.max(score);
                    self.transition(Phase::Active, at);
                    None
                } else {
                    self.counter += 1;
                    self.try_clear(n_exit, at)
                }
            }
        }
    }

    fn try_confirm(&mut self, n_enter: u32, at: Instant) -> Option<DetectionEvent> {
        if self.counter < n_enter {
            return None;
        }
        self.counter = 0;
        self.transition(Phase::Active, at);
        Some(DetectionEvent::Confirmed {
            timestamp: at,
            peak: self.peak,
        })
    }

    fn try_clear(&mut self, n_exit: u32, at: Instant) -> Option<DetectionEvent> {
        if self.counter < n_exit {
            return None;
        }
        self.counter = 0;
        self.peak = 0.0;
        self.transition(Phase::Idle, at);
        Some(DetectionEvent::Cleared { timestamp: at })
    }

    fn transition(&mut self, phase: Phase, at: Instant) {
        self.phase = phase;
        self.last_transition = Some(at);
    }

    /// Back to Idle, as on a pipeline restart.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.counter = 0;
        self.peak = 0.0;
        self.last_transition = None;
    }
}

/// One state machine per known class, indexed by [`ClassId`].
#[derive(Debug, Clone)]
pub struct DetectorBank {
    detectors: Vec<DetectionStateMachine>,
}

impl DetectorBank {
    /// `configs[i]` drives class `ClassId(i)`.
    pub fn new(configs: &[HysteresisConfig]) -> Self {
        Self {
            detectors: configs
                .iter()
                .map(|c| DetectionStateMachine::new(*c))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn get(&self, class: ClassId) -> Option<&DetectionStateMachine> {
        self.detectors.get(class.index())
    }

    /// Advance every class on one scored window.
    ///
    /// Returns the (class, event) edges this window produced, in class order.
    pub fn observe(&mut self, window: &ScoredWindow) -> Vec<(ClassId, DetectionEvent)> {
        self.detectors
            .iter_mut()
            .enumerate()
            .filter_map(|(i, detector)| {
                let class = ClassId(i);
                let score = window.scores.get(class).unwrap_or(0.0);
                detector
                    .observe(score, window.start)
                    .map(|event| (class, event))
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.detectors.iter_mut().for_each(DetectionStateMachine::reset);
    }
}

/// Station that smooths scored windows into confirmations.
pub struct DetectionStation {
    bank: DetectorBank,
    registry: Arc<ClassRegistry>,
    diagnostics: Arc<Diagnostics>,
}

impl DetectionStation {
    pub fn new(
        bank: DetectorBank,
        registry: Arc<ClassRegistry>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            bank,
            registry,
            diagnostics,
        }
    }
}

impl Station for DetectionStation {
    type Input = ScoredWindow;
    type Output = Vec<Confirmation>;

    fn name(&self) -> &'static str {
        "detection"
    }

    fn process(
        &mut self,
        window: ScoredWindow,
    ) -> std::result::Result<Option<Vec<Confirmation>>, StationError> {
        let mut confirmed = Vec::new();

        for (class, event) in self.bank.observe(&window) {
            let label = self.registry.label(class);
            match event {
                DetectionEvent::Confirmed { timestamp, peak } => {
                    info!(class = label, peak, window = window.sequence, "hazard confirmed");
                    self.diagnostics.record_confirmation();
                    confirmed.push(Confirmation {
                        class,
                        timestamp,
                        peak_confidence: peak,
                    });
                }
                DetectionEvent::Cleared { .. } => {
                    debug!(class = label, window = window.sequence, "hazard cleared");
                }
            }
        }

        Ok((!confirmed.is_empty()).then_some(confirmed))
    }
}
