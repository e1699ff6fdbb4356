//! Alert dispatch: cooldown gating and location enrichment.
//!
//! This is the only place where policy that spans classes lives. Detectors
//! decide *that* a hazard happened; the dispatcher decides whether the user
//! hears about it again and where it happened.

use crate::classes::{ClassId, ClassRegistry};
use crate::clock::Clock;
use crate::location::{LocationCell, LocationSample};
use crate::pipeline::diagnostics::Diagnostics;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::Confirmation;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Per-class minimum spacing between emitted alerts.
#[derive(Debug, Clone, PartialEq)]
pub struct CooldownPolicy {
    default: Duration,
    per_class: Vec<Duration>,
}

impl CooldownPolicy {
    /// Same cooldown for every class.
    pub fn uniform(cooldown: Duration) -> Self {
        Self {
            default: cooldown,
            per_class: Vec::new(),
        }
    }

    /// `per_class[i]` applies to `ClassId(i)`; missing entries use `default`.
    pub fn new(default: Duration, per_class: Vec<Duration>) -> Self {
        Self { default, per_class }
    }

    pub fn for_class(&self, class: ClassId) -> Duration {
        self.per_class
            .get(class.index())
            .copied()
            .unwrap_or(self.default)
    }
}

/// A hazard the user should be told about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub class: ClassId,
    pub label: String,
    /// Start of the window that confirmed the event.
    #[serde(skip)]
    pub confirmed_at: Instant,
    /// Wall-clock emission time.
    #[serde(serialize_with = "unix_millis")]
    pub emitted_at: SystemTime,
    pub peak_confidence: f32,
    /// Absent when no fix is known or the latest fix is stale.
    pub location: Option<LocationSample>,
    pub location_age_ms: Option<u64>,
}

impl AlertEvent {
    pub fn maps_url(&self) -> Option<String> {
        self.location.map(|l| {
            format!(
                "https://maps.google.com/?q={},{}",
                l.latitude, l.longitude
            )
        })
    }

    /// Text for an emergency contact, with a map link when the position is known.
    pub fn emergency_message(&self, base: &str) -> String {
        match self.maps_url() {
            Some(url) => format!("{}\nLocation: {}", base, url),
            None => base.to_string(),
        }
    }
}

fn unix_millis<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    serializer.serialize_u64(millis)
}

/// Result of [`AlertDispatcher::on_confirmed`].
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Emitted(AlertEvent),
    /// Within cooldown of the previous alert for the class.
    Suppressed { remaining: Duration },
}

/// Turns confirmations into alerts, at most one per cooldown per class.
pub struct AlertDispatcher {
    registry: Arc<ClassRegistry>,
    cooldown: CooldownPolicy,
    staleness: Duration,
    location: LocationCell,
    clock: Arc<dyn Clock>,
    /// Confirmation time of the last emitted alert, per class.
    last_emitted: Vec<Option<Instant>>,
    diagnostics: Arc<Diagnostics>,
}

impl AlertDispatcher {
    pub fn new(
        registry: Arc<ClassRegistry>,
        cooldown: CooldownPolicy,
        staleness: Duration,
        location: LocationCell,
        clock: Arc<dyn Clock>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let last_emitted = vec![None; registry.len()];
        Self {
            registry,
            cooldown,
            staleness,
            location,
            clock,
            last_emitted,
            diagnostics,
        }
    }

    /// Decide on one confirmation.
    ///
    /// Cooldown is measured between confirmation timestamps; location
    /// staleness is measured against the clock at dispatch time.
    pub fn on_confirmed(
        &mut self,
        class: ClassId,
        timestamp: Instant,
        peak: f32,
    ) -> DispatchOutcome {
        let cooldown = self.cooldown.for_class(class);
        let label = self.registry.label(class).to_string();

        let Some(last) = self.last_emitted.get_mut(class.index()) else {
            // Not a configured class; nothing to gate on.
            debug!(class = %class, "confirmation for unknown class ignored");
            return DispatchOutcome::Suppressed {
                remaining: Duration::ZERO,
            };
        };

        if let Some(previous) = *last {
            let elapsed = timestamp.saturating_duration_since(previous);
            if elapsed < cooldown {
                let remaining = cooldown - elapsed;
                self.diagnostics.record_alert_suppressed();
                debug!(
                    class = label.as_str(),
                    remaining_ms = remaining.as_millis() as u64,
                    "alert suppressed by cooldown"
                );
                return DispatchOutcome::Suppressed { remaining };
            }
        }
        *last = Some(timestamp);

        let now = self.clock.now();
        let location = self
            .location
            .latest()
            .filter(|sample| sample.is_fresh(now, self.staleness));
        let location_age_ms = location.map(|sample| sample.age(now).as_millis() as u64);

        self.diagnostics.record_alert_emitted();
        info!(
            class = label.as_str(),
            peak,
            located = location.is_some(),
            "alert emitted"
        );

        DispatchOutcome::Emitted(AlertEvent {
            class,
            label,
            confirmed_at: timestamp,
            emitted_at: SystemTime::now(),
            peak_confidence: peak,
            location,
            location_age_ms,
        })
    }

    /// Forget cooldown history.
    pub fn reset(&mut self) {
        self.last_emitted.iter_mut().for_each(|slot| *slot = None);
    }
}

/// Station wrapper around [`AlertDispatcher`].
pub struct AlertStation {
    dispatcher: AlertDispatcher,
}

impl AlertStation {
    pub fn new(dispatcher: AlertDispatcher) -> Self {
        Self { dispatcher }
    }
}

impl Station for AlertStation {
    type Input = Vec<Confirmation>;
    type Output = Vec<AlertEvent>;

    fn name(&self) -> &'static str {
        "alert"
    }

    fn process(
        &mut self,
        confirmations: Vec<Confirmation>,
    ) -> Result<Option<Vec<AlertEvent>>, StationError> {
        let alerts: Vec<AlertEvent> = confirmations
            .into_iter()
            .filter_map(|c| {
                match self
                    .dispatcher
                    .on_confirmed(c.class, c.timestamp, c.peak_confidence)
                {
                    DispatchOutcome::Emitted(alert) => Some(alert),
                    DispatchOutcome::Suppressed { .. } => None,
                }
            })
            .collect();
        Ok((!alerts.is_empty()).then_some(alerts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    struct Fixture {
        dispatcher: AlertDispatcher,
        clock: MockClock,
        location: LocationCell,
        diagnostics: Arc<Diagnostics>,
    }

    fn fixture(cooldown_secs: u64) -> Fixture {
        let clock = MockClock::new();
        let location = LocationCell::new();
        let diagnostics = Arc::new(Diagnostics::new());
        let dispatcher = AlertDispatcher::new(
            Arc::new(ClassRegistry::new(["siren", "horn"])),
            CooldownPolicy::uniform(Duration::from_secs(cooldown_secs)),
            Duration::from_secs(300),
            location.clone(),
            Arc::new(clock.clone()),
            diagnostics.clone(),
        );
        Fixture {
            dispatcher,
            clock,
            location,
            diagnostics,
        }
    }

    fn emitted(outcome: DispatchOutcome) -> AlertEvent {
        match outcome {
            DispatchOutcome::Emitted(alert) => alert,
            other => panic!("expected alert, got {:?}", other),
        }
    }

    #[test]
    fn test_cooldown_suppresses_then_expires() {
        let mut f = fixture(30);
        let t0 = f.clock.now();
        let siren = ClassId(0);

        let first = emitted(f.dispatcher.on_confirmed(siren, t0, 0.8));
        assert_eq!(first.label, "siren");
        assert_eq!(first.confirmed_at, t0);

        let second = f
            .dispatcher
            .on_confirmed(siren, t0 + Duration::from_secs(10), 0.9);
        assert_eq!(
            second,
            DispatchOutcome::Suppressed {
                remaining: Duration::from_secs(20)
            }
        );

        let third = f
            .dispatcher
            .on_confirmed(siren, t0 + Duration::from_secs(31), 0.7);
        assert!(matches!(third, DispatchOutcome::Emitted(_)));

        let snap = f.diagnostics.snapshot();
        assert_eq!(snap.alerts_emitted, 2);
        assert_eq!(snap.alerts_suppressed, 1);
    }

    #[test]
    fn test_cooldown_is_measured_from_last_emitted_alert() {
        let mut f = fixture(30);
        let t0 = f.clock.now();
        let siren = ClassId(0);
        f.dispatcher.on_confirmed(siren, t0, 0.8);
        // Suppressed confirmations do not extend the cooldown
        f.dispatcher
            .on_confirmed(siren, t0 + Duration::from_secs(20), 0.8);
        let at_expiry = f
            .dispatcher
            .on_confirmed(siren, t0 + Duration::from_secs(30), 0.8);
        assert!(matches!(at_expiry, DispatchOutcome::Emitted(_)));
    }

    #[test]
    fn test_cooldown_is_per_class() {
        let mut f = fixture(30);
        let t0 = f.clock.now();
        emitted(f.dispatcher.on_confirmed(ClassId(0), t0, 0.8));
        emitted(f.dispatcher.on_confirmed(ClassId(1), t0, 0.8));
    }

    #[test]
    fn test_per_class_cooldown_override() {
        let policy = CooldownPolicy::new(
            Duration::from_secs(30),
            vec![Duration::from_secs(5)],
        );
        assert_eq!(policy.for_class(ClassId(0)), Duration::from_secs(5));
        assert_eq!(policy.for_class(ClassId(1)), Duration::from_secs(30));
    }

    #[test]
    fn test_fresh_location_is_attached() {
        let mut f = fixture(30);
        let fix_time = f.clock.now();
        f.location
            .updater()
            .publish(LocationSample::new(19.43, -99.13, 12.0, fix_time));
        f.clock.advance(Duration::from_secs(60));

        let alert = emitted(f.dispatcher.on_confirmed(ClassId(0), f.clock.now(), 0.8));
        assert_eq!(alert.location.unwrap().latitude, 19.43);
        assert_eq!(alert.location_age_ms, Some(60_000));
    }

    #[test]
    fn test_stale_location_is_dropped() {
        let mut f = fixture(30);
        f.location
            .updater()
            .publish(LocationSample::new(19.43, -99.13, 12.0, f.clock.now()));
        f.clock.advance(Duration::from_secs(301));

        let alert = emitted(f.dispatcher.on_confirmed(ClassId(0), f.clock.now(), 0.8));
        assert!(alert.location.is_none());
        assert!(alert.location_age_ms.is_none());
        assert!(alert.maps_url().is_none());
    }

    #[test]
    fn test_missing_location_is_none() {
        let mut f = fixture(30);
        let alert = emitted(f.dispatcher.on_confirmed(ClassId(0), f.clock.now(), 0.8));
        assert!(alert.location.is_none());
    }

    #[test]
    fn test_emergency_message_with_and_without_location() {
        let mut f = fixture(0);
        let bare = emitted(f.dispatcher.on_confirmed(ClassId(0), f.clock.now(), 0.8));
        assert_eq!(bare.emergency_message("Help!"), "Help!");

        f.location
            .updater()
            .publish(LocationSample::new(1.5, -2.25, 5.0, f.clock.now()));
        let located = emitted(f.dispatcher.on_confirmed(ClassId(0), f.clock.now(), 0.8));
        assert_eq!(
            located.emergency_message("Help!"),
            "Help!\nLocation: https://maps.google.com/?q=1.5,-2.25"
        );
    }

    #[test]
    fn test_unknown_class_is_not_emitted() {
        let mut f = fixture(30);
        let outcome = f.dispatcher.on_confirmed(ClassId(9), f.clock.now(), 0.8);
        assert!(matches!(outcome, DispatchOutcome::Suppressed { .. }));
        assert_eq!(f.diagnostics.snapshot().alerts_emitted, 0);
    }

    #[test]
    fn test_alert_serializes_without_instant() {
        let mut f = fixture(30);
        let alert = emitted(f.dispatcher.on_confirmed(ClassId(1), f.clock.now(), 0.75));
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["label"], "horn");
        assert_eq!(json["class"], 1);
        assert!(json["emitted_at"].as_u64().unwrap() > 0);
        assert!(json.get("confirmed_at").is_none());
        assert!(json["location"].is_null());
    }

    #[test]
    fn test_station_filters_suppressed() {
        let f = fixture(30);
        let t0 = f.clock.now();
        let mut station = AlertStation::new(f.dispatcher);
        let confirmation = |t: Instant| Confirmation {
            class: ClassId(0),
            timestamp: t,
            peak_confidence: 0.9,
        };

        let alerts = station.process(vec![confirmation(t0)]).unwrap().unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(
            station
                .process(vec![confirmation(t0 + Duration::from_secs(1))])
                .unwrap()
                .is_none()
        );
    }
}
