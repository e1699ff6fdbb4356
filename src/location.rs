//! Most-recent device position.
//!
//! Providers publish fixes at their own cadence into a single-slot,
//! last-write-wins [`LocationCell`]. The alert path only ever reads the
//! latest value; it never waits for a fix.

use crate::clock::Clock;
use crate::error::{EarshotError, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters.
    pub accuracy_m: f32,
    /// When the fix was taken.
    #[serde(skip)]
    pub timestamp: Instant,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f32, timestamp: Instant) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            timestamp,
        }
    }

    /// Age of the fix at `now`; zero if the fix is from the future.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }

    pub fn is_fresh(&self, now: Instant, staleness: Duration) -> bool {
        self.age(now) <= staleness
    }
}

/// Single-slot holder of the latest fix.
#[derive(Debug, Clone, Default)]
pub struct LocationCell {
    slot: Arc<RwLock<Option<LocationSample>>>,
}

impl LocationCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest fix, if any has been published.
    pub fn latest(&self) -> Option<LocationSample> {
        *self.slot.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle for a provider to publish into this cell.
    pub fn updater(&self) -> LocationUpdater {
        LocationUpdater {
            slot: self.slot.clone(),
        }
    }
}

/// Write side of a [`LocationCell`].
#[derive(Debug, Clone)]
pub struct LocationUpdater {
    slot: Arc<RwLock<Option<LocationSample>>>,
}

impl LocationUpdater {
    /// Replace the current fix.
    pub fn publish(&self, sample: LocationSample) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(sample);
    }

    /// Forget the current fix, e.g. when the platform revokes access.
    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Source of position fixes.
///
/// `start` must return promptly; providers that poll do so on their own
/// thread.
pub trait LocationProvider: Send {
    fn start(&mut self, updater: LocationUpdater) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Provider for stationary installs: republishes a configured position.
pub struct FixedLocationProvider {
    latitude: f64,
    longitude: f64,
    accuracy_m: f32,
    refresh: Duration,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FixedLocationProvider {
    pub fn new(
        latitude: f64,
        longitude: f64,
        accuracy_m: f32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(EarshotError::Location {
                message: format!("latitude {} out of range", latitude),
            });
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(EarshotError::Location {
                message: format!("longitude {} out of range", longitude),
            });
        }
        Ok(Self {
            latitude,
            longitude,
            accuracy_m,
            refresh: Duration::from_secs(60),
            clock,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    /// How often the position is republished with a fresh timestamp.
    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh;
        self
    }

    fn sample(&self) -> LocationSample {
        LocationSample::new(self.latitude, self.longitude, self.accuracy_m, self.clock.now())
    }
}

impl LocationProvider for FixedLocationProvider {
    fn start(&mut self, updater: LocationUpdater) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        updater.publish(self.sample());
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let clock = self.clock.clone();
        let refresh = self.refresh;
        let (latitude, longitude, accuracy_m) = (self.latitude, self.longitude, self.accuracy_m);
        let handle = thread::Builder::new()
            .name("earshot-location".to_string())
            .spawn(move || {
                let tick = Duration::from_millis(50).min(refresh);
                let mut elapsed = Duration::ZERO;
                while running.load(Ordering::SeqCst) {
                    thread::sleep(tick);
                    elapsed += tick;
                    if elapsed >= refresh {
                        elapsed = Duration::ZERO;
                        updater.publish(LocationSample::new(
                            latitude,
                            longitude,
                            accuracy_m,
                            clock.now(),
                        ));
                    }
                }
            })?;
        self.handle = Some(handle);
        debug!(latitude, longitude, "fixed location provider started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("location thread panicked");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

impl Drop for FixedLocationProvider {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("failed to stop location provider: {}", e);
        }
    }
}
