//! Counters for recoverable anomalies and throughput.
//!
//! Recoverable conditions (dropped windows, suppressed alerts) are never
//! surfaced as errors; they only move these counters.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared, lock-free pipeline counters.
#[derive(Debug, Default)]
pub struct Diagnostics {
    windows_captured: AtomicU64,
    windows_classified: AtomicU64,
    invalid_outputs: AtomicU64,
    queue_overflows: AtomicU64,
    confirmations: AtomicU64,
    alerts_emitted: AtomicU64,
    alerts_suppressed: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub windows_captured: u64,
    pub windows_classified: u64,
    pub invalid_outputs: u64,
    pub queue_overflows: u64,
    pub confirmations: u64,
    pub alerts_emitted: u64,
    pub alerts_suppressed: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_window_captured(&self) {
        self.windows_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_classified(&self) {
        self.windows_classified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_output(&self) {
        self.invalid_outputs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_overflow(&self) {
        self.queue_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmation(&self) {
        self.confirmations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_emitted(&self) {
        self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_suppressed(&self) {
        self.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            windows_captured: self.windows_captured.load(Ordering::Relaxed),
            windows_classified: self.windows_classified.load(Ordering::Relaxed),
            invalid_outputs: self.invalid_outputs.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            confirmations: self.confirmations.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for DiagnosticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "windows {}/{} classified, {} invalid, {} dropped; {} confirmed, {} alerted, {} suppressed",
            self.windows_classified,
            self.windows_captured,
            self.invalid_outputs,
            self.queue_overflows,
            self.confirmations,
            self.alerts_emitted,
            self.alerts_suppressed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        assert_eq!(Diagnostics::new().snapshot(), DiagnosticsSnapshot::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let diag = Diagnostics::new();
        diag.record_window_captured();
        diag.record_window_captured();
        diag.record_queue_overflow();
        diag.record_alert_suppressed();

        let snap = diag.snapshot();
        assert_eq!(snap.windows_captured, 2);
        assert_eq!(snap.queue_overflows, 1);
        assert_eq!(snap.alerts_suppressed, 1);
        assert_eq!(snap.alerts_emitted, 0);
    }

    #[test]
    fn test_snapshot_display() {
        let snap = DiagnosticsSnapshot {
            windows_captured: 10,
            windows_classified: 8,
            invalid_outputs: 1,
            queue_overflows: 1,
            confirmations: 2,
            alerts_emitted: 1,
            alerts_suppressed: 1,
        };
        assert_eq!(
            snap.to_string(),
            "windows 8/10 classified, 1 invalid, 1 dropped; 2 confirmed, 1 alerted, 1 suppressed"
        );
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_string(&DiagnosticsSnapshot::default()).unwrap();
        assert!(json.contains("\"queue_overflows\":0"));
    }
}
