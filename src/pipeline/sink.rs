//! Alert output handlers.
//!
//! The pipeline publishes [`AlertEvent`]s on a channel; sinks are what the
//! consumer of that channel does with them.

use crate::error::Result;
use crate::pipeline::alert::AlertEvent;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Pluggable alert output handler.
pub trait AlertSink: Send + 'static {
    /// Handle one alert.
    fn handle(&mut self, alert: &AlertEvent) -> Result<()>;

    /// Called once when the alert stream ends.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// One human-readable line per alert.
pub struct LogSink<W: Write + Send + 'static> {
    writer: W,
}

impl LogSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send + 'static> LogSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Formats an alert as a single status line.
pub fn format_alert(alert: &AlertEvent) -> String {
    let place = match alert.location {
        Some(l) => format!(
            "at {:.5},{:.5} (\u{b1}{:.0} m)",
            l.latitude, l.longitude, l.accuracy_m
        ),
        None => "location unavailable".to_string(),
    };
    format!(
        "ALERT {} (confidence {:.2}) {}",
        alert.label, alert.peak_confidence, place
    )
}

impl<W: Write + Send + 'static> AlertSink for LogSink<W> {
    fn handle(&mut self, alert: &AlertEvent) -> Result<()> {
        writeln!(self.writer, "{}", format_alert(alert))?;
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// One JSON object per line.
pub struct JsonLinesSink<W: Write + Send + 'static> {
    writer: W,
}

impl JsonLinesSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send + 'static> AlertSink for JsonLinesSink<W> {
    fn handle(&mut self, alert: &AlertEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, alert).map_err(io::Error::from)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Writes the emergency-contact text for each alert.
pub struct EmergencyMessageSink<W: Write + Send + 'static> {
    writer: W,
    base_message: String,
}

impl EmergencyMessageSink<io::Stdout> {
    pub fn stdout(base_message: &str) -> Self {
        Self::new(io::stdout(), base_message)
    }
}

impl<W: Write + Send + 'static> EmergencyMessageSink<W> {
    pub fn new(writer: W, base_message: &str) -> Self {
        Self {
            writer,
            base_message: base_message.to_string(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send + 'static> AlertSink for EmergencyMessageSink<W> {
    fn handle(&mut self, alert: &AlertEvent) -> Result<()> {
        writeln!(self.writer, "{}", alert.emergency_message(&self.base_message))?;
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "emergency"
    }
}

/// Collects alerts in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    collected: Arc<Mutex<Vec<AlertEvent>>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<AlertEvent> {
        self.collected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.collected.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for CollectorSink {
    fn handle(&mut self, alert: &AlertEvent) -> Result<()> {
        self.collected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}
