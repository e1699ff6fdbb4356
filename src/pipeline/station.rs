//! Station abstraction: one processing step per thread, linked by channels.

use crate::pipeline::error::{ErrorReporter, StationError};
use crossbeam_channel::{Receiver, Sender};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// A processing station in the detection pipeline.
///
/// Each station receives input, processes it, and produces output.
/// Stations run in their own threads and are connected by channels, so
/// everything a station sees arrives in order.
pub trait Station: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Processes a single input item.
    ///
    /// Returns:
    /// - `Ok(Some(output))` - forward `output` downstream
    /// - `Ok(None)` - nothing to forward (e.g. window with no confirmation)
    /// - `Err(StationError)` - reported; `Fatal` stops the station
    fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError>;

    /// Station name for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Called once when the input channel closes or a fatal error occurs.
    fn shutdown(&mut self) {}
}

/// Runs a station in a dedicated thread.
pub struct StationRunner<S: Station> {
    handle: Option<JoinHandle<()>>,
    station_name: &'static str,
    _phantom: PhantomData<S>,
}

impl<S: Station> StationRunner<S> {
    /// Spawns `station` on its own thread.
    ///
    /// The thread exits when `input_rx` disconnects, when every receiver of
    /// `output_tx` is gone, or on a fatal error.
    pub fn spawn(
        mut station: S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let station_name = station.name();

        let handle = thread::Builder::new()
            .name(format!("earshot-{}", station_name))
            .spawn(move || {
                Self::run_station(&mut station, input_rx, output_tx, error_reporter);
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(station = station_name, "failed to spawn station thread: {}", e);
                None
            }
        };

        Self {
            handle,
            station_name,
            _phantom: PhantomData,
        }
    }

    fn run_station(
        station: &mut S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) {
        let station_name = station.name();

        while let Ok(input) = input_rx.recv() {
            match station.process(input) {
                Ok(Some(output)) => {
                    if output_tx.send(output).is_err() {
                        // Downstream gone
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    error_reporter.report(station_name, &err);
                    if err.is_fatal() {
                        break;
                    }
                }
            }
        }

        debug!(station = station_name, "station stopping");
        station.shutdown();
    }

    /// Waits for the station thread to complete.
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.station_name))
        } else {
            Ok(())
        }
    }

    pub fn name(&self) -> &'static str {
        self.station_name
    }
}
