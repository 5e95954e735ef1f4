//! # Acquisition Module
//!
//! The tuner never touches audio itself. Pitch estimates come from an
//! acquisition collaborator (a native pitch-detection engine, a test double or
//! a recorded trace) behind the [`Acquisition`] trait.
//!
//! ## Features
//! - Device lifecycle contract: init, start, stop, release
//! - Pitch event stream delivered over a crossbeam channel
//! - Trace replay source for offline runs

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default number of samples per analysis frame handed to the pitch engine.
pub const BUFFER_SIZE: usize = 2048;

/// Default minimum amplitude below which the pitch engine reports silence.
pub const MIN_VOLUME: f32 = 0.01;

/// Settings passed to the acquisition collaborator on `init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub buffer_size: usize,
    pub min_volume: f32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            buffer_size: BUFFER_SIZE,
            min_volume: MIN_VOLUME,
        }
    }
}

/// One item of the acquisition stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    /// A pitch estimate in Hz, or `None` when the engine heard nothing usable.
    Pitch(Option<f32>),
    /// The device broke while streaming.
    Fault(String),
}

/// Errors raised by acquisition lifecycle calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AcquisitionError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Device(String),
}

/// Contract of the external pitch source.
///
/// Calls may block on slow devices. The session guarantees they are never
/// issued concurrently.
pub trait Acquisition: Send {
    fn init(&mut self, config: &AcquisitionConfig) -> Result<(), AcquisitionError>;

    fn start(&mut self) -> Result<(), AcquisitionError>;

    fn stop(&mut self) -> Result<(), AcquisitionError>;

    /// Returns the event stream of the most recent successful `start`.
    ///
    /// The stream is not restartable. A later `start` produces a new one.
    fn subscribe(&mut self) -> Receiver<AcquisitionEvent>;

    /// Frees the underlying device. Must tolerate being called on a released handle.
    fn release(&mut self);
}

/// A single entry of a recorded pitch trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Offset from the start of the stream in milliseconds.
    pub at_ms: u64,
    pub pitch: Option<f32>,
}

/// Loads a pitch trace from a JSON file.
///
/// The file holds an array of `{ "at_ms": 0, "pitch": 440.0 }` objects; a
/// `null` pitch stands for a silent frame. Events are sorted by offset.
pub fn load_trace<P: AsRef<Path>>(path: P) -> Result<Vec<TraceEvent>> {
    let path = path.as_ref();
    let mut file = File::open(path).with_context(|| format!("opening trace {}", path.display()))?;
    let mut data = String::new();
    file.read_to_string(&mut data)?;
    let mut trace: Vec<TraceEvent> = serde_json::from_str(&data)
        .with_context(|| format!("parsing trace {}", path.display()))?;
    trace.sort_by_key(|event| event.at_ms);
    Ok(trace)
}

/// Streaming thread management for a replay.
#[derive(Debug)]
struct ReplayWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ReplayWorker {
    fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("[REPLAY] Replay thread panicked");
            }
        }
    }
}

/// Acquisition that plays back a recorded pitch trace in real time.
///
/// Each `start` replays the trace from its beginning on a dedicated thread.
/// Once the trace is exhausted the stream stays open and silent until `stop`.
#[derive(Debug)]
pub struct ReplayAcquisition {
    trace: Vec<TraceEvent>,
    config: Option<AcquisitionConfig>,
    worker: Option<ReplayWorker>,
    events: Option<Receiver<AcquisitionEvent>>,
}

impl ReplayAcquisition {
    pub fn new(trace: Vec<TraceEvent>) -> Self {
        Self {
            trace,
            config: None,
            worker: None,
            events: None,
        }
    }

    /// Offset of the final event, i.e. how long one replay lasts.
    pub fn duration(&self) -> Duration {
        let last = self.trace.iter().map(|e| e.at_ms).max().unwrap_or(0);
        Duration::from_millis(last)
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        self.events = None;
    }
}

impl Acquisition for ReplayAcquisition {
    fn init(&mut self, config: &AcquisitionConfig) -> Result<(), AcquisitionError> {
        if config.buffer_size == 0 {
            return Err(AcquisitionError::Device("buffer size must be positive".into()));
        }
        log::debug!(
            "[REPLAY] Initialized with {} events (buffer {}, min volume {})",
            self.trace.len(),
            config.buffer_size,
            config.min_volume
        );
        self.config = Some(config.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), AcquisitionError> {
        if self.config.is_none() {
            return Err(AcquisitionError::Device("replay not initialized".into()));
        }
        self.stop_worker();

        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let trace = self.trace.clone();

        let thread_handle = thread::spawn(move || {
            let origin = Instant::now();
            for event in trace {
                let deadline = origin + Duration::from_millis(event.at_ms);
                crossbeam_channel::select! {
                    recv(shutdown_rx) -> _ => return,
                    recv(crossbeam_channel::at(deadline)) -> _ => {
                        if event_tx.send(AcquisitionEvent::Pitch(event.pitch)).is_err() {
                            return;
                        }
                    }
                }
            }
            log::debug!("[REPLAY] Trace exhausted, holding stream open");
            // Keep the sender alive so the stream reads as silence, not as a fault.
            let _ = shutdown_rx.recv();
        });

        self.worker = Some(ReplayWorker {
            shutdown_tx,
            thread_handle: Some(thread_handle),
        });
        self.events = Some(event_rx);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AcquisitionError> {
        self.stop_worker();
        Ok(())
    }

    fn subscribe(&mut self) -> Receiver<AcquisitionEvent> {
        self.events.clone().unwrap_or_else(crossbeam_channel::never)
    }

    fn release(&mut self) {
        self.stop_worker();
        self.config = None;
    }
}

impl Drop for ReplayAcquisition {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn trace() -> Vec<TraceEvent> {
        vec![
            TraceEvent { at_ms: 0, pitch: Some(440.0) },
            TraceEvent { at_ms: 20, pitch: None },
            TraceEvent { at_ms: 40, pitch: Some(261.63) },
        ]
    }

    #[test]
    fn start_requires_init() {
        let mut replay = ReplayAcquisition::new(trace());
        assert!(matches!(replay.start(), Err(AcquisitionError::Device(_))));
    }

    #[test]
    fn replays_events_in_order() {
        let mut replay = ReplayAcquisition::new(trace());
        replay.init(&AcquisitionConfig::default()).unwrap();
        replay.start().unwrap();
        let events = replay.subscribe();

        let timeout = Duration::from_secs(2);
        assert_eq!(events.recv_timeout(timeout).unwrap(), AcquisitionEvent::Pitch(Some(440.0)));
        assert_eq!(events.recv_timeout(timeout).unwrap(), AcquisitionEvent::Pitch(None));
        assert_eq!(events.recv_timeout(timeout).unwrap(), AcquisitionEvent::Pitch(Some(261.63)));

        // Exhausted trace stays connected.
        assert!(matches!(
            events.recv_timeout(Duration::from_millis(50)),
            Err(crossbeam_channel::RecvTimeoutError::Timeout)
        ));

        replay.stop().unwrap();
        assert!(matches!(
            events.recv_timeout(Duration::from_millis(500)),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn release_is_idempotent() {
        let mut replay = ReplayAcquisition::new(trace());
        replay.init(&AcquisitionConfig::default()).unwrap();
        replay.start().unwrap();
        replay.release();
        replay.release();
        assert!(replay.start().is_err());
    }

    #[test]
    fn rejects_zero_buffer() {
        let mut replay = ReplayAcquisition::new(trace());
        let config = AcquisitionConfig { buffer_size: 0, ..Default::default() };
        assert!(replay.init(&config).is_err());
    }

    #[test]
    fn loads_and_sorts_trace_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"at_ms": 30, "pitch": null}}, {{"at_ms": 10, "pitch": 329.63}}]"#
        )
        .unwrap();

        let trace = load_trace(file.path()).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].at_ms, 10);
        assert_eq!(trace[0].pitch, Some(329.63));
        assert_eq!(trace[1].pitch, None);

        let replay = ReplayAcquisition::new(trace);
        assert_eq!(replay.duration(), Duration::from_millis(30));
    }

    #[test]
    fn malformed_trace_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(load_trace(file.path()).is_err());
    }
}
