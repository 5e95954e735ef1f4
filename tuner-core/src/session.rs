//! # Tuner Session
//!
//! Synchronous state machine that owns one acquisition handle and turns its
//! pitch stream into published [`PitchReading`]s.
//!
//! ```text
//! Uninitialized --initialize--> Ready --start--> Listening --stop--> Stopped
//!        |                        |                  |                  |
//!        +------ failure ---------+---- fault -------+---- start -------+
//!                                 v                  v
//!                               Failed --reinitialize--> Ready
//! ```
//!
//! The session never reads a clock itself. Callers pass `Instant`s into
//! [`TunerSession::on_sample`] and [`TunerSession::poll_debounce`], which keeps
//! the debounce logic deterministic. [`crate::worker`] drives it from a
//! dedicated thread.

use crate::{
    acquisition::{Acquisition, AcquisitionConfig, AcquisitionError, AcquisitionEvent},
    error::{TunerError, TunerResult},
    tuning::{self, PitchReading},
};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// How long the volume gate stays open after the last positive sample.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Lifecycle of the acquisition device as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Listening,
    Stopped,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready => "ready",
            SessionState::Listening => "listening",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Notifications for downstream presentation.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Reading(PitchReading),
    /// The debounce window elapsed without a positive sample.
    SignalLost,
    Failed(String),
}

/// Point-in-time copy of what the presentation layer shows.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub has_signal: bool,
    pub reading: Option<PitchReading>,
    pub last_error: Option<String>,
}

/// Session tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub acquisition: AcquisitionConfig,
    pub reference_pitch: f32,
    pub debounce: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionConfig::default(),
            reference_pitch: tuning::A4_FREQUENCY,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Tuner state machine around a single acquisition handle.
pub struct TunerSession<A: Acquisition> {
    acquisition: A,
    settings: SessionSettings,
    state: SessionState,
    has_signal: bool,
    reading: Option<PitchReading>,
    // At most one pending clear; rearming overwrites it.
    debounce_deadline: Option<Instant>,
    // Present exactly while listening.
    subscription: Option<Receiver<AcquisitionEvent>>,
    last_error: Option<TunerError>,
    events: Option<Sender<SessionEvent>>,
    released: bool,
}

impl<A: Acquisition> TunerSession<A> {
    pub fn new(acquisition: A, settings: SessionSettings) -> Self {
        Self {
            acquisition,
            settings,
            state: SessionState::Uninitialized,
            has_signal: false,
            reading: None,
            debounce_deadline: None,
            subscription: None,
            last_error: None,
            events: None,
            released: false,
        }
    }

    /// Publishes every state change and reading on `sender`.
    pub fn with_events(mut self, sender: Sender<SessionEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The debounced volume gate.
    pub fn has_signal(&self) -> bool {
        self.has_signal
    }

    pub fn reading(&self) -> Option<PitchReading> {
        self.reading
    }

    pub fn last_error(&self) -> Option<&TunerError> {
        self.last_error.as_ref()
    }

    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.debounce_deadline
    }

    /// Event stream of the active acquisition, if listening.
    pub fn subscription(&self) -> Option<&Receiver<AcquisitionEvent>> {
        self.subscription.as_ref()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            has_signal: self.has_signal,
            reading: self.reading,
            last_error: self.last_error.as_ref().map(ToString::to_string),
        }
    }

    /// First-time device setup. A no-op once the session is past `Uninitialized`
    /// unless it has failed, in which case this behaves like [`Self::reinitialize`].
    pub fn initialize(&mut self) -> TunerResult<()> {
        match self.state {
            SessionState::Uninitialized | SessionState::Failed => self.init_device(),
            _ => Ok(()),
        }
    }

    /// Cold restart of the device, required after any failure.
    pub fn reinitialize(&mut self) -> TunerResult<()> {
        if self.state == SessionState::Listening {
            return Err(self.reject("reinitialize"));
        }
        self.init_device()
    }

    /// Starts listening.
    ///
    /// From `Stopped` the device is reused without reinitialization. While
    /// already listening, the current stream is stopped before a new one is
    /// started so the device is never acquired twice.
    pub fn start(&mut self) -> TunerResult<()> {
        match self.state {
            SessionState::Ready | SessionState::Stopped => {}
            SessionState::Listening => {
                log::info!("[SESSION] Start while listening, restarting acquisition");
                self.stop()?;
            }
            SessionState::Uninitialized | SessionState::Failed => {
                return Err(self.reject("start"));
            }
        }

        match self.acquisition.start() {
            Ok(()) => {
                self.subscription = Some(self.acquisition.subscribe());
                self.transition(SessionState::Listening);
                Ok(())
            }
            Err(AcquisitionError::PermissionDenied(cause)) => {
                Err(self.fail(TunerError::PermissionDenied(cause)))
            }
            Err(AcquisitionError::Device(cause)) => Err(self.fail(TunerError::StartFailure(cause))),
        }
    }

    /// Stops listening. Calling it in any other state is a successful no-op.
    ///
    /// A failed stop leaves the device in an unknown condition, so the session
    /// goes to `Failed` and the next start requires reinitialization.
    pub fn stop(&mut self) -> TunerResult<()> {
        if self.state != SessionState::Listening {
            return Ok(());
        }

        self.subscription = None;
        self.clear_signal(false);

        match self.acquisition.stop() {
            Ok(()) => {
                self.transition(SessionState::Stopped);
                Ok(())
            }
            Err(err) => Err(self.fail(TunerError::StopFailure(err.to_string()))),
        }
    }

    /// Feeds one frame of the pitch stream.
    ///
    /// Only positive frequencies have an effect: they open the volume gate,
    /// publish a fresh reading and rearm the debounce deadline. Silence is left
    /// for the deadline to handle, which keeps the note steady through short
    /// gaps in sustained playing.
    pub fn on_sample(&mut self, pitch: Option<f32>, now: Instant) -> Option<PitchReading> {
        if self.state != SessionState::Listening {
            return None;
        }
        let frequency = pitch.filter(|f| *f > 0.0)?;
        let reading = tuning::resolve_with_reference(frequency, self.settings.reference_pitch)?;

        self.has_signal = true;
        self.reading = Some(reading);
        self.debounce_deadline = Some(now + self.settings.debounce);
        self.publish(SessionEvent::Reading(reading));
        Some(reading)
    }

    /// Clears the gate and the reading if the debounce deadline has passed.
    /// Returns `true` when a clear happened.
    pub fn poll_debounce(&mut self, now: Instant) -> bool {
        match self.debounce_deadline {
            Some(deadline) if now >= deadline => {
                log::debug!("[SESSION] No signal for {:?}, clearing reading", self.settings.debounce);
                self.clear_signal(true);
                true
            }
            _ => false,
        }
    }

    /// Routes one item of the acquisition stream.
    pub fn on_event(&mut self, event: AcquisitionEvent, now: Instant) {
        match event {
            AcquisitionEvent::Pitch(pitch) => {
                self.on_sample(pitch, now);
            }
            AcquisitionEvent::Fault(cause) => self.on_fault(cause),
        }
    }

    /// The device broke mid-stream. Only meaningful while listening.
    pub fn on_fault(&mut self, cause: String) {
        if self.state != SessionState::Listening {
            return;
        }
        self.subscription = None;
        self.clear_signal(false);
        if let Err(err) = self.acquisition.stop() {
            log::warn!("[SESSION] Stop after fault also failed: {}", err);
        }
        self.fail(TunerError::AcquisitionFault(cause));
    }

    /// Tears the session down: cancels the debounce deadline and releases the
    /// device exactly once. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        self.debounce_deadline = None;
        if self.released {
            return;
        }
        if self.state == SessionState::Listening {
            self.subscription = None;
            if let Err(err) = self.acquisition.stop() {
                log::warn!("[SESSION] Stop during teardown failed: {}", err);
            }
        }
        self.acquisition.release();
        self.released = true;
        self.has_signal = false;
        self.reading = None;
        log::debug!("[SESSION] Acquisition released");
        // A released handle needs a fresh init before it can stream again.
        self.transition(SessionState::Uninitialized);
    }

    fn init_device(&mut self) -> TunerResult<()> {
        self.clear_signal(false);
        self.subscription = None;
        self.released = false;

        match self.acquisition.init(&self.settings.acquisition) {
            Ok(()) => {
                self.last_error = None;
                self.transition(SessionState::Ready);
                Ok(())
            }
            Err(AcquisitionError::PermissionDenied(cause)) => {
                Err(self.fail(TunerError::PermissionDenied(cause)))
            }
            Err(AcquisitionError::Device(cause)) => {
                Err(self.fail(TunerError::DeviceInitFailure(cause)))
            }
        }
    }

    fn clear_signal(&mut self, announce: bool) {
        let had_signal = self.has_signal || self.reading.is_some();
        self.has_signal = false;
        self.reading = None;
        self.debounce_deadline = None;
        if announce && had_signal {
            self.publish(SessionEvent::SignalLost);
        }
    }

    fn fail(&mut self, error: TunerError) -> TunerError {
        log::error!("[SESSION] {}", error);
        self.last_error = Some(error.clone());
        self.transition(SessionState::Failed);
        self.publish(SessionEvent::Failed(error.to_string()));
        error
    }

    fn reject(&self, operation: &'static str) -> TunerError {
        log::warn!("[SESSION] Rejected {} while {}", operation, self.state);
        TunerError::InvalidTransition {
            operation,
            state: self.state,
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            log::info!("[SESSION] {} -> {}", self.state, next);
            self.state = next;
            self.publish(SessionEvent::StateChanged(next));
        }
    }

    fn publish(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            // Nobody listening is fine.
            let _ = tx.send(event);
        }
    }
}

impl<A: Acquisition> Drop for TunerSession<A> {
    fn drop(&mut self) {
        self.dispose();
    }
}
