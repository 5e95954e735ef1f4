//! # Session Worker
//!
//! Runs a [`TunerSession`] on a dedicated thread and exposes it through a
//! [`TunerHandle`].
//!
//! ## Architecture
//! - **Worker Thread**: sole owner of the session and its acquisition handle
//! - **Commands**: lifecycle requests arrive over a crossbeam channel, each with
//!   its own reply channel, and run one at a time
//! - **Stream**: acquisition events and the debounce deadline are multiplexed
//!   with the commands in a single `select!`, so samples are processed in
//!   arrival order and never overlap a start/stop

use crate::{
    acquisition::{Acquisition, AcquisitionEvent},
    error::{TunerError, TunerResult},
    session::{SessionSnapshot, TunerSession},
};
use crossbeam_channel::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

type Reply<T> = Sender<T>;

/// Requests handled by the worker thread.
enum Command {
    Initialize(Reply<TunerResult<()>>),
    Reinitialize(Reply<TunerResult<()>>),
    Start(Reply<TunerResult<()>>),
    Stop(Reply<TunerResult<()>>),
    Snapshot(Reply<SessionSnapshot>),
    Shutdown,
}

/// Owner-side handle of a running session worker.
///
/// Every call blocks until the worker has finished the request. Calls from
/// several threads are serialized by the worker, so start and stop never
/// interleave. Dropping the handle tears the session down.
#[derive(Debug)]
pub struct TunerHandle {
    command_tx: Sender<Command>,
    thread_handle: Option<JoinHandle<()>>,
}

impl TunerHandle {
    /// Moves `session` onto a new worker thread.
    pub fn spawn<A>(session: TunerSession<A>) -> Self
    where
        A: Acquisition + 'static,
    {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let thread_handle = thread::Builder::new()
            .name("tuner-session".into())
            .spawn(move || run(session, command_rx))
            .ok();
        if thread_handle.is_none() {
            log::error!("[WORKER] Failed to spawn session thread");
        }
        Self {
            command_tx,
            thread_handle,
        }
    }

    pub fn initialize(&self) -> TunerResult<()> {
        self.request(Command::Initialize)?
    }

    pub fn reinitialize(&self) -> TunerResult<()> {
        self.request(Command::Reinitialize)?
    }

    pub fn start(&self) -> TunerResult<()> {
        self.request(Command::Start)?
    }

    pub fn stop(&self) -> TunerResult<()> {
        self.request(Command::Stop)?
    }

    pub fn snapshot(&self) -> TunerResult<SessionSnapshot> {
        self.request(Command::Snapshot)
    }

    /// Stops the worker, releasing the acquisition device. Blocks until done.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> TunerResult<T> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.command_tx
            .send(make(reply_tx))
            .map_err(|_| TunerError::SessionClosed)?;
        reply_rx.recv().map_err(|_| TunerError::SessionClosed)
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.command_tx.send(Command::Shutdown);
            if handle.join().is_err() {
                log::error!("[WORKER] Session thread panicked");
            }
        }
    }
}

impl Drop for TunerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker loop. Exits on `Shutdown` or when every handle is gone.
fn run<A: Acquisition>(mut session: TunerSession<A>, command_rx: Receiver<Command>) {
    log::debug!("[WORKER] Session thread started");
    loop {
        let events = session
            .subscription()
            .cloned()
            .unwrap_or_else(crossbeam_channel::never);
        let timer = match session.debounce_deadline() {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => crossbeam_channel::never(),
        };

        crossbeam_channel::select! {
            recv(command_rx) -> msg => match msg {
                Ok(Command::Shutdown) | Err(_) => break,
                Ok(command) => handle_command(&mut session, command),
            },
            recv(events) -> msg => match msg {
                Ok(event) => session.on_event(event, Instant::now()),
                Err(_) => session.on_fault("acquisition stream closed".into()),
            },
            recv(timer) -> _ => on_deadline(&mut session, &events, Instant::now()),
        }
    }
    session.dispose();
    log::debug!("[WORKER] Session thread finished");
}

/// Debounce deadline reached. Samples already queued were produced before the
/// timer fired, so they are applied first and may rearm it.
fn on_deadline<A: Acquisition>(
    session: &mut TunerSession<A>,
    events: &Receiver<AcquisitionEvent>,
    now: Instant,
) {
    while let Ok(event) = events.try_recv() {
        session.on_event(event, now);
    }
    session.poll_debounce(now);
}

fn handle_command<A: Acquisition>(session: &mut TunerSession<A>, command: Command) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::Initialize(reply) => {
            let _ = reply.send(session.initialize());
        }
        Command::Reinitialize(reply) => {
            let _ = reply.send(session.reinitialize());
        }
        Command::Start(reply) => {
            let _ = reply.send(session.start());
        }
        Command::Stop(reply) => {
            let _ = reply.send(session.stop());
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(session.snapshot());
        }
        Command::Shutdown => {}
    }
}
