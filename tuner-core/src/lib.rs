// tuner-core/src/lib.rs

//! The core logic for the tuner.
//! This crate resolves pitch estimates into musical notes, runs the
//! listening session around an external pitch source, and holds the
//! melody-search contract together with the ingestion that builds
//! its catalog from engraved scores. It is completely headless and performs no
//! audio capture or signal processing of its own.

pub mod acquisition;
pub mod config;
pub mod contour;
pub mod error;
pub mod ingest;
pub mod search;
pub mod session;
pub mod tuning;
pub mod worker;

pub use acquisition::{Acquisition, AcquisitionConfig, AcquisitionError, AcquisitionEvent};
pub use config::TunerConfig;
pub use error::{TunerError, TunerResult};
pub use session::{SessionEvent, SessionSettings, SessionSnapshot, SessionState, TunerSession};
pub use tuning::{NoteName, PitchReading, TuningStatus, resolve};
pub use worker::TunerHandle;
