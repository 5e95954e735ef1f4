//! # Tuner CLI
//!
//! Command-line front end for `tuner-core`.
//!
//! ## Commands
//! - **resolve**: frequency to note, octave, cents and tuning status
//! - **replay**: full listening session fed by a recorded pitch trace
//! - **contour**: Parsons code of a pitch track
//! - **search**: melody search against a local catalog
//! - **ingest**: build that catalog from LilyPond/MIDI score pairs

mod cli;

use anyhow::{Result, bail};
use clap::Parser;
use cli::{Cli, Command, SearchArgs};
use std::path::Path;
use std::time::{Duration, Instant};
use tuner_core::{
    SessionEvent, TunerConfig, TunerHandle, TunerResult, TunerSession,
    acquisition::{self, ReplayAcquisition},
    contour::ParsonsCode,
    ingest,
    search::{AudioClip, Catalog, SearchResult, SearchService},
    tuning::{self, PitchReading},
};

/// Extra time the replay keeps listening after the trace so the final clear is seen.
const REPLAY_GRACE: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TunerConfig::load(path)?,
        None => TunerConfig::default(),
    };
    log::debug!("[MAIN] Using config: {:?}", config);

    match cli.command {
        Command::Resolve { frequencies } => resolve(&config, &frequencies),
        Command::Replay { trace } => replay(&config, &trace),
        Command::Contour { frequencies } => contour(&frequencies),
        Command::Search(args) => search(&args),
        Command::Ingest { source_dir, out } => ingest_catalog(&source_dir, &out),
    }
}

fn resolve(config: &TunerConfig, frequencies: &[f32]) -> Result<()> {
    for &frequency in frequencies {
        match tuning::resolve_with_reference(frequency, config.reference_pitch) {
            Some(reading) => println!("{}", describe(&reading, config.reference_pitch)),
            None => println!("{frequency:>9.2} Hz  no pitch"),
        }
    }
    Ok(())
}

fn describe(reading: &PitchReading, reference_pitch: f32) -> String {
    let target = reading.target_frequency(reference_pitch);
    let cents = tuning::calculate_cents_deviation(reading.frequency, target);
    format!(
        "{:>9.2} Hz  {:<4} {:+6.1} cents  {:<11} (target {:.2} Hz)",
        reading.frequency,
        reading.label(),
        cents,
        reading.status().to_string(),
        target,
    )
}

/// Turns a lifecycle result into a CLI error, telling device failures apart
/// from requests the session refused.
fn lifecycle(step: &str, result: TunerResult<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_failure() => {
            log::error!("[MAIN] {} failed: {}", step, err);
            bail!("{step} failed, the device must be reinitialized: {err}")
        }
        Err(err) => bail!("{step} refused: {err}"),
    }
}

fn replay(config: &TunerConfig, trace_path: &Path) -> Result<()> {
    let trace = acquisition::load_trace(trace_path)?;
    let source = ReplayAcquisition::new(trace);
    let run_for = source.duration() + Duration::from_millis(config.debounce_ms) + REPLAY_GRACE;

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let session = TunerSession::new(source, config.session_settings()).with_events(event_tx);
    let handle = TunerHandle::spawn(session);

    lifecycle("initialize", handle.initialize())?;
    lifecycle("start", handle.start())?;
    log::info!("[MAIN] Replaying {} for {:?}", trace_path.display(), run_for);

    let origin = Instant::now();
    let deadline = origin + run_for;
    while let Ok(event) = event_rx.recv_deadline(deadline) {
        let elapsed = origin.elapsed().as_millis();
        match event {
            SessionEvent::StateChanged(state) => println!("[{elapsed:>6} ms] state: {state}"),
            SessionEvent::Reading(reading) => {
                println!("[{elapsed:>6} ms] {}", describe(&reading, config.reference_pitch))
            }
            SessionEvent::SignalLost => println!("[{elapsed:>6} ms] signal lost"),
            SessionEvent::Failed(cause) => println!("[{elapsed:>6} ms] failed: {cause}"),
        }
    }

    lifecycle("stop", handle.stop())?;
    let snapshot = handle.snapshot()?;
    handle.close();
    println!("final state: {}", snapshot.state);
    if let Some(cause) = snapshot.last_error {
        bail!("session ended with error: {cause}");
    }
    Ok(())
}

fn contour(frequencies: &[f32]) -> Result<()> {
    match ParsonsCode::from_pitch_track(frequencies) {
        Some(code) => println!("{code}"),
        None => println!("no melody (fewer than two distinct notes)"),
    }
    Ok(())
}

fn search(args: &SearchArgs) -> Result<()> {
    let catalog = Catalog::load(&args.catalog)?;

    let results = if let Some(query) = &args.parsons {
        let response = catalog.search_parsons(query)?;
        println!("query: {}", response.query);
        response.results
    } else if let Some(trace_path) = &args.trace {
        let clip = AudioClip::from_trace(&acquisition::load_trace(trace_path)?);
        let response = catalog.search_audio(&clip)?;
        match &response.generated_contour {
            Some(code) => println!("generated contour: {code}"),
            None => println!("generated contour: none"),
        }
        response.results
    } else {
        bail!("either --parsons or --trace is required");
    };

    print_results(&results);
    Ok(())
}

fn ingest_catalog(source_dir: &Path, out: &Path) -> Result<()> {
    let catalog = ingest::build_catalog(source_dir)?;
    catalog.save(out)?;
    println!("{} compositions written to {}", catalog.len(), out.display());
    Ok(())
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("no matches");
        return;
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{:>2}. {} - {} [{}]",
            rank + 1,
            result.title,
            result.composer.name,
            result.id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuner_core::{SessionState, TunerError};

    #[test]
    fn describe_reports_deviation_from_target() {
        let reading = tuning::resolve(445.0).unwrap();
        let line = describe(&reading, 440.0);
        assert!(line.contains("A4"), "{line}");
        assert!(line.contains("+19.6 cents"), "{line}");
        assert!(line.contains("target 440.00 Hz"), "{line}");
    }

    #[test]
    fn lifecycle_errors_are_classified() {
        assert!(lifecycle("start", Ok(())).is_ok());

        let failed = lifecycle("start", Err(TunerError::StartFailure("busy".into())));
        assert!(failed.unwrap_err().to_string().contains("must be reinitialized"));

        let refused = lifecycle(
            "start",
            Err(TunerError::InvalidTransition { operation: "start", state: SessionState::Failed }),
        );
        assert!(refused.unwrap_err().to_string().starts_with("start refused"));
    }
}
