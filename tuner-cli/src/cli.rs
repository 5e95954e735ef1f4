use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tuner session and melody search tools", long_about = None)]
pub struct Cli {
    /// JSON configuration file (reference pitch, debounce window, acquisition settings)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve frequencies to note, octave and cents
    Resolve {
        #[arg(required = true, allow_negative_numbers = true)]
        frequencies: Vec<f32>,
    },
    /// Run a tuner session over a recorded pitch trace
    Replay {
        /// JSON array of { "at_ms": .., "pitch": .. } events
        trace: PathBuf,
    },
    /// Print the Parsons code of a pitch track
    Contour {
        #[arg(required = true, allow_negative_numbers = true)]
        frequencies: Vec<f32>,
    },
    /// Search a composition catalog by melody
    Search(SearchArgs),
    /// Build a search catalog from directories of LilyPond and MIDI files
    Ingest {
        /// Root of the score tree (one work per directory)
        source_dir: PathBuf,

        /// Where to write the JSON catalog
        #[arg(short, long, default_value = "catalog.json")]
        out: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// JSON array of compositions
    #[arg(long)]
    pub catalog: PathBuf,

    /// Parsons code query, e.g. "*UUDR"
    #[arg(short, long, conflicts_with = "trace", required_unless_present = "trace")]
    pub parsons: Option<String>,

    /// Pitch trace standing in for a recorded clip
    #[arg(short, long)]
    pub trace: Option<PathBuf>,
}
