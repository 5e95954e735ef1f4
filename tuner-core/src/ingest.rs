//! # Catalog Ingestion
//!
//! Builds the melody-search catalog from a tree of engraved scores. Each
//! directory holding a LilyPond source (`.ly`) and its MIDI rendering (`.mid`)
//! becomes one [`Composition`]: title and composer come from the LilyPond
//! header, the melodic contour from the busiest MIDI track.
//!
//! Works are skipped when the composer is not on the allowlist or when the
//! melody has fewer than two notes.

use crate::{
    contour::ParsonsCode,
    search::{Catalog, Composer, Composition},
};
use anyhow::{Context, Result};
use midly::{MidiMessage, Smf, TrackEvent, TrackEventKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Title used when the header names none.
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Canonical names of the composers admitted to the catalog.
pub const COMPOSERS: [&str; 33] = [
    "Johann Sebastian Bach",
    "Béla Bartók",
    "Johannes Brahms",
    "Max Bruch",
    "Anton Bruckner",
    "Ludwig van Beethoven",
    "Frédéric Chopin",
    "Carl Czerny",
    "Claude Debussy",
    "Antonín Dvořák",
    "Gabriel Fauré",
    "César Franck",
    "Edvard Grieg",
    "Joseph Haydn",
    "George Frideric Handel",
    "Franz Liszt",
    "Wolfgang Amadeus Mozart",
    "Felix Mendelssohn",
    "Modest Mussorgsky",
    "Niccolò Paganini",
    "Sergei Rachmaninoff",
    "Jean-Philippe Rameau",
    "Nikolai Rimsky-Korsakov",
    "Camille Saint-Saëns",
    "Franz Schubert",
    "Erik Satie",
    "Domenico Scarlatti",
    "Robert Schumann",
    "Alexander Scriabin",
    "Richard Strauss",
    "Pyotr Ilyich Tchaikovsky",
    "Tomaso Antonio Vitali",
    "Antonio Vivaldi",
];

// Either quoting style; one of the two groups matches.
const QUOTED: &str = r#"(?:"([^"]*)"|'([^']*)')"#;

fn header_field(names: &str) -> Regex {
    let pattern = format!(r"(?is)\b(?:{names})\s*=\s*{QUOTED}");
    Regex::new(&pattern).expect("header field pattern is valid")
}

static MUTOPIA_TITLE: Lazy<Regex> = Lazy::new(|| header_field("mutopiatitle"));
static TITLE: Lazy<Regex> = Lazy::new(|| header_field("title"));
static MUTOPIA_COMPOSER: Lazy<Regex> = Lazy::new(|| header_field("mutopiacomposer"));
static COMPOSER: Lazy<Regex> = Lazy::new(|| header_field("composer"));
static MUTOPIA_OPUS: Lazy<Regex> = Lazy::new(|| header_field("mutopiaopus"));
static OPUS: Lazy<Regex> = Lazy::new(|| header_field("opus"));
static PIECE: Lazy<Regex> = Lazy::new(|| header_field("piece"));
static DATE: Lazy<Regex> = Lazy::new(|| header_field("date|mutopiadate"));
static YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(1[5-9]\d{2}|20\d{2})\b").expect("year pattern is valid"));
static PARENTHESIZED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\([^)]*\)\s*").expect("parenthesis pattern is valid"));

/// Metadata read from a LilyPond `\header` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LilyPondHeader {
    pub title: Option<String>,
    /// Composer with life dates and other parenthesized notes removed.
    pub composer: Option<String>,
    pub opus: Option<String>,
    pub piece: Option<String>,
    /// Four-digit year found in the date field.
    pub year: Option<String>,
}

fn first_match(pattern: &Regex, content: &str) -> Option<String> {
    let captures = pattern.captures(content)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().trim().to_string())
}

/// Mutopia-specific fields win over the generic ones.
fn preferred(mutopia: &Regex, generic: &Regex, content: &str) -> Option<String> {
    first_match(mutopia, content)
        .filter(|s| !s.is_empty())
        .or_else(|| first_match(generic, content))
        .filter(|s| !s.is_empty())
}

/// Extracts title, composer, opus, piece and year from LilyPond source.
pub fn parse_ly_header(content: &str) -> LilyPondHeader {
    let composer = preferred(&MUTOPIA_COMPOSER, &COMPOSER, content)
        .map(|raw| PARENTHESIZED.replace_all(&raw, " ").trim().to_string())
        .filter(|s| !s.is_empty());
    let year = first_match(&DATE, content)
        .and_then(|date| YEAR.captures(&date).map(|c| c[1].to_string()));

    LilyPondHeader {
        title: preferred(&MUTOPIA_TITLE, &TITLE, content),
        composer,
        opus: preferred(&MUTOPIA_OPUS, &OPUS, content),
        piece: first_match(&PIECE, content).filter(|s| !s.is_empty()),
        year,
    }
}

/// Maps a free-form composer credit onto a canonical allowlisted name.
///
/// A credit matches when it contains the composer's last name, ignoring case.
pub fn resolve_composer(credit: &str) -> Option<&'static str> {
    let credit = credit.to_lowercase();
    COMPOSERS.iter().copied().find(|name| {
        name.split_whitespace()
            .last()
            .is_some_and(|last| credit.contains(&last.to_lowercase()))
    })
}

/// Melody of a standard MIDI file as note numbers.
///
/// The melody is taken from the track with the most note-on messages (the
/// first such track on a tie); note-ons with zero velocity are note-offs and
/// are dropped.
pub fn melody_from_midi(bytes: &[u8]) -> Result<Vec<u8>> {
    let smf = Smf::parse(bytes).map_err(|e| anyhow::anyhow!("MIDI parse error: {}", e))?;

    let mut melody_track = None;
    let mut most = 0;
    for track in &smf.tracks {
        let count = note_on_count(track);
        if melody_track.is_none() || count > most {
            melody_track = Some(track);
            most = count;
        }
    }

    let notes = melody_track
        .map(|track| {
            track
                .iter()
                .filter_map(|event| match event.kind {
                    TrackEventKind::Midi {
                        message: MidiMessage::NoteOn { key, vel },
                        ..
                    } if vel.as_int() > 0 => Some(key.as_int()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(notes)
}

fn note_on_count(track: &[TrackEvent]) -> usize {
    track
        .iter()
        .filter(|event| {
            matches!(
                event.kind,
                TrackEventKind::Midi { message: MidiMessage::NoteOn { .. }, .. }
            )
        })
        .count()
}

impl Composition {
    /// Builds a catalog entry, or `None` when the composer is not allowlisted
    /// or the melody is too short to have a contour.
    pub fn from_header_and_notes(
        id: String,
        header: &LilyPondHeader,
        notes: &[u8],
        lilypond_path: Option<String>,
    ) -> Option<Self> {
        let composer = header.composer.as_deref().and_then(resolve_composer)?;
        let notes: Vec<f32> = notes.iter().map(|&n| n as f32).collect();
        let melodic_contour = ParsonsCode::from_midi_notes(&notes)?;

        Some(Self {
            id,
            title: header.title.clone().unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            composer: Composer {
                name: composer.to_string(),
            },
            melodic_contour,
            lilypond_path,
        })
    }
}

/// Walks `source_dir` and builds a catalog from every `.ly`/`.mid` pair.
///
/// Within a directory the alphabetically first file of each kind is used.
/// Entries are identified by the LilyPond path relative to `source_dir`.
pub fn build_catalog<P: AsRef<Path>>(source_dir: P) -> Result<Catalog> {
    let root = source_dir.as_ref();
    let mut compositions = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("reading {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        let with_extension = |ext: &str| {
            entries
                .iter()
                .find(|p| p.is_file() && p.extension().is_some_and(|e| e == ext))
                .cloned()
        };
        if let (Some(ly_path), Some(mid_path)) = (with_extension("ly"), with_extension("mid")) {
            if let Some(composition) = ingest_pair(root, &ly_path, &mid_path)? {
                compositions.push(composition);
            }
        }

        // Reverse so subdirectories are visited in name order.
        pending.extend(entries.into_iter().filter(|p| p.is_dir()).rev());
    }

    log::info!("[INGEST] Built catalog with {} compositions", compositions.len());
    Ok(Catalog::new(compositions))
}

fn ingest_pair(root: &Path, ly_path: &Path, mid_path: &Path) -> Result<Option<Composition>> {
    log::debug!("[INGEST] Processing {}", ly_path.display());

    let source = fs::read(ly_path).with_context(|| format!("reading {}", ly_path.display()))?;
    let header = parse_ly_header(&String::from_utf8_lossy(&source));

    let bytes = fs::read(mid_path).with_context(|| format!("reading {}", mid_path.display()))?;
    let notes = match melody_from_midi(&bytes) {
        Ok(notes) => notes,
        Err(e) => {
            log::warn!("[INGEST] Could not process MIDI {}: {}", mid_path.display(), e);
            return Ok(None);
        }
    };

    let relative = ly_path
        .strip_prefix(root)
        .unwrap_or(ly_path)
        .to_string_lossy()
        .replace('\\', "/");

    let composition =
        Composition::from_header_and_notes(relative.clone(), &header, &notes, Some(relative));
    if composition.is_none() {
        log::info!(
            "[INGEST] Skipping {}: composer {:?} not resolved or no contour",
            ly_path.display(),
            header.composer
        );
    }
    Ok(composition)
}
