//! # Melodic Contour Module
//!
//! Parsons code describes a melody only by the direction of each step:
//! `*` marks the first note, then `U` (up), `D` (down) or `R` (repeat) for
//! every following note. It is the query language of the melody search.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum distance, in semitones, between two consecutive frames for the
/// second one to count as a new note when segmenting a pitch track.
pub const NOTE_CHANGE_SEMITONES: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContourError {
    #[error("contour is empty")]
    Empty,
    #[error("invalid contour symbol `{symbol}` at position {position}")]
    InvalidSymbol { symbol: char, position: usize },
    #[error("`*` may only start a contour (found at position {0})")]
    MisplacedStart(usize),
}

/// A validated, upper-case Parsons code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParsonsCode(String);

impl ParsonsCode {
    /// Parses user input. Case is ignored; surrounding whitespace is trimmed.
    pub fn parse(input: &str) -> Result<Self, ContourError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ContourError::Empty);
        }
        let mut code = String::with_capacity(trimmed.len());
        for (position, symbol) in trimmed.chars().enumerate() {
            match symbol.to_ascii_uppercase() {
                '*' if position == 0 => code.push('*'),
                '*' => return Err(ContourError::MisplacedStart(position)),
                s @ ('U' | 'D' | 'R') => code.push(s),
                _ => return Err(ContourError::InvalidSymbol { symbol, position }),
            }
        }
        Ok(Self(code))
    }

    /// Builds the contour of a note sequence (MIDI numbers, fractional allowed).
    ///
    /// Returns `None` for fewer than two notes, since a single note has no direction.
    pub fn from_midi_notes(notes: &[f32]) -> Option<Self> {
        if notes.len() < 2 {
            return None;
        }
        let mut code = String::with_capacity(notes.len());
        code.push('*');
        code.extend(notes.windows(2).map(|pair| {
            if pair[1] > pair[0] {
                'U'
            } else if pair[1] < pair[0] {
                'D'
            } else {
                'R'
            }
        }));
        Some(Self(code))
    }

    /// Segments a frame-wise pitch track into notes and builds their contour.
    pub fn from_pitch_track(frequencies: &[f32]) -> Option<Self> {
        Self::from_midi_notes(&segment_pitch_track(frequencies))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of symbols in the code.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `query` occurs anywhere in this contour. Both sides are upper case.
    pub fn contains(&self, query: &ParsonsCode) -> bool {
        self.0.contains(query.as_str())
    }

    /// Whether the melody opens with the steps of `query`, ignoring the `*` marker.
    pub fn begins_with(&self, query: &ParsonsCode) -> bool {
        self.steps().starts_with(query.steps())
    }

    fn steps(&self) -> &str {
        self.0.strip_prefix('*').unwrap_or(&self.0)
    }
}

impl fmt::Display for ParsonsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ParsonsCode {
    type Error = ContourError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ParsonsCode> for String {
    fn from(code: ParsonsCode) -> Self {
        code.0
    }
}

/// Fractional MIDI note number of a frequency (A4 = 69 = 440 Hz).
pub fn hz_to_midi(frequency: f32) -> f32 {
    69.0 + 12.0 * (frequency / 440.0).log2()
}

/// Turns per-frame pitch estimates into a note sequence.
///
/// Non-positive frames are skipped. A frame starts a new note only when it
/// lies more than half a semitone away from the previous note.
pub fn segment_pitch_track(frequencies: &[f32]) -> Vec<f32> {
    let mut notes: Vec<f32> = Vec::new();
    for &frequency in frequencies {
        if !(frequency.is_finite() && frequency > 0.0) {
            continue;
        }
        let midi = hz_to_midi(frequency);
        match notes.last() {
            Some(&last) if (midi - last).abs() <= NOTE_CHANGE_SEMITONES => {}
            _ => notes.push(midi),
        }
    }
    notes
}
