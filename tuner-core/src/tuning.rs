//! # Musical Tuning Module
//!
//! This module resolves detected frequencies into musical notes for the tuner.
//! It handles note naming, octave numbering and cent deviation measurements
//! based on twelve-tone equal temperament with A4 as the reference pitch.
//!
//! ## Features
//! - Frequency to note/octave/cents resolution (A4 = 440 Hz by default)
//! - Configurable reference pitch
//! - Tuning accuracy classification for presentation
//! - Note to frequency conversions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard concert pitch for A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;

/// Index of A within [`NoteName::ALL`]. A4 is the reference, so every
/// semitone offset is counted from this slot.
const A_INDEX: i32 = 9;

/// Deviation below which a note counts as in tune, in cents.
pub const IN_TUNE_CENTS: f32 = 5.0;
/// Deviation below which a note counts as close, in cents.
pub const CLOSE_CENTS: f32 = 15.0;

/// The twelve pitch classes, spelled with sharps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteName {
    C,
    #[serde(rename = "C#")]
    CSharp,
    D,
    #[serde(rename = "D#")]
    DSharp,
    E,
    F,
    #[serde(rename = "F#")]
    FSharp,
    G,
    #[serde(rename = "G#")]
    GSharp,
    A,
    #[serde(rename = "A#")]
    ASharp,
    B,
}

impl NoteName {
    /// Pitch classes in ascending order starting from C.
    pub const ALL: [NoteName; 12] = [
        NoteName::C,
        NoteName::CSharp,
        NoteName::D,
        NoteName::DSharp,
        NoteName::E,
        NoteName::F,
        NoteName::FSharp,
        NoteName::G,
        NoteName::GSharp,
        NoteName::A,
        NoteName::ASharp,
        NoteName::B,
    ];

    /// Returns the pitch class for an index, wrapping into `[0, 12)`.
    pub fn from_index(index: i32) -> Self {
        Self::ALL[index.rem_euclid(12) as usize]
    }

    /// Position of this pitch class within an octave (C = 0).
    pub fn index(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoteName::C => "C",
            NoteName::CSharp => "C#",
            NoteName::D => "D",
            NoteName::DSharp => "D#",
            NoteName::E => "E",
            NoteName::F => "F",
            NoteName::FSharp => "F#",
            NoteName::G => "G",
            NoteName::GSharp => "G#",
            NoteName::A => "A",
            NoteName::ASharp => "A#",
            NoteName::B => "B",
        }
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frequency resolved into the nearest equal-tempered note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchReading {
    /// The detected frequency in Hz.
    pub frequency: f32,
    /// The nearest pitch class.
    pub note: NoteName,
    /// Scientific octave number (C4 is middle C).
    pub octave: i32,
    /// Deviation from the nearest note, rounded to whole cents. Always within `[-50, 50]`.
    pub cents: f32,
}

impl PitchReading {
    /// Note name with octave, e.g. "A#4".
    pub fn label(&self) -> String {
        format!("{}{}", self.note, self.octave)
    }

    /// Equal-tempered frequency of the resolved note against the given reference.
    pub fn target_frequency(&self, reference_pitch: f32) -> f32 {
        note_frequency(self.note, self.octave, reference_pitch)
    }

    pub fn status(&self) -> TuningStatus {
        TuningStatus::from_cents(self.cents)
    }
}

/// Presentation-level classification of a cent deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningStatus {
    InTune,
    Close,
    OutOfTune,
}

impl TuningStatus {
    /// Classifies `|cents|`: below 5 is in tune, below 15 is close, anything else is out of tune.
    pub fn from_cents(cents: f32) -> Self {
        let magnitude = cents.abs();
        if magnitude < IN_TUNE_CENTS {
            TuningStatus::InTune
        } else if magnitude < CLOSE_CENTS {
            TuningStatus::Close
        } else {
            TuningStatus::OutOfTune
        }
    }
}

impl fmt::Display for TuningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TuningStatus::InTune => "in tune",
            TuningStatus::Close => "close",
            TuningStatus::OutOfTune => "out of tune",
        };
        f.write_str(text)
    }
}

/// Rounds a fractional semitone offset to the nearest whole semitone.
///
/// Exact halves round away from zero, so a pitch sitting precisely between
/// two notes resolves to the upper note above the reference and to the lower
/// note below it. The resulting deviation is then exactly -50 or +50 cents.
pub fn nearest_semitone(semitones: f64) -> i32 {
    semitones.round() as i32
}

/// Resolves a frequency against A4 = 440 Hz.
///
/// # Returns
/// * `Some(reading)` - For finite frequencies above zero
/// * `None` - For zero, negative or non-finite input
pub fn resolve(frequency: f32) -> Option<PitchReading> {
    resolve_with_reference(frequency, A4_FREQUENCY)
}

/// Resolves a frequency into note, octave and cents against a custom A4.
///
/// 1. Measures the real-valued semitone distance from A4
/// 2. Rounds it to the nearest semitone (half away from zero)
/// 3. Derives the pitch class and the C-based octave from that semitone
/// 4. Expresses the remainder in whole cents
pub fn resolve_with_reference(frequency: f32, reference_pitch: f32) -> Option<PitchReading> {
    if !(frequency.is_finite() && frequency > 0.0) {
        return None;
    }
    if !(reference_pitch.is_finite() && reference_pitch > 0.0) {
        return None;
    }

    let semitones_from_a4 = 12.0 * (frequency as f64 / reference_pitch as f64).log2();
    let rounded = nearest_semitone(semitones_from_a4);

    // Semitones counted from C4 rather than A4; the octave number flips at C.
    let from_c4 = A_INDEX + rounded;
    let note = NoteName::from_index(from_c4);
    let octave = 4 + from_c4.div_euclid(12);
    let cents = ((semitones_from_a4 - rounded as f64) * 100.0).round() as f32;

    Some(PitchReading {
        frequency,
        note,
        octave,
        cents,
    })
}

/// Equal-tempered frequency of a note in the given octave.
pub fn note_frequency(note: NoteName, octave: i32, reference_pitch: f32) -> f32 {
    let semitones_from_a4 = (octave - 4) * 12 + note.index() - A_INDEX;
    reference_pitch * 2.0_f32.powf(semitones_from_a4 as f32 / 12.0)
}

/// Calculates the deviation from a target frequency in cents.
///
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concert_a_resolves_exactly() {
        let reading = resolve(440.0).unwrap();
        assert_eq!(reading.note, NoteName::A);
        assert_eq!(reading.octave, 4);
        assert_eq!(reading.cents, 0.0);
        assert_eq!(reading.label(), "A4");
    }

    #[test]
    fn a_sharp_four() {
        let reading = resolve(466.16).unwrap();
        assert_eq!(reading.note.as_str(), "A#");
        assert_eq!(reading.octave, 4);
        assert!(reading.cents.abs() <= 1.0, "cents = {}", reading.cents);
    }

    #[test]
    fn middle_c_is_octave_four() {
        let reading = resolve(261.63).unwrap();
        assert_eq!(reading.note, NoteName::C);
        assert_eq!(reading.octave, 4);
        assert_eq!(reading.cents, 0.0);
    }

    #[test]
    fn b_three_is_below_middle_c() {
        let reading = resolve(246.94).unwrap();
        assert_eq!(reading.note, NoteName::B);
        assert_eq!(reading.octave, 3);
    }

    #[test]
    fn equal_tempered_grid_has_zero_cents() {
        for n in -48..=48 {
            let freq = 440.0 * 2.0_f32.powf(n as f32 / 12.0);
            let reading = resolve(freq).unwrap();
            assert_eq!(reading.cents, 0.0, "n = {n}");
            assert_eq!(reading.note, NoteName::from_index(9 + n), "n = {n}");
            assert_eq!(reading.octave, 4 + (9 + n).div_euclid(12), "n = {n}");
        }
    }

    #[test]
    fn octave_follows_a_based_formula_for_a_through_b() {
        for n in [-24_i32, -23, -22, -12, 0, 1, 2, 12, 13, 14] {
            let freq = 440.0 * 2.0_f32.powf(n as f32 / 12.0);
            let reading = resolve(freq).unwrap();
            assert_eq!(reading.octave, 4 + n.div_euclid(12), "n = {n}");
        }
    }

    #[test]
    fn cents_stay_within_half_a_semitone() {
        let mut freq = 27.5_f32;
        while freq < 4200.0 {
            let reading = resolve(freq).unwrap();
            assert!((-50.0..=50.0).contains(&reading.cents), "{freq} Hz -> {}", reading.cents);
            freq *= 1.0037;
        }
    }

    #[test]
    fn sharp_and_flat_deviations() {
        let sharp = resolve(445.0).unwrap();
        assert_eq!(sharp.note, NoteName::A);
        assert_eq!(sharp.cents, 20.0);

        let flat = resolve(435.0).unwrap();
        assert_eq!(flat.note, NoteName::A);
        assert_eq!(flat.cents, -20.0);
    }

    #[test]
    fn exact_halves_round_away_from_zero() {
        assert_eq!(nearest_semitone(0.5), 1);
        assert_eq!(nearest_semitone(-0.5), -1);
        assert_eq!(nearest_semitone(2.5), 3);
        assert_eq!(nearest_semitone(-2.5), -3);
        assert_eq!(nearest_semitone(0.49), 0);
        assert_eq!(nearest_semitone(-0.49), 0);
    }

    #[test]
    fn rejects_non_positive_and_non_finite() {
        assert!(resolve(0.0).is_none());
        assert!(resolve(-440.0).is_none());
        assert!(resolve(f32::NAN).is_none());
        assert!(resolve(f32::INFINITY).is_none());
        assert!(resolve_with_reference(440.0, 0.0).is_none());
    }

    #[test]
    fn custom_reference_pitch() {
        let reading = resolve_with_reference(442.0, 442.0).unwrap();
        assert_eq!(reading.note, NoteName::A);
        assert_eq!(reading.cents, 0.0);

        let against_440 = resolve(442.0).unwrap();
        assert_eq!(against_440.cents, 8.0);
    }

    #[test]
    fn target_frequency_round_trips_through_note_table() {
        let reading = resolve(262.0).unwrap();
        let target = reading.target_frequency(A4_FREQUENCY);
        assert!((target - 261.63).abs() < 0.01);
        let deviation = calculate_cents_deviation(reading.frequency, target);
        assert!((deviation - reading.cents).abs() < 0.5);
    }

    #[test]
    fn classification_thresholds() {
        assert_eq!(TuningStatus::from_cents(0.0), TuningStatus::InTune);
        assert_eq!(TuningStatus::from_cents(-4.9), TuningStatus::InTune);
        assert_eq!(TuningStatus::from_cents(5.0), TuningStatus::Close);
        assert_eq!(TuningStatus::from_cents(-14.0), TuningStatus::Close);
        assert_eq!(TuningStatus::from_cents(15.0), TuningStatus::OutOfTune);
        assert_eq!(TuningStatus::from_cents(-50.0), TuningStatus::OutOfTune);
    }

    #[test]
    fn note_names_serialize_with_sharps() {
        let json = serde_json::to_string(&NoteName::FSharp).unwrap();
        assert_eq!(json, "\"F#\"");
        assert_eq!(NoteName::from_index(-1), NoteName::B);
        assert_eq!(NoteName::GSharp.index(), 8);
        assert_eq!(serde_json::to_string(&NoteName::A).unwrap(), "\"A\"");
        let parsed: NoteName = serde_json::from_str("\"C#\"").unwrap();
        assert_eq!(parsed, NoteName::CSharp);
        for (i, note) in NoteName::ALL.iter().enumerate() {
            assert_eq!(note.index(), i as i32);
        }
    }
}
