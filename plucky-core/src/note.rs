//! # Note Module
//!
//! Pitch classes, spelled note names and equal-temperament conversions.
//!
//! Every pitch emitted by the engine is spelled with sharps only. Incoming
//! names (tuning notes, roots typed by the user) may use flats or double
//! accidentals and are normalized by [`normalize_to_sharp`]:
//! 1. keep the spelling if it is already a natural or single sharp name,
//! 2. else take its enharmonic neighbour if that one is natural or sharp,
//! 3. else fall back to the chromatic sharp table indexed by semitone.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{PluckyError, Result};

/// Reference pitch for A4 (MIDI 69).
pub const A4_FREQUENCY: f32 = 440.0;
pub const A4_MIDI: i32 = 69;

/// Sharp spellings indexed by semitone above C.
pub const CHROMATIC_SHARPS: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Semitone offset of each natural letter, C..B.
const LETTER_SEMITONES: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];
const LETTERS: [char; 7] = ['C', 'D', 'E', 'F', 'G', 'A', 'B'];

/// Sharp name -> pitch class, for step (1) and (2) of the spelling rule.
static SHARP_NAMES: Lazy<BTreeMap<&'static str, PitchClass>> = Lazy::new(|| {
    CHROMATIC_SHARPS
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, PitchClass::from_semitone(i as i32)))
        .collect()
});

/// One of the twelve sharp-spelled pitch classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PitchClass {
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

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Pitch class for any semitone count, wrapping in both directions.
    pub fn from_semitone(semitone: i32) -> Self {
        Self::ALL[semitone.rem_euclid(12) as usize]
    }

    pub fn semitone(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        CHROMATIC_SHARPS[self as usize]
    }

    pub fn transpose(self, semitones: i32) -> Self {
        Self::from_semitone(self.semitone() + semitones)
    }

    /// Upward distance in semitones from `self` to `other`, in `0..12`.
    pub fn semitones_to(self, other: PitchClass) -> i32 {
        (other.semitone() - self.semitone()).rem_euclid(12)
    }

    pub fn is_black_key(self) -> bool {
        self.name().len() > 1
    }

    /// The spelling this pitch class is emitted with.
    pub fn spelling(self) -> Spelling {
        let name = self.name();
        let letter = name.chars().next().unwrap_or('C');
        Spelling {
            letter,
            accidental: if name.len() > 1 { 1 } else { 0 },
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = PluckyError;

    fn from_str(s: &str) -> Result<Self> {
        normalize_to_sharp(s)
    }
}

/// A letter plus accidental count, e.g. `Bb` is `('B', -1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spelling {
    pub letter: char,
    pub accidental: i8,
}

impl Spelling {
    /// Parses the leading letter and accidentals of `name`, returning the
    /// spelling and the unparsed remainder (usually the octave).
    pub fn parse_prefix(name: &str) -> Result<(Spelling, &str)> {
        let mut chars = name.char_indices();
        let letter = match chars.next() {
            Some((_, c)) if LETTERS.contains(&c.to_ascii_uppercase()) => c.to_ascii_uppercase(),
            _ => return Err(PluckyError::InvalidNote(name.to_string())),
        };

        let mut accidental: i8 = 0;
        let mut rest = &name[1..];
        for (idx, c) in chars {
            match c {
                '#' => accidental += 1,
                'b' => accidental -= 1,
                _ => {
                    rest = &name[idx..];
                    break;
                }
            }
            if accidental.abs() > 2 {
                return Err(PluckyError::InvalidNote(name.to_string()));
            }
            rest = &name[idx + c.len_utf8()..];
        }
        Ok((Spelling { letter, accidental }, rest))
    }

    /// Index of the letter, C = 0 .. B = 6.
    pub fn letter_index(self) -> i32 {
        LETTERS.iter().position(|&l| l == self.letter).unwrap_or(0) as i32
    }

    /// Semitones above C, not wrapped (`Cb` is -1, `B#` is 12).
    pub fn semitone(self) -> i32 {
        LETTER_SEMITONES[self.letter_index() as usize] + self.accidental as i32
    }

    fn sharp_name(self) -> Option<PitchClass> {
        let name = match self.accidental {
            0 => self.letter.to_string(),
            1 => format!("{}#", self.letter),
            _ => return None,
        };
        SHARP_NAMES.get(name.as_str()).copied()
    }

    /// The same pitch spelled from the neighbouring letter in the direction
    /// of the accidental (`Bb` -> `A#`, `E#` -> `F`, `C#` -> `Db`).
    fn enharmonic(self) -> Option<Spelling> {
        let step = match self.accidental.signum() {
            0 => return None,
            s => s as i32,
        };
        let idx = self.letter_index() + step;
        let (letter_idx, octave_shift) = match idx {
            7 => (0, 12),
            -1 => (6, -12),
            i => (i, 0),
        };
        let base = LETTER_SEMITONES[letter_idx as usize] + octave_shift;
        let accidental = self.semitone() - base;
        if accidental.abs() > 2 {
            return None;
        }
        Some(Spelling {
            letter: LETTERS[letter_idx as usize],
            accidental: accidental as i8,
        })
    }
}

impl fmt::Display for Spelling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter)?;
        let symbol = if self.accidental > 0 { "#" } else { "b" };
        for _ in 0..self.accidental.unsigned_abs() {
            f.write_str(symbol)?;
        }
        Ok(())
    }
}

/// Normalizes any spelled pitch class (`"Bb"`, `"E#"`, `"Fbb"`) to its
/// sharp-only name. Trailing octave digits are not accepted here.
pub fn normalize_to_sharp(name: &str) -> Result<PitchClass> {
    let (spelling, rest) = Spelling::parse_prefix(name.trim())?;
    if !rest.is_empty() {
        return Err(PluckyError::InvalidNote(name.to_string()));
    }
    Ok(sharp_class(spelling))
}

fn sharp_class(spelling: Spelling) -> PitchClass {
    if let Some(pc) = spelling.sharp_name() {
        return pc;
    }
    if let Some(pc) = spelling.enharmonic().and_then(Spelling::sharp_name) {
        return pc;
    }
    PitchClass::from_semitone(spelling.semitone())
}

/// A pitch class in a specific octave (scientific pitch notation, C4 = MIDI 60).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pitch {
    pub class: PitchClass,
    pub octave: i8,
}

impl Pitch {
    pub fn new(class: PitchClass, octave: i8) -> Self {
        Self { class, octave }
    }

    /// Sharp-spelled pitch for a MIDI note number. The octave always follows
    /// the MIDI number, so `Cb4` parsed earlier comes back as `B3`.
    pub fn from_midi(midi: i32) -> Self {
        Self {
            class: PitchClass::from_semitone(midi),
            octave: ((midi - 12).div_euclid(12)) as i8,
        }
    }

    pub fn midi(self) -> i32 {
        (self.octave as i32 + 1) * 12 + self.class.semitone()
    }

    pub fn frequency(self) -> f32 {
        midi_to_frequency(self.midi())
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class, self.octave)
    }
}

impl FromStr for Pitch {
    type Err = PluckyError;

    /// Parses `"E2"`, `"C#4"`, `"Bb3"` or `"C-1"`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (spelling, rest) = Spelling::parse_prefix(trimmed)?;
        let octave: i32 = rest
            .parse()
            .map_err(|_| PluckyError::InvalidNote(s.to_string()))?;
        let midi = octave
            .checked_add(1)
            .and_then(|o| o.checked_mul(12))
            .and_then(|m| m.checked_add(spelling.semitone()))
            .filter(|m| (0..=127).contains(m))
            .ok_or_else(|| PluckyError::InvalidNote(s.to_string()))?;
        Ok(Pitch::from_midi(midi))
    }
}

impl Serialize for Pitch {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pitch {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Equal-tempered frequency: `440 * 2^((midi - 69) / 12)`.
pub fn midi_to_frequency(midi: i32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((midi - A4_MIDI) as f32 / 12.0)
}

/// Continuous (unrounded) MIDI number for a frequency.
pub fn frequency_to_midi(freq: f32) -> f32 {
    12.0 * (freq / A4_FREQUENCY).log2() + A4_MIDI as f32
}

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values are sharp, negative values flat; 100 cents is one semitone.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}
