//! # Tuning Module
//!
//! Instrument models: six-string guitar tunings and piano octave ranges.
//!
//! Strings are listed from the highest-pitched (index 0) to the lowest
//! (index 5), so standard tuning reads `E4 B3 G3 D3 A2 E2`.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{PluckyError, Result};
use crate::fretboard::MAX_FRET;
use crate::note::Pitch;

pub const STRING_COUNT: usize = 6;

pub const DEFAULT_TUNING_ID: &str = "standard";
pub const CUSTOM_TUNING_ID: &str = "custom";

/// Highest open string whose top fret is still a MIDI note.
pub const MAX_OPEN_MIDI: i32 = 127 - MAX_FRET as i32;

/// Lowest and highest octave a piano range may span.
pub const MIN_PIANO_OCTAVE: i8 = 0;
pub const MAX_PIANO_OCTAVE: i8 = 8;

/// An ordered set of open-string notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuning {
    pub id: String,
    pub name: String,
    /// Open-string note names, highest string first.
    pub strings: [String; STRING_COUNT],
    pub description: String,
    pub is_custom: bool,
}

impl Tuning {
    fn preset(id: &str, name: &str, strings: [&str; STRING_COUNT], description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            strings: strings.map(str::to_string),
            description: description.to_string(),
            is_custom: false,
        }
    }

    /// Builds a user-edited tuning, validating every open string up front.
    pub fn custom(strings: [String; STRING_COUNT]) -> Result<Self> {
        let tuning = Self {
            id: CUSTOM_TUNING_ID.to_string(),
            name: "Custom".to_string(),
            strings,
            description: "User-defined tuning".to_string(),
            is_custom: true,
        };
        tuning.open_pitches()?;
        Ok(tuning)
    }

    /// Parses every open string. Any unparseable note, or one whose top
    /// fret would pass MIDI 127, is a fatal configuration error.
    pub fn open_pitches(&self) -> Result<[Pitch; STRING_COUNT]> {
        let mut pitches = [Pitch::from_midi(0); STRING_COUNT];
        for (slot, note) in pitches.iter_mut().zip(self.strings.iter()) {
            let pitch: Pitch = note.parse().map_err(|_| PluckyError::InvalidTuning {
                id: self.id.clone(),
                message: format!("open string '{}' is not a valid note", note),
            })?;
            if pitch.midi() > MAX_OPEN_MIDI {
                return Err(PluckyError::InvalidTuning {
                    id: self.id.clone(),
                    message: format!("open string '{}' is too high to fret up to {}", note, MAX_FRET),
                });
            }
            *slot = pitch;
        }
        Ok(pitches)
    }

    /// Identity used to key the note-generator cache.
    pub fn cache_key(&self) -> String {
        self.strings.join(",")
    }
}

/// Built-in tunings.
pub static TUNINGS: Lazy<Vec<Tuning>> = Lazy::new(|| {
    vec![
        Tuning::preset(
            "standard",
            "Standard",
            ["E4", "B3", "G3", "D3", "A2", "E2"],
            "Standard EADGBE tuning",
        ),
        Tuning::preset(
            "drop-d",
            "Drop D",
            ["E4", "B3", "G3", "D3", "A2", "D2"],
            "Low string dropped one whole step",
        ),
        Tuning::preset(
            "drop-cs",
            "Drop C#",
            ["D#4", "A#3", "F#3", "C#3", "G#2", "C#2"],
            "Drop D tuned down a half step",
        ),
        Tuning::preset(
            "dadgad",
            "DADGAD",
            ["D4", "A3", "G3", "D3", "A2", "D2"],
            "Open Dsus4",
        ),
        Tuning::preset(
            "open-g",
            "Open G",
            ["D4", "B3", "G3", "D3", "G2", "D2"],
            "Open G major chord",
        ),
        Tuning::preset(
            "open-d",
            "Open D",
            ["D4", "A3", "F#3", "D3", "A2", "D2"],
            "Open D major chord",
        ),
        Tuning::preset(
            "eb-standard",
            "Eb Standard",
            ["D#4", "A#3", "F#3", "C#3", "G#2", "D#2"],
            "Half step down from standard",
        ),
    ]
});

pub fn find_tuning(id: &str) -> Option<&'static Tuning> {
    TUNINGS.iter().find(|t| t.id == id)
}

/// Looks up a preset, falling back to standard tuning for unknown ids.
pub fn tuning_or_default(id: &str) -> &'static Tuning {
    find_tuning(id).unwrap_or(&TUNINGS[0])
}

/// An inclusive octave range of piano keys, e.g. `3..=6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PianoRange {
    pub start_octave: i8,
    pub end_octave: i8,
}

impl PianoRange {
    pub fn new(start_octave: i8, end_octave: i8) -> Result<Self> {
        if start_octave > end_octave
            || start_octave < MIN_PIANO_OCTAVE
            || end_octave > MAX_PIANO_OCTAVE
        {
            return Err(PluckyError::InvalidRange {
                start: start_octave,
                end: end_octave,
            });
        }
        Ok(Self {
            start_octave,
            end_octave,
        })
    }

    pub fn cache_key(&self) -> String {
        format!("piano:{}-{}", self.start_octave, self.end_octave)
    }
}

impl Default for PianoRange {
    fn default() -> Self {
        Self {
            start_octave: 3,
            end_octave: 6,
        }
    }
}

/// The instrument whose positions are generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instrument {
    Fretted(Tuning),
    Keyed(PianoRange),
}

impl Instrument {
    pub fn kind(&self) -> InstrumentKind {
        match self {
            Instrument::Fretted(_) => InstrumentKind::Guitar,
            Instrument::Keyed(_) => InstrumentKind::Piano,
        }
    }

    pub fn cache_key(&self) -> String {
        match self {
            Instrument::Fretted(tuning) => tuning.cache_key(),
            Instrument::Keyed(range) => range.cache_key(),
        }
    }

    /// The tuning id reported in session records (`None` for piano).
    pub fn tuning_id(&self) -> Option<&str> {
        match self {
            Instrument::Fretted(tuning) => Some(tuning.id.as_str()),
            Instrument::Keyed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Guitar,
    Piano,
}
