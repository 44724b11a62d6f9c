//! # Theory Module
//!
//! Intervals, scale and chord formulas, and the static catalog the engine
//! resolves selections against.
//!
//! Intervals use the number-then-quality notation (`1P`, `3m`, `5d`, `9M`):
//! `P` perfect, `M` major, `m` minor, `A` augmented, `d` diminished.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{PluckyError, Result};
use crate::note::PitchClass;

const DIATONIC_SEMITONES: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    Perfect,
    Major,
    Minor,
    Augmented,
    Diminished,
}

impl Quality {
    fn symbol(self) -> char {
        match self {
            Quality::Perfect => 'P',
            Quality::Major => 'M',
            Quality::Minor => 'm',
            Quality::Augmented => 'A',
            Quality::Diminished => 'd',
        }
    }
}

/// A diatonic interval such as `3M` (major third) or `11P`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub number: u8,
    pub quality: Quality,
}

fn is_perfect_class(simple_number: u8) -> bool {
    matches!(simple_number, 1 | 4 | 5)
}

impl Interval {
    pub fn new(number: u8, quality: Quality) -> Result<Self> {
        let invalid = || PluckyError::MalformedDefinition {
            id: format!("{}{}", number, quality.symbol()),
            message: "not a valid interval".to_string(),
        };
        if number == 0 || number > 15 {
            return Err(invalid());
        }
        let perfect = is_perfect_class(Self::simple_of(number));
        let ok = match quality {
            Quality::Perfect => perfect,
            Quality::Major | Quality::Minor => !perfect,
            Quality::Augmented | Quality::Diminished => true,
        };
        if !ok {
            return Err(invalid());
        }
        Ok(Self { number, quality })
    }

    fn simple_of(number: u8) -> u8 {
        (number - 1) % 7 + 1
    }

    /// The interval number reduced into one octave (`9` -> `2`).
    pub fn simple_number(self) -> u8 {
        Self::simple_of(self.number)
    }

    pub fn semitones(self) -> i32 {
        let steps = (self.number - 1) as i32;
        let base = DIATONIC_SEMITONES[(steps % 7) as usize] + 12 * (steps / 7);
        let perfect = is_perfect_class(self.simple_number());
        let offset = match (self.quality, perfect) {
            (Quality::Perfect, _) | (Quality::Major, _) => 0,
            (Quality::Minor, _) => -1,
            (Quality::Augmented, _) => 1,
            (Quality::Diminished, true) => -1,
            (Quality::Diminished, false) => -2,
        };
        base + offset
    }

    /// The simple interval between two sharp-spelled pitch classes, counted
    /// upward by letter name. `None` when the spelling yields a quality
    /// beyond augmented/diminished.
    pub fn between(from: PitchClass, to: PitchClass) -> Option<Interval> {
        let a = from.spelling();
        let b = to.spelling();
        let letter_steps = (b.letter_index() - a.letter_index()).rem_euclid(7);
        let number = letter_steps as u8 + 1;
        let semitones = from.semitones_to(to);
        let natural = DIATONIC_SEMITONES[letter_steps as usize];
        let diff = semitones - natural;
        let quality = if is_perfect_class(number) {
            match diff {
                0 => Quality::Perfect,
                1 => Quality::Augmented,
                -1 => Quality::Diminished,
                _ => return None,
            }
        } else {
            match diff {
                0 => Quality::Major,
                -1 => Quality::Minor,
                1 => Quality::Augmented,
                -2 => Quality::Diminished,
                _ => return None,
            }
        };
        Some(Interval { number, quality })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, self.quality.symbol())
    }
}

impl FromStr for Interval {
    type Err = PluckyError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || PluckyError::MalformedDefinition {
            id: s.to_string(),
            message: "not a valid interval".to_string(),
        };
        let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(malformed)?;
        let (digits, rest) = s.split_at(split);
        let number: u8 = digits.parse().map_err(|_| malformed())?;
        let quality = match rest {
            "P" => Quality::Perfect,
            "M" => Quality::Major,
            "m" => Quality::Minor,
            "A" => Quality::Augmented,
            "d" => Quality::Diminished,
            _ => return Err(malformed()),
        };
        Interval::new(number, quality)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleCategory {
    Major,
    Minor,
    Pentatonic,
    Blues,
    Modal,
    MelodicMinorMode,
    HarmonicMinorMode,
    Exotic,
    Jazz,
    Chord,
}

/// A scale or chord as an ordered list of intervals above its root.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub id: String,
    pub name: String,
    pub intervals: Vec<Interval>,
    /// Display labels per degree (`"1"`, `"b3"`, ...).
    pub degrees: Vec<String>,
    pub category: ScaleCategory,
}

impl Formula {
    /// Builds a formula from interval labels, validating that it starts on
    /// the root and that every degree has a label.
    pub fn new(
        id: &str,
        name: &str,
        intervals: &[&str],
        degrees: &[&str],
        category: ScaleCategory,
    ) -> Result<Self> {
        let malformed = |message: &str| PluckyError::MalformedDefinition {
            id: id.to_string(),
            message: message.to_string(),
        };
        if intervals.is_empty() {
            return Err(malformed("no intervals"));
        }
        if intervals.len() != degrees.len() {
            return Err(malformed("interval and degree lists differ in length"));
        }
        let intervals = intervals
            .iter()
            .map(|label| label.parse::<Interval>())
            .collect::<Result<Vec<_>>>()
            .map_err(|e| malformed(&e.to_string()))?;
        if intervals[0].semitones() != 0 {
            return Err(malformed("first interval must be the root"));
        }
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            intervals,
            degrees: degrees.iter().map(|d| d.to_string()).collect(),
            category,
        })
    }

    /// Pitch classes of the formula transposed onto `root`, in degree order.
    pub fn pitch_classes(&self, root: PitchClass) -> Vec<PitchClass> {
        self.intervals
            .iter()
            .map(|interval| root.transpose(interval.semitones()))
            .collect()
    }
}

fn build(entries: &[(&str, &str, &str, &str, ScaleCategory)]) -> Vec<Formula> {
    entries
        .iter()
        .filter_map(|(id, name, intervals, degrees, category)| {
            let intervals: Vec<&str> = intervals.split_whitespace().collect();
            let degrees: Vec<&str> = degrees.split_whitespace().collect();
            match Formula::new(id, name, &intervals, &degrees, *category) {
                Ok(formula) => Some(formula),
                Err(e) => {
                    tracing::error!("Dropping catalog entry: {}", e);
                    None
                }
            }
        })
        .collect()
}

/// Built-in scales.
pub static SCALES: Lazy<Vec<Formula>> = Lazy::new(|| {
    use ScaleCategory::*;
    build(&[
        ("major", "Major (Ionian)", "1P 2M 3M 4P 5P 6M 7M", "1 2 3 4 5 6 7", Major),
        ("natural-minor", "Natural Minor (Aeolian)", "1P 2M 3m 4P 5P 6m 7m", "1 2 b3 4 5 b6 b7", Minor),
        ("harmonic-minor", "Harmonic Minor", "1P 2M 3m 4P 5P 6m 7M", "1 2 b3 4 5 b6 7", Minor),
        ("melodic-minor", "Melodic Minor", "1P 2M 3m 4P 5P 6M 7M", "1 2 b3 4 5 6 7", Minor),
        ("major-pentatonic", "Major Pentatonic", "1P 2M 3M 5P 6M", "1 2 3 5 6", Pentatonic),
        ("minor-pentatonic", "Minor Pentatonic", "1P 3m 4P 5P 7m", "1 b3 4 5 b7", Pentatonic),
        ("blues", "Blues", "1P 3m 4P 5d 5P 7m", "1 b3 4 b5 5 b7", Blues),
        ("major-blues", "Major Blues", "1P 2M 3m 3M 5P 6M", "1 2 b3 3 5 6", Blues),
        ("dorian", "Dorian", "1P 2M 3m 4P 5P 6M 7m", "1 2 b3 4 5 6 b7", Modal),
        ("phrygian", "Phrygian", "1P 2m 3m 4P 5P 6m 7m", "1 b2 b3 4 5 b6 b7", Modal),
        ("lydian", "Lydian", "1P 2M 3M 4A 5P 6M 7M", "1 2 3 #4 5 6 7", Modal),
        ("mixolydian", "Mixolydian", "1P 2M 3M 4P 5P 6M 7m", "1 2 3 4 5 6 b7", Modal),
        ("locrian", "Locrian", "1P 2m 3m 4P 5d 6m 7m", "1 b2 b3 4 b5 b6 b7", Modal),
        ("lydian-dominant", "Lydian Dominant", "1P 2M 3M 4A 5P 6M 7m", "1 2 3 #4 5 6 b7", MelodicMinorMode),
        ("altered", "Altered", "1P 2m 3m 4d 5d 6m 7m", "1 b2 #2 3 b5 #5 b7", MelodicMinorMode),
        ("phrygian-dominant", "Phrygian Dominant", "1P 2m 3M 4P 5P 6m 7m", "1 b2 3 4 5 b6 b7", HarmonicMinorMode),
        ("harmonic-major", "Harmonic Major", "1P 2M 3M 4P 5P 6m 7M", "1 2 3 4 5 b6 7", Major),
        ("hungarian-minor", "Hungarian Minor", "1P 2M 3m 4A 5P 6m 7M", "1 2 b3 #4 5 b6 7", Exotic),
        ("double-harmonic-major", "Double Harmonic Major", "1P 2m 3M 4P 5P 6m 7M", "1 b2 3 4 5 b6 7", Exotic),
        ("whole-tone", "Whole Tone", "1P 2M 3M 4A 5A 7m", "1 2 3 #4 #5 b7", Jazz),
        ("diminished-hw", "Diminished (Half-Whole)", "1P 2m 3m 3M 4A 5P 6M 7m", "1 b2 b3 3 #4 5 6 b7", Jazz),
        ("bebop-dominant", "Bebop Dominant", "1P 2M 3M 4P 5P 6M 7m 7M", "1 2 3 4 5 6 b7 7", Jazz),
        ("kumoi", "Kumoi", "1P 2M 3m 5P 6M", "1 2 b3 5 6", Exotic),
        ("iwato", "Iwato", "1P 2m 4P 5d 7m", "1 b2 4 b5 b7", Exotic),
    ])
});

/// Built-in chords.
pub static CHORDS: Lazy<Vec<Formula>> = Lazy::new(|| {
    use ScaleCategory::Chord;
    build(&[
        ("major", "Major", "1P 3M 5P", "1 3 5", Chord),
        ("minor", "Minor", "1P 3m 5P", "1 b3 5", Chord),
        ("7", "Dominant 7th", "1P 3M 5P 7m", "1 3 5 b7", Chord),
        ("maj7", "Major 7th", "1P 3M 5P 7M", "1 3 5 7", Chord),
        ("m7", "Minor 7th", "1P 3m 5P 7m", "1 b3 5 b7", Chord),
        ("mMaj7", "Minor-Major 7th", "1P 3m 5P 7M", "1 b3 5 7", Chord),
        ("6", "Major 6th", "1P 3M 5P 6M", "1 3 5 6", Chord),
        ("m6", "Minor 6th", "1P 3m 5P 6M", "1 b3 5 6", Chord),
        ("add9", "Add 9", "1P 3M 5P 9M", "1 3 5 9", Chord),
        ("9", "Dominant 9th", "1P 3M 5P 7m 9M", "1 3 5 b7 9", Chord),
        ("maj9", "Major 9th", "1P 3M 5P 7M 9M", "1 3 5 7 9", Chord),
        ("m9", "Minor 9th", "1P 3m 5P 7m 9M", "1 b3 5 b7 9", Chord),
        ("7b9", "7 Flat 9", "1P 3M 5P 7m 9m", "1 3 5 b7 b9", Chord),
        ("7sharp9", "7 Sharp 9", "1P 3M 5P 7m 9A", "1 3 5 b7 #9", Chord),
        ("sus2", "Suspended 2nd", "1P 2M 5P", "1 2 5", Chord),
        ("sus4", "Suspended 4th", "1P 4P 5P", "1 4 5", Chord),
        ("7sus4", "7 Suspended 4th", "1P 4P 5P 7m", "1 4 5 b7", Chord),
        ("dim", "Diminished", "1P 3m 5d", "1 b3 b5", Chord),
        ("dim7", "Diminished 7th", "1P 3m 5d 7d", "1 b3 b5 bb7", Chord),
        ("m7b5", "Half-Diminished", "1P 3m 5d 7m", "1 b3 b5 b7", Chord),
        ("aug", "Augmented", "1P 3M 5A", "1 3 #5", Chord),
        ("7b5", "7 Flat 5", "1P 3M 5d 7m", "1 3 b5 b7", Chord),
    ])
});

pub fn find_scale(id: &str) -> Result<&'static Formula> {
    SCALES
        .iter()
        .find(|s| s.id == id)
        .ok_or_else(|| PluckyError::UnknownScale(id.to_string()))
}

pub fn find_chord(id: &str) -> Result<&'static Formula> {
    CHORDS
        .iter()
        .find(|c| c.id == id)
        .ok_or_else(|| PluckyError::UnknownChord(id.to_string()))
}

/// What the learner is working on.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Scale { root: PitchClass, formula: Formula },
    Chord { root: PitchClass, formula: Formula },
}

impl Selection {
    pub fn scale(root: PitchClass, id: &str) -> Result<Self> {
        Ok(Selection::Scale {
            root,
            formula: find_scale(id)?.clone(),
        })
    }

    pub fn chord(root: PitchClass, id: &str) -> Result<Self> {
        Ok(Selection::Chord {
            root,
            formula: find_chord(id)?.clone(),
        })
    }

    pub fn root(&self) -> PitchClass {
        match self {
            Selection::Scale { root, .. } | Selection::Chord { root, .. } => *root,
        }
    }

    pub fn formula(&self) -> &Formula {
        match self {
            Selection::Scale { formula, .. } | Selection::Chord { formula, .. } => formula,
        }
    }

    pub fn id(&self) -> &str {
        &self.formula().id
    }

    pub fn is_chord(&self) -> bool {
        matches!(self, Selection::Chord { .. })
    }

    /// Same kind and formula on a different root.
    pub fn with_root(&self, root: PitchClass) -> Self {
        match self {
            Selection::Scale { formula, .. } => Selection::Scale {
                root,
                formula: formula.clone(),
            },
            Selection::Chord { formula, .. } => Selection::Chord {
                root,
                formula: formula.clone(),
            },
        }
    }
}
