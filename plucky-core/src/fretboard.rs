//! # Fretboard / Keyboard Note Generator
//!
//! Enumerates every physical position of an instrument together with its
//! absolute pitch. Guitar positions cover 6 strings x frets `0..=22`; piano
//! positions cover every chromatic key of the selected octave range.
//!
//! The generated list only depends on the tuning (or octave range), so it is
//! memoized by [`NoteGenerator`] and shared read-only with the membership
//! resolver. Changing root, scale or chord never touches this cache.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::note::{Pitch, PitchClass, midi_to_frequency};
use crate::tuning::{Instrument, PianoRange, STRING_COUNT, Tuning};

pub const MAX_FRET: u8 = 22;

/// Where a note lives on the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// `string` 0 is the highest-pitched string.
    Fret { string: u8, fret: u8 },
    Key { midi: u8 },
}

/// One playable spot and its pitch.
#[derive(Debug, Clone, PartialEq)]
pub struct NotePosition {
    pub location: Location,
    pub pitch: Pitch,
    pub midi: i32,
    pub frequency: f32,
}

impl NotePosition {
    fn from_midi(location: Location, midi: i32) -> Self {
        Self {
            location,
            pitch: Pitch::from_midi(midi),
            midi,
            frequency: midi_to_frequency(midi),
        }
    }

    pub fn pitch_class(&self) -> PitchClass {
        self.pitch.class
    }

    pub fn octave(&self) -> i8 {
        self.pitch.octave
    }

    pub fn string(&self) -> Option<u8> {
        match self.location {
            Location::Fret { string, .. } => Some(string),
            Location::Key { .. } => None,
        }
    }

    /// Coordinate on the clustering axis: the fret for guitar positions,
    /// the octave for piano keys.
    pub fn bound(&self) -> i32 {
        match self.location {
            Location::Fret { fret, .. } => fret as i32,
            Location::Key { .. } => self.pitch.octave as i32,
        }
    }

    pub fn is_black_key(&self) -> bool {
        self.pitch.class.is_black_key()
    }
}

/// Pitch of `open` stopped at `fret`.
pub fn fret_note(open: Pitch, string: u8, fret: u8) -> NotePosition {
    NotePosition::from_midi(Location::Fret { string, fret }, open.midi() + fret as i32)
}

fn guitar_positions(tuning: &Tuning) -> Result<Vec<NotePosition>> {
    let open_pitches = tuning.open_pitches()?;
    let mut positions = Vec::with_capacity(STRING_COUNT * (MAX_FRET as usize + 1));
    for (string, open) in open_pitches.iter().enumerate() {
        for fret in 0..=MAX_FRET {
            positions.push(fret_note(*open, string as u8, fret));
        }
    }
    Ok(positions)
}

fn piano_positions(range: &PianoRange) -> Vec<NotePosition> {
    let mut positions = Vec::new();
    for octave in range.start_octave..=range.end_octave {
        for class in PitchClass::ALL {
            let midi = Pitch::new(class, octave).midi();
            if !(0..=127).contains(&midi) {
                continue;
            }
            positions.push(NotePosition::from_midi(Location::Key { midi: midi as u8 }, midi));
        }
    }
    positions
}

/// Generates instrument positions, memoized by tuning / range identity.
#[derive(Debug, Default)]
pub struct NoteGenerator {
    cache: Option<(String, Arc<Vec<NotePosition>>)>,
}

impl NoteGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every position of `instrument`. A repeated call with an
    /// instrument of the same key returns the cached list without
    /// recomputation.
    pub fn generate(&mut self, instrument: &Instrument) -> Result<Arc<Vec<NotePosition>>> {
        let key = instrument.cache_key();
        if let Some((cached_key, positions)) = &self.cache {
            if *cached_key == key {
                return Ok(Arc::clone(positions));
            }
        }

        let positions = match instrument {
            Instrument::Fretted(tuning) => guitar_positions(tuning)?,
            Instrument::Keyed(range) => piano_positions(range),
        };
        debug!("Generated {} positions for '{}'", positions.len(), key);

        let positions = Arc::new(positions);
        self.cache = Some((key, Arc::clone(&positions)));
        Ok(positions)
    }

    pub fn is_cached(&self, instrument: &Instrument) -> bool {
        self.cache
            .as_ref()
            .is_some_and(|(key, _)| *key == instrument.cache_key())
    }
}
