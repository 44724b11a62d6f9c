//! # Pitch Quantizer
//!
//! Maps a continuous frequency reading onto the nearest equal-tempered
//! semitone. The mapping itself is pure; gating on clarity and instrument
//! band lives in [`DetectionGate`] so its thresholds can change while a
//! capture session is running.

use serde::Serialize;

use crate::note::{Pitch, PitchClass, frequency_to_midi};

pub const DEFAULT_MIN_CLARITY: f32 = 0.9;
pub const MIN_FREQUENCY: f32 = 60.0;
pub const MAX_FREQUENCY: f32 = 1400.0;

/// One detected note, produced at most once per analysis frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantizedNote {
    pub frequency: f32,
    pub confidence: f32,
    pub pitch_class: PitchClass,
    pub pitch: Pitch,
    pub midi: i32,
    /// Always in `(-50, 50]`.
    pub cent_offset: i32,
}

/// Quantizes `frequency` to the nearest semitone.
///
/// A reading exactly half-way between two semitones is attributed to the
/// lower one with a +50 cent offset. Frequencies that are not positive and
/// finite, or that land outside MIDI 0..=127, have no note.
pub fn quantize(frequency: f32, confidence: f32) -> Option<QuantizedNote> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }
    let raw = frequency_to_midi(frequency);
    let mut midi = (raw - 0.5).ceil() as i32;
    let mut cent_offset = ((raw - midi as f32) * 100.0).round() as i32;
    if cent_offset <= -50 {
        midi -= 1;
        cent_offset += 100;
    }
    if !(0..=127).contains(&midi) {
        return None;
    }

    let pitch = Pitch::from_midi(midi);
    Some(QuantizedNote {
        frequency,
        confidence,
        pitch_class: pitch.class,
        pitch,
        midi,
        cent_offset,
    })
}

/// Per-frame acceptance thresholds. Readings that fail are ordinary
/// "nothing detected" frames, not errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionGate {
    pub min_clarity: f32,
    pub min_frequency: f32,
    pub max_frequency: f32,
}

impl Default for DetectionGate {
    fn default() -> Self {
        Self {
            min_clarity: DEFAULT_MIN_CLARITY,
            min_frequency: MIN_FREQUENCY,
            max_frequency: MAX_FREQUENCY,
        }
    }
}

impl DetectionGate {
    pub fn admits(&self, frequency: f32, clarity: f32) -> bool {
        frequency.is_finite()
            && clarity > self.min_clarity
            && frequency > self.min_frequency
            && frequency < self.max_frequency
    }

    /// Quantizes the reading if it passes the gate.
    pub fn quantize(&self, frequency: f32, clarity: f32) -> Option<QuantizedNote> {
        if !self.admits(frequency, clarity) {
            return None;
        }
        quantize(frequency, clarity)
    }
}
