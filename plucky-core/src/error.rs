//! # Error Types
//!
//! Configuration errors (bad tuning notes, malformed scale or chord
//! definitions, unknown catalog ids) are fatal: no instrument position can be
//! computed from them. Audio errors are recoverable and are normally turned
//! into session state by [`crate::session::AudioSession`] rather than being
//! returned to the caller.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluckyError {
    /// A note name such as `"H7"` or `"C#"` (missing octave) could not be parsed.
    #[error("Invalid note: {0}")]
    InvalidNote(String),

    /// A tuning whose open strings cannot produce positions.
    #[error("Invalid tuning '{id}': {message}")]
    InvalidTuning { id: String, message: String },

    /// A piano octave range that is reversed or outside the MIDI range.
    #[error("Invalid octave range {start}..={end}")]
    InvalidRange { start: i8, end: i8 },

    /// A scale or chord definition that cannot be resolved against a root.
    #[error("Malformed definition '{id}': {message}")]
    MalformedDefinition { id: String, message: String },

    #[error("Unknown scale: {0}")]
    UnknownScale(String),

    #[error("Unknown chord: {0}")]
    UnknownChord(String),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Failures raised while acquiring or running an audio input stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    /// The explicitly requested device is gone.
    #[error("Input device '{0}' is unavailable")]
    DeviceUnavailable(String),

    /// The device exists but cannot satisfy the requested stream format.
    #[error("Input device '{device}' cannot satisfy the requested configuration: {message}")]
    OverConstrained { device: String, message: String },

    #[error("No input device available")]
    NoInputDevice,

    #[error("Audio stream error: {0}")]
    Stream(String),
}

impl AudioError {
    /// Errors that warrant one retry against the default device.
    pub fn allows_default_fallback(&self) -> bool {
        matches!(
            self,
            AudioError::DeviceUnavailable(_) | AudioError::OverConstrained { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PluckyError>;
