// plucky-core/src/lib.rs

//! The core logic for the scale and chord practice trainer.
//! This crate maps tunings and scale/chord formulas onto instrument
//! positions, clusters them into playable windows, turns microphone audio
//! into quantized notes and matches those against a practice sequence.
//! It is completely headless and contains no UI code.

pub mod audio;
pub mod clustering;
pub mod engine;
pub mod error;
pub mod events;
pub mod fft;
pub mod filter;
pub mod fretboard;
pub mod membership;
pub mod note;
pub mod pitch;
pub mod playback;
pub mod practice;
pub mod preferences;
pub mod quantize;
pub mod session;
pub mod theory;
pub mod tuning;
pub mod voicings;

pub use engine::{FrameReport, PracticeEngine};
pub use error::{AudioError, PluckyError};
pub use note::{Pitch, PitchClass};
pub use practice::{Direction, MatchOutcome, PracticeState, SessionRecord};
pub use quantize::QuantizedNote;
pub use session::{AudioSession, SessionStatus};
pub use theory::Selection;
pub use tuning::{Instrument, InstrumentKind};
