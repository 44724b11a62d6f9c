//! # Practice Sequencer
//!
//! Builds the note sequence the learner has to play and tracks progress
//! against live detected notes.
//!
//! States: `Inactive` -> `InProgress` -> `Complete`. Replaying the first
//! note of the sequence restarts the run at step 1, both mid-sequence and
//! after completion, so a fumbled attempt never needs an explicit reset.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::membership::TaggedPosition;
use crate::note::PitchClass;

/// Consecutive empty frames (~200 ms at 60 Hz) after which a held pitch may
/// be reported again.
pub const DEFAULT_REARM_FRAMES: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStep {
    pub pitch_class: PitchClass,
    pub degree: u8,
    pub label: String,
}

/// The notes to play, in order, closed on the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PracticeSequence {
    pub steps: Vec<SequenceStep>,
    pub direction: Direction,
    pub octave_repeats: u32,
}

impl PracticeSequence {
    /// Builds the sequence from a filtered position set. `None` when no
    /// degree is present.
    pub fn build(positions: &[TaggedPosition], direction: Direction, octave_repeats: u32) -> Option<Self> {
        // One representative per degree, first occurrence wins.
        let mut by_degree: BTreeMap<u8, SequenceStep> = BTreeMap::new();
        for p in positions {
            by_degree.entry(p.degree).or_insert_with(|| SequenceStep {
                pitch_class: p.pitch_class(),
                degree: p.degree,
                label: p.interval.to_string(),
            });
        }
        let octave: Vec<SequenceStep> = by_degree.into_values().collect();
        let closing = octave
            .iter()
            .find(|s| s.degree == 1)
            .or_else(|| octave.first())?
            .clone();

        let repeats = octave_repeats.max(1);
        let mut steps: Vec<SequenceStep> = Vec::with_capacity(octave.len() * repeats as usize + 1);
        for _ in 0..repeats {
            steps.extend(octave.iter().cloned());
        }
        match direction {
            Direction::Ascending => steps.push(closing),
            Direction::Descending => {
                steps.reverse();
                steps.insert(0, closing);
            }
        }

        Some(Self {
            steps,
            direction,
            octave_repeats: repeats,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn pitch_classes(&self) -> Vec<PitchClass> {
        self.steps.iter().map(|s| s.pitch_class).collect()
    }

    pub fn degrees(&self) -> Vec<u8> {
        self.steps.iter().map(|s| s.degree).collect()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.label.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PracticeState {
    Inactive,
    InProgress { step: usize },
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Nothing changed.
    Miss,
    /// The expected note; progress advanced.
    Hit,
    /// The first note was replayed; progress is back at step 1.
    Restart,
    /// The last expected note; the run is complete.
    Complete,
}

impl MatchOutcome {
    pub fn is_match(self) -> bool {
        self != MatchOutcome::Miss
    }
}

#[derive(Debug, Clone)]
struct Progress {
    sequence: PracticeSequence,
    current_step: usize,
    hits: Vec<bool>,
    started_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct PracticeSequencer {
    progress: Option<Progress>,
}

impl PracticeSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a run over `sequence`. An empty sequence leaves the sequencer
    /// inactive.
    pub fn start(&mut self, sequence: PracticeSequence) {
        if sequence.is_empty() {
            self.progress = None;
            return;
        }
        info!(
            "Practice started: {} notes, {:?}, {} octave(s)",
            sequence.len(),
            sequence.direction,
            sequence.octave_repeats
        );
        self.progress = Some(Progress {
            hits: vec![false; sequence.len()],
            sequence,
            current_step: 0,
            started_at: Instant::now(),
        });
    }

    pub fn reset(&mut self) {
        self.progress = None;
    }

    pub fn state(&self) -> PracticeState {
        match &self.progress {
            None => PracticeState::Inactive,
            Some(p) if p.current_step >= p.sequence.len() => PracticeState::Complete,
            Some(p) => PracticeState::InProgress { step: p.current_step },
        }
    }

    pub fn sequence(&self) -> Option<&PracticeSequence> {
        self.progress.as_ref().map(|p| &p.sequence)
    }

    pub fn hits(&self) -> &[bool] {
        match &self.progress {
            Some(p) => &p.hits,
            None => &[],
        }
    }

    pub fn current_step(&self) -> usize {
        self.progress.as_ref().map_or(0, |p| p.current_step)
    }

    /// Degrees hit so far, mapped through the sequence's degree list so a
    /// repeated octave lights up the same degrees again.
    pub fn hit_degrees(&self) -> BTreeSet<u8> {
        let Some(p) = &self.progress else {
            return BTreeSet::new();
        };
        p.hits
            .iter()
            .zip(&p.sequence.steps)
            .filter(|(hit, _)| **hit)
            .map(|(_, step)| step.degree)
            .collect()
    }

    /// `(hit, total)` step counts.
    pub fn progress(&self) -> (usize, usize) {
        self.progress.as_ref().map_or((0, 0), |p| {
            (p.hits.iter().filter(|h| **h).count(), p.sequence.len())
        })
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.progress.as_ref().map(|p| p.started_at.elapsed())
    }

    /// Feeds one newly detected note.
    pub fn match_note(&mut self, detected: PitchClass) -> MatchOutcome {
        let Some(p) = self.progress.as_mut() else {
            return MatchOutcome::Miss;
        };
        let len = p.sequence.len();
        let first = p.sequence.steps[0].pitch_class;

        if p.current_step >= len {
            if detected == first {
                restart(p);
                debug!("Restarted after completion on {}", detected);
                return MatchOutcome::Restart;
            }
            return MatchOutcome::Miss;
        }

        if detected == p.sequence.steps[p.current_step].pitch_class {
            p.hits[p.current_step] = true;
            p.current_step += 1;
            debug!("Hit {} ({}/{})", detected, p.current_step, len);
            if p.current_step == len {
                info!("Practice complete in {:?}", p.started_at.elapsed());
                return MatchOutcome::Complete;
            }
            return MatchOutcome::Hit;
        }

        if p.current_step > 0 && detected == first {
            restart(p);
            debug!("Restarted mid-sequence on {}", detected);
            return MatchOutcome::Restart;
        }

        MatchOutcome::Miss
    }
}

fn restart(p: &mut Progress) {
    p.current_step = 1;
    p.hits.iter_mut().for_each(|h| *h = false);
    p.hits[0] = true;
    p.started_at = Instant::now();
}

/// Reduces the per-frame detection stream to note changes.
///
/// A sustained note is reported once. After `rearm_frames` consecutive
/// frames without a detection the same pitch class counts as a new note.
#[derive(Debug, Clone)]
pub struct NoteChangeFilter {
    last: Option<PitchClass>,
    silent_frames: usize,
    rearm_frames: usize,
}

impl Default for NoteChangeFilter {
    fn default() -> Self {
        Self::new(DEFAULT_REARM_FRAMES)
    }
}

impl NoteChangeFilter {
    pub fn new(rearm_frames: usize) -> Self {
        Self {
            last: None,
            silent_frames: 0,
            rearm_frames: rearm_frames.max(1),
        }
    }

    pub fn accept(&mut self, detected: Option<PitchClass>) -> Option<PitchClass> {
        match detected {
            Some(pc) => {
                self.silent_frames = 0;
                if self.last == Some(pc) {
                    return None;
                }
                self.last = Some(pc);
                Some(pc)
            }
            None => {
                self.silent_frames += 1;
                if self.silent_frames >= self.rearm_frames {
                    self.last = None;
                }
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.silent_frames = 0;
    }
}

/// Payload handed to the session-recording collaborator on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub scale_or_chord_id: String,
    pub root_note: PitchClass,
    pub tuning_id: Option<String>,
    pub instrument: crate::tuning::InstrumentKind,
    pub completed: bool,
    pub duration_ms: Option<u64>,
    pub total_notes: usize,
    pub notes_hit: usize,
    pub genre_id: Option<String>,
    pub octaves: u32,
    pub track_scale_id: Option<u64>,
}
