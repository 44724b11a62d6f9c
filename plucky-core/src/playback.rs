//! # Playback Scheduler
//!
//! Audible previews of the current selection, driven by an external clock:
//! the caller advances the transport with [`PlaybackScheduler::tick`] and the
//! scheduler fires every note whose start time has passed.
//!
//! Each `play` or `stop` bumps a generation counter. Anything that refers to
//! an older generation (queued notes, a caller's handle) is stale and never
//! touches the highlight state, and all sounding voices are released at once.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use tracing::debug;

use crate::membership::TaggedPosition;

pub const DEFAULT_BPM: u32 = 120;

const STRUM_INTERVAL: Duration = Duration::from_millis(20);
const ARPEGGIO_INTERVAL: Duration = Duration::from_millis(150);
const CHORD_SUSTAIN: Duration = Duration::from_millis(1000);
const CHORD_PAUSE: Duration = Duration::from_millis(500);
const ARPEGGIO_NOTE: Duration = Duration::from_millis(250);

/// E5, short and quiet.
pub const CHIME_MIDI: i32 = 76;
const CHIME_DURATION: Duration = Duration::from_millis(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timbre {
    /// Soft triangle voice for previews.
    Preview,
    /// Plain sine blip for the success chime.
    Chime,
}

/// Whatever actually makes sound.
pub trait VoiceSink {
    fn note_on(&mut self, midi: i32, duration: Duration, timbre: Timbre);
    fn release_all(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNote {
    pub at: Duration,
    pub midi: i32,
    pub duration: Duration,
    /// Index reported to the highlight state when the note starts.
    pub highlight: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackPlan {
    pub notes: Vec<ScheduledNote>,
    pub total: Duration,
}

impl PlaybackPlan {
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn midis(&self) -> Vec<i32> {
        self.notes.iter().map(|n| n.midi).collect()
    }
}

fn beat(bpm: u32) -> Duration {
    Duration::from_secs_f64(60.0 / f64::from(bpm.max(1)))
}

/// Index of the first root in an ascending list, else 0.
fn first_root(sorted: &[&TaggedPosition]) -> usize {
    sorted.iter().position(|p| p.is_root).unwrap_or(0)
}

/// Up from the first root to the top, then back down without repeating
/// the top note. One note per beat.
pub fn scale_preview(positions: &[TaggedPosition], bpm: u32) -> PlaybackPlan {
    let unique: BTreeMap<i32, &TaggedPosition> = positions.iter().map(|p| (p.midi(), p)).rev().collect();
    let sorted: Vec<&TaggedPosition> = unique.into_values().collect();
    if sorted.is_empty() {
        return PlaybackPlan::default();
    }

    let ascending = &sorted[first_root(&sorted)..];
    let descending = ascending.iter().rev().skip(1);
    let step = beat(bpm);

    let notes: Vec<ScheduledNote> = ascending
        .iter()
        .chain(descending)
        .enumerate()
        .map(|(i, p)| ScheduledNote {
            at: step * i as u32,
            midi: p.midi(),
            duration: step / 2,
            highlight: Some(i),
        })
        .collect();
    let total = step * notes.len() as u32;
    PlaybackPlan { notes, total }
}

/// Strum (low to high), hold, pause, then arpeggiate ascending.
fn strum_then_arpeggio(midis: &[i32]) -> PlaybackPlan {
    if midis.is_empty() {
        return PlaybackPlan::default();
    }
    let count = midis.len() as u32;
    let strum = STRUM_INTERVAL * count;
    let hold = CHORD_SUSTAIN + CHORD_PAUSE;

    let mut notes: Vec<ScheduledNote> = midis
        .iter()
        .enumerate()
        .map(|(i, &midi)| ScheduledNote {
            at: STRUM_INTERVAL * i as u32,
            midi,
            duration: CHORD_SUSTAIN,
            highlight: None,
        })
        .collect();

    let mut sorted = midis.to_vec();
    sorted.sort_unstable();
    let arpeggio_start = strum + hold;
    notes.extend(sorted.into_iter().enumerate().map(|(i, midi)| ScheduledNote {
        at: arpeggio_start + ARPEGGIO_INTERVAL * i as u32,
        midi,
        duration: ARPEGGIO_NOTE,
        highlight: None,
    }));

    PlaybackPlan {
        notes,
        total: arpeggio_start + ARPEGGIO_INTERVAL * count + CHORD_PAUSE,
    }
}

/// Guitar chord: the lowest-fret note of every string, strummed from the
/// bass string up.
pub fn guitar_chord_preview(positions: &[TaggedPosition]) -> PlaybackPlan {
    let mut by_string: BTreeMap<u8, &TaggedPosition> = BTreeMap::new();
    for p in positions {
        let Some(string) = p.string() else {
            continue;
        };
        let keep = by_string.get(&string).is_none_or(|current| p.bound() < current.bound());
        if keep {
            by_string.insert(string, p);
        }
    }
    let midis: Vec<i32> = by_string.values().rev().map(|p| p.midi()).collect();
    strum_then_arpeggio(&midis)
}

/// Piano chord: one key per degree, from the first root upward.
pub fn piano_chord_preview(positions: &[TaggedPosition]) -> PlaybackPlan {
    let mut sorted: Vec<&TaggedPosition> = positions.iter().collect();
    sorted.sort_by_key(|p| p.midi());
    let degree_count = sorted.iter().map(|p| p.degree).collect::<BTreeSet<_>>().len();

    let mut seen = BTreeSet::new();
    let midis: Vec<i32> = sorted[first_root(&sorted).min(sorted.len())..]
        .iter()
        .filter(|p| seen.insert(p.degree))
        .take(degree_count)
        .map(|p| p.midi())
        .collect();
    strum_then_arpeggio(&midis)
}

/// Plays the completion chime on `sink`. Independent of any preview.
pub fn play_success_chime(sink: &mut dyn VoiceSink) {
    sink.note_on(CHIME_MIDI, CHIME_DURATION, Timbre::Chime);
}

#[derive(Debug, Clone)]
struct QueuedNote {
    generation: u64,
    note: ScheduledNote,
}

/// What one transport tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub started: Vec<i32>,
    pub finished: bool,
}

#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    generation: u64,
    clock: Duration,
    queue: VecDeque<QueuedNote>,
    end_at: Option<Duration>,
    current_note: Option<usize>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn is_playing(&self) -> bool {
        self.end_at.is_some()
    }

    /// Highlight index of the most recently started note.
    pub fn current_note(&self) -> Option<usize> {
        self.current_note
    }

    /// Starts `plan` from time zero, cancelling whatever was playing.
    /// Returns the new generation.
    pub fn play(&mut self, plan: PlaybackPlan, sink: &mut dyn VoiceSink) -> u64 {
        self.stop(sink);
        if plan.is_empty() {
            return self.generation;
        }
        let generation = self.generation;
        let mut notes = plan.notes;
        notes.sort_by_key(|n| n.at);
        self.queue = notes
            .into_iter()
            .map(|note| QueuedNote { generation, note })
            .collect();
        self.clock = Duration::ZERO;
        self.end_at = Some(plan.total);
        debug!("Playback {} scheduled: {} notes over {:?}", generation, self.queue.len(), plan.total);
        generation
    }

    /// Cancels the current playback and silences every voice.
    pub fn stop(&mut self, sink: &mut dyn VoiceSink) {
        self.generation += 1;
        self.queue.clear();
        self.end_at = None;
        self.current_note = None;
        sink.release_all();
    }

    /// Advances the transport by `elapsed` and fires due notes.
    pub fn tick(&mut self, elapsed: Duration, sink: &mut dyn VoiceSink) -> TickReport {
        let mut report = TickReport::default();
        let Some(end_at) = self.end_at else {
            return report;
        };
        self.clock += elapsed;

        while self.queue.front().is_some_and(|q| q.note.at <= self.clock) {
            let Some(queued) = self.queue.pop_front() else {
                break;
            };
            if !self.is_current(queued.generation) {
                continue;
            }
            sink.note_on(queued.note.midi, queued.note.duration, Timbre::Preview);
            if queued.note.highlight.is_some() {
                self.current_note = queued.note.highlight;
            }
            report.started.push(queued.note.midi);
        }

        if self.clock >= end_at {
            self.end_at = None;
            self.current_note = None;
            report.finished = true;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fretboard::NoteGenerator;
    use crate::membership::resolve;
    use crate::note::PitchClass;
    use crate::theory::Selection;
    use crate::tuning::{DEFAULT_TUNING_ID, Instrument, PianoRange, tuning_or_default};

    #[derive(Default)]
    struct RecordingSink {
        played: Vec<(i32, Timbre)>,
        releases: usize,
    }

    impl VoiceSink for RecordingSink {
        fn note_on(&mut self, midi: i32, _duration: Duration, timbre: Timbre) {
            self.played.push((midi, timbre));
        }

        fn release_all(&mut self) {
            self.releases += 1;
        }
    }

    fn tagged(instrument: Instrument, selection: Selection) -> Vec<TaggedPosition> {
        let all = NoteGenerator::new().generate(&instrument).unwrap();
        resolve(&selection, &all)
    }

    fn piano(start: i8, end: i8) -> Instrument {
        Instrument::Keyed(PianoRange::new(start, end).unwrap())
    }

    #[test]
    fn test_scale_preview_up_and_down() {
        let positions = tagged(piano(4, 4), Selection::scale(PitchClass::C, "major").unwrap());
        let plan = scale_preview(&positions, 120);
        assert_eq!(plan.midis(), [60, 62, 64, 65, 67, 69, 71, 69, 67, 65, 64, 62, 60]);
        assert_eq!(plan.notes[1].at, Duration::from_millis(500));
        assert_eq!(plan.total, Duration::from_millis(6500));
    }

    #[test]
    fn test_scale_preview_starts_at_first_root_and_dedupes() {
        // Guitar has many duplicate pitches; A minor pentatonic starts on A2.
        let positions = tagged(
            Instrument::Fretted(tuning_or_default(DEFAULT_TUNING_ID).clone()),
            Selection::scale(PitchClass::A, "minor-pentatonic").unwrap(),
        );
        let plan = scale_preview(&positions, 120);
        let midis = plan.midis();
        assert_eq!(midis[0], 45);
        let top = midis.iter().position(|m| *m == *midis.iter().max().unwrap()).unwrap();
        assert!(midis[..=top].windows(2).all(|w| w[0] < w[1]));
        assert!(midis[top..].windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_guitar_chord_preview() {
        let positions: Vec<TaggedPosition> = tagged(
            Instrument::Fretted(tuning_or_default(DEFAULT_TUNING_ID).clone()),
            Selection::chord(PitchClass::A, "minor").unwrap(),
        )
        .into_iter()
        .filter(|p| (5..=8).contains(&p.bound()))
        .collect();
        let plan = guitar_chord_preview(&positions);

        // Six strings strummed bass first, then six arpeggio notes.
        assert_eq!(plan.notes.len(), 12);
        assert_eq!(plan.notes[0].midi, 45);
        assert_eq!(plan.notes[1].at, Duration::from_millis(20));
        let arpeggio: Vec<i32> = plan.notes[6..].iter().map(|n| n.midi).collect();
        assert!(arpeggio.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(plan.notes[6].at, Duration::from_millis(120 + 1500));
        assert_eq!(plan.total, Duration::from_millis(120 + 1500 + 900 + 500));
    }

    #[test]
    fn test_piano_chord_preview() {
        let positions = tagged(piano(3, 5), Selection::chord(PitchClass::C, "major").unwrap());
        let plan = piano_chord_preview(&positions);
        assert_eq!(plan.notes.len(), 6);
        assert_eq!(&plan.midis()[..3], [48, 52, 55]);
    }

    #[test]
    fn test_empty_previews() {
        assert!(scale_preview(&[], 120).is_empty());
        assert!(guitar_chord_preview(&[]).is_empty());
        assert!(piano_chord_preview(&[]).is_empty());
    }

    #[test]
    fn test_tick_fires_due_notes_and_highlights() {
        let positions = tagged(piano(4, 4), Selection::scale(PitchClass::C, "major").unwrap());
        let mut sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.play(scale_preview(&positions, 120), &mut sink);
        assert!(scheduler.is_playing());

        let report = scheduler.tick(Duration::ZERO, &mut sink);
        assert_eq!(report.started, [60]);
        assert_eq!(scheduler.current_note(), Some(0));

        let report = scheduler.tick(Duration::from_millis(1000), &mut sink);
        assert_eq!(report.started, [62, 64]);
        assert_eq!(scheduler.current_note(), Some(2));

        let report = scheduler.tick(Duration::from_secs(10), &mut sink);
        assert!(report.finished);
        assert!(!scheduler.is_playing());
        assert_eq!(sink.played.len(), 13);
    }

    #[test]
    fn test_new_playback_cancels_old_generation() {
        let scale = tagged(piano(4, 4), Selection::scale(PitchClass::C, "major").unwrap());
        let chord = tagged(piano(3, 3), Selection::chord(PitchClass::C, "major").unwrap());
        let mut sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();

        let first = scheduler.play(scale_preview(&scale, 120), &mut sink);
        scheduler.tick(Duration::from_millis(600), &mut sink);
        let releases_before = sink.releases;

        let second = scheduler.play(piano_chord_preview(&chord), &mut sink);
        assert!(second > first);
        assert!(!scheduler.is_current(first));
        assert_eq!(sink.releases, releases_before + 1);
        assert_eq!(scheduler.current_note(), None);

        let report = scheduler.tick(Duration::ZERO, &mut sink);
        assert_eq!(report.started, [48]);
        assert_eq!(scheduler.current_note(), None);
    }

    #[test]
    fn test_stop_releases_voices() {
        let scale = tagged(piano(4, 4), Selection::scale(PitchClass::C, "major").unwrap());
        let mut sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.play(scale_preview(&scale, 120), &mut sink);
        scheduler.stop(&mut sink);
        assert!(!scheduler.is_playing());
        assert!(scheduler.tick(Duration::from_secs(5), &mut sink).started.is_empty());
    }

    #[test]
    fn test_chime() {
        let mut sink = RecordingSink::default();
        play_success_chime(&mut sink);
        assert_eq!(sink.played, [(CHIME_MIDI, Timbre::Chime)]);
    }
}
