//! # Practice Engine
//!
//! Wires the pipeline together:
//!
//! `instrument -> positions -> tagged -> windows -> filtered view -> sequence`
//!
//! and keeps every stage current as preferences change. A setter only
//! recomputes the stages downstream of what it touched: a tuning change
//! regenerates positions, a root or scale change re-resolves membership from
//! the cached positions, a window change only refilters. Every preference
//! change is published on the event bus with its old and new value.

use std::collections::BTreeSet;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::clustering::{PositionWindow, windows_for};
use crate::error::Result;
use crate::events::{ChangeOrigin, EventBus, StateChange};
use crate::filter::{FilteredView, NoteRange, apply_window};
use crate::fretboard::{NoteGenerator, NotePosition};
use crate::membership::{TaggedPosition, resolve};
use crate::note::PitchClass;
use crate::practice::{
    Direction, MatchOutcome, NoteChangeFilter, PracticeSequence, PracticeSequencer, PracticeState,
    SessionRecord,
};
use crate::preferences::{PracticeMode, Preferences};
use crate::quantize::QuantizedNote;
use crate::theory::{Selection, find_chord, find_scale};
use crate::tuning::{CUSTOM_TUNING_ID, Instrument, InstrumentKind, PianoRange, STRING_COUNT, Tuning};
use crate::voicings::{Voicing, lookup_voicings, voicing_view};

/// What one analysis frame did to the practice run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// A newly played note, after held-note suppression.
    pub played: Option<PitchClass>,
    pub outcome: Option<MatchOutcome>,
    /// Set exactly once per completed run.
    pub record: Option<SessionRecord>,
}

pub struct PracticeEngine {
    preferences: Preferences,
    bus: EventBus,
    generator: NoteGenerator,
    custom_tuning: Option<Tuning>,
    instrument: Instrument,
    selection: Selection,
    positions: Arc<Vec<NotePosition>>,
    tagged: Vec<TaggedPosition>,
    /// Charted fingerings; when present they replace the computed windows.
    voicings: Vec<Voicing>,
    windows: Vec<PositionWindow>,
    view: FilteredView,
    sequencer: PracticeSequencer,
    note_filter: NoteChangeFilter,
    listening: bool,
    track_scale_id: Option<u64>,
}

fn selection_for(preferences: &Preferences) -> Result<Selection> {
    match preferences.mode {
        PracticeMode::Scales => Selection::scale(preferences.selected_root, &preferences.selected_scale_id),
        PracticeMode::Chords => Selection::chord(preferences.selected_root, &preferences.selected_chord_id),
    }
}

impl PracticeEngine {
    /// Builds every stage from `preferences`. Configuration errors (unknown
    /// scale, bad octave range) are returned as-is.
    pub fn new(preferences: Preferences) -> Result<Self> {
        let instrument = preferences.to_instrument()?;
        let selection = selection_for(&preferences)?;
        let mut engine = Self {
            preferences,
            bus: EventBus::new(),
            generator: NoteGenerator::new(),
            custom_tuning: None,
            instrument,
            selection,
            positions: Arc::new(Vec::new()),
            tagged: Vec::new(),
            voicings: Vec::new(),
            windows: Vec::new(),
            view: FilteredView::default(),
            sequencer: PracticeSequencer::new(),
            note_filter: NoteChangeFilter::default(),
            listening: false,
            track_scale_id: None,
        };
        engine.regenerate()?;
        Ok(engine)
    }

    pub fn subscribe(&mut self) -> Receiver<StateChange> {
        self.bus.subscribe()
    }

    /// Restores stored preferences. Keys that are unknown, malformed or name
    /// a catalog entry that no longer exists are ignored.
    pub fn hydrate(&mut self, partial: &Map<String, Value>) -> Result<Vec<String>> {
        let old = self.preferences.clone();
        let mut next = old.clone();
        let applied = next.hydrate(partial);

        let defaults = Preferences::default();
        if find_scale(&next.selected_scale_id).is_err() {
            warn!("Stored scale '{}' is unknown; using default", next.selected_scale_id);
            next.selected_scale_id = defaults.selected_scale_id.clone();
        }
        if find_chord(&next.selected_chord_id).is_err() {
            warn!("Stored chord '{}' is unknown; using default", next.selected_chord_id);
            next.selected_chord_id = defaults.selected_chord_id.clone();
        }
        if PianoRange::new(next.piano_start_octave, next.piano_end_octave).is_err() {
            warn!(
                "Stored octave range {}..={} is invalid; using default",
                next.piano_start_octave, next.piano_end_octave
            );
            next.piano_start_octave = defaults.piano_start_octave;
            next.piano_end_octave = defaults.piano_end_octave;
        }

        self.preferences = next;
        for change in Preferences::changes(&old, &self.preferences, ChangeOrigin::Hydration) {
            self.bus.publish(change);
        }
        self.regenerate()?;
        info!("Hydrated {} preference(s)", applied.len());
        Ok(applied)
    }

    fn update(&mut self, edit: impl FnOnce(&mut Preferences)) -> bool {
        let old = self.preferences.clone();
        edit(&mut self.preferences);
        let changes = Preferences::changes(&old, &self.preferences, ChangeOrigin::User);
        let changed = !changes.is_empty();
        for change in changes {
            self.bus.publish(change);
        }
        changed
    }

    fn build_instrument(&self) -> Result<Instrument> {
        match (&self.custom_tuning, self.preferences.instrument_kind()) {
            (Some(custom), InstrumentKind::Guitar) if self.preferences.selected_tuning_id == CUSTOM_TUNING_ID => {
                Ok(Instrument::Fretted(custom.clone()))
            }
            _ => self.preferences.to_instrument(),
        }
    }

    /// Instrument changed: positions, then everything downstream.
    fn regenerate(&mut self) -> Result<()> {
        self.instrument = self.build_instrument()?;
        self.positions = self.generator.generate(&self.instrument)?;
        self.reresolve()
    }

    /// Selection changed: membership, windows, then everything downstream.
    fn reresolve(&mut self) -> Result<()> {
        self.selection = selection_for(&self.preferences)?;
        self.tagged = resolve(&self.selection, &self.positions);
        self.voicings = lookup_voicings(&self.selection, &self.instrument, &self.tagged).unwrap_or_default();
        self.windows = if self.voicings.is_empty() {
            windows_for(&self.selection, self.instrument.kind(), &self.tagged)
        } else {
            self.voicings.iter().map(|v| v.window.clone()).collect()
        };
        debug!(
            "{} {}: {} tagged positions, {} windows",
            self.selection.root(),
            self.selection.id(),
            self.tagged.len(),
            self.windows.len()
        );
        self.refilter();
        Ok(())
    }

    fn refilter(&mut self) {
        self.view = if self.voicings.is_empty() {
            apply_window(
                &self.selection,
                self.instrument.kind(),
                &self.tagged,
                &self.windows,
                self.preferences.selected_position,
                self.preferences.note_range_mode,
            )
        } else {
            voicing_view(&self.voicings, self.preferences.selected_position)
        };
        self.restart_practice();
    }

    fn restart_practice(&mut self) {
        self.note_filter.reset();
        if !self.listening {
            self.sequencer.reset();
            return;
        }
        match self.current_sequence() {
            Some(sequence) => self.sequencer.start(sequence),
            None => self.sequencer.reset(),
        }
    }

    /// The sequence the current view and practice settings produce.
    pub fn current_sequence(&self) -> Option<PracticeSequence> {
        PracticeSequence::build(
            &self.view.positions,
            self.preferences.practice_direction,
            self.preferences.octave_repeats,
        )
    }

    pub fn set_root(&mut self, root: PitchClass) -> Result<()> {
        if self.update(|p| {
            p.selected_root = root;
            p.selected_position = None;
        }) {
            self.reresolve()?;
        }
        Ok(())
    }

    pub fn set_mode(&mut self, mode: PracticeMode) -> Result<()> {
        if self.update(|p| {
            p.mode = mode;
            p.selected_position = None;
        }) {
            self.reresolve()?;
        }
        Ok(())
    }

    pub fn set_scale(&mut self, id: &str) -> Result<()> {
        find_scale(id)?;
        if self.update(|p| {
            p.mode = PracticeMode::Scales;
            p.selected_scale_id = id.to_string();
            p.selected_position = None;
        }) {
            self.reresolve()?;
        }
        Ok(())
    }

    pub fn set_chord(&mut self, id: &str) -> Result<()> {
        find_chord(id)?;
        if self.update(|p| {
            p.mode = PracticeMode::Chords;
            p.selected_chord_id = id.to_string();
            p.selected_position = None;
        }) {
            self.reresolve()?;
        }
        Ok(())
    }

    /// Selects a preset tuning; unknown ids fall back to standard.
    pub fn set_tuning(&mut self, id: &str) -> Result<()> {
        if self.update(|p| {
            p.selected_tuning_id = id.to_string();
            p.selected_position = None;
        }) {
            self.regenerate()?;
        }
        Ok(())
    }

    /// Switches to a user-edited tuning, rejecting it if any string fails
    /// to parse.
    pub fn set_custom_tuning(&mut self, strings: [String; STRING_COUNT]) -> Result<()> {
        self.custom_tuning = Some(Tuning::custom(strings)?);
        self.update(|p| {
            p.selected_tuning_id = CUSTOM_TUNING_ID.to_string();
            p.selected_position = None;
        });
        self.regenerate()
    }

    pub fn set_instrument(&mut self, kind: InstrumentKind) -> Result<()> {
        if self.update(|p| {
            p.instrument = Some(kind);
            p.selected_position = None;
        }) {
            self.regenerate()?;
        }
        Ok(())
    }

    pub fn set_piano_range(&mut self, start_octave: i8, end_octave: i8) -> Result<()> {
        PianoRange::new(start_octave, end_octave)?;
        if self.update(|p| {
            p.piano_start_octave = start_octave;
            p.piano_end_octave = end_octave;
            p.selected_position = None;
        }) {
            self.regenerate()?;
        }
        Ok(())
    }

    /// Selects a window by index; `None` or an index past the catalog means
    /// the whole instrument.
    pub fn set_window(&mut self, index: Option<usize>) {
        if self.update(|p| p.selected_position = index) {
            self.refilter();
        }
    }

    pub fn set_note_range(&mut self, mode: NoteRange) {
        if self.update(|p| p.note_range_mode = mode) {
            self.refilter();
        }
    }

    pub fn set_direction(&mut self, direction: Direction) {
        if self.update(|p| p.practice_direction = direction) {
            self.restart_practice();
        }
    }

    pub fn set_octave_repeats(&mut self, repeats: u32) {
        if self.update(|p| p.octave_repeats = repeats.max(1)) {
            self.restart_practice();
        }
    }

    pub fn set_genre(&mut self, genre_id: Option<String>) {
        self.update(|p| p.selected_genre_id = genre_id);
    }

    pub fn set_playback_bpm(&mut self, bpm: u32) {
        self.update(|p| p.playback_bpm = bpm.clamp(20, 300));
    }

    pub fn set_min_clarity(&mut self, min_clarity: f32) {
        self.update(|p| p.min_clarity = min_clarity.clamp(0.0, 1.0));
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.update(|p| p.smoothing = smoothing.clamp(0.0, 0.99));
    }

    pub fn set_audio_input(&mut self, config: crate::audio::AudioInputConfig) {
        self.update(|p| p.audio_input = config);
    }

    /// Learning-track context attached to session records. Not a preference.
    pub fn set_track_scale_id(&mut self, id: Option<u64>) {
        self.track_scale_id = id;
    }

    pub fn start_listening(&mut self) {
        self.listening = true;
        self.restart_practice();
    }

    pub fn stop_listening(&mut self) {
        self.listening = false;
        self.restart_practice();
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Feeds one analysis frame's detection (or its absence).
    pub fn on_frame(&mut self, detected: Option<&QuantizedNote>) -> FrameReport {
        let mut report = FrameReport::default();
        if !self.listening {
            return report;
        }
        let Some(played) = self.note_filter.accept(detected.map(|n| n.pitch_class)) else {
            return report;
        };
        report.played = Some(played);

        let outcome = self.sequencer.match_note(played);
        report.outcome = Some(outcome);
        if outcome == MatchOutcome::Complete {
            report.record = self.session_record();
        }
        report
    }

    fn session_record(&self) -> Option<SessionRecord> {
        let sequence = self.sequencer.sequence()?;
        let (notes_hit, total_notes) = self.sequencer.progress();
        Some(SessionRecord {
            scale_or_chord_id: self.selection.id().to_string(),
            root_note: self.selection.root(),
            tuning_id: self.instrument.tuning_id().map(str::to_string),
            instrument: self.instrument.kind(),
            completed: true,
            duration_ms: self.sequencer.elapsed().map(|d| d.as_millis() as u64),
            total_notes,
            notes_hit,
            genre_id: self.preferences.selected_genre_id.clone(),
            octaves: sequence.octave_repeats,
            track_scale_id: self.track_scale_id,
        })
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Every generated position, for dimmed display.
    pub fn positions(&self) -> &[NotePosition] {
        &self.positions
    }

    pub fn tagged(&self) -> &[TaggedPosition] {
        &self.tagged
    }

    pub fn windows(&self) -> &[PositionWindow] {
        &self.windows
    }

    pub fn view(&self) -> &FilteredView {
        &self.view
    }

    /// Charted fingerings for the current chord; empty when the windows
    /// come from the clustering search.
    pub fn voicings(&self) -> &[Voicing] {
        &self.voicings
    }

    pub fn sequencer(&self) -> &PracticeSequencer {
        &self.sequencer
    }

    pub fn practice_state(&self) -> PracticeState {
        self.sequencer.state()
    }

    pub fn hit_degrees(&self) -> BTreeSet<u8> {
        self.sequencer.hit_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::quantize;
    use crate::note::midi_to_frequency;
    use serde_json::json;

    fn note(midi: i32) -> QuantizedNote {
        quantize(midi_to_frequency(midi), 0.95).unwrap()
    }

    fn engine() -> PracticeEngine {
        PracticeEngine::new(Preferences::default()).unwrap()
    }

    #[test]
    fn test_initial_pipeline() {
        let engine = engine();
        assert_eq!(engine.positions().len(), 138);
        assert_eq!(engine.windows()[0].label, "Position 1");
        assert_eq!(engine.view().positions.len(), engine.tagged().len());
        assert_eq!(engine.practice_state(), PracticeState::Inactive);
    }

    #[test]
    fn test_root_change_keeps_position_cache() {
        let mut engine = engine();
        let before = Arc::clone(&engine.positions);
        engine.set_window(Some(1));
        engine.set_root(PitchClass::G).unwrap();
        assert!(Arc::ptr_eq(&before, &engine.positions));
        assert_eq!(engine.preferences().selected_position, None);
        assert_eq!(engine.selection().root(), PitchClass::G);

        engine.set_tuning("drop-d").unwrap();
        assert!(!Arc::ptr_eq(&before, &engine.positions));
    }

    #[test]
    fn test_setters_publish_changes() {
        let mut engine = engine();
        let events = engine.subscribe();
        engine.set_playback_bpm(90);
        engine.set_playback_bpm(90);
        engine.set_scale("dorian").unwrap();

        let changes: Vec<StateChange> = events.try_iter().collect();
        assert_eq!(changes[0].key, "playbackBpm");
        assert_eq!(changes[0].old, json!(120));
        assert_eq!(changes[0].new, json!(90));
        assert!(changes.iter().all(|c| c.origin == ChangeOrigin::User));
        assert!(changes.iter().any(|c| c.key == "selectedScaleId" && c.new == json!("dorian")));
        assert_eq!(changes.iter().filter(|c| c.key == "playbackBpm").count(), 1);
    }

    #[test]
    fn test_unknown_scale_is_rejected_without_side_effects() {
        let mut engine = engine();
        let events = engine.subscribe();
        assert!(engine.set_scale("nope").is_err());
        assert_eq!(engine.preferences().selected_scale_id, "major");
        assert_eq!(events.try_iter().count(), 0);
    }

    #[test]
    fn test_hydrate_marks_changes_and_sanitizes() {
        let mut engine = engine();
        let events = engine.subscribe();
        let map = match json!({
            "selectedRoot": "A",
            "selectedScaleId": "gone",
            "mode": "chords",
            "selectedChordId": "minor",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        engine.hydrate(&map).unwrap();

        assert_eq!(engine.preferences().selected_scale_id, "major");
        assert!(engine.selection().is_chord());
        assert_eq!(engine.selection().root(), PitchClass::A);
        // The open A minor shape is the lowest charted voicing.
        assert_eq!(engine.windows()[0].label, "Voicing 1");
        assert_eq!((engine.windows()[0].start, engine.windows()[0].end), (1, 2));
        assert!(engine.windows().iter().any(|w| w.start == 5));
        assert!(events.try_iter().all(|c| c.origin == ChangeOrigin::Hydration));
    }

    #[test]
    fn test_custom_tuning() {
        let mut engine = engine();
        let bad = ["E4", "B3", "G3", "D3", "A2", "X"].map(String::from);
        assert!(engine.set_custom_tuning(bad).is_err());
        assert_eq!(engine.preferences().selected_tuning_id, "standard");

        let open_c = ["E4", "C4", "G3", "C3", "G2", "C2"].map(String::from);
        engine.set_custom_tuning(open_c).unwrap();
        assert_eq!(engine.instrument().tuning_id(), Some(CUSTOM_TUNING_ID));
        assert_eq!(engine.positions()[5 * 23].midi, 36);
    }

    #[test]
    fn test_standard_tuning_chords_use_charted_voicings() {
        let mut engine = engine();
        engine.set_chord("major").unwrap();
        assert!(!engine.voicings().is_empty());
        assert_eq!(engine.windows().len(), engine.voicings().len());

        let open_c = engine
            .voicings()
            .iter()
            .position(|v| (v.window.start, v.window.end) == (1, 3))
            .unwrap();
        engine.set_window(Some(open_c));
        let strings: BTreeSet<u8> = engine.view().positions.iter().filter_map(|p| p.string()).collect();
        assert_eq!(strings.len(), 5);
        assert_eq!(engine.view().positions.len(), 5);

        // No chart for drop D: back to the clustering search over all tones.
        engine.set_window(None);
        engine.set_tuning("drop-d").unwrap();
        assert!(engine.voicings().is_empty());
        assert!(engine.windows().iter().all(|w| w.label.starts_with("Voicing")));
        assert_eq!(engine.view().positions.len(), engine.tagged().len());
    }

    #[test]
    fn test_piano_pipeline() {
        let mut engine = engine();
        engine.set_instrument(InstrumentKind::Piano).unwrap();
        assert_eq!(engine.positions().len(), 48);
        assert!(engine.windows().is_empty());
        engine.set_chord("major").unwrap();
        assert_eq!(engine.windows().len(), 4);
        assert!(engine.set_piano_range(6, 2).is_err());
    }

    #[test]
    fn test_frames_drive_practice_and_emit_one_record() {
        let mut engine = engine();
        assert_eq!(engine.on_frame(Some(&note(60))), FrameReport::default());

        engine.start_listening();
        assert_eq!(engine.practice_state(), PracticeState::InProgress { step: 0 });

        let mut records = Vec::new();
        for midi in [48, 50, 52, 53, 55, 57, 59, 60] {
            // Held for several frames, then a gap.
            for _ in 0..3 {
                if let Some(record) = engine.on_frame(Some(&note(midi))).record {
                    records.push(record);
                }
            }
            engine.on_frame(None);
        }
        assert_eq!(engine.practice_state(), PracticeState::Complete);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.scale_or_chord_id, "major");
        assert_eq!(record.root_note, PitchClass::C);
        assert_eq!(record.tuning_id.as_deref(), Some("standard"));
        assert_eq!(record.total_notes, 8);
        assert_eq!(record.notes_hit, 8);
        assert_eq!(engine.hit_degrees().len(), 7);

        // Holding the final C does not restart; a fresh C after silence does.
        assert!(engine.on_frame(Some(&note(60))).outcome.is_none());
        for _ in 0..12 {
            engine.on_frame(None);
        }
        let report = engine.on_frame(Some(&note(48)));
        assert_eq!(report.outcome, Some(MatchOutcome::Restart));
        assert_eq!(engine.practice_state(), PracticeState::InProgress { step: 1 });
    }

    #[test]
    fn test_direction_change_restarts_run() {
        let mut engine = engine();
        engine.start_listening();
        engine.on_frame(Some(&note(48)));
        engine.on_frame(Some(&note(50)));
        assert_eq!(engine.practice_state(), PracticeState::InProgress { step: 2 });

        engine.set_direction(Direction::Descending);
        assert_eq!(engine.practice_state(), PracticeState::InProgress { step: 0 });
        let sequence = engine.sequencer().sequence().unwrap();
        assert_eq!(sequence.pitch_classes()[1], PitchClass::B);

        engine.stop_listening();
        assert_eq!(engine.practice_state(), PracticeState::Inactive);
    }
}
