//! # Preferences
//!
//! The flat, persisted view of everything the learner can tune. Stored as a
//! camelCase JSON object; restoring from a partial or outdated object keeps
//! defaults for anything missing, unknown or malformed.
//!
//! [`PreferencePersister`] listens on the event bus and writes the current
//! preferences one debounce interval after the last user change. Changes
//! published while hydrating are ignored.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::audio::AudioInputConfig;
use crate::error::PluckyError;
use crate::events::{ChangeOrigin, StateChange};
use crate::filter::NoteRange;
use crate::fft::DEFAULT_SMOOTHING;
use crate::note::PitchClass;
use crate::playback::DEFAULT_BPM;
use crate::practice::Direction;
use crate::quantize::DEFAULT_MIN_CLARITY;
use crate::tuning::{DEFAULT_TUNING_ID, Instrument, InstrumentKind, PianoRange, tuning_or_default};

pub const SAVE_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PracticeMode {
    #[default]
    Scales,
    Chords,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub mode: PracticeMode,
    pub selected_root: PitchClass,
    pub selected_scale_id: String,
    pub selected_chord_id: String,
    pub selected_tuning_id: String,
    pub selected_genre_id: Option<String>,
    pub show_all_notes: bool,
    pub note_range_mode: NoteRange,
    pub practice_direction: Direction,
    pub octave_repeats: u32,
    pub selected_position: Option<usize>,
    pub instrument: Option<InstrumentKind>,
    pub piano_start_octave: i8,
    pub piano_end_octave: i8,
    pub playback_bpm: u32,
    pub min_clarity: f32,
    pub smoothing: f32,
    pub audio_input: AudioInputConfig,
}

impl Default for Preferences {
    fn default() -> Self {
        let piano = PianoRange::default();
        Self {
            mode: PracticeMode::Scales,
            selected_root: PitchClass::C,
            selected_scale_id: "major".to_string(),
            selected_chord_id: "major".to_string(),
            selected_tuning_id: DEFAULT_TUNING_ID.to_string(),
            selected_genre_id: None,
            show_all_notes: false,
            note_range_mode: NoteRange::All,
            practice_direction: Direction::Ascending,
            octave_repeats: 1,
            selected_position: None,
            instrument: None,
            piano_start_octave: piano.start_octave,
            piano_end_octave: piano.end_octave,
            playback_bpm: DEFAULT_BPM,
            min_clarity: DEFAULT_MIN_CLARITY,
            smoothing: DEFAULT_SMOOTHING,
            audio_input: AudioInputConfig::default(),
        }
    }
}

fn to_object(prefs: &Preferences) -> Map<String, Value> {
    match serde_json::to_value(prefs) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

impl Preferences {
    /// Applies every key of `partial` that is known and deserializes;
    /// returns the keys that were applied.
    pub fn hydrate(&mut self, partial: &Map<String, Value>) -> Vec<String> {
        let mut applied = Vec::new();
        for (key, value) in partial {
            let mut candidate = to_object(self);
            if !candidate.contains_key(key) {
                warn!("Ignoring unknown preference '{}'", key);
                continue;
            }
            candidate.insert(key.clone(), value.clone());
            match serde_json::from_value::<Preferences>(Value::Object(candidate)) {
                Ok(next) => {
                    *self = next;
                    applied.push(key.clone());
                }
                Err(e) => warn!("Ignoring invalid preference '{}': {}", key, e),
            }
        }
        applied
    }

    /// Per-key differences between two snapshots.
    pub fn changes(old: &Preferences, new: &Preferences, origin: ChangeOrigin) -> Vec<StateChange> {
        let old = to_object(old);
        let new = to_object(new);
        new.into_iter()
            .filter_map(|(key, new_value)| {
                let old_value = old.get(&key).cloned().unwrap_or(Value::Null);
                (old_value != new_value).then_some(StateChange {
                    key,
                    old: old_value,
                    new: new_value,
                    origin,
                })
            })
            .collect()
    }

    pub fn instrument_kind(&self) -> InstrumentKind {
        self.instrument.unwrap_or(InstrumentKind::Guitar)
    }

    /// The instrument described by these preferences. Unknown tuning ids
    /// fall back to standard tuning.
    pub fn to_instrument(&self) -> std::result::Result<Instrument, PluckyError> {
        Ok(match self.instrument_kind() {
            InstrumentKind::Guitar => Instrument::Fretted(tuning_or_default(&self.selected_tuning_id).clone()),
            InstrumentKind::Piano => {
                Instrument::Keyed(PianoRange::new(self.piano_start_octave, self.piano_end_octave)?)
            }
        })
    }
}

/// Where preferences live between runs.
pub trait PreferenceStore {
    /// The stored object, or `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<Map<String, Value>>>;
    fn save(&mut self, preferences: &Preferences) -> Result<()>;
}

/// Pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonFileStore {
    fn load(&self) -> Result<Option<Map<String, Value>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("reading preferences from {}", self.path.display()))?;
        match serde_json::from_str::<Value>(&data)
            .with_context(|| format!("parsing preferences in {}", self.path.display()))?
        {
            Value::Object(map) => Ok(Some(map)),
            _ => {
                warn!("Preference file {} is not a JSON object; ignoring it", self.path.display());
                Ok(None)
            }
        }
    }

    fn save(&mut self, preferences: &Preferences) -> Result<()> {
        let json_string = serde_json::to_string_pretty(preferences)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&self.path, json_string)
            .with_context(|| format!("writing preferences to {}", self.path.display()))?;
        info!("Preferences saved to {}", self.path.display());
        Ok(())
    }
}

/// Debounced writer fed by state-change events.
pub struct PreferencePersister<S> {
    events: Receiver<StateChange>,
    store: S,
    debounce: Duration,
    deadline: Option<Instant>,
}

impl<S: PreferenceStore> PreferencePersister<S> {
    pub fn new(events: Receiver<StateChange>, store: S) -> Self {
        Self::with_debounce(events, store, SAVE_DEBOUNCE)
    }

    pub fn with_debounce(events: Receiver<StateChange>, store: S, debounce: Duration) -> Self {
        Self {
            events,
            store,
            debounce,
            deadline: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn has_pending_save(&self) -> bool {
        self.deadline.is_some()
    }

    /// Drains pending events and saves `current` once the debounce interval
    /// since the last user change has passed. Returns whether it saved.
    pub fn pump(&mut self, now: Instant, current: &Preferences) -> Result<bool> {
        for change in self.events.try_iter() {
            if change.origin == ChangeOrigin::Hydration {
                continue;
            }
            debug!("Preference '{}' changed: {} -> {}", change.key, change.old, change.new);
            self.deadline = Some(now + self.debounce);
        }

        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.store.save(current)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Saves immediately if a save is pending.
    pub fn flush(&mut self, current: &Preferences) -> Result<bool> {
        for change in self.events.try_iter() {
            if change.origin == ChangeOrigin::User {
                self.deadline = Some(Instant::now());
            }
        }
        if self.deadline.take().is_some() {
            self.store.save(current)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use serde_json::json;

    #[derive(Default)]
    struct MemoryStore {
        saved: Vec<Preferences>,
    }

    impl PreferenceStore for MemoryStore {
        fn load(&self) -> Result<Option<Map<String, Value>>> {
            Ok(self.saved.last().map(to_object))
        }

        fn save(&mut self, preferences: &Preferences) -> Result<()> {
            self.saved.push(preferences.clone());
            Ok(())
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_hydrate_ignores_unknown_and_invalid_keys() {
        let mut prefs = Preferences::default();
        let applied = prefs.hydrate(&object(json!({
            "selectedRoot": "F#",
            "practiceDirection": "descending",
            "playbackBpm": "fast",
            "theme": "dark",
            "selectedPosition": 2,
        })));

        assert_eq!(prefs.selected_root, PitchClass::FSharp);
        assert_eq!(prefs.practice_direction, Direction::Descending);
        assert_eq!(prefs.playback_bpm, DEFAULT_BPM);
        assert_eq!(prefs.selected_position, Some(2));
        let mut applied = applied;
        applied.sort();
        assert_eq!(applied, ["practiceDirection", "selectedPosition", "selectedRoot"]);
    }

    #[test]
    fn test_hydrate_nested_audio_input() {
        let mut prefs = Preferences::default();
        prefs.hydrate(&object(json!({
            "audioInput": {"selectedDeviceId": "usb", "selectedChannel": 1},
            "noteRangeMode": "rootToRoot",
        })));
        assert_eq!(prefs.audio_input.selected_device_id.as_deref(), Some("usb"));
        assert_eq!(prefs.audio_input.selected_channel, Some(1));
        assert_eq!(prefs.note_range_mode, NoteRange::RootToRoot);
    }

    #[test]
    fn test_changes_report_old_and_new() {
        let old = Preferences::default();
        let mut new = old.clone();
        new.playback_bpm = 90;
        new.selected_scale_id = "dorian".into();

        let mut changes = Preferences::changes(&old, &new, ChangeOrigin::User);
        changes.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].key, "playbackBpm");
        assert_eq!(changes[0].old, json!(120));
        assert_eq!(changes[0].new, json!(90));
        assert_eq!(changes[1].new, json!("dorian"));
    }

    #[test]
    fn test_instrument_from_preferences() {
        let mut prefs = Preferences::default();
        assert_eq!(prefs.to_instrument().unwrap().kind(), InstrumentKind::Guitar);
        prefs.instrument = Some(InstrumentKind::Piano);
        prefs.piano_start_octave = 5;
        prefs.piano_end_octave = 2;
        assert!(prefs.to_instrument().is_err());
    }

    #[test]
    fn test_persister_debounces() {
        let mut bus = EventBus::new();
        let mut persister = PreferencePersister::new(bus.subscribe(), MemoryStore::default());
        let prefs = Preferences::default();
        let t0 = Instant::now();

        let mut edited = prefs.clone();
        edited.playback_bpm = 100;
        for change in Preferences::changes(&prefs, &edited, ChangeOrigin::User) {
            bus.publish(change);
        }
        assert!(!persister.pump(t0, &edited).unwrap());
        assert!(persister.has_pending_save());

        // A second change inside the window pushes the save out.
        edited.playback_bpm = 110;
        for change in Preferences::changes(&prefs, &edited, ChangeOrigin::User) {
            bus.publish(change);
        }
        assert!(!persister.pump(t0 + Duration::from_millis(800), &edited).unwrap());
        assert!(!persister.pump(t0 + Duration::from_millis(1500), &edited).unwrap());
        assert!(persister.pump(t0 + Duration::from_millis(1800), &edited).unwrap());

        assert_eq!(persister.store().saved.len(), 1);
        assert_eq!(persister.store().saved[0].playback_bpm, 110);
        assert!(!persister.pump(t0 + Duration::from_secs(5), &edited).unwrap());
    }

    #[test]
    fn test_persister_ignores_hydration() {
        let mut bus = EventBus::new();
        let mut persister = PreferencePersister::new(bus.subscribe(), MemoryStore::default());
        let prefs = Preferences::default();
        let mut restored = prefs.clone();
        restored.selected_root = PitchClass::G;
        for change in Preferences::changes(&prefs, &restored, ChangeOrigin::Hydration) {
            bus.publish(change);
        }
        let later = Instant::now() + Duration::from_secs(10);
        assert!(!persister.pump(later, &restored).unwrap());
        assert!(!persister.flush(&restored).unwrap());
        assert!(persister.store().saved.is_empty());
    }

    #[test]
    fn test_json_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("plucky-prefs-{}", std::process::id()));
        let path = dir.join("preferences.json");
        let mut store = JsonFileStore::new(&path);
        assert!(store.load().unwrap().is_none());

        let mut prefs = Preferences::default();
        prefs.selected_tuning_id = "drop-d".into();
        prefs.octave_repeats = 2;
        store.save(&prefs).unwrap();

        let mut restored = Preferences::default();
        restored.hydrate(&store.load().unwrap().unwrap());
        assert_eq!(restored, prefs);

        fs::remove_dir_all(&dir).unwrap();
    }
}
