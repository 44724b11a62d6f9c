use std::cell::RefCell;
use std::collections::BTreeSet;
use std::f32::consts::PI;
use std::rc::Rc;

use crossbeam_channel::Sender;
use plucky_core::audio::{AudioInputConfig, BUFFER_SIZE, DeviceRequest, InputBackend, InputStream};
use plucky_core::note::midi_to_frequency;
use plucky_core::pitch::YinEstimator;
use plucky_core::quantize::quantize;
use plucky_core::session::Notice;
use plucky_core::{
    AudioError, AudioSession, MatchOutcome, PitchClass, PracticeEngine, PracticeState,
};
use plucky_core::preferences::Preferences;

const SAMPLE_RATE: u32 = 44100;

struct Stream {
    name: String,
}

impl InputStream for Stream {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn device_name(&self) -> &str {
        &self.name
    }
}

/// Exact requests fail with `exact_error`; the default device always opens.
#[derive(Default)]
struct Backend {
    exact_error: Option<AudioError>,
    sender: Rc<RefCell<Option<Sender<Vec<f32>>>>>,
}

impl InputBackend for Backend {
    fn open(
        &mut self,
        request: &DeviceRequest,
        _config: &AudioInputConfig,
        sender: Sender<Vec<f32>>,
    ) -> Result<Box<dyn InputStream>, AudioError> {
        let name = match request {
            DeviceRequest::Default => "default".to_string(),
            DeviceRequest::Exact(id) => match &self.exact_error {
                Some(err) => return Err(err.clone()),
                None => id.clone(),
            },
        };
        *self.sender.borrow_mut() = Some(sender);
        Ok(Box::new(Stream { name }))
    }
}

fn sine(frequency: f32) -> Vec<f32> {
    (0..BUFFER_SIZE)
        .map(|i| 0.5 * (2.0 * PI * frequency * i as f32 / SAMPLE_RATE as f32).sin())
        .collect()
}

fn play(engine: &mut PracticeEngine, midis: &[i32]) -> Vec<MatchOutcome> {
    midis
        .iter()
        .filter_map(|&midi| {
            let note = quantize(midi_to_frequency(midi), 0.95).unwrap();
            engine.on_frame(Some(&note)).outcome
        })
        .collect()
}

const C_MAJOR_UP: [i32; 8] = [48, 50, 52, 53, 55, 57, 59, 60];

#[test]
fn scenario_a_first_position_of_c_major() {
    let engine = PracticeEngine::new(Preferences::default()).unwrap();
    let first = &engine.windows()[0];
    assert_eq!(first.label, "Position 1");
    assert!(first.start >= 0 && first.end <= 5);

    let degrees: BTreeSet<u8> = engine
        .tagged()
        .iter()
        .filter(|p| first.contains(p.bound()))
        .map(|p| p.degree)
        .collect();
    assert_eq!(degrees.len(), 7);
}

#[test]
fn scenario_b_ascending_run_completes_once() {
    let mut engine = PracticeEngine::new(Preferences::default()).unwrap();
    engine.start_listening();

    let sequence = engine.sequencer().sequence().unwrap();
    use PitchClass::*;
    assert_eq!(sequence.pitch_classes(), [C, D, E, F, G, A, B, C]);
    assert_eq!(engine.practice_state(), PracticeState::InProgress { step: 0 });

    let outcomes = play(&mut engine, &C_MAJOR_UP[..7]);
    assert!(outcomes.iter().all(|o| *o == MatchOutcome::Hit));
    assert!(!engine.sequencer().hits().iter().all(|h| *h));

    let report = engine.on_frame(quantize(midi_to_frequency(60), 0.95).as_ref());
    assert_eq!(report.outcome, Some(MatchOutcome::Complete));
    assert!(report.record.is_some());
    assert_eq!(engine.practice_state(), PracticeState::Complete);
    assert!(engine.sequencer().hits().iter().all(|h| *h));
}

#[test]
fn scenario_c_root_after_completion_restarts() {
    let mut engine = PracticeEngine::new(Preferences::default()).unwrap();
    engine.start_listening();
    play(&mut engine, &C_MAJOR_UP);
    assert_eq!(engine.practice_state(), PracticeState::Complete);

    // A different note first so the next C is a new onset.
    let outcomes = play(&mut engine, &[55, 48]);
    assert_eq!(outcomes, [MatchOutcome::Miss, MatchOutcome::Restart]);
    assert_eq!(engine.sequencer().current_step(), 1);
    let hits = engine.sequencer().hits();
    assert!(hits[0]);
    assert!(hits[1..].iter().all(|h| !*h));
}

#[test]
fn scenario_d_over_constrained_device_falls_back() {
    let backend = Backend {
        exact_error: Some(AudioError::OverConstrained {
            device: "usb-interface".to_string(),
            message: "no supported config".to_string(),
        }),
        ..Backend::default()
    };
    let mut session = AudioSession::new(backend, YinEstimator::default());
    let config = AudioInputConfig {
        selected_device_id: Some("usb-interface".to_string()),
        ..AudioInputConfig::default()
    };

    assert!(session.start(&config));
    assert!(session.status().is_listening);
    assert!(session.status().fell_back_to_default);
    assert_eq!(session.status().device_name.as_deref(), Some("default"));
    assert_eq!(
        session.take_notice(),
        Some(Notice::FellBackToDefault {
            requested: "usb-interface".to_string()
        })
    );
    assert_eq!(session.take_notice(), None);
}

#[test]
fn permission_denied_is_reported_without_fallback() {
    let backend = Backend {
        exact_error: Some(AudioError::PermissionDenied("blocked".to_string())),
        ..Backend::default()
    };
    let mut session = AudioSession::new(backend, YinEstimator::default());
    let config = AudioInputConfig {
        selected_device_id: Some("usb-interface".to_string()),
        ..AudioInputConfig::default()
    };

    assert!(!session.start(&config));
    assert!(!session.status().fell_back_to_default);
    assert!(session.status().error.is_some());
    assert!(matches!(session.take_notice(), Some(Notice::PermissionDenied(_))));
    assert_eq!(session.poll(), None);
}

#[test]
fn sung_scale_completes_through_the_audio_path() {
    let backend = Backend::default();
    let sender = Rc::clone(&backend.sender);
    let mut session = AudioSession::new(backend, YinEstimator::default());
    assert!(session.start(&AudioInputConfig::default()));

    let mut engine = PracticeEngine::new(Preferences::default()).unwrap();
    engine.start_listening();

    let mut records = Vec::new();
    for midi in C_MAJOR_UP {
        if let Some(tx) = sender.borrow().as_ref() {
            tx.send(sine(midi_to_frequency(midi))).unwrap();
        }
        let detected = session.poll();
        assert_eq!(detected.map(|n| n.midi), Some(midi));
        if let Some(record) = engine.on_frame(detected.as_ref()).record {
            records.push(record);
        }
    }

    assert_eq!(engine.practice_state(), PracticeState::Complete);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].notes_hit, 8);

    session.stop();
    assert_eq!(session.poll(), None);
}
