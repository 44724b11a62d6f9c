//! # Preview Synthesizer
//!
//! A small polyphonic tone generator on the default output device. The
//! playback scheduler talks to it through [`VoiceSink`]; commands cross to
//! the audio callback over a crossbeam channel and are drained at the start
//! of every buffer.
//!
//! ## Voices
//! - `Preview`: triangle wave with a soft attack, a short decay to the
//!   sustain level, and a release after the note's duration
//! - `Chime`: sine with a fast exponential decay

use std::f32::consts::TAU;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Receiver, Sender};
use plucky_core::note::midi_to_frequency;
use plucky_core::playback::{Timbre, VoiceSink};
use tracing::{error, info};

/// Voices beyond this are dropped, oldest first.
const MAX_VOICES: usize = 16;
const MASTER_GAIN: f32 = 0.2;

const ATTACK: f32 = 0.005;
const DECAY: f32 = 0.1;
const SUSTAIN: f32 = 0.6;
const RELEASE: f32 = 0.2;
const CHIME_DECAY: f32 = 0.12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SynthCommand {
    NoteOn {
        midi: i32,
        duration: Duration,
        timbre: Timbre,
    },
    ReleaseAll,
}

#[derive(Debug, Clone)]
struct Voice {
    phase: f32,
    increment: f32,
    /// Seconds since note-on.
    age: f32,
    /// Seconds until the release starts.
    hold: f32,
    /// Envelope level when the release started, if it has.
    released_at: Option<(f32, f32)>,
    timbre: Timbre,
}

impl Voice {
    fn new(midi: i32, duration: Duration, timbre: Timbre, sample_rate: f32) -> Self {
        Self {
            phase: 0.0,
            increment: midi_to_frequency(midi) / sample_rate,
            age: 0.0,
            hold: duration.as_secs_f32(),
            released_at: None,
            timbre,
        }
    }

    fn held_level(&self) -> f32 {
        match self.timbre {
            Timbre::Chime => (-self.age / CHIME_DECAY).exp(),
            Timbre::Preview => {
                if self.age < ATTACK {
                    self.age / ATTACK
                } else if self.age < ATTACK + DECAY {
                    1.0 - (1.0 - SUSTAIN) * (self.age - ATTACK) / DECAY
                } else {
                    SUSTAIN
                }
            }
        }
    }

    fn level(&mut self) -> f32 {
        if self.released_at.is_none() && self.age >= self.hold {
            self.release();
        }
        match self.released_at {
            Some((start, level)) => level * (1.0 - (self.age - start) / RELEASE).max(0.0),
            None => self.held_level(),
        }
    }

    fn release(&mut self) {
        if self.released_at.is_none() {
            self.released_at = Some((self.age, self.held_level()));
        }
    }

    fn is_finished(&self) -> bool {
        match self.released_at {
            Some((start, _)) => self.age - start >= RELEASE,
            None => false,
        }
    }

    fn oscillator(&self) -> f32 {
        match self.timbre {
            Timbre::Preview => 1.0 - 4.0 * (self.phase - 0.5).abs(),
            Timbre::Chime => (self.phase * TAU).sin(),
        }
    }

    fn next_sample(&mut self, dt: f32) -> f32 {
        let sample = self.oscillator() * self.level();
        self.phase = (self.phase + self.increment).fract();
        self.age += dt;
        sample
    }
}

/// The audio-thread half: owns the voices and renders mono samples.
pub struct Mixer {
    commands: Receiver<SynthCommand>,
    voices: Vec<Voice>,
    sample_rate: f32,
}

impl Mixer {
    pub fn new(commands: Receiver<SynthCommand>, sample_rate: f32) -> Self {
        Self {
            commands,
            voices: Vec::with_capacity(MAX_VOICES),
            sample_rate,
        }
    }

    /// Applies every pending command.
    pub fn drain_commands(&mut self) {
        for command in self.commands.try_iter() {
            match command {
                SynthCommand::NoteOn {
                    midi,
                    duration,
                    timbre,
                } => {
                    if self.voices.len() == MAX_VOICES {
                        self.voices.remove(0);
                    }
                    self.voices
                        .push(Voice::new(midi, duration, timbre, self.sample_rate));
                }
                SynthCommand::ReleaseAll => self.voices.iter_mut().for_each(Voice::release),
            }
        }
    }

    pub fn next_sample(&mut self) -> f32 {
        let dt = 1.0 / self.sample_rate;
        let mixed: f32 = self.voices.iter_mut().map(|v| v.next_sample(dt)).sum();
        self.voices.retain(|v| !v.is_finished());
        (mixed * MASTER_GAIN).clamp(-1.0, 1.0)
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }
}

/// The control half. Dropping it closes the output stream.
pub struct Synth {
    _stream: cpal::Stream,
    commands: Sender<SynthCommand>,
}

impl Synth {
    /// Opens the default output device.
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No audio output device found"))?;
        let config = device
            .default_output_config()
            .context("Failed to query the default output config")?;
        let sample_rate = config.sample_rate().0 as f32;
        info!(
            "Output on '{}' ({} Hz, {} channel(s))",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate().0,
            config.channels()
        );

        let (commands, receiver) = crossbeam_channel::unbounded();
        let mixer = Mixer::new(receiver, sample_rate);
        let stream = match config.sample_format() {
            cpal::SampleFormat::I16 => make_stream::<i16>(&device, &config.into(), mixer)?,
            cpal::SampleFormat::U16 => make_stream::<u16>(&device, &config.into(), mixer)?,
            cpal::SampleFormat::I32 => make_stream::<i32>(&device, &config.into(), mixer)?,
            cpal::SampleFormat::F32 => make_stream::<f32>(&device, &config.into(), mixer)?,
            other => return Err(anyhow!("Unsupported output sample format: {:?}", other)),
        };
        stream.play().context("Failed to start the output stream")?;

        Ok(Self {
            _stream: stream,
            commands,
        })
    }

    fn send(&self, command: SynthCommand) {
        // The receiver only goes away with the stream, which we own.
        let _ = self.commands.send(command);
    }
}

impl VoiceSink for Synth {
    fn note_on(&mut self, midi: i32, duration: Duration, timbre: Timbre) {
        self.send(SynthCommand::NoteOn {
            midi,
            duration,
            timbre,
        });
    }

    fn release_all(&mut self) {
        self.send(SynthCommand::ReleaseAll);
    }
}

fn make_stream<T>(device: &cpal::Device, config: &cpal::StreamConfig, mut mixer: Mixer) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let num_channels = config.channels as usize;
    let err_fn = |err| error!("An error occurred on the output stream: {}", err);

    let stream = device.build_output_stream(
        config,
        move |output: &mut [T], _info: &cpal::OutputCallbackInfo| {
            mixer.drain_commands();
            for frame in output.chunks_mut(num_channels) {
                let sample = T::from_sample(mixer.next_sample());
                for s in frame.iter_mut() {
                    *s = sample;
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
