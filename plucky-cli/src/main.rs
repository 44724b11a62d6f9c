//! # Plucky - Scale and Chord Practice Trainer
//!
//! Terminal front end for `plucky-core`. It resolves the selection from
//! defaults, the preference file and command-line flags (in that order of
//! precedence), then runs one of the subcommands.
//!
//! ## Architecture
//! - **Main Thread**: ~60 Hz polling loop over the audio session and the
//!   practice engine
//! - **Audio Threads**: CPAL capture and output callbacks, fed through
//!   crossbeam channels
//! - **Persistence**: preference changes are saved after a debounce;
//!   completed runs are appended to a JSON-lines session log

mod synth;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use plucky_core::audio::{AudioInputConfig, list_input_devices};
use plucky_core::filter::NoteRange;
use plucky_core::fretboard::{Location, NotePosition};
use plucky_core::membership::TaggedPosition;
use plucky_core::playback::{
    PlaybackScheduler, guitar_chord_preview, piano_chord_preview, play_success_chime, scale_preview,
};
use plucky_core::preferences::{JsonFileStore, PreferencePersister, PreferenceStore, Preferences};
use plucky_core::session::Notice;
use plucky_core::{
    AudioSession, Direction, InstrumentKind, Pitch, PitchClass, PracticeEngine, PracticeState,
    SessionRecord,
};
use tracing::{Level, info, warn};

use synth::Synth;

/// Analysis polling interval (~60 Hz).
const FRAME_INTERVAL: Duration = Duration::from_millis(16);
/// Transport tick for previews.
const PLAYBACK_TICK: Duration = Duration::from_millis(5);
/// Lets the last voice ring out before the output stream closes.
const RELEASE_TAIL: Duration = Duration::from_millis(400);

#[derive(Parser)]
#[command(name = "plucky")]
#[command(about = "Practice scales and chords on guitar or piano with live pitch detection")]
#[command(version)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Preference file, created on first change
    #[arg(long, global = true, default_value = "plucky-preferences.json")]
    prefs: PathBuf,

    #[command(flatten)]
    selection: SelectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum InstrumentArg {
    Guitar,
    Piano,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DirectionArg {
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum NoteRangeArg {
    All,
    FromRoot,
    RootToRoot,
}

impl From<InstrumentArg> for InstrumentKind {
    fn from(arg: InstrumentArg) -> Self {
        match arg {
            InstrumentArg::Guitar => InstrumentKind::Guitar,
            InstrumentArg::Piano => InstrumentKind::Piano,
        }
    }
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Ascending => Direction::Ascending,
            DirectionArg::Descending => Direction::Descending,
        }
    }
}

impl From<NoteRangeArg> for NoteRange {
    fn from(arg: NoteRangeArg) -> Self {
        match arg {
            NoteRangeArg::All => NoteRange::All,
            NoteRangeArg::FromRoot => NoteRange::FromRoot,
            NoteRangeArg::RootToRoot => NoteRange::RootToRoot,
        }
    }
}

/// Overrides applied on top of the stored preferences.
#[derive(Args, Debug, Default)]
struct SelectionArgs {
    #[arg(long, global = true)]
    instrument: Option<InstrumentArg>,

    /// Preset tuning id (standard, drop-d, drop-cs, dadgad, open-g, open-d, eb-standard)
    #[arg(long, global = true)]
    tuning: Option<String>,

    /// Six open-string notes, highest first (e.g. E4,B3,G3,D3,A2,D2)
    #[arg(long, global = true, value_delimiter = ',', conflicts_with = "tuning")]
    custom_tuning: Option<Vec<String>>,

    /// Root note (C, F#, Bb, ...)
    #[arg(long, global = true)]
    root: Option<PitchClass>,

    /// Scale id; switches to scale practice
    #[arg(long, global = true)]
    scale: Option<String>,

    /// Chord id; switches to chord practice
    #[arg(long, global = true, conflicts_with = "scale")]
    chord: Option<String>,

    /// Window number as labeled (1 = "Position 1"); 0 practices the whole instrument
    #[arg(long, global = true)]
    window: Option<usize>,

    #[arg(long, global = true)]
    note_range: Option<NoteRangeArg>,

    #[arg(long, global = true)]
    direction: Option<DirectionArg>,

    /// Octave repeats of the practice sequence
    #[arg(long, global = true)]
    repeats: Option<u32>,

    #[arg(long, global = true)]
    piano_start: Option<i8>,

    #[arg(long, global = true)]
    piano_end: Option<i8>,

    /// Input device id as listed by `plucky devices`
    #[arg(long, global = true)]
    device: Option<String>,

    /// Zero-based input channel; omitted channels are mixed down
    #[arg(long, global = true)]
    channel: Option<u16>,

    #[arg(long, global = true)]
    echo_cancellation: Option<bool>,

    #[arg(long, global = true)]
    noise_suppression: Option<bool>,

    #[arg(long, global = true)]
    auto_gain_control: Option<bool>,

    /// Minimum detection clarity (0.0 - 1.0)
    #[arg(long, global = true)]
    min_clarity: Option<f32>,

    /// Spectrum smoothing (0.0 - 0.99)
    #[arg(long, global = true)]
    smoothing: Option<f32>,

    /// Preview tempo
    #[arg(long, global = true)]
    bpm: Option<u32>,

    /// Genre context recorded with completed runs
    #[arg(long, global = true)]
    genre: Option<String>,

    /// Learning-track scale id recorded with completed runs
    #[arg(long, global = true)]
    track_scale_id: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio input devices
    Devices,

    /// Print the windows of the current selection and their positions
    Positions {
        /// Also print every generated position
        #[arg(long)]
        all_notes: bool,
    },

    /// Print the practice sequence for the current selection
    Sequence,

    /// Listen to the microphone and match played notes against the sequence
    Listen {
        /// Stop after this many completed runs
        #[arg(long)]
        runs: Option<u32>,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,

        /// Session log; one JSON record per completed run
        #[arg(long, default_value = "plucky-sessions.jsonl")]
        log: PathBuf,
    },

    /// Play the preview of the current selection
    Play,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Devices = cli.command {
        return print_devices();
    }

    let store = JsonFileStore::new(&cli.prefs);
    let stored = store.load()?;

    let mut engine = PracticeEngine::new(Preferences::default())?;
    let mut persister = PreferencePersister::new(engine.subscribe(), store);
    if let Some(map) = stored {
        engine.hydrate(&map)?;
    }
    apply_flags(&mut engine, &cli.selection)?;

    let outcome = match &cli.command {
        Commands::Devices => Ok(()),
        Commands::Positions { all_notes } => {
            print_positions(&engine, *all_notes);
            Ok(())
        }
        Commands::Sequence => print_sequence(&engine),
        Commands::Listen { runs, seconds, log } => {
            listen(&mut engine, &mut persister, *runs, *seconds, log)
        }
        Commands::Play => play(&engine),
    };

    persister.flush(engine.preferences())?;
    outcome
}

fn apply_flags(engine: &mut PracticeEngine, args: &SelectionArgs) -> Result<()> {
    if let Some(kind) = args.instrument {
        engine.set_instrument(kind.into())?;
    }
    if args.piano_start.is_some() || args.piano_end.is_some() {
        let prefs = engine.preferences();
        let start = args.piano_start.unwrap_or(prefs.piano_start_octave);
        let end = args.piano_end.unwrap_or(prefs.piano_end_octave);
        engine.set_piano_range(start, end)?;
    }
    if let Some(notes) = &args.custom_tuning {
        let strings: [String; 6] = notes
            .clone()
            .try_into()
            .map_err(|_| anyhow!("--custom-tuning needs exactly six notes"))?;
        engine.set_custom_tuning(strings)?;
    } else if let Some(id) = &args.tuning {
        engine.set_tuning(id)?;
    }
    if let Some(root) = args.root {
        engine.set_root(root)?;
    }
    if let Some(id) = &args.scale {
        engine.set_scale(id)?;
    }
    if let Some(id) = &args.chord {
        engine.set_chord(id)?;
    }
    // After root and selection, which clear the window.
    if let Some(window) = args.window {
        engine.set_window(window.checked_sub(1));
    }
    if let Some(mode) = args.note_range {
        engine.set_note_range(mode.into());
    }
    if let Some(direction) = args.direction {
        engine.set_direction(direction.into());
    }
    if let Some(repeats) = args.repeats {
        engine.set_octave_repeats(repeats);
    }
    if let Some(bpm) = args.bpm {
        engine.set_playback_bpm(bpm);
    }
    if let Some(min_clarity) = args.min_clarity {
        engine.set_min_clarity(min_clarity);
    }
    if let Some(smoothing) = args.smoothing {
        engine.set_smoothing(smoothing);
    }
    if args.genre.is_some() {
        engine.set_genre(args.genre.clone());
    }
    engine.set_track_scale_id(args.track_scale_id);

    let mut input: AudioInputConfig = engine.preferences().audio_input.clone();
    if let Some(device) = &args.device {
        input.selected_device_id = Some(device.clone());
    }
    if let Some(channel) = args.channel {
        input.selected_channel = Some(channel);
    }
    if let Some(on) = args.echo_cancellation {
        input.echo_cancellation = on;
    }
    if let Some(on) = args.noise_suppression {
        input.noise_suppression = on;
    }
    if let Some(on) = args.auto_gain_control {
        input.auto_gain_control = on;
    }
    engine.set_audio_input(input);
    Ok(())
}

fn print_devices() -> Result<()> {
    let devices = list_input_devices().context("Failed to enumerate input devices")?;
    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!("{} {:<32} {}", marker, device.id, device.label);
    }
    Ok(())
}

fn describe_location(position: &NotePosition) -> String {
    match position.location {
        Location::Fret { string, fret } => format!("string {} fret {:>2}", string + 1, fret),
        Location::Key { midi } => format!("key {:>3}", midi),
    }
}

fn print_tagged(positions: &[TaggedPosition]) {
    for p in positions {
        let root = if p.is_root { " (root)" } else { "" };
        println!(
            "    {:<18} {:<4} {:<3}{}",
            describe_location(&p.position),
            p.position.pitch,
            p.interval,
            root
        );
    }
}

fn print_positions(engine: &PracticeEngine, all_notes: bool) {
    let selection = engine.selection();
    println!(
        "{} {} on {}",
        selection.root(),
        selection.formula().name,
        engine.instrument().cache_key()
    );

    if engine.windows().is_empty() {
        println!("  (whole instrument)");
    }
    if engine.voicings().is_empty() {
        for window in engine.windows() {
            println!("  {}: {}..={}", window.label, window.start, window.end);
        }
    }
    for voicing in engine.voicings() {
        let window = &voicing.window;
        println!("  {}: {}..={}  {}", window.label, window.start, window.end, voicing.chart());
    }

    let view = engine.view();
    match (&view.window, view.span) {
        (Some(window), Some((start, end))) => {
            println!("Selected {} (filtered to {}..={}):", window.label, start, end)
        }
        _ => println!("Selected: whole instrument"),
    }
    print_tagged(&view.positions);

    if all_notes {
        println!("All positions:");
        for position in engine.positions() {
            let member = engine
                .tagged()
                .iter()
                .any(|t| t.position.location == position.location);
            let marker = if member { "*" } else { " " };
            println!("  {} {:<18} {}", marker, describe_location(position), position.pitch);
        }
    }
}

fn print_sequence(engine: &PracticeEngine) -> Result<()> {
    let sequence = engine
        .current_sequence()
        .ok_or_else(|| anyhow!("The current selection has no notes to practice"))?;
    println!(
        "{:?}, {} octave(s), {} notes",
        sequence.direction,
        sequence.octave_repeats,
        sequence.len()
    );
    for (i, step) in sequence.steps.iter().enumerate() {
        println!("  {:>2}. {:<3} {}", i + 1, step.pitch_class, step.label);
    }
    Ok(())
}

fn report_notice(session: &mut AudioSession) {
    match session.take_notice() {
        Some(Notice::FellBackToDefault { requested }) => {
            println!("Input device '{}' is unavailable; using the default device", requested)
        }
        Some(Notice::PermissionDenied(message)) => {
            println!("Microphone access denied: {}. Grant access and try again.", message)
        }
        Some(Notice::Failed(message)) => println!("Audio input failed: {}", message),
        None => {}
    }
}

fn append_record(path: &Path, record: &SessionRecord) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open session log {}", path.display()))?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{}", line).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn listen(
    engine: &mut PracticeEngine,
    persister: &mut PreferencePersister<JsonFileStore>,
    runs: Option<u32>,
    seconds: Option<u64>,
    log: &Path,
) -> Result<()> {
    let prefs = engine.preferences().clone();
    let mut session = AudioSession::with_defaults();
    session.set_min_clarity(prefs.min_clarity);
    session.set_smoothing(prefs.smoothing);

    let started = session.start(&prefs.audio_input);
    report_notice(&mut session);
    if !started {
        bail!(
            "Could not start listening: {}",
            session.status().error.clone().unwrap_or_default()
        );
    }

    let mut synth = match Synth::open() {
        Ok(synth) => Some(synth),
        Err(e) => {
            warn!("Success chime disabled: {:#}", e);
            None
        }
    };

    engine.start_listening();
    print_sequence(engine)?;
    println!("Listening... play the first note.");

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut completed = 0;
    while deadline.is_none_or(|d| Instant::now() < d) {
        let detected = session.poll();
        report_notice(&mut session);
        if !session.is_listening() {
            bail!("Audio input stopped");
        }

        let report = engine.on_frame(detected.as_ref());
        if let (Some(note), Some(outcome)) = (detected, report.outcome) {
            let (hit, total) = engine.sequencer().progress();
            println!(
                "{:<4} {:+3} cents  {:<8} {}/{}",
                note.pitch,
                note.cent_offset,
                format!("{:?}", outcome),
                hit,
                total
            );
        }

        if let Some(record) = report.record {
            completed += 1;
            println!("Complete! ({} run(s))", completed);
            append_record(log, &record)?;
            if let Some(synth) = synth.as_mut() {
                play_success_chime(synth);
            }
            if runs.is_some_and(|r| completed >= r) {
                thread::sleep(RELEASE_TAIL);
                break;
            }
        }

        persister.pump(Instant::now(), engine.preferences())?;
        thread::sleep(FRAME_INTERVAL);
    }

    if engine.practice_state() != PracticeState::Complete {
        let (hit, total) = engine.sequencer().progress();
        info!("Stopped at {}/{}", hit, total);
    }
    engine.stop_listening();
    session.stop();
    Ok(())
}

fn play(engine: &PracticeEngine) -> Result<()> {
    let positions = &engine.view().positions;
    let plan = match (engine.selection().is_chord(), engine.instrument().kind()) {
        (false, _) => scale_preview(positions, engine.preferences().playback_bpm),
        (true, InstrumentKind::Guitar) => guitar_chord_preview(positions),
        (true, InstrumentKind::Piano) => piano_chord_preview(positions),
    };
    if plan.is_empty() {
        bail!("The current selection has no notes to play");
    }

    let mut synth = Synth::open()?;
    let mut scheduler = PlaybackScheduler::new();
    scheduler.play(plan, &mut synth);

    let mut last = Instant::now();
    while scheduler.is_playing() {
        thread::sleep(PLAYBACK_TICK);
        let now = Instant::now();
        let report = scheduler.tick(now - last, &mut synth);
        last = now;
        for midi in report.started {
            print!("{} ", Pitch::from_midi(midi));
        }
        std::io::stdout().flush()?;
    }
    println!();
    thread::sleep(RELEASE_TAIL);
    Ok(())
}
