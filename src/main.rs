// looptrack - Command-line front end for the loop sequencer

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use ringbuf::traits::Consumer;

use looptrack::audio::wav::wav_duration;
use looptrack::audio::{AudioOutput, CpalRecorder, PlaybackSink, RecordingSink, SilentSink};
use looptrack::config::EngineConfig;
use looptrack::messaging::channels::{NotificationConsumer, create_notification_channel};
use looptrack::project::{Session, SessionManager, TrackConfig, capture, restore};
use looptrack::sequencer::engine::EngineOptions;
use looptrack::sequencer::metronome::MetronomeSound;
use looptrack::sequencer::{LoopEngine, Pattern};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "looptrack", version, about = "Multi-track loop sequencer")]
struct Cli {
    /// Configuration file (RON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session with one track per WAV file, the first one is master
    New {
        /// Session name or file path
        session: String,
        #[arg(required = true)]
        wavs: Vec<PathBuf>,
        /// Pattern given to every track
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        pattern: String,
    },
    /// Print the tracks of a session
    Show { session: String },
    /// Render every pitch the session needs
    Prepare { session: String },
    /// Play a session
    Play {
        session: String,
        #[arg(short, long, default_value_t = 10.0)]
        seconds: f64,
    },
    /// Write a tempo-changed copy of a WAV file
    Retempo {
        wav: PathBuf,
        /// Tempo change in percent, -95 to 5000
        #[arg(allow_negative_numbers = true)]
        percent: f64,
    },
    /// Record from the default input device
    Record {
        output: PathBuf,
        #[arg(short, long, default_value_t = 5.0)]
        seconds: f64,
        /// Four clicks before capture starts
        #[arg(long)]
        count_in: bool,
        /// Bind the take to a track of this session, playing the others along
        #[arg(long, requires = "track")]
        session: Option<String>,
        /// Track index within the session
        #[arg(long)]
        track: Option<usize>,
    },
}

fn main() -> CliResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = EngineConfig::load_or_default(cli.config.as_deref())?;
    config.ensure_directories()?;
    let sessions = SessionManager::new(&config.sessions_dir);

    match cli.command {
        Commands::New {
            session,
            wavs,
            pattern,
        } => new_session(&sessions, &session, &wavs, &pattern),
        Commands::Show { session } => show_session(&sessions, &session),
        Commands::Prepare { session } => prepare_session(&config, &sessions, &session),
        Commands::Play { session, seconds } => play_session(&config, &sessions, &session, seconds),
        Commands::Retempo { wav, percent } => retempo(&config, &wav, percent),
        Commands::Record {
            output,
            seconds,
            count_in,
            session,
            track,
        } => record(&config, &sessions, &output, seconds, count_in, session, track),
    }
}

fn open_engine(config: &EngineConfig, sink: Arc<dyn PlaybackSink>) -> CliResult<LoopEngine> {
    Ok(LoopEngine::new(
        Arc::new(config.sound_stretch()),
        sink,
        EngineOptions::from(config),
    )?)
}

fn seconds_to_duration(seconds: f64) -> CliResult<Duration> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(format!("duration must be positive, got {}", seconds).into());
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn drain_notifications(rx: &mut NotificationConsumer) {
    while let Some(notification) = rx.try_pop() {
        eprintln!("{}", notification);
    }
}

fn new_session(
    sessions: &SessionManager,
    name: &str,
    wavs: &[PathBuf],
    pattern: &str,
) -> CliResult<()> {
    let pattern = Pattern::parse(pattern)?.to_text();
    let path = sessions.session_path(name);
    let title = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());

    let mut session = Session::new(title);
    for wav in wavs {
        let duration = wav_duration(wav)?;
        let source = wav.canonicalize().unwrap_or_else(|_| wav.clone());
        let track_name = wav
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("Track {}", session.tracks.len() + 1));

        if session.master.is_none() {
            session.master = Some(0);
            session.loop_length_secs = duration.as_secs_f64();
        }
        session.tracks.push(
            TrackConfig::new(track_name)
                .with_source(source)
                .with_pattern(pattern.clone()),
        );
    }

    sessions.save(&mut session, &path)?;
    println!(
        "Created session '{}' with {} tracks at {}",
        session.metadata.name,
        session.tracks.len(),
        path.display()
    );
    Ok(())
}

fn show_session(sessions: &SessionManager, name: &str) -> CliResult<()> {
    let session = sessions.load(&sessions.session_path(name))?;

    println!(
        "{} (v{}, modified {})",
        session.metadata.name, session.metadata.version, session.metadata.modified
    );
    println!("Loop length: {:.3}s", session.loop_length_secs);
    for (index, track) in session.tracks.iter().enumerate() {
        let master = if session.master == Some(index) {
            " [master]"
        } else {
            ""
        };
        let muted = if track.enabled { "" } else { " [muted]" };
        println!(
            "{:>2}. {}{}{}  every {} loop(s)  pattern: {}",
            index, track.name, master, muted, track.rate, track.pattern
        );
        match &track.source {
            Some(source) => println!("      source: {}", source.display()),
            None => println!("      source: none"),
        }
    }
    Ok(())
}

fn prepare_session(config: &EngineConfig, sessions: &SessionManager, name: &str) -> CliResult<()> {
    let session = sessions.load(&sessions.session_path(name))?;
    let engine = open_engine(config, Arc::new(SilentSink::default()))?;
    restore(&session, &engine)?;

    let started = Instant::now();
    let report = engine.prepare();
    println!(
        "Rendered {} variants in {:.1}s",
        report.rendered,
        started.elapsed().as_secs_f64()
    );
    for id in &report.skipped {
        println!("  skipped track {}: no source", id);
    }
    for (id, err) in &report.failures {
        println!("  track {}: {}", id, err);
    }

    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(format!("{} renders failed", report.failures.len()).into())
    }
}

fn print_status(engine: &LoopEngine) {
    for status in engine.tracks() {
        println!(
            "  {:<16} next {:>4} in {} loop(s){}",
            status.name,
            status.next_step.to_string(),
            status.reps_until_next,
            if status.master { "  [master]" } else { "" }
        );
    }
}

fn play_session(
    config: &EngineConfig,
    sessions: &SessionManager,
    name: &str,
    seconds: f64,
) -> CliResult<()> {
    let duration = seconds_to_duration(seconds)?;
    let session = sessions.load(&sessions.session_path(name))?;

    let (device_tx, mut device_rx) = create_notification_channel(config.notification_capacity);
    let (_output, sink) = AudioOutput::open(Arc::new(Mutex::new(device_tx)))?;
    let engine = open_engine(config, sink)?;
    let mut notifications = engine.take_notifications();

    restore(&session, &engine)?;
    let report = engine.prepare();
    if !report.is_complete() {
        log::warn!(
            "{} renders failed, {} tracks without source",
            report.failures.len(),
            report.skipped.len()
        );
    }

    engine.play()?;
    println!(
        "Playing '{}' for {:.1}s, loop length {:.3}s",
        session.metadata.name,
        duration.as_secs_f64(),
        engine.loop_length().as_secs_f64()
    );

    let deadline = Instant::now() + duration;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(engine.loop_length().min(remaining));
        if let Some(rx) = notifications.as_mut() {
            drain_notifications(rx);
        }
        drain_notifications(&mut device_rx);
        print_status(&engine);
    }

    engine.stop();
    Ok(())
}

fn retempo(config: &EngineConfig, wav: &Path, percent: f64) -> CliResult<()> {
    let engine = open_engine(config, Arc::new(SilentSink::default()))?;
    let output = engine.retempo(wav, percent)?;
    println!("{}", output.display());
    Ok(())
}

fn run_count_in(
    config: &EngineConfig,
    sink: &dyn PlaybackSink,
    loop_length: Duration,
    requested: bool,
) -> CliResult<()> {
    if let Some(count_in) = config.count_in(loop_length, requested) {
        let (accent, regular) = MetronomeSound::default().write_to(&config.render_dir.join("clicks"))?;
        println!("Counting in...");
        count_in.run(sink, &accent, &regular);
    }
    Ok(())
}

fn record(
    config: &EngineConfig,
    sessions: &SessionManager,
    output: &Path,
    seconds: f64,
    count_in: bool,
    session: Option<String>,
    track: Option<usize>,
) -> CliResult<()> {
    let duration = seconds_to_duration(seconds)?;
    let output = if output.components().count() == 1 {
        config.recordings_dir.join(output)
    } else {
        output.to_path_buf()
    };

    let (device_tx, mut device_rx) = create_notification_channel(config.notification_capacity);
    let (_output, sink) = AudioOutput::open(Arc::new(Mutex::new(device_tx)))?;
    let mut recorder = CpalRecorder::new();

    let Some(name) = session else {
        run_count_in(config, sink.as_ref(), config.loop_length(), count_in)?;
        let handle = recorder.start_recording(&output)?;
        println!("Recording for {:.1}s", duration.as_secs_f64());
        thread::sleep(duration);
        let path = recorder.stop_recording(handle)?;
        drain_notifications(&mut device_rx);
        println!("Recorded {}", path.display());
        return Ok(());
    };

    let path = sessions.session_path(&name);
    let session = sessions.load(&path)?;
    let engine = open_engine(config, sink.clone())?;
    let ids = restore(&session, &engine)?;
    let index = track.unwrap_or(0);
    let id = *ids
        .get(index)
        .ok_or_else(|| format!("session '{}' has no track {}", name, index))?;

    run_count_in(config, sink.as_ref(), engine.loop_length(), count_in)?;
    engine.start_recording(id, &mut recorder, &output, true)?;
    println!("Recording for {:.1}s", duration.as_secs_f64());
    thread::sleep(duration);
    let recorded = engine.stop_recording(&mut recorder)?;
    drain_notifications(&mut device_rx);

    let mut updated = capture(&engine, &session.metadata.name);
    updated.metadata.created = session.metadata.created.clone();
    sessions.save(&mut updated, &path)?;
    println!(
        "Recorded {} into track {} of '{}'",
        recorded.display(),
        index,
        session.metadata.name
    );
    Ok(())
}
