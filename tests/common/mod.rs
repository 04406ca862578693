// Shared fixtures for integration tests: recording sink, scripted transform, WAV writer
#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use looptrack::audio::sink::{
    ClipHandle, PlaybackError, PlaybackSink, RecordingError, RecordingHandle, RecordingSink,
};
use looptrack::audio::wav::write_wav;
use looptrack::render::{AudioTransform, TransformError, TransformRequest};
use looptrack::sequencer::LoopEngine;
use looptrack::sequencer::engine::EngineOptions;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Start { file: String, handle: u64 },
    Stop(u64),
    StopAll,
}

/// Playback sink that only records what it was asked to do
#[derive(Default)]
pub struct EventSink {
    events: Mutex<Vec<SinkEvent>>,
    next: AtomicU64,
}

impl EventSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    /// File names of every started clip, in order
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Start { file, .. } => Some(file),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl PlaybackSink for EventSink {
    fn start(&self, path: &Path) -> Result<ClipHandle, PlaybackError> {
        let handle = self.next.fetch_add(1, Ordering::SeqCst);
        let file = path.file_name().unwrap().to_string_lossy().into_owned();
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Start { file, handle });
        Ok(ClipHandle::new(handle))
    }

    fn stop(&self, handle: ClipHandle) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Stop(handle.id()));
    }

    fn stop_all(&self) {
        self.events.lock().unwrap().push(SinkEvent::StopAll);
    }
}

/// Blocks renders until opened
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }

    fn wait(&self) {
        let open = self.open.lock().unwrap();
        let _open = self.changed.wait_while(open, |open| !*open).unwrap();
    }
}

/// Transform that copies the source, optionally failing or waiting first
#[derive(Default)]
pub struct ScriptedTransform {
    invocations: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl ScriptedTransform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every render whose source file is named `file_name`
    pub fn fail_source(&self, file_name: &str) {
        self.failing.lock().unwrap().insert(file_name.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_gate(&self, gate: Arc<Gate>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl AudioTransform for ScriptedTransform {
    fn render(&self, request: &TransformRequest) -> Result<PathBuf, TransformError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.wait();
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        request.validate()?;
        let name = request
            .source
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        if self.failing.lock().unwrap().contains(&name) {
            return Err(TransformError::Failed {
                status: "exit status: 1".to_string(),
                stderr: format!("cannot process {}", name),
            });
        }

        std::fs::copy(&request.source, &request.output)?;
        Ok(request.output.clone())
    }
}

/// Recorder that writes a short silent take when stopped
#[derive(Default)]
pub struct FakeRecorder {
    pub take_seconds: f32,
    active: Option<(RecordingHandle, PathBuf)>,
    next: u64,
}

impl FakeRecorder {
    pub fn new(take_seconds: f32) -> Self {
        Self {
            take_seconds,
            ..Self::default()
        }
    }
}

impl RecordingSink for FakeRecorder {
    fn start_recording(&mut self, path: &Path) -> Result<RecordingHandle, RecordingError> {
        if self.active.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        self.next += 1;
        let handle = RecordingHandle::new(self.next);
        self.active = Some((handle, path.to_path_buf()));
        Ok(handle)
    }

    fn stop_recording(&mut self, handle: RecordingHandle) -> Result<PathBuf, RecordingError> {
        match self.active.take() {
            Some((active, path)) if active == handle => {
                write_test_wav(&path, self.take_seconds);
                Ok(path)
            }
            other => {
                self.active = other;
                Err(RecordingError::UnknownHandle(handle.id()))
            }
        }
    }
}

pub const TEST_SAMPLE_RATE: u32 = 8_000;

pub fn write_test_wav(path: &Path, seconds: f32) {
    let frames = (TEST_SAMPLE_RATE as f32 * seconds).round() as usize;
    let samples: Vec<f32> = (0..frames).map(|i| ((i % 40) as f32 / 40.0) - 0.5).collect();
    write_wav(path, &samples, TEST_SAMPLE_RATE, 1).unwrap();
}

pub fn wav_in(dir: &TempDir, name: &str, seconds: f32) -> PathBuf {
    let path = dir.path().join(name);
    write_test_wav(&path, seconds);
    path
}

/// Engine with a long loop so the scheduler never ticks on its own
pub fn manual_engine(
    dir: &TempDir,
    transform: Arc<ScriptedTransform>,
    sink: Arc<EventSink>,
) -> LoopEngine {
    engine_with_loop(dir, transform, sink, Duration::from_secs(3600))
}

pub fn engine_with_loop(
    dir: &TempDir,
    transform: Arc<ScriptedTransform>,
    sink: Arc<EventSink>,
    loop_length: Duration,
) -> LoopEngine {
    let options = EngineOptions {
        render_dir: dir.path().join("renders"),
        loop_length,
        ..EngineOptions::default()
    };
    LoopEngine::new(transform, sink, options).unwrap()
}

/// Name suffix of the render of a transposition, e.g. `_p+5.wav`
pub fn pitch_suffix(semitones: i32) -> String {
    format!("_p{:+}.wav", semitones)
}
