// Audio sinks - Playback and recording seams used by the loop engine

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Handle of one started clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClipHandle(u64);

impl ClipHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClipHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip#{}", self.0)
    }
}

/// Handle of one running capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordingHandle(u64);

impl RecordingHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Error)]
pub enum PlaybackError {
    #[error("Cannot decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Mixer command queue is full")]
    QueueFull,
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("A recording is already running")]
    AlreadyRecording,

    #[error("Unknown recording handle {0}")]
    UnknownHandle(u64),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that can play audio files concurrently
///
/// `stop` on a handle that already finished is a no-op.
pub trait PlaybackSink: Send + Sync {
    fn start(&self, path: &Path) -> Result<ClipHandle, PlaybackError>;

    fn stop(&self, handle: ClipHandle);

    fn stop_all(&self);
}

/// Sink that plays nothing, for offline rendering
#[derive(Debug, Default)]
pub struct SilentSink {
    next_handle: AtomicU64,
}

impl PlaybackSink for SilentSink {
    fn start(&self, path: &Path) -> Result<ClipHandle, PlaybackError> {
        log::debug!("Silent start of {}", path.display());
        Ok(ClipHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed)))
    }

    fn stop(&self, _handle: ClipHandle) {}

    fn stop_all(&self) {}
}

/// Something that can capture audio into a file
pub trait RecordingSink {
    fn start_recording(&mut self, path: &Path) -> Result<RecordingHandle, RecordingError>;

    /// Finish the capture and return the written file
    fn stop_recording(&mut self, handle: RecordingHandle) -> Result<PathBuf, RecordingError>;
}
