// Sequencer module - Pattern interpretation and loop scheduling

pub mod cursor;
pub mod engine;
pub mod metronome;
pub mod pattern;
pub mod scheduler;
pub mod step;
pub mod track;
pub mod transport;

use std::path::PathBuf;

use thiserror::Error;

use crate::audio::sink::PlaybackError;
use crate::render::RenderError;
use crate::render::pool::PoolError;

pub use cursor::{CursorState, FirePlan, TrackCursor};
pub use engine::{LoopEngine, PrepareReport, TickReport};
pub use pattern::Pattern;
pub use scheduler::{LoopScheduler, SchedulerError, TickTarget};
pub use step::{MAX_TRANSPOSE, MIN_TRANSPOSE, Step};
pub use track::{Track, TrackId, TrackStatus};
pub use transport::{LoopTiming, SharedTransportState, TransportState};

/// Sequencer errors
#[derive(Debug, Clone, Error)]
pub enum SequencerError {
    #[error("Invalid step `{token}` at position {index}: {reason}")]
    InvalidStep {
        index: usize,
        token: String,
        reason: String,
    },

    #[error("Pattern must contain at least one step")]
    EmptyPattern,

    #[error("Track {0} has no source file bound")]
    NoSourceBound(TrackId),

    #[error("Render failed for track {track}: {source}")]
    RenderFailure {
        track: TrackId,
        #[source]
        source: RenderError,
    },

    #[error("Playback failed for track {track}: {source}")]
    Playback {
        track: TrackId,
        #[source]
        source: PlaybackError,
    },

    #[error("Unknown track: {0}")]
    UnknownTrack(TrackId),

    #[error("Rate of occurrence must be at least 1")]
    InvalidRate,

    #[error("Track {0} is the master, its rate is pinned to 1")]
    MasterRatePinned(TrackId),

    #[error("Invalid loop length: {0:?}")]
    InvalidLoopLength(std::time::Duration),

    #[error("Cannot read source {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Render queue rejected job: {0}")]
    RenderQueue(#[from] PoolError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Playback is already running")]
    AlreadyPlaying,

    #[error("Invalid tempo change: {0}")]
    InvalidTempo(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("No recording is running")]
    NotRecording,

    #[error("Recording on track {track} failed: {reason}")]
    Recording { track: TrackId, reason: String },
}

pub type SequencerResult<T> = Result<T, SequencerError>;
