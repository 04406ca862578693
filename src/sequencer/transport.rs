// Transport - Play/stop/record state and loop timing
// Loop length either comes from the master track's source or is set explicitly

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::track::TrackId;
use super::{SequencerError, SequencerResult};

/// Loop length used when no master track is bound, in seconds
pub const DEFAULT_LOOP_LENGTH_SECS: f64 = 0.75;

/// Transport state (play/stop/record)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Recording,
}

impl TransportState {
    /// Check if transport is in a playing state (Playing or Recording)
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing | TransportState::Recording)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, TransportState::Recording)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, TransportState::Stopped)
    }
}

/// Shared transport state
/// Thread-safe via atomics, read by render workers and the front end
#[derive(Debug, Default)]
pub struct SharedTransportState {
    playing: AtomicBool,
    recording: AtomicBool,
    ticks: AtomicU64,
    epoch: AtomicU64,
}

impl SharedTransportState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get current transport state
    pub fn state(&self) -> TransportState {
        if self.recording.load(Ordering::Acquire) {
            TransportState::Recording
        } else if self.playing.load(Ordering::Acquire) {
            TransportState::Playing
        } else {
            TransportState::Stopped
        }
    }

    pub fn set_state(&self, state: TransportState) {
        self.playing
            .store(state == TransportState::Playing, Ordering::Release);
        self.recording
            .store(state == TransportState::Recording, Ordering::Release);
    }

    /// Loop ticks evaluated since playback started
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub(crate) fn count_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn reset_ticks(&self) {
        self.ticks.store(0, Ordering::Release);
    }

    /// Playback epoch, bumped on every stop so pending fires can detect it
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Loop length and master binding
#[derive(Debug, Clone, PartialEq)]
pub struct LoopTiming {
    length: Duration,
    master: Option<TrackId>,
}

impl LoopTiming {
    pub fn new(length: Duration) -> SequencerResult<Self> {
        validate_length(length)?;
        Ok(Self {
            length,
            master: None,
        })
    }

    pub fn length(&self) -> Duration {
        self.length
    }

    pub fn master(&self) -> Option<TrackId> {
        self.master
    }

    pub fn is_master(&self, track: TrackId) -> bool {
        self.master == Some(track)
    }

    /// Set an explicit loop length, unbinding the master
    pub fn set_length(&mut self, length: Duration) -> SequencerResult<()> {
        validate_length(length)?;
        self.length = length;
        self.master = None;
        Ok(())
    }

    /// Bind `track` as master with the duration of its source
    pub fn bind(&mut self, track: TrackId, length: Duration) -> SequencerResult<()> {
        validate_length(length)?;
        self.length = length;
        self.master = Some(track);
        Ok(())
    }

    /// Clear the binding if `track` is master, returns whether it was
    pub fn unbind(&mut self, track: TrackId) -> bool {
        if self.is_master(track) {
            self.master = None;
            true
        } else {
            false
        }
    }
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            length: Duration::from_secs_f64(DEFAULT_LOOP_LENGTH_SECS),
            master: None,
        }
    }
}

fn validate_length(length: Duration) -> SequencerResult<()> {
    if length.is_zero() {
        return Err(SequencerError::InvalidLoopLength(length));
    }
    Ok(())
}
