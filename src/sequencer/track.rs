// Track - Aggregate record for one looped source
// Owns identity, bound source file, cursor and the clips it currently has sounding

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cursor::{FirePlan, TrackCursor};
use super::pattern::Pattern;
use super::step::Step;
use super::{SequencerError, SequencerResult};
use crate::audio::sink::{ClipHandle, PlaybackSink};

/// Stable identity of a track for the lifetime of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Read-only snapshot of a track, for display and persistence
#[derive(Debug, Clone, PartialEq)]
pub struct TrackStatus {
    pub id: TrackId,
    pub name: String,
    pub source: Option<PathBuf>,
    pub pattern: Pattern,
    pub position: usize,
    pub next_step: Step,
    pub rate: u32,
    pub counter: u32,
    pub reps_until_next: u32,
    pub enabled: bool,
    pub master: bool,
    pub sounding: usize,
}

/// One track of the loop
#[derive(Debug)]
pub struct Track {
    id: TrackId,
    name: String,
    source: Option<PathBuf>,
    pub(crate) cursor: TrackCursor,
    /// Clips still sounding, tagged with the fire that started them
    sounding: Vec<(u64, ClipHandle)>,
    issued_fires: u64,
    /// Latest applied fire that stopped the track's prior sound
    last_cut: u64,
}

impl Track {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TrackId::new(),
            name: name.into(),
            source: None,
            cursor: TrackCursor::default(),
            sounding: Vec::new(),
            issued_fires: 0,
            last_cut: 0,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub(crate) fn set_source(&mut self, source: Option<PathBuf>) {
        self.source = source;
    }

    pub fn cursor(&self) -> &TrackCursor {
        &self.cursor
    }

    /// Clips started by earlier fires that have not been stopped yet
    pub fn sounding(&self) -> Vec<ClipHandle> {
        self.sounding.iter().map(|&(_, handle)| handle).collect()
    }

    /// Source file required to render a pitched step
    pub(crate) fn require_source(&self) -> SequencerResult<PathBuf> {
        self.source
            .clone()
            .ok_or(SequencerError::NoSourceBound(self.id))
    }

    /// Reserve a sequence number for a fire about to be executed
    pub(crate) fn issue_fire(&mut self) -> u64 {
        self.issued_fires += 1;
        self.issued_fires
    }

    /// Execute a fire plan against the sink
    ///
    /// `paths` holds the resolved render of every transposition of the plan,
    /// in order. Fires may arrive out of order: a fire is stale, and
    /// `Ok(false)` is returned, once a newer fire that stops prior sound was
    /// applied. A newer hold does not cut an older fire, and an older fire
    /// only stops clips started before it.
    pub(crate) fn apply_fire(
        &mut self,
        sequence: u64,
        plan: &FirePlan,
        paths: &[PathBuf],
        sink: &dyn PlaybackSink,
    ) -> SequencerResult<bool> {
        if sequence <= self.last_cut {
            return Ok(false);
        }

        if plan.stop_prior {
            self.last_cut = sequence;
            self.silence_before(sequence, sink);
        }

        if plan.silent {
            return Ok(true);
        }

        let mut first_error = None;
        for path in paths {
            match sink.start(path) {
                Ok(handle) => self.sounding.push((sequence, handle)),
                Err(err) => {
                    log::warn!("Track '{}' could not start {}: {}", self.name, path.display(), err);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(SequencerError::Playback {
                track: self.id,
                source: err,
            }),
            None => Ok(true),
        }
    }

    /// Stop every clip this track has sounding
    pub(crate) fn silence(&mut self, sink: &dyn PlaybackSink) {
        for (_, handle) in self.sounding.drain(..) {
            sink.stop(handle);
        }
    }

    fn silence_before(&mut self, sequence: u64, sink: &dyn PlaybackSink) {
        self.sounding.retain(|&(started_by, handle)| {
            if started_by < sequence {
                sink.stop(handle);
                false
            } else {
                true
            }
        });
    }

    pub fn status(&self, master: bool) -> TrackStatus {
        TrackStatus {
            id: self.id,
            name: self.name.clone(),
            source: self.source.clone(),
            pattern: self.cursor.pattern().clone(),
            position: self.cursor.position(),
            next_step: self.cursor.next_step(),
            rate: self.cursor.rate(),
            counter: self.cursor.counter(),
            reps_until_next: self.cursor.reps_until_next(),
            enabled: self.cursor.enabled(),
            master,
            sounding: self.sounding.len(),
        }
    }
}
