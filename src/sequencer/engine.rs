// Loop engine - Tracks, master binding and the per-tick evaluation
//
// Every tick visits the tracks in registration order under one lock. A fire
// whose renders are all cached is applied on the spot; otherwise resolution
// runs on the render pool and the sound change is applied when it completes,
// unless playback stopped or a newer fire of that track already sounded.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use ringbuf::traits::Producer;

use super::cursor::FirePlan;
use super::pattern::Pattern;
use super::scheduler::{LoopScheduler, TickTarget};
use super::track::{Track, TrackId, TrackStatus};
use super::transport::{DEFAULT_LOOP_LENGTH_SECS, LoopTiming, SharedTransportState, TransportState};
use super::{SequencerError, SequencerResult};
use crate::audio::sink::{PlaybackSink, RecordingHandle, RecordingSink};
use crate::audio::wav::wav_duration;
use crate::messaging::channels::{
    NotificationConsumer, NotificationProducer, create_notification_channel,
};
use crate::messaging::notification::{Notification, NotificationCategory};
use crate::render::transform::AudioTransform;
use crate::render::{RenderCache, RenderError, RenderKey, RenderParam, RenderPool};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Construction parameters of a [`LoopEngine`]
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub render_dir: PathBuf,
    pub render_workers: usize,
    pub render_queue: usize,
    pub loop_length: Duration,
    pub notification_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            render_dir: std::env::temp_dir().join("looptrack-renders"),
            render_workers: 2,
            render_queue: 64,
            loop_length: Duration::from_secs_f64(DEFAULT_LOOP_LENGTH_SECS),
            notification_capacity: 256,
        }
    }
}

/// Outcome of one global tick
#[derive(Debug, Default)]
pub struct TickReport {
    /// Tick number since playback started, 0 for the downbeat
    pub tick: u64,
    /// Tracks whose fire was applied during the tick
    pub fired: Vec<TrackId>,
    /// Tracks whose fire waits on a render
    pub deferred: Vec<TrackId>,
    pub failures: Vec<(TrackId, SequencerError)>,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of pre-rendering every pattern
#[derive(Debug, Default)]
pub struct PrepareReport {
    pub rendered: usize,
    /// Tracks with pitched steps but no source
    pub skipped: Vec<TrackId>,
    pub failures: Vec<(TrackId, RenderError)>,
}

impl PrepareReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failures.is_empty()
    }
}

#[derive(Debug)]
struct RecordingState {
    track: TrackId,
    handle: RecordingHandle,
    was_enabled: bool,
    started_playback: bool,
}

struct Shared {
    tracks: Mutex<Vec<Track>>,
    timing: Mutex<LoopTiming>,
    cache: Arc<RenderCache>,
    pool: RenderPool,
    sink: Arc<dyn PlaybackSink>,
    transport: Arc<SharedTransportState>,
    notifications: Mutex<NotificationProducer>,
    this: Weak<Shared>,
}

impl Shared {
    fn notify(&self, notification: Notification) {
        if let Ok(mut tx) = self.notifications.lock() {
            let _ = tx.try_push(notification);
        }
    }

    fn report_failure(&self, track: &Track, err: SequencerError, report: Option<&mut TickReport>) {
        log::warn!("Track '{}' fire failed: {}", track.name(), err);
        let category = match err {
            SequencerError::Playback { .. } => NotificationCategory::Playback,
            _ => NotificationCategory::Render,
        };
        self.notify(Notification::track_failure(
            track.id(),
            track.name(),
            category,
            &err,
        ));
        if let Some(report) = report {
            report.failures.push((track.id(), err));
        }
    }

    fn tick(&self) -> TickReport {
        let mut tracks = lock(&self.tracks);
        let epoch = self.transport.epoch();
        let mut report = TickReport {
            tick: self.transport.count_tick(),
            ..TickReport::default()
        };

        for track in tracks.iter_mut() {
            if let Some(plan) = track.cursor.tick() {
                self.execute_fire(track, plan, epoch, &mut report);
            }
        }
        report
    }

    fn downbeat(&self, tracks: &mut [Track]) -> TickReport {
        let epoch = self.transport.epoch();
        let mut report = TickReport::default();
        for track in tracks.iter_mut() {
            track.cursor.activate();
            if let Some(plan) = track.cursor.fire_now() {
                self.execute_fire(track, plan, epoch, &mut report);
            }
        }
        report
    }

    fn execute_fire(&self, track: &mut Track, plan: FirePlan, epoch: u64, report: &mut TickReport) {
        let sequence = track.issue_fire();
        let transpositions = plan.transpositions();
        log::debug!(
            "Track '{}' fires step {} ({:?})",
            track.name(),
            plan.index,
            plan.steps
        );

        if transpositions.is_empty() {
            match track.apply_fire(sequence, &plan, &[], self.sink.as_ref()) {
                Ok(_) => report.fired.push(track.id()),
                Err(err) => self.report_failure(track, err, Some(&mut *report)),
            }
            return;
        }

        let source = match track.require_source() {
            Ok(source) => source,
            Err(err) => {
                self.report_failure(track, err, Some(&mut *report));
                return;
            }
        };

        let keys: Vec<RenderKey> = transpositions
            .iter()
            .map(|&semitones| RenderKey::pitch(&source, semitones))
            .collect();
        let cached: Option<Vec<PathBuf>> = keys.iter().map(|key| self.cache.lookup(key)).collect();

        if let Some(paths) = cached {
            match track.apply_fire(sequence, &plan, &paths, self.sink.as_ref()) {
                Ok(_) => report.fired.push(track.id()),
                Err(err) => self.report_failure(track, err, Some(&mut *report)),
            }
            return;
        }

        let weak = self.this.clone();
        let id = track.id();
        let submitted = self.pool.submit(move || {
            if let Some(shared) = weak.upgrade() {
                shared.complete_deferred(id, sequence, epoch, plan, keys);
            }
        });
        match submitted {
            Ok(()) => report.deferred.push(id),
            Err(err) => self.report_failure(track, err.into(), Some(report)),
        }
    }

    /// Runs on a render worker
    fn complete_deferred(
        &self,
        id: TrackId,
        sequence: u64,
        epoch: u64,
        plan: FirePlan,
        keys: Vec<RenderKey>,
    ) {
        let resolved: Result<Vec<PathBuf>, RenderError> =
            keys.iter().map(|key| self.cache.resolve(key)).collect();

        let mut tracks = lock(&self.tracks);
        if self.transport.epoch() != epoch {
            log::debug!("Dropping deferred fire of {} after stop", id);
            return;
        }
        let Some(track) = tracks.iter_mut().find(|t| t.id() == id) else {
            return;
        };

        let outcome = resolved
            .map_err(|source| SequencerError::RenderFailure { track: id, source })
            .and_then(|paths| track.apply_fire(sequence, &plan, &paths, self.sink.as_ref()));
        match outcome {
            Ok(true) => {}
            Ok(false) => log::debug!("Dropping stale fire {} of '{}'", sequence, track.name()),
            Err(err) => self.report_failure(track, err, None),
        }
    }

    /// Render every pitch of `pattern` in the background
    fn prewarm(&self, source: &Path, pattern: &Pattern) {
        for semitones in pattern.transpositions() {
            let key = RenderKey::pitch(source, semitones);
            if self.cache.lookup(&key).is_some() {
                continue;
            }
            let weak = self.this.clone();
            let submitted = self.pool.submit(move || {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = shared.cache.resolve(&key) {
                    log::warn!("Pre-render failed: {}", err);
                    shared.notify(Notification::warning(
                        NotificationCategory::Render,
                        format!("Pre-render failed: {}", err),
                    ));
                }
            });
            if let Err(err) = submitted {
                log::debug!("Skipping pre-render: {}", err);
                break;
            }
        }
    }
}

struct Ticker(Weak<Shared>);

impl TickTarget for Ticker {
    fn on_tick(&self) {
        if let Some(shared) = self.0.upgrade() {
            let report = shared.tick();
            if !report.deferred.is_empty() {
                log::debug!(
                    "Tick {}: {} fired, {} waiting on renders",
                    report.tick,
                    report.fired.len(),
                    report.deferred.len()
                );
            }
        }
    }
}

/// Multi-track loop sequencer
pub struct LoopEngine {
    shared: Arc<Shared>,
    scheduler: Mutex<LoopScheduler>,
    notification_rx: Mutex<Option<NotificationConsumer>>,
    recording: Mutex<Option<RecordingState>>,
}

impl LoopEngine {
    pub fn new(
        transform: Arc<dyn AudioTransform>,
        sink: Arc<dyn PlaybackSink>,
        options: EngineOptions,
    ) -> SequencerResult<Self> {
        let timing = LoopTiming::new(options.loop_length)?;
        let (notification_tx, notification_rx) =
            create_notification_channel(options.notification_capacity.max(1));

        let shared = Arc::new_cyclic(|this| Shared {
            tracks: Mutex::new(Vec::new()),
            timing: Mutex::new(timing),
            cache: Arc::new(RenderCache::new(transform, options.render_dir.clone())),
            pool: RenderPool::new(options.render_workers, options.render_queue),
            sink,
            transport: SharedTransportState::new(),
            notifications: Mutex::new(notification_tx),
            this: this.clone(),
        });

        log::info!(
            "Loop engine ready, renders in {}",
            options.render_dir.display()
        );

        Ok(Self {
            shared,
            scheduler: Mutex::new(LoopScheduler::new(options.loop_length)),
            notification_rx: Mutex::new(Some(notification_rx)),
            recording: Mutex::new(None),
        })
    }

    /// Consumer side of the notification channel, available once
    pub fn take_notifications(&self) -> Option<NotificationConsumer> {
        lock(&self.notification_rx).take()
    }

    pub fn transport(&self) -> Arc<SharedTransportState> {
        Arc::clone(&self.shared.transport)
    }

    pub fn transport_state(&self) -> TransportState {
        self.shared.transport.state()
    }

    pub fn render_cache(&self) -> &RenderCache {
        &self.shared.cache
    }

    fn with_track<R>(
        &self,
        id: TrackId,
        f: impl FnOnce(&mut Track) -> SequencerResult<R>,
    ) -> SequencerResult<R> {
        let mut tracks = lock(&self.shared.tracks);
        let track = tracks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(SequencerError::UnknownTrack(id))?;
        f(track)
    }

    // ---- Track management ----

    pub fn add_track(&self, name: impl Into<String>) -> TrackId {
        let mut track = Track::new(name);
        if self.is_playing() {
            track.cursor.activate();
        }
        let id = track.id();
        log::info!("Added track '{}' ({})", track.name(), id);
        lock(&self.shared.tracks).push(track);
        id
    }

    pub fn remove_track(&self, id: TrackId) -> SequencerResult<()> {
        let mut tracks = lock(&self.shared.tracks);
        let index = tracks
            .iter()
            .position(|t| t.id() == id)
            .ok_or(SequencerError::UnknownTrack(id))?;
        let mut track = tracks.remove(index);
        track.silence(self.shared.sink.as_ref());

        if lock(&self.shared.timing).unbind(id) {
            log::info!("Master track '{}' removed, loop length unbound", track.name());
        }
        log::info!("Removed track '{}'", track.name());
        Ok(())
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        lock(&self.shared.tracks).iter().map(Track::id).collect()
    }

    /// Bind a WAV file as the track's source
    ///
    /// Renders of the previous source are forgotten. If the track is master
    /// the loop length follows the new file; an empty file is then rejected
    /// and the track keeps its old source.
    pub fn set_source(&self, id: TrackId, path: impl AsRef<Path>) -> SequencerResult<()> {
        let path = path.as_ref().to_path_buf();
        let duration = wav_duration(&path).map_err(|e| SequencerError::SourceUnreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let new_period = {
            let mut tracks = lock(&self.shared.tracks);
            let index = tracks
                .iter()
                .position(|t| t.id() == id)
                .ok_or(SequencerError::UnknownTrack(id))?;

            // A master source must be able to carry the loop
            if duration.is_zero() && lock(&self.shared.timing).is_master(id) {
                return Err(SequencerError::InvalidLoopLength(duration));
            }

            if let Some(previous) = tracks[index].source() {
                let shared_elsewhere = tracks
                    .iter()
                    .any(|t| t.id() != id && t.source() == Some(previous));
                // Rebinding the same path means a new take
                if previous == path.as_path() || !shared_elsewhere {
                    let dropped = self.shared.cache.invalidate_source(previous);
                    log::debug!("Forgot {} renders of {}", dropped, previous.display());
                }
            }

            let track = &mut tracks[index];
            track.set_source(Some(path.clone()));
            log::info!("Track '{}' source set to {}", track.name(), path.display());

            let mut timing = lock(&self.shared.timing);
            let period = if timing.is_master(id) {
                timing.bind(id, duration)?;
                log::info!("Loop length follows master: {:?}", duration);
                Some(duration)
            } else {
                None
            };

            self.shared.prewarm(&path, track.cursor().pattern());
            period
        };

        if let Some(period) = new_period {
            self.reschedule(period)?;
        }
        Ok(())
    }

    pub fn set_pattern(&self, id: TrackId, text: &str) -> SequencerResult<()> {
        let pattern = Pattern::parse(text)?;
        self.set_pattern_steps(id, pattern)
    }

    /// Replace the pattern, restart it from its first step
    pub fn set_pattern_steps(&self, id: TrackId, pattern: Pattern) -> SequencerResult<()> {
        self.with_track(id, |track| {
            if let Some(source) = track.source() {
                self.shared.prewarm(source, &pattern);
            }
            log::info!("Track '{}' pattern: {}", track.name(), pattern);
            track.cursor.set_pattern(pattern);
            Ok(())
        })
    }

    pub fn set_rate(&self, id: TrackId, rate: u32) -> SequencerResult<()> {
        if rate == 0 {
            return Err(SequencerError::InvalidRate);
        }
        self.with_track(id, |track| {
            if rate != 1 && lock(&self.shared.timing).is_master(id) {
                return Err(SequencerError::MasterRatePinned(id));
            }
            track.cursor.set_rate(rate)
        })
    }

    pub fn set_enabled(&self, id: TrackId, enabled: bool) -> SequencerResult<()> {
        self.with_track(id, |track| {
            track.cursor.set_enabled(enabled);
            Ok(())
        })
    }

    // ---- Loop timing ----

    /// Make `id` the master: the loop length becomes its source's duration
    pub fn bind_master(&self, id: TrackId) -> SequencerResult<Duration> {
        let duration = self.with_track(id, |track| {
            let source = track.require_source()?;
            let duration =
                wav_duration(&source).map_err(|e| SequencerError::SourceUnreadable {
                    path: source.clone(),
                    reason: e.to_string(),
                })?;
            lock(&self.shared.timing).bind(id, duration)?;
            track.cursor.set_rate(1)?;
            log::info!("Track '{}' is master, loop length {:?}", track.name(), duration);
            Ok(duration)
        })?;

        self.reschedule(duration)?;
        Ok(duration)
    }

    /// Set an explicit loop length, unbinding the master
    pub fn set_loop_length(&self, length: Duration) -> SequencerResult<()> {
        lock(&self.shared.timing).set_length(length)?;
        log::info!("Loop length set to {:?}", length);
        self.reschedule(length)
    }

    pub fn loop_length(&self) -> Duration {
        lock(&self.shared.timing).length()
    }

    pub fn master(&self) -> Option<TrackId> {
        lock(&self.shared.timing).master()
    }

    fn reschedule(&self, period: Duration) -> SequencerResult<()> {
        lock(&self.scheduler).set_period(period)?;
        Ok(())
    }

    // ---- Rendering ----

    /// Render every distinct pitch of every track and wait for all of them
    pub fn prepare(&self) -> PrepareReport {
        let mut report = PrepareReport::default();
        let mut jobs = Vec::new();
        for track in lock(&self.shared.tracks).iter() {
            let transpositions = track.cursor().pattern().transpositions();
            if transpositions.is_empty() {
                continue;
            }
            match track.source() {
                Some(source) => {
                    for semitones in transpositions {
                        jobs.push((track.id(), RenderKey::pitch(source, semitones)));
                    }
                }
                None => report.skipped.push(track.id()),
            }
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        for (id, key) in jobs {
            let cache = Arc::clone(&self.shared.cache);
            let job_tx = tx.clone();
            let job_key = key.clone();
            let submitted = self.shared.pool.submit(move || {
                let _ = job_tx.send((id, cache.resolve(&job_key)));
            });
            if submitted.is_err() {
                let _ = tx.send((id, self.shared.cache.resolve(&key)));
            }
        }
        drop(tx);

        for (id, result) in rx.iter() {
            match result {
                Ok(_) => report.rendered += 1,
                Err(err) => {
                    log::warn!("Prepare failed for {}: {}", id, err);
                    report.failures.push((id, err));
                }
            }
        }

        log::info!(
            "Prepared {} renders, {} failed",
            report.rendered,
            report.failures.len()
        );
        report
    }

    /// Tempo-changed copy of any WAV file, through the render cache
    pub fn retempo(&self, source: impl AsRef<Path>, percent: f64) -> SequencerResult<PathBuf> {
        let param =
            RenderParam::tempo(percent).map_err(|e| SequencerError::InvalidTempo(e.to_string()))?;
        let key = RenderKey::new(source.as_ref(), param);
        Ok(self.shared.cache.resolve(&key)?)
    }

    /// Wait until no render is queued or running, false on timeout
    pub fn wait_for_renders(&self, timeout: Duration) -> bool {
        self.shared.pool.wait_idle(timeout)
    }

    // ---- Playback ----

    pub fn is_playing(&self) -> bool {
        lock(&self.scheduler).is_running()
    }

    /// Start playback: reset every cursor, fire the downbeat, start ticking
    pub fn play(&self) -> SequencerResult<TickReport> {
        let mut scheduler = lock(&self.scheduler);
        if scheduler.is_running() {
            return Err(SequencerError::AlreadyPlaying);
        }
        let length = self.loop_length();

        let report = {
            let mut tracks = lock(&self.shared.tracks);
            self.shared.transport.reset_ticks();
            if !self.shared.transport.state().is_recording() {
                self.shared.transport.set_state(TransportState::Playing);
            }
            self.shared.downbeat(&mut tracks)
        };

        let ticker: Arc<dyn TickTarget> = Arc::new(Ticker(Arc::downgrade(&self.shared)));
        if let Err(err) = scheduler.start(length, ticker) {
            drop(scheduler);
            self.halt();
            return Err(err.into());
        }

        log::info!("Playback started, loop length {:?}", length);
        Ok(report)
    }

    /// Stop playback; safe to call repeatedly
    pub fn stop(&self) {
        lock(&self.scheduler).stop();
        self.halt();
    }

    fn halt(&self) {
        let mut tracks = lock(&self.shared.tracks);
        self.shared.transport.bump_epoch();
        for track in tracks.iter_mut() {
            track.silence(self.shared.sink.as_ref());
            track.cursor.deactivate();
        }
        self.shared.sink.stop_all();
        if self.shared.transport.state() == TransportState::Playing {
            self.shared.transport.set_state(TransportState::Stopped);
            log::info!("Playback stopped");
        }
    }

    /// Evaluate one global tick now
    pub fn tick(&self) -> TickReport {
        self.shared.tick()
    }

    // ---- Recording ----

    /// Start capturing into `path` for track `id`
    ///
    /// The track is muted while it records. With `background` the other
    /// tracks play along; playback is started if it was not running.
    pub fn start_recording(
        &self,
        id: TrackId,
        recorder: &mut dyn RecordingSink,
        path: &Path,
        background: bool,
    ) -> SequencerResult<RecordingHandle> {
        let mut recording = lock(&self.recording);
        if recording.is_some() {
            return Err(SequencerError::Recording {
                track: id,
                reason: "another recording is running".to_string(),
            });
        }

        let was_enabled = self.with_track(id, |track| {
            let enabled = track.cursor().enabled();
            track.cursor.set_enabled(false);
            Ok(enabled)
        })?;

        let handle = match recorder.start_recording(path) {
            Ok(handle) => handle,
            Err(err) => {
                self.with_track(id, |track| {
                    track.cursor.set_enabled(was_enabled);
                    Ok(())
                })?;
                return Err(SequencerError::Recording {
                    track: id,
                    reason: err.to_string(),
                });
            }
        };

        self.shared.transport.set_state(TransportState::Recording);
        let started_playback = background && !self.is_playing();
        if started_playback {
            if let Err(err) = self.play() {
                let _ = recorder.stop_recording(handle);
                self.shared.transport.set_state(TransportState::Stopped);
                self.with_track(id, |track| {
                    track.cursor.set_enabled(was_enabled);
                    Ok(())
                })?;
                return Err(err);
            }
        }

        *recording = Some(RecordingState {
            track: id,
            handle,
            was_enabled,
            started_playback,
        });
        Ok(handle)
    }

    /// Finish the capture and bind the recorded file as the track's source
    pub fn stop_recording(&self, recorder: &mut dyn RecordingSink) -> SequencerResult<PathBuf> {
        let state = lock(&self.recording)
            .take()
            .ok_or(SequencerError::NotRecording)?;

        let result = recorder.stop_recording(state.handle);
        if state.started_playback {
            self.stop();
        }
        self.shared.transport.set_state(if self.is_playing() {
            TransportState::Playing
        } else {
            TransportState::Stopped
        });
        self.with_track(state.track, |track| {
            track.cursor.set_enabled(state.was_enabled);
            Ok(())
        })?;

        let path = result.map_err(|err| SequencerError::Recording {
            track: state.track,
            reason: err.to_string(),
        })?;
        self.set_source(state.track, &path)?;
        self.shared.notify(
            Notification::info(
                NotificationCategory::Recording,
                format!("Recorded {}", path.display()),
            )
            .about(state.track),
        );
        Ok(path)
    }

    // ---- Status ----

    pub fn track_status(&self, id: TrackId) -> SequencerResult<TrackStatus> {
        let master = self.master();
        self.with_track(id, |track| Ok(track.status(master == Some(id))))
    }

    /// Snapshot of every track, in registration order
    pub fn tracks(&self) -> Vec<TrackStatus> {
        let master = self.master();
        lock(&self.shared.tracks)
            .iter()
            .map(|track| track.status(master == Some(track.id())))
            .collect()
    }
}

impl Drop for LoopEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
