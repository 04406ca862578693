// Serialization utilities for session persistence
// Text formats plus conversion between a Session and a live LoopEngine

use std::time::Duration;

use ron::ser::PrettyConfig;

use crate::project::types::{Session, TrackConfig};
use crate::project::{SessionError, SessionResult, validate_session};
use crate::sequencer::{LoopEngine, TrackId};

pub fn serialize_to_ron(session: &Session) -> SessionResult<String> {
    let config = PrettyConfig::new().depth_limit(4);
    Ok(ron::ser::to_string_pretty(session, config)?)
}

pub fn deserialize_from_ron(text: &str) -> SessionResult<Session> {
    Ok(ron::from_str(text)?)
}

pub fn serialize_to_json(session: &Session) -> SessionResult<String> {
    Ok(serde_json::to_string_pretty(session)?)
}

pub fn deserialize_from_json(text: &str) -> SessionResult<Session> {
    Ok(serde_json::from_str(text)?)
}

/// Snapshot the engine's tracks and loop timing into a session
pub fn capture(engine: &LoopEngine, name: &str) -> Session {
    let statuses = engine.tracks();
    let mut session = Session::new(name);
    session.loop_length_secs = engine.loop_length().as_secs_f64();
    session.master = statuses.iter().position(|status| status.master);
    session.tracks = statuses
        .into_iter()
        .map(|status| TrackConfig {
            name: status.name,
            source: status.source,
            pattern: status.pattern.to_text(),
            enabled: status.enabled,
            rate: status.rate,
        })
        .collect();
    session
}

/// Replace the engine's tracks with those of `session`
///
/// Playback is stopped first. Returns the new track ids in session order.
pub fn restore(session: &Session, engine: &LoopEngine) -> SessionResult<Vec<TrackId>> {
    validate_session(session)?;

    engine.stop();
    for id in engine.track_ids() {
        engine.remove_track(id)?;
    }
    engine.set_loop_length(Duration::from_secs_f64(session.loop_length_secs))?;

    let mut ids = Vec::with_capacity(session.tracks.len());
    for track in &session.tracks {
        let id = engine.add_track(track.name.clone());
        engine.set_pattern(id, &track.pattern)?;
        engine.set_rate(id, track.rate)?;
        engine.set_enabled(id, track.enabled)?;
        if let Some(source) = &track.source {
            engine.set_source(id, source)?;
        }
        ids.push(id);
    }

    if let Some(index) = session.master {
        let id = ids
            .get(index)
            .copied()
            .ok_or_else(|| SessionError::Validation(format!("master index {} out of range", index)))?;
        engine.bind_master(id)?;
    }

    log::info!(
        "Restored session '{}' with {} tracks",
        session.metadata.name,
        ids.len()
    );
    Ok(ids)
}
