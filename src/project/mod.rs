// Session persistence - Saving and restoring a loop setup as RON or JSON

pub mod manager;
pub mod serialization;
pub mod types;

use crate::sequencer::pattern::Pattern;

pub use manager::{SessionError, SessionFormat, SessionManager, SessionResult};
pub use serialization::{capture, restore};
pub use types::{Session, SessionMetadata, SessionVersion, TrackConfig};

/// Check a session before it is saved or applied
pub fn validate_session(session: &Session) -> SessionResult<()> {
    if session.metadata.name.trim().is_empty() {
        return Err(SessionError::Validation(
            "Session name cannot be empty".to_string(),
        ));
    }

    if !(session.loop_length_secs.is_finite() && session.loop_length_secs > 0.0) {
        return Err(SessionError::Validation(format!(
            "Loop length must be positive, got {}",
            session.loop_length_secs
        )));
    }

    for (index, track) in session.tracks.iter().enumerate() {
        Pattern::parse(&track.pattern).map_err(|e| {
            SessionError::Validation(format!("Track {} ('{}'): {}", index, track.name, e))
        })?;

        if track.rate == 0 {
            return Err(SessionError::Validation(format!(
                "Track {} ('{}'): rate must be at least 1",
                index, track.name
            )));
        }
    }

    if let Some(master) = session.master {
        let track = session.tracks.get(master).ok_or_else(|| {
            SessionError::Validation(format!(
                "Master index {} out of range ({} tracks)",
                master,
                session.tracks.len()
            ))
        })?;
        if track.source.is_none() {
            return Err(SessionError::Validation(format!(
                "Master track '{}' has no source",
                track.name
            )));
        }
        if track.rate != 1 {
            return Err(SessionError::Validation(format!(
                "Master track '{}' must have rate 1",
                track.name
            )));
        }
    }

    Ok(())
}
