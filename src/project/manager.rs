// Session manager for loading and saving sessions

use std::path::{Path, PathBuf};

use crate::project::serialization::*;
use crate::project::types::{Session, SessionVersion};
use crate::project::validate_session;
use crate::sequencer::SequencerError;

/// Session error types
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RON error: {0}")]
    Ron(#[from] ron::Error),

    #[error("RON parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),

    #[error("Session validation failed: {0}")]
    Validation(String),

    #[error("Unsupported session version {0}")]
    UnsupportedVersion(SessionVersion),

    #[error("Engine rejected session: {0}")]
    Engine(#[from] SequencerError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// On-disk encoding, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFormat {
    Ron,
    Json,
}

impl SessionFormat {
    /// `.json` is JSON, anything else is RON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Ron,
        }
    }
}

/// Session manager - saves and loads sessions under a directory
pub struct SessionManager {
    sessions_dir: PathBuf,
}

impl SessionManager {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Path for a session argument: an existing path is used as is,
    /// a bare name lands in the sessions directory as `<name>.ron`
    pub fn session_path(&self, name: &str) -> PathBuf {
        let as_path = Path::new(name);
        if as_path.extension().is_some() || as_path.components().count() > 1 {
            as_path.to_path_buf()
        } else {
            self.sessions_dir.join(format!("{}.ron", name))
        }
    }

    pub fn save(&self, session: &mut Session, path: &Path) -> SessionResult<()> {
        validate_session(session)?;
        session.metadata.touch();

        let text = match SessionFormat::from_path(path) {
            SessionFormat::Ron => serialize_to_ron(session)?,
            SessionFormat::Json => serialize_to_json(session)?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, text)?;
        log::info!("Saved session '{}' to {}", session.metadata.name, path.display());
        Ok(())
    }

    /// Load, version-check and validate a session
    ///
    /// Relative source paths are resolved against the session file's directory.
    pub fn load(&self, path: &Path) -> SessionResult<Session> {
        let text = std::fs::read_to_string(path)?;
        let mut session: Session = match SessionFormat::from_path(path) {
            SessionFormat::Ron => deserialize_from_ron(&text)?,
            SessionFormat::Json => deserialize_from_json(&text)?,
        };

        if !session.metadata.version.is_supported() {
            return Err(SessionError::UnsupportedVersion(session.metadata.version));
        }

        if let Some(base) = path.parent() {
            session.resolve_sources(base);
        }
        validate_session(&session)?;

        log::info!(
            "Loaded session '{}' ({} tracks) from {}",
            session.metadata.name,
            session.tracks.len(),
            path.display()
        );
        Ok(session)
    }

    /// Session files in the sessions directory, sorted by name
    pub fn list(&self) -> SessionResult<Vec<PathBuf>> {
        if !self.sessions_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut sessions: Vec<PathBuf> = std::fs::read_dir(&self.sessions_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && matches!(
                        path.extension().and_then(|ext| ext.to_str()),
                        Some("ron") | Some("json")
                    )
            })
            .collect();
        sessions.sort();
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::types::TrackConfig;
    use tempfile::TempDir;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SessionFormat::from_path(Path::new("a.json")), SessionFormat::Json);
        assert_eq!(SessionFormat::from_path(Path::new("a.JSON")), SessionFormat::Json);
        assert_eq!(SessionFormat::from_path(Path::new("a.ron")), SessionFormat::Ron);
        assert_eq!(SessionFormat::from_path(Path::new("a")), SessionFormat::Ron);
    }

    #[test]
    fn test_session_path() {
        let manager = SessionManager::new("/data/sessions");
        assert_eq!(
            manager.session_path("jam"),
            PathBuf::from("/data/sessions/jam.ron")
        );
        assert_eq!(manager.session_path("jam.json"), PathBuf::from("jam.json"));
        assert_eq!(manager.session_path("dir/jam"), PathBuf::from("dir/jam"));
    }

    #[test]
    fn test_save_load_both_formats() {
        let dir = TempDir::new().unwrap();
        let manager = SessionManager::new(dir.path());

        for file in ["jam.ron", "jam.json"] {
            let mut session = Session::new("Jam");
            session
                .tracks
                .push(TrackConfig::new("Lead").with_pattern("0 7 | 12"));
            let path = dir.path().join(file);
            manager.save(&mut session, &path).unwrap();

            let loaded = manager.load(&path).unwrap();
            assert_eq!(loaded.tracks, session.tracks);
            assert_eq!(loaded.metadata.name, "Jam");
        }

        assert_eq!(manager.list().unwrap().len(), 2);
    }

    #[test]
    fn test_relative_sources_resolved() {
        let dir = TempDir::new().unwrap();
        let manager = SessionManager::new(dir.path());
        let mut session = Session::new("Rel");
        session
            .tracks
            .push(TrackConfig::new("Loop").with_source("loops/loop.wav"));
        let path = dir.path().join("rel.ron");
        manager.save(&mut session, &path).unwrap();

        let loaded = manager.load(&path).unwrap();
        assert_eq!(
            loaded.tracks[0].source,
            Some(dir.path().join("loops/loop.wav"))
        );
    }

    #[test]
    fn test_invalid_session_not_saved() {
        let dir = TempDir::new().unwrap();
        let manager = SessionManager::new(dir.path());
        let mut session = Session::new("Bad");
        session.tracks.push(TrackConfig::new("X").with_pattern("| 0"));
        let path = dir.path().join("bad.ron");

        assert!(matches!(
            manager.save(&mut session, &path),
            Err(SessionError::Validation(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_newer_version_refused() {
        let dir = TempDir::new().unwrap();
        let manager = SessionManager::new(dir.path());
        let mut session = Session::new("Future");
        session.metadata.version = SessionVersion::new(2, 0);
        let path = dir.path().join("future.json");
        std::fs::write(&path, serialize_to_json(&session).unwrap()).unwrap();

        assert!(matches!(
            manager.load(&path),
            Err(SessionError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_list_missing_directory() {
        let manager = SessionManager::new("/nonexistent/looptrack/sessions");
        assert!(manager.list().unwrap().is_empty());
    }
}
