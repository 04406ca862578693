// Types for session persistence

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Session format version
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionVersion {
    pub major: u32,
    pub minor: u32,
}

impl SessionVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn current() -> Self {
        Self::new(1, 0)
    }

    /// Same major version, and no minor features this build does not know
    pub fn is_supported(&self) -> bool {
        let current = Self::current();
        self.major == current.major && self.minor <= current.minor
    }
}

impl std::fmt::Display for SessionVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Session metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    pub name: String,
    pub version: SessionVersion,
    /// RFC 3339 creation timestamp
    pub created: String,
    /// RFC 3339 timestamp of the last save
    pub modified: String,
}

impl SessionMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            name: name.into(),
            version: SessionVersion::current(),
            created: now.clone(),
            modified: now,
        }
    }

    pub fn touch(&mut self) {
        self.modified = chrono::Utc::now().to_rfc3339();
    }
}

fn default_enabled() -> bool {
    true
}

fn default_rate() -> u32 {
    1
}

/// One track as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Pattern in its text encoding
    pub pattern: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ticks per fire, missing means every tick
    #[serde(default = "default_rate")]
    pub rate: u32,
}

impl TrackConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            pattern: "0".to_string(),
            enabled: true,
            rate: 1,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }
}

/// A saved loop session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub metadata: SessionMetadata,
    pub loop_length_secs: f64,
    /// Index into `tracks` of the master track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<usize>,
    #[serde(default)]
    pub tracks: Vec<TrackConfig>,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: SessionMetadata::new(name),
            loop_length_secs: crate::sequencer::transport::DEFAULT_LOOP_LENGTH_SECS,
            master: None,
            tracks: Vec::new(),
        }
    }

    /// Make relative source paths relative to `base`
    pub fn resolve_sources(&mut self, base: &Path) {
        for track in &mut self.tracks {
            if let Some(source) = &track.source {
                if source.is_relative() {
                    track.source = Some(base.join(source));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_support() {
        assert!(SessionVersion::current().is_supported());
        assert!(!SessionVersion::new(2, 0).is_supported());
        assert!(!SessionVersion::new(1, 9).is_supported());
        assert!(!SessionVersion::new(0, 3).is_supported());
    }
}
