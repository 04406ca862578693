// Render module - Pitch and tempo shifted variants of source files
// Keys, error types and output file naming shared by the cache and the transform client

pub mod cache;
pub mod pool;
pub mod transform;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::sequencer::step::{MAX_TRANSPOSE, MIN_TRANSPOSE};

pub use cache::RenderCache;
pub use pool::{PoolError, RenderPool};
pub use transform::{AudioTransform, SoundStretch, TransformRequest};

/// Slowest accepted tempo change, in percent
pub const MIN_STRETCH: f64 = -95.0;

/// Fastest accepted tempo change, in percent
pub const MAX_STRETCH: f64 = 5000.0;

/// Errors raised by a single transform invocation
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Parameter out of range: {0}")]
    OutOfRange(String),

    #[error("Source file not found: {0}")]
    MissingSource(PathBuf),

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Transform exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Transform did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Transform produced no output at {0}")]
    MissingOutput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Error handed to every caller waiting on a render
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Rendering {key} failed: {source}")]
    Transform {
        key: RenderKey,
        #[source]
        source: Arc<TransformError>,
    },

    #[error("Rendering {key} was abandoned before completion")]
    Abandoned { key: RenderKey },
}

impl RenderError {
    pub fn key(&self) -> &RenderKey {
        match self {
            RenderError::Transform { key, .. } | RenderError::Abandoned { key } => key,
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

/// What a render changes about its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderParam {
    /// Transposition in semitones
    Pitch(i32),
    /// Tempo change in hundredths of a percent
    Tempo(i32),
}

impl RenderParam {
    pub fn pitch(semitones: i32) -> Result<Self, TransformError> {
        let param = RenderParam::Pitch(semitones);
        param.validate()?;
        Ok(param)
    }

    /// Tempo change in percent, kept at two decimals
    pub fn tempo(percent: f64) -> Result<Self, TransformError> {
        if !percent.is_finite() {
            return Err(TransformError::OutOfRange(format!("tempo {}", percent)));
        }
        let param = RenderParam::Tempo((percent * 100.0).round() as i32);
        param.validate()?;
        Ok(param)
    }

    pub fn validate(&self) -> Result<(), TransformError> {
        match *self {
            RenderParam::Pitch(n) if !(MIN_TRANSPOSE..=MAX_TRANSPOSE).contains(&n) => {
                Err(TransformError::OutOfRange(format!(
                    "pitch {} outside {}..={}",
                    n, MIN_TRANSPOSE, MAX_TRANSPOSE
                )))
            }
            RenderParam::Tempo(_) if !(MIN_STRETCH..=MAX_STRETCH).contains(&self.percent()) => {
                Err(TransformError::OutOfRange(format!(
                    "tempo {:.2}% outside {}..={}",
                    self.percent(),
                    MIN_STRETCH,
                    MAX_STRETCH
                )))
            }
            _ => Ok(()),
        }
    }

    /// Tempo change in percent, zero for pitch renders
    pub fn percent(&self) -> f64 {
        match *self {
            RenderParam::Pitch(_) => 0.0,
            RenderParam::Tempo(hundredths) => f64::from(hundredths) / 100.0,
        }
    }

    /// Command line switch understood by soundstretch
    pub fn argument(&self) -> String {
        match *self {
            RenderParam::Pitch(n) => format!("-pitch={}", n),
            RenderParam::Tempo(_) => format!("-tempo={:.2}", self.percent()),
        }
    }

    fn file_suffix(&self) -> String {
        match *self {
            RenderParam::Pitch(n) => format!("p{:+}", n),
            RenderParam::Tempo(_) => format!("t{:.2}", self.percent()),
        }
    }
}

impl fmt::Display for RenderParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RenderParam::Pitch(n) => write!(f, "{:+} st", n),
            RenderParam::Tempo(_) => write!(f, "{:+.2}% tempo", self.percent()),
        }
    }
}

/// Identity of one rendered variant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub source: PathBuf,
    pub param: RenderParam,
}

impl RenderKey {
    pub fn new(source: impl Into<PathBuf>, param: RenderParam) -> Self {
        Self {
            source: source.into(),
            param,
        }
    }

    pub fn pitch(source: impl Into<PathBuf>, semitones: i32) -> Self {
        Self::new(source, RenderParam::Pitch(semitones))
    }

    /// Where the rendered file for this key lives inside `render_dir`
    ///
    /// `<stem>-<hash>_p+7.wav` or `<stem>-<hash>_t12.50.wav`, the hash being
    /// the first 8 bytes of the SHA-256 of the full source path.
    pub fn output_path(&self, render_dir: &Path) -> PathBuf {
        let stem = self
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "render".to_string());
        let file_name = format!(
            "{}-{}_{}.wav",
            stem,
            source_digest(&self.source),
            self.param.file_suffix()
        );
        render_dir.join(file_name)
    }
}

impl fmt::Display for RenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.source.display(), self.param)
    }
}

fn source_digest(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tempo_keyed_at_two_decimals() {
        assert_eq!(RenderParam::tempo(12.504).unwrap(), RenderParam::Tempo(1250));
        assert_eq!(RenderParam::tempo(-50.0).unwrap(), RenderParam::Tempo(-5000));
    }

    #[test]
    fn test_param_bounds() {
        assert!(RenderParam::pitch(60).is_ok());
        assert!(RenderParam::pitch(61).is_err());
        assert!(RenderParam::tempo(-95.0).is_ok());
        assert!(RenderParam::tempo(-96.0).is_err());
        assert!(RenderParam::tempo(5000.0).is_ok());
        assert!(RenderParam::tempo(5000.01).is_err());
        assert!(RenderParam::tempo(f64::NAN).is_err());
    }

    #[test]
    fn test_arguments() {
        assert_eq!(RenderParam::Pitch(-3).argument(), "-pitch=-3");
        assert_eq!(RenderParam::Tempo(1250).argument(), "-tempo=12.50");
    }

    #[test]
    fn test_output_path_naming() {
        let key = RenderKey::pitch("/loops/bass.wav", 7);
        let path = key.output_path(Path::new("/tmp/renders"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("bass-"));
        assert!(name.ends_with("_p+7.wav"));
        // stem, dash, 16 hex digits, suffix
        assert_eq!(name.len(), "bass-".len() + 16 + "_p+7.wav".len());
        assert_eq!(path.parent().unwrap(), Path::new("/tmp/renders"));

        let tempo = RenderKey::new("/loops/bass.wav", RenderParam::Tempo(-2550));
        let name = tempo.output_path(Path::new("/r")).to_string_lossy().into_owned();
        assert!(name.ends_with("_t-25.50.wav"));
    }

    #[test]
    fn test_same_stem_different_folders_do_not_collide() {
        let a = RenderKey::pitch("/a/loop.wav", 0).output_path(Path::new("/r"));
        let b = RenderKey::pitch("/b/loop.wav", 0).output_path(Path::new("/r"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_output_path_is_stable() {
        let key = RenderKey::pitch("/loops/lead.wav", -12);
        assert_eq!(
            key.output_path(Path::new("/r")),
            key.clone().output_path(Path::new("/r"))
        );
    }
}
