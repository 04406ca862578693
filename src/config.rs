// Configuration - Engine settings loaded from a RON file
// Every field has a default so a partial file (or none at all) is valid

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::render::SoundStretch;
use crate::sequencer::engine::EngineOptions;
use crate::sequencer::metronome::{COUNT_IN_CLICKS, CountIn, count_in_interval};
use crate::sequencer::transport::DEFAULT_LOOP_LENGTH_SECS;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Failed to write configuration: {0}")]
    Write(#[from] ron::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// External time/pitch transform program
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransformConfig {
    pub program: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: f64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("soundstretch"),
            working_dir: None,
            timeout_secs: 60.0,
        }
    }
}

/// Count-in played before a recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CountInConfig {
    /// Count in even when not asked for on the command line
    pub always: bool,
    pub clicks: u32,
}

impl Default for CountInConfig {
    fn default() -> Self {
        Self {
            always: false,
            clicks: COUNT_IN_CLICKS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub render_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub recordings_dir: PathBuf,
    pub transform: TransformConfig,
    pub render_workers: usize,
    pub render_queue: usize,
    pub loop_length_secs: f64,
    pub notification_capacity: usize,
    pub count_in: CountInConfig,
}

/// Root of every default directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("looptrack"))
        .unwrap_or_else(|| PathBuf::from(".looptrack"))
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            render_dir: data_dir.join("renders"),
            sessions_dir: data_dir.join("sessions"),
            recordings_dir: data_dir.join("recordings"),
            transform: TransformConfig::default(),
            render_workers: 2,
            render_queue: 64,
            loop_length_secs: DEFAULT_LOOP_LENGTH_SECS,
            notification_capacity: 256,
            count_in: CountInConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = ron::from_str(&text)?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, otherwise the default config file if it exists
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Self::default_path();
        if default_path.is_file() {
            Self::load(&default_path)
        } else {
            log::debug!("No configuration file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("looptrack").join("config.ron"))
            .unwrap_or_else(|| PathBuf::from("looptrack.ron"))
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.loop_length_secs.is_finite() && self.loop_length_secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "loop_length_secs must be positive, got {}",
                self.loop_length_secs
            )));
        }
        if !(self.transform.timeout_secs.is_finite() && self.transform.timeout_secs > 0.0) {
            return Err(ConfigError::Invalid(
                "transform.timeout_secs must be positive".to_string(),
            ));
        }
        if self.render_workers == 0 {
            return Err(ConfigError::Invalid(
                "render_workers must be at least 1".to_string(),
            ));
        }
        if self.render_queue == 0 || self.notification_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacities must be at least 1".to_string(),
            ));
        }
        if self.count_in.clicks == 0 {
            return Err(ConfigError::Invalid(
                "count_in.clicks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create the render, sessions and recordings directories
    pub fn ensure_directories(&self) -> ConfigResult<()> {
        for dir in [&self.render_dir, &self.sessions_dir, &self.recordings_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn loop_length(&self) -> Duration {
        Duration::from_secs_f64(self.loop_length_secs)
    }

    pub fn sound_stretch(&self) -> SoundStretch {
        let stretch = SoundStretch::new(&self.transform.program, &self.render_dir)
            .with_timeout(Duration::from_secs_f64(self.transform.timeout_secs));
        match &self.transform.working_dir {
            Some(dir) => stretch.with_working_dir(dir),
            None => stretch,
        }
    }

    /// Count-in for a loop of `loop_length`, None unless requested or always on
    pub fn count_in(&self, loop_length: Duration, requested: bool) -> Option<CountIn> {
        (requested || self.count_in.always).then(|| CountIn {
            interval: count_in_interval(loop_length),
            clicks: self.count_in.clicks,
        })
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            render_dir: config.render_dir.clone(),
            render_workers: config.render_workers,
            render_queue: config.render_queue,
            loop_length: config.loop_length(),
            notification_capacity: config.notification_capacity,
        }
    }
}
