// looptrack - Multi-track loop sequencer library, exported for the binary, tests and benchmarks

pub mod audio;
pub mod config;
pub mod messaging;
pub mod project;
pub mod render;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use audio::sink::{PlaybackSink, RecordingSink, SilentSink};
pub use config::{ConfigError, EngineConfig};
pub use messaging::channels::create_notification_channel;
pub use project::{Session, SessionError, SessionManager, TrackConfig};
pub use render::{AudioTransform, RenderCache, RenderError, RenderKey, SoundStretch};
pub use sequencer::engine::EngineOptions;
pub use sequencer::{
    LoopEngine, Pattern, PrepareReport, SequencerError, Step, TickReport, TrackId, TrackStatus,
    TransportState,
};
