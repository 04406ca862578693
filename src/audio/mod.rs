// Audio module - Playback and recording backends on cpal

pub mod mixer;
pub mod output;
pub mod recorder;
pub mod sink;
pub mod wav;

pub use output::{AudioOutput, CpalPlaybackSink};
pub use recorder::CpalRecorder;
pub use sink::{
    ClipHandle, PlaybackError, PlaybackSink, RecordingError, RecordingHandle, RecordingSink,
    SilentSink,
};
