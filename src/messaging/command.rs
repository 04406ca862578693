// Mixer commands - Engine → audio callback

use std::sync::Arc;

use crate::audio::sink::ClipHandle;
use crate::audio::wav::ClipData;

#[derive(Debug, Clone)]
pub enum MixerCommand {
    Start { handle: ClipHandle, clip: Arc<ClipData> },
    Stop(ClipHandle),
    StopAll,
    SetGain(f32),
}
