// Mixer - Software voice mixing for the output callback
//
// Runs inside the cpal callback: no I/O, no blocking locks. Commands arrive
// through the mixer ring buffer and are applied before each block. Clips
// recorded at another rate are resampled by linear interpolation.

use std::sync::Arc;

use crate::audio::sink::ClipHandle;
use crate::audio::wav::ClipData;
use crate::messaging::command::MixerCommand;

/// Flush values below 1e-15 to zero
#[inline]
pub fn flush_denormals_to_zero(x: f32) -> f32 {
    if x.abs() < 1e-15 { 0.0 } else { x }
}

/// tanh saturation, keeps layered clips from hard clipping
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    x.tanh()
}

/// One-pole smoother for the master gain
///
/// y[n] = y[n-1] + α * (x[n] - y[n-1])
#[derive(Debug, Clone)]
pub struct GainSmoother {
    current: f32,
    coefficient: f32,
}

impl GainSmoother {
    pub fn new(initial_value: f32, time_constant_ms: f32, sample_rate: f32) -> Self {
        let time_constant_samples = (time_constant_ms * 0.001 * sample_rate).max(1.0);
        Self {
            current: initial_value,
            coefficient: (1.0 / time_constant_samples).min(1.0),
        }
    }

    #[inline]
    pub fn process(&mut self, target: f32) -> f32 {
        self.current += self.coefficient * (target - self.current);
        self.current = flush_denormals_to_zero(self.current);
        self.current
    }

    pub fn get(&self) -> f32 {
        self.current
    }
}

#[derive(Debug)]
struct Voice {
    handle: ClipHandle,
    clip: Arc<ClipData>,
    position: f64,
    step: f64,
}

impl Voice {
    fn finished(&self) -> bool {
        self.position >= self.clip.frames() as f64
    }

    #[inline]
    fn next_stereo(&mut self) -> (f32, f32) {
        let frame = self.position as usize;
        let frac = (self.position - frame as f64) as f32;
        let next = frame + 1;

        let lerp = |channel: usize| {
            let a = self.clip.sample(frame, channel);
            let b = if next < self.clip.frames() {
                self.clip.sample(next, channel)
            } else {
                0.0
            };
            a + (b - a) * frac
        };
        let out = (lerp(0), lerp(1));
        self.position += self.step;
        out
    }
}

/// Sums every sounding clip into a stereo stream
pub struct Mixer {
    voices: Vec<Voice>,
    output_rate: f32,
    gain: f32,
    smoother: GainSmoother,
}

impl Mixer {
    pub fn new(output_rate: f32, max_voices: usize) -> Self {
        Self {
            voices: Vec::with_capacity(max_voices),
            output_rate,
            gain: 0.8,
            smoother: GainSmoother::new(0.8, 10.0, output_rate),
        }
    }

    pub fn apply(&mut self, command: MixerCommand) {
        match command {
            MixerCommand::Start { handle, clip } => {
                let step = if self.output_rate > 0.0 {
                    f64::from(clip.sample_rate) / f64::from(self.output_rate)
                } else {
                    1.0
                };
                self.voices.push(Voice {
                    handle,
                    clip,
                    position: 0.0,
                    step,
                });
            }
            MixerCommand::Stop(handle) => self.voices.retain(|v| v.handle != handle),
            MixerCommand::StopAll => self.voices.clear(),
            MixerCommand::SetGain(gain) => self.gain = gain.clamp(0.0, 1.0),
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn is_sounding(&self, handle: ClipHandle) -> bool {
        self.voices.iter().any(|v| v.handle == handle)
    }

    /// Next stereo output frame
    pub fn next_frame(&mut self) -> (f32, f32) {
        let mut left = 0.0;
        let mut right = 0.0;
        for voice in &mut self.voices {
            let (l, r) = voice.next_stereo();
            left += l;
            right += r;
        }
        self.voices.retain(|v| !v.finished());

        let gain = self.smoother.process(self.gain);
        (
            soft_clip(flush_denormals_to_zero(left) * gain),
            soft_clip(flush_denormals_to_zero(right) * gain),
        )
    }
}
