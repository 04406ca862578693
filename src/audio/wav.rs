// WAV loading - Decode source files into interleaved f32 frames
// Integer and float encodings are both accepted

use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Decoded audio ready for mixing
#[derive(Debug, Clone, PartialEq)]
pub struct ClipData {
    pub name: String,
    /// Interleaved samples in [-1, 1]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl ClipData {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frames() as u64, self.sample_rate)
    }

    /// Sample of `channel` at `frame`, the last channel repeats for wider outputs
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.channels.max(1) as usize;
        let channel = channel.min(channels - 1);
        self.samples
            .get(frame * channels + channel)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Load a WAV file into memory
pub fn load_wav(path: &Path) -> Result<ClipData, hound::Error> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let max_val = 2.0_f32.powi(i32::from(spec.bits_per_sample) - 1);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|x| x as f32 / max_val))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(ClipData {
        name: path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string(),
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Length of a WAV file, frames divided by frame rate
pub fn wav_duration(path: &Path) -> Result<Duration, hound::Error> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    Ok(frames_to_duration(u64::from(reader.duration()), spec.sample_rate))
}

/// Write interleaved f32 samples as 16-bit PCM
pub fn write_wav(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer.write_sample(value)?;
    }
    writer.finalize()
}

fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(frames.saturating_mul(1_000_000_000) / u64::from(sample_rate))
}
