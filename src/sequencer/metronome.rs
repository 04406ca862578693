// Metronome - Count-in clicks before a recording
// The click is synthesized once and written as a WAV so any playback sink can play it

use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::audio::sink::PlaybackSink;
use crate::audio::wav::write_wav;

/// Longest gap between two count-in clicks, in seconds
pub const MAX_COUNT_IN_INTERVAL_SECS: f64 = 0.75;

/// Clicks played before capture starts
pub const COUNT_IN_CLICKS: u32 = 4;

const CLICK_SAMPLE_RATE: u32 = 44_100;

/// Metronome click type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickType {
    /// First click of the count-in
    Accent,
    Regular,
}

/// Pre-generated click sounds
#[derive(Debug, Clone)]
pub struct MetronomeSound {
    accent_samples: Vec<f32>,
    regular_samples: Vec<f32>,
    sample_rate: u32,
}

impl MetronomeSound {
    const CLICK_DURATION_MS: f32 = 30.0;

    pub fn new(sample_rate: u32) -> Self {
        let click_samples = ((Self::CLICK_DURATION_MS / 1000.0) * sample_rate as f32) as usize;

        Self {
            accent_samples: Self::generate_click(sample_rate as f32, click_samples, 1200.0, 0.6),
            regular_samples: Self::generate_click(sample_rate as f32, click_samples, 800.0, 0.4),
            sample_rate,
        }
    }

    /// Sine burst with an exponential decay envelope
    fn generate_click(
        sample_rate: f32,
        num_samples: usize,
        frequency: f32,
        amplitude: f32,
    ) -> Vec<f32> {
        let phase_increment = 2.0 * PI * frequency / sample_rate;
        (0..num_samples)
            .map(|i| {
                let t = i as f32 / num_samples as f32;
                let envelope = (-t * 8.0).exp();
                (i as f32 * phase_increment).sin() * envelope * amplitude
            })
            .collect()
    }

    pub fn get_click(&self, click_type: ClickType) -> &[f32] {
        match click_type {
            ClickType::Accent => &self.accent_samples,
            ClickType::Regular => &self.regular_samples,
        }
    }

    /// Write both clicks into `dir`, returning (accent, regular) paths
    pub fn write_to(&self, dir: &Path) -> Result<(PathBuf, PathBuf), hound::Error> {
        std::fs::create_dir_all(dir)?;
        let accent = dir.join("click-accent.wav");
        let regular = dir.join("click.wav");
        write_wav(&accent, &self.accent_samples, self.sample_rate, 1)?;
        write_wav(&regular, &self.regular_samples, self.sample_rate, 1)?;
        Ok((accent, regular))
    }
}

impl Default for MetronomeSound {
    fn default() -> Self {
        Self::new(CLICK_SAMPLE_RATE)
    }
}

/// Gap between count-in clicks: the loop length halved until it is short enough
pub fn count_in_interval(loop_length: Duration) -> Duration {
    let max = Duration::from_secs_f64(MAX_COUNT_IN_INTERVAL_SECS);
    if loop_length.is_zero() {
        return max;
    }
    let mut interval = loop_length;
    while interval > max {
        interval /= 2;
    }
    interval
}

/// Count-in schedule: wait, click, repeated, then one final wait
#[derive(Debug, Clone, PartialEq)]
pub struct CountIn {
    pub interval: Duration,
    pub clicks: u32,
}

impl CountIn {
    pub fn for_loop(loop_length: Duration) -> Self {
        Self {
            interval: count_in_interval(loop_length),
            clicks: COUNT_IN_CLICKS,
        }
    }

    /// Offsets of every click from the start of the count-in
    pub fn click_offsets(&self) -> Vec<(Duration, ClickType)> {
        (1..=self.clicks)
            .map(|n| {
                let click_type = if n == 1 {
                    ClickType::Accent
                } else {
                    ClickType::Regular
                };
                (self.interval * n, click_type)
            })
            .collect()
    }

    /// Time from the start of the count-in until capture begins
    pub fn total(&self) -> Duration {
        self.interval * (self.clicks + 1)
    }

    /// Play the count-in on `sink`, blocking until it is over
    ///
    /// A click that fails to start is logged and the count continues.
    pub fn run(&self, sink: &dyn PlaybackSink, accent: &Path, regular: &Path) {
        for (_, click_type) in self.click_offsets() {
            thread::sleep(self.interval);
            let path = match click_type {
                ClickType::Accent => accent,
                ClickType::Regular => regular,
            };
            if let Err(e) = sink.start(path) {
                log::warn!("Count-in click failed: {}", e);
            }
        }
        thread::sleep(self.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::{ClipHandle, PlaybackError};
    use crate::audio::wav::wav_duration;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_count_in_interval_halves() {
        assert_eq!(
            count_in_interval(Duration::from_secs(2)),
            Duration::from_millis(500)
        );
        assert_eq!(
            count_in_interval(Duration::from_secs(3)),
            Duration::from_millis(750)
        );
        assert_eq!(
            count_in_interval(Duration::from_millis(600)),
            Duration::from_millis(600)
        );
        assert_eq!(
            count_in_interval(Duration::ZERO),
            Duration::from_millis(750)
        );
    }

    #[test]
    fn test_click_offsets() {
        let count_in = CountIn {
            interval: Duration::from_millis(500),
            clicks: 4,
        };
        let offsets = count_in.click_offsets();
        assert_eq!(offsets.len(), 4);
        assert_eq!(offsets[0], (Duration::from_millis(500), ClickType::Accent));
        assert_eq!(offsets[3], (Duration::from_millis(2000), ClickType::Regular));
        assert_eq!(count_in.total(), Duration::from_millis(2500));
    }

    #[test]
    fn test_click_generation() {
        let sound = MetronomeSound::new(44_100);
        let accent = sound.get_click(ClickType::Accent);
        assert!((1322..=1323).contains(&accent.len()));
        assert!(accent.iter().all(|s| s.abs() <= 0.6));

        let peak_start = accent[..100].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        let peak_end = accent[1200..].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak_end < peak_start);
    }

    #[test]
    fn test_write_clicks() {
        let dir = TempDir::new().unwrap();
        let (accent, regular) = MetronomeSound::default().write_to(dir.path()).unwrap();
        let duration = wav_duration(&accent).unwrap();
        assert!((duration.as_secs_f64() - 0.03).abs() < 0.001);
        assert!(regular.exists());
    }

    #[derive(Default)]
    struct Clicks(Mutex<Vec<PathBuf>>);

    impl PlaybackSink for Clicks {
        fn start(&self, path: &Path) -> Result<ClipHandle, PlaybackError> {
            self.0.lock().unwrap().push(path.to_path_buf());
            Ok(ClipHandle::new(0))
        }
        fn stop(&self, _handle: ClipHandle) {}
        fn stop_all(&self) {}
    }

    #[test]
    fn test_run_plays_every_click() {
        let sink = Clicks::default();
        let count_in = CountIn {
            interval: Duration::from_millis(5),
            clicks: 4,
        };
        count_in.run(&sink, Path::new("accent.wav"), Path::new("click.wav"));

        let played = sink.0.lock().unwrap().clone();
        assert_eq!(played.len(), 4);
        assert_eq!(played[0], PathBuf::from("accent.wav"));
        assert_eq!(played[3], PathBuf::from("click.wav"));
    }
}
