// Audio output - cpal stream driving the software mixer
//
// The stream accepts F32, I16 and U16 devices; mixing happens in f32 and is
// converted when written to the device buffer.
//
// On macOS (CoreAudio) the Stream is not Send, so `AudioOutput` stays on the
// thread that opened it. Only `CpalPlaybackSink` is shared with the engine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer};

use crate::audio::mixer::Mixer;
use crate::audio::sink::{ClipHandle, PlaybackError, PlaybackSink};
use crate::audio::wav::{ClipData, load_wav};
use crate::messaging::channels::{
    MixerConsumer, MixerProducer, NotificationProducer, create_mixer_channel,
};
use crate::messaging::command::MixerCommand;
use crate::messaging::notification::{Notification, NotificationCategory};

const MIXER_QUEUE_CAPACITY: usize = 1024;
const MAX_VOICES: usize = 128;

/// Write a stereo frame into an interleaved device frame of any width
#[inline]
fn write_stereo_frame<T>((left, right): (f32, f32), frame: &mut [T])
where
    T: Sample + FromSample<f32>,
{
    match frame.len() {
        0 => {}
        1 => frame[0] = T::from_sample((left + right) * 0.5),
        _ => {
            frame[0] = T::from_sample(left);
            frame[1] = T::from_sample(right);
            for sample in frame.iter_mut().skip(2) {
                *sample = T::from_sample(0.0_f32);
            }
        }
    }
}

/// Owner of the running output stream
pub struct AudioOutput {
    _device: Device,
    _stream: Stream,
    sample_rate: f32,
}

impl AudioOutput {
    /// Open the default output device and start the mixer stream
    pub fn open(
        notification_tx: Arc<Mutex<NotificationProducer>>,
    ) -> Result<(Self, Arc<CpalPlaybackSink>), PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Device("No output device found".to_string()))?;

        log::info!(
            "Output device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let supported_config = device
            .default_output_config()
            .map_err(|e| PlaybackError::Device(format!("Configuration error: {}", e)))?;
        let sample_format = supported_config.sample_format();
        log::debug!("Output config: {:?}", supported_config);

        let sample_rate = supported_config.sample_rate().0 as f32;
        let channels = supported_config.channels() as usize;
        let config: StreamConfig = supported_config.into();

        let (producer, consumer) = create_mixer_channel(MIXER_QUEUE_CAPACITY);
        let mixer = Mixer::new(sample_rate, MAX_VOICES);

        let stream = match sample_format {
            SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config, channels, mixer, consumer, notification_tx)
            }
            SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config, channels, mixer, consumer, notification_tx)
            }
            SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config, channels, mixer, consumer, notification_tx)
            }
            other => Err(PlaybackError::Device(format!(
                "Unsupported sample format: {:?}",
                other
            ))),
        }?;

        stream
            .play()
            .map_err(|e| PlaybackError::Device(format!("Failed to start stream: {}", e)))?;

        let sink = Arc::new(CpalPlaybackSink::new(producer));
        Ok((
            Self {
                _device: device,
                _stream: stream,
                sample_rate,
            },
            sink,
        ))
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        channels: usize,
        mut mixer: Mixer,
        mut commands: MixerConsumer,
        notification_tx: Arc<Mutex<NotificationProducer>>,
    ) -> Result<Stream, PlaybackError>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    while let Some(command) = commands.try_pop() {
                        mixer.apply(command);
                    }
                    for frame in data.chunks_mut(channels) {
                        write_stereo_frame(mixer.next_frame(), frame);
                    }
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                    if let Ok(mut tx) = notification_tx.try_lock() {
                        let _ = tx.try_push(Notification::error(
                            NotificationCategory::Playback,
                            format!("Audio stream error: {}", err),
                        ));
                    }
                },
                None,
            )
            .map_err(|e| PlaybackError::Device(format!("Error in stream creation: {}", e)))
    }
}

/// Playback sink feeding the output mixer
///
/// Decoded clips are kept in memory by path so a repeated transposition is
/// decoded once.
pub struct CpalPlaybackSink {
    commands: Mutex<MixerProducer>,
    clips: Mutex<HashMap<PathBuf, Arc<ClipData>>>,
    next_handle: AtomicU64,
}

impl CpalPlaybackSink {
    fn new(commands: MixerProducer) -> Self {
        Self {
            commands: Mutex::new(commands),
            clips: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn clip(&self, path: &Path) -> Result<Arc<ClipData>, PlaybackError> {
        if let Ok(clips) = self.clips.lock() {
            if let Some(clip) = clips.get(path) {
                return Ok(Arc::clone(clip));
            }
        }

        let clip = Arc::new(load_wav(path).map_err(|e| PlaybackError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?);
        if let Ok(mut clips) = self.clips.lock() {
            clips.insert(path.to_path_buf(), Arc::clone(&clip));
        }
        Ok(clip)
    }

    fn send(&self, command: MixerCommand) -> Result<(), PlaybackError> {
        let mut tx = self
            .commands
            .lock()
            .map_err(|_| PlaybackError::Device("Mixer queue poisoned".to_string()))?;
        tx.try_push(command).map_err(|_| PlaybackError::QueueFull)
    }

    pub fn set_gain(&self, gain: f32) -> Result<(), PlaybackError> {
        self.send(MixerCommand::SetGain(gain))
    }
}

impl PlaybackSink for CpalPlaybackSink {
    fn start(&self, path: &Path) -> Result<ClipHandle, PlaybackError> {
        let clip = self.clip(path)?;
        let handle = ClipHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.send(MixerCommand::Start { handle, clip })?;
        Ok(handle)
    }

    fn stop(&self, handle: ClipHandle) {
        if let Err(e) = self.send(MixerCommand::Stop(handle)) {
            log::warn!("Could not stop {}: {}", handle, e);
        }
    }

    fn stop_all(&self) {
        if let Err(e) = self.send(MixerCommand::StopAll) {
            log::warn!("Could not stop all clips: {}", e);
        }
    }
}
