// Recorder - Capture the default input device into a WAV file
// The input callback pushes into a ring buffer, a writer thread spools it to disk with hound

use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use hound::{WavSpec, WavWriter};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::audio::sink::{RecordingError, RecordingHandle, RecordingSink};

/// Seconds of audio the capture ring buffer can hold before dropping input
const CAPTURE_BUFFER_SECONDS: usize = 2;

const SPOOL_INTERVAL: Duration = Duration::from_millis(5);

/// Drain `consumer` into `writer` until `stop` is raised, then flush what is left
pub fn spool<W>(
    mut consumer: HeapCons<f32>,
    mut writer: WavWriter<W>,
    stop: &AtomicBool,
) -> Result<u64, hound::Error>
where
    W: Write + Seek,
{
    let mut written = 0_u64;
    loop {
        let stopping = stop.load(Ordering::Acquire);
        while let Some(sample) = consumer.try_pop() {
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer.write_sample(value)?;
            written += 1;
        }
        if stopping {
            break;
        }
        thread::sleep(SPOOL_INTERVAL);
    }
    writer.finalize()?;
    Ok(written)
}

struct ActiveRecording {
    handle: RecordingHandle,
    path: PathBuf,
    stream: Stream,
    stop: Arc<AtomicBool>,
    writer: JoinHandle<Result<u64, hound::Error>>,
}

/// Recording sink on the default cpal input device
pub struct CpalRecorder {
    active: Option<ActiveRecording>,
    next_handle: u64,
}

impl CpalRecorder {
    pub fn new() -> Self {
        Self {
            active: None,
            next_handle: 1,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut producer: HeapProd<f32>,
    ) -> Result<Stream, RecordingError>
    where
        T: SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        // Overflow drops input rather than blocking the callback
                        let _ = producer.try_push(f32::from_sample(sample));
                    }
                },
                move |err| log::error!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| RecordingError::Device(format!("Error in stream creation: {}", e)))
    }
}

impl Default for CpalRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink for CpalRecorder {
    fn start_recording(&mut self, path: &Path) -> Result<RecordingHandle, RecordingError> {
        if self.active.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| RecordingError::Device("No input device found".to_string()))?;
        let supported_config = device
            .default_input_config()
            .map_err(|e| RecordingError::Device(format!("Configuration error: {}", e)))?;

        let sample_format = supported_config.sample_format();
        let sample_rate = supported_config.sample_rate().0;
        let channels = supported_config.channels();
        let config: StreamConfig = supported_config.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let writer = WavWriter::create(
            path,
            WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
        )?;

        let capacity = sample_rate as usize * channels as usize * CAPTURE_BUFFER_SECONDS;
        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, producer),
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, producer),
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, producer),
            other => Err(RecordingError::Device(format!(
                "Unsupported sample format: {:?}",
                other
            ))),
        }?;

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("wav-writer".to_string())
                .spawn(move || spool(consumer, writer, &stop))?
        };

        stream
            .play()
            .map_err(|e| RecordingError::Device(format!("Failed to start capture: {}", e)))?;

        let handle = RecordingHandle::new(self.next_handle);
        self.next_handle += 1;
        log::info!("Recording to {}", path.display());

        self.active = Some(ActiveRecording {
            handle,
            path: path.to_path_buf(),
            stream,
            stop,
            writer,
        });
        Ok(handle)
    }

    fn stop_recording(&mut self, handle: RecordingHandle) -> Result<PathBuf, RecordingError> {
        let active = match self.active.take() {
            Some(active) if active.handle == handle => active,
            other => {
                self.active = other;
                return Err(RecordingError::UnknownHandle(handle.id()));
            }
        };

        // Capture ends before the writer drains the buffer
        drop(active.stream);
        active.stop.store(true, Ordering::Release);
        let written = active
            .writer
            .join()
            .map_err(|_| RecordingError::Device("WAV writer thread panicked".to_string()))??;

        log::info!(
            "Recorded {} samples to {}",
            written,
            active.path.display()
        );
        Ok(active.path)
    }
}
