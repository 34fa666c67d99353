//! cpal-backed [`AudioInput`].
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It mixes to mono and writes into an SPSC ring producer with `push_slice`,
//! which is lock-free. It never logs, locks or performs I/O on the sample path.
//!
//! The capture loop is the consumer. Each `read_frame` call:
//!
//! 1. fails fast if the stream reported an error,
//! 2. skips whole frames of backlog beyond `max_backlog_frames` (drop-oldest),
//! 3. resamples device-rate audio to the configured rate (a rubato failure is a stream error),
//! 4. returns once one full frame is available, or fails after the stall deadline.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, OnceLock,
};
use std::time::{Duration, Instant};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SizedSample, Stream, StreamConfig,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{device::is_loopback_like_name, resample::RateConverter, AudioInput, DeviceProbe, FrameStream};
use crate::{
    buffering::{create_audio_ring, AudioConsumer, AudioProducer, Consumer, Observer, Producer},
    config::CaptureConfig,
    error::{HarkError, Result},
};

/// Frames of queued audio tolerated before the oldest are skipped.
pub const DEFAULT_MAX_BACKLOG_FRAMES: usize = 2;
/// Extra slack on top of four frame durations before a silent device counts as stalled.
const STALL_GRACE: Duration = Duration::from_secs(1);
const STALL_FRAMES: u32 = 4;
const DEFAULT_EMPTY_SLEEP_MS: u64 = 5;
/// Resampler chunk length in device-rate milliseconds.
const RESAMPLE_CHUNK_MS: u32 = 20;

/// Opens the configured (or default) microphone through cpal's default host.
#[derive(Debug, Clone)]
pub struct CpalInput {
    max_backlog_frames: usize,
}

impl CpalInput {
    pub fn new() -> Self {
        Self {
            max_backlog_frames: max_backlog_frames(),
        }
    }

    pub fn with_max_backlog_frames(mut self, frames: usize) -> Self {
        self.max_backlog_frames = frames.max(1);
        self
    }
}

impl Default for CpalInput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioInput for CpalInput {
    fn open(&mut self, config: &CaptureConfig) -> Result<Box<dyn FrameStream>> {
        let stream = CpalFrameStream::open(config, self.max_backlog_frames)?;
        Ok(Box::new(stream))
    }

    fn probe(&self, config: &CaptureConfig) -> Result<DeviceProbe> {
        let host = cpal::default_host();
        let device_count = host
            .input_devices()
            .map_err(|e| HarkError::DeviceUnavailable(e.to_string()))?
            .count();
        if device_count == 0 {
            return Ok(DeviceProbe::default());
        }
        let Ok(device) = select_device(&host, config.device_id.as_deref()) else {
            return Ok(DeviceProbe {
                device_count,
                ..DeviceProbe::default()
            });
        };
        let device_name = device.name().ok();
        Ok(DeviceProbe {
            device_count,
            is_loopback_like: device_name.as_deref().is_some_and(is_loopback_like_name),
            default_sample_rate: device.default_input_config().ok().map(|c| c.sample_rate().0),
            device_name,
        })
    }
}

/// Resolve the preferred device by name, else the default, else the first input.
fn select_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
    if let Some(preferred) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) = devices.find(|d| d.name().map(|n| n == preferred).unwrap_or(false)) {
                    return Ok(device);
                }
                warn!(device = preferred, "configured input device not found, falling back");
            }
            Err(e) => warn!(error = %e, "failed to list input devices while resolving preference"),
        }
    }

    if let Some(device) = host.default_input_device() {
        return Ok(device);
    }
    let mut devices = host
        .input_devices()
        .map_err(|e| HarkError::DeviceUnavailable(e.to_string()))?;
    let first = devices.next().ok_or(HarkError::NoDefaultInputDevice)?;
    warn!("no default input device, using first available input");
    Ok(first)
}

/// An open cpal input stream read frame by frame. Dropping it closes the device.
pub struct CpalFrameStream {
    _stream: Stream,
    running: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<String>>>,
    overflowed: Arc<AtomicU64>,
    consumer: AudioConsumer,
    converter: RateConverter,
    scratch: Vec<f32>,
    ready: Vec<f32>,
    frame_samples: usize,
    /// One frame measured in device-rate samples.
    device_frame_samples: usize,
    max_backlog_frames: usize,
    skipped_frames: u64,
    stall_timeout: Duration,
    device_name: String,
}

impl CpalFrameStream {
    fn open(config: &CaptureConfig, max_backlog_frames: usize) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_device(&host, config.device_id.as_deref())?;
        let device_name = device.name().unwrap_or_default();

        let supported = device
            .default_input_config()
            .map_err(|e| HarkError::DeviceUnavailable(e.to_string()))?;
        let device_rate = supported.sample_rate().0;
        let stream_config: StreamConfig = supported.config();

        info!(
            device = device_name.as_str(),
            device_rate,
            channels = stream_config.channels,
            target_rate = config.sample_rate_hz,
            "opening input device"
        );

        let (producer, consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        let fault = Arc::new(Mutex::new(None));
        let overflowed = Arc::new(AtomicU64::new(0));
        let sink = CallbackSink {
            producer,
            running: Arc::clone(&running),
            overflowed: Arc::clone(&overflowed),
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_mono_stream::<f32>(&device, &stream_config, sink, &fault, |s| s),
            SampleFormat::I16 => {
                build_mono_stream::<i16>(&device, &stream_config, sink, &fault, |s| s as f32 / 32_768.0)
            }
            SampleFormat::I32 => build_mono_stream::<i32>(&device, &stream_config, sink, &fault, |s| {
                s as f32 / 2_147_483_648.0
            }),
            SampleFormat::U16 => build_mono_stream::<u16>(&device, &stream_config, sink, &fault, |s| {
                (s as f32 - 32_768.0) / 32_768.0
            }),
            SampleFormat::U8 => {
                build_mono_stream::<u8>(&device, &stream_config, sink, &fault, |s| (s as f32 - 128.0) / 128.0)
            }
            fmt => {
                return Err(HarkError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;
        stream
            .play()
            .map_err(|e| HarkError::AudioStream(e.to_string()))?;

        let frame_samples = config.frame_samples();
        let device_frame_samples =
            ((frame_samples as f64) * device_rate as f64 / config.sample_rate_hz as f64).ceil() as usize;
        let chunk = (device_rate / (1_000 / RESAMPLE_CHUNK_MS)).max(1) as usize;
        let converter = RateConverter::new(device_rate, config.sample_rate_hz, chunk)?;

        Ok(Self {
            _stream: stream,
            running,
            fault,
            overflowed,
            consumer,
            converter,
            scratch: vec![0.0; device_frame_samples.max(chunk)],
            ready: Vec::with_capacity(frame_samples * 2),
            frame_samples,
            device_frame_samples: device_frame_samples.max(1),
            max_backlog_frames,
            skipped_frames: 0,
            stall_timeout: Duration::from_secs_f64(config.frame_duration_s) * STALL_FRAMES + STALL_GRACE,
            device_name,
        })
    }

    /// Skip whole frames of the oldest queued audio while the backlog is too deep.
    fn shed_backlog(&mut self) {
        let limit = self.max_backlog_frames * self.device_frame_samples;
        let queued = self.consumer.occupied_len();
        if queued <= limit {
            return;
        }
        let frames = (queued - limit).div_ceil(self.device_frame_samples);
        let skipped = self.consumer.skip(frames * self.device_frame_samples);
        if skipped > 0 {
            self.skipped_frames += frames as u64;
            self.converter.reset();
            self.ready.clear();
            warn!(
                frames,
                total_skipped = self.skipped_frames,
                "capture loop behind, dropped oldest audio"
            );
        }
    }
}

impl FrameStream for CpalFrameStream {
    fn read_frame(&mut self) -> Result<Vec<f32>> {
        let started = Instant::now();
        loop {
            if let Some(msg) = self.fault.lock().take() {
                return Err(HarkError::AudioStream(msg));
            }
            if self.ready.len() >= self.frame_samples {
                let rest = self.ready.split_off(self.frame_samples);
                return Ok(std::mem::replace(&mut self.ready, rest));
            }

            self.shed_backlog();
            let n = self.consumer.pop_slice(&mut self.scratch);
            if n == 0 {
                if started.elapsed() > self.stall_timeout {
                    error!(
                        device = self.device_name.as_str(),
                        waited_ms = started.elapsed().as_millis() as u64,
                        "input device stopped delivering audio"
                    );
                    return Err(HarkError::AudioStream(format!(
                        "no audio from '{}' for {:?}",
                        self.device_name, self.stall_timeout
                    )));
                }
                std::thread::sleep(Duration::from_millis(empty_sleep_ms()));
                continue;
            }
            let converted = self.converter.process(&self.scratch[..n])?;
            self.ready.extend_from_slice(&converted);
        }
    }
}

impl Drop for CpalFrameStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let overflowed = self.overflowed.load(Ordering::Relaxed);
        if overflowed > 0 {
            warn!(samples = overflowed, "ring buffer overflowed during capture");
        }
        info!(
            device = self.device_name.as_str(),
            skipped_frames = self.skipped_frames,
            "input device closed"
        );
    }
}

/// Everything the audio callback owns.
struct CallbackSink {
    producer: AudioProducer,
    running: Arc<AtomicBool>,
    overflowed: Arc<AtomicU64>,
}

fn build_mono_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut sink: CallbackSink,
    fault: &Arc<Mutex<Option<String>>>,
    to_f32: fn(T) -> f32,
) -> Result<Stream>
where
    T: SizedSample + 'static,
{
    let channels = config.channels.max(1) as usize;
    let mut mix: Vec<f32> = Vec::new();
    let fault = Arc::clone(fault);

    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !sink.running.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / channels;
                mix.resize(frames, 0.0);
                for (f, out) in mix.iter_mut().enumerate() {
                    let base = f * channels;
                    let sum: f32 = data[base..base + channels].iter().map(|&s| to_f32(s)).sum();
                    *out = sum / channels as f32;
                }
                let written = sink.producer.push_slice(&mix);
                if written < mix.len() {
                    sink.overflowed
                        .fetch_add((mix.len() - written) as u64, Ordering::Relaxed);
                }
            },
            move |err| {
                error!(error = %err, "audio stream error");
                *fault.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| HarkError::AudioStream(e.to_string()))
}

fn max_backlog_frames() -> usize {
    std::env::var("HARK_MAX_BACKLOG_FRAMES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .map(|v| v.clamp(1, 16))
        .unwrap_or(DEFAULT_MAX_BACKLOG_FRAMES)
}

fn empty_sleep_ms() -> u64 {
    static EMPTY_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *EMPTY_SLEEP_MS.get_or_init(|| {
        let ms = std::env::var("HARK_EMPTY_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_EMPTY_SLEEP_MS);
        debug!(ms, "capture poll interval");
        ms
    })
}
