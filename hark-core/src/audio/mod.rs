//! Audio input: the frame-source contract and its cpal binding.
//!
//! The capture loop only sees [`AudioInput`] and [`FrameStream`]. An open
//! `FrameStream` is the device: dropping it closes the device, so a session
//! releases the microphone on every exit path, unwinding included.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so `FrameStream` is not required to be `Send`. A stream is opened,
//! read and dropped on the capture thread.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
pub mod capture;

pub use device::{list_input_devices, DeviceInfo, DeviceProbe};

#[cfg(feature = "audio-cpal")]
pub use capture::CpalInput;

use crate::{config::CaptureConfig, error::Result};

/// Something that can open the configured input device.
pub trait AudioInput {
    /// Open the device described by `config` and start delivering frames.
    ///
    /// # Errors
    /// `HarkError::NoDefaultInputDevice`, `HarkError::DeviceUnavailable` or
    /// `HarkError::AudioStream` when the device cannot be opened.
    fn open(&mut self, config: &CaptureConfig) -> Result<Box<dyn FrameStream>>;

    /// Inspect the hardware without opening a stream.
    fn probe(&self, config: &CaptureConfig) -> Result<DeviceProbe>;
}

/// An open input device delivering fixed-size mono frames.
pub trait FrameStream {
    /// Block until the next frame of exactly `config.frame_samples()` samples is ready.
    ///
    /// # Errors
    /// Any error is fatal for the session that owns the stream.
    fn read_frame(&mut self) -> Result<Vec<f32>>;
}
