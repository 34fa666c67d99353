//! # hark-core
//!
//! Voice-activity-gated utterance capture for a voice-ordering kiosk.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → cpal callback → SPSC RingBuffer → FrameStream::read_frame
//!                                                      │
//!                                       ClassifierGate (ML or energy)
//!                                                      │
//!                              preroll / trailing SilenceBuffers → UtteranceRecorder
//!                                                      │
//!                                        CaptureOutcome::Complete(Utterance)
//! ```
//!
//! The audio callback never allocates after warm-up or blocks. Everything
//! else runs on the thread that called `CaptureEngine::start_listening`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod recorder;
pub mod utterance;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{AudioInput, DeviceProbe, FrameStream};
pub use buffering::AudioFrame;
pub use config::{BufferCapacities, CaptureConfig};
pub use diagnostics::{DiagnosticCategory, DiagnosticEntry, DiagnosticsHandle, DiagnosticsSummary};
pub use engine::{
    CancelHandle, CaptureEngine, CaptureOutcome, CaptureStatus, SelfTestReport, StatusHandle,
};
pub use error::{HarkError, Result};
pub use ipc::events::{AudioActivityEvent, CaptureState, SessionStateEvent};
pub use utterance::{Utterance, UtteranceInfo};
pub use vad::{
    ClassifierGate, ClassifierMode, Detection, EnergyClassifier, LoadError, LoadPolicy,
    ModelLoader, SpeechActivityClassifier,
};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalInput;

#[cfg(feature = "onnx")]
pub use vad::{SileroClassifier, SileroLoader};
