//! Speech activity classification.
//!
//! The `SpeechActivityClassifier` trait is the extensibility point: the
//! capture loop never talks to a concrete model. `ClassifierGate` owns the
//! optional ML classifier and the always-available `EnergyClassifier`, and
//! decides per frame which one answers.

pub mod energy;
pub mod gate;

#[cfg(feature = "onnx")]
pub mod silero;

pub use energy::EnergyClassifier;
pub use gate::{ClassifierGate, LoadError, LoadPolicy, ModelLoader};

#[cfg(feature = "onnx")]
pub use silero::{SileroClassifier, SileroLoader};

use serde::{Deserialize, Serialize};

use crate::{buffering::AudioFrame, config::CaptureConfig, error::Result};

/// Outcome of classifying one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub is_speech: bool,
    /// Classifier confidence that the frame holds speech, in [0, 1].
    pub confidence: f32,
}

impl Detection {
    pub fn silence() -> Self {
        Self {
            is_speech: false,
            confidence: 0.0,
        }
    }
}

/// Which classifier produced the decisions of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    /// Pretrained model.
    Ml,
    /// Energy thresholding.
    Fallback,
}

/// Trait for all speech activity classifiers.
///
/// Implementors may be stateful (recurrent model state, partial windows).
pub trait SpeechActivityClassifier: Send + 'static {
    /// Classify one frame. Must finish well within one frame duration.
    ///
    /// # Errors
    /// Any error is treated by the caller as a silent frame.
    fn detect(&mut self, frame: &AudioFrame) -> Result<Detection>;

    /// Pick up thresholds from a freshly applied config.
    fn configure(&mut self, _config: &CaptureConfig) {}

    /// Reset internal state between sessions.
    fn reset(&mut self);

    fn name(&self) -> &'static str;
}
