//! Energy-based classifier used when no ML model is available.
//!
//! ## Algorithm
//!
//! 1. Compute the RMS of the frame.
//! 2. `confidence = clamp(rms / (2 · threshold), 0, 1)`, so the threshold
//!    itself maps to 0.5.
//! 3. Speech iff `rms ≥ threshold` and `rms > 0`; an empty or digitally
//!    silent frame is never speech.
//!
//! No hangover is applied: the trailing-silence buffer already gives
//! utterances their tail.

use super::{Detection, SpeechActivityClassifier};
use crate::{buffering::AudioFrame, config::CaptureConfig, error::Result};

#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    /// RMS amplitude threshold. Typical range: 0.01–0.05 for a kiosk microphone.
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.max(0.0),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Classification that cannot fail; the trait impl wraps this.
    pub fn classify(&self, frame: &AudioFrame) -> Detection {
        if frame.is_empty() {
            return Detection::silence();
        }
        let rms = frame.rms();
        let is_speech = rms > 0.0 && rms >= self.threshold;
        let confidence = if self.threshold <= f32::EPSILON {
            if rms > 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            (rms / (2.0 * self.threshold)).clamp(0.0, 1.0)
        };
        Detection {
            is_speech,
            confidence,
        }
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new(CaptureConfig::default().fallback_volume_threshold)
    }
}

impl SpeechActivityClassifier for EnergyClassifier {
    fn detect(&mut self, frame: &AudioFrame) -> Result<Detection> {
        Ok(self.classify(frame))
    }

    fn configure(&mut self, config: &CaptureConfig) {
        self.threshold = config.fallback_volume_threshold.max(0.0);
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "energy"
    }
}
