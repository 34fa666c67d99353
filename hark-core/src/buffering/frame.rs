//! Typed audio frame passed from the device stream to the classifier and recorder.

use serde::{Deserialize, Serialize};

/// One fixed-duration block of mono PCM samples.
///
/// `is_speech` and `confidence` are filled in once the frame has been
/// classified; frames straight from the device carry `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFrame {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Position of this frame within its session, starting at 0.
    pub index: u64,
    /// Seconds from session start to the first sample of this frame.
    pub timestamp_s: f64,
    pub is_speech: Option<bool>,
    pub confidence: Option<f32>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, index: u64, timestamp_s: f64) -> Self {
        Self {
            samples,
            sample_rate,
            index,
            timestamp_s,
            is_speech: None,
            confidence: None,
        }
    }

    /// Returns the duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns true if the frame contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square level of the frame.
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    /// Mean absolute amplitude, used as the displayed volume level.
    pub fn mean_abs(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.abs()).sum::<f32>() / self.samples.len() as f32
    }
}

/// Compute the root-mean-square of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn duration_follows_sample_count() {
        let frame = AudioFrame::new(vec![0.0; 8_000], 16_000, 0, 0.0);
        assert_relative_eq!(frame.duration_secs(), 0.5);
    }

    #[test]
    fn levels_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let frame = AudioFrame::new(samples, 16_000, 3, 1.5);
        assert_relative_eq!(frame.rms(), 0.5, epsilon = 1e-5);
        assert_relative_eq!(frame.mean_abs(), 0.5, epsilon = 1e-5);
    }

    #[test]
    fn empty_frame_is_silent() {
        let frame = AudioFrame::new(vec![], 16_000, 0, 0.0);
        assert!(frame.is_empty());
        assert_eq!(frame.rms(), 0.0);
        assert_eq!(frame.mean_abs(), 0.0);
    }
}
