//! Capture configuration and the policy that validates it.
//!
//! A config is checked as a whole before anything is applied: every violated
//! field is reported together and nothing changes on failure. The two silence
//! buffer capacities are derived from the timing fields and are only ever
//! recomputed from a config that passed [`CaptureConfig::validate`].

use serde::{Deserialize, Serialize};

use crate::error::{HarkError, Result};

/// Highest accepted capture rate (Hz).
pub const MAX_SAMPLE_RATE_HZ: u32 = 48_000;
/// Longest accepted frame (seconds).
pub const MAX_FRAME_DURATION_S: f64 = 5.0;
/// Longest accepted start or end silence window (seconds).
pub const MAX_SILENCE_DURATION_S: f64 = 3_600.0;

/// Slack applied before rounding `duration / frame` up, so that ratios such as
/// `0.3 / 0.1 = 3.0000000000000004` still yield 3 frames.
const CAPACITY_EPSILON: f64 = 1e-9;

/// Timing and threshold parameters for a capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture sample rate in Hz. Default: 16000.
    pub sample_rate_hz: u32,
    /// Duration of one frame in seconds. Default: 0.5.
    pub frame_duration_s: f64,
    /// Silence tolerated before the first speech frame. Default: 5.0.
    #[serde(alias = "maxSilenceStartS")]
    pub max_silence_duration_start_s: f64,
    /// Trailing silence that ends an utterance. Default: 3.0.
    #[serde(alias = "maxSilenceEndS")]
    pub max_silence_duration_end_s: f64,
    /// Shortest utterance that is handed downstream. Default: 1.0.
    pub min_record_duration_s: f64,
    /// ML classifier speech probability threshold in [0, 1]. Default: 0.2.
    pub vad_threshold: f32,
    /// Preferred input device name. `None` uses the system default.
    pub device_id: Option<String>,
    /// RMS level above which the energy classifier reports speech.
    /// Default: 0.02.
    pub fallback_volume_threshold: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            frame_duration_s: 0.5,
            max_silence_duration_start_s: 5.0,
            max_silence_duration_end_s: 3.0,
            min_record_duration_s: 1.0,
            vad_threshold: 0.2,
            device_id: None,
            fallback_volume_threshold: 0.02,
        }
    }
}

impl CaptureConfig {
    /// Check every numeric field; returns all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.sample_rate_hz == 0 || self.sample_rate_hz > MAX_SAMPLE_RATE_HZ {
            errors.push(format!(
                "sampleRateHz must be within 1-{MAX_SAMPLE_RATE_HZ}, got {}",
                self.sample_rate_hz
            ));
        }
        if !self.frame_duration_s.is_finite()
            || self.frame_duration_s <= 0.0
            || self.frame_duration_s > MAX_FRAME_DURATION_S
        {
            errors.push(format!(
                "frameDurationS must be within (0, {MAX_FRAME_DURATION_S}], got {}",
                self.frame_duration_s
            ));
        } else if self.sample_rate_hz > 0 && self.frame_samples() == 0 {
            errors.push(format!(
                "frameDurationS {} holds no samples at {} Hz",
                self.frame_duration_s, self.sample_rate_hz
            ));
        }
        if !silence_window_ok(self.max_silence_duration_start_s) {
            errors.push(format!(
                "maxSilenceDurationStartS must be within (0, {MAX_SILENCE_DURATION_S}], got {}",
                self.max_silence_duration_start_s
            ));
        }
        if !silence_window_ok(self.max_silence_duration_end_s) {
            errors.push(format!(
                "maxSilenceDurationEndS must be within (0, {MAX_SILENCE_DURATION_S}], got {}",
                self.max_silence_duration_end_s
            ));
        }
        if !self.min_record_duration_s.is_finite() || self.min_record_duration_s < 0.0 {
            errors.push(format!(
                "minRecordDurationS must be >= 0, got {}",
                self.min_record_duration_s
            ));
        }
        if !self.vad_threshold.is_finite() || !(0.0..=1.0).contains(&self.vad_threshold) {
            errors.push(format!(
                "vadThreshold must be within 0.0-1.0, got {}",
                self.vad_threshold
            ));
        }
        if !self.fallback_volume_threshold.is_finite() || self.fallback_volume_threshold <= 0.0 {
            errors.push(format!(
                "fallbackVolumeThreshold must be > 0, got {}",
                self.fallback_volume_threshold
            ));
        }
        if let Some(device) = &self.device_id {
            if device.trim().is_empty() {
                errors.push("deviceId must not be blank".into());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarkError::InvalidConfig(errors))
        }
    }

    /// Samples per frame at the configured rate.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate_hz as f64 * self.frame_duration_s).round() as usize
    }

    /// Buffer capacities for this config. Only meaningful once validated.
    pub fn capacities(&self) -> BufferCapacities {
        BufferCapacities {
            start: frames_for(self.max_silence_duration_start_s, self.frame_duration_s),
            end: frames_for(self.max_silence_duration_end_s, self.frame_duration_s),
        }
    }
}

fn silence_window_ok(duration_s: f64) -> bool {
    duration_s.is_finite() && duration_s > 0.0 && duration_s <= MAX_SILENCE_DURATION_S
}

/// Frame counts of the preroll (`start`) and trailing-silence (`end`) buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferCapacities {
    pub start: usize,
    pub end: usize,
}

/// `ceil(duration / frame)`, never less than one frame.
pub fn frames_for(duration_s: f64, frame_duration_s: f64) -> usize {
    let ratio = duration_s / frame_duration_s;
    ((ratio - CAPACITY_EPSILON).ceil() as usize).max(1)
}
