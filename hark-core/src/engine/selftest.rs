//! Microphone and classifier self-test.
//!
//! Probes the hardware, records a short trial, and runs the classifier over
//! it. Problems become plain-language recommendations for kiosk staff.

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    audio::{AudioInput, DeviceProbe},
    buffering::AudioFrame,
    config::{frames_for, CaptureConfig},
    diagnostics::{DiagnosticCategory, DiagnosticsHandle},
    vad::{ClassifierGate, ClassifierMode},
};

/// Length of the trial recording.
pub const TRIAL_DURATION_S: f64 = 2.0;
/// Average level below which the microphone is considered too quiet.
pub const LOW_VOLUME_LEVEL: f32 = 0.001;

pub const REC_NO_DEVICE: &str = "no input device found; connect a microphone";
pub const REC_RECORDING_FAILED: &str = "trial recording failed; check the microphone connection and permissions";
pub const REC_LOW_VOLUME: &str = "input level is very low; raise the microphone gain or speak closer";
pub const REC_FALLBACK: &str = "speech classifier unavailable; switch to fallback mode (energy threshold)";
pub const REC_LOOPBACK: &str = "selected input looks like a loopback device; choose a microphone instead";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfTestReport {
    pub hardware_ok: bool,
    pub recording_ok: bool,
    pub classifier_ok: bool,
    pub classifier_mode: ClassifierMode,
    pub device: Option<DeviceProbe>,
    pub frames_captured: usize,
    /// Mean absolute amplitude over the trial.
    pub average_volume: f32,
    pub max_volume: f32,
    pub speech_detected: bool,
    pub recommendations: Vec<String>,
}

impl SelfTestReport {
    pub fn passed(&self) -> bool {
        self.hardware_ok && self.recording_ok && self.classifier_ok
    }
}

pub(crate) fn run(
    config: &CaptureConfig,
    input: &mut dyn AudioInput,
    gate: &mut ClassifierGate,
    diagnostics: &DiagnosticsHandle,
) -> SelfTestReport {
    let mut recommendations = Vec::new();

    let device = match input.probe(config) {
        Ok(probe) => Some(probe),
        Err(e) => {
            warn!(error = %e, "device probe failed");
            diagnostics.record(DiagnosticCategory::Device, format!("probe failed: {e}"));
            None
        }
    };
    let hardware_ok = device.as_ref().is_some_and(DeviceProbe::hardware_ok);
    if !hardware_ok {
        recommendations.push(REC_NO_DEVICE.to_string());
    }
    if let Some(probe) = &device {
        if probe.is_loopback_like {
            recommendations.push(REC_LOOPBACK.to_string());
        }
        if let Some(rate) = probe.default_sample_rate {
            if !probe.rate_matches(config.sample_rate_hz) {
                recommendations.push(format!(
                    "device runs at {rate} Hz but capture is configured for {} Hz; audio will be resampled",
                    config.sample_rate_hz
                ));
            }
        }
    }

    let (frames, recording_ok) = record_trial(config, input, diagnostics);
    if !recording_ok {
        recommendations.push(REC_RECORDING_FAILED.to_string());
    }

    let volumes: Vec<f32> = frames.iter().map(AudioFrame::mean_abs).collect();
    let average_volume = if volumes.is_empty() {
        0.0
    } else {
        volumes.iter().sum::<f32>() / volumes.len() as f32
    };
    let max_volume = volumes.iter().copied().fold(0.0f32, f32::max);
    if recording_ok && average_volume < LOW_VOLUME_LEVEL {
        recommendations.push(REC_LOW_VOLUME.to_string());
    }

    let (classifier_ok, speech_detected) = exercise_classifier(config, gate, &frames);
    if !classifier_ok {
        recommendations.push(REC_FALLBACK.to_string());
    }
    gate.reset();

    let report = SelfTestReport {
        hardware_ok,
        recording_ok,
        classifier_ok,
        classifier_mode: gate.mode(),
        device,
        frames_captured: frames.len(),
        average_volume,
        max_volume,
        speech_detected,
        recommendations,
    };
    info!(
        hardware_ok,
        recording_ok,
        classifier_ok,
        average_volume,
        speech_detected,
        "self-test finished"
    );
    report
}

fn record_trial(
    config: &CaptureConfig,
    input: &mut dyn AudioInput,
    diagnostics: &DiagnosticsHandle,
) -> (Vec<AudioFrame>, bool) {
    let wanted = frames_for(TRIAL_DURATION_S, config.frame_duration_s);
    let mut stream = match input.open(config) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "self-test could not open the input device");
            diagnostics.record(DiagnosticCategory::Device, format!("self-test open failed: {e}"));
            return (Vec::new(), false);
        }
    };

    let mut frames = Vec::with_capacity(wanted);
    let mut timestamp_s = 0.0;
    for index in 0..wanted as u64 {
        match stream.read_frame() {
            Ok(samples) => {
                let frame = AudioFrame::new(samples, config.sample_rate_hz, index, timestamp_s);
                timestamp_s += frame.duration_secs();
                frames.push(frame);
            }
            Err(e) => {
                warn!(frame = index, error = %e, "self-test read failed");
                diagnostics.record(DiagnosticCategory::Device, format!("self-test read failed: {e}"));
                return (frames, false);
            }
        }
    }
    (frames, true)
}

/// Returns `(classifier_ok, speech_detected)`.
fn exercise_classifier(
    config: &CaptureConfig,
    gate: &mut ClassifierGate,
    frames: &[AudioFrame],
) -> (bool, bool) {
    if !gate.is_ready() {
        let speech = frames.iter().any(|f| gate.detect(f).is_speech);
        return (false, speech);
    }

    let silent;
    let probes: &[AudioFrame] = if frames.is_empty() {
        silent = [AudioFrame::new(
            vec![0.0; config.frame_samples()],
            config.sample_rate_hz,
            0,
            0.0,
        )];
        &silent
    } else {
        frames
    };

    let mut speech = false;
    for frame in probes {
        match gate.probe_ml(frame) {
            Some(Ok(detection)) => speech |= detection.is_speech,
            Some(Err(e)) => {
                warn!(frame = frame.index, error = %e, "classifier failed on self-test audio");
                return (false, speech);
            }
            None => return (false, speech),
        }
    }
    (true, speech && !frames.is_empty())
}
