//! One capture session: the state machine driving a single utterance.
//!
//! ```text
//! Idle ─open─► AwaitingSpeech ─speech─► Recording ─trailing full─► Finalizing
//!                    │                      │                         ├─ ≥ min ─► Complete
//!                    └─ preroll full ─► TimedOut                      └─ < min ─► Error (TooShort)
//! any ─ device error ─► Error (Err)     any ─ cancel ─► Error (Cancelled)
//! ```
//!
//! The loop runs on the caller's thread and is the only code touching the
//! recorder. The open [`FrameStream`] lives in this function's scope, so the
//! device is released on every return path and during unwinding.

use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use super::status::{CancelHandle, StatusHandle};
use crate::{
    audio::{AudioInput, FrameStream},
    buffering::AudioFrame,
    config::CaptureConfig,
    diagnostics::{DiagnosticCategory, DiagnosticsHandle},
    error::Result,
    ipc::events::{AudioActivityEvent, CaptureState, SessionStateEvent},
    recorder::{RecorderSignal, UtteranceRecorder},
    utterance::Utterance,
    vad::ClassifierGate,
};

/// How a session ended when the device itself did not fail.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// Speech followed by enough trailing silence, long enough to keep.
    Complete(Utterance),
    /// No speech before the preroll filled.
    TimedOut,
    /// Speech ended but the utterance was shorter than the minimum.
    TooShort { duration_s: f64 },
    /// Stopped through a [`CancelHandle`](super::CancelHandle).
    Cancelled,
}

impl CaptureOutcome {
    pub fn utterance(&self) -> Option<&Utterance> {
        match self {
            CaptureOutcome::Complete(utterance) => Some(utterance),
            _ => None,
        }
    }

    pub fn into_utterance(self) -> Option<Utterance> {
        match self {
            CaptureOutcome::Complete(utterance) => Some(utterance),
            _ => None,
        }
    }

    /// Terminal state the session ended in.
    pub fn state(&self) -> CaptureState {
        match self {
            CaptureOutcome::Complete(_) => CaptureState::Complete,
            CaptureOutcome::TimedOut => CaptureState::TimedOut,
            CaptureOutcome::TooShort { .. } | CaptureOutcome::Cancelled => CaptureState::Error,
        }
    }
}

/// Everything a session borrows from its engine.
pub(crate) struct SessionContext<'a> {
    pub id: String,
    pub config: &'a CaptureConfig,
    pub recorder: UtteranceRecorder,
    pub gate: &'a mut ClassifierGate,
    pub input: &'a mut dyn AudioInput,
    pub diagnostics: &'a DiagnosticsHandle,
    pub status: &'a StatusHandle,
    pub cancel: &'a CancelHandle,
    pub activity_tx: &'a broadcast::Sender<AudioActivityEvent>,
    pub state_tx: &'a broadcast::Sender<SessionStateEvent>,
    pub activity_seq: &'a mut u64,
}

/// Run a session to its terminal state.
pub(crate) fn run(mut ctx: SessionContext<'_>) -> Result<CaptureOutcome> {
    let span = info_span!(
        "capture_session",
        session_id = %ctx.id,
        classifier = ctx.gate.classifier_name()
    );
    let _guard = span.enter();

    let mode = ctx.gate.mode();
    ctx.gate.reset();
    ctx.recorder.clear();
    ctx.status.update(|s| {
        *s = super::CaptureStatus::idle(mode);
        s.session_id = Some(ctx.id.clone());
        s.is_listening = true;
    });

    let result = match ctx.input.open(ctx.config) {
        Ok(stream) => capture(&mut ctx, stream),
        Err(e) => {
            error!(error = %e, "failed to open input device");
            ctx.diagnostics
                .record(DiagnosticCategory::Device, format!("open failed: {e}"));
            Err(e)
        }
    };

    ctx.recorder.clear();
    match &result {
        Ok(outcome) => {
            ctx.diagnostics
                .record(DiagnosticCategory::Session, outcome_summary(&ctx, outcome));
            let detail = match outcome {
                CaptureOutcome::Complete(_) => None,
                CaptureOutcome::TimedOut => Some("no speech detected".to_string()),
                CaptureOutcome::TooShort { duration_s } => {
                    Some(format!("utterance too short ({duration_s:.2} s)"))
                }
                CaptureOutcome::Cancelled => Some("cancelled".to_string()),
            };
            transition(&ctx, outcome.state(), detail);
        }
        Err(e) => transition(&ctx, CaptureState::Error, Some(e.to_string())),
    }
    ctx.status.update(|s| {
        s.is_listening = false;
        s.is_recording = false;
        s.start_buffered = 0;
        s.end_buffered = 0;
        s.recorded_frames = 0;
    });
    result
}

/// Frame loop. Owns `stream`; it is dropped before any outcome is reported.
fn capture(ctx: &mut SessionContext<'_>, mut stream: Box<dyn FrameStream>) -> Result<CaptureOutcome> {
    info!(
        sample_rate = ctx.config.sample_rate_hz,
        frame_duration_s = ctx.config.frame_duration_s,
        "listening"
    );
    transition(ctx, CaptureState::AwaitingSpeech, None);

    let started = Instant::now();
    let rate = ctx.config.sample_rate_hz;
    let expected = ctx.config.frame_samples();
    let mut samples_seen: u64 = 0;
    let mut index: u64 = 0;

    loop {
        if ctx.cancel.is_cancelled() {
            drop(stream);
            info!(frames = index, "session cancelled");
            return Ok(CaptureOutcome::Cancelled);
        }

        let samples = match stream.read_frame() {
            Ok(samples) => samples,
            Err(e) => {
                drop(stream);
                error!(frame = index, error = %e, "input device read failed");
                ctx.diagnostics
                    .record(DiagnosticCategory::Device, format!("read failed: {e}"));
                return Err(e);
            }
        };
        if samples.len() != expected {
            warn!(frame = index, got = samples.len(), expected, "unexpected frame length");
        }

        let timestamp_s = samples_seen as f64 / rate as f64;
        samples_seen += samples.len() as u64;
        let mut frame = AudioFrame::new(samples, rate, index, timestamp_s);
        index += 1;

        let detection = ctx.gate.detect(&frame);
        frame.is_speech = Some(detection.is_speech);
        frame.confidence = Some(detection.confidence);
        let rms = frame.rms();
        let volume = frame.mean_abs();

        debug!(
            frame = frame.index,
            rms,
            is_speech = detection.is_speech,
            confidence = detection.confidence,
            "frame classified"
        );
        *ctx.activity_seq += 1;
        let _ = ctx.activity_tx.send(AudioActivityEvent {
            seq: *ctx.activity_seq,
            frame_index: frame.index,
            rms,
            volume,
            is_speech: detection.is_speech,
            confidence: detection.confidence,
            classifier_mode: ctx.gate.mode(),
        });

        let was_recording = ctx.recorder.is_recording();
        let signal = ctx.recorder.push(frame, detection.is_speech);
        if detection.is_speech && !was_recording {
            info!(
                frame = index - 1,
                preroll_frames = ctx.recorder.recorded_frames() - 1,
                "speech detected"
            );
            transition(ctx, CaptureState::Recording, None);
        }

        let recorder = &ctx.recorder;
        ctx.status.update(|s| {
            s.current_volume_level = volume;
            s.is_recording = recorder.is_recording();
            s.recording_duration_s = recorder.pending_duration_s();
            s.start_buffered = recorder.start_buffered();
            s.end_buffered = recorder.end_buffered();
            s.recorded_frames = recorder.recorded_frames();
            if detection.is_speech {
                s.last_speech_detected_at = Some(Utc::now());
            }
        });

        match signal {
            RecorderSignal::Continue => {}
            RecorderSignal::StartTimeout => {
                drop(stream);
                info!(
                    frames = index,
                    waited_s = started.elapsed().as_secs_f64(),
                    "no speech before start timeout"
                );
                return Ok(CaptureOutcome::TimedOut);
            }
            RecorderSignal::EndSilence => {
                drop(stream);
                return Ok(finalize(ctx));
            }
        }
    }
}

fn finalize(ctx: &mut SessionContext<'_>) -> CaptureOutcome {
    transition(ctx, CaptureState::Finalizing, None);
    match ctx.recorder.finish(ctx.config.min_record_duration_s) {
        Ok(frames) => {
            let utterance = Utterance::new(frames, ctx.config.sample_rate_hz, ctx.gate.mode());
            info!(
                frames = utterance.frame_count(),
                duration_s = utterance.duration_s(),
                "utterance complete"
            );
            CaptureOutcome::Complete(utterance)
        }
        Err(duration_s) => {
            warn!(
                duration_s,
                min_s = ctx.config.min_record_duration_s,
                "utterance shorter than minimum, discarded"
            );
            CaptureOutcome::TooShort { duration_s }
        }
    }
}

/// One-line history entry for a session that ended without a device error.
fn outcome_summary(ctx: &SessionContext<'_>, outcome: &CaptureOutcome) -> String {
    match outcome {
        CaptureOutcome::Complete(utterance) => format!(
            "{}: utterance complete ({:.2} s, {} frames)",
            ctx.id,
            utterance.duration_s(),
            utterance.frame_count()
        ),
        CaptureOutcome::TimedOut => format!(
            "{}: no speech within {:.2} s",
            ctx.id, ctx.config.max_silence_duration_start_s
        ),
        CaptureOutcome::TooShort { duration_s } => format!(
            "{}: utterance of {duration_s:.2} s below minimum {:.2} s",
            ctx.id, ctx.config.min_record_duration_s
        ),
        CaptureOutcome::Cancelled => format!("{}: cancelled", ctx.id),
    }
}

fn transition(ctx: &SessionContext<'_>, state: CaptureState, detail: Option<String>) {
    debug!(?state, "session state");
    ctx.status.update(|s| s.state = state);
    let _ = ctx.state_tx.send(SessionStateEvent {
        session_id: ctx.id.clone(),
        state,
        detail,
    });
}
