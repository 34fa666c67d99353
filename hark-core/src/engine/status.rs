//! Shared status snapshot and cancellation flag.
//!
//! The capture loop is the only writer of both session state and status; the
//! handles exist so other threads (a UI, a watchdog) can observe or stop it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{ipc::events::CaptureState, vad::ClassifierMode};

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStatus {
    pub state: CaptureState,
    pub is_listening: bool,
    pub is_recording: bool,
    /// Mean absolute amplitude of the last frame.
    pub current_volume_level: f32,
    /// Recorded audio so far, trailing silence included.
    pub recording_duration_s: f64,
    pub classifier_mode: ClassifierMode,
    pub last_speech_detected_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub start_buffered: usize,
    pub end_buffered: usize,
    pub recorded_frames: usize,
}

impl CaptureStatus {
    pub fn idle(classifier_mode: ClassifierMode) -> Self {
        Self {
            state: CaptureState::Idle,
            is_listening: false,
            is_recording: false,
            current_volume_level: 0.0,
            recording_duration_s: 0.0,
            classifier_mode,
            last_speech_detected_at: None,
            session_id: None,
            start_buffered: 0,
            end_buffered: 0,
            recorded_frames: 0,
        }
    }
}

/// Cloneable, thread-safe access to the latest [`CaptureStatus`].
#[derive(Debug, Clone)]
pub struct StatusHandle(Arc<Mutex<CaptureStatus>>);

impl StatusHandle {
    pub fn new(classifier_mode: ClassifierMode) -> Self {
        Self(Arc::new(Mutex::new(CaptureStatus::idle(classifier_mode))))
    }

    pub fn snapshot(&self) -> CaptureStatus {
        self.0.lock().clone()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut CaptureStatus)) {
        f(&mut self.0.lock());
    }
}

/// Requests that the running session stop at the next frame boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_through_clones() {
        let handle = CancelHandle::new();
        let remote = handle.clone();
        assert!(!handle.is_cancelled());
        remote.cancel();
        assert!(handle.is_cancelled());
        handle.reset();
        assert!(!remote.is_cancelled());
    }

    #[test]
    fn status_updates_are_shared() {
        let status = StatusHandle::new(ClassifierMode::Ml);
        let reader = status.clone();
        status.update(|s| {
            s.state = CaptureState::Recording;
            s.is_recording = true;
        });
        let snap = reader.snapshot();
        assert_eq!(snap.state, CaptureState::Recording);
        assert!(snap.is_recording);
        assert_eq!(snap.classifier_mode, ClassifierMode::Ml);
    }

    #[test]
    fn status_serializes_camel_case() {
        let json = serde_json::to_value(CaptureStatus::idle(ClassifierMode::Fallback))
            .expect("serialize status");
        assert_eq!(json["state"], "idle");
        assert_eq!(json["isListening"], false);
        assert_eq!(json["classifierMode"], "fallback");
        assert!(json["lastSpeechDetectedAt"].is_null());
    }
}
