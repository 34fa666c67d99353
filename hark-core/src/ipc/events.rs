//! Event types published by the capture engine.
//!
//! | Event | Sender | When |
//! |-------|--------|------|
//! | `AudioActivityEvent` | `CaptureEngine::subscribe_activity` | every classified frame |
//! | `SessionStateEvent` | `CaptureEngine::subscribe_state` | every state transition |
//!
//! Both serialise camelCase so a kiosk UI can mirror them directly.

use serde::{Deserialize, Serialize};

use crate::vad::ClassifierMode;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Lifecycle of one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureState {
    /// No session running.
    #[default]
    Idle,
    /// Device open, waiting for the first speech frame.
    AwaitingSpeech,
    Recording,
    /// Trailing silence filled; checking the minimum duration.
    Finalizing,
    Complete,
    /// Preroll filled without speech.
    TimedOut,
    /// Device failure, too-short utterance or cancellation.
    Error,
}

impl CaptureState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CaptureState::Complete | CaptureState::TimedOut | CaptureState::Error
        )
    }
}

/// Emitted on every state transition of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateEvent {
    pub session_id: String,
    pub state: CaptureState,
    /// Optional human-readable detail (error message, outcome reason).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Audio activity
// ---------------------------------------------------------------------------

/// Emitted once per classified frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing across sessions.
    pub seq: u64,
    pub frame_index: u64,
    /// Root-mean-square level of the frame.
    pub rms: f32,
    /// Mean absolute amplitude, the level shown on the kiosk meter.
    pub volume: f32,
    pub is_speech: bool,
    pub confidence: f32,
    pub classifier_mode: ClassifierMode,
}
