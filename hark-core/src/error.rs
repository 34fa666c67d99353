use thiserror::Error;

/// All errors produced by hark-core.
///
/// Only device and stream failures end a session with an error. Timeouts and
/// too-short utterances are ordinary outcomes, see
/// [`CaptureOutcome`](crate::engine::CaptureOutcome).
#[derive(Debug, Error)]
pub enum HarkError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("speech classifier failed to load: {0}")]
    ClassifierLoad(String),

    #[error("speech classifier error: {0}")]
    ClassifierRuntime(String),

    #[error("invalid capture config: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[cfg(feature = "onnx")]
    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HarkError {
    /// Whether this error ends the session that raised it.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            HarkError::DeviceUnavailable(_)
                | HarkError::AudioStream(_)
                | HarkError::NoDefaultInputDevice
                | HarkError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HarkError>;
