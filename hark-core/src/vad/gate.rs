//! `ClassifierGate`: one bounded model load, then a permanent Ready/Unavailable flag.
//!
//! ## Lifecycle
//!
//! ```text
//! ClassifierGate::initialize(loader, policy)
//!     ├─► load Ok                  → Ready(ml)      mode = Ml
//!     ├─► Transient × max_attempts → Unavailable    mode = Fallback (for good)
//!     └─► Fatal                    → Unavailable    mode = Fallback (for good)
//! ```
//!
//! The loader is invoked only from `initialize`; nothing on the per-frame path
//! ever retries it. While `Ready`, a classifier error on one frame yields a
//! silent frame and a diagnostics entry; the model stays in use.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::{ClassifierMode, Detection, EnergyClassifier, SpeechActivityClassifier};
use crate::{
    buffering::AudioFrame,
    config::CaptureConfig,
    diagnostics::{DiagnosticCategory, DiagnosticsHandle},
};

/// Why a model load attempt failed.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Worth another attempt (network hiccup, file briefly locked).
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying cannot help (file missing, corrupt model).
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Produces the ML classifier. The concrete fetch/load mechanism lives behind this.
pub trait ModelLoader {
    fn load(&mut self) -> std::result::Result<Box<dyn SpeechActivityClassifier>, LoadError>;
}

impl<F> ModelLoader for F
where
    F: FnMut() -> std::result::Result<Box<dyn SpeechActivityClassifier>, LoadError>,
{
    fn load(&mut self) -> std::result::Result<Box<dyn SpeechActivityClassifier>, LoadError> {
        self()
    }
}

/// How hard `initialize` tries before giving up on the model.
#[derive(Debug, Clone)]
pub struct LoadPolicy {
    /// Total load attempts, including the first. Default: 3.
    pub max_attempts: u32,
    /// Pause between attempts. Default: 250 ms.
    pub retry_delay: Duration,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(250),
        }
    }
}

enum MlSlot {
    Ready(Box<dyn SpeechActivityClassifier>),
    Unavailable,
}

pub struct ClassifierGate {
    ml: MlSlot,
    energy: EnergyClassifier,
    diagnostics: DiagnosticsHandle,
}

impl ClassifierGate {
    /// Load the ML classifier under `policy`, falling back to energy for good on failure.
    pub fn initialize(
        loader: &mut dyn ModelLoader,
        policy: &LoadPolicy,
        config: &CaptureConfig,
        diagnostics: DiagnosticsHandle,
    ) -> Self {
        let attempts = policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match loader.load() {
                Ok(classifier) => {
                    info!(
                        attempt,
                        classifier = classifier.name(),
                        "speech classifier loaded"
                    );
                    return Self::with_classifier(classifier, config, diagnostics);
                }
                Err(LoadError::Transient(msg)) => {
                    warn!(attempt, max_attempts = attempts, error = %msg, "classifier load attempt failed");
                    last_error = Some(msg);
                    if attempt < attempts && !policy.retry_delay.is_zero() {
                        std::thread::sleep(policy.retry_delay);
                    }
                }
                Err(LoadError::Fatal(msg)) => {
                    warn!(attempt, error = %msg, "classifier load failed permanently");
                    last_error = Some(msg);
                    break;
                }
            }
        }

        let reason = last_error.unwrap_or_else(|| "no load attempt made".into());
        diagnostics.record(
            DiagnosticCategory::ClassifierLoad,
            format!("speech classifier unavailable: {reason}"),
        );
        Self::fallback_only(config, diagnostics)
    }

    /// Gate with an already-loaded ML classifier.
    pub fn with_classifier(
        mut classifier: Box<dyn SpeechActivityClassifier>,
        config: &CaptureConfig,
        diagnostics: DiagnosticsHandle,
    ) -> Self {
        classifier.configure(config);
        Self {
            ml: MlSlot::Ready(classifier),
            energy: EnergyClassifier::new(config.fallback_volume_threshold),
            diagnostics,
        }
    }

    /// Gate that only ever uses the energy classifier.
    pub fn fallback_only(config: &CaptureConfig, diagnostics: DiagnosticsHandle) -> Self {
        warn!(
            threshold = config.fallback_volume_threshold,
            "using energy classifier fallback"
        );
        diagnostics.record(
            DiagnosticCategory::Fallback,
            "energy classifier fallback active for the rest of the process",
        );
        Self {
            ml: MlSlot::Unavailable,
            energy: EnergyClassifier::new(config.fallback_volume_threshold),
            diagnostics,
        }
    }

    /// Whether the ML classifier is loaded. Once false, false forever.
    pub fn is_ready(&self) -> bool {
        matches!(self.ml, MlSlot::Ready(_))
    }

    pub fn mode(&self) -> ClassifierMode {
        match self.ml {
            MlSlot::Ready(_) => ClassifierMode::Ml,
            MlSlot::Unavailable => ClassifierMode::Fallback,
        }
    }

    /// Classify a frame. Never fails and never errs toward speech.
    pub fn detect(&mut self, frame: &AudioFrame) -> Detection {
        match &mut self.ml {
            MlSlot::Ready(classifier) => match classifier.detect(frame) {
                Ok(detection) => Detection {
                    is_speech: detection.is_speech,
                    confidence: detection.confidence.clamp(0.0, 1.0),
                },
                Err(e) => {
                    warn!(frame = frame.index, error = %e, "classifier error, treating frame as silence");
                    self.diagnostics.record(
                        DiagnosticCategory::ClassifierRuntime,
                        format!("frame {}: {e}", frame.index),
                    );
                    Detection::silence()
                }
            },
            MlSlot::Unavailable => self.energy.classify(frame),
        }
    }

    /// Run the ML classifier directly, surfacing its error. Used by the self-test.
    pub fn probe_ml(&mut self, frame: &AudioFrame) -> Option<crate::error::Result<Detection>> {
        match &mut self.ml {
            MlSlot::Ready(classifier) => Some(classifier.detect(frame)),
            MlSlot::Unavailable => None,
        }
    }

    /// Apply thresholds from a validated config.
    pub fn configure(&mut self, config: &CaptureConfig) {
        if let MlSlot::Ready(classifier) = &mut self.ml {
            classifier.configure(config);
        }
        self.energy.configure(config);
    }

    /// Clear per-session classifier state.
    pub fn reset(&mut self) {
        if let MlSlot::Ready(classifier) = &mut self.ml {
            classifier.reset();
        }
    }

    pub fn classifier_name(&self) -> &'static str {
        match &self.ml {
            MlSlot::Ready(classifier) => classifier.name(),
            MlSlot::Unavailable => "energy",
        }
    }
}

impl std::fmt::Debug for ClassifierGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierGate")
            .field("mode", &self.mode())
            .field("classifier", &self.classifier_name())
            .finish_non_exhaustive()
    }
}
