//! `CaptureEngine`: owns everything one kiosk needs to capture utterances.
//!
//! ## Lifecycle
//!
//! ```text
//! CaptureEngine::new(config, input, gate, diagnostics)   config validated
//!     ├─► start_listening()   one session, blocks until a terminal state
//!     ├─► update_config()     only between sessions (&mut self)
//!     └─► self_test()         probe + 2 s trial recording
//! ```
//!
//! ## Threading
//!
//! Sessions run on the caller's thread; `cpal::Stream` is `!Send`, so the
//! device is opened and dropped there too. Run the engine inside
//! `tokio::task::spawn_blocking` from async code. Other threads observe it
//! through [`StatusHandle`], stop it through [`CancelHandle`], and receive
//! live events from the broadcast receivers.
//!
//! Engines share nothing: a host with several kiosks creates one engine,
//! one input and one classifier gate per kiosk.

pub mod selftest;
pub mod session;
pub mod status;

pub use selftest::SelfTestReport;
pub use session::CaptureOutcome;
pub use status::{CancelHandle, CaptureStatus, StatusHandle};

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::AudioInput,
    config::{BufferCapacities, CaptureConfig},
    diagnostics::{DiagnosticCategory, DiagnosticEntry, DiagnosticsHandle, DiagnosticsSummary},
    error::Result,
    ipc::events::{AudioActivityEvent, SessionStateEvent},
    recorder::UtteranceRecorder,
    vad::{ClassifierGate, ClassifierMode},
};

/// Broadcast channel capacity; slow subscribers lag rather than block the loop.
const BROADCAST_CAP: usize = 256;

pub struct CaptureEngine {
    config: CaptureConfig,
    capacities: BufferCapacities,
    input: Box<dyn AudioInput>,
    gate: ClassifierGate,
    diagnostics: DiagnosticsHandle,
    status: StatusHandle,
    cancel: CancelHandle,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    state_tx: broadcast::Sender<SessionStateEvent>,
    activity_seq: u64,
    sessions_started: u64,
}

impl CaptureEngine {
    /// Create an engine. Does not touch the device.
    ///
    /// # Errors
    /// `HarkError::InvalidConfig` listing every invalid field.
    pub fn new(
        config: CaptureConfig,
        input: Box<dyn AudioInput>,
        mut gate: ClassifierGate,
        diagnostics: DiagnosticsHandle,
    ) -> Result<Self> {
        if let Err(e) = config.validate() {
            diagnostics.record(DiagnosticCategory::Config, e.to_string());
            return Err(e);
        }
        gate.configure(&config);
        let capacities = config.capacities();
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (state_tx, _) = broadcast::channel(BROADCAST_CAP);

        info!(
            classifier = gate.classifier_name(),
            start_frames = capacities.start,
            end_frames = capacities.end,
            "capture engine ready"
        );

        Ok(Self {
            status: StatusHandle::new(gate.mode()),
            config,
            capacities,
            input,
            gate,
            diagnostics,
            cancel: CancelHandle::new(),
            activity_tx,
            state_tx,
            activity_seq: 0,
            sessions_started: 0,
        })
    }

    /// Run one capture session on this thread until it reaches a terminal state.
    ///
    /// Timeouts, too-short utterances and cancellation are `Ok` outcomes.
    ///
    /// # Errors
    /// Device open or read failures; the device is closed before returning.
    pub fn start_listening(&mut self) -> Result<CaptureOutcome> {
        self.sessions_started += 1;
        self.cancel.reset();
        session::run(session::SessionContext {
            id: format!("session-{}", self.sessions_started),
            config: &self.config,
            recorder: UtteranceRecorder::new(self.capacities, self.config.sample_rate_hz),
            gate: &mut self.gate,
            input: self.input.as_mut(),
            diagnostics: &self.diagnostics,
            status: &self.status,
            cancel: &self.cancel,
            activity_tx: &self.activity_tx,
            state_tx: &self.state_tx,
            activity_seq: &mut self.activity_seq,
        })
    }

    /// Replace the configuration. All-or-nothing.
    ///
    /// # Errors
    /// `HarkError::InvalidConfig`; the previous config stays active.
    pub fn update_config(&mut self, config: CaptureConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "rejected config update");
            self.diagnostics
                .record(DiagnosticCategory::Config, e.to_string());
            return Err(e);
        }
        self.capacities = config.capacities();
        self.gate.configure(&config);
        self.config = config;
        info!(
            start_frames = self.capacities.start,
            end_frames = self.capacities.end,
            "capture config updated"
        );
        Ok(())
    }

    /// Probe the device, record a short trial and exercise the classifier.
    pub fn self_test(&mut self) -> SelfTestReport {
        selftest::run(
            &self.config,
            self.input.as_mut(),
            &mut self.gate,
            &self.diagnostics,
        )
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn capacities(&self) -> BufferCapacities {
        self.capacities
    }

    pub fn classifier_mode(&self) -> ClassifierMode {
        self.gate.mode()
    }

    pub fn is_classifier_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub fn status(&self) -> CaptureStatus {
        self.status.snapshot()
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn diagnostics(&self) -> &DiagnosticsHandle {
        &self.diagnostics
    }

    pub fn error_history(&self) -> Vec<DiagnosticEntry> {
        self.diagnostics.history()
    }

    pub fn diagnostics_summary(&self) -> DiagnosticsSummary {
        self.diagnostics.summary()
    }

    pub fn reset_diagnostics(&self) {
        self.diagnostics.clear();
        info!("diagnostics cleared");
    }

    /// Live per-frame level and speech decisions.
    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Session state transitions.
    pub fn subscribe_state(&self) -> broadcast::Receiver<SessionStateEvent> {
        self.state_tx.subscribe()
    }
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("config", &self.config)
            .field("capacities", &self.capacities)
            .field("gate", &self.gate)
            .field("sessions_started", &self.sessions_started)
            .finish_non_exhaustive()
    }
}
