use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use hark_core::audio::{AudioInput, DeviceProbe, FrameStream};
use hark_core::vad::{LoadError, LoadPolicy};
use hark_core::{
    AudioFrame, CancelHandle, CaptureConfig, CaptureEngine, CaptureOutcome, CaptureState,
    ClassifierGate, ClassifierMode, Detection, DiagnosticCategory, DiagnosticsHandle, HarkError,
    SpeechActivityClassifier,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;

const SPEECH: f32 = 0.5;
const SILENCE: f32 = 0.0;

#[derive(Debug, Clone, Copy)]
enum Step {
    Level(f32),
    Fail,
}

#[derive(Clone, Default)]
struct Counters {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    /// Cancel through this handle once this many frames were read.
    cancel: Arc<Mutex<Option<(usize, CancelHandle)>>>,
}

impl Counters {
    fn cancel_after(&self, reads: usize, handle: CancelHandle) {
        *self.cancel.lock() = Some((reads, handle));
    }
    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

struct ScriptedInput {
    script: Arc<Mutex<VecDeque<Step>>>,
    counters: Counters,
    fail_open: bool,
    probe: DeviceProbe,
}

impl ScriptedInput {
    fn new(steps: impl IntoIterator<Item = Step>) -> (Self, Counters) {
        let counters = Counters::default();
        let input = Self {
            script: Arc::new(Mutex::new(steps.into_iter().collect())),
            counters: counters.clone(),
            fail_open: false,
            probe: DeviceProbe {
                device_count: 1,
                device_name: Some("Kiosk Microphone".into()),
                default_sample_rate: Some(16_000),
                is_loopback_like: false,
            },
        };
        (input, counters)
    }

    fn levels(levels: &[f32]) -> (Self, Counters) {
        Self::new(levels.iter().map(|&l| Step::Level(l)))
    }
}

impl AudioInput for ScriptedInput {
    fn open(&mut self, config: &CaptureConfig) -> hark_core::Result<Box<dyn FrameStream>> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(HarkError::DeviceUnavailable("unplugged".into()));
        }
        Ok(Box::new(ScriptedStream {
            script: Arc::clone(&self.script),
            counters: self.counters.clone(),
            frame_samples: config.frame_samples(),
        }))
    }

    fn probe(&self, _config: &CaptureConfig) -> hark_core::Result<DeviceProbe> {
        Ok(self.probe.clone())
    }
}

struct ScriptedStream {
    script: Arc<Mutex<VecDeque<Step>>>,
    counters: Counters,
    frame_samples: usize,
}

impl FrameStream for ScriptedStream {
    fn read_frame(&mut self) -> hark_core::Result<Vec<f32>> {
        let reads = self.counters.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, handle)) = self.counters.cancel.lock().as_ref() {
            if reads >= *after {
                handle.cancel();
            }
        }
        match self.script.lock().pop_front() {
            Some(Step::Level(level)) => Ok(vec![level; self.frame_samples]),
            Some(Step::Fail) => Err(HarkError::AudioStream("device disconnected".into())),
            None => Err(HarkError::AudioStream("script exhausted".into())),
        }
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// ML stand-in: speech iff RMS ≥ 0.1, errors on the given (1-based) calls.
struct ScriptedClassifier {
    calls: usize,
    fail_on: Vec<usize>,
}

impl SpeechActivityClassifier for ScriptedClassifier {
    fn detect(&mut self, frame: &AudioFrame) -> hark_core::Result<Detection> {
        self.calls += 1;
        if self.fail_on.contains(&self.calls) {
            return Err(HarkError::ClassifierRuntime("tensor shape mismatch".into()));
        }
        let speech = frame.rms() >= 0.1;
        Ok(Detection {
            is_speech: speech,
            confidence: if speech { 0.9 } else { 0.05 },
        })
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// ML stand-in that remembers the last threshold it was configured with and
/// reports speech iff the frame RMS reaches it.
struct ThresholdTracking {
    configured: Arc<Mutex<Option<f32>>>,
}

impl SpeechActivityClassifier for ThresholdTracking {
    fn detect(&mut self, frame: &AudioFrame) -> hark_core::Result<Detection> {
        let threshold = self.configured.lock().unwrap_or(1.0);
        let rms = frame.rms();
        Ok(Detection {
            is_speech: rms >= threshold,
            confidence: rms.min(1.0),
        })
    }

    fn configure(&mut self, config: &CaptureConfig) {
        *self.configured.lock() = Some(config.vad_threshold);
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "threshold-tracking"
    }
}

fn ml_gate(fail_on: Vec<usize>, config: &CaptureConfig, diagnostics: &DiagnosticsHandle) -> ClassifierGate {
    ClassifierGate::with_classifier(
        Box::new(ScriptedClassifier { calls: 0, fail_on }),
        config,
        diagnostics.clone(),
    )
}

fn engine_with(input: ScriptedInput, config: CaptureConfig) -> (CaptureEngine, DiagnosticsHandle) {
    let diagnostics = DiagnosticsHandle::new();
    let gate = ClassifierGate::fallback_only(&config, diagnostics.clone());
    diagnostics.clear();
    let engine = CaptureEngine::new(config, Box::new(input), gate, diagnostics.clone())
        .expect("valid config");
    (engine, diagnostics)
}

fn drain_states(rx: &mut broadcast::Receiver<hark_core::SessionStateEvent>) -> Vec<CaptureState> {
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        states.push(event.state);
    }
    states
}

fn repeat(level: f32, n: usize) -> Vec<f32> {
    vec![level; n]
}

#[test]
fn no_speech_times_out_after_ten_frames() {
    let (input, counters) = ScriptedInput::levels(&repeat(SILENCE, 12));
    let (mut engine, diagnostics) = engine_with(input, CaptureConfig::default());
    let mut states = engine.subscribe_state();

    let outcome = engine.start_listening().expect("session runs");

    assert!(matches!(outcome, CaptureOutcome::TimedOut));
    assert_eq!(counters.reads(), 10);
    assert_eq!(counters.opens(), 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(
        drain_states(&mut states),
        vec![CaptureState::AwaitingSpeech, CaptureState::TimedOut]
    );
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics.count(DiagnosticCategory::Session), 1);
    let status = engine.status();
    assert_eq!(status.state, CaptureState::TimedOut);
    assert!(!status.is_listening);
}

#[test]
fn three_speech_then_six_silent_frames_finalize() {
    let config = CaptureConfig {
        vad_threshold: 0.2,
        max_silence_duration_end_s: 3.0,
        ..CaptureConfig::default()
    };
    let mut levels = repeat(SPEECH, 3);
    levels.extend(repeat(SILENCE, 6));
    levels.extend(repeat(SPEECH, 3));
    let (input, counters) = ScriptedInput::levels(&levels);
    let (mut engine, diagnostics) = engine_with(input, config);
    let mut states = engine.subscribe_state();
    let mut activity = engine.subscribe_activity();

    let outcome = engine.start_listening().expect("session runs");
    let utterance = outcome.into_utterance().expect("complete utterance");

    assert_eq!(counters.reads(), 9, "finalizes on the sixth silent frame");
    assert_eq!(counters.closes(), 1);
    assert_eq!(utterance.frame_count(), 9);
    let speech: Vec<bool> = utterance
        .frames()
        .iter()
        .map(|f| f.is_speech.unwrap_or(false))
        .collect();
    assert_eq!(speech, [true, true, true, false, false, false, false, false, false]);
    assert!((utterance.duration_s() - 4.5).abs() < 1e-9);
    assert_eq!(utterance.classifier_mode(), ClassifierMode::Fallback);

    assert_eq!(
        drain_states(&mut states),
        vec![
            CaptureState::AwaitingSpeech,
            CaptureState::Recording,
            CaptureState::Finalizing,
            CaptureState::Complete,
        ]
    );

    let mut seqs = Vec::new();
    while let Ok(event) = activity.try_recv() {
        seqs.push(event.seq);
    }
    assert_eq!(seqs, (1..=9).collect::<Vec<u64>>());

    let entry = diagnostics.last().expect("session outcome recorded");
    assert_eq!(entry.category, DiagnosticCategory::Session);
    assert!(entry.message.contains("utterance complete"), "{}", entry.message);
}

#[test]
fn classifier_error_mid_recording_counts_as_silence() {
    let config = CaptureConfig::default();
    let diagnostics = DiagnosticsHandle::new();
    let gate = ml_gate(vec![5], &config, &diagnostics);
    let mut levels = repeat(SPEECH, 5);
    levels.extend(repeat(SILENCE, 5));
    let (input, counters) = ScriptedInput::levels(&levels);
    let mut engine = CaptureEngine::new(config, Box::new(input), gate, diagnostics.clone())
        .expect("valid config");

    let outcome = engine.start_listening().expect("session runs");
    let utterance = outcome.into_utterance().expect("complete utterance");

    assert_eq!(counters.reads(), 10);
    let fifth = &utterance.frames()[4];
    assert_eq!(fifth.is_speech, Some(false));
    assert_eq!(fifth.confidence, Some(0.0));
    assert_eq!(diagnostics.len(), 2);
    assert_eq!(diagnostics.count(DiagnosticCategory::ClassifierRuntime), 1);
    assert_eq!(diagnostics.count(DiagnosticCategory::Session), 1);
    assert_eq!(utterance.classifier_mode(), ClassifierMode::Ml);
    assert!(engine.is_classifier_ready());
}

#[test]
fn minimum_duration_boundary() {
    let config = CaptureConfig {
        max_silence_duration_end_s: 0.5,
        min_record_duration_s: 1.5,
        ..CaptureConfig::default()
    };

    let (input, _) = ScriptedInput::levels(&[SPEECH, SPEECH, SPEECH, SILENCE]);
    let (mut engine, _) = engine_with(input, config.clone());
    let utterance = engine
        .start_listening()
        .expect("session runs")
        .into_utterance()
        .expect("exactly the minimum is kept");
    assert_eq!(utterance.frame_count(), 4);

    let (input, counters) = ScriptedInput::levels(&[SPEECH, SPEECH, SILENCE]);
    let (mut engine, diagnostics) = engine_with(input, config);
    let mut states = engine.subscribe_state();
    match engine.start_listening().expect("session runs") {
        CaptureOutcome::TooShort { duration_s } => assert!((duration_s - 1.0).abs() < 1e-9),
        other => panic!("expected TooShort, got {other:?}"),
    }
    assert_eq!(counters.closes(), 1);
    assert_eq!(diagnostics.count(DiagnosticCategory::Session), 1);
    assert_eq!(
        drain_states(&mut states).last().copied(),
        Some(CaptureState::Error)
    );
}

#[test]
fn short_speech_is_not_padded_past_minimum_by_trailing_silence() {
    let mut levels = vec![SPEECH];
    levels.extend(repeat(SILENCE, 6));
    let (input, counters) = ScriptedInput::levels(&levels);
    let (mut engine, diagnostics) = engine_with(input, CaptureConfig::default());

    match engine.start_listening().expect("session runs") {
        CaptureOutcome::TooShort { duration_s } => assert!((duration_s - 0.5).abs() < 1e-9),
        other => panic!("expected TooShort, got {other:?}"),
    }
    assert_eq!(counters.reads(), 7);
    assert_eq!(counters.closes(), 1);
    assert_eq!(diagnostics.count(DiagnosticCategory::Session), 1);
}

#[test]
fn longest_valid_silence_windows_run_without_preallocating() {
    let config = CaptureConfig {
        sample_rate_hz: 48_000,
        frame_duration_s: 1.0 / 48_000.0,
        max_silence_duration_start_s: hark_core::config::MAX_SILENCE_DURATION_S,
        max_silence_duration_end_s: hark_core::config::MAX_SILENCE_DURATION_S,
        min_record_duration_s: 0.0,
        ..CaptureConfig::default()
    };
    config.validate().expect("largest accepted windows");
    assert!(config.capacities().start > 100_000_000);

    let (input, counters) = ScriptedInput::levels(&[SILENCE, SPEECH, SILENCE]);
    let (mut engine, _) = engine_with(input, config);
    let err = engine.start_listening().expect_err("script runs out first");
    assert!(matches!(err, HarkError::AudioStream(_)));
    assert_eq!(counters.reads(), 4);
    assert_eq!(counters.closes(), 1);
}

#[test]
fn preroll_leads_the_utterance_in_order() {
    let config = CaptureConfig {
        max_silence_duration_end_s: 0.5,
        min_record_duration_s: 0.0,
        ..CaptureConfig::default()
    };
    let (input, _) = ScriptedInput::levels(&[0.001, 0.002, 0.003, SPEECH, SILENCE]);
    let (mut engine, _) = engine_with(input, config);

    let utterance = engine
        .start_listening()
        .expect("session runs")
        .into_utterance()
        .expect("complete utterance");

    let heads: Vec<f32> = utterance.frames().iter().map(|f| f.samples[0]).collect();
    assert_eq!(heads, vec![0.001, 0.002, 0.003, SPEECH, SILENCE]);
    let indices: Vec<u64> = utterance.frames().iter().map(|f| f.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert!((utterance.frames()[2].timestamp_s - 1.0).abs() < 1e-9);
}

#[test]
fn cancel_stops_at_next_frame_boundary() {
    let config = CaptureConfig::default();
    let diagnostics = DiagnosticsHandle::new();
    let gate = ml_gate(vec![], &config, &diagnostics);
    let (input, counters) = ScriptedInput::levels(&repeat(SPEECH, 20));
    let mut engine = CaptureEngine::new(config, Box::new(input), gate, diagnostics.clone())
        .expect("valid config");
    counters.cancel_after(3, engine.cancel_handle());
    let mut states = engine.subscribe_state();

    let outcome = engine.start_listening().expect("session runs");

    assert!(matches!(outcome, CaptureOutcome::Cancelled));
    assert!(outcome.utterance().is_none());
    assert_eq!(counters.reads(), 3);
    assert_eq!(counters.closes(), 1);
    assert_eq!(drain_states(&mut states).last().copied(), Some(CaptureState::Error));
    assert_eq!(diagnostics.count(DiagnosticCategory::Session), 1);
    assert!(!engine.status().is_listening);
}

#[test]
fn stale_cancel_does_not_stop_the_next_session() {
    let config = CaptureConfig {
        max_silence_duration_start_s: 1.0,
        ..CaptureConfig::default()
    };
    let (input, counters) = ScriptedInput::levels(&repeat(SILENCE, 2));
    let (mut engine, _) = engine_with(input, config);
    engine.cancel_handle().cancel();

    let outcome = engine.start_listening().expect("session runs");
    assert!(matches!(outcome, CaptureOutcome::TimedOut));
    assert_eq!(counters.reads(), 2);
}

#[test]
fn read_failure_is_an_error_and_closes_device() {
    let (input, counters) = ScriptedInput::new([Step::Level(SPEECH), Step::Level(SPEECH), Step::Fail]);
    let (mut engine, diagnostics) = engine_with(input, CaptureConfig::default());

    let err = engine.start_listening().expect_err("device failure");
    assert!(matches!(err, HarkError::AudioStream(_)));
    assert!(err.is_session_fatal());
    assert_eq!(counters.opens(), 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(diagnostics.count(DiagnosticCategory::Device), 1);
    let status = engine.status();
    assert_eq!(status.state, CaptureState::Error);
    assert!(!status.is_recording);
}

#[test]
fn open_failure_is_an_error() {
    let (mut input, counters) = ScriptedInput::levels(&[SPEECH]);
    input.fail_open = true;
    let (mut engine, diagnostics) = engine_with(input, CaptureConfig::default());

    let err = engine.start_listening().expect_err("open failure");
    assert!(matches!(err, HarkError::DeviceUnavailable(_)));
    assert_eq!(counters.opens(), 1);
    assert_eq!(counters.closes(), 0);
    assert_eq!(counters.reads(), 0);
    assert_eq!(diagnostics.count(DiagnosticCategory::Device), 1);
}

#[test]
fn invalid_update_keeps_previous_config() {
    let (input, _) = ScriptedInput::levels(&[]);
    let (mut engine, diagnostics) = engine_with(input, CaptureConfig::default());
    let before = engine.capacities();

    let bad = CaptureConfig {
        vad_threshold: 2.0,
        max_silence_duration_end_s: 1.0,
        ..CaptureConfig::default()
    };
    let err = engine.update_config(bad).expect_err("threshold out of range");
    assert!(matches!(err, HarkError::InvalidConfig(_)));
    assert_eq!(engine.config().vad_threshold, 0.2);
    assert_eq!(engine.capacities(), before);
    assert_eq!(diagnostics.count(DiagnosticCategory::Config), 1);

    let good = CaptureConfig {
        frame_duration_s: 0.25,
        max_silence_duration_end_s: 1.0,
        ..CaptureConfig::default()
    };
    engine.update_config(good).expect("valid update");
    assert_eq!(engine.capacities().end, 4);
    assert_eq!(engine.capacities().start, 20);
}

#[test]
fn vad_threshold_updates_reach_the_ml_classifier() {
    let configured = Arc::new(Mutex::new(None));
    let config = CaptureConfig {
        max_silence_duration_start_s: 1.0,
        max_silence_duration_end_s: 0.5,
        min_record_duration_s: 0.0,
        ..CaptureConfig::default()
    };
    let diagnostics = DiagnosticsHandle::new();
    let gate = ClassifierGate::with_classifier(
        Box::new(ThresholdTracking {
            configured: Arc::clone(&configured),
        }),
        &config,
        diagnostics.clone(),
    );
    let (input, _) = ScriptedInput::levels(&[SPEECH, SILENCE, SPEECH, SPEECH]);
    let mut engine = CaptureEngine::new(config.clone(), Box::new(input), gate, diagnostics)
        .expect("valid config");
    assert_eq!(*configured.lock(), Some(0.2));

    let outcome = engine.start_listening().expect("session runs");
    assert!(matches!(outcome, CaptureOutcome::Complete(_)));

    let stricter = CaptureConfig {
        vad_threshold: 0.6,
        ..config.clone()
    };
    engine.update_config(stricter).expect("valid update");
    assert_eq!(*configured.lock(), Some(0.6));

    let rejected = CaptureConfig {
        vad_threshold: 2.0,
        ..config
    };
    assert!(engine.update_config(rejected).is_err());
    assert_eq!(*configured.lock(), Some(0.6));
    assert_eq!(engine.config().vad_threshold, 0.6);

    // 0.5 RMS no longer reaches the raised threshold.
    let outcome = engine.start_listening().expect("session runs");
    assert!(matches!(outcome, CaptureOutcome::TimedOut));
}

#[test]
fn invalid_initial_config_is_rejected() {
    let (input, _) = ScriptedInput::levels(&[]);
    let config = CaptureConfig {
        frame_duration_s: 0.0,
        ..CaptureConfig::default()
    };
    let diagnostics = DiagnosticsHandle::new();
    let gate = ClassifierGate::fallback_only(&config, diagnostics.clone());
    assert!(CaptureEngine::new(config, Box::new(input), gate, diagnostics).is_err());
}

#[test]
fn failed_model_load_is_permanent_across_sessions() {
    let config = CaptureConfig {
        max_silence_duration_start_s: 1.0,
        ..CaptureConfig::default()
    };
    let diagnostics = DiagnosticsHandle::new();
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let mut loader = move || -> Result<Box<dyn SpeechActivityClassifier>, LoadError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(LoadError::Transient("model hub unreachable".into()))
    };
    let policy = LoadPolicy {
        max_attempts: 3,
        retry_delay: std::time::Duration::ZERO,
    };
    let gate = ClassifierGate::initialize(&mut loader, &policy, &config, diagnostics.clone());
    let (input, _) = ScriptedInput::levels(&repeat(SILENCE, 4));
    let mut engine = CaptureEngine::new(config, Box::new(input), gate, diagnostics.clone())
        .expect("valid config");

    for _ in 0..2 {
        let outcome = engine.start_listening().expect("session runs");
        assert!(matches!(outcome, CaptureOutcome::TimedOut));
        assert_eq!(engine.classifier_mode(), ClassifierMode::Fallback);
        assert!(!engine.is_classifier_ready());
    }
    assert_eq!(loads.load(Ordering::SeqCst), 3);
    assert_eq!(diagnostics.count(DiagnosticCategory::ClassifierLoad), 1);
    assert_eq!(engine.status().session_id.as_deref(), Some("session-2"));
}

#[test]
fn self_test_reports_quiet_fallback_setup() {
    let (mut input, counters) = ScriptedInput::levels(&repeat(SILENCE, 4));
    input.probe.default_sample_rate = Some(48_000);
    let (mut engine, _) = engine_with(input, CaptureConfig::default());

    let report = engine.self_test();

    assert!(report.hardware_ok);
    assert!(report.recording_ok);
    assert!(!report.classifier_ok);
    assert!(!report.speech_detected);
    assert_eq!(report.frames_captured, 4);
    assert_eq!(counters.closes(), 1);
    let recs = report.recommendations.join("\n");
    assert!(recs.contains("raise the microphone gain"));
    assert!(recs.contains("fallback mode"));
    assert!(recs.contains("48000 Hz"));
}

#[test]
fn self_test_passes_with_working_classifier() {
    let config = CaptureConfig::default();
    let diagnostics = DiagnosticsHandle::new();
    let gate = ml_gate(vec![], &config, &diagnostics);
    let (input, _) = ScriptedInput::levels(&[SILENCE, SPEECH, SPEECH, SILENCE]);
    let mut engine = CaptureEngine::new(config, Box::new(input), gate, diagnostics)
        .expect("valid config");

    let report = engine.self_test();

    assert!(report.passed(), "report: {report:?}");
    assert!(report.speech_detected);
    assert!((report.max_volume - SPEECH).abs() < 1e-6);
    assert!(report.recommendations.is_empty());
}
