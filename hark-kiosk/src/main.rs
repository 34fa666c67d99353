//! Hark kiosk host.
//!
//! Loads the settings file, installs logging, builds one capture engine and
//! runs a single command: capture an utterance, run the self-test, or list
//! input devices. Results are printed as JSON on stdout.

mod cli;
mod settings;

use std::path::Path;

use anyhow::{Context, Result};
use hark_core::{
    audio::list_input_devices, CaptureEngine, CaptureOutcome, ClassifierGate, CpalInput,
    DiagnosticCategory, DiagnosticsHandle,
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::cli::{utterance_file_name, Args, Command, USAGE};
use crate::settings::{default_settings_path, load_settings, write_defaults_if_missing, KioskSettings};

fn main() {
    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(2);
        }
    };

    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let file_settings = load_settings(&settings_path);
    let mut settings = file_settings.clone();
    settings.apply_env_overrides();
    if let Some(out) = &args.out {
        settings.output_dir = Some(out.clone());
    }

    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(settings.log_filter()))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(settings::DEFAULT_LOG_FILTER)),
        )
        .init();

    info!(settings_path = ?settings_path, command = ?args.command, "hark kiosk starting");
    match write_defaults_if_missing(&settings_path, &file_settings) {
        Ok(true) => info!(path = ?settings_path, "wrote default settings"),
        Ok(false) => {}
        Err(e) => warn!(path = ?settings_path, error = %e, "could not write default settings"),
    }

    match run(args.command, &settings) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(command: Command, settings: &KioskSettings) -> Result<i32> {
    match command {
        Command::Devices => {
            let devices = list_input_devices();
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(0)
        }
        Command::SelfTest => {
            let mut engine = build_engine(settings)?;
            let report = engine.self_test();
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.passed() { 0 } else { 1 })
        }
        Command::Listen => listen(settings),
    }
}

fn build_engine(settings: &KioskSettings) -> Result<CaptureEngine> {
    let diagnostics = DiagnosticsHandle::new();
    let gate = build_gate(settings, &diagnostics);
    CaptureEngine::new(
        settings.capture.clone(),
        Box::new(CpalInput::new()),
        gate,
        diagnostics,
    )
    .context("capture settings rejected")
}

#[cfg(feature = "onnx")]
fn build_gate(settings: &KioskSettings, diagnostics: &DiagnosticsHandle) -> ClassifierGate {
    use hark_core::vad::{SileroClassifier, SileroLoader};

    let path = settings
        .model_path
        .clone()
        .unwrap_or_else(SileroClassifier::default_model_path);
    info!(model = ?path, "loading speech classifier");
    let mut loader = SileroLoader::new(path, settings.capture.vad_threshold);
    ClassifierGate::initialize(
        &mut loader,
        &settings.load_policy(),
        &settings.capture,
        diagnostics.clone(),
    )
}

#[cfg(not(feature = "onnx"))]
fn build_gate(settings: &KioskSettings, diagnostics: &DiagnosticsHandle) -> ClassifierGate {
    if settings.model_path.is_some() {
        warn!("modelPath is set but this build has no onnx support");
    }
    ClassifierGate::fallback_only(&settings.capture, diagnostics.clone())
}

fn listen(settings: &KioskSettings) -> Result<i32> {
    let mut engine = build_engine(settings)?;
    watch_ctrl_c(engine.cancel_handle());

    let outcome = engine.start_listening().context("capture session failed")?;
    let summary = match outcome {
        CaptureOutcome::Complete(utterance) => {
            let dir = settings.output_dir();
            let path = write_utterance(&utterance, &dir)?;
            info!(path = ?path, duration_s = utterance.duration_s(), "utterance saved");
            json!({ "outcome": "complete", "path": path, "utterance": utterance.info() })
        }
        CaptureOutcome::TimedOut => json!({ "outcome": "timedOut" }),
        CaptureOutcome::TooShort { duration_s } => {
            json!({ "outcome": "tooShort", "durationS": duration_s })
        }
        CaptureOutcome::Cancelled => json!({ "outcome": "cancelled" }),
    };

    let diagnostics = engine.diagnostics_summary();
    if diagnostics
        .categories
        .iter()
        .any(|c| *c != DiagnosticCategory::Session)
    {
        warn!(entries = diagnostics.total, "session recorded problems");
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "result": summary, "diagnostics": diagnostics }))?
    );
    Ok(0)
}

fn write_utterance(utterance: &hark_core::Utterance, dir: &Path) -> Result<std::path::PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(utterance_file_name(chrono::Local::now()));
    utterance
        .write_wav(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Cancel the session on Ctrl-C. The watcher thread exits with the process.
fn watch_ctrl_c(cancel: hark_core::CancelHandle) {
    let spawned = std::thread::Builder::new()
        .name("hark-ctrl-c".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    warn!(error = %e, "ctrl-c watcher unavailable");
                    return;
                }
            };
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                info!("interrupt received, cancelling session");
                cancel.cancel();
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn ctrl-c watcher");
    }
}
