//! Silero VAD classifier (ML variant).
//!
//! Wraps the official Silero VAD ONNX model published at
//! <https://github.com/snakers4/silero-vad>.
//!
//! Supports both the v3/v4 LSTM interface (separate `h`/`c` tensors) and the
//! v5 GRU interface (single `state` tensor).
//!
//! ## Model I/O (v4 LSTM)
//!
//! | Name     | Shape      | DType | Direction |
//! |----------|------------|-------|-----------|
//! | `input`  | `[1, N]`   | f32   | in        |
//! | `sr`     | `[1]`      | i64   | in        |
//! | `h`      | `[2,1,64]` | f32   | in/out    |
//! | `c`      | `[2,1,64]` | f32   | in/out    |
//! | `output` | `[1, 1]`   | f32   | out       |
//!
//! ## Model I/O (v5 GRU)
//!
//! | Name     | Shape       | DType | Direction |
//! |----------|-------------|-------|-----------|
//! | `input`  | `[1, N]`    | f32   | in        |
//! | `sr`     | `[1]`       | i64   | in        |
//! | `state`  | `[2,1,128]` | f32   | in/out    |
//! | `output` | `[1, 1]`    | f32   | out       |
//!
//! `N` is 512 samples at 16 kHz and 256 at 8 kHz. A capture frame is split
//! into windows; the frame's confidence is the highest window probability.
//! Samples left over after the last full window carry into the next frame.
//! A frame too short to complete a window reuses the probability of the last
//! window that ran.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::SessionInputValue;
use ort::value::Value;
use tracing::{info, warn};

use super::{Detection, LoadError, ModelLoader, SpeechActivityClassifier};
use crate::{
    buffering::AudioFrame,
    config::CaptureConfig,
    error::{HarkError, Result},
};

/// v3/v4 LSTM state size: 2 layers × 1 batch × 64 units (each of h and c).
const LSTM_SIZE: usize = 128;
/// v5 GRU state size: 2 layers × 1 batch × 128 units.
const GRU_STATE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SileroIoMode {
    StatefulLstm,
    StatefulGru,
    Stateless,
}

/// Tensor names discovered from the model at load time.
struct SileroIo {
    mode: SileroIoMode,
    input: String,
    sr: Option<String>,
    output: String,
    h: Option<String>,
    c: Option<String>,
    hn: Option<String>,
    cn: Option<String>,
    state: Option<String>,
    state_out: Option<String>,
}

/// Neural classifier using the Silero VAD ONNX model.
pub struct SileroClassifier {
    session: ort::session::Session,
    io: SileroIo,
    h: Vec<f32>,
    c: Vec<f32>,
    state: Vec<f32>,
    threshold: f32,
    pending: Vec<f32>,
    /// Probability of the most recent window; answers frames that complete none.
    last_prob: f32,
}

fn onnx_err(e: impl std::fmt::Display) -> HarkError {
    HarkError::OnnxSession(e.to_string())
}

impl SileroClassifier {
    /// Load the model from `path`; speech iff window probability ≥ `threshold`.
    pub fn new(path: impl AsRef<Path>, threshold: f32) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(HarkError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(onnx_err)?
            .commit_from_file(path)
            .map_err(onnx_err)?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let input = resolve_name(&input_names, &["input", "audio", "x"])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| onnx_err("Silero model has no inputs"))?;
        let output = resolve_name(&output_names, &["output", "speech_prob", "prob"])
            .or_else(|| output_names.first().cloned())
            .ok_or_else(|| onnx_err("Silero model has no outputs"))?;

        let mut io = SileroIo {
            mode: SileroIoMode::Stateless,
            input,
            sr: resolve_name(&input_names, &["sr", "sample_rate"]),
            output,
            h: resolve_name(&input_names, &["h", "state_h"]),
            c: resolve_name(&input_names, &["c", "state_c"]),
            hn: resolve_name(&output_names, &["hn", "state_hn", "h_out"]),
            cn: resolve_name(&output_names, &["cn", "state_cn", "c_out"]),
            state: resolve_name(&input_names, &["state", "h_0", "hidden"]),
            state_out: resolve_name(&output_names, &["stateN", "state_out", "h_0_out", "hn_out"]),
        };
        io.mode = if io.h.is_some() && io.c.is_some() && io.hn.is_some() && io.cn.is_some() {
            SileroIoMode::StatefulLstm
        } else if io.state.is_some() && io.state_out.is_some() {
            SileroIoMode::StatefulGru
        } else {
            SileroIoMode::Stateless
        };

        info!(
            path = ?path,
            threshold,
            io_mode = ?io.mode,
            inputs = ?input_names,
            outputs = ?output_names,
            "Silero classifier loaded"
        );

        Ok(Self {
            session,
            io,
            h: vec![0.0; LSTM_SIZE],
            c: vec![0.0; LSTM_SIZE],
            state: vec![0.0; GRU_STATE_SIZE],
            threshold: threshold.clamp(0.0, 1.0),
            pending: Vec::new(),
            last_prob: 0.0,
        })
    }

    /// Default model location: `$HARK_MODEL_DIR/silero_vad.onnx`, else the
    /// platform data directory.
    pub fn default_model_path() -> PathBuf {
        default_models_dir().join("silero_vad.onnx")
    }

    /// Run one window through the model; update recurrent state; return speech probability.
    fn run_window(&mut self, window: &[f32], sample_rate: u32) -> Result<f32> {
        let input_arr =
            Array2::<f32>::from_shape_vec((1, window.len()), window.to_vec()).map_err(onnx_err)?;
        let mut inputs: Vec<(String, SessionInputValue<'_>)> = vec![(
            self.io.input.clone(),
            Value::from_array(input_arr).map_err(onnx_err)?.into(),
        )];

        if let Some(sr_name) = &self.io.sr {
            let sr_arr = Array1::<i64>::from_elem(1, i64::from(sample_rate));
            inputs.push((
                sr_name.clone(),
                Value::from_array(sr_arr).map_err(onnx_err)?.into(),
            ));
        }

        match self.io.mode {
            SileroIoMode::StatefulLstm => {
                if let (Some(h_name), Some(c_name)) = (&self.io.h, &self.io.c) {
                    let h_arr = Array3::<f32>::from_shape_vec((2, 1, 64), self.h.clone())
                        .map_err(onnx_err)?;
                    let c_arr = Array3::<f32>::from_shape_vec((2, 1, 64), self.c.clone())
                        .map_err(onnx_err)?;
                    inputs.push((h_name.clone(), Value::from_array(h_arr).map_err(onnx_err)?.into()));
                    inputs.push((c_name.clone(), Value::from_array(c_arr).map_err(onnx_err)?.into()));
                }
            }
            SileroIoMode::StatefulGru => {
                if let Some(state_name) = &self.io.state {
                    let state_arr = Array3::<f32>::from_shape_vec((2, 1, 128), self.state.clone())
                        .map_err(onnx_err)?;
                    inputs.push((
                        state_name.clone(),
                        Value::from_array(state_arr).map_err(onnx_err)?.into(),
                    ));
                }
            }
            SileroIoMode::Stateless => {}
        }

        let outputs = self.session.run(inputs).map_err(onnx_err)?;

        let prob_output = outputs
            .get(self.io.output.as_str())
            .ok_or_else(|| onnx_err("Silero output tensor missing"))?;
        let (_, prob_data) = prob_output.try_extract_tensor::<f32>().map_err(onnx_err)?;
        let prob = prob_data.first().copied().unwrap_or(0.0);
        if !prob.is_finite() {
            return Err(HarkError::ClassifierRuntime(format!(
                "Silero returned non-finite probability {prob}"
            )));
        }

        match self.io.mode {
            SileroIoMode::StatefulLstm => {
                let hn = self.io.hn.as_deref().and_then(|n| outputs.get(n));
                let cn = self.io.cn.as_deref().and_then(|n| outputs.get(n));
                if let (Some(hn), Some(cn)) = (hn, cn) {
                    let (_, hn_data) = hn.try_extract_tensor::<f32>().map_err(onnx_err)?;
                    let (_, cn_data) = cn.try_extract_tensor::<f32>().map_err(onnx_err)?;
                    self.h = hn_data.to_vec();
                    self.c = cn_data.to_vec();
                } else {
                    warn!("Silero LSTM state outputs missing; switching to stateless");
                    self.io.mode = SileroIoMode::Stateless;
                }
            }
            SileroIoMode::StatefulGru => {
                let out = self.io.state_out.as_deref().and_then(|n| outputs.get(n));
                if let Some(out) = out {
                    let (_, state_data) = out.try_extract_tensor::<f32>().map_err(onnx_err)?;
                    self.state = state_data.to_vec();
                } else {
                    warn!("Silero GRU state output missing; switching to stateless");
                    self.io.mode = SileroIoMode::Stateless;
                }
            }
            SileroIoMode::Stateless => {}
        }

        Ok(prob)
    }
}

fn window_for(sample_rate: u32) -> Result<usize> {
    match sample_rate {
        16_000 => Ok(512),
        8_000 => Ok(256),
        other => Err(HarkError::ClassifierRuntime(format!(
            "Silero supports 8000 or 16000 Hz, got {other}"
        ))),
    }
}

/// Highest window probability of a frame, or `carried` when no window completed.
fn frame_confidence(window_probs: &[f32], carried: f32) -> f32 {
    window_probs.iter().copied().reduce(f32::max).unwrap_or(carried)
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

/// Platform models directory, overridable with `HARK_MODEL_DIR`.
pub fn default_models_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("HARK_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(|p| PathBuf::from(p).join("Hark").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("hark")
            .join("models")
    }
}

impl SpeechActivityClassifier for SileroClassifier {
    fn detect(&mut self, frame: &AudioFrame) -> Result<Detection> {
        let window = window_for(frame.sample_rate)?;
        self.pending.extend_from_slice(&frame.samples);

        let mut probs = Vec::with_capacity(self.pending.len() / window);
        while self.pending.len() >= window {
            let chunk: Vec<f32> = self.pending.drain(..window).collect();
            probs.push(self.run_window(&chunk, frame.sample_rate)?);
        }

        let confidence = frame_confidence(&probs, self.last_prob);
        if let Some(&last) = probs.last() {
            self.last_prob = last;
        }
        Ok(Detection {
            is_speech: confidence >= self.threshold,
            confidence,
        })
    }

    fn configure(&mut self, config: &CaptureConfig) {
        self.threshold = config.vad_threshold.clamp(0.0, 1.0);
    }

    fn reset(&mut self) {
        self.h.iter_mut().for_each(|v| *v = 0.0);
        self.c.iter_mut().for_each(|v| *v = 0.0);
        self.state.iter_mut().for_each(|v| *v = 0.0);
        self.pending.clear();
        self.last_prob = 0.0;
    }

    fn name(&self) -> &'static str {
        "silero"
    }
}

/// Loads [`SileroClassifier`] from a file. A missing file is fatal; session
/// construction errors are treated as transient.
#[derive(Debug, Clone)]
pub struct SileroLoader {
    pub path: PathBuf,
    pub threshold: f32,
}

impl SileroLoader {
    pub fn new(path: impl Into<PathBuf>, threshold: f32) -> Self {
        Self {
            path: path.into(),
            threshold,
        }
    }
}

impl ModelLoader for SileroLoader {
    fn load(&mut self) -> std::result::Result<Box<dyn SpeechActivityClassifier>, LoadError> {
        match SileroClassifier::new(&self.path, self.threshold) {
            Ok(classifier) => Ok(Box::new(classifier)),
            Err(e @ HarkError::ModelNotFound { .. }) => Err(LoadError::Fatal(e.to_string())),
            Err(e) => Err(LoadError::Transient(e.to_string())),
        }
    }
}
