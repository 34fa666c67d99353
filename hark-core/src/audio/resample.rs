//! Device-rate to capture-rate conversion with a rubato `FastFixedIn` resampler.
//!
//! Kiosk microphones usually run at 44.1 or 48 kHz while the capture config
//! asks for 16 kHz. `RateConverter` runs on the capture loop thread, never in
//! the audio callback. Equal rates are a passthrough with no rubato state.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{HarkError, Result};

/// Converts mono f32 audio between two fixed sample rates.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Input samples waiting for a full rubato chunk.
    pending: Vec<f32>,
    chunk_size: usize,
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// `chunk_size` is the number of input samples handed to rubato per call.
    ///
    /// # Errors
    /// `HarkError::AudioStream` when either rate is zero or rubato rejects the ratio.
    pub fn new(device_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if device_rate == 0 || target_rate == 0 {
            return Err(HarkError::AudioStream(format!(
                "cannot resample {device_rate} Hz to {target_rate} Hz"
            )));
        }
        let chunk_size = chunk_size.max(1);
        if device_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / device_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| HarkError::AudioStream(format!("resampler init: {e}")))?;
        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        debug!(device_rate, target_rate, chunk_size, "resampler created");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
        })
    }

    /// Feed device-rate samples and get whatever converted output is ready.
    ///
    /// Leftover input shorter than one chunk is kept for the next call.
    ///
    /// # Errors
    /// `HarkError::AudioStream` when rubato rejects a chunk; buffered input is
    /// discarded since the audio can no longer be converted without a gap.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        let mut offset = 0;
        while self.pending.len() - offset >= self.chunk_size {
            let chunk = &self.pending[offset..offset + self.chunk_size];
            match resampler.process_into_buffer(&[chunk], &mut self.output_buf, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.output_buf[0][..produced]),
                Err(e) => {
                    error!(error = %e, "resampler rejected a chunk");
                    self.pending.clear();
                    return Err(HarkError::AudioStream(format!("resampling failed: {e}")));
                }
            }
            offset += self.chunk_size;
        }
        self.pending.drain(..offset);
        Ok(out)
    }

    /// Discard buffered input, e.g. after backlog was skipped.
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
