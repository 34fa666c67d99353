//! Per-frame buffering rules that turn a classified frame stream into one utterance.
//!
//! ```text
//!                 speech                        speech
//! preroll ──────────────────► recorded ◄────────────────── trailing
//!   ▲  (drained, in order)       │      (drained, in order)    ▲
//!   │ silence, nothing recorded  │ finish(): checked, then     │ silence after speech
//!   │                            │   trailing appended         │
//! ```
//!
//! The recorder only reports when a buffer fills; what that means for the
//! session is decided by the state machine.

use crate::{
    buffering::{AudioFrame, SilenceBuffer},
    config::BufferCapacities,
};

/// What the state machine should do after a frame was pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderSignal {
    Continue,
    /// Preroll filled before any speech.
    StartTimeout,
    /// Trailing silence filled after speech.
    EndSilence,
}

/// Tolerance for comparing accumulated durations against the minimum.
const DURATION_EPSILON_S: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct UtteranceRecorder {
    start_silence: SilenceBuffer,
    end_silence: SilenceBuffer,
    recorded: Vec<AudioFrame>,
    recorded_samples: usize,
    sample_rate: u32,
}

impl UtteranceRecorder {
    pub fn new(capacities: BufferCapacities, sample_rate: u32) -> Self {
        Self {
            start_silence: SilenceBuffer::new(capacities.start),
            end_silence: SilenceBuffer::new(capacities.end),
            recorded: Vec::new(),
            recorded_samples: 0,
            sample_rate,
        }
    }

    /// Apply the buffering rules to one classified frame.
    pub fn push(&mut self, frame: AudioFrame, is_speech: bool) -> RecorderSignal {
        if is_speech {
            if self.recorded.is_empty() {
                let preroll: Vec<AudioFrame> = self.start_silence.drain().collect();
                self.extend(preroll);
            } else {
                let pause: Vec<AudioFrame> = self.end_silence.drain().collect();
                self.extend(pause);
            }
            self.append(frame);
            return RecorderSignal::Continue;
        }

        if self.recorded.is_empty() {
            self.start_silence.push(frame);
            if self.start_silence.is_full() {
                return RecorderSignal::StartTimeout;
            }
        } else {
            self.end_silence.push(frame);
            if self.end_silence.is_full() {
                return RecorderSignal::EndSilence;
            }
        }
        RecorderSignal::Continue
    }

    /// Whether at least one speech frame has been recorded.
    pub fn is_recording(&self) -> bool {
        !self.recorded.is_empty()
    }

    /// Duration of recorded frames plus buffered trailing silence.
    pub fn pending_duration_s(&self) -> f64 {
        let trailing: usize = self.end_silence.iter().map(|f| f.samples.len()).sum();
        self.seconds(self.recorded_samples + trailing)
    }

    /// Duration of the frames committed to the utterance so far.
    pub fn recorded_duration_s(&self) -> f64 {
        self.seconds(self.recorded_samples)
    }

    pub fn recorded_frames(&self) -> usize {
        self.recorded.len()
    }

    pub fn start_buffered(&self) -> usize {
        self.start_silence.len()
    }

    pub fn end_buffered(&self) -> usize {
        self.end_silence.len()
    }

    /// Close the recording.
    ///
    /// The minimum is checked against the recorded frames (preroll, speech and
    /// inner pauses) only; the buffered trailing silence that ended the
    /// utterance does not count toward it. On success the trailing frames are
    /// appended to the returned frames. Otherwise the too-short recorded
    /// duration is returned. The recorder is empty afterwards either way.
    pub fn finish(&mut self, min_duration_s: f64) -> Result<Vec<AudioFrame>, f64> {
        let duration = self.recorded_duration_s();
        if duration + DURATION_EPSILON_S < min_duration_s {
            self.clear();
            return Err(duration);
        }
        let trailing: Vec<AudioFrame> = self.end_silence.drain().collect();
        self.extend(trailing);
        let frames = std::mem::take(&mut self.recorded);
        self.clear();
        Ok(frames)
    }

    /// Drop everything buffered or recorded.
    pub fn clear(&mut self) {
        self.start_silence.clear();
        self.end_silence.clear();
        self.recorded.clear();
        self.recorded_samples = 0;
    }

    fn append(&mut self, frame: AudioFrame) {
        self.recorded_samples += frame.samples.len();
        self.recorded.push(frame);
    }

    fn extend(&mut self, frames: Vec<AudioFrame>) {
        for frame in frames {
            self.append(frame);
        }
    }

    fn seconds(&self, samples: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        samples as f64 / self.sample_rate as f64
    }
}
