//! The finished utterance handed to the transcription collaborator.

use std::io::Cursor;
use std::path::Path;

use serde::Serialize;

use crate::{buffering::AudioFrame, error::Result, vad::ClassifierMode};

/// Ordered frames of one completed capture, plus how they were classified.
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    sample_rate: u32,
    classifier_mode: ClassifierMode,
}

/// Metadata describing an [`Utterance`], suitable for logs and IPC.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UtteranceInfo {
    pub sample_rate: u32,
    pub duration_s: f64,
    pub frame_count: usize,
    pub classifier_mode: ClassifierMode,
    pub average_confidence: f32,
}

impl Utterance {
    pub fn new(frames: Vec<AudioFrame>, sample_rate: u32, classifier_mode: ClassifierMode) -> Self {
        Self {
            frames,
            sample_rate,
            classifier_mode,
        }
    }

    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<AudioFrame> {
        self.frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(|f| f.samples.len()).sum()
    }

    pub fn duration_s(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.sample_count() as f64 / self.sample_rate as f64
    }

    pub fn classifier_mode(&self) -> ClassifierMode {
        self.classifier_mode
    }

    /// Mean confidence over classified frames; 0 when none carry one.
    pub fn average_confidence(&self) -> f32 {
        let (sum, n) = self
            .frames
            .iter()
            .filter_map(|f| f.confidence)
            .fold((0.0f32, 0usize), |(sum, n), c| (sum + c, n + 1));
        if n == 0 {
            0.0
        } else {
            sum / n as f32
        }
    }

    pub fn info(&self) -> UtteranceInfo {
        UtteranceInfo {
            sample_rate: self.sample_rate,
            duration_s: self.duration_s(),
            frame_count: self.frame_count(),
            classifier_mode: self.classifier_mode,
            average_confidence: self.average_confidence(),
        }
    }

    /// All samples, concatenated in frame order.
    pub fn samples(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.sample_count());
        for frame in &self.frames {
            out.extend_from_slice(&frame.samples);
        }
        out
    }

    /// Encode as a 16-bit mono WAV in memory.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, self.wav_spec())?;
            self.write_samples(&mut writer)?;
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    /// Write a 16-bit mono WAV file.
    pub fn write_wav(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = hound::WavWriter::create(path, self.wav_spec())?;
        self.write_samples(&mut writer)?;
        writer.finalize()?;
        Ok(())
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    fn write_samples<W>(&self, writer: &mut hound::WavWriter<W>) -> Result<()>
    where
        W: std::io::Write + std::io::Seek,
    {
        for frame in &self.frames {
            for &s in &frame.samples {
                let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer.write_sample(pcm)?;
            }
        }
        Ok(())
    }
}
