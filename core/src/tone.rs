use crate::error::{ModemError, Result};
use std::f32::consts::PI;

/// Linear attack/release applied to every rendered tone
pub const TONE_RAMP_MS: u32 = 10;

/// Sink that can put tones on the air.
///
/// `play_tone` starts a tone at the current position and returns at once, so
/// several tones can sound together. `wait` is the completion boundary: it
/// returns once `duration_ms` has elapsed.
pub trait ToneEmitter {
    fn play_tone(&mut self, frequency_hz: f32, duration_ms: u32, amplitude: f32) -> Result<()>;

    fn wait(&mut self, duration_ms: u32) -> Result<()>;
}

/// Tone emitter that mixes everything into an in-memory sample buffer.
pub struct ToneRenderer {
    sample_rate: u32,
    samples: Vec<f32>,
    cursor: usize,
}

impl ToneRenderer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: Vec::new(),
            cursor: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn ms_to_samples(&self, duration_ms: u32) -> usize {
        (duration_ms as u64 * self.sample_rate as u64 / 1000) as usize
    }

    /// Rendered audio up to the current position.
    pub fn samples(&self) -> &[f32] {
        &self.samples[..self.cursor.min(self.samples.len())]
    }

    pub fn into_samples(mut self) -> Vec<f32> {
        self.samples.resize(self.cursor.max(self.samples.len()), 0.0);
        self.samples
    }
}

impl ToneEmitter for ToneRenderer {
    fn play_tone(&mut self, frequency_hz: f32, duration_ms: u32, amplitude: f32) -> Result<()> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(ModemError::Emitter(format!("invalid frequency {}", frequency_hz)));
        }
        if frequency_hz * 2.0 >= self.sample_rate as f32 {
            return Err(ModemError::Emitter(format!(
                "{}Hz is above Nyquist for {}Hz sample rate",
                frequency_hz, self.sample_rate
            )));
        }

        let len = self.ms_to_samples(duration_ms);
        let ramp = self.ms_to_samples(TONE_RAMP_MS).min(len / 2).max(1);
        let end = self.cursor + len;
        if self.samples.len() < end {
            self.samples.resize(end, 0.0);
        }

        let sample_rate = self.sample_rate as f32;
        for (i, slot) in self.samples[self.cursor..end].iter_mut().enumerate() {
            let envelope = if i < ramp {
                i as f32 / ramp as f32
            } else if i >= len - ramp {
                (len - i) as f32 / ramp as f32
            } else {
                1.0
            };
            let t = i as f32 / sample_rate;
            *slot += amplitude * envelope * (2.0 * PI * frequency_hz * t).sin();
        }
        Ok(())
    }

    fn wait(&mut self, duration_ms: u32) -> Result<()> {
        self.cursor += self.ms_to_samples(duration_ms);
        if self.samples.len() < self.cursor {
            self.samples.resize(self.cursor, 0.0);
        }
        Ok(())
    }
}
