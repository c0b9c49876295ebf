use crate::config::ModemConfig;
use std::f32::consts::PI;

/// Lower bound of the magnitude scale in dBFS (maps to 0)
const MAGNITUDE_MIN_DB: f32 = -60.0;

/// Upper bound of the magnitude scale in dBFS (maps to 255)
const MAGNITUDE_MAX_DB: f32 = 0.0;

/// Full-scale value of the magnitude range
pub const MAGNITUDE_FULL_SCALE: f32 = 255.0;

/// Periodic source of per-frequency magnitudes.
///
/// Magnitudes are reported on a 0-255 scale, the same range a byte
/// frequency analyser produces, so one threshold works for every source.
pub trait SpectralSampler {
    fn magnitude_at(&self, frequency_hz: f32) -> f32;
}

/// Magnitudes of the three protocol carriers at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelReading {
    pub zero: f32,
    pub one: f32,
    pub sync: f32,
}

impl ChannelReading {
    pub fn new(zero: f32, one: f32, sync: f32) -> Self {
        Self { zero, one, sync }
    }

    /// Query the protocol carriers from a sampler.
    pub fn sample(sampler: &dyn SpectralSampler, config: &ModemConfig) -> Self {
        Self {
            zero: sampler.magnitude_at(config.freq_zero),
            one: sampler.magnitude_at(config.freq_one),
            sync: sampler.magnitude_at(config.freq_sync),
        }
    }
}

/// Convert a linear sine amplitude into the 0-255 magnitude scale.
pub fn amplitude_to_magnitude(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * amplitude.log10();
    let scaled = (db - MAGNITUDE_MIN_DB) / (MAGNITUDE_MAX_DB - MAGNITUDE_MIN_DB);
    scaled.clamp(0.0, 1.0) * MAGNITUDE_FULL_SCALE
}

/// Spectral sampler over a window of raw audio using the Goertzel algorithm.
///
/// Load a window with [`GoertzelSampler::load`], then query any frequency.
/// A Hann window is applied on load to keep neighbouring carriers from
/// leaking into each other.
pub struct GoertzelSampler {
    sample_rate: f32,
    window: Vec<f32>,
    frame: Vec<f32>,
}

impl GoertzelSampler {
    pub fn new(sample_rate: u32, window_len: usize) -> Self {
        let window_len = window_len.max(2);
        let window = (0..window_len)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / (window_len - 1) as f32).cos())
            .collect();
        Self {
            sample_rate: sample_rate as f32,
            window,
            frame: vec![0.0; window_len],
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Load the next analysis window. Shorter input is zero-padded.
    pub fn load(&mut self, samples: &[f32]) {
        for (i, slot) in self.frame.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            *slot = sample * self.window[i];
        }
    }

    /// Estimated sine amplitude at `freq` within the loaded window.
    pub fn amplitude_at(&self, freq: f32) -> f32 {
        let n = self.frame.len() as f32;
        let omega = 2.0 * PI * freq / self.sample_rate;
        let coeff = 2.0 * omega.cos();

        let mut q1 = 0.0;
        let mut q2 = 0.0;
        for &sample in &self.frame {
            let q0 = coeff * q1 - q2 + sample;
            q2 = q1;
            q1 = q0;
        }

        let real = q1 - q2 * omega.cos();
        let imag = q2 * omega.sin();
        let magnitude = (real * real + imag * imag).sqrt();

        // Hann coherent gain is 0.5
        4.0 * magnitude / n
    }
}

impl SpectralSampler for GoertzelSampler {
    fn magnitude_at(&self, frequency_hz: f32) -> f32 {
        amplitude_to_magnitude(self.amplitude_at(frequency_hz))
    }
}

/// One frame of byte magnitudes from an external FFT analyser.
///
/// Each query averages a neighbourhood of bins around the target
/// frequency, which tolerates slight carrier drift.
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    bins: Vec<f32>,
    sample_rate: f32,
    fft_size: usize,
    radius: usize,
}

impl SpectrumFrame {
    pub fn new(bins: Vec<f32>, sample_rate: u32, fft_size: usize) -> Self {
        Self {
            bins,
            sample_rate: sample_rate as f32,
            fft_size: fft_size.max(1),
            radius: 4,
        }
    }

    pub fn from_bytes(bins: &[u8], sample_rate: u32, fft_size: usize) -> Self {
        Self::new(bins.iter().map(|&b| b as f32).collect(), sample_rate, fft_size)
    }

    pub fn with_radius(mut self, radius: usize) -> Self {
        self.radius = radius;
        self
    }

    pub fn frequency_to_bin(&self, frequency_hz: f32) -> usize {
        let bin_width = self.sample_rate / self.fft_size as f32;
        (frequency_hz / bin_width).floor().max(0.0) as usize
    }
}

impl SpectralSampler for SpectrumFrame {
    fn magnitude_at(&self, frequency_hz: f32) -> f32 {
        if self.bins.is_empty() {
            return 0.0;
        }
        let last = self.bins.len() - 1;
        let center = self.frequency_to_bin(frequency_hz).min(last);
        let lo = center.saturating_sub(self.radius);
        let hi = (center + self.radius).min(last);
        let slice = &self.bins[lo..=hi];
        slice.iter().sum::<f32>() / slice.len() as f32
    }
}
