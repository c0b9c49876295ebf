//! Scoring primitives for chirp matching.

/// SNR reported when the noise floor is effectively zero
pub const MAX_SNR: f32 = 100.0;

/// Weight of the correlation term that does not depend on SNR
const BASE_CONFIDENCE_WEIGHT: f32 = 0.7;

/// SNR at which the SNR bonus saturates
const SNR_SATURATION: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    /// Peak absolute normalized correlation in `[0, 1]`
    pub value: f32,
    pub offset: usize,
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
    (energy / samples.len() as f64).sqrt() as f32
}

/// Scale `samples` to unit RMS. `None` for an all-zero input.
pub fn unit_rms(samples: &[f32]) -> Option<Vec<f32>> {
    let level = rms(samples);
    if level <= f32::EPSILON {
        return None;
    }
    Some(samples.iter().map(|&s| s / level).collect())
}

/// Mean signal power over the noise power.
pub fn snr(window: &[f32], noise_rms: f32) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let noise_power = noise_rms * noise_rms;
    if noise_power < 1e-10 {
        return MAX_SNR;
    }
    let power = window.iter().map(|&s| s * s).sum::<f32>() / window.len() as f32;
    power / noise_power
}

/// Correlation scaled by how clean the channel is.
pub fn confidence(correlation: f32, snr: f32) -> f32 {
    let bonus = (snr / SNR_SATURATION).min(1.0);
    correlation * (BASE_CONFIDENCE_WEIGHT + (1.0 - BASE_CONFIDENCE_WEIGHT) * bonus)
}

/// Slide a unit-RMS template over `signal` every `step` samples.
///
/// Each position is scored as the dot product divided by
/// `sqrt(window energy * template energy)`; window energies come from a
/// running prefix sum so every position costs one dot product.
pub fn normalized_correlation(signal: &[f32], template: &[f32], step: usize) -> Option<CorrelationPeak> {
    let len = template.len();
    if len == 0 || signal.len() < len {
        return None;
    }

    let template_energy: f64 = template.iter().map(|&t| t as f64 * t as f64).sum();
    if template_energy <= f64::EPSILON {
        return None;
    }

    let mut prefix = Vec::with_capacity(signal.len() + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for &s in signal {
        acc += s as f64 * s as f64;
        prefix.push(acc);
    }

    let mut best: Option<CorrelationPeak> = None;
    for offset in (0..=signal.len() - len).step_by(step.max(1)) {
        let energy = prefix[offset + len] - prefix[offset];
        if energy <= 1e-12 {
            continue;
        }
        let dot: f64 = signal[offset..offset + len]
            .iter()
            .zip(template)
            .map(|(&s, &t)| s as f64 * t as f64)
            .sum();
        let value = (dot / (energy * template_energy).sqrt()).abs() as f32;
        if best.map_or(true, |b| value > b.value) {
            best = Some(CorrelationPeak { value, offset });
        }
    }
    best
}
