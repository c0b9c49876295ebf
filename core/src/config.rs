//! Protocol and detector configuration
//!
//! Every variant of the receiver (edge-triggered or confidence-gated detection,
//! printable-scan or unconditional byte slicing) is expressed through
//! [`ModemConfig`], so a single detector and assembler implementation covers
//! all of them.

use crate::error::{ModemError, Result};

/// Lowest audio sample rate accepted anywhere in the pipeline
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest audio sample rate accepted anywhere in the pipeline
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Longest chirp template, in seconds
pub const MAX_TEMPLATE_SECS: f32 = 10.0;

/// Reject sample rates outside `MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE`.
pub fn validate_sample_rate(sample_rate: u32) -> Result<()> {
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(ModemError::InvalidConfig(format!(
            "sample rate {}Hz outside {}-{}Hz",
            sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
        )));
    }
    Ok(())
}

/// How the symbol detector turns per-channel activity into symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DetectionMode {
    /// Per-channel rising-edge detection with lockout until the channel goes quiet.
    Edge,
    /// Classification must persist for a number of consecutive samples
    /// and reach a confidence count before a symbol is finalized.
    ConfidenceGated,
}

/// How complete bit groups are turned into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DecodePolicy {
    /// Slide over bit offsets looking for a printable ASCII byte (32..=126);
    /// undecodable bits are kept until more arrive.
    PrintableScan,
    /// Slice every complete 8-bit group from the start of the buffer.
    Unconditional,
}

/// Acoustic FSK modem configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ModemConfig {
    /// Carrier for bit 0 (Hz)
    pub freq_zero: f32,
    /// Carrier for bit 1 (Hz)
    pub freq_one: f32,
    /// Sync / clock carrier (Hz)
    pub freq_sync: f32,

    /// Data tone length per bit
    pub bit_duration_ms: u32,
    /// Silence after each data tone
    pub gap_ms: u32,
    /// Sync pulse preceding each data tone
    pub sync_pulse_ms: u32,
    /// Start/end marker length (all three carriers together)
    pub marker_duration_ms: u32,
    /// Silence bounding the whole transmission
    pub guard_ms: u32,
    /// Per-tone amplitude handed to the emitter
    pub amplitude: f32,
    /// Maximum characters per transmission
    pub max_text_len: usize,

    /// Magnitude (0-255 scale) above which a channel counts as active
    pub threshold: f32,
    pub min_signal_duration_ms: u32,
    pub max_signal_duration_ms: u32,
    pub silence_gap_ms: u32,
    /// Interval between magnitude samples fed to the detector
    pub sample_interval_ms: u32,
    /// Weighted moving average length applied to readings (1 disables)
    pub smoothing_window: usize,
    /// Confidence count at which a gated candidate is finalized. Confidence
    /// only builds once the candidate has persisted for `min_samples_for_bit`
    pub high_confidence: u32,
    /// Finalized candidates below this confidence are dropped
    pub min_emit_confidence: u32,
    /// Fraction of the expected samples-per-bit a gated candidate must persist
    pub min_samples_ratio: f32,

    pub detection_mode: DetectionMode,
    pub decode_policy: DecodePolicy,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            freq_zero: 8000.0,
            freq_one: 9000.0,
            freq_sync: 10000.0,
            bit_duration_ms: 120,
            gap_ms: 60,
            sync_pulse_ms: 40,
            marker_duration_ms: 240,
            guard_ms: 200,
            amplitude: 0.1,
            max_text_len: 50,
            threshold: 50.0,
            min_signal_duration_ms: 40,
            max_signal_duration_ms: 720,
            silence_gap_ms: 180,
            sample_interval_ms: 5,
            smoothing_window: 3,
            high_confidence: 3,
            min_emit_confidence: 2,
            min_samples_ratio: 0.8,
            detection_mode: DetectionMode::Edge,
            decode_policy: DecodePolicy::PrintableScan,
        }
    }
}

impl ModemConfig {
    /// Expected number of magnitude samples while one data tone is on the air.
    pub fn samples_per_bit(&self) -> u32 {
        (self.bit_duration_ms / self.sample_interval_ms.max(1)).max(2)
    }

    /// Consecutive samples a gated candidate must persist.
    pub fn min_samples_for_bit(&self) -> u32 {
        (self.samples_per_bit() as f32 * self.min_samples_ratio).floor() as u32
    }

    /// Silence after the last symbol that ends a reception session.
    pub fn session_timeout_ms(&self) -> u64 {
        self.bit_duration_ms as u64 * 3
    }

    pub fn validate(&self) -> Result<()> {
        let freqs = [self.freq_zero, self.freq_one, self.freq_sync];
        if freqs.iter().any(|f| !f.is_finite() || *f <= 0.0) {
            return Err(ModemError::InvalidConfig(
                "carrier frequencies must be positive".to_string(),
            ));
        }
        if self.freq_zero == self.freq_one
            || self.freq_zero == self.freq_sync
            || self.freq_one == self.freq_sync
        {
            return Err(ModemError::InvalidConfig(
                "carrier frequencies must be distinct".to_string(),
            ));
        }
        if self.bit_duration_ms == 0 || self.sample_interval_ms == 0 {
            return Err(ModemError::InvalidConfig(
                "bit duration and sample interval must be non-zero".to_string(),
            ));
        }
        if self.max_signal_duration_ms <= self.min_signal_duration_ms {
            return Err(ModemError::InvalidConfig(format!(
                "max signal duration {}ms must exceed min signal duration {}ms",
                self.max_signal_duration_ms, self.min_signal_duration_ms
            )));
        }
        if !(0.0..=255.0).contains(&self.threshold) {
            return Err(ModemError::InvalidConfig(format!(
                "threshold {} outside magnitude range 0-255",
                self.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.amplitude) {
            return Err(ModemError::InvalidConfig(format!(
                "amplitude {} outside 0.0-1.0",
                self.amplitude
            )));
        }
        if self.max_text_len == 0 {
            return Err(ModemError::InvalidConfig(
                "max text length must be non-zero".to_string(),
            ));
        }
        if self.smoothing_window == 0 {
            return Err(ModemError::InvalidConfig(
                "smoothing window must hold at least one reading".to_string(),
            ));
        }
        Ok(())
    }
}

/// Chirp detector configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ChirpConfig {
    pub sample_rate: u32,
    /// Minimum detection window in samples; grown to fit the longest template
    pub window_samples: usize,
    /// Run detection once every this many ingested blocks
    pub detection_interval: u32,
    pub detection_threshold: f32,
    pub min_detection_gap_secs: f32,
    pub snr_threshold: f32,
    /// Number of per-block RMS values averaged into the noise estimate
    pub noise_history_len: usize,
    /// Noise estimates below this skip detection entirely
    pub min_noise_floor: f32,
    /// Noise estimate reported before any non-silent block arrives
    pub initial_noise_floor: f32,
    /// Offset stride of the sliding correlation
    pub correlation_step: usize,
    /// Upper bound on the template fade-in/out length
    pub max_fade_samples: usize,
}

impl Default for ChirpConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            window_samples: 8192,
            detection_interval: 2,
            detection_threshold: 0.15,
            min_detection_gap_secs: 0.3,
            snr_threshold: 3.0,
            noise_history_len: 100,
            min_noise_floor: 0.001,
            initial_noise_floor: 0.01,
            correlation_step: 4,
            max_fade_samples: 100,
        }
    }
}

impl ChirpConfig {
    pub fn validate(&self) -> Result<()> {
        validate_sample_rate(self.sample_rate)?;
        if self.window_samples == 0 || self.correlation_step == 0 || self.detection_interval == 0 {
            return Err(ModemError::InvalidConfig(
                "window, correlation step and detection interval must be non-zero".to_string(),
            ));
        }
        if self.noise_history_len == 0 {
            return Err(ModemError::InvalidConfig(
                "noise history must hold at least one block".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(ModemError::InvalidConfig(format!(
                "detection threshold {} outside 0.0-1.0",
                self.detection_threshold
            )));
        }
        if self.min_detection_gap_secs < 0.0 || self.snr_threshold < 0.0 {
            return Err(ModemError::InvalidConfig(
                "detection gap and SNR threshold must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
