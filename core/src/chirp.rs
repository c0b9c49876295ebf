use crate::config::{ChirpConfig, MAX_TEMPLATE_SECS};
use crate::correlation::{confidence, normalized_correlation, rms, snr, unit_rms};
use crate::error::{ModemError, Result};
use crate::rolling::{NoiseEstimate, RollingAudioBuffer};
use log::{debug, error, info};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// The buffer keeps this many detection windows (or longest templates)
const BUFFER_WINDOWS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectionEvent {
    pub template_name: String,
    pub confidence: f32,
    pub correlation: f32,
    pub snr: f32,
    /// Seconds of audio ingested when the detection fired
    pub timestamp_secs: f64,
}

/// Linear chirp registered for detection.
#[derive(Debug, Clone)]
pub struct ChirpTemplate {
    pub name: String,
    /// Peak-normalized to 1.0
    pub samples: Vec<f32>,
    pub f0: f32,
    pub f1: f32,
    pub duration_samples: usize,
    /// Unit-RMS copy used for correlation
    unit: Vec<f32>,
}

impl ChirpTemplate {
    pub fn new(name: &str, duration_secs: f32, f0: f32, f1: f32, config: &ChirpConfig) -> Result<Self> {
        if name.is_empty() {
            return Err(ModemError::InvalidTemplate("template name is empty".to_string()));
        }
        let nyquist = config.sample_rate as f32 / 2.0;
        for f in [f0, f1] {
            if !f.is_finite() || f <= 0.0 || f >= nyquist {
                return Err(ModemError::InvalidTemplate(format!(
                    "{}: frequency {}Hz outside (0, {}Hz)",
                    name, f, nyquist
                )));
            }
        }
        if !duration_secs.is_finite() || duration_secs <= 0.0 || duration_secs > MAX_TEMPLATE_SECS {
            return Err(ModemError::InvalidTemplate(format!(
                "{}: duration {}s outside (0, {}s]",
                name, duration_secs, MAX_TEMPLATE_SECS
            )));
        }

        let raw = linear_chirp(duration_secs, f0, f1, config.sample_rate, config.max_fade_samples);
        let peak = raw.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        if raw.len() < 2 || peak <= f32::EPSILON {
            return Err(ModemError::InvalidTemplate(format!(
                "{}: {}s at {}Hz yields no usable samples",
                name, duration_secs, config.sample_rate
            )));
        }
        let samples: Vec<f32> = raw.iter().map(|&s| s / peak).collect();
        let unit = unit_rms(&samples)
            .ok_or_else(|| ModemError::InvalidTemplate(format!("{}: silent template", name)))?;

        Ok(Self {
            name: name.to_string(),
            duration_samples: samples.len(),
            samples,
            f0,
            f1,
            unit,
        })
    }
}

/// `sin(2π(f0·t + (f1−f0)·t²/2d))` with a linear fade at both edges.
fn linear_chirp(duration_secs: f32, f0: f32, f1: f32, sample_rate: u32, max_fade: usize) -> Vec<f32> {
    let len = (duration_secs as f64 * sample_rate as f64).floor() as usize;
    let fade = max_fade.min(len / 10);
    let duration = duration_secs as f64;
    let sweep = (f1 - f0) as f64;

    (0..len)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            let phase = 2.0 * PI * (f0 as f64 * t + sweep * t * t / (2.0 * duration));
            let envelope = if fade == 0 {
                1.0
            } else if i < fade {
                i as f64 / fade as f64
            } else if i > len - fade {
                (len - i) as f64 / fade as f64
            } else {
                1.0
            };
            (phase.sin() * envelope) as f32
        })
        .collect()
}

/// Test chirp at `volume`, for playback or offline checks.
pub fn synthesize_chirp(duration_secs: f32, f0: f32, f1: f32, volume: f32, sample_rate: u32) -> Vec<f32> {
    let defaults = ChirpConfig::default();
    linear_chirp(duration_secs, f0, f1, sample_rate, defaults.max_fade_samples)
        .into_iter()
        .map(|s| s * volume)
        .collect()
}

pub type DetectionListener = Box<dyn FnMut(&DetectionEvent) + Send>;

/// Matched-filter detector for registered chirps in a live sample stream.
///
/// Audio arrives in blocks through [`ChirpDetector::ingest`]. Every block
/// updates the rolling buffer and the noise estimate; every
/// `detection_interval` blocks the newest window is correlated against each
/// template. Detections of the same template closer than
/// `min_detection_gap_secs` are suppressed.
pub struct ChirpDetector {
    config: ChirpConfig,
    templates: Vec<ChirpTemplate>,
    buffer: RollingAudioBuffer,
    noise: NoiseEstimate,
    blocks_ingested: u64,
    samples_ingested: u64,
    last_detection: HashMap<String, f64>,
    listeners: Vec<DetectionListener>,
}

impl ChirpDetector {
    pub fn new(config: ChirpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buffer: RollingAudioBuffer::new(config.window_samples * BUFFER_WINDOWS),
            noise: NoiseEstimate::new(config.noise_history_len, config.initial_noise_floor),
            config,
            templates: Vec::new(),
            blocks_ingested: 0,
            samples_ingested: 0,
            last_detection: HashMap::new(),
            listeners: Vec::new(),
        })
    }

    pub fn config(&self) -> &ChirpConfig {
        &self.config
    }

    /// Register a chirp. An existing template with the same name is replaced.
    pub fn add_template(&mut self, name: &str, duration_secs: f32, f0: f32, f1: f32) -> Result<()> {
        let template = ChirpTemplate::new(name, duration_secs, f0, f1, &self.config)?;
        info!(
            "Added template '{}': {}s, {}-{}Hz, {} samples",
            name, duration_secs, f0, f1, template.duration_samples
        );

        match self.templates.iter_mut().find(|t| t.name == name) {
            Some(existing) => *existing = template,
            None => self.templates.push(template),
        }
        self.last_detection.remove(name);
        self.fit_buffer();
        Ok(())
    }

    pub fn remove_template(&mut self, name: &str) -> bool {
        let before = self.templates.len();
        self.templates.retain(|t| t.name != name);
        self.last_detection.remove(name);
        before != self.templates.len()
    }

    pub fn templates(&self) -> &[ChirpTemplate] {
        &self.templates
    }

    pub fn set_detection_threshold(&mut self, threshold: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ModemError::InvalidConfig(format!(
                "detection threshold {} outside 0.0-1.0",
                threshold
            )));
        }
        info!("Detection threshold set to {}", threshold);
        self.config.detection_threshold = threshold;
        Ok(())
    }

    pub fn on_detection<F>(&mut self, listener: F)
    where
        F: FnMut(&DetectionEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Current noise floor (RMS).
    pub fn noise_level(&self) -> f32 {
        self.noise.level()
    }

    /// Samples covered by one detection pass.
    pub fn window_len(&self) -> usize {
        let longest = self.templates.iter().map(|t| t.duration_samples).max().unwrap_or(0);
        self.config
            .window_samples
            .max(longest + self.config.window_samples / 4)
    }

    fn fit_buffer(&mut self) {
        let needed = self.window_len() * BUFFER_WINDOWS;
        if needed > self.buffer.capacity() {
            let mut grown = RollingAudioBuffer::new(needed);
            grown.push(&self.buffer.latest(self.buffer.len()));
            self.buffer = grown;
        }
    }

    /// Forget buffered audio, noise history and debounce state. Templates,
    /// listeners and the threshold stay.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.noise.reset();
        self.blocks_ingested = 0;
        self.samples_ingested = 0;
        self.last_detection.clear();
    }

    pub fn ingest(&mut self, block: &[f32]) -> Vec<DetectionEvent> {
        if block.is_empty() {
            return Vec::new();
        }
        self.buffer.push(block);
        self.samples_ingested += block.len() as u64;
        self.noise.update(rms(block));
        self.blocks_ingested += 1;

        if self.blocks_ingested % self.config.detection_interval as u64 != 0 {
            return Vec::new();
        }
        let events = self.detect();
        for event in &events {
            self.notify(event);
        }
        events
    }

    fn detect(&mut self) -> Vec<DetectionEvent> {
        if self.templates.is_empty() {
            return Vec::new();
        }
        let window_len = self.window_len();
        if self.buffer.len() < window_len {
            return Vec::new();
        }
        let noise = self.noise.level();
        if noise < self.config.min_noise_floor {
            return Vec::new();
        }

        let window = self.buffer.latest(window_len);
        let snr = snr(&window, noise);
        if snr < self.config.snr_threshold {
            return Vec::new();
        }

        let timestamp = self.samples_ingested as f64 / self.config.sample_rate as f64;
        let mut events = Vec::new();
        for template in &self.templates {
            let Some(peak) = normalized_correlation(&window, &template.unit, self.config.correlation_step) else {
                continue;
            };
            let score = confidence(peak.value, snr);
            if score <= self.config.detection_threshold {
                continue;
            }

            let gap = self.config.min_detection_gap_secs as f64;
            if let Some(&last) = self.last_detection.get(&template.name) {
                if timestamp - last < gap {
                    debug!("Suppressing '{}' at {:.3}s (last at {:.3}s)", template.name, timestamp, last);
                    continue;
                }
            }

            info!(
                "Detected '{}' at {:.3}s: confidence {:.3}, correlation {:.3}, SNR {:.2}",
                template.name, timestamp, score, peak.value, snr
            );
            self.last_detection.insert(template.name.clone(), timestamp);
            events.push(DetectionEvent {
                template_name: template.name.clone(),
                confidence: score,
                correlation: peak.value,
                snr,
                timestamp_secs: timestamp,
            });
        }
        events
    }

    fn notify(&mut self, event: &DetectionEvent) {
        for listener in self.listeners.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!("Detection listener panicked on '{}'", event.template_name);
            }
        }
    }
}
