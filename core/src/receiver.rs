use crate::config::{validate_sample_rate, ModemConfig};
use crate::error::Result;
use crate::frame::{FrameAssembler, FrameEvent};
use crate::spectrum::{ChannelReading, GoertzelSampler, SpectralSampler};
use crate::symbol::{DetectorStats, SymbolDetector};
use log::debug;

/// What the receive pipeline reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    SessionStarted {
        at_ms: u64,
    },
    Character {
        character: char,
        at_ms: u64,
    },
    SessionEnded {
        start_ms: u64,
        end_ms: u64,
        text: String,
        partial_bits: Option<String>,
    },
}

impl ReceiverEvent {
    fn from_frame(event: FrameEvent, now_ms: u64) -> Self {
        match event {
            FrameEvent::SessionStarted { at } => ReceiverEvent::SessionStarted { at_ms: at },
            FrameEvent::Decoded(byte) => ReceiverEvent::Character {
                character: byte.as_char(),
                at_ms: now_ms,
            },
            FrameEvent::SessionEnded(summary) => ReceiverEvent::SessionEnded {
                start_ms: summary.start_time,
                end_ms: summary.end_time,
                text: summary.text,
                partial_bits: summary.partial_bits,
            },
        }
    }
}

/// Concatenate every decoded character in `events`.
pub fn decoded_text(events: &[ReceiverEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ReceiverEvent::Character { character, .. } => Some(*character),
            _ => None,
        })
        .collect()
}

/// Receive pipeline: one symbol detector feeding one frame assembler.
///
/// Call [`Receiver::tick`] every `sample_interval_ms` with the current
/// spectrum. Each tick samples the three carriers, applies at most one
/// detection and then checks the session timeout.
pub struct Receiver {
    config: ModemConfig,
    detector: SymbolDetector,
    assembler: FrameAssembler,
}

impl Receiver {
    pub fn new(config: ModemConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            detector: SymbolDetector::new(&config),
            assembler: FrameAssembler::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    pub fn is_receiving(&self) -> bool {
        self.assembler.is_receiving()
    }

    pub fn detector_stats(&self) -> DetectorStats {
        self.detector.stats()
    }

    pub fn tick(&mut self, sampler: &dyn SpectralSampler, now_ms: u64) -> Vec<ReceiverEvent> {
        let reading = ChannelReading::sample(sampler, &self.config);
        self.process(reading, now_ms)
    }

    pub fn process(&mut self, reading: ChannelReading, now_ms: u64) -> Vec<ReceiverEvent> {
        let mut frames = Vec::new();
        if let Some(detection) = self.detector.observe(reading, now_ms) {
            frames.extend(self.assembler.handle(detection, now_ms));
        }
        frames.extend(self.assembler.check_timeout(now_ms, self.detector.last_silence()));

        frames
            .into_iter()
            .map(|f| ReceiverEvent::from_frame(f, now_ms))
            .collect()
    }

    /// Close an open session regardless of the timeout rule.
    pub fn finish(&mut self, now_ms: u64) -> Vec<ReceiverEvent> {
        if !self.assembler.is_receiving() {
            return Vec::new();
        }
        self.assembler
            .end_session(now_ms)
            .into_iter()
            .map(|f| ReceiverEvent::from_frame(f, now_ms))
            .collect()
    }

    pub fn reset(&mut self) {
        self.detector = SymbolDetector::new(&self.config);
        self.assembler = FrameAssembler::new(&self.config);
    }
}

/// Run recorded audio through a [`Receiver`].
///
/// The analysis hop is one sample interval and each Goertzel window spans two
/// hops. After the audio ends the receiver keeps ticking on silence until the
/// session timeout can fire, then any session still open is closed.
pub fn decode_samples(samples: &[f32], sample_rate: u32, config: &ModemConfig) -> Result<Vec<ReceiverEvent>> {
    validate_sample_rate(sample_rate)?;
    let mut receiver = Receiver::new(config.clone())?;

    let hop = ((sample_rate as u64 * config.sample_interval_ms as u64) / 1000).max(1) as usize;
    let window = hop * 2;
    let mut sampler = GoertzelSampler::new(sample_rate, window);
    let to_ms = |pos: usize| pos as u64 * 1000 / sample_rate as u64;

    let mut events = Vec::new();
    let mut pos = 0;
    while pos < samples.len() {
        let end = (pos + window).min(samples.len());
        sampler.load(&samples[pos..end]);
        events.extend(receiver.tick(&sampler, to_ms(pos)));
        pos += hop;
    }

    let end_ms = to_ms(samples.len());
    let drain_ms = config.session_timeout_ms()
        + config.silence_gap_ms as u64 * 2
        + config.sample_interval_ms as u64 * 4;
    let mut now = end_ms;
    while receiver.is_receiving() && now <= end_ms + drain_ms {
        events.extend(receiver.process(ChannelReading::default(), now));
        now += config.sample_interval_ms as u64;
    }
    events.extend(receiver.finish(now));

    debug!(
        "Decoded {} samples ({}ms): {:?}",
        samples.len(),
        end_ms,
        receiver.detector_stats()
    );
    Ok(events)
}
