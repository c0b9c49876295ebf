use crate::config::{DecodePolicy, ModemConfig};
use crate::error::{ModemError, Result};
use crate::tone::ToneEmitter;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A chord of carriers held for `duration_ms`, followed by `gap_ms` of silence.
/// An empty chord is a pure pause.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneInstruction {
    pub frequencies: Vec<f32>,
    pub duration_ms: u32,
    pub gap_ms: u32,
}

impl ToneInstruction {
    pub fn tone(frequency: f32, duration_ms: u32, gap_ms: u32) -> Self {
        Self {
            frequencies: vec![frequency],
            duration_ms,
            gap_ms,
        }
    }

    pub fn silence(duration_ms: u32) -> Self {
        Self {
            frequencies: Vec::new(),
            duration_ms,
            gap_ms: 0,
        }
    }

    pub fn is_silence(&self) -> bool {
        self.frequencies.is_empty()
    }

    pub fn span_ms(&self) -> u64 {
        self.duration_ms as u64 + self.gap_ms as u64
    }
}

/// Full tone schedule for one transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct TonePlan {
    pub instructions: Vec<ToneInstruction>,
    pub amplitude: f32,
}

impl TonePlan {
    pub fn total_duration_ms(&self) -> u64 {
        self.instructions.iter().map(ToneInstruction::span_ms).sum()
    }
}

/// Text to tone schedule mapping.
///
/// Layout of a transmission:
/// guard silence, start marker (all carriers), then for every bit of every
/// character (MSB first) a sync pulse followed by the data tone and the
/// inter-bit gap, then the end marker and a closing guard.
#[derive(Debug, Clone)]
pub struct Encoder {
    config: ModemConfig,
}

impl Encoder {
    pub fn new(config: ModemConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Check text before anything is emitted and return the part that will
    /// be sent, with surrounding whitespace trimmed.
    ///
    /// Under [`DecodePolicy::PrintableScan`] only printable ASCII (32-126)
    /// is accepted, since the receiver never decodes anything else.
    pub fn validate_text<'a>(&self, text: &'a str) -> Result<&'a str> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ModemError::EmptyMessage);
        }
        let len = text.chars().count();
        if len > self.config.max_text_len {
            return Err(ModemError::MessageTooLong {
                len,
                max: self.config.max_text_len,
            });
        }
        if let Some(c) = text.chars().find(|c| !c.is_ascii()) {
            return Err(ModemError::NonAsciiCharacter(c));
        }
        if self.config.decode_policy == DecodePolicy::PrintableScan {
            if let Some(c) = text.chars().find(|c| !(' '..='~').contains(c)) {
                return Err(ModemError::UnprintableCharacter(c));
            }
        }
        Ok(text)
    }

    fn marker(&self, gap_ms: u32) -> ToneInstruction {
        ToneInstruction {
            frequencies: vec![self.config.freq_zero, self.config.freq_one, self.config.freq_sync],
            duration_ms: self.config.marker_duration_ms,
            gap_ms,
        }
    }

    /// Guard silence and start marker.
    pub fn preamble(&self) -> Vec<ToneInstruction> {
        vec![
            ToneInstruction::silence(self.config.guard_ms),
            self.marker(self.config.gap_ms),
        ]
    }

    /// End marker and closing guard silence.
    pub fn postamble(&self) -> Vec<ToneInstruction> {
        vec![self.marker(0), ToneInstruction::silence(self.config.guard_ms)]
    }

    /// Sync pulse + data tone for each of the 8 bits of an ASCII byte.
    pub fn character(&self, byte: u8) -> Vec<ToneInstruction> {
        let mut instructions = Vec::with_capacity(16);
        for i in (0..8).rev() {
            let bit = (byte >> i) & 1 == 1;
            let carrier = if bit {
                self.config.freq_one
            } else {
                self.config.freq_zero
            };
            instructions.push(ToneInstruction::tone(self.config.freq_sync, self.config.sync_pulse_ms, 0));
            instructions.push(ToneInstruction::tone(carrier, self.config.bit_duration_ms, self.config.gap_ms));
        }
        instructions
    }

    pub fn plan(&self, text: &str) -> Result<TonePlan> {
        let text = self.validate_text(text)?;

        let mut instructions = self.preamble();
        for byte in text.bytes() {
            instructions.extend(self.character(byte));
        }
        instructions.extend(self.postamble());

        Ok(TonePlan {
            instructions,
            amplitude: self.config.amplitude,
        })
    }
}

/// Shared flag that abandons an in-flight transmission.
///
/// A cancelled token stays cancelled until [`CancelToken::reset`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransmitStatus {
    Transmitting { text: String },
    Character { index: usize, character: char, bits: String },
    Complete,
    Cancelled,
    /// User-facing warning; nothing was sent
    Rejected(String),
}

#[derive(Debug)]
pub enum TransmitOutcome {
    Sent { instructions: usize, duration_ms: u64 },
    Rejected(ModemError),
    Cancelled { instructions: usize },
}

type StatusCallback = Box<dyn FnMut(&TransmitStatus) + Send>;

/// Drives an [`Encoder`] schedule into a [`ToneEmitter`].
///
/// Every instruction is a task boundary: the cancel token is checked before
/// each one, so a cancelled transmission never starts another tone.
pub struct Transmitter {
    encoder: Encoder,
    cancel: CancelToken,
    status: Option<StatusCallback>,
}

impl Transmitter {
    pub fn new(encoder: Encoder) -> Self {
        Self {
            encoder,
            cancel: CancelToken::new(),
            status: None,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn on_status<F>(&mut self, callback: F)
    where
        F: FnMut(&TransmitStatus) + Send + 'static,
    {
        self.status = Some(Box::new(callback));
    }

    fn report(&mut self, status: TransmitStatus) {
        if let Some(callback) = self.status.as_mut() {
            callback(&status);
        }
    }

    /// Send `text`. Validation failures come back as
    /// [`TransmitOutcome::Rejected`]; only emitter failures are errors.
    pub fn transmit(&mut self, text: &str, emitter: &mut dyn ToneEmitter) -> Result<TransmitOutcome> {
        let text = match self.encoder.validate_text(text) {
            Ok(text) => text,
            Err(err) => {
                warn!("Transmission rejected: {}", err);
                self.report(TransmitStatus::Rejected(err.to_string()));
                return Ok(TransmitOutcome::Rejected(err));
            }
        };

        info!("Starting transmission: {:?}", text);
        self.report(TransmitStatus::Transmitting {
            text: text.to_string(),
        });

        let amplitude = self.encoder.config().amplitude;
        let mut sent = 0usize;
        let mut duration_ms = 0u64;

        let mut groups = Vec::with_capacity(text.len() + 2);
        groups.push((None, self.encoder.preamble()));
        for (index, byte) in text.bytes().enumerate() {
            groups.push((Some((index, byte)), self.encoder.character(byte)));
        }
        groups.push((None, self.encoder.postamble()));

        for (character, instructions) in groups {
            if let Some((index, byte)) = character {
                let bits = format!("{:08b}", byte);
                info!("Sending {:?} as {}", byte as char, bits);
                self.report(TransmitStatus::Character {
                    index,
                    character: byte as char,
                    bits,
                });
            }

            for instruction in &instructions {
                if self.cancel.is_cancelled() {
                    warn!("Transmission cancelled after {} instructions", sent);
                    self.report(TransmitStatus::Cancelled);
                    return Ok(TransmitOutcome::Cancelled { instructions: sent });
                }

                for &frequency in &instruction.frequencies {
                    emitter.play_tone(frequency, instruction.duration_ms, amplitude)?;
                }
                emitter.wait(instruction.duration_ms)?;
                if instruction.gap_ms > 0 {
                    emitter.wait(instruction.gap_ms)?;
                }

                sent += 1;
                duration_ms += instruction.span_ms();
            }
        }

        info!("Transmission complete ({} instructions, {}ms)", sent, duration_ms);
        self.report(TransmitStatus::Complete);
        Ok(TransmitOutcome::Sent {
            instructions: sent,
            duration_ms,
        })
    }
}
