use crate::config::{DecodePolicy, ModemConfig};
use crate::symbol::{Detection, Symbol};
use log::{debug, info};
use std::fmt;

/// Lowest printable ASCII code accepted by the printable-scan policy
const PRINTABLE_MIN: u8 = 32;

/// Highest printable ASCII code accepted by the printable-scan policy
const PRINTABLE_MAX: u8 = 126;

const BITS_PER_BYTE: usize = 8;

/// Received bits not yet consumed by decoding, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitBuffer {
    bits: Vec<bool>,
}

impl BitBuffer {
    pub fn push(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    /// MSB-first value of the 8 bits starting at `offset`.
    fn byte_at(&self, offset: usize) -> u8 {
        self.bits[offset..offset + BITS_PER_BYTE]
            .iter()
            .fold(0u8, |acc, &bit| (acc << 1) | bit as u8)
    }

    fn consume(&mut self, count: usize) {
        self.bits.drain(..count);
    }
}

impl fmt::Display for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &bit in &self.bits {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// A byte recovered from the bit stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedByte {
    pub value: u8,
    /// Bits skipped before this byte's window
    pub skipped_bits: usize,
}

impl DecodedByte {
    pub fn as_char(&self) -> char {
        self.value as char
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceptionSession {
    pub start_time: u64,
    pub last_symbol_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Idle,
    Receiving(ReceptionSession),
}

/// What a finished session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub start_time: u64,
    pub end_time: u64,
    pub text: String,
    /// Bits that never formed a decodable byte
    pub partial_bits: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    SessionStarted { at: u64 },
    Decoded(DecodedByte),
    SessionEnded(SessionSummary),
}

/// Accumulates symbols into bytes and tracks reception sessions.
///
/// State machine: `Idle -> Receiving` on sync or resync, back to `Idle` when
/// the session times out. A resync while receiving flushes the current
/// session (one last decode) and immediately opens a fresh one.
pub struct FrameAssembler {
    policy: DecodePolicy,
    timeout_ms: u64,
    silence_hold_ms: u64,
    buffer: BitBuffer,
    state: AssemblerState,
    session_text: String,
}

impl FrameAssembler {
    pub fn new(config: &ModemConfig) -> Self {
        Self {
            policy: config.decode_policy,
            timeout_ms: config.session_timeout_ms(),
            silence_hold_ms: config.silence_gap_ms as u64 * 2,
            buffer: BitBuffer::default(),
            state: AssemblerState::Idle,
            session_text: String::new(),
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self.state, AssemblerState::Receiving(_))
    }

    pub fn buffer(&self) -> &BitBuffer {
        &self.buffer
    }

    pub fn append(&mut self, bit: bool) {
        self.buffer.push(bit);
    }

    /// Decode as many bytes as the policy allows from the front of the buffer.
    pub fn try_decode(&mut self) -> Vec<DecodedByte> {
        let mut decoded = Vec::new();

        while self.buffer.len() >= BITS_PER_BYTE {
            let found = match self.policy {
                DecodePolicy::Unconditional => Some(0),
                DecodePolicy::PrintableScan => (0..=self.buffer.len() - BITS_PER_BYTE).find(|&i| {
                    (PRINTABLE_MIN..=PRINTABLE_MAX).contains(&self.buffer.byte_at(i))
                }),
            };

            let Some(offset) = found else {
                break;
            };

            let value = self.buffer.byte_at(offset);
            self.buffer.consume(offset + BITS_PER_BYTE);
            debug!("Decoded byte 0x{:02x} ({:?}) after skipping {} bits", value, value as char, offset);
            self.session_text.push(value as char);
            decoded.push(DecodedByte {
                value,
                skipped_bits: offset,
            });
        }

        decoded
    }

    pub fn start_session(&mut self, now_ms: u64) -> FrameEvent {
        info!("Sync detected, starting reception");
        self.buffer.clear();
        self.session_text.clear();
        self.state = AssemblerState::Receiving(ReceptionSession {
            start_time: now_ms,
            last_symbol_time: now_ms,
        });
        FrameEvent::SessionStarted { at: now_ms }
    }

    /// Final decode, report leftovers, return to idle.
    pub fn end_session(&mut self, now_ms: u64) -> Vec<FrameEvent> {
        let mut events: Vec<FrameEvent> =
            self.try_decode().into_iter().map(FrameEvent::Decoded).collect();

        let start_time = match self.state {
            AssemblerState::Receiving(session) => session.start_time,
            AssemblerState::Idle => now_ms,
        };

        let partial_bits = if self.buffer.is_empty() {
            None
        } else {
            let bits = self.buffer.to_string();
            info!("Undecoded bits remaining: {} ({} bits)", bits, bits.len());
            Some(bits)
        };

        info!(
            "Reception ended after {}ms: {:?}",
            now_ms.saturating_sub(start_time),
            self.session_text
        );

        events.push(FrameEvent::SessionEnded(SessionSummary {
            start_time,
            end_time: now_ms,
            text: std::mem::take(&mut self.session_text),
            partial_bits,
        }));

        self.buffer.clear();
        self.state = AssemblerState::Idle;
        events
    }

    /// Apply one detection from the symbol detector.
    pub fn handle(&mut self, detection: Detection, now_ms: u64) -> Vec<FrameEvent> {
        match (detection, self.state) {
            (Detection::Resync, AssemblerState::Receiving(_)) => {
                let mut events = self.end_session(now_ms);
                events.push(self.start_session(now_ms));
                events
            }
            (Detection::Resync, AssemblerState::Idle)
            | (Detection::Symbol(Symbol::Sync), AssemblerState::Idle) => {
                vec![self.start_session(now_ms)]
            }
            (Detection::Symbol(Symbol::Sync), AssemblerState::Receiving(_)) => {
                self.touch(now_ms);
                Vec::new()
            }
            (Detection::Symbol(symbol), AssemblerState::Receiving(_)) => {
                if let Some(bit) = symbol.bit() {
                    self.touch(now_ms);
                    self.append(bit);
                    debug!("Bit {} received, buffer {}", symbol.as_char(), self.buffer);
                }
                self.try_decode().into_iter().map(FrameEvent::Decoded).collect()
            }
            (Detection::Symbol(symbol), AssemblerState::Idle) => {
                debug!("Ignoring {:?} outside a reception session", symbol);
                Vec::new()
            }
        }
    }

    /// Close the session once no symbol has arrived for the timeout and the
    /// last quiet stretch began long enough ago.
    ///
    /// `last_silence` is the start of the most recent quiet stretch; a carrier
    /// that stays active without forming symbols does not hold the session
    /// open. Without any quiet stretch the session start stands in.
    pub fn check_timeout(&mut self, now_ms: u64, last_silence: Option<u64>) -> Vec<FrameEvent> {
        let AssemblerState::Receiving(session) = self.state else {
            return Vec::new();
        };

        let since_symbol = now_ms.saturating_sub(session.last_symbol_time);
        let since_silence = now_ms.saturating_sub(last_silence.unwrap_or(session.start_time));

        if since_symbol > self.timeout_ms && since_silence > self.silence_hold_ms {
            self.end_session(now_ms)
        } else {
            Vec::new()
        }
    }

    fn touch(&mut self, now_ms: u64) {
        if let AssemblerState::Receiving(ref mut session) = self.state {
            session.last_symbol_time = now_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler(policy: DecodePolicy) -> FrameAssembler {
        FrameAssembler::new(&ModemConfig {
            decode_policy: policy,
            ..ModemConfig::default()
        })
    }

    fn push_bits(assembler: &mut FrameAssembler, bits: &str) {
        for c in bits.chars() {
            assembler.append(c == '1');
        }
    }

    fn text_of(bytes: &[DecodedByte]) -> String {
        bytes.iter().map(|b| b.as_char()).collect()
    }

    #[test]
    fn test_decode_single_character() {
        let mut assembler = assembler(DecodePolicy::PrintableScan);
        push_bits(&mut assembler, "01001000");
        let decoded = assembler.try_decode();
        assert_eq!(text_of(&decoded), "H");
        assert!(assembler.buffer().is_empty());
    }

    #[test]
    fn test_decode_multiple_characters_in_one_pass() {
        let mut assembler = assembler(DecodePolicy::PrintableScan);
        push_bits(&mut assembler, "0100100001101001011");
        let decoded = assembler.try_decode();
        assert_eq!(text_of(&decoded), "Hi");
        assert_eq!(assembler.buffer().to_string(), "011");
    }

    #[test]
    fn test_short_buffer_is_untouched() {
        for policy in [DecodePolicy::PrintableScan, DecodePolicy::Unconditional] {
            let mut assembler = assembler(policy);
            push_bits(&mut assembler, "0100100");
            let before = assembler.buffer().clone();
            assert!(assembler.try_decode().is_empty());
            assert_eq!(assembler.buffer(), &before);
        }
    }

    #[test]
    fn test_try_decode_is_idempotent() {
        for policy in [DecodePolicy::PrintableScan, DecodePolicy::Unconditional] {
            let mut assembler = assembler(policy);
            push_bits(&mut assembler, "0100100000000000000001");
            let first = assembler.try_decode();
            assert!(!first.is_empty());
            let snapshot = assembler.buffer().clone();
            assert!(assembler.try_decode().is_empty());
            assert_eq!(assembler.buffer(), &snapshot);
        }
    }

    #[test]
    fn test_printable_scan_skips_leading_noise() {
        let mut assembler = assembler(DecodePolicy::PrintableScan);
        // Two stray bits, then 'A' (01000001)
        push_bits(&mut assembler, "1101000001");
        let decoded = assembler.try_decode();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].value, b'A');
        assert_eq!(decoded[0].skipped_bits, 2);
    }

    #[test]
    fn test_printable_scan_retains_unprintable_bits() {
        let mut assembler = assembler(DecodePolicy::PrintableScan);
        push_bits(&mut assembler, "0000000000");
        assert!(assembler.try_decode().is_empty());
        assert_eq!(assembler.buffer().len(), 10);
    }

    #[test]
    fn test_unconditional_slices_every_group() {
        let mut assembler = assembler(DecodePolicy::Unconditional);
        push_bits(&mut assembler, "00000001111111110");
        let decoded = assembler.try_decode();
        assert_eq!(decoded.iter().map(|b| b.value).collect::<Vec<_>>(), vec![0x01, 0xFF]);
        assert_eq!(assembler.buffer().len(), 1);
    }

    #[test]
    fn test_sync_starts_session_and_bits_flow() {
        let mut assembler = assembler(DecodePolicy::PrintableScan);
        assert_eq!(
            assembler.handle(Detection::Symbol(Symbol::Bit1), 0),
            Vec::<FrameEvent>::new()
        );
        assert!(assembler.buffer().is_empty());

        let events = assembler.handle(Detection::Symbol(Symbol::Sync), 10);
        assert_eq!(events, vec![FrameEvent::SessionStarted { at: 10 }]);
        assert!(assembler.is_receiving());

        let mut decoded = Vec::new();
        for (i, c) in "01001000".chars().enumerate() {
            let symbol = if c == '1' { Symbol::Bit1 } else { Symbol::Bit0 };
            decoded.extend(assembler.handle(Detection::Symbol(symbol), 20 + i as u64));
        }
        assert_eq!(
            decoded,
            vec![FrameEvent::Decoded(DecodedByte {
                value: b'H',
                skipped_bits: 0
            })]
        );
    }

    #[test]
    fn test_resync_flushes_and_restarts() {
        let mut assembler = assembler(DecodePolicy::PrintableScan);
        assembler.handle(Detection::Resync, 0);
        push_bits(&mut assembler, "0101");

        let events = assembler.handle(Detection::Resync, 100);
        assert_eq!(events.len(), 2);
        match &events[0] {
            FrameEvent::SessionEnded(summary) => {
                assert_eq!(summary.partial_bits.as_deref(), Some("0101"));
                assert_eq!(summary.start_time, 0);
            }
            other => panic!("expected session end, got {:?}", other),
        }
        assert_eq!(events[1], FrameEvent::SessionStarted { at: 100 });
        assert!(assembler.buffer().is_empty());
    }

    #[test]
    fn test_session_timeout_flushes_buffer() {
        let config = ModemConfig::default();
        let mut assembler = FrameAssembler::new(&config);
        assembler.handle(Detection::Symbol(Symbol::Sync), 0);
        for bit in "011".chars() {
            let symbol = if bit == '1' { Symbol::Bit1 } else { Symbol::Bit0 };
            assembler.handle(Detection::Symbol(symbol), 100);
        }

        // Quiet stretch began too recently
        assert!(assembler.check_timeout(1_000, Some(900)).is_empty());
        // Last symbol too recent
        assert!(assembler.check_timeout(400, Some(0)).is_empty());

        let events = assembler.check_timeout(1_000, Some(200));
        assert_eq!(
            events,
            vec![FrameEvent::SessionEnded(SessionSummary {
                start_time: 0,
                end_time: 1_000,
                text: String::new(),
                partial_bits: Some("011".to_string()),
            })]
        );
        assert_eq!(assembler.state(), AssemblerState::Idle);
        assert!(assembler.buffer().is_empty());
    }

    #[test]
    fn test_stuck_carrier_does_not_hold_session_open() {
        let config = ModemConfig::default();
        let mut assembler = FrameAssembler::new(&config);
        assembler.handle(Detection::Resync, 0);
        assembler.handle(Detection::Symbol(Symbol::Bit1), 300);

        // Quiet at 420, then a carrier that never forms another symbol
        assert!(assembler.check_timeout(600, Some(420)).is_empty());
        let events = assembler.check_timeout(800, Some(420));
        assert!(matches!(
            events.last(),
            Some(FrameEvent::SessionEnded(SessionSummary { partial_bits: Some(bits), .. })) if bits == "1"
        ));
        assert!(!assembler.is_receiving());
    }

    #[test]
    fn test_timeout_without_any_silence_uses_session_start() {
        let mut assembler = FrameAssembler::new(&ModemConfig::default());
        assembler.handle(Detection::Resync, 100);
        assert!(assembler.check_timeout(400, None).is_empty());
        assert_eq!(assembler.check_timeout(600, None).len(), 1);
    }

    #[test]
    fn test_session_summary_collects_text() {
        let mut assembler = assembler(DecodePolicy::PrintableScan);
        assembler.handle(Detection::Resync, 0);
        push_bits(&mut assembler, "0100100001101001");
        let events = assembler.end_session(500);
        let summary = events
            .iter()
            .find_map(|e| match e {
                FrameEvent::SessionEnded(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(summary.text, "Hi");
        assert_eq!(summary.partial_bits, None);
        assert_eq!(events.len(), 3);
    }
}
