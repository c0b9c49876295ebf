//! Acoustic text modem and chirp detector
//!
//! Text travels as three-carrier FSK (bit 0, bit 1 and a sync clock) that any
//! speaker and microphone pair can carry. A separate matched-filter detector
//! finds registered linear chirps in a live sample stream.

pub mod chirp;
pub mod config;
pub mod correlation;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod receiver;
pub mod rolling;
pub mod spectrum;
pub mod symbol;
pub mod tone;
pub mod worker;

pub use chirp::{synthesize_chirp, ChirpDetector, ChirpTemplate, DetectionEvent};
pub use config::{ChirpConfig, DecodePolicy, DetectionMode, ModemConfig};
pub use encoder::{CancelToken, Encoder, ToneInstruction, TonePlan, TransmitOutcome, TransmitStatus, Transmitter};
pub use error::{ModemError, Result};
pub use frame::{FrameAssembler, FrameEvent};
pub use receiver::{decode_samples, decoded_text, Receiver, ReceiverEvent};
pub use spectrum::{ChannelReading, GoertzelSampler, SpectralSampler, SpectrumFrame};
pub use symbol::{Detection, DetectorStats, Symbol, SymbolDetector};
pub use tone::{ToneEmitter, ToneRenderer};
pub use worker::{DetectorHandle, DetectorWorker, WorkerStats};

/// Sample rate used for rendered modem audio
pub const MODEM_SAMPLE_RATE: u32 = 44100;
