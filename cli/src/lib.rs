//! Command line and HTTP front ends for the sonicwire modem

pub mod error;
pub mod server;
pub mod settings;
pub mod wav;

pub use error::CliError;

/// Samples per block when running the chirp detector over a whole file.
/// The noise estimate averages 100 blocks, about 2.3s at 44.1 kHz.
pub const FILE_BLOCK_SIZE: usize = 1024;
