use sonicwire_core::ModemError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Modem(#[from] ModemError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file {path}: {source}")]
    Config {
        path: String,
        source: serde_json::Error,
    },

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid template {0:?}, expected NAME:DURATION:F0:F1")]
    TemplateSpec(String),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}
