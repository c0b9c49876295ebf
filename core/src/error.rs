use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message too long ({len} characters, max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("Character {0:?} is not 7-bit ASCII")]
    NonAsciiCharacter(char),

    #[error("Character {0:?} is not printable and would never be decoded")]
    UnprintableCharacter(char),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Audio source not found: {0}. Check the path or connect an input device.")]
    SourceNotFound(String),

    #[error("Access to audio source denied: {0}. Grant read/microphone permission and retry.")]
    SourcePermissionDenied(String),

    #[error("Audio source error: {0}")]
    Source(String),

    #[error("Tone emitter failure: {0}")]
    Emitter(String),

    #[error("Detector worker is not running")]
    WorkerStopped,

    #[error("Failed to spawn detector worker: {0}")]
    WorkerSpawn(String),
}

impl ModemError {
    /// Classify an I/O failure while opening an audio source.
    pub fn from_source_io(source: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ModemError::SourceNotFound(source.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                ModemError::SourcePermissionDenied(source.to_string())
            }
            _ => ModemError::Source(format!("{}: {}", source, err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModemError>;
