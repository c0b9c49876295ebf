use crate::error::CliError;
use serde::{Deserialize, Serialize};
use sonicwire_core::{ChirpConfig, ModemConfig};
use std::path::Path;

/// JSON override file for `--config`. Missing sections and fields keep their
/// defaults.
///
/// ```json
/// { "modem": { "threshold": 60.0 }, "chirp": { "detection_threshold": 0.2 } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub modem: ModemConfig,
    pub chirp: ChirpConfig,
}

impl Settings {
    pub fn from_json(text: &str, origin: &str) -> Result<Self, CliError> {
        let settings: Settings = serde_json::from_str(text).map_err(|source| CliError::Config {
            path: origin.to_string(),
            source,
        })?;
        settings.modem.validate()?;
        settings.chirp.validate()?;
        Ok(settings)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Self::from_json(&text, &path.display().to_string())
            }
            None => Ok(Self::default()),
        }
    }
}
