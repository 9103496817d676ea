//! JSON configuration file adapter.
//!
//! Implements [`ConfigPort`].  A missing file means "use defaults"; a file
//! that does not parse or fails range validation is an error rather than
//! being silently replaced.

use std::fs;
use std::path::PathBuf;

use log::{info, warn};

use crate::adapters::storage::write_atomically;
use crate::app::ports::{ConfigError, ConfigPort};
use crate::config::{validate, KioskConfig};

pub struct JsonConfigFile {
    path: PathBuf,
}

impl JsonConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigPort for JsonConfigFile {
    fn load(&self) -> Result<KioskConfig, ConfigError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", self.path.display());
                return Ok(KioskConfig::default());
            }
            Err(e) => {
                warn!("Cannot read {}: {}", self.path.display(), e);
                return Err(ConfigError::IoError);
            }
        };
        let cfg: KioskConfig = serde_json::from_str(&text).map_err(|e| {
            warn!("Config {} does not parse: {}", self.path.display(), e);
            ConfigError::Corrupted
        })?;
        validate(&cfg)?;
        info!("Loaded config from {}", self.path.display());
        Ok(cfg)
    }

    fn save(&self, config: &KioskConfig) -> Result<(), ConfigError> {
        validate(config)?;
        let json = serde_json::to_vec_pretty(config).map_err(|_| ConfigError::IoError)?;
        write_atomically(&self.path, &json).map_err(|e| {
            warn!("Config write to {} failed: {}", self.path.display(), e);
            ConfigError::IoError
        })?;
        info!("Config saved to {}", self.path.display());
        Ok(())
    }
}
