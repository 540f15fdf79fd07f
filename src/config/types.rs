use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::variant::VariantKind;

use super::defaults::{
    clamp_batch_size, clamp_validation_split, default_batch_size, default_log_level,
    default_max_log_files, default_true, default_validation_split,
};

/// Errors that may occur while loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No usable config directory found.
    #[error("No suitable config directory found")]
    NoConfigDir,
    /// Failed to create the config directory.
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        /// Directory path that failed to create.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to read the settings file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to write the settings file.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse TOML.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Failed to serialize settings to TOML.
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
}

/// Settings persisted in `coachnet.toml`.
///
/// Config keys (TOML): `variant`, `storage`, `training`, `logging`, `export`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Variant used when the command line does not name one.
    #[serde(default)]
    pub variant: VariantKind,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub export: ExportSettings,
}

impl AppSettings {
    pub fn normalized(mut self) -> Self {
        self.training = self.training.normalized();
        self.logging.max_files = self.logging.max_files.max(1);
        self
    }
}

/// Location of the blob database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Defaults to `coachnet.db` inside the application directory.
    #[serde(default)]
    pub database: Option<PathBuf>,
}

/// Training schedule overrides.
///
/// Config keys: `seed`, `validation_split`, `batch_size`, `dense_epochs`,
/// `conv_epochs`, `freeze_first_conv_on_load`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_validation_split")]
    pub validation_split: f32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub dense_epochs: Option<usize>,
    #[serde(default)]
    pub conv_epochs: Option<usize>,
    #[serde(default = "default_true")]
    pub freeze_first_conv_on_load: bool,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            seed: None,
            validation_split: default_validation_split(),
            batch_size: default_batch_size(),
            dense_epochs: None,
            conv_epochs: None,
            freeze_first_conv_on_load: true,
        }
    }
}

impl TrainingSettings {
    fn normalized(mut self) -> Self {
        self.validation_split = clamp_validation_split(self.validation_split);
        self.batch_size = clamp_batch_size(self.batch_size);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Level directive for the `coachnet` target; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub file_logs: bool,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_logs: true,
            directory: None,
            max_files: default_max_log_files(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Defaults to `exports` inside the application directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}
