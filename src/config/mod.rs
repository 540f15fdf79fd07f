//! Settings loaded from `coachnet.toml` in the application directory.
//!
//! Every key is optional; a missing file yields defaults. Settings are
//! normalized after load and written back atomically.

mod defaults;
mod io;
mod types;

pub use io::{config_path, load_from, load_or_default, save, save_to_path};
pub use types::{
    AppSettings, ConfigError, ExportSettings, LoggingSettings, StorageSettings, TrainingSettings,
};

/// Filename of the TOML settings file.
pub const CONFIG_FILE_NAME: &str = "coachnet.toml";
