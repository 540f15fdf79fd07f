//! Where coachnet keeps its files.
//!
//! Everything lives below one `.coachnet` folder inside the OS config
//! directory. Setting `COACHNET_CONFIG_HOME` moves that folder, which is how
//! tests and portable installs keep their state apart.

use std::path::{Path, PathBuf};

use directories::BaseDirs;
use thiserror::Error;

/// Folder created under the config root.
pub const APP_DIR_NAME: &str = ".coachnet";
/// Environment variable that replaces the OS config root.
pub const CONFIG_HOME_ENV: &str = "COACHNET_CONFIG_HOME";

#[derive(Debug, Error)]
pub enum AppDirError {
    #[error("No suitable base config directory available for application files")]
    NoBaseDir,
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Directories below the application root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppDir {
    Root,
    Logs,
    Exports,
}

impl AppDir {
    fn relative(self) -> &'static str {
        match self {
            Self::Root => "",
            Self::Logs => "logs",
            Self::Exports => "exports",
        }
    }

    /// Path of this directory for a given config root, without touching disk.
    pub fn under(self, base: &Path) -> PathBuf {
        let root = base.join(APP_DIR_NAME);
        match self.relative() {
            "" => root,
            name => root.join(name),
        }
    }

    /// Resolve and create this directory.
    pub fn ensure(self) -> Result<PathBuf, AppDirError> {
        let base = config_base_dir().ok_or(AppDirError::NoBaseDir)?;
        let path = self.under(&base);
        std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    AppDir::Root.ensure()
}

pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    AppDir::Logs.ensure()
}

/// Default target of `export` when neither the command nor the config names one.
pub fn exports_dir() -> Result<PathBuf, AppDirError> {
    AppDir::Exports.ensure()
}

fn config_base_dir() -> Option<PathBuf> {
    base_from(
        std::env::var_os(CONFIG_HOME_ENV).map(PathBuf::from),
        BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf()),
    )
}

fn base_from(env_override: Option<PathBuf>, os_config: Option<PathBuf>) -> Option<PathBuf> {
    env_override
        .filter(|path| !path.as_os_str().is_empty())
        .or(os_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdirectories_sit_under_the_app_folder() {
        let base = Path::new("/tmp/home");
        let root = AppDir::Root.under(base);
        assert_eq!(root, base.join(".coachnet"));
        assert_eq!(AppDir::Logs.under(base), root.join("logs"));
        assert_eq!(AppDir::Exports.under(base), root.join("exports"));
    }

    #[test]
    fn env_override_wins_unless_empty() {
        let os = Some(PathBuf::from("/os/config"));
        assert_eq!(
            base_from(Some(PathBuf::from("/portable")), os.clone()),
            Some(PathBuf::from("/portable"))
        );
        assert_eq!(base_from(Some(PathBuf::new()), os.clone()), os);
        assert_eq!(base_from(None, None), None);
    }
}
