//! Runtime configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vmforge_shared::errors::{ForgeError, ForgeResult};

pub const HOME_ENV: &str = "VMFORGE_HOME";
pub const DEFAULT_HOME_DIR_NAME: &str = ".vmforge";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// `EnvFilter` directive used when neither `VMFORGE_LOG` nor `RUST_LOG` is set.
    pub level: String,
    pub log_to_file: bool,
    pub json: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: true,
            json: false,
        }
    }
}

/// Options for [`ForgeRuntime`](super::ForgeRuntime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeOptions {
    /// Root for the database, logs and deployment state. Must be absolute.
    pub home_dir: PathBuf,
    /// Stamped on every saved template.
    pub engine_version: String,
    /// Where virtual disks are created. Defaults to `<home_dir>/disks`.
    pub storage_root: Option<PathBuf>,
    pub logging: LoggingOptions,
}

impl Default for ForgeOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            storage_root: None,
            logging: LoggingOptions::default(),
        }
    }
}

/// `$VMFORGE_HOME`, else `~/.vmforge`.
pub fn default_home_dir() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV)
        && !home.trim().is_empty()
    {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_HOME_DIR_NAME)
}

impl ForgeOptions {
    pub fn with_home_dir(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Default::default()
        }
    }

    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> ForgeResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ForgeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let options: Self = serde_json::from_str(&contents).map_err(|e| {
            ForgeError::Config(format!("Invalid options file {}: {}", path.display(), e))
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> ForgeResult<()> {
        if !self.home_dir.is_absolute() {
            return Err(ForgeError::Config(format!(
                "home_dir must be absolute path, got: {}",
                self.home_dir.display()
            )));
        }
        if let Some(root) = &self.storage_root
            && !root.is_absolute()
        {
            return Err(ForgeError::Config(format!(
                "storage_root must be absolute path, got: {}",
                root.display()
            )));
        }
        if self.engine_version.trim().is_empty() {
            return Err(ForgeError::Config("engine_version must not be empty".into()));
        }
        Ok(())
    }
}
