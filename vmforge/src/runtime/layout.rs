//! On-disk layout under the vmforge home directory.
//!
//! ```text
//! <home>/
//! ├── db/vmforge.db
//! ├── logs/vmforge.log.YYYY-MM-DD
//! ├── state/deployment-stage.json
//! └── disks/<instance>/<instance>-<role>.vhdx
//! ```

use std::path::{Path, PathBuf};

pub mod dirs {
    pub const DB_DIR: &str = "db";
    pub const LOGS_DIR: &str = "logs";
    pub const STATE_DIR: &str = "state";
    pub const DISKS_DIR: &str = "disks";
}

pub mod filenames {
    pub const DB: &str = "vmforge.db";
    pub const STAGE_RECORD: &str = "deployment-stage.json";
}

#[derive(Debug, Clone)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn db_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::DB_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join(filenames::DB)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS_DIR)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::STATE_DIR)
    }

    pub fn stage_record_path(&self) -> PathBuf {
        self.state_dir().join(filenames::STAGE_RECORD)
    }

    pub fn disks_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::DISKS_DIR)
    }

    /// Create every directory the runtime writes into.
    pub fn prepare(&self) -> std::io::Result<()> {
        for dir in [
            self.db_dir(),
            self.logs_dir(),
            self.state_dir(),
            self.disks_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
