use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ROOT_NAME: &str = "Bukkit2Drive";
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(3 * 60 * 60);

/// A directory to back up and the artifact name it is uploaded as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDir {
    pub path: PathBuf,
    pub archive_name: String,
}

impl SourceDir {
    pub fn new(path: impl Into<PathBuf>, archive_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            archive_name: archive_name.into(),
        }
    }

    /// `world` -> (`world`, `world.zip`)
    pub fn named(name: &str) -> Self {
        Self::new(name, format!("{name}.zip"))
    }
}

pub fn default_sources() -> Vec<SourceDir> {
    ["world", "world_nether", "world_the_end"]
        .into_iter()
        .map(SourceDir::named)
        .collect()
}

#[derive(Debug, Clone)]
pub struct BackupPlan {
    pub root_name: String,
    /// Processed in order, one at a time.
    pub sources: Vec<SourceDir>,
    pub period: Duration,
    pub scratch_dir: PathBuf,
    /// 1 disables retries.
    pub upload_attempts: u32,
    pub shutdown_grace: Duration,
}

impl Default for BackupPlan {
    fn default() -> Self {
        Self {
            root_name: DEFAULT_ROOT_NAME.to_string(),
            sources: default_sources(),
            period: DEFAULT_PERIOD,
            scratch_dir: PathBuf::from("."),
            upload_attempts: 1,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}
