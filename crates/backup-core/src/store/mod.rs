mod drive;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

pub use drive::{select_root, DriveStore};

pub const ZIP_MIME_TYPE: &str = "application/zip";

/// Run folder names sort lexicographically in chronological order.
pub const RUN_FOLDER_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: String,
    pub name: String,
}

pub fn run_folder_name(timestamp: &DateTime<Local>) -> String {
    timestamp.format(RUN_FOLDER_FORMAT).to_string()
}

/// Remote destination for backup passes.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns the container named `name`, creating it only when none exists.
    async fn find_or_create_root(&self, name: &str) -> Result<ContainerRef, StoreError>;

    /// Always creates a new container under `parent`, named after `timestamp`.
    async fn create_dated_container(
        &self,
        parent: &ContainerRef,
        timestamp: DateTime<Local>,
    ) -> Result<ContainerRef, StoreError>;

    async fn upload_artifact(
        &self,
        parent: &ContainerRef,
        name: &str,
        local_file: &Path,
        mime_type: &str,
    ) -> Result<ObjectRef, StoreError>;
}
