use std::path::{Path, PathBuf};

use drive_client::DriveError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("path must be a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while {context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("zip error on {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

impl ArchiveError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// The filesystem path the failure is attributed to.
    pub fn path(&self) -> &Path {
        match self {
            ArchiveError::NotADirectory(path) => path,
            ArchiveError::Walk { path, .. }
            | ArchiveError::Read { path, .. }
            | ArchiveError::Io { path, .. }
            | ArchiveError::Zip { path, .. } => path,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Drive(#[from] DriveError),

    #[error("remote store error: {0}")]
    Remote(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Drive(err) => err.is_retryable(),
            StoreError::Remote(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("a backup pass is already running")]
    AlreadyRunning,

    #[error("backup scheduler is not running")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum PassError {
    #[error("failed to resolve {step} container: {source}")]
    ContainerResolution {
        step: &'static str,
        #[source]
        source: StoreError,
    },
}
