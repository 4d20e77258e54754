use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Request failed ({status}): {body}")]
    Status { status: StatusCode, body: String },

    #[error("Failed to parse JSON: {source}. Body: {body}")]
    Parse {
        source: serde_json::Error,
        body: String,
    },

    #[error("Authorization failed: {0}")]
    Auth(String),

    #[error("Failed to read credentials at {path}: {message}")]
    Credentials { path: PathBuf, message: String },

    #[error("Resumable upload failed: {0}")]
    Upload(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

impl DriveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether repeating the same call has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            DriveError::Request(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            DriveError::Status { status, .. } => retryable_status(*status),
            _ => false,
        }
    }
}

pub(crate) fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}
