use thiserror::Error;

use crate::proto::{ErrorCode, RpcError};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unsupported protocol version: client={client} daemon={daemon}")]
    UnsupportedProtocol { client: u32, daemon: u32 },

    #[error("a backup pass is already running")]
    BackupInProgress,

    #[error("backups are disabled: {0}")]
    BackupsDisabled(String),
}

/// Map daemon errors -> stable wire errors.
impl From<ControlError> for RpcError {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::BadRequest(_) => RpcError {
                code: ErrorCode::BadRequest,
                message: e.to_string(),
                details: Default::default(),
            },
            ControlError::UnsupportedProtocol { client, daemon } => RpcError {
                code: ErrorCode::UnsupportedProtocol,
                message: e.to_string(),
                details: [
                    ("client_protocol".into(), client.to_string()),
                    ("daemon_protocol".into(), daemon.to_string()),
                ]
                .into_iter()
                .collect(),
            },
            ControlError::BackupInProgress => RpcError {
                code: ErrorCode::BackupInProgress,
                message: e.to_string(),
                details: Default::default(),
            },
            ControlError::BackupsDisabled(ref reason) => RpcError {
                code: ErrorCode::BackupsDisabled,
                details: [("reason".into(), reason.clone())].into_iter().collect(),
                message: e.to_string(),
            },
        }
    }
}
