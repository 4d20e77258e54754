use serde::{Deserialize, Serialize};

use super::{PassSummary, RequestId, RpcError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: RequestId,
    pub payload: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Request {
    Ping { client_version: String, protocol_version: u32 },

    Status {},

    /// Run one backup pass now and reply when it finishes.
    Backup {},

    Shutdown {},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Response {
    Pong { daemon_version: String, protocol_version: u32 },

    Status { daemon: DaemonStatus, backups: BackupStatus },

    BackupFinished { summary: PassSummary },

    ShutdownAck {},

    Error(RpcError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub daemon_version: String,
    pub protocol_version: u32,
    pub pid: i32,
    pub uptime_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupStatus {
    pub enabled: bool,
    pub running: bool,
    pub root_name: String,
    pub period_secs: u64,
    #[serde(default)]
    pub disabled_reason: Option<String>,
    #[serde(default)]
    pub last_pass: Option<PassSummary>,
}
