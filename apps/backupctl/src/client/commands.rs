use anyhow::{anyhow, bail};
use backup_proto::proto::{BackupStatus, DaemonStatus, PassSummary, Request, Response};
use backup_proto::PROTOCOL_VERSION;

use super::call;

pub async fn ping() -> anyhow::Result<String> {
    let resp = call(Request::Ping {
        client_version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: PROTOCOL_VERSION,
    })
    .await?;

    match resp {
        Response::Pong {
            daemon_version,
            protocol_version,
        } => Ok(format!(
            "pong: daemon={daemon_version} protocol={protocol_version}"
        )),
        Response::Error(err) => bail!("ping failed: {}", err.message),
        other => bail!("unexpected response: {other:?}"),
    }
}

pub async fn status() -> anyhow::Result<(DaemonStatus, BackupStatus)> {
    match call(Request::Status {}).await? {
        Response::Status { daemon, backups } => Ok((daemon, backups)),
        Response::Error(err) => bail!("status failed: {}", err.message),
        other => bail!("unexpected response: {other:?}"),
    }
}

/// Waits for the pass to finish; the daemon replies only then.
pub async fn backup_now() -> anyhow::Result<PassSummary> {
    match call(Request::Backup {}).await? {
        Response::BackupFinished { summary } => Ok(summary),
        Response::Error(err) => Err(anyhow!("backup not started: {}", err.message)),
        other => bail!("unexpected response: {other:?}"),
    }
}

pub async fn shutdown() -> anyhow::Result<String> {
    match call(Request::Shutdown {}).await? {
        Response::ShutdownAck {} => Ok("Daemon acknowledged shutdown request.".to_string()),
        other => bail!("unexpected response: {other:?}"),
    }
}
