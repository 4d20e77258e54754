mod summary;


use std::process;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use backup_ipc::framing;
use backup_proto::proto::*;
use backup_proto::{ControlError, PROTOCOL_VERSION};

use crate::service::BackupHost;

pub use summary::pass_summary;

/// Accepts control connections until `shutdown` fires.
pub async fn serve(
    listener: UnixListener,
    host: Arc<BackupHost>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let started_at = Instant::now();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let host = Arc::clone(&host);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_conn(stream, host, started_at, shutdown).await {
                        debug!(error = %err, "control connection ended with error");
                    }
                });
            }
        }
    }
}

async fn handle_conn(
    stream: UnixStream,
    host: Arc<BackupHost>,
    started_at: Instant,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let mut framed = framing::framed(stream);

    loop {
        let (id, payload) = match framing::read_request(&mut framed).await {
            Ok(Some(req_env)) => (
                req_env.id,
                dispatch(req_env.payload, &host, started_at, &shutdown).await,
            ),
            Ok(None) => break,
            // Undecodable frame: the id is unknown, so answer with 0.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                warn!(error = %err, "rejecting malformed control request");
                (0, Response::Error(ControlError::BadRequest(err.to_string()).into()))
            }
            Err(err) => return Err(err),
        };
        framing::send_response(&mut framed, &Envelope { id, payload }).await?;
        if shutdown.is_cancelled() {
            break;
        }
    }
    Ok(())
}

async fn dispatch(
    request: Request,
    host: &BackupHost,
    started_at: Instant,
    shutdown: &CancellationToken,
) -> Response {
    match request {
        Request::Ping {
            client_version,
            protocol_version,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Response::Error(
                    ControlError::UnsupportedProtocol {
                        client: protocol_version,
                        daemon: PROTOCOL_VERSION,
                    }
                    .into(),
                );
            }
            debug!(%client_version, "ping");
            Response::Pong {
                daemon_version: env!("CARGO_PKG_VERSION").to_string(),
                protocol_version: PROTOCOL_VERSION,
            }
        }

        Request::Status {} => Response::Status {
            daemon: DaemonStatus {
                daemon_version: env!("CARGO_PKG_VERSION").to_string(),
                protocol_version: PROTOCOL_VERSION,
                pid: process::id() as i32,
                uptime_ms: started_at.elapsed().as_millis() as u64,
            },
            backups: host.status(),
        },

        Request::Backup {} => {
            info!("manual backup requested");
            match host.run_now().await {
                Ok(report) => Response::BackupFinished {
                    summary: pass_summary(&report),
                },
                Err(err) => {
                    warn!(error = %err, "manual backup rejected");
                    Response::Error(err.into())
                }
            }
        }

        Request::Shutdown {} => {
            info!("shutdown requested over control socket");
            shutdown.cancel();
            Response::ShutdownAck {}
        }
    }
}
