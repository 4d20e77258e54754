mod commands;
pub mod render;

use anyhow::Context;
use backup_ipc::framing::{self, FramedStream};
use backup_proto::proto::{Envelope, Request, Response};
use backup_utils::runtime_paths;

pub use commands::{backup_now, ping, shutdown, status};

pub(crate) async fn connect_only() -> anyhow::Result<FramedStream> {
    let paths = runtime_paths();
    let stream = backup_ipc::socket::connect(&paths.socket_path)
        .await
        .with_context(|| {
            format!(
                "backupd is not running (no socket at {})",
                paths.socket_path.display()
            )
        })?;
    Ok(framing::framed(stream))
}

/// One request, one response, on a fresh connection.
pub(crate) async fn call(payload: Request) -> anyhow::Result<Response> {
    let mut framed = connect_only().await?;
    framing::send_request(&mut framed, &Envelope { id: 1, payload }).await?;
    let resp = framing::read_response(&mut framed).await?;
    Ok(resp.payload)
}
