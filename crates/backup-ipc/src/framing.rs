use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use backup_proto::proto::{Envelope, Request, Response};

pub type FramedStream = Framed<tokio::net::UnixStream, LengthDelimitedCodec>;

pub fn framed(stream: tokio::net::UnixStream) -> FramedStream {
    Framed::new(stream, LengthDelimitedCodec::new())
}

pub async fn send_request(framed: &mut FramedStream, req: &Envelope<Request>) -> io::Result<()> {
    send_json(framed, req).await
}

pub async fn send_response(framed: &mut FramedStream, resp: &Envelope<Response>) -> io::Result<()> {
    send_json(framed, resp).await
}

/// `Ok(None)` when the peer closed the connection between requests.
pub async fn read_request(framed: &mut FramedStream) -> io::Result<Option<Envelope<Request>>> {
    match framed.next().await {
        Some(frame) => decode(&frame?).map(Some),
        None => Ok(None),
    }
}

pub async fn read_response(framed: &mut FramedStream) -> io::Result<Envelope<Response>> {
    let frame = framed
        .next()
        .await
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "socket closed"))??;

    decode(&frame)
}

async fn send_json<T: Serialize>(framed: &mut FramedStream, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    framed.send(Bytes::from(bytes)).await
}

fn decode<T: DeserializeOwned>(frame: &[u8]) -> io::Result<T> {
    serde_json::from_slice::<T>(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
