mod error;
mod rpc;
mod types;

pub use error::{ErrorCode, RpcError};
pub use rpc::{BackupStatus, DaemonStatus, Envelope, Request, Response};
pub use types::{PassSummary, RequestId, SourceStatus, SourceSummary};
