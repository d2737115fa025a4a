//! Seams towards the client side: the per-client response channel and the
//! gateway that establishes it.

use std::fmt;
use std::sync::Arc;

use rm_proto::ClientResponse;
use rm_proto::ProtoError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error("channel closed")]
    Closed,
}

/// Writable channel carrying asynchronous responses to one client.
///
/// Delivery is best-effort: a failed write is reported to the caller, who
/// logs it and drops the response.
pub trait ResponseChannel: Send + Sync + fmt::Debug {
    fn send(&self, response: &ClientResponse) -> Result<(), ChannelError>;

    fn close(&self);
}

/// Establishes response channels, named deterministically from the client pid.
pub trait Gateway: Send + Sync {
    fn open(&self, pid: u32) -> Result<Arc<dyn ResponseChannel>, ChannelError>;
}

impl<T: Gateway> Gateway for Arc<T> {
    fn open(&self, pid: u32) -> Result<Arc<dyn ResponseChannel>, ChannelError> {
        (**self).open(pid)
    }
}

/// Sends `response` on `channel` if there is one, logging failures.
pub(crate) fn deliver(channel: Option<&Arc<dyn ResponseChannel>>, response: ClientResponse) {
    let Some(channel) = channel else {
        tracing::warn!(
            handle = response.handle,
            pid = response.pid,
            verdict = ?response.verdict,
            "no response channel, dropping response"
        );
        return;
    };
    if let Err(e) = channel.send(&response) {
        tracing::warn!(
            handle = response.handle,
            pid = response.pid,
            verdict = ?response.verdict,
            "failed to write response: {e}"
        );
    }
}
