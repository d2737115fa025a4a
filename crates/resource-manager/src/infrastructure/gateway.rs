//! Per-client response channels over Unix domain sockets.
//!
//! Each client listens on `<prefix>_<pid>`; the daemon connects on demand.
//! Writes happen on a task per channel so a slow client never holds up the
//! dispatcher.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rm_proto::codec::encode_frame;
use rm_proto::{response_channel_path, ClientResponse};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::domain::channel::{ChannelError, Gateway, ResponseChannel};

pub struct UnixSocketGateway {
    prefix: PathBuf,
    write_timeout: Duration,
}

impl UnixSocketGateway {
    pub fn new(prefix: impl Into<PathBuf>, write_timeout: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            write_timeout,
        }
    }
}

impl Gateway for UnixSocketGateway {
    /// Must be called from within a tokio runtime.
    fn open(&self, pid: u32) -> Result<Arc<dyn ResponseChannel>, ChannelError> {
        let path = response_channel_path(&self.prefix, pid);
        let stream = std::os::unix::net::UnixStream::connect(&path)?;
        stream.set_nonblocking(true)?;

        let runtime = tokio::runtime::Handle::try_current().map_err(io::Error::other)?;
        let _entered = runtime.enter();
        let stream = UnixStream::from_std(stream)?;

        let (frames, queue) = mpsc::unbounded_channel();
        runtime.spawn(write_frames(stream, queue, self.write_timeout, path.clone()));
        tracing::debug!(pid, path = %path.display(), "response channel opened");
        Ok(Arc::new(UnixSocketChannel {
            path,
            frames: Mutex::new(Some(frames)),
        }))
    }
}

#[derive(Debug)]
pub struct UnixSocketChannel {
    path: PathBuf,
    frames: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl ResponseChannel for UnixSocketChannel {
    fn send(&self, response: &ClientResponse) -> Result<(), ChannelError> {
        let frame = encode_frame(response)?;
        let frames = self.frames.lock().expect("poisoned");
        let frames = frames.as_ref().ok_or(ChannelError::Closed)?;
        frames.send(frame).map_err(|_| ChannelError::Closed)
    }

    /// Queued responses are still written before the socket shuts down.
    fn close(&self) {
        if self.frames.lock().expect("poisoned").take().is_some() {
            tracing::debug!(path = %self.path.display(), "response channel closed");
        }
    }
}

async fn write_frames(
    mut stream: UnixStream,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    write_timeout: Duration,
    path: PathBuf,
) {
    while let Some(frame) = queue.recv().await {
        match tokio::time::timeout(write_timeout, stream.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), "failed to write response, dropping channel: {e}");
                break;
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), ?write_timeout, "client not reading responses, dropping channel");
                break;
            }
        }
    }
    if let Err(e) = stream.shutdown().await {
        tracing::debug!(path = %path.display(), "response channel shutdown failed: {e}");
    }
}
