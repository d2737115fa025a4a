//! Unix socket connection to the Policy Manager.

use std::io;
use std::path::Path;

use rm_proto::codec::{decode_frame, encode_frame};
use rm_proto::{PolicyRequest, PolicyResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::policy::{PolicyLink, PolicyLinkError};
use crate::domain::DispatchEvent;

/// Queues frames for [`PolicyWriter`]; never blocks the dispatcher.
pub struct UnixPolicyLink {
    frames: mpsc::UnboundedSender<Vec<u8>>,
}

impl PolicyLink for UnixPolicyLink {
    fn send(&self, request: &PolicyRequest) -> Result<(), PolicyLinkError> {
        let frame = encode_frame(request)?;
        self.frames.send(frame).map_err(|_| PolicyLinkError::Closed)
    }
}

pub struct PolicyConnection {
    pub link: UnixPolicyLink,
    pub reader: PolicyReader,
    pub writer: PolicyWriter,
}

pub async fn connect(path: &Path) -> io::Result<PolicyConnection> {
    let stream = UnixStream::connect(path).await?;
    let (read, write) = stream.into_split();
    let (frames, queue) = mpsc::unbounded_channel();
    tracing::info!(path = %path.display(), "connected to policy manager");
    Ok(PolicyConnection {
        link: UnixPolicyLink { frames },
        reader: PolicyReader { read },
        writer: PolicyWriter { write, queue },
    })
}

pub struct PolicyWriter {
    write: OwnedWriteHalf,
    queue: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl PolicyWriter {
    pub async fn run(mut self, token: CancellationToken) {
        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => break,
                frame = self.queue.recv() => frame,
            };
            let Some(frame) = frame else {
                break;
            };
            if let Err(e) = self.write.write_all(&frame).await {
                tracing::error!("policy manager write failed: {e}");
                break;
            }
        }
        self.queue.close();
    }
}

pub struct PolicyReader {
    read: OwnedReadHalf,
}

impl PolicyReader {
    /// Forwards verdicts to the dispatcher until the connection ends.
    pub async fn run(self, events: mpsc::Sender<DispatchEvent>, token: CancellationToken) {
        let mut lines = BufReader::new(self.read).lines();
        loop {
            let line = tokio::select! {
                _ = token.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match decode_frame::<PolicyResponse>(line.as_bytes()) {
                    Ok(response) => {
                        if events.send(DispatchEvent::Policy(response)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("ignoring malformed policy frame: {e}"),
                },
                Ok(None) => {
                    tracing::warn!("policy manager closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::error!("policy manager read failed: {e}");
                    break;
                }
            }
        }
    }
}
