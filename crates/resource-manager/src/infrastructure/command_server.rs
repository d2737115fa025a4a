//! Inbound client command socket.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rm_proto::codec::decode_frame;
use rm_proto::ClientCommand;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::DispatchEvent;

pub struct CommandServer {
    path: PathBuf,
    events: mpsc::Sender<DispatchEvent>,
    rebind_delay: Duration,
}

impl CommandServer {
    pub fn new(path: impl Into<PathBuf>, events: mpsc::Sender<DispatchEvent>, rebind_delay: Duration) -> Self {
        Self {
            path: path.into(),
            events,
            rebind_delay,
        }
    }

    /// Binds the socket, replacing a stale one left by a previous run.
    pub fn bind(&self) -> io::Result<UnixListener> {
        remove_stale_socket(&self.path)?;
        let listener = UnixListener::bind(&self.path)?;
        tracing::info!(path = %self.path.display(), "listening for client commands");
        Ok(listener)
    }

    /// Accepts connections until cancelled; a failing listener is rebound.
    pub async fn run(self, listener: UnixListener, token: CancellationToken) {
        let mut listener = Some(listener);
        loop {
            let current = match listener.take() {
                Some(l) => l,
                None => match self.bind() {
                    Ok(l) => l,
                    Err(e) => {
                        tracing::warn!("failed to rebind command socket: {e}");
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(self.rebind_delay) => continue,
                        }
                    }
                },
            };

            let accepted = tokio::select! {
                _ = token.cancelled() => break,
                accepted = current.accept() => accepted,
            };

            match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(serve_connection(stream, self.events.clone(), token.clone()));
                    listener = Some(current);
                }
                Err(e) => {
                    tracing::warn!("command socket accept failed, reopening: {e}");
                    drop(current);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.rebind_delay) => {}
                    }
                }
            }
        }

        if let Err(e) = remove_stale_socket(&self.path) {
            tracing::warn!("failed to remove command socket: {e}");
        }
        tracing::info!("command server stopped");
    }
}

/// Forwards the commands of one client connection, in order.
async fn serve_connection(stream: UnixStream, events: mpsc::Sender<DispatchEvent>, token: CancellationToken) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("client connection read failed, dropping it: {e}");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let command: ClientCommand = match decode_frame(line.as_bytes()) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("ignoring malformed client command: {e}");
                continue;
            }
        };
        if events.send(DispatchEvent::Client(command)).await.is_err() {
            return;
        }
    }
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
