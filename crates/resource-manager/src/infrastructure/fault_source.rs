//! DSP fault notifications read from a driver status file.
//!
//! The driver writes `mmufault` or `syserror` to the file when the DSP
//! fails. The file is watched with `notify`.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::domain::fault_monitor::{FaultKind, FaultSource};
use crate::domain::qos::DspError;

pub struct FileFaultSource {
    path: PathBuf,
    watch: Option<(RecommendedWatcher, mpsc::UnboundedReceiver<notify::Result<Event>>)>,
}

impl FileFaultSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            watch: None,
        }
    }

    fn current_fault(&self) -> Result<Option<FaultKind>, DspError> {
        let status = fs::read_to_string(&self.path)?;
        Ok(parse_fault(&status))
    }
}

fn parse_fault(status: &str) -> Option<FaultKind> {
    match status.trim() {
        "mmufault" => Some(FaultKind::MmuFault),
        "syserror" => Some(FaultKind::SysError),
        _ => None,
    }
}

fn watch_error(e: notify::Error) -> DspError {
    DspError::Unavailable(format!("fault watch failed: {e}"))
}

#[async_trait]
impl FaultSource for FileFaultSource {
    async fn attach(&mut self) -> Result<(), DspError> {
        if !self.path.exists() {
            return Err(DspError::Unavailable(format!(
                "{} does not exist",
                self.path.display()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })
        .map_err(watch_error)?;
        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;
        tracing::info!(path = %self.path.display(), "watching DSP fault notifications");
        self.watch = Some((watcher, rx));
        Ok(())
    }

    async fn wait_for_fault(&mut self) -> Result<FaultKind, DspError> {
        loop {
            let event = {
                let Some((_, events)) = self.watch.as_mut() else {
                    return Err(DspError::Unavailable("fault source not attached".into()));
                };
                events.recv().await
            };
            let event = match event {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(watch_error(e)),
                None => return Err(DspError::Unavailable("fault watcher stopped".into())),
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                continue;
            }
            if let Some(kind) = self.current_fault()? {
                return Ok(kind);
            }
        }
    }

    async fn close(&mut self) {
        self.watch = None;
    }
}
