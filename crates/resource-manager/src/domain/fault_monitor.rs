//! Background watcher for DSP faults.
//!
//! The monitor loops `Attaching -> Armed -> FaultDetected -> Draining`. A fault
//! suspends admission, sends `FatalError` to every registered component and
//! waits a bounded time for the clients to free their resources.

use std::time::Duration;

use async_trait::async_trait;
use rm_proto::{ClientResponse, CommandKind, Verdict};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::channel::deliver;
use crate::domain::qos::DspError;
use crate::domain::registry::ArbitrationStatus;
use crate::domain::state::{RecoveryFlag, SharedState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    MmuFault,
    SysError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Attaching,
    Armed,
    FaultDetected(FaultKind),
    Draining,
}

#[derive(Error, Debug)]
pub enum FaultMonitorError {
    #[error("could not attach to the DSP after {attempts} attempts")]
    AttachExhausted {
        attempts: u32,
        #[source]
        last: DspError,
    },
}

/// Source of DSP fault notifications.
#[async_trait]
pub trait FaultSource: Send {
    async fn attach(&mut self) -> Result<(), DspError>;

    /// Blocks until an MMU fault or a system error is reported.
    async fn wait_for_fault(&mut self) -> Result<FaultKind, DspError>;

    async fn close(&mut self);
}

#[derive(Debug, Clone)]
pub struct FaultMonitorSettings {
    pub attach_attempts: u32,
    pub attach_backoff: Duration,
    pub drain_attempts: u32,
    pub drain_interval: Duration,
}

impl Default for FaultMonitorSettings {
    fn default() -> Self {
        Self {
            attach_attempts: 10,
            attach_backoff: Duration::from_secs(1),
            drain_attempts: 5,
            drain_interval: Duration::from_secs(1),
        }
    }
}

pub struct FaultMonitor {
    source: Box<dyn FaultSource>,
    state: SharedState,
    recovery: RecoveryFlag,
    settings: FaultMonitorSettings,
    phase: watch::Sender<MonitorPhase>,
}

impl FaultMonitor {
    pub fn new(
        source: Box<dyn FaultSource>,
        state: SharedState,
        recovery: RecoveryFlag,
        settings: FaultMonitorSettings,
    ) -> Self {
        let (phase, _) = watch::channel(MonitorPhase::Attaching);
        Self {
            source,
            state,
            recovery,
            settings,
            phase,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorPhase> {
        self.phase.subscribe()
    }

    pub async fn run(mut self, token: CancellationToken) -> Result<(), FaultMonitorError> {
        loop {
            self.set_phase(MonitorPhase::Attaching);
            if !self.attach(&token).await? {
                return Ok(());
            }
            self.recovery.clear();
            self.set_phase(MonitorPhase::Armed);
            tracing::info!("fault monitor armed");

            let fault = tokio::select! {
                _ = token.cancelled() => None,
                fault = self.source.wait_for_fault() => Some(fault),
            };
            let Some(fault) = fault else {
                self.source.close().await;
                tracing::info!("fault monitor shutdown requested");
                return Ok(());
            };

            match fault {
                Ok(kind) => {
                    self.recovery.begin();
                    self.set_phase(MonitorPhase::FaultDetected(kind));
                    tracing::error!(?kind, "DSP fault detected, starting recovery");
                    self.broadcast_fatal();
                    self.source.close().await;
                    self.set_phase(MonitorPhase::Draining);
                    if !self.drain(&token).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::warn!("fault notification wait failed, re-attaching: {e}");
                    self.source.close().await;
                }
            }
        }
    }

    /// Returns `Ok(false)` when cancelled while retrying.
    async fn attach(&mut self, token: &CancellationToken) -> Result<bool, FaultMonitorError> {
        let attempts = self.settings.attach_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.source.attach().await {
                Ok(()) => return Ok(true),
                Err(e) => e,
            };
            if attempt >= attempts {
                tracing::error!(attempts, "giving up attaching to the DSP: {err}");
                return Err(FaultMonitorError::AttachExhausted {
                    attempts,
                    last: err,
                });
            }
            tracing::warn!(attempt, "DSP attach failed, retrying: {err}");
            tokio::select! {
                _ = token.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.settings.attach_backoff) => {}
            }
        }
    }

    fn broadcast_fatal(&self) {
        let targets: Vec<_> = {
            let mut state = self.state.lock();
            state
                .registry
                .iter_mut()
                .map(|record| {
                    record.status = ArbitrationStatus::WaitingForClient;
                    (record.key, record.channel.clone())
                })
                .collect()
        };

        tracing::info!(components = targets.len(), "sending fatal error to all components");
        for (key, channel) in targets {
            let response = ClientResponse {
                kind: CommandKind::RequestResource,
                handle: key.handle,
                pid: key.pid,
                param1: 0,
                verdict: Verdict::FatalError,
            };
            deliver(channel.as_ref(), response);
        }
    }

    /// Waits for the registry to empty. Returns `false` when cancelled.
    async fn drain(&mut self, token: &CancellationToken) -> bool {
        for _ in 0..self.settings.drain_attempts {
            if self.state.lock().registry.is_empty() {
                return true;
            }
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(self.settings.drain_interval) => {}
            }
        }
        let remaining = self.state.lock().registry.len();
        if remaining > 0 {
            tracing::warn!(remaining, "components still registered after fault, re-arming anyway");
        }
        true
    }

    fn set_phase(&self, phase: MonitorPhase) {
        self.phase.send_replace(phase);
    }
}
