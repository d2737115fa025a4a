use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::services::ApplicationServices;

/// Task manager, responsible for starting and managing all background tasks
///
/// The daemon stops when a critical task (command server, dispatcher) ends.
/// Auxiliary tasks (fault monitor, policy link) may end on their own.
pub struct Tasks {
    critical: Vec<JoinHandle<()>>,
    auxiliary: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            critical: Vec::new(),
            auxiliary: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, services: ApplicationServices) {
        let ApplicationServices {
            dispatcher,
            events,
            event_sender,
            command_server,
            listener,
            fault_monitor,
            policy,
        } = services;

        let token = self.cancellation_token.clone();
        self.critical.push(tokio::spawn(async move {
            tracing::info!("Starting command server task");
            command_server.run(listener, token).await;
            tracing::info!("Command server task completed");
        }));

        let token = self.cancellation_token.clone();
        self.critical.push(tokio::spawn(async move {
            tracing::info!("Starting dispatcher task");
            dispatcher.run(events, token).await;
            tracing::info!("Dispatcher task completed");
        }));

        let token = self.cancellation_token.clone();
        self.auxiliary.push(tokio::spawn(async move {
            tracing::info!("Starting fault monitor task");
            match fault_monitor.run(token).await {
                Ok(()) => tracing::info!("Fault monitor task completed"),
                Err(e) => tracing::error!("Fault monitor stopped, faults will go unnoticed: {e}"),
            }
        }));

        if let Some((reader, writer)) = policy {
            let token = self.cancellation_token.clone();
            self.auxiliary.push(tokio::spawn(async move {
                tracing::info!("Starting policy reader task");
                reader.run(event_sender, token).await;
                tracing::info!("Policy reader task completed");
            }));

            let token = self.cancellation_token.clone();
            self.auxiliary.push(tokio::spawn(async move {
                tracing::info!("Starting policy writer task");
                writer.run(token).await;
                tracing::info!("Policy writer task completed");
            }));
        }
    }

    /// wait for a critical task to end or a shutdown signal, then stop everything
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    }
                    _ = sigint.recv() => {
                        tracing::info!("Received SIGINT, initiating graceful shutdown");
                    }
                }
            })
        };

        let mut outcome = Ok(());
        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
            }
            result = futures::future::select_all(&mut self.critical) => {
                let (result, index, _remaining) = result;
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    outcome = Err(e.into());
                } else {
                    tracing::info!(task = index, "Critical task finished, shutting down");
                }
            }
        }

        self.cancellation_token.cancel();
        self.wait_for_tasks_with_timeout(Duration::from_secs(10)).await;
        outcome
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in self.critical.iter_mut().chain(self.auxiliary.iter_mut()) {
                if task.is_finished() {
                    continue;
                }
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }
}
