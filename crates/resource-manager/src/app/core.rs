use anyhow::Result;

use crate::app::services::ApplicationServices;
use crate::app::tasks::Tasks;
use crate::config::DaemonArgs;

/// Application core structure with explicit dependencies
pub struct Application {
    services: ApplicationServices,
    daemon_args: DaemonArgs,
}

impl Application {
    pub fn new(services: ApplicationServices, daemon_args: DaemonArgs) -> Self {
        Self {
            services,
            daemon_args,
        }
    }

    /// Run application, start all tasks and wait for completion
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(self.services);

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!(
            socket = %self.daemon_args.command_socket.display(),
            "Application run completed"
        );
        Ok(())
    }
}
