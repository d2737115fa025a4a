use anyhow::Result;
use clap::Parser;

use resource_manager::app::ApplicationBuilder;
use resource_manager::config::Cli;
use resource_manager::config::Commands;
use resource_manager::config::DaemonArgs;
use resource_manager::logging;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(daemon_args.log_file.as_deref())?;

    tracing::info!("Starting OMX resource manager {}", env!("CARGO_PKG_VERSION"));

    let app = ApplicationBuilder::new(daemon_args).build().await?;
    app.run().await
}
