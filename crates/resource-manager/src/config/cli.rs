use clap::{Parser, Subcommand};

use crate::config::daemon::DaemonArgs;

#[derive(Parser)]
#[command(about, long_about, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the OMX resource manager daemon
    Daemon(Box<DaemonArgs>),
}
