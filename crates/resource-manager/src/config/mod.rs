pub mod cli;
pub mod daemon;

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::FaultMonitorSettings;

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub max_components: usize,
}

impl From<&daemon::DaemonArgs> for RegistrySettings {
    fn from(args: &daemon::DaemonArgs) -> Self {
        Self {
            max_components: args.max_components.max(1),
        }
    }
}

/// DSP-facing settings: QoS figures, fault notifications and the OPP constraint.
#[derive(Debug, Clone)]
pub struct QosSettings {
    pub history_depth: usize,
    pub dsp_root: PathBuf,
    pub fault_file: PathBuf,
    pub opp_path: PathBuf,
}

impl From<&daemon::DaemonArgs> for QosSettings {
    fn from(args: &daemon::DaemonArgs) -> Self {
        Self {
            history_depth: args.qos_history_depth.max(1),
            dsp_root: args.dsp_root.clone(),
            fault_file: args.dsp_fault_file.clone(),
            opp_path: args.dsp_opp_path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub command_socket: PathBuf,
    pub response_prefix: PathBuf,
    /// `None` when the Policy Manager is disabled.
    pub policy_socket: Option<PathBuf>,
    pub max_in_flight_policy: usize,
    pub response_write_timeout: Duration,
    pub rebind_delay: Duration,
}

impl From<&daemon::DaemonArgs> for TransportSettings {
    fn from(args: &daemon::DaemonArgs) -> Self {
        Self {
            command_socket: args.command_socket.clone(),
            response_prefix: args.response_prefix.clone(),
            policy_socket: args.policy_enabled.then(|| args.policy_socket.clone()),
            max_in_flight_policy: args.max_in_flight_policy.max(1),
            response_write_timeout: Duration::from_millis(args.response_write_timeout_ms),
            rebind_delay: Duration::from_millis(args.rebind_delay_ms),
        }
    }
}

impl From<&daemon::DaemonArgs> for FaultMonitorSettings {
    fn from(args: &daemon::DaemonArgs) -> Self {
        Self {
            attach_attempts: args.attach_attempts.max(1),
            attach_backoff: Duration::from_millis(args.attach_backoff_ms),
            drain_attempts: args.drain_attempts,
            drain_interval: Duration::from_millis(args.drain_interval_ms),
        }
    }
}

pub use cli::*;
pub use daemon::*;
