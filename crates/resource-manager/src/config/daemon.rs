use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "RM_COMMAND_SOCKET",
        value_hint = clap::ValueHint::FilePath,
        default_value = rm_proto::RM_SERVER_IN,
        help = "Socket on which client components send commands"
    )]
    pub command_socket: PathBuf,

    #[arg(
        long,
        env = "RM_RESPONSE_PREFIX",
        default_value = rm_proto::RM_SERVER_OUT,
        help = "Prefix of the per-client response sockets, completed with _<pid>"
    )]
    pub response_prefix: PathBuf,

    #[arg(
        long,
        env = "RM_POLICY_SOCKET",
        value_hint = clap::ValueHint::FilePath,
        default_value = rm_proto::PM_SERVER,
        help = "Policy Manager socket"
    )]
    pub policy_socket: PathBuf,

    #[arg(
        long,
        env = "RM_POLICY_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "Consult the Policy Manager; when false every request goes straight to the QoS check"
    )]
    pub policy_enabled: bool,

    #[arg(
        long,
        env = "RM_MAX_IN_FLIGHT_POLICY",
        default_value = "1",
        help = "Policy requests outstanding at once; 1 serializes all clients"
    )]
    pub max_in_flight_policy: usize,

    #[arg(
        long,
        env = "RM_MAX_COMPONENTS",
        default_value = "100",
        help = "Maximum number of simultaneously registered components"
    )]
    pub max_components: usize,

    #[arg(
        long,
        env = "RM_QOS_HISTORY_DEPTH",
        default_value = "5",
        help = "Number of DSP load samples kept for the average"
    )]
    pub qos_history_depth: usize,

    #[arg(
        long,
        env = "RM_DSP_ROOT",
        value_hint = clap::ValueHint::DirPath,
        default_value = "/sys/devices/platform/dspbridge",
        help = "Directory exporting the DSP load, heap and frequency figures"
    )]
    pub dsp_root: PathBuf,

    #[arg(
        long,
        env = "RM_DSP_FAULT_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/sys/devices/platform/dspbridge/fault",
        help = "File the DSP driver writes mmufault or syserror to"
    )]
    pub dsp_fault_file: PathBuf,

    #[arg(
        long,
        env = "RM_DSP_OPP_PATH",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/sys/power/dsp_opp",
        help = "Sysfs file receiving the DSP operating point constraint"
    )]
    pub dsp_opp_path: PathBuf,

    #[arg(long, env = "RM_ATTACH_ATTEMPTS", default_value = "10", help = "DSP attach attempts of the fault monitor")]
    pub attach_attempts: u32,

    #[arg(long, env = "RM_ATTACH_BACKOFF_MS", default_value = "1000", help = "Pause between DSP attach attempts")]
    pub attach_backoff_ms: u64,

    #[arg(long, env = "RM_DRAIN_ATTEMPTS", default_value = "5", help = "Checks for an empty registry after a fault")]
    pub drain_attempts: u32,

    #[arg(long, env = "RM_DRAIN_INTERVAL_MS", default_value = "1000", help = "Pause between drain checks")]
    pub drain_interval_ms: u64,

    #[arg(
        long,
        env = "RM_RESPONSE_WRITE_TIMEOUT_MS",
        default_value = "500",
        help = "Write timeout on client response sockets"
    )]
    pub response_write_timeout_ms: u64,

    #[arg(
        long,
        env = "RM_REBIND_DELAY_MS",
        default_value = "1000",
        help = "Pause before reopening a failed command socket"
    )]
    pub rebind_delay_ms: u64,

    #[arg(
        long,
        env = "RM_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to this daily rolling file, e.g. /var/log/omx-rmd.log"
    )]
    pub log_file: Option<PathBuf>,
}
