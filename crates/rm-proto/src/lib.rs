//! Wire definitions shared by the OMX resource manager daemon, its client
//! proxies and the Policy Manager.
//!
//! Every record travels as one line of JSON (see [`codec`]). Client records are
//! fixed in shape: a command kind, the component identity and four generic
//! parameters whose meaning depends on the command.

pub mod codec;
pub mod component_type;

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use component_type::ComponentType;

/// Default path of the inbound client command socket.
pub const RM_SERVER_IN: &str = "/dev/rm_server_in";
/// Prefix of the per-client response sockets, suffixed with `_<pid>`.
pub const RM_SERVER_OUT: &str = "/dev/rm_server_out";
/// Default path of the Policy Manager socket.
pub const PM_SERVER: &str = "/dev/pm_server";

/// Opaque component identity supplied by the client. Unique only within its process.
pub type ComponentHandle = u64;

/// Commands a client component can send to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Init,
    RequestResource,
    WaitForResource,
    FreeResource,
    FreeAndCloseResource,
    CancelWaitForResource,
    StateSet,
    OpenPipe,
    ReusePipe,
    Exit,
    ExitTI,
}

/// A client command record.
///
/// | command            | param1          | param2          | param3       | param4        |
/// |--------------------|-----------------|-----------------|--------------|---------------|
/// | `RequestResource`  | component type  | requested MHz   | memory bytes |               |
/// | `StateSet`         | component type  | new OMX state   |              |               |
/// | `OpenPipe`         |                 | cpu budget      |              |               |
/// | `ReusePipe`        |                 | cpu budget      |              | sibling handle|
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCommand {
    pub kind: CommandKind,
    pub handle: ComponentHandle,
    pub pid: u32,
    #[serde(default)]
    pub param1: u32,
    #[serde(default)]
    pub param2: u32,
    #[serde(default)]
    pub param3: u32,
    #[serde(default)]
    pub param4: u64,
}

impl ClientCommand {
    pub fn new(kind: CommandKind, handle: ComponentHandle, pid: u32) -> Self {
        Self {
            kind,
            handle,
            pid,
            param1: 0,
            param2: 0,
            param3: 0,
            param4: 0,
        }
    }

    pub fn with_params(mut self, param1: u32, param2: u32, param3: u32) -> Self {
        self.param1 = param1;
        self.param2 = param2;
        self.param3 = param3;
        self
    }

    pub fn with_param4(mut self, param4: u64) -> Self {
        self.param4 = param4;
        self
    }
}

/// Outcome reported to a client on its response channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Informational echo, e.g. the acknowledgement of a wait.
    None,
    Grant,
    Deny,
    Preempt,
    ResourceAcquired,
    FatalError,
}

/// A record written to a client's response channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientResponse {
    pub kind: CommandKind,
    pub handle: ComponentHandle,
    pub pid: u32,
    pub param1: u32,
    pub verdict: Verdict,
}

impl ClientResponse {
    /// Answers `command` with `verdict`, echoing its identity and first parameter.
    pub fn answer(command: &ClientCommand, verdict: Verdict) -> Self {
        Self {
            kind: command.kind,
            handle: command.handle,
            pid: command.pid,
            param1: command.param1,
            verdict,
        }
    }
}

/// Requests sent from the daemon to the Policy Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyCommand {
    RequestPolicy,
    FreePolicy,
    FreeResources,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRequest {
    /// Correlation id echoed by the Policy Manager in its verdict. Zero for
    /// notices that expect no answer.
    pub request_id: u64,
    pub command: PolicyCommand,
    pub handle: ComponentHandle,
    pub pid: u32,
    pub component_type: u32,
}

/// Verdicts sent from the Policy Manager to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyVerdict {
    GrantPolicy,
    DenyPolicy,
    /// Unsolicited: an already-running component must yield its resources.
    Preempted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResponse {
    /// Correlation id of the answered request; absent for preemption notices.
    #[serde(default)]
    pub request_id: Option<u64>,
    pub verdict: PolicyVerdict,
    pub handle: ComponentHandle,
    pub pid: u32,
    #[serde(default)]
    pub component_type: u32,
}

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("empty frame")]
    EmptyFrame,
}

/// Path of the response channel for `pid`: `<prefix>_<pid>`.
///
/// A reconnecting client with the same pid finds the same path again.
pub fn response_channel_path(prefix: impl AsRef<Path>, pid: u32) -> PathBuf {
    let mut name = prefix.as_ref().as_os_str().to_owned();
    name.push(format!("_{pid}"));
    PathBuf::from(name)
}
