use tokio::net::UnixListener;

use crate::domain::{Dispatcher, DispatchEvent, FaultMonitor};
use crate::infrastructure::command_server::CommandServer;
use crate::infrastructure::policy_link::{PolicyReader, PolicyWriter};

/// Components ready to be run, each by its own task.
pub struct ApplicationServices {
    pub dispatcher: Dispatcher,
    pub events: tokio::sync::mpsc::Receiver<DispatchEvent>,
    pub event_sender: tokio::sync::mpsc::Sender<DispatchEvent>,
    pub command_server: CommandServer,
    pub listener: UnixListener,
    pub fault_monitor: FaultMonitor,
    /// Present only when the Policy Manager is connected.
    pub policy: Option<(PolicyReader, PolicyWriter)>,
}
