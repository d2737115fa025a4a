pub mod accounting;
pub mod category;
pub mod channel;
pub mod dispatcher;
pub mod fault_monitor;
pub mod platform;
pub mod policy;
pub mod qos;
pub mod registry;
pub mod state;

#[cfg(test)]
pub(crate) mod mock;

pub use dispatcher::{DispatchEvent, Dispatcher};
pub use fault_monitor::{FaultMonitor, FaultMonitorSettings};
pub use state::{RecoveryFlag, SharedState};
