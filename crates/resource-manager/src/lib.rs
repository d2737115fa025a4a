pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use domain::dispatcher;
pub use domain::fault_monitor;
pub use domain::policy;
pub use domain::qos;
pub use domain::registry;
pub use infrastructure::logging;
