pub mod command_server;
pub mod constraint;
pub mod dsp;
pub mod fault_source;
pub mod gateway;
pub mod logging;
pub mod policy_link;
