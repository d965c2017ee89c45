pub mod config;
pub mod log_buffer;
pub mod logging;
pub mod resource_monitor;

pub use log_buffer::{LogBuffer, LogEntry, LogKind};
pub use resource_monitor::{MemoryProbe, ResourceMonitor};
