use parking_lot::Mutex;
use sysinfo::{Pid, System};
use tracing::{info, warn};

/// Source of "how much memory is this process using right now".
pub trait MemoryProbe: Send + Sync {
    /// Current usage in bytes, or `None` when it cannot be sampled.
    fn used_bytes(&self) -> Option<u64>;
}

/// Samples the resident memory of the current process through `sysinfo`.
pub struct ResourceMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot determine current process id, memory sampling disabled: {}", e);
                None
            }
        };

        let mut system = System::new();
        if let Some(pid) = pid {
            system.refresh_process(pid);
            if let Some(process) = system.process(pid) {
                info!("Resource Monitor initialized:");
                info!("  Process memory: {} MB", process.memory() / 1_048_576);
            }
        }

        Self {
            system: Mutex::new(system),
            pid,
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ResourceMonitor {
    fn used_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}
