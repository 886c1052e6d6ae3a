//! Process memory guard for batch runs

use std::sync::Mutex;

use sysinfo::{Pid, System};
use tracing::warn;

/// Watches the current process RSS against a configured ceiling.
///
/// A ceiling of zero disables the guard.
pub struct MemoryMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    ceiling_bytes: u64,
}

impl MemoryMonitor {
    pub fn new(ceiling_mb: u64) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                warn!(error = err, "Cannot resolve own pid, memory guard disabled");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
            ceiling_bytes: ceiling_mb * 1024 * 1024,
        }
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    /// Current resident set size in bytes; zero when unreadable
    pub fn rss_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock().expect("memory monitor lock poisoned");
        if !system.refresh_process(pid) {
            return 0;
        }
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }

    /// True when the guard is enabled and the process is over the ceiling
    pub fn exceeds_ceiling(&self) -> bool {
        if self.ceiling_bytes == 0 {
            return false;
        }
        self.rss_bytes() > self.ceiling_bytes
    }
}
