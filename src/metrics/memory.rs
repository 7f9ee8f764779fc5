//! Process memory sampling.

use parking_lot::Mutex;
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Source of resident-memory readings.
pub trait MemoryProbe: Send + Sync {
    /// Resident set size of the current process in MB, if available.
    fn resident_mb(&self) -> Option<f64>;
}

/// `sysinfo`-backed probe for the current process.
///
/// Keeps one `System` around so each sample only refreshes this process.
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: get_current_pid().ok(),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn resident_mb(&self) -> Option<f64> {
        let pid = self.pid?;
        let targets = [pid];
        let mut system = self.system.lock();
        if system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&targets),
            false,
            ProcessRefreshKind::nothing().with_memory(),
        ) == 0
        {
            return None;
        }
        system
            .process(pid)
            .map(|process| process.memory() as f64 / 1024.0 / 1024.0)
    }
}

/// Fixed reading, for tests and for hosts without process accounting.
#[derive(Debug, Clone, Copy)]
pub struct StaticMemoryProbe(pub f64);

impl MemoryProbe for StaticMemoryProbe {
    fn resident_mb(&self) -> Option<f64> {
        Some(self.0)
    }
}
