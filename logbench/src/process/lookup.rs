use async_trait::async_trait;
use std::ffi::OsStr;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::sync::Mutex;
use tracing::debug;

/// Resolves and re-validates process ids of services we did not launch.
#[async_trait]
pub trait ProcessLookup: Send + Sync {
    /// Lowest pid whose executable name matches `name` exactly.
    async fn find_by_name(&self, name: &str) -> Option<u32>;

    /// Zombies count as gone.
    async fn is_alive(&self, pid: u32) -> bool;
}

pub struct SystemProcessLookup {
    system: Mutex<System>,
}

impl SystemProcessLookup {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemProcessLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLookup for SystemProcessLookup {
    async fn find_by_name(&self, name: &str) -> Option<u32> {
        let mut sys = self.system.lock().await;
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let pid = sys
            .processes_by_exact_name(OsStr::new(name))
            .filter(|p| p.status() != ProcessStatus::Zombie)
            .map(|p| p.pid().as_u32())
            .min();

        debug!("Process lookup for {}: {:?}", name, pid);
        pid
    }

    async fn is_alive(&self, pid: u32) -> bool {
        let mut sys = self.system.lock().await;
        let pid = Pid::from_u32(pid);
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        sys.process(pid)
            .map(|p| p.status() != ProcessStatus::Zombie)
            .unwrap_or(false)
    }
}
