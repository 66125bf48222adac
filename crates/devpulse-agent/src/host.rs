//! Host metrics via sysinfo

use crate::error::{AgentError, AgentResult};
use devpulse_core::SystemMetrics;
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

/// Reads thread count of the agent process and system RAM usage
pub struct HostCollector {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl HostCollector {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!("Cannot resolve own pid, thread count falls back to 1: {}", e);
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }

    /// Take a fresh reading
    pub fn collect(&self) -> AgentResult<SystemMetrics> {
        let mut system = self.system.lock();

        system.refresh_memory();
        let ram_usage_percent = ram_percent(system.used_memory(), system.total_memory())?;

        let thread_count = match self.pid {
            Some(pid) => {
                system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::new(),
                );
                system
                    .process(pid)
                    .and_then(|process| process.tasks())
                    .map(|tasks| tasks.len().max(1))
                    .unwrap_or(1)
            }
            None => 1,
        };

        let thread_count = u32::try_from(thread_count).unwrap_or(u32::MAX);
        Ok(SystemMetrics::new(thread_count, ram_usage_percent)?)
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn ram_percent(used: u64, total: u64) -> AgentResult<f64> {
    if total == 0 {
        return Err(AgentError::Host("total memory reported as 0".to_string()));
    }
    let percent = used as f64 / total as f64 * 100.0;
    Ok(percent.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_percent() {
        assert_eq!(ram_percent(512, 1024).unwrap(), 50.0);
        assert_eq!(ram_percent(0, 1024).unwrap(), 0.0);
        assert_eq!(ram_percent(2048, 1024).unwrap(), 100.0);
        assert!(matches!(ram_percent(1, 0), Err(AgentError::Host(_))));
    }

    #[test]
    fn test_collect_reads_host() {
        let collector = HostCollector::new();
        let metrics = collector.collect().unwrap();

        assert!(metrics.thread_count >= 1);
        assert!((0.0..=100.0).contains(&metrics.ram_usage_percent));
    }
}
