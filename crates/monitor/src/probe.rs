//! Host readings behind a trait so the sampler's bookkeeping can run against
//! a fake host in tests.

use std::path::Path;

use {
    sysinfo::{
        Disks, Networks, Pid, ProcessRefreshKind, ProcessesToUpdate, System, Users,
    },
    tracing::debug,
};

use crate::snapshot::UsageSection;

/// Raw reading of one process at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessReading {
    pub pid: u32,
    pub name: String,
    pub user: String,
    /// Cumulative CPU time in milliseconds.
    pub cpu_time_ms: u64,
    /// Unix seconds; `None` when the OS didn't report it.
    pub start_time_secs: Option<u64>,
    pub memory_percent: f32,
}

/// Total / used / free of a filesystem, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

impl DiskUsage {
    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f64 / self.total as f64 * 100.0
    }
}

impl From<DiskUsage> for UsageSection {
    fn from(d: DiskUsage) -> Self {
        Self {
            total: d.total,
            used: d.used,
        }
    }
}

/// Source of host measurements. Every method is blocking and may fail
/// independently; failures surface as `None` and the caller zeroes the field.
pub trait HostProbe: Send + 'static {
    fn cpu_usage(&mut self) -> Option<f64>;
    fn memory(&mut self) -> Option<UsageSection>;
    fn disk(&mut self, path: &Path) -> Option<DiskUsage>;
    /// Cumulative (rx, tx) bytes summed over all interfaces.
    fn network_totals(&mut self) -> Option<(u64, u64)>;
    fn uptime_secs(&mut self) -> u64;
    fn load_average(&mut self) -> (f64, f64, f64);
    /// Refreshes the process table and returns live pids in ascending order.
    fn pids(&mut self) -> Vec<u32>;
    fn read_process(&mut self, pid: u32) -> Option<ProcessReading>;
}

/// [`HostProbe`] over `sysinfo`.
pub struct SysinfoProbe {
    system: System,
    users: Users,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // Prime the CPU counters so the first usage reading has a baseline.
        system.refresh_cpu_usage();
        Self {
            system,
            users: Users::new_with_refreshed_list(),
        }
    }
}

impl HostProbe for SysinfoProbe {
    fn cpu_usage(&mut self) -> Option<f64> {
        self.system.refresh_cpu_usage();
        if self.system.cpus().is_empty() {
            return None;
        }
        Some(f64::from(self.system.global_cpu_usage()))
    }

    fn memory(&mut self) -> Option<UsageSection> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        Some(UsageSection {
            total,
            used: self.system.used_memory(),
        })
    }

    fn disk(&mut self, path: &Path) -> Option<DiskUsage> {
        disk_usage(path)
    }

    fn network_totals(&mut self) -> Option<(u64, u64)> {
        let networks = Networks::new_with_refreshed_list();
        if networks.list().is_empty() {
            return None;
        }
        Some(networks.list().values().fold((0, 0), |(rx, tx), data| {
            (
                rx + data.total_received(),
                tx + data.total_transmitted(),
            )
        }))
    }

    fn uptime_secs(&mut self) -> u64 {
        System::uptime()
    }

    fn load_average(&mut self) -> (f64, f64, f64) {
        let load = System::load_average();
        (load.one, load.five, load.fifteen)
    }

    fn pids(&mut self) -> Vec<u32> {
        self.system.refresh_memory();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );
        let mut pids: Vec<u32> = self.system.processes().keys().map(|p| p.as_u32()).collect();
        pids.sort_unstable();
        pids
    }

    fn read_process(&mut self, pid: u32) -> Option<ProcessReading> {
        let process = self.system.process(Pid::from_u32(pid))?;
        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (process.memory() as f64 / total as f64 * 100.0) as f32
        };
        let user = process
            .user_id()
            .and_then(|uid| self.users.get_user_by_id(uid))
            .map(|u| u.name().to_string())
            .unwrap_or_default();
        let start = process.start_time();
        Some(ProcessReading {
            pid,
            name: process.name().to_string_lossy().into_owned(),
            user,
            cpu_time_ms: process.accumulated_cpu_time(),
            start_time_secs: (start > 0).then_some(start),
            memory_percent,
        })
    }
}

/// Usage of the filesystem mounted closest above `path`.
pub fn disk_usage(path: &Path) -> Option<DiskUsage> {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())?;
    let total = disk.total_space();
    let free = disk.available_space();
    Some(DiskUsage {
        total,
        used: total.saturating_sub(free),
        free,
    })
}

/// Like [`disk_usage`], but falls back to `/` when `path` can't be resolved.
/// All zeros when neither is available.
pub fn disk_usage_with_fallback(path: &Path) -> DiskUsage {
    let resolved = std::fs::canonicalize(path).ok();
    resolved
        .as_deref()
        .and_then(disk_usage)
        .or_else(|| {
            debug!(path = %path.display(), "disk usage falling back to /");
            disk_usage(Path::new("/"))
        })
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum KillError {
    #[error("no such process: {0}")]
    NotFound(u32),
    #[error("failed to signal process {0}")]
    Signal(u32),
}

/// Kill a single process by pid.
pub fn kill_process(pid: u32) -> Result<(), KillError> {
    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    let process = system.process(target).ok_or(KillError::NotFound(pid))?;
    if process.kill() {
        Ok(())
    } else {
        Err(KillError::Signal(pid))
    }
}
