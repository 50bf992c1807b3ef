use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use tracing::trace;

use crate::{
    probe::{HostProbe, ProcessReading, SysinfoProbe},
    snapshot::{
        CpuSection, NetworkSection, ProcessEntry, Snapshot, SystemSection, format_load,
        format_uptime,
    },
};

/// Turns cumulative byte counters into per-second rates.
#[derive(Debug, Default)]
pub struct NetworkRate {
    previous: Option<(u64, u64, Instant)>,
}

impl NetworkRate {
    /// The first call has no baseline and reports exactly zero. A counter
    /// that went backwards (interface reset) also reports zero.
    pub fn update(&mut self, rx: u64, tx: u64, now: Instant) -> NetworkSection {
        let rate = match self.previous {
            Some((prev_rx, prev_tx, at)) => {
                let secs = now.saturating_duration_since(at).as_secs_f64();
                if secs > 0.0 {
                    NetworkSection {
                        rx_sec: rx.saturating_sub(prev_rx) as f64 / secs,
                        tx_sec: tx.saturating_sub(prev_tx) as f64 / secs,
                    }
                } else {
                    NetworkSection::default()
                }
            },
            None => NetworkSection::default(),
        };
        self.previous = Some((rx, tx, now));
        rate
    }
}

#[derive(Debug, Clone, Copy)]
struct CpuMark {
    cpu_time_ms: u64,
    sampled_at: Instant,
}

/// Previous CPU reading per pid, so utilization is a delta between ticks.
#[derive(Debug, Default)]
pub struct ProcessCache {
    marks: HashMap<u32, CpuMark>,
}

impl ProcessCache {
    /// CPU percent for `reading` (100 = one core fully busy).
    ///
    /// A pid with no previous mark gets its lifetime average, or 0 when
    /// its start time is unknown.
    pub fn cpu_percent(&mut self, reading: &ProcessReading, now: Instant, wall_secs: u64) -> f64 {
        let mark = CpuMark {
            cpu_time_ms: reading.cpu_time_ms,
            sampled_at: now,
        };
        let percent = match self.marks.insert(reading.pid, mark) {
            Some(prev) => {
                let elapsed_ms = now.saturating_duration_since(prev.sampled_at).as_secs_f64() * 1000.0;
                if elapsed_ms > 0.0 {
                    reading.cpu_time_ms.saturating_sub(prev.cpu_time_ms) as f64 / elapsed_ms * 100.0
                } else {
                    0.0
                }
            },
            None => match reading.start_time_secs {
                Some(start) if wall_secs > start => {
                    reading.cpu_time_ms as f64 / ((wall_secs - start) as f64 * 1000.0) * 100.0
                },
                _ => 0.0,
            },
        };
        percent.max(0.0)
    }

    /// Drop marks for pids that are no longer live.
    pub fn retain_live(&mut self, live: &[u32]) {
        let live: HashSet<u32> = live.iter().copied().collect();
        self.marks.retain(|pid, _| live.contains(pid));
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.marks.contains_key(&pid)
    }
}

/// Highest CPU first; equal CPU keeps input order. At most `limit` entries.
pub fn rank_processes(mut entries: Vec<ProcessEntry>, limit: usize) -> Vec<ProcessEntry> {
    entries.sort_by(|a, b| b.cpu.total_cmp(&a.cpu));
    entries.truncate(limit);
    entries
}

/// Per-connection sampler state. Not shared between connections.
pub struct Sampler<P = SysinfoProbe> {
    probe: P,
    network: NetworkRate,
    processes: ProcessCache,
    top: usize,
    disk_path: PathBuf,
}

impl Sampler<SysinfoProbe> {
    pub fn new(top: usize) -> Self {
        Self::with_probe(SysinfoProbe::new(), top)
    }
}

impl<P: HostProbe> Sampler<P> {
    pub fn with_probe(probe: P, top: usize) -> Self {
        Self {
            probe,
            network: NetworkRate::default(),
            processes: ProcessCache::default(),
            top,
            disk_path: PathBuf::from("/"),
        }
    }

    pub fn process_cache(&self) -> &ProcessCache {
        &self.processes
    }

    /// Take one snapshot. Blocking.
    pub fn sample(&mut self) -> Snapshot {
        let now = Instant::now();
        let wall_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let cpu = CpuSection {
            usage: self.probe.cpu_usage().unwrap_or_default(),
        };
        let memory = self.probe.memory().unwrap_or_default();
        let disk = self
            .probe
            .disk(&self.disk_path)
            .map(Into::into)
            .unwrap_or_default();
        let network = match self.probe.network_totals() {
            Some((rx, tx)) => self.network.update(rx, tx, now),
            None => NetworkSection::default(),
        };
        let (one, five, fifteen) = self.probe.load_average();
        let system = SystemSection {
            uptime: format_uptime(self.probe.uptime_secs()),
            load: format_load(one, five, fifteen),
        };

        let pids = self.probe.pids();
        self.processes.retain_live(&pids);
        let mut entries = Vec::with_capacity(pids.len());
        for pid in &pids {
            let Some(reading) = self.probe.read_process(*pid) else {
                trace!(pid, "process vanished before sampling");
                continue;
            };
            let cpu = self.processes.cpu_percent(&reading, now, wall_secs);
            entries.push(ProcessEntry {
                pid: reading.pid,
                user: reading.user,
                cpu,
                mem: reading.memory_percent,
                command: reading.name,
            });
        }

        Snapshot {
            cpu,
            memory,
            disk,
            network,
            system,
            processes: rank_processes(entries, self.top),
        }
    }
}
