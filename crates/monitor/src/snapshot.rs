use serde::Serialize;

/// Outbound frame: `{"type":"update","data":{...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct Update {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Snapshot,
}

impl From<Snapshot> for Update {
    fn from(data: Snapshot) -> Self {
        Self {
            kind: "update",
            data,
        }
    }
}

/// One tick's worth of host measurements.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub cpu: CpuSection,
    pub memory: UsageSection,
    pub disk: UsageSection,
    pub network: NetworkSection,
    pub system: SystemSection,
    pub processes: Vec<ProcessEntry>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuSection {
    pub usage: f64,
}

/// Byte totals for memory or a filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSection {
    pub total: u64,
    pub used: u64,
}

/// Throughput in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetworkSection {
    pub rx_sec: f64,
    pub tx_sec: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemSection {
    pub uptime: String,
    pub load: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub user: String,
    pub cpu: f64,
    pub mem: f32,
    pub command: String,
}

/// Go-style duration rendering of whole seconds (`45s`, `3m0s`, `72h3m0s`).
pub fn format_uptime(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

pub fn format_load(one: f64, five: f64, fifteen: f64) -> String {
    format!("{one:.2} {five:.2} {fifteen:.2}")
}
