//! Host metrics: CPU, memory, disk, network throughput and the busiest
//! processes, sampled on demand by a per-connection [`Sampler`]. Also the
//! host controls exposed next to them: process kill and tracked services.

pub mod probe;
pub mod sampler;
pub mod services;
pub mod snapshot;

pub use {
    probe::{
        DiskUsage, HostProbe, KillError, ProcessReading, SysinfoProbe, disk_usage,
        disk_usage_with_fallback, kill_process,
    },
    sampler::{NetworkRate, ProcessCache, Sampler, rank_processes},
    services::{
        ServiceAction, ServiceError, ServiceStatus, TRACKED_SERVICES, TrackedService,
        manage_service, service_statuses, tracked_service,
    },
    snapshot::{
        CpuSection, NetworkSection, ProcessEntry, Snapshot, SystemSection, Update, UsageSection,
        format_load, format_uptime,
    },
};
