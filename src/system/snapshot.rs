use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Point-in-time view of system and process resources, in megabytes.
///
/// Built fresh on every read and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    #[serde(serialize_with = "serialize_unix_secs")]
    pub taken_at: SystemTime,
    pub system_total_mb: f64,
    pub system_used_mb: f64,
    pub system_available_mb: f64,
    pub process_rss_mb: f64,
    pub process_vms_mb: f64,
    pub load_average: [f64; 3],
    /// Whole-system CPU busy percent. Needs an earlier sample to compare
    /// against, so only long-lived collectors report it.
    pub cpu_percent: Option<f32>,
    /// This process's CPU percent, summed over cores.
    pub process_cpu_percent: Option<f32>,
    pub cgroup_limit_mb: Option<f64>,
    pub gpu: Option<GpuMemory>,
    pub network: Option<NetworkCounters>,
    pub disk: Option<DiskUsage>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GpuMemory {
    pub used_mb: f64,
    pub total_mb: f64,
    pub utilization_percent: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct NetworkCounters {
    pub sent_mb: f64,
    pub received_mb: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DiskUsage {
    pub used_mb: f64,
    pub total_mb: f64,
}

impl ResourceSnapshot {
    /// Snapshot with only the memory figures set; everything optional absent.
    pub fn with_memory(system_available_mb: f64, process_rss_mb: f64) -> Self {
        ResourceSnapshot {
            taken_at: SystemTime::now(),
            system_total_mb: 0.0,
            system_used_mb: 0.0,
            system_available_mb,
            process_rss_mb,
            process_vms_mb: 0.0,
            load_average: [0.0; 3],
            cpu_percent: None,
            process_cpu_percent: None,
            cgroup_limit_mb: None,
            gpu: None,
            network: None,
            disk: None,
        }
    }

    pub fn memory_used_percent(&self) -> f64 {
        if self.system_total_mb <= 0.0 {
            return 0.0;
        }
        self.system_used_mb / self.system_total_mb * 100.0
    }

    /// Seconds since the unix epoch, with millisecond precision.
    pub fn unix_secs(&self) -> f64 {
        self.taken_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

impl DiskUsage {
    pub fn used_percent(&self) -> f64 {
        if self.total_mb <= 0.0 {
            return 0.0;
        }
        self.used_mb / self.total_mb * 100.0
    }
}

fn serialize_unix_secs<S: serde::Serializer>(
    value: &SystemTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let secs = value
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    serializer.serialize_f64(secs)
}
