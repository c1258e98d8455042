use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use sysinfo::{Disks, Networks, Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System};

use super::accelerator::{Accelerator, NoAccelerator};
use super::platform;
use super::snapshot::{DiskUsage, GpuMemory, NetworkCounters, ResourceSnapshot};
use crate::error::SnapshotError;
use crate::format::bytes_to_mb;

/// Anything that can produce a [`ResourceSnapshot`] on demand.
pub trait ResourceProbe: Send + Sync {
    fn snapshot(&self) -> Result<ResourceSnapshot, SnapshotError>;
}

/// Which optional subsystems a reader queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeOptions {
    pub gpu: bool,
    pub network: bool,
    pub disk: bool,
}

impl ProbeOptions {
    /// What the request path needs: memory figures and GPU, nothing slow.
    pub fn request_path() -> Self {
        ProbeOptions {
            gpu: true,
            network: false,
            disk: false,
        }
    }
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions {
            gpu: true,
            network: true,
            disk: true,
        }
    }
}

/// sysinfo-backed reader for the current process.
///
/// Each read builds its own `System` and refreshes only memory and this
/// process, so concurrent readers never contend and a read stays in the
/// low-millisecond range.
#[derive(Clone)]
pub struct SnapshotReader {
    pid: Pid,
    options: ProbeOptions,
    accelerator: Arc<dyn Accelerator>,
}

impl SnapshotReader {
    pub fn new(options: ProbeOptions) -> Result<Self, SnapshotError> {
        let pid = sysinfo::get_current_pid().map_err(SnapshotError::CurrentPid)?;
        Ok(SnapshotReader {
            pid,
            options,
            accelerator: Arc::new(NoAccelerator),
        })
    }

    pub fn with_accelerator(mut self, accelerator: Arc<dyn Accelerator>) -> Self {
        self.accelerator = accelerator;
        self
    }

    pub fn options(&self) -> ProbeOptions {
        self.options
    }

    pub fn read(&self) -> Result<ResourceSnapshot, SnapshotError> {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let process = sys.process(self.pid).ok_or(SnapshotError::ProcessNotFound {
            pid: self.pid.as_u32(),
        })?;

        let mut snapshot = base_snapshot(&sys, process);
        if self.options.gpu {
            snapshot.gpu = read_gpu(self.accelerator.as_ref());
        }
        if self.options.network {
            snapshot.network = network_totals(&Networks::new_with_refreshed_list());
        }
        if self.options.disk {
            snapshot.disk = root_disk(&Disks::new_with_refreshed_list());
        }
        Ok(snapshot)
    }
}

impl ResourceProbe for SnapshotReader {
    fn snapshot(&self) -> Result<ResourceSnapshot, SnapshotError> {
        self.read()
    }
}

/// Memory, load and cgroup figures; optional subsystems left empty.
pub(super) fn base_snapshot(sys: &System, process: &Process) -> ResourceSnapshot {
    let load = System::load_average();
    ResourceSnapshot {
        taken_at: SystemTime::now(),
        system_total_mb: bytes_to_mb(sys.total_memory()),
        system_used_mb: bytes_to_mb(sys.used_memory()),
        system_available_mb: bytes_to_mb(sys.available_memory()),
        process_rss_mb: bytes_to_mb(process.memory()),
        process_vms_mb: bytes_to_mb(process.virtual_memory()),
        load_average: [load.one, load.five, load.fifteen],
        cpu_percent: None,
        process_cpu_percent: None,
        cgroup_limit_mb: platform::cgroup_memory_limit().map(bytes_to_mb),
        gpu: None,
        network: None,
        disk: None,
    }
}

/// Accelerator figures first, OS counters when the accelerator has none.
pub(super) fn read_gpu(accelerator: &dyn Accelerator) -> Option<GpuMemory> {
    accelerator.memory().or_else(|| {
        platform::gpu_memory().map(|(used, total)| GpuMemory {
            used_mb: bytes_to_mb(used),
            total_mb: bytes_to_mb(total),
            utilization_percent: platform::gpu_busy_percent(),
        })
    })
}

pub(super) fn network_totals(networks: &Networks) -> Option<NetworkCounters> {
    let interfaces = networks.list();
    if interfaces.is_empty() {
        return None;
    }
    let (sent, received) = interfaces
        .values()
        .fold((0u64, 0u64), |(sent, received), data| {
            (
                sent.saturating_add(data.total_transmitted()),
                received.saturating_add(data.total_received()),
            )
        });
    Some(NetworkCounters {
        sent_mb: bytes_to_mb(sent),
        received_mb: bytes_to_mb(received),
    })
}

pub(super) fn root_disk(disks: &Disks) -> Option<DiskUsage> {
    let root = Path::new("/");
    let disk = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == root)
        .or_else(|| disks.list().first())?;
    let total = disk.total_space();
    Some(DiskUsage {
        used_mb: bytes_to_mb(total.saturating_sub(disk.available_space())),
        total_mb: bytes_to_mb(total),
    })
}
