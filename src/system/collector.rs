use std::sync::{Arc, Mutex, MutexGuard};

use sysinfo::{Disks, Networks, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use super::accelerator::{Accelerator, NoAccelerator};
use super::reader::{ProbeOptions, ResourceProbe, base_snapshot, network_totals, read_gpu, root_disk};
use super::snapshot::ResourceSnapshot;
use crate::error::SnapshotError;

/// Long-lived collector for the background monitor.
///
/// Keeps one `System` plus network and disk lists between refreshes, so CPU
/// percentages are measured over the interval since the previous refresh.
/// The request path keeps using [`super::reader::SnapshotReader`]; only the
/// monitor task refreshes a collector, so its lock is never contended.
pub struct Collector {
    pid: Pid,
    options: ProbeOptions,
    accelerator: Arc<dyn Accelerator>,
    state: Mutex<CollectorState>,
}

struct CollectorState {
    sys: System,
    networks: Networks,
    disks: Disks,
}

impl Collector {
    pub fn new(options: ProbeOptions) -> Result<Self, SnapshotError> {
        let pid = sysinfo::get_current_pid().map_err(SnapshotError::CurrentPid)?;

        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        let networks = if options.network {
            Networks::new_with_refreshed_list()
        } else {
            Networks::new()
        };
        let disks = if options.disk {
            Disks::new_with_refreshed_list()
        } else {
            Disks::new()
        };

        Ok(Collector {
            pid,
            options,
            accelerator: Arc::new(NoAccelerator),
            state: Mutex::new(CollectorState {
                sys,
                networks,
                disks,
            }),
        })
    }

    pub fn with_accelerator(mut self, accelerator: Arc<dyn Accelerator>) -> Self {
        self.accelerator = accelerator;
        self
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn refresh(&self) -> Result<ResourceSnapshot, SnapshotError> {
        let mut state = self.lock();
        let CollectorState {
            sys,
            networks,
            disks,
        } = &mut *state;

        sys.refresh_memory();
        sys.refresh_cpu_all();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        let process = sys.process(self.pid).ok_or(SnapshotError::ProcessNotFound {
            pid: self.pid.as_u32(),
        })?;

        let mut snapshot = base_snapshot(sys, process);
        snapshot.cpu_percent = Some(sys.global_cpu_usage());
        snapshot.process_cpu_percent = Some(process.cpu_usage());
        if self.options.gpu {
            snapshot.gpu = read_gpu(self.accelerator.as_ref());
        }
        if self.options.network {
            networks.refresh(true);
            snapshot.network = network_totals(networks);
        }
        if self.options.disk {
            disks.refresh(true);
            snapshot.disk = root_disk(disks);
        }
        Ok(snapshot)
    }
}

impl ResourceProbe for Collector {
    fn snapshot(&self) -> Result<ResourceSnapshot, SnapshotError> {
        self.refresh()
    }
}
