use std::path::{Path, PathBuf};

use super::PlatformExtensions;

const CGROUP_LIMIT_PATHS: [&str; 2] = [
    // cgroup v2
    "/sys/fs/cgroup/memory.max",
    // cgroup v1
    "/sys/fs/cgroup/memory/memory.limit_in_bytes",
];

const DRM_ROOT: &str = "/sys/class/drm";

/// cgroup v1 reports "no limit" as a page-aligned value near `i64::MAX`.
const UNLIMITED_FLOOR: u64 = 1 << 60;

pub struct Platform;

impl PlatformExtensions for Platform {
    fn cgroup_memory_limit() -> Option<u64> {
        CGROUP_LIMIT_PATHS.iter().find_map(|path| {
            let raw = std::fs::read_to_string(path).ok()?;
            parse_cgroup_limit(&raw)
        })
    }

    fn gpu_memory() -> Option<(u64, u64)> {
        // amdgpu exposes VRAM counters per card; NVIDIA has no sysfs
        // equivalent and is covered by the accelerator handle instead.
        let mut found = false;
        let mut used = 0u64;
        let mut total = 0u64;
        for device in card_devices() {
            if let (Some(u), Some(t)) = (
                read_u64(&device.join("mem_info_vram_used")),
                read_u64(&device.join("mem_info_vram_total")),
            ) {
                used += u;
                total += t;
                found = true;
            }
        }
        found.then_some((used, total))
    }

    fn gpu_busy_percent() -> Option<f32> {
        let busy: Vec<u64> = card_devices()
            .iter()
            .filter_map(|device| read_u64(&device.join("gpu_busy_percent")))
            .collect();
        average_percent(&busy)
    }

    #[cfg(target_env = "gnu")]
    fn release_free_memory() -> bool {
        // SAFETY: malloc_trim only walks glibc's own arenas and has no
        // preconditions beyond being called from a process using glibc malloc.
        unsafe { libc::malloc_trim(0) == 1 }
    }

    #[cfg(not(target_env = "gnu"))]
    fn release_free_memory() -> bool {
        false
    }
}

/// `device` directories of card0, card1, ... but not connector nodes like
/// card0-DP-1.
fn card_devices() -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(DRM_ROOT) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| is_card_name(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path().join("device"))
        .collect()
}

fn is_card_name(name: &str) -> bool {
    name.strip_prefix("card")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn average_percent(values: &[u64]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<u64>() as f32 / values.len() as f32)
}

fn read_u64(path: &Path) -> Option<u64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn parse_cgroup_limit(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("max") {
        return None;
    }
    let value: u64 = raw.parse().ok()?;
    (value < UNLIMITED_FLOOR).then_some(value)
}
