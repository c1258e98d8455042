use super::PlatformExtensions;

pub struct Platform;

impl PlatformExtensions for Platform {
    fn cgroup_memory_limit() -> Option<u64> {
        // No cgroups on macOS
        None
    }

    fn gpu_memory() -> Option<(u64, u64)> {
        // Unified memory; the accelerator handle is the only source
        None
    }

    fn gpu_busy_percent() -> Option<f32> {
        None
    }

    fn release_free_memory() -> bool {
        // libmalloc returns freed pages lazily on its own
        false
    }
}
