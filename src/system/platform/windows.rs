use super::PlatformExtensions;

pub struct Platform;

#[cfg(target_os = "windows")]
use windows_sys::Win32::System::Memory::{GetProcessHeap, HeapCompact};

impl PlatformExtensions for Platform {
    fn cgroup_memory_limit() -> Option<u64> {
        // Job object limits are not reported here
        None
    }

    fn gpu_memory() -> Option<(u64, u64)> {
        None
    }

    fn gpu_busy_percent() -> Option<f32> {
        None
    }

    #[cfg(target_os = "windows")]
    fn release_free_memory() -> bool {
        unsafe {
            let heap = GetProcessHeap();
            if heap.is_null() {
                return false;
            }
            HeapCompact(heap, 0) != 0
        }
    }

    #[cfg(not(target_os = "windows"))]
    fn release_free_memory() -> bool {
        false
    }
}
