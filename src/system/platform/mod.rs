/// Platform hooks the snapshot reader and cleanup rely on. Every method is
/// best-effort: `None`/`false` means "not available here".
pub trait PlatformExtensions {
    /// Memory limit of the enclosing cgroup in bytes, if one is set.
    fn cgroup_memory_limit() -> Option<u64>;
    /// Accelerator memory `(used, total)` in bytes from OS-level counters.
    fn gpu_memory() -> Option<(u64, u64)>;
    /// Accelerator busy percent from OS-level counters, averaged over devices.
    fn gpu_busy_percent() -> Option<f32>;
    /// Ask the allocator to hand free pages back to the OS. Returns whether
    /// the platform performed a release.
    fn release_free_memory() -> bool;
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux as platform_impl;
#[cfg(target_os = "macos")]
use macos as platform_impl;
#[cfg(target_os = "windows")]
use windows as platform_impl;

pub fn cgroup_memory_limit() -> Option<u64> {
    platform_impl::Platform::cgroup_memory_limit()
}

pub fn gpu_memory() -> Option<(u64, u64)> {
    platform_impl::Platform::gpu_memory()
}

pub fn gpu_busy_percent() -> Option<f32> {
    platform_impl::Platform::gpu_busy_percent()
}

pub fn release_free_memory() -> bool {
    platform_impl::Platform::release_free_memory()
}
