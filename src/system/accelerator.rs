use crate::error::CleanupError;

use super::snapshot::GpuMemory;

/// Handle onto the inference accelerator, supplied by the embedding service.
///
/// The guard never talks to device runtimes directly; whoever owns the
/// models implements this to report device memory and drop cached blocks.
pub trait Accelerator: Send + Sync {
    fn name(&self) -> &str;

    /// Current device memory and busy percent, or `None` if the device
    /// cannot be queried.
    fn memory(&self) -> Option<GpuMemory>;

    /// Release cached-but-unused allocator blocks on the device.
    fn empty_cache(&self) -> Result<(), CleanupError>;
}

/// CPU-only deployments.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAccelerator;

impl Accelerator for NoAccelerator {
    fn name(&self) -> &str {
        "none"
    }

    fn memory(&self) -> Option<GpuMemory> {
        None
    }

    fn empty_cache(&self) -> Result<(), CleanupError> {
        Ok(())
    }
}
