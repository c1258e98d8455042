//! Best-effort cache reclamation.
//!
//! Cleanup releases what the process is already done with: free allocator
//! pages go back to the OS where the platform supports it, and the
//! accelerator drops its cached blocks. It does not guarantee that resident
//! size shrinks, since native allocators may keep freed buffers pooled. It
//! only stops growth from compounding within a request.

use std::sync::Arc;

use tracing::{info, warn};

use crate::format::format_mb;
use crate::system::accelerator::{Accelerator, NoAccelerator};
use crate::system::platform;
use crate::system::reader::ResourceProbe;

/// Fire-and-forget reclamation, tagged with a note for log correlation.
pub trait Cleanup: Send + Sync {
    fn cleanup(&self, note: &str);
}

pub struct CacheCleaner {
    accelerator: Arc<dyn Accelerator>,
    probe: Option<Arc<dyn ResourceProbe>>,
}

impl Default for CacheCleaner {
    fn default() -> Self {
        Self::new(Arc::new(NoAccelerator))
    }
}

impl CacheCleaner {
    pub fn new(accelerator: Arc<dyn Accelerator>) -> Self {
        CacheCleaner {
            accelerator,
            probe: None,
        }
    }

    /// Report RSS after each cleanup using `probe`.
    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

impl Cleanup for CacheCleaner {
    fn cleanup(&self, note: &str) {
        let trimmed = platform::release_free_memory();

        if let Err(err) = self.accelerator.empty_cache() {
            warn!(note, accelerator = self.accelerator.name(), %err, "memory_guard: cleanup error");
        }

        let rss = self
            .probe
            .as_ref()
            .and_then(|p| p.snapshot().ok())
            .map(|s| format_mb(s.process_rss_mb));
        info!(
            note,
            trimmed,
            rss = rss.as_deref().unwrap_or("n/a"),
            "memory_guard: cleanup done"
        );
    }
}
