use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::Stage;
use crate::format::{format_duration_ms, format_mb};
use crate::system::reader::ResourceProbe;

/// Logs a resource snapshot around each stage invocation.
///
/// The wrapped call's result is returned exactly as produced. Failed stages
/// still get their "after" line.
#[derive(Clone)]
pub struct StageInstrument {
    probe: Arc<dyn ResourceProbe>,
}

impl StageInstrument {
    pub fn new(probe: Arc<dyn ResourceProbe>) -> Self {
        StageInstrument { probe }
    }

    pub fn run<T, E, F>(&self, stage: Stage, label: &str, f: F) -> Result<T, E>
    where
        E: Display,
        F: FnOnce() -> Result<T, E>,
    {
        let _span = tracing::info_span!("stage", stage = stage.name(), label).entered();

        self.log_snapshot(stage, label, "before");
        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => info!(
                stage = stage.name(),
                label,
                elapsed = %format_duration_ms(elapsed),
                "stage finished"
            ),
            Err(err) => warn!(
                stage = stage.name(),
                label,
                elapsed = %format_duration_ms(elapsed),
                %err,
                "stage failed"
            ),
        }
        self.log_snapshot(stage, label, "after");

        result
    }

    fn log_snapshot(&self, stage: Stage, label: &str, phase: &'static str) {
        match self.probe.snapshot() {
            Ok(snap) => info!(
                stage = stage.name(),
                label,
                phase,
                rss = %format_mb(snap.process_rss_mb),
                avail = %format_mb(snap.system_available_mb),
                "stage resources"
            ),
            Err(err) => debug!(stage = stage.name(), label, phase, %err, "stage snapshot unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::SnapshotError;
    use crate::system::snapshot::ResourceSnapshot;

    #[derive(Default)]
    struct CountingProbe {
        reads: AtomicUsize,
    }

    impl ResourceProbe for CountingProbe {
        fn snapshot(&self) -> Result<ResourceSnapshot, SnapshotError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(ResourceSnapshot::with_memory(4_000.0, 900.0))
        }
    }

    #[derive(Debug, PartialEq)]
    struct StageFailure(&'static str);

    impl Display for StageFailure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    #[test]
    fn success_passes_through_with_two_snapshots() {
        let probe = Arc::new(CountingProbe::default());
        let instrument = StageInstrument::new(probe.clone());
        let out: Result<u32, StageFailure> = instrument.run(Stage::Detection, "full", || Ok(7));
        assert_eq!(out, Ok(7));
        assert_eq!(probe.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failure_is_returned_unchanged_after_snapshot() {
        let probe = Arc::new(CountingProbe::default());
        let instrument = StageInstrument::new(probe.clone());
        let out: Result<u32, StageFailure> =
            instrument.run(Stage::TextRecognition, "full", || Err(StageFailure("model crashed")));
        assert_eq!(out, Err(StageFailure("model crashed")));
        assert_eq!(probe.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn probe_failure_does_not_affect_stage() {
        struct Broken;
        impl ResourceProbe for Broken {
            fn snapshot(&self) -> Result<ResourceSnapshot, SnapshotError> {
                Err(SnapshotError::Source("procfs unmounted".to_string()))
            }
        }
        let instrument = StageInstrument::new(Arc::new(Broken));
        let out: Result<&str, StageFailure> = instrument.run(Stage::Caption, "batch 1/1", || Ok("ok"));
        assert_eq!(out, Ok("ok"));
    }
}
