//! Lifecycle hooks the serving layer calls.
//!
//! `on_boot` once at startup, `on_request_start`/`on_request_end` around
//! every request, `on_shutdown` once at exit.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::cleanup::{CacheCleaner, Cleanup};
use crate::config::Config;
use crate::error::{MonitorError, SnapshotError};
use crate::guard::{GuardDecision, MemoryGuard, OcrEngine, Pressure};
use crate::monitor::{ResourceMonitor, open_log};
use crate::pipeline::instrument::StageInstrument;
use crate::system::accelerator::Accelerator;
use crate::system::collector::Collector;
use crate::system::reader::{ProbeOptions, ResourceProbe, SnapshotReader};
use crate::system::snapshot::ResourceSnapshot;
use crate::system::threads::ThreadCaps;

pub struct GuardLayer {
    guard: MemoryGuard,
    probe: Arc<dyn ResourceProbe>,
    cleaner: Arc<dyn Cleanup>,
    instrument: StageInstrument,
    monitor: Option<ResourceMonitor>,
}

impl GuardLayer {
    /// Assemble the layer from parts without any boot side effects.
    pub fn new(config: &Config, probe: Arc<dyn ResourceProbe>, cleaner: Arc<dyn Cleanup>) -> Self {
        GuardLayer {
            guard: MemoryGuard::new(config.guard.clone(), config.pipeline.clone()),
            instrument: StageInstrument::new(Arc::clone(&probe)),
            probe,
            cleaner,
            monitor: None,
        }
    }

    /// Attach a monitor; it is started by [`GuardLayer::start_monitor`].
    pub fn with_monitor(mut self, monitor: ResourceMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Process startup: cap backend threads, build the probes, start the
    /// monitor. Call before any inference library is loaded. The monitor
    /// only runs when called from inside a tokio runtime.
    ///
    /// Nothing here is fatal except failing to identify the current process;
    /// a monitor log that cannot be opened falls back to the tracing output.
    pub fn on_boot(
        config: &Config,
        caps: ThreadCaps,
        accelerator: Arc<dyn Accelerator>,
    ) -> Result<Self, SnapshotError> {
        caps.apply();

        let request_reader = SnapshotReader::new(ProbeOptions::request_path())?
            .with_accelerator(Arc::clone(&accelerator));
        let monitor_collector = Collector::new(ProbeOptions {
            gpu: config.monitor.show_gpu,
            network: config.monitor.show_net,
            disk: true,
        })?
        .with_accelerator(Arc::clone(&accelerator));

        let probe: Arc<dyn ResourceProbe> = Arc::new(request_reader);
        let cleaner = Arc::new(CacheCleaner::new(accelerator).with_probe(Arc::clone(&probe)));

        let mut monitor = ResourceMonitor::new(&config.monitor, Arc::new(monitor_collector));
        if config.monitor.enabled {
            match open_log(&config.monitor_log_path()) {
                Ok(sink) => monitor = monitor.with_sink(sink),
                Err(err) => {
                    warn!(%err, "monitor log unavailable, logging ticks to the application log")
                }
            }
        }

        let mut layer = GuardLayer::new(config, probe, cleaner).with_monitor(monitor);
        layer.start_monitor();
        info!(
            guard_enabled = config.guard.enabled,
            sys_avail_min_mb = config.guard.sys_avail_min_mb,
            proc_rss_max_mb = config.guard.proc_rss_max_mb,
            caption_batch_size = config.pipeline.caption_batch_size,
            "guard layer booted"
        );
        Ok(layer)
    }

    pub fn start_monitor(&mut self) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.start();
        }
    }

    pub fn monitor_running(&self) -> bool {
        self.monitor.as_ref().is_some_and(ResourceMonitor::is_running)
    }

    /// Read a fresh snapshot and decide. Never reuses an earlier decision.
    ///
    /// If the snapshot cannot be read the request runs unguarded rather
    /// than failing.
    pub fn on_request_start(&self, requested: OcrEngine) -> RequestScope {
        let decision = match self.probe.snapshot() {
            Ok(snapshot) => self.decide(requested, &snapshot),
            Err(err) => {
                warn!(%err, "memory_guard: snapshot failed, running unguarded");
                self.guard
                    .decide(requested, &ResourceSnapshot::with_memory(f64::INFINITY, 0.0))
            }
        };
        RequestScope {
            decision,
            cleaner: Arc::clone(&self.cleaner),
            started: Instant::now(),
        }
    }

    fn decide(&self, requested: OcrEngine, snapshot: &ResourceSnapshot) -> GuardDecision {
        let decision = self.guard.decide(requested, snapshot);
        match &decision.pressure {
            Pressure::High { causes } => warn!(
                ?causes,
                avail_mb = snapshot.system_available_mb,
                rss_mb = snapshot.process_rss_mb,
                requested = %decision.requested_engine,
                ocr_engine = %decision.ocr_engine,
                caption_batch_size = decision.caption_batch_size,
                "memory_guard: high pressure, degrading request"
            ),
            Pressure::Normal => info!(
                avail_mb = snapshot.system_available_mb,
                rss_mb = snapshot.process_rss_mb,
                ocr_engine = %decision.ocr_engine,
                caption_batch_size = decision.caption_batch_size,
                "memory_guard: normal pressure"
            ),
        }
        decision
    }

    /// Close the request. Dropping the scope has the same effect.
    pub fn on_request_end(&self, scope: RequestScope) {
        drop(scope);
    }

    pub async fn on_shutdown(&mut self) -> Result<(), MonitorError> {
        match self.monitor.as_mut() {
            Some(monitor) => monitor.stop().await,
            None => Ok(()),
        }
    }

    pub fn probe(&self) -> &Arc<dyn ResourceProbe> {
        &self.probe
    }

    pub fn cleaner(&self) -> &dyn Cleanup {
        self.cleaner.as_ref()
    }

    pub fn instrument(&self) -> &StageInstrument {
        &self.instrument
    }
}

/// One request's working set. Runs the final cleanup exactly once, when
/// dropped, whichever way the request exits.
pub struct RequestScope {
    decision: GuardDecision,
    cleaner: Arc<dyn Cleanup>,
    started: Instant,
}

impl RequestScope {
    pub fn decision(&self) -> &GuardDecision {
        &self.decision
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.cleaner.cleanup("request end");
        info!(
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            degraded = self.decision.is_degraded(),
            "request finished"
        );
    }
}
