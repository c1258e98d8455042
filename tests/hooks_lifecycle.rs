use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parseguard::cleanup::Cleanup;
use parseguard::config::Config;
use parseguard::error::SnapshotError;
use parseguard::guard::{OcrEngine, Pressure};
use parseguard::hooks::GuardLayer;
use parseguard::system::accelerator::NoAccelerator;
use parseguard::system::reader::ResourceProbe;
use parseguard::system::snapshot::ResourceSnapshot;
use parseguard::system::threads::ThreadCaps;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("parseguard_hooks_{name}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.logging.dir = dir.to_path_buf();
    config.monitor.interval_secs = 0.1;
    config
}

fn monitor_lines(config: &Config) -> usize {
    fs::read_to_string(config.monitor_log_path())
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[derive(Default)]
struct RecordingCleaner {
    notes: Mutex<Vec<String>>,
}

impl Cleanup for RecordingCleaner {
    fn cleanup(&self, note: &str) {
        self.notes.lock().unwrap().push(note.to_string());
    }
}

struct BrokenProbe;

impl ResourceProbe for BrokenProbe {
    fn snapshot(&self) -> Result<ResourceSnapshot, SnapshotError> {
        Err(SnapshotError::Source("procfs unavailable".to_string()))
    }
}

#[test]
fn boot_outside_a_runtime_leaves_the_monitor_stopped() {
    let dir = scratch_dir("no_runtime");
    let config = config_in(&dir);

    let layer = GuardLayer::on_boot(&config, ThreadCaps::empty(1), Arc::new(NoAccelerator)).unwrap();

    assert!(!layer.monitor_running());
    let scope = layer.on_request_start(OcrEngine::Paddle);
    assert_eq!(scope.decision().requested_engine, OcrEngine::Paddle);
    drop(scope);
    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn boot_starts_the_monitor_and_shutdown_stops_it() {
    let dir = scratch_dir("lifecycle");
    let config = config_in(&dir);

    let mut layer =
        GuardLayer::on_boot(&config, ThreadCaps::empty(1), Arc::new(NoAccelerator)).unwrap();
    assert!(layer.monitor_running());

    tokio::time::sleep(Duration::from_millis(250)).await;
    layer.on_shutdown().await.unwrap();
    assert!(!layer.monitor_running());

    let written = monitor_lines(&config);
    assert!(written >= 1);
    let first = fs::read_to_string(config.monitor_log_path()).unwrap();
    assert!(first.starts_with("ts="));
    assert!(first.contains("proc_rss="));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(monitor_lines(&config), written);

    layer.on_shutdown().await.unwrap();
    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn boot_with_monitor_disabled_spawns_nothing() {
    let dir = scratch_dir("disabled");
    let mut config = config_in(&dir);
    config.monitor.enabled = false;

    let mut layer =
        GuardLayer::on_boot(&config, ThreadCaps::empty(1), Arc::new(NoAccelerator)).unwrap();
    assert!(!layer.monitor_running());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!config.monitor_log_path().exists());
    layer.on_shutdown().await.unwrap();
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unreadable_snapshot_runs_the_request_unguarded() {
    let cleaner = Arc::new(RecordingCleaner::default());
    let layer = GuardLayer::new(&Config::default(), Arc::new(BrokenProbe), cleaner.clone());

    for requested in [OcrEngine::Paddle, OcrEngine::EasyOcr] {
        let scope = layer.on_request_start(requested);
        let decision = scope.decision();
        assert_eq!(decision.pressure, Pressure::Normal);
        assert_eq!(decision.ocr_engine, requested);
        assert_eq!(decision.caption_batch_size, 16);
        assert!(!decision.is_degraded());
        layer.on_request_end(scope);
    }

    assert_eq!(
        *cleaner.notes.lock().unwrap(),
        vec!["request end", "request end"]
    );
}
