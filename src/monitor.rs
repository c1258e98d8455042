//! Background resource monitor.
//!
//! One tokio task per process, owned by [`ResourceMonitor`]. The task
//! snapshots resources every period and appends one line to the monitor log.
//! It never influences request handling.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::format::{format_gb, format_mb};
use crate::system::reader::ResourceProbe;
use crate::system::snapshot::ResourceSnapshot;

pub type LogSink = Box<dyn Write + Send>;

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Which optional segments appear on a monitor line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineFields {
    pub gpu: bool,
    pub net: bool,
}

enum State {
    Stopped,
    Running {
        stop: oneshot::Sender<()>,
        task: JoinHandle<Option<LogSink>>,
    },
}

pub struct ResourceMonitor {
    enabled: bool,
    interval: Duration,
    fields: LineFields,
    stop_timeout: Duration,
    probe: Arc<dyn ResourceProbe>,
    /// `None` routes lines to the `resource_monitor` tracing target instead.
    sink: Option<LogSink>,
    state: State,
}

impl ResourceMonitor {
    pub fn new(config: &MonitorConfig, probe: Arc<dyn ResourceProbe>) -> Self {
        ResourceMonitor {
            enabled: config.enabled,
            interval: config.interval(),
            fields: LineFields {
                gpu: config.show_gpu,
                net: config.show_net,
            },
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            probe,
            sink: None,
            state: State::Stopped,
        }
    }

    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// stopped -> running. No-op when disabled or already running.
    ///
    /// The task runs on the ambient tokio runtime; without one the monitor
    /// stays stopped and a warning is logged.
    pub fn start(&mut self) {
        if !self.enabled {
            info!("resource monitor disabled");
            return;
        }
        if self.is_running() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime on this thread, resource monitor not started");
            return;
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = runtime.spawn(run(
            Arc::clone(&self.probe),
            self.sink.take(),
            self.interval,
            self.fields,
            stop_rx,
        ));
        self.state = State::Running {
            stop: stop_tx,
            task,
        };
        info!(interval_ms = self.interval.as_millis() as u64, "resource monitor started");
    }

    /// running -> stopped. Returns once the task has exited, so no line is
    /// written after this resolves. A task that does not exit within the
    /// stop timeout is aborted.
    pub async fn stop(&mut self) -> Result<(), MonitorError> {
        let State::Running { stop, task } = std::mem::replace(&mut self.state, State::Stopped) else {
            return Ok(());
        };
        let _ = stop.send(());

        let abort = task.abort_handle();
        match tokio::time::timeout(self.stop_timeout, task).await {
            Ok(Ok(sink)) => {
                self.sink = sink;
                info!("resource monitor stopped");
                Ok(())
            }
            Ok(Err(join)) => Err(MonitorError::Join(join)),
            Err(_) => {
                abort.abort();
                Err(MonitorError::StopTimeout(self.stop_timeout))
            }
        }
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if let State::Running { stop, .. } = std::mem::replace(&mut self.state, State::Stopped) {
            let _ = stop.send(());
        }
    }
}

async fn run(
    probe: Arc<dyn ResourceProbe>,
    mut sink: Option<LogSink>,
    period: Duration,
    fields: LineFields,
    mut stop: oneshot::Receiver<()>,
) -> Option<LogSink> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut write_failed = false;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let reader = Arc::clone(&probe);
                let snapshot = match tokio::task::spawn_blocking(move || reader.snapshot()).await {
                    Ok(Ok(snapshot)) => snapshot,
                    Ok(Err(err)) => {
                        error!(%err, "resource monitor error");
                        continue;
                    }
                    Err(err) => {
                        error!(%err, "resource monitor read aborted");
                        continue;
                    }
                };
                let line = format_line(&snapshot, fields);
                match sink.as_mut() {
                    Some(out) => {
                        if let Err(err) = write_line(out, &line) {
                            if !write_failed {
                                warn!(%err, "failed to write monitor log");
                            }
                            write_failed = true;
                        } else {
                            write_failed = false;
                        }
                    }
                    None => info!(target: "resource_monitor", "{line}"),
                }
            }
        }
    }

    sink
}

/// Open `path` for appending monitor lines, creating parent directories.
pub fn open_log(path: &Path) -> Result<LogSink, MonitorError> {
    let open_err = |source| MonitorError::OpenLog {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(open_err)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(open_err)?;
    Ok(Box::new(file))
}

/// One buffer, one write, so a line is never left half written.
fn write_line(out: &mut LogSink, line: &str) -> std::io::Result<()> {
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    out.write_all(buf.as_bytes())?;
    out.flush()
}

pub fn format_line(snapshot: &ResourceSnapshot, fields: LineFields) -> String {
    let load = format!(
        "load1={:.2} load5={:.2} load15={:.2}",
        snapshot.load_average[0], snapshot.load_average[1], snapshot.load_average[2]
    );
    let mut parts = vec![
        format!("ts={:.3}", snapshot.unix_secs()),
        match snapshot.cpu_percent {
            Some(cpu) => format!("cpu={cpu:.1}% {load}"),
            None => load,
        },
        format!(
            "mem_used={} mem_avail={} mem_pct={:.1}%",
            format_mb(snapshot.system_used_mb),
            format_mb(snapshot.system_available_mb),
            snapshot.memory_used_percent()
        ),
    ];
    if let Some(disk) = snapshot.disk {
        parts.push(format!(
            "disk_used={}/{} ({:.1}%)",
            format_gb(disk.used_mb),
            format_gb(disk.total_mb),
            disk.used_percent()
        ));
    }
    if fields.net
        && let Some(net) = snapshot.network
    {
        parts.push(format!(
            "net_sent={} net_recv={}",
            format_mb(net.sent_mb),
            format_mb(net.received_mb)
        ));
    }
    parts.push(format!(
        "proc_rss={} proc_vms={}",
        format_mb(snapshot.process_rss_mb),
        format_mb(snapshot.process_vms_mb)
    ));
    if let Some(cpu) = snapshot.process_cpu_percent {
        parts.push(format!("proc_cpu={cpu:.1}%"));
    }
    if let Some(limit) = snapshot.cgroup_limit_mb {
        parts.push(format!("cgroup_mem_limit={}", format_mb(limit)));
    }
    if fields.gpu
        && let Some(gpu) = snapshot.gpu
    {
        let mut segment = format!("gpu_mem={}/{}", format_mb(gpu.used_mb), format_mb(gpu.total_mb));
        if let Some(util) = gpu.utilization_percent {
            segment.push_str(&format!(" util={util:.0}%"));
        }
        parts.push(segment);
    }
    parts.join(" | ")
}
