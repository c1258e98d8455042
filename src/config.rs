use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Lower bound for the monitor period; shorter values are clamped up.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub guard: GuardThresholds,
    pub pipeline: PipelineConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
    pub threads: ThreadsConfig,
}

/// Memory pressure thresholds. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardThresholds {
    pub enabled: bool,
    pub sys_avail_min_mb: u64,
    pub proc_rss_max_mb: u64,
}

impl Default for GuardThresholds {
    fn default() -> Self {
        GuardThresholds {
            enabled: true,
            sys_avail_min_mb: 800,
            proc_rss_max_mb: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub caption_batch_size: usize,
    pub paddle_max_batch_size: usize,
    pub paddle_rec_batch_num: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            caption_batch_size: 16,
            paddle_max_batch_size: 128,
            paddle_rec_batch_num: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub show_gpu: bool,
    pub show_net: bool,
    pub interval_secs: f64,
    pub log_file: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            enabled: true,
            show_gpu: true,
            show_net: true,
            interval_secs: 2.0,
            log_file: "resource_monitor.log".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_secs)
            .unwrap_or(Duration::from_secs(2))
            .max(MIN_MONITOR_INTERVAL)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub app_log_file: String,
    pub level: String,
    pub json: bool,
    pub max_file_bytes: u64,
    pub max_backups: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            dir: PathBuf::from("logs"),
            app_log_file: "app.log".to_string(),
            level: "info".to_string(),
            json: false,
            max_file_bytes: 10 * 1024 * 1024,
            max_backups: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreadsConfig {
    pub cap: usize,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        ThreadsConfig { cap: 1 }
    }
}

impl Config {
    /// Path of the monitor log inside the log directory.
    pub fn monitor_log_path(&self) -> PathBuf {
        self.logging.dir.join(&self.monitor.log_file)
    }

    /// Apply recognized environment options on top of the current values.
    ///
    /// `lookup` stands in for `std::env::var` so callers can feed a fixed map.
    /// Unparseable values keep the current setting and log a warning.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup: &lookup };

        env.bool("MEM_GUARD_ENABLED", &mut self.guard.enabled);
        env.number("MEM_GUARD_SYS_AVAIL_MIN_MB", &mut self.guard.sys_avail_min_mb, 0);
        env.number("MEM_GUARD_PROC_RSS_MAX_MB", &mut self.guard.proc_rss_max_mb, 1);
        env.number("ICON_CAPTION_BATCH_SIZE", &mut self.pipeline.caption_batch_size, 1);
        env.number("PADDLE_MAX_BATCH_SIZE", &mut self.pipeline.paddle_max_batch_size, 1);
        env.number("PADDLE_REC_BATCH_NUM", &mut self.pipeline.paddle_rec_batch_num, 1);
        env.bool("MONITOR_ENABLED", &mut self.monitor.enabled);
        env.bool("MONITOR_SHOW_GPU", &mut self.monitor.show_gpu);
        env.bool("MONITOR_SHOW_NET", &mut self.monitor.show_net);
        env.seconds("MONITOR_INTERVAL_SECS", &mut self.monitor.interval_secs);
        env.number("THREAD_CAP", &mut self.threads.cap, 1);
        if let Some(dir) = lookup("LOG_DIR").filter(|d| !d.trim().is_empty()) {
            self.logging.dir = PathBuf::from(dir.trim());
        }

        self
    }

    /// Replace out-of-range values (typically from a config file) with
    /// defaults, warning for each one.
    pub fn sanitized(mut self) -> Self {
        let defaults = Config::default();

        if self.guard.proc_rss_max_mb == 0 {
            warn_invalid("guard.proc_rss_max_mb", "0", "must be positive");
            self.guard.proc_rss_max_mb = defaults.guard.proc_rss_max_mb;
        }
        for (key, value, default) in [
            (
                "pipeline.caption_batch_size",
                &mut self.pipeline.caption_batch_size,
                defaults.pipeline.caption_batch_size,
            ),
            (
                "pipeline.paddle_max_batch_size",
                &mut self.pipeline.paddle_max_batch_size,
                defaults.pipeline.paddle_max_batch_size,
            ),
            (
                "pipeline.paddle_rec_batch_num",
                &mut self.pipeline.paddle_rec_batch_num,
                defaults.pipeline.paddle_rec_batch_num,
            ),
            ("threads.cap", &mut self.threads.cap, defaults.threads.cap),
        ] {
            if *value == 0 {
                warn_invalid(key, "0", "must be positive");
                *value = default;
            }
        }
        if !(self.monitor.interval_secs.is_finite() && self.monitor.interval_secs > 0.0) {
            warn_invalid(
                "monitor.interval_secs",
                &self.monitor.interval_secs.to_string(),
                "must be a positive number of seconds",
            );
            self.monitor.interval_secs = defaults.monitor.interval_secs;
        }
        if self.logging.max_file_bytes == 0 {
            warn_invalid("logging.max_file_bytes", "0", "must be positive");
            self.logging.max_file_bytes = defaults.logging.max_file_bytes;
        }

        self
    }
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn bool(&self, key: &'static str, slot: &mut bool) {
        let Some(raw) = self.raw(key) else {
            return;
        };
        match parse_bool(&raw) {
            Some(v) => *slot = v,
            None => warn_invalid(key, &raw, "expected true/false"),
        }
    }

    fn number<T>(&self, key: &'static str, slot: &mut T, min: T)
    where
        T: std::str::FromStr + PartialOrd + Copy,
    {
        let Some(raw) = self.raw(key) else {
            return;
        };
        match raw.parse::<T>() {
            Ok(v) if v >= min => *slot = v,
            Ok(_) => warn_invalid(key, &raw, "value below allowed minimum"),
            Err(_) => warn_invalid(key, &raw, "expected a non-negative integer"),
        }
    }

    fn seconds(&self, key: &'static str, slot: &mut f64) {
        let Some(raw) = self.raw(key) else {
            return;
        };
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v > 0.0 => *slot = v,
            _ => warn_invalid(key, &raw, "expected a positive number of seconds"),
        }
    }
}

fn warn_invalid(key: &'static str, value: &str, reason: &'static str) {
    let err = ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason,
    };
    warn!(%err, "ignoring configuration value, keeping default");
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("parseguard").join("config.toml"))
}

/// Defaults, then the user config file if present, then the process
/// environment.
pub fn load_config() -> Config {
    let base = match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    };
    base.with_env_overrides(|key| std::env::var(key).ok())
        .sanitized()
}

pub fn try_load_config_from_path(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_config_from_path(path: &Path) -> Config {
    match try_load_config_from_path(path) {
        Ok(config) => config,
        Err(err) => {
            warn!(%err, "using default configuration");
            Config::default()
        }
    }
}
