use std::path::PathBuf;

/// Failure to produce a resource snapshot at all.
///
/// Optional subsystems (GPU, network, cgroup, disk) never surface here; they
/// degrade to `None` on the snapshot instead.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("process {pid} is not visible to the system probe")]
    ProcessNotFound { pid: u32 },

    #[error("cannot determine current pid: {0}")]
    CurrentPid(&'static str),

    #[error("snapshot source failed: {0}")]
    Source(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// A single thread-cap knob could not be applied.
#[derive(Debug, thiserror::Error)]
pub enum KnobError {
    #[error("invalid environment variable name {0:?}")]
    InvalidName(String),

    #[error("backend rejected thread cap {cap}: {detail}")]
    Rejected { cap: usize, detail: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("accelerator cache release failed: {0}")]
    Accelerator(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("failed to open monitor log {path}: {source}")]
    OpenLog {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("monitor task did not exit within {0:?}")]
    StopTimeout(std::time::Duration),

    #[error("monitor task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Pipeline failure. Stage errors are carried through untouched as the source.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: crate::pipeline::Stage,
        #[source]
        source: BoxError,
    },

    #[error("region {index} ({x},{y} {width}x{height}) lies outside the {image_width}x{image_height} image")]
    RegionOutOfBounds {
        index: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error("captioner returned {got} captions for a batch of {expected}")]
    CaptionCountMismatch { expected: usize, got: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to prepare log file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}
