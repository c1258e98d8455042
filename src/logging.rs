//! Application log setup: console plus a size-rotated file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::LoggingError;

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let path = config.dir.join(&config.app_log_file);
    let file = RotatingFile::open(&path, config.max_file_bytes, config.max_backups)
        .map_err(|source| LoggingError::Io {
            path: path.clone(),
            source,
        })?;

    let filter = env_filter(&config.level)?;

    let console = tracing_subscriber::fmt::layer().with_target(true).boxed();
    let file_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(file)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file)
            .boxed()
    };
    let layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![console, file_layer];

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;
    Ok(())
}

/// Stderr-style subscriber without the file layer, for one-shot commands and
/// for the window before [`init_logging`] has a configuration to work from.
pub fn console_subscriber<W>(
    level: &str,
    writer: W,
) -> Result<impl Subscriber + Send + Sync + 'static, LoggingError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    Ok(tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_env_filter(env_filter(level)?)
        .finish())
}

fn env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)?,
        _ => EnvFilter::try_new(level)?,
    };
    Ok(filter)
}

/// Append-only log file that rolls over once it reaches `max_bytes`,
/// keeping `app.log.1` (newest) through `app.log.<max_backups>`.
pub struct RotatingFile {
    state: Mutex<RotatingState>,
}

struct RotatingState {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    max_backups: usize,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64, max_backups: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        let written = file.metadata()?.len();
        Ok(RotatingFile {
            state: Mutex::new(RotatingState {
                path: path.to_path_buf(),
                file,
                written,
                max_bytes: max_bytes.max(1),
                max_backups,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RotatingState> {
        // A panic mid-write leaves the file usable; keep logging.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

impl RotatingState {
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.max_backups == 0 {
            self.file = File::create(&self.path)?;
        } else {
            let oldest = backup_path(&self.path, self.max_backups);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for index in (1..self.max_backups).rev() {
                let from = backup_path(&self.path, index);
                if from.exists() {
                    fs::rename(&from, backup_path(&self.path, index + 1))?;
                }
            }
            fs::rename(&self.path, backup_path(&self.path, 1))?;
            self.file = open_append(&self.path)?;
        }
        self.written = 0;
        Ok(())
    }
}

pub struct RotatingWriter<'a> {
    state: MutexGuard<'a, RotatingState>,
}

impl Write for RotatingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let state = &mut *self.state;
        if state.written > 0 && state.written + buf.len() as u64 > state.max_bytes {
            state.rotate()?;
        }
        let n = state.file.write(buf)?;
        state.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = RotatingWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriter { state: self.lock() }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn console_subscriber_shows_config_warnings() {
        let buf = SharedBuf::default();
        let sink = buf.clone();
        let subscriber = console_subscriber("warn", move || sink.clone()).unwrap();

        let config = tracing::subscriber::with_default(subscriber, || {
            Config::default().with_env_overrides(|key| {
                (key == "MEM_GUARD_SYS_AVAIL_MIN_MB").then(|| "lots".to_string())
            })
        });

        assert_eq!(config.guard.sys_avail_min_mb, 800);
        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("WARN"));
        assert!(out.contains("MEM_GUARD_SYS_AVAIL_MIN_MB"));
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("parseguard_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn rotates_when_full_and_caps_backups() {
        let dir = scratch_dir("rotate");
        let path = dir.join("app.log");
        let file = RotatingFile::open(&path, 10, 2).unwrap();

        for line in ["aaaaaaaa\n", "bbbbbbbb\n", "cccccccc\n", "dddddddd\n"] {
            let mut w = file.make_writer();
            w.write_all(line.as_bytes()).unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "dddddddd\n");
        assert_eq!(fs::read_to_string(backup_path(&path, 1)).unwrap(), "cccccccc\n");
        assert_eq!(fs::read_to_string(backup_path(&path, 2)).unwrap(), "bbbbbbbb\n");
        assert!(!backup_path(&path, 3).exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = scratch_dir("append");
        let path = dir.join("app.log");
        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, "old\n").unwrap();

        let file = RotatingFile::open(&path, 1024, 1).unwrap();
        file.make_writer().write_all(b"new\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "old\nnew\n");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn backup_names() {
        assert_eq!(
            backup_path(Path::new("logs/app.log"), 3),
            PathBuf::from("logs/app.log.3")
        );
    }
}
