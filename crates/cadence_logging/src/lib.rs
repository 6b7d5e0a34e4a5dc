//! Shared logging setup for Cadence binaries.
//!
//! Logs go to stderr and to a size-rotated file under `$CADENCE_HOME/logs`.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str = "cadence=info,cadence_orchestrator=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by Cadence binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file filter on stderr instead of warnings only.
    pub verbose: bool,
    /// Override the log directory (defaults to [`logs_dir`]).
    pub log_dir: Option<PathBuf>,
}

/// Install the global subscriber: rotating file writer plus stderr.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let dir = match config.log_dir {
        Some(dir) => dir,
        None => logs_dir(),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    let file_writer = SharedRollingWriter::new(&dir, config.app_name)?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Cadence home directory: `$CADENCE_HOME`, else `~/.cadence`, else `./.cadence`.
pub fn cadence_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("CADENCE_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".cadence"))
        .unwrap_or_else(|| PathBuf::from(".").join(".cadence"))
}

/// `$CADENCE_HOME/logs`
pub fn logs_dir() -> PathBuf {
    cadence_home().join("logs")
}

struct RollingFile {
    dir: PathBuf,
    base_name: String,
    file: File,
    size: u64,
}

impl RollingFile {
    fn open(dir: &Path, app_name: &str) -> io::Result<Self> {
        let base_name = sanitize_name(app_name);
        let path = dir.join(format!("{}.log", base_name));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        let mut rolling = Self {
            dir: dir.to_path_buf(),
            base_name,
            file,
            size,
        };
        if rolling.size > MAX_LOG_FILE_SIZE {
            rolling.rotate()?;
        }
        Ok(rolling)
    }

    fn path(&self, index: usize) -> PathBuf {
        if index == 0 {
            self.dir.join(format!("{}.log", self.base_name))
        } else {
            self.dir.join(format!("{}.log.{}", self.base_name, index))
        }
    }

    /// `app.log` -> `app.log.1` -> ... -> `app.log.{MAX_LOG_FILES - 1}` (dropped).
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let oldest = self.path(MAX_LOG_FILES - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for idx in (0..MAX_LOG_FILES - 1).rev() {
            let src = self.path(idx);
            if src.exists() {
                fs::rename(&src, self.path(idx + 1))?;
            }
        }
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(0))?;
        self.size = 0;
        Ok(())
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.size + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Clone)]
struct SharedRollingWriter {
    inner: Arc<Mutex<RollingFile>>,
}

impl SharedRollingWriter {
    fn new(dir: &Path, app_name: &str) -> Result<Self> {
        let file = RollingFile::open(dir, app_name)
            .with_context(|| format!("Failed to open log file for {}", app_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct SharedRollingWriterGuard {
    inner: Arc<Mutex<RollingFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = SharedRollingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedRollingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedRollingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
