//! Daemon log file. The daemon runs for weeks between restarts, so the file
//! is bounded while it is written: once a record would push it past the
//! limit it is moved to `<name>.1` and a fresh file is started.

#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, WriteLogger};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

struct OpenLog {
    file: File,
    len: u64,
}

struct RotatingLog {
    path: PathBuf,
    max_size: u64,
    current: Option<OpenLog>,
}

impl RotatingLog {
    fn open(path: PathBuf, max_size: u64) -> io::Result<Self> {
        let current = Some(open_append(&path)?);
        Ok(Self {
            path,
            max_size,
            current,
        })
    }

    /// Reopen after the file was removed from under us, then rotate if
    /// `incoming` more bytes would overflow a non-empty file.
    fn prepare(&mut self, incoming: u64) -> io::Result<&mut OpenLog> {
        if self.current.is_none() || !self.path.exists() {
            self.current = Some(open_append(&self.path)?);
        }

        let full = self
            .current
            .as_ref()
            .is_some_and(|log| log.len > 0 && log.len.saturating_add(incoming) > self.max_size);
        if full {
            self.current = None;
            std::fs::rename(&self.path, rotated_path(&self.path))?;
            self.current = Some(open_append(&self.path)?);
        }

        self.current
            .as_mut()
            .ok_or_else(|| io::Error::other("log file not available"))
    }
}

impl Write for RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let incoming = u64::try_from(buf.len()).unwrap_or(u64::MAX);
        let log = self.prepare(incoming)?;
        let written = log.file.write(buf)?;
        log.len += u64::try_from(written).unwrap_or(u64::MAX);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current
            .as_mut()
            .map_or(Ok(()), |log| log.file.flush())
    }
}

fn open_append(path: &Path) -> io::Result<OpenLog> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok(OpenLog { file, len })
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".1");
    PathBuf::from(name)
}

/// Route `log` records from the respawn crates to `log_path`, and to the
/// terminal as well in debug builds.
pub fn init_logging(log_path: &Path, debug_enabled: bool, max_log_size: u64) {
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("respawn")
        .build();

    let file_logger = RotatingLog::open(log_path.to_path_buf(), max_log_size)
        .inspect_err(|err| eprintln!("cannot open log file {}: {err}", log_path.display()))
        .ok()
        .map(|writer| WriteLogger::new(LevelFilter::Debug, config.clone(), writer));

    #[cfg(debug_assertions)]
    {
        let term_logger = TermLogger::new(
            LevelFilter::Debug,
            config,
            TerminalMode::Mixed,
            ColorChoice::Auto,
        );

        if let Some(file_logger) = file_logger {
            let _ = CombinedLogger::init(vec![term_logger, file_logger]);
        } else {
            let _ = CombinedLogger::init(vec![term_logger]);
        }
    }

    #[cfg(not(debug_assertions))]
    {
        if let Some(file_logger) = file_logger {
            let _ = CombinedLogger::init(vec![file_logger]);
        }
    }

    set_debug_logging(debug_enabled);
    log::debug!("Logging to {} (rotated at {max_log_size} bytes)", log_path.display());
}

pub fn set_debug_logging(enabled: bool) {
    if enabled {
        log::set_max_level(log::LevelFilter::Debug);
    } else {
        log::set_max_level(log::LevelFilter::Info);
    }
}
