//! Tracing setup: compact console output plus an optional daily log file.
//!
//! Files are named `<prefix>.YYYY-MM-DD.log`. When the date changes the
//! writer switches to a new file and deletes files older than the retention.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{LogError, Result};

struct RollingState {
    directory: PathBuf,
    prefix: String,
    retention_days: u32,
    current_date: Option<NaiveDate>,
    file: Option<File>,
}

impl RollingState {
    fn roll_if_needed(&mut self, today: NaiveDate) -> io::Result<()> {
        if self.current_date == Some(today) && self.file.is_some() {
            return Ok(());
        }
        let path = self.directory.join(file_name(&self.prefix, today));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.file = Some(file);
        self.current_date = Some(today);
        // Retention failures must not stop logging.
        let _ = remove_expired(&self.directory, &self.prefix, self.retention_days, today);
        Ok(())
    }
}

/// File name of the log for a given day.
pub fn file_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}.{}.log", prefix, date.format("%Y-%m-%d"))
}

/// Delete log files of `prefix` that fall outside the retention window.
///
/// The window covers `retention_days` days ending with `today`.
pub fn remove_expired(
    directory: &Path,
    prefix: &str,
    retention_days: u32,
    today: NaiveDate,
) -> io::Result<usize> {
    let oldest_kept = today - Duration::days(i64::from(retention_days.max(1)) - 1);
    let mut removed = 0;

    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(date) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|rest| rest.strip_suffix(".log"))
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
        else {
            continue;
        };
        if date < oldest_kept {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// A writer that appends to one file per UTC day.
#[derive(Clone)]
pub struct DailyFileWriter {
    state: Arc<Mutex<RollingState>>,
}

impl DailyFileWriter {
    /// Create the directory if needed and open today's file.
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>, retention_days: u32) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        let mut state = RollingState {
            directory,
            prefix: prefix.into(),
            retention_days,
            current_date: None,
            file: None,
        };
        state.roll_if_needed(Utc::now().date_naive())?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Path of the file currently written to.
    pub fn current_path(&self) -> Option<PathBuf> {
        let state = self.state.lock();
        state
            .current_date
            .map(|d| state.directory.join(file_name(&state.prefix, d)))
    }
}

impl Write for DailyFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.roll_if_needed(Utc::now().date_naive())?;
        match state.file.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.state.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Install the global subscriber.
///
/// `level` is the default; `RUST_LOG` directives take precedence.
pub fn init_logging(level: Level, config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let console = fmt::layer().with_target(false).compact();

    let file = match &config.directory {
        Some(directory) => {
            let writer =
                DailyFileWriter::new(directory, config.file_prefix.clone(), config.retention_days)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(move || writer.clone()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| LogError::config_error(format!("failed to install logger: {}", e)))
}
