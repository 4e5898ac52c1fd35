//! The single append-only log destination.
//!
//! Dispatcher and session workers write through the `log` facade; once
//! [`LogSink::install`] ran, every record ends up here, serialized by one
//! mutex.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::error::{GateError, Result};

pub struct LogSink {
    out: Mutex<Box<dyn Write + Send>>,
    level: LevelFilter,
}

impl LogSink {
    /// Appends to `path`, creating it when missing.
    pub fn open(path: &Path, level: LevelFilter) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(GateError::io("open log file"))?;
        Ok(Self::with_writer(Box::new(file), level))
    }

    pub fn stderr(level: LevelFilter) -> Self {
        Self::with_writer(Box::new(io::stderr()), level)
    }

    pub fn with_writer(out: Box<dyn Write + Send>, level: LevelFilter) -> Self {
        LogSink {
            out: Mutex::new(out),
            level,
        }
    }

    /// Timestamps and writes one line. Failures are swallowed.
    pub fn append(&self, message: &str) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = writeln!(out, "[{stamp}] {message}");
        let _ = out.flush();
    }

    /// Makes this sink the global logger.
    pub fn install(self) -> std::result::Result<(), SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for LogSink {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.append(&format!("{:<5} {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.flush();
        }
    }
}
