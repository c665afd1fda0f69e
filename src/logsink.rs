// src/logsink.rs

//! Append-only line log: the destination for received messages and, through
//! its `io::Write` impl, for the `tracing` output of the binary.

use crate::error::ServerError;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Line-oriented log file with optional console echo.
///
/// All writes go through one mutex, so records from concurrent tasks never
/// interleave within a line.
#[derive(Debug)]
pub struct LogSink {
    file: Mutex<Option<File>>,
    console: bool,
    last_error: AtomicI32,
}

impl LogSink {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>, console: bool) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| ServerError::LogFile {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            file: Mutex::new(Some(file)),
            console,
            last_error: AtomicI32::new(0),
        })
    }

    /// A sink that only echoes to the console.
    pub fn console_only() -> Self {
        Self {
            file: Mutex::new(None),
            console: true,
            last_error: AtomicI32::new(0),
        }
    }

    /// Appends one timestamped record. With `errno`, the code is appended as
    /// `" errno: N"` and remembered as the last error.
    pub fn log(&self, message: &str, errno: Option<i32>) {
        let mut line = format!(
            "[{}] {}",
            chrono::Local::now().format(TIMESTAMP_FORMAT),
            message.trim_end_matches(['\r', '\n'])
        );
        if let Some(code) = errno {
            self.last_error.store(code, Ordering::Relaxed);
            line.push_str(&format!(" errno: {code}"));
        }
        line.push('\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if self.console {
            print!("{line}");
        }
        if let Some(file) = file.as_mut() {
            if let Err(err) = file.write_all(line.as_bytes()) {
                eprintln!("log write failed: {err}");
            }
        }
    }

    /// The code passed with the most recent error record, 0 if none.
    pub fn last_error(&self) -> i32 {
        self.last_error.load(Ordering::Relaxed)
    }
}

/// Raw passthrough for pre-formatted output such as `tracing` events.
impl Write for &LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if self.console {
            io::stderr().write_all(buf)?;
        }
        if let Some(file) = file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        match file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
