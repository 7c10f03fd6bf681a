use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};

use crate::{AppError, AppResult};

/// Lines captured by an in-memory change log.
pub type ChangeLogLines = Arc<Mutex<Vec<String>>>;

const TIMESTAMP_FORMAT: &str = "[%Y-%m-%d %H:%M:%S]";

enum Sink {
    File { file: File, path: PathBuf },
    Memory(ChangeLogLines),
}

/// Append-only audit trail of every mutation the store performs.
///
/// Each line is `[YYYY-MM-DD HH:MM:SS] message`. File-backed logs are flushed
/// and synced before [`ChangeLog::append`] returns.
pub struct ChangeLog {
    sink: Sink,
}

impl ChangeLog {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "create_change_log_dir")
                    .with_context("path", parent.display().to_string())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "open_change_log")
                    .with_context("path", path.display().to_string())
            })?;
        Ok(Self {
            sink: Sink::File {
                file,
                path: path.to_path_buf(),
            },
        })
    }

    /// A log that keeps lines in memory; the returned handle sees every append.
    pub fn in_memory() -> (Self, ChangeLogLines) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sink: Sink::Memory(lines.clone()),
            },
            lines,
        )
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.sink {
            Sink::File { path, .. } => Some(path),
            Sink::Memory(_) => None,
        }
    }

    pub fn append(&mut self, message: &str) -> AppResult<()> {
        self.append_at(Local::now(), message)
    }

    fn append_at(&mut self, at: DateTime<Local>, message: &str) -> AppResult<()> {
        let line = format_line(at, message);
        tracing::debug!(target: "shelfkeep", event = "change_log_append", line = %line);
        match &mut self.sink {
            Sink::File { file, path } => {
                let write = (|| -> std::io::Result<()> {
                    file.write_all(line.as_bytes())?;
                    file.write_all(b"\n")?;
                    file.flush()?;
                    file.sync_data()
                })();
                write.map_err(|err| {
                    AppError::from(err)
                        .with_context("operation", "append_change_log")
                        .with_context("path", path.display().to_string())
                })
            }
            Sink::Memory(lines) => {
                lines
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(line);
                Ok(())
            }
        }
    }
}

fn format_line(at: DateTime<Local>, message: &str) -> String {
    // One entry per line, whatever the message contains.
    let flat = message.replace(['\r', '\n'], " ");
    format!("{} {}", at.format(TIMESTAMP_FORMAT), flat)
}
