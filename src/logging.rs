use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use once_cell::sync::Lazy;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;
use crate::{AppError, AppResult};

pub const LOG_FILE_NAME: &str = "shelfkeep.log";

struct FileSinkState {
    writer: NonBlocking,
    _guard: WorkerGuard,
}

static FILE_SINK: Lazy<Mutex<Option<FileSinkState>>> = Lazy::new(|| Mutex::new(None));

/// Writer for the file layer. Discards output until [`init_file_logging`]
/// has opened the rotating file.
#[derive(Clone, Copy, Default)]
struct FileSink;

impl<'a> MakeWriter<'a> for FileSink {
    type Writer = FileSink;

    fn make_writer(&'a self) -> Self::Writer {
        FileSink
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut sink = FILE_SINK.lock().unwrap_or_else(|e| e.into_inner());
        match sink.as_mut() {
            Some(state) => state.writer.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut sink = FILE_SINK.lock().unwrap_or_else(|e| e.into_inner());
        match sink.as_mut() {
            Some(state) => state.writer.flush(),
            None => Ok(()),
        }
    }
}

/// Install the JSON subscriber on stderr plus the (initially idle) file
/// layer. Filter from `SHELFKEEP_LOG`. Calling it again is a no-op.
pub fn init_logging() {
    init_logging_with(&LogConfig::from_env().filter);
}

pub fn init_logging_with(filter: &str) {
    let _ = tracing_log::LogTracer::init();
    let stderr_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(io::stderr);
    let file_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_ansi(false)
        .with_writer(FileSink);
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}

/// Start writing JSON log lines to `<dir>/shelfkeep.log`, rotated by size.
/// Returns the log file path.
pub fn init_file_logging(config: &LogConfig) -> AppResult<PathBuf> {
    std::fs::create_dir_all(&config.dir).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create_log_dir")
            .with_context("path", config.dir.display().to_string())
    })?;
    let path = config.dir.join(LOG_FILE_NAME);

    #[cfg(unix)]
    let rotate = FileRotate::new(
        &path,
        AppendCount::new(config.max_files),
        ContentLimit::Bytes(config.max_bytes as usize),
        Compression::None,
        None,
    );
    #[cfg(not(unix))]
    let rotate = FileRotate::new(
        &path,
        AppendCount::new(config.max_files),
        ContentLimit::Bytes(config.max_bytes as usize),
        Compression::None,
    );

    let (writer, guard) = tracing_appender::non_blocking(rotate);
    *FILE_SINK.lock().unwrap_or_else(|e| e.into_inner()) = Some(FileSinkState {
        writer,
        _guard: guard,
    });
    tracing::info!(
        target: "shelfkeep",
        event = "file_logging_started",
        path = %path.display(),
        max_bytes = config.max_bytes,
        max_files = config.max_files
    );
    Ok(path)
}

/// Flush pending file log lines and close the file sink.
pub fn flush_file_logs() {
    let state = FILE_SINK.lock().unwrap_or_else(|e| e.into_inner()).take();
    // Dropping the worker guard drains the queue.
    drop(state);
}
