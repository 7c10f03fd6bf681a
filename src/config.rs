use std::env;
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = "shelfkeep";
pub const DB_FILE: &str = "inventory.sqlite3";

const DEFAULT_LOG_FILTER: &str = "shelfkeep=info";
const DEFAULT_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_LOG_MAX_FILES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub change_log_path: PathBuf,
    /// Reject inserts that omit any non-image field, not only required ones.
    pub strict_insert: bool,
}

impl StoreConfig {
    /// Database and change log at their default places under `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::for_db(dir.join(DB_FILE))
    }

    /// Change log beside `db_path`, named after its stem.
    pub fn for_db(db_path: PathBuf) -> Self {
        let change_log_path = change_log_beside(&db_path);
        Self {
            db_path,
            change_log_path,
            strict_insert: false,
        }
    }

    /// `SHELFKEEP_DB`, `SHELFKEEP_CHANGE_LOG` and `SHELFKEEP_STRICT_INSERT`
    /// override the defaults under the user's data directory.
    pub fn from_env() -> Self {
        let db_path = env::var_os("SHELFKEEP_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join(DB_FILE));
        let mut config = Self::for_db(db_path);
        if let Some(path) = env::var_os("SHELFKEEP_CHANGE_LOG") {
            config.change_log_path = PathBuf::from(path);
        }
        config.strict_insert = env_flag("SHELFKEEP_STRICT_INSERT");
        config
    }

    pub fn strict(mut self, strict_insert: bool) -> Self {
        self.strict_insert = strict_insert;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub dir: PathBuf,
    pub filter: String,
    pub max_bytes: u64,
    pub max_files: usize,
}

impl LogConfig {
    pub fn from_env() -> Self {
        let dir = env::var_os("SHELFKEEP_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("logs"));
        let filter = env::var("SHELFKEEP_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
        let max_bytes = env::var("SHELFKEEP_LOG_MAX_SIZE_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_LOG_MAX_BYTES);
        let max_files = env::var("SHELFKEEP_LOG_MAX_FILES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_LOG_MAX_FILES);
        Self {
            dir,
            filter,
            max_bytes,
            max_files,
        }
    }
}

pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn change_log_beside(db_path: &Path) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "inventory".into());
    db_path.with_file_name(format!("{stem}.log.txt"))
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
