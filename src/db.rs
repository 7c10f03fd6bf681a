use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use rusqlite::config::DbConfig;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{error, info, warn};

use crate::error::codes;
use crate::{AppError, AppResult};

pub mod health;
pub mod schema_rebuild;
pub mod swap;

pub const FIELDS_TABLE: &str = "fields";
pub const RECORDS_TABLE: &str = "products";
pub const IMAGES_TABLE: &str = "images";
pub const LOGIN_TABLE: &str = "login";

/// Open (or create) the inventory database at `db_path` with the pragmas the
/// store relies on.
pub fn open_sqlite(db_path: &Path) -> AppResult<Connection> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            error!(
                target: "shelfkeep",
                event = "db_dir_create_failed",
                error = %err,
                path = %parent.display()
            );
            AppError::from(err)
                .with_context("operation", "create_db_dir")
                .with_context("path", parent.display().to_string())
        })?;
    }
    info!(target: "shelfkeep", event = "db_path", path = %db_path.display());

    let conn = Connection::open(db_path).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "open_db")
            .with_context("path", db_path.display().to_string())
    })?;
    apply_pragmas(&conn, true)?;
    log_effective_pragmas(&conn);
    Ok(conn)
}

/// In-memory database for tests and throwaway tooling.
pub fn open_in_memory() -> AppResult<Connection> {
    let conn = Connection::open_in_memory()
        .map_err(|err| AppError::from(err).with_context("operation", "open_in_memory"))?;
    apply_pragmas(&conn, false)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection, wal: bool) -> AppResult<()> {
    let result = (|| -> rusqlite::Result<()> {
        if wal {
            // journal_mode answers with the resulting mode, so it cannot go
            // through pragma_update.
            let _: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            conn.pragma_update(None, "synchronous", "FULL")?;
        }
        conn.pragma_update(None, "foreign_keys", 1)?;
        // A double-quoted name that matches no column must be an error, not
        // a string literal.
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        Ok(())
    })();
    result.map_err(|err| AppError::from(err).with_context("operation", "apply_pragmas"))
}

fn log_effective_pragmas(conn: &Connection) {
    let sqlite_ver: String = conn
        .query_row("select sqlite_version()", [], |row| row.get(0))
        .unwrap_or_else(|_| String::from("unknown"));
    let jm: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap_or_else(|_| String::from("unknown"));
    let sync: i64 = conn
        .query_row("PRAGMA synchronous;", [], |row| row.get(0))
        .unwrap_or(i64::MIN);
    let fks: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap_or(i64::MIN);
    let busy: i64 = conn
        .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
        .unwrap_or(i64::MIN);

    info!(
        target: "shelfkeep",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm,
        synchronous = %sync,
        foreign_keys = %fks,
        busy_timeout_ms = %busy
    );

    if !jm.eq_ignore_ascii_case("wal") {
        warn!(
            target: "shelfkeep",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Run work inside a transaction. Commits on success, rolls back on error.
/// A panic inside `f` drops the transaction, which also rolls back.
pub fn with_tx<R, F>(conn: &mut Connection, f: F) -> AppResult<R>
where
    F: FnOnce(&Transaction<'_>) -> AppResult<R>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| AppError::from(err).with_context("operation", "tx_begin"))?;
    tracing::debug!(target: "shelfkeep", event = "db_tx_begin");
    match f(&tx) {
        Ok(val) => {
            tx.commit()
                .map_err(|err| AppError::from(err).with_context("operation", "tx_commit"))?;
            tracing::debug!(target: "shelfkeep", event = "db_tx_commit");
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback() {
                error!(target: "shelfkeep", event = "db_tx_rollback_failed", error = %rb);
            } else {
                warn!(target: "shelfkeep", event = "db_tx_rollback", code = %e.code());
            }
            Err(e)
        }
    }
}

/// Turns foreign-key enforcement off until dropped. SQLite ignores the pragma
/// inside a transaction, so acquire this before `with_tx`.
pub struct ForeignKeysOff<'c> {
    conn: &'c mut Connection,
}

impl<'c> ForeignKeysOff<'c> {
    pub fn new(conn: &'c mut Connection) -> AppResult<Self> {
        conn.pragma_update(None, "foreign_keys", 0)
            .map_err(|err| AppError::from(err).with_context("operation", "foreign_keys_off"))?;
        Ok(Self { conn })
    }

    pub fn conn(&mut self) -> &mut Connection {
        &mut *self.conn
    }
}

impl Drop for ForeignKeysOff<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.conn.pragma_update(None, "foreign_keys", 1) {
            error!(target: "shelfkeep", event = "foreign_keys_restore_failed", error = %err);
        }
    }
}

pub fn table_exists(conn: &Connection, table: &str) -> AppResult<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "table_exists")
                .with_context("table", table.to_string())
        })?;
    Ok(found.is_some())
}

/// Column names of `table` in declaration order.
pub fn table_columns(conn: &Connection, table: &str) -> AppResult<Vec<String>> {
    let map_err = |err: rusqlite::Error| {
        AppError::from(err)
            .with_context("operation", "table_columns")
            .with_context("table", table.to_string())
    };
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(map_err)?;
    let names = stmt
        .query_map([table], |row| row.get::<_, String>(0))
        .map_err(map_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_err)?;
    Ok(names)
}

/// Exclusive advisory lock on `<db>.lock`, held for the lifetime of a store.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    pub fn acquire(db_path: &Path) -> AppResult<Self> {
        let mut os = db_path.as_os_str().to_owned();
        os.push(".lock");
        let path = PathBuf::from(os);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "open_lock_file")
                    .with_context("path", path.display().to_string())
            })?;
        file.try_lock_exclusive().map_err(|err| {
            AppError::new(
                codes::DB_LOCKED,
                "Inventory database is already open in another process",
            )
            .with_context("path", path.display().to_string())
            .with_cause(AppError::from(err))
        })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
