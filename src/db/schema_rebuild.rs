use rusqlite::Connection;
use tracing::{info, warn};

use crate::identifier::quote;
use crate::{AppError, AppResult};

use super::{swap, table_columns, table_exists};

pub const STAGING_SUFFIX: &str = "__rebuild";

pub fn staging_name(table: &str) -> String {
    format!("{table}{STAGING_SUFFIX}")
}

/// One column of a rebuilt table: its name and full column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ddl: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildStats {
    pub rows_copied: u64,
}

/// Rebuild `table` with exactly `columns`, copying their data across.
///
/// The staging table is created, filled, checked and swapped in on `conn`,
/// which must be an open transaction with foreign-key enforcement off. Any
/// error leaves the rollback to the caller's transaction; nothing is swapped
/// until the copy has been verified.
pub fn rebuild_table(conn: &Connection, table: &str, columns: &[ColumnSpec]) -> AppResult<RebuildStats> {
    if columns.is_empty() {
        return Err(
            AppError::new("DB_REBUILD/NO_COLUMNS", "A table needs at least one column")
                .with_context("table", table.to_string()),
        );
    }

    let live_columns = table_columns(conn, table)?;
    if let Some(unknown) = columns.iter().find(|c| !live_columns.contains(&c.name)) {
        return Err(
            AppError::new("DB_REBUILD/UNKNOWN_COLUMN", "Rebuild names a column the table lacks")
                .with_context("table", table.to_string())
                .with_context("column", unknown.name.clone()),
        );
    }

    let staged = staging_name(table);
    let defs: Vec<&str> = columns.iter().map(|c| c.ddl.as_str()).collect();
    let names: Vec<String> = columns.iter().map(|c| quote(&c.name)).collect();
    let name_list = names.join(", ");

    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {staged_q}; CREATE TABLE {staged_q} ({defs})",
        staged_q = quote(&staged),
        defs = defs.join(", ")
    ))
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create_staging_table")
            .with_context("table", staged.clone())
    })?;

    let rows_copied = conn
        .execute(
            &format!(
                "INSERT INTO {} ({name_list}) SELECT {name_list} FROM {} ORDER BY rowid",
                quote(&staged),
                quote(table)
            ),
            [],
        )
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "copy_surviving_columns")
                .with_context("table", table.to_string())
        })? as u64;

    let live_rows: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |row| {
            row.get(0)
        })
        .map_err(|err| AppError::from(err).with_context("operation", "count_live_rows"))?;
    if live_rows as u64 != rows_copied {
        return Err(
            AppError::new("DB_REBUILD/ROW_COUNT_MISMATCH", "Rebuilt table lost rows")
                .with_context("table", table.to_string())
                .with_context("expected", live_rows.to_string())
                .with_context("copied", rows_copied.to_string()),
        );
    }

    swap::swap_tables(conn, table, &staged)?;

    let violations: i64 = conn
        .query_row("SELECT COUNT(*) FROM pragma_foreign_key_check", [], |row| {
            row.get(0)
        })
        .map_err(|err| AppError::from(err).with_context("operation", "foreign_key_check"))?;
    if violations > 0 {
        return Err(AppError::new(
            "DB_REBUILD/FOREIGN_KEY_VIOLATION",
            "Rebuilt table breaks foreign key references",
        )
        .with_context("table", table.to_string())
        .with_context("violations", violations.to_string()));
    }

    info!(
        target: "shelfkeep",
        event = "table_rebuilt",
        table = table,
        columns = columns.len(),
        rows = rows_copied
    );
    Ok(RebuildStats { rows_copied })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Nothing,
    /// A staging table was found next to the live table and discarded.
    DroppedStaging,
    /// The live table was missing; the staging table took its place.
    PromotedStaging,
}

/// Resolve a staging table left over by an interrupted rebuild.
///
/// The rebuild runs in one transaction, so the normal outcome is
/// [`RecoveryAction::Nothing`]. If a staging table is present anyway, the
/// live table wins when it exists; otherwise the staging table is promoted
/// when it holds every column of a complete rebuild.
pub fn recover_interrupted_rebuild(conn: &Connection, table: &str) -> AppResult<RecoveryAction> {
    let staged = staging_name(table);
    if !table_exists(conn, &staged)? {
        return Ok(RecoveryAction::Nothing);
    }

    if table_exists(conn, table)? {
        conn.execute_batch(&format!("DROP TABLE {}", quote(&staged)))
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "drop_stale_staging")
                    .with_context("table", staged.clone())
            })?;
        warn!(
            target: "shelfkeep",
            event = "rebuild_recovered",
            action = "dropped_staging",
            table = table
        );
        return Ok(RecoveryAction::DroppedStaging);
    }

    let columns = table_columns(conn, &staged)?;
    conn.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote(&staged),
        quote(table)
    ))
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "promote_stale_staging")
            .with_context("table", staged.clone())
    })?;
    warn!(
        target: "shelfkeep",
        event = "rebuild_recovered",
        action = "promoted_staging",
        table = table,
        columns = columns.len()
    );
    Ok(RecoveryAction::PromotedStaging)
}
