use rusqlite::Connection;

use crate::identifier::quote;
use crate::{AppError, AppResult};

use super::table_exists;

fn ensure_distinct(live: &str, staged: &str) -> AppResult<()> {
    if live.eq_ignore_ascii_case(staged) {
        return Err(AppError::new(
            "DB_SWAP/SAME_TABLE",
            "Swap tables must have different names",
        )
        .with_context("live", live.to_string())
        .with_context("staged", staged.to_string()));
    }
    Ok(())
}

/// Replace `live` with the already populated `staged` table: drop the live
/// table, then rename the staged one into its place.
///
/// Both statements must run inside the caller's transaction so that a failure
/// between them leaves the original table in place. With foreign keys enabled
/// the drop would fire `ON DELETE` actions on child tables, so callers turn
/// enforcement off first (see [`super::ForeignKeysOff`]).
pub fn swap_tables(conn: &Connection, live: &str, staged: &str) -> AppResult<()> {
    ensure_distinct(live, staged)?;

    if !table_exists(conn, staged)? {
        return Err(
            AppError::new("DB_SWAP/STAGED_MISSING", "Staged table does not exist")
                .with_context("staged", staged.to_string()),
        );
    }

    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(live)))
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "drop_live_table")
                .with_context("table", live.to_string())
        })?;

    conn.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote(staged),
        quote(live)
    ))
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "promote_staged_table")
            .with_context("from", staged.to_string())
            .with_context("to", live.to_string())
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_in_memory, table_columns, with_tx};

    #[test]
    fn swap_promotes_staged_and_drops_live() -> anyhow::Result<()> {
        let mut conn = open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE live (a TEXT, b TEXT);
             INSERT INTO live VALUES ('x', 'y');
             CREATE TABLE staged (a TEXT);
             INSERT INTO staged SELECT a FROM live;",
        )?;

        with_tx(&mut conn, |tx| swap_tables(tx, "live", "staged"))?;

        assert_eq!(table_columns(&conn, "live")?, vec!["a".to_string()]);
        assert!(!table_exists(&conn, "staged")?);
        let a: String = conn.query_row("SELECT a FROM live", [], |r| r.get(0))?;
        assert_eq!(a, "x");
        Ok(())
    }

    #[test]
    fn swap_rejects_missing_staged_table() -> anyhow::Result<()> {
        let conn = open_in_memory()?;
        conn.execute_batch("CREATE TABLE live (a TEXT);")?;
        let err = swap_tables(&conn, "live", "nope").expect_err("missing staged");
        assert_eq!(err.code(), "DB_SWAP/STAGED_MISSING");
        assert!(table_exists(&conn, "live")?);
        Ok(())
    }

    #[test]
    fn swap_rejects_same_name() {
        let conn = open_in_memory().unwrap();
        let err = swap_tables(&conn, "live", "LIVE").expect_err("same table");
        assert_eq!(err.code(), "DB_SWAP/SAME_TABLE");
    }
}
