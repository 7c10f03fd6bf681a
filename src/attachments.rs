//! Image blobs attached to records, keyed by record id.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{IMAGES_TABLE, RECORDS_TABLE};
use crate::error::{codes, is_foreign_key_violation};
use crate::{AppError, AppResult};

pub fn ensure_images_table(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {IMAGES_TABLE} (
            image_id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id TEXT NOT NULL REFERENCES {RECORDS_TABLE}(id) ON DELETE CASCADE,
            image_data BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS {IMAGES_TABLE}_product_idx ON {IMAGES_TABLE}(product_id);"
    ))
    .map_err(|err| AppError::from(err).with_context("operation", "create_images_table"))
}

/// Attach `blob` to the record `product_id`. Returns the new image id.
pub fn add(conn: &Connection, product_id: &str, blob: &[u8]) -> AppResult<i64> {
    conn.execute(
        &format!("INSERT INTO {IMAGES_TABLE} (product_id, image_data) VALUES (?1, ?2)"),
        params![product_id, blob],
    )
    .map_err(|err| {
        let base = if is_foreign_key_violation(&err) {
            AppError::new(codes::RECORD_NOT_FOUND, "No record with this id")
        } else {
            AppError::from(err)
        };
        base.with_context("operation", "add_attachment")
            .with_context("product_id", product_id.to_string())
            .with_context("bytes", blob.len().to_string())
    })?;
    Ok(conn.last_insert_rowid())
}

/// Every blob attached to `product_id`, oldest first.
pub fn list_for(conn: &Connection, product_id: &str) -> AppResult<Vec<Vec<u8>>> {
    let map_err = |err: rusqlite::Error| {
        AppError::from(err)
            .with_context("operation", "list_attachments")
            .with_context("product_id", product_id.to_string())
    };
    let mut stmt = conn
        .prepare(&format!(
            "SELECT image_data FROM {IMAGES_TABLE} WHERE product_id = ?1 ORDER BY image_id"
        ))
        .map_err(map_err)?;
    let blobs = stmt
        .query_map([product_id], |row| row.get::<_, Vec<u8>>(0))
        .map_err(map_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_err)?;
    Ok(blobs)
}

/// Remove one attachment of `product_id` whose bytes equal `blob`, the
/// oldest if there are several copies. Returns whether a row went away.
pub fn remove(conn: &Connection, product_id: &str, blob: &[u8]) -> AppResult<bool> {
    let map_err = |err: rusqlite::Error| {
        AppError::from(err)
            .with_context("operation", "remove_attachment")
            .with_context("product_id", product_id.to_string())
    };
    let image_id: Option<i64> = conn
        .query_row(
            &format!(
                "SELECT image_id FROM {IMAGES_TABLE}
                 WHERE product_id = ?1 AND image_data = ?2
                 ORDER BY image_id LIMIT 1"
            ),
            params![product_id, blob],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_err)?;
    let Some(image_id) = image_id else {
        return Ok(false);
    };
    conn.execute(
        &format!("DELETE FROM {IMAGES_TABLE} WHERE image_id = ?1"),
        [image_id],
    )
    .map_err(map_err)?;
    Ok(true)
}

/// Move every attachment of `from` to `to`. Returns the number moved.
pub fn repoint(conn: &Connection, from: &str, to: &str) -> AppResult<usize> {
    conn.execute(
        &format!("UPDATE {IMAGES_TABLE} SET product_id = ?1 WHERE product_id = ?2"),
        params![to, from],
    )
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "repoint_attachments")
            .with_context("from", from.to_string())
            .with_context("to", to.to_string())
    })
}

pub fn count(conn: &Connection) -> AppResult<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {IMAGES_TABLE}"), [], |row| {
        row.get(0)
    })
    .map_err(|err| AppError::from(err).with_context("operation", "count_attachments"))
}

pub fn delete_all(conn: &Connection) -> AppResult<usize> {
    conn.execute(&format!("DELETE FROM {IMAGES_TABLE}"), [])
        .map_err(|err| AppError::from(err).with_context("operation", "delete_attachments"))
}
