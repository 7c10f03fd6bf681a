//! Keeps the records table's columns congruent with the field table.

use rusqlite::Connection;
use serde::Serialize;
use tracing::error;

use crate::db::schema_rebuild::{self, ColumnSpec, RebuildStats, RecoveryAction};
use crate::db::{table_columns, table_exists, RECORDS_TABLE};
use crate::error::codes;
use crate::fields::{self, FieldDefinition, ID_FIELD};
use crate::identifier::{self, quote};
use crate::{AppError, AppResult};

/// Column definition for a field. `id` carries the uniqueness the attachment
/// foreign key depends on.
pub fn column_ddl(def: &FieldDefinition) -> String {
    if def.name == ID_FIELD {
        format!("{} {} NOT NULL UNIQUE", quote(&def.name), def.value_type.sql_type())
    } else {
        format!("{} {}", quote(&def.name), def.value_type.sql_type())
    }
}

/// Create the records table from the current field definitions if it does
/// not exist yet.
pub fn ensure_records_table(conn: &Connection) -> AppResult<()> {
    if table_exists(conn, RECORDS_TABLE)? {
        return Ok(());
    }
    let defs = fields::list_fields(conn)?;
    let columns: Vec<String> = defs.iter().filter(|d| d.has_column()).map(column_ddl).collect();
    conn.execute_batch(&format!(
        "CREATE TABLE {} ({})",
        quote(RECORDS_TABLE),
        columns.join(", ")
    ))
    .map_err(|err| AppError::from(err).with_context("operation", "create_records_table"))?;
    Ok(())
}

pub fn physical_columns(conn: &Connection) -> AppResult<Vec<String>> {
    table_columns(conn, RECORDS_TABLE)
}

fn has_physical(columns: &[String], name: &str) -> bool {
    // Column names are case-insensitive to the engine.
    columns.iter().any(|c| c.eq_ignore_ascii_case(name))
}

pub(crate) fn sync_conflict(message: &str, field: &str) -> AppError {
    let err = AppError::new(codes::SYNC_CONFLICT, message).with_context("field", field.to_string());
    error!(
        target: "shelfkeep",
        event = "schema_sync_conflict",
        field = field,
        msg = message
    );
    err
}

/// Add the physical column for a freshly defined field. Image fields have no
/// column and succeed without touching the table.
///
/// A column that already exists is a sync conflict: it was not created from
/// this definition, so its contents cannot be trusted to match it.
pub fn add_column(conn: &Connection, def: &FieldDefinition) -> AppResult<()> {
    identifier::validate(&def.name)
        .map_err(|err| AppError::from(err).with_context("name", def.name.clone()))?;
    if !def.has_column() {
        return Ok(());
    }

    let columns = physical_columns(conn)?;
    if has_physical(&columns, &def.name) {
        return Err(sync_conflict(
            "Column already exists in the records table but was not in the field table",
            &def.name,
        ));
    }

    conn.execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote(RECORDS_TABLE),
        column_ddl(def)
    ))
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "add_column")
            .with_context("field", def.name.clone())
    })?;
    Ok(())
}

/// Remove the physical column for `name` by rebuilding the records table
/// without it.
///
/// Must run inside a transaction with foreign keys disabled; the drop inside
/// the rebuild would otherwise cascade into the attachment table. Every
/// surviving column must still have a definition so its type can be
/// reproduced.
pub fn remove_column(conn: &Connection, name: &str) -> AppResult<Option<RebuildStats>> {
    let fk_enabled: i64 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .map_err(|err| AppError::from(err).with_context("operation", "read_foreign_keys"))?;
    if fk_enabled != 0 {
        return Err(AppError::new(
            codes::FOREIGN_KEYS_ENABLED,
            "Column removal requires foreign key enforcement to be off",
        )
        .with_context("field", name.to_string()));
    }

    let def = fields::get_field(conn, name)?;
    if def.as_ref().is_some_and(|d| !d.has_column()) {
        return Ok(None);
    }

    let columns = physical_columns(conn)?;
    if !columns.iter().any(|c| c == name) {
        return Err(match def {
            Some(_) => sync_conflict("Field has no column in the records table", name),
            None => fields::field_not_found(name).with_context("scope", "records_table"),
        });
    }
    if name == ID_FIELD {
        return Err(
            AppError::new(codes::FIELD_BUILT_IN, "The id column cannot be removed")
                .with_context("field", name.to_string()),
        );
    }

    let defs = fields::list_fields(conn)?;
    let mut survivors = Vec::with_capacity(columns.len() - 1);
    for column in columns.iter().filter(|c| c.as_str() != name) {
        let def = defs.iter().find(|d| &d.name == column).ok_or_else(|| {
            sync_conflict("Records table has a column with no field definition", column)
        })?;
        survivors.push(ColumnSpec {
            name: column.clone(),
            ddl: column_ddl(def),
        });
    }

    schema_rebuild::rebuild_table(conn, RECORDS_TABLE, &survivors).map(Some)
}

/// Difference between the field table and the records table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDrift {
    /// Non-image fields with no column.
    pub missing_columns: Vec<String>,
    /// Columns with no field definition.
    pub orphan_columns: Vec<String>,
}

impl SchemaDrift {
    pub fn is_congruent(&self) -> bool {
        self.missing_columns.is_empty() && self.orphan_columns.is_empty()
    }
}

pub fn verify(conn: &Connection) -> AppResult<SchemaDrift> {
    let defs = fields::list_fields(conn)?;
    let columns = physical_columns(conn)?;
    let missing_columns = defs
        .iter()
        .filter(|d| d.has_column() && !columns.iter().any(|c| c == &d.name))
        .map(|d| d.name.clone())
        .collect();
    let orphan_columns = columns
        .iter()
        .filter(|c| !defs.iter().any(|d| d.has_column() && &d.name == *c))
        .cloned()
        .collect();
    Ok(SchemaDrift {
        missing_columns,
        orphan_columns,
    })
}

pub fn recover_interrupted_rebuild(conn: &Connection) -> AppResult<RecoveryAction> {
    schema_rebuild::recover_interrupted_rebuild(conn, RECORDS_TABLE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_in_memory, with_tx, ForeignKeysOff};
    use crate::values::{InputClass, ValueType};

    fn conn() -> Connection {
        let conn = open_in_memory().unwrap();
        fields::ensure_fields_table(&conn).unwrap();
        ensure_records_table(&conn).unwrap();
        conn
    }

    #[test]
    fn records_table_mirrors_built_ins() {
        let conn = conn();
        assert_eq!(
            physical_columns(&conn).unwrap(),
            vec!["id", "name", "quantity", "price", "category", "brand", "description"]
        );
        assert!(verify(&conn).unwrap().is_congruent());
    }

    #[test]
    fn column_types_follow_value_types() {
        let def = FieldDefinition::new("warranty_months", ValueType::Int);
        assert_eq!(column_ddl(&def), "\"warranty_months\" INTEGER");
        let id = FieldDefinition::new("id", ValueType::String);
        assert_eq!(column_ddl(&id), "\"id\" TEXT NOT NULL UNIQUE");
    }

    #[test]
    fn add_column_detects_preexisting_column() {
        let conn = conn();
        conn.execute_batch("ALTER TABLE products ADD COLUMN colour TEXT")
            .unwrap();
        let def = FieldDefinition::new("colour", ValueType::String);
        let err = add_column(&conn, &def).unwrap_err();
        assert_eq!(err.code(), codes::SYNC_CONFLICT);
        // Engine identifiers ignore case.
        let err = add_column(&conn, &FieldDefinition::new("Colour", ValueType::String)).unwrap_err();
        assert_eq!(err.code(), codes::SYNC_CONFLICT);
    }

    #[test]
    fn image_fields_have_no_column() {
        let conn = conn();
        let def = FieldDefinition::new("photos", ValueType::String).input(InputClass::Image);
        fields::define_field(&conn, &def).unwrap();
        add_column(&conn, &def).unwrap();
        assert!(!physical_columns(&conn).unwrap().contains(&"photos".to_string()));
        assert!(verify(&conn).unwrap().is_congruent());
    }

    #[test]
    fn remove_column_refuses_with_foreign_keys_on() {
        let conn = conn();
        let err = remove_column(&conn, "description").unwrap_err();
        assert_eq!(err.code(), codes::FOREIGN_KEYS_ENABLED);
    }

    #[test]
    fn remove_column_rebuilds_without_it() {
        let mut conn = conn();
        let def = FieldDefinition::new("colour", ValueType::String);
        fields::define_field(&conn, &def).unwrap();
        add_column(&conn, &def).unwrap();
        conn.execute(
            "INSERT INTO products (id, name, colour) VALUES ('A', 'Anvil', 'black')",
            [],
        )
        .unwrap();

        let mut guard = ForeignKeysOff::new(&mut conn).unwrap();
        let stats = with_tx(guard.conn(), |tx| {
            let stats = remove_column(tx, "colour")?;
            fields::undefine_field(tx, "colour")?;
            Ok(stats)
        })
        .unwrap();
        drop(guard);

        assert_eq!(stats, Some(RebuildStats { rows_copied: 1 }));
        assert!(!physical_columns(&conn).unwrap().contains(&"colour".to_string()));
        assert!(verify(&conn).unwrap().is_congruent());
        let name: String = conn
            .query_row("SELECT name FROM products WHERE id = 'A'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "Anvil");
    }

    #[test]
    fn verify_reports_both_directions() {
        let conn = conn();
        conn.execute_batch("ALTER TABLE products ADD COLUMN stray TEXT").unwrap();
        conn.execute(
            "INSERT INTO fields VALUES ('ghost', 'small_box', 'string', 0)",
            [],
        )
        .unwrap();
        let drift = verify(&conn).unwrap();
        assert_eq!(drift.missing_columns, vec!["ghost".to_string()]);
        assert_eq!(drift.orphan_columns, vec!["stray".to_string()]);
        assert!(!drift.is_congruent());
    }
}
