//! Generic access to the records table. Column names come from the field
//! table at call time; nothing here knows the schema statically.

use std::collections::BTreeMap;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::db::RECORDS_TABLE;
use crate::error::{codes, is_unique_violation};
use crate::fields::{self, FieldDefinition, ID_FIELD, QUANTITY_FIELD};
use crate::identifier::quote;
use crate::schema;
use crate::values::FieldValue;
use crate::{attachments, AppError, AppResult};

/// Caller-supplied values keyed by field name.
pub type FieldValues = BTreeMap<String, FieldValue>;

/// Upper bound on bound parameters per `IN (...)` list.
const ID_CHUNK: usize = 500;

/// One row of the records table, in physical column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    columns: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new(columns: Vec<(String, FieldValue)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn id(&self) -> Option<&str> {
        self.get(ID_FIELD).and_then(FieldValue::as_text)
    }

    pub fn quantity(&self) -> Option<i64> {
        self.get(QUANTITY_FIELD).and_then(FieldValue::as_int)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The record without `name`, as it reads once that column is gone.
    pub fn without(&self, name: &str) -> Record {
        Record {
            columns: self
                .columns
                .iter()
                .filter(|(column, _)| column != name)
                .cloned()
                .collect(),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

fn record_not_found(id: &str) -> AppError {
    AppError::new(codes::RECORD_NOT_FOUND, "No record with this id").with_context("id", id.to_string())
}

fn duplicate_id(id: &str) -> AppError {
    AppError::new(codes::DUPLICATE_ID, "A record with this id already exists")
        .with_context("id", id.to_string())
}

fn coerce_for(def: &FieldDefinition, value: &FieldValue) -> AppResult<FieldValue> {
    let coerced = def
        .value_type
        .coerce(value.clone())
        .map_err(|err| err.with_context("field", def.name.clone()))?;
    if def.required && coerced.is_empty() {
        return Err(
            AppError::new(codes::EMPTY_REQUIRED, "Required field is empty")
                .with_context("field", def.name.clone()),
        );
    }
    Ok(coerced)
}

/// Validate `values` against the current fields and store them as a new
/// record. Returns the record's id.
///
/// Required fields must be present and non-empty. With `strict` set, every
/// non-image field must be present; otherwise an omitted optional field is
/// stored as NULL. Names that are not defined fields are ignored.
pub fn insert(conn: &Connection, values: &FieldValues, strict: bool) -> AppResult<String> {
    let defs = fields::list_fields(conn)?;
    let mut names = Vec::new();
    let mut row = Vec::new();
    for def in defs.iter().filter(|d| d.has_column()) {
        let value = match values.get(&def.name) {
            Some(value) => coerce_for(def, value)?,
            None if strict || def.required => {
                return Err(
                    AppError::new(codes::MISSING_FIELD, "Field is missing from the record")
                        .with_context("field", def.name.clone()),
                );
            }
            None => FieldValue::Null,
        };
        names.push(quote(&def.name));
        row.push(value);
    }

    for ignored in values
        .keys()
        .filter(|key| !defs.iter().any(|d| d.has_column() && &d.name == *key))
    {
        debug!(target: "shelfkeep", event = "insert_ignored_field", field = %ignored);
    }

    let id_value = defs
        .iter()
        .filter(|d| d.has_column())
        .position(|d| d.name == ID_FIELD)
        .and_then(|idx| row.get(idx));
    let id = match id_value {
        Some(FieldValue::Text(id)) => id.clone(),
        _ => {
            return Err(
                AppError::new(codes::MISSING_FIELD, "Record id is missing")
                    .with_context("field", ID_FIELD),
            )
        }
    };

    let placeholders = (1..=row.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote(RECORDS_TABLE),
            names.join(", ")
        ),
        params_from_iter(row.iter()),
    )
    .map_err(|err| {
        if is_unique_violation(&err) {
            duplicate_id(&id)
        } else {
            AppError::from(err)
                .with_context("operation", "insert_record")
                .with_context("id", id.clone())
        }
    })?;
    Ok(id)
}

/// Take `amount` units off a record's stock. Returns the new quantity.
///
/// A NULL quantity counts as zero. The record stays in place when it reaches
/// zero.
pub fn decrement_quantity(conn: &Connection, id: &str, amount: i64) -> AppResult<i64> {
    if amount < 0 {
        return Err(
            AppError::new(codes::NEGATIVE_AMOUNT, "Amount to remove must not be negative")
                .with_context("id", id.to_string())
                .with_context("amount", amount.to_string()),
        );
    }

    let current: Option<Option<i64>> = conn
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE {} = ?1",
                quote(QUANTITY_FIELD),
                quote(RECORDS_TABLE),
                quote(ID_FIELD)
            ),
            [id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "read_quantity")
                .with_context("id", id.to_string())
        })?;
    let current = current.ok_or_else(|| record_not_found(id))?.unwrap_or(0);

    if amount > current {
        return Err(AppError::new(
            codes::INSUFFICIENT_QUANTITY,
            "Not enough stock to remove that many",
        )
        .with_context("id", id.to_string())
        .with_context("available", current.to_string())
        .with_context("requested", amount.to_string()));
    }

    let remaining = current - amount;
    conn.execute(
        &format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            quote(RECORDS_TABLE),
            quote(QUANTITY_FIELD),
            quote(ID_FIELD)
        ),
        params![remaining, id],
    )
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "write_quantity")
            .with_context("id", id.to_string())
    })?;
    Ok(remaining)
}

fn exists(conn: &Connection, id: &str) -> AppResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!(
                "SELECT 1 FROM {} WHERE {} = ?1",
                quote(RECORDS_TABLE),
                quote(ID_FIELD)
            ),
            [id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "record_exists")
                .with_context("id", id.to_string())
        })?;
    Ok(found.is_some())
}

/// Overwrite some fields of the record `id`. Returns the record's id after
/// the update.
///
/// When `id` itself changes, attachments are moved to the new id before the
/// record row is rewritten. Must run inside a transaction: the foreign key
/// check is deferred to commit for the moment in between.
pub fn update(conn: &Connection, id: &str, new_values: &FieldValues) -> AppResult<String> {
    if !exists(conn, id)? {
        return Err(record_not_found(id));
    }

    let mut assignments = Vec::with_capacity(new_values.len());
    let mut bound: Vec<FieldValue> = Vec::with_capacity(new_values.len() + 1);
    let mut new_id = id.to_string();
    for (name, value) in new_values {
        let def = fields::get_field(conn, name)?.ok_or_else(|| fields::field_not_found(name))?;
        if !def.has_column() {
            return Err(AppError::new(
                codes::MALFORMED_VALUE,
                "Image fields are changed through attachments",
            )
            .with_context("field", name.clone()));
        }
        let value = coerce_for(&def, value)?;
        if def.name == ID_FIELD {
            if let FieldValue::Text(text) = &value {
                new_id = text.clone();
            }
        }
        bound.push(value);
        assignments.push(format!("{} = ?{}", quote(&def.name), bound.len()));
    }

    if assignments.is_empty() {
        return Ok(new_id);
    }

    if new_id != id {
        if exists(conn, &new_id)? {
            return Err(duplicate_id(&new_id));
        }
        conn.execute_batch("PRAGMA defer_foreign_keys = ON")
            .map_err(|err| AppError::from(err).with_context("operation", "defer_foreign_keys"))?;
        let moved = attachments::repoint(conn, id, &new_id)?;
        debug!(
            target: "shelfkeep",
            event = "attachments_repointed",
            from = %id,
            to = %new_id,
            count = moved
        );
    }

    bound.push(FieldValue::Text(id.to_string()));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote(RECORDS_TABLE),
        assignments.join(", "),
        quote(ID_FIELD),
        bound.len()
    );
    conn.execute(&sql, params_from_iter(bound.iter()))
        .map_err(|err| {
            if is_unique_violation(&err) {
                duplicate_id(&new_id)
            } else {
                AppError::from(err)
                    .with_context("operation", "update_record")
                    .with_context("id", id.to_string())
            }
        })?;
    Ok(new_id)
}

fn select_records(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> AppResult<Vec<Record>> {
    select_with(conn, sql, params, 0, |_, record| Ok(record))
}

/// Runs `sql` and turns every column from `skip` onwards into a record;
/// `wrap` sees the raw row too, for the leading columns.
fn select_with<T>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
    skip: usize,
    wrap: impl Fn(&Row<'_>, Record) -> rusqlite::Result<T>,
) -> AppResult<Vec<T>> {
    let map_err = |err: rusqlite::Error| AppError::from(err).with_context("operation", "select_records");
    let mut stmt = conn.prepare(sql).map_err(map_err)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt
        .query_map(params, |row| {
            let mut columns = Vec::with_capacity(names.len().saturating_sub(skip));
            for (idx, name) in names.iter().enumerate().skip(skip) {
                columns.push((name.clone(), row.get::<_, FieldValue>(idx)?));
            }
            wrap(row, Record { columns })
        })
        .map_err(map_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_err)?;
    Ok(rows)
}

/// Records whose id is in `ids`, in storage order. Unknown ids are skipped;
/// an empty set matches nothing.
pub fn find_by_ids(conn: &Connection, ids: &[String]) -> AppResult<Vec<Record>> {
    let mut wanted: Vec<&String> = ids.iter().collect();
    wanted.sort();
    wanted.dedup();

    // Column 0 is the rowid; it is read by position so no field name can
    // shadow it.
    let mut found: Vec<(i64, Record)> = Vec::new();
    for chunk in wanted.chunks(ID_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT rowid, * FROM {} WHERE {} IN ({placeholders})",
            quote(RECORDS_TABLE),
            quote(ID_FIELD)
        );
        let params: Vec<&dyn ToSql> = chunk.iter().map(|id| *id as &dyn ToSql).collect();
        found.extend(select_with(conn, &sql, &params, 1, |row, record| {
            Ok((row.get::<_, i64>(0)?, record))
        })?);
    }

    found.sort_by_key(|(rowid, _)| *rowid);
    Ok(found.into_iter().map(|(_, record)| record).collect())
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    for ch in query.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Records where any of `fields` contains `query`, ignoring ASCII case.
///
/// No fields matches nothing, whatever the query. Every name must be a
/// column of the records table.
pub fn search(conn: &Connection, fields: &[String], query: &str) -> AppResult<Vec<Record>> {
    if fields.is_empty() {
        return Ok(Vec::new());
    }

    let columns = schema::physical_columns(conn)?;
    let mut tests = Vec::with_capacity(fields.len());
    for field in fields {
        if !columns.iter().any(|c| c == field) {
            return Err(fields::field_not_found(field).with_context("scope", "records_table"));
        }
        tests.push(format!("{} LIKE ?1 ESCAPE '\\'", quote(field)));
    }

    let pattern = format!("%{}%", escape_like(query));
    let sql = format!(
        "SELECT * FROM {} WHERE {} ORDER BY rowid",
        quote(RECORDS_TABLE),
        tests.join(" OR ")
    );
    select_records(conn, &sql, &[&pattern as &dyn ToSql])
}

/// Every record, in storage order.
pub fn snapshot(conn: &Connection) -> AppResult<Vec<Record>> {
    select_records(
        conn,
        &format!("SELECT * FROM {} ORDER BY rowid", quote(RECORDS_TABLE)),
        &[],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn conn() -> Connection {
        let conn = open_in_memory().unwrap();
        fields::ensure_fields_table(&conn).unwrap();
        schema::ensure_records_table(&conn).unwrap();
        attachments::ensure_images_table(&conn).unwrap();
        conn
    }

    fn item(id: &str, quantity: i64) -> FieldValues {
        let mut values = FieldValues::new();
        values.insert("id".into(), id.into());
        values.insert("name".into(), "Anvil".into());
        values.insert("quantity".into(), quantity.into());
        values.insert("price".into(), "12.50".into());
        values.insert("category".into(), "Tools".into());
        values.insert("brand".into(), "Acme".into());
        values
    }

    #[test]
    fn insert_coerces_and_returns_id() {
        let conn = conn();
        let id = insert(&conn, &item("A-1", 4), false).unwrap();
        assert_eq!(id, "A-1");
        let record = &snapshot(&conn).unwrap()[0];
        assert_eq!(record.get("price"), Some(&FieldValue::Float(12.5)));
        assert_eq!(record.get("description"), Some(&FieldValue::Null));
        assert_eq!(record.quantity(), Some(4));
    }

    #[test]
    fn strict_insert_requires_every_column() {
        let conn = conn();
        let err = insert(&conn, &item("A-1", 1), true).unwrap_err();
        assert_eq!(err.code(), codes::MISSING_FIELD);
        assert_eq!(err.context().get("field"), Some(&"description".to_string()));
        let mut full = item("A-1", 1);
        full.insert("description".into(), "".into());
        insert(&conn, &full, true).unwrap();
    }

    #[test]
    fn insert_rejects_empty_required_and_duplicates() {
        let conn = conn();
        let mut values = item("A-1", 1);
        values.insert("brand".into(), "  ".into());
        assert_eq!(
            insert(&conn, &values, false).unwrap_err().code(),
            codes::EMPTY_REQUIRED
        );
        insert(&conn, &item("A-1", 1), false).unwrap();
        assert_eq!(
            insert(&conn, &item("A-1", 1), false).unwrap_err().code(),
            codes::DUPLICATE_ID
        );
        assert_eq!(snapshot(&conn).unwrap().len(), 1);
    }

    #[test]
    fn insert_ignores_unknown_names() {
        let conn = conn();
        let mut values = item("A-1", 1);
        values.insert("not_a_field".into(), "x".into());
        insert(&conn, &values, false).unwrap();
        assert!(snapshot(&conn).unwrap()[0].get("not_a_field").is_none());
    }

    #[test]
    fn decrement_fails_closed() {
        let conn = conn();
        insert(&conn, &item("A-1", 5), false).unwrap();
        assert_eq!(decrement_quantity(&conn, "A-1", 3).unwrap(), 2);
        let err = decrement_quantity(&conn, "A-1", 3).unwrap_err();
        assert_eq!(err.code(), codes::INSUFFICIENT_QUANTITY);
        assert_eq!(find_by_ids(&conn, &["A-1".into()]).unwrap()[0].quantity(), Some(2));
        assert_eq!(
            decrement_quantity(&conn, "A-1", -1).unwrap_err().code(),
            codes::NEGATIVE_AMOUNT
        );
        assert_eq!(
            decrement_quantity(&conn, "nope", 1).unwrap_err().code(),
            codes::RECORD_NOT_FOUND
        );
        assert_eq!(decrement_quantity(&conn, "A-1", 2).unwrap(), 0);
        assert_eq!(snapshot(&conn).unwrap().len(), 1);
    }

    #[test]
    fn update_validates_each_field() {
        let conn = conn();
        insert(&conn, &item("A-1", 5), false).unwrap();
        let mut change = FieldValues::new();
        change.insert("price".into(), "cheap".into());
        assert_eq!(
            update(&conn, "A-1", &change).unwrap_err().code(),
            codes::MALFORMED_VALUE
        );
        let mut change = FieldValues::new();
        change.insert("colour".into(), "red".into());
        assert_eq!(
            update(&conn, "A-1", &change).unwrap_err().code(),
            codes::FIELD_NOT_FOUND
        );
        let mut change = FieldValues::new();
        change.insert("quantity".into(), FieldValue::Int(9));
        change.insert("description".into(), "heavy".into());
        assert_eq!(update(&conn, "A-1", &change).unwrap(), "A-1");
        let record = &find_by_ids(&conn, &["A-1".into()]).unwrap()[0];
        assert_eq!(record.quantity(), Some(9));
        assert_eq!(record.get("description"), Some(&FieldValue::Text("heavy".into())));
    }

    #[test]
    fn find_by_ids_handles_empty_and_unknown() {
        let conn = conn();
        insert(&conn, &item("A-1", 1), false).unwrap();
        insert(&conn, &item("B-2", 1), false).unwrap();
        assert!(find_by_ids(&conn, &[]).unwrap().is_empty());
        let found = find_by_ids(&conn, &["B-2".into(), "zzz".into(), "B-2".into()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), Some("B-2"));
        assert_eq!(found[0], snapshot(&conn).unwrap()[1]);
    }

    #[test]
    fn search_matches_substrings_across_fields() {
        let conn = conn();
        insert(&conn, &item("A-1", 1), false).unwrap();
        let mut other = item("B-2", 1);
        other.insert("name".into(), "Hammer".into());
        other.insert("brand".into(), "100%_Tools".into());
        insert(&conn, &other, false).unwrap();

        let hits = search(&conn, &["name".into()], "anv").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id(), Some("A-1"));

        let hits = search(&conn, &["name".into(), "brand".into()], "%_").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id(), Some("B-2"));

        assert!(search(&conn, &[], "").unwrap().is_empty());
        assert_eq!(search(&conn, &["id".into()], "").unwrap().len(), 2);
        assert_eq!(
            search(&conn, &["colour".into()], "x").unwrap_err().code(),
            codes::FIELD_NOT_FOUND
        );
    }

    #[test]
    fn numeric_columns_are_searchable_as_text() {
        let conn = conn();
        insert(&conn, &item("A-1", 250), false).unwrap();
        assert_eq!(search(&conn, &["quantity".into()], "25").unwrap().len(), 1);
    }

    #[test]
    fn records_serialize_in_column_order() {
        let record = Record::new(vec![
            ("id".into(), "A-1".into()),
            ("quantity".into(), FieldValue::Int(2)),
            ("warranty".into(), FieldValue::Null),
        ]);
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"id":"A-1","quantity":2,"warranty":null}"#
        );
    }
}
