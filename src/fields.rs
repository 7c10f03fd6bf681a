//! Field metadata: one row per user-visible inventory attribute.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::FIELDS_TABLE;
use crate::error::codes;
use crate::identifier;
use crate::values::{InputClass, ValueType};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub input_class: InputClass,
    pub value_type: ValueType,
    pub required: bool,
}

impl FieldDefinition {
    /// An optional single-line field.
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            input_class: InputClass::Small,
            value_type,
            required: false,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn input(mut self, input_class: InputClass) -> Self {
        self.input_class = input_class;
        self
    }

    pub fn has_column(&self) -> bool {
        self.input_class.has_column()
    }
}

pub const ID_FIELD: &str = "id";
pub const QUANTITY_FIELD: &str = "quantity";

/// Seeded once when the store is created; never removable.
pub const BUILT_IN_FIELDS: &[(&str, InputClass, ValueType, bool)] = &[
    (ID_FIELD, InputClass::Small, ValueType::String, true),
    ("name", InputClass::Small, ValueType::String, true),
    (QUANTITY_FIELD, InputClass::Small, ValueType::Int, true),
    ("price", InputClass::Small, ValueType::Float, true),
    ("category", InputClass::Small, ValueType::String, true),
    ("brand", InputClass::Small, ValueType::String, true),
    ("description", InputClass::Large, ValueType::String, false),
];

pub fn built_in_definitions() -> Vec<FieldDefinition> {
    BUILT_IN_FIELDS
        .iter()
        .map(|(name, input_class, value_type, required)| FieldDefinition {
            name: (*name).to_string(),
            input_class: *input_class,
            value_type: *value_type,
            required: *required,
        })
        .collect()
}

pub fn is_built_in(name: &str) -> bool {
    BUILT_IN_FIELDS.iter().any(|(n, ..)| *n == name)
}

/// Create the field table and seed the built-in fields. Safe to call on every
/// open.
pub fn ensure_fields_table(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {FIELDS_TABLE} (
            field_name TEXT PRIMARY KEY,
            entry_type TEXT NOT NULL CHECK(entry_type IN ('small_box', 'large_box', 'image_box')),
            validation_type TEXT NOT NULL CHECK(validation_type IN ('string', 'int', 'float')),
            required INTEGER NOT NULL CHECK(required IN (0, 1))
        )"
    ))
    .map_err(|err| AppError::from(err).with_context("operation", "create_fields_table"))?;

    let mut stmt = conn
        .prepare(&format!(
            "INSERT OR IGNORE INTO {FIELDS_TABLE} (field_name, entry_type, validation_type, required)
             VALUES (?1, ?2, ?3, ?4)"
        ))
        .map_err(|err| AppError::from(err).with_context("operation", "seed_fields"))?;
    for def in built_in_definitions() {
        stmt.execute(params![
            def.name,
            def.input_class.as_str(),
            def.value_type.as_str(),
            def.required
        ])
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "seed_fields")
                .with_context("field", def.name.clone())
        })?;
    }
    Ok(())
}

fn definition_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, bool)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_definition(raw: (String, String, String, bool)) -> AppResult<FieldDefinition> {
    let (name, entry_type, validation_type, required) = raw;
    let input_class = entry_type
        .parse::<InputClass>()
        .map_err(|err| err.with_context("field", name.clone()))?;
    let value_type = validation_type
        .parse::<ValueType>()
        .map_err(|err| err.with_context("field", name.clone()))?;
    Ok(FieldDefinition {
        name,
        input_class,
        value_type,
        required,
    })
}

/// Record a new field. Fails with `FIELDS/EXISTS` when the name is taken
/// (exact, case-sensitive match).
pub fn define_field(conn: &Connection, def: &FieldDefinition) -> AppResult<()> {
    identifier::validate(&def.name)
        .map_err(|err| AppError::from(err).with_context("name", def.name.clone()))?;

    if get_field(conn, &def.name)?.is_some() {
        return Err(
            AppError::new(codes::FIELD_EXISTS, "A field with this name already exists")
                .with_context("field", def.name.clone()),
        );
    }

    conn.execute(
        &format!(
            "INSERT INTO {FIELDS_TABLE} (field_name, entry_type, validation_type, required)
             VALUES (?1, ?2, ?3, ?4)"
        ),
        params![
            def.name,
            def.input_class.as_str(),
            def.value_type.as_str(),
            def.required
        ],
    )
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "define_field")
            .with_context("field", def.name.clone())
    })?;
    Ok(())
}

/// Forget a field definition. Built-in fields are refused with
/// `FIELDS/BUILT_IN`. The records table is left alone; see
/// [`crate::schema::remove_column`].
pub fn undefine_field(conn: &Connection, name: &str) -> AppResult<()> {
    if is_built_in(name) {
        return Err(
            AppError::new(codes::FIELD_BUILT_IN, "Built-in fields cannot be removed")
                .with_context("field", name.to_string()),
        );
    }
    let removed = conn
        .execute(
            &format!("DELETE FROM {FIELDS_TABLE} WHERE field_name = ?1"),
            [name],
        )
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "undefine_field")
                .with_context("field", name.to_string())
        })?;
    if removed == 0 {
        return Err(field_not_found(name));
    }
    Ok(())
}

pub fn list_fields(conn: &Connection) -> AppResult<Vec<FieldDefinition>> {
    let map_err = |err: rusqlite::Error| AppError::from(err).with_context("operation", "list_fields");
    let mut stmt = conn
        .prepare(&format!(
            "SELECT field_name, entry_type, validation_type, required FROM {FIELDS_TABLE} ORDER BY rowid"
        ))
        .map_err(map_err)?;
    let raw = stmt
        .query_map([], definition_from_row)
        .map_err(map_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_err)?;
    raw.into_iter().map(into_definition).collect()
}

pub fn get_field(conn: &Connection, name: &str) -> AppResult<Option<FieldDefinition>> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT field_name, entry_type, validation_type, required FROM {FIELDS_TABLE}
                 WHERE field_name = ?1"
            ),
            [name],
            definition_from_row,
        )
        .optional()
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "get_field")
                .with_context("field", name.to_string())
        })?;
    raw.map(into_definition).transpose()
}

/// Drop every custom definition, keeping the built-ins.
pub fn delete_custom_fields(conn: &Connection) -> AppResult<usize> {
    let placeholders = vec!["?"; BUILT_IN_FIELDS.len()].join(", ");
    let names: Vec<&str> = BUILT_IN_FIELDS.iter().map(|(n, ..)| *n).collect();
    conn.execute(
        &format!("DELETE FROM {FIELDS_TABLE} WHERE field_name NOT IN ({placeholders})"),
        rusqlite::params_from_iter(names),
    )
    .map_err(|err| AppError::from(err).with_context("operation", "delete_custom_fields"))
}

pub(crate) fn field_not_found(name: &str) -> AppError {
    AppError::new(codes::FIELD_NOT_FOUND, "No field with this name")
        .with_context("field", name.to_string())
}
