use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use rusqlite::Error as SqliteError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;

/// A structured error that can be serialized and handed to whatever front end
/// drives the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the user.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;
pub type Result<T> = AppResult<T>;

/// Coarse classification of error codes, used by callers that need to decide
/// whether to show a message, retry, or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad input; nothing was written.
    Validation,
    /// Unknown record id or field name.
    NotFound,
    /// The request is well formed but the current state forbids it.
    Conflict,
    /// Field metadata and the physical table disagree.
    SyncConflict,
    /// The storage engine or the filesystem failed.
    Storage,
    /// A bug in the caller or in this crate.
    Programmer,
    Unknown,
}

pub mod codes {
    pub const MISSING_FIELD: &str = "VALIDATION/MISSING_FIELD";
    pub const EMPTY_REQUIRED: &str = "VALIDATION/EMPTY_REQUIRED";
    pub const MALFORMED_VALUE: &str = "VALIDATION/MALFORMED_VALUE";
    pub const INVALID_IDENTIFIER: &str = "VALIDATION/INVALID_IDENTIFIER";
    pub const DUPLICATE_ID: &str = "VALIDATION/DUPLICATE_ID";
    pub const NEGATIVE_AMOUNT: &str = "VALIDATION/NEGATIVE_AMOUNT";
    pub const INVALID_CREDENTIALS: &str = "VALIDATION/INVALID_CREDENTIALS";
    pub const FIELD_EXISTS: &str = "FIELDS/EXISTS";
    pub const FIELD_NOT_FOUND: &str = "FIELDS/NOT_FOUND";
    pub const FIELD_BUILT_IN: &str = "FIELDS/BUILT_IN";
    pub const RECORD_NOT_FOUND: &str = "RECORDS/NOT_FOUND";
    pub const INSUFFICIENT_QUANTITY: &str = "RECORDS/INSUFFICIENT_QUANTITY";
    pub const SYNC_CONFLICT: &str = "SCHEMA/SYNC_CONFLICT";
    pub const UNMAPPED_TYPE: &str = "SCHEMA/UNMAPPED_TYPE";
    pub const FOREIGN_KEYS_ENABLED: &str = "SCHEMA/FOREIGN_KEYS_ENABLED";
    pub const DB_LOCKED: &str = "DB/LOCKED";
}

impl AppError {
    /// Default code used when an upstream error does not expose a specific code.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";
    /// Code used for errors created from free-form messages.
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";

    /// Construct a new application error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    /// Returns the error code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the contextual metadata associated with the error.
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// Returns the nested cause if one is present.
    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    pub fn class(&self) -> ErrorClass {
        let code = self.code.as_str();
        match code {
            codes::FIELD_NOT_FOUND | codes::RECORD_NOT_FOUND => ErrorClass::NotFound,
            codes::FIELD_EXISTS | codes::FIELD_BUILT_IN | codes::INSUFFICIENT_QUANTITY => {
                ErrorClass::Conflict
            }
            codes::SYNC_CONFLICT => ErrorClass::SyncConflict,
            codes::UNMAPPED_TYPE | codes::FOREIGN_KEYS_ENABLED => ErrorClass::Programmer,
            _ if code.starts_with("VALIDATION/") => ErrorClass::Validation,
            _ if code.starts_with("Sqlite/")
                || code.starts_with("SQLITE/")
                || code.starts_with("IO/")
                || code.starts_with("DB/")
                || code.starts_with("DB_REBUILD/")
                || code.starts_with("DB_SWAP/") =>
            {
                ErrorClass::Storage
            }
            _ => ErrorClass::Unknown,
        }
    }

}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            let mut pairs: Vec<_> = self.context.iter().collect();
            pairs.sort();
            write!(f, "[{}] {} ({:?})", self.code, self.message, pairs)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else if error.is_io() {
            "JSON/IO"
        } else {
            "JSON/ERROR"
        };

        let mut app_error = AppError::new(code, error.to_string());
        let line = error.line();
        if line > 0 {
            app_error = app_error.with_context("line", line.to_string());
        }
        let column = error.column();
        if column > 0 {
            app_error = app_error.with_context("column", column.to_string());
        }
        app_error
    }
}

impl From<SqliteError> for AppError {
    fn from(error: SqliteError) -> Self {
        match error {
            SqliteError::QueryReturnedNoRows => {
                AppError::new("SQLITE/ROW_NOT_FOUND", "Record not found")
            }
            SqliteError::InvalidColumnName(name) => {
                AppError::new("SQLITE/COLUMN_NOT_FOUND", format!("Column not found: {name}"))
            }
            SqliteError::FromSqlConversionFailure(index, ty, source) => {
                AppError::new("SQLITE/COLUMN_DECODE", source.to_string())
                    .with_context("column_index", index.to_string())
                    .with_context("column_type", ty.to_string())
            }
            SqliteError::SqliteFailure(failure, message) => {
                let code = format!("Sqlite/{:?}", failure.code);
                let message = message.unwrap_or_else(|| failure.to_string());
                AppError::new(code, message)
                    .with_context("extended_code", failure.extended_code.to_string())
            }
            other => AppError::new("SQLITE/ERROR", other.to_string()),
        }
    }
}

/// True when the engine rejected a write because of a `UNIQUE` constraint.
pub fn is_unique_violation(error: &SqliteError) -> bool {
    matches!(
        error,
        SqliteError::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// True when the engine rejected a write because a referenced row is missing.
pub fn is_foreign_key_violation(error: &SqliteError) -> bool {
    matches!(
        error,
        SqliteError::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}
