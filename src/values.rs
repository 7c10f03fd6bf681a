use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::codes;
use crate::{AppError, AppResult};

/// How a field is entered by the user. Image fields have no column in the
/// records table; their payloads live in the attachment table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputClass {
    #[serde(rename = "small_box")]
    Small,
    #[serde(rename = "large_box")]
    Large,
    #[serde(rename = "image_box")]
    Image,
}

impl InputClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputClass::Small => "small_box",
            InputClass::Large => "large_box",
            InputClass::Image => "image_box",
        }
    }

    pub fn has_column(&self) -> bool {
        !matches!(self, InputClass::Image)
    }
}

impl FromStr for InputClass {
    type Err = AppError;

    fn from_str(value: &str) -> AppResult<Self> {
        match value {
            "small_box" | "small" => Ok(InputClass::Small),
            "large_box" | "large" => Ok(InputClass::Large),
            "image_box" | "image" => Ok(InputClass::Image),
            other => Err(
                AppError::new(codes::MALFORMED_VALUE, "Unknown input class")
                    .with_context("input_class", other.to_string()),
            ),
        }
    }
}

/// Declared type of a field; drives both the column type and input coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Int,
    Float,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Int => "int",
            ValueType::Float => "float",
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            ValueType::String => "TEXT",
            ValueType::Int => "INTEGER",
            ValueType::Float => "REAL",
        }
    }

    /// Convert user input into the representation stored for this type.
    pub fn coerce(&self, value: FieldValue) -> AppResult<FieldValue> {
        let malformed = |raw: String| {
            AppError::new(
                codes::MALFORMED_VALUE,
                format!("Value is not a valid {}", self.as_str()),
            )
            .with_context("value", raw)
        };
        match (self, value) {
            (_, FieldValue::Null) => Ok(FieldValue::Null),
            (ValueType::String, FieldValue::Text(s)) => Ok(FieldValue::Text(s)),
            (ValueType::String, FieldValue::Int(i)) => Ok(FieldValue::Text(i.to_string())),
            (ValueType::String, FieldValue::Float(f)) => Ok(FieldValue::Text(f.to_string())),
            (ValueType::Int, FieldValue::Int(i)) => Ok(FieldValue::Int(i)),
            (ValueType::Int, FieldValue::Float(f)) => {
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(FieldValue::Int(f as i64))
                } else {
                    Err(malformed(f.to_string()))
                }
            }
            (ValueType::Int, FieldValue::Text(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(FieldValue::Null);
                }
                trimmed
                    .parse::<i64>()
                    .map(FieldValue::Int)
                    .map_err(|_| malformed(s))
            }
            (ValueType::Float, FieldValue::Float(f)) if f.is_finite() => Ok(FieldValue::Float(f)),
            (ValueType::Float, FieldValue::Float(f)) => Err(malformed(f.to_string())),
            (ValueType::Float, FieldValue::Int(i)) => Ok(FieldValue::Float(i as f64)),
            (ValueType::Float, FieldValue::Text(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(FieldValue::Null);
                }
                match trimmed.parse::<f64>() {
                    Ok(f) if f.is_finite() => Ok(FieldValue::Float(f)),
                    _ => Err(malformed(s)),
                }
            }
        }
    }
}

impl FromStr for ValueType {
    type Err = AppError;

    fn from_str(value: &str) -> AppResult<Self> {
        match value {
            "string" => Ok(ValueType::String),
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            // The field table CHECK constraint makes this unreachable for
            // rows written by this crate.
            other => Err(
                AppError::new(codes::UNMAPPED_TYPE, "Unknown value type")
                    .with_context("value_type", other.to_string()),
            ),
        }
    }
}

/// A single cell of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Empty means NULL or blank text; zero is a value.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            FieldValue::Int(i) => ToSqlOutput::from(*i),
            FieldValue::Float(f) => ToSqlOutput::from(*f),
            FieldValue::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for FieldValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(FieldValue::Null),
            ValueRef::Integer(i) => Ok(FieldValue::Int(i)),
            ValueRef::Real(f) => Ok(FieldValue::Float(f)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| FieldValue::Text(s.to_string()))
                .map_err(|err| FromSqlError::Other(Box::new(err))),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_fields_parse_trimmed_text() {
        assert_eq!(
            ValueType::Int.coerce(" 12 ".into()).unwrap(),
            FieldValue::Int(12)
        );
        assert_eq!(
            ValueType::Int.coerce("".into()).unwrap(),
            FieldValue::Null
        );
        let err = ValueType::Int.coerce("twelve".into()).unwrap_err();
        assert_eq!(err.code(), codes::MALFORMED_VALUE);
        assert!(ValueType::Int.coerce(FieldValue::Float(1.5)).is_err());
        assert_eq!(
            ValueType::Int.coerce(FieldValue::Float(3.0)).unwrap(),
            FieldValue::Int(3)
        );
    }

    #[test]
    fn float_fields_widen_ints_and_reject_nan() {
        assert_eq!(
            ValueType::Float.coerce(FieldValue::Int(2)).unwrap(),
            FieldValue::Float(2.0)
        );
        assert_eq!(
            ValueType::Float.coerce("9.99".into()).unwrap(),
            FieldValue::Float(9.99)
        );
        assert!(ValueType::Float.coerce("NaN".into()).is_err());
        assert!(ValueType::Float.coerce(FieldValue::Float(f64::INFINITY)).is_err());
    }

    #[test]
    fn string_fields_render_numbers() {
        assert_eq!(
            ValueType::String.coerce(FieldValue::Int(7)).unwrap(),
            FieldValue::Text("7".into())
        );
    }

    #[test]
    fn emptiness_treats_zero_as_a_value() {
        assert!(FieldValue::Null.is_empty());
        assert!(FieldValue::Text("  ".into()).is_empty());
        assert!(!FieldValue::Int(0).is_empty());
    }

    #[test]
    fn serde_is_untagged() {
        let values: Vec<FieldValue> = serde_json::from_str(r#"[null, 1, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                FieldValue::Null,
                FieldValue::Int(1),
                FieldValue::Float(2.5),
                FieldValue::Text("x".into())
            ]
        );
    }

    #[test]
    fn persisted_names_match_field_table_checks() {
        assert_eq!(InputClass::Large.as_str(), "large_box");
        assert_eq!("image_box".parse::<InputClass>().unwrap(), InputClass::Image);
        assert_eq!("float".parse::<ValueType>().unwrap(), ValueType::Float);
        let err = "decimal".parse::<ValueType>().unwrap_err();
        assert_eq!(err.code(), codes::UNMAPPED_TYPE);
    }
}
