//! Declared per-collection schemas.
//!
//! A schema maps field names to column types. Every cached table has an
//! implicit `id TEXT PRIMARY KEY` column followed by the declared columns.
//! Records are checked against the schema before any SQL is issued.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::types::{Type, Value as SqlValue, ValueRef};
use serde_json::{Map, Value};

use crate::error::StorageError;

/// Name of the implicit primary-key column.
pub const ID_COLUMN: &str = "id";

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("identifier pattern is valid")
    })
}

/// Check that `name` is safe to splice into SQL as a table or column name.
pub fn validate_identifier(name: &str) -> Result<&str, StorageError> {
    if !identifier_pattern().is_match(name) || name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(StorageError::InvalidIdentifier(name.to_string()));
    }
    Ok(name)
}

/// Quote a validated identifier.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    /// Stored as INTEGER 0/1.
    Boolean,
    /// Any JSON value, stored as TEXT.
    Json,
}

impl ColumnType {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::Json => "TEXT",
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }

    /// Convert a JSON field into a bindable SQL value, or explain the mismatch.
    fn to_sql(self, value: &Value) -> Result<SqlValue, String> {
        match (self, value) {
            (_, Value::Null) => Ok(SqlValue::Null),
            (ColumnType::Text, Value::String(s)) => Ok(SqlValue::Text(s.clone())),
            (ColumnType::Integer, Value::Number(n)) => n
                .as_i64()
                .map(SqlValue::Integer)
                .ok_or_else(|| format!("expected integer, got {n}")),
            (ColumnType::Real, Value::Number(n)) => n
                .as_f64()
                .map(SqlValue::Real)
                .ok_or_else(|| format!("expected number, got {n}")),
            (ColumnType::Boolean, Value::Bool(b)) => Ok(SqlValue::Integer(i64::from(*b))),
            (ColumnType::Json, other) => serde_json::to_string(other)
                .map(SqlValue::Text)
                .map_err(|e| e.to_string()),
            (expected, other) => Err(format!(
                "expected {expected:?}, got {}",
                json_kind(other)
            )),
        }
    }

    /// Convert stored column `idx` back into JSON.
    fn from_sql(self, idx: usize, value: ValueRef<'_>) -> rusqlite::Result<Value> {
        match (self, value) {
            (ColumnType::Boolean, ValueRef::Integer(i)) => Ok(Value::Bool(i != 0)),
            (ColumnType::Json, ValueRef::Text(t)) => serde_json::from_slice(t).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            }),
            (_, other) => Ok(sql_to_json(other)),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Untyped SQL → JSON conversion used for passthrough queries.
pub(crate) fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(lossy(t)),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

/// JSON → SQL conversion for bind parameters.
pub(crate) fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Table layout for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    pub columns: BTreeMap<String, ColumnType>,
}

/// Start building a schema for `name`.
pub fn collection(name: impl Into<String>) -> SchemaBuilder {
    SchemaBuilder {
        name: name.into(),
        columns: Vec::new(),
    }
}

pub struct SchemaBuilder {
    name: String,
    columns: Vec<(String, ColumnType)>,
}

impl SchemaBuilder {
    pub fn column(mut self, field: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push((field.into(), ty));
        self
    }

    pub fn build(self) -> Result<CollectionSchema, StorageError> {
        validate_identifier(&self.name)?;
        let mut columns = BTreeMap::new();
        for (field, ty) in self.columns {
            validate_identifier(&field)?;
            if field.eq_ignore_ascii_case(ID_COLUMN) || columns.insert(field.clone(), ty).is_some() {
                return Err(StorageError::Schema {
                    table: self.name,
                    message: format!("duplicate column \"{field}\""),
                });
            }
        }
        Ok(CollectionSchema {
            name: self.name,
            columns,
        })
    }
}

impl CollectionSchema {
    /// Column names in bind order: `id` first, then declared fields.
    pub fn column_names(&self) -> Vec<&str> {
        std::iter::once(ID_COLUMN)
            .chain(self.columns.keys().map(String::as_str))
            .collect()
    }

    pub(crate) fn create_table_sql(&self) -> String {
        let mut defs = vec![format!("{} TEXT PRIMARY KEY NOT NULL", quote(ID_COLUMN))];
        defs.extend(
            self.columns
                .iter()
                .map(|(name, ty)| format!("{} {}", quote(name), ty.sql_type())),
        );
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(&self.name),
            defs.join(", ")
        )
    }

    fn mismatch(&self, message: String) -> StorageError {
        StorageError::Schema {
            table: self.name.clone(),
            message,
        }
    }

    /// Project a record onto the table's columns.
    ///
    /// The record must be an object with a non-empty string (or integer) `id`.
    /// Missing fields become NULL; fields not in the schema are ignored.
    pub fn project(&self, record: &Value) -> Result<Vec<SqlValue>, StorageError> {
        let obj = record
            .as_object()
            .ok_or_else(|| self.mismatch(format!("record must be an object, got {}", json_kind(record))))?;

        let id = match obj.get(ID_COLUMN) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
            Some(other) => {
                return Err(self.mismatch(format!("invalid id: {}", json_kind(other))));
            }
            None => return Err(self.mismatch("record has no id".into())),
        };

        let mut row = Vec::with_capacity(1 + self.columns.len());
        row.push(SqlValue::Text(id.clone()));
        for (field, ty) in &self.columns {
            let value = obj.get(field).unwrap_or(&Value::Null);
            let sql = ty
                .to_sql(value)
                .map_err(|e| self.mismatch(format!("record {id}, field \"{field}\": {e}")))?;
            row.push(sql);
        }
        Ok(row)
    }

    /// Rebuild a JSON object from a row read in [`column_names`](Self::column_names) order.
    pub(crate) fn decode_row(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
        let mut obj = Map::new();
        obj.insert(ID_COLUMN.to_string(), sql_to_json(row.get_ref(0)?));
        for (i, (field, ty)) in self.columns.iter().enumerate() {
            let idx = i + 1;
            obj.insert(field.clone(), ty.from_sql(idx, row.get_ref(idx)?)?);
        }
        Ok(Value::Object(obj))
    }
}
