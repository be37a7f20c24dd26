//! Row hydration: driver rows into plain [`Record`]s.
//!
//! Each column is first classified into a [`TypeCategory`] from its declared type
//! name, then decoded by trying the Rust types that category allows, falling back to
//! text and then to numeric decodes when the declared type is unhelpful.

use crate::models::{DatabaseType, Record};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Temporal,
    Binary,
    Json,
    Uuid,
    Text,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal first: "numeric" would otherwise read as a float
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity is really a float
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("timestamp") || lower.contains("date") || lower == "time" {
        return TypeCategory::Temporal;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    TypeCategory::Text
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC text, preserving the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Generic Decoders
// =============================================================================

/// Decode column `idx` as `T`, mapping the value with `f`.
///
/// `None` means the column is not compatible with `T`; SQL NULL is `Some(Null)`.
fn decode_as<'r, R, T, F>(row: &'r R, idx: usize, f: F) -> Option<JsonValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
    F: FnOnce(T) -> JsonValue,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(Some(v)) => Some(f(v)),
        Ok(None) => Some(JsonValue::Null),
        Err(_) => None,
    }
}

fn scalar<'r, R, T>(row: &'r R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database> + Into<JsonValue>,
{
    decode_as::<R, T, _>(row, idx, |v: T| v.into())
}

fn binary<'r, R>(row: &'r R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    decode_as::<R, Vec<u8>, _>(row, idx, |bytes| JsonValue::String(STANDARD.encode(bytes)))
}

fn temporal<'r, R>(row: &'r R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    chrono::DateTime<chrono::Utc>: Decode<'r, R::Database> + Type<R::Database>,
    chrono::NaiveDateTime: Decode<'r, R::Database> + Type<R::Database>,
    chrono::NaiveDate: Decode<'r, R::Database> + Type<R::Database>,
    chrono::NaiveTime: Decode<'r, R::Database> + Type<R::Database>,
{
    decode_as::<R, chrono::DateTime<chrono::Utc>, _>(row, idx, |v| {
        JsonValue::String(v.to_rfc3339())
    })
    .or_else(|| decode_as::<R, chrono::NaiveDateTime, _>(row, idx, |v| JsonValue::String(v.to_string())))
    .or_else(|| decode_as::<R, chrono::NaiveDate, _>(row, idx, |v| JsonValue::String(v.to_string())))
    .or_else(|| decode_as::<R, chrono::NaiveTime, _>(row, idx, |v| JsonValue::String(v.to_string())))
}

/// Last resort when the declared type gave nothing usable.
fn fallback<'r, R>(row: &'r R, idx: usize) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
{
    scalar::<R, String>(row, idx)
        .or_else(|| scalar::<R, i64>(row, idx))
        .or_else(|| scalar::<R, f64>(row, idx))
        .unwrap_or(JsonValue::Null)
}

// =============================================================================
// Row to Record
// =============================================================================

/// Converts a driver row into a [`Record`].
pub trait ToRecord {
    fn to_record(&self) -> Record;
}

macro_rules! impl_to_record {
    ($row:ty, $db:expr, $decode:path) => {
        impl ToRecord for $row {
            fn to_record(&self) -> Record {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let category = categorize_type(col.type_info().name(), $db);
                        (col.name().to_string(), $decode(self, idx, category))
                    })
                    .collect()
            }
        }
    };
}

impl_to_record!(MySqlRow, DatabaseType::MySQL, mysql::decode_column);
impl_to_record!(PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
impl_to_record!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        let decoded = match category {
            TypeCategory::Integer => {
                scalar::<_, i64>(row, idx).or_else(|| scalar::<_, u64>(row, idx))
            }
            TypeCategory::Float => {
                scalar::<_, f64>(row, idx).or_else(|| scalar::<_, f32>(row, idx))
            }
            TypeCategory::Decimal => {
                decode_as::<_, RawDecimal, _>(row, idx, |v| JsonValue::String(v.0))
            }
            // TINYINT(1) reports as BOOLEAN
            TypeCategory::Boolean => {
                scalar::<_, bool>(row, idx).or_else(|| scalar::<_, i64>(row, idx))
            }
            TypeCategory::Temporal => temporal(row, idx),
            TypeCategory::Binary => binary(row, idx),
            TypeCategory::Json => scalar::<_, JsonValue>(row, idx),
            TypeCategory::Uuid | TypeCategory::Text => None,
        };
        decoded.unwrap_or_else(|| fallback(row, idx))
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        let decoded = match category {
            TypeCategory::Integer => scalar::<_, i64>(row, idx)
                .or_else(|| scalar::<_, i32>(row, idx))
                .or_else(|| scalar::<_, i16>(row, idx)),
            TypeCategory::Float => {
                scalar::<_, f64>(row, idx).or_else(|| scalar::<_, f32>(row, idx))
            }
            TypeCategory::Decimal => {
                decode_as::<_, RawDecimal, _>(row, idx, |v| JsonValue::String(v.0))
            }
            TypeCategory::Boolean => scalar::<_, bool>(row, idx),
            TypeCategory::Temporal => temporal(row, idx),
            TypeCategory::Binary => binary(row, idx),
            TypeCategory::Json => scalar::<_, JsonValue>(row, idx),
            TypeCategory::Uuid => {
                decode_as::<_, uuid::Uuid, _>(row, idx, |v| JsonValue::String(v.to_string()))
            }
            TypeCategory::Text => None,
        };
        decoded.unwrap_or_else(|| fallback(row, idx))
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        let decoded = match category {
            TypeCategory::Integer => scalar::<_, i64>(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => scalar::<_, f64>(row, idx),
            TypeCategory::Boolean => scalar::<_, bool>(row, idx),
            TypeCategory::Binary => binary(row, idx),
            // Stored as text; parse when it holds JSON
            TypeCategory::Json => scalar::<_, String>(row, idx).map(|v| match v {
                JsonValue::String(s) => serde_json::from_str(&s).unwrap_or(JsonValue::String(s)),
                other => other,
            }),
            TypeCategory::Temporal | TypeCategory::Uuid | TypeCategory::Text => None,
        };
        decoded.unwrap_or_else(|| fallback(row, idx))
    }
}
