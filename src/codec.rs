//! Conversion between Rust scalar values and their SQLite wire representation.
//!
//! Every supported field type maps to one [`ScalarKind`]. Values travel
//! between entities and statements as a [`Value`]; binding and decoding are
//! exhaustive matches over those two closed enums.
//!
//! SQLite has no native UUID or temporal types, so those are stored as text:
//! UUIDs hyphenated, naive timestamps as `YYYY-MM-DD HH:MM:SS[.fff]`, UTC
//! instants as RFC 3339, dates as `YYYY-MM-DD` and times as `HH:MM:SS[.fff]`.
//! Booleans are stored as `0`/`1`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Column, Row};
use std::fmt;
use uuid::Uuid;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATETIME_T_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// The declared scalar type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Bounded string, rendered as `VARCHAR(length)`
    String,
    /// Unbounded string, rendered as `TEXT`
    Text,
    /// 32-bit integer
    Integer,
    /// 64-bit integer
    Long,
    Boolean,
    Double,
    Float,
    Bytes,
    Uuid,
    /// Timestamp without time zone
    DateTime,
    /// Timestamp in UTC
    Instant,
    Date,
    Time,
}

impl ScalarKind {
    /// Returns `true` for kinds that can hold a database-assigned row id.
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Integer | Self::Long)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Boolean => "boolean",
            Self::Double => "double",
            Self::Float => "float",
            Self::Bytes => "bytes",
            Self::Uuid => "uuid",
            Self::DateTime => "datetime",
            Self::Instant => "instant",
            Self::Date => "date",
            Self::Time => "time",
        };
        f.write_str(name)
    }
}

/// A single column value on its way into or out of the database.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Int(i32),
    BigInt(i64),
    Bool(bool),
    Double(f64),
    Float(f32),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(NaiveDateTime),
    Instant(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Bool(_) => "bool",
            Self::Double(_) => "double",
            Self::Float(_) => "float",
            Self::Bytes(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::DateTime(_) => "datetime",
            Self::Instant(_) => "instant",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
        }
    }
}

/// Failure to convert a value between its Rust and SQL forms.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("expected a {expected} value, found {found}")]
    TypeMismatch {
        expected: ScalarKind,
        found: &'static str,
    },

    #[error("value {value} is out of range for {expected}")]
    OutOfRange { expected: ScalarKind, value: i64 },

    #[error("cannot parse `{input}` as {expected}: {reason}")]
    Parse {
        expected: ScalarKind,
        input: String,
        reason: String,
    },

    #[error("null value for non-nullable {expected} field")]
    UnexpectedNull { expected: ScalarKind },

    #[error("cannot read column `{column}`: {source}")]
    Column {
        column: String,
        #[source]
        source: sqlx::Error,
    },
}

impl ConversionError {
    fn mismatch(expected: ScalarKind, found: &Value) -> Self {
        match found {
            Value::Null => Self::UnexpectedNull { expected },
            other => Self::TypeMismatch {
                expected,
                found: other.variant_name(),
            },
        }
    }

    fn parse(expected: ScalarKind, input: &str, reason: impl fmt::Display) -> Self {
        Self::Parse {
            expected,
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A Rust type that can be stored in a mapped column.
///
/// Implemented for the supported scalar types and for `Option` of any of
/// them; `None` is stored as SQL `NULL`.
pub trait Scalar: Sized + Send + 'static {
    const KIND: ScalarKind;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Result<Self, ConversionError>;
}

impl Scalar for String {
    const KIND: ScalarKind = ScalarKind::String;

    fn into_value(self) -> Value {
        Value::Text(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Text(v) => Ok(v),
            Value::Uuid(v) => Ok(v.to_string()),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl Scalar for i32 {
    const KIND: ScalarKind = ScalarKind::Integer;

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Int(v) => Ok(v),
            Value::BigInt(v) => narrow(v),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl Scalar for i64 {
    const KIND: ScalarKind = ScalarKind::Long;

    fn into_value(self) -> Value {
        Value::BigInt(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::BigInt(v) => Ok(v),
            Value::Int(v) => Ok(i64::from(v)),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl Scalar for bool {
    const KIND: ScalarKind = ScalarKind::Boolean;

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Int(v) => Ok(v != 0),
            Value::BigInt(v) => Ok(v != 0),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl Scalar for f64 {
    const KIND: ScalarKind = ScalarKind::Double;

    fn into_value(self) -> Value {
        Value::Double(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Double(v) => Ok(v),
            Value::Float(v) => Ok(f64::from(v)),
            Value::Int(v) => Ok(f64::from(v)),
            Value::BigInt(v) => Ok(v as f64),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl Scalar for f32 {
    const KIND: ScalarKind = ScalarKind::Float;

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Double(v) => Ok(v as f32),
            Value::Int(v) => Ok(v as f32),
            Value::BigInt(v) => Ok(v as f32),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl Scalar for Vec<u8> {
    const KIND: ScalarKind = ScalarKind::Bytes;

    fn into_value(self) -> Value {
        Value::Bytes(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bytes(v) => Ok(v),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl Scalar for Uuid {
    const KIND: ScalarKind = ScalarKind::Uuid;

    fn into_value(self) -> Value {
        Value::Uuid(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Uuid(v) => Ok(v),
            Value::Text(s) => parse_uuid(&s),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl Scalar for NaiveDateTime {
    const KIND: ScalarKind = ScalarKind::DateTime;

    fn into_value(self) -> Value {
        Value::DateTime(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::DateTime(v) => Ok(v),
            Value::Instant(v) => Ok(v.naive_utc()),
            Value::Text(s) => parse_datetime(&s),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl Scalar for DateTime<Utc> {
    const KIND: ScalarKind = ScalarKind::Instant;

    fn into_value(self) -> Value {
        Value::Instant(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Instant(v) => Ok(v),
            Value::DateTime(v) => Ok(v.and_utc()),
            Value::Text(s) => parse_instant(&s),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl Scalar for NaiveDate {
    const KIND: ScalarKind = ScalarKind::Date;

    fn into_value(self) -> Value {
        Value::Date(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Date(v) => Ok(v),
            Value::Text(s) => NaiveDate::parse_from_str(&s, DATE_FORMAT)
                .map_err(|e| ConversionError::parse(Self::KIND, &s, e)),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl Scalar for NaiveTime {
    const KIND: ScalarKind = ScalarKind::Time;

    fn into_value(self) -> Value {
        Value::Time(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Time(v) => Ok(v),
            Value::Text(s) => NaiveTime::parse_from_str(&s, TIME_FORMAT)
                .map_err(|e| ConversionError::parse(Self::KIND, &s, e)),
            other => Err(ConversionError::mismatch(Self::KIND, &other)),
        }
    }
}

impl<T: Scalar> Scalar for Option<T> {
    const KIND: ScalarKind = T::KIND;

    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

fn narrow(value: i64) -> Result<i32, ConversionError> {
    i32::try_from(value).map_err(|_| ConversionError::OutOfRange {
        expected: ScalarKind::Integer,
        value,
    })
}

fn parse_uuid(input: &str) -> Result<Uuid, ConversionError> {
    Uuid::parse_str(input).map_err(|e| ConversionError::parse(ScalarKind::Uuid, input, e))
}

fn parse_datetime(input: &str) -> Result<NaiveDateTime, ConversionError> {
    NaiveDateTime::parse_from_str(input, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(input, DATETIME_T_FORMAT))
        .map_err(|e| ConversionError::parse(ScalarKind::DateTime, input, e))
}

fn parse_instant(input: &str) -> Result<DateTime<Utc>, ConversionError> {
    DateTime::parse_from_rfc3339(input)
        .map(|v| v.with_timezone(&Utc))
        .or_else(|_| parse_datetime(input).map(|v| v.and_utc()))
        .map_err(|e| ConversionError::parse(ScalarKind::Instant, input, e))
}

/// Appends `value` to the statement's arguments in its wire representation.
pub(crate) fn bind<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Text(v) => query.bind(v),
        Value::Int(v) => query.bind(v),
        Value::BigInt(v) => query.bind(v),
        Value::Bool(v) => query.bind(v),
        Value::Double(v) => query.bind(v),
        Value::Float(v) => query.bind(v),
        Value::Bytes(v) => query.bind(v),
        Value::Uuid(v) => query.bind(v.hyphenated().to_string()),
        Value::DateTime(v) => query.bind(v.format(DATETIME_FORMAT).to_string()),
        Value::Instant(v) => query.bind(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Date(v) => query.bind(v.format(DATE_FORMAT).to_string()),
        Value::Time(v) => query.bind(v.format(TIME_FORMAT).to_string()),
    }
}

/// Reads the named column of `row` as a value of `kind`.
///
/// SQL `NULL` comes back as [`Value::Null`] regardless of the kind.
pub(crate) fn decode(
    row: &SqliteRow,
    column: &str,
    kind: ScalarKind,
) -> Result<Value, ConversionError> {
    let value = match kind {
        ScalarKind::String | ScalarKind::Text => read::<String>(row, column)?.map(Value::Text),
        ScalarKind::Integer => match read::<i64>(row, column)? {
            Some(v) => Some(Value::Int(narrow(v)?)),
            None => None,
        },
        ScalarKind::Long => read::<i64>(row, column)?.map(Value::BigInt),
        ScalarKind::Boolean => read::<i64>(row, column)?.map(|v| Value::Bool(v != 0)),
        ScalarKind::Double => read::<f64>(row, column)?.map(Value::Double),
        ScalarKind::Float => read::<f64>(row, column)?.map(|v| Value::Float(v as f32)),
        ScalarKind::Bytes => read::<Vec<u8>>(row, column)?.map(Value::Bytes),
        ScalarKind::Uuid => match read::<String>(row, column)? {
            Some(s) => Some(Value::Uuid(parse_uuid(&s)?)),
            None => None,
        },
        ScalarKind::DateTime => match read::<String>(row, column)? {
            Some(s) => Some(Value::DateTime(parse_datetime(&s)?)),
            None => None,
        },
        ScalarKind::Instant => match read::<String>(row, column)? {
            Some(s) => Some(Value::Instant(parse_instant(&s)?)),
            None => None,
        },
        ScalarKind::Date => match read::<String>(row, column)? {
            Some(s) => Some(Value::Date(NaiveDate::from_value(Value::Text(s))?)),
            None => None,
        },
        ScalarKind::Time => match read::<String>(row, column)? {
            Some(s) => Some(Value::Time(NaiveTime::from_value(Value::Text(s))?)),
            None => None,
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

fn read<T>(row: &SqliteRow, column: &str) -> Result<Option<T>, ConversionError>
where
    for<'r> T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    let fail = |source| ConversionError::Column {
        column: column.to_string(),
        source,
    };
    let index = column_index(row, column)
        .ok_or_else(|| fail(sqlx::Error::ColumnNotFound(column.to_string())))?;
    row.try_get::<Option<T>, _>(index).map_err(fail)
}

/// SQLite identifiers are case-insensitive; rows keep the declared spelling.
fn column_index(row: &SqliteRow, column: &str) -> Option<usize> {
    let columns = row.columns();
    columns
        .iter()
        .position(|c| c.name() == column)
        .or_else(|| columns.iter().position(|c| c.name().eq_ignore_ascii_case(column)))
}
