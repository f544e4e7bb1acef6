//! Typed parameter values and their binding to sqlx queries.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use std::cmp::Ordering;
use std::fmt;

/// A value already coerced to a field's native type. Always sent as a bound parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(uuid::Uuid),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(Value),
}

impl SqlValue {
    /// Untyped conversion for values that never went through a field type (row keys read back
    /// from storage). Strings that parse as UUIDs become `Uuid`.
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => match uuid::Uuid::parse_str(s) {
                Ok(u) => SqlValue::Uuid(u),
                Err(_) => SqlValue::Text(s.clone()),
            },
            Value::Array(_) | Value::Object(_) => SqlValue::Json(v.clone()),
        }
    }

    /// JSON form, matching what the Postgres store reads back for the same column.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Int(i) => Value::Number((*i).into()),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Uuid(u) => Value::String(u.to_string()),
            SqlValue::Timestamp(t) => Value::String(t.to_rfc3339()),
            SqlValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            SqlValue::Json(v) => v.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Ordering of a stored JSON `cell` relative to this value, using this value's type.
    /// `None` when either side is null or the cell does not hold a comparable value.
    pub fn compare_json(&self, cell: &Value) -> Option<Ordering> {
        match (self, cell) {
            (SqlValue::Null, _) | (_, Value::Null) => None,
            (SqlValue::Bool(a), Value::Bool(b)) => Some(b.cmp(a)),
            (SqlValue::Int(a), Value::Number(n)) => match n.as_i64() {
                Some(b) => Some(b.cmp(a)),
                None => n.as_f64().and_then(|b| b.partial_cmp(&(*a as f64))),
            },
            (SqlValue::Float(a), Value::Number(n)) => n.as_f64().and_then(|b| b.partial_cmp(a)),
            (SqlValue::Text(a), Value::String(b)) => Some(b.as_str().cmp(a.as_str())),
            (SqlValue::Uuid(a), Value::String(b)) => uuid::Uuid::parse_str(b).ok().map(|b| b.cmp(a)),
            (SqlValue::Timestamp(a), Value::String(b)) => DateTime::parse_from_rfc3339(b)
                .ok()
                .map(|b| b.with_timezone(&Utc).cmp(a)),
            (SqlValue::Date(a), Value::String(b)) => NaiveDate::parse_from_str(b, "%Y-%m-%d")
                .ok()
                .map(|b| b.cmp(a)),
            (SqlValue::Json(a), b) => (a == b).then_some(Ordering::Equal),
            _ => None,
        }
    }
}

/// SQL literal form, used for logging and `Predicate` display only.
impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Float(n) => write!(f, "{}", n),
            SqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            SqlValue::Uuid(u) => write!(f, "'{}'", u),
            SqlValue::Timestamp(t) => write!(f, "'{}'", t.to_rfc3339()),
            SqlValue::Date(d) => write!(f, "'{}'", d.format("%Y-%m-%d")),
            SqlValue::Json(v) => write!(f, "'{}'", v.to_string().replace('\'', "''")),
        }
    }
}

/// Bind with the value's native Postgres type; the statement's `$n::type` cast does the rest.
pub fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Uuid(u) => query.bind(*u),
        SqlValue::Timestamp(t) => query.bind(*t),
        SqlValue::Date(d) => query.bind(*d),
        SqlValue::Json(v) => query.bind(v.clone()),
    }
}
