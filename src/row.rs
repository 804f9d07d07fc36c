//! Driver-neutral row cursor (spec.md 9 design notes): a column-ordered
//! sequence of typed-or-opaque values, so the Router never has to expose a
//! `sqlx`-specific type across the HTTP boundary.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row as _};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Unrecognized column type, passed through as opaque bytes rather than
    /// failing the query (spec.md 9: "unknown types are passed through as
    /// opaque byte strings").
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub columns: Vec<(String, ColumnValue)>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

impl From<PgRow> for Row {
    fn from(row: PgRow) -> Self {
        let columns = row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| (col.name().to_string(), decode_value(&row, i)))
            .collect();
        Row { columns }
    }
}

/// Binds a loosely-typed JSON request parameter (spec.md 6's `params[]`) to
/// a Postgres query as the closest matching SQL type.
pub fn bind_json_param<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q serde_json::Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        serde_json::Value::Null => query.bind(None::<String>),
        serde_json::Value::Bool(b) => query.bind(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64())
            }
        }
        serde_json::Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

/// Try each Rust type sqlx can decode a Postgres column into, in the order
/// most columns are likely to match, and keep the first that succeeds.
/// Columns of a type none of these cover (arrays, JSON, composite types, …)
/// fall through to opaque bytes rather than failing the whole row.
fn decode_value(row: &PgRow, i: usize) -> ColumnValue {
    if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
        return v.map(ColumnValue::Bool).unwrap_or(ColumnValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map(ColumnValue::Int).unwrap_or(ColumnValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
        return v.map(ColumnValue::Float).unwrap_or(ColumnValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(i) {
        return v.map(ColumnValue::Text).unwrap_or(ColumnValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(i) {
        return v.map(ColumnValue::Bytes).unwrap_or(ColumnValue::Null);
    }
    ColumnValue::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_lookup_by_column_name() {
        let row = Row {
            columns: vec![
                ("id".to_string(), ColumnValue::Int(7)),
                ("name".to_string(), ColumnValue::Text("alice".into())),
            ],
        };
        assert_eq!(row.get("name"), Some(&ColumnValue::Text("alice".into())));
        assert_eq!(row.get("missing"), None);
    }
}
