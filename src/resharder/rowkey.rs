//! Row-key extraction heuristic used during precopy/deltasync (spec.md 4.6):
//! `shard_key`, else `id`, else `key`, else the first column. Explicit and
//! configurable per spec.md 9's open question, rather than a silent
//! fallthrough.

use crate::row::{ColumnValue, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKeyPolicy {
    ShardKeyColumn,
    IdColumn,
    KeyColumn,
    FirstColumn,
}

impl RowKeyPolicy {
    pub const FALLTHROUGH_ORDER: [RowKeyPolicy; 4] = [
        RowKeyPolicy::ShardKeyColumn,
        RowKeyPolicy::IdColumn,
        RowKeyPolicy::KeyColumn,
        RowKeyPolicy::FirstColumn,
    ];

    fn column_name(self) -> Option<&'static str> {
        match self {
            RowKeyPolicy::ShardKeyColumn => Some("shard_key"),
            RowKeyPolicy::IdColumn => Some("id"),
            RowKeyPolicy::KeyColumn => Some("key"),
            RowKeyPolicy::FirstColumn => None,
        }
    }
}

/// Extracts the row key string and the policy that produced it. Returns
/// `None` only for a row with no columns at all.
pub fn extract_row_key(row: &Row) -> Option<(String, RowKeyPolicy)> {
    for policy in RowKeyPolicy::FALLTHROUGH_ORDER {
        if let Some(name) = policy.column_name() {
            if let Some(value) = row.get(name) {
                return Some((column_value_to_key(value), policy));
            }
        } else {
            let first = row.columns.first()?;
            return Some((column_value_to_key(&first.1), RowKeyPolicy::FirstColumn));
        }
    }
    None
}

fn column_value_to_key(value: &ColumnValue) -> String {
    match value {
        ColumnValue::Null => String::new(),
        ColumnValue::Bool(b) => b.to_string(),
        ColumnValue::Int(i) => i.to_string(),
        ColumnValue::Float(f) => f.to_string(),
        ColumnValue::Text(s) => s.clone(),
        ColumnValue::Bytes(b) => String::from_utf8_lossy(b).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(columns: Vec<(&str, ColumnValue)>) -> Row {
        Row {
            columns: columns.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
        }
    }

    #[test]
    fn prefers_shard_key_column() {
        let r = row(vec![
            ("id", ColumnValue::Int(1)),
            ("shard_key", ColumnValue::Text("tenant-9".into())),
        ]);
        let (key, policy) = extract_row_key(&r).unwrap();
        assert_eq!(key, "tenant-9");
        assert_eq!(policy, RowKeyPolicy::ShardKeyColumn);
    }

    #[test]
    fn falls_through_to_id_then_key_then_first_column() {
        let r = row(vec![("id", ColumnValue::Int(42))]);
        let (key, policy) = extract_row_key(&r).unwrap();
        assert_eq!(key, "42");
        assert_eq!(policy, RowKeyPolicy::IdColumn);

        let r = row(vec![("key", ColumnValue::Text("k1".into()))]);
        let (key, policy) = extract_row_key(&r).unwrap();
        assert_eq!(key, "k1");
        assert_eq!(policy, RowKeyPolicy::KeyColumn);

        let r = row(vec![("first", ColumnValue::Text("only-column".into()))]);
        let (key, policy) = extract_row_key(&r).unwrap();
        assert_eq!(key, "only-column");
        assert_eq!(policy, RowKeyPolicy::FirstColumn);
    }

    #[test]
    fn empty_row_has_no_key() {
        let r = row(vec![]);
        assert_eq!(extract_row_key(&r), None);
    }
}
