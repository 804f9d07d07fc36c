//! Row streaming and the delta-sync collaborator interface (spec.md 4.6:
//! "an implementation that has a real change-data-capture stream from the
//! source may substitute it; the contract with the core is: after deltasync
//! returns successfully, every row present in the source at the time of the
//! `readonly` transition is present in the target").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::model::ShardId;
use crate::pool::BackendPool;
use crate::row::{ColumnValue, Row};

use super::rowkey::{extract_row_key, RowKeyPolicy};

/// Everything a [`DeltaSyncSource`] needs to run one pass of the copy loop.
pub struct ReshardContext<'a> {
    pub source_pool: &'a PgPool,
    pub target_pools: &'a HashMap<ShardId, Arc<BackendPool>>,
    pub tables: &'a [String],
    pub batch_size: usize,
    pub route: &'a (dyn Fn(&str) -> Option<ShardId> + Send + Sync),
    /// Bound on per-row retries of a transient backend error within one
    /// batch before the job fails (spec.md 7).
    pub max_retries: u32,
}

#[async_trait]
pub trait DeltaSyncSource: Send + Sync {
    /// Runs one full pass over `ctx.tables`, returning the number of rows
    /// committed to targets.
    async fn sync(&self, ctx: &ReshardContext<'_>) -> Result<u64>;
}

/// The spec-mandated default: a bulk re-copy loop guarded by
/// ON-CONFLICT-DO-NOTHING inserts, safe to run repeatedly (precopy and
/// deltasync both use it — spec.md 4.6 phases 1 and 2 are the same loop).
pub struct BulkCopyDeltaSync;

#[async_trait]
impl DeltaSyncSource for BulkCopyDeltaSync {
    async fn sync(&self, ctx: &ReshardContext<'_>) -> Result<u64> {
        let mut total = 0u64;
        for table in ctx.tables {
            let rows = fetch_table_rows(ctx.source_pool, table).await?;
            for batch in rows.chunks(ctx.batch_size.max(1)) {
                let mut by_target: HashMap<ShardId, Vec<&Row>> = HashMap::new();
                for row in batch {
                    let (key, policy) = extract_row_key(row).ok_or_else(|| {
                        Error::InvariantViolation(format!("row in {table} has no columns"))
                    })?;
                    if policy != RowKeyPolicy::ShardKeyColumn {
                        tracing::warn!(table, ?policy, "row key fell through to a lower-priority column");
                    }
                    let target = (ctx.route)(&key).ok_or_else(|| {
                        Error::InvariantViolation(format!(
                            "no target shard covers hash(\"{key}\") while resharding {table}"
                        ))
                    })?;
                    by_target.entry(target).or_default().push(row);
                }
                for (shard_id, rows) in by_target {
                    let pool = ctx.target_pools.get(&shard_id).ok_or_else(|| {
                        Error::InvariantViolation(format!("no pool open for target shard {shard_id}"))
                    })?;
                    insert_rows_ignoring_conflicts(pool.inner(), table, &rows, ctx.max_retries).await?;
                    total += rows.len() as u64;
                }
            }
        }
        Ok(total)
    }
}

/// Canonical table-set reader: deterministic order by the first column so
/// repeated passes observe rows in the same sequence (spec.md 4.6 phase 1).
async fn fetch_table_rows(pool: &PgPool, table: &str) -> Result<Vec<Row>> {
    let sql = format!("SELECT * FROM {table} ORDER BY 1");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    Ok(rows.into_iter().map(Row::from).collect())
}

async fn insert_rows_ignoring_conflicts(
    pool: &PgPool,
    table: &str,
    rows: &[&Row],
    max_retries: u32,
) -> Result<()> {
    let Some(first) = rows.first() else {
        return Ok(());
    };
    let columns: Vec<&str> = first.columns.iter().map(|(name, _)| name.as_str()).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
        columns.join(", "),
        placeholders.join(", "),
    );

    for row in rows {
        let mut attempt = 0u32;
        loop {
            let mut query = sqlx::query(&sql);
            for (_, value) in &row.columns {
                query = bind_column_value(query, value);
            }
            match query.execute(pool).await {
                Ok(_) => break,
                Err(err) if attempt < max_retries => {
                    attempt += 1;
                    tracing::warn!(table, attempt, max_retries, error = %err, "retrying row insert after transient backend error");
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(err) => return Err(Error::from(err)),
            }
        }
    }
    Ok(())
}

fn bind_column_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q ColumnValue,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        ColumnValue::Null => query.bind(None::<String>),
        ColumnValue::Bool(b) => query.bind(*b),
        ColumnValue::Int(i) => query.bind(*i),
        ColumnValue::Float(f) => query.bind(*f),
        ColumnValue::Text(s) => query.bind(s.as_str()),
        ColumnValue::Bytes(b) => query.bind(b.as_slice()),
    }
}
