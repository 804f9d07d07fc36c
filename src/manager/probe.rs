//! Backend reachability check used when registering an application
//! (spec.md 4.5: "validates target backend reachability (collaborator
//! ping)"), kept pluggable so tests can substitute a fake.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::Row as _;
use std::time::Duration;

use crate::error::Result;

#[async_trait]
pub trait BackendProbe: Send + Sync {
    async fn ping(&self, endpoint: &str) -> Result<()>;
}

/// Connects and runs `SELECT 1`, tearing the connection down immediately
/// afterward rather than joining the long-lived pool registry.
pub struct SqlxBackendProbe;

#[async_trait]
impl BackendProbe for SqlxBackendProbe {
    async fn ping(&self, endpoint: &str) -> Result<()> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .connect(endpoint)
            .await?;
        let row = sqlx::query("SELECT 1 AS ok").fetch_one(&pool).await?;
        let _: i32 = row.try_get("ok")?;
        pool.close().await;
        Ok(())
    }
}
