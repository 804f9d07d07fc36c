//! [`CatalogStore`]: the persistence contract the Catalog is built on
//! (spec.md 4.2) — range-get-by-prefix, compare-and-put, and watch over a
//! linearizable key-value store.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

pub const APPS_PREFIX: &str = "/apps/";
pub const SHARDS_PREFIX: &str = "/shards/";

pub fn app_key(id: &str) -> String {
    format!("{APPS_PREFIX}{id}")
}

pub fn shard_key(id: &str) -> String {
    format!("{SHARDS_PREFIX}{id}")
}

/// One record as observed in the store: raw bytes plus the store's revision
/// at the time of the read, which the Catalog adopts as the catalog-version.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub revision: u64,
}

/// A watched change to the keyspace under `/apps/` or `/shards/`.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Put(StoredRecord),
    Delete { key: String, revision: u64 },
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Full range read of a key prefix, used at startup to rebuild the ring
    /// (spec.md 4.2).
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<StoredRecord>>;

    /// Insert `value` at `key` only if the key does not already exist.
    /// Returns `Ok(false)` (never partially applied) if it does.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<bool>;

    /// Unconditionally overwrite `key`.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Current store revision, used to seed the catalog-version at startup.
    async fn current_revision(&self) -> Result<u64>;

    /// A restartable stream of mutations under `/apps/` and `/shards/`.
    /// Watchers may miss intermediate states but always observe the latest
    /// (spec.md 4.2).
    async fn watch(&self) -> Result<tokio::sync::broadcast::Receiver<WatchEvent>>;
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}
