//! In-process [`CatalogStore`] used by tests and single-process demos — the
//! same role the grounding codebase's SQLite backend plays next to its
//! Postgres one: a lighter alternative behind the same trait, not a mock.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::error::Result;

use super::store::{CatalogStore, StoredRecord, WatchEvent};

pub struct InMemoryCatalogStore {
    entries: RwLock<BTreeMap<String, (Vec<u8>, u64)>>,
    revision: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(1024);
        Arc::new(Self {
            entries: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            events: tx,
        })
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for Arc<InMemoryCatalogStore> {
    fn default() -> Self {
        InMemoryCatalogStore::new()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<StoredRecord>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, rev))| StoredRecord {
                key: k.clone(),
                value: v.clone(),
                revision: *rev,
            })
            .collect())
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Ok(false);
        }
        let revision = self.next_revision();
        entries.insert(key.to_string(), (value.clone(), revision));
        let _ = self.events.send(WatchEvent::Put(StoredRecord {
            key: key.to_string(),
            value,
            revision,
        }));
        Ok(true)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let revision = self.next_revision();
        entries.insert(key.to_string(), (value.clone(), revision));
        let _ = self.events.send(WatchEvent::Put(StoredRecord {
            key: key.to_string(),
            value,
            revision,
        }));
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        let revision = self.next_revision();
        let _ = self.events.send(WatchEvent::Delete {
            key: key.to_string(),
            revision,
        });
        Ok(())
    }

    async fn current_revision(&self) -> Result<u64> {
        Ok(self.revision.load(Ordering::SeqCst))
    }

    async fn watch(&self) -> Result<broadcast::Receiver<WatchEvent>> {
        Ok(self.events.subscribe())
    }
}
