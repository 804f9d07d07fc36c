//! Catalog data model (spec.md 3): [`Application`], [`Shard`], [`ReshardJob`]
//! and the query-request/response shapes shared by the Router's HTTP API and
//! the Smart Client's in-process calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default virtual-node count for a newly created shard (spec.md 4.5).
pub const DEFAULT_VNODE_COUNT: u32 = 256;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(ApplicationId);
string_id!(ShardId);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub name: String,
    pub owner: String,
    /// Backend coordinates used to validate shards registered under this
    /// application (spec.md 3).
    pub default_backend_uri: String,
    pub policy: ApplicationPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-application tier rules enforced by the Router (spec.md 4.4, 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationPolicy {
    pub allow_strong_consistency: bool,
    pub requests_per_second: u32,
}

impl Default for ApplicationPolicy {
    fn default() -> Self {
        Self {
            allow_strong_consistency: true,
            requests_per_second: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    Active,
    Readonly,
    Migrating,
    Inactive,
}

impl ShardStatus {
    /// `migrating` and `readonly` shards still serve reads (spec.md 3).
    pub fn serves_reads(self) -> bool {
        !matches!(self, ShardStatus::Inactive)
    }

    /// Only `active` shards serve writes (spec.md 3).
    pub fn serves_writes(self) -> bool {
        matches!(self, ShardStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shard {
    pub id: ShardId,
    pub application_id: ApplicationId,
    pub name: String,
    pub primary_endpoint: String,
    pub replica_endpoints: Vec<String>,
    pub vnode_count: u32,
    /// Inclusive `[start, end]` hash range on the ring, when known (spec.md
    /// 4.1's "range form"). `None` until assigned by a split/merge or by
    /// explicit creation.
    pub hash_range: Option<(u64, u64)>,
    pub status: ShardStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shard {
    pub fn range_contains(&self, hash: u64) -> bool {
        match self.hash_range {
            Some((start, end)) => hash >= start && hash <= end,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReshardKind {
    Split,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReshardJobStatus {
    Pending,
    Precopy,
    Deltasync,
    Cutover,
    Validation,
    Completed,
    Failed,
}

impl ReshardJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReshardJobStatus::Completed | ReshardJobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshardJob {
    pub id: String,
    pub kind: ReshardKind,
    pub source_shard_ids: Vec<ShardId>,
    pub target_shard_ids: Vec<ShardId>,
    pub status: ReshardJobStatus,
    pub progress: f64,
    pub keys_migrated: u64,
    pub total_keys: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl ReshardJob {
    pub fn new(id: String, kind: ReshardKind, sources: Vec<ShardId>, targets: Vec<ShardId>) -> Self {
        Self {
            id,
            kind,
            source_shard_ids: sources,
            target_shard_ids: targets,
            status: ReshardJobStatus::Pending,
            progress: 0.0,
            keys_migrated: 0,
            total_keys: 0,
            started_at: None,
            completed_at: None,
            failure_reason: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    Strong,
    Eventual,
}

/// A request to run one statement against the shard owning `shard_key`
/// (spec.md 3, 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub shard_key: String,
    /// SQL text. Named `query` on the wire to match the Router's HTTP body.
    #[serde(rename = "query")]
    pub sql: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    #[serde(default = "default_consistency")]
    pub consistency: Consistency,
}

fn default_consistency() -> Consistency {
    Consistency::Eventual
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub shard_id: ShardId,
    pub rows: Vec<crate::row::Row>,
    pub row_count: usize,
    pub latency_ms: u64,
}
