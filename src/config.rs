//! Layered configuration: an optional TOML file provides defaults, which
//! environment variables then override. Each binary (`shardkeeper-manager`,
//! `shardkeeper-router`) and the [`crate::client::SmartClient`] load their
//! own top-level config struct via `from_env()`.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

fn file_overlay(path_env_var: &str) -> config::Config {
    let path = env::var(path_env_var).unwrap_or_else(|_| "config/shardkeeper.toml".to_string());
    config::Config::builder()
        .add_source(config::File::with_name(&path).required(false))
        .build()
        .unwrap_or_default()
}

fn string_field(file: &config::Config, key: &str, env_var: &str, default: &str) -> String {
    env::var(env_var)
        .ok()
        .or_else(|| file.get_string(key).ok())
        .unwrap_or_else(|| default.to_string())
}

fn parsed_field<T: std::str::FromStr>(
    file: &config::Config,
    key: &str,
    env_var: &str,
    default: T,
) -> T {
    if let Ok(v) = env::var(env_var) {
        if let Ok(parsed) = v.parse() {
            return parsed;
        }
    }
    if let Ok(v) = file.get_string(key) {
        if let Ok(parsed) = v.parse() {
            return parsed;
        }
    }
    default
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn from_env(file: &config::Config, default_port: u16) -> Self {
        Self {
            host: string_field(file, "server.host", "SERVER_HOST", "0.0.0.0"),
            port: parsed_field(file, "server.port", "SERVER_PORT", default_port),
        }
    }
}

/// Connection parameters for the metadata store (etcd).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogStoreConfig {
    pub endpoints: Vec<String>,
    pub key_prefix: String,
}

impl CatalogStoreConfig {
    fn from_env(file: &config::Config) -> Self {
        let endpoints = env::var("ETCD_ENDPOINTS")
            .ok()
            .or_else(|| file.get_string("catalog.endpoints").ok())
            .unwrap_or_else(|| "http://127.0.0.1:2379".to_string());
        Self {
            endpoints: endpoints.split(',').map(|s| s.trim().to_string()).collect(),
            key_prefix: string_field(file, "catalog.key_prefix", "ETCD_KEY_PREFIX", ""),
        }
    }
}

/// Per-endpoint backend connection pool sizing (spec.md 4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_open: u32,
    pub min_idle: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl PoolConfig {
    fn from_env(file: &config::Config) -> Self {
        Self {
            max_open: parsed_field(file, "pool.max_open", "POOL_MAX_OPEN", 20),
            min_idle: parsed_field(file, "pool.min_idle", "POOL_MIN_IDLE", 2),
            acquire_timeout: Duration::from_secs(parsed_field(
                file,
                "pool.acquire_timeout_secs",
                "POOL_ACQUIRE_TIMEOUT_SECS",
                30,
            )),
            idle_timeout: Duration::from_secs(parsed_field(
                file,
                "pool.idle_timeout_secs",
                "POOL_IDLE_TIMEOUT_SECS",
                600,
            )),
            max_lifetime: Duration::from_secs(parsed_field(
                file,
                "pool.max_lifetime_secs",
                "POOL_MAX_LIFETIME_SECS",
                1800,
            )),
        }
    }
}

/// Bearer-token auth, disabled unless `AUTH_TOKEN` is set (spec.md 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token: Option<String>,
}

impl AuthConfig {
    fn from_env() -> Self {
        Self {
            token: env::var("AUTH_TOKEN").ok(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub server: ServerConfig,
    pub catalog: CatalogStoreConfig,
    pub pool: PoolConfig,
    pub auth: AuthConfig,
    pub reshard_batch_size: usize,
    pub reshard_quiescence: Duration,
    pub reshard_max_retries: u32,
    /// Canonical table-set migrated by a split/merge when the request does
    /// not name one explicitly.
    pub reshard_default_tables: Vec<String>,
}

impl ManagerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let file = file_overlay("SHARDKEEPER_CONFIG_FILE");
        let default_tables = string_field(&file, "resharder.default_tables", "RESHARD_DEFAULT_TABLES", "rows");
        Ok(Self {
            server: ServerConfig::from_env(&file, 8090),
            catalog: CatalogStoreConfig::from_env(&file),
            pool: PoolConfig::from_env(&file),
            auth: AuthConfig::from_env(),
            reshard_batch_size: parsed_field(&file, "resharder.batch_size", "RESHARD_BATCH_SIZE", 1_000),
            reshard_quiescence: Duration::from_millis(parsed_field(
                &file,
                "resharder.quiescence_ms",
                "RESHARD_QUIESCENCE_MS",
                2_000,
            )),
            reshard_max_retries: parsed_field(&file, "resharder.max_retries", "RESHARD_MAX_RETRIES", 3),
            reshard_default_tables: default_tables.split(',').map(|s| s.trim().to_string()).collect(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub server: ServerConfig,
    pub catalog: CatalogStoreConfig,
    pub pool: PoolConfig,
    pub auth: AuthConfig,
    pub default_rate_limit_per_sec: u32,
}

impl RouterConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let file = file_overlay("SHARDKEEPER_CONFIG_FILE");
        Ok(Self {
            server: ServerConfig::from_env(&file, 8091),
            catalog: CatalogStoreConfig::from_env(&file),
            pool: PoolConfig::from_env(&file),
            auth: AuthConfig::from_env(),
            default_rate_limit_per_sec: parsed_field(
                &file,
                "router.default_rate_limit_per_sec",
                "ROUTER_DEFAULT_RATE_LIMIT_PER_SEC",
                1_000,
            ),
        })
    }
}

/// Configuration for the [`crate::client::SmartClient`], embedded in
/// application processes rather than served over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub manager_base_url: String,
    pub application_id: String,
    pub pool: PoolConfig,
    pub refresh_interval: Duration,
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let file = file_overlay("SHARDKEEPER_CONFIG_FILE");
        Ok(Self {
            manager_base_url: string_field(
                &file,
                "client.manager_base_url",
                "SHARDKEEPER_MANAGER_URL",
                "http://127.0.0.1:8090",
            ),
            application_id: string_field(&file, "client.application_id", "SHARDKEEPER_APP_ID", ""),
            pool: PoolConfig::from_env(&file),
            refresh_interval: Duration::from_secs(parsed_field(
                &file,
                "client.refresh_interval_secs",
                "SHARDKEEPER_REFRESH_INTERVAL_SECS",
                60,
            )),
        })
    }
}
