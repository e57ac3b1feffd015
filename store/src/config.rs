//! Configuration for the Tarasha store.
//!
//! Chooses the backend and its tunables. Every value has a compile-time
//! default and can be overridden at runtime via a dedicated environment
//! variable.
//!
//! Database location precedence:
//! 1. `TARASHA_DB_URL` (any `sqlite:` or `postgres://` URL)
//! 2. `TARASHA_DB_PATH` (path to a SQLite file)
//! 3. `$HOME/app.db` when running on Azure App Service
//! 4. `./app.db` as fallback

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dialect::{Backend, IsolationLevel};
use crate::error::StoreResult;
use crate::session::RetryPolicy;

pub const DB_URL_ENV: &str = "TARASHA_DB_URL";
pub const DB_PATH_ENV: &str = "TARASHA_DB_PATH";
pub const LOCK_TIMEOUT_ENV: &str = "TARASHA_LOCK_TIMEOUT_MS";
pub const CONNECT_TIMEOUT_ENV: &str = "TARASHA_CONNECT_TIMEOUT_MS";
pub const STATEMENT_TIMEOUT_ENV: &str = "TARASHA_STATEMENT_TIMEOUT_MS";
pub const MAX_CONNECTIONS_ENV: &str = "TARASHA_MAX_CONNECTIONS";
pub const ISOLATION_ENV: &str = "TARASHA_ISOLATION";
pub const AUTO_MIGRATE_ENV: &str = "TARASHA_AUTO_MIGRATE";

const DEFAULT_DB_FILE: &str = "app.db";

/// How long a SQLite writer waits on another writer's lock.
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;

/// How long acquiring a pooled connection may take.
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Settings used to open a [`Database`](crate::Database).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub lock_timeout: Duration,
    pub connect_timeout: Duration,
    /// Server-side cap on a single statement. `None` disables it.
    pub statement_timeout: Option<Duration>,
    pub max_connections: u32,
    pub isolation: IsolationLevel,
    /// Turn on SQLite foreign-key enforcement for each connection.
    pub enforce_foreign_keys: bool,
    pub auto_migrate: bool,
    pub retry: RetryPolicy,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            statement_timeout: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            isolation: IsolationLevel::default(),
            enforce_foreign_keys: true,
            auto_migrate: true,
            retry: RetryPolicy::default(),
        }
    }

    /// Config for a SQLite file at `path`.
    pub fn sqlite(path: &Path) -> Self {
        Self::new(format!("sqlite:{}", path.display()))
    }

    /// Private in-memory SQLite database. Always a single connection.
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_URL).with_max_connections(1)
    }

    /// Build the config from `TARASHA_*` environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let mut config = Self::new(get_database_url());
        config.lock_timeout = Duration::from_millis(env_u64(LOCK_TIMEOUT_ENV, DEFAULT_LOCK_TIMEOUT_MS));
        config.connect_timeout =
            Duration::from_millis(env_u64(CONNECT_TIMEOUT_ENV, DEFAULT_CONNECT_TIMEOUT_MS));
        config.statement_timeout = match env_u64(STATEMENT_TIMEOUT_ENV, 0) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        config.max_connections = std::env::var(MAX_CONNECTIONS_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        if let Ok(level) = std::env::var(ISOLATION_ENV) {
            config.isolation = level.parse()?;
        }
        if let Ok(flag) = std::env::var(AUTO_MIGRATE_ENV) {
            config.auto_migrate = parse_flag(&flag).unwrap_or(true);
        }
        if config.is_in_memory() {
            config.max_connections = 1;
        }
        Ok(config)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_foreign_keys(mut self, enforce: bool) -> Self {
        self.enforce_foreign_keys = enforce;
        self
    }

    pub fn with_auto_migrate(mut self, auto: bool) -> Self {
        self.auto_migrate = auto;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend(&self) -> StoreResult<Backend> {
        Backend::from_url(&self.url)
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.starts_with("sqlite:") && self.url.contains(":memory:")
    }

    /// The URL with any password masked, for logs.
    pub fn redacted_url(&self) -> String {
        redact_password(&self.url)
    }
}

/// Get the database URL.
///
/// Priority:
/// 1. `TARASHA_DB_URL` env variable if set and non-empty
/// 2. `sqlite:` URL for [`get_sqlite_path`]
pub fn get_database_url() -> String {
    if let Ok(url) = std::env::var(DB_URL_ENV) {
        let url = url.trim();
        if !url.is_empty() {
            return url.to_string();
        }
    }

    format!("sqlite:{}", get_sqlite_path().display())
}

/// Get the SQLite file path.
///
/// Priority:
/// 1. `TARASHA_DB_PATH` env variable if set and non-empty
/// 2. `$HOME/app.db` when running on Azure App Service (where only `$HOME`
///    survives restarts)
/// 3. `./app.db` as fallback
pub fn get_sqlite_path() -> PathBuf {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    let on_app_service = std::env::var_os("WEBSITE_SITE_NAME").is_some()
        || std::env::var_os("WEBSITE_INSTANCE_ID").is_some();
    if on_app_service {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(DEFAULT_DB_FILE);
        }
    }

    PathBuf::from(".").join(DEFAULT_DB_FILE)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn redact_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.split_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
