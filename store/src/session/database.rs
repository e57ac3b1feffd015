//! Connection pool, migrations and unit-of-work scoping.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{PgPool, SqlitePool};
use tracing::{debug, info, warn};

use super::handle::{millis, Conn, Session};
use crate::config::StoreConfig;
use crate::dialect::{AccessMode, Backend, Dialect};
use crate::error::StoreResult;
use crate::schema;

#[derive(Clone)]
enum Pool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

/// Handle to one configured database. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
    dialect: &'static Dialect,
    config: Arc<StoreConfig>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.dialect.backend)
            .field("url", &self.config.redacted_url())
            .finish()
    }
}

/// Pool occupancy, for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: usize,
    pub max: u32,
}

impl Database {
    /// Connect, run migrations when `auto_migrate` is set, and verify the
    /// schema version.
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        let backend = config.backend()?;
        let pool = match backend {
            Backend::Sqlite => Pool::Sqlite(connect_sqlite(&config).await?),
            Backend::Postgres => Pool::Postgres(connect_postgres(&config).await?),
        };

        let db = Self {
            pool,
            dialect: backend.dialect(),
            config: Arc::new(config),
        };
        if db.config.auto_migrate {
            db.migrate().await?;
        }
        db.verify_schema().await?;

        info!(%backend, url = %db.config.redacted_url(), "Database opened");
        Ok(db)
    }

    /// Open using `TARASHA_*` environment variables.
    pub async fn open_from_env() -> StoreResult<Self> {
        Self::open(StoreConfig::from_env()?).await
    }

    pub fn backend(&self) -> Backend {
        self.dialect.backend
    }

    pub fn dialect(&self) -> &'static Dialect {
        self.dialect
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open a read-write session.
    ///
    /// Fails with `ConnectionTimeout` when no connection frees up within
    /// `connect_timeout`, or when another writer holds the SQLite lock
    /// longer than `lock_timeout`.
    pub async fn acquire(&self) -> StoreResult<Session> {
        self.acquire_with(AccessMode::ReadWrite).await
    }

    /// Open a read-only session. On SQLite it does not take the write lock.
    pub async fn acquire_read(&self) -> StoreResult<Session> {
        self.acquire_with(AccessMode::ReadOnly).await
    }

    pub async fn acquire_with(&self, mode: AccessMode) -> StoreResult<Session> {
        let conn = match &self.pool {
            Pool::Sqlite(pool) => Conn::Sqlite(pool.acquire().await?),
            Pool::Postgres(pool) => Conn::Postgres(pool.acquire().await?),
        };
        Session::begin(conn, self.dialect, mode, &self.config).await
    }

    /// Return a session to the pool, rolling back anything not committed.
    pub async fn release(&self, session: Session) -> StoreResult<()> {
        if session.is_open() {
            debug!(session = %session.id(), "Releasing uncommitted session");
            session.rollback().await
        } else {
            Ok(())
        }
    }

    /// Run `work` in a read-write session: commit on `Ok`, roll back on
    /// `Err`. A transient driver error restarts the whole unit with a fresh
    /// session, up to the configured retry budget.
    ///
    /// ```ignore
    /// let id = db
    ///     .unit_of_work(|s| Box::pin(async move { membership::group_id_for(s, "Tech", "bucket", true).await }))
    ///     .await?;
    /// ```
    pub async fn unit_of_work<T, F>(&self, work: F) -> StoreResult<T>
    where
        F: for<'s> FnMut(&'s mut Session) -> BoxFuture<'s, StoreResult<T>>,
    {
        self.run_unit(AccessMode::ReadWrite, work).await
    }

    /// Like [`unit_of_work`](Self::unit_of_work) but in a read-only session.
    pub async fn read<T, F>(&self, work: F) -> StoreResult<T>
    where
        F: for<'s> FnMut(&'s mut Session) -> BoxFuture<'s, StoreResult<T>>,
    {
        self.run_unit(AccessMode::ReadOnly, work).await
    }

    async fn run_unit<T, F>(&self, mode: AccessMode, mut work: F) -> StoreResult<T>
    where
        F: for<'s> FnMut(&'s mut Session) -> BoxFuture<'s, StoreResult<T>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            let mut session = self.acquire_with(mode).await?;
            let session_id = session.id();
            let result = match work(&mut session).await {
                Ok(value) => session.commit().await.map(|()| value),
                Err(err) => {
                    if let Err(rollback_err) = session.rollback().await {
                        warn!(session = %session_id, error = %rollback_err, "Rollback failed");
                    }
                    Err(err)
                }
            };

            match result {
                Err(err) if err.is_transient() && retry.should_retry(attempt) => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        session = %session_id,
                        attempt = attempt + 1,
                        delay_ms = millis(delay),
                        error = %err,
                        "Transient failure; retrying unit of work"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Apply pending migrations for this backend.
    pub async fn migrate(&self) -> StoreResult<()> {
        let migrator = schema::migrator(self.backend());
        match &self.pool {
            Pool::Sqlite(pool) => migrator.run(pool).await?,
            Pool::Postgres(pool) => migrator.run(pool).await?,
        }
        debug!(backend = %self.backend(), "Migrations applied");
        Ok(())
    }

    /// Highest applied migration version; 0 if never migrated.
    pub async fn schema_version(&self) -> StoreResult<i64> {
        let mut session = self.acquire_read().await?;
        let version = schema::recorded_version(&mut session).await;
        session.commit().await?;
        version
    }

    /// Fail with `SchemaVersionMismatch` if the database is behind this build.
    pub async fn verify_schema(&self) -> StoreResult<()> {
        schema::check_version(self.schema_version().await?)
    }

    pub fn pool_status(&self) -> PoolStatus {
        match &self.pool {
            Pool::Sqlite(pool) => PoolStatus {
                size: pool.size(),
                idle: pool.num_idle(),
                max: self.config.max_connections,
            },
            Pool::Postgres(pool) => PoolStatus {
                size: pool.size(),
                idle: pool.num_idle(),
                max: self.config.max_connections,
            },
        }
    }

    /// Close every pooled connection and wait for checked-out ones to return.
    pub async fn close(&self) {
        match &self.pool {
            Pool::Sqlite(pool) => pool.close().await,
            Pool::Postgres(pool) => pool.close().await,
        }
    }
}

async fn connect_sqlite(config: &StoreConfig) -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?;

    if !config.is_in_memory() {
        // Ensure parent directory exists
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let options = options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(config.lock_timeout)
        .foreign_keys(config.enforce_foreign_keys);

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout);
    if config.is_in_memory() {
        // The database lives only as long as its one connection.
        pool_options = pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    Ok(pool_options.connect_with(options).await?)
}

async fn connect_postgres(config: &StoreConfig) -> StoreResult<PgPool> {
    let options = PgConnectOptions::from_str(&config.url)?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .connect_with(options)
        .await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bridge::{Select, Sql};
    use crate::error::StoreError;

    #[tokio::test]
    async fn test_open_in_memory() {
        let db = Database::open(StoreConfig::in_memory()).await;
        assert!(db.is_ok());
        assert_eq!(db.unwrap().backend(), Backend::Sqlite);
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let db = Database::open(StoreConfig::in_memory()).await.unwrap();
        let mut session = db.acquire_read().await.unwrap();
        for table in schema::TABLES {
            assert!(
                schema::table_exists(&mut session, table.name).await.unwrap(),
                "missing table {}",
                table.name
            );
        }
        session.commit().await.unwrap();
        assert_eq!(
            db.schema_version().await.unwrap(),
            schema::EXPECTED_SCHEMA_VERSION
        );
    }

    #[tokio::test]
    async fn test_open_file_based() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.db");
        let db = Database::open(StoreConfig::sqlite(&path)).await;
        assert!(db.is_ok());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_unmigrated_database_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::sqlite(&dir.path().join("empty.db")).with_auto_migrate(false);
        let result = Database::open(config).await;
        assert!(
            matches!(
                result,
                Err(StoreError::SchemaVersionMismatch { found: 0, .. })
            ),
            "expected SchemaVersionMismatch, got {:?}",
            result.err()
        );
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(StoreConfig::sqlite(&dir.path().join("app.db")))
            .await
            .unwrap();

        let mut writer = db.acquire().await.unwrap();
        writer
            .run(Sql::new("INSERT INTO companies (name, ticker) VALUES (?, ?)").bind("A").bind("A"))
            .await
            .unwrap();
        writer.commit().await.unwrap();

        let mut reader = db.acquire_read().await.unwrap();
        let rows = reader.fetch(Select::table("companies")).await.unwrap();
        assert_eq!(rows.len(), 1);
        reader.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_session_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(StoreConfig::sqlite(&dir.path().join("app.db")))
            .await
            .unwrap();

        {
            let mut session = db.acquire().await.unwrap();
            session
                .run(Sql::new("INSERT INTO companies (name, ticker) VALUES (?, ?)").bind("A").bind("A"))
                .await
                .unwrap();
        }

        let mut reader = db.acquire_read().await.unwrap();
        assert!(reader.fetch(Select::table("companies")).await.unwrap().is_empty());
        reader.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_session_keeps_in_memory_database() {
        let db = Database::open(StoreConfig::in_memory()).await.unwrap();
        let mut session = db.acquire().await.unwrap();
        session
            .run(Sql::new("INSERT INTO companies (name, ticker) VALUES (?, ?)").bind("Apple").bind("AAPL"))
            .await
            .unwrap();
        session.commit().await.unwrap();

        for _ in 0..3 {
            let mut open = db.acquire().await.unwrap();
            open.run(Sql::new("INSERT INTO companies (name, ticker) VALUES (?, ?)").bind("Nvidia").bind("NVDA"))
                .await
                .unwrap();
            drop(open);
        }

        let tickers = db
            .read(|s| {
                Box::pin(async move {
                    crate::read::read_column::<String>(
                        s,
                        Select::table("companies").columns(["ticker"]),
                        "ticker",
                    )
                    .await
                })
            })
            .await
            .unwrap();
        assert_eq!(tickers, ["AAPL"]);
        assert_eq!(db.schema_version().await.unwrap(), schema::EXPECTED_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_release_rolls_back_uncommitted() {
        let db = Database::open(StoreConfig::in_memory()).await.unwrap();
        let mut session = db.acquire().await.unwrap();
        session
            .run(Sql::new("INSERT INTO companies (name, ticker) VALUES (?, ?)").bind("A").bind("A"))
            .await
            .unwrap();
        db.release(session).await.unwrap();

        let count = db
            .read(|s| Box::pin(async move { s.fetch(Select::table("companies")).await.map(|t| t.len()) }))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_unit_of_work_rolls_back_on_error() {
        let db = Database::open(StoreConfig::in_memory()).await.unwrap();
        let result: StoreResult<()> = db
            .unit_of_work(|s| {
                Box::pin(async move {
                    s.run(Sql::new("INSERT INTO companies (name, ticker) VALUES (?, ?)").bind("A").bind("A"))
                        .await?;
                    Err(StoreError::InvalidStatement("abort".into()))
                })
            })
            .await;
        assert!(matches!(result, Err(StoreError::InvalidStatement(_))));

        let count = db
            .read(|s| Box::pin(async move { s.fetch(Select::table("companies")).await.map(|t| t.len()) }))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_unit_of_work_retries_transient_errors() {
        let config = StoreConfig::in_memory().with_retry(
            crate::session::RetryPolicy::default().with_initial_delay(Duration::from_millis(1)),
        );
        let db = Database::open(config).await.unwrap();
        let mut attempts = 0;
        let value = db
            .unit_of_work(|_s| {
                attempts += 1;
                let current = attempts;
                Box::pin(async move {
                    if current < 3 {
                        Err(StoreError::TransientDriverError("serialization failure".into()))
                    } else {
                        Ok(current)
                    }
                })
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_connection_timeout_when_pool_exhausted() {
        let config = StoreConfig::in_memory().with_connect_timeout(Duration::from_millis(100));
        let db = Database::open(config).await.unwrap();
        let held = db.acquire().await.unwrap();
        let result = db.acquire().await;
        assert!(
            matches!(result, Err(StoreError::ConnectionTimeout(_))),
            "expected ConnectionTimeout, got {:?}",
            result
        );
        held.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_waits_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::sqlite(&dir.path().join("app.db"))
            .with_lock_timeout(Duration::from_millis(100));
        let db = Database::open(config).await.unwrap();

        let first = db.acquire().await.unwrap();
        let second = db.acquire().await;
        assert!(
            matches!(second, Err(StoreError::ConnectionTimeout(_))),
            "expected ConnectionTimeout, got {:?}",
            second
        );
        first.commit().await.unwrap();

        // Lock released: the next writer gets in.
        db.acquire().await.unwrap().commit().await.unwrap();
    }
}
