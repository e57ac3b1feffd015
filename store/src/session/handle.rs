use std::fmt;
use std::time::{Duration, Instant};

use sqlx::pool::PoolConnection;
use sqlx::{Executor, Postgres, Sqlite};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::dialect::{AccessMode, Backend, Dialect};
use crate::error::{StoreError, StoreResult};

/// Whole milliseconds, saturating.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A pooled connection of either backend.
pub(crate) enum Conn {
    Sqlite(PoolConnection<Sqlite>),
    Postgres(PoolConnection<Postgres>),
}

impl Conn {
    /// Run parameterless SQL, e.g. transaction control.
    async fn batch(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        match self {
            Conn::Sqlite(conn) => {
                (&mut **conn).execute(sql).await?;
            }
            Conn::Postgres(conn) => {
                (&mut **conn).execute(sql).await?;
            }
        }
        Ok(())
    }

    /// Roll back whatever is still open and hand the connection back to
    /// the pool. A connection that no longer answers is closed instead.
    async fn reset(mut self) {
        if self.batch("ROLLBACK").await.is_ok() || self.batch("SELECT 1").await.is_ok() {
            return;
        }
        self.discard();
    }

    /// Take the connection out of the pool and close it. Whatever
    /// transaction it had open is rolled back by the database.
    fn discard(self) {
        match self {
            Conn::Sqlite(conn) => drop(conn.detach()),
            Conn::Postgres(conn) => drop(conn.detach()),
        }
    }
}

/// Named savepoint inside a session's transaction.
#[derive(Debug)]
#[must_use = "a savepoint should be released or rolled back"]
pub struct Savepoint {
    name: String,
}

/// One transactional unit of work on one pooled connection.
///
/// A session is opened by [`Database::acquire`](crate::Database::acquire)
/// with a transaction already started, and ends with [`commit`](Self::commit)
/// or [`rollback`](Self::rollback). Dropping an open session rolls back on
/// a background task and then returns the connection to the pool; an
/// in-memory database, which lives only as long as its connection, keeps
/// its committed data.
pub struct Session {
    id: Uuid,
    conn: Option<Conn>,
    dialect: &'static Dialect,
    mode: AccessMode,
    savepoints: u32,
    opened_at: Instant,
}

impl Session {
    pub(crate) async fn begin(
        mut conn: Conn,
        dialect: &'static Dialect,
        mode: AccessMode,
        config: &StoreConfig,
    ) -> StoreResult<Self> {
        conn.batch(&dialect.begin_statement(mode, config.isolation))
            .await?;

        let mut session = Self {
            id: Uuid::new_v4(),
            conn: Some(conn),
            dialect,
            mode,
            savepoints: 0,
            opened_at: Instant::now(),
        };

        let setup = [
            Some(config.lock_timeout)
                .filter(|t| !t.is_zero())
                .and_then(|t| dialect.lock_timeout_sql(millis(t))),
            config
                .statement_timeout
                .filter(|t| !t.is_zero())
                .and_then(|t| dialect.statement_timeout_sql(millis(t))),
        ];
        for sql in setup.into_iter().flatten() {
            if let Err(e) = session.batch(&sql).await {
                session.close("ROLLBACK").await.ok();
                return Err(e);
            }
        }

        debug!(session = %session.id, backend = %dialect.backend, ?mode, "Session opened");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dialect(&self) -> &'static Dialect {
        self.dialect
    }

    pub fn backend(&self) -> Backend {
        self.dialect.backend
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Make the session's writes durable and visible, then release it.
    pub async fn commit(mut self) -> StoreResult<()> {
        self.close("COMMIT").await
    }

    /// Discard the session's writes and release it.
    pub async fn rollback(mut self) -> StoreResult<()> {
        self.close("ROLLBACK").await
    }

    pub async fn savepoint(&mut self) -> StoreResult<Savepoint> {
        self.savepoints += 1;
        let name = format!("tarasha_sp_{}", self.savepoints);
        self.batch(&format!("SAVEPOINT {name}")).await?;
        Ok(Savepoint { name })
    }

    /// Keep the work done since the savepoint.
    pub async fn release(&mut self, savepoint: Savepoint) -> StoreResult<()> {
        self.batch(&format!("RELEASE SAVEPOINT {}", savepoint.name))
            .await
    }

    /// Undo the work done since the savepoint. The transaction stays usable.
    pub async fn rollback_to(&mut self, savepoint: Savepoint) -> StoreResult<()> {
        self.batch(&format!("ROLLBACK TO SAVEPOINT {}", savepoint.name))
            .await?;
        self.batch(&format!("RELEASE SAVEPOINT {}", savepoint.name))
            .await
    }

    pub(crate) fn conn_mut(&mut self) -> StoreResult<&mut Conn> {
        self.conn.as_mut().ok_or(StoreError::SessionFinished)
    }

    pub(crate) async fn batch(&mut self, sql: &str) -> StoreResult<()> {
        self.conn_mut()?.batch(sql).await.map_err(StoreError::from)
    }

    async fn close(&mut self, verb: &str) -> StoreResult<()> {
        let mut conn = self.conn.take().ok_or(StoreError::SessionFinished)?;
        let elapsed_ms = millis(self.opened_at.elapsed());
        match conn.batch(verb).await {
            Ok(()) => {
                debug!(session = %self.id, elapsed_ms, "{verb}");
                Ok(())
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "{verb} failed; resetting connection");
                conn.reset().await;
                Err(e.into())
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(session = %self.id, "Session dropped while open; rolling back");
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(conn.reset());
                }
                Err(_) => conn.discard(),
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("backend", &self.dialect.backend)
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .finish()
    }
}
