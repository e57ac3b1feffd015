//! Session lifecycle.
//!
//! A [`Database`] owns the connection pool. Each [`Session`] is one pooled
//! connection with an open transaction:
//!
//! | Backend    | Read-write begin          | Read-only begin                 |
//! |------------|---------------------------|---------------------------------|
//! | SQLite     | `BEGIN IMMEDIATE`         | `BEGIN DEFERRED`                |
//! | PostgreSQL | `BEGIN ISOLATION LEVEL …` | `BEGIN ISOLATION LEVEL … READ ONLY` |
//!
//! Sessions end exactly once, by commit or rollback. A session that is
//! dropped open is rolled back before its connection goes back to the pool,
//! so no transaction outlives its owner.

mod database;
mod handle;
mod retry;

pub use database::{Database, PoolStatus};
pub(crate) use handle::{millis, Conn};
pub use handle::{Savepoint, Session};
pub use retry::RetryPolicy;
