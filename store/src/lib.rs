//! Storage layer for Tarasha.
//!
//! The same code runs against an embedded SQLite file and a PostgreSQL
//! server. Callers work with [`Session`]s handed out by a [`Database`];
//! everything backend-specific lives in the [`dialect`] descriptor and the
//! execution [`bridge`].
//!
//! ```ignore
//! let db = Database::open(StoreConfig::from_env()?).await?;
//! let mut session = db.acquire().await?;
//! let group = membership::group_id_for(&mut session, "Tech-5", "bucket", true).await?;
//! session.commit().await?;
//! ```

pub mod bridge;
pub mod companies;
pub mod config;
pub mod copy;
pub mod dialect;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod read;
pub mod schema;
pub mod session;
pub mod settings;
pub mod table;
pub mod value;
pub mod write;


pub use bridge::{Filter, Order, Outcome, Select, Sql, Statement};
pub use config::StoreConfig;
pub use dialect::{AccessMode, Backend, ConflictAction, Dialect, IsolationLevel};
pub use error::{ConstraintKind, StoreError, StoreResult};
pub use read::read_table;
pub use session::{Database, PoolStatus, RetryPolicy, Savepoint, Session};
pub use table::{RowRef, Table};
pub use value::{FromValue, Value};
pub use write::{upsert, BatchUpsert, Upsert};
