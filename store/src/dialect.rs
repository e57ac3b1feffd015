//! Dialect descriptors.
//!
//! Every place where SQLite and PostgreSQL disagree is recorded here as
//! data, and the rest of the crate asks the descriptor instead of branching
//! on the backend inline.
//!
//! | Concern                 | SQLite                       | PostgreSQL                          |
//! |-------------------------|------------------------------|-------------------------------------|
//! | Placeholders            | `?`                          | `$1`, `$2`, ...                     |
//! | Foreign keys            | per-connection pragma        | always enforced                     |
//! | Locking                 | single writer, whole file    | row-level, MVCC                     |
//! | `INSERT ... SELECT` upsert | subselect needs a `WHERE` | direct                              |
//! | Error inside a txn      | statement rolled back        | whole transaction aborted           |
//! | Replace-row upsert      | `INSERT OR REPLACE`          | unsupported                         |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Which database engine a handle talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    /// Determine the backend from a connection URL scheme.
    pub fn from_url(url: &str) -> StoreResult<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            other => Err(StoreError::Config(format!(
                "unsupported database URL scheme `{other}`"
            ))),
        }
    }

    pub fn dialect(self) -> &'static Dialect {
        match self {
            Backend::Sqlite => &SQLITE,
            Backend::Postgres => &POSTGRES,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sqlite => f.write_str("sqlite"),
            Backend::Postgres => f.write_str("postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` for every parameter.
    QuestionMark,
    /// `$1`, `$2`, ... in binding order.
    Numbered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyEnforcement {
    /// Off unless each connection opts in.
    PerConnection,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockingModel {
    /// One writer at a time for the whole database file.
    SingleWriter,
    RowLevel,
}

/// Where an upsert clause may go when the source of an insert is a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertSelectConflict {
    /// The parser confuses `ON CONFLICT` with a join constraint unless the
    /// source select ends in a `WHERE` clause.
    GuardedSubquery,
    Direct,
}

/// Isolation level requested for server-backend transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "read-committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable-read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(StoreError::Config(format!(
                "unknown isolation level `{other}`"
            ))),
        }
    }
}

/// Whether a session intends to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

/// What an insert does when it hits an existing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictAction {
    DoNothing,
    /// Overwrite the listed columns from the incoming row.
    UpdateColumns(Vec<String>),
    /// Delete the existing row and insert the new one.
    ReplaceRow,
}

/// The rendered pieces of a conflict-handling insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictClause {
    /// `INSERT INTO` or a dialect variant of it.
    pub insert_verb: &'static str,
    /// Text appended after the row source; may be empty.
    pub suffix: String,
}

/// Static description of one backend's SQL behavior.
#[derive(Debug)]
pub struct Dialect {
    pub backend: Backend,
    pub placeholders: PlaceholderStyle,
    pub foreign_keys: ForeignKeyEnforcement,
    pub locking: LockingModel,
    pub insert_select_conflict: InsertSelectConflict,
    /// A failed statement poisons the surrounding transaction.
    pub error_aborts_transaction: bool,
    pub supports_replace_row: bool,
    /// Upper bound on bound parameters in one statement.
    pub max_bind_params: usize,
}

pub static SQLITE: Dialect = Dialect {
    backend: Backend::Sqlite,
    placeholders: PlaceholderStyle::QuestionMark,
    foreign_keys: ForeignKeyEnforcement::PerConnection,
    locking: LockingModel::SingleWriter,
    insert_select_conflict: InsertSelectConflict::GuardedSubquery,
    error_aborts_transaction: false,
    supports_replace_row: true,
    max_bind_params: 32_766,
};

pub static POSTGRES: Dialect = Dialect {
    backend: Backend::Postgres,
    placeholders: PlaceholderStyle::Numbered,
    foreign_keys: ForeignKeyEnforcement::Always,
    locking: LockingModel::RowLevel,
    insert_select_conflict: InsertSelectConflict::Direct,
    error_aborts_transaction: true,
    supports_replace_row: false,
    max_bind_params: 65_535,
};

impl Dialect {
    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self.placeholders {
            PlaceholderStyle::QuestionMark => "?".to_string(),
            PlaceholderStyle::Numbered => format!("${index}"),
        }
    }

    /// Statement that opens a transaction in the given mode.
    ///
    /// SQLite writers take the reserved lock up front so a competing writer
    /// waits out `busy_timeout` at `BEGIN` instead of failing mid-transaction.
    pub fn begin_statement(&self, mode: AccessMode, isolation: IsolationLevel) -> String {
        match (self.backend, mode) {
            (Backend::Sqlite, AccessMode::ReadWrite) => "BEGIN IMMEDIATE".to_string(),
            (Backend::Sqlite, AccessMode::ReadOnly) => "BEGIN DEFERRED".to_string(),
            (Backend::Postgres, AccessMode::ReadWrite) => {
                format!("BEGIN ISOLATION LEVEL {}", isolation.as_sql())
            }
            (Backend::Postgres, AccessMode::ReadOnly) => {
                format!("BEGIN ISOLATION LEVEL {} READ ONLY", isolation.as_sql())
            }
        }
    }

    /// Per-transaction statement timeout, where the backend has one.
    pub fn statement_timeout_sql(&self, millis: u64) -> Option<String> {
        match self.backend {
            Backend::Sqlite => None,
            Backend::Postgres => Some(format!("SET LOCAL statement_timeout = {millis}")),
        }
    }

    /// Per-transaction cap on waiting for a row or table lock. SQLite gets
    /// the same bound from the connection's `busy_timeout`.
    pub fn lock_timeout_sql(&self, millis: u64) -> Option<String> {
        match self.backend {
            Backend::Sqlite => None,
            Backend::Postgres => Some(format!("SET LOCAL lock_timeout = {millis}")),
        }
    }

    /// Render the conflict handling for an insert keyed on `target`.
    pub fn conflict_clause(
        &self,
        target: &[String],
        action: &ConflictAction,
    ) -> StoreResult<ConflictClause> {
        match action {
            ConflictAction::ReplaceRow if self.supports_replace_row => Ok(ConflictClause {
                insert_verb: "INSERT OR REPLACE INTO",
                suffix: String::new(),
            }),
            ConflictAction::ReplaceRow => {
                Err(StoreError::unsupported(self.backend, "replace-row upsert"))
            }
            ConflictAction::DoNothing if target.is_empty() => Ok(ConflictClause {
                insert_verb: "INSERT INTO",
                suffix: "ON CONFLICT DO NOTHING".to_string(),
            }),
            ConflictAction::DoNothing => Ok(ConflictClause {
                insert_verb: "INSERT INTO",
                suffix: format!("ON CONFLICT ({}) DO NOTHING", target.join(", ")),
            }),
            ConflictAction::UpdateColumns(_) if target.is_empty() => Err(
                StoreError::InvalidStatement("an updating upsert needs a conflict target".into()),
            ),
            ConflictAction::UpdateColumns(columns) if columns.is_empty() => Ok(ConflictClause {
                insert_verb: "INSERT INTO",
                suffix: format!("ON CONFLICT ({}) DO NOTHING", target.join(", ")),
            }),
            ConflictAction::UpdateColumns(columns) => {
                let assignments = columns
                    .iter()
                    .map(|c| format!("{c} = excluded.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(ConflictClause {
                    insert_verb: "INSERT INTO",
                    suffix: format!(
                        "ON CONFLICT ({}) DO UPDATE SET {assignments}",
                        target.join(", ")
                    ),
                })
            }
        }
    }

    /// Wrap the source of an `INSERT ... SELECT` so an upsert clause can follow it.
    pub fn insert_select_source(&self, source_sql: &str) -> String {
        match self.insert_select_conflict {
            InsertSelectConflict::GuardedSubquery => {
                format!("SELECT * FROM ({source_sql}) AS src WHERE true")
            }
            InsertSelectConflict::Direct => source_sql.to_string(),
        }
    }

    /// Query with one placeholder (the table name) returning a count column `n`.
    pub fn table_exists_sql(&self) -> &'static str {
        match self.backend {
            Backend::Sqlite => {
                "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?"
            }
            Backend::Postgres => {
                "SELECT COUNT(*) AS n FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name::text = ?"
            }
        }
    }

    /// Remove every row of `table`.
    pub fn truncate_sql(&self, table: &str) -> String {
        match self.backend {
            Backend::Sqlite => format!("DELETE FROM {table}"),
            Backend::Postgres => format!("TRUNCATE TABLE {table} RESTART IDENTITY CASCADE"),
        }
    }

    /// Move an identity sequence past the largest existing `column` value.
    ///
    /// SQLite `AUTOINCREMENT` tracks explicit ids on its own, so there is
    /// nothing to do there.
    pub fn resync_identity_sql(&self, table: &str, column: &str) -> Option<String> {
        match self.backend {
            Backend::Sqlite => None,
            Backend::Postgres => Some(format!(
                "SELECT setval(pg_get_serial_sequence('{table}', '{column}'), \
                 COALESCE((SELECT MAX({column}) FROM {table}), 0) + 1, false)"
            )),
        }
    }
}
