//! Error taxonomy for the storage layer.
//!
//! Driver errors from both backends are normalized here so callers can tell
//! a lock timeout from a duplicate key from a retryable serialization
//! failure without knowing which database produced them.

use std::fmt;

use sqlx::error::{DatabaseError, ErrorKind};
use sqlx::postgres::PgDatabaseError;
use sqlx::sqlite::SqliteError;

use crate::dialect::Backend;

pub type StoreResult<T> = Result<T, StoreError>;

/// Primary SQLite result codes that mean "another connection holds the lock".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Which integrity rule a write violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not-null",
            ConstraintKind::Check => "check",
        };
        f.write_str(name)
    }
}

/// Errors from the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No usable connection (or lock) could be obtained within the bound.
    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Schema version {found} is behind the expected version {expected}")]
    SchemaVersionMismatch { expected: i64, found: i64 },

    #[error("{kind} constraint violated: {message}")]
    ConstraintViolation { kind: ConstraintKind, message: String },

    #[error("{operation} is not supported on the {backend} backend")]
    DialectUnsupportedOperation { backend: Backend, operation: String },

    /// Recoverable backend error (serialization failure, deadlock).
    #[error("Transient driver error: {0}")]
    TransientDriverError(String),

    #[error("Invalid statement: {0}")]
    InvalidStatement(String),

    #[error("Cannot decode column `{column}`: {reason}")]
    Decode { column: String, reason: String },

    #[error("Session already finished")]
    SessionFinished,

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Driver(#[source] sqlx::Error),
}

impl StoreError {
    /// Whether retrying the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::TransientDriverError(_))
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation { .. })
    }

    pub fn is_connection_timeout(&self) -> bool {
        matches!(self, StoreError::ConnectionTimeout(_))
    }

    pub(crate) fn unsupported(backend: Backend, operation: impl Into<String>) -> Self {
        StoreError::DialectUnsupportedOperation {
            backend,
            operation: operation.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                StoreError::ConnectionTimeout("timed out waiting for a pooled connection".into())
            }
            sqlx::Error::Database(db) => classify_database_error(db),
            sqlx::Error::Migrate(e) => StoreError::Migration(e.to_string()),
            other => StoreError::Driver(other),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(err.to_string())
    }
}

fn classify_database_error(db: Box<dyn DatabaseError>) -> StoreError {
    let constraint = match db.kind() {
        ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
        ErrorKind::ForeignKeyViolation => Some(ConstraintKind::ForeignKey),
        ErrorKind::NotNullViolation => Some(ConstraintKind::NotNull),
        ErrorKind::CheckViolation => Some(ConstraintKind::Check),
        _ => None,
    };
    if let Some(kind) = constraint {
        return StoreError::ConstraintViolation {
            kind,
            message: db.message().to_string(),
        };
    }

    let code = db.code().map(|c| c.into_owned());

    if db.try_downcast_ref::<SqliteError>().is_some() {
        // Extended result codes carry the primary code in the low byte.
        let primary = code
            .as_deref()
            .and_then(|c| c.parse::<i32>().ok())
            .map(|c| c & 0xff);
        if matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)) {
            return StoreError::ConnectionTimeout(db.message().to_string());
        }
    } else if db.try_downcast_ref::<PgDatabaseError>().is_some() {
        match code.as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => {
                return StoreError::TransientDriverError(db.message().to_string());
            }
            // lock_not_available
            Some("55P03") => return StoreError::ConnectionTimeout(db.message().to_string()),
            _ => {}
        }
    }

    StoreError::Driver(sqlx::Error::Database(db))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_becomes_connection_timeout() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_connection_timeout());
        assert!(!err.is_transient());
    }

    #[test]
    fn row_not_found_stays_a_driver_error() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Driver(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn constraint_kind_display() {
        assert_eq!(ConstraintKind::Unique.to_string(), "unique");
        assert_eq!(ConstraintKind::ForeignKey.to_string(), "foreign key");
    }

    #[test]
    fn unsupported_names_backend() {
        let err = StoreError::unsupported(Backend::Postgres, "INSERT OR REPLACE");
        assert_eq!(
            err.to_string(),
            "INSERT OR REPLACE is not supported on the postgres backend"
        );
    }
}
