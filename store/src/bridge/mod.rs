//! Execution bridge.
//!
//! Runs a [`Statement`] on a [`Session`]'s connection and returns a
//! backend-neutral [`Outcome`]. Placeholders are rendered for the session's
//! dialect, parameters are bound in order, and driver errors are normalized
//! into [`StoreError`].

mod decode;
pub mod statement;

use sqlx::query::Query;
use sqlx::{Column, Executor, Statement as _};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::session::{Conn, Session};
use crate::table::Table;
use crate::value::Value;

pub use statement::{
    CmpOp, Delete, Filter, Insert, InsertSource, OnConflict, Order, Rendered, Select, Sql,
    Statement, Update,
};
pub(crate) use statement::check_identifier;

/// Result of executing one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rows(Table),
    Affected(u64),
}

impl Outcome {
    /// The result set; empty for statements that returned none.
    pub fn into_table(self) -> Table {
        match self {
            Outcome::Rows(table) => table,
            Outcome::Affected(_) => Table::default(),
        }
    }

    /// Rows affected, or rows returned for a query.
    pub fn affected(&self) -> u64 {
        match self {
            Outcome::Rows(table) => table.len() as u64,
            Outcome::Affected(n) => *n,
        }
    }
}

/// Bind `params` in order. Rendering already inlines nulls, so the `Null`
/// arm only serves hand-built [`Rendered`] values.
fn bind_params<'q, DB>(
    mut query: Query<'q, DB, <DB as sqlx::Database>::Arguments<'q>>,
    params: &'q [Value],
) -> Query<'q, DB, <DB as sqlx::Database>::Arguments<'q>>
where
    DB: sqlx::Database,
    bool: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    i64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    f64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    &'q str: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    &'q [u8]: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    Option<String>: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
{
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Real(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Bytes(v) => query.bind(v.as_slice()),
        };
    }
    query
}

impl Session {
    /// Execute a statement, returning rows for queries and an affected-row
    /// count for everything else.
    pub async fn execute(&mut self, statement: impl Into<Statement>) -> StoreResult<Outcome> {
        let statement = statement.into();
        let rendered = statement.render(self.dialect())?;
        if statement.returns_rows() {
            self.fetch_rendered(&rendered).await.map(Outcome::Rows)
        } else {
            self.run_rendered(&rendered).await.map(Outcome::Affected)
        }
    }

    /// Execute a statement and collect its result set.
    pub async fn fetch(&mut self, statement: impl Into<Statement>) -> StoreResult<Table> {
        let rendered = statement.into().render(self.dialect())?;
        self.fetch_rendered(&rendered).await
    }

    /// Execute a statement for its side effects; returns rows affected.
    pub async fn run(&mut self, statement: impl Into<Statement>) -> StoreResult<u64> {
        let rendered = statement.into().render(self.dialect())?;
        self.run_rendered(&rendered).await
    }

    async fn run_rendered(&mut self, rendered: &Rendered) -> StoreResult<u64> {
        debug!(session = %self.id(), sql = %rendered.sql, params = rendered.params.len(), "execute");
        let affected = match self.conn_mut()? {
            Conn::Sqlite(conn) => {
                bind_params(sqlx::query(&rendered.sql), &rendered.params)
                    .execute(&mut **conn)
                    .await?
                    .rows_affected()
            }
            Conn::Postgres(conn) => {
                bind_params(sqlx::query(&rendered.sql), &rendered.params)
                    .execute(&mut **conn)
                    .await?
                    .rows_affected()
            }
        };
        Ok(affected)
    }

    async fn fetch_rendered(&mut self, rendered: &Rendered) -> StoreResult<Table> {
        debug!(session = %self.id(), sql = %rendered.sql, params = rendered.params.len(), "fetch");
        match self.conn_mut()? {
            Conn::Sqlite(conn) => {
                let rows = bind_params(sqlx::query(&rendered.sql), &rendered.params)
                    .fetch_all(&mut **conn)
                    .await?;
                let columns = match rows.first() {
                    Some(row) => column_names(sqlx::Row::columns(row)),
                    None => column_names((&mut **conn).prepare(&rendered.sql).await?.columns()),
                };
                let rows = rows
                    .iter()
                    .map(decode::sqlite_row)
                    .collect::<StoreResult<Vec<_>>>()?;
                Ok(Table::new(columns, rows))
            }
            Conn::Postgres(conn) => {
                let rows = bind_params(sqlx::query(&rendered.sql), &rendered.params)
                    .fetch_all(&mut **conn)
                    .await?;
                let columns = match rows.first() {
                    Some(row) => column_names(sqlx::Row::columns(row)),
                    None => column_names((&mut **conn).prepare(&rendered.sql).await?.columns()),
                };
                let rows = rows
                    .iter()
                    .map(decode::pg_row)
                    .collect::<StoreResult<Vec<_>>>()?;
                Ok(Table::new(columns, rows))
            }
        }
    }
}

fn column_names<C: Column>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

/// Run `statement` and require exactly one row back.
pub async fn fetch_one(session: &mut Session, statement: impl Into<Statement>) -> StoreResult<Table> {
    let table = session.fetch(statement).await?;
    if table.len() != 1 {
        return Err(StoreError::Decode {
            column: table.columns().first().cloned().unwrap_or_default(),
            reason: format!("expected one row, got {}", table.len()),
        });
    }
    Ok(table)
}
