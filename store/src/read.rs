//! Read path: queries into in-memory tables.

use tracing::debug;

use crate::bridge::Statement;
use crate::error::{StoreError, StoreResult};
use crate::session::Session;
use crate::table::Table;
use crate::value::FromValue;

/// Run a query and collect its result.
///
/// Rows come back in backend order, so callers that need a stable order must
/// ask for one. No rows is an empty table, not an error.
pub async fn read_table(session: &mut Session, query: impl Into<Statement>) -> StoreResult<Table> {
    let query = query.into();
    if !query.returns_rows() {
        return Err(StoreError::InvalidStatement(
            "read_table expects a query that returns rows".into(),
        ));
    }
    let table = session.fetch(query).await?;
    debug!(session = %session.id(), rows = table.len(), "read_table");
    Ok(table)
}

/// First column of the first row, `None` when the query returns no rows.
pub async fn read_scalar<T: FromValue>(
    session: &mut Session,
    query: impl Into<Statement>,
) -> StoreResult<Option<T>> {
    read_table(session, query).await?.scalar()
}

/// One column of every row.
pub async fn read_column<T: FromValue>(
    session: &mut Session,
    query: impl Into<Statement>,
    column: &str,
) -> StoreResult<Vec<T>> {
    read_table(session, query).await?.column(column)
}
