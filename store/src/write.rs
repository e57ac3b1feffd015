//! Write path: single-row upserts, atomic batch upserts, and upserts whose
//! rows come from a query.
//!
//! Every upsert is keyed on a declared unique constraint and renders as
//! `INSERT ... ON CONFLICT (key) DO UPDATE SET col = excluded.col` on both
//! backends, so only the row with the same natural key is ever touched.
//!
//! On PostgreSQL a failed statement aborts the whole transaction. Writes
//! here run under a savepoint on that backend so a constraint violation
//! leaves the session usable, the way SQLite already behaves.

use std::collections::HashMap;

use tracing::debug;

use crate::bridge::{check_identifier, Delete, Insert, Statement};
use crate::dialect::ConflictAction;
use crate::error::{StoreError, StoreResult};
use crate::session::Session;
use crate::value::{KeyRepr, Value};

/// Rows per `INSERT` statement in a batch, before the bind-parameter limit.
const MAX_ROWS_PER_STATEMENT: usize = 500;

/// One row to insert, or update in place when its key already exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    table: String,
    key: Vec<String>,
    columns: Vec<String>,
    values: Vec<Value>,
    action: Option<ConflictAction>,
}

impl Upsert {
    pub fn into_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: Vec::new(),
            columns: Vec::new(),
            values: Vec::new(),
            action: None,
        }
    }

    /// Add a conflict-key column and its value.
    pub fn key(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        self.key.push(column.clone());
        self.columns.push(column);
        self.values.push(value.into());
        self
    }

    /// Add a non-key column and its value.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.push(column.into());
        self.values.push(value.into());
        self
    }

    /// Override the default of updating every non-key column.
    pub fn on_conflict(mut self, action: ConflictAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn action(&self) -> ConflictAction {
        self.action
            .clone()
            .unwrap_or_else(|| default_action(&self.key, &self.columns))
    }

    pub fn to_statement(&self) -> StoreResult<Statement> {
        if self.key.is_empty() {
            return Err(StoreError::InvalidStatement(format!(
                "upsert into {} has no conflict key",
                self.table
            )));
        }
        Ok(Insert::into_table(self.table.clone(), self.columns.clone())
            .row(self.values.clone())
            .on_conflict(self.key.clone(), self.action())
            .into())
    }
}

fn default_action(key: &[String], columns: &[String]) -> ConflictAction {
    ConflictAction::UpdateColumns(
        columns
            .iter()
            .filter(|c| !key.contains(c))
            .cloned()
            .collect(),
    )
}

/// Insert or update one row by its key. Returns rows written (0 when a
/// `DoNothing` upsert hit an existing key).
pub async fn upsert(session: &mut Session, row: Upsert) -> StoreResult<u64> {
    let statement = row.to_statement()?;
    let written = run_guarded(session, statement).await?;
    debug!(session = %session.id(), table = %row.table, written, "upsert");
    Ok(written)
}

/// Many rows for the same table and key, applied all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchUpsert {
    table: String,
    key: Vec<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    action: Option<ConflictAction>,
}

impl BatchUpsert {
    /// `columns` lists every column of a row, key columns included.
    pub fn new<K, C, S, T>(table: impl Into<String>, key: K, columns: C) -> Self
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
        C: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            table: table.into(),
            key: key.into_iter().map(Into::into).collect(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            action: None,
        }
    }

    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn push(&mut self, values: Vec<Value>) {
        self.rows.push(values);
    }

    pub fn on_conflict(mut self, action: ConflictAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn validate(&self) -> StoreResult<()> {
        check_identifier(&self.table)?;
        if self.key.is_empty() {
            return Err(StoreError::InvalidStatement(format!(
                "batch upsert into {} has no conflict key",
                self.table
            )));
        }
        if let Some(missing) = self.key.iter().find(|k| !self.columns.contains(k)) {
            return Err(StoreError::InvalidStatement(format!(
                "key column {missing} is not among the columns of {}",
                self.table
            )));
        }
        if let Some((i, row)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.columns.len())
        {
            return Err(StoreError::InvalidStatement(format!(
                "row {i} has {} values for {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        Ok(())
    }

    /// Collapse rows sharing a key so no statement touches a key twice.
    /// Updating upserts keep the last row for a key, `DoNothing` keeps the
    /// first, matching row-by-row application.
    fn dedupe(&self, action: &ConflictAction) -> Vec<Vec<Value>> {
        let key_positions: Vec<usize> = self
            .key
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| c == k))
            .collect();
        let keep_first = matches!(action, ConflictAction::DoNothing);

        let mut seen: HashMap<Vec<KeyRepr>, usize> = HashMap::new();
        let mut rows: Vec<Vec<Value>> = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let key: Vec<KeyRepr> = key_positions.iter().map(|&p| row[p].key_repr()).collect();
            match seen.get(&key) {
                Some(_) if keep_first => {}
                Some(&index) => rows[index] = row.clone(),
                None => {
                    seen.insert(key, rows.len());
                    rows.push(row.clone());
                }
            }
        }
        rows
    }
}

/// Apply a batch upsert atomically: on any failure every row of the batch
/// is rolled back and the session stays usable.
pub async fn upsert_batch(session: &mut Session, batch: BatchUpsert) -> StoreResult<u64> {
    batch.validate()?;
    if batch.is_empty() {
        return Ok(0);
    }

    let action = batch
        .action
        .clone()
        .unwrap_or_else(|| default_action(&batch.key, &batch.columns));
    let rows = batch.dedupe(&action);
    let per_statement = (session.dialect().max_bind_params / batch.columns.len())
        .clamp(1, MAX_ROWS_PER_STATEMENT);

    let savepoint = session.savepoint().await?;
    let mut written = 0;
    for chunk in rows.chunks(per_statement) {
        let statement = Insert::into_table(batch.table.clone(), batch.columns.clone())
            .rows(chunk.to_vec())
            .on_conflict(batch.key.clone(), action.clone());
        match session.run(statement).await {
            Ok(n) => written += n,
            Err(e) => {
                session.rollback_to(savepoint).await?;
                return Err(e);
            }
        }
    }
    session.release(savepoint).await?;

    debug!(
        session = %session.id(),
        table = %batch.table,
        rows = rows.len(),
        written,
        "upsert_batch"
    );
    Ok(written)
}

/// Insert the rows produced by `source` into `table`, updating the non-key
/// columns of rows whose key already exists.
///
/// `source` must yield `columns` in order. The conflict clause goes where
/// the active dialect accepts it.
pub async fn upsert_from_query(
    session: &mut Session,
    table: &str,
    columns: &[&str],
    key: &[&str],
    source: impl Into<Statement>,
) -> StoreResult<u64> {
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    let key: Vec<String> = key.iter().map(|k| k.to_string()).collect();
    let action = default_action(&key, &columns);
    let statement = Insert::into_table(table, columns)
        .from_query(source)
        .on_conflict(key, action);
    let written = run_guarded(session, statement.into()).await?;
    debug!(session = %session.id(), table, written, "upsert_from_query");
    Ok(written)
}

/// Replace the whole content of `table` with `batch`'s rows, atomically.
pub async fn replace_all(session: &mut Session, batch: BatchUpsert) -> StoreResult<u64> {
    batch.validate()?;
    let savepoint = session.savepoint().await?;
    match delete_and_insert(session, &batch).await {
        Ok(written) => {
            session.release(savepoint).await?;
            debug!(session = %session.id(), table = %batch.table, written, "replace_all");
            Ok(written)
        }
        Err(e) => {
            session.rollback_to(savepoint).await?;
            Err(e)
        }
    }
}

async fn delete_and_insert(session: &mut Session, batch: &BatchUpsert) -> StoreResult<u64> {
    session.run(Delete::from_table(batch.table.clone())).await?;
    let per_statement = (session.dialect().max_bind_params / batch.columns.len())
        .clamp(1, MAX_ROWS_PER_STATEMENT);
    let mut written = 0;
    for chunk in batch.rows.chunks(per_statement) {
        let insert = Insert::into_table(batch.table.clone(), batch.columns.clone())
            .rows(chunk.to_vec());
        written += session.run(insert).await?;
    }
    Ok(written)
}

/// Run one write so that its failure does not poison the transaction.
pub(crate) async fn run_guarded(session: &mut Session, statement: Statement) -> StoreResult<u64> {
    if !session.dialect().error_aborts_transaction {
        return session.run(statement).await;
    }
    let savepoint = session.savepoint().await?;
    match session.run(statement).await {
        Ok(n) => {
            session.release(savepoint).await?;
            Ok(n)
        }
        Err(e) => {
            session.rollback_to(savepoint).await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Select, Sql};
    use crate::config::StoreConfig;
    use crate::error::ConstraintKind;
    use crate::Database;

    async fn memory_db() -> Database {
        Database::open(StoreConfig::in_memory()).await.unwrap()
    }

    fn rate(year: i64, usa: f64) -> Upsert {
        Upsert::into_table("risk_free_rates")
            .key("year", year)
            .set("usa_rf", usa)
            .set("india_rf", 7.0)
            .set("china_rf", 2.5)
            .set("japan_rf", 0.9)
    }

    #[tokio::test]
    async fn test_upsert_twice_converges_to_second_values() {
        let db = memory_db().await;
        let mut session = db.acquire().await.unwrap();
        assert_eq!(upsert(&mut session, rate(2025, 4.25)).await.unwrap(), 1);
        assert_eq!(upsert(&mut session, rate(2025, 4.40)).await.unwrap(), 1);

        let table = session
            .fetch(Select::table("risk_free_rates").columns(["year", "usa_rf"]))
            .await
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.first().unwrap().get::<f64>("usa_rf").unwrap(), 4.40);
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_leaves_other_keys_alone() {
        let db = memory_db().await;
        let mut session = db.acquire().await.unwrap();
        upsert(&mut session, rate(2024, 4.0)).await.unwrap();
        upsert(&mut session, rate(2025, 4.2)).await.unwrap();
        upsert(&mut session, rate(2025, 4.3)).await.unwrap();

        let rates: Vec<f64> = session
            .fetch(Sql::new("SELECT usa_rf FROM risk_free_rates ORDER BY year"))
            .await
            .unwrap()
            .column("usa_rf")
            .unwrap();
        assert_eq!(rates, vec![4.0, 4.3]);
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_do_nothing_keeps_existing_row() {
        let db = memory_db().await;
        let mut session = db.acquire().await.unwrap();
        upsert(&mut session, rate(2025, 4.25)).await.unwrap();
        let written = upsert(
            &mut session,
            rate(2025, 9.99).on_conflict(ConflictAction::DoNothing),
        )
        .await
        .unwrap();
        assert_eq!(written, 0);
        let usa: Option<f64> = session
            .fetch("SELECT usa_rf FROM risk_free_rates")
            .await
            .unwrap()
            .scalar()
            .unwrap();
        assert_eq!(usa, Some(4.25));
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_without_key_is_rejected() {
        let db = memory_db().await;
        let mut session = db.acquire().await.unwrap();
        let row = Upsert::into_table("risk_free_rates").set("usa_rf", 1.0);
        assert!(matches!(
            upsert(&mut session, row).await,
            Err(StoreError::InvalidStatement(_))
        ));
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_row_on_sqlite() {
        let db = memory_db().await;
        let mut session = db.acquire().await.unwrap();
        upsert(&mut session, rate(2025, 4.25)).await.unwrap();
        upsert(
            &mut session,
            rate(2025, 4.5).on_conflict(ConflictAction::ReplaceRow),
        )
        .await
        .unwrap();
        let table = session.fetch(Select::table("risk_free_rates")).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.first().unwrap().get::<f64>("usa_rf").unwrap(), 4.5);
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_upsert_last_row_wins() {
        let db = memory_db().await;
        let mut session = db.acquire().await.unwrap();
        let batch = BatchUpsert::new("growth_weight_factors", ["factor"], ["factor", "weight"])
            .row(vec!["Revenue".into(), 0.3.into()])
            .row(vec!["EBITDA".into(), 0.2.into()])
            .row(vec!["Revenue".into(), 0.5.into()]);
        let written = upsert_batch(&mut session, batch).await.unwrap();
        assert_eq!(written, 2);

        let weight: Option<f64> = session
            .fetch(Sql::new("SELECT weight FROM growth_weight_factors WHERE factor = ?").bind("Revenue"))
            .await
            .unwrap()
            .scalar()
            .unwrap();
        assert_eq!(weight, Some(0.5));
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_upsert_is_all_or_nothing() {
        let db = memory_db().await;
        let mut session = db.acquire().await.unwrap();
        session
            .run(Sql::new("INSERT INTO companies (name, ticker) VALUES (?, ?)").bind("Apple").bind("AAPL"))
            .await
            .unwrap();
        let apple: i64 = session
            .fetch("SELECT id FROM companies")
            .await
            .unwrap()
            .scalar()
            .unwrap()
            .unwrap();

        // Second row references a company that does not exist.
        let batch = BatchUpsert::new(
            "wacc_annual",
            ["company_id", "fiscal_year"],
            ["company_id", "fiscal_year", "wacc"],
        )
        .row(vec![apple.into(), 2024_i64.into(), 8.1.into()])
        .row(vec![9_999_i64.into(), 2024_i64.into(), 7.0.into()]);
        let result = upsert_batch(&mut session, batch).await;
        assert!(
            matches!(
                result,
                Err(StoreError::ConstraintViolation {
                    kind: ConstraintKind::ForeignKey,
                    ..
                })
            ),
            "expected foreign-key violation, got {:?}",
            result
        );

        // The session is still usable and holds none of the batch.
        let rows = session.fetch(Select::table("wacc_annual")).await.unwrap();
        assert!(rows.is_empty());
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_rejects_ragged_rows() {
        let db = memory_db().await;
        let mut session = db.acquire().await.unwrap();
        let batch = BatchUpsert::new("growth_weight_factors", ["factor"], ["factor", "weight"])
            .row(vec!["Revenue".into()]);
        assert!(matches!(
            upsert_batch(&mut session, batch).await,
            Err(StoreError::InvalidStatement(_))
        ));
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_rejects_bad_table_name() {
        let db = memory_db().await;
        let mut session = db.acquire().await.unwrap();
        let batch = BatchUpsert::new("weights; DROP TABLE companies", ["factor"], ["factor", "weight"])
            .row(vec!["Revenue".into(), 1.0.into()]);
        assert!(matches!(
            upsert_batch(&mut session, batch).await,
            Err(StoreError::InvalidStatement(_))
        ));
        assert!(crate::schema::table_exists(&mut session, "companies").await.unwrap());
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_from_query() {
        let db = memory_db().await;
        let mut session = db.acquire().await.unwrap();
        session
            .run(Sql::new("INSERT INTO companies (id, name, ticker) VALUES (1, 'Apple', 'AAPL')"))
            .await
            .unwrap();
        session
            .run(Sql::new(
                "INSERT INTO roic_direct_upload_annual (company_id, fiscal_year, roic_pct) VALUES (1, 2024, 30.0)",
            ))
            .await
            .unwrap();

        let source = Sql::new(
            "SELECT company_id, fiscal_year, roic_pct FROM roic_direct_upload_annual WHERE company_id = ?",
        )
        .bind(1_i64);
        let columns = ["company_id", "fiscal_year", "wacc"];
        let key = ["company_id", "fiscal_year"];
        assert_eq!(
            upsert_from_query(&mut session, "wacc_annual", &columns, &key, source.clone())
                .await
                .unwrap(),
            1
        );
        // Re-running updates in place.
        upsert_from_query(&mut session, "wacc_annual", &columns, &key, source)
            .await
            .unwrap();
        let rows = session.fetch(Select::table("wacc_annual")).await.unwrap();
        assert_eq!(rows.len(), 1);
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_all() {
        let db = memory_db().await;
        let mut session = db.acquire().await.unwrap();
        let first = BatchUpsert::new("growth_weight_factors", ["factor"], ["factor", "weight"])
            .row(vec!["A".into(), 0.1.into()])
            .row(vec!["B".into(), 0.2.into()]);
        upsert_batch(&mut session, first).await.unwrap();

        let replacement = BatchUpsert::new("growth_weight_factors", ["factor"], ["factor", "weight"])
            .row(vec!["C".into(), 1.0.into()]);
        assert_eq!(replace_all(&mut session, replacement).await.unwrap(), 1);

        let factors: Vec<String> = session
            .fetch(Select::table("growth_weight_factors").columns(["factor"]))
            .await
            .unwrap()
            .column("factor")
            .unwrap();
        assert_eq!(factors, vec!["C".to_string()]);
        session.commit().await.unwrap();
    }
}
