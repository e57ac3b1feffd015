//! Copy every managed table from one database to another, e.g. from the
//! embedded file into a fresh server database.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bridge::{Order, Select};
use crate::error::{StoreError, StoreResult};
use crate::schema::{TableInfo, TABLES};
use crate::session::{millis, Database, Session};
use crate::write::{upsert_batch, BatchUpsert};

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Rows per batch upsert.
    pub batch_size: usize,
    /// Empty every target table before copying.
    pub truncate: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            truncate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCopy {
    pub table: &'static str,
    pub rows_read: u64,
    pub rows_written: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyReport {
    pub tables: Vec<TableCopy>,
}

impl CopyReport {
    pub fn rows_read(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_read).sum()
    }

    pub fn rows_written(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_written).sum()
    }
}

/// Copy all catalog tables, parents first, in key order.
///
/// The source is read in one read-only session so every table comes from
/// the same snapshot. Everything written to the target commits together;
/// on error the target is left as it was.
pub async fn copy_database(
    source: &Database,
    target: &Database,
    options: CopyOptions,
) -> StoreResult<CopyReport> {
    if options.batch_size == 0 {
        return Err(StoreError::Config("copy batch size must be at least 1".into()));
    }
    let started = Instant::now();
    info!(
        from = %source.backend(),
        to = %target.backend(),
        batch_size = options.batch_size,
        truncate = options.truncate,
        "Copying database"
    );

    let mut reader = source.acquire_read().await?;
    let mut writer = target.acquire().await?;

    match copy_tables(&mut reader, &mut writer, options).await {
        Ok(report) => {
            reader.commit().await?;
            writer.commit().await?;
            info!(
                tables = report.tables.len(),
                rows = report.rows_written(),
                elapsed_ms = millis(started.elapsed()),
                "Copy complete"
            );
            Ok(report)
        }
        Err(e) => {
            warn!(error = %e, "Copy failed; target rolled back");
            if let Err(rollback_err) = writer.rollback().await {
                warn!(error = %rollback_err, "Target rollback failed");
            }
            if let Err(rollback_err) = reader.rollback().await {
                warn!(error = %rollback_err, "Source rollback failed");
            }
            Err(e)
        }
    }
}

async fn copy_tables(
    reader: &mut Session,
    writer: &mut Session,
    options: CopyOptions,
) -> StoreResult<CopyReport> {
    if options.truncate {
        for info in TABLES.iter().rev() {
            let sql = writer.dialect().truncate_sql(info.name);
            writer.batch(&sql).await?;
            debug!(table = info.name, "Truncated target table");
        }
    }

    let mut report = CopyReport::default();
    for info in TABLES {
        let copied = copy_table(reader, writer, info, options.batch_size).await?;
        info!(
            table = info.name,
            rows = copied.rows_written,
            "Copied table"
        );
        report.tables.push(copied);
    }

    for info in TABLES {
        let Some(column) = info.identity else {
            continue;
        };
        if let Some(sql) = writer.dialect().resync_identity_sql(info.name, column) {
            writer.fetch(sql).await?;
            debug!(table = info.name, column, "Identity sequence resynced");
        }
    }
    Ok(report)
}

async fn copy_table(
    reader: &mut Session,
    writer: &mut Session,
    info: &TableInfo,
    batch_size: usize,
) -> StoreResult<TableCopy> {
    let mut query = Select::table(info.name).columns(info.columns.iter().copied());
    for column in info.key {
        query = query.order_by(*column, Order::Asc);
    }
    let rows = reader.fetch(query).await?.into_rows();
    let rows_read = rows.len() as u64;

    let mut rows_written = 0;
    for chunk in rows.chunks(batch_size) {
        let mut batch = BatchUpsert::new(
            info.name,
            info.key.iter().copied(),
            info.columns.iter().copied(),
        );
        for row in chunk {
            batch.push(row.clone());
        }
        rows_written += upsert_batch(writer, batch).await?;
    }

    Ok(TableCopy {
        table: info.name,
        rows_read,
        rows_written,
    })
}
