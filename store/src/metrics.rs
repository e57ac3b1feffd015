//! Per-company metrics: annual series, the derived ROIC - WACC spread, and
//! trailing-twelve-month (TTM) snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::bridge::{Filter, Order, Select, Sql};
use crate::error::StoreResult;
use crate::read::read_table;
use crate::session::Session;
use crate::write::{upsert, upsert_batch, upsert_from_query, BatchUpsert, Upsert};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Uploaded return on invested capital, percent.
    Roic,
    /// Weighted average cost of capital, percent.
    Wacc,
    /// ROIC minus WACC, percentage points. Derived; see
    /// [`refresh_roic_wacc_spread`].
    Spread,
}

impl MetricKind {
    pub fn table(self) -> &'static str {
        match self {
            MetricKind::Roic => "roic_direct_upload_annual",
            MetricKind::Wacc => "wacc_annual",
            MetricKind::Spread => "roic_wacc_spread_annual",
        }
    }

    pub fn value_column(self) -> &'static str {
        match self {
            MetricKind::Roic => "roic_pct",
            MetricKind::Wacc => "wacc",
            MetricKind::Spread => "spread_pct",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Roic => "roic",
            MetricKind::Wacc => "wacc",
            MetricKind::Spread => "spread",
        };
        f.write_str(name)
    }
}

/// TTM figures kept as one snapshot per company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TtmKind {
    Revenue,
    OperatingMargin,
    PretaxIncome,
    NetIncome,
}

impl TtmKind {
    pub const ALL: [TtmKind; 4] = [
        TtmKind::Revenue,
        TtmKind::OperatingMargin,
        TtmKind::PretaxIncome,
        TtmKind::NetIncome,
    ];

    pub fn table(self) -> &'static str {
        match self {
            TtmKind::Revenue => "revenues_ttm",
            TtmKind::OperatingMargin => "op_margin_ttm",
            TtmKind::PretaxIncome => "pretax_income_ttm",
            TtmKind::NetIncome => "net_income_ttm",
        }
    }

    pub fn value_column(self) -> &'static str {
        match self {
            TtmKind::Revenue => "revenue",
            TtmKind::OperatingMargin => "margin",
            TtmKind::PretaxIncome => "pretax_income",
            TtmKind::NetIncome => "net_income",
        }
    }
}

/// Latest TTM value and the period label it was reported for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TtmSnapshot {
    pub as_of: String,
    pub value: f64,
}

/// Replace a company's TTM snapshot. The company keeps exactly one row per
/// kind; a newer upload overwrites both the period and the value.
pub async fn upsert_ttm(
    session: &mut Session,
    kind: TtmKind,
    company_id: i64,
    as_of: &str,
    value: f64,
) -> StoreResult<u64> {
    upsert(
        session,
        Upsert::into_table(kind.table())
            .key("company_id", company_id)
            .set("as_of", as_of.trim())
            .set(kind.value_column(), value),
    )
    .await
}

pub async fn ttm_snapshot(
    session: &mut Session,
    kind: TtmKind,
    company_id: i64,
) -> StoreResult<Option<TtmSnapshot>> {
    let table = read_table(
        session,
        Select::table(kind.table())
            .columns(["as_of", kind.value_column()])
            .filter(Filter::eq("company_id", company_id)),
    )
    .await?;
    table
        .first()
        .map(|row| -> StoreResult<TtmSnapshot> {
            Ok(TtmSnapshot {
                as_of: row.get("as_of")?,
                value: row.get(kind.value_column())?,
            })
        })
        .transpose()
}

/// Store one value per fiscal year for a company, overwriting earlier
/// values for the same years.
pub async fn upsert_annual_metric(
    session: &mut Session,
    kind: MetricKind,
    company_id: i64,
    values: &BTreeMap<i32, f64>,
) -> StoreResult<u64> {
    let mut batch = BatchUpsert::new(
        kind.table(),
        ["company_id", "fiscal_year"],
        ["company_id", "fiscal_year", kind.value_column()],
    );
    for (year, value) in values {
        batch.push(vec![company_id.into(), (*year).into(), (*value).into()]);
    }
    let written = upsert_batch(session, batch).await?;
    debug!(session = %session.id(), metric = %kind, company = company_id, written, "Stored annual metric");
    Ok(written)
}

/// Values of one metric for a company, by fiscal year.
pub async fn annual_metric(
    session: &mut Session,
    kind: MetricKind,
    company_id: i64,
) -> StoreResult<BTreeMap<i32, f64>> {
    let table = read_table(
        session,
        Select::table(kind.table())
            .columns(["fiscal_year", kind.value_column()])
            .filter(Filter::eq("company_id", company_id))
            .order_by("fiscal_year", Order::Asc),
    )
    .await?;
    table
        .iter()
        .map(|row| -> StoreResult<(i32, f64)> {
            Ok((row.get("fiscal_year")?, row.get(kind.value_column())?))
        })
        .collect()
}

/// Recompute the spread for every (company, year) that has both an
/// uploaded ROIC and a WACC, for one company or for all of them.
///
/// Years missing either input keep whatever spread they had.
pub async fn refresh_roic_wacc_spread(
    session: &mut Session,
    company_id: Option<i64>,
) -> StoreResult<u64> {
    let mut source = String::from(
        "SELECT r.company_id AS company_id, r.fiscal_year AS fiscal_year, \
         r.roic_pct - w.wacc AS spread_pct \
         FROM roic_direct_upload_annual r \
         JOIN wacc_annual w ON w.company_id = r.company_id AND w.fiscal_year = r.fiscal_year \
         WHERE r.roic_pct IS NOT NULL AND w.wacc IS NOT NULL",
    );
    let mut params = Vec::new();
    if let Some(id) = company_id {
        source.push_str(" AND r.company_id = ?");
        params.push(id);
    }

    let written = upsert_from_query(
        session,
        MetricKind::Spread.table(),
        &["company_id", "fiscal_year", "spread_pct"],
        &["company_id", "fiscal_year"],
        Sql::new(source).bind_all(params),
    )
    .await?;
    debug!(session = %session.id(), company = ?company_id, written, "Refreshed ROIC - WACC spread");
    Ok(written)
}
