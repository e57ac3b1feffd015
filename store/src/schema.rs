//! Schema catalog and version checks.
//!
//! Migrations live in `store/migrations/{sqlite,postgres}/` and are embedded
//! at compile time. Both directories carry the same versions; the recorded
//! version is the highest successfully applied migration.

use sqlx::migrate::Migrator;
use tracing::warn;

use crate::bridge::Sql;
use crate::dialect::Backend;
use crate::error::{StoreError, StoreResult};
use crate::session::Session;

/// Schema version this build reads and writes.
pub const EXPECTED_SCHEMA_VERSION: i64 = 4;

pub(crate) static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");
pub(crate) static POSTGRES_MIGRATOR: Migrator = sqlx::migrate!("./migrations/postgres");

pub(crate) fn migrator(backend: Backend) -> &'static Migrator {
    match backend {
        Backend::Sqlite => &SQLITE_MIGRATOR,
        Backend::Postgres => &POSTGRES_MIGRATOR,
    }
}

/// A table managed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableInfo {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    /// Natural key used as the conflict target when copying rows.
    pub key: &'static [&'static str],
    /// Generated id column whose sequence must follow copied ids.
    pub identity: Option<&'static str>,
}

/// Every managed table, parents before the tables that reference them.
pub static TABLES: &[TableInfo] = &[
    TableInfo {
        name: "companies",
        columns: &["id", "name", "ticker", "country"],
        key: &["id"],
        identity: Some("id"),
    },
    TableInfo {
        name: "company_groups",
        columns: &["id", "name", "group_type"],
        key: &["id"],
        identity: Some("id"),
    },
    TableInfo {
        name: "company_group_members",
        columns: &["group_id", "company_id"],
        key: &["group_id", "company_id"],
        identity: None,
    },
    TableInfo {
        name: "growth_weight_factors",
        columns: &["id", "factor", "weight"],
        key: &["factor"],
        identity: Some("id"),
    },
    TableInfo {
        name: "stddev_weight_factors",
        columns: &["id", "factor", "weight"],
        key: &["factor"],
        identity: Some("id"),
    },
    TableInfo {
        name: "risk_free_rates",
        columns: &["year", "usa_rf", "india_rf", "china_rf", "japan_rf", "updated_at"],
        key: &["year"],
        identity: None,
    },
    TableInfo {
        name: "index_annual_price_movement",
        columns: &["year", "nasdaq_composite", "sp500", "updated_at"],
        key: &["year"],
        identity: None,
    },
    TableInfo {
        name: "implied_equity_risk_premium_usa",
        columns: &["year", "implied_erp", "notes", "updated_at"],
        key: &["year"],
        identity: None,
    },
    TableInfo {
        name: "country_risk_premium",
        columns: &["year", "india", "china", "japan", "us", "uk", "uae", "updated_at"],
        key: &["year"],
        identity: None,
    },
    TableInfo {
        name: "marginal_corporate_tax_rates",
        columns: &["country", "year", "effective_rate", "notes", "updated_at"],
        key: &["country", "year"],
        identity: None,
    },
    TableInfo {
        name: "industry_betas",
        columns: &[
            "id",
            "user_industry_bucket",
            "mapped_sector",
            "unlevered_beta",
            "cash_adjusted_beta",
            "updated_at",
        ],
        key: &["user_industry_bucket", "mapped_sector"],
        identity: Some("id"),
    },
    TableInfo {
        name: "roic_direct_upload_annual",
        columns: &["company_id", "fiscal_year", "roic_pct"],
        key: &["company_id", "fiscal_year"],
        identity: None,
    },
    TableInfo {
        name: "wacc_annual",
        columns: &["company_id", "fiscal_year", "wacc"],
        key: &["company_id", "fiscal_year"],
        identity: None,
    },
    TableInfo {
        name: "roic_wacc_spread_annual",
        columns: &["company_id", "fiscal_year", "spread_pct"],
        key: &["company_id", "fiscal_year"],
        identity: None,
    },
    TableInfo {
        name: "revenues_ttm",
        columns: &["company_id", "as_of", "revenue"],
        key: &["company_id"],
        identity: None,
    },
    TableInfo {
        name: "op_margin_ttm",
        columns: &["company_id", "as_of", "margin"],
        key: &["company_id"],
        identity: None,
    },
    TableInfo {
        name: "pretax_income_ttm",
        columns: &["company_id", "as_of", "pretax_income"],
        key: &["company_id"],
        identity: None,
    },
    TableInfo {
        name: "net_income_ttm",
        columns: &["company_id", "as_of", "net_income"],
        key: &["company_id"],
        identity: None,
    },
];

pub fn table(name: &str) -> Option<&'static TableInfo> {
    TABLES.iter().find(|t| t.name == name)
}

pub async fn table_exists(session: &mut Session, name: &str) -> StoreResult<bool> {
    let sql = Sql::new(session.dialect().table_exists_sql()).bind(name);
    let count: Option<i64> = session.fetch(sql).await?.scalar()?;
    Ok(count.unwrap_or(0) > 0)
}

/// Highest applied migration version; 0 for a database never migrated.
pub async fn recorded_version(session: &mut Session) -> StoreResult<i64> {
    if !table_exists(session, "_sqlx_migrations").await? {
        return Ok(0);
    }
    let version: Option<i64> = session
        .fetch("SELECT MAX(version) AS version FROM _sqlx_migrations WHERE success = TRUE")
        .await?
        .scalar()?;
    Ok(version.unwrap_or(0))
}

/// Refuse a database older than this build; tolerate a newer one.
pub fn check_version(found: i64) -> StoreResult<()> {
    if found < EXPECTED_SCHEMA_VERSION {
        return Err(StoreError::SchemaVersionMismatch {
            expected: EXPECTED_SCHEMA_VERSION,
            found,
        });
    }
    if found > EXPECTED_SCHEMA_VERSION {
        warn!(
            found,
            expected = EXPECTED_SCHEMA_VERSION,
            "Database schema is newer than this build"
        );
    }
    Ok(())
}
