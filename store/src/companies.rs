//! Company rows: the parents of group memberships and annual metrics.

use serde::Serialize;
use tracing::debug;

use crate::bridge::{Delete, Filter, Order, Select, Update};
use crate::dialect::ConflictAction;
use crate::error::{StoreError, StoreResult};
use crate::read::read_table;
use crate::session::Session;
use crate::table::RowRef;
use crate::write::{upsert, Upsert};

pub const DEFAULT_COUNTRY: &str = "USA";

/// Tables holding rows that reference `companies.id`.
const CHILD_TABLES: [&str; 8] = [
    "company_group_members",
    "roic_direct_upload_annual",
    "wacc_annual",
    "roic_wacc_spread_annual",
    "revenues_ttm",
    "op_margin_ttm",
    "pretax_income_ttm",
    "net_income_ttm",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub ticker: String,
    pub country: String,
}

impl Company {
    fn from_row(row: RowRef<'_>) -> StoreResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            ticker: row.get("ticker")?,
            country: row.get("country")?,
        })
    }
}

/// Map the many spellings of the supported countries onto one name each.
/// Blank becomes `USA`; anything unrecognized is kept, trimmed.
pub fn canonicalize_country(country: &str) -> String {
    let trimmed = country.trim();
    if trimmed.is_empty() {
        return DEFAULT_COUNTRY.to_string();
    }
    let canonical = match trimmed.to_uppercase().as_str() {
        "USA" | "US" | "UNITED STATES" | "UNITED STATES OF AMERICA" => "USA",
        "INDIA" | "IN" | "REPUBLIC OF INDIA" => "India",
        "CHINA" | "CN" | "PRC" | "PEOPLE'S REPUBLIC OF CHINA" | "PEOPLES REPUBLIC OF CHINA" => {
            "China"
        }
        "JAPAN" | "JP" => "Japan",
        "UK" | "UNITED KINGDOM" | "GREAT BRITAIN" | "BRITAIN" | "GB" => "UK",
        "UAE" | "UNITED ARAB EMIRATES" | "AE" => "UAE",
        _ => return trimmed.to_string(),
    };
    canonical.to_string()
}

/// Insert the company if it is new and return its id.
///
/// `country` is canonicalized; `None` never overwrites a stored country.
pub async fn upsert_company(
    session: &mut Session,
    name: &str,
    ticker: &str,
    country: Option<&str>,
) -> StoreResult<i64> {
    let name = name.trim();
    let ticker = ticker.trim();
    if name.is_empty() || ticker.is_empty() {
        return Err(StoreError::InvalidStatement(
            "company name and ticker must not be blank".into(),
        ));
    }
    let canonical = country.map(canonicalize_country);

    let insert = Upsert::into_table("companies")
        .key("name", name)
        .key("ticker", ticker)
        .set(
            "country",
            canonical.clone().unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
        )
        .on_conflict(ConflictAction::DoNothing);
    upsert(session, insert).await?;

    if let Some(country) = canonical {
        session
            .run(
                Update::table("companies")
                    .set("country", country)
                    .filter(Filter::eq("name", name))
                    .filter(Filter::eq("ticker", ticker)),
            )
            .await?;
    }

    let table = read_table(
        session,
        Select::table("companies")
            .columns(["id"])
            .filter(Filter::eq("name", name))
            .filter(Filter::eq("ticker", ticker)),
    )
    .await?;
    table.scalar()?.ok_or_else(|| StoreError::Decode {
        column: "id".into(),
        reason: format!("company {name} ({ticker}) missing after upsert"),
    })
}

/// Lowest id among companies with this ticker.
pub async fn company_id_for(session: &mut Session, ticker: &str) -> StoreResult<Option<i64>> {
    let ticker = ticker.trim();
    if ticker.is_empty() {
        return Ok(None);
    }
    read_table(
        session,
        Select::table("companies")
            .columns(["id"])
            .filter(Filter::eq("ticker", ticker))
            .order_by("id", Order::Asc)
            .limit(1),
    )
    .await?
    .scalar()
}

pub async fn get_company(session: &mut Session, id: i64) -> StoreResult<Option<Company>> {
    let table = read_table(
        session,
        Select::table("companies")
            .columns(["id", "name", "ticker", "country"])
            .filter(Filter::eq("id", id)),
    )
    .await?;
    table.first().map(Company::from_row).transpose()
}

pub async fn list_companies(session: &mut Session) -> StoreResult<Vec<Company>> {
    let table = read_table(
        session,
        Select::table("companies")
            .columns(["id", "name", "ticker", "country"])
            .order_by("name", Order::Asc)
            .order_by("id", Order::Asc),
    )
    .await?;
    table.iter().map(Company::from_row).collect()
}

/// Stored country of a company, `USA` when unknown.
pub async fn company_country(session: &mut Session, id: i64) -> StoreResult<String> {
    Ok(get_company(session, id)
        .await?
        .map(|c| canonicalize_country(&c.country))
        .unwrap_or_else(|| DEFAULT_COUNTRY.to_string()))
}

/// Delete a company together with its memberships and metric rows.
///
/// Child rows are deleted explicitly, so the result does not depend on
/// whether the connection enforces foreign keys. Returns whether the
/// company existed.
pub async fn delete_company(session: &mut Session, id: i64) -> StoreResult<bool> {
    let savepoint = session.savepoint().await?;
    match delete_company_rows(session, id).await {
        Ok(deleted) => {
            session.release(savepoint).await?;
            debug!(session = %session.id(), company = id, deleted, "delete_company");
            Ok(deleted)
        }
        Err(e) => {
            session.rollback_to(savepoint).await?;
            Err(e)
        }
    }
}

async fn delete_company_rows(session: &mut Session, id: i64) -> StoreResult<bool> {
    for table in CHILD_TABLES {
        session
            .run(Delete::from_table(table).filter(Filter::eq("company_id", id)))
            .await?;
    }
    let deleted = session
        .run(Delete::from_table("companies").filter(Filter::eq("id", id)))
        .await?;
    Ok(deleted > 0)
}
