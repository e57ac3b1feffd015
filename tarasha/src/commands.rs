//! Subcommand handlers. Each one opens the database, runs its unit of work
//! and prints the result as JSON on stdout.

use serde::Serialize;
use serde_json::json;
use tarasha_store::companies::{company_id_for, upsert_company};
use tarasha_store::copy::{copy_database, CopyOptions};
use tarasha_store::membership::{
    add_members, delete_group, group_id_for, list_groups, members_of, remove_members,
};
use tarasha_store::schema::EXPECTED_SCHEMA_VERSION;
use tarasha_store::settings::{self, seed_defaults, RiskFreeRate};
use tarasha_store::{read_table, Database, Order, Select, Session, StoreConfig, StoreError};
use tracing::info;

use crate::{CliError, GroupAction, RateAction};

/// Environment config, with the URL replaced when one was given.
fn config(url: Option<String>) -> Result<StoreConfig, CliError> {
    let mut config = StoreConfig::from_env()?;
    if let Some(url) = url {
        config.url = url;
        if config.is_in_memory() {
            config = config.with_max_connections(1);
        }
    }
    Ok(config)
}

fn print<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn migrate(url: Option<String>) -> Result<(), CliError> {
    let db = Database::open(config(url)?.with_auto_migrate(true)).await?;
    let version = db.schema_version().await?;
    info!(backend = %db.backend(), version, "Database migrated");
    print(&json!({ "backend": db.backend(), "schema_version": version }))?;
    db.close().await;
    Ok(())
}

pub async fn status(url: Option<String>) -> Result<(), CliError> {
    let config = config(url)?.with_auto_migrate(false);
    let backend = config.backend()?;
    let target = config.redacted_url();
    let recorded = match Database::open(config).await {
        Ok(db) => {
            let version = db.schema_version().await?;
            db.close().await;
            version
        }
        Err(StoreError::SchemaVersionMismatch { found, .. }) => found,
        Err(e) => return Err(e.into()),
    };
    print(&json!({
        "backend": backend,
        "url": target,
        "expected_version": EXPECTED_SCHEMA_VERSION,
        "recorded_version": recorded,
        "up_to_date": recorded >= EXPECTED_SCHEMA_VERSION,
    }))
}

pub async fn seed(url: Option<String>) -> Result<(), CliError> {
    let db = Database::open(config(url)?).await?;
    let report = db
        .unit_of_work(|s| Box::pin(async move { seed_defaults(s).await }))
        .await?;
    print(&report)?;
    db.close().await;
    Ok(())
}

pub async fn copy(
    from: String,
    to: String,
    batch_size: usize,
    truncate: bool,
) -> Result<(), CliError> {
    let source = Database::open(StoreConfig::new(from).with_auto_migrate(false)).await?;
    let target = Database::open(StoreConfig::new(to).with_auto_migrate(true)).await?;
    let report = copy_database(
        &source,
        &target,
        CopyOptions {
            batch_size,
            truncate,
        },
    )
    .await?;
    print(&report)?;
    source.close().await;
    target.close().await;
    Ok(())
}

async fn require_group(
    session: &mut Session,
    name: &str,
    group_type: &str,
) -> Result<i64, CliError> {
    group_id_for(session, name, group_type, false)
        .await?
        .ok_or_else(|| CliError::GroupNotFound {
            name: name.to_string(),
            group_type: group_type.to_string(),
        })
}

async fn resolve_tickers(session: &mut Session, tickers: &[String]) -> Result<Vec<i64>, CliError> {
    let mut ids = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let id = company_id_for(session, ticker)
            .await?
            .ok_or_else(|| CliError::UnknownTicker(ticker.clone()))?;
        ids.push(id);
    }
    Ok(ids)
}

async fn members_json(session: &mut Session, group: i64) -> Result<serde_json::Value, CliError> {
    let ids = members_of(session, group).await?;
    let companies = read_table(
        session,
        Select::table("companies")
            .columns(["id", "name", "ticker", "country"])
            .filter(tarasha_store::Filter::is_in("id", ids))
            .order_by("id", Order::Asc),
    )
    .await?;
    Ok(json!({ "group_id": group, "members": companies.to_records() }))
}

pub async fn groups(url: Option<String>, action: GroupAction) -> Result<(), CliError> {
    let db = Database::open(config(url)?).await?;
    let mut session = db.acquire().await?;
    match run_group_action(&mut session, action).await {
        Ok(output) => {
            session.commit().await?;
            print(&output)?;
        }
        Err(e) => {
            session.rollback().await?;
            return Err(e);
        }
    }
    db.close().await;
    Ok(())
}

async fn run_group_action(
    session: &mut Session,
    action: GroupAction,
) -> Result<serde_json::Value, CliError> {
    let output = match action {
        GroupAction::List { group_type } => {
            json!(list_groups(session, group_type.as_deref()).await?)
        }
        GroupAction::Show { name, group_type } => {
            let group = require_group(session, &name, &group_type).await?;
            members_json(session, group).await?
        }
        GroupAction::Create { name, group_type } => {
            let group = group_id_for(session, &name, &group_type, true)
                .await?
                .ok_or_else(|| CliError::GroupNotFound {
                    name: name.clone(),
                    group_type: group_type.clone(),
                })?;
            json!({ "group_id": group, "name": name.trim(), "group_type": group_type })
        }
        GroupAction::Add {
            name,
            tickers,
            group_type,
        } => {
            let group = require_group(session, &name, &group_type).await?;
            let ids = resolve_tickers(session, &tickers).await?;
            let added = add_members(session, group, &ids).await?;
            json!({ "group_id": group, "added": added })
        }
        GroupAction::Remove {
            name,
            tickers,
            group_type,
        } => {
            let group = require_group(session, &name, &group_type).await?;
            let ids = resolve_tickers(session, &tickers).await?;
            let removed = remove_members(session, group, &ids).await?;
            json!({ "group_id": group, "removed": removed })
        }
        GroupAction::Delete { name, group_type } => {
            let group = require_group(session, &name, &group_type).await?;
            let deleted = delete_group(session, group).await?;
            json!({ "group_id": group, "deleted": deleted })
        }
    };
    Ok(output)
}

pub async fn risk_free_rate(url: Option<String>, action: RateAction) -> Result<(), CliError> {
    let db = Database::open(config(url)?).await?;
    match action {
        RateAction::Get { year } => {
            let rate = db
                .read(|s| Box::pin(async move { settings::get::<RiskFreeRate>(s, &year).await }))
                .await?;
            print(&json!({ "year": year, "rate": rate }))?;
        }
        RateAction::Set {
            year,
            usa,
            india,
            china,
            japan,
        } => {
            let rate = RiskFreeRate::new(year, usa, india, china, japan);
            let stored = rate.clone();
            db.unit_of_work(|s| {
                let rate = rate.clone();
                Box::pin(async move { settings::set(s, &rate).await })
            })
            .await?;
            print(&stored)?;
        }
    }
    db.close().await;
    Ok(())
}

async fn stage(session: &mut Session, name: &str, query: Select) -> Result<(), CliError> {
    let rows = read_table(session, query).await?;
    println!(
        "{}",
        serde_json::to_string(&json!({ "stage": name, "rows": rows.to_records() }))?
    );
    Ok(())
}

fn membership_query() -> Select {
    Select::table("company_group_members")
        .columns(["group_id", "company_id"])
        .order_by("company_id", Order::Asc)
}

/// Create two companies and a group, add both, remove one, delete the
/// group, and print the membership table after each step.
pub async fn smoke(url: Option<String>, commit: bool) -> Result<(), CliError> {
    let db = Database::open(config(url)?).await?;
    let mut session = db.acquire().await?;
    let result = run_smoke(&mut session).await;
    match (result, commit) {
        (Ok(()), true) => session.commit().await?,
        (Ok(()), false) => session.rollback().await?,
        (Err(e), _) => {
            session.rollback().await?;
            return Err(e);
        }
    }
    info!(committed = commit, "Smoke scenario finished");
    db.close().await;
    Ok(())
}

async fn run_smoke(session: &mut Session) -> Result<(), CliError> {
    let a = upsert_company(session, "TestCo A", "TCA", None).await?;
    let b = upsert_company(session, "TestCo B", "TCB", None).await?;
    let group = group_id_for(session, "SmokeBucket", "bucket", true)
        .await?
        .ok_or_else(|| CliError::GroupNotFound {
            name: "SmokeBucket".into(),
            group_type: "bucket".into(),
        })?;

    add_members(session, group, &[a, b]).await?;
    stage(session, "members_after_add", membership_query()).await?;

    remove_members(session, group, &[a]).await?;
    stage(session, "members_after_remove", membership_query()).await?;

    delete_group(session, group).await?;
    stage(
        session,
        "groups_after_delete",
        Select::table("company_groups")
            .columns(["id", "name"])
            .order_by("id", Order::Asc),
    )
    .await?;
    stage(session, "members_after_delete", membership_query()).await?;
    Ok(())
}
