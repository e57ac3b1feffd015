//! Integration tests against a PostgreSQL server.
//!
//! These tests require a running PostgreSQL instance whose URL is given in
//! `TARASHA_TEST_POSTGRES_URL`.
//! Run with: `cargo test -p tarasha-store --features integration --test postgres_integration`

#![cfg(feature = "integration")]

use std::collections::BTreeMap;

use serial_test::serial;
use tarasha_store::companies::{delete_company, upsert_company};
use tarasha_store::dialect::ConflictAction;
use tarasha_store::membership::{add_members, delete_group, group_id_for, members_of, remove_members};
use tarasha_store::metrics::{
    annual_metric, refresh_roic_wacc_spread, ttm_snapshot, upsert_annual_metric, upsert_ttm,
    MetricKind, TtmKind,
};
use tarasha_store::schema::EXPECTED_SCHEMA_VERSION;
use tarasha_store::settings::{self, RiskFreeRate};
use tarasha_store::{
    upsert, Backend, ConstraintKind, Database, Select, Session, Sql, StoreConfig, StoreError, Upsert,
};

const URL_ENV: &str = "TARASHA_TEST_POSTGRES_URL";
const TEST_TICKERS: [&str; 3] = ["ZZTEST1", "ZZTEST2", "ZZTEST3"];
const TEST_GROUP: &str = "integration-test Tech-5";
const TEST_YEAR: i32 = 2099;

async fn open() -> Database {
    let url = std::env::var(URL_ENV).expect("TARASHA_TEST_POSTGRES_URL must be set");
    Database::open(StoreConfig::new(url))
        .await
        .expect("Failed to connect to test database")
}

/// Remove everything the tests create.
async fn cleanup(db: &Database) {
    let mut session = db.acquire().await.unwrap();
    session
        .run(
            Sql::new("DELETE FROM company_groups WHERE name = ?").bind(TEST_GROUP),
        )
        .await
        .unwrap();
    session
        .run(
            Sql::new("DELETE FROM companies WHERE ticker IN (?, ?, ?)")
                .bind_all(TEST_TICKERS),
        )
        .await
        .unwrap();
    settings::delete::<RiskFreeRate>(&mut session, &TEST_YEAR)
        .await
        .unwrap();
    session.commit().await.unwrap();
}

async fn test_companies(session: &mut Session) -> Vec<i64> {
    let mut ids = Vec::new();
    for (i, ticker) in TEST_TICKERS.iter().enumerate() {
        ids.push(
            upsert_company(session, &format!("Integration Co {i}"), ticker, None)
                .await
                .unwrap(),
        );
    }
    ids
}

#[tokio::test]
#[serial]
async fn test_open_reports_backend_and_version() {
    let db = open().await;
    assert_eq!(db.backend(), Backend::Postgres);
    assert!(db.schema_version().await.unwrap() >= EXPECTED_SCHEMA_VERSION);
}

#[tokio::test]
#[serial]
async fn test_tech5_group_lifecycle() {
    let db = open().await;
    cleanup(&db).await;

    let mut session = db.acquire().await.unwrap();
    let ids = test_companies(&mut session).await;
    let group = group_id_for(&mut session, TEST_GROUP, "bucket", true)
        .await
        .unwrap()
        .unwrap();
    add_members(&mut session, group, &ids[..2]).await.unwrap();
    add_members(&mut session, group, &ids[1..]).await.unwrap();
    assert_eq!(members_of(&mut session, group).await.unwrap(), ids);

    assert_eq!(remove_members(&mut session, group, &[ids[1]]).await.unwrap(), 1);
    assert_eq!(remove_members(&mut session, group, &[ids[1]]).await.unwrap(), 0);

    assert!(delete_group(&mut session, group).await.unwrap());
    assert!(members_of(&mut session, group).await.unwrap().is_empty());
    assert_eq!(
        group_id_for(&mut session, TEST_GROUP, "bucket", false)
            .await
            .unwrap(),
        None
    );
    session.commit().await.unwrap();

    cleanup(&db).await;
}

#[tokio::test]
#[serial]
async fn test_risk_free_rate_update_keeps_one_row() {
    let db = open().await;
    cleanup(&db).await;

    let mut session = db.acquire().await.unwrap();
    for usa in [4.25, 4.40] {
        settings::set(&mut session, &RiskFreeRate::new(TEST_YEAR, usa, 6.49, 1.83, 1.80))
            .await
            .unwrap();
    }
    let rate = settings::get::<RiskFreeRate>(&mut session, &TEST_YEAR)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rate.usa, 4.40);
    let rows = session
        .fetch(Sql::new("SELECT COUNT(*) FROM risk_free_rates WHERE year = ?").bind(TEST_YEAR))
        .await
        .unwrap()
        .scalar::<i64>()
        .unwrap();
    assert_eq!(rows, Some(1));
    session.commit().await.unwrap();

    cleanup(&db).await;
}

#[tokio::test]
#[serial]
async fn test_constraint_violation_leaves_session_usable() {
    let db = open().await;
    cleanup(&db).await;

    let mut session = db.acquire().await.unwrap();
    let ids = test_companies(&mut session).await;
    let err = add_members(&mut session, -1, &ids).await.unwrap_err();
    assert!(err.is_constraint_violation());

    let orphan = upsert(
        &mut session,
        Upsert::into_table("wacc_annual")
            .key("company_id", -1)
            .key("fiscal_year", 2024)
            .set("wacc", 8.0),
    )
    .await;
    assert!(matches!(
        orphan,
        Err(StoreError::ConstraintViolation {
            kind: ConstraintKind::ForeignKey,
            ..
        })
    ));

    // The failed write was rolled back to its savepoint; the transaction
    // is still alive.
    let count = session
        .fetch(Select::table("companies").columns(["id"]))
        .await
        .unwrap()
        .len();
    assert!(count >= ids.len());
    session.rollback().await.unwrap();

    cleanup(&db).await;
}

#[tokio::test]
#[serial]
async fn test_replace_row_is_unsupported() {
    let db = open().await;
    let mut session = db.acquire().await.unwrap();
    let result = upsert(
        &mut session,
        Upsert::into_table("risk_free_rates")
            .key("year", TEST_YEAR)
            .set("usa_rf", 1.0)
            .on_conflict(ConflictAction::ReplaceRow),
    )
    .await;
    assert!(matches!(
        result,
        Err(StoreError::DialectUnsupportedOperation { .. })
    ));
    session.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_refresh_spread_and_delete_company() {
    let db = open().await;
    cleanup(&db).await;

    let mut session = db.acquire().await.unwrap();
    let ids = test_companies(&mut session).await;
    let company = ids[0];
    let years = |pairs: &[(i32, f64)]| pairs.iter().copied().collect::<BTreeMap<_, _>>();

    upsert_annual_metric(&mut session, MetricKind::Roic, company, &years(&[(2024, 30.0)]))
        .await
        .unwrap();
    upsert_annual_metric(&mut session, MetricKind::Wacc, company, &years(&[(2024, 8.0)]))
        .await
        .unwrap();
    refresh_roic_wacc_spread(&mut session, Some(company)).await.unwrap();
    upsert_annual_metric(&mut session, MetricKind::Wacc, company, &years(&[(2024, 10.0)]))
        .await
        .unwrap();
    refresh_roic_wacc_spread(&mut session, Some(company)).await.unwrap();
    assert_eq!(
        annual_metric(&mut session, MetricKind::Spread, company).await.unwrap(),
        years(&[(2024, 20.0)])
    );

    assert!(delete_company(&mut session, company).await.unwrap());
    assert!(annual_metric(&mut session, MetricKind::Spread, company)
        .await
        .unwrap()
        .is_empty());
    session.commit().await.unwrap();

    cleanup(&db).await;
}

#[tokio::test]
#[serial]
async fn test_ttm_snapshot_converges() {
    let db = open().await;
    cleanup(&db).await;

    let mut session = db.acquire().await.unwrap();
    let company = test_companies(&mut session).await[0];
    upsert_ttm(&mut session, TtmKind::OperatingMargin, company, "2024-09", 30.1)
        .await
        .unwrap();
    upsert_ttm(&mut session, TtmKind::OperatingMargin, company, "2024-12", 31.5)
        .await
        .unwrap();

    let snapshot = ttm_snapshot(&mut session, TtmKind::OperatingMargin, company)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.as_of, "2024-12");
    assert_eq!(snapshot.value, 31.5);
    let rows = session
        .fetch(Sql::new("SELECT COUNT(*) FROM op_margin_ttm WHERE company_id = ?").bind(company))
        .await
        .unwrap()
        .scalar::<i64>()
        .unwrap();
    assert_eq!(rows, Some(1));
    session.commit().await.unwrap();

    cleanup(&db).await;
}
