//! Admin settings: small keyed tables edited from the admin screens.
//!
//! Each kind is a plain struct implementing [`Setting`]. The functions here
//! are generic over the kind and all go through the keyed upsert of the
//! write path, so `set` can never leave two rows for one key.
//!
//! ```ignore
//! settings::set(&mut session, &RiskFreeRate::new(2025, 4.40, 6.49, 1.83, 1.80)).await?;
//! let rate = settings::get::<RiskFreeRate>(&mut session, &2025).await?;
//! ```

mod kinds;
mod seed;

pub use kinds::{
    CountryRiskPremium, GrowthWeight, ImpliedErp, IndexPriceMovement, IndustryBeta,
    MarginalTaxRate, RiskFreeRate, StddevWeight,
};
pub use seed::{seed_defaults, SeedReport};

use chrono::{SecondsFormat, Utc};
use tracing::debug;

use crate::bridge::{Delete, Filter, Order, Select};
use crate::error::StoreResult;
use crate::read::read_table;
use crate::session::Session;
use crate::table::RowRef;
use crate::value::Value;
use crate::write::{self, upsert, upsert_batch, BatchUpsert, Upsert};

/// Column stamped with the time of the last `set`.
pub const UPDATED_AT: &str = "updated_at";

/// A row of one settings table.
pub trait Setting: Sized {
    const TABLE: &'static str;
    const KEY_COLUMNS: &'static [&'static str];
    const VALUE_COLUMNS: &'static [&'static str];
    /// Whether the table has an `updated_at` column.
    const STAMPED: bool = true;

    type Key;

    /// Key values in `KEY_COLUMNS` order.
    fn key_values(key: &Self::Key) -> Vec<Value>;
    fn key(&self) -> Self::Key;
    /// Values in `VALUE_COLUMNS` order.
    fn values(&self) -> Vec<Value>;
    fn from_row(row: RowRef<'_>) -> StoreResult<Self>;
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn columns<S: Setting>() -> Vec<&'static str> {
    let mut columns: Vec<&'static str> = S::KEY_COLUMNS.to_vec();
    columns.extend_from_slice(S::VALUE_COLUMNS);
    if S::STAMPED {
        columns.push(UPDATED_AT);
    }
    columns
}

fn row_values<S: Setting>(setting: &S, stamp: &str) -> Vec<Value> {
    let mut values = S::key_values(&setting.key());
    values.extend(setting.values());
    if S::STAMPED {
        values.push(stamp.into());
    }
    values
}

fn key_filters<S: Setting>(key: &S::Key) -> impl Iterator<Item = Filter> {
    S::KEY_COLUMNS
        .iter()
        .zip(S::key_values(key))
        .map(|(column, value)| Filter::eq(*column, value))
}

fn batch<S: Setting>(settings: &[S]) -> BatchUpsert {
    let stamp = now();
    let mut batch = BatchUpsert::new(S::TABLE, S::KEY_COLUMNS.iter().copied(), columns::<S>());
    for setting in settings {
        batch.push(row_values(setting, &stamp));
    }
    batch
}

/// The row for `key`, if any.
pub async fn get<S: Setting>(session: &mut Session, key: &S::Key) -> StoreResult<Option<S>> {
    let mut query = Select::table(S::TABLE).columns(S::KEY_COLUMNS.iter().chain(S::VALUE_COLUMNS).copied());
    for filter in key_filters::<S>(key) {
        query = query.filter(filter);
    }
    let table = read_table(session, query).await?;
    table.first().map(S::from_row).transpose()
}

/// Insert the row, or overwrite the stored values for its key.
pub async fn set<S: Setting>(session: &mut Session, setting: &S) -> StoreResult<()> {
    let stamp = now();
    let mut row = Upsert::into_table(S::TABLE);
    for (column, value) in S::KEY_COLUMNS.iter().zip(S::key_values(&setting.key())) {
        row = row.key(*column, value);
    }
    for (column, value) in S::VALUE_COLUMNS.iter().zip(setting.values()) {
        row = row.set(*column, value);
    }
    if S::STAMPED {
        row = row.set(UPDATED_AT, stamp);
    }
    upsert(session, row).await?;
    debug!(session = %session.id(), table = S::TABLE, "Setting stored");
    Ok(())
}

/// Every row, in key order.
pub async fn list<S: Setting>(session: &mut Session) -> StoreResult<Vec<S>> {
    let mut query = Select::table(S::TABLE).columns(S::KEY_COLUMNS.iter().chain(S::VALUE_COLUMNS).copied());
    for column in S::KEY_COLUMNS {
        query = query.order_by(*column, Order::Asc);
    }
    let table = read_table(session, query).await?;
    table.iter().map(S::from_row).collect()
}

/// Upsert many rows at once; all of them are stored or none are.
pub async fn set_many<S: Setting>(session: &mut Session, settings: &[S]) -> StoreResult<u64> {
    upsert_batch(session, batch(settings)).await
}

/// Make `settings` the whole content of the table.
pub async fn replace_all<S: Setting>(session: &mut Session, settings: &[S]) -> StoreResult<u64> {
    write::replace_all(session, batch(settings)).await
}

/// Delete the row for `key`. Returns whether it existed.
pub async fn delete<S: Setting>(session: &mut Session, key: &S::Key) -> StoreResult<bool> {
    let mut statement = Delete::from_table(S::TABLE);
    for filter in key_filters::<S>(key) {
        statement = statement.filter(filter);
    }
    Ok(session.run(statement).await? > 0)
}

/// Number of rows in the table.
pub async fn count<S: Setting>(session: &mut Session) -> StoreResult<i64> {
    let n: Option<i64> = session
        .fetch(format!("SELECT COUNT(*) AS n FROM {}", S::TABLE))
        .await?
        .scalar()?;
    Ok(n.unwrap_or(0))
}
