//! Groups ("buckets") of companies and their membership links.
//!
//! - Adding or removing members is idempotent.
//! - Deleting a group deletes its membership rows in the same transaction.
//!   The child delete is always issued explicitly; the `ON DELETE CASCADE`
//!   on the link table only backs it up, so both backends end in the same
//!   state whether or not the connection enforces foreign keys.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::bridge::{Delete, Filter, Order, Select, Sql};
use crate::dialect::ConflictAction;
use crate::error::{ConstraintKind, StoreError, StoreResult};
use crate::read::{read_column, read_table};
use crate::session::Session;
use crate::write::{run_guarded, upsert_batch, BatchUpsert};

pub const DEFAULT_GROUP_TYPE: &str = "bucket";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub group_type: String,
    pub members: i64,
}

/// Id of the group called `name` (trimmed) of the given type.
///
/// With `create`, a missing group is created first. A blank name is never a
/// group.
pub async fn group_id_for(
    session: &mut Session,
    name: &str,
    group_type: &str,
    create: bool,
) -> StoreResult<Option<i64>> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    let group_type = match group_type.trim() {
        "" => DEFAULT_GROUP_TYPE,
        other => other,
    };

    if let Some(id) = find_group(session, name, group_type).await? {
        return Ok(Some(id));
    }
    if !create {
        return Ok(None);
    }

    let insert = crate::bridge::Insert::into_table("company_groups", ["name", "group_type"])
        .row(vec![name.into(), group_type.into()])
        .on_conflict(["name", "group_type"], ConflictAction::DoNothing);
    run_guarded(session, insert.into()).await?;
    debug!(session = %session.id(), group = name, group_type, "Group created");

    find_group(session, name, group_type).await
}

async fn find_group(session: &mut Session, name: &str, group_type: &str) -> StoreResult<Option<i64>> {
    read_table(
        session,
        Select::table("company_groups")
            .columns(["id"])
            .filter(Filter::eq("name", name))
            .filter(Filter::eq("group_type", group_type)),
    )
    .await?
    .scalar()
}

/// Add companies to a group. Existing members are skipped. Returns how many
/// links were actually created.
///
/// Fails with a foreign-key `ConstraintViolation` when the group or any of
/// the companies does not exist, whatever the connection's pragma says.
pub async fn add_members(
    session: &mut Session,
    group_id: i64,
    company_ids: &[i64],
) -> StoreResult<u64> {
    let ids: BTreeSet<i64> = company_ids.iter().copied().collect();
    if ids.is_empty() {
        return Ok(0);
    }

    let group_exists = !read_table(
        session,
        Select::table("company_groups")
            .columns(["id"])
            .filter(Filter::eq("id", group_id)),
    )
    .await?
    .is_empty();
    if !group_exists {
        return Err(missing_parent(format!("group {group_id} does not exist")));
    }

    let known: BTreeSet<i64> = read_column::<i64>(
        session,
        Select::table("companies")
            .columns(["id"])
            .filter(Filter::is_in("id", ids.iter().copied())),
        "id",
    )
    .await?
    .into_iter()
    .collect();
    if let Some(missing) = ids.difference(&known).next() {
        return Err(missing_parent(format!("company {missing} does not exist")));
    }

    let mut batch = BatchUpsert::new(
        "company_group_members",
        ["group_id", "company_id"],
        ["group_id", "company_id"],
    )
    .on_conflict(ConflictAction::DoNothing);
    for id in &ids {
        batch.push(vec![group_id.into(), (*id).into()]);
    }
    let added = upsert_batch(session, batch).await?;
    debug!(session = %session.id(), group = group_id, requested = ids.len(), added, "add_members");
    Ok(added)
}

fn missing_parent(message: String) -> StoreError {
    StoreError::ConstraintViolation {
        kind: ConstraintKind::ForeignKey,
        message,
    }
}

/// Remove companies from a group. Non-members are ignored. Returns how many
/// links were removed.
pub async fn remove_members(
    session: &mut Session,
    group_id: i64,
    company_ids: &[i64],
) -> StoreResult<u64> {
    let ids: BTreeSet<i64> = company_ids.iter().copied().collect();
    if ids.is_empty() {
        return Ok(0);
    }
    let removed = session
        .run(
            Delete::from_table("company_group_members")
                .filter(Filter::eq("group_id", group_id))
                .filter(Filter::is_in("company_id", ids)),
        )
        .await?;
    debug!(session = %session.id(), group = group_id, removed, "remove_members");
    Ok(removed)
}

/// Delete a group and all of its membership rows as one unit. Returns
/// whether the group existed.
pub async fn delete_group(session: &mut Session, group_id: i64) -> StoreResult<bool> {
    let savepoint = session.savepoint().await?;
    match delete_group_rows(session, group_id).await {
        Ok(existed) => {
            session.release(savepoint).await?;
            debug!(session = %session.id(), group = group_id, existed, "delete_group");
            Ok(existed)
        }
        Err(e) => {
            session.rollback_to(savepoint).await?;
            Err(e)
        }
    }
}

async fn delete_group_rows(session: &mut Session, group_id: i64) -> StoreResult<bool> {
    session
        .run(Delete::from_table("company_group_members").filter(Filter::eq("group_id", group_id)))
        .await?;
    let deleted = session
        .run(Delete::from_table("company_groups").filter(Filter::eq("id", group_id)))
        .await?;
    Ok(deleted > 0)
}

/// Company ids in a group, ascending.
pub async fn members_of(session: &mut Session, group_id: i64) -> StoreResult<Vec<i64>> {
    read_column(
        session,
        Select::table("company_group_members")
            .columns(["company_id"])
            .filter(Filter::eq("group_id", group_id))
            .order_by("company_id", Order::Asc),
        "company_id",
    )
    .await
}

/// Groups ordered by name, optionally of one type, with member counts.
pub async fn list_groups(session: &mut Session, group_type: Option<&str>) -> StoreResult<Vec<Group>> {
    let mut sql = String::from(
        "SELECT g.id AS id, g.name AS name, g.group_type AS group_type, \
         (SELECT COUNT(*) FROM company_group_members m WHERE m.group_id = g.id) AS members \
         FROM company_groups g",
    );
    let mut params = Vec::new();
    if let Some(group_type) = group_type {
        sql.push_str(" WHERE g.group_type = ?");
        params.push(group_type);
    }
    sql.push_str(" ORDER BY g.name, g.id");
    let query = Sql::new(sql).bind_all(params);

    let table = read_table(session, query).await?;
    table
        .iter()
        .map(|row| -> StoreResult<Group> {
            Ok(Group {
                id: row.get("id")?,
                name: row.get("name")?,
                group_type: row.get("group_type")?,
                members: row.get("members")?,
            })
        })
        .collect()
}
