//! Portable statement descriptions and their rendering per dialect.

use crate::dialect::{ConflictAction, Dialect};
use crate::error::{StoreError, StoreResult};
use crate::value::Value;

/// Something the execution bridge can run.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Hand-written SQL using `?` placeholders.
    Sql(Sql),
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

/// SQL text and its positional parameters.
///
/// Parameters are written as `?` regardless of backend and renumbered for
/// dialects that need numbered placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Sql {
    text: String,
    params: Vec<Value>,
}

impl Sql {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn bind_all<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.params.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn as_sql(self) -> &'static str {
        match self {
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// One `WHERE` predicate. Predicates of a statement are joined with `AND`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Equality; a `Null` value matches `IS NULL`.
    Eq(String, Value),
    Cmp(String, CmpOp, Value),
    /// Membership; an empty list matches nothing.
    In(String, Vec<Value>),
    IsNull(String),
    NotNull(String),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn cmp(column: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Filter::Cmp(column.into(), op, value.into())
    }

    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull(column.into())
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Filter::NotNull(column.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: String,
    columns: Vec<String>,
    filters: Vec<Filter>,
    order_by: Vec<(String, Order)>,
    limit: Option<u64>,
}

impl Select {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Columns to return; all columns when never called.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Rows for an insert: literal values or the result of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Value>>),
    Query(Box<Statement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnConflict {
    pub target: Vec<String>,
    pub action: ConflictAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: String,
    columns: Vec<String>,
    source: InsertSource,
    on_conflict: Option<OnConflict>,
    returning: Vec<String>,
}

impl Insert {
    pub fn into_table<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            source: InsertSource::Values(Vec::new()),
            on_conflict: None,
            returning: Vec::new(),
        }
    }

    pub fn row(mut self, values: Vec<Value>) -> Self {
        match &mut self.source {
            InsertSource::Values(rows) => rows.push(values),
            InsertSource::Query(_) => self.source = InsertSource::Values(vec![values]),
        }
        self
    }

    pub fn rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.source = InsertSource::Values(rows);
        self
    }

    /// Take rows from a `Select` or `Sql` statement.
    pub fn from_query(mut self, query: impl Into<Statement>) -> Self {
        self.source = InsertSource::Query(Box::new(query.into()));
        self
    }

    pub fn on_conflict<I, S>(mut self, target: I, action: ConflictAction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_conflict = Some(OnConflict {
            target: target.into_iter().map(Into::into).collect(),
            action,
        });
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: String,
    assignments: Vec<(String, Value)>,
    filters: Vec<Filter>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    table: String,
    filters: Vec<Filter>,
}

impl Delete {
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

macro_rules! into_statement {
    ($($ty:ident),*) => {
        $(impl From<$ty> for Statement {
            fn from(value: $ty) -> Self {
                Statement::$ty(value)
            }
        })*
    };
}

into_statement!(Sql, Select, Insert, Update, Delete);

impl From<&str> for Statement {
    fn from(text: &str) -> Self {
        Statement::Sql(Sql::new(text))
    }
}

impl From<String> for Statement {
    fn from(text: String) -> Self {
        Statement::Sql(Sql::new(text))
    }
}

/// SQL text ready for the driver, with parameters in binding order.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    /// Whether executing the statement produces a result set.
    pub fn returns_rows(&self) -> bool {
        match self {
            Statement::Select(_) => true,
            Statement::Insert(insert) => !insert.returning.is_empty(),
            Statement::Update(_) | Statement::Delete(_) => false,
            Statement::Sql(sql) => sql_returns_rows(&sql.text),
        }
    }

    pub fn render(&self, dialect: &Dialect) -> StoreResult<Rendered> {
        let mut renderer = Renderer::new(dialect);
        renderer.statement(self)?;
        Ok(Rendered {
            sql: renderer.sql,
            params: renderer.params,
        })
    }
}

fn sql_returns_rows(text: &str) -> bool {
    let upper = text.trim_start().to_ascii_uppercase();
    let first = upper.split_whitespace().next().unwrap_or_default();
    matches!(first, "SELECT" | "WITH" | "VALUES" | "PRAGMA" | "SHOW" | "EXPLAIN")
        || upper.contains(" RETURNING ")
}

/// Plain or dot-qualified SQL identifier made of ASCII letters, digits and `_`.
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

pub(crate) fn check_identifier(name: &str) -> StoreResult<&str> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(StoreError::InvalidStatement(format!(
            "`{name}` is not a valid identifier"
        )))
    }
}

/// Length of the `$tag$ ... $tag$` string at the start of `text`, or `None`
/// when the `$` does not open one (e.g. a `$1` placeholder).
fn dollar_quoted_len(text: &str) -> Option<usize> {
    let tag_len = text[1..].find('$')?;
    let tag = &text[1..=tag_len];
    if !tag.is_empty() && (!is_identifier(tag) || tag.contains('.')) {
        return None;
    }
    let delimiter = &text[..tag_len + 2];
    let body = &text[delimiter.len()..];
    Some(
        body.find(delimiter)
            .map_or(text.len(), |i| delimiter.len() + i + delimiter.len()),
    )
}

struct Renderer<'d> {
    dialect: &'d Dialect,
    sql: String,
    params: Vec<Value>,
}

impl<'d> Renderer<'d> {
    fn new(dialect: &'d Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    /// Append a placeholder for `value`. `Null` is written as a literal: a
    /// bound null carries a parameter type that PostgreSQL will not assign to
    /// columns of another type.
    fn param(&mut self, value: Value) {
        if value.is_null() {
            self.sql.push_str("NULL");
            return;
        }
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    fn ident(&mut self, name: &str) -> StoreResult<()> {
        let name = check_identifier(name)?;
        self.sql.push_str(name);
        Ok(())
    }

    fn ident_list(&mut self, names: &[String]) -> StoreResult<()> {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(name)?;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Statement) -> StoreResult<()> {
        match statement {
            Statement::Sql(sql) => self.raw(sql),
            Statement::Select(select) => self.select(select),
            Statement::Insert(insert) => self.insert(insert),
            Statement::Update(update) => self.update(update),
            Statement::Delete(delete) => self.delete(delete),
        }
    }

    /// Copy hand-written SQL, renumbering `?` placeholders. Quoted text,
    /// comments and dollar-quoted bodies are copied untouched.
    fn raw(&mut self, sql: &Sql) -> StoreResult<()> {
        let mut params = sql.params.iter().cloned();
        let mut rest = sql.text.as_str();
        while let Some(c) = rest.chars().next() {
            let span = match c {
                '\'' | '"' => rest[1..].find(c).map_or(rest.len(), |i| i + 2),
                '-' if rest.starts_with("--") => rest.find('\n').map_or(rest.len(), |i| i + 1),
                '/' if rest.starts_with("/*") => rest[2..].find("*/").map_or(rest.len(), |i| i + 4),
                '$' => dollar_quoted_len(rest).unwrap_or(1),
                '?' => {
                    let value = params.next().ok_or_else(|| {
                        StoreError::InvalidStatement(format!(
                            "statement has more placeholders than the {} bound parameters",
                            sql.params.len()
                        ))
                    })?;
                    self.param(value);
                    rest = &rest[1..];
                    continue;
                }
                _ => c.len_utf8(),
            };
            self.sql.push_str(&rest[..span]);
            rest = &rest[span..];
        }
        if params.next().is_some() {
            return Err(StoreError::InvalidStatement(format!(
                "statement has fewer placeholders than the {} bound parameters",
                sql.params.len()
            )));
        }
        Ok(())
    }

    fn select(&mut self, select: &Select) -> StoreResult<()> {
        self.push("SELECT ");
        if select.columns.is_empty() {
            self.push("*");
        } else {
            self.ident_list(&select.columns)?;
        }
        self.push(" FROM ");
        self.ident(&select.table)?;
        self.filters(&select.filters)?;
        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            for (i, (column, order)) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.ident(column)?;
                self.push(match order {
                    Order::Asc => " ASC",
                    Order::Desc => " DESC",
                });
            }
        }
        if let Some(limit) = select.limit {
            self.push(&format!(" LIMIT {limit}"));
        }
        Ok(())
    }

    fn insert(&mut self, insert: &Insert) -> StoreResult<()> {
        if insert.columns.is_empty() {
            return Err(StoreError::InvalidStatement(
                "insert needs at least one column".into(),
            ));
        }
        let conflict = match &insert.on_conflict {
            Some(on_conflict) => {
                for column in &on_conflict.target {
                    check_identifier(column)?;
                }
                if let ConflictAction::UpdateColumns(columns) = &on_conflict.action {
                    for column in columns {
                        check_identifier(column)?;
                    }
                }
                Some(
                    self.dialect
                        .conflict_clause(&on_conflict.target, &on_conflict.action)?,
                )
            }
            None => None,
        };

        self.push(conflict.as_ref().map_or("INSERT INTO", |c| c.insert_verb));
        self.push(" ");
        self.ident(&insert.table)?;
        self.push(" (");
        self.ident_list(&insert.columns)?;
        self.push(") ");

        let has_suffix = conflict.as_ref().is_some_and(|c| !c.suffix.is_empty());
        match &insert.source {
            InsertSource::Values(rows) => {
                if rows.is_empty() {
                    return Err(StoreError::InvalidStatement(
                        "insert has no rows".into(),
                    ));
                }
                self.push("VALUES ");
                for (i, row) in rows.iter().enumerate() {
                    if row.len() != insert.columns.len() {
                        return Err(StoreError::InvalidStatement(format!(
                            "row {i} has {} values for {} columns",
                            row.len(),
                            insert.columns.len()
                        )));
                    }
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push("(");
                    for (j, value) in row.iter().enumerate() {
                        if j > 0 {
                            self.push(", ");
                        }
                        self.param(value.clone());
                    }
                    self.push(")");
                }
            }
            InsertSource::Query(query) => {
                if !matches!(**query, Statement::Select(_) | Statement::Sql(_)) {
                    return Err(StoreError::InvalidStatement(
                        "insert source must be a query".into(),
                    ));
                }
                let outer = std::mem::take(&mut self.sql);
                self.statement(query)?;
                let source = std::mem::replace(&mut self.sql, outer);
                if has_suffix {
                    let wrapped = self.dialect.insert_select_source(&source);
                    self.push(&wrapped);
                } else {
                    self.push(&source);
                }
            }
        }

        if let Some(conflict) = conflict.filter(|c| !c.suffix.is_empty()) {
            self.push(" ");
            self.push(&conflict.suffix);
        }
        if !insert.returning.is_empty() {
            self.push(" RETURNING ");
            self.ident_list(&insert.returning)?;
        }
        Ok(())
    }

    fn update(&mut self, update: &Update) -> StoreResult<()> {
        if update.assignments.is_empty() {
            return Err(StoreError::InvalidStatement(
                "update sets no columns".into(),
            ));
        }
        self.push("UPDATE ");
        self.ident(&update.table)?;
        self.push(" SET ");
        for (i, (column, value)) in update.assignments.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(column)?;
            self.push(" = ");
            self.param(value.clone());
        }
        self.filters(&update.filters)
    }

    fn delete(&mut self, delete: &Delete) -> StoreResult<()> {
        self.push("DELETE FROM ");
        self.ident(&delete.table)?;
        self.filters(&delete.filters)
    }

    fn filters(&mut self, filters: &[Filter]) -> StoreResult<()> {
        for (i, filter) in filters.iter().enumerate() {
            self.push(if i == 0 { " WHERE " } else { " AND " });
            match filter {
                Filter::Eq(column, Value::Null) | Filter::IsNull(column) => {
                    self.ident(column)?;
                    self.push(" IS NULL");
                }
                Filter::Eq(column, value) => {
                    self.ident(column)?;
                    self.push(" = ");
                    self.param(value.clone());
                }
                Filter::Cmp(column, op, value) => {
                    self.ident(column)?;
                    self.push(&format!(" {} ", op.as_sql()));
                    self.param(value.clone());
                }
                Filter::In(_, values) if values.is_empty() => self.push("1 = 0"),
                Filter::In(column, values) => {
                    self.ident(column)?;
                    self.push(" IN (");
                    for (j, value) in values.iter().enumerate() {
                        if j > 0 {
                            self.push(", ");
                        }
                        self.param(value.clone());
                    }
                    self.push(")");
                }
                Filter::NotNull(column) => {
                    self.ident(column)?;
                    self.push(" IS NOT NULL");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{POSTGRES, SQLITE};

    #[test]
    fn raw_sql_placeholders_are_renumbered() {
        let stmt: Statement = Sql::new("SELECT id FROM companies WHERE name = ? AND ticker = ?")
            .bind("Acme")
            .bind("ACM")
            .into();
        let sqlite = stmt.render(&SQLITE).unwrap();
        assert_eq!(sqlite.sql, "SELECT id FROM companies WHERE name = ? AND ticker = ?");
        let pg = stmt.render(&POSTGRES).unwrap();
        assert_eq!(pg.sql, "SELECT id FROM companies WHERE name = $1 AND ticker = $2");
        assert_eq!(pg.params, vec![Value::from("Acme"), Value::from("ACM")]);
    }

    #[test]
    fn question_marks_in_literals_are_kept() {
        let stmt: Statement = Sql::new("SELECT 'why?' AS q, id FROM t WHERE id = ?")
            .bind(1_i64)
            .into();
        let pg = stmt.render(&POSTGRES).unwrap();
        assert_eq!(pg.sql, "SELECT 'why?' AS q, id FROM t WHERE id = $1");
    }

    #[test]
    fn question_marks_in_comments_are_kept() {
        let stmt: Statement = Sql::new("SELECT id FROM companies -- why?\nWHERE id = ?")
            .bind(1_i64)
            .into();
        let pg = stmt.render(&POSTGRES).unwrap();
        assert_eq!(pg.sql, "SELECT id FROM companies -- why?\nWHERE id = $1");
        assert_eq!(pg.params, vec![Value::Int(1)]);

        let stmt: Statement = Sql::new("SELECT /* a? b? */ id FROM companies WHERE id = ?")
            .bind(2_i64)
            .into();
        let pg = stmt.render(&POSTGRES).unwrap();
        assert_eq!(pg.sql, "SELECT /* a? b? */ id FROM companies WHERE id = $1");

        let trailing: Statement = Sql::new("SELECT 1 -- done?").into();
        assert_eq!(trailing.render(&SQLITE).unwrap().sql, "SELECT 1 -- done?");
    }

    #[test]
    fn dollar_quoted_bodies_are_kept() {
        let text = "DO $body$ BEGIN RAISE NOTICE 'ok?'; END $body$; SELECT $$is it?$$, ?";
        let stmt: Statement = Sql::new(text).bind("x").into();
        let pg = stmt.render(&POSTGRES).unwrap();
        assert_eq!(
            pg.sql,
            "DO $body$ BEGIN RAISE NOTICE 'ok?'; END $body$; SELECT $$is it?$$, $1"
        );
        assert_eq!(pg.params.len(), 1);
    }

    #[test]
    fn positional_dollar_text_is_not_a_quote() {
        let stmt: Statement = Sql::new("SELECT $1::text, ?").bind(5_i64).into();
        assert_eq!(stmt.render(&SQLITE).unwrap().sql, "SELECT $1::text, ?");
    }

    #[test]
    fn placeholder_count_must_match() {
        let too_few: Statement = Sql::new("SELECT * FROM t WHERE a = ? AND b = ?")
            .bind(1_i64)
            .into();
        assert!(matches!(
            too_few.render(&SQLITE),
            Err(StoreError::InvalidStatement(_))
        ));
        let too_many: Statement = Sql::new("SELECT * FROM t").bind(1_i64).into();
        assert!(matches!(
            too_many.render(&POSTGRES),
            Err(StoreError::InvalidStatement(_))
        ));
    }

    #[test]
    fn select_with_filters_and_order() {
        let stmt: Statement = Select::table("companies")
            .columns(["id", "name"])
            .filter(Filter::eq("country", "USA"))
            .filter(Filter::is_in("id", [1_i64, 2, 3]))
            .filter(Filter::cmp("id", CmpOp::Gt, 0_i64))
            .order_by("name", Order::Asc)
            .limit(10)
            .into();
        let pg = stmt.render(&POSTGRES).unwrap();
        assert_eq!(
            pg.sql,
            "SELECT id, name FROM companies WHERE country = $1 AND id IN ($2, $3, $4) AND id > $5 ORDER BY name ASC LIMIT 10"
        );
        assert_eq!(pg.params.len(), 5);
        assert!(stmt.returns_rows());
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let stmt: Statement = Delete::from_table("company_group_members")
            .filter(Filter::is_in("company_id", Vec::<i64>::new()))
            .into();
        let rendered = stmt.render(&SQLITE).unwrap();
        assert_eq!(rendered.sql, "DELETE FROM company_group_members WHERE 1 = 0");
        assert!(rendered.params.is_empty());
    }

    #[test]
    fn eq_null_renders_is_null() {
        let stmt: Statement = Select::table("companies")
            .filter(Filter::eq("ticker", Value::Null))
            .into();
        assert_eq!(
            stmt.render(&SQLITE).unwrap().sql,
            "SELECT * FROM companies WHERE ticker IS NULL"
        );
    }

    #[test]
    fn nulls_are_inlined_and_numbering_stays_dense() {
        let stmt: Statement = Update::table("companies")
            .set("ticker", Value::Null)
            .set("name", "Acme")
            .filter(Filter::eq("id", 1_i64))
            .into();
        let pg = stmt.render(&POSTGRES).unwrap();
        assert_eq!(
            pg.sql,
            "UPDATE companies SET ticker = NULL, name = $1 WHERE id = $2"
        );
        assert_eq!(pg.params, vec![Value::from("Acme"), Value::Int(1)]);
    }

    #[test]
    fn multi_row_upsert() {
        let stmt: Statement = Insert::into_table("risk_free_rates", ["year", "usa_rf"])
            .row(vec![Value::Int(2024), Value::Real(4.2)])
            .row(vec![Value::Int(2025), Value::Real(4.4)])
            .on_conflict(["year"], ConflictAction::UpdateColumns(vec!["usa_rf".into()]))
            .into();
        let pg = stmt.render(&POSTGRES).unwrap();
        assert_eq!(
            pg.sql,
            "INSERT INTO risk_free_rates (year, usa_rf) VALUES ($1, $2), ($3, $4) ON CONFLICT (year) DO UPDATE SET usa_rf = excluded.usa_rf"
        );
        assert!(!stmt.returns_rows());
    }

    #[test]
    fn insert_select_upsert_is_guarded_on_sqlite() {
        let source = Sql::new("SELECT company_id, fiscal_year, wacc FROM staging WHERE wacc > ?")
            .bind(0.0);
        let stmt: Statement = Insert::into_table("wacc_annual", ["company_id", "fiscal_year", "wacc"])
            .from_query(source)
            .on_conflict(
                ["company_id", "fiscal_year"],
                ConflictAction::UpdateColumns(vec!["wacc".into()]),
            )
            .into();
        let sqlite = stmt.render(&SQLITE).unwrap();
        assert_eq!(
            sqlite.sql,
            "INSERT INTO wacc_annual (company_id, fiscal_year, wacc) SELECT * FROM (SELECT company_id, fiscal_year, wacc FROM staging WHERE wacc > ?) AS src WHERE true ON CONFLICT (company_id, fiscal_year) DO UPDATE SET wacc = excluded.wacc"
        );
        let pg = stmt.render(&POSTGRES).unwrap();
        assert_eq!(
            pg.sql,
            "INSERT INTO wacc_annual (company_id, fiscal_year, wacc) SELECT company_id, fiscal_year, wacc FROM staging WHERE wacc > $1 ON CONFLICT (company_id, fiscal_year) DO UPDATE SET wacc = excluded.wacc"
        );
    }

    #[test]
    fn insert_rejects_ragged_rows() {
        let stmt: Statement = Insert::into_table("t", ["a", "b"])
            .row(vec![Value::Int(1)])
            .into();
        assert!(matches!(
            stmt.render(&SQLITE),
            Err(StoreError::InvalidStatement(_))
        ));
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(is_identifier("company_group_members"));
        assert!(is_identifier("m.company_id"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("name; DROP TABLE companies"));
        let stmt: Statement = Select::table("companies; --").into();
        assert!(matches!(
            stmt.render(&SQLITE),
            Err(StoreError::InvalidStatement(_))
        ));
    }

    #[test]
    fn returning_makes_insert_return_rows() {
        let stmt: Statement = Insert::into_table("company_groups", ["name", "group_type"])
            .row(vec!["Tech".into(), "bucket".into()])
            .returning(["id"])
            .into();
        assert!(stmt.returns_rows());
        assert!(stmt.render(&POSTGRES).unwrap().sql.ends_with(" RETURNING id"));
    }

    #[test]
    fn raw_sql_row_detection() {
        assert!(sql_returns_rows("  select 1"));
        assert!(sql_returns_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(sql_returns_rows("INSERT INTO t (a) VALUES (1) RETURNING id"));
        assert!(!sql_returns_rows("DELETE FROM t"));
    }
}
