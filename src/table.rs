//! Minimal CRUD accessor over one configured table.
//!
//! Every value reaches Postgres as a bound parameter. Table and column names
//! come from [`TableSpec`], are validated once at construction, and are
//! always emitted double-quoted.

use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::error::{MaintenanceError, MaintenanceResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    table_name: String,
    key_column: Option<String>,
    columns: Vec<String>,
}

impl TableSpec {
    pub fn new(
        table_name: &str,
        key_column: Option<&str>,
        columns: &[&str],
    ) -> MaintenanceResult<Self> {
        validate_identifier(table_name, true)?;
        if let Some(key) = key_column {
            validate_identifier(key, false)?;
        }
        if columns.is_empty() {
            return Err(MaintenanceError::Validation(format!(
                "table {table_name} needs at least one column"
            )));
        }
        for column in columns {
            validate_identifier(column, false)?;
        }

        Ok(Self {
            table_name: table_name.to_string(),
            key_column: key_column.map(str::to_string),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        })
    }

    /// Table name ready to splice into SQL text.
    pub fn quoted_table(&self) -> String {
        quote_identifier(&self.table_name)
    }

    fn knows(&self, column: &str) -> bool {
        self.key_column.as_deref() == Some(column) || self.columns.iter().any(|c| c == column)
    }

    fn check_column(&self, column: &str) -> MaintenanceResult<()> {
        if self.knows(column) {
            Ok(())
        } else {
            Err(MaintenanceError::Validation(format!(
                "unknown column {column} for table {}",
                self.table_name
            )))
        }
    }

    pub(crate) fn insert_query(
        &self,
        values: Vec<SqlValue>,
    ) -> MaintenanceResult<QueryBuilder<'static, Postgres>> {
        if values.len() != self.columns.len() {
            return Err(MaintenanceError::Validation(format!(
                "table {} expects {} values, got {}",
                self.table_name,
                self.columns.len(),
                values.len()
            )));
        }

        let mut qb = QueryBuilder::new("INSERT INTO ");
        qb.push(self.quoted_table());
        qb.push(" (");
        qb.push(join_quoted(&self.columns));
        qb.push(") VALUES (");
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            push_value(&mut qb, value);
        }
        qb.push(")");
        Ok(qb)
    }

    /// Single-statement insert that overwrites the non-conflict columns when
    /// a row with the same `conflict` values exists.
    pub(crate) fn upsert_query(
        &self,
        values: Vec<SqlValue>,
        conflict: &[&str],
        returning: &str,
    ) -> MaintenanceResult<QueryBuilder<'static, Postgres>> {
        if conflict.is_empty() {
            return Err(MaintenanceError::Validation(
                "upsert needs at least one conflict column".to_string(),
            ));
        }
        for column in conflict {
            self.check_column(column)?;
        }
        self.check_column(returning)?;

        let mut qb = self.insert_query(values)?;
        qb.push(" ON CONFLICT (");
        qb.push(conflict.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(", "));
        qb.push(")");

        let updated: Vec<&String> = self
            .columns
            .iter()
            .filter(|c| !conflict.contains(&c.as_str()))
            .collect();
        if updated.is_empty() {
            // DO NOTHING would suppress RETURNING for existing rows
            let first = quote_identifier(conflict[0]);
            qb.push(format!(" DO UPDATE SET {first} = EXCLUDED.{first}"));
        } else {
            qb.push(" DO UPDATE SET ");
            let assignments: Vec<String> = updated
                .iter()
                .map(|c| {
                    let column = quote_identifier(c);
                    format!("{column} = EXCLUDED.{column}")
                })
                .collect();
            qb.push(assignments.join(", "));
        }

        qb.push(" RETURNING ");
        qb.push(quote_identifier(returning));
        Ok(qb)
    }

    pub(crate) fn update_query(
        &self,
        assignments: Vec<(&str, SqlValue)>,
        filters: Vec<Filter>,
    ) -> MaintenanceResult<QueryBuilder<'static, Postgres>> {
        if assignments.is_empty() {
            return Err(MaintenanceError::Validation(
                "update needs at least one assignment".to_string(),
            ));
        }
        require_filters("update", &filters)?;

        let mut qb = QueryBuilder::new("UPDATE ");
        qb.push(self.quoted_table());
        qb.push(" SET ");
        for (i, (column, value)) in assignments.into_iter().enumerate() {
            self.check_column(column)?;
            if i > 0 {
                qb.push(", ");
            }
            qb.push(quote_identifier(column));
            qb.push(" = ");
            push_value(&mut qb, value);
        }
        self.push_where(&mut qb, filters)?;
        Ok(qb)
    }

    pub(crate) fn delete_query(
        &self,
        filters: Vec<Filter>,
    ) -> MaintenanceResult<QueryBuilder<'static, Postgres>> {
        require_filters("delete", &filters)?;

        let mut qb = QueryBuilder::new("DELETE FROM ");
        qb.push(self.quoted_table());
        self.push_where(&mut qb, filters)?;
        Ok(qb)
    }

    pub(crate) fn exists_query(
        &self,
        filters: Vec<Filter>,
    ) -> MaintenanceResult<QueryBuilder<'static, Postgres>> {
        let mut qb = QueryBuilder::new("SELECT EXISTS (SELECT 1 FROM ");
        qb.push(self.quoted_table());
        self.push_where(&mut qb, filters)?;
        qb.push(")");
        Ok(qb)
    }

    pub(crate) fn select_query(
        &self,
        filters: Vec<Filter>,
        limit: Option<i64>,
    ) -> MaintenanceResult<QueryBuilder<'static, Postgres>> {
        let mut qb = QueryBuilder::new("SELECT ");
        if let Some(key) = &self.key_column {
            qb.push(quote_identifier(key));
            qb.push(", ");
        }
        qb.push(join_quoted(&self.columns));
        qb.push(" FROM ");
        qb.push(self.quoted_table());
        self.push_where(&mut qb, filters)?;

        if let Some(key) = &self.key_column {
            qb.push(" ORDER BY ");
            qb.push(quote_identifier(key));
        }
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit);
        }
        Ok(qb)
    }

    pub(crate) fn push_where(
        &self,
        qb: &mut QueryBuilder<'static, Postgres>,
        filters: Vec<Filter>,
    ) -> MaintenanceResult<()> {
        for (i, filter) in filters.into_iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            match filter {
                Filter::Eq(column, SqlValue::Null) => {
                    self.check_column(&column)?;
                    qb.push(quote_identifier(&column));
                    qb.push(" IS NULL");
                }
                Filter::Eq(column, value) => {
                    self.check_column(&column)?;
                    qb.push(quote_identifier(&column));
                    qb.push(" = ");
                    push_value(qb, value);
                }
                Filter::IsNotNull(column) => {
                    self.check_column(&column)?;
                    qb.push(quote_identifier(&column));
                    qb.push(" IS NOT NULL");
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i32),
    BigInt(i64),
    Text(String),
    Date(NaiveDate),
    Null,
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::BigInt(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// Row filter; filters in a list are ANDed together.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, SqlValue),
    IsNotNull(String),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<SqlValue>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn not_null(column: &str) -> Self {
        Filter::IsNotNull(column.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct TableAccessor {
    spec: TableSpec,
    pool: PgPool,
    timeout: Duration,
}

impl TableAccessor {
    pub fn new(spec: TableSpec, pool: PgPool, timeout: Duration) -> Self {
        Self {
            spec,
            pool,
            timeout,
        }
    }

    pub async fn insert(&self, values: Vec<SqlValue>) -> MaintenanceResult<u64> {
        let mut qb = self.spec.insert_query(values)?;
        tracing::debug!(sql = qb.sql(), "insert");
        let result = with_timeout(self.timeout, qb.build().execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }

    /// Inserts or overwrites one row keyed by `conflict` and returns the
    /// integer `column` of the stored row.
    pub async fn upsert_returning(
        &self,
        values: Vec<SqlValue>,
        conflict: &[&str],
        column: &str,
    ) -> MaintenanceResult<i32> {
        let mut qb = self.spec.upsert_query(values, conflict, column)?;
        tracing::debug!(sql = qb.sql(), "upsert returning");
        let row = with_timeout(self.timeout, qb.build().fetch_one(&self.pool)).await?;
        Ok(row.try_get::<i32, _>(0)?)
    }

    pub async fn update(
        &self,
        assignments: Vec<(&str, SqlValue)>,
        filters: Vec<Filter>,
    ) -> MaintenanceResult<u64> {
        let mut qb = self.spec.update_query(assignments, filters)?;
        tracing::debug!(sql = qb.sql(), "update");
        let result = with_timeout(self.timeout, qb.build().execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(&self, filters: Vec<Filter>) -> MaintenanceResult<u64> {
        let mut qb = self.spec.delete_query(filters)?;
        tracing::debug!(sql = qb.sql(), "delete");
        let result = with_timeout(self.timeout, qb.build().execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }

    pub async fn exists(&self, filters: Vec<Filter>) -> MaintenanceResult<bool> {
        let mut qb = self.spec.exists_query(filters)?;
        tracing::debug!(sql = qb.sql(), "exists");
        let found =
            with_timeout(self.timeout, qb.build_query_scalar::<bool>().fetch_one(&self.pool))
                .await?;
        Ok(found)
    }

    pub async fn select(&self, filters: Vec<Filter>) -> MaintenanceResult<Vec<PgRow>> {
        let mut qb = self.spec.select_query(filters, None)?;
        tracing::debug!(sql = qb.sql(), "select");
        with_timeout(self.timeout, qb.build().fetch_all(&self.pool)).await
    }

    /// First matching row by key order.
    pub async fn select_first(&self, filters: Vec<Filter>) -> MaintenanceResult<Option<PgRow>> {
        let mut qb = self.spec.select_query(filters, Some(1))?;
        tracing::debug!(sql = qb.sql(), "select first");
        with_timeout(self.timeout, qb.build().fetch_optional(&self.pool)).await
    }
}

pub(crate) async fn with_timeout<T, F>(limit: Duration, fut: F) -> MaintenanceResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(MaintenanceError::from),
        Err(_) => Err(MaintenanceError::Timeout(limit.as_secs())),
    }
}

fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: SqlValue) {
    match value {
        SqlValue::Int(v) => qb.push_bind(v),
        SqlValue::BigInt(v) => qb.push_bind(v),
        SqlValue::Text(v) => qb.push_bind(v),
        SqlValue::Date(v) => qb.push_bind(v),
        SqlValue::Null => qb.push("NULL"),
    };
}

fn require_filters(operation: &str, filters: &[Filter]) -> MaintenanceResult<()> {
    if filters.is_empty() {
        Err(MaintenanceError::Validation(format!(
            "refusing {operation} without a filter"
        )))
    } else {
        Ok(())
    }
}

fn validate_identifier(name: &str, allow_schema: bool) -> MaintenanceResult<()> {
    let parts: Vec<&str> = name.split('.').collect();
    let valid_parts = parts.iter().all(|part| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    });

    if valid_parts && (parts.len() == 1 || (allow_schema && parts.len() == 2)) {
        Ok(())
    } else {
        Err(MaintenanceError::Validation(format!(
            "invalid SQL identifier {name:?}"
        )))
    }
}

fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

fn join_quoted(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}
