//! Tenant-keyed document store
//!
//! Records live in a single `documents` table as JSON bodies. Queries filter
//! on body fields with `json_extract`, so any serialized field can be used
//! in an equality or range filter. Every record is written once, keyed by
//! its collection and id, with its tenant id as an indexed column.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use std::path::Path;
use tracing::debug;

use crate::{Error, Result};

/// A record type stored in the document table
pub trait Document: Serialize + DeserializeOwned + Send + Sync + Unpin {
    /// Collection (logical table) name
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn tenant_id(&self) -> &str;
}

/// Scalar bound into a filter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<u32> for SqlValue {
    fn from(value: u32) -> Self {
        SqlValue::Int(value as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

/// JSON booleans come back from `json_extract` as 0/1
impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Int(value as i64)
    }
}

/// Timestamps are stored as epoch milliseconds
impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Int(value.timestamp_millis())
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Compare(&'static str, SqlValue),
    In(Vec<SqlValue>),
    IsNull,
    NotNull,
    NullOrLt(SqlValue),
}

#[derive(Debug, Clone)]
struct Filter {
    field: String,
    condition: Condition,
}

#[derive(Debug, Clone)]
enum Order {
    Field { field: String, descending: bool },
    Insertion,
}

/// Filter, ordering and limit for a collection scan
///
/// Field names are the serialized (camelCase) names, with `.` for nesting.
#[derive(Debug, Clone, Default)]
pub struct Query {
    tenant_id: Option<String>,
    filters: Vec<Filter>,
    order: Vec<Order>,
    limit: Option<i64>,
}

impl Query {
    /// Records of one tenant
    pub fn tenant(tenant_id: &str) -> Self {
        Self {
            tenant_id: Some(tenant_id.to_string()),
            ..Default::default()
        }
    }

    /// Records of every tenant
    pub fn all() -> Self {
        Self::default()
    }

    fn push(mut self, field: &str, condition: Condition) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            condition,
        });
        self
    }

    pub fn eq(self, field: &str, value: impl Into<SqlValue>) -> Self {
        self.push(field, Condition::Compare("=", value.into()))
    }

    pub fn ne(self, field: &str, value: impl Into<SqlValue>) -> Self {
        self.push(field, Condition::Compare("!=", value.into()))
    }

    pub fn lt(self, field: &str, value: impl Into<SqlValue>) -> Self {
        self.push(field, Condition::Compare("<", value.into()))
    }

    pub fn lte(self, field: &str, value: impl Into<SqlValue>) -> Self {
        self.push(field, Condition::Compare("<=", value.into()))
    }

    pub fn gt(self, field: &str, value: impl Into<SqlValue>) -> Self {
        self.push(field, Condition::Compare(">", value.into()))
    }

    pub fn gte(self, field: &str, value: impl Into<SqlValue>) -> Self {
        self.push(field, Condition::Compare(">=", value.into()))
    }

    pub fn is_in<V: Into<SqlValue>>(self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push(field, Condition::In(values))
    }

    /// Field is null or absent
    pub fn is_null(self, field: &str) -> Self {
        self.push(field, Condition::IsNull)
    }

    pub fn not_null(self, field: &str) -> Self {
        self.push(field, Condition::NotNull)
    }

    /// Field is null, absent, or below `value`
    pub fn null_or_lt(self, field: &str, value: impl Into<SqlValue>) -> Self {
        self.push(field, Condition::NullOrLt(value.into()))
    }

    pub fn order_by(mut self, field: &str) -> Self {
        self.order.push(Order::Field {
            field: field.to_string(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, field: &str) -> Self {
        self.order.push(Order::Field {
            field: field.to_string(),
            descending: true,
        });
        self
    }

    /// Order by first insertion; updates keep a record's place
    pub fn insertion_order(mut self) -> Self {
        self.order.push(Order::Insertion);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit as i64);
        self
    }

    /// Build the WHERE/ORDER/LIMIT tail and the values to bind, in order
    fn to_sql(&self, collection: &str) -> Result<(String, Vec<SqlValue>)> {
        let mut sql = String::from(" WHERE collection = ?");
        let mut values = vec![SqlValue::Text(collection.to_string())];

        if let Some(tenant_id) = &self.tenant_id {
            sql.push_str(" AND tenant_id = ?");
            values.push(SqlValue::Text(tenant_id.clone()));
        }

        for filter in &self.filters {
            let path = json_path(&filter.field)?;
            match &filter.condition {
                Condition::Compare(op, value) => {
                    sql.push_str(&format!(" AND json_extract(body, '{}') {} ?", path, op));
                    values.push(value.clone());
                }
                Condition::In(list) if list.is_empty() => {
                    sql.push_str(" AND 0");
                }
                Condition::In(list) => {
                    let placeholders = vec!["?"; list.len()].join(", ");
                    sql.push_str(&format!(
                        " AND json_extract(body, '{}') IN ({})",
                        path, placeholders
                    ));
                    values.extend(list.iter().cloned());
                }
                Condition::IsNull => {
                    sql.push_str(&format!(" AND json_extract(body, '{}') IS NULL", path));
                }
                Condition::NotNull => {
                    sql.push_str(&format!(" AND json_extract(body, '{}') IS NOT NULL", path));
                }
                Condition::NullOrLt(value) => {
                    sql.push_str(&format!(
                        " AND (json_extract(body, '{0}') IS NULL OR json_extract(body, '{0}') < ?)",
                        path
                    ));
                    values.push(value.clone());
                }
            }
        }

        if !self.order.is_empty() {
            let mut terms = Vec::with_capacity(self.order.len());
            for order in &self.order {
                match order {
                    Order::Field { field, descending } => {
                        let direction = if *descending { "DESC" } else { "ASC" };
                        terms.push(format!(
                            "json_extract(body, '{}') {}",
                            json_path(field)?,
                            direction
                        ));
                    }
                    Order::Insertion => terms.push("rowid ASC".to_string()),
                }
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            values.push(SqlValue::Int(limit));
        }

        Ok((sql, values))
    }
}

/// Translate a field name to a JSON path, rejecting anything that is not
/// a plain identifier so paths can be inlined into SQL
fn json_path(field: &str) -> Result<String> {
    let valid = !field.is_empty()
        && field
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if !valid {
        return Err(Error::InvalidInput(format!("Invalid field name: {}", field)));
    }
    Ok(format!("$.{}", field))
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    values: Vec<SqlValue>,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Int(v) => query.bind(v),
            SqlValue::Real(v) => query.bind(v),
            SqlValue::Text(v) => query.bind(v),
        };
    }
    query
}

fn decode<T: Document>(row: &SqliteRow) -> Result<T> {
    let body: String = row.try_get("body")?;
    Ok(serde_json::from_str(&body)?)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A decoded record and the stored body text it came from
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub body: String,
}

/// Handle to the document store
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Datastore {
    pool: SqlitePool,
}

impl Datastore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database file, creating it and its schema if needed
    pub async fn open(db_path: &Path) -> Result<Self> {
        Ok(Self::new(super::init_database(db_path).await?))
    }

    /// Fresh in-memory store
    pub async fn in_memory() -> Result<Self> {
        Ok(Self::new(super::init_memory_database().await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get<T: Document>(&self, id: &str) -> Result<Option<T>> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(T::COLLECTION)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode::<T>).transpose()
    }

    pub async fn query<T: Document>(&self, query: &Query) -> Result<Vec<T>> {
        let (tail, values) = query.to_sql(T::COLLECTION)?;
        let sql = format!("SELECT body FROM documents{}", tail);
        let rows = bind_all(sqlx::query(&sql), values)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode::<T>).collect()
    }

    /// First match of `query`
    pub async fn find_one<T: Document>(&self, query: &Query) -> Result<Option<T>> {
        let mut found = self.query::<T>(&query.clone().limit(1)).await?;
        Ok(found.pop())
    }

    pub async fn count<T: Document>(&self, query: &Query) -> Result<u64> {
        let (tail, values) = query.to_sql(T::COLLECTION)?;
        let sql = format!("SELECT COUNT(*) AS n FROM documents{}", tail);
        let row = bind_all(sqlx::query(&sql), values)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        Ok(count as u64)
    }

    /// Insert a new record; fails if the id is already taken
    pub async fn create<T: Document>(&self, doc: &T) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        let now = now_millis();
        sqlx::query(
            "INSERT INTO documents (collection, id, tenant_id, body, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(T::COLLECTION)
        .bind(doc.id())
        .bind(doc.tenant_id())
        .bind(body)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(collection = T::COLLECTION, id = doc.id(), "Document created");
        Ok(())
    }

    /// Insert unless a record with the same id exists
    ///
    /// Returns `true` when this call inserted the record. Deterministic ids
    /// make this the at-most-once primitive for issuance.
    pub async fn create_if_absent<T: Document>(&self, doc: &T) -> Result<bool> {
        let body = serde_json::to_string(doc)?;
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO documents (collection, id, tenant_id, body, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT(collection, id) DO NOTHING",
        )
        .bind(T::COLLECTION)
        .bind(doc.id())
        .bind(doc.tenant_id())
        .bind(body)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Insert or fully replace a record
    pub async fn set<T: Document>(&self, doc: &T) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        let now = now_millis();
        sqlx::query(
            "INSERT INTO documents (collection, id, tenant_id, body, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(collection, id) DO UPDATE SET \
                tenant_id = excluded.tenant_id, body = excluded.body, updated_at = excluded.updated_at",
        )
        .bind(T::COLLECTION)
        .bind(doc.id())
        .bind(doc.tenant_id())
        .bind(body)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Read a record together with the exact stored body it was decoded from
    ///
    /// Pair with [`Datastore::replace_if_unchanged`] for read-check-write
    /// cycles that must not lose a concurrent update.
    pub async fn get_versioned<T: Document>(&self, id: &str) -> Result<Option<Versioned<T>>> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(T::COLLECTION)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                let value = serde_json::from_str(&body)?;
                Ok(Some(Versioned { value, body }))
            }
            None => Ok(None),
        }
    }

    /// Overwrite a record only if its stored body is still `expected_body`
    ///
    /// Returns `false` when another writer got there first (or the record
    /// is gone); the caller re-reads and decides again.
    pub async fn replace_if_unchanged<T: Document>(&self, expected_body: &str, doc: &T) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET body = ?, updated_at = ? \
             WHERE collection = ? AND id = ? AND body = ?",
        )
        .bind(serde_json::to_string(doc)?)
        .bind(now_millis())
        .bind(T::COLLECTION)
        .bind(doc.id())
        .bind(expected_body)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Merge `patch` into the stored body (RFC 7396: `null` removes a field)
    ///
    /// Returns `false` when no such record exists.
    pub async fn merge_update<T: Document>(&self, id: &str, patch: &serde_json::Value) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET body = json_patch(body, ?), updated_at = ? \
             WHERE collection = ? AND id = ?",
        )
        .bind(serde_json::to_string(patch)?)
        .bind(now_millis())
        .bind(T::COLLECTION)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Merge `patch` only while the claim timestamp in `field` is unset or
    /// older than `expired_before`
    ///
    /// The check and the write are one statement, so of several concurrent
    /// claimants exactly one gets `true`. A claim left behind by a worker
    /// that never finished becomes claimable again once it has expired.
    pub async fn claim<T: Document>(
        &self,
        id: &str,
        field: &str,
        expired_before: DateTime<Utc>,
        patch: &serde_json::Value,
    ) -> Result<bool> {
        let path = json_path(field)?;
        let sql = format!(
            "UPDATE documents SET body = json_patch(body, ?), updated_at = ? \
             WHERE collection = ? AND id = ? \
             AND (json_extract(body, '{0}') IS NULL OR json_extract(body, '{0}') < ?)",
            path
        );
        let result = sqlx::query(&sql)
            .bind(serde_json::to_string(patch)?)
            .bind(now_millis())
            .bind(T::COLLECTION)
            .bind(id)
            .bind(expired_before.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn delete<T: Document>(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(T::COLLECTION)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Atomically swap every record of the collection for one tenant
    pub async fn replace_tenant<T: Document>(&self, tenant_id: &str, docs: &[T]) -> Result<()> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM documents WHERE collection = ? AND tenant_id = ?")
            .bind(T::COLLECTION)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

        for doc in docs {
            if doc.tenant_id() != tenant_id {
                return Err(Error::InvalidInput(format!(
                    "Document {} belongs to tenant {}, not {}",
                    doc.id(),
                    doc.tenant_id(),
                    tenant_id
                )));
            }
            sqlx::query(
                "INSERT INTO documents (collection, id, tenant_id, body, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(T::COLLECTION)
            .bind(doc.id())
            .bind(tenant_id)
            .bind(serde_json::to_string(doc)?)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            collection = T::COLLECTION,
            tenant_id,
            count = docs.len(),
            "Tenant collection replaced"
        );
        Ok(())
    }

    /// Distinct tenant ids that have at least one record in the collection
    pub async fn tenant_ids<T: Document>(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT tenant_id FROM documents WHERE collection = ? ORDER BY tenant_id",
        )
        .bind(T::COLLECTION)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("tenant_id").map_err(Error::from))
            .collect()
    }
}
