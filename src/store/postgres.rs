//! PostgreSQL store over a sqlx pool.

use crate::error::StorageError;
use crate::sql::{
    bind_value, render_count, render_delete, render_insert, render_select, render_update, render_update_where,
    ColumnInfo, Predicate, QueryBuf, SelectQuery, SqlValue, TableRef,
};
use crate::store::{Row, Store, StoreTx};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Transaction};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(PgStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// Rolled back by sqlx when dropped uncommitted.
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Row>, StorageError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = bind_value(query, p);
        }
        let rows = query.fetch_all(&mut *self.tx).await.map_err(map_db_error)?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn fetch_optional(&mut self, q: &QueryBuf) -> Result<Option<Row>, StorageError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = bind_value(query, p);
        }
        let row = query.fetch_optional(&mut *self.tx).await.map_err(map_db_error)?;
        Ok(row.as_ref().map(row_to_map))
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn count(&mut self, query: &SelectQuery) -> Result<u64, StorageError> {
        use sqlx::Row as _;
        let q = render_count(query);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut sq = sqlx::query(&q.sql);
        for p in &q.params {
            sq = bind_value(sq, p);
        }
        let row = sq.fetch_one(&mut *self.tx).await.map_err(map_db_error)?;
        let n: i64 = row.try_get("count")?;
        Ok(n.max(0) as u64)
    }

    async fn select(&mut self, query: &SelectQuery) -> Result<Vec<Row>, StorageError> {
        self.fetch_all(&render_select(query)).await
    }

    async fn insert(&mut self, table: &TableRef, values: &[(ColumnInfo, SqlValue)]) -> Result<Row, StorageError> {
        self.fetch_optional(&render_insert(table, values))
            .await?
            .ok_or_else(|| StorageError::Constraint(format!("insert into {} returned no row", table.key())))
    }

    async fn update(
        &mut self,
        table: &TableRef,
        key: &SqlValue,
        values: &[(ColumnInfo, SqlValue)],
    ) -> Result<Option<Row>, StorageError> {
        self.fetch_optional(&render_update(table, key, values)).await
    }

    async fn update_where(
        &mut self,
        table: &TableRef,
        predicate: &Predicate,
        values: &[(ColumnInfo, SqlValue)],
    ) -> Result<u64, StorageError> {
        if values.is_empty() {
            return Ok(0);
        }
        let q = render_update_where(table, predicate, values);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut sq = sqlx::query(&q.sql);
        for p in &q.params {
            sq = bind_value(sq, p);
        }
        let done = sq.execute(&mut *self.tx).await.map_err(map_db_error)?;
        Ok(done.rows_affected())
    }

    async fn delete(&mut self, table: &TableRef, key: &SqlValue) -> Result<bool, StorageError> {
        let removed = self.fetch_optional(&render_delete(table, key)).await?;
        Ok(removed.is_some())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn map_db_error(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation() =>
        {
            StorageError::Constraint(db.message().to_string())
        }
        _ => StorageError::Db(e),
    }
}

fn row_to_map(row: &PgRow) -> Row {
    use sqlx::Column;
    use sqlx::Row as _;
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
