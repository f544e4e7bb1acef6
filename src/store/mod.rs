//! Storage seam: a transaction-scoped executor for compiled queries.
//!
//! [`PgStore`] runs rendered SQL through sqlx. [`MemoryStore`] evaluates the same compiled
//! queries against in-process tables and backs the test-suite.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::StorageError;
use crate::sql::{ColumnInfo, Predicate, SelectQuery, SqlValue, TableRef};
use async_trait::async_trait;

/// One stored row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StorageError>;
}

/// An open transaction. Dropping it without [`StoreTx::commit`] discards its writes.
#[async_trait]
pub trait StoreTx: Send {
    async fn count(&mut self, query: &SelectQuery) -> Result<u64, StorageError>;

    async fn select(&mut self, query: &SelectQuery) -> Result<Vec<Row>, StorageError>;

    async fn insert(&mut self, table: &TableRef, values: &[(ColumnInfo, SqlValue)]) -> Result<Row, StorageError>;

    /// Update by primary key; `None` when no row has that key.
    async fn update(
        &mut self,
        table: &TableRef,
        key: &SqlValue,
        values: &[(ColumnInfo, SqlValue)],
    ) -> Result<Option<Row>, StorageError>;

    /// Update every row matching `predicate` (columns under the `main` alias). Returns the row count.
    async fn update_where(
        &mut self,
        table: &TableRef,
        predicate: &Predicate,
        values: &[(ColumnInfo, SqlValue)],
    ) -> Result<u64, StorageError>;

    async fn delete(&mut self, table: &TableRef, key: &SqlValue) -> Result<bool, StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
