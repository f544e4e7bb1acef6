//! JSON:API resource engine: filter and sort compilation, include assembly and atomic
//! operation batches over a relational store.

pub mod atomic;
pub mod case;
pub mod config;
pub mod data_layer;
pub mod document;
pub mod engine;
pub mod entity;
pub mod error;
pub mod filter;
pub mod query;
pub mod sort;
pub mod sql;
pub mod store;
pub mod validation;
pub mod view;

#[cfg(test)]
mod fixtures;

pub use atomic::{AtomicOperation, AtomicOperationRequest, AtomicResults, Coordinator, LocalIdTable};
pub use config::{load_from_path, resolve, resolve_with_schema, validate, EngineConfig, FullConfig, Registry};
pub use data_layer::{DataLayer, ResourceInput};
pub use document::{assemble, Document, Fieldsets, Linkage, ResourceIdentifier, ResourceObject};
pub use engine::Engine;
pub use error::{AppError, BatchError, ConfigError, StorageError};
pub use filter::{FilterNode, PredicateBuilder};
pub use query::{execute, Pagination, QueryParams, QueryResult};
pub use sort::SortSpec;
pub use store::{MemoryStore, PgStore, Store, StoreTx};
pub use view::{build_view, ViewCache, ViewDescriptor};
