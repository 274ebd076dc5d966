//! Record Store Module
//!
//! Durable keyed storage for the replicable entities.

mod schema;
mod sqlite;

pub use schema::{Column, ColumnKind, EntitySchema, ObjectType, Record};
pub use sqlite::SqliteRecordStore;

use crate::error::Result;

/// Local record storage used by both local writes and remote applies
///
/// Implementations must be durable on return and must serialize concurrent
/// mutations of the same identifier.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record, returning its identifier
    ///
    /// Uses the identifier carried in `data` when present, otherwise mints
    /// one. Fails with `IntegrityViolation` on a uniqueness conflict.
    async fn insert(&self, object_type: ObjectType, data: &Record) -> Result<String>;

    /// Update the attributes present in `data`; `NotFound` if `id` is absent
    async fn update(&self, object_type: ObjectType, id: &str, data: &Record) -> Result<()>;

    /// Delete a record; `NotFound` if `id` is absent
    async fn delete(&self, object_type: ObjectType, id: &str) -> Result<()>;

    /// Fetch a record
    async fn get(&self, object_type: ObjectType, id: &str) -> Result<Option<Record>>;
}
