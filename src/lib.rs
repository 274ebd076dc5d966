//! WolfCare - Multi-node record replication
//!
//! Keeps the user, patient and doctor records of several clinic nodes in
//! sync. Every node accepts writes locally and pushes each committed write
//! to its peers as an operation envelope; peers apply envelopes
//! idempotently so redelivery is always safe.
//!
//! # Architecture
//!
//! - [`store`]: durable SQLite record storage per node
//! - [`replication::envelope`]: the `{action, object_type, data, request_id}` wire unit
//! - [`replication::dispatcher`]: parallel, per-peer independent delivery
//! - [`replication::apply`]: dispatch-table driven remote apply
//! - [`replication::dedup`]: per-node applied request id tracking
//! - [`node`]: local writes that trigger replication, and node assembly
//! - [`api`]: HTTP surface (`/replicate`, `/records`, `/status`)

pub mod config;
pub mod error;
pub mod id;
pub mod store;
pub mod replication;
pub mod state;
pub mod node;
pub mod api;

pub use config::WolfCareConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfCareConfig;
    pub use crate::error::{Error, Result};
    pub use crate::node::{Node, WriteService};
    pub use crate::replication::{Action, ApplyHandler, DedupGuard, Envelope, Replicator};
    pub use crate::store::{ObjectType, Record, RecordStore, SqliteRecordStore};
}
