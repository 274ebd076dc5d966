//! Replication Module
//!
//! Turns committed local writes into envelopes, fans them out to peers and
//! applies envelopes received from peers exactly once per request id.

pub mod apply;
pub mod dedup;
pub mod dispatcher;
pub mod envelope;

pub use apply::{AppliedResult, ApplyHandler, ApplyOutcome, DispatchTable, StoreOperation};
pub use dedup::{Admission, Claim, DedupGuard};
pub use dispatcher::{DeliveryPolicy, DeliveryReport, Replicator};
pub use envelope::{Action, Envelope, InboundEnvelope};
pub use crate::store::ObjectType;
