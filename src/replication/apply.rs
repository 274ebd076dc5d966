//! Remote Apply Handler
//!
//! Applies envelopes received from peers to the local record store. Each
//! delivery moves through `Received -> Validated -> {Deduplicated | Applied
//! | Rejected}` and never back.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::dedup::{Admission, DedupGuard};
use super::envelope::{Action, Envelope, InboundEnvelope};
use crate::error::{Error, Result};
use crate::store::{ObjectType, RecordStore};

/// Record store operation an envelope resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Insert,
    Update,
    Delete,
}

/// Fixed (object_type, action) -> store operation table, built at startup
#[derive(Debug, Clone)]
pub struct DispatchTable {
    routes: HashMap<(ObjectType, Action), StoreOperation>,
}

impl DispatchTable {
    /// Every entity kind with every action
    pub fn full() -> Self {
        let routes = ObjectType::ALL
            .iter()
            .flat_map(|object_type| {
                Action::ALL.iter().map(move |action| {
                    let operation = match action {
                        Action::Insert => StoreOperation::Insert,
                        Action::Update => StoreOperation::Update,
                        Action::Delete => StoreOperation::Delete,
                    };
                    ((*object_type, *action), operation)
                })
            })
            .collect();
        Self { routes }
    }

    /// Remove the given pairs from the table
    pub fn without(mut self, pairs: &[(ObjectType, Action)]) -> Self {
        for pair in pairs {
            self.routes.remove(pair);
        }
        self
    }

    /// Resolve a pair; unmapped pairs are `UnsupportedOperation`
    pub fn lookup(&self, object_type: ObjectType, action: Action) -> Result<StoreOperation> {
        self.routes
            .get(&(object_type, action))
            .copied()
            .ok_or_else(|| Error::UnsupportedOperation {
                object_type: object_type.to_string(),
                action: action.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Terminal state of a successful delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The store operation ran
    Applied,
    /// The request id was already applied; the store was not touched
    Deduplicated,
}

/// Result of applying one envelope
#[derive(Debug, Clone, Serialize)]
pub struct AppliedResult {
    pub object_type: ObjectType,
    pub action: Action,
    pub request_id: String,
    pub record_id: Option<String>,
    pub outcome: ApplyOutcome,
}

impl AppliedResult {
    /// Human readable summary, e.g. "patient inserted successfully"
    pub fn message(&self) -> String {
        match self.outcome {
            ApplyOutcome::Applied => {
                format!("{} {} successfully", self.object_type, self.action.past_tense())
            }
            ApplyOutcome::Deduplicated => {
                format!("request {} already applied", self.request_id)
            }
        }
    }
}

/// Applies envelopes from peers exactly once per request id
pub struct ApplyHandler {
    store: Arc<dyn RecordStore>,
    table: DispatchTable,
    guard: Arc<DedupGuard>,
}

impl ApplyHandler {
    /// Create a handler over the given store, dispatch table and guard
    pub fn new(store: Arc<dyn RecordStore>, table: DispatchTable, guard: Arc<DedupGuard>) -> Self {
        Self { store, table, guard }
    }

    /// Dedup guard shared with this handler
    pub fn guard(&self) -> &Arc<DedupGuard> {
        &self.guard
    }

    /// Validate a raw delivery, then apply it
    pub async fn apply_inbound(&self, inbound: InboundEnvelope) -> Result<AppliedResult> {
        let envelope = inbound.validate().map_err(|e| {
            tracing::warn!("Rejected envelope: {}", e);
            e
        })?;
        self.apply(envelope).await
    }

    /// Apply a validated envelope
    pub async fn apply(&self, envelope: Envelope) -> Result<AppliedResult> {
        let operation = self
            .table
            .lookup(envelope.object_type, envelope.action)
            .map_err(|e| {
                tracing::error!("{}", e);
                e
            })?;

        let record_id = envelope.record_id();
        if record_id.is_none() {
            // Peers never mint identifiers of their own for replicated records.
            let e = Error::MalformedEnvelope(format!(
                "{} {} payload carries no {}",
                envelope.object_type,
                envelope.action,
                envelope.object_type.schema().id_column
            ));
            tracing::warn!("Rejected envelope {}: {}", envelope.request_id, e);
            return Err(e);
        }

        let claim = match self.guard.admit(&envelope.request_id).await {
            Admission::Duplicate => {
                tracing::info!(
                    "Request {} already applied, skipping {} {}",
                    envelope.request_id,
                    envelope.action,
                    envelope.object_type
                );
                return Ok(self.result(&envelope, record_id, ApplyOutcome::Deduplicated));
            }
            Admission::Claimed(claim) => claim,
        };

        tracing::info!(
            "Executing {} for {} with request ID {}",
            envelope.action,
            envelope.object_type,
            envelope.request_id
        );

        let record = envelope.record();
        let id = record_id.clone().unwrap_or_default();
        let applied = match operation {
            StoreOperation::Insert => self.store.insert(envelope.object_type, &record).await.map(|_| ()),
            StoreOperation::Update => self.store.update(envelope.object_type, &id, &record).await,
            StoreOperation::Delete => self.store.delete(envelope.object_type, &id).await,
        };

        match applied {
            Ok(()) => {
                claim.mark();
                let result = self.result(&envelope, record_id, ApplyOutcome::Applied);
                tracing::info!("{}", result.message());
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to apply {} {} (request {}): {}",
                    envelope.action,
                    envelope.object_type,
                    envelope.request_id,
                    e
                );
                Err(e)
            }
        }
    }

    fn result(&self, envelope: &Envelope, record_id: Option<String>, outcome: ApplyOutcome) -> AppliedResult {
        AppliedResult {
            object_type: envelope.object_type,
            action: envelope.action,
            request_id: envelope.request_id.clone(),
            record_id,
            outcome,
        }
    }
}
