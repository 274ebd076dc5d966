//! Node assembly and local writes
//!
//! [`WriteService`] is the only way local writes reach the record store:
//! it commits the write, then hands an envelope carrying the record's
//! identifier and a fresh request id to the dispatcher in the background.
//! [`Node`] wires a store, guard, dispatcher and apply handler together
//! from configuration.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::WolfCareConfig;
use crate::error::Result;
use crate::id::new_request_id;
use crate::replication::{
    Action, ApplyHandler, DedupGuard, DeliveryPolicy, DeliveryReport, DispatchTable, Envelope,
    Replicator,
};
use crate::state::PeerRegistry;
use crate::store::{ObjectType, Record, RecordStore, SqliteRecordStore};

/// A committed local write and its in-flight replication
pub struct WriteReceipt {
    /// Identifier of the written record
    pub id: String,
    /// Request id carried by the replicated envelope
    pub request_id: String,
    /// Background delivery to peers; dropping it does not cancel delivery
    pub replication: JoinHandle<Vec<DeliveryReport>>,
}

/// Performs local writes and triggers their replication
pub struct WriteService {
    store: Arc<dyn RecordStore>,
    replicator: Arc<Replicator>,
}

impl WriteService {
    pub fn new(store: Arc<dyn RecordStore>, replicator: Arc<Replicator>) -> Self {
        Self { store, replicator }
    }

    /// Insert locally; the envelope payload gains the minted identifier
    pub async fn insert(&self, object_type: ObjectType, mut data: Record) -> Result<WriteReceipt> {
        let id = self.store.insert(object_type, &data).await?;
        data.insert(object_type.schema().id_column.to_string(), Value::String(id.clone()));
        tracing::info!("{} created successfully. ID: {}", object_type, id);
        Ok(self.replicate(Action::Insert, object_type, id, data))
    }

    /// Update locally; the envelope carries the changed fields plus identifier
    pub async fn update(&self, object_type: ObjectType, id: &str, mut data: Record) -> Result<WriteReceipt> {
        self.store.update(object_type, id, &data).await?;
        data.insert(object_type.schema().id_column.to_string(), Value::String(id.to_string()));
        tracing::info!("{} {} updated", object_type, id);
        Ok(self.replicate(Action::Update, object_type, id.to_string(), data))
    }

    /// Delete locally; the envelope carries only the identifier
    ///
    /// Patients and doctors take their linked user row with them in the same
    /// transaction, and peers do the same when applying the one envelope.
    pub async fn delete(&self, object_type: ObjectType, id: &str) -> Result<WriteReceipt> {
        self.store.delete(object_type, id).await?;
        let mut data = Record::new();
        data.insert(object_type.schema().id_column.to_string(), Value::String(id.to_string()));
        tracing::info!("{} {} deleted", object_type, id);
        Ok(self.replicate(Action::Delete, object_type, id.to_string(), data))
    }

    /// Read a record from the local store
    pub async fn get(&self, object_type: ObjectType, id: &str) -> Result<Option<Record>> {
        self.store.get(object_type, id).await
    }

    fn replicate(&self, action: Action, object_type: ObjectType, id: String, data: Record) -> WriteReceipt {
        let request_id = new_request_id();
        let envelope = Envelope::new(action, object_type, Value::Object(data), request_id.clone());
        WriteReceipt {
            id,
            request_id,
            replication: self.replicator.replicate_detached(envelope),
        }
    }
}

/// Every service of a running node
pub struct Node {
    pub node_id: String,
    pub writes: Arc<WriteService>,
    pub apply: Arc<ApplyHandler>,
    pub peers: Arc<PeerRegistry>,
    pub dedup: Arc<DedupGuard>,
}

impl Node {
    /// Assemble a node around an existing store
    pub fn new(
        node_id: String,
        store: Arc<dyn RecordStore>,
        table: DispatchTable,
        peers: Vec<String>,
        policy: DeliveryPolicy,
    ) -> Result<Self> {
        let peers = Arc::new(PeerRegistry::new(peers));
        let dedup = Arc::new(DedupGuard::new());
        let replicator = Arc::new(Replicator::new(Arc::clone(&peers), policy)?);

        Ok(Self {
            node_id,
            writes: Arc::new(WriteService::new(Arc::clone(&store), replicator)),
            apply: Arc::new(ApplyHandler::new(store, table, Arc::clone(&dedup))),
            peers,
            dedup,
        })
    }

    /// Open the SQLite store and assemble a node from configuration
    pub fn from_config(config: &WolfCareConfig) -> Result<Self> {
        let store = SqliteRecordStore::open(config.database_path(), config.node.number)?;
        let table = DispatchTable::full().without(&config.replication.disabled_pairs()?);
        tracing::info!(
            "Node {} replicating to {} peer(s), {} operations enabled",
            config.node.id,
            config.replication.peers.len(),
            table.len()
        );

        Self::new(
            config.node.id.clone(),
            Arc::new(store),
            table,
            config.replication.peers.clone(),
            DeliveryPolicy::from(&config.replication),
        )
    }

    /// Periodically evict request ids older than `retention`
    pub fn spawn_dedup_sweeper(&self, retention: Duration, every: Duration) -> JoinHandle<()> {
        let dedup = Arc::clone(&self.dedup);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = dedup.evict_older_than(retention);
                if evicted > 0 {
                    tracing::debug!("Evicted {} expired request ids", evicted);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::apply::tests::RecordingStore;
    use crate::replication::StoreOperation;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::tempdir;

    async fn spawn_capturing_peer() -> (String, Arc<Mutex<Vec<Value>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let app = Router::new().route(
            "/replicate",
            post(move |Json(body): Json<Value>| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(body);
                    StatusCode::CREATED
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), received)
    }

    fn ann() -> Record {
        json!({
            "Name": "Ann",
            "DateOfBirth": "1990-01-01",
            "Gender": "F",
            "PhoneNumber": 5551234
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[tokio::test]
    async fn test_identifier_propagates_into_envelope() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteRecordStore::open(dir.path().join("records.db"), 4).unwrap());
        let (peer, received) = spawn_capturing_peer().await;
        let node = Node::new(
            "node-1".into(),
            store,
            DispatchTable::full(),
            vec![peer],
            DeliveryPolicy::default(),
        )
        .unwrap();

        let receipt = node.writes.insert(ObjectType::Patient, ann()).await.unwrap();
        let reports = receipt.replication.await.unwrap();
        assert!(reports[0].is_delivered());

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["action"], json!("insert"));
        assert_eq!(received[0]["request_id"], json!(receipt.request_id));
        assert_eq!(received[0]["data"]["PatientID"], json!(receipt.id));
        assert_eq!(received[0]["data"]["Name"], json!("Ann"));
    }

    #[tokio::test]
    async fn test_local_write_survives_unreachable_peer() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteRecordStore::open(dir.path().join("records.db"), 1).unwrap());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let node = Node::new(
            "node-1".into(),
            store,
            DispatchTable::full(),
            vec![dead.clone()],
            DeliveryPolicy {
                max_attempts: 1,
                ..DeliveryPolicy::default()
            },
        )
        .unwrap();

        let receipt = node.writes.insert(ObjectType::Patient, ann()).await.unwrap();
        assert!(node.writes.get(ObjectType::Patient, &receipt.id).await.unwrap().is_some());

        let reports = receipt.replication.await.unwrap();
        assert!(!reports[0].is_delivered());
        assert!(node.writes.get(ObjectType::Patient, &receipt.id).await.unwrap().is_some());
        assert_eq!(node.peers.get(&dead).await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_failed_local_write_is_not_replicated() {
        let store = Arc::new(RecordingStore {
            fail_with_not_found: true,
            ..Default::default()
        });
        let (peer, received) = spawn_capturing_peer().await;
        let node = Node::new(
            "node-1".into(),
            store,
            DispatchTable::full(),
            vec![peer],
            DeliveryPolicy::default(),
        )
        .unwrap();

        assert!(node.writes.delete(ObjectType::Doctor, "missing").await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_envelope_carries_identifier_only() {
        let store = Arc::new(RecordingStore::default());
        let (peer, received) = spawn_capturing_peer().await;
        let node = Node::new(
            "node-1".into(),
            Arc::clone(&store) as Arc<dyn RecordStore>,
            DispatchTable::full(),
            vec![peer],
            DeliveryPolicy::default(),
        )
        .unwrap();

        let receipt = node.writes.delete(ObjectType::Patient, "p-3").await.unwrap();
        receipt.replication.await.unwrap();

        assert_eq!(store.calls(), vec![(StoreOperation::Delete, ObjectType::Patient, "p-3".to_string())]);
        let received = received.lock().unwrap();
        assert_eq!(received[0]["data"], json!({"PatientID": "p-3"}));
        assert_eq!(received[0]["action"], json!("delete"));
    }
}
