//! HTTP API Server
//!
//! The replication endpoint peers deliver envelopes to, plus the local
//! record endpoints that trigger replication and status queries.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::replication::{ApplyOutcome, InboundEnvelope};
use crate::state::PeerState;
use crate::store::{ObjectType, Record};

/// Shared application state
pub struct AppState {
    /// Node services
    pub node: Arc<Node>,
    /// Startup time, for uptime reporting
    pub started_at: std::time::Instant,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, node: Arc<Node>) -> Self {
        let state = Arc::new(AppState {
            node,
            started_at: std::time::Instant::now(),
        });
        Self { config, state }
    }

    /// Get the state for sharing with other components
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Create the router
    pub fn router(state: Arc<AppState>) -> Router {
        Router::new()
            // Replication
            .route("/replicate", post(handle_replicate))
            // Local records
            .route("/records/:object_type", post(handle_create))
            .route(
                "/records/:object_type/:id",
                get(handle_get).put(handle_update).delete(handle_delete),
            )
            // Status and info
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP server and run until ctrl-c
    pub async fn start(&self) -> Result<()> {
        let app = Self::router(Arc::clone(&self.state));

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutdown signal received");
            })
            .await
            .map_err(|e| Error::Internal(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Replication response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicateResponse {
    pub message: String,
    pub request_id: String,
    pub outcome: ApplyOutcome,
}

/// Local write response
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub id: String,
    pub request_id: String,
    pub message: String,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
}

/// Status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub uptime_seconds: u64,
    pub tracked_request_ids: usize,
    pub peers: Vec<PeerState>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}

// ============ Handlers ============

async fn handle_replicate(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<InboundEnvelope>, JsonRejection>,
) -> Result<(StatusCode, Json<ReplicateResponse>)> {
    let Json(inbound) = body.map_err(|e| {
        tracing::warn!("No usable envelope in request: {}", e);
        Error::MalformedEnvelope(e.body_text())
    })?;

    tracing::debug!(
        "Processing action {:?} for object_type {:?}",
        inbound.action,
        inbound.object_type
    );

    let result = state.node.apply.apply_inbound(inbound).await?;
    Ok((
        StatusCode::CREATED,
        Json(ReplicateResponse {
            message: result.message(),
            request_id: result.request_id,
            outcome: result.outcome,
        }),
    ))
}

async fn handle_create(
    State(state): State<Arc<AppState>>,
    Path(object_type): Path<String>,
    body: std::result::Result<Json<Record>, JsonRejection>,
) -> Result<(StatusCode, Json<WriteResponse>)> {
    let object_type = parse_object_type(&object_type)?;
    let Json(data) = body.map_err(|e| Error::Validation(e.body_text()))?;

    let receipt = state.node.writes.insert(object_type, data).await?;
    Ok((
        StatusCode::CREATED,
        Json(WriteResponse {
            message: format!("{} created", object_type),
            id: receipt.id,
            request_id: receipt.request_id,
        }),
    ))
}

async fn handle_get(
    State(state): State<Arc<AppState>>,
    Path((object_type, id)): Path<(String, String)>,
) -> Result<Json<Record>> {
    let object_type = parse_object_type(&object_type)?;
    state
        .node
        .writes
        .get(object_type, &id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound {
            object_type: object_type.to_string(),
            id,
        })
}

async fn handle_update(
    State(state): State<Arc<AppState>>,
    Path((object_type, id)): Path<(String, String)>,
    body: std::result::Result<Json<Record>, JsonRejection>,
) -> Result<Json<WriteResponse>> {
    let object_type = parse_object_type(&object_type)?;
    let Json(data) = body.map_err(|e| Error::Validation(e.body_text()))?;
    if data.is_empty() {
        return Err(Error::Validation("Missing update data".into()));
    }

    let receipt = state.node.writes.update(object_type, &id, data).await?;
    Ok(Json(WriteResponse {
        message: format!("{} updated successfully", object_type),
        id: receipt.id,
        request_id: receipt.request_id,
    }))
}

async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Path((object_type, id)): Path<(String, String)>,
) -> Result<Json<WriteResponse>> {
    let object_type = parse_object_type(&object_type)?;
    let receipt = state.node.writes.delete(object_type, &id).await?;
    Ok(Json(WriteResponse {
        message: format!("{} deleted successfully", object_type),
        id: receipt.id,
        request_id: receipt.request_id,
    }))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        node_id: state.node.node_id.clone(),
    })
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        node_id: state.node.node_id.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        tracked_request_ids: state.node.dedup.len(),
        peers: state.node.peers.all().await,
    })
}

// ============ Helpers ============

fn parse_object_type(raw: &str) -> Result<ObjectType> {
    raw.parse::<ObjectType>()
        .map_err(|_| Error::Validation(format!("Unknown record type '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{DeliveryPolicy, DispatchTable};
    use crate::store::SqliteRecordStore;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    fn test_router(peers: Vec<String>, table: DispatchTable) -> (Router, Arc<Node>, TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("records.db"), 1).unwrap();
        let node = Arc::new(
            Node::new(
                "node-test".into(),
                Arc::new(store),
                table,
                peers,
                DeliveryPolicy {
                    max_attempts: 1,
                    ..DeliveryPolicy::default()
                },
            )
            .unwrap(),
        );
        let state = Arc::new(AppState {
            node: Arc::clone(&node),
            started_at: std::time::Instant::now(),
        });
        (HttpServer::router(state), node, dir)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn patient_envelope(request_id: &str) -> Value {
        json!({
            "action": "insert",
            "object_type": "patient",
            "data": {
                "PatientID": "origin-1",
                "Name": "Ann",
                "DateOfBirth": "1990-01-01",
                "Gender": "F",
                "PhoneNumber": 5551234
            },
            "request_id": request_id
        })
    }

    #[tokio::test]
    async fn test_replicate_applies_once() {
        let (app, node, _dir) = test_router(vec![], DispatchTable::full());

        let (status, body) = call(&app, Method::POST, "/replicate", Some(patient_envelope("abc123"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["outcome"], json!("applied"));
        assert_eq!(body["message"], json!("patient inserted successfully"));

        let (status, body) = call(&app, Method::POST, "/replicate", Some(patient_envelope("abc123"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["outcome"], json!("deduplicated"));

        let stored = node.writes.get(ObjectType::Patient, "origin-1").await.unwrap().unwrap();
        assert_eq!(stored["Name"], json!("Ann"));
    }

    #[tokio::test]
    async fn test_replicate_error_statuses() {
        let table = DispatchTable::full().without(&[(ObjectType::User, crate::replication::Action::Update)]);
        let (app, node, _dir) = test_router(vec![], table);

        let (status, body) = call(
            &app,
            Method::POST,
            "/replicate",
            Some(json!({"action": "insert", "object_type": "patient", "request_id": "r1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("MALFORMED_ENVELOPE"));
        assert!(node.writes.get(ObjectType::Patient, "origin-1").await.unwrap().is_none());

        let (status, body) = call(
            &app,
            Method::POST,
            "/replicate",
            Some(json!({"action": "update", "object_type": "user", "data": {"UserID": "u1", "Role": "x"}, "request_id": "r2"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("UNSUPPORTED_OPERATION"));

        let (status, _) = call(
            &app,
            Method::POST,
            "/replicate",
            Some(json!({"action": "delete", "object_type": "doctor", "data": "ghost", "request_id": "r3"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        call(&app, Method::POST, "/replicate", Some(patient_envelope("r4"))).await;
        let mut clash = patient_envelope("r5");
        clash["data"]["PatientID"] = json!("origin-2");
        let (status, body) = call(&app, Method::POST, "/replicate", Some(clash)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], json!("INTEGRITY_VIOLATION"));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/replicate")
            .header("content-type", "application/json")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_record_crud() {
        let (app, _node, _dir) = test_router(vec![], DispatchTable::full());

        let (status, body) = call(
            &app,
            Method::POST,
            "/records/doctor",
            Some(json!({"Name": "House", "Specialization": "Diagnostics", "PhoneNumber": 5550001})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_str().unwrap().to_string();
        assert_eq!(body["request_id"].as_str().unwrap().len(), 32);

        let (status, body) = call(&app, Method::GET, &format!("/records/doctor/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["DoctorID"], json!(id));

        let (status, _) = call(
            &app,
            Method::PUT,
            &format!("/records/doctor/{}", id),
            Some(json!({"Specialization": "Nephrology"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, &format!("/records/doctor/{}", id), None).await;
        assert_eq!(body["Specialization"], json!("Nephrology"));

        let (status, _) = call(&app, Method::DELETE, &format!("/records/doctor/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, &format!("/records/doctor/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, Method::POST, "/records/patient", Some(json!({"Name": "Ann"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("DateOfBirth"));

        let (status, _) = call(&app, Method::GET, "/records/nurse/1", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_two_nodes_converge() {
        // Peer node served over loopback
        let (peer_app, peer, _peer_dir) = test_router(vec![], DispatchTable::full());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, peer_app).await.unwrap();
        });

        let (_app, origin, _dir) = test_router(vec![peer_url.clone()], DispatchTable::full());

        let user = json!({"UserID": "7", "Username": "ann", "Password": "Secret123", "Role": "patient"});
        let receipt = origin
            .writes
            .insert(ObjectType::User, user.as_object().cloned().unwrap())
            .await
            .unwrap();
        receipt.replication.await.unwrap();

        let patient = json!({
            "PatientID": "7",
            "Name": "Ann",
            "DateOfBirth": "1990-01-01",
            "Gender": "F",
            "PhoneNumber": 5551234
        });
        let receipt = origin
            .writes
            .insert(ObjectType::Patient, patient.as_object().cloned().unwrap())
            .await
            .unwrap();
        receipt.replication.await.unwrap();
        assert!(peer.writes.get(ObjectType::Patient, "7").await.unwrap().is_some());
        assert!(peer.writes.get(ObjectType::User, "7").await.unwrap().is_some());

        let receipt = origin.writes.delete(ObjectType::Patient, "7").await.unwrap();
        let reports = receipt.replication.await.unwrap();
        assert!(reports[0].is_delivered());

        assert!(peer.writes.get(ObjectType::Patient, "7").await.unwrap().is_none());
        assert!(peer.writes.get(ObjectType::User, "7").await.unwrap().is_none());
        assert!(origin.writes.get(ObjectType::User, "7").await.unwrap().is_none());

        let status = origin.peers.get(&peer_url).await.unwrap();
        assert_eq!(status.delivered, 3);
    }

    #[tokio::test]
    async fn test_status_reports_peers() {
        let (app, _node, _dir) = test_router(vec!["http://node-2:8080".into()], DispatchTable::full());
        let (status, body) = call(&app, Method::GET, "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], json!("node-test"));
        assert_eq!(body["peers"][0]["address"], json!("http://node-2:8080"));
        assert_eq!(body["peers"][0]["status"], json!("Unknown"));
    }
}
