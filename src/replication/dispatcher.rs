//! Replication Dispatcher
//!
//! Sends one envelope to every known peer's `/replicate` endpoint. Peers are
//! delivered to in parallel and independently: one peer timing out or
//! refusing the envelope never holds up or cancels delivery to the others.
//! A peer that fails with a retryable error is sent the identical envelope
//! again, up to the configured number of attempts.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::envelope::{Action, Envelope};
use crate::config::ReplicationSettings;
use crate::error::{Error, Result};
use crate::state::PeerRegistry;
use crate::store::ObjectType;

/// Upper bound on backoff between attempts
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Delivery policy for each peer
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl From<&ReplicationSettings> for DeliveryPolicy {
    fn from(settings: &ReplicationSettings) -> Self {
        Self {
            request_timeout: settings.request_timeout(),
            connect_timeout: settings.connect_timeout(),
            max_attempts: settings.max_attempts.max(1),
            retry_backoff: settings.retry_backoff(),
        }
    }
}

/// Outcome of delivering one envelope to one peer
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub peer: String,
    pub request_id: String,
    pub attempts: u32,
    /// `None` when the peer accepted the envelope
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Fans envelopes out to peers
pub struct Replicator {
    client: reqwest::Client,
    peers: Arc<PeerRegistry>,
    policy: DeliveryPolicy,
}

impl Replicator {
    /// Create a dispatcher for the given peers
    pub fn new(peers: Arc<PeerRegistry>, policy: DeliveryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .connect_timeout(policy.connect_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, peers, policy })
    }

    /// Peer registry this dispatcher reports into
    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    /// Build one envelope and deliver it to every peer
    ///
    /// Returns once every peer has either accepted the envelope or been
    /// given up on. Failures are logged and reported, never returned as
    /// errors: the write being replicated has already committed.
    pub async fn replicate(
        &self,
        action: Action,
        payload: Value,
        object_type: ObjectType,
        request_id: String,
    ) -> Vec<DeliveryReport> {
        let envelope = Envelope::new(action, object_type, payload, request_id);
        self.deliver(&envelope).await
    }

    /// Deliver the envelope in the background
    pub fn replicate_detached(self: &Arc<Self>, envelope: Envelope) -> JoinHandle<Vec<DeliveryReport>> {
        let replicator = Arc::clone(self);
        tokio::spawn(async move { replicator.deliver(&envelope).await })
    }

    /// Deliver an already-built envelope to every peer
    pub async fn deliver(&self, envelope: &Envelope) -> Vec<DeliveryReport> {
        if self.peers.is_empty() {
            tracing::debug!("No peers configured, request {} stays local", envelope.request_id);
            return Vec::new();
        }

        let deliveries = self
            .peers
            .addresses()
            .iter()
            .map(|peer| self.deliver_to(peer, envelope));
        let reports = futures::future::join_all(deliveries).await;

        let delivered = reports.iter().filter(|r| r.is_delivered()).count();
        tracing::info!(
            "Replicated {} {} (request {}) to {}/{} peers",
            envelope.action,
            envelope.object_type,
            envelope.request_id,
            delivered,
            reports.len()
        );
        reports
    }

    async fn deliver_to(&self, peer: &str, envelope: &Envelope) -> DeliveryReport {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(peer, envelope).await {
                Ok(()) => {
                    self.peers.record_success(peer).await;
                    return DeliveryReport {
                        peer: peer.to_string(),
                        request_id: envelope.request_id.clone(),
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let wait = self.backoff(attempt);
                    tracing::debug!(
                        "Delivery of {} to {} failed (attempt {}): {}, retrying in {:?}",
                        envelope.request_id,
                        peer,
                        attempt,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to replicate {} {} (request {}) to {}: {}",
                        envelope.action,
                        envelope.object_type,
                        envelope.request_id,
                        peer,
                        e
                    );
                    self.peers.record_failure(peer, &e.to_string()).await;
                    return DeliveryReport {
                        peer: peer.to_string(),
                        request_id: envelope.request_id.clone(),
                        attempts: attempt,
                        error: Some(e.to_string()),
                    };
                }
            }
        }
    }

    async fn send_once(&self, peer: &str, envelope: &Envelope) -> Result<()> {
        let url = format!("{}/replicate", peer);
        let response = self
            .client
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::DeliveryTimeout(peer.to_string())
                } else {
                    Error::DeliveryFailure {
                        peer: peer.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::PeerRejected {
            peer: peer.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    /// Exponential backoff with up to 50% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .policy
            .retry_backoff
            .saturating_mul(1 << (attempt - 1).min(16))
            .min(MAX_BACKOFF);
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter_ms)
    }
}
