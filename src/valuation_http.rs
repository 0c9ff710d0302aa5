//! HTTP valuation source.
//!
//! The protocol sends valuation queries synchronously, so the transport only
//! assigns a correlation id and queues the query. A [`ValuationDispatcher`]
//! task POSTs queued queries to the external service. The service answers
//! later on the admin server's callback route; when the POST itself fails the
//! dispatcher reports the failure back to the node so the request does not
//! stay open.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{keccak256, Address, Bytes, U256};
use alloy_sol_types::SolValue;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use hmac::{digest::KeyInit as HmacKeyInit, Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::estate::node::NodeHandle;
use crate::estate::oracle::ValuationQuery;
use crate::estate::transport::{TransportError, ValuationTransport};
use crate::estate::types::CorrelationId;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

// ─────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────

/// Body POSTed to the valuation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationJob {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub query: ValuationQuery,
    #[serde(default)]
    pub callback_url: Option<Url>,
}

/// Body the valuation service posts back. Either `valuation` (plain number)
/// or a raw ABI `payload` carries the result; `error` marks a failed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationCallback {
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub valuation: Option<U256>,
    #[serde(default)]
    pub payload: Option<Bytes>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ValuationCallback {
    /// ABI payload handed to the oracle gateway.
    pub fn into_payload(self) -> (Bytes, Option<String>) {
        let payload = match (self.valuation, self.payload) {
            (Some(v), _) => Bytes::from(v.abi_encode()),
            (None, Some(raw)) => raw,
            (None, None) => Bytes::new(),
        };
        (payload, self.error)
    }
}

// ─────────────────────────────────────────────────────────
// Signing
// ─────────────────────────────────────────────────────────

/// Base64 HMAC-SHA256 over `body`.
pub fn sign(secret: &SecretString, body: &[u8]) -> Result<String> {
    let mut mac = <HmacSha256 as HmacKeyInit>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| anyhow::anyhow!("HMAC init failed: {}", e))?;
    mac.update(body);
    Ok(B64.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a base64 signature.
pub fn verify(secret: &SecretString, body: &[u8], signature: &str) -> bool {
    let Ok(sig) = B64.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as HmacKeyInit>::new_from_slice(secret.expose_secret().as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig).is_ok()
}

// ─────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────

/// [`ValuationTransport`] half: hands queries to the dispatcher queue.
pub struct HttpValuationTransport {
    tx: mpsc::Sender<(CorrelationId, ValuationQuery)>,
}

impl HttpValuationTransport {
    pub fn new(tx: mpsc::Sender<(CorrelationId, ValuationQuery)>) -> Self {
        Self { tx }
    }
}

impl ValuationTransport for HttpValuationTransport {
    fn send(&mut self, query: &ValuationQuery) -> Result<CorrelationId, TransportError> {
        let id = CorrelationId(keccak256(uuid::Uuid::new_v4().as_bytes()));
        self.tx.try_send((id, query.clone())).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Unavailable("valuation queue full".into()),
            mpsc::error::TrySendError::Closed(_) => {
                TransportError::Unavailable("valuation dispatcher stopped".into())
            }
        })?;
        debug!("📡 queued valuation {} for asset #{}", id, query.asset_id);
        Ok(id)
    }
}

// ─────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub endpoint: Url,
    pub callback_url: Option<Url>,
    /// Identity the node accepts valuation responses from.
    pub oracle_identity: Address,
    pub timeout: Duration,
}

pub struct ValuationDispatcher {
    cfg: DispatcherConfig,
    client: reqwest::Client,
    secret: Option<Arc<SecretString>>,
    node: NodeHandle,
    rx: mpsc::Receiver<(CorrelationId, ValuationQuery)>,
}

impl ValuationDispatcher {
    /// The transport goes into the protocol; the receiver is handed to
    /// [`ValuationDispatcher::from_parts`] once the node is running.
    pub fn channel(queue: usize) -> (HttpValuationTransport, mpsc::Receiver<(CorrelationId, ValuationQuery)>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        (HttpValuationTransport::new(tx), rx)
    }

    pub fn from_parts(
        cfg: DispatcherConfig,
        secret: Option<Arc<SecretString>>,
        node: NodeHandle,
        rx: mpsc::Receiver<(CorrelationId, ValuationQuery)>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("failed to build valuation HTTP client")?;
        Ok(Self {
            cfg,
            client,
            secret,
            node,
            rx,
        })
    }

    /// Runs until the transport side is dropped.
    pub async fn run(mut self) {
        info!("📡 ValuationDispatcher started | endpoint={}", self.cfg.endpoint);
        while let Some((id, query)) = self.rx.recv().await {
            let job = ValuationJob {
                correlation_id: id,
                query,
                callback_url: self.cfg.callback_url.clone(),
            };
            let client = self.client.clone();
            let endpoint = self.cfg.endpoint.clone();
            let secret = self.secret.clone();
            let node = self.node.clone();
            let oracle = self.cfg.oracle_identity;
            tokio::spawn(async move {
                if let Err(e) = post_job(&client, endpoint, secret.as_deref(), &job).await {
                    warn!("📡 valuation {} not delivered: {:#}", id, e);
                    let reason = format!("valuation service unreachable: {}", e);
                    match node.valuation_response(oracle, id, Bytes::new(), Some(reason)).await {
                        Ok(outcome) => debug!("📡 {} closed as {:?}", id, outcome),
                        Err(e) => warn!("📡 could not close {}: {}", id, e),
                    }
                }
            });
        }
        info!("📡 ValuationDispatcher stopped");
    }
}

async fn post_job(
    client: &reqwest::Client,
    endpoint: Url,
    secret: Option<&SecretString>,
    job: &ValuationJob,
) -> Result<()> {
    let body = serde_json::to_vec(job)?;
    let mut req = client
        .post(endpoint)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(CORRELATION_HEADER, job.correlation_id.0.to_string());
    if let Some(secret) = secret {
        req = req.header(SIGNATURE_HEADER, sign(secret, &body)?);
    }
    let resp = req.body(body).send().await.context("request failed")?;
    if !resp.status().is_success() {
        anyhow::bail!("valuation service returned status: {}", resp.status());
    }
    debug!("📡 valuation {} accepted", job.correlation_id);
    Ok(())
}
