//! Admin and callback HTTP surface of a node.
//!
//! Reads are open. Each write surface has its own HMAC key and is only
//! mounted when that key is configured:
//!
//! - `/admin/*` acts as the configured operator. The signature covers
//!   [`signing_input`] of the request path and body.
//! - `/callbacks/valuation` is where the valuation service reports results
//!   and acts as the oracle transport identity. The signature covers the
//!   body, matching what the service receives from the dispatcher.
//! - `/relay/*` lets an external relayer fetch outbound cross-domain
//!   messages, acknowledge them once delivered, and deliver inbound ones as
//!   the message transport identity. Signed like `/admin/*`.
//!
//! The acting identity always comes from configuration, never the request.

use std::net::SocketAddr;
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use secrecy::SecretString;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::estate::error::{ErrorKind, ProtocolError};
use crate::estate::node::{NodeError, NodeHandle};
use crate::estate::oracle::{OracleParams, ResponseOutcome};
use crate::estate::registry::RegistryError;
use crate::estate::transport::{InboundMessage, LoopbackMessageTransport};
use crate::estate::types::{AssetId, DomainId, MessageId};
use crate::valuation_http::{self, ValuationCallback, CORRELATION_HEADER, SIGNATURE_HEADER};

#[derive(Clone)]
pub struct AdminState {
    pub node: NodeHandle,
    /// Identity every `/admin/*` write acts as.
    pub operator: Address,
    pub admin_secret: Option<Arc<SecretString>>,
    pub oracle_identity: Address,
    pub callback_secret: Option<Arc<SecretString>>,
    pub relay: Option<RelayState>,
}

#[derive(Clone)]
pub struct RelayState {
    pub outbox: LoopbackMessageTransport,
    /// Identity inbound deliveries are made under.
    pub message_identity: Address,
    pub secret: Arc<SecretString>,
}

/// Bytes an `/admin/*` or `/relay/*` signature is computed over. Binding the
/// path keeps a signature for one asset or domain from being replayed on
/// another.
pub fn signing_input(path: &str, body: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(path.len() + 1 + body.len());
    input.extend_from_slice(path.as_bytes());
    input.push(b'\n');
    input.extend_from_slice(body);
    input
}

// ─────────────────────────────────────────────────────────
// Bodies
// ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PauseBody {
    pub paused: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerBody {
    pub manager: Address,
    pub authorized: bool,
}

/// `remote: null` removes the entry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustedRemoteBody {
    pub domain: DomainId,
    #[serde(default)]
    pub remote: Option<Address>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActiveBody {
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AckBody {
    pub ids: Vec<MessageId>,
}

// ─────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Node(NodeError),
    Unauthorized(&'static str),
    BadRequest(String),
}

impl From<NodeError> for ApiError {
    fn from(e: NodeError) -> Self {
        ApiError::Node(e)
    }
}

fn status_for(e: &ProtocolError) -> StatusCode {
    if matches!(e, ProtocolError::Registry(RegistryError::NotFound(_))) {
        return StatusCode::NOT_FOUND;
    }
    match e.kind() {
        ErrorKind::Authorization | ErrorKind::Trust => StatusCode::FORBIDDEN,
        ErrorKind::State => StatusCode::CONFLICT,
        ErrorKind::Value => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Transport => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::Node(NodeError::Protocol(e)) => (status_for(e), json!(e.kind()), e.to_string()),
            ApiError::Node(NodeError::Closed) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!("unavailable"), "node is not running".to_string())
            }
            ApiError::Unauthorized(why) => (StatusCode::UNAUTHORIZED, json!("authorization"), why.to_string()),
            ApiError::BadRequest(why) => (StatusCode::BAD_REQUEST, json!("value"), why.clone()),
        };
        (status, Json(json!({ "error": message, "kind": kind }))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

// ─────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────

pub fn router(state: AdminState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/assets", get(list_assets))
        .route("/assets/:id", get(asset_report))
        .route("/assets/:id/holders/:holder", get(holder_position));
    if state.admin_secret.is_some() {
        app = app
            .route("/admin/pause", post(set_paused))
            .route("/admin/managers", post(set_manager))
            .route("/admin/trusted-remotes", post(set_trusted_remote))
            .route("/admin/oracle-params", post(set_oracle_params))
            .route("/admin/assets/:id/active", post(set_asset_active))
            .route("/admin/assets/:id/valuation", post(request_valuation));
    }
    if state.callback_secret.is_some() {
        app = app.route("/callbacks/valuation", post(valuation_callback));
    }
    if state.relay.is_some() {
        app = app
            .route("/relay/outbox/:domain", post(peek_outbox))
            .route("/relay/outbox/:domain/ack", post(ack_outbox))
            .route("/relay/inbound", post(deliver_inbound));
    }
    app.with_state(state)
}

pub async fn serve_admin(state: AdminState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin server on {}", addr))?;
    info!("🌐 admin server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .await
        .context("admin server stopped")
}

// ─────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────

fn check_signature(secret: Option<&SecretString>, headers: &HeaderMap, signed: &[u8]) -> Result<(), ApiError> {
    let secret = secret.ok_or(ApiError::Unauthorized("surface is not configured"))?;
    let sig = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized("missing signature"))?;
    if !valuation_http::verify(secret, signed, sig) {
        warn!("🌐 request with bad signature rejected");
        return Err(ApiError::Unauthorized("bad signature"));
    }
    Ok(())
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid body: {}", e)))
}

fn parse_asset(id: &str) -> Result<AssetId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid asset id {:?}", id)))
}

fn admin_auth(s: &AdminState, uri: &Uri, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
    check_signature(s.admin_secret.as_deref(), headers, &signing_input(uri.path(), body))
}

fn relay_auth<'a>(s: &'a AdminState, uri: &Uri, headers: &HeaderMap, body: &[u8]) -> Result<&'a RelayState, ApiError> {
    let relay = s.relay.as_ref().ok_or(ApiError::Unauthorized("surface is not configured"))?;
    check_signature(Some(&*relay.secret), headers, &signing_input(uri.path(), body))?;
    Ok(relay)
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn stats(State(s): State<AdminState>) -> Response {
    Json(s.node.stats()).into_response()
}

async fn list_assets(State(s): State<AdminState>) -> ApiResult {
    Ok(Json(s.node.assets().await?).into_response())
}

async fn asset_report(State(s): State<AdminState>, Path(id): Path<String>) -> ApiResult {
    Ok(Json(s.node.asset_report(parse_asset(&id)?).await?).into_response())
}

async fn holder_position(State(s): State<AdminState>, Path((id, holder)): Path<(String, Address)>) -> ApiResult {
    let asset = parse_asset(&id)?;
    let balance = s.node.balance_of(asset, holder).await?;
    let claimable = s.node.claimable_amount(holder, asset).await?;
    Ok(Json(json!({
        "asset": asset,
        "holder": holder,
        "balance": balance,
        "claimable": claimable,
    }))
    .into_response())
}

// ─────────────────────────────────────────────────────────
// Admin writes
// ─────────────────────────────────────────────────────────

async fn set_paused(State(s): State<AdminState>, uri: Uri, headers: HeaderMap, body: axum::body::Bytes) -> ApiResult {
    admin_auth(&s, &uri, &headers, &body)?;
    let body: PauseBody = parse(&body)?;
    s.node.set_paused(s.operator, body.paused).await?;
    Ok(Json(json!({ "paused": body.paused })).into_response())
}

async fn set_manager(State(s): State<AdminState>, uri: Uri, headers: HeaderMap, body: axum::body::Bytes) -> ApiResult {
    admin_auth(&s, &uri, &headers, &body)?;
    let body: ManagerBody = parse(&body)?;
    s.node.set_manager(s.operator, body.manager, body.authorized).await?;
    Ok(Json(json!({ "manager": body.manager, "authorized": body.authorized })).into_response())
}

async fn set_trusted_remote(
    State(s): State<AdminState>,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult {
    admin_auth(&s, &uri, &headers, &body)?;
    let body: TrustedRemoteBody = parse(&body)?;
    match body.remote {
        Some(remote) => s.node.set_trusted_remote(s.operator, body.domain, remote).await?,
        None => s.node.remove_trusted_remote(s.operator, body.domain).await?,
    }
    Ok(Json(json!({ "domain": body.domain, "remote": body.remote })).into_response())
}

async fn set_oracle_params(
    State(s): State<AdminState>,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult {
    admin_auth(&s, &uri, &headers, &body)?;
    let params: OracleParams = parse(&body)?;
    s.node.set_oracle_params(s.operator, params.clone()).await?;
    Ok(Json(params).into_response())
}

async fn set_asset_active(
    State(s): State<AdminState>,
    Path(id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult {
    admin_auth(&s, &uri, &headers, &body)?;
    let asset = parse_asset(&id)?;
    let body: ActiveBody = parse(&body)?;
    s.node.set_asset_active(s.operator, asset, body.active).await?;
    Ok(Json(json!({ "asset": asset, "active": body.active })).into_response())
}

/// Body is ignored but still signed; an empty one is fine.
async fn request_valuation(
    State(s): State<AdminState>,
    Path(id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult {
    admin_auth(&s, &uri, &headers, &body)?;
    let correlation_id = s.node.request_valuation(s.operator, parse_asset(&id)?).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "correlation_id": correlation_id }))).into_response())
}

// ─────────────────────────────────────────────────────────
// Valuation callback
// ─────────────────────────────────────────────────────────

async fn valuation_callback(State(s): State<AdminState>, headers: HeaderMap, body: axum::body::Bytes) -> ApiResult {
    check_signature(s.callback_secret.as_deref(), &headers, &body)?;

    let cb: ValuationCallback = parse(&body)?;
    if let Some(header_id) = headers.get(CORRELATION_HEADER).and_then(|v| v.to_str().ok()) {
        if header_id != cb.correlation_id.0.to_string() {
            return Err(ApiError::BadRequest("correlation id header does not match body".into()));
        }
    }

    let id = cb.correlation_id;
    let (payload, error) = cb.into_payload();
    let outcome = s.node.valuation_response(s.oracle_identity, id, payload, error).await?;
    let body = match outcome {
        ResponseOutcome::Fulfilled(change) => json!({ "outcome": "fulfilled", "change": change }),
        ResponseOutcome::Failed { asset, reason } => json!({ "outcome": "failed", "asset": asset, "reason": reason }),
        ResponseOutcome::Ignored => json!({ "outcome": "ignored" }),
    };
    Ok(Json(body).into_response())
}

// ─────────────────────────────────────────────────────────
// Relay
// ─────────────────────────────────────────────────────────

/// Every queued message for `domain`. They stay queued until acknowledged,
/// so a relayer that dies mid-delivery sees them again.
async fn peek_outbox(
    State(s): State<AdminState>,
    Path(domain): Path<u32>,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult {
    let relay = relay_auth(&s, &uri, &headers, &body)?;
    let messages = relay.outbox.peek_for(DomainId(domain));
    Ok(Json(messages).into_response())
}

async fn ack_outbox(
    State(s): State<AdminState>,
    Path(domain): Path<u32>,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult {
    let relay = relay_auth(&s, &uri, &headers, &body)?;
    let ack: AckBody = parse(&body)?;
    let acknowledged = relay.outbox.acknowledge(DomainId(domain), &ack.ids);
    if acknowledged > 0 {
        info!("🌐 relayer delivered {} message(s) to domain:{}", acknowledged, domain);
    }
    Ok(Json(json!({ "acknowledged": acknowledged })).into_response())
}

async fn deliver_inbound(State(s): State<AdminState>, uri: Uri, headers: HeaderMap, body: axum::body::Bytes) -> ApiResult {
    let identity = relay_auth(&s, &uri, &headers, &body)?.message_identity;
    let messages: Vec<InboundMessage> = parse(&body)?;
    let results = s.node.deliver_inbound(identity, messages).await?;
    let out: Vec<serde_json::Value> = results
        .into_iter()
        .map(|r| match r {
            Ok(receipt) => json!({ "ok": receipt }),
            Err(e) => json!({ "error": e.to_string(), "kind": e.kind() }),
        })
        .collect();
    Ok(Json(out).into_response())
}
