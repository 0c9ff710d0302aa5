//! Valuation Oracle Gateway.
//!
//! Issues valuation requests through a [`ValuationTransport`] and correlates
//! responses by id. Per request the lifecycle is `Issued → Fulfilled` or
//! `Issued → Failed`; both are terminal.
//!
//! Only the latest request per asset is authoritative. A response to an older
//! request is failed as superseded and never reaches the registry.
//!
//! Request records live in a [`RequestLog`] outside the gateway; the gateway
//! returns [`RequestChange`]s for the caller to apply once the operation
//! commits. The log keeps each asset's latest request plus any older one still
//! awaiting its response, so it stays bounded by the number of assets.

use std::collections::HashMap;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::access::{AccessControl, AccessError};
use super::registry::{AssetRegistry, RegistryError, ValuationChange};
use super::transport::{TransportError, ValuationTransport};
use super::types::{AssetId, CorrelationId, LocationDescriptors};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid oracle parameters: {0}")]
    InvalidParams(&'static str),
}

/// What the valuation source receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationQuery {
    pub asset_id: u64,
    pub location: LocationDescriptors,
    pub job_id: String,
    pub callback_gas_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleParams {
    pub job_id: String,
    pub callback_gas_limit: u32,
}

impl Default for OracleParams {
    fn default() -> Self {
        Self {
            job_id: "property-valuation".to_string(),
            callback_gas_limit: 300_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RequestStatus {
    Issued,
    Fulfilled,
    Failed(String),
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Issued)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValuationRequest {
    pub id: CorrelationId,
    pub asset: AssetId,
    pub issued_at: u64,
    pub status: RequestStatus,
}

/// Result of handling a single response. Expected failures are outcomes, not
/// errors: the callback itself always succeeds once authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Fulfilled(ValuationChange),
    Failed { asset: AssetId, reason: String },
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestChange {
    Issued(ValuationRequest),
    Resolved { id: CorrelationId, status: RequestStatus },
    Pruned(CorrelationId),
}

#[derive(Debug, Default)]
pub struct RequestLog {
    requests: HashMap<CorrelationId, ValuationRequest>,
}

impl RequestLog {
    pub fn get(&self, id: &CorrelationId) -> Option<&ValuationRequest> {
        self.requests.get(id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn apply(&mut self, change: RequestChange) {
        match change {
            RequestChange::Issued(req) => {
                self.requests.insert(req.id, req);
            }
            RequestChange::Resolved { id, status } => {
                if let Some(req) = self.requests.get_mut(&id) {
                    req.status = status;
                }
            }
            RequestChange::Pruned(id) => {
                self.requests.remove(&id);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValuationGateway {
    params: OracleParams,
    latest: HashMap<AssetId, CorrelationId>,
}

impl ValuationGateway {
    pub fn new(params: OracleParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn params(&self) -> &OracleParams {
        &self.params
    }

    /// The asset's authoritative request, if one was ever issued.
    pub fn latest(&self, asset: AssetId) -> Option<CorrelationId> {
        self.latest.get(&asset).copied()
    }

    pub fn set_params(
        &mut self,
        acl: &AccessControl,
        caller: Address,
        params: OracleParams,
    ) -> Result<(), OracleError> {
        acl.require_owner(caller, "set oracle parameters")?;
        if params.job_id.trim().is_empty() {
            return Err(OracleError::InvalidParams("job id must not be empty"));
        }
        if params.callback_gas_limit == 0 {
            return Err(OracleError::InvalidParams("callback gas limit must be positive"));
        }
        info!(
            "🔮 oracle params job={} gas_limit={}",
            params.job_id, params.callback_gas_limit
        );
        self.params = params;
        Ok(())
    }

    /// Build the query for `asset` and hand it to the transport. The returned
    /// id becomes the asset's authoritative request; a previous one that
    /// already resolved is pruned.
    #[allow(clippy::too_many_arguments)]
    pub fn request_valuation(
        &mut self,
        acl: &AccessControl,
        registry: &AssetRegistry,
        transport: &mut dyn ValuationTransport,
        log: &RequestLog,
        caller: Address,
        asset: AssetId,
        now: u64,
    ) -> Result<(CorrelationId, Vec<RequestChange>), OracleError> {
        acl.require_manager(caller, "request valuations")?;
        acl.require_not_paused()?;
        let record = registry.active(asset)?;

        let query = ValuationQuery {
            asset_id: asset.0,
            location: record.location.clone(),
            job_id: self.params.job_id.clone(),
            callback_gas_limit: self.params.callback_gas_limit,
        };
        let id = transport.send(&query)?;

        let mut changes = vec![RequestChange::Issued(ValuationRequest {
            id,
            asset,
            issued_at: now,
            status: RequestStatus::Issued,
        })];
        if let Some(previous) = self.latest.insert(asset, id) {
            debug!("🔮 asset {} request {} superseded by {}", asset, previous, id);
            if log.get(&previous).map_or(true, |r| r.status.is_terminal()) {
                changes.push(RequestChange::Pruned(previous));
            }
        }
        info!("🔮 valuation requested for asset {} | id={}", asset, id);
        Ok((id, changes))
    }

    /// Handle a transport callback. `error` carries the source's failure
    /// message, if any; otherwise `payload` must ABI-decode to a non-zero
    /// `uint256`.
    #[allow(clippy::too_many_arguments)]
    pub fn on_response(
        &self,
        acl: &AccessControl,
        registry: &mut AssetRegistry,
        log: &RequestLog,
        caller: Address,
        id: CorrelationId,
        payload: &Bytes,
        error: Option<&str>,
        now: u64,
    ) -> Result<(ResponseOutcome, Vec<RequestChange>), OracleError> {
        acl.require_oracle_transport(caller)?;

        let Some(request) = log.get(&id) else {
            warn!("🔮 response for unknown request {} ignored", id);
            return Ok((ResponseOutcome::Ignored, Vec::new()));
        };
        if request.status.is_terminal() {
            warn!("🔮 duplicate response for {} ignored ({:?})", id, request.status);
            return Ok((ResponseOutcome::Ignored, Vec::new()));
        }
        let asset = request.asset;

        if self.latest.get(&asset) != Some(&id) {
            let reason = "superseded by a newer request".to_string();
            warn!("🔮 request {} for asset {} failed: {}", id, asset, reason);
            return Ok((ResponseOutcome::Failed { asset, reason }, vec![RequestChange::Pruned(id)]));
        }

        let reason = if let Some(err) = error {
            format!("source error: {}", err)
        } else {
            match <U256 as SolValue>::abi_decode(payload) {
                Ok(v) if v.is_zero() => "valuation must be positive".to_string(),
                Ok(valuation) => match registry.apply_oracle_valuation(asset, valuation, now) {
                    Ok(change) => {
                        info!("🔮 request {} fulfilled for asset {}", id, asset);
                        let resolved = RequestChange::Resolved {
                            id,
                            status: RequestStatus::Fulfilled,
                        };
                        return Ok((ResponseOutcome::Fulfilled(change), vec![resolved]));
                    }
                    Err(e) => e.to_string(),
                },
                Err(e) => format!("malformed payload: {}", e),
            }
        };

        warn!("🔮 request {} for asset {} failed: {}", id, asset, reason);
        let resolved = RequestChange::Resolved {
            id,
            status: RequestStatus::Failed(reason.clone()),
        };
        Ok((ResponseOutcome::Failed { asset, reason }, vec![resolved]))
    }
}
