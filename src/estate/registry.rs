//! Asset Registry.
//!
//! Creates assets, stores valuation and metadata, authorizes valuation
//! updates. The registry writes to the Share Ledger only at creation (initial
//! allocation) and never calls into the yield engine.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::access::{AccessControl, AccessError};
use super::fees;
use super::shares::{LedgerError, ShareLedger};
use super::types::{
    AssetId, DomainId, LocationDescriptors, BENEFICIARY_SHARES, SALE_SHARES, TOTAL_SHARES,
    TREASURY_SHARES,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("asset {0} not found")]
    NotFound(AssetId),

    #[error("asset {0} is inactive")]
    Inactive(AssetId),

    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub location: LocationDescriptors,
    pub total_shares: u64,
    pub valuation: U256,
    pub valuation_updated_at: u64,
    /// Expected income per period, informational.
    pub periodic_income: U256,
    pub active: bool,
    pub beneficiary: Address,
    pub metadata_uri: String,
    pub created_at: u64,
}

/// Parameters of `create_asset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAsset {
    pub location: LocationDescriptors,
    pub initial_valuation: U256,
    pub periodic_income: U256,
    pub beneficiary: Address,
    pub metadata_uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValuationChange {
    pub asset: AssetId,
    pub old: U256,
    pub new: U256,
    pub at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurchaseQuote {
    pub shares: u64,
    pub price_per_share: U256,
    pub cost: U256,
    pub fee: U256,
}

impl PurchaseQuote {
    /// Cannot overflow: `quote_purchase` refuses quotes whose total would.
    pub fn total(&self) -> U256 {
        self.cost + self.fee
    }
}

#[derive(Debug, Clone)]
pub struct AssetRegistry {
    domain: DomainId,
    assets: BTreeMap<AssetId, Asset>,
    next_index: u32,
    treasury: Address,
    sale_escrow: Address,
}

impl AssetRegistry {
    /// Ids are issued as `AssetId::new(domain, 1..)`.
    pub fn new(domain: DomainId, treasury: Address, sale_escrow: Address) -> Self {
        Self {
            domain,
            assets: BTreeMap::new(),
            next_index: 1,
            treasury,
            sale_escrow,
        }
    }

    pub fn treasury(&self) -> Address {
        self.treasury
    }

    pub fn sale_escrow(&self) -> Address {
        self.sale_escrow
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn get(&self, id: AssetId) -> Result<&Asset, RegistryError> {
        self.assets.get(&id).ok_or(RegistryError::NotFound(id))
    }

    /// Like `get`, but the asset must also be active.
    pub fn active(&self, id: AssetId) -> Result<&Asset, RegistryError> {
        let asset = self.get(id)?;
        if !asset.active {
            return Err(RegistryError::Inactive(id));
        }
        Ok(asset)
    }

    fn get_mut(&mut self, id: AssetId) -> Result<&mut Asset, RegistryError> {
        self.assets.get_mut(&id).ok_or(RegistryError::NotFound(id))
    }

    /// Register an asset and mint its fixed share supply:
    /// 10% beneficiary, 3% treasury, 87% sale escrow.
    pub fn create_asset(
        &mut self,
        acl: &AccessControl,
        ledger: &mut ShareLedger,
        caller: Address,
        params: NewAsset,
        now: u64,
    ) -> Result<AssetId, RegistryError> {
        acl.require_manager(caller, "create assets")?;
        acl.require_not_paused()?;
        if params.initial_valuation.is_zero() {
            return Err(RegistryError::InvalidValue("initial valuation must be positive"));
        }
        if params.beneficiary == Address::ZERO {
            return Err(RegistryError::InvalidValue("beneficiary must be set"));
        }
        if params.location.is_empty() {
            return Err(RegistryError::InvalidValue("location must name a country, city or address"));
        }
        let next_index = self
            .next_index
            .checked_add(1)
            .ok_or(RegistryError::InvalidValue("asset id space exhausted"))?;

        let id = AssetId::new(self.domain, self.next_index);
        ledger.mint(id, params.beneficiary, BENEFICIARY_SHARES)?;
        ledger.mint(id, self.treasury, TREASURY_SHARES)?;
        ledger.mint(id, self.sale_escrow, SALE_SHARES)?;

        self.next_index = next_index;
        self.assets.insert(
            id,
            Asset {
                id,
                location: params.location,
                total_shares: TOTAL_SHARES,
                valuation: params.initial_valuation,
                valuation_updated_at: now,
                periodic_income: params.periodic_income,
                active: true,
                beneficiary: params.beneficiary,
                metadata_uri: params.metadata_uri,
                created_at: now,
            },
        );
        info!(
            "🏠 asset {} created | valuation={} beneficiary={}",
            id, params.initial_valuation, params.beneficiary
        );
        Ok(id)
    }

    /// Manual valuation update by an owner or manager.
    pub fn update_valuation(
        &mut self,
        acl: &AccessControl,
        caller: Address,
        id: AssetId,
        valuation: U256,
        now: u64,
    ) -> Result<ValuationChange, RegistryError> {
        acl.require_manager(caller, "update valuations")?;
        self.set_valuation(id, valuation, now)
    }

    /// Valuation update from a fulfilled oracle request. The gateway has
    /// already authenticated the callback.
    pub(crate) fn apply_oracle_valuation(
        &mut self,
        id: AssetId,
        valuation: U256,
        now: u64,
    ) -> Result<ValuationChange, RegistryError> {
        self.set_valuation(id, valuation, now)
    }

    fn set_valuation(
        &mut self,
        id: AssetId,
        valuation: U256,
        now: u64,
    ) -> Result<ValuationChange, RegistryError> {
        if valuation.is_zero() {
            return Err(RegistryError::InvalidValue("valuation must be positive"));
        }
        let asset = self.get_mut(id)?;
        if !asset.active {
            return Err(RegistryError::Inactive(id));
        }
        let old = asset.valuation;
        asset.valuation = valuation;
        asset.valuation_updated_at = now;
        info!("📈 asset {} valuation {} → {}", id, old, valuation);
        Ok(ValuationChange {
            asset: id,
            old,
            new: valuation,
            at: now,
        })
    }

    /// `valuation / TOTAL_SHARES`, truncated.
    pub fn share_price(&self, id: AssetId) -> Result<U256, RegistryError> {
        let asset = self.get(id)?;
        Ok(asset.valuation / U256::from(asset.total_shares))
    }

    pub fn quote_purchase(&self, id: AssetId, shares: u64) -> Result<PurchaseQuote, RegistryError> {
        if shares == 0 {
            return Err(RegistryError::InvalidValue("share amount must be positive"));
        }
        self.active(id)?;
        let price_per_share = self.share_price(id)?;
        let cost = price_per_share
            .checked_mul(U256::from(shares))
            .ok_or(RegistryError::InvalidValue("purchase cost overflows"))?;
        let fee = fees::purchase_fee(cost);
        if cost.checked_add(fee).is_none() {
            return Err(RegistryError::InvalidValue("purchase total overflows"));
        }
        Ok(PurchaseQuote {
            shares,
            price_per_share,
            cost,
            fee,
        })
    }

    pub fn set_active(
        &mut self,
        acl: &AccessControl,
        caller: Address,
        id: AssetId,
        active: bool,
    ) -> Result<(), RegistryError> {
        acl.require_manager(caller, "change asset status")?;
        self.get_mut(id)?.active = active;
        info!("🏠 asset {} active={}", id, active);
        Ok(())
    }

    pub fn set_metadata(
        &mut self,
        acl: &AccessControl,
        caller: Address,
        id: AssetId,
        metadata_uri: String,
    ) -> Result<(), RegistryError> {
        acl.require_manager(caller, "change asset metadata")?;
        self.get_mut(id)?.metadata_uri = metadata_uri;
        Ok(())
    }
}
