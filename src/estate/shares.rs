//! Share Ledger.
//!
//! Per-asset balance table keyed by (asset, holder). This is the single source
//! of truth for share ownership in one domain: every other component reads it,
//! and only mint / transfer / lock / unlock mutate it.
//!
//! Escrow accounts (public-sale inventory, bridge custody) are ordinary holders
//! from the ledger's point of view; the set is kept here so yield accounting
//! can tell protocol custody apart from real holders.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use alloy_primitives::Address;
use tracing::debug;

use super::types::{AssetId, TOTAL_SHARES};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("share amount must be greater than zero")]
    ZeroAmount,

    #[error("holder {holder} has {available} shares of asset {asset}, {requested} requested")]
    InsufficientBalance {
        asset: AssetId,
        holder: Address,
        available: u64,
        requested: u64,
    },

    #[error("minting {requested} shares of asset {asset} exceeds the fixed supply ({minted}/{cap})")]
    SupplyCapExceeded {
        asset: AssetId,
        minted: u64,
        requested: u64,
        cap: u64,
    },

    #[error("asset {asset}: holder balances sum to {held}, minted total is {minted}")]
    ConservationViolated { asset: AssetId, held: u64, minted: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct ShareLedger {
    balances: HashMap<AssetId, BTreeMap<Address, u64>>,
    minted: HashMap<AssetId, u64>,
    escrows: BTreeSet<Address>,
}

impl ShareLedger {
    pub fn new(escrows: impl IntoIterator<Item = Address>) -> Self {
        Self {
            escrows: escrows.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn is_escrow(&self, holder: &Address) -> bool {
        self.escrows.contains(holder)
    }

    pub fn balance_of(&self, asset: AssetId, holder: &Address) -> u64 {
        self.balances
            .get(&asset)
            .and_then(|m| m.get(holder))
            .copied()
            .unwrap_or(0)
    }

    /// Shares of `asset` minted in this domain.
    pub fn total_minted(&self, asset: AssetId) -> u64 {
        self.minted.get(&asset).copied().unwrap_or(0)
    }

    /// Non-zero holdings of `asset`, in address order.
    pub fn holders(&self, asset: AssetId) -> impl Iterator<Item = (&Address, u64)> + '_ {
        self.balances
            .get(&asset)
            .into_iter()
            .flat_map(|m| m.iter().map(|(a, b)| (a, *b)))
    }

    pub fn assets(&self) -> impl Iterator<Item = AssetId> + '_ {
        self.minted.keys().copied()
    }

    /// Mint new shares. Fails without touching state if the fixed supply
    /// would be exceeded.
    pub fn mint(&mut self, asset: AssetId, to: Address, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let minted = self.total_minted(asset);
        let next = minted
            .checked_add(amount)
            .filter(|n| *n <= TOTAL_SHARES)
            .ok_or(LedgerError::SupplyCapExceeded {
                asset,
                minted,
                requested: amount,
                cap: TOTAL_SHARES,
            })?;

        self.minted.insert(asset, next);
        *self.balances.entry(asset).or_default().entry(to).or_insert(0) += amount;
        debug!("🧾 mint {} x{} → {} (minted={})", asset, amount, to, next);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        asset: AssetId,
        from: Address,
        to: Address,
        amount: u64,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let available = self.balance_of(asset, &from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                asset,
                holder: from,
                available,
                requested: amount,
            });
        }
        if from == to {
            return Ok(());
        }

        let book = self.balances.entry(asset).or_default();
        let remaining = available - amount;
        if remaining == 0 {
            book.remove(&from);
        } else {
            book.insert(from, remaining);
        }
        *book.entry(to).or_insert(0) += amount;
        debug!("🧾 transfer {} x{} {} → {}", asset, amount, from, to);
        Ok(())
    }

    /// Sum of holder balances must equal the minted total for every asset.
    pub fn verify_conservation(&self) -> Result<(), LedgerError> {
        for (asset, minted) in &self.minted {
            let held: u64 = self.holders(*asset).map(|(_, b)| b).sum();
            if held != *minted {
                return Err(LedgerError::ConservationViolated {
                    asset: *asset,
                    held,
                    minted: *minted,
                });
            }
        }
        Ok(())
    }
}
