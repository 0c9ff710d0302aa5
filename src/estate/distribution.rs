//! Yield Distribution Engine.
//!
//! Turns deposited income into per-holder claimable balances.
//!
//! Flow per asset:
//!   deposit_income ──(management fee)──→ pending
//!   distribute     ──pending / TOTAL_SHARES──→ rate_per_share
//!                  ──rate × balance (snapshot)──→ claimable[holder]
//!   claim          ──claimable──→ payout
//!
//! Holder balances are read when the distribution runs and the owed amount is
//! credited right away, so shares changing hands afterwards neither move nor
//! duplicate yield that was already earned. A holder who sold out keeps their
//! credit and can still claim it. Escrow-held shares earn nothing; their
//! portion and the truncation remainder stay in the asset's reserve.
//!
//! The engine only reads the registry and the share ledger.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::access::{AccessControl, AccessError};
use super::fees;
use super::registry::{AssetRegistry, RegistryError};
use super::shares::ShareLedger;
use super::types::{AssetId, DISTRIBUTION_PERIOD_SECS, TOTAL_SHARES};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum YieldError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("{caller} is not the beneficiary of asset {asset}")]
    NotBeneficiary { caller: Address, asset: AssetId },

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("nothing to distribute for asset {0}")]
    NothingToDistribute(AssetId),

    #[error("nothing to claim for {holder} on asset {asset}")]
    NothingToClaim { holder: Address, asset: AssetId },

    #[error("no finance record for asset {0}")]
    NotOpened(AssetId),

    #[error("{0} would overflow")]
    Overflow(&'static str),
}

fn add_to(slot: &mut U256, amount: U256, what: &'static str) -> Result<(), YieldError> {
    *slot = slot.checked_add(amount).ok_or(YieldError::Overflow(what))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Deduct the 10% performance fee from each distribution before the
    /// per-share rate is computed. Off unless explicitly enabled.
    pub apply_performance_fee: bool,
    /// Minimum seconds between scheduled distributions.
    pub period_secs: u64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            apply_performance_fee: false,
            period_secs: DISTRIBUTION_PERIOD_SECS,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finances {
    pub total_income: U256,
    pub total_expenses: U256,
    /// Truncation dust and escrow-attributable yield kept by the protocol.
    pub reserve: U256,
    pub pending: U256,
    pub last_distribution: Option<u64>,
    pub auto_distribution: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldAccrual {
    /// Rate set by the most recent distribution.
    pub rate_per_share: U256,
    pub cumulative_per_share: U256,
    /// Sum over distributions of `rate / share_price`, in basis points.
    pub cumulative_roi_bps: U256,
    pub last_calculated: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub amount: U256,
    pub description: String,
    pub recorded_at: u64,
}

/// Append-only expense history. Kept apart from [`YieldBook`] so it is not
/// copied with the per-operation state.
#[derive(Debug, Default)]
pub struct ExpenseLog {
    by_asset: HashMap<AssetId, Vec<Expense>>,
}

impl ExpenseLog {
    pub fn list(&self, asset: AssetId) -> &[Expense] {
        self.by_asset.get(&asset).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record(&mut self, asset: AssetId, expense: Expense) {
        self.by_asset.entry(asset).or_default().push(expense);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositReceipt {
    pub asset: AssetId,
    pub gross: U256,
    pub management_fee: U256,
    pub net: U256,
    /// Set when auto-distribution ran inside the same operation.
    pub distribution: Option<DistributionReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    pub asset: AssetId,
    pub pending_before: U256,
    pub performance_fee: U256,
    pub rate_per_share: U256,
    pub credited: U256,
    pub retained: U256,
    pub holders_credited: usize,
    pub at: u64,
}

// ─────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct YieldBook {
    cfg: DistributionConfig,
    finances: HashMap<AssetId, Finances>,
    accruals: HashMap<AssetId, YieldAccrual>,
    claimable: HashMap<(AssetId, Address), U256>,
    lifetime_claimed: HashMap<(AssetId, Address), U256>,
    protocol_revenue: U256,
}

impl YieldBook {
    pub fn new(cfg: DistributionConfig) -> Self {
        Self {
            cfg,
            ..Default::default()
        }
    }

    /// Start tracking a freshly created asset with zeroed finances.
    pub fn open(&mut self, asset: AssetId) {
        self.finances.entry(asset).or_default();
        self.accruals.entry(asset).or_default();
    }

    // ── Views ──

    pub fn finances(&self, asset: AssetId) -> Option<&Finances> {
        self.finances.get(&asset)
    }

    pub fn accrual(&self, asset: AssetId) -> Option<&YieldAccrual> {
        self.accruals.get(&asset)
    }

    pub fn claimable_amount(&self, holder: &Address, asset: AssetId) -> U256 {
        self.claimable
            .get(&(asset, *holder))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn lifetime_claimed(&self, holder: &Address, asset: AssetId) -> U256 {
        self.lifetime_claimed
            .get(&(asset, *holder))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    /// Fees collected by the protocol (management, performance, purchase).
    pub fn protocol_revenue(&self) -> U256 {
        self.protocol_revenue
    }

    /// Auto-distribution on, something pending, and a full period since the
    /// previous distribution.
    pub fn is_due(&self, asset: AssetId, now: u64) -> bool {
        let Some(fin) = self.finances.get(&asset) else {
            return false;
        };
        fin.auto_distribution
            && !fin.pending.is_zero()
            && fin
                .last_distribution
                .map_or(true, |last| now.saturating_sub(last) >= self.cfg.period_secs)
    }

    pub fn due_assets(&self, now: u64) -> Vec<AssetId> {
        let mut due: Vec<_> = self
            .finances
            .keys()
            .copied()
            .filter(|a| self.is_due(*a, now))
            .collect();
        due.sort();
        due
    }

    fn finances_mut(&mut self, asset: AssetId) -> Result<&mut Finances, YieldError> {
        self.finances
            .get_mut(&asset)
            .ok_or(YieldError::NotOpened(asset))
    }

    fn require_beneficiary(
        registry: &AssetRegistry,
        caller: Address,
        asset: AssetId,
    ) -> Result<(), YieldError> {
        if registry.get(asset)?.beneficiary != caller {
            return Err(YieldError::NotBeneficiary { caller, asset });
        }
        Ok(())
    }

    pub(crate) fn credit_revenue(&mut self, amount: U256) -> Result<(), YieldError> {
        add_to(&mut self.protocol_revenue, amount, "protocol revenue")
    }

    // ── Operations ──

    #[allow(clippy::too_many_arguments)]
    pub fn deposit_income(
        &mut self,
        acl: &AccessControl,
        registry: &AssetRegistry,
        ledger: &ShareLedger,
        caller: Address,
        asset: AssetId,
        amount: U256,
        now: u64,
    ) -> Result<DepositReceipt, YieldError> {
        acl.require_not_paused()?;
        registry.active(asset)?;
        Self::require_beneficiary(registry, caller, asset)?;
        if amount.is_zero() {
            return Err(YieldError::ZeroAmount);
        }

        let (fee, net) = fees::split_income(amount);
        let fin = self.finances_mut(asset)?;
        add_to(&mut fin.total_income, amount, "total income")?;
        add_to(&mut fin.pending, net, "pending distribution")?;
        let auto = fin.auto_distribution;
        self.credit_revenue(fee)?;
        info!(
            "💰 asset {} income={} fee={} net={} auto={}",
            asset, amount, fee, net, auto
        );

        let distribution = if auto {
            Some(self.distribute(registry, ledger, asset, now)?)
        } else {
            None
        };

        Ok(DepositReceipt {
            asset,
            gross: amount,
            management_fee: fee,
            net,
            distribution,
        })
    }

    /// Convert the asset's pending income into a per-share rate and credit
    /// every non-escrow holder. Fails when nothing is pending.
    pub fn distribute(
        &mut self,
        registry: &AssetRegistry,
        ledger: &ShareLedger,
        asset: AssetId,
        now: u64,
    ) -> Result<DistributionReport, YieldError> {
        let share_price = registry.share_price(asset)?;
        let apply_performance_fee = self.cfg.apply_performance_fee;

        let pending = self.finances_mut(asset)?.pending;
        if pending.is_zero() {
            return Err(YieldError::NothingToDistribute(asset));
        }

        let performance_fee = if apply_performance_fee {
            fees::performance_fee(pending)
        } else {
            U256::ZERO
        };
        let distributable = pending - performance_fee;
        let rate = distributable / U256::from(TOTAL_SHARES);

        let mut credited = U256::ZERO;
        let mut holders_credited = 0usize;
        if !rate.is_zero() {
            for (holder, balance) in ledger.holders(asset) {
                if ledger.is_escrow(holder) {
                    continue;
                }
                // rate * balance <= rate * TOTAL_SHARES <= distributable
                let owed = rate * U256::from(balance);
                add_to(self.claimable.entry((asset, *holder)).or_default(), owed, "claimable yield")?;
                credited += owed;
                holders_credited += 1;
            }
        }
        // Holders never exceed TOTAL_SHARES, so credited <= rate * TOTAL_SHARES <= distributable.
        let retained = distributable - credited;

        let fin = self.finances_mut(asset)?;
        fin.pending = U256::ZERO;
        add_to(&mut fin.reserve, retained, "reserve")?;
        fin.last_distribution = Some(now);
        self.credit_revenue(performance_fee)?;

        let accrual = self.accruals.entry(asset).or_default();
        accrual.rate_per_share = rate;
        add_to(&mut accrual.cumulative_per_share, rate, "cumulative rate")?;
        if !share_price.is_zero() {
            // rate <= U256::MAX / TOTAL_SHARES, and TOTAL_SHARES == BPS_DENOMINATOR
            let roi = rate * U256::from(fees::BPS_DENOMINATOR) / share_price;
            add_to(&mut accrual.cumulative_roi_bps, roi, "cumulative roi")?;
        }
        accrual.last_calculated = Some(now);

        info!(
            "📤 asset {} distributed | pending={} perf_fee={} rate={} credited={} retained={} holders={}",
            asset, pending, performance_fee, rate, credited, retained, holders_credited
        );
        Ok(DistributionReport {
            asset,
            pending_before: pending,
            performance_fee,
            rate_per_share: rate,
            credited,
            retained,
            holders_credited,
            at: now,
        })
    }

    /// Effects half of a claim: zero the holder's balance and bump the lifetime
    /// counter. The caller performs the payout afterwards and discards these
    /// effects if it fails. Credit was fixed at distribution time, so the
    /// holder's current share balance plays no part.
    pub fn settle_claim(
        &mut self,
        acl: &AccessControl,
        holder: Address,
        asset: AssetId,
    ) -> Result<U256, YieldError> {
        acl.require_not_paused()?;
        let amount = self
            .claimable
            .remove(&(asset, holder))
            .filter(|a| !a.is_zero())
            .ok_or(YieldError::NothingToClaim { holder, asset })?;
        add_to(
            self.lifetime_claimed.entry((asset, holder)).or_default(),
            amount,
            "lifetime claimed",
        )?;
        debug!("🎁 settle claim {} on asset {} for {}", amount, asset, holder);
        Ok(amount)
    }

    /// Bumps the asset's expense total and returns the entry for the
    /// caller to append to the [`ExpenseLog`].
    #[allow(clippy::too_many_arguments)]
    pub fn record_expense(
        &mut self,
        acl: &AccessControl,
        registry: &AssetRegistry,
        caller: Address,
        asset: AssetId,
        amount: U256,
        description: String,
        now: u64,
    ) -> Result<Expense, YieldError> {
        acl.require_not_paused()?;
        Self::require_beneficiary(registry, caller, asset)?;
        if amount.is_zero() {
            return Err(YieldError::ZeroAmount);
        }
        add_to(&mut self.finances_mut(asset)?.total_expenses, amount, "total expenses")?;
        info!("🧮 asset {} expense {}", asset, amount);
        Ok(Expense {
            amount,
            description,
            recorded_at: now,
        })
    }

    /// Beneficiary, owner or manager.
    pub fn set_auto_distribution(
        &mut self,
        acl: &AccessControl,
        registry: &AssetRegistry,
        caller: Address,
        asset: AssetId,
        enabled: bool,
    ) -> Result<(), YieldError> {
        if registry.get(asset)?.beneficiary != caller {
            acl.require_manager(caller, "configure auto-distribution")?;
        }
        self.finances_mut(asset)?.auto_distribution = enabled;
        info!("⏱️ asset {} auto_distribution={}", asset, enabled);
        Ok(())
    }
}
