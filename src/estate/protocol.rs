//! Protocol façade.
//!
//! Composes the components of one domain and runs every public operation as a
//! single atomic transition:
//!
//!   clone state ──→ run op on the staged copy ──→ external calls last
//!        │                                               │
//!        └─── any Err: staged copy dropped     Ok: conservation check, commit
//!
//! Events raised while the op runs live on the staged copy, so only committed
//! operations ever publish anything. History records (valuation requests,
//! transfers, expenses) are staged the same way and appended to the
//! [`History`] journals on commit; the journals themselves are never cloned.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::access::AccessControl;
use super::bridge::{
    CrossDomainTransfer, InboundReceipt, TransferCoordinator, TransferLog, TransferReceipt, TransferRequest,
};
use super::clock::Clock;
use super::distribution::{
    DepositReceipt, DistributionConfig, DistributionReport, Expense, ExpenseLog, Finances, YieldAccrual,
    YieldBook,
};
use super::error::ProtocolError;
use super::messages::ProtocolEvent;
use super::oracle::{OracleParams, RequestChange, RequestLog, ResponseOutcome, ValuationGateway, ValuationRequest};
use super::registry::{Asset, AssetRegistry, NewAsset, PurchaseQuote, RegistryError, ValuationChange};
use super::shares::ShareLedger;
use super::transport::{InboundMessage, MessageTransport, PayoutSink, ValuationTransport};
use super::types::{AssetId, CorrelationId, DomainId, MessageId};

// ─────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub local_domain: DomainId,
    pub owner: Address,
    /// Receives the 3% platform allocation of every new asset.
    pub treasury: Address,
    /// Holds the 87% public-sale allocation.
    pub sale_escrow: Address,
    /// Custody for shares locked by outbound transfers.
    pub bridge_escrow: Address,
    /// Identity allowed to deliver valuation responses.
    pub oracle_transport: Address,
    /// Identity allowed to deliver cross-domain messages.
    pub message_transport: Address,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub oracle: OracleParams,
}

// ─────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseReceipt {
    pub asset: AssetId,
    pub quote: PurchaseQuote,
    pub refund: U256,
}

/// Read-only summary of one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetReport {
    pub asset: Asset,
    pub share_price: U256,
    pub minted: u64,
    pub locked: u64,
    pub in_sale: u64,
    pub finances: Finances,
    pub accrual: YieldAccrual,
    /// Cumulative distributed yield as a percentage of the current share price.
    pub roi_percent: Decimal,
    /// The asset's authoritative valuation request, if any.
    pub latest_valuation: Option<ValuationRequest>,
}

// ─────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Record {
    Request(RequestChange),
    Transfer(CrossDomainTransfer),
    Expense(AssetId, Expense),
}

/// Append-only journals, written only with records of committed operations.
#[derive(Debug, Default)]
struct History {
    requests: RequestLog,
    transfers: TransferLog,
    expenses: ExpenseLog,
}

impl History {
    fn apply(&mut self, record: Record) {
        match record {
            Record::Request(change) => self.requests.apply(change),
            Record::Transfer(transfer) => self.transfers.record(transfer),
            Record::Expense(asset, expense) => self.expenses.record(asset, expense),
        }
    }
}

#[derive(Debug, Clone)]
struct State {
    acl: AccessControl,
    ledger: ShareLedger,
    registry: AssetRegistry,
    yields: YieldBook,
    oracle: ValuationGateway,
    bridge: TransferCoordinator,
    refunds: BTreeMap<Address, U256>,
    events: Vec<ProtocolEvent>,
    records: Vec<Record>,
}

impl State {
    fn emit(&mut self, event: ProtocolEvent) {
        self.events.push(event);
    }

    fn journal(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Push an overpayment back; book a withdrawable credit if that fails.
    fn refund(&mut self, payouts: &mut dyn PayoutSink, to: Address, amount: U256) -> Result<(), ProtocolError> {
        if amount.is_zero() {
            return Ok(());
        }
        if let Err(e) = payouts.pay(to, amount) {
            warn!("💸 refund of {} to {} failed ({}), credited instead", amount, to, e);
            let credit = self.refunds.entry(to).or_default();
            *credit = credit
                .checked_add(amount)
                .ok_or(ProtocolError::Overflow("refund credit"))?;
            self.emit(ProtocolEvent::RefundCredited { to, amount });
        }
        Ok(())
    }
}

struct Externals<'a> {
    valuation: &'a mut dyn ValuationTransport,
    messages: &'a mut dyn MessageTransport,
    payouts: &'a mut dyn PayoutSink,
    history: &'a History,
}

// ─────────────────────────────────────────────────────────
// Protocol
// ─────────────────────────────────────────────────────────

pub struct Protocol {
    state: State,
    history: History,
    committed: Vec<ProtocolEvent>,
    valuation: Box<dyn ValuationTransport>,
    messages: Box<dyn MessageTransport>,
    payouts: Box<dyn PayoutSink>,
    clock: Arc<dyn Clock>,
}

impl Protocol {
    pub fn new(
        cfg: ProtocolConfig,
        valuation: Box<dyn ValuationTransport>,
        messages: Box<dyn MessageTransport>,
        payouts: Box<dyn PayoutSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            "🏛️ protocol up | {} owner={} escrows(sale={}, bridge={})",
            cfg.local_domain, cfg.owner, cfg.sale_escrow, cfg.bridge_escrow
        );
        Self {
            state: State {
                acl: AccessControl::new(cfg.owner, cfg.oracle_transport, cfg.message_transport),
                ledger: ShareLedger::new([cfg.sale_escrow, cfg.bridge_escrow]),
                registry: AssetRegistry::new(cfg.local_domain, cfg.treasury, cfg.sale_escrow),
                yields: YieldBook::new(cfg.distribution),
                oracle: ValuationGateway::new(cfg.oracle),
                bridge: TransferCoordinator::new(cfg.local_domain, cfg.bridge_escrow),
                refunds: BTreeMap::new(),
                events: Vec::new(),
                records: Vec::new(),
            },
            history: History::default(),
            committed: Vec::new(),
            valuation,
            messages,
            payouts,
            clock,
        }
    }

    fn transact<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut State, &mut Externals<'_>, u64) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        let now = self.clock.now();
        let mut staged = self.state.clone();
        let mut ext = Externals {
            valuation: self.valuation.as_mut(),
            messages: self.messages.as_mut(),
            payouts: self.payouts.as_mut(),
            history: &self.history,
        };

        let result = f(&mut staged, &mut ext, now).and_then(|out| {
            staged
                .ledger
                .verify_conservation()
                .map_err(|e| ProtocolError::Invariant(e.to_string()))?;
            Ok(out)
        });

        match result {
            Ok(out) => {
                self.committed.append(&mut staged.events);
                for record in staged.records.drain(..) {
                    self.history.apply(record);
                }
                self.state = staged;
                debug!("✅ {} committed", op);
                Ok(out)
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("🛑 {} aborted: {}", op, e);
                Err(e)
            }
            Err(e) => {
                warn!("❌ {} rejected: {}", op, e);
                Err(e)
            }
        }
    }

    /// Events of committed operations since the last drain.
    pub fn drain_events(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.committed)
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    // ── Administration ──

    pub fn set_paused(&mut self, caller: Address, paused: bool) -> Result<(), ProtocolError> {
        self.transact("set_paused", |s, _, _| {
            s.acl.set_paused(caller, paused)?;
            s.emit(ProtocolEvent::PauseChanged { paused });
            Ok(())
        })
    }

    pub fn set_manager(
        &mut self,
        caller: Address,
        manager: Address,
        authorized: bool,
    ) -> Result<(), ProtocolError> {
        self.transact("set_manager", |s, _, _| {
            s.acl.set_manager(caller, manager, authorized)?;
            s.emit(ProtocolEvent::ManagerChanged { manager, authorized });
            Ok(())
        })
    }

    pub fn set_oracle_params(&mut self, caller: Address, params: OracleParams) -> Result<(), ProtocolError> {
        self.transact("set_oracle_params", |s, _, _| {
            s.oracle.set_params(&s.acl, caller, params)?;
            Ok(())
        })
    }

    pub fn set_trusted_remote(
        &mut self,
        caller: Address,
        domain: DomainId,
        remote: Address,
    ) -> Result<(), ProtocolError> {
        self.transact("set_trusted_remote", |s, _, _| {
            s.bridge.set_trusted_remote(&s.acl, caller, domain, remote)?;
            s.emit(ProtocolEvent::TrustedRemoteChanged {
                domain,
                remote: Some(remote),
            });
            Ok(())
        })
    }

    pub fn remove_trusted_remote(&mut self, caller: Address, domain: DomainId) -> Result<(), ProtocolError> {
        self.transact("remove_trusted_remote", |s, _, _| {
            s.bridge.remove_trusted_remote(&s.acl, caller, domain)?;
            s.emit(ProtocolEvent::TrustedRemoteChanged { domain, remote: None });
            Ok(())
        })
    }

    // ── Asset registry ──

    pub fn create_asset(&mut self, caller: Address, params: NewAsset) -> Result<AssetId, ProtocolError> {
        self.transact("create_asset", |s, _, now| {
            let beneficiary = params.beneficiary;
            let valuation = params.initial_valuation;
            let asset = s.registry.create_asset(&s.acl, &mut s.ledger, caller, params, now)?;
            s.yields.open(asset);
            s.emit(ProtocolEvent::AssetCreated {
                asset,
                beneficiary,
                valuation,
            });
            Ok(asset)
        })
    }

    pub fn update_valuation(
        &mut self,
        caller: Address,
        asset: AssetId,
        valuation: U256,
    ) -> Result<ValuationChange, ProtocolError> {
        self.transact("update_valuation", |s, _, now| {
            let change = s.registry.update_valuation(&s.acl, caller, asset, valuation, now)?;
            s.emit(ProtocolEvent::ValuationUpdated {
                asset,
                old: change.old,
                new: change.new,
            });
            Ok(change)
        })
    }

    pub fn set_asset_active(&mut self, caller: Address, asset: AssetId, active: bool) -> Result<(), ProtocolError> {
        self.transact("set_asset_active", |s, _, _| {
            s.registry.set_active(&s.acl, caller, asset, active)?;
            s.emit(ProtocolEvent::AssetStatusChanged { asset, active });
            Ok(())
        })
    }

    pub fn set_metadata(&mut self, caller: Address, asset: AssetId, metadata_uri: String) -> Result<(), ProtocolError> {
        self.transact("set_metadata", |s, _, _| {
            s.registry.set_metadata(&s.acl, caller, asset, metadata_uri)?;
            Ok(())
        })
    }

    /// Primary sale out of the sale escrow. `payment` must cover cost plus
    /// the purchase fee; the cost goes to the beneficiary and any excess is
    /// refunded.
    pub fn purchase_shares(
        &mut self,
        caller: Address,
        asset: AssetId,
        amount: u64,
        payment: U256,
    ) -> Result<PurchaseReceipt, ProtocolError> {
        self.transact("purchase_shares", |s, ext, _| {
            s.acl.require_not_paused()?;
            let quote = s.registry.quote_purchase(asset, amount)?;
            let escrow = s.registry.sale_escrow();
            let available = s.ledger.balance_of(asset, &escrow);
            if available < amount {
                return Err(ProtocolError::SoldOut {
                    asset,
                    available,
                    requested: amount,
                });
            }
            let total = quote.total();
            if payment < total {
                return Err(ProtocolError::InsufficientPayment {
                    required: total,
                    paid: payment,
                });
            }
            let beneficiary = s.registry.get(asset)?.beneficiary;

            s.ledger.transfer(asset, escrow, caller, amount)?;
            s.yields.credit_revenue(quote.fee)?;
            s.emit(ProtocolEvent::SharesPurchased {
                asset,
                buyer: caller,
                amount,
                cost: quote.cost,
                fee: quote.fee,
            });

            if !quote.cost.is_zero() {
                ext.payouts.pay(beneficiary, quote.cost)?;
            }
            let refund = payment - total;
            s.refund(&mut *ext.payouts, caller, refund)?;
            info!(
                "🛒 asset {} x{} sold to {} | cost={} fee={} refund={}",
                asset, amount, caller, quote.cost, quote.fee, refund
            );
            Ok(PurchaseReceipt { asset, quote, refund })
        })
    }

    /// Holder-to-holder transfer on the local ledger.
    pub fn transfer_shares(
        &mut self,
        caller: Address,
        asset: AssetId,
        to: Address,
        amount: u64,
    ) -> Result<(), ProtocolError> {
        self.transact("transfer_shares", |s, _, _| {
            s.acl.require_not_paused()?;
            if to == Address::ZERO {
                return Err(RegistryError::InvalidValue("recipient must be set").into());
            }
            s.ledger.transfer(asset, caller, to, amount)?;
            s.emit(ProtocolEvent::SharesTransferred {
                asset,
                from: caller,
                to,
                amount,
            });
            Ok(())
        })
    }

    // ── Yield ──

    pub fn deposit_income(
        &mut self,
        caller: Address,
        asset: AssetId,
        amount: U256,
    ) -> Result<DepositReceipt, ProtocolError> {
        self.transact("deposit_income", |s, _, now| {
            let receipt = s
                .yields
                .deposit_income(&s.acl, &s.registry, &s.ledger, caller, asset, amount, now)?;
            s.emit(ProtocolEvent::IncomeDeposited {
                asset,
                amount,
                management_fee: receipt.management_fee,
                net: receipt.net,
            });
            if let Some(report) = &receipt.distribution {
                s.emit(distributed_event(report));
            }
            Ok(receipt)
        })
    }

    /// Permissionless; also driven by the scheduler.
    pub fn distribute(&mut self, asset: AssetId) -> Result<DistributionReport, ProtocolError> {
        self.transact("distribute", |s, _, now| {
            s.acl.require_not_paused()?;
            let report = s.yields.distribute(&s.registry, &s.ledger, asset, now)?;
            s.emit(distributed_event(&report));
            Ok(report)
        })
    }

    /// Pay out the caller's claimable yield, whether or not they still hold
    /// shares. A failed payout rolls the claim back.
    pub fn claim(&mut self, caller: Address, asset: AssetId) -> Result<U256, ProtocolError> {
        self.transact("claim", |s, ext, _| {
            let amount = s.yields.settle_claim(&s.acl, caller, asset)?;
            s.emit(ProtocolEvent::YieldClaimed {
                asset,
                holder: caller,
                amount,
            });
            ext.payouts.pay(caller, amount)?;
            info!("🎁 {} claimed {} on asset {}", caller, amount, asset);
            Ok(amount)
        })
    }

    pub fn record_expense(
        &mut self,
        caller: Address,
        asset: AssetId,
        amount: U256,
        description: String,
    ) -> Result<(), ProtocolError> {
        self.transact("record_expense", |s, _, now| {
            let expense = s
                .yields
                .record_expense(&s.acl, &s.registry, caller, asset, amount, description.clone(), now)?;
            s.journal(Record::Expense(asset, expense));
            s.emit(ProtocolEvent::ExpenseRecorded {
                asset,
                amount,
                description,
            });
            Ok(())
        })
    }

    pub fn set_auto_distribution(
        &mut self,
        caller: Address,
        asset: AssetId,
        enabled: bool,
    ) -> Result<(), ProtocolError> {
        self.transact("set_auto_distribution", |s, _, _| {
            s.yields
                .set_auto_distribution(&s.acl, &s.registry, caller, asset, enabled)?;
            Ok(())
        })
    }

    pub fn due_assets(&self) -> Vec<AssetId> {
        self.state.yields.due_assets(self.clock.now())
    }

    /// Distribute every due asset, each as its own atomic operation.
    pub fn distribute_due(&mut self) -> Vec<(AssetId, Result<DistributionReport, ProtocolError>)> {
        self.due_assets()
            .into_iter()
            .map(|asset| (asset, self.distribute(asset)))
            .collect()
    }

    // ── Valuation oracle ──

    pub fn request_valuation(&mut self, caller: Address, asset: AssetId) -> Result<CorrelationId, ProtocolError> {
        self.transact("request_valuation", |s, ext, now| {
            let (id, changes) = s.oracle.request_valuation(
                &s.acl,
                &s.registry,
                &mut *ext.valuation,
                &ext.history.requests,
                caller,
                asset,
                now,
            )?;
            changes.into_iter().for_each(|c| s.journal(Record::Request(c)));
            s.emit(ProtocolEvent::ValuationRequested { asset, request_id: id });
            Ok(id)
        })
    }

    pub fn on_valuation_response(
        &mut self,
        caller: Address,
        id: CorrelationId,
        payload: Bytes,
        error: Option<String>,
    ) -> Result<ResponseOutcome, ProtocolError> {
        self.transact("on_valuation_response", |s, ext, now| {
            let (outcome, changes) = s.oracle.on_response(
                &s.acl,
                &mut s.registry,
                &ext.history.requests,
                caller,
                id,
                &payload,
                error.as_deref(),
                now,
            )?;
            changes.into_iter().for_each(|c| s.journal(Record::Request(c)));
            match &outcome {
                ResponseOutcome::Fulfilled(change) => s.emit(ProtocolEvent::ValuationUpdated {
                    asset: change.asset,
                    old: change.old,
                    new: change.new,
                }),
                ResponseOutcome::Failed { asset, reason } => s.emit(ProtocolEvent::ValuationFailed {
                    asset: *asset,
                    request_id: id,
                    reason: reason.clone(),
                }),
                ResponseOutcome::Ignored => {}
            }
            Ok(outcome)
        })
    }

    // ── Cross-domain ──

    pub fn initiate_transfer(
        &mut self,
        caller: Address,
        req: TransferRequest,
    ) -> Result<TransferReceipt, ProtocolError> {
        self.transact("initiate_transfer", |s, ext, now| {
            let (asset, recipient, amount, destination) = (req.asset, req.recipient, req.amount, req.destination);
            let (receipt, record) = s
                .bridge
                .initiate(&s.acl, &mut s.ledger, &mut *ext.messages, caller, req, now)?;
            s.journal(Record::Transfer(record));
            s.emit(ProtocolEvent::TransferInitiated {
                message_id: receipt.message_id,
                asset,
                sender: caller,
                recipient,
                amount,
                destination,
                sequence: receipt.sequence,
            });
            s.refund(&mut *ext.payouts, caller, receipt.refund)?;
            Ok(receipt)
        })
    }

    pub fn on_inbound_message(
        &mut self,
        caller: Address,
        msg: InboundMessage,
    ) -> Result<InboundReceipt, ProtocolError> {
        self.transact("on_inbound_message", |s, ext, now| {
            let (receipt, record) =
                s.bridge
                    .on_inbound(&s.acl, &mut s.ledger, &ext.history.transfers, caller, &msg, now)?;
            s.journal(Record::Transfer(record));
            s.emit(ProtocolEvent::TransferCompleted {
                message_id: receipt.message_id,
                asset: receipt.asset,
                recipient: receipt.recipient,
                amount: receipt.unlocked + receipt.minted,
                source: msg.source_domain,
            });
            Ok(receipt)
        })
    }

    // ── Refunds ──

    pub fn withdraw_refund(&mut self, caller: Address) -> Result<U256, ProtocolError> {
        self.transact("withdraw_refund", |s, ext, _| {
            let amount = s
                .refunds
                .remove(&caller)
                .filter(|a| !a.is_zero())
                .ok_or(ProtocolError::NothingToRefund(caller))?;
            s.emit(ProtocolEvent::RefundWithdrawn { to: caller, amount });
            ext.payouts.pay(caller, amount)?;
            Ok(amount)
        })
    }

    // ── Views ──

    pub fn local_domain(&self) -> DomainId {
        self.state.bridge.local_domain()
    }

    pub fn is_paused(&self) -> bool {
        self.state.acl.is_paused()
    }

    pub fn is_manager(&self, who: &Address) -> bool {
        self.state.acl.is_manager(who)
    }

    pub fn asset(&self, asset: AssetId) -> Result<Asset, ProtocolError> {
        Ok(self.state.registry.get(asset)?.clone())
    }

    pub fn assets(&self) -> Vec<Asset> {
        self.state.registry.assets().cloned().collect()
    }

    pub fn asset_count(&self) -> usize {
        self.state.registry.assets().count()
    }

    pub fn share_price(&self, asset: AssetId) -> Result<U256, ProtocolError> {
        Ok(self.state.registry.share_price(asset)?)
    }

    pub fn quote_purchase(&self, asset: AssetId, amount: u64) -> Result<PurchaseQuote, ProtocolError> {
        Ok(self.state.registry.quote_purchase(asset, amount)?)
    }

    pub fn balance_of(&self, asset: AssetId, holder: &Address) -> u64 {
        self.state.ledger.balance_of(asset, holder)
    }

    pub fn total_minted(&self, asset: AssetId) -> u64 {
        self.state.ledger.total_minted(asset)
    }

    pub fn claimable_amount(&self, holder: &Address, asset: AssetId) -> U256 {
        self.state.yields.claimable_amount(holder, asset)
    }

    pub fn lifetime_claimed(&self, holder: &Address, asset: AssetId) -> U256 {
        self.state.yields.lifetime_claimed(holder, asset)
    }

    pub fn finances(&self, asset: AssetId) -> Option<Finances> {
        self.state.yields.finances(asset).cloned()
    }

    pub fn accrual(&self, asset: AssetId) -> Option<YieldAccrual> {
        self.state.yields.accrual(asset).cloned()
    }

    pub fn protocol_revenue(&self) -> U256 {
        self.state.yields.protocol_revenue()
    }

    pub fn refund_credit(&self, who: &Address) -> U256 {
        self.state.refunds.get(who).copied().unwrap_or(U256::ZERO)
    }

    pub fn locked_supply(&self, asset: AssetId) -> u64 {
        self.state.bridge.locked_supply(&self.state.ledger, asset)
    }

    pub fn transfer(&self, id: &MessageId) -> Result<CrossDomainTransfer, ProtocolError> {
        Ok(self.history.transfers.get(id)?.clone())
    }

    pub fn trusted_remotes(&self) -> BTreeMap<DomainId, Address> {
        self.state.bridge.trusted_remotes().clone()
    }

    pub fn valuation_request(&self, id: &CorrelationId) -> Option<ValuationRequest> {
        self.history.requests.get(id).cloned()
    }

    pub fn expenses(&self, asset: AssetId) -> Vec<Expense> {
        self.history.expenses.list(asset).to_vec()
    }

    pub fn asset_report(&self, id: AssetId) -> Result<AssetReport, ProtocolError> {
        let asset = self.state.registry.get(id)?.clone();
        let share_price = self.state.registry.share_price(id)?;
        let accrual = self.state.yields.accrual(id).cloned().unwrap_or_default();
        let roi_bps = u64::try_from(accrual.cumulative_roi_bps)
            .ok()
            .and_then(|v| i64::try_from(v).ok())
            .unwrap_or(i64::MAX);
        Ok(AssetReport {
            share_price,
            minted: self.state.ledger.total_minted(id),
            locked: self.locked_supply(id),
            in_sale: self.state.ledger.balance_of(id, &self.state.registry.sale_escrow()),
            finances: self.state.yields.finances(id).cloned().unwrap_or_default(),
            accrual,
            roi_percent: Decimal::new(roi_bps, 2),
            latest_valuation: self
                .state
                .oracle
                .latest(id)
                .and_then(|req| self.valuation_request(&req)),
            asset,
        })
    }
}

fn distributed_event(report: &DistributionReport) -> ProtocolEvent {
    ProtocolEvent::YieldDistributed {
        asset: report.asset,
        rate_per_share: report.rate_per_share,
        credited: report.credited,
        retained: report.retained,
        performance_fee: report.performance_fee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estate::bridge::BridgeError;
    use crate::estate::clock::ManualClock;
    use crate::estate::distribution::YieldError;
    use crate::estate::error::ErrorKind;
    use crate::estate::oracle::RequestStatus;
    use crate::estate::transport::{
        LoopbackConfig, LoopbackMessageTransport, PayoutLedger, RecordingValuationTransport,
    };
    use crate::estate::types::{LocationDescriptors, DISTRIBUTION_PERIOD_SECS, TOTAL_SHARES};
    use alloy_sol_types::SolValue;
    use rust_decimal_macros::dec;

    const OWNER: Address = Address::repeat_byte(0x01);
    const BENEFICIARY: Address = Address::repeat_byte(0x02);
    const TREASURY: Address = Address::repeat_byte(0x03);
    const SALE: Address = Address::repeat_byte(0x04);
    const ALICE: Address = Address::repeat_byte(0x05);
    const BOB: Address = Address::repeat_byte(0x06);
    const BRIDGE: Address = Address::repeat_byte(0x07);
    const ORACLE: Address = Address::repeat_byte(0xaa);
    const RELAYER: Address = Address::repeat_byte(0xbb);

    struct Harness {
        protocol: Protocol,
        clock: ManualClock,
        oracle: RecordingValuationTransport,
        wire: LoopbackMessageTransport,
        payouts: PayoutLedger,
    }

    fn sender_of(domain: u32) -> Address {
        Address::repeat_byte(0x40 + domain as u8)
    }

    fn harness_for(domain: u32, peer: u32) -> Harness {
        let clock = ManualClock::new(1_700_000_000);
        let oracle = RecordingValuationTransport::new();
        let wire = LoopbackMessageTransport::new(LoopbackConfig {
            local_domain: DomainId(domain),
            local_sender: sender_of(domain),
            base_fee: U256::from(1_000u64),
            fee_per_byte: U256::ZERO,
            destinations: [DomainId(peer)].into_iter().collect(),
        });
        let payouts = PayoutLedger::new();
        let protocol = Protocol::new(
            ProtocolConfig {
                local_domain: DomainId(domain),
                owner: OWNER,
                treasury: TREASURY,
                sale_escrow: SALE,
                bridge_escrow: BRIDGE,
                oracle_transport: ORACLE,
                message_transport: RELAYER,
                distribution: DistributionConfig::default(),
                oracle: OracleParams::default(),
            },
            Box::new(oracle.clone()),
            Box::new(wire.clone()),
            Box::new(payouts.clone()),
            Arc::new(clock.clone()),
        );
        Harness {
            protocol,
            clock,
            oracle,
            wire,
            payouts,
        }
    }

    fn harness() -> Harness {
        harness_for(1, 2)
    }

    fn new_asset(valuation: u64) -> NewAsset {
        NewAsset {
            location: LocationDescriptors {
                country: "FR".into(),
                city: "Lyon".into(),
                address_line: "1 Place Bellecour".into(),
                coordinates: "45.757,4.832".into(),
            },
            initial_valuation: U256::from(valuation),
            periodic_income: U256::from(10_000u64),
            beneficiary: BENEFICIARY,
            metadata_uri: "ipfs://lyon".into(),
        }
    }

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn test_reference_yield_example() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        assert_eq!(h.protocol.share_price(asset).unwrap(), u(100));

        let r = h.protocol.deposit_income(BENEFICIARY, asset, u(10_000)).unwrap();
        assert_eq!((r.management_fee, r.net), (u(100), u(9_900)));
        let d = h.protocol.distribute(asset).unwrap();
        assert_eq!(d.rate_per_share, U256::ZERO);

        let r = h.protocol.deposit_income(BENEFICIARY, asset, u(1_000_000)).unwrap();
        assert_eq!(r.net, u(990_000));
        let d = h.protocol.distribute(asset).unwrap();
        assert_eq!(d.rate_per_share, u(99));
        assert_eq!(h.protocol.finances(asset).unwrap().pending, U256::ZERO);
        assert_eq!(h.protocol.protocol_revenue(), u(100 + 10_000));

        assert_eq!(h.protocol.claimable_amount(&BENEFICIARY, asset), u(99_000));
        assert_eq!(h.protocol.claim(BENEFICIARY, asset).unwrap(), u(99_000));
        assert_eq!(h.payouts.total_paid_to(&BENEFICIARY), u(99_000));

        let err = h.protocol.claim(BENEFICIARY, asset).unwrap_err();
        assert!(matches!(err, ProtocolError::Yield(YieldError::NothingToClaim { .. })));
        assert_eq!(h.payouts.total_paid_to(&BENEFICIARY), u(99_000));
    }

    #[test]
    fn test_failed_claim_payout_rolls_back() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        h.protocol.deposit_income(BENEFICIARY, asset, u(1_000_000)).unwrap();
        h.protocol.distribute(asset).unwrap();
        h.protocol.drain_events();

        h.payouts.set_failing(true);
        let err = h.protocol.claim(BENEFICIARY, asset).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(h.protocol.claimable_amount(&BENEFICIARY, asset), u(99_000));
        assert_eq!(h.protocol.lifetime_claimed(&BENEFICIARY, asset), U256::ZERO);
        assert!(h.protocol.drain_events().is_empty());

        h.payouts.set_failing(false);
        assert_eq!(h.protocol.claim(BENEFICIARY, asset).unwrap(), u(99_000));
        assert_eq!(h.protocol.lifetime_claimed(&BENEFICIARY, asset), u(99_000));
    }

    #[test]
    fn test_purchase_splits_cost_fee_and_refund() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        let receipt = h.protocol.purchase_shares(ALICE, asset, 50, u(5_150)).unwrap();
        assert_eq!(receipt.quote.cost, u(5_000));
        assert_eq!(receipt.quote.fee, u(100));
        assert_eq!(receipt.refund, u(50));

        assert_eq!(h.protocol.balance_of(asset, &ALICE), 50);
        assert_eq!(h.protocol.balance_of(asset, &SALE), 8_650);
        assert_eq!(h.payouts.total_paid_to(&BENEFICIARY), u(5_000));
        assert_eq!(h.payouts.total_paid_to(&ALICE), u(50));
        assert_eq!(h.protocol.protocol_revenue(), u(100));
    }

    #[test]
    fn test_purchase_guards_and_rollback() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        assert_eq!(
            h.protocol.purchase_shares(ALICE, asset, 50, u(5_099)),
            Err(ProtocolError::InsufficientPayment {
                required: u(5_100),
                paid: u(5_099)
            })
        );
        assert!(matches!(
            h.protocol.purchase_shares(ALICE, asset, 8_701, u(u64::MAX)),
            Err(ProtocolError::SoldOut { available: 8_700, .. })
        ));

        h.payouts.set_failing(true);
        assert!(h.protocol.purchase_shares(ALICE, asset, 50, u(5_100)).is_err());
        assert_eq!(h.protocol.balance_of(asset, &ALICE), 0);
        assert_eq!(h.protocol.balance_of(asset, &SALE), 8_700);
        assert_eq!(h.protocol.protocol_revenue(), U256::ZERO);
    }

    #[test]
    fn test_pause_gates_user_operations_only() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        h.protocol
            .set_trusted_remote(OWNER, DomainId(2), sender_of(2))
            .unwrap();
        assert!(h.protocol.set_paused(ALICE, true).is_err());
        h.protocol.set_paused(OWNER, true).unwrap();

        let paused = |r: Result<(), ProtocolError>| {
            assert_eq!(r.unwrap_err().kind(), ErrorKind::Authorization);
        };
        paused(h.protocol.purchase_shares(ALICE, asset, 1, u(1_000)).map(|_| ()));
        paused(h.protocol.deposit_income(BENEFICIARY, asset, u(1_000)).map(|_| ()));
        paused(h.protocol.transfer_shares(BENEFICIARY, asset, ALICE, 1));
        paused(h.protocol.create_asset(OWNER, new_asset(1)).map(|_| ()));

        // Inbound deliveries are callbacks and still land while paused.
        let mut remote = harness_for(2, 1);
        remote.protocol.set_trusted_remote(OWNER, DomainId(1), sender_of(1)).unwrap();
        let other = remote.protocol.create_asset(OWNER, new_asset(1_000)).unwrap();
        remote
            .protocol
            .initiate_transfer(
                BENEFICIARY,
                TransferRequest {
                    asset: other,
                    recipient: ALICE,
                    amount: 10,
                    destination: DomainId(1),
                    fee_paid: u(1_000),
                },
            )
            .unwrap();
        for msg in remote.wire.drain_for(DomainId(1)) {
            h.protocol.on_inbound_message(RELAYER, msg).unwrap();
        }
        assert_eq!(h.protocol.balance_of(other, &ALICE), 10);
        assert_eq!(h.protocol.balance_of(asset, &ALICE), 0);
    }

    #[test]
    fn test_first_assets_of_two_domains_stay_apart() {
        let mut a = harness_for(1, 2);
        let mut b = harness_for(2, 1);
        a.protocol.set_trusted_remote(OWNER, DomainId(2), sender_of(2)).unwrap();
        b.protocol.set_trusted_remote(OWNER, DomainId(1), sender_of(1)).unwrap();
        let on_a = a.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        let on_b = b.protocol.create_asset(OWNER, new_asset(2_000_000)).unwrap();
        assert_eq!(on_a, AssetId::new(DomainId(1), 1));
        assert_eq!(on_b, AssetId::new(DomainId(2), 1));

        a.protocol
            .initiate_transfer(
                BENEFICIARY,
                TransferRequest {
                    asset: on_a,
                    recipient: BENEFICIARY,
                    amount: 200,
                    destination: DomainId(2),
                    fee_paid: u(1_000),
                },
            )
            .unwrap();
        for msg in a.wire.drain_for(DomainId(2)) {
            let r = b.protocol.on_inbound_message(RELAYER, msg).unwrap();
            assert_eq!(r.asset, on_a);
        }

        assert_eq!(b.protocol.balance_of(on_a, &BENEFICIARY), 200);
        assert_eq!(b.protocol.balance_of(on_b, &BENEFICIARY), 1_000);
        assert_eq!(b.protocol.total_minted(on_b), TOTAL_SHARES);
        assert_eq!(b.protocol.asset(on_b).unwrap().valuation, u(2_000_000));

        let next = b.protocol.create_asset(OWNER, new_asset(500_000)).unwrap();
        assert_eq!(next, AssetId::new(DomainId(2), 2));
        assert_eq!(b.protocol.total_minted(next), TOTAL_SHARES);
    }

    #[test]
    fn test_unbacked_return_of_native_asset_rejected() {
        let mut h = harness();
        h.protocol.set_trusted_remote(OWNER, DomainId(2), sender_of(2)).unwrap();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        h.protocol.drain_events();

        let msg = InboundMessage {
            message_id: MessageId(alloy_primitives::B256::repeat_byte(0x77)),
            source_domain: DomainId(2),
            sender: sender_of(2),
            payload: Bytes::from(
                crate::estate::bridge::TransferPayload {
                    asset_id: U256::from(asset.0),
                    sender: BOB,
                    recipient: BOB,
                    amount: u(500),
                    sequence: u(1),
                }
                .abi_encode(),
            ),
        };
        let err = h.protocol.on_inbound_message(RELAYER, msg.clone()).unwrap_err();
        assert!(matches!(err, ProtocolError::Bridge(BridgeError::UnbackedReturn { locked: 0, .. })));
        assert_eq!(err.kind(), ErrorKind::Trust);
        assert_eq!(h.protocol.balance_of(asset, &BOB), 0);
        assert_eq!(h.protocol.total_minted(asset), TOTAL_SHARES);
        assert!(h.protocol.transfer(&msg.message_id).is_err());
        assert!(h.protocol.drain_events().is_empty());
    }

    #[test]
    fn test_holder_who_sold_out_can_still_claim() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        h.protocol.deposit_income(BENEFICIARY, asset, u(1_000_000)).unwrap();
        h.protocol.distribute(asset).unwrap();

        h.protocol.transfer_shares(BENEFICIARY, asset, ALICE, 1_000).unwrap();
        assert_eq!(h.protocol.balance_of(asset, &BENEFICIARY), 0);
        assert_eq!(h.protocol.claim(BENEFICIARY, asset).unwrap(), u(99_000));
        assert_eq!(h.payouts.total_paid_to(&BENEFICIARY), u(99_000));
        assert_eq!(h.protocol.claimable_amount(&ALICE, asset), U256::ZERO);
    }

    #[test]
    fn test_two_domain_round_trip_restores_escrow() {
        let mut a = harness_for(1, 2);
        let mut b = harness_for(2, 1);
        a.protocol.set_trusted_remote(OWNER, DomainId(2), sender_of(2)).unwrap();
        b.protocol.set_trusted_remote(OWNER, DomainId(1), sender_of(1)).unwrap();
        let asset = a.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();

        // A → B
        let out = a
            .protocol
            .initiate_transfer(
                BENEFICIARY,
                TransferRequest {
                    asset,
                    recipient: BOB,
                    amount: 200,
                    destination: DomainId(2),
                    fee_paid: u(1_250),
                },
            )
            .unwrap();
        assert_eq!(out.refund, u(250));
        assert_eq!(a.payouts.total_paid_to(&BENEFICIARY), u(250));
        assert_eq!(a.protocol.locked_supply(asset), 200);
        assert_eq!(a.protocol.balance_of(asset, &BENEFICIARY), 800);

        let delivered = a.wire.drain_for(DomainId(2));
        assert_eq!(delivered.len(), 1);
        let inbound = b.protocol.on_inbound_message(RELAYER, delivered[0].clone()).unwrap();
        assert_eq!(inbound.minted, 200);
        assert_eq!(b.protocol.balance_of(asset, &BOB), 200);

        // Replay is rejected and changes nothing.
        let err = b.protocol.on_inbound_message(RELAYER, delivered[0].clone()).unwrap_err();
        assert_eq!(err, ProtocolError::Bridge(BridgeError::DuplicateMessage(out.message_id)));
        assert_eq!(b.protocol.balance_of(asset, &BOB), 200);
        assert_eq!(b.protocol.total_minted(asset), 200);

        // B → A
        b.protocol
            .initiate_transfer(
                BOB,
                TransferRequest {
                    asset,
                    recipient: ALICE,
                    amount: 200,
                    destination: DomainId(1),
                    fee_paid: u(1_000),
                },
            )
            .unwrap();
        assert_eq!(b.protocol.locked_supply(asset), 200);
        for msg in b.wire.drain_for(DomainId(1)) {
            let r = a.protocol.on_inbound_message(RELAYER, msg).unwrap();
            assert_eq!((r.unlocked, r.minted), (200, 0));
        }
        assert_eq!(a.protocol.locked_supply(asset), 0);
        assert_eq!(a.protocol.balance_of(asset, &ALICE), 200);
        assert_eq!(a.protocol.total_minted(asset), TOTAL_SHARES);

        let record = a.protocol.transfer(&out.message_id).unwrap();
        assert_eq!(record.amount, 200);
        let record = b.protocol.transfer(&out.message_id).unwrap();
        assert!(record.completed);
    }

    #[test]
    fn test_untrusted_inbound_mints_nothing() {
        let mut a = harness_for(1, 2);
        let mut b = harness_for(2, 1);
        a.protocol.set_trusted_remote(OWNER, DomainId(2), sender_of(2)).unwrap();
        // B does not trust domain 1.
        let asset = a.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        a.protocol
            .initiate_transfer(
                BENEFICIARY,
                TransferRequest {
                    asset,
                    recipient: BOB,
                    amount: 5,
                    destination: DomainId(2),
                    fee_paid: u(1_000),
                },
            )
            .unwrap();
        let msg = a.wire.drain_for(DomainId(2)).remove(0);
        let err = b.protocol.on_inbound_message(RELAYER, msg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Trust);
        assert_eq!(b.protocol.total_minted(asset), 0);
    }

    #[test]
    fn test_failed_refund_becomes_withdrawable_credit() {
        let mut h = harness();
        h.protocol.set_trusted_remote(OWNER, DomainId(2), sender_of(2)).unwrap();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        h.payouts.set_failing(true);
        h.protocol
            .initiate_transfer(
                BENEFICIARY,
                TransferRequest {
                    asset,
                    recipient: BOB,
                    amount: 5,
                    destination: DomainId(2),
                    fee_paid: u(1_300),
                },
            )
            .unwrap();
        assert_eq!(h.protocol.refund_credit(&BENEFICIARY), u(300));
        assert!(h
            .protocol
            .drain_events()
            .iter()
            .any(|e| matches!(e, ProtocolEvent::RefundCredited { amount, .. } if *amount == u(300))));

        assert!(h.protocol.withdraw_refund(BENEFICIARY).is_err());
        assert_eq!(h.protocol.refund_credit(&BENEFICIARY), u(300));

        h.payouts.set_failing(false);
        assert_eq!(h.protocol.withdraw_refund(BENEFICIARY).unwrap(), u(300));
        assert_eq!(h.protocol.refund_credit(&BENEFICIARY), U256::ZERO);
        assert_eq!(
            h.protocol.withdraw_refund(BENEFICIARY),
            Err(ProtocolError::NothingToRefund(BENEFICIARY))
        );
    }

    #[test]
    fn test_oracle_round_trip_and_stale_response() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        let first = h.protocol.request_valuation(OWNER, asset).unwrap();
        let second = h.protocol.request_valuation(OWNER, asset).unwrap();
        assert_eq!(h.oracle.sent().len(), 2);
        h.protocol.drain_events();

        let payload = Bytes::from(u(3_000_000).abi_encode());
        let outcome = h
            .protocol
            .on_valuation_response(ORACLE, first, payload.clone(), None)
            .unwrap();
        assert!(matches!(outcome, ResponseOutcome::Failed { .. }));
        assert_eq!(h.protocol.asset(asset).unwrap().valuation, u(1_000_000));

        h.clock.advance(60);
        h.protocol
            .on_valuation_response(ORACLE, second, payload, None)
            .unwrap();
        assert_eq!(h.protocol.asset(asset).unwrap().valuation, u(3_000_000));
        assert_eq!(h.protocol.share_price(asset).unwrap(), u(300));

        let events = h.protocol.drain_events();
        assert!(matches!(events[0], ProtocolEvent::ValuationFailed { .. }));
        assert!(matches!(events[1], ProtocolEvent::ValuationUpdated { .. }));
        assert_eq!(h.protocol.valuation_request(&first), None);
    }

    #[test]
    fn test_report_tracks_latest_valuation_request() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        assert_eq!(h.protocol.asset_report(asset).unwrap().latest_valuation, None);

        let first = h.protocol.request_valuation(OWNER, asset).unwrap();
        h.protocol
            .on_valuation_response(ORACLE, first, Bytes::from(u(2_000_000).abi_encode()), None)
            .unwrap();
        let latest = h.protocol.asset_report(asset).unwrap().latest_valuation.unwrap();
        assert_eq!((latest.id, latest.status), (first, RequestStatus::Fulfilled));

        let second = h.protocol.request_valuation(OWNER, asset).unwrap();
        assert_eq!(h.protocol.valuation_request(&first), None);
        let latest = h.protocol.asset_report(asset).unwrap().latest_valuation.unwrap();
        assert_eq!((latest.id, latest.status), (second, RequestStatus::Issued));

        // A rejected request leaves the journal as it was.
        assert!(h.protocol.request_valuation(ALICE, asset).is_err());
        assert_eq!(h.oracle.sent().len(), 2);
        assert_eq!(h.protocol.asset_report(asset).unwrap().latest_valuation.unwrap().id, second);
    }

    #[test]
    fn test_expenses_journaled_on_commit_only() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        h.protocol
            .record_expense(BENEFICIARY, asset, u(2_500), "roof repair".into())
            .unwrap();
        assert!(h.protocol.record_expense(ALICE, asset, u(1), "nope".into()).is_err());
        assert!(h.protocol.record_expense(BENEFICIARY, asset, U256::ZERO, "zero".into()).is_err());

        let expenses = h.protocol.expenses(asset);
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].description, "roof repair");
        assert_eq!(h.protocol.finances(asset).unwrap().total_expenses, u(2_500));
    }

    #[test]
    fn test_auto_distribution_and_due_schedule() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        h.protocol.set_auto_distribution(BENEFICIARY, asset, true).unwrap();
        let r = h.protocol.deposit_income(BENEFICIARY, asset, u(1_000_000)).unwrap();
        assert!(r.distribution.is_some());
        assert!(h.protocol.due_assets().is_empty());

        h.protocol.set_auto_distribution(OWNER, asset, false).unwrap();
        h.protocol.deposit_income(BENEFICIARY, asset, u(1_000_000)).unwrap();
        h.protocol.set_auto_distribution(OWNER, asset, true).unwrap();
        assert!(h.protocol.due_assets().is_empty());

        h.clock.advance(DISTRIBUTION_PERIOD_SECS);
        assert_eq!(h.protocol.due_assets(), vec![asset]);
        let results = h.protocol.distribute_due();
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok());
        assert_eq!(h.protocol.claimable_amount(&BENEFICIARY, asset), u(198_000));
    }

    #[test]
    fn test_asset_report_roi() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        h.protocol.deposit_income(BENEFICIARY, asset, u(1_000_000)).unwrap();
        h.protocol.distribute(asset).unwrap();

        let report = h.protocol.asset_report(asset).unwrap();
        assert_eq!(report.share_price, u(100));
        assert_eq!(report.minted, TOTAL_SHARES);
        assert_eq!(report.in_sale, 8_700);
        assert_eq!(report.roi_percent, dec!(99));
        assert_eq!(report.finances.total_income, u(1_000_000));
    }

    #[test]
    fn test_rejected_operations_publish_nothing() {
        let mut h = harness();
        let asset = h.protocol.create_asset(OWNER, new_asset(1_000_000)).unwrap();
        assert_eq!(h.protocol.drain_events().len(), 1);

        assert!(h.protocol.distribute(asset).is_err());
        assert!(h.protocol.transfer_shares(ALICE, asset, BOB, 1).is_err());
        assert!(h.protocol.update_valuation(ALICE, asset, u(1)).is_err());
        assert!(h.protocol.drain_events().is_empty());

        h.protocol.transfer_shares(BENEFICIARY, asset, BOB, 10).unwrap();
        assert_eq!(
            h.protocol.drain_events(),
            vec![ProtocolEvent::SharesTransferred {
                asset,
                from: BENEFICIARY,
                to: BOB,
                amount: 10
            }]
        );
    }
}
