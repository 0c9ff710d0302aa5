//! External collaborator interfaces and their in-memory implementations.
//!
//! The core only ever talks to these traits. Calls are synchronous: a send
//! hands the request to the transport and returns an identifier; the answer
//! comes back later as a separate callback operation.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use alloy_primitives::{keccak256, Address, Bytes, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::oracle::ValuationQuery;
use super::types::{CorrelationId, DomainId, MessageId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("{0} is not served by this transport")]
    UnsupportedDomain(DomainId),

    #[error("transport rejected the request: {0}")]
    Rejected(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

// ─────────────────────────────────────────────────────────
// Interfaces
// ─────────────────────────────────────────────────────────

pub trait ValuationTransport: Send {
    fn send(&mut self, query: &ValuationQuery) -> Result<CorrelationId, TransportError>;
}

pub trait MessageTransport: Send {
    fn quote_fee(&self, destination: DomainId, payload: &[u8]) -> Result<U256, TransportError>;

    fn send(
        &mut self,
        destination: DomainId,
        payload: Bytes,
        fee: U256,
    ) -> Result<MessageId, TransportError>;
}

/// External value transfer (income payouts, sale proceeds, refunds).
pub trait PayoutSink: Send {
    fn pay(&mut self, to: Address, amount: U256) -> Result<(), TransportError>;
}

/// A cross-domain message as handed over by the transport, tagged with the
/// source domain and sender identity the transport verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub source_domain: DomainId,
    pub sender: Address,
    pub payload: Bytes,
}

// ─────────────────────────────────────────────────────────
// In-memory valuation transport
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ValuationLog {
    sent: Vec<(CorrelationId, ValuationQuery)>,
    offline: bool,
}

/// Records queries and hands out deterministic correlation ids.
/// Responses are delivered by whoever holds a clone of this handle.
#[derive(Debug, Clone, Default)]
pub struct RecordingValuationTransport {
    inner: Arc<Mutex<ValuationLog>>,
}

impl RecordingValuationTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(CorrelationId, ValuationQuery)> {
        self.inner.lock().map(|l| l.sent.clone()).unwrap_or_default()
    }

    pub fn last_correlation_id(&self) -> Option<CorrelationId> {
        self.inner
            .lock()
            .ok()
            .and_then(|l| l.sent.last().map(|(id, _)| *id))
    }

    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut l) = self.inner.lock() {
            l.offline = offline;
        }
    }
}

impl ValuationTransport for RecordingValuationTransport {
    fn send(&mut self, query: &ValuationQuery) -> Result<CorrelationId, TransportError> {
        let mut log = self
            .inner
            .lock()
            .map_err(|_| TransportError::Unavailable("valuation log poisoned".into()))?;
        if log.offline {
            return Err(TransportError::Unavailable("valuation transport offline".into()));
        }
        let nonce = U256::from(log.sent.len() as u64 + 1);
        let id = CorrelationId(keccak256((U256::from(query.asset_id), nonce).abi_encode()));
        log.sent.push((id, query.clone()));
        debug!("📡 valuation query {} for asset #{}", id, query.asset_id);
        Ok(id)
    }
}

// ─────────────────────────────────────────────────────────
// Loopback message transport
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    pub local_domain: DomainId,
    /// Identity remote coordinators see as the sender of our messages.
    pub local_sender: Address,
    pub base_fee: U256,
    pub fee_per_byte: U256,
    pub destinations: BTreeSet<DomainId>,
}

#[derive(Debug, Default)]
struct Outbox {
    queue: VecDeque<(DomainId, InboundMessage)>,
    nonce: u64,
}

/// Queues outbound messages in memory until the peer domain has them.
/// In-process relays use `drain_for`; remote relayers `peek_for` a batch and
/// `acknowledge` it once delivered, so nothing is lost if they fail midway.
#[derive(Debug, Clone)]
pub struct LoopbackMessageTransport {
    cfg: LoopbackConfig,
    outbox: Arc<Mutex<Outbox>>,
}

impl LoopbackMessageTransport {
    pub fn new(cfg: LoopbackConfig) -> Self {
        Self {
            cfg,
            outbox: Arc::new(Mutex::new(Outbox::default())),
        }
    }

    /// Remove and return every queued message addressed to `destination`.
    pub fn drain_for(&self, destination: DomainId) -> Vec<InboundMessage> {
        let Ok(mut outbox) = self.outbox.lock() else {
            return Vec::new();
        };
        let (matching, rest): (VecDeque<_>, VecDeque<_>) = outbox
            .queue
            .drain(..)
            .partition(|(dst, _)| *dst == destination);
        outbox.queue = rest;
        matching.into_iter().map(|(_, m)| m).collect()
    }

    /// Every queued message addressed to `destination`, left in place.
    pub fn peek_for(&self, destination: DomainId) -> Vec<InboundMessage> {
        let Ok(outbox) = self.outbox.lock() else {
            return Vec::new();
        };
        outbox
            .queue
            .iter()
            .filter(|(dst, _)| *dst == destination)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Drop the listed messages for `destination` from the queue. Returns how
    /// many were removed; unknown ids are ignored.
    pub fn acknowledge(&self, destination: DomainId, ids: &[MessageId]) -> usize {
        let Ok(mut outbox) = self.outbox.lock() else {
            return 0;
        };
        let before = outbox.queue.len();
        outbox
            .queue
            .retain(|(dst, m)| *dst != destination || !ids.contains(&m.message_id));
        let removed = before - outbox.queue.len();
        debug!("📨 {} acknowledged {} of {}", destination, removed, ids.len());
        removed
    }

    pub fn pending(&self) -> usize {
        self.outbox.lock().map(|o| o.queue.len()).unwrap_or(0)
    }
}

impl MessageTransport for LoopbackMessageTransport {
    fn quote_fee(&self, destination: DomainId, payload: &[u8]) -> Result<U256, TransportError> {
        if !self.cfg.destinations.contains(&destination) {
            return Err(TransportError::UnsupportedDomain(destination));
        }
        self.cfg
            .fee_per_byte
            .checked_mul(U256::from(payload.len()))
            .and_then(|per_byte| per_byte.checked_add(self.cfg.base_fee))
            .ok_or_else(|| TransportError::Rejected("fee quote overflows".into()))
    }

    fn send(
        &mut self,
        destination: DomainId,
        payload: Bytes,
        fee: U256,
    ) -> Result<MessageId, TransportError> {
        let required = self.quote_fee(destination, &payload)?;
        if fee < required {
            return Err(TransportError::Rejected(format!(
                "fee {} below quote {}",
                fee, required
            )));
        }
        let mut outbox = self
            .outbox
            .lock()
            .map_err(|_| TransportError::Unavailable("outbox poisoned".into()))?;
        outbox.nonce += 1;
        let message_id = MessageId(keccak256(
            (
                self.cfg.local_domain.0,
                destination.0,
                U256::from(outbox.nonce),
                payload.clone(),
            )
                .abi_encode(),
        ));
        outbox.queue.push_back((
            destination,
            InboundMessage {
                message_id,
                source_domain: self.cfg.local_domain,
                sender: self.cfg.local_sender,
                payload,
            },
        ));
        debug!("📨 queued {} → {}", message_id, destination);
        Ok(message_id)
    }
}

// ─────────────────────────────────────────────────────────
// Payout ledger
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PayoutLog {
    paid: Vec<(Address, U256)>,
    failing: bool,
}

/// Off-chain settlement record of every value transfer the core makes.
/// Can be switched into a failing mode to exercise revert paths.
#[derive(Debug, Clone, Default)]
pub struct PayoutLedger {
    inner: Arc<Mutex<PayoutLog>>,
}

impl PayoutLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut log) = self.inner.lock() {
            log.failing = failing;
        }
    }

    pub fn payments(&self) -> Vec<(Address, U256)> {
        self.inner.lock().map(|l| l.paid.clone()).unwrap_or_default()
    }

    pub fn total_paid_to(&self, who: &Address) -> U256 {
        self.payments()
            .iter()
            .filter(|(to, _)| to == who)
            .fold(U256::ZERO, |acc, (_, amt)| acc.saturating_add(*amt))
    }
}

impl PayoutSink for PayoutLedger {
    fn pay(&mut self, to: Address, amount: U256) -> Result<(), TransportError> {
        let mut log = self
            .inner
            .lock()
            .map_err(|_| TransportError::Unavailable("payout log poisoned".into()))?;
        if log.failing {
            warn!("💸 payout of {} to {} rejected", amount, to);
            return Err(TransportError::Rejected(format!("payout to {} failed", to)));
        }
        log.paid.push((to, amount));
        Ok(())
    }
}
