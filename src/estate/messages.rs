//! Event and snapshot types published by the protocol node.
//!
//! Events are collected on the staged state during an operation and only
//! leave the façade once that operation commits, so subscribers never see
//! effects of a rolled-back call.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use super::types::{AssetId, CorrelationId, DomainId, MessageId};

// ─────────────────────────────────────────────────────────
// Committed protocol events (Protocol → broadcast subscribers)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    AssetCreated {
        asset: AssetId,
        beneficiary: Address,
        valuation: U256,
    },
    AssetStatusChanged {
        asset: AssetId,
        active: bool,
    },
    ValuationRequested {
        asset: AssetId,
        request_id: CorrelationId,
    },
    ValuationUpdated {
        asset: AssetId,
        old: U256,
        new: U256,
    },
    /// An oracle response was rejected (source error, bad payload, stale).
    ValuationFailed {
        asset: AssetId,
        request_id: CorrelationId,
        reason: String,
    },
    SharesPurchased {
        asset: AssetId,
        buyer: Address,
        amount: u64,
        cost: U256,
        fee: U256,
    },
    SharesTransferred {
        asset: AssetId,
        from: Address,
        to: Address,
        amount: u64,
    },
    IncomeDeposited {
        asset: AssetId,
        amount: U256,
        management_fee: U256,
        net: U256,
    },
    YieldDistributed {
        asset: AssetId,
        rate_per_share: U256,
        credited: U256,
        retained: U256,
        performance_fee: U256,
    },
    YieldClaimed {
        asset: AssetId,
        holder: Address,
        amount: U256,
    },
    ExpenseRecorded {
        asset: AssetId,
        amount: U256,
        description: String,
    },
    TransferInitiated {
        message_id: MessageId,
        asset: AssetId,
        sender: Address,
        recipient: Address,
        amount: u64,
        destination: DomainId,
        sequence: u64,
    },
    TransferCompleted {
        message_id: MessageId,
        asset: AssetId,
        recipient: Address,
        amount: u64,
        source: DomainId,
    },
    TrustedRemoteChanged {
        domain: DomainId,
        remote: Option<Address>,
    },
    PauseChanged {
        paused: bool,
    },
    ManagerChanged {
        manager: Address,
        authorized: bool,
    },
    /// A refund could not be paid out and was booked as a withdrawable credit.
    RefundCredited {
        to: Address,
        amount: U256,
    },
    RefundWithdrawn {
        to: Address,
        amount: U256,
    },
}

impl ProtocolEvent {
    pub fn asset(&self) -> Option<AssetId> {
        use ProtocolEvent::*;
        match self {
            AssetCreated { asset, .. }
            | AssetStatusChanged { asset, .. }
            | ValuationRequested { asset, .. }
            | ValuationUpdated { asset, .. }
            | ValuationFailed { asset, .. }
            | SharesPurchased { asset, .. }
            | SharesTransferred { asset, .. }
            | IncomeDeposited { asset, .. }
            | YieldDistributed { asset, .. }
            | YieldClaimed { asset, .. }
            | ExpenseRecorded { asset, .. }
            | TransferInitiated { asset, .. }
            | TransferCompleted { asset, .. } => Some(*asset),
            TrustedRemoteChanged { .. }
            | PauseChanged { .. }
            | ManagerChanged { .. }
            | RefundCredited { .. }
            | RefundWithdrawn { .. } => None,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Node stats (Node → watch subscribers)
// ─────────────────────────────────────────────────────────

/// Counters published after every request the node handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub committed: u64,
    pub rejected: u64,
    pub events: u64,
    pub assets: u64,
    pub paused: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let ev = ProtocolEvent::PauseChanged { paused: true };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "pause_changed");
        assert_eq!(json["paused"], true);
        assert_eq!(ev.asset(), None);

        let ev = ProtocolEvent::AssetStatusChanged {
            asset: AssetId(3),
            active: false,
        };
        assert_eq!(ev.asset(), Some(AssetId(3)));
        let back: ProtocolEvent = serde_json::from_value(serde_json::to_value(&ev).unwrap()).unwrap();
        assert_eq!(back, ev);
    }
}
