use alloy_primitives::{Address, U256};
use serde::Serialize;

use super::access::AccessError;
use super::bridge::BridgeError;
use super::distribution::YieldError;
use super::oracle::OracleError;
use super::registry::RegistryError;
use super::shares::LedgerError;
use super::transport::TransportError;
use super::types::AssetId;

/// Failure family, used by callers to decide whether retrying could help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authorization,
    State,
    Value,
    Trust,
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Yield(#[from] YieldError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("payment {paid} below required {required}")]
    InsufficientPayment { required: U256, paid: U256 },

    #[error("sale escrow holds {available} shares of asset {asset}, {requested} requested")]
    SoldOut {
        asset: AssetId,
        available: u64,
        requested: u64,
    },

    #[error("no refund credit for {0}")]
    NothingToRefund(Address),

    #[error("{0} would overflow")]
    Overflow(&'static str),

    #[error("protocol state invariant broken: {0}")]
    Invariant(String),
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Access(_) => ErrorKind::Authorization,
            ProtocolError::Ledger(e) => ledger_kind(e),
            ProtocolError::Registry(e) => registry_kind(e),
            ProtocolError::Yield(e) => match e {
                YieldError::Registry(e) => registry_kind(e),
                YieldError::Access(_) | YieldError::NotBeneficiary { .. } => ErrorKind::Authorization,
                YieldError::ZeroAmount | YieldError::Overflow(_) => ErrorKind::Value,
                YieldError::NothingToDistribute(_)
                | YieldError::NothingToClaim { .. }
                | YieldError::NotOpened(_) => ErrorKind::State,
            },
            ProtocolError::Oracle(e) => match e {
                OracleError::Access(_) => ErrorKind::Authorization,
                OracleError::Registry(e) => registry_kind(e),
                OracleError::Transport(_) => ErrorKind::Transport,
                OracleError::InvalidParams(_) => ErrorKind::Value,
            },
            ProtocolError::Bridge(e) => match e {
                BridgeError::Access(_) => ErrorKind::Authorization,
                BridgeError::Ledger(e) => ledger_kind(e),
                BridgeError::Transport(_) => ErrorKind::Transport,
                BridgeError::UnknownTransfer(_) => ErrorKind::State,
                BridgeError::InsufficientFee { .. }
                | BridgeError::ZeroAmount
                | BridgeError::ZeroRecipient => ErrorKind::Value,
                BridgeError::UnsupportedDestination(_)
                | BridgeError::UntrustedRemote(_)
                | BridgeError::UntrustedSource(_)
                | BridgeError::UntrustedSender { .. }
                | BridgeError::DuplicateMessage(_)
                | BridgeError::UnbackedReturn { .. }
                | BridgeError::MalformedPayload(_) => ErrorKind::Trust,
            },
            ProtocolError::Transport(_) => ErrorKind::Transport,
            ProtocolError::InsufficientPayment { .. }
            | ProtocolError::SoldOut { .. }
            | ProtocolError::Overflow(_) => ErrorKind::Value,
            ProtocolError::NothingToRefund(_) | ProtocolError::Invariant(_) => ErrorKind::State,
        }
    }

    /// Supply-cap violations abort the whole operation and point at a
    /// misconfigured trusted remote.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Ledger(LedgerError::SupplyCapExceeded { .. })
                | ProtocolError::Bridge(BridgeError::Ledger(LedgerError::SupplyCapExceeded { .. }))
                | ProtocolError::Invariant(_)
        )
    }
}

fn ledger_kind(e: &LedgerError) -> ErrorKind {
    match e {
        LedgerError::ConservationViolated { .. } => ErrorKind::State,
        LedgerError::ZeroAmount
        | LedgerError::InsufficientBalance { .. }
        | LedgerError::SupplyCapExceeded { .. } => ErrorKind::Value,
    }
}

fn registry_kind(e: &RegistryError) -> ErrorKind {
    match e {
        RegistryError::NotFound(_) | RegistryError::Inactive(_) => ErrorKind::State,
        RegistryError::InvalidValue(_) => ErrorKind::Value,
        RegistryError::Access(_) => ErrorKind::Authorization,
        RegistryError::Ledger(e) => ledger_kind(e),
    }
}
