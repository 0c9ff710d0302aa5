//! Access control policy.
//!
//! Passed explicitly into every service call instead of living in global state.
//! Also holds the identities of the two privileged callback paths (valuation
//! transport, message transport); those are checked on every callback.

use std::collections::BTreeSet;

use alloy_primitives::Address;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("{caller} is not authorized to {action}")]
    Unauthorized {
        caller: Address,
        action: &'static str,
    },

    #[error("protocol is paused")]
    Paused,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessControl {
    owner: Address,
    managers: BTreeSet<Address>,
    paused: bool,
    oracle_transport: Address,
    message_transport: Address,
}

impl AccessControl {
    pub fn new(owner: Address, oracle_transport: Address, message_transport: Address) -> Self {
        Self {
            owner,
            managers: BTreeSet::new(),
            paused: false,
            oracle_transport,
            message_transport,
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_manager(&self, who: &Address) -> bool {
        *who == self.owner || self.managers.contains(who)
    }

    // ── Guards ──

    pub fn require_owner(&self, caller: Address, action: &'static str) -> Result<(), AccessError> {
        if caller == self.owner {
            Ok(())
        } else {
            Err(AccessError::Unauthorized { caller, action })
        }
    }

    /// Owner or an authorized manager.
    pub fn require_manager(&self, caller: Address, action: &'static str) -> Result<(), AccessError> {
        if self.is_manager(&caller) {
            Ok(())
        } else {
            Err(AccessError::Unauthorized { caller, action })
        }
    }

    pub fn require_not_paused(&self) -> Result<(), AccessError> {
        if self.paused {
            Err(AccessError::Paused)
        } else {
            Ok(())
        }
    }

    pub fn require_oracle_transport(&self, caller: Address) -> Result<(), AccessError> {
        if caller == self.oracle_transport {
            Ok(())
        } else {
            Err(AccessError::Unauthorized {
                caller,
                action: "deliver valuation responses",
            })
        }
    }

    pub fn require_message_transport(&self, caller: Address) -> Result<(), AccessError> {
        if caller == self.message_transport {
            Ok(())
        } else {
            Err(AccessError::Unauthorized {
                caller,
                action: "deliver cross-domain messages",
            })
        }
    }

    // ── Administration (owner only) ──

    pub fn set_paused(&mut self, caller: Address, paused: bool) -> Result<(), AccessError> {
        self.require_owner(caller, if paused { "pause" } else { "unpause" })?;
        self.paused = paused;
        info!("⏸️ paused={} by {}", paused, caller);
        Ok(())
    }

    pub fn set_manager(
        &mut self,
        caller: Address,
        manager: Address,
        authorized: bool,
    ) -> Result<(), AccessError> {
        self.require_owner(caller, "change managers")?;
        if authorized {
            self.managers.insert(manager);
        } else {
            self.managers.remove(&manager);
        }
        info!("🔑 manager {} authorized={}", manager, authorized);
        Ok(())
    }
}
