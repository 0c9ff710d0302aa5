//! Cross-Domain Transfer Coordinator.
//!
//! Outbound: shares are locked into the local bridge escrow and a message
//! carrying `(asset_id, sender, recipient, amount, sequence)` is handed to the
//! [`MessageTransport`]. Inbound: shares are released from the bridge escrow
//! when they are returning home, and minted (up to the fixed supply) for the
//! remainder. Asset ids carry their origin domain, so a foreign asset never
//! lands on a local one. An asset's origin domain minted its whole supply at
//! creation and only ever unlocks on inbound; a delivery that would mint it
//! there is refused.
//!
//! Outbound and inbound records are independent; the source side never learns
//! whether the destination completed. Records are returned to the caller
//! rather than stored, and the caller appends them to a [`TransferLog`] once
//! the surrounding operation commits.
//!
//! The coordinator only ever touches the Share Ledger.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolValue};
use serde::Serialize;
use tracing::{info, warn};

use super::access::{AccessControl, AccessError};
use super::shares::{LedgerError, ShareLedger};
use super::transport::{InboundMessage, MessageTransport, TransportError};
use super::types::{AssetId, DomainId, MessageId};

sol! {
    /// Wire payload of a cross-domain share transfer.
    #[derive(Debug, PartialEq, Eq)]
    struct TransferPayload {
        uint256 asset_id;
        address sender;
        address recipient;
        uint256 amount;
        uint256 sequence;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("destination {0} is the local domain")]
    UnsupportedDestination(DomainId),

    #[error("no trusted remote for destination {0}")]
    UntrustedRemote(DomainId),

    #[error("message from untrusted source {0}")]
    UntrustedSource(DomainId),

    #[error("sender {actual} is not the trusted remote {expected} of {domain}")]
    UntrustedSender {
        domain: DomainId,
        expected: Address,
        actual: Address,
    },

    #[error("message {0} was already processed")]
    DuplicateMessage(MessageId),

    #[error("asset {asset} originates here: {requested} shares returned, {locked} locked")]
    UnbackedReturn {
        asset: AssetId,
        locked: u64,
        requested: u64,
    },

    #[error("malformed transfer payload: {0}")]
    MalformedPayload(String),

    #[error("fee {paid} below required {required}")]
    InsufficientFee { required: U256, paid: U256 },

    #[error("transfer amount must be greater than zero")]
    ZeroAmount,

    #[error("recipient must be set")]
    ZeroRecipient,

    #[error("unknown transfer {0}")]
    UnknownTransfer(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossDomainTransfer {
    pub message_id: MessageId,
    pub asset: AssetId,
    pub sender: Address,
    pub recipient: Address,
    pub amount: u64,
    pub source: DomainId,
    pub destination: DomainId,
    pub sequence: u64,
    pub direction: Direction,
    /// Inbound records are complete on creation; outbound ones stay
    /// "initiated" from the source's point of view.
    pub completed: bool,
    pub at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub asset: AssetId,
    pub recipient: Address,
    pub amount: u64,
    pub destination: DomainId,
    pub fee_paid: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub message_id: MessageId,
    pub sequence: u64,
    pub fee: U256,
    /// `fee_paid - fee`; paid back by the caller of `initiate`.
    pub refund: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundReceipt {
    pub message_id: MessageId,
    pub asset: AssetId,
    pub recipient: Address,
    pub unlocked: u64,
    pub minted: u64,
}

/// Append-only record of every transfer this domain sent or completed.
#[derive(Debug, Default)]
pub struct TransferLog {
    outbound: HashMap<MessageId, CrossDomainTransfer>,
    inbound: HashMap<MessageId, CrossDomainTransfer>,
}

impl TransferLog {
    pub fn get(&self, id: &MessageId) -> Result<&CrossDomainTransfer, BridgeError> {
        self.outbound
            .get(id)
            .or_else(|| self.inbound.get(id))
            .ok_or(BridgeError::UnknownTransfer(*id))
    }

    pub fn is_delivered(&self, id: &MessageId) -> bool {
        self.inbound.contains_key(id)
    }

    pub fn record(&mut self, transfer: CrossDomainTransfer) {
        let book = match transfer.direction {
            Direction::Outbound => &mut self.outbound,
            Direction::Inbound => &mut self.inbound,
        };
        book.insert(transfer.message_id, transfer);
    }
}

#[derive(Debug, Clone)]
pub struct TransferCoordinator {
    local_domain: DomainId,
    escrow: Address,
    trusted: BTreeMap<DomainId, Address>,
    sequence: u64,
}

impl TransferCoordinator {
    pub fn new(local_domain: DomainId, escrow: Address) -> Self {
        Self {
            local_domain,
            escrow,
            trusted: BTreeMap::new(),
            sequence: 0,
        }
    }

    pub fn local_domain(&self) -> DomainId {
        self.local_domain
    }

    pub fn escrow(&self) -> Address {
        self.escrow
    }

    pub fn trusted_remote(&self, domain: DomainId) -> Option<Address> {
        self.trusted.get(&domain).copied()
    }

    pub fn trusted_remotes(&self) -> &BTreeMap<DomainId, Address> {
        &self.trusted
    }

    /// Shares of `asset` currently held in bridge custody.
    pub fn locked_supply(&self, ledger: &ShareLedger, asset: AssetId) -> u64 {
        ledger.balance_of(asset, &self.escrow)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    // ── Administration ──

    pub fn set_trusted_remote(
        &mut self,
        acl: &AccessControl,
        caller: Address,
        domain: DomainId,
        remote: Address,
    ) -> Result<(), BridgeError> {
        acl.require_owner(caller, "set trusted remotes")?;
        if domain == self.local_domain {
            return Err(BridgeError::UnsupportedDestination(domain));
        }
        self.trusted.insert(domain, remote);
        info!("🌉 trusted remote {} = {}", domain, remote);
        Ok(())
    }

    pub fn remove_trusted_remote(
        &mut self,
        acl: &AccessControl,
        caller: Address,
        domain: DomainId,
    ) -> Result<(), BridgeError> {
        acl.require_owner(caller, "remove trusted remotes")?;
        if self.trusted.remove(&domain).is_some() {
            info!("🌉 trusted remote {} removed", domain);
        }
        Ok(())
    }

    // ── Outbound ──

    /// Lock `amount` shares and send them to `destination`. Returns the
    /// receipt and the Initiated record.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate(
        &mut self,
        acl: &AccessControl,
        ledger: &mut ShareLedger,
        transport: &mut dyn MessageTransport,
        caller: Address,
        req: TransferRequest,
        now: u64,
    ) -> Result<(TransferReceipt, CrossDomainTransfer), BridgeError> {
        acl.require_not_paused()?;
        if req.destination == self.local_domain {
            return Err(BridgeError::UnsupportedDestination(req.destination));
        }
        if !self.trusted.contains_key(&req.destination) {
            return Err(BridgeError::UntrustedRemote(req.destination));
        }
        if req.amount == 0 {
            return Err(BridgeError::ZeroAmount);
        }
        if req.recipient == Address::ZERO {
            return Err(BridgeError::ZeroRecipient);
        }
        let available = ledger.balance_of(req.asset, &caller);
        if available < req.amount {
            return Err(LedgerError::InsufficientBalance {
                asset: req.asset,
                holder: caller,
                available,
                requested: req.amount,
            }
            .into());
        }

        let sequence = self.sequence + 1;
        let payload = Bytes::from(
            TransferPayload {
                asset_id: U256::from(req.asset.0),
                sender: caller,
                recipient: req.recipient,
                amount: U256::from(req.amount),
                sequence: U256::from(sequence),
            }
            .abi_encode(),
        );
        let fee = transport.quote_fee(req.destination, &payload)?;
        if req.fee_paid < fee {
            return Err(BridgeError::InsufficientFee {
                required: fee,
                paid: req.fee_paid,
            });
        }

        // Effects before the transport call.
        ledger.transfer(req.asset, caller, self.escrow, req.amount)?;
        self.sequence = sequence;

        let message_id = transport.send(req.destination, payload, fee)?;
        info!(
            "🌉 ➡️ {} asset {} x{} {} → {}@{} seq={}",
            message_id, req.asset, req.amount, caller, req.recipient, req.destination, sequence
        );
        let record = CrossDomainTransfer {
            message_id,
            asset: req.asset,
            sender: caller,
            recipient: req.recipient,
            amount: req.amount,
            source: self.local_domain,
            destination: req.destination,
            sequence,
            direction: Direction::Outbound,
            completed: false,
            at: now,
        };
        let receipt = TransferReceipt {
            message_id,
            sequence,
            fee,
            refund: req.fee_paid - fee,
        };
        Ok((receipt, record))
    }

    // ── Inbound ──

    /// Deliver an inbound transfer. `log` is consulted for replays; the
    /// Completed record comes back with the receipt.
    pub fn on_inbound(
        &self,
        acl: &AccessControl,
        ledger: &mut ShareLedger,
        log: &TransferLog,
        caller: Address,
        msg: &InboundMessage,
        now: u64,
    ) -> Result<(InboundReceipt, CrossDomainTransfer), BridgeError> {
        acl.require_message_transport(caller)?;

        let expected = self
            .trusted
            .get(&msg.source_domain)
            .copied()
            .ok_or(BridgeError::UntrustedSource(msg.source_domain))?;
        if msg.sender != expected {
            warn!(
                "🌉 message {} from {} has sender {}, expected {}",
                msg.message_id, msg.source_domain, msg.sender, expected
            );
            return Err(BridgeError::UntrustedSender {
                domain: msg.source_domain,
                expected,
                actual: msg.sender,
            });
        }
        if log.is_delivered(&msg.message_id) {
            return Err(BridgeError::DuplicateMessage(msg.message_id));
        }

        let payload = decode_payload(&msg.payload)?;
        let asset = AssetId(payload.asset_id);

        let locked = ledger.balance_of(asset, &self.escrow);
        let unlocked = locked.min(payload.amount);
        let minted = payload.amount - unlocked;
        if minted > 0 && asset.origin() == self.local_domain {
            warn!(
                "🌉 message {} returns {} of native asset {} with only {} locked",
                msg.message_id, payload.amount, asset, locked
            );
            return Err(BridgeError::UnbackedReturn {
                asset,
                locked,
                requested: payload.amount,
            });
        }
        // Mint first: it is the only step that can fail.
        if minted > 0 {
            ledger.mint(asset, payload.recipient, minted)?;
        }
        if unlocked > 0 {
            ledger.transfer(asset, self.escrow, payload.recipient, unlocked)?;
        }

        info!(
            "🌉 ⬅️ {} asset {} x{} → {} from {} (unlocked={} minted={})",
            msg.message_id, asset, payload.amount, payload.recipient, msg.source_domain, unlocked, minted
        );
        let record = CrossDomainTransfer {
            message_id: msg.message_id,
            asset,
            sender: payload.sender,
            recipient: payload.recipient,
            amount: payload.amount,
            source: msg.source_domain,
            destination: self.local_domain,
            sequence: payload.sequence,
            direction: Direction::Inbound,
            completed: true,
            at: now,
        };
        let receipt = InboundReceipt {
            message_id: msg.message_id,
            asset,
            recipient: payload.recipient,
            unlocked,
            minted,
        };
        Ok((receipt, record))
    }
}

/// Decoded and range-checked transfer payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub asset_id: u64,
    pub sender: Address,
    pub recipient: Address,
    pub amount: u64,
    pub sequence: u64,
}

pub fn decode_payload(bytes: &[u8]) -> Result<DecodedTransfer, BridgeError> {
    let raw = <TransferPayload as SolValue>::abi_decode(bytes)
        .map_err(|e| BridgeError::MalformedPayload(e.to_string()))?;
    let narrow = |v: U256, field: &str| {
        u64::try_from(v).map_err(|_| BridgeError::MalformedPayload(format!("{} out of range", field)))
    };
    let decoded = DecodedTransfer {
        asset_id: narrow(raw.asset_id, "asset id")?,
        sender: raw.sender,
        recipient: raw.recipient,
        amount: narrow(raw.amount, "amount")?,
        sequence: narrow(raw.sequence, "sequence")?,
    };
    if decoded.amount == 0 {
        return Err(BridgeError::MalformedPayload("zero amount".into()));
    }
    if decoded.recipient == Address::ZERO {
        return Err(BridgeError::MalformedPayload("zero recipient".into()));
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estate::transport::{LoopbackConfig, LoopbackMessageTransport};
    use crate::estate::types::TOTAL_SHARES;
    use alloy_primitives::B256;

    const OWNER: Address = Address::repeat_byte(1);
    const ALICE: Address = Address::repeat_byte(5);
    const BOB: Address = Address::repeat_byte(6);
    const MSG_TRANSPORT: Address = Address::repeat_byte(0xbb);
    const ESCROW: Address = Address::repeat_byte(0xee);
    const REMOTE: Address = Address::repeat_byte(0x22);
    const HOME: DomainId = DomainId(1);
    const PEER: DomainId = DomainId(2);
    const ASSET: AssetId = AssetId::new(HOME, 1);
    const FOREIGN: AssetId = AssetId::new(PEER, 7);

    fn acl() -> AccessControl {
        AccessControl::new(OWNER, Address::repeat_byte(0xaa), MSG_TRANSPORT)
    }

    fn transport() -> LoopbackMessageTransport {
        LoopbackMessageTransport::new(LoopbackConfig {
            local_domain: HOME,
            local_sender: Address::repeat_byte(0x11),
            base_fee: U256::from(1_000u64),
            fee_per_byte: U256::ZERO,
            destinations: [PEER].into_iter().collect(),
        })
    }

    fn setup() -> (AccessControl, ShareLedger, TransferCoordinator, TransferLog) {
        let acl = acl();
        let mut ledger = ShareLedger::new([ESCROW]);
        ledger.mint(ASSET, ALICE, 500).unwrap();
        let mut bridge = TransferCoordinator::new(HOME, ESCROW);
        bridge.set_trusted_remote(&acl, OWNER, PEER, REMOTE).unwrap();
        (acl, ledger, bridge, TransferLog::default())
    }

    fn request(amount: u64, fee_paid: u64) -> TransferRequest {
        TransferRequest {
            asset: ASSET,
            recipient: BOB,
            amount,
            destination: PEER,
            fee_paid: U256::from(fee_paid),
        }
    }

    fn inbound(id: u8, sender: Address, asset: AssetId, amount: u64) -> InboundMessage {
        InboundMessage {
            message_id: MessageId(B256::repeat_byte(id)),
            source_domain: PEER,
            sender,
            payload: Bytes::from(
                TransferPayload {
                    asset_id: U256::from(asset.0),
                    sender: BOB,
                    recipient: ALICE,
                    amount: U256::from(amount),
                    sequence: U256::from(1u64),
                }
                .abi_encode(),
            ),
        }
    }

    fn deliver(
        acl: &AccessControl,
        ledger: &mut ShareLedger,
        bridge: &TransferCoordinator,
        log: &mut TransferLog,
        msg: &InboundMessage,
    ) -> Result<InboundReceipt, BridgeError> {
        let (receipt, record) = bridge.on_inbound(acl, ledger, log, MSG_TRANSPORT, msg, 1)?;
        log.record(record);
        Ok(receipt)
    }

    #[test]
    fn test_initiate_locks_and_sends() {
        let (acl, mut ledger, mut bridge, mut log) = setup();
        let mut t = transport();
        let (receipt, record) = bridge
            .initiate(&acl, &mut ledger, &mut t, ALICE, request(200, 1_500), 7)
            .unwrap();
        assert_eq!(receipt.fee, U256::from(1_000u64));
        assert_eq!(receipt.refund, U256::from(500u64));
        assert_eq!(receipt.sequence, 1);
        assert_eq!(ledger.balance_of(ASSET, &ALICE), 300);
        assert_eq!(bridge.locked_supply(&ledger, ASSET), 200);
        assert_eq!(ledger.total_minted(ASSET), 500);

        let sent = t.drain_for(PEER);
        assert_eq!(sent.len(), 1);
        let decoded = decode_payload(&sent[0].payload).unwrap();
        assert_eq!(decoded.sender, ALICE);
        assert_eq!(decoded.recipient, BOB);
        assert_eq!(decoded.amount, 200);

        assert_eq!(record.direction, Direction::Outbound);
        assert!(!record.completed);
        log.record(record);
        assert_eq!(log.get(&receipt.message_id).unwrap().amount, 200);
        assert!(!log.is_delivered(&receipt.message_id));
    }

    #[test]
    fn test_initiate_insufficient_balance_locks_nothing() {
        let (acl, mut ledger, mut bridge, _) = setup();
        let mut t = transport();
        let err = bridge
            .initiate(&acl, &mut ledger, &mut t, ALICE, request(501, 5_000), 0)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Ledger(LedgerError::InsufficientBalance { .. })));
        assert_eq!(bridge.locked_supply(&ledger, ASSET), 0);
        assert_eq!(t.pending(), 0);
        assert_eq!(bridge.sequence(), 0);
    }

    #[test]
    fn test_initiate_destination_checks() {
        let (acl, mut ledger, mut bridge, _) = setup();
        let mut t = transport();
        let mut req = request(1, 5_000);
        req.destination = HOME;
        assert_eq!(
            bridge.initiate(&acl, &mut ledger, &mut t, ALICE, req, 0),
            Err(BridgeError::UnsupportedDestination(HOME))
        );
        let mut req = request(1, 5_000);
        req.destination = DomainId(9);
        assert_eq!(
            bridge.initiate(&acl, &mut ledger, &mut t, ALICE, req, 0),
            Err(BridgeError::UntrustedRemote(DomainId(9)))
        );
    }

    #[test]
    fn test_initiate_insufficient_fee() {
        let (acl, mut ledger, mut bridge, _) = setup();
        let mut t = transport();
        let err = bridge
            .initiate(&acl, &mut ledger, &mut t, ALICE, request(10, 999), 0)
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::InsufficientFee {
                required: U256::from(1_000u64),
                paid: U256::from(999u64)
            }
        );
        assert_eq!(ledger.balance_of(ASSET, &ALICE), 500);
    }

    #[test]
    fn test_inbound_mints_foreign_asset() {
        let (acl, mut ledger, bridge, mut log) = setup();
        let msg = inbound(1, REMOTE, FOREIGN, 40);
        let receipt = deliver(&acl, &mut ledger, &bridge, &mut log, &msg).unwrap();
        assert_eq!(receipt.minted, 40);
        assert_eq!(receipt.unlocked, 0);
        assert_eq!(ledger.balance_of(FOREIGN, &ALICE), 40);
        assert_eq!(ledger.total_minted(FOREIGN), 40);
        assert_eq!(ledger.balance_of(ASSET, &ALICE), 500);
        let record = log.get(&msg.message_id).unwrap();
        assert_eq!(record.direction, Direction::Inbound);
        assert!(record.completed);
    }

    #[test]
    fn test_inbound_unlocks_returning_shares_first() {
        let (acl, mut ledger, mut bridge, mut log) = setup();
        let mut t = transport();
        bridge
            .initiate(&acl, &mut ledger, &mut t, ALICE, request(100, 1_000), 0)
            .unwrap();
        let receipt =
            deliver(&acl, &mut ledger, &bridge, &mut log, &inbound(1, REMOTE, ASSET, 60)).unwrap();
        assert_eq!(receipt.unlocked, 60);
        assert_eq!(receipt.minted, 0);
        assert_eq!(bridge.locked_supply(&ledger, ASSET), 40);
        assert_eq!(ledger.total_minted(ASSET), 500);
        assert!(ledger.verify_conservation().is_ok());
    }

    #[test]
    fn test_inbound_native_asset_never_minted() {
        let (acl, mut ledger, mut bridge, mut log) = setup();
        let msg = inbound(1, REMOTE, ASSET, 60);
        assert_eq!(
            deliver(&acl, &mut ledger, &bridge, &mut log, &msg),
            Err(BridgeError::UnbackedReturn {
                asset: ASSET,
                locked: 0,
                requested: 60
            })
        );

        let mut t = transport();
        bridge
            .initiate(&acl, &mut ledger, &mut t, ALICE, request(100, 1_000), 0)
            .unwrap();
        let msg = inbound(2, REMOTE, ASSET, 150);
        assert!(matches!(
            deliver(&acl, &mut ledger, &bridge, &mut log, &msg),
            Err(BridgeError::UnbackedReturn { locked: 100, .. })
        ));
        assert_eq!(bridge.locked_supply(&ledger, ASSET), 100);
        assert_eq!(ledger.balance_of(ASSET, &ALICE), 400);
        assert_eq!(ledger.total_minted(ASSET), 500);
        assert!(log.get(&msg.message_id).is_err());
    }

    #[test]
    fn test_inbound_replay_is_rejected() {
        let (acl, mut ledger, bridge, mut log) = setup();
        let msg = inbound(1, REMOTE, FOREIGN, 40);
        deliver(&acl, &mut ledger, &bridge, &mut log, &msg).unwrap();
        assert_eq!(
            deliver(&acl, &mut ledger, &bridge, &mut log, &msg),
            Err(BridgeError::DuplicateMessage(msg.message_id))
        );
        assert_eq!(ledger.balance_of(FOREIGN, &ALICE), 40);
    }

    #[test]
    fn test_inbound_trust_checks() {
        let (acl, mut ledger, bridge, log) = setup();
        let mut msg = inbound(1, REMOTE, FOREIGN, 40);
        msg.source_domain = DomainId(9);
        assert_eq!(
            bridge.on_inbound(&acl, &mut ledger, &log, MSG_TRANSPORT, &msg, 0),
            Err(BridgeError::UntrustedSource(DomainId(9)))
        );

        let msg = inbound(2, Address::repeat_byte(0x33), FOREIGN, 40);
        assert!(matches!(
            bridge.on_inbound(&acl, &mut ledger, &log, MSG_TRANSPORT, &msg, 0),
            Err(BridgeError::UntrustedSender { .. })
        ));

        let msg = inbound(3, REMOTE, FOREIGN, 40);
        assert!(matches!(
            bridge.on_inbound(&acl, &mut ledger, &log, OWNER, &msg, 0),
            Err(BridgeError::Access(_))
        ));
        assert_eq!(ledger.total_minted(FOREIGN), 0);
    }

    #[test]
    fn test_inbound_mint_capped_by_fixed_supply() {
        let (acl, mut ledger, bridge, mut log) = setup();
        deliver(&acl, &mut ledger, &bridge, &mut log, &inbound(1, REMOTE, FOREIGN, TOTAL_SHARES)).unwrap();
        let msg = inbound(2, REMOTE, FOREIGN, 1);
        let err = deliver(&acl, &mut ledger, &bridge, &mut log, &msg).unwrap_err();
        assert!(matches!(err, BridgeError::Ledger(LedgerError::SupplyCapExceeded { .. })));
        assert!(log.get(&msg.message_id).is_err());
        assert_eq!(ledger.total_minted(FOREIGN), TOTAL_SHARES);
    }

    #[test]
    fn test_malformed_payload() {
        let (acl, mut ledger, bridge, log) = setup();
        let mut msg = inbound(1, REMOTE, FOREIGN, 40);
        msg.payload = Bytes::from(vec![0u8; 7]);
        assert!(matches!(
            bridge.on_inbound(&acl, &mut ledger, &log, MSG_TRANSPORT, &msg, 0),
            Err(BridgeError::MalformedPayload(_))
        ));
        let zero = inbound(2, REMOTE, FOREIGN, 0);
        assert!(matches!(
            bridge.on_inbound(&acl, &mut ledger, &log, MSG_TRANSPORT, &zero, 0),
            Err(BridgeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_trusted_remote_admin() {
        let (acl, _, mut bridge, _) = setup();
        assert!(bridge.set_trusted_remote(&acl, ALICE, DomainId(3), REMOTE).is_err());
        bridge.remove_trusted_remote(&acl, OWNER, PEER).unwrap();
        assert_eq!(bridge.trusted_remote(PEER), None);
    }
}
